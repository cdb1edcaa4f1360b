//! HTTP routes and the application router.

pub mod secrets;
pub mod sys;
pub mod trash;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{ACTOR_HEADER, request_context};
use crate::state::AppState;

/// Largest accepted request body. Comfortably above the plaintext limit
/// once JSON-escaped.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// Build the Axum router with all routes and middleware.
///
/// `kdf_concurrency` bounds how many create and view requests run key
/// derivation at once.
pub fn build_router(state: Arc<AppState>, kdf_concurrency: usize) -> Router {
    let secrets = secrets::kdf_router()
        .layer(GlobalConcurrencyLimitLayer::new(kdf_concurrency))
        .merge(secrets::router());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(ACTOR_HEADER)]);

    Router::new()
        .nest("/v1/secrets", secrets)
        .nest("/v1/orgs", trash::router())
        .nest("/v1/sys", sys::router())
        .layer(axum_mw::from_fn(request_context))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
