//! Secret routes: `/v1/secrets/*`
//!
//! Creation and viewing run key derivation and are served by
//! [`kdf_router`], which the application wraps in a concurrency limit. Every
//! other owner operation is served by [`router`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use shroud_core::audit::{AccessLogEntry, ActivityQuery, RequestContext};
use shroud_core::record::{SecretSummary, TrashEntry};
use shroud_core::{CreateSecret, PolicyUpdate, ViewOutcome};

use crate::error::AppError;
use crate::extract::{self, Path, Query};
use crate::state::AppState;

/// Routes that derive a key from a password.
///
/// - `POST /v1/secrets`: create
/// - `POST /v1/secrets/{id}/view`: reveal
pub fn kdf_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_secret))
        .route("/{id}/view", post(view_secret))
}

/// Metadata and owner routes.
///
/// - `GET    /v1/secrets/{id}`: summary
/// - `DELETE /v1/secrets/{id}`: soft delete
/// - `PATCH  /v1/secrets/{id}/policy`: change disclosure policy
/// - `POST   /v1/secrets/{id}/restore`: restore from trash
/// - `GET    /v1/secrets/{id}/activity`: access history
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{id}", get(get_summary).delete(delete_secret))
        .route("/{id}/policy", patch(update_policy))
        .route("/{id}/restore", post(restore_secret))
        .route("/{id}/activity", get(get_activity))
}

// ── Request / Response types ─────────────────────────────────────────

/// Request body for `POST /v1/secrets`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSecretRequest {
    pub organization_id: String,
    pub team_id: Option<String>,
    pub name: String,
    pub plaintext: String,
    pub password: String,
    pub max_views: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub burn_on_read: bool,
}

/// Request body for `POST /v1/secrets/{id}/view`.
#[derive(Deserialize)]
pub struct ViewRequest {
    pub password: String,
}

/// Response body for a successful view.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewResponse<'a> {
    pub plaintext: &'a str,
    pub view_count: u32,
    pub remaining_views: Option<u32>,
    pub burned: bool,
}

/// Response body for `GET /v1/secrets/{id}/activity`.
#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub entries: Vec<AccessLogEntry>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn create_secret(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    extract::Json(body): extract::Json<CreateSecretRequest>,
) -> Result<(StatusCode, Json<SecretSummary>), AppError> {
    let request = CreateSecret {
        organization_id: body.organization_id,
        team_id: body.team_id,
        name: body.name,
        plaintext: Zeroizing::new(body.plaintext),
        password: Zeroizing::new(body.password),
        max_views: body.max_views,
        expires_at: body.expires_at,
        burn_on_read: body.burn_on_read,
    };
    let summary = state.coordinator.create(request, &ctx).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn view_secret(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    extract::Json(body): extract::Json<ViewRequest>,
) -> Result<Response, AppError> {
    let password = Zeroizing::new(body.password);
    match state.coordinator.view(id, &password, &ctx).await? {
        ViewOutcome::Revealed(secret) => {
            let response = ViewResponse {
                plaintext: &secret.plaintext,
                view_count: secret.view_count,
                remaining_views: secret.remaining_views,
                burned: secret.burned,
            };
            Ok(Json(response).into_response())
        }
        ViewOutcome::Denied(denial) => Err(AppError::Gone(denial)),
        ViewOutcome::WrongPassword => Err(AppError::WrongPassword),
    }
}

async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SecretSummary>, AppError> {
    Ok(Json(state.coordinator.summary(id).await?))
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    extract::Json(update): extract::Json<PolicyUpdate>,
) -> Result<Json<SecretSummary>, AppError> {
    Ok(Json(state.coordinator.update_policy(id, &update, &ctx).await?))
}

async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<TrashEntry>, AppError> {
    Ok(Json(state.coordinator.delete(id, &ctx).await?))
}

async fn restore_secret(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SecretSummary>, AppError> {
    Ok(Json(state.coordinator.restore(id, &ctx).await?))
}

async fn get_activity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityResponse>, AppError> {
    let entries = state.coordinator.activity(id, query).await?;
    Ok(Json(ActivityResponse { entries }))
}
