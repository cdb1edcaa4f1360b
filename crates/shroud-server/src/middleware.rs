//! Request context middleware for Shroud.
//!
//! Extracts the caller identity (`X-Shroud-Actor`), `User-Agent` and client
//! IP from each request and injects a [`RequestContext`] into the request
//! extensions for downstream handlers to pass to the access log.
//!
//! The client IP is the first hop of `X-Forwarded-For` when present,
//! otherwise the socket peer address. Authentication happens upstream; the
//! actor header is trusted as given.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::middleware::Next;
use axum::response::Response;

use shroud_core::audit::RequestContext;

/// Header carrying the authenticated caller's identity.
pub const ACTOR_HEADER: &str = "x-shroud-actor";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Longest header value copied into the access log.
const MAX_HEADER_LEN: usize = 512;

/// Middleware that attaches a [`RequestContext`] to every request.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let ctx = context_from_headers(req.headers(), peer);
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// Build a context from request headers and the optional peer address.
#[must_use]
pub fn context_from_headers(headers: &HeaderMap, peer: Option<String>) -> RequestContext {
    let forwarded = header(headers, FORWARDED_FOR_HEADER).and_then(|value| {
        value
            .split(',')
            .map(str::trim)
            .find(|hop| !hop.is_empty())
            .map(str::to_owned)
    });

    RequestContext {
        actor: header(headers, ACTOR_HEADER).filter(|a| !a.is_empty()),
        ip_address: forwarded.or(peer),
        user_agent: header(headers, USER_AGENT.as_str()),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    let mut end = value.len().min(MAX_HEADER_LEN);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    Some(value[..end].to_owned())
}
