//! Trash routes: `/v1/orgs/{org_id}/trash`
//!
//! Lists an organization's soft-deleted secrets that are still restorable.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use shroud_core::record::TrashEntry;

use crate::error::AppError;
use crate::extract::Path;
use crate::state::AppState;

/// Build the `/v1/orgs` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/{org_id}/trash", get(list_trash))
}

/// Response body for `GET /v1/orgs/{org_id}/trash`.
#[derive(Debug, Serialize)]
pub struct TrashResponse {
    pub entries: Vec<TrashEntry>,
}

async fn list_trash(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<String>,
) -> Result<Json<TrashResponse>, AppError> {
    let entries = state.coordinator.list_trash(&org_id).await?;
    Ok(Json(TrashResponse { entries }))
}
