//! Administrative HTTP surface.
//!
//! Consumed by operators and tests, not by the rendering host:
//!
//! - `GET /cache-stats` — enumerate both partitions
//! - `DELETE /cache-stats` — clear everything except static routes
//! - `GET|POST /revalidate?tag=<tag>` — invalidate a tag
//! - `GET /healthz` — liveness

mod error;
mod middleware;

pub use error::{ApiError, ApiErrorBody};

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router, middleware as axum_middleware};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cache::{CacheStore, StaticRouteSet};

use middleware::log_responses;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<CacheStore>,
    /// Manifest of permanently-static route keys, consulted at clear time.
    pub static_routes_manifest: Option<PathBuf>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/cache-stats", get(cache_stats).delete(clear_cache))
        .route("/revalidate", get(revalidate).post(revalidate))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
}

async fn cache_stats(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    cleared_entries: usize,
}

async fn clear_cache(State(state): State<AdminState>) -> Result<impl IntoResponse, ApiError> {
    let static_routes = match &state.static_routes_manifest {
        Some(path) => StaticRouteSet::load(path).await.map_err(|err| {
            // Clearing without the exclusion list would delete static
            // content, so an unreadable manifest aborts the clear.
            ApiError::internal("static route manifest unreadable", Some(err.to_string()))
        })?,
        None => StaticRouteSet::default(),
    };

    let cleared_entries = state.store.clear_all(&static_routes).await;
    Ok(Json(ClearResponse { cleared_entries }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RevalidateQuery {
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct RevalidateResponse {
    tag: String,
    revalidated_at: String,
}

async fn revalidate(
    State(state): State<AdminState>,
    Query(query): Query<RevalidateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(tag) = query.tag.filter(|tag| !tag.is_empty()) else {
        return Err(ApiError::bad_request("missing `tag` query parameter", None));
    };

    state.store.revalidate_tags(std::slice::from_ref(&tag)).await;

    let revalidated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Ok(Json(RevalidateResponse {
        tag,
        revalidated_at,
    }))
}

async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}
