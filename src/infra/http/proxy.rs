//! Cached proxy handlers for the booking API read endpoints.
//!
//! Each handler binds a route to its cache key, its freshness policy, and
//! the upstream path, then delegates to the SWR engine. Synchronous fetch
//! failures collapse into one uniform 500 body; the upstream detail is only
//! kept in the logs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::cache::{KEY_HEALTH_PROFESSIONALS, KEY_SERVICES, derive_key};
use crate::infra::upstream::UpstreamError;

use super::AppState;

const FETCH_FAILED_MESSAGE: &str = "Failed to fetch services";

/// Uniform upstream-failure body. Callers must not rely on per-route error
/// differentiation; every cached route answers with this exact shape.
#[derive(Debug, Serialize)]
pub struct ProxyErrorBody {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "statusMessage")]
    pub status_message: &'static str,
}

pub struct FetchFailed;

impl FetchFailed {
    fn report(route: &'static str, err: &UpstreamError) -> Self {
        error!(
            target = "sportello::http::proxy",
            route,
            upstream_status = ?err.status(),
            error = %err,
            "upstream fetch failed"
        );
        Self
    }
}

impl IntoResponse for FetchFailed {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ProxyErrorBody {
                status_code: 500,
                status_message: FETCH_FAILED_MESSAGE,
            }),
        )
            .into_response()
    }
}

pub(super) async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<Value>, FetchFailed> {
    let key = derive_key(KEY_SERVICES, &[]);
    let upstream = state.upstream.clone();
    state
        .cache
        .get(&key, state.policies.services, move || async move {
            upstream.fetch_json("/api/services").await
        })
        .await
        .map(Json)
        .map_err(|err| FetchFailed::report("services", &err))
}

pub(super) async fn list_health_professionals(
    State(state): State<AppState>,
) -> Result<Json<Value>, FetchFailed> {
    let key = derive_key(KEY_HEALTH_PROFESSIONALS, &[]);
    let upstream = state.upstream.clone();
    state
        .cache
        .get(&key, state.policies.health_professionals, move || {
            async move { upstream.fetch_json("/api/health_professionals").await }
        })
        .await
        .map(Json)
        .map_err(|err| FetchFailed::report("health_professionals", &err))
}

pub(super) async fn service_health_professionals(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FetchFailed> {
    let key = derive_key(KEY_SERVICES, &[Some(id.as_str())]);
    let path = format!("/api/services/{id}/health_professionals");
    let upstream = state.upstream.clone();
    state
        .cache
        .get(
            &key,
            state.policies.service_health_professionals,
            move || async move { upstream.fetch_json(&path).await },
        )
        .await
        .map(Json)
        .map_err(|err| FetchFailed::report("service_health_professionals", &err))
}
