mod middleware;
mod proxy;

pub use proxy::ProxyErrorBody;

use std::sync::Arc;

use axum::{Router, http::StatusCode, middleware::from_fn, routing::get};

use crate::cache::{SwrCache, SwrPolicy};
use crate::config::CacheSettings;

use super::upstream::UpstreamClient;

/// Resolved per-route freshness policies.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicies {
    pub services: SwrPolicy,
    pub health_professionals: SwrPolicy,
    pub service_health_professionals: SwrPolicy,
}

impl From<&CacheSettings> for CachePolicies {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            services: settings.services,
            health_professionals: settings.health_professionals,
            service_health_professionals: settings.service_health_professionals,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
    pub cache: SwrCache,
    pub policies: CachePolicies,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/services", get(proxy::list_services))
        .route(
            "/api/health_professionals",
            get(proxy::list_health_professionals),
        )
        .route(
            "/api/services/{id}/health_professionals",
            get(proxy::service_health_professionals),
        )
        .route("/_health", get(health))
        .with_state(state)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
