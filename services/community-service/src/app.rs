use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use common_identity::AuthGuard;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::metrics::ServiceMetrics;
use crate::user_handlers::{current_user, health, metrics_endpoint, session};

#[derive(Clone)]
pub struct AppState {
    pub guard: Arc<AuthGuard>,
    pub metrics: Arc<ServiceMetrics>,
}

impl FromRef<AppState> for Arc<AuthGuard> {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/users/me", get(current_user))
        .route("/session", get(session))
        .with_state(state)
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(%origin, ?err, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
}
