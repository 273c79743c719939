use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_identity::{Identity, OptionalIdentity, RequireIdentity};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(response) => response,
        Err(err) => {
            error!(?err, "failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Profile of the authenticated caller.
pub async fn current_user(RequireIdentity(identity): RequireIdentity) -> Json<Identity> {
    Json(identity)
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub authenticated: bool,
    pub identity: Option<Identity>,
}

/// Who is browsing, if anyone. Anonymous callers get `authenticated: false`.
pub async fn session(OptionalIdentity(identity): OptionalIdentity) -> Json<SessionView> {
    Json(SessionView {
        authenticated: identity.is_some(),
        identity,
    })
}
