use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{Request, StatusCode};
use axum::Router;
use common_identity::testing::{TestKeyPair, TokenBuilder, TEST_AUDIENCE, TEST_ISSUER};
use common_identity::{AuthGuard, IdentityConfig, TokenVerifier};
use community_service::metrics::ServiceMetrics;
use community_service::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn app_with(guard: AuthGuard, metrics: Arc<ServiceMetrics>) -> Router {
    build_router(AppState {
        guard: Arc::new(guard),
        metrics,
    })
}

fn enabled_app() -> (Router, Arc<ServiceMetrics>) {
    let metrics = Arc::new(ServiceMetrics::new().expect("metrics"));
    let verifier = TokenVerifier::builder(IdentityConfig::new(
        TEST_ISSUER,
        TEST_AUDIENCE,
        "http://unused.invalid/jwks",
    ))
    .with_signing_key(TestKeyPair::shared().signing_key("k1"))
    .with_metrics(metrics.identity().clone())
    .build()
    .expect("verifier");
    let app = app_with(AuthGuard::new(Arc::new(verifier)), metrics.clone());
    (app, metrics)
}

fn request(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn me_without_credentials_is_401_with_challenge() {
    let (app, _) = enabled_app();
    let response = app.oneshot(request("/users/me", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get(WWW_AUTHENTICATE).unwrap(), "Bearer");
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn me_with_valid_token_returns_identity() {
    let (app, _) = enabled_app();
    let token = TokenBuilder::new("user-123")
        .claim("cognito:username", json!("alice"))
        .claim("email", json!("alice@example.com"))
        .claim("email_verified", json!(true))
        .sign(TestKeyPair::shared());

    let response = app
        .oneshot(request("/users/me", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body,
        json!({
            "user_id": "user-123",
            "username": "alice",
            "email": "alice@example.com",
            "email_verified": true
        })
    );
}

#[tokio::test]
async fn rejection_body_does_not_reveal_cause() {
    let (app, _) = enabled_app();
    let expired = TokenBuilder::new("user-1")
        .expires_in(-10)
        .sign(TestKeyPair::shared());
    let unknown_key = TokenBuilder::new("user-1")
        .kid("k9")
        .sign(TestKeyPair::shared());
    let forged = TokenBuilder::new("user-1").sign(TestKeyPair::other());

    let mut bodies = Vec::new();
    for token in [expired.as_str(), unknown_key.as_str(), forged.as_str()] {
        let response = app
            .clone()
            .oneshot(request("/users/me", Some(token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        bodies.push(body_text(response).await);
    }

    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(!bodies[0].contains("k9"));
    assert!(!bodies[0].contains("signature"));
}

#[tokio::test]
async fn session_is_anonymous_without_or_with_bad_token() {
    let (app, _) = enabled_app();
    for token in [None, Some("garbage"), Some("a.b.c")] {
        let response = app.clone().oneshot(request("/session", token)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({ "authenticated": false, "identity": null }));
    }
}

#[tokio::test]
async fn session_reports_identity_for_valid_token() {
    let (app, _) = enabled_app();
    let token = TokenBuilder::new("user-7")
        .claim("username", json!("carol"))
        .sign(TestKeyPair::shared());

    let response = app.oneshot(request("/session", Some(&token))).await.unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["identity"]["user_id"], "user-7");
    assert_eq!(body["identity"]["username"], "carol");
    assert_eq!(body["identity"]["email"], "");
    assert_eq!(body["identity"]["email_verified"], false);
}

#[tokio::test]
async fn disabled_authentication_rejects_required_and_allows_anonymous() {
    let metrics = Arc::new(ServiceMetrics::new().expect("metrics"));
    let app = app_with(AuthGuard::disabled(), metrics);
    let token = TokenBuilder::new("user-1").sign(TestKeyPair::shared());

    let response = app
        .clone()
        .oneshot(request("/users/me", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(request("/session", Some(&token))).await.unwrap();
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn metrics_expose_verification_outcomes() {
    let (app, metrics) = enabled_app();
    let expired = TokenBuilder::new("user-1")
        .expires_in(-10)
        .sign(TestKeyPair::shared());
    app.clone()
        .oneshot(request("/users/me", Some(&expired)))
        .await
        .unwrap();
    assert_eq!(metrics.identity().verification_count("token_expired"), 1);

    let response = app.oneshot(request("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("identity_token_verifications_total"));
    assert!(text.contains("token_expired"));
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = enabled_app();
    let response = app.oneshot(request("/healthz", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}
