use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use common_identity::IdentityMetrics;
use prometheus::{Encoder, Registry, TextEncoder};

#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    identity: IdentityMetrics,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let identity = IdentityMetrics::new(&registry)?;
        Ok(Self { registry, identity })
    }

    pub fn identity(&self) -> &IdentityMetrics {
        &self.identity
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
