use std::net::SocketAddr;
use std::sync::Arc;

use common_identity::{AuthGuard, TokenVerifier};
use community_service::app::{build_router, cors_layer, AppState};
use community_service::config::load_service_config;
use community_service::metrics::ServiceMetrics;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_service_config()?;
    let metrics = Arc::new(ServiceMetrics::new()?);

    let guard = match config.identity.clone() {
        Some(identity) => {
            info!(issuer = %identity.issuer, jwks_url = %identity.jwks_url, "bearer authentication enabled");
            let verifier = TokenVerifier::builder(identity)
                .with_metrics(metrics.identity().clone())
                .build()?;
            let verifier = Arc::new(verifier);

            // Warm the key cache in the background; verification also fetches on demand.
            let warm = verifier.clone();
            tokio::spawn(async move {
                match warm.keys().refresh().await {
                    Ok(count) => info!(key_count = count, "signing keys loaded"),
                    Err(err) => warn!(error = %err, "initial signing key fetch failed"),
                }
            });

            AuthGuard::new(verifier)
        }
        None => {
            warn!("COGNITO_USER_POOL_ID or COGNITO_CLIENT_ID not set; authentication disabled");
            AuthGuard::disabled()
        }
    };

    let state = AppState {
        guard: Arc::new(guard),
        metrics,
    };
    let app = build_router(state).layer(cors_layer(&config.cors_origins));

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    info!(%addr, "starting community-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
