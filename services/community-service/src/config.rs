use anyhow::{Context, Result};
use common_identity::IdentityConfig;
use std::env;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// `None` runs the service with authentication disabled.
    pub identity: Option<IdentityConfig>,
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = match env::var("PORT") {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid PORT '{raw}'"))?,
        Err(_) => 8000,
    };

    let cors_origins = env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|value| parse_origins(&value))
        .unwrap_or_else(default_origins);

    let identity =
        IdentityConfig::from_env().context("Failed to load identity provider configuration")?;

    Ok(ServiceConfig {
        host,
        port,
        cors_origins,
        identity,
    })
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c == ' ')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}
