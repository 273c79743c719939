pub mod app;
pub mod config;
pub mod metrics;
pub mod user_handlers;

pub use app::{build_router, AppState};
