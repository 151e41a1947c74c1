pub mod auth;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod resolver;
pub mod server;
pub mod service;
pub mod store;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: service::AllowlistService,
    /// Fixed-IP check for mutating allowlist routes.
    pub admin: auth::AdminGate,
    pub notifier: notify::Notifier,
}

pub use server::{build_router, build_state, run, ServerConfig};
