use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::{require_admin, require_allowed_ip, AdminGate},
    handlers::{create_ip, delete_ip, edit_ip, list_ips, send_message},
    notify::Notifier,
    resolver::DnsResolver,
    service::AllowlistService,
    store::{FixedIps, Store},
    AppState,
};

/// Runtime configuration, normally filled from `IPGATE_*` variables by the daemon.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowlist_path: PathBuf,
    /// Zero keeps the cached allowlist until the next write.
    pub cache_ttl: Duration,
    /// Zero disables the background sweep.
    pub cache_check_interval: Duration,
    /// Comma-separated fixed IP literals.
    pub fixed_ips: String,
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
    pub dns_timeout: Duration,
    pub cors_origins: Option<String>,
}

/// Wires store, resolver, service and notifier from the configuration.
pub fn build_state(cfg: &ServerConfig) -> Result<AppState> {
    let fixed = FixedIps::parse(&cfg.fixed_ips)
        .map_err(|reason| anyhow::anyhow!("invalid IPGATE_FIXED_IPS: {reason}"))?;

    let webhook_url = cfg
        .webhook_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .map(|u| u.parse::<reqwest::Url>())
        .transpose()
        .context("invalid IPGATE_WEBHOOK_URL")?;

    let store = Store::open(&cfg.allowlist_path, fixed.clone(), cfg.cache_ttl);
    let resolver = Arc::new(DnsResolver::new(cfg.dns_timeout));
    let notifier =
        Notifier::new(webhook_url, cfg.webhook_timeout).context("build webhook client")?;

    Ok(AppState {
        service: AllowlistService::new(store, resolver),
        admin: AdminGate::new(fixed),
        notifier,
    })
}

/// Routes with both gates applied. Callers must provide `ConnectInfo<SocketAddr>`.
pub fn build_router(state: AppState, cors_origins: Option<&str>) -> Router {
    let open = Router::new()
        .route("/allowed-ips", get(list_ips))
        .route("/send-message", post(send_message));

    // Mutating allowlist routes additionally require a fixed IP.
    let admin = Router::new()
        .route("/allowed-ips", post(create_ip))
        .route("/allowed-ips", put(edit_ip))
        .route("/allowed-ips", delete(delete_ip))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(open)
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_allowed_ip,
        ))
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let state = build_state(&cfg)?;

    let store = state.service.store().clone();
    info!(
        path = %store.path().display(),
        fixed_ips = store.fixed().len(),
        cache_ttl = ?cfg.cache_ttl,
        "using allowlist file"
    );
    if store.fixed().is_empty() {
        tracing::warn!("IPGATE_FIXED_IPS is empty; only listed IPs can connect and no caller can modify the allowlist");
    }
    if !state.notifier.is_configured() {
        tracing::warn!("IPGATE_WEBHOOK_URL is not set; /send-message will fail");
    }

    store.spawn_sweep(cfg.cache_check_interval);

    let app = build_router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "ipgate server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}
