use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Daily log files kept before the oldest is deleted.
const LOG_FILES_KEPT: usize = 14;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "ipgated",
    about = "ipgated — IP allowlist API server daemon",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ipgate HTTP server
    Serve {
        /// Port to listen on (default: $IPGATE_PORT or 3000)
        #[arg(long, env = "IPGATE_PORT", default_value = "3000")]
        port: u16,
        /// Host to bind (default: $IPGATE_HOST or 0.0.0.0)
        #[arg(long, env = "IPGATE_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Allowlist JSON document
        #[arg(long, env = "IPGATE_ALLOWLIST_FILE", default_value = "allowed_ips.json")]
        allowlist_file: PathBuf,
        /// Cache lifetime, in seconds or humantime ("90s", "5m"); 0 never expires
        #[arg(long, env = "IPGATE_CACHE_TTL", default_value = "60", value_parser = parse_duration)]
        cache_ttl: Duration,
        /// How often expired cache entries are swept; 0 disables the sweep
        #[arg(long, env = "IPGATE_CACHE_CHECK_INTERVAL", default_value = "120", value_parser = parse_duration)]
        cache_check_interval: Duration,
        /// Comma-separated IPs that are always allowed and may modify the allowlist
        #[arg(long, env = "IPGATE_FIXED_IPS", default_value = "")]
        fixed_ips: String,
        /// Webhook receiving /send-message alerts
        #[arg(long, env = "IPGATE_WEBHOOK_URL")]
        webhook_url: Option<String>,
        /// Timeout for the outbound webhook call
        #[arg(long, env = "IPGATE_WEBHOOK_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
        webhook_timeout: Duration,
        /// Timeout for DNS lookups of domain inputs
        #[arg(long, env = "IPGATE_DNS_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
        dns_timeout: Duration,
        /// Comma-separated CORS origins (default: any)
        #[arg(long, env = "IPGATE_CORS_ORIGINS")]
        cors_origins: Option<String>,
        /// Log level: error, warn, info, debug, verbose (default: $IPGATE_LOG_LEVEL or info)
        #[arg(long, env = "IPGATE_LOG_LEVEL")]
        log_level: Option<String>,
        /// Directory for daily-rotating log files; empty disables file logging
        #[arg(long, env = "IPGATE_LOG_DIR", default_value = "logs")]
        log_dir: String,
    },
    /// Print the persisted allowlist (fixed IPs are not included)
    Show {
        /// Allowlist JSON document
        #[arg(long, env = "IPGATE_ALLOWLIST_FILE", default_value = "allowed_ips.json")]
        allowlist_file: PathBuf,
        /// Comma-separated fixed IPs to hide from the output
        #[arg(long, env = "IPGATE_FIXED_IPS", default_value = "")]
        fixed_ips: String,
    },
}

/// Plain seconds, or a humantime duration.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

/// Keeps a `.env` load failure worth reporting. A missing file is not one.
fn env_file_problem<T>(loaded: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match loaded {
        Ok(_) => None,
        Err(dotenvy::Error::Io(e)) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => Some(e),
    }
}

fn log_file_appender(dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("server")
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .with_context(|| format!("open log directory {}", dir.display()))
}

/// Installs the global subscriber: stdout, plus rotating files under `log_dir`.
/// File lines are flushed when the returned guard is dropped.
fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(log_file_appender(dir)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(level))
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // Real environment variables still apply when .env is missing or broken.
    let env_problem = env_file_problem(dotenvy::dotenv());

    let cli = Cli::parse();

    let (effective_log_level, log_dir) = match cli.command {
        Commands::Serve {
            ref log_level,
            ref log_dir,
            ..
        } => {
            let raw = log_level.clone().unwrap_or_else(|| "info".into());
            let level = if raw.eq_ignore_ascii_case("verbose") {
                "debug".to_owned()
            } else {
                raw
            };
            let dir = Some(PathBuf::from(log_dir)).filter(|d| !d.as_os_str().is_empty());
            (level, dir)
        }
        Commands::Show { .. } => (
            std::env::var("IPGATE_LOG_LEVEL").unwrap_or_else(|_| "warn".into()),
            None,
        ),
    };

    // Held until main returns so the file writer flushes.
    let _log_guard = init_logging(&effective_log_level, log_dir.as_deref())?;

    if let Some(e) = env_problem {
        warn!(error = %e, "ignoring unreadable .env file");
    }

    match cli.command {
        Commands::Serve {
            port,
            host,
            allowlist_file,
            cache_ttl,
            cache_check_interval,
            fixed_ips,
            webhook_url,
            webhook_timeout,
            dns_timeout,
            cors_origins,
            log_level: _,
            log_dir: _,
        } => {
            let cfg = ipgate_server::ServerConfig {
                host,
                port,
                allowlist_path: allowlist_file,
                cache_ttl,
                cache_check_interval,
                fixed_ips,
                webhook_url,
                webhook_timeout,
                dns_timeout,
                cors_origins,
            };
            if let Err(e) = ipgate_server::run(cfg).await {
                tracing::error!(error = %format!("{e:#}"), "error starting server");
                return Err(e);
            }
            Ok(())
        }

        Commands::Show {
            allowlist_file,
            fixed_ips,
        } => cmd_show(allowlist_file, &fixed_ips).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_show(allowlist_file: PathBuf, fixed_ips: &str) -> Result<()> {
    let fixed = ipgate_server::store::FixedIps::parse(fixed_ips)
        .map_err(|reason| anyhow::anyhow!("invalid IPGATE_FIXED_IPS: {reason}"))?;
    let store = ipgate_server::store::Store::open(allowlist_file, fixed, Duration::ZERO);
    let entries = store.load_visible().await;
    let out = serde_json::to_string_pretty(&serde_json::json!({ "allowed_ips": entries }))
        .context("serialize allowlist")?;
    println!("{out}");
    Ok(())
}
