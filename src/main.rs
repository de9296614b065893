use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relaybot_core::config;
use relaybot_core::service::http::{serve, AppState};
use relaybot_core::service::sqlite_usage::{DatabasePool, SqliteUsageCounter};

/// Log filter used when `RUST_LOG` is unset or unparseable.
const DEFAULT_LOG_FILTER: &str = "relaybot=info,relaybot_core=info";

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "relaybot",
    about = "Messenger webhook relay backed by an OpenAI-compatible chat model",
    version = relaybot_core::VERSION,
)]
struct Cli {
    /// HTTP server port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok().as_deref()))
        .init();

    let cli = Cli::parse();

    let mut cfg = config::load_config_from_env()?;
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }
    if let Some(host) = cli.host {
        cfg.server.host = host;
    }

    let pool = DatabasePool::new(&cfg.database.url)
        .await
        .with_context(|| format!("opening database {}", cfg.database.url))?;
    let usage = Arc::new(SqliteUsageCounter::new(pool));

    let state = Arc::new(AppState::from_config(&cfg, usage));
    let addr = cfg.listen_addr();
    info!(
        "Starting relaybot {} on {} (model {}, context limit {})",
        relaybot_core::VERSION,
        addr,
        cfg.provider.model,
        cfg.bot.context_limit
    );

    serve(&addr, state).await?;
    Ok(())
}

/// `RUST_LOG` wins when it parses; otherwise info for our crates.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}
