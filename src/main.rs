//! snippet-sandbox daemon
//!
//! Serves the submission page over HTTP (default) or the MCP tools over
//! stdio, and runs every snippet in a fresh Docker container.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use snippet_sandbox::backend::DockerProvider;
use snippet_sandbox::config::{Config, Preset};
use snippet_sandbox::mcp;
use snippet_sandbox::orchestrator::Orchestrator;
use snippet_sandbox::ratelimit::RateLimiter;
use snippet_sandbox::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "snippet-sandbox")]
#[command(about = "Run untrusted code snippets in single-use sandbox containers")]
struct Args {
    /// Run in stdio mode (for MCP clients) instead of serving HTTP
    #[arg(long)]
    stdio: bool,

    /// HTTP listen address (overrides the configured one)
    #[arg(long)]
    listen: Option<String>,

    /// JSON configuration file (otherwise SNIPPET_SANDBOX_CONFIG, then defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Built-in language set (overrides the configured one)
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(preset) = args.preset {
        config.preset = preset;
    }

    let registry = config.registry().context("Invalid language configuration")?;
    config.validate(&registry)?;

    info!(
        languages = ?registry.languages(),
        timeout_seconds = config.timeout_seconds,
        "Loaded configuration"
    );

    let provider = match config.docker.socket.as_deref() {
        Some(socket) => DockerProvider::connect_socket(socket),
        None => DockerProvider::connect(),
    }
    .context("Failed to create Docker client")?;

    if let Err(e) = provider.ping().await {
        warn!(error = %e, "Docker daemon not reachable, runs will fail until it is");
    }

    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(registry), Arc::new(provider))
            .with_deadline(config.timeout())
            .with_auto_remove(config.docker.auto_remove),
    );

    if args.stdio {
        mcp::serve_stdio(orchestrator).await?;
    } else {
        let state = AppState {
            orchestrator,
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            default_language: Arc::from(config.default_language.as_str()),
        };
        let listen = args.listen.unwrap_or(config.listen);
        web::serve(&listen, state).await?;
    }

    Ok(())
}
