//! upstream-guard probe
//!
//! Sends requests to a configured upstream through its circuit breaker and
//! retry executor, printing each outcome and the final breaker state.
//!
//! ```text
//! upstream-guard --config guard.toml --upstream spotify -n 5 search -q q=abba -q type=artist
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use upstream_guard::config::{load_config, GuardConfig};
use upstream_guard::observability::{logging, metrics};
use upstream_guard::resilience::ResilienceError;
use upstream_guard::upstream::{HttpUpstream, RequestOptions, UpstreamRegistry};

#[derive(Parser)]
#[command(name = "upstream-guard")]
#[command(about = "Probe an upstream through retry and circuit breaker", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream name from the configuration.
    #[arg(short, long)]
    upstream: String,

    /// Number of requests to send.
    #[arg(short = 'n', long, default_value_t = 1)]
    requests: u32,

    /// Extra header, as `name:value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Query parameter, as `key=value`. Repeatable.
    #[arg(short, long = "query")]
    query: Vec<String>,

    /// Bearer token for the Authorization header.
    #[arg(long)]
    token: Option<String>,

    /// Request path, relative to the upstream base URL.
    path: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!("upstream-guard v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = UpstreamRegistry::from_config(&config)?;
    let upstream = registry.get(&cli.upstream).ok_or_else(|| {
        format!(
            "unknown upstream '{}' (configured: {})",
            cli.upstream,
            registry.names().join(", ")
        )
    })?;

    let options = request_options(&cli)?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    for i in 1..=cli.requests {
        if token.is_cancelled() {
            break;
        }
        probe(&upstream, i, &cli.path, &options, &token).await;
    }

    println!("{}", serde_json::to_string_pretty(&registry.snapshots())?);
    Ok(())
}

async fn probe(
    upstream: &Arc<HttpUpstream>,
    i: u32,
    path: &str,
    options: &RequestOptions,
    token: &CancellationToken,
) {
    let result = upstream
        .send(reqwest::Method::GET, path, None, options, Some(token))
        .await;

    match result {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            println!("#{i} {status} ({} bytes)", body.len());
        }
        Err(ResilienceError::CircuitOpen { name }) => println!("#{i} circuit '{name}' open"),
        Err(ResilienceError::Cancelled) => println!("#{i} cancelled"),
        Err(e) => println!("#{i} error: {e}"),
    }
}

fn request_options(cli: &Cli) -> Result<RequestOptions, String> {
    let mut options = RequestOptions::new();
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("invalid header '{header}', expected name:value"))?;
        options = options.header(name.trim(), value.trim());
    }
    for pair in &cli.query {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("invalid query '{pair}', expected key=value"))?;
        options = options.query(key, value);
    }
    if let Some(token) = &cli.token {
        options = options.bearer(token.clone());
    }
    Ok(options)
}
