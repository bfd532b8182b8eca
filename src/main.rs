//! assetpipe -- versioned JS/CSS asset server.
//!
//! SIGTERM/SIGINT stop accepting connections and wait for in-flight
//! requests up to `server.shutdown_timeout` seconds before exiting.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use assetpipe::config::Config;
use assetpipe::sink::Sink;

/// Command-line arguments for the assetpipe server.
#[derive(Parser, Debug)]
#[command(name = "assetpipe", version, about = "Versioned JS/CSS asset server")]
struct Cli {
    /// Path to the YAML configuration file.  A missing file means defaults.
    #[arg(short, long, default_value = "assetpipe.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

/// Install the tracing subscriber.  `RUST_LOG` wins over `logging.level`.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Construct the storage sink named by `storage.backend`.
async fn build_sink(config: &Config) -> anyhow::Result<Arc<dyn Sink>> {
    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    let sink: Arc<dyn Sink> = match config.storage.backend.as_str() {
        "s3" | "aws" => {
            let s3 = config.storage.s3.as_ref().ok_or_else(|| {
                anyhow::anyhow!("storage.backend is 's3' but storage.s3 config section is missing")
            })?;
            let sink = assetpipe::sink::aws::ObjectStoreSink::new(
                s3.bucket.clone(),
                s3.region.clone(),
                s3.prefix.clone(),
                non_empty(&s3.endpoint_url),
                s3.use_path_style,
                non_empty(&s3.access_key_id),
                non_empty(&s3.secret_access_key),
            )
            .await?;
            Arc::new(sink)
        }
        "memory" => {
            warn!("memory sink selected: nothing survives a restart");
            Arc::new(assetpipe::sink::memory::MemorySink::new())
        }
        "local" => {
            let root = &config.storage.local.root_dir;
            let sink = assetpipe::sink::local::FilesystemSink::new(root)?;
            info!("Filesystem sink initialized at {}", root);
            Arc::new(sink)
        }
        other => anyhow::bail!("unknown storage.backend {other:?} (expected local, s3 or memory)"),
    };
    Ok(sink)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = assetpipe::config::load_config(&cli.config)?;

    init_tracing(&config);
    info!("Configuration loaded from {}", cli.config);

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        assetpipe::metrics::init_metrics();
        assetpipe::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let sink = build_sink(&config).await?;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(assetpipe::AppState::new(config, sink));

    let app = assetpipe::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("assetpipe listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tokio::spawn(async move {
                tokio::time::sleep(shutdown_timeout).await;
                warn!(
                    "in-flight requests still running after {}s; exiting",
                    shutdown_timeout.as_secs()
                );
                std::process::exit(1);
            });
        })
        .await?;

    info!("assetpipe shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
