//! pgSCV binary entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use pgscv::collector::CollectorRegistrar;
use pgscv::config::{AppConfig, DEFAULT_SEND_INTERVAL};
use pgscv::http::create_router;
use pgscv::push::{run_push_loop, PushConfig};
use pgscv::service::{ServiceRegistry, Supervisor};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pgSCV - metrics agent for PostgreSQL, Pgbouncer and the host
#[derive(Parser, Debug)]
#[command(name = "pgscv", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "PGSCV_CONFIG_FILE")]
    config_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config_file.as_deref())?;
    config.validate()?;

    if config.autoupdate {
        tracing::warn!("autoupdate requested but not supported by this build; ignore");
    }

    let token = CancellationToken::new();
    let registry = ServiceRegistry::new();
    let registrar = CollectorRegistrar::new();

    // background discovery and health checking
    let supervisor = Supervisor::new(registry.clone(), registrar.clone(), config.service_config());
    let supervisor_token = token.clone();
    let supervisor_task = tokio::spawn(async move {
        supervisor.start(supervisor_token).await;
    });

    if !config.send_metrics_url.is_empty() {
        let push_config = PushConfig {
            url: config.send_metrics_url.clone(),
            api_key: config.api_key.clone(),
            interval: DEFAULT_SEND_INTERVAL,
        };
        tokio::spawn(run_push_loop(registrar.clone(), push_config, token.clone()));
    }

    let app = create_router(registrar);
    let addr: SocketAddr = config.listen_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await?;

    token.cancel();
    let _ = supervisor_task.await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wait for a termination signal, then cancel the background tasks.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("received terminate signal");
        }
    }

    token.cancel();
}
