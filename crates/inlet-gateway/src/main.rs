use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use inlet_core::InletConfig;
use inlet_ingest::Pipeline;

mod app;
mod forward;
mod http;
mod secret;

/// Webhook ingestion gateway: admission, dedup, rate limiting and burst
/// buffering in front of a downstream message handler.
#[derive(Debug, Parser)]
#[command(name = "inlet-gateway", version, about)]
struct Cli {
    /// Path to inlet.toml (default: ~/.inlet/inlet.toml).
    #[arg(long, env = "INLET_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "inlet_gateway=info,inlet_ingest=info,inlet_telegram=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config / INLET_CONFIG > ~/.inlet/inlet.toml
    let config = InletConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        InletConfig::default()
    });

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let grace = Duration::from_secs(config.gateway.shutdown_grace_secs);

    let dispatcher = forward::build_dispatcher(&config)?;
    let pipeline = Arc::new(Pipeline::from_config(&config, dispatcher, None));
    info!(
        max_concurrent = config.admission.max_concurrent,
        debounce_ms = config.buffer.debounce_ms,
        max_messages = config.buffer.max_messages,
        max_wait_ms = config.buffer.max_wait_ms,
        "pipeline ready"
    );

    let state = app::AppState::new(&config, Arc::clone(&pipeline)).map_err(anyhow::Error::msg)?;
    if state.secret.is_none() {
        warn!("no gateway.secret_token configured; webhook requests are not authenticated");
    }
    let router = app::build_router(Arc::new(state));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        signal.cancel();
    });

    // Bursts whose timer task died are otherwise only recovered when the same
    // sender writes again.
    let sweep_every = Duration::from_millis(config.buffer.max_wait_ms.max(1000));
    let sweeper = {
        let pipeline = Arc::clone(&pipeline);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let recovered = pipeline.sweep();
                        if recovered > 0 {
                            info!(recovered, "orphan sweep flushed buffer entries");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    };

    info!(addr = %addr, "inlet gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    if let Err(e) = sweeper.await {
        warn!(error = %e, "orphan sweeper ended abnormally");
    }

    // HTTP is closed; flush what is buffered and let dispatches finish.
    if !pipeline.shutdown(grace).await {
        warn!("exiting with dispatches still in flight");
    }
    info!("inlet gateway stopped");
    Ok(())
}
