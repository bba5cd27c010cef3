use std::sync::Arc;

use bridge_relayer::api::{self, ApiState};
use bridge_relayer::chain::{ChainPair, EvmChainClient};
use bridge_relayer::config::{Config, LogFormat};
use bridge_relayer::engine::{RelayEngine, RelaySettings};
use eyre::WrapErr;
use tokio_util::sync::CancellationToken;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    // Run the async main
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    // Load configuration; a missing key or RPC URL aborts startup
    let config = Config::load()?;

    // Initialize logging
    init_logging(config.log_format);

    tracing::info!("Starting bridge relayer");
    tracing::info!(
        source = %config.source.name,
        source_chain_id = config.source.chain_id,
        destination = %config.destination.name,
        destination_chain_id = config.destination.chain_id,
        "Configuration loaded"
    );

    let source = EvmChainClient::new(
        &config.source,
        &config.relayer.private_key,
        config.relayer.poll_interval(),
        config.relayer.receipt_poll_interval(),
    )
    .wrap_err("Failed to create source chain client")?;
    let destination = EvmChainClient::new(
        &config.destination,
        &config.relayer.private_key,
        config.relayer.poll_interval(),
        config.relayer.receipt_poll_interval(),
    )
    .wrap_err("Failed to create destination chain client")?;

    tracing::info!(
        address = %source.signer_address(),
        source_bridge = %source.bridge_address(),
        destination_bridge = %destination.bridge_address(),
        "Relayer account"
    );
    source.log_balance().await;
    destination.log_balance().await;

    // Bind the query API first; a taken port aborts startup
    let listener = api::bind(&config.api.listen_addr()).await?;

    let chains = ChainPair::new(Arc::new(source), Arc::new(destination));
    let mut engine = RelayEngine::new(chains, RelaySettings::from(&config.relayer));
    engine.start();

    // Start query API server
    let api_cancel = CancellationToken::new();
    let api_state = ApiState {
        status: engine.status().clone(),
        retry_queue: engine.retry_queue().clone(),
    };
    let api_handle = tokio::spawn({
        let cancel = api_cancel.clone();
        async move {
            if let Err(e) = api::serve(listener, api_state, cancel).await {
                tracing::error!(error = %e, "API server error");
            }
        }
    });

    wait_for_shutdown_signal().await;

    engine.shutdown().await;
    api_cancel.cancel();
    if let Err(e) = api_handle.await {
        tracing::error!(error = %e, "API server task failed");
    }

    tracing::info!("Bridge relayer stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_relayer=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
