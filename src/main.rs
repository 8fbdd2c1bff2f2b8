use contract_event_relay::{
    routes,
    services::{AlloyChainProvider, ChainProvider, InMemoryAbiStore},
    AppState, Config,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv::dotenv().ok();

    init_logging()?;

    let config = Config::from_env()?;
    config.validate()?;

    info!("Starting contract event relay");
    info!("RPC: {}", config.mask_rpc_url());
    info!(
        "Polling every {}ms, max block range {}",
        config.chain.poll_interval_ms, config.chain.max_block_range
    );

    let provider = Arc::new(AlloyChainProvider::new(&config.chain)?);
    match provider.block_number().await {
        Ok(block) => info!("Connected to chain at block {}", block),
        Err(e) => error!("Initial block number query failed: {}", e),
    }

    let port = config.server.port;
    let ws_path = config.server.ws_path.clone();
    let state = AppState::new(config, Arc::new(InMemoryAbiStore::new()), provider);

    info!("HTTP server listening on http://0.0.0.0:{}", port);
    info!("WebSocket endpoint ws://0.0.0.0:{}/{}", port, ws_path);

    let server = warp::serve(routes(state)).run(([0, 0, 0, 0], port));

    tokio::select! {
        _ = server => {
            info!("Server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!("Contract event relay shutdown complete");
    Ok(())
}

fn init_logging() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("contract_event_relay=debug".parse()?)
                .add_directive("warp=info".parse()?),
        )
        .init();
    Ok(())
}
