use log::{error, info};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use virtual_heatpump_fleet::backchannel;
use virtual_heatpump_fleet::config::{Config, load_dotenv};
use virtual_heatpump_fleet::registry::{SensorRegistry, default_fleet};
use virtual_heatpump_fleet::server;

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    init_logger();
    load_dotenv();

    let config = Arc::new(Config::from_env());
    info!("Starting virtual heat-pump fleet");
    info!("  WebSocket port: {}", config.server.ws_port);
    info!("  Back-channel port: {}", config.server.http_port);
    info!("  Poll interval: {} ms", config.simulation.frequency_ms);
    info!(
        "  Failures enabled: {} (error prob {})",
        config.simulation.failures_enabled, config.simulation.error_prob
    );
    info!(
        "  Delays enabled: {} (delay prob {}, not consulted on the send path)",
        config.simulation.delays_enabled, config.simulation.delay_prob
    );
    info!("  Time to live: {} s", config.simulation.time_to_live_secs);

    let registry = Arc::new(SensorRegistry::new(default_fleet()));
    let shutdown = CancellationToken::new();

    let rest_task = tokio::spawn({
        let config = config.clone();
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = backchannel::run_backchannel(config, registry, shutdown).await {
                error!("Back-channel server error: {err}");
            }
        }
    });
    let ws_task = tokio::spawn({
        let config = config.clone();
        let registry = registry.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = server::run_ws_server(config, registry, shutdown).await {
                error!("WebSocket server error: {err}");
            }
        }
    });

    match signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(err) => error!("Failed to listen for shutdown signal: {err}"),
    }
    shutdown.cancel();

    let _ = ws_task.await;
    let _ = rest_task.await;
    info!("Virtual heat-pump fleet stopped");
}
