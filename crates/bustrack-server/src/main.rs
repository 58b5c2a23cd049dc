//! Main entry point for the bustrack distribution server.
//!
//! Wires the location store, mirror, auth gate and distribution hub together
//! and serves the WebSocket stream and health endpoints.

use std::sync::Arc;

use bustrack_core::DistributionHub;
use bustrack_server::{
    model::{AppState, Configuration},
    startup::{self, GracefulShutdown},
};
use tracing::{error, info, warn};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let configuration = Configuration::new()?;

    let logging_config = configuration.logging_config();
    let _logging_guard = startup::init_logging(&logging_config)?;

    let storage_mode = configuration.persistence_mode()?;
    info!("Persistence mode: {}", storage_mode);

    let location_store = configuration.location_store().await?;
    let mirror_store = configuration.mirror_store()?;
    let auth_gate = configuration.auth_gate()?;
    let hub_config = configuration.hub_config();

    info!(
        consumer_cadence_ms = hub_config.consumer_cadence.as_millis() as u64,
        producer_idle_timeout_secs = hub_config.producer_idle_timeout.as_secs(),
        outbound_buffer = hub_config.outbound_buffer,
        bus_refresh_secs = hub_config.bus_refresh_interval.as_secs(),
        mirror = mirror_store.name(),
        "Distribution hub configured"
    );

    let mut builder = DistributionHub::builder(location_store, auth_gate)
        .mirror(mirror_store)
        .config(hub_config);
    if let Some(fleet) = configuration.simulated_fleet()? {
        builder = builder.simulation(Arc::new(fleet));
    } else if configuration.hub_experimental() {
        warn!("Experimental streams enabled without simulation routes, serving live data");
    }
    let hub = builder.build();

    let shutdown_signal = startup::wait_for_shutdown_signal().await;
    let graceful_shutdown = GracefulShutdown::new(
        shutdown_signal.clone(),
        hub.clone(),
        configuration.shutdown_timeout(),
    );

    if configuration.hub_warm_cache() {
        match startup::run_with_shutdown(hub.warm_cache(), shutdown_signal.subscribe()).await {
            Some(Ok(warmed)) => info!("Position cache warmed with {} buses", warmed),
            Some(Err(e)) => warn!("Failed to warm position cache: {:#}", e),
            None => return Ok(()),
        }
    }

    let server_address = configuration.server_address();
    let server_port = configuration.server_port();
    let app_state = Arc::new(AppState::new(configuration, hub));

    let server = startup::main_server(app_state, server_address.clone(), server_port)?;

    info!(
        "bustrack server started on {}:{} (stream: /bus/stream, health: /health)",
        server_address, server_port
    );

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = graceful_shutdown.wait_for_shutdown() => {
            info!("Server shutting down gracefully");
        }
    }

    Ok(())
}
