//! ==============================================================================
//! main.rs - water quality node entry point
//! ==============================================================================
//!
//! purpose:
//!     a small monitoring node that keeps the latest water reading
//!     (temperature, pH, turbidity, water level) and pushes every new
//!     reading to connected dashboards over server-sent events.
//!
//! responsibilities:
//!     - load node.toml and set up logging
//!     - pick the reading producer (demo / serial / probe)
//!     - run the update scheduler (producer -> store -> fan-out)
//!     - serve the dashboard, json snapshot and event stream
//!     - optionally relay readings to a cloud endpoint
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     node (this file)                         │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │  scheduler  │  │ web server  │  │   cloud relay       │  │
//!     │  │ (cadence /  │  │ (/, /data,  │  │ (optional, every    │  │
//!     │  │  per line)  │  │  /events)   │  │  interval_seconds)  │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         │                │                    │             │
//!     │         └────────────────┼────────────────────┘             │
//!     │                          │                                  │
//!     │                   ┌──────┴──────┐                           │
//!     │                   │ NodeContext │ <- context.rs             │
//!     │                   │ store + reg │                           │
//!     │                   └─────────────┘                           │
//!     └─────────────────────────────────────────────────────────────┘
//!
//!     the three tasks run concurrently. if any of them ends (line source
//!     closed, bind failure, relay out of retries) the node exits and lets
//!     the service manager restart it.
//!
//! ==============================================================================

mod broadcast;
mod config;
mod context;
mod domain;
mod hal;
mod producer;
mod push;
mod registry;
mod relay;
mod scheduler;
mod sensors;
mod server;
mod store;

use anyhow::Result;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::context::NodeContext;
use crate::producer::Producer;
use crate::relay::CloudRelay;
use crate::scheduler::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  AquaNode - Water Quality Monitor");
    println!("===========================================================");

    // step 1: configuration and logging
    let config = config::NodeConfig::load_or_default();
    config.print_summary();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aquanode={}", config.logging.level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // step 2: hardware
    #[cfg(feature = "hardware")]
    let hal = hal::shared(hal::PiHal::new(&config.sensors)?);
    #[cfg(not(feature = "hardware"))]
    let hal = hal::shared(hal::MockHal::new(&config.sensors));

    // step 3: shared state and reading source
    let context = NodeContext::new(
        config.producer.mode,
        config.server.max_clients,
        config.server.client_buffer,
    )
    .into_shared();

    let producer = match Producer::from_config(&config, &hal).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Fatal: failed to set up reading source: {:#}", e);
            return Err(e);
        }
    };
    let scheduler = Scheduler::new(
        producer,
        context.clone(),
        Duration::from_millis(config.producer.interval_ms),
        config.logging.show_sensor_data,
    );

    // step 4: optional cloud relay
    let relay = if config.relay.enabled {
        Some(CloudRelay::new(
            config.relay.clone(),
            config.sensors.leds,
            hal.clone(),
            context.clone(),
        )?)
    } else {
        None
    };
    let relay_task = async move {
        match relay {
            Some(relay) => relay.run().await,
            None => std::future::pending().await,
        }
    };

    // step 5: run until one of the tasks stops
    let outcome = tokio::select! {
        r = scheduler.run() => r.map(|_| "update scheduler"),
        r = server::run_server(context, &config.server.bind) => r.map(|_| "web server"),
        r = relay_task => r.map(|_| "cloud relay"),
    };

    match outcome {
        Ok(task) => {
            tracing::warn!("{} stopped, shutting down", task);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Fatal: {:#}", e);
            Err(e)
        }
    }
}
