//! Product catalog API (v1)
//!
//! A small catalog service built with Tokio and Axum, instrumented end to end.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────────┐
//!                        │                   CATALOG SERVICE                     │
//!                        │                                                       │
//!     Client Request     │  ┌──────────┐   ┌─────────────┐   ┌──────────────┐   │
//!     ───────────────────┼─▶│   http   │──▶│ inbound     │──▶│   catalog    │   │
//!                        │  │  server  │   │ Server span │   │   service    │   │
//!                        │  └──────────┘   └─────────────┘   │ business span│   │
//!                        │                                    └──────┬───────┘   │
//!                        │                                           ▼           │
//!                        │                                    ┌──────────────┐   │
//!                        │                                    │  outbound    │   │
//!                        │                                    │ Client span  │   │
//!                        │                                    │  → store     │   │
//!                        │                                    └──────────────┘   │
//!                        │                                                       │
//!                        │  ┌─────────────────────────────────────────────────┐  │
//!                        │  │ observability: TraceScope, MeterRegistry,        │  │
//!                        │  │ exemplars ─▶ export pipeline ─▶ collector / logs │  │
//!                        │  └─────────────────────────────────────────────────┘  │
//!                        └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;

use catalog_telemetry::config::load_or_default;
use catalog_telemetry::lifecycle::signals::spawn_signal_handler;
use catalog_telemetry::lifecycle::{build_server, init_telemetry, Shutdown};
use catalog_telemetry::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "catalog-telemetry")]
#[command(about = "Product catalog API with request telemetry", long_about = None)]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long, env = "CATALOG_CONFIG")]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_or_default(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.logging)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "catalog-telemetry starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        exporter = ?config.telemetry.exporter,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let runtime = init_telemetry(&config.telemetry)?;
    let server = build_server(&config, &runtime);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    spawn_signal_handler(shutdown.clone());
    let served = server.run(listener, shutdown.clone()).await;

    // Export stops only after in-flight requests have drained.
    runtime
        .finish(Duration::from_secs(config.timeouts.shutdown_secs))
        .await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
