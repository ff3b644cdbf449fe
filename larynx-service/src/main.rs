use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;

mod analysis;
mod api;
mod catalog;
mod config;
mod error;
mod fhir;
mod handles;
mod report;
mod service;

use crate::service::LarynxService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_logging();

    info!("Starting larynx service v{}", env!("CARGO_PKG_VERSION"));

    // Configuration file (optional) layered under LARYNX__* environment variables
    let config = Arc::new(config::load_config()?);
    info!(
        host = %config.server.host,
        port = config.server.port,
        fhir = %config.fhir.base_url,
        "Configuration loaded"
    );

    let metrics = PrometheusBuilder::new().install_recorder()?;

    // Initialize the service
    let service = Arc::new(LarynxService::new(config.clone())?);

    // Build the router
    let app = api::router(service, Some(metrics));

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("larynx_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
