/// resqflow server entry point
///
/// Loads configuration from the environment and starts the HTTP server.

use resqflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Run API at /api/tenants/{tenant_id}/runs/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
