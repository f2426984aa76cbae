/// Assessway: assessment workflow engine
///
/// Main entry point for the Assessway server. Initializes configuration and
/// starts the HTTP server.

use assessway::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow lifecycle API at /api/workflows/*
/// - Comments, presence and activity under /api/workflows/{id}/*
/// - Role administration at /api/admin/roles
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from ASSESSWAY_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
