/// Server setup and initialization
///
/// Wires together all components: storage, access policy, facade, presence
/// sweeper and HTTP routes. Provides the main application factory function for
/// creating the Axum app.

use crate::{
    access::{AccessPolicy, IdentityDirectory, RolePolicy, StaticDirectory},
    advisory::{Advisor, DisabledAdvisor, HttpAdvisor},
    api::{create_admin_routes, create_collaboration_routes, create_workflow_routes, AppState},
    config::{Config, StorageKind},
    facade::WorkflowFacade,
    runtime::PresenceSweeper,
    storage::{InMemoryStore, SqliteStore, WorkflowStore},
    workflow::{AnswerCoverage, AxisId, CompletenessGate},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Assemble the facade and its collaborators from configuration
pub async fn build_state(config: &Config) -> Result<AppState> {
    let store: Arc<dyn WorkflowStore> = match config.database.storage {
        StorageKind::Sqlite => {
            tracing::info!(
                "📁 Opening SQLite store: {}/{}",
                config.database.data_dir,
                config.database.file_name
            );
            let store = SqliteStore::connect(&config.database.data_dir, &config.database.file_name)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open workflow database: {}", e))?;
            Arc::new(store)
        }
        StorageKind::Memory => {
            tracing::warn!("⚠️ Using in-memory store; workflows will not survive a restart");
            Arc::new(InMemoryStore::new())
        }
    };

    tracing::info!("🔐 Initializing role policy");
    let roles = Arc::new(RolePolicy::with_defaults());
    let policy: Arc<dyn AccessPolicy> = roles.clone();

    let directory: Arc<dyn IdentityDirectory> = match &config.access.known_users {
        Some(users) => {
            tracing::info!("👥 Reviewer directory restricted to {} users", users.len());
            Arc::new(StaticDirectory::with_users(users.iter().cloned()))
        }
        None => Arc::new(StaticDirectory::open()),
    };

    let required_axes = config.engine.required_axes.iter().map(|a| AxisId(a.clone())).collect();
    let gate = CompletenessGate::new(
        Arc::new(AnswerCoverage::new(required_axes)),
        config.engine.completeness_threshold,
    );

    let advisory_timeout = Duration::from_millis(config.advisory.timeout_ms);
    let advisor: Arc<dyn Advisor> = match &config.advisory.url {
        Some(url) => {
            tracing::info!("🤖 Advisory service at {}", url);
            Arc::new(
                HttpAdvisor::new(url.clone(), advisory_timeout)
                    .map_err(|e| anyhow::anyhow!("Failed to build advisory client: {}", e))?,
            )
        }
        None => {
            tracing::info!("🤖 Advisory service disabled");
            Arc::new(DisabledAdvisor)
        }
    };

    tracing::info!("🚀 Initializing workflow facade");
    let facade = WorkflowFacade::builder(store)
        .policy(policy)
        .directory(directory)
        .gate(gate)
        .liveness(Duration::from_secs(config.engine.liveness_secs))
        .page_size(config.engine.activity_page_size)
        .advisor(advisor, advisory_timeout)
        .build();

    Ok(AppState {
        facade: Arc::new(facade),
        roles,
    })
}

/// Build the router over an already assembled state
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_collaboration_routes())
        .merge(create_admin_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
///
/// Initializes storage, the facade and the presence sweeper, then wires the
/// HTTP routes over them. The caller owns the running sweeper and stops it on
/// shutdown.
pub async fn create_app(config: Config) -> Result<(Router, Arc<PresenceSweeper>)> {
    let state = build_state(&config).await?;

    tracing::info!("⏰ Initializing presence sweeper");
    let sweeper = Arc::new(
        PresenceSweeper::new(state.facade.presence(), config.engine.presence_sweep.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize presence sweeper: {}", e))?,
    );
    sweeper.start().await?;

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = router(state);

    tracing::info!("✅ Application initialized successfully");
    Ok((app, sweeper))
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and serves it on the configured address and port
/// until Ctrl-C, then stops background jobs.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("assessway=info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Assessway server...");

    let (app, sweeper) = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received");
}

async fn health_check() -> &'static str {
    "ok"
}
