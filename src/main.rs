//! DocGate API - Governed Document Database Gateway
//!
//! A read-only access layer for fleets of document databases. Every caller
//! query passes a governance engine (operation allow-list, stage and
//! operator deny-lists, complexity guard, limit/timeout clamps, sensitive
//! field masking) before it may touch an endpoint, and nothing in the
//! gateway can write to a target database.
//!
//! ARCHITECTURE:
//! - Connection manager: one session pool per endpoint, background health
//!   probes with exponential backoff, degraded-endpoint failover
//! - Governance engine: validate -> verdict -> execute, the only execution
//!   path
//! - Metadata store: field semantics with a primary database and a
//!   shadow-collection fallback inside the target database

mod auth;
mod config;
mod driver;
mod error;
mod governance;
mod manager;
mod metadata;
mod registry;
mod routes;
mod state;

use crate::config::Settings;
use crate::driver::memory::{MemoryDriver, MemoryEngine};
use crate::driver::DocumentDriver;
use crate::manager::EndpointManager;
use crate::registry::{EndpointRegistry, ResolvedEndpoint};
use crate::routes::create_router;
use crate::state::AppState;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting DocGate - Governed Document Database Gateway...");

    // Load configuration (file + DOCGATE_* environment)
    let settings = Arc::new(Settings::load()?);
    info!("📋 Configuration loaded successfully");

    // Resolve endpoint descriptors into connectable endpoints
    let registry = EndpointRegistry::from_descriptors(&settings.endpoints)?;
    if registry.is_empty() {
        warn!("⚠️  No endpoints configured - queries will have nowhere to go");
    }

    // Register every endpoint with the manager: one driver, one pool each
    let manager = Arc::new(EndpointManager::new(Arc::clone(&settings)));
    for endpoint in registry.iter() {
        let driver = build_driver(endpoint, &settings).await?;
        manager.register_endpoint(Arc::clone(endpoint), driver).await?;
    }
    info!("✅ Registered {} endpoint(s)", manager.endpoint_count().await);

    // One probe round before accepting traffic, then the background loops
    manager.probe_all().await;
    manager.start_probing().await;

    let state = Arc::new(AppState::new(Arc::clone(&manager), Arc::clone(&settings))?);

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   GET  /health                           - Liveness");
    info!("   GET  /api/endpoints                    - List endpoints with health");
    info!("   GET  /api/endpoints/{{name}}/health      - Probe one endpoint");
    info!("   POST /api/endpoints/{{name}}/bootstrap   - Ensure metadata collections");
    info!("   POST /api/query/validate               - Verdict without execution");
    info!("   POST /api/query                        - Validate and execute");
    info!("   POST /api/metadata/records             - Store a field description");
    info!("   GET  /api/metadata/records             - Read records by key pattern");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop probe loops and close every pool before exiting
    manager.shutdown().await;
    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,docgate_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Pick a driver for an endpoint by its URI scheme. The embedded memory
/// engine backs development and tests; real document database drivers plug
/// in through the same seam.
async fn build_driver(
    endpoint: &Arc<ResolvedEndpoint>,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn DocumentDriver>> {
    match endpoint.uri().scheme() {
        "memory" => {
            let engine = MemoryEngine::new(endpoint.name());
            if let Some(path) = &settings.seed_file {
                seed_engine(&engine, endpoint.name(), path).await?;
            }
            Ok(Arc::new(MemoryDriver::new(engine)))
        }
        scheme => Err(anyhow::anyhow!(
            "no driver available for scheme '{}' (endpoint '{}')",
            scheme,
            endpoint.name()
        )),
    }
}

/// Load seed documents for one endpoint from the configured JSON file.
/// File shape: { endpoint: { database: { collection: [documents] } } }.
async fn seed_engine(
    engine: &Arc<MemoryEngine>,
    endpoint: &str,
    path: &str,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read seed file '{}': {}", path, e))?;
    let seed: HashMap<String, HashMap<String, HashMap<String, Vec<serde_json::Value>>>> =
        serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("seed file '{}' is not valid: {}", path, e))?;

    let Some(databases) = seed.get(endpoint) else {
        return Ok(());
    };
    let mut total = 0usize;
    for (database, collections) in databases {
        for (collection, documents) in collections {
            total += documents.len();
            engine
                .seed_documents(database, collection, documents.clone())
                .await;
        }
    }
    info!("🌱 Seeded {} document(s) into endpoint '{}'", total, endpoint);
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
