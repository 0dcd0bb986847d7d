//! Application state management
//!
//! Contains shared state accessible across all handlers. Everything routes
//! through the endpoint manager; the governor and the metadata store are
//! thin coordinators over it.

use crate::config::Settings;
use crate::error::GatewayError;
use crate::governance::QueryGovernor;
use crate::manager::EndpointManager;
use crate::metadata::MetadataStore;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Endpoint registry, session pools, and health probes
    pub manager: Arc<EndpointManager>,

    /// Governance engine, the only path from a query to execution
    pub governor: QueryGovernor,

    /// Dual-location field metadata store
    pub metadata: MetadataStore,

    /// Loaded configuration
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Create new application state over an already populated manager.
    pub fn new(
        manager: Arc<EndpointManager>,
        settings: Arc<Settings>,
    ) -> Result<Self, GatewayError> {
        let governor = QueryGovernor::new(Arc::clone(&manager), Arc::clone(&settings))?;
        let metadata = MetadataStore::new(Arc::clone(&manager), Arc::clone(&settings));

        Ok(Self {
            manager,
            governor,
            metadata,
            settings,
        })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
