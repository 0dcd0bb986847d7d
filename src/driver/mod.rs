//! Document driver seam
//!
//! The wire-protocol boundary between the gateway and concrete database
//! engines. The governance layer only ever holds a [`ReadSession`], a trait
//! with no insert/update/delete surface, so writes to target databases are
//! impossible by construction rather than blocked by a policy check.
//! Metadata bookkeeping goes through the separate [`MetadataChannel`], the
//! single deliberately write-capable path, scoped to the gateway's own
//! collections.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by a concrete driver.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unsupported by this driver: {0}")]
    Unsupported(String),

    #[error("query execution failed: {0}")]
    Query(String),
}

impl DriverError {
    /// Connectivity failures trigger an opportunistic endpoint re-probe;
    /// semantic failures do not.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, DriverError::Unreachable(_))
    }
}

/// Options accompanying a find, already normalized by the governance layer.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Value>,
    pub sort: Option<Value>,
    pub limit: Option<u64>,
}

/// Coarse per-collection statistics, used by the scan guard.
#[derive(Debug, Clone, Copy)]
pub struct CollectionStats {
    pub document_count: u64,
}

/// A read-only session against one endpoint.
#[async_trait]
pub trait ReadSession: Send + Sync {
    /// Cheap liveness check, used by health probes.
    async fn ping(&self) -> Result<(), DriverError>;

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Value>, DriverError>;

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> Result<u64, DriverError>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Value],
        limit: u64,
    ) -> Result<Vec<Value>, DriverError>;

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DriverError>;

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStats, DriverError>;
}

/// Write-capable channel restricted to the gateway's metadata bookkeeping.
#[async_trait]
pub trait MetadataChannel: Send + Sync {
    /// Create the named collections (and their indexes) if absent. Idempotent.
    async fn ensure_collections(
        &self,
        database: &str,
        collections: &[&str],
    ) -> Result<(), DriverError>;

    /// Replace-style upsert: the first document matching `key` is replaced,
    /// otherwise `document` is inserted.
    async fn upsert(
        &self,
        database: &str,
        collection: &str,
        key: &Value,
        document: &Value,
    ) -> Result<(), DriverError>;

    async fn fetch(
        &self,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DriverError>;
}

/// Factory for sessions against one endpoint.
///
/// One driver instance is bound to one endpoint URI; the connection manager
/// owns a pool of sessions per driver.
#[async_trait]
pub trait DocumentDriver: Send + Sync + 'static {
    async fn open_session(&self) -> Result<Box<dyn ReadSession>, DriverError>;

    async fn open_metadata_channel(&self) -> Result<Box<dyn MetadataChannel>, DriverError>;
}
