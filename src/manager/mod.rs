//! Endpoint connection manager
//!
//! Owns one pooled session client per registered endpoint, plus everything
//! that keeps routing safe: health snapshots maintained by the probe tasks,
//! degraded-endpoint gating with explicit failover rules, bounded pool
//! acquisition, and the single-flight metadata bootstrap every endpoint gets
//! on first use.

mod health;

pub use health::{HealthSnapshot, RuntimeStatus};

use chrono::{DateTime, Utc};
use deadpool::managed::{Metrics, Object, Pool, PoolError, RecycleError, RecycleResult, TimeoutType};
use deadpool::Runtime;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify, OnceCell, RwLock};
use tracing::{info, warn};

use crate::config::Settings;
use crate::driver::{DocumentDriver, DriverError, MetadataChannel, ReadSession};
use crate::error::GatewayError;
use crate::registry::{DeclaredStatus, ResolvedEndpoint};

/// Collections prepared in every endpoint's metadata database. Only `fields`
/// is written by the gateway itself; the rest are ready for discovery
/// collaborators.
pub const METADATA_COLLECTIONS: [&str; 4] = ["endpoints", "collections", "fields", "query_history"];

/// Pool manager opening read sessions through the endpoint's driver.
pub struct SessionFactory {
    driver: Arc<dyn DocumentDriver>,
    endpoint: String,
}

impl deadpool::managed::Manager for SessionFactory {
    type Type = Box<dyn ReadSession>;
    type Error = DriverError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        tracing::debug!(endpoint = %self.endpoint, "Opening pooled session");
        self.driver.open_session().await
    }

    async fn recycle(
        &self,
        session: &mut Self::Type,
        _metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        session.ping().await.map_err(RecycleError::Backend)
    }
}

/// RAII guard for one pooled session. Dropping it returns the session to the
/// pool on every path, including panics and cancelled futures.
pub struct SessionLease {
    object: Object<SessionFactory>,
    endpoint: String,
}

impl SessionLease {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Deref for SessionLease {
    type Target = dyn ReadSession;

    fn deref(&self) -> &Self::Target {
        self.object.as_ref().as_ref()
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Options for [`EndpointManager::acquire`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    /// Permit acquiring on a degraded endpoint, honored only when no other
    /// endpoint is currently active.
    pub allow_degraded: bool,
}

#[derive(Debug, Clone, Copy)]
struct SizeHint {
    document_count: u64,
    fetched_at: Instant,
}

/// One registered endpoint with its session pool and runtime state.
pub struct ManagedEndpoint {
    resolved: Arc<ResolvedEndpoint>,
    driver: Arc<dyn DocumentDriver>,
    pool: Pool<SessionFactory>,
    health: RwLock<HealthSnapshot>,
    probe_lock: Mutex<()>,
    probe_nudge: Notify,
    bootstrap: OnceCell<()>,
    size_hints: RwLock<HashMap<(String, String), SizeHint>>,
    registered_at: DateTime<Utc>,
}

impl ManagedEndpoint {
    pub fn name(&self) -> &str {
        self.resolved.name()
    }

    async fn info(&self) -> EndpointInfo {
        let status = self.pool.status();
        EndpointInfo {
            name: self.resolved.name().to_string(),
            alias: self.resolved.alias().to_string(),
            environment: self.resolved.descriptor.environment.clone(),
            description: self.resolved.descriptor.description.clone(),
            uri: self.resolved.redacted_uri(),
            tags: self.resolved.descriptor.tags.clone(),
            health: self.health.read().await.clone(),
            pool: PoolStatusInfo {
                max_size: status.max_size,
                size: status.size,
                available: status.available,
                waiting: status.waiting,
            },
            metadata_ready: self.bootstrap.initialized(),
            registered_at: self.registered_at,
        }
    }
}

/// Public endpoint info, safe to expose: the URI is redacted and credentials
/// never appear.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub name: String,
    pub alias: String,
    pub environment: String,
    pub description: Option<String>,
    pub uri: String,
    pub tags: Vec<String>,
    pub health: HealthSnapshot,
    pub pool: PoolStatusInfo,
    pub metadata_ready: bool,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatusInfo {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

/// Connection manager for all registered endpoints.
pub struct EndpointManager {
    endpoints: RwLock<HashMap<String, Arc<ManagedEndpoint>>>,
    settings: Arc<Settings>,
    shutdown: watch::Sender<bool>,
}

impl EndpointManager {
    pub fn new(settings: Arc<Settings>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            endpoints: RwLock::new(HashMap::new()),
            settings,
            shutdown,
        }
    }

    /// Register an endpoint and build its session pool. Sessions open lazily
    /// on first acquire; registration itself never dials out. Call before
    /// [`EndpointManager::start_probing`].
    pub async fn register_endpoint(
        &self,
        resolved: Arc<ResolvedEndpoint>,
        driver: Arc<dyn DocumentDriver>,
    ) -> Result<(), GatewayError> {
        let name = resolved.name().to_string();

        {
            let endpoints = self.endpoints.read().await;
            if endpoints.contains_key(&name) {
                return Err(GatewayError::Config(format!(
                    "endpoint '{}' is already registered",
                    name
                )));
            }
        }

        let factory = SessionFactory {
            driver: Arc::clone(&driver),
            endpoint: name.clone(),
        };
        let pool = Pool::builder(factory)
            .max_size(self.settings.pool.max_size)
            .wait_timeout(Some(Duration::from_millis(self.settings.pool.acquire_wait_ms)))
            .create_timeout(Some(Duration::from_millis(
                self.settings.health.probe_timeout_ms,
            )))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build session pool: {}", e)))?;

        let initial_status = match resolved.descriptor.status {
            DeclaredStatus::Active => RuntimeStatus::Active,
            DeclaredStatus::Inactive => RuntimeStatus::Inactive,
        };

        let endpoint = Arc::new(ManagedEndpoint {
            resolved: Arc::clone(&resolved),
            driver,
            pool,
            health: RwLock::new(HealthSnapshot::starting(initial_status)),
            probe_lock: Mutex::new(()),
            probe_nudge: Notify::new(),
            bootstrap: OnceCell::new(),
            size_hints: RwLock::new(HashMap::new()),
            registered_at: Utc::now(),
        });

        info!(
            endpoint = %name,
            uri = %resolved.redacted_uri(),
            credential = resolved.credential_fingerprint().as_deref().unwrap_or("none"),
            "Registered endpoint"
        );

        self.endpoints.write().await.insert(name, endpoint);
        Ok(())
    }

    /// Spawn the background probe task for every registered endpoint.
    pub async fn start_probing(self: &Arc<Self>) {
        for endpoint in self.endpoints_snapshot().await {
            health::spawn_probe_task(self, endpoint);
        }
    }

    /// Acquire a pooled read session on `name`.
    ///
    /// Degraded endpoints refuse sessions unless the caller opted into
    /// degraded reads and no alternative endpoint is active. Saturated pools
    /// fail with `PoolExhausted` after the configured bounded wait.
    pub async fn acquire(
        &self,
        name: &str,
        options: AcquireOptions,
    ) -> Result<SessionLease, GatewayError> {
        let endpoint = self.endpoint(name).await?;

        let (status, failures) = {
            let health = endpoint.health.read().await;
            (health.status, health.consecutive_failures)
        };
        match status {
            RuntimeStatus::Active => {}
            RuntimeStatus::Inactive => {
                return Err(GatewayError::EndpointUnavailable {
                    endpoint: name.to_string(),
                    reason: "endpoint is declared inactive".to_string(),
                });
            }
            RuntimeStatus::Degraded => {
                if options.allow_degraded && !self.has_active_alternative(name).await {
                    warn!(
                        endpoint = %name,
                        "Acquiring session on degraded endpoint, no active alternative"
                    );
                } else {
                    endpoint.probe_nudge.notify_one();
                    return Err(GatewayError::EndpointUnavailable {
                        endpoint: name.to_string(),
                        reason: format!("{} consecutive probe failures", failures),
                    });
                }
            }
        }

        match endpoint.pool.get().await {
            Ok(object) => {
                self.kick_bootstrap(&endpoint);
                Ok(SessionLease {
                    object,
                    endpoint: name.to_string(),
                })
            }
            Err(PoolError::Timeout(TimeoutType::Wait)) => Err(GatewayError::PoolExhausted {
                endpoint: name.to_string(),
            }),
            Err(PoolError::Timeout(TimeoutType::Create)) => {
                endpoint.probe_nudge.notify_one();
                Err(GatewayError::EndpointUnavailable {
                    endpoint: name.to_string(),
                    reason: "session open timed out".to_string(),
                })
            }
            Err(PoolError::Timeout(TimeoutType::Recycle)) => {
                endpoint.probe_nudge.notify_one();
                Err(GatewayError::EndpointUnavailable {
                    endpoint: name.to_string(),
                    reason: "session recycle timed out".to_string(),
                })
            }
            Err(PoolError::Backend(e)) => {
                if e.is_connectivity() {
                    endpoint.probe_nudge.notify_one();
                }
                Err(GatewayError::Driver(e))
            }
            Err(e) => Err(GatewayError::Internal(format!("pool failure: {}", e))),
        }
    }

    /// Report a connectivity failure observed during execution. Nudges the
    /// endpoint's probe task so recovery is noticed without waiting a full
    /// interval.
    pub async fn note_connectivity_failure(&self, name: &str) {
        if let Ok(endpoint) = self.endpoint(name).await {
            endpoint.probe_nudge.notify_one();
        }
    }

    /// Idempotent, single-flight creation of the metadata collections on one
    /// endpoint. Concurrent callers share the in-flight attempt; a failure
    /// leaves the slot empty so a later call retries.
    pub async fn ensure_metadata_bootstrap(&self, name: &str) -> Result<(), GatewayError> {
        let endpoint = self.endpoint(name).await?;
        bootstrap_endpoint(&endpoint, &self.settings.metadata.database).await
    }

    /// Run one on-demand probe and return the fresh snapshot.
    pub async fn probe_endpoint(&self, name: &str) -> Result<HealthSnapshot, GatewayError> {
        let endpoint = self.endpoint(name).await?;
        endpoint.probe(&self.settings.health).await;
        let snapshot = endpoint.health.read().await.clone();
        Ok(snapshot)
    }

    /// Probe every endpoint once, used at startup so the first requests see
    /// real statuses instead of optimistic defaults.
    pub async fn probe_all(&self) {
        for endpoint in self.endpoints_snapshot().await {
            if endpoint.health.read().await.status != RuntimeStatus::Inactive {
                endpoint.probe(&self.settings.health).await;
            }
        }
    }

    /// Cached estimate of a collection's document count, for the scan guard.
    /// Returns `None` when no estimate is obtainable; the guard fails open.
    pub async fn collection_size_hint(
        &self,
        name: &str,
        database: &str,
        collection: &str,
    ) -> Option<u64> {
        let endpoint = self.endpoint(name).await.ok()?;
        let key = (database.to_string(), collection.to_string());
        let ttl = Duration::from_secs(self.settings.governance.scan_guard.stats_ttl_secs);

        if let Some(hint) = endpoint.size_hints.read().await.get(&key) {
            if hint.fetched_at.elapsed() < ttl {
                return Some(hint.document_count);
            }
        }

        // Out-of-pool session so validation never competes with execution
        // for pool capacity.
        let deadline = Duration::from_millis(self.settings.health.probe_timeout_ms);
        let stats = tokio::time::timeout(deadline, async {
            let session = endpoint.driver.open_session().await?;
            session.collection_stats(database, collection).await
        })
        .await
        .ok()?
        .ok()?;

        endpoint.size_hints.write().await.insert(
            key,
            SizeHint {
                document_count: stats.document_count,
                fetched_at: Instant::now(),
            },
        );
        Some(stats.document_count)
    }

    /// Open a metadata channel on `name`. Channels are short-lived and not
    /// pooled; metadata traffic is orders of magnitude below query traffic.
    pub async fn metadata_channel(
        &self,
        name: &str,
    ) -> Result<Box<dyn MetadataChannel>, GatewayError> {
        let endpoint = self.endpoint(name).await?;
        match endpoint.driver.open_metadata_channel().await {
            Ok(channel) => Ok(channel),
            Err(e) => {
                if e.is_connectivity() {
                    endpoint.probe_nudge.notify_one();
                }
                Err(GatewayError::Driver(e))
            }
        }
    }

    pub async fn endpoint_info(&self, name: &str) -> Result<EndpointInfo, GatewayError> {
        let endpoint = self.endpoint(name).await?;
        Ok(endpoint.info().await)
    }

    /// All endpoints, name-sorted for stable listings.
    pub async fn list_infos(&self) -> Vec<EndpointInfo> {
        let mut infos = Vec::new();
        for endpoint in self.endpoints_snapshot().await {
            infos.push(endpoint.info().await);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }

    /// Stop probe tasks and close every pool.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        for endpoint in self.endpoints_snapshot().await {
            endpoint.pool.close();
        }
        info!("Endpoint manager shut down");
    }

    pub(super) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(super) fn health_config(&self) -> &crate::config::HealthConfig {
        &self.settings.health
    }

    async fn endpoints_snapshot(&self) -> Vec<Arc<ManagedEndpoint>> {
        self.endpoints.read().await.values().cloned().collect()
    }

    async fn endpoint(&self, name: &str) -> Result<Arc<ManagedEndpoint>, GatewayError> {
        self.endpoints
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::EndpointNotFound(name.to_string()))
    }

    async fn has_active_alternative(&self, except: &str) -> bool {
        for endpoint in self.endpoints_snapshot().await {
            if endpoint.name() == except {
                continue;
            }
            if endpoint.health.read().await.status == RuntimeStatus::Active {
                return true;
            }
        }
        false
    }

    fn kick_bootstrap(&self, endpoint: &Arc<ManagedEndpoint>) {
        if endpoint.bootstrap.initialized() {
            return;
        }
        let endpoint = Arc::clone(endpoint);
        let database = self.settings.metadata.database.clone();
        tokio::spawn(async move {
            if let Err(e) = bootstrap_endpoint(&endpoint, &database).await {
                warn!(
                    endpoint = %endpoint.name(),
                    "Deferred metadata bootstrap failed: {}", e
                );
            }
        });
    }
}

async fn bootstrap_endpoint(
    endpoint: &Arc<ManagedEndpoint>,
    database: &str,
) -> Result<(), GatewayError> {
    endpoint
        .bootstrap
        .get_or_try_init(|| async {
            info!(
                endpoint = %endpoint.name(),
                database,
                "Bootstrapping metadata collections"
            );
            let channel = endpoint.driver.open_metadata_channel().await?;
            channel
                .ensure_collections(database, &METADATA_COLLECTIONS)
                .await?;
            Ok::<(), DriverError>(())
        })
        .await
        .map_err(GatewayError::Driver)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, MemoryEngine};
    use crate::registry::{DeclaredStatus, EndpointDescriptor, EndpointRegistry};

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.pool.max_size = 2;
        settings.pool.acquire_wait_ms = 100;
        settings.health.probe_timeout_ms = 500;
        settings
    }

    fn descriptor(name: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            name: name.to_string(),
            alias: None,
            uri: format!("memory://{}", name),
            environment: "test".to_string(),
            description: None,
            status: DeclaredStatus::Active,
            tags: vec![],
        }
    }

    async fn manager_with_endpoints(
        names: &[&str],
        settings: Settings,
    ) -> (Arc<EndpointManager>, Vec<Arc<MemoryEngine>>) {
        let descriptors: Vec<_> = names.iter().map(|n| descriptor(n)).collect();
        let registry = EndpointRegistry::from_descriptors(&descriptors).unwrap();
        let manager = Arc::new(EndpointManager::new(Arc::new(settings)));
        let mut engines = Vec::new();
        for name in names {
            let engine = MemoryEngine::new(*name);
            let driver = Arc::new(MemoryDriver::new(Arc::clone(&engine)));
            manager
                .register_endpoint(Arc::clone(registry.get(name).unwrap()), driver)
                .await
                .unwrap();
            engines.push(engine);
        }
        (manager, engines)
    }

    #[tokio::test]
    async fn unknown_endpoint_is_not_found() {
        let (manager, _) = manager_with_endpoints(&["orders"], test_settings()).await;
        let err = manager
            .acquire("ordesr", AcquireOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EndpointNotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_config_error() {
        let (manager, _) = manager_with_endpoints(&["orders"], test_settings()).await;
        let registry = EndpointRegistry::from_descriptors(&[descriptor("orders")]).unwrap();
        let engine = MemoryEngine::new("orders");
        let err = manager
            .register_endpoint(
                Arc::clone(registry.get("orders").unwrap()),
                Arc::new(MemoryDriver::new(engine)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[tokio::test]
    async fn saturated_pool_fails_with_pool_exhausted_after_bounded_wait() {
        let mut settings = test_settings();
        settings.pool.max_size = 1;
        settings.pool.acquire_wait_ms = 50;
        let (manager, _) = manager_with_endpoints(&["orders"], settings).await;

        let _held = manager
            .acquire("orders", AcquireOptions::default())
            .await
            .unwrap();
        let err = manager
            .acquire("orders", AcquireOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PoolExhausted { .. }));
    }

    #[tokio::test]
    async fn dropping_a_lease_returns_capacity() {
        let mut settings = test_settings();
        settings.pool.max_size = 1;
        settings.pool.acquire_wait_ms = 50;
        let (manager, _) = manager_with_endpoints(&["orders"], settings).await;

        let lease = manager
            .acquire("orders", AcquireOptions::default())
            .await
            .unwrap();
        drop(lease);
        assert!(manager
            .acquire("orders", AcquireOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn endpoint_degrades_after_threshold_and_recovers_after_one_success() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;
        engines[0].set_online(false);

        for _ in 0..3 {
            manager.probe_endpoint("orders").await.unwrap();
        }
        let snapshot = manager.endpoint_info("orders").await.unwrap().health;
        assert_eq!(snapshot.status, RuntimeStatus::Degraded);
        assert_eq!(snapshot.consecutive_failures, 3);

        let err = manager
            .acquire("orders", AcquireOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EndpointUnavailable { .. }));

        engines[0].set_online(true);
        let snapshot = manager.probe_endpoint("orders").await.unwrap();
        assert_eq!(snapshot.status, RuntimeStatus::Active);
        assert!(manager
            .acquire("orders", AcquireOptions::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn two_failures_stay_below_the_degraded_threshold() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;
        engines[0].set_online(false);
        for _ in 0..2 {
            manager.probe_endpoint("orders").await.unwrap();
        }
        let snapshot = manager.endpoint_info("orders").await.unwrap().health;
        assert_eq!(snapshot.status, RuntimeStatus::Active);
        assert_eq!(snapshot.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn degraded_endpoint_serves_only_with_opt_in_and_no_alternative() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;
        engines[0].set_online(false);
        for _ in 0..3 {
            manager.probe_endpoint("orders").await.unwrap();
        }
        // Back online but still marked degraded until the next probe runs.
        engines[0].set_online(true);

        let err = manager
            .acquire("orders", AcquireOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EndpointUnavailable { .. }));

        let lease = manager
            .acquire("orders", AcquireOptions { allow_degraded: true })
            .await
            .unwrap();
        assert_eq!(lease.endpoint(), "orders");
    }

    #[tokio::test]
    async fn degraded_opt_in_is_refused_while_an_alternative_is_active() {
        let (manager, engines) =
            manager_with_endpoints(&["orders", "orders-replica"], test_settings()).await;
        engines[0].set_online(false);
        for _ in 0..3 {
            manager.probe_endpoint("orders").await.unwrap();
        }
        engines[0].set_online(true);

        let err = manager
            .acquire("orders", AcquireOptions { allow_degraded: true })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::EndpointUnavailable { .. }));
    }

    #[tokio::test]
    async fn metadata_bootstrap_is_single_flight_and_idempotent() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager.ensure_metadata_bootstrap("orders").await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(engines[0].init_calls(), 1);

        manager.ensure_metadata_bootstrap("orders").await.unwrap();
        assert_eq!(engines[0].init_calls(), 1);
    }

    #[tokio::test]
    async fn failed_bootstrap_can_be_retried() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;
        engines[0].deny_database("docgate_meta").await;

        assert!(manager.ensure_metadata_bootstrap("orders").await.is_err());
        assert_eq!(engines[0].init_calls(), 0);

        // The failure left the once-cell empty, so the next call tries again.
        engines[0].allow_database("docgate_meta").await;
        manager.ensure_metadata_bootstrap("orders").await.unwrap();
        assert_eq!(engines[0].init_calls(), 1);
    }

    #[tokio::test]
    async fn size_hints_are_cached_within_the_ttl() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;
        engines[0]
            .seed_documents("app", "orders", vec![serde_json::json!({"_id": 1})])
            .await;

        assert_eq!(
            manager.collection_size_hint("orders", "app", "orders").await,
            Some(1)
        );
        engines[0]
            .seed_documents("app", "orders", vec![serde_json::json!({"_id": 2})])
            .await;
        // Still the cached value; the TTL has not elapsed.
        assert_eq!(
            manager.collection_size_hint("orders", "app", "orders").await,
            Some(1)
        );
    }

    #[tokio::test]
    async fn size_hint_fails_open_when_the_endpoint_is_down() {
        let (manager, engines) = manager_with_endpoints(&["orders"], test_settings()).await;
        engines[0].set_online(false);
        assert_eq!(
            manager.collection_size_hint("orders", "app", "orders").await,
            None
        );
    }
}
