//! Metadata store with dual-location resilience.
//!
//! Field descriptions live in the endpoint's dedicated metadata database
//! when that is writable, and fall back to a shadow collection embedded in
//! the target database when it is not. The two locations fail independently,
//! so reads consult both and merge, preferring primary provenance.

mod record;

pub use record::{FieldKey, KeyPattern, MetadataRecord, Provenance, RecordDraft};

use chrono::Utc;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::driver::DriverError;
use crate::error::{internal_error, GatewayError};
use crate::manager::EndpointManager;

/// Collection holding field records inside the primary metadata database.
pub(crate) const FIELDS_COLLECTION: &str = "fields";

pub struct MetadataStore {
    manager: Arc<EndpointManager>,
    settings: Arc<Settings>,
}

impl MetadataStore {
    pub fn new(manager: Arc<EndpointManager>, settings: Arc<Settings>) -> Self {
        Self { manager, settings }
    }

    /// Store a field description. Primary location first; on primary failure
    /// the record lands in the target database's shadow collection instead.
    /// Only when both locations refuse does the write fail.
    pub async fn write(&self, draft: RecordDraft) -> Result<MetadataRecord, GatewayError> {
        let endpoint = draft.endpoint.clone();
        let channel = self.manager.metadata_channel(&endpoint).await?;
        let key_filter = draft.key().filter();
        let now = Utc::now();

        let primary = draft.clone().into_record(Provenance::Primary, now);
        let document = serde_json::to_value(&primary)
            .map_err(|e| internal_error(format!("failed to encode metadata record: {}", e)))?;
        let primary_err = match channel
            .upsert(
                &self.settings.metadata.database,
                FIELDS_COLLECTION,
                &key_filter,
                &document,
            )
            .await
        {
            Ok(()) => {
                debug!(
                    endpoint = %endpoint,
                    field = %primary.key.field_path,
                    "Metadata record stored in primary location"
                );
                return Ok(primary);
            }
            Err(e) => e,
        };
        if primary_err.is_connectivity() {
            self.manager.note_connectivity_failure(&endpoint).await;
        }
        warn!(
            endpoint = %endpoint,
            error = %primary_err,
            "Primary metadata write failed, trying the shadow collection"
        );

        let fallback = draft.into_record(Provenance::Fallback, now);
        let document = serde_json::to_value(&fallback)
            .map_err(|e| internal_error(format!("failed to encode metadata record: {}", e)))?;
        match channel
            .upsert(
                &fallback.key.database,
                &self.settings.metadata.shadow_collection,
                &key_filter,
                &document,
            )
            .await
        {
            Ok(()) => {
                info!(
                    endpoint = %endpoint,
                    database = %fallback.key.database,
                    field = %fallback.key.field_path,
                    "Metadata record stored in fallback location"
                );
                Ok(fallback)
            }
            Err(fallback_err) => {
                if fallback_err.is_connectivity() {
                    self.manager.note_connectivity_failure(&endpoint).await;
                }
                Err(GatewayError::MetadataWriteFailed {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                })
            }
        }
    }

    /// Read records matching a key pattern. Both locations are queried
    /// concurrently under a bounded wait; a failed or slow location is
    /// skipped, not fatal. When both hold a record for the same key, the
    /// primary one wins; within one location the fresher `updated_at` wins.
    pub async fn read(&self, pattern: &KeyPattern) -> Result<Vec<MetadataRecord>, GatewayError> {
        let channel = self.manager.metadata_channel(&pattern.endpoint).await?;
        let wait = Duration::from_millis(self.settings.metadata.read_wait_ms);
        let filter = pattern.filter();

        let primary_fut = timeout(
            wait,
            channel.fetch(&self.settings.metadata.database, FIELDS_COLLECTION, &filter),
        );
        // The shadow collection lives inside a target database, so fallback
        // reads need the pattern to name one.
        let fallback_fut = async {
            match &pattern.database {
                Some(database) => Some(
                    timeout(
                        wait,
                        channel.fetch(database, &self.settings.metadata.shadow_collection, &filter),
                    )
                    .await,
                ),
                None => None,
            }
        };
        let (primary_outcome, fallback_outcome) = tokio::join!(primary_fut, fallback_fut);

        let primary_records = self
            .collect_location(&pattern.endpoint, Provenance::Primary, primary_outcome)
            .await;
        let fallback_records = match fallback_outcome {
            Some(outcome) => {
                self.collect_location(&pattern.endpoint, Provenance::Fallback, outcome)
                    .await
            }
            None => Vec::new(),
        };

        let mut merged = dedupe_by_key(fallback_records);
        for (key, record) in dedupe_by_key(primary_records) {
            merged.insert(key, record);
        }
        let mut records: Vec<MetadataRecord> = merged.into_values().collect();
        records.sort_by(|a, b| {
            (&a.key.database, &a.key.collection, &a.key.field_path).cmp(&(
                &b.key.database,
                &b.key.collection,
                &b.key.field_path,
            ))
        });
        Ok(records)
    }

    async fn collect_location(
        &self,
        endpoint: &str,
        location: Provenance,
        outcome: Result<Result<Vec<Value>, DriverError>, Elapsed>,
    ) -> Vec<MetadataRecord> {
        match outcome {
            Ok(Ok(documents)) => documents
                .into_iter()
                .filter_map(|document| match serde_json::from_value(document) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(
                            endpoint,
                            location = ?location,
                            error = %e,
                            "Skipping undecodable metadata document"
                        );
                        None
                    }
                })
                .collect(),
            Ok(Err(e)) => {
                warn!(
                    endpoint,
                    location = ?location,
                    error = %e,
                    "Metadata location unavailable, skipping"
                );
                if e.is_connectivity() {
                    self.manager.note_connectivity_failure(endpoint).await;
                }
                Vec::new()
            }
            Err(_) => {
                warn!(
                    endpoint,
                    location = ?location,
                    wait_ms = self.settings.metadata.read_wait_ms,
                    "Metadata location timed out, skipping"
                );
                Vec::new()
            }
        }
    }
}

/// One record per key; the fresher `updated_at` survives.
fn dedupe_by_key(records: Vec<MetadataRecord>) -> HashMap<FieldKey, MetadataRecord> {
    let mut map = HashMap::new();
    for record in records {
        match map.entry(record.key.clone()) {
            Entry::Occupied(mut slot) => {
                let held: &MetadataRecord = slot.get();
                if record.updated_at > held.updated_at {
                    slot.insert(record);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, MemoryEngine};
    use crate::registry::{DeclaredStatus, EndpointDescriptor, EndpointRegistry};
    use pretty_assertions::assert_eq;

    async fn store_with_engine(settings: Settings) -> (MetadataStore, Arc<MemoryEngine>) {
        let descriptor = EndpointDescriptor {
            name: "orders".to_string(),
            alias: None,
            uri: "memory://orders".to_string(),
            environment: "test".to_string(),
            description: None,
            status: DeclaredStatus::Active,
            tags: vec![],
        };
        let registry = EndpointRegistry::from_descriptors(&[descriptor]).unwrap();
        let settings = Arc::new(settings);
        let manager = Arc::new(EndpointManager::new(Arc::clone(&settings)));
        let engine = MemoryEngine::new("orders");
        manager
            .register_endpoint(
                Arc::clone(registry.get("orders").unwrap()),
                Arc::new(MemoryDriver::new(Arc::clone(&engine))),
            )
            .await
            .unwrap();
        (MetadataStore::new(manager, settings), engine)
    }

    fn draft(field_path: &str, meaning: &str) -> RecordDraft {
        RecordDraft {
            endpoint: "orders".to_string(),
            database: "app".to_string(),
            collection: "users".to_string(),
            field_path: field_path.to_string(),
            declared_type: Some("string".to_string()),
            business_meaning: Some(meaning.to_string()),
            confidence: Some(0.8),
            examples: vec![],
        }
    }

    fn pattern(database: Option<&str>) -> KeyPattern {
        KeyPattern {
            endpoint: "orders".to_string(),
            database: database.map(str::to_string),
            collection: None,
            field_path: None,
        }
    }

    #[tokio::test]
    async fn writes_land_in_the_primary_location() {
        let (store, engine) = store_with_engine(Settings::default()).await;

        let stored = store.write(draft("email", "login address")).await.unwrap();
        assert_eq!(stored.provenance, Provenance::Primary);

        let held = engine
            .collection_documents("docgate_meta", "fields")
            .await;
        assert_eq!(held.len(), 1);
        assert_eq!(held[0]["businessMeaning"], "login address");
    }

    #[tokio::test]
    async fn primary_refusal_falls_back_to_the_shadow_collection() {
        let (store, engine) = store_with_engine(Settings::default()).await;
        engine.deny_database("docgate_meta").await;

        let stored = store.write(draft("email", "login address")).await.unwrap();
        assert_eq!(stored.provenance, Provenance::Fallback);

        let shadow = engine
            .collection_documents("app", "_docgate_semantics")
            .await;
        assert_eq!(shadow.len(), 1);
        assert_eq!(shadow[0]["provenance"], "fallback");
    }

    #[tokio::test]
    async fn both_locations_failing_is_a_metadata_write_failure() {
        let (store, engine) = store_with_engine(Settings::default()).await;
        engine.deny_database("docgate_meta").await;
        engine.deny_database("app").await;

        let err = store.write(draft("email", "login address")).await.unwrap_err();
        assert_eq!(err.code(), Some("METADATA_WRITE_FAILED"));
    }

    #[tokio::test]
    async fn merge_prefers_the_primary_record_for_a_shared_key() {
        let (store, engine) = store_with_engine(Settings::default()).await;

        engine.deny_database("docgate_meta").await;
        store.write(draft("email", "fallback copy")).await.unwrap();

        engine.allow_database("docgate_meta").await;
        store.write(draft("email", "primary copy")).await.unwrap();

        let records = store.read(&pattern(Some("app"))).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provenance, Provenance::Primary);
        assert_eq!(records[0].business_meaning.as_deref(), Some("primary copy"));

        // The superseded fallback copy is still physically present.
        let shadow = engine
            .collection_documents("app", "_docgate_semantics")
            .await;
        assert_eq!(shadow.len(), 1);
    }

    #[tokio::test]
    async fn a_failed_location_is_skipped_not_fatal() {
        let (store, engine) = store_with_engine(Settings::default()).await;
        store.write(draft("email", "login address")).await.unwrap();

        engine.deny_database("app").await;
        let records = store.read(&pattern(Some("app"))).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].provenance, Provenance::Primary);
    }

    #[tokio::test]
    async fn patterns_without_a_database_consult_primary_only() {
        let (store, engine) = store_with_engine(Settings::default()).await;

        store.write(draft("email", "primary record")).await.unwrap();
        engine.deny_database("docgate_meta").await;
        store.write(draft("phone", "fallback record")).await.unwrap();

        let records = store.read(&pattern(None)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.field_path, "email");

        // Naming the database brings the shadow location into view.
        engine.allow_database("docgate_meta").await;
        let records = store.read(&pattern(Some("app"))).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn slow_locations_are_abandoned_after_the_bounded_wait() {
        let mut settings = Settings::default();
        settings.metadata.read_wait_ms = 30;
        let (store, engine) = store_with_engine(settings).await;
        store.write(draft("email", "login address")).await.unwrap();

        engine.set_stall(Some(Duration::from_millis(200))).await;
        let records = store.read(&pattern(Some("app"))).await.unwrap();
        assert!(records.is_empty());
        engine.set_stall(None).await;
    }

    #[tokio::test]
    async fn stale_duplicates_within_a_location_lose_to_fresher_ones() {
        let old = draft("email", "old").into_record(Provenance::Primary, Utc::now());
        let mut new = draft("email", "new").into_record(Provenance::Primary, Utc::now());
        new.updated_at = old.updated_at + chrono::Duration::seconds(5);

        let map = dedupe_by_key(vec![old, new]);
        let survivor = map.values().next().unwrap();
        assert_eq!(survivor.business_meaning.as_deref(), Some("new"));
    }
}
