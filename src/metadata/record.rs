//! Metadata record model.
//!
//! Records describe fields of collections behind an endpoint. They are
//! identified by a scoped key and tagged with the storage location that
//! produced them, so readers can tell a primary record from a fallback copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;
use validator::Validate;

/// Scoped identity of one described field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldKey {
    pub endpoint: String,
    pub database: String,
    pub collection: String,
    pub field_path: String,
}

impl FieldKey {
    /// Exact-match filter over the serialized document form.
    pub fn filter(&self) -> Value {
        json!({
            "endpoint": self.endpoint,
            "database": self.database,
            "collection": self.collection,
            "fieldPath": self.field_path,
        })
    }
}

/// Which storage location a record was read from or written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Primary,
    Fallback,
}

/// A stored field description. Never hard-deleted; a newer write for the
/// same key supersedes the older record by `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: FieldKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_meaning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-submitted description, not yet placed in a storage location.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordDraft {
    #[validate(length(min = 1, max = 64))]
    pub endpoint: String,
    #[validate(length(min = 1, max = 128))]
    pub database: String,
    #[validate(length(min = 1, max = 128))]
    pub collection: String,
    #[validate(length(min = 1, max = 256))]
    pub field_path: String,
    #[serde(default)]
    pub declared_type: Option<String>,
    #[serde(default)]
    pub business_meaning: Option<String>,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl RecordDraft {
    pub fn key(&self) -> FieldKey {
        FieldKey {
            endpoint: self.endpoint.clone(),
            database: self.database.clone(),
            collection: self.collection.clone(),
            field_path: self.field_path.clone(),
        }
    }

    /// Stamp the draft into a stored record for one location.
    pub(super) fn into_record(self, provenance: Provenance, now: DateTime<Utc>) -> MetadataRecord {
        MetadataRecord {
            id: Uuid::new_v4(),
            key: FieldKey {
                endpoint: self.endpoint,
                database: self.database,
                collection: self.collection,
                field_path: self.field_path,
            },
            declared_type: self.declared_type,
            business_meaning: self.business_meaning,
            confidence: self.confidence,
            examples: self.examples,
            provenance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Read-side selector. The endpoint is always required; the narrower fields
/// are optional. Reads against the fallback location additionally need a
/// database, since that names the shadow collection's host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPattern {
    pub endpoint: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub field_path: Option<String>,
}

impl KeyPattern {
    /// Filter over the serialized document form, one clause per given field.
    pub fn filter(&self) -> Value {
        let mut clauses = serde_json::Map::new();
        clauses.insert("endpoint".to_string(), json!(self.endpoint));
        if let Some(database) = &self.database {
            clauses.insert("database".to_string(), json!(database));
        }
        if let Some(collection) = &self.collection {
            clauses.insert("collection".to_string(), json!(collection));
        }
        if let Some(field_path) = &self.field_path {
            clauses.insert("fieldPath".to_string(), json!(field_path));
        }
        Value::Object(clauses)
    }
}
