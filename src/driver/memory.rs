//! Embedded in-process document engine
//!
//! Backs the `memory://` endpoint scheme: a MongoDB-flavored query engine
//! over JSON documents held in memory, used for local development, seed-file
//! demos, and the test suite. Fault switches (offline, per-database denial,
//! stalls) emulate the failure modes the connection manager and the metadata
//! store must survive against real servers.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{
    CollectionStats, DocumentDriver, DriverError, FindOptions, MetadataChannel, ReadSession,
};

type Collections = HashMap<String, Vec<Value>>;

/// Shared store behind every session of one `memory://` endpoint.
pub struct MemoryEngine {
    name: String,
    databases: RwLock<HashMap<String, Collections>>,
    online: AtomicBool,
    denied: RwLock<HashSet<String>>,
    stall: RwLock<Option<Duration>>,
    init_calls: AtomicU64,
    query_calls: AtomicU64,
}

impl MemoryEngine {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            databases: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            denied: RwLock::new(HashSet::new()),
            stall: RwLock::new(None),
            init_calls: AtomicU64::new(0),
            query_calls: AtomicU64::new(0),
        })
    }

    /// Append documents to a collection, creating database and collection on
    /// first use. This is the seed path, not a query-facing write.
    pub async fn seed_documents(&self, database: &str, collection: &str, docs: Vec<Value>) {
        let mut databases = self.databases.write().await;
        databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
    }

    /// Raw contents of a collection, bypassing availability switches.
    pub async fn collection_documents(&self, database: &str, collection: &str) -> Vec<Value> {
        let databases = self.databases.read().await;
        databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Fault switch: unreachable endpoint. Affects session opening and every
    /// subsequent operation.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, AtomicOrdering::SeqCst);
    }

    /// Fault switch: the read-only principal has no rights on `database`.
    pub async fn deny_database(&self, database: &str) {
        self.denied.write().await.insert(database.to_string());
    }

    pub async fn allow_database(&self, database: &str) {
        self.denied.write().await.remove(database);
    }

    /// Fault switch: every operation sleeps first, for deadline tests.
    pub async fn set_stall(&self, stall: Option<Duration>) {
        *self.stall.write().await = stall;
    }

    /// Number of `ensure_collections` invocations, for single-flight checks.
    pub fn init_calls(&self) -> u64 {
        self.init_calls.load(AtomicOrdering::SeqCst)
    }

    /// Number of query operations executed, for no-execution-on-reject checks.
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(AtomicOrdering::SeqCst)
    }

    async fn delay(&self) {
        let stall = *self.stall.read().await;
        if let Some(duration) = stall {
            tokio::time::sleep(duration).await;
        }
    }

    async fn check_available(&self, database: Option<&str>) -> Result<(), DriverError> {
        if !self.online.load(AtomicOrdering::SeqCst) {
            return Err(DriverError::Unreachable(format!(
                "memory engine '{}' is offline",
                self.name
            )));
        }
        if let Some(database) = database {
            if self.denied.read().await.contains(database) {
                return Err(DriverError::PermissionDenied(format!(
                    "no access to database '{}'",
                    database
                )));
            }
        }
        Ok(())
    }

    async fn with_collection<T>(
        &self,
        database: &str,
        collection: &str,
        f: impl FnOnce(&[Value]) -> T,
    ) -> T {
        let databases = self.databases.read().await;
        let docs = databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|docs| docs.as_slice())
            .unwrap_or(&[]);
        f(docs)
    }
}

// ===== FILTER EVALUATION =====

/// Resolve a dotted path inside a document. Array segments are followed by
/// numeric index only; element-wise matching is handled by the callers.
fn resolve_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// JSON equality with numeric widening (1 and 1.0 are equal).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Document-database equality: a scalar candidate also matches an array field
/// containing it, and a null candidate matches a missing field.
fn field_equals(field: Option<&Value>, candidate: &Value) -> bool {
    match field {
        None => candidate.is_null(),
        Some(value) => {
            if values_equal(value, candidate) {
                return true;
            }
            match value {
                Value::Array(items) => items.iter().any(|item| values_equal(item, candidate)),
                _ => false,
            }
        }
    }
}

/// Cross-type ordering rank, null lowest.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Ordering comparison for range operators: same-type only, no order defined
/// across types or for composites.
fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: rank across types, value order within a type.
fn sort_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != std::cmp::Ordering::Equal {
        return rank;
    }
    compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal)
}

/// Evaluate a filter document against one document.
pub(crate) fn matches_filter(doc: &Value, filter: &Value) -> Result<bool, DriverError> {
    let clauses = match filter {
        Value::Null => return Ok(true),
        Value::Object(map) => map,
        other => {
            return Err(DriverError::Query(format!(
                "filter must be an object, got {}",
                type_name(other)
            )))
        }
    };

    for (key, spec) in clauses {
        let matched = match key.as_str() {
            "$and" => logical_list(doc, spec, key)?.iter().all(|m| *m),
            "$or" => logical_list(doc, spec, key)?.iter().any(|m| *m),
            "$nor" => !logical_list(doc, spec, key)?.iter().any(|m| *m),
            _ if key.starts_with('$') => {
                return Err(DriverError::Query(format!("unknown operator '{}'", key)))
            }
            path => field_condition(doc, path, spec)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn logical_list(doc: &Value, spec: &Value, op: &str) -> Result<Vec<bool>, DriverError> {
    let items = spec
        .as_array()
        .ok_or_else(|| DriverError::Query(format!("'{}' expects an array of filters", op)))?;
    items.iter().map(|f| matches_filter(doc, f)).collect()
}

fn field_condition(doc: &Value, path: &str, spec: &Value) -> Result<bool, DriverError> {
    match spec {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            operator_set(doc, path, ops)
        }
        candidate => Ok(field_equals(resolve_path(doc, path), candidate)),
    }
}

fn operator_set(doc: &Value, path: &str, ops: &Map<String, Value>) -> Result<bool, DriverError> {
    let field = resolve_path(doc, path);
    for (op, operand) in ops {
        let matched = match op.as_str() {
            "$eq" => field_equals(field, operand),
            "$ne" => !field_equals(field, operand),
            "$gt" => range_matches(field, operand, |ord| ord == std::cmp::Ordering::Greater),
            "$gte" => range_matches(field, operand, |ord| ord != std::cmp::Ordering::Less),
            "$lt" => range_matches(field, operand, |ord| ord == std::cmp::Ordering::Less),
            "$lte" => range_matches(field, operand, |ord| ord != std::cmp::Ordering::Greater),
            "$in" => in_list(field, operand, op)?,
            "$nin" => !in_list(field, operand, op)?,
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(true);
                field.is_some() == wanted
            }
            "$regex" => regex_matches(field, operand, ops.get("$options"))?,
            "$options" => true, // consumed alongside $regex
            "$not" => match operand {
                Value::Object(inner) => !operator_set(doc, path, inner)?,
                _ => {
                    return Err(DriverError::Query(
                        "'$not' expects an operator object".to_string(),
                    ))
                }
            },
            "$size" => match (field, operand.as_u64()) {
                (Some(Value::Array(items)), Some(size)) => items.len() as u64 == size,
                _ => false,
            },
            other => return Err(DriverError::Query(format!("unknown operator '{}'", other))),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn range_matches(
    field: Option<&Value>,
    operand: &Value,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    match field {
        Some(value) => compare_values(value, operand).map(accept).unwrap_or(false),
        None => false,
    }
}

fn in_list(field: Option<&Value>, operand: &Value, op: &str) -> Result<bool, DriverError> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| DriverError::Query(format!("'{}' expects an array", op)))?;
    Ok(candidates
        .iter()
        .any(|candidate| field_equals(field, candidate)))
}

fn regex_matches(
    field: Option<&Value>,
    pattern: &Value,
    options: Option<&Value>,
) -> Result<bool, DriverError> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DriverError::Query("'$regex' expects a string pattern".to_string()))?;
    let case_insensitive = options
        .and_then(|o| o.as_str())
        .map(|o| o.contains('i'))
        .unwrap_or(false);
    let compiled = regex::RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| DriverError::Query(format!("invalid '$regex' pattern: {}", e)))?;
    Ok(match field {
        Some(Value::String(s)) => compiled.is_match(s),
        _ => false,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ===== RESULT SHAPING =====

fn insert_path(target: &mut Map<String, Value>, doc: &Value, path: &str) {
    if let Some((head, rest)) = path.split_once('.') {
        if let Some(child) = resolve_path(doc, head) {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(nested) = entry {
                insert_path(nested, child, rest);
            }
        }
    } else if let Some(value) = resolve_path(doc, path) {
        target.insert(path.to_string(), value.clone());
    }
}

fn remove_path(target: &mut Value, path: &str) {
    if let Some((head, rest)) = path.split_once('.') {
        if let Some(child) = target.get_mut(head) {
            remove_path(child, rest);
        }
    } else if let Value::Object(map) = target {
        map.remove(path);
    }
}

/// Apply an include- or exclude-style projection to one document.
fn apply_projection(doc: &Value, projection: &Value) -> Value {
    let spec = match projection.as_object() {
        Some(map) if !map.is_empty() => map,
        _ => return doc.clone(),
    };

    let truthy = |v: &Value| v.as_bool().unwrap_or(false) || v.as_f64().unwrap_or(0.0) != 0.0;
    let include_mode = spec.iter().any(|(k, v)| k != "_id" && truthy(v));

    if include_mode {
        let mut shaped = Map::new();
        let keep_id = spec.get("_id").map(truthy).unwrap_or(true);
        if keep_id {
            if let Some(id) = doc.get("_id") {
                shaped.insert("_id".to_string(), id.clone());
            }
        }
        for (path, flag) in spec {
            if path != "_id" && truthy(flag) {
                insert_path(&mut shaped, doc, path);
            }
        }
        Value::Object(shaped)
    } else {
        let mut shaped = doc.clone();
        for (path, flag) in spec {
            if !truthy(flag) {
                remove_path(&mut shaped, path);
            }
        }
        shaped
    }
}

fn sort_documents(docs: &mut [Value], sort: &Value) {
    let keys: Vec<(String, i64)> = match sort.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.as_i64().unwrap_or(1)))
            .collect(),
        None => return,
    };
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, direction) in &keys {
            let left = resolve_path(a, path).unwrap_or(&Value::Null);
            let right = resolve_path(b, path).unwrap_or(&Value::Null);
            let ord = sort_cmp(left, right);
            if ord != std::cmp::Ordering::Equal {
                return if *direction < 0 { ord.reverse() } else { ord };
            }
        }
        std::cmp::Ordering::Equal
    });
}

// ===== AGGREGATION =====

/// Resolve an aggregation expression: `"$field"` references, everything else
/// is a literal.
fn eval_expr(doc: &Value, expr: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => resolve_path(doc, &s[1..])
            .cloned()
            .unwrap_or(Value::Null),
        other => other.clone(),
    }
}

struct GroupSlot {
    id: Value,
    sums: HashMap<String, f64>,
    counts: HashMap<String, u64>,
    values: Map<String, Value>,
}

fn run_group(docs: &[Value], spec: &Map<String, Value>) -> Result<Vec<Value>, DriverError> {
    let id_expr = spec
        .get("_id")
        .ok_or_else(|| DriverError::Query("'$group' requires an '_id' expression".to_string()))?;

    let mut order: Vec<String> = Vec::new();
    let mut slots: HashMap<String, GroupSlot> = HashMap::new();

    for doc in docs {
        let id = eval_expr(doc, id_expr);
        let slot_key = id.to_string();
        if !slots.contains_key(&slot_key) {
            order.push(slot_key.clone());
            slots.insert(
                slot_key.clone(),
                GroupSlot {
                    id: id.clone(),
                    sums: HashMap::new(),
                    counts: HashMap::new(),
                    values: Map::new(),
                },
            );
        }
        let slot = slots
            .get_mut(&slot_key)
            .ok_or_else(|| DriverError::Query("group slot vanished".to_string()))?;

        for (field, accumulator) in spec {
            if field == "_id" {
                continue;
            }
            let ops = accumulator.as_object().ok_or_else(|| {
                DriverError::Query(format!("accumulator for '{}' must be an object", field))
            })?;
            let (op, operand) = ops.iter().next().ok_or_else(|| {
                DriverError::Query(format!("accumulator for '{}' is empty", field))
            })?;
            let value = eval_expr(doc, operand);
            match op.as_str() {
                "$sum" => {
                    let increment = value.as_f64().unwrap_or(0.0);
                    *slot.sums.entry(field.clone()).or_insert(0.0) += increment;
                }
                "$avg" => {
                    if let Some(number) = value.as_f64() {
                        *slot.sums.entry(field.clone()).or_insert(0.0) += number;
                        *slot.counts.entry(field.clone()).or_insert(0) += 1;
                    }
                }
                "$min" => {
                    let current = slot.values.get(field);
                    if value != Value::Null
                        && current
                            .map(|c| sort_cmp(&value, c) == std::cmp::Ordering::Less)
                            .unwrap_or(true)
                    {
                        slot.values.insert(field.clone(), value);
                    }
                }
                "$max" => {
                    let current = slot.values.get(field);
                    if value != Value::Null
                        && current
                            .map(|c| sort_cmp(&value, c) == std::cmp::Ordering::Greater)
                            .unwrap_or(true)
                    {
                        slot.values.insert(field.clone(), value);
                    }
                }
                "$first" => {
                    slot.values.entry(field.clone()).or_insert(value);
                }
                other => {
                    return Err(DriverError::Unsupported(format!(
                        "group accumulator '{}'",
                        other
                    )))
                }
            }
        }
    }

    let mut results = Vec::with_capacity(order.len());
    for slot_key in order {
        let slot = slots
            .remove(&slot_key)
            .ok_or_else(|| DriverError::Query("group slot vanished".to_string()))?;
        let mut out = Map::new();
        out.insert("_id".to_string(), slot.id);
        for (field, accumulator) in spec {
            if field == "_id" {
                continue;
            }
            let op = accumulator
                .as_object()
                .and_then(|ops| ops.keys().next().cloned())
                .unwrap_or_default();
            let value = match op.as_str() {
                "$sum" => json!(slot.sums.get(field).copied().unwrap_or(0.0)),
                "$avg" => {
                    let sum = slot.sums.get(field).copied().unwrap_or(0.0);
                    let count = slot.counts.get(field).copied().unwrap_or(0);
                    if count == 0 {
                        Value::Null
                    } else {
                        json!(sum / count as f64)
                    }
                }
                _ => slot.values.get(field).cloned().unwrap_or(Value::Null),
            };
            out.insert(field.clone(), value);
        }
        results.push(Value::Object(out));
    }
    Ok(results)
}

fn run_pipeline(docs: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>, DriverError> {
    let mut current = docs;
    for stage in pipeline {
        let stage = stage
            .as_object()
            .ok_or_else(|| DriverError::Query("pipeline stage must be an object".to_string()))?;
        let (name, body) = stage
            .iter()
            .next()
            .ok_or_else(|| DriverError::Query("empty pipeline stage".to_string()))?;
        current = match name.as_str() {
            "$match" => {
                let mut kept = Vec::new();
                for doc in current {
                    if matches_filter(&doc, body)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                let mut sorted = current;
                sort_documents(&mut sorted, body);
                sorted
            }
            "$skip" => {
                let n = body.as_u64().unwrap_or(0) as usize;
                current.into_iter().skip(n).collect()
            }
            "$limit" => {
                let n = body.as_u64().unwrap_or(0) as usize;
                current.into_iter().take(n).collect()
            }
            "$project" => current
                .iter()
                .map(|doc| apply_projection(doc, &Value::Object(body.as_object().cloned().unwrap_or_default())))
                .collect(),
            "$count" => {
                let label = body
                    .as_str()
                    .ok_or_else(|| DriverError::Query("'$count' expects a field name".to_string()))?;
                vec![json!({ label: current.len() })]
            }
            "$group" => {
                let spec = body.as_object().ok_or_else(|| {
                    DriverError::Query("'$group' expects an object".to_string())
                })?;
                run_group(&current, spec)?
            }
            other => return Err(DriverError::Unsupported(format!("pipeline stage '{}'", other))),
        };
    }
    Ok(current)
}

// ===== SESSIONS =====

/// Driver over one shared [`MemoryEngine`].
pub struct MemoryDriver {
    engine: Arc<MemoryEngine>,
}

impl MemoryDriver {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }
}

#[async_trait]
impl DocumentDriver for MemoryDriver {
    async fn open_session(&self) -> Result<Box<dyn ReadSession>, DriverError> {
        self.engine.check_available(None).await?;
        Ok(Box::new(MemorySession {
            engine: Arc::clone(&self.engine),
        }))
    }

    async fn open_metadata_channel(&self) -> Result<Box<dyn MetadataChannel>, DriverError> {
        self.engine.check_available(None).await?;
        Ok(Box::new(MemoryMetadataChannel {
            engine: Arc::clone(&self.engine),
        }))
    }
}

struct MemorySession {
    engine: Arc<MemoryEngine>,
}

#[async_trait]
impl ReadSession for MemorySession {
    async fn ping(&self) -> Result<(), DriverError> {
        self.engine.delay().await;
        self.engine.check_available(None).await
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Value,
        options: &FindOptions,
    ) -> Result<Vec<Value>, DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;
        self.engine.query_calls.fetch_add(1, AtomicOrdering::SeqCst);

        let mut matched = self
            .engine
            .with_collection(database, collection, |docs| {
                let mut kept = Vec::new();
                for doc in docs {
                    match matches_filter(doc, filter) {
                        Ok(true) => kept.push(doc.clone()),
                        Ok(false) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(kept)
            })
            .await?;

        if let Some(sort) = &options.sort {
            sort_documents(&mut matched, sort);
        }
        if let Some(limit) = options.limit {
            matched.truncate(limit as usize);
        }
        if let Some(projection) = &options.projection {
            matched = matched
                .iter()
                .map(|doc| apply_projection(doc, projection))
                .collect();
        }
        Ok(matched)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> Result<u64, DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;
        self.engine.query_calls.fetch_add(1, AtomicOrdering::SeqCst);

        self.engine
            .with_collection(database, collection, |docs| {
                let mut count = 0u64;
                for doc in docs {
                    if matches_filter(doc, filter)? {
                        count += 1;
                    }
                }
                Ok(count)
            })
            .await
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Value],
        limit: u64,
    ) -> Result<Vec<Value>, DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;
        self.engine.query_calls.fetch_add(1, AtomicOrdering::SeqCst);

        let docs = self
            .engine
            .with_collection(database, collection, |docs| docs.to_vec())
            .await;
        let mut results = run_pipeline(docs, pipeline)?;
        results.truncate(limit as usize);
        Ok(results)
    }

    async fn distinct(
        &self,
        database: &str,
        collection: &str,
        field: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;
        self.engine.query_calls.fetch_add(1, AtomicOrdering::SeqCst);

        self.engine
            .with_collection(database, collection, |docs| {
                let mut seen = HashSet::new();
                let mut values = Vec::new();
                for doc in docs {
                    if !matches_filter(doc, filter)? {
                        continue;
                    }
                    let resolved = match resolve_path(doc, field) {
                        Some(value) => value,
                        None => continue,
                    };
                    let candidates: Vec<&Value> = match resolved {
                        Value::Array(items) => items.iter().collect(),
                        other => vec![other],
                    };
                    for candidate in candidates {
                        if candidate.is_null() {
                            continue;
                        }
                        if seen.insert(candidate.to_string()) {
                            values.push(candidate.clone());
                        }
                    }
                }
                Ok(values)
            })
            .await
    }

    async fn collection_stats(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionStats, DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;
        let document_count = self
            .engine
            .with_collection(database, collection, |docs| docs.len() as u64)
            .await;
        Ok(CollectionStats { document_count })
    }
}

struct MemoryMetadataChannel {
    engine: Arc<MemoryEngine>,
}

#[async_trait]
impl MetadataChannel for MemoryMetadataChannel {
    async fn ensure_collections(
        &self,
        database: &str,
        collections: &[&str],
    ) -> Result<(), DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;
        self.engine.init_calls.fetch_add(1, AtomicOrdering::SeqCst);

        let mut databases = self.engine.databases.write().await;
        let entry = databases.entry(database.to_string()).or_default();
        for collection in collections {
            entry.entry((*collection).to_string()).or_default();
        }
        Ok(())
    }

    async fn upsert(
        &self,
        database: &str,
        collection: &str,
        key: &Value,
        document: &Value,
    ) -> Result<(), DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;

        let key_fields = key
            .as_object()
            .ok_or_else(|| DriverError::Query("upsert key must be an object".to_string()))?;

        let mut databases = self.engine.databases.write().await;
        let docs = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let position = docs.iter().position(|doc| {
            key_fields
                .iter()
                .all(|(path, expected)| field_equals(resolve_path(doc, path), expected))
        });
        match position {
            Some(index) => docs[index] = document.clone(),
            None => docs.push(document.clone()),
        }
        Ok(())
    }

    async fn fetch(
        &self,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> Result<Vec<Value>, DriverError> {
        self.engine.delay().await;
        self.engine.check_available(Some(database)).await?;

        self.engine
            .with_collection(database, collection, |docs| {
                let mut kept = Vec::new();
                for doc in docs {
                    if matches_filter(doc, filter)? {
                        kept.push(doc.clone());
                    }
                }
                Ok(kept)
            })
            .await
    }
}
