//! Query governance engine
//!
//! The only path from a caller's query specification to real execution.
//! [`QueryGovernor::validate`] turns a specification into a verdict; the
//! accepted arm carries the normalized, clamped query that
//! [`QueryGovernor::execute`] runs under a hard deadline, masks, and shapes.
//! Rejections are structural (policy), never availability: an unsafe query
//! is refused even when every endpoint is healthy, and vice versa.

pub mod masking;
mod policy;
mod spec;

pub use masking::{FieldMasker, MASK_PLACEHOLDER};
pub use spec::{AcceptedQuery, NormalizedOp, QueryOutcome, QuerySpec, RejectReason, Verdict};

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::driver::{DriverError, FindOptions};
use crate::error::{validation_error, GatewayError};
use crate::manager::{AcquireOptions, EndpointManager, SessionLease};

/// Operation kinds the engine can execute at all; the configured allow-list
/// can only narrow this set.
const KNOWN_OPERATIONS: [&str; 4] = ["find", "count", "aggregate", "distinct"];

/// Validates, executes, masks, and shapes governed queries.
pub struct QueryGovernor {
    manager: Arc<EndpointManager>,
    settings: Arc<Settings>,
    masker: FieldMasker,
}

impl QueryGovernor {
    pub fn new(
        manager: Arc<EndpointManager>,
        settings: Arc<Settings>,
    ) -> Result<Self, GatewayError> {
        let masker = FieldMasker::new(&settings.masking)?;
        Ok(Self {
            manager,
            settings,
            masker,
        })
    }

    /// Validate a specification. Policy refusals come back as
    /// `Verdict::Rejected`; malformed requests fail with a `Validation`
    /// error before any policy judgment. Deterministic for a given
    /// specification and configuration, so repeated calls agree.
    pub async fn validate(&self, spec: &QuerySpec) -> Result<Verdict, GatewayError> {
        if spec.endpoint.is_empty() || spec.database.is_empty() || spec.collection.is_empty() {
            return Err(validation_error(
                "endpoint, database and collection are required",
            ));
        }

        let operation = spec.operation.trim().to_lowercase();
        let op = match operation.as_str() {
            "find" => {
                self.check_common_shape(spec)?;
                NormalizedOp::Find {
                    filter: normalized_filter(spec)?,
                    projection: spec.projection.clone(),
                    sort: spec.sort.clone(),
                }
            }
            "count" => {
                self.check_common_shape(spec)?;
                NormalizedOp::Count {
                    filter: normalized_filter(spec)?,
                }
            }
            "aggregate" => {
                let pipeline = match &spec.pipeline {
                    Some(pipeline) if !pipeline.is_empty() => pipeline.clone(),
                    _ => {
                        return Err(validation_error(
                            "aggregate requires a non-empty pipeline",
                        ))
                    }
                };
                for stage in &pipeline {
                    let well_formed = stage
                        .as_object()
                        .map(|map| map.len() == 1 && map.keys().all(|k| k.starts_with('$')))
                        .unwrap_or(false);
                    if !well_formed {
                        return Err(validation_error(
                            "every pipeline stage must be an object with a single $-stage key",
                        ));
                    }
                }
                NormalizedOp::Aggregate { pipeline }
            }
            "distinct" => {
                self.check_common_shape(spec)?;
                let field = match spec.field.as_deref() {
                    Some(field) if !field.is_empty() => field.to_string(),
                    _ => return Err(validation_error("distinct requires a field")),
                };
                NormalizedOp::Distinct {
                    field,
                    filter: normalized_filter(spec)?,
                }
            }
            _ => {
                return Ok(Verdict::Rejected(RejectReason::OperationNotAllowed {
                    operation: spec.operation.clone(),
                    allowed: self.allowed_display(),
                }))
            }
        };

        if !self.operation_allowed(&operation) {
            return Ok(Verdict::Rejected(RejectReason::OperationNotAllowed {
                operation: spec.operation.clone(),
                allowed: self.allowed_display(),
            }));
        }

        // Structural policy: deny-listed stages, forbidden operators.
        let policy_check = match &op {
            NormalizedOp::Aggregate { pipeline } => policy::check_pipeline(pipeline),
            NormalizedOp::Find { filter, .. }
            | NormalizedOp::Count { filter }
            | NormalizedOp::Distinct { filter, .. } => policy::scan_operators(filter, "filter"),
        };
        if let Err(reason) = policy_check {
            return Ok(Verdict::Rejected(reason));
        }

        // Scan guard: unselective and unlimited against a large collection.
        // Count is exempt, its result is a single number. Fails open when no
        // size estimate is obtainable.
        let unselective = spec.limit.is_none()
            && match &op {
                NormalizedOp::Find { filter, .. } | NormalizedOp::Distinct { filter, .. } => {
                    policy::filter_is_unselective(Some(filter))
                }
                NormalizedOp::Aggregate { pipeline } => policy::pipeline_is_unselective(pipeline),
                NormalizedOp::Count { .. } => false,
            };
        if unselective {
            if let Some(estimated) = self
                .manager
                .collection_size_hint(&spec.endpoint, &spec.database, &spec.collection)
                .await
            {
                let threshold = self.settings.governance.scan_guard.max_unscoped_docs;
                if estimated > threshold {
                    return Ok(Verdict::Rejected(RejectReason::ComplexityExceeded {
                        collection: spec.collection.clone(),
                        estimated,
                    }));
                }
            }
        }

        // Clamps are normalization, never rejection: absent or oversized
        // values settle at the configured ceilings.
        let max_documents = self.settings.governance.max_documents;
        let limit = match spec.limit {
            Some(requested) if requested > 0 => requested.min(max_documents),
            _ => max_documents,
        };
        let ceiling = self.settings.governance.max_timeout_ms;
        let timeout_ms = match spec.timeout_ms {
            Some(requested) if requested > 0 => requested.min(ceiling),
            _ => ceiling,
        };

        debug!(
            endpoint = %spec.endpoint,
            operation = op.name(),
            limit,
            timeout_ms,
            "Query accepted"
        );
        Ok(Verdict::Accepted(AcceptedQuery::new(
            spec.endpoint.clone(),
            spec.database.clone(),
            spec.collection.clone(),
            op,
            limit,
            timeout_ms,
            spec.allow_degraded,
        )))
    }

    /// Execute an accepted query: acquire a session, run under the clamped
    /// deadline, mask, shape. The session lease is released on every path.
    pub async fn execute(&self, query: AcceptedQuery) -> Result<QueryOutcome, GatewayError> {
        let started = Instant::now();
        let lease = self
            .manager
            .acquire(
                query.endpoint(),
                AcquireOptions {
                    allow_degraded: query.allow_degraded(),
                },
            )
            .await?;

        let deadline = Duration::from_millis(query.timeout_ms());
        let outcome = tokio::time::timeout(deadline, run_operation(&lease, &query)).await;
        drop(lease);

        let (mut documents, count) = match outcome {
            Err(_) => {
                warn!(
                    endpoint = query.endpoint(),
                    operation = query.operation_name(),
                    timeout_ms = query.timeout_ms(),
                    "Query timed out"
                );
                return Err(GatewayError::QueryTimeout {
                    endpoint: query.endpoint().to_string(),
                    timeout_ms: query.timeout_ms(),
                });
            }
            Ok(Err(e)) => {
                if e.is_connectivity() {
                    self.manager.note_connectivity_failure(query.endpoint()).await;
                    return Err(GatewayError::EndpointUnavailable {
                        endpoint: query.endpoint().to_string(),
                        reason: e.to_string(),
                    });
                }
                return Err(GatewayError::Driver(e));
            }
            Ok(Ok(result)) => result,
        };

        let (truncated, masked) = match query.op() {
            NormalizedOp::Count { .. } => (false, false),
            NormalizedOp::Distinct { field, .. } => {
                let truncated = count == query.limit();
                let masked = if self.masker.field_is_sensitive(field) && !documents.is_empty() {
                    for value in documents.iter_mut() {
                        *value = self.masker.replacement(value);
                    }
                    true
                } else {
                    false
                };
                (truncated, masked)
            }
            NormalizedOp::Find { .. } | NormalizedOp::Aggregate { .. } => {
                let truncated = count == query.limit();
                let masked = self.masker.mask_documents(&mut documents);
                (truncated, masked)
            }
        };

        let execution_ms = started.elapsed().as_millis() as u64;
        info!(
            endpoint = query.endpoint(),
            database = query.database(),
            collection = query.collection(),
            operation = query.operation_name(),
            count,
            execution_ms,
            truncated,
            masked,
            "Query executed"
        );

        Ok(QueryOutcome {
            endpoint: query.endpoint().to_string(),
            database: query.database().to_string(),
            collection: query.collection().to_string(),
            operation: query.operation_name(),
            documents,
            count,
            execution_ms,
            truncated,
            masked,
        })
    }

    /// Validate and, if accepted, execute. Rejections surface as typed
    /// errors carrying their reason code.
    pub async fn run(&self, spec: QuerySpec) -> Result<QueryOutcome, GatewayError> {
        match self.validate(&spec).await? {
            Verdict::Accepted(query) => self.execute(query).await,
            Verdict::Rejected(reason) => {
                info!(
                    endpoint = %spec.endpoint,
                    operation = %spec.operation,
                    code = reason.code(),
                    "Query rejected"
                );
                Err(GatewayError::Rejected(reason))
            }
        }
    }

    fn check_common_shape(&self, spec: &QuerySpec) -> Result<(), GatewayError> {
        if spec.pipeline.is_some() {
            return Err(validation_error("a pipeline is only valid for aggregate"));
        }
        for (name, value) in [
            ("filter", &spec.filter),
            ("projection", &spec.projection),
            ("sort", &spec.sort),
        ] {
            if let Some(value) = value {
                if !value.is_object() && !value.is_null() {
                    return Err(validation_error(format!("{} must be an object", name)));
                }
            }
        }
        Ok(())
    }

    fn operation_allowed(&self, operation: &str) -> bool {
        self.settings
            .governance
            .allowed_operations
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(operation))
    }

    fn allowed_display(&self) -> String {
        KNOWN_OPERATIONS
            .iter()
            .filter(|op| self.operation_allowed(op))
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn normalized_filter(spec: &QuerySpec) -> Result<Value, GatewayError> {
    match &spec.filter {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
        Some(_) => Err(validation_error("filter must be an object")),
    }
}

async fn run_operation(
    lease: &SessionLease,
    query: &AcceptedQuery,
) -> Result<(Vec<Value>, u64), DriverError> {
    match query.op() {
        NormalizedOp::Find {
            filter,
            projection,
            sort,
        } => {
            let options = FindOptions {
                projection: projection.clone(),
                sort: sort.clone(),
                limit: Some(query.limit()),
            };
            let documents = lease
                .find(query.database(), query.collection(), filter, &options)
                .await?;
            let count = documents.len() as u64;
            Ok((documents, count))
        }
        NormalizedOp::Count { filter } => {
            let count = lease
                .count(query.database(), query.collection(), filter)
                .await?;
            Ok((Vec::new(), count))
        }
        NormalizedOp::Aggregate { pipeline } => {
            let documents = lease
                .aggregate(query.database(), query.collection(), pipeline, query.limit())
                .await?;
            let count = documents.len() as u64;
            Ok((documents, count))
        }
        NormalizedOp::Distinct { field, filter } => {
            let mut values = lease
                .distinct(query.database(), query.collection(), field, filter)
                .await?;
            values.truncate(query.limit() as usize);
            let count = values.len() as u64;
            Ok((values, count))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, MemoryEngine};
    use crate::registry::{DeclaredStatus, EndpointDescriptor, EndpointRegistry};
    use pretty_assertions::assert_eq;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.pool.max_size = 2;
        settings.pool.acquire_wait_ms = 200;
        settings
    }

    async fn governed(settings: Settings) -> (QueryGovernor, Arc<MemoryEngine>) {
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
        let governor = QueryGovernor::new(manager, settings).unwrap();
        (governor, engine)
    }

    async fn seed_users(engine: &Arc<MemoryEngine>) {
        engine
            .seed_documents(
                "app",
                "users",
                vec![
                    json!({"_id": 1, "name": "ana", "email": "ana@example.com", "age": 34, "city": "lisbon"}),
                    json!({"_id": 2, "name": "bo", "email": "bo@example.com", "age": 25, "city": "berlin"}),
                    json!({"_id": 3, "name": "cy", "email": "cy@example.com", "age": 41, "city": "lisbon"}),
                    json!({"_id": 4, "name": "dee", "email": "dee@example.com", "age": 19, "city": "porto"}),
                    json!({"_id": 5, "name": "edo", "email": "edo@example.com", "age": 52, "city": "berlin"}),
                ],
            )
            .await;
    }

    fn spec(operation: &str) -> QuerySpec {
        QuerySpec {
            endpoint: "orders".to_string(),
            database: "app".to_string(),
            collection: "users".to_string(),
            operation: operation.to_string(),
            filter: None,
            pipeline: None,
            projection: None,
            sort: None,
            field: None,
            limit: None,
            timeout_ms: None,
            allow_degraded: false,
        }
    }

    fn rejected_code(verdict: &Verdict) -> &'static str {
        match verdict {
            Verdict::Rejected(reason) => reason.code(),
            Verdict::Accepted(_) => panic!("expected a rejection"),
        }
    }

    #[tokio::test]
    async fn denied_operation_is_rejected_without_touching_the_endpoint() {
        let (governor, engine) = governed(test_settings()).await;
        seed_users(&engine).await;

        let err = governor.run(spec("mapReduce")).await.unwrap_err();
        match err {
            GatewayError::Rejected(reason) => {
                assert_eq!(reason.code(), "OPERATION_NOT_ALLOWED")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(engine.query_calls(), 0);
    }

    #[tokio::test]
    async fn configured_allow_list_narrows_the_known_operations() {
        let mut settings = test_settings();
        settings.governance.allowed_operations = vec!["find".to_string()];
        let (governor, _) = governed(settings).await;

        let verdict = governor.validate(&spec("count")).await.unwrap();
        assert_eq!(rejected_code(&verdict), "OPERATION_NOT_ALLOWED");
        match verdict {
            Verdict::Rejected(RejectReason::OperationNotAllowed { allowed, .. }) => {
                assert_eq!(allowed, "find");
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[tokio::test]
    async fn write_stages_are_rejected_before_execution() {
        let (governor, engine) = governed(test_settings()).await;
        seed_users(&engine).await;

        let mut aggregate = spec("aggregate");
        aggregate.pipeline = Some(vec![
            json!({"$match": {"city": "lisbon"}}),
            json!({"$out": "exfil"}),
        ]);
        let err = governor.run(aggregate).await.unwrap_err();
        match err {
            GatewayError::Rejected(reason) => assert_eq!(reason.code(), "FORBIDDEN_STAGE"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(engine.query_calls(), 0);
    }

    #[tokio::test]
    async fn forbidden_operator_is_found_at_any_depth() {
        let (governor, _) = governed(test_settings()).await;

        let mut find = spec("find");
        find.filter = Some(json!({
            "$or": [
                {"city": "lisbon"},
                {"$and": [{"age": {"$gt": 1}}, {"x": {"$where": "true"}}]}
            ]
        }));
        let verdict = governor.validate(&find).await.unwrap();
        assert_eq!(rejected_code(&verdict), "FORBIDDEN_OPERATOR");
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let (governor, _) = governed(test_settings()).await;

        let mut find = spec("find");
        find.limit = Some(100_000);
        let first = governor.validate(&find).await.unwrap();
        let second = governor.validate(&find).await.unwrap();
        match (first, second) {
            (Verdict::Accepted(a), Verdict::Accepted(b)) => {
                assert_eq!(a.limit(), b.limit());
                assert_eq!(a.timeout_ms(), b.timeout_ms());
            }
            other => panic!("verdicts disagreed: {:?}", other),
        }

        let bad = spec("mapReduce");
        let first = governor.validate(&bad).await.unwrap();
        let second = governor.validate(&bad).await.unwrap();
        match (first, second) {
            (Verdict::Rejected(a), Verdict::Rejected(b)) => assert_eq!(a, b),
            other => panic!("verdicts disagreed: {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_limits_clamp_to_the_ceiling() {
        let (governor, _) = governed(test_settings()).await;

        let mut find = spec("find");
        find.limit = Some(100_000);
        find.timeout_ms = Some(600_000);
        match governor.validate(&find).await.unwrap() {
            Verdict::Accepted(query) => {
                assert_eq!(query.limit(), 1_000);
                assert_eq!(query.timeout_ms(), 30_000);
            }
            Verdict::Rejected(reason) => panic!("unexpected rejection: {}", reason),
        }

        // Absent values settle at the ceilings too.
        match governor.validate(&spec("find")).await.unwrap() {
            Verdict::Accepted(query) => {
                assert_eq!(query.limit(), 1_000);
                assert_eq!(query.timeout_ms(), 30_000);
            }
            Verdict::Rejected(reason) => panic!("unexpected rejection: {}", reason),
        }
    }

    #[tokio::test]
    async fn results_cut_at_the_clamp_carry_the_truncation_flag() {
        let (governor, engine) = governed(test_settings()).await;
        seed_users(&engine).await;

        let mut find = spec("find");
        find.limit = Some(3);
        let outcome = governor.run(find).await.unwrap();
        assert_eq!(outcome.count, 3);
        assert!(outcome.truncated);

        let mut find = spec("find");
        find.limit = Some(10);
        let outcome = governor.run(find).await.unwrap();
        assert_eq!(outcome.count, 5);
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn sensitive_fields_are_masked_in_results() {
        let (governor, engine) = governed(test_settings()).await;
        seed_users(&engine).await;

        let mut find = spec("find");
        find.filter = Some(json!({"name": "ana"}));
        let outcome = governor.run(find).await.unwrap();
        assert!(outcome.masked);
        let doc = &outcome.documents[0];
        assert_eq!(doc["name"], "ana");
        let email = doc["email"].as_str().unwrap();
        assert_ne!(email, "ana@example.com");
        assert!(email.contains(MASK_PLACEHOLDER));
    }

    #[tokio::test]
    async fn distinct_masks_values_of_sensitive_fields_only() {
        let (governor, engine) = governed(test_settings()).await;
        seed_users(&engine).await;

        let mut distinct = spec("distinct");
        distinct.field = Some("email".to_string());
        let outcome = governor.run(distinct).await.unwrap();
        assert!(outcome.masked);
        assert!(outcome
            .documents
            .iter()
            .all(|v| v.as_str().unwrap().contains(MASK_PLACEHOLDER)));

        let mut distinct = spec("distinct");
        distinct.field = Some("city".to_string());
        let outcome = governor.run(distinct).await.unwrap();
        assert!(!outcome.masked);
        assert_eq!(outcome.count, 3);
    }

    #[tokio::test]
    async fn count_returns_a_number_and_no_documents() {
        let (governor, engine) = governed(test_settings()).await;
        seed_users(&engine).await;

        let mut count = spec("count");
        count.filter = Some(json!({"city": "berlin"}));
        let outcome = governor.run(count).await.unwrap();
        assert_eq!(outcome.count, 2);
        assert!(outcome.documents.is_empty());
        assert!(!outcome.truncated);
    }

    #[tokio::test]
    async fn deadline_overrun_is_a_timeout_and_frees_pool_capacity() {
        let mut settings = test_settings();
        settings.pool.max_size = 1;
        let (governor, engine) = governed(settings).await;
        seed_users(&engine).await;
        engine.set_stall(Some(Duration::from_millis(150))).await;

        let mut find = spec("find");
        find.timeout_ms = Some(40);
        let err = governor.run(find).await.unwrap_err();
        assert!(matches!(err, GatewayError::QueryTimeout { .. }));

        // The lease was dropped with the aborted future; the single slot is
        // usable again once the engine responds.
        engine.set_stall(None).await;
        let outcome = governor.run(spec("count")).await.unwrap();
        assert_eq!(outcome.count, 5);
    }

    #[tokio::test]
    async fn scan_guard_rejects_unselective_unlimited_queries() {
        let mut settings = test_settings();
        settings.governance.scan_guard.max_unscoped_docs = 3;
        let (governor, engine) = governed(settings).await;
        seed_users(&engine).await;

        let verdict = governor.validate(&spec("find")).await.unwrap();
        assert_eq!(rejected_code(&verdict), "COMPLEXITY_EXCEEDED");

        let mut filtered = spec("find");
        filtered.filter = Some(json!({"city": "lisbon"}));
        assert!(governor.validate(&filtered).await.unwrap().is_accepted());

        let mut limited = spec("find");
        limited.limit = Some(2);
        assert!(governor.validate(&limited).await.unwrap().is_accepted());

        let mut grouped = spec("aggregate");
        grouped.pipeline = Some(vec![json!({"$group": {"_id": "$city", "n": {"$sum": 1}}})]);
        let verdict = governor.validate(&grouped).await.unwrap();
        assert_eq!(rejected_code(&verdict), "COMPLEXITY_EXCEEDED");

        let mut narrowed = spec("aggregate");
        narrowed.pipeline = Some(vec![
            json!({"$match": {"city": "lisbon"}}),
            json!({"$group": {"_id": "$city", "n": {"$sum": 1}}}),
        ]);
        assert!(governor.validate(&narrowed).await.unwrap().is_accepted());

        // Count stays exempt: its result is one number.
        assert!(governor.validate(&spec("count")).await.unwrap().is_accepted());
    }

    #[tokio::test]
    async fn scan_guard_fails_open_without_a_size_estimate() {
        let mut settings = test_settings();
        settings.governance.scan_guard.max_unscoped_docs = 3;
        let (governor, engine) = governed(settings).await;
        seed_users(&engine).await;
        engine.set_online(false);

        let verdict = governor.validate(&spec("find")).await.unwrap();
        assert!(verdict.is_accepted());
    }

    #[tokio::test]
    async fn malformed_specifications_fail_validation_not_policy() {
        let (governor, _) = governed(test_settings()).await;

        let err = governor.validate(&spec("distinct")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let err = governor.validate(&spec("aggregate")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let mut find = spec("find");
        find.pipeline = Some(vec![json!({"$match": {}})]);
        let err = governor.validate(&find).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let mut find = spec("find");
        find.filter = Some(json!("not an object"));
        let err = governor.validate(&find).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }
}
