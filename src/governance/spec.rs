//! Query specification and verdict types
//!
//! A [`QuerySpec`] is what callers submit. Validation turns it into a
//! [`Verdict`]; only the accepted arm carries an [`AcceptedQuery`], and the
//! execution path takes exactly that type, so running a rejected or
//! unvalidated query does not typecheck.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A structured query request against one endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub endpoint: String,
    pub database: String,
    pub collection: String,
    /// Operation name as submitted; matched case-insensitively against the
    /// configured allow-list.
    pub operation: String,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub pipeline: Option<Vec<Value>>,
    #[serde(default)]
    pub projection: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    /// Target field for `distinct`.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Opt into degraded-endpoint reads (honored only without an active
    /// alternative endpoint).
    #[serde(default)]
    pub allow_degraded: bool,
}

/// Why a query was refused. Policy rejections, not availability failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("operation '{operation}' is not allowed; permitted operations: {allowed}")]
    OperationNotAllowed { operation: String, allowed: String },

    #[error("pipeline stage '{stage}' is forbidden for read-only access")]
    ForbiddenStage { stage: String },

    #[error("operator '{operator}' at '{path}' is forbidden (server-side code execution)")]
    ForbiddenOperator { operator: String, path: String },

    #[error(
        "unselective query without a limit against '{collection}' \
         (~{estimated} documents); add a filter or a limit"
    )]
    ComplexityExceeded { collection: String, estimated: u64 },
}

impl RejectReason {
    /// Stable machine-checkable code for this rejection.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::OperationNotAllowed { .. } => "OPERATION_NOT_ALLOWED",
            RejectReason::ForbiddenStage { .. } => "FORBIDDEN_STAGE",
            RejectReason::ForbiddenOperator { .. } => "FORBIDDEN_OPERATOR",
            RejectReason::ComplexityExceeded { .. } => "COMPLEXITY_EXCEEDED",
        }
    }
}

/// The normalized body of an accepted query.
#[derive(Debug, Clone)]
pub enum NormalizedOp {
    Find {
        filter: Value,
        projection: Option<Value>,
        sort: Option<Value>,
    },
    Count {
        filter: Value,
    },
    Aggregate {
        pipeline: Vec<Value>,
    },
    Distinct {
        field: String,
        filter: Value,
    },
}

impl NormalizedOp {
    pub fn name(&self) -> &'static str {
        match self {
            NormalizedOp::Find { .. } => "find",
            NormalizedOp::Count { .. } => "count",
            NormalizedOp::Aggregate { .. } => "aggregate",
            NormalizedOp::Distinct { .. } => "distinct",
        }
    }
}

/// A validated query with clamped limits. Cannot be constructed outside the
/// validation path.
#[derive(Debug, Clone)]
pub struct AcceptedQuery {
    endpoint: String,
    database: String,
    collection: String,
    op: NormalizedOp,
    limit: u64,
    timeout_ms: u64,
    allow_degraded: bool,
}

impl AcceptedQuery {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        endpoint: String,
        database: String,
        collection: String,
        op: NormalizedOp,
        limit: u64,
        timeout_ms: u64,
        allow_degraded: bool,
    ) -> Self {
        Self {
            endpoint,
            database,
            collection,
            op,
            limit,
            timeout_ms,
            allow_degraded,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn op(&self) -> &NormalizedOp {
        &self.op
    }

    pub fn operation_name(&self) -> &'static str {
        self.op.name()
    }

    /// Effective document limit after clamping.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Effective execution deadline after clamping.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn allow_degraded(&self) -> bool {
        self.allow_degraded
    }
}

/// Validation outcome of one specification.
#[derive(Debug, Clone)]
pub enum Verdict {
    Accepted(AcceptedQuery),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted(_))
    }
}

/// Shaped result of one executed query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    pub endpoint: String,
    pub database: String,
    pub collection: String,
    pub operation: &'static str,
    /// Result documents; distinct values for `distinct`, empty for `count`.
    pub documents: Vec<Value>,
    pub count: u64,
    pub execution_ms: u64,
    /// True when the result was cut at the document-count clamp.
    pub truncated: bool,
    /// True when at least one field value was masked.
    pub masked: bool,
}
