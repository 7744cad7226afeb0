//! # Query Model
//!
//! An immutable, back-end-agnostic description of a relational query:
//! predicates, joins of AND/OR/NOT, ordering, pagination, projection,
//! grouping, aggregations, HAVING, plus a pluggable context-depth hint.
//!
//! [`QueryModel`] values are built exclusively through [`QueryBuilder`]
//! (see [`builder`]) and are never mutated afterward — executors and the
//! SQL generator only ever read from a `QueryModel`.

pub mod builder;

pub use builder::QueryBuilder;

use crate::model::Value;
use std::sync::Arc;

// ============================================================================
// Condition tree
// ============================================================================

/// Comparison operator for the `comparison` condition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Lt,
    Gte,
    Lte,
}

/// Operator for the `pattern` condition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

/// Operator for the `set` condition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    In,
    NotIn,
}

/// Operator for the `null` condition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOp {
    IsNull,
    IsNotNull,
}

/// Operator for the `composite` condition variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    And,
    Or,
    Not,
}

/// A node in the condition tree (spec.md §3 `Condition`).
///
/// A tagged variant with a closed set of shapes — visitors (the Predicate
/// Engine, the SQL Generator) pattern-match per variant rather than
/// probing for capabilities.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equality { field: String, negate: bool, value: Value },
    Comparison { field: String, op: CompareOp, value: Value },
    Pattern { field: String, op: PatternOp, value: String, case_sensitive: bool },
    Set { field: String, op: SetOp, values: Vec<Value> },
    Null { field: String, op: NullOp },
    Composite { op: CompositeOp, conditions: Vec<Condition> },
}

// ============================================================================
// Ordering
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub direction: SortDirection,
    pub nulls: Option<NullsOrder>,
}

// ============================================================================
// Pagination / Projection / Grouping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    pub fields: Vec<String>,
    pub include_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Grouping {
    pub fields: Vec<String>,
}

// ============================================================================
// Aggregation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationKind::Count => "count",
            AggregationKind::CountDistinct => "count_distinct",
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub kind: AggregationKind,
    pub field: Option<String>,
    pub alias: String,
}

impl Aggregation {
    /// Default alias: `<fn>_<field>` or `<fn>_*` when there's no field
    /// (e.g. a bare `count()`) — spec.md §4.5.
    pub fn default_alias(kind: AggregationKind, field: Option<&str>) -> String {
        format!("{}_{}", kind.as_str(), field.unwrap_or("*"))
    }
}

// ============================================================================
// Having
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HavingOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    /// Either a group-key field name or an aggregation alias.
    pub target: String,
    pub op: HavingOp,
    pub value: Value,
}

// ============================================================================
// Context depth
// ============================================================================

/// A five-level hint that biases projection and memory-usage expectations
/// (spec.md §3, §4.1 `withDepth`). Ordinal values match the spec exactly
/// so round-tripping through an integer (e.g. over a wire boundary)
/// preserves meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextDepth {
    Signature = 1,
    Structure = 2,
    Semantic = 3,
    Detailed = 4,
    Historical = 5,
}

impl ContextDepth {
    pub fn from_i64(v: i64) -> Option<ContextDepth> {
        match v {
            1 => Some(ContextDepth::Signature),
            2 => Some(ContextDepth::Structure),
            3 => Some(ContextDepth::Semantic),
            4 => Some(ContextDepth::Detailed),
            5 => Some(ContextDepth::Historical),
            _ => None,
        }
    }

    /// Deterministic performance-hint derivation table, spec.md §3.
    pub fn hints(&self) -> PerformanceHints {
        match self {
            ContextDepth::Signature => PerformanceHints {
                expected_memory_reduction: true,
                estimated_memory_factor: 0.05,
                optimized_fields: vec!["id".into(), "type".into(), "name".into()],
            },
            ContextDepth::Structure => PerformanceHints {
                expected_memory_reduction: true,
                estimated_memory_factor: 0.20,
                optimized_fields: vec![
                    "id".into(), "type".into(), "name".into(),
                    "structure".into(), "relationships".into(),
                ],
            },
            ContextDepth::Semantic => PerformanceHints {
                expected_memory_reduction: true,
                estimated_memory_factor: 0.50,
                optimized_fields: vec![
                    "id".into(), "type".into(), "name".into(),
                    "structure".into(), "relationships".into(),
                    "semantics".into(), "tags".into(),
                ],
            },
            ContextDepth::Detailed => PerformanceHints {
                expected_memory_reduction: true,
                estimated_memory_factor: 1.00,
                optimized_fields: vec!["*".into()],
            },
            ContextDepth::Historical => PerformanceHints {
                expected_memory_reduction: false,
                estimated_memory_factor: 1.50,
                optimized_fields: vec!["*".into(), "history".into()],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceHints {
    pub expected_memory_reduction: bool,
    pub estimated_memory_factor: f64,
    pub optimized_fields: Vec<String>,
}

// ============================================================================
// QueryModel
// ============================================================================

/// The immutable, back-end-agnostic description of a relational query.
///
/// Built exclusively through [`QueryBuilder::build`]. Vectors are wrapped
/// in `Arc` so builder mutators that touch only one field can clone the
/// `QueryModel` cheaply while sharing the untouched slices — the same
/// "copy only what a mutator touches" discipline the teacher's in-memory
/// backend applies to its per-collection locks, adapted here to an
/// immutable value instead of a locked one.
#[derive(Debug, Clone)]
pub struct QueryModel {
    pub conditions: Arc<Vec<Condition>>,
    pub ordering: Arc<Vec<OrderKey>>,
    pub pagination: Option<Pagination>,
    pub projection: Option<Projection>,
    pub grouping: Option<Grouping>,
    pub aggregations: Arc<Vec<Aggregation>>,
    pub having: Option<Having>,
    pub depth: Option<ContextDepth>,
    pub performance_hints: Option<PerformanceHints>,
}

impl Default for QueryModel {
    fn default() -> Self {
        Self {
            conditions: Arc::new(Vec::new()),
            ordering: Arc::new(Vec::new()),
            pagination: None,
            projection: None,
            grouping: None,
            aggregations: Arc::new(Vec::new()),
            having: None,
            depth: None,
            performance_hints: None,
        }
    }
}

// ============================================================================
// Result envelope
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    pub code: crate::ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub strategy: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResultMetadata {
    pub execution_time_ms: f64,
    pub from_cache: bool,
    pub total_count: Option<u64>,
    pub plan: Option<ExecutionPlan>,
}

#[derive(Debug, Clone)]
pub struct ResultEnvelope {
    pub data: Vec<crate::model::Row>,
    pub metadata: ResultMetadata,
    pub errors: Option<Vec<QueryError>>,
}

impl ResultEnvelope {
    pub fn ok(data: Vec<crate::model::Row>, metadata: ResultMetadata) -> Self {
        Self { data, metadata, errors: None }
    }

    pub fn error(code: crate::ErrorCode, message: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            metadata: ResultMetadata::default(),
            errors: Some(vec![QueryError { code, message: message.into() }]),
        }
    }
}
