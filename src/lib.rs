//! # polyquery — a polyglot query & graph/vector storage engine
//!
//! A backend-agnostic programmatic surface for typed relational queries
//! over tabular data and for graph/vector operations over property-graph
//! data. The same immutable [`QueryModel`] can be executed against an
//! in-memory collection, a JSON file, or a SQL backend — the storage
//! backend is a plug-in of the same contract.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: [`Executor`] and [`graph::GraphStore`] are the
//!    contracts between the query model and storage.
//! 2. **Immutable query description**: [`QueryModel`] never mutates once
//!    built; [`QueryBuilder`] returns new values with structural sharing.
//! 3. **Parameters, not string interpolation**: every user-supplied value
//!    reaches a backend as a bound parameter. See [`sql::generate`].
//!
//! ## Quick Start
//!
//! ```
//! use polyquery::{QueryBuilder, executor::{Executor, memory::MemoryExecutor}};
//! use polyquery::model::Row;
//!
//! # async fn example() {
//! let rows: Vec<Row> = vec![];
//! let query = QueryBuilder::new()
//!     .where_equal("active", true)
//!     .order_by_asc("name")
//!     .limit(10)
//!     .build()
//!     .unwrap();
//!
//! let executor = MemoryExecutor::new(rows);
//! let result = executor.execute(&query).await;
//! assert!(result.errors.is_none());
//! # }
//! ```

pub mod model;
pub mod query;
pub mod predicate;
pub mod executor;
pub mod sql;
pub mod graph;
pub mod pool;
pub mod semantic;

pub use model::{Row, Value, PropertyMap};
pub use query::{QueryModel, QueryBuilder, Condition, ContextDepth, ResultEnvelope};
pub use executor::Executor;
pub use graph::GraphStore;

/// Hard cap on recursive graph operations (traverse, find_connected),
/// enforced before any SQL is composed.
pub const ABSOLUTE_MAX_DEPTH: u32 = 50;

// ============================================================================
// Error Types
// ============================================================================

/// Structural error codes surfaced in [`query::QueryError`] / result envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    InvalidValue,
    TypeMismatch,
    AdapterError,
    ConnectionFailed,
    Timeout,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::InvalidValue => "INVALID_VALUE",
            ErrorCode::TypeMismatch => "TYPE_MISMATCH",
            ErrorCode::AdapterError => "ADAPTER_ERROR",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
        };
        write!(f, "{s}")
    }
}

/// Build-time and pool-construction failures. These raise immediately —
/// they indicate a programmer error, not a runtime query failure which
/// is instead captured in a [`query::ResultEnvelope`]'s `errors` field.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    BuildError(String),

    #[error("pool is closed")]
    PoolClosed,

    #[error("acquire timeout")]
    AcquireTimeout,

    #[error("pool configuration invalid: {0}")]
    PoolConfig(String),

    #[error("connection factory failed: {0}")]
    FactoryFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
