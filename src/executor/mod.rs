//! # Relational Executors
//!
//! Three implementations of the same [`Executor`] contract, each
//! faithfully realizing [`QueryModel`](crate::query::QueryModel) semantics
//! over a different substrate (spec.md §4.3–§4.5). Consumers should
//! branch on [`ExecutorCapabilities`] rather than on concrete type —
//! mirrors the teacher's `StorageBackend::capabilities()` negotiation.

pub mod memory;
pub mod json;
pub mod sql;

use crate::query::{QueryModel, ResultEnvelope};
use async_trait::async_trait;

/// What an executor can do. All fields default to `false`; implementations
/// override via `capabilities()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorCapabilities {
    pub supports_aggregation: bool,
    pub supports_grouping: bool,
    pub supports_vector: bool,
    pub supports_full_text: bool,
}

/// `execute(QueryModel) -> ResultEnvelope` — the universal contract.
/// Runtime failures never throw; they're captured in the envelope's
/// `errors` field (spec.md §7).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, query: &QueryModel) -> ResultEnvelope;

    fn capabilities(&self) -> ExecutorCapabilities {
        ExecutorCapabilities::default()
    }
}
