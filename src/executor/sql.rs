//! SQL-backed executor (spec.md §4.5). Routes a [`QueryModel`] through
//! [`crate::sql::generate`] and a pooled [`SqlConnection`] — the small
//! escape hatch a real driver crate (e.g. `tokio-postgres`) implements;
//! this crate ships no driver of its own (SPEC_FULL.md §6 Non-goals).

use super::{Executor, ExecutorCapabilities};
use crate::model::{Row, Value};
use crate::pool::Pool;
use crate::query::{ExecutionPlan, QueryModel, ResultEnvelope, ResultMetadata};
use crate::sql;
use crate::ErrorCode;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a real driver must provide: run one parameterized statement and
/// hand back rows as property maps. Kept deliberately thin so any async
/// Postgres/MySQL/SQLite client can implement it without adapting to a
/// richer ORM-shaped surface.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    async fn query(&mut self, sql: &str, params: &[Value]) -> std::result::Result<Vec<Row>, String>;

    /// Cheap liveness probe used by the pool's health sweep.
    async fn ping(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct SqlExecutorConfig {
    pub table_name: String,
    pub statement_timeout: Duration,
}

impl SqlExecutorConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self { table_name: table_name.into(), statement_timeout: Duration::from_secs(30) }
    }
}

/// Executes [`QueryModel`]s against a pooled SQL connection. Generic over
/// the connection type so callers can plug in any [`SqlConnection`]
/// implementation, mirroring the teacher's habit of keeping the backend
/// trait small and letting the driver live outside the crate.
pub struct SqlExecutor<C: SqlConnection + 'static> {
    pool: Arc<Pool<C>>,
    config: SqlExecutorConfig,
}

impl<C: SqlConnection + 'static> SqlExecutor<C> {
    pub fn new(pool: Arc<Pool<C>>, config: SqlExecutorConfig) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl<C: SqlConnection + 'static> Executor for SqlExecutor<C> {
    async fn execute(&self, query: &QueryModel) -> ResultEnvelope {
        let start = Instant::now();

        let (sql_text, params, plan) = sql::generate_with_plan(query, &self.config.table_name);

        let mut lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(crate::Error::AcquireTimeout) => {
                return ResultEnvelope::error(ErrorCode::Timeout, "TIMEOUT: no connection available within acquire timeout")
            }
            Err(crate::Error::PoolClosed) => {
                return ResultEnvelope::error(ErrorCode::ConnectionFailed, "CONNECTION_FAILED: pool is closed")
            }
            Err(e) => return ResultEnvelope::error(ErrorCode::ConnectionFailed, format!("CONNECTION_FAILED: {e}")),
        };

        let query_fut = lease.query(&sql_text, &params);
        let rows = match tokio::time::timeout(self.config.statement_timeout, query_fut).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(message)) => return ResultEnvelope::error(ErrorCode::AdapterError, format!("ADAPTER_ERROR: {message}")),
            Err(_) => return ResultEnvelope::error(ErrorCode::Timeout, "TIMEOUT: statement exceeded configured timeout"),
        };

        let total_count = rows.len() as u64;

        ResultEnvelope::ok(
            rows,
            ResultMetadata {
                execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                from_cache: false,
                total_count: Some(total_count),
                plan: Some(ExecutionPlan { strategy: plan.strategy, steps: plan.steps }),
            },
        )
    }

    fn capabilities(&self) -> ExecutorCapabilities {
        ExecutorCapabilities {
            supports_aggregation: true,
            supports_grouping: true,
            supports_vector: false,
            supports_full_text: false,
        }
    }
}
