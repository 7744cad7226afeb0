//! Synchronous in-memory executor — the reference implementation against
//! which the other two executors' output is checked (spec.md §4.3, §8
//! universal invariant: "∀ QueryModel q and executor E capable of q, E(q)
//! yields the same multiset of rows as Memory").

use super::{Executor, ExecutorCapabilities};
use crate::model::Row;
use crate::predicate;
use crate::query::{ExecutionPlan, QueryModel, ResultEnvelope, ResultMetadata};
use crate::{predicate::is_type_mismatch, ErrorCode};
use async_trait::async_trait;
use std::time::Instant;

/// Executes a [`QueryModel`] against an in-memory `Vec<Row>`.
pub struct MemoryExecutor {
    rows: Vec<Row>,
}

impl MemoryExecutor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// filter → sort → group+aggregate+having → project → paginate.
    fn run(&self, query: &QueryModel) -> ResultEnvelope {
        let start = Instant::now();

        let mut filtered: Vec<Row> = self
            .rows
            .iter()
            .filter(|row| predicate::evaluate_all(&query.conditions, row))
            .cloned()
            .collect();

        predicate::sort_rows(&mut filtered, &query.ordering);

        let pre_pagination_count = filtered.len() as u64;

        let grouped = match predicate::group_and_aggregate(filtered, query.grouping.as_ref(), &query.aggregations) {
            Ok(rows) => rows,
            Err(e) if is_type_mismatch(&e) => {
                return ResultEnvelope::error(ErrorCode::TypeMismatch, e.to_string());
            }
            Err(e) => return ResultEnvelope::error(ErrorCode::InvalidValue, e.to_string()),
        };

        let having_applied = predicate::apply_having(grouped, query.having.as_ref());

        let projected = apply_projection(having_applied, query);

        let paginated = apply_pagination(projected, query);

        let elapsed = start.elapsed().as_secs_f64() * 1000.0;

        ResultEnvelope::ok(
            paginated,
            ResultMetadata {
                execution_time_ms: elapsed,
                from_cache: false,
                total_count: Some(pre_pagination_count),
                plan: Some(ExecutionPlan {
                    strategy: "memory-scan".into(),
                    steps: vec!["filter".into(), "sort".into(), "group".into(), "project".into(), "paginate".into()],
                }),
            },
        )
    }
}

fn apply_projection(rows: Vec<Row>, query: &QueryModel) -> Vec<Row> {
    let Some(projection) = &query.projection else { return rows };
    if projection.include_all || projection.fields.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            projection
                .fields
                .iter()
                .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                .collect()
        })
        .collect()
}

fn apply_pagination(rows: Vec<Row>, query: &QueryModel) -> Vec<Row> {
    let Some(page) = query.pagination else { return rows };
    rows.into_iter().skip(page.offset as usize).take(page.limit as usize).collect()
}

#[async_trait]
impl Executor for MemoryExecutor {
    async fn execute(&self, query: &QueryModel) -> ResultEnvelope {
        self.run(query)
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
