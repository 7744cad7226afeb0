//! Async JSON-file executor with mtime-invalidated caching (spec.md §4.4).

use super::{Executor, ExecutorCapabilities};
use crate::model::Row;
use crate::predicate;
use crate::predicate::is_type_mismatch;
use crate::query::{ExecutionPlan, QueryModel, ResultEnvelope, ResultMetadata};
use crate::ErrorCode;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};

#[derive(Debug, Clone)]
pub struct JsonExecutorConfig {
    pub file_path: PathBuf,
    pub encoding: String,
    pub cache_data: bool,
}

impl JsonExecutorConfig {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self { file_path: file_path.into(), encoding: "utf-8".into(), cache_data: true }
    }
}

struct Cache {
    rows: Vec<Row>,
    mtime: SystemTime,
}

/// Reads a top-level JSON array from disk, delegating row evaluation to
/// the Predicate Engine. Keeps the parsed array in-process until the
/// file's mtime changes (spec.md §4.4 algorithm).
pub struct JsonFileExecutor {
    config: JsonExecutorConfig,
    cache: RwLock<Option<Cache>>,
}

impl JsonFileExecutor {
    pub fn new(config: JsonExecutorConfig) -> Self {
        Self { config, cache: RwLock::new(None) }
    }

    async fn load(&self) -> std::result::Result<(Vec<Row>, bool), ResultEnvelope> {
        let metadata = tokio::fs::metadata(&self.config.file_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ResultEnvelope::error(ErrorCode::AdapterError, "ADAPTER_ERROR: JSON file not found")
            } else {
                ResultEnvelope::error(ErrorCode::AdapterError, format!("ADAPTER_ERROR: {e}"))
            }
        })?;
        let mtime = metadata.modified().map_err(|e| ResultEnvelope::error(ErrorCode::AdapterError, format!("ADAPTER_ERROR: {e}")))?;

        if self.config.cache_data {
            if let Some(cache) = self.cache.read().as_ref() {
                if cache.mtime == mtime {
                    return Ok((cache.rows.clone(), true));
                }
            }
        }

        let contents = tokio::fs::read_to_string(&self.config.file_path)
            .await
            .map_err(|e| ResultEnvelope::error(ErrorCode::AdapterError, format!("ADAPTER_ERROR: {e}")))?;

        let value: serde_json::Value = serde_json::from_str(&contents)
            .map_err(|_| ResultEnvelope::error(ErrorCode::AdapterError, "ADAPTER_ERROR: Failed to parse JSON"))?;

        let serde_json::Value::Array(items) = value else {
            return Err(ResultEnvelope::error(ErrorCode::AdapterError, "ADAPTER_ERROR: JSON data must be an array"));
        };

        let rows: Vec<Row> = items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(map) => map.into_iter().collect(),
                other => [("value".to_string(), other)].into_iter().collect(),
            })
            .collect();

        if self.config.cache_data {
            *self.cache.write() = Some(Cache { rows: rows.clone(), mtime });
        }

        Ok((rows, false))
    }
}

#[async_trait]
impl Executor for JsonFileExecutor {
    async fn execute(&self, query: &QueryModel) -> ResultEnvelope {
        let start = Instant::now();

        let (rows, from_cache) = match self.load().await {
            Ok(v) => v,
            Err(envelope) => return envelope,
        };

        let mut filtered: Vec<Row> = rows.iter().filter(|row| predicate::evaluate_all(&query.conditions, row)).cloned().collect();
        predicate::sort_rows(&mut filtered, &query.ordering);

        let pre_pagination_count = filtered.len() as u64;

        let grouped = match predicate::group_and_aggregate(filtered, query.grouping.as_ref(), &query.aggregations) {
            Ok(rows) => rows,
            Err(e) if is_type_mismatch(&e) => return ResultEnvelope::error(ErrorCode::TypeMismatch, e.to_string()),
            Err(e) => return ResultEnvelope::error(ErrorCode::InvalidValue, e.to_string()),
        };
        let having_applied = predicate::apply_having(grouped, query.having.as_ref());

        let projected: Vec<Row> = match &query.projection {
            Some(p) if !p.include_all && !p.fields.is_empty() => having_applied
                .into_iter()
                .map(|row| p.fields.iter().filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone()))).collect())
                .collect(),
            _ => having_applied,
        };

        let paginated: Vec<Row> = match query.pagination {
            Some(page) => projected.into_iter().skip(page.offset as usize).take(page.limit as usize).collect(),
            None => projected,
        };

        ResultEnvelope::ok(
            paginated,
            ResultMetadata {
                execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
                from_cache,
                // JSON executor reports the pre-pagination total (spec.md §9 Open Question:
                // documented per-executor, not unified across executors).
                total_count: Some(pre_pagination_count),
                plan: Some(ExecutionPlan {
                    strategy: "json-scan".into(),
                    steps: vec!["read-or-cache".into(), "filter".into(), "sort".into(), "group".into(), "paginate".into()],
                }),
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
