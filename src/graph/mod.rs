//! # Graph & Vector Storage Core
//!
//! SQL-backed property-graph storage plus vector similarity search
//! (spec.md §4.6), built on the same [`SqlConnection`](crate::executor::sql::SqlConnection)
//! / [`Pool`] substrate as the relational SQL executor — grounded on the
//! teacher's `StorageBackend` trait (`src/storage/mod.rs`), generalized
//! from an opaque `NodeId`/`RelId` keyspace to the string-keyed property
//! graph spec.md's data model requires, and from Bolt/ladybug-specific
//! backends to a single SQL-backed implementation plus the trait seam
//! for others.
//!
//! Structural fragments (table names, column names, index names) are
//! validated against a closed identifier grammar before assembly —
//! never interpolated from arbitrary caller input — mirroring the
//! `TryFrom<&str> for Direction` closed-set defense applied to the
//! traversal direction keyword.

use crate::executor::sql::SqlConnection;
use crate::model::{Direction, GraphEdge, GraphNode, GraphPath, PropertyMap, Row, Value};
use crate::pool::Pool;
use crate::query::{Condition, QueryModel, ResultEnvelope};
use crate::{sql, Error, Result, ABSOLUTE_MAX_DEPTH};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Supporting types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMetric {
    Cosine,
    Euclidean,
    InnerProduct,
}

impl VectorMetric {
    /// pgvector-style distance operator (spec.md §4.6).
    fn operator(&self) -> &'static str {
        match self {
            VectorMetric::Cosine => "<=>",
            VectorMetric::Euclidean => "<->",
            VectorMetric::InnerProduct => "<#>",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub property: String,
}

#[derive(Debug, Clone)]
pub struct VectorIndexSpec {
    pub name: String,
    pub dimensions: usize,
    pub metric: VectorMetric,
}

#[derive(Debug, Clone)]
pub struct PatternSpec {
    pub start_type: Option<String>,
    pub edge_type: Option<String>,
    pub end_type: Option<String>,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub enum GraphOperation {
    AddNode(GraphNode),
    UpdateNode { id: String, properties: PropertyMap },
    DeleteNode(String),
    AddEdge(GraphEdge),
    UpdateEdge { from: String, to: String, edge_type: String, properties: PropertyMap },
    DeleteEdge { from: String, to: String, edge_type: String },
}

#[derive(Debug, Clone)]
pub enum GraphOperationResult {
    NodeAdded(GraphNode),
    NodeUpdated(Option<GraphNode>),
    NodeDeleted(bool),
    EdgeAdded(GraphEdge),
    EdgeUpdated(Option<GraphEdge>),
    EdgeDeleted(bool),
    Failed(String),
}

// ============================================================================
// GraphStore trait
// ============================================================================

/// The universal graph + vector storage contract (spec.md §4.6).
/// Mirrors the breadth of the teacher's `StorageBackend`, generalized
/// to property-graph nodes/edges and vector search instead of
/// Neo4j-specific node/relationship ids and Cypher expansion.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn add_node(&self, node: GraphNode) -> Result<GraphNode>;
    async fn update_node(&self, id: &str, properties: PropertyMap) -> Result<Option<GraphNode>>;
    async fn delete_node(&self, id: &str) -> Result<bool>;
    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>>;

    async fn add_edge(&self, edge: GraphEdge) -> Result<GraphEdge>;
    async fn get_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<Option<GraphEdge>>;
    async fn update_edge(&self, from: &str, to: &str, edge_type: &str, properties: PropertyMap) -> Result<Option<GraphEdge>>;
    async fn delete_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<bool>;
    /// Edges touching `node_id` in either direction; `edge_types`, if
    /// given, restricts to `type = ANY($2)`.
    async fn get_edges(&self, node_id: &str, edge_types: Option<&[String]>) -> Result<Vec<GraphEdge>>;

    /// Runtime query failures are captured in the envelope, never thrown
    /// (spec.md §7) — mirrors [`crate::executor::Executor::execute`].
    async fn query_nodes(&self, query: &QueryModel) -> ResultEnvelope;
    async fn find_by_pattern(&self, node_type: Option<&str>, conditions: &[Condition]) -> ResultEnvelope;
    async fn pattern_match(&self, pattern: &PatternSpec) -> Result<Vec<GraphPath>>;

    async fn create_index(&self, spec: IndexSpec) -> Result<()>;
    async fn list_indexes(&self) -> Result<Vec<IndexSpec>>;

    async fn batch_graph_operations(&self, ops: Vec<GraphOperation>) -> Result<Vec<GraphOperationResult>>;

    /// Bounded recursive traversal. `max_depth` is validated against
    /// [`ABSOLUTE_MAX_DEPTH`] and `direction` is parsed through
    /// `Direction::try_from` before any SQL is assembled (spec.md §4.6
    /// step 1, §8 scenario 8). The whole traversal is answered by one
    /// bounded `WITH RECURSIVE` query plus one batched `id = ANY($1)`
    /// node fetch — 2 queries total regardless of depth or frontier
    /// width (spec.md §4.6 step 3, §8 scenario 5).
    async fn traverse(&self, start: &str, direction: &str, max_depth: u32, edge_type: Option<&str>) -> Result<Vec<GraphPath>>;
    async fn shortest_path(&self, from: &str, to: &str, direction: &str, max_depth: u32) -> Result<Option<GraphPath>>;
    async fn find_connected(&self, start: &str, direction: &str, max_depth: u32) -> Result<Vec<GraphNode>>;

    async fn create_vector_index(&self, spec: VectorIndexSpec) -> Result<()>;
    async fn vector_search(&self, query_vector: &[f32], metric: VectorMetric, top_k: usize) -> Result<Vec<(GraphNode, f64)>>;
    async fn insert_with_embedding(&self, node: GraphNode, embedding: Vec<f32>) -> Result<GraphNode>;

    async fn search(&self, text_query: &str, top_k: usize) -> Result<Vec<GraphNode>>;
    async fn create_materialized_view(&self, name: &str, query: &QueryModel) -> Result<()>;
    async fn refresh_materialized_view(&self, name: &str) -> Result<()>;
}

// ============================================================================
// SQL-backed implementation
// ============================================================================

#[derive(Debug, Clone)]
pub struct GraphStoreConfig {
    pub node_table: String,
    pub edge_table: String,
    pub embedding_column: String,
    pub embedding_dims: usize,
}

impl GraphStoreConfig {
    pub fn new(node_table: impl Into<String>, edge_table: impl Into<String>) -> Self {
        Self { node_table: node_table.into(), edge_table: edge_table.into(), embedding_column: "embedding".into(), embedding_dims: 1536 }
    }
}

/// Identifier grammar for table/column/index names assembled into SQL
/// text: `[A-Za-z_][A-Za-z0-9_]*`. Never relaxed to accept anything a
/// caller typed verbatim.
fn validate_identifier(name: &str) -> Result<&str> {
    let mut chars = name.chars();
    let first_ok = chars.next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if first_ok && rest_ok {
        Ok(name)
    } else {
        Err(Error::BuildError(format!("invalid identifier: {name:?}")))
    }
}

pub struct SqlGraphStore<C: SqlConnection + 'static> {
    pool: Arc<Pool<C>>,
    config: GraphStoreConfig,
    indexes: Mutex<Vec<IndexSpec>>,
}

impl<C: SqlConnection + 'static> SqlGraphStore<C> {
    pub fn new(pool: Arc<Pool<C>>, config: GraphStoreConfig) -> Result<Self> {
        validate_identifier(&config.node_table)?;
        validate_identifier(&config.edge_table)?;
        validate_identifier(&config.embedding_column)?;
        Ok(Self { pool, config, indexes: Mutex::new(Vec::new()) })
    }

    async fn exec(&self, sql_text: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut lease = self.pool.acquire().await?;
        lease.query(sql_text, params).await.map_err(|e| Error::BuildError(format!("ADAPTER_ERROR: {e}")))
    }

    async fn fetch_edges_for(&self, ids: &[String], direction: Direction, edge_type: Option<&str>) -> Result<Vec<GraphEdge>> {
        let ids_value = Value::Array(ids.iter().map(|id| Value::String(id.clone())).collect());
        let mut sql_text = match direction {
            Direction::Outgoing => {
                format!("SELECT from_node, to_node, type, properties FROM {} WHERE from_node = ANY($1)", self.config.edge_table)
            }
            Direction::Incoming => {
                format!("SELECT from_node, to_node, type, properties FROM {} WHERE to_node = ANY($1)", self.config.edge_table)
            }
            Direction::Both => format!(
                "SELECT from_node, to_node, type, properties FROM {} WHERE from_node = ANY($1) OR to_node = ANY($1)",
                self.config.edge_table
            ),
        };
        let mut params = vec![ids_value];
        if let Some(et) = edge_type {
            sql_text.push_str(" AND type = $2");
            params.push(Value::String(et.to_string()));
        }
        self.exec(&sql_text, &params).await?.iter().map(row_to_edge).collect()
    }

    async fn fetch_nodes_for(&self, ids: &[String]) -> Result<Vec<GraphNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql_text = format!("SELECT id, type, properties FROM {} WHERE id = ANY($1)", self.config.node_table);
        let ids_value = Value::Array(ids.iter().map(|id| Value::String(id.clone())).collect());
        self.exec(&sql_text, &[ids_value]).await?.iter().map(row_to_node).collect()
    }

    /// Assembles the bounded recursive CTE that answers an entire
    /// traversal in one query (spec.md §4.6 step 3). `max_depth` is
    /// embedded as a validated literal integer rather than a bound
    /// parameter — it is already checked against [`ABSOLUTE_MAX_DEPTH`]
    /// by the time this runs, which is exactly the kind of
    /// pre-whitelisted structural fragment spec.md §3 invariant 9 allows
    /// outside the parameterized path. Cycle detection lives in the
    /// `NOT (...) = ANY(path_nodes)` guard so a cyclic graph terminates
    /// instead of recursing forever.
    fn traverse_sql(&self, direction: Direction, max_depth: u32, edge_type: Option<&str>) -> (String, bool) {
        let (join_cond, next_expr) = match direction {
            Direction::Outgoing => ("e.from_node = t.path_nodes[cardinality(t.path_nodes)]", "e.to_node".to_string()),
            Direction::Incoming => ("e.to_node = t.path_nodes[cardinality(t.path_nodes)]", "e.from_node".to_string()),
            Direction::Both => (
                "(e.from_node = t.path_nodes[cardinality(t.path_nodes)] OR e.to_node = t.path_nodes[cardinality(t.path_nodes)])",
                "CASE WHEN e.from_node = t.path_nodes[cardinality(t.path_nodes)] THEN e.to_node ELSE e.from_node END".to_string(),
            ),
        };

        let mut sql_text = format!(
            "WITH RECURSIVE traversal(path_nodes, path_edges, depth) AS ( \
                 SELECT ARRAY[$1]::text[], ARRAY[]::jsonb[], 0 \
                 UNION ALL \
                 SELECT t.path_nodes || ({next_expr}), \
                        t.path_edges || jsonb_build_object('from_node', e.from_node, 'to_node', e.to_node, 'type', e.type, 'properties', e.properties), \
                        t.depth + 1 \
                 FROM traversal t JOIN {edge_table} e ON {join_cond} \
                 WHERE t.depth < {max_depth} AND NOT ({next_expr}) = ANY(t.path_nodes)",
            edge_table = self.config.edge_table,
        );
        let has_edge_type = edge_type.is_some();
        if has_edge_type {
            sql_text.push_str(" AND e.type = $2");
        }
        sql_text.push_str(") SELECT path_nodes, path_edges, depth FROM traversal");
        (sql_text, has_edge_type)
    }

    /// Shared traversal core for `traverse`/`shortest_path`/`find_connected`:
    /// exactly one recursive CTE query to enumerate every path up to
    /// `max_depth`, plus exactly one batched `id = ANY($1)` query to
    /// resolve every node touched by any path — 2 queries total (spec.md
    /// §8 scenario 5), or 1 if the CTE returns no paths at all.
    async fn bfs(&self, start: &str, direction: Direction, max_depth: u32, edge_type: Option<&str>, stop_at: Option<&str>) -> Result<Vec<GraphPath>> {
        if max_depth > ABSOLUTE_MAX_DEPTH {
            return Err(Error::BuildError(format!("max_depth {max_depth} exceeds ABSOLUTE_MAX_DEPTH {ABSOLUTE_MAX_DEPTH}")));
        }

        let (sql_text, has_edge_type) = self.traverse_sql(direction, max_depth, edge_type);
        let mut params = vec![Value::String(start.to_string())];
        if has_edge_type {
            params.push(Value::String(edge_type.expect("has_edge_type implies edge_type is Some").to_string()));
        }
        let records: Vec<(Vec<String>, Vec<GraphEdge>)> =
            self.exec(&sql_text, &params).await?.iter().map(row_to_path_record).collect::<Result<_>>()?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for (path_nodes, _) in &records {
            for id in path_nodes {
                if seen.insert(id.clone()) {
                    ids.push(id.clone());
                }
            }
        }
        let nodes = self.fetch_nodes_for(&ids).await?;
        let node_by_id: std::collections::HashMap<&str, &GraphNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut paths = Vec::new();
        for (path_nodes, path_edges) in records {
            if let Some(target) = stop_at {
                if path_nodes.last().map(String::as_str) != Some(target) {
                    continue;
                }
            }
            let Some(first_id) = path_nodes.first() else { continue };
            let Some(first_node) = node_by_id.get(first_id.as_str()) else { continue };
            let mut path = GraphPath::single((*first_node).clone());
            let mut complete = true;
            for (i, edge) in path_edges.into_iter().enumerate() {
                let Some(node) = path_nodes.get(i + 1).and_then(|id| node_by_id.get(id.as_str())) else {
                    complete = false;
                    break;
                };
                path.append(edge, (*node).clone());
            }
            if complete {
                paths.push(path);
            }
        }

        if stop_at.is_some() {
            paths.sort_by_key(|p| p.depth());
            paths.truncate(1);
        }
        Ok(paths)
    }
}

fn row_to_node(row: &Row) -> Result<GraphNode> {
    let id = row
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::BuildError("ADAPTER_ERROR: node row missing id".into()))?
        .to_string();
    let node_type = row.get("type").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let properties = match row.get("properties") {
        Some(Value::Object(map)) => map.clone().into_iter().collect(),
        _ => PropertyMap::new(),
    };
    Ok(GraphNode { id, node_type, properties })
}

fn row_to_edge(row: &Row) -> Result<GraphEdge> {
    let from = row
        .get("from_node")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::BuildError("ADAPTER_ERROR: edge row missing from_node".into()))?
        .to_string();
    let to = row
        .get("to_node")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::BuildError("ADAPTER_ERROR: edge row missing to_node".into()))?
        .to_string();
    let edge_type = row.get("type").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let properties = match row.get("properties") {
        Some(Value::Object(map)) => map.clone().into_iter().collect(),
        _ => PropertyMap::new(),
    };
    Ok(GraphEdge { from, to, edge_type, properties })
}

/// Unpacks one row of the `traversal` recursive CTE (spec.md §4.6 step
/// 3): `path_nodes` is the ordered array of node ids from the start to
/// this row's frontier node, `path_edges` is the matching array of edge
/// objects keyed the same way a single-edge row is (`from_node`,
/// `to_node`, `type`, `properties`).
fn row_to_path_record(row: &Row) -> Result<(Vec<String>, Vec<GraphEdge>)> {
    let path_nodes: Vec<String> = match row.get("path_nodes") {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => return Err(Error::BuildError("ADAPTER_ERROR: traversal row missing path_nodes".into())),
    };
    let path_edges: Vec<GraphEdge> = match row.get("path_edges") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::Object(map) => row_to_edge(&map.clone().into_iter().collect()),
                _ => Err(Error::BuildError("ADAPTER_ERROR: traversal row edge entry not an object".into())),
            })
            .collect::<Result<_>>()?,
        _ => Vec::new(),
    };
    Ok((path_nodes, path_edges))
}

fn properties_to_value(properties: &PropertyMap) -> Value {
    Value::Object(properties.clone().into_iter().collect())
}

#[async_trait]
impl<C: SqlConnection + 'static> GraphStore for SqlGraphStore<C> {
    async fn add_node(&self, node: GraphNode) -> Result<GraphNode> {
        let sql_text = format!(
            "INSERT INTO {} (id, type, properties) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET type = EXCLUDED.type, properties = EXCLUDED.properties \
             RETURNING id, type, properties",
            self.config.node_table
        );
        let params = vec![Value::String(node.id.clone()), Value::String(node.node_type.clone()), properties_to_value(&node.properties)];
        let rows = self.exec(&sql_text, &params).await?;
        let row = rows.into_iter().next().ok_or_else(|| Error::BuildError("ADAPTER_ERROR: insert returned no row".into()))?;
        row_to_node(&row)
    }

    async fn update_node(&self, id: &str, properties: PropertyMap) -> Result<Option<GraphNode>> {
        let sql_text = format!(
            "UPDATE {} SET properties = properties || $2 WHERE id = $1 RETURNING id, type, properties",
            self.config.node_table
        );
        let rows = self.exec(&sql_text, &[Value::String(id.to_string()), properties_to_value(&properties)]).await?;
        rows.into_iter().next().map(|row| row_to_node(&row)).transpose()
    }

    async fn delete_node(&self, id: &str) -> Result<bool> {
        let sql_text = format!("DELETE FROM {} WHERE id = $1 RETURNING id", self.config.node_table);
        let rows = self.exec(&sql_text, &[Value::String(id.to_string())]).await?;
        Ok(!rows.is_empty())
    }

    async fn get_node(&self, id: &str) -> Result<Option<GraphNode>> {
        let sql_text = format!("SELECT id, type, properties FROM {} WHERE id = $1", self.config.node_table);
        let rows = self.exec(&sql_text, &[Value::String(id.to_string())]).await?;
        rows.into_iter().next().map(|row| row_to_node(&row)).transpose()
    }

    async fn add_edge(&self, edge: GraphEdge) -> Result<GraphEdge> {
        let sql_text = format!(
            "INSERT INTO {} (from_node, to_node, type, properties) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (from_node, to_node, type) DO UPDATE SET properties = EXCLUDED.properties \
             RETURNING from_node, to_node, type, properties",
            self.config.edge_table
        );
        let params = vec![
            Value::String(edge.from.clone()),
            Value::String(edge.to.clone()),
            Value::String(edge.edge_type.clone()),
            properties_to_value(&edge.properties),
        ];
        let rows = self.exec(&sql_text, &params).await?;
        let row = rows.into_iter().next().ok_or_else(|| Error::BuildError("ADAPTER_ERROR: insert returned no row".into()))?;
        row_to_edge(&row)
    }

    async fn get_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<Option<GraphEdge>> {
        let sql_text = format!(
            "SELECT from_node, to_node, type, properties FROM {} WHERE from_node = $1 AND to_node = $2 AND type = $3",
            self.config.edge_table
        );
        let params = vec![Value::String(from.to_string()), Value::String(to.to_string()), Value::String(edge_type.to_string())];
        let rows = self.exec(&sql_text, &params).await?;
        rows.into_iter().next().map(|row| row_to_edge(&row)).transpose()
    }

    async fn update_edge(&self, from: &str, to: &str, edge_type: &str, properties: PropertyMap) -> Result<Option<GraphEdge>> {
        let sql_text = format!(
            "UPDATE {} SET properties = properties || $4 WHERE from_node = $1 AND to_node = $2 AND type = $3 \
             RETURNING from_node, to_node, type, properties",
            self.config.edge_table
        );
        let params = vec![
            Value::String(from.to_string()),
            Value::String(to.to_string()),
            Value::String(edge_type.to_string()),
            properties_to_value(&properties),
        ];
        let rows = self.exec(&sql_text, &params).await?;
        rows.into_iter().next().map(|row| row_to_edge(&row)).transpose()
    }

    async fn delete_edge(&self, from: &str, to: &str, edge_type: &str) -> Result<bool> {
        let sql_text = format!(
            "DELETE FROM {} WHERE from_node = $1 AND to_node = $2 AND type = $3 RETURNING from_node",
            self.config.edge_table
        );
        let params = vec![Value::String(from.to_string()), Value::String(to.to_string()), Value::String(edge_type.to_string())];
        let rows = self.exec(&sql_text, &params).await?;
        Ok(!rows.is_empty())
    }

    async fn get_edges(&self, node_id: &str, edge_types: Option<&[String]>) -> Result<Vec<GraphEdge>> {
        let mut sql_text =
            format!("SELECT from_node, to_node, type, properties FROM {} WHERE from_node = $1 OR to_node = $1", self.config.edge_table);
        let mut params = vec![Value::String(node_id.to_string())];
        if let Some(types) = edge_types {
            sql_text.push_str(" AND type = ANY($2)");
            params.push(Value::Array(types.iter().map(|t| Value::String(t.clone())).collect()));
        }
        self.exec(&sql_text, &params).await?.iter().map(row_to_edge).collect()
    }

    async fn query_nodes(&self, query: &QueryModel) -> ResultEnvelope {
        let (sql_text, params, plan) = sql::generate_with_plan(query, &self.config.node_table);
        match self.exec(&sql_text, &params).await {
            Ok(rows) => ResultEnvelope::ok(
                rows,
                crate::query::ResultMetadata {
                    execution_time_ms: 0.0,
                    from_cache: false,
                    total_count: None,
                    plan: Some(crate::query::ExecutionPlan { strategy: plan.strategy, steps: plan.steps }),
                },
            ),
            Err(e) => ResultEnvelope::error(crate::ErrorCode::AdapterError, format!("ADAPTER_ERROR: {e}")),
        }
    }

    async fn find_by_pattern(&self, node_type: Option<&str>, conditions: &[Condition]) -> ResultEnvelope {
        let mut all_conditions = conditions.to_vec();
        if let Some(t) = node_type {
            all_conditions.insert(0, Condition::Equality { field: "type".into(), negate: false, value: Value::String(t.to_string()) });
        }
        let model = QueryModel { conditions: Arc::new(all_conditions), ..Default::default() };
        self.query_nodes(&model).await
    }

    async fn pattern_match(&self, pattern: &PatternSpec) -> Result<Vec<GraphPath>> {
        let start_sql = match &pattern.start_type {
            Some(_) => format!("SELECT id, type, properties FROM {} WHERE type = $1", self.config.node_table),
            None => format!("SELECT id, type, properties FROM {}", self.config.node_table),
        };
        let start_params: Vec<Value> = pattern.start_type.as_ref().map(|t| vec![Value::String(t.clone())]).unwrap_or_default();
        let starts: Vec<GraphNode> = self.exec(&start_sql, &start_params).await?.iter().map(row_to_node).collect::<Result<_>>()?;
        if starts.is_empty() {
            return Ok(Vec::new());
        }

        let start_ids: Vec<String> = starts.iter().map(|n| n.id.clone()).collect();
        let edges = self.fetch_edges_for(&start_ids, pattern.direction, pattern.edge_type.as_deref()).await?;
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let end_ids: Vec<String> = start_ids
            .iter()
            .flat_map(|id| edges.iter().filter_map(move |e| e.other_node(id)))
            .map(|s| s.to_string())
            .collect();
        let end_nodes = self.fetch_nodes_for(&end_ids).await?;
        let end_by_id: std::collections::HashMap<&str, &GraphNode> = end_nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut paths = Vec::new();
        for start in &starts {
            for edge in edges.iter().filter(|e| e.other_node(&start.id).is_some()) {
                let Some(other_id) = edge.other_node(&start.id) else { continue };
                let Some(end) = end_by_id.get(other_id) else { continue };
                if let Some(end_type) = &pattern.end_type {
                    if &end.node_type != end_type {
                        continue;
                    }
                }
                let mut path = GraphPath::single(start.clone());
                path.append(edge.clone(), (*end).clone());
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn create_index(&self, spec: IndexSpec) -> Result<()> {
        validate_identifier(&spec.name)?;
        validate_identifier(&spec.property)?;
        let sql_text = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ((properties->>'{}'))",
            spec.name, self.config.node_table, spec.property
        );
        self.exec(&sql_text, &[]).await?;
        self.indexes.lock().push(spec);
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>> {
        Ok(self.indexes.lock().clone())
    }

    async fn batch_graph_operations(&self, ops: Vec<GraphOperation>) -> Result<Vec<GraphOperationResult>> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            let result = match op {
                GraphOperation::AddNode(node) => match self.add_node(node).await {
                    Ok(n) => GraphOperationResult::NodeAdded(n),
                    Err(e) => GraphOperationResult::Failed(e.to_string()),
                },
                GraphOperation::UpdateNode { id, properties } => match self.update_node(&id, properties).await {
                    Ok(n) => GraphOperationResult::NodeUpdated(n),
                    Err(e) => GraphOperationResult::Failed(e.to_string()),
                },
                GraphOperation::DeleteNode(id) => match self.delete_node(&id).await {
                    Ok(existed) => GraphOperationResult::NodeDeleted(existed),
                    Err(e) => GraphOperationResult::Failed(e.to_string()),
                },
                GraphOperation::AddEdge(edge) => match self.add_edge(edge).await {
                    Ok(e) => GraphOperationResult::EdgeAdded(e),
                    Err(e) => GraphOperationResult::Failed(e.to_string()),
                },
                GraphOperation::UpdateEdge { from, to, edge_type, properties } => {
                    match self.update_edge(&from, &to, &edge_type, properties).await {
                        Ok(e) => GraphOperationResult::EdgeUpdated(e),
                        Err(e) => GraphOperationResult::Failed(e.to_string()),
                    }
                }
                GraphOperation::DeleteEdge { from, to, edge_type } => match self.delete_edge(&from, &to, &edge_type).await {
                    Ok(existed) => GraphOperationResult::EdgeDeleted(existed),
                    Err(e) => GraphOperationResult::Failed(e.to_string()),
                },
            };
            results.push(result);
        }
        Ok(results)
    }

    async fn traverse(&self, start: &str, direction: &str, max_depth: u32, edge_type: Option<&str>) -> Result<Vec<GraphPath>> {
        let direction = Direction::try_from(direction)?;
        self.bfs(start, direction, max_depth, edge_type, None).await
    }

    async fn shortest_path(&self, from: &str, to: &str, direction: &str, max_depth: u32) -> Result<Option<GraphPath>> {
        let direction = Direction::try_from(direction)?;
        let paths = self.bfs(from, direction, max_depth, None, Some(to)).await?;
        Ok(paths.into_iter().next())
    }

    async fn find_connected(&self, start: &str, direction: &str, max_depth: u32) -> Result<Vec<GraphNode>> {
        let direction = Direction::try_from(direction)?;
        let paths = self.bfs(start, direction, max_depth, None, None).await?;
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for path in paths {
            let node = path.end().clone();
            if seen.insert(node.id.clone()) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn create_vector_index(&self, spec: VectorIndexSpec) -> Result<()> {
        validate_identifier(&spec.name)?;
        if spec.dimensions != self.config.embedding_dims {
            return Err(Error::BuildError(format!(
                "INVALID_VALUE: vector index dimensions {} do not match configured embedding_dims {}",
                spec.dimensions, self.config.embedding_dims
            )));
        }
        let opclass = match spec.metric {
            VectorMetric::Cosine => "vector_cosine_ops",
            VectorMetric::Euclidean => "vector_l2_ops",
            VectorMetric::InnerProduct => "vector_ip_ops",
        };
        let sql_text = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING ivfflat ({} {})",
            spec.name, self.config.node_table, self.config.embedding_column, opclass
        );
        self.exec(&sql_text, &[]).await?;
        Ok(())
    }

    async fn vector_search(&self, query_vector: &[f32], metric: VectorMetric, top_k: usize) -> Result<Vec<(GraphNode, f64)>> {
        if query_vector.len() != self.config.embedding_dims {
            return Err(Error::BuildError(format!(
                "INVALID_VALUE: query vector has {} dimensions, expected {}",
                query_vector.len(),
                self.config.embedding_dims
            )));
        }
        let vector_value = Value::Array(query_vector.iter().map(|f| serde_json::json!(f)).collect());
        let sql_text = format!(
            "SELECT id, type, properties, ({} {} $1) AS distance FROM {} ORDER BY distance ASC LIMIT {}",
            self.config.embedding_column,
            metric.operator(),
            self.config.node_table,
            top_k
        );
        let rows = self.exec(&sql_text, &[vector_value]).await?;
        rows.iter()
            .map(|row| {
                let node = row_to_node(row)?;
                let distance = row.get("distance").and_then(|v| v.as_f64()).unwrap_or(f64::NAN);
                Ok((node, distance))
            })
            .collect()
    }

    async fn insert_with_embedding(&self, node: GraphNode, embedding: Vec<f32>) -> Result<GraphNode> {
        if embedding.len() != self.config.embedding_dims {
            return Err(Error::BuildError(format!(
                "INVALID_VALUE: embedding has {} dimensions, expected {}",
                embedding.len(),
                self.config.embedding_dims
            )));
        }
        let sql_text = format!(
            "INSERT INTO {} (id, type, properties, {}) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET type = EXCLUDED.type, properties = EXCLUDED.properties, {} = EXCLUDED.{} \
             RETURNING id, type, properties",
            self.config.node_table, self.config.embedding_column, self.config.embedding_column, self.config.embedding_column
        );
        let vector_value = Value::Array(embedding.iter().map(|f| serde_json::json!(f)).collect());
        let params = vec![Value::String(node.id.clone()), Value::String(node.node_type.clone()), properties_to_value(&node.properties), vector_value];
        let rows = self.exec(&sql_text, &params).await?;
        let row = rows.into_iter().next().ok_or_else(|| Error::BuildError("ADAPTER_ERROR: insert returned no row".into()))?;
        row_to_node(&row)
    }

    async fn search(&self, text_query: &str, top_k: usize) -> Result<Vec<GraphNode>> {
        let sql_text = format!(
            "SELECT id, type, properties FROM {} WHERE to_tsvector('english', properties::text) @@ plainto_tsquery('english', $1) LIMIT {}",
            self.config.node_table, top_k
        );
        self.exec(&sql_text, &[Value::String(text_query.to_string())]).await?.iter().map(row_to_node).collect()
    }

    async fn create_materialized_view(&self, name: &str, query: &QueryModel) -> Result<()> {
        validate_identifier(name)?;
        let (select_sql, params) = sql::generate(query, &self.config.node_table);
        let sql_text = format!("CREATE MATERIALIZED VIEW {name} AS {select_sql}");
        self.exec(&sql_text, &params).await?;
        Ok(())
    }

    async fn refresh_materialized_view(&self, name: &str) -> Result<()> {
        validate_identifier(name)?;
        let sql_text = format!("REFRESH MATERIALIZED VIEW {name}");
        self.exec(&sql_text, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingConnection {
        responses: Arc<Mutex<std::collections::VecDeque<Vec<Row>>>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SqlConnection for RecordingConnection {
        async fn query(&mut self, _sql: &str, _params: &[Value]) -> std::result::Result<Vec<Row>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.lock().pop_front().unwrap_or_default())
        }
    }

    fn node_row(id: &str, node_type: &str) -> Row {
        [
            ("id".to_string(), Value::String(id.to_string())),
            ("type".to_string(), Value::String(node_type.to_string())),
            ("properties".to_string(), Value::Object(Default::default())),
        ]
        .into_iter()
        .collect()
    }

    fn edge_row(from: &str, to: &str, edge_type: &str) -> Row {
        [
            ("from_node".to_string(), Value::String(from.to_string())),
            ("to_node".to_string(), Value::String(to.to_string())),
            ("type".to_string(), Value::String(edge_type.to_string())),
            ("properties".to_string(), Value::Object(Default::default())),
        ]
        .into_iter()
        .collect()
    }

    fn path_row(path_nodes: &[&str], path_edges: Vec<Row>) -> Row {
        [
            ("path_nodes".to_string(), Value::Array(path_nodes.iter().map(|s| Value::String(s.to_string())).collect())),
            ("path_edges".to_string(), Value::Array(path_edges.into_iter().map(|r| Value::Object(r.into_iter().collect())).collect())),
            ("depth".to_string(), Value::from(path_nodes.len().saturating_sub(1) as i64)),
        ]
        .into_iter()
        .collect()
    }

    async fn make_store(responses: Vec<Vec<Row>>) -> (SqlGraphStore<RecordingConnection>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared_responses = Arc::new(Mutex::new(responses.into_iter().collect::<std::collections::VecDeque<_>>()));
        let calls_for_factory = Arc::clone(&calls);
        let pool = Arc::new(
            Pool::new(PoolConfig { min_connections: 1, max_connections: 1, ..Default::default() }, move || {
                let responses = Arc::clone(&shared_responses);
                let calls = Arc::clone(&calls_for_factory);
                async move { Ok(RecordingConnection { responses, calls }) }
            })
            .await
            .unwrap(),
        );
        let store = SqlGraphStore::new(pool, GraphStoreConfig::new("nodes", "edges")).unwrap();
        (store, calls)
    }

    #[tokio::test]
    async fn rejects_invalid_table_identifier() {
        let calls = Arc::new(AtomicUsize::new(0));
        let responses = Arc::new(Mutex::new(std::collections::VecDeque::new()));
        let c2 = Arc::clone(&calls);
        let pool = Arc::new(
            Pool::new(PoolConfig::default(), move || {
                let responses = Arc::clone(&responses);
                let calls = Arc::clone(&c2);
                async move { Ok(RecordingConnection { responses, calls }) }
            })
            .await
            .unwrap(),
        );
        let result = SqlGraphStore::new(pool, GraphStoreConfig::new("nodes; DROP TABLE x", "edges"));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn traverse_depth_one_issues_exactly_two_queries() {
        let (store, calls) = make_store(vec![
            vec![path_row(&["a"], vec![]), path_row(&["a", "b"], vec![edge_row("a", "b", "KNOWS")])],
            vec![node_row("a", "Person"), node_row("b", "Person")],
        ])
        .await;
        let paths = store.traverse("a", "outgoing", 1, None).await.unwrap();
        assert_eq!(paths.len(), 2, "start-only path plus the one-hop extension");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "one recursive CTE query + one batched node fetch, regardless of depth");
    }

    #[tokio::test]
    async fn traverse_depth_three_still_issues_exactly_two_queries() {
        let (store, calls) = make_store(vec![
            vec![
                path_row(&["a"], vec![]),
                path_row(&["a", "b"], vec![edge_row("a", "b", "KNOWS")]),
                path_row(&["a", "b", "c"], vec![edge_row("a", "b", "KNOWS"), edge_row("b", "c", "KNOWS")]),
            ],
            vec![node_row("a", "Person"), node_row("b", "Person"), node_row("c", "Person")],
        ])
        .await;
        let paths = store.traverse("a", "outgoing", 3, None).await.unwrap();
        assert_eq!(paths.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "depth must not change the query count (spec.md §8 scenario 5)");
    }

    #[tokio::test]
    async fn traverse_rejects_invalid_direction_before_any_query() {
        let (store, calls) = make_store(vec![]).await;
        let result = store.traverse("a", "sideways", 1, None).await;
        assert!(matches!(result, Err(Error::BuildError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "an invalid direction must be rejected before any SQL is issued");
    }

    #[tokio::test]
    async fn edge_crud_round_trips_through_one_query_each() {
        let (store, calls) = make_store(vec![
            vec![edge_row("a", "b", "KNOWS")],
            vec![edge_row("a", "b", "KNOWS")],
            vec![edge_row("a", "b", "KNOWS")],
            vec![edge_row("a", "b", "KNOWS")],
        ])
        .await;

        let fetched = store.get_edge("a", "b", "KNOWS").await.unwrap().unwrap();
        assert_eq!(fetched.from, "a");

        let updated = store.update_edge("a", "b", "KNOWS", PropertyMap::new()).await.unwrap();
        assert!(updated.is_some());

        let edges = store.get_edges("a", None).await.unwrap();
        assert_eq!(edges.len(), 1);

        let deleted = store.delete_edge("a", "b", "KNOWS").await.unwrap();
        assert!(deleted);

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn traverse_rejects_depth_beyond_absolute_max() {
        let (store, _calls) = make_store(vec![]).await;
        let result = store.traverse("a", "outgoing", ABSOLUTE_MAX_DEPTH + 1, None).await;
        assert!(matches!(result, Err(Error::BuildError(_))));
    }

    #[tokio::test]
    async fn vector_search_rejects_dimension_mismatch() {
        let (store, _calls) = make_store(vec![]).await;
        let result = store.vector_search(&[0.1, 0.2], VectorMetric::Cosine, 5).await;
        assert!(matches!(result, Err(Error::BuildError(_))));
    }

    #[tokio::test]
    async fn insert_with_embedding_rejects_dimension_mismatch() {
        let (store, _calls) = make_store(vec![]).await;
        let node = GraphNode::new("a", "Person");
        let result = store.insert_with_embedding(node, vec![0.0; 3]).await;
        assert!(matches!(result, Err(Error::BuildError(_))));
    }

    #[tokio::test]
    async fn batch_operations_capture_individual_failures() {
        let (store, _calls) = make_store(vec![vec![node_row("a", "Person")], vec![]]).await;
        let ops = vec![GraphOperation::AddNode(GraphNode::new("a", "Person")), GraphOperation::DeleteNode("missing".into())];
        let results = store.batch_graph_operations(ops).await.unwrap();
        assert!(matches!(results[0], GraphOperationResult::NodeAdded(_)));
        assert!(matches!(results[1], GraphOperationResult::NodeDeleted(false)));
    }
}
