//! # SQL Generator
//!
//! Pure translation of a [`QueryModel`] (or a [`SemanticQuery`]) into
//! `(sql_text, ordered_parameters)` using numbered `$N` placeholders —
//! the single place structural SQL is assembled (spec.md §4.5). Every
//! user-supplied *value* is bound; only a small, validated, finite set
//! of structural fragments (field/table names, operator keywords) is
//! composed textually (spec.md §3 invariant 9).

use crate::model::Value;
use crate::query::{
    Aggregation, AggregationKind, CompareOp, Condition, CompositeOp, NullOp, OrderKey,
    PatternOp, QueryModel, SetOp, SortDirection,
};

/// A `(from, select?, where?, groupBy?, aggregations?, orderBy?, limit?,
/// offset?)` sibling of `QueryModel`, aimed squarely at the SQL backend
/// (spec.md §4.5). Translation through [`generate`] is lossless for this
/// subset — it is converted into an equivalent `QueryModel` first so
/// there is exactly one place SQL text gets assembled.
#[derive(Debug, Clone, Default)]
pub struct SemanticQuery {
    pub from: String,
    pub select: Option<Vec<String>>,
    pub where_conditions: Vec<Condition>,
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub order_by: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl From<&SemanticQuery> for QueryModel {
    fn from(sq: &SemanticQuery) -> Self {
        use crate::query::{Grouping, Pagination, Projection};
        QueryModel {
            conditions: std::sync::Arc::new(sq.where_conditions.clone()),
            ordering: std::sync::Arc::new(sq.order_by.clone()),
            pagination: match (sq.limit, sq.offset) {
                (None, None) => None,
                (limit, offset) => Some(Pagination { limit: limit.unwrap_or(u64::MAX), offset: offset.unwrap_or(0) }),
            },
            projection: sq.select.as_ref().map(|fields| Projection { fields: fields.clone(), include_all: false }),
            grouping: if sq.group_by.is_empty() { None } else { Some(Grouping { fields: sq.group_by.clone() }) },
            aggregations: std::sync::Arc::new(sq.aggregations.clone()),
            having: None,
            depth: None,
            performance_hints: None,
        }
    }
}

/// One step of the `metadata.plan.steps` an executor can surface
/// alongside generated SQL (spec.md §6).
#[derive(Debug, Clone)]
pub struct Plan {
    pub strategy: String,
    pub steps: Vec<String>,
}

/// A running placeholder allocator: every bound value gets the next
/// `$N` and is appended to `params` in assembly order.
struct ParamBuilder {
    params: Vec<Value>,
}

impl ParamBuilder {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn bind_many(&mut self, values: &[Value]) -> String {
        let placeholders: Vec<String> = values.iter().map(|v| self.bind(v.clone())).collect();
        placeholders.join(", ")
    }
}

/// Translate a `QueryModel` against `table` into `(sql, params)`.
///
/// `table` and every field name referenced by the query must already be
/// validated by the caller against a backend-specific whitelist — this
/// function treats them as structural fragments, not user data.
pub fn generate(model: &QueryModel, table: &str) -> (String, Vec<Value>) {
    let mut p = ParamBuilder::new();
    let mut sql = String::new();

    sql.push_str("SELECT ");
    sql.push_str(&select_clause(model));
    sql.push_str(" FROM ");
    sql.push_str(table);

    if !model.conditions.is_empty() {
        sql.push_str(" WHERE ");
        let clauses: Vec<String> = model.conditions.iter().map(|c| render_condition(c, &mut p)).collect();
        sql.push_str(&clauses.join(" AND "));
    }

    if let Some(grouping) = &model.grouping {
        if !grouping.fields.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&grouping.fields.join(", "));
        }
    }

    if let Some(having) = &model.having {
        sql.push_str(" HAVING ");
        sql.push_str(&having.target);
        sql.push(' ');
        sql.push_str(having_op_str(having.op));
        sql.push(' ');
        sql.push_str(&p.bind(having.value.clone()));
    }

    if !model.ordering.is_empty() {
        sql.push_str(" ORDER BY ");
        let parts: Vec<String> = model.ordering.iter().map(order_fragment).collect();
        sql.push_str(&parts.join(", "));
    }

    if let Some(page) = model.pagination {
        sql.push_str(&format!(" LIMIT {}", page.limit));
        if page.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", page.offset));
        }
    }

    (sql, p.params)
}

/// Same as [`generate`] but also returns the step-by-step `Plan` the
/// executor can surface as `metadata.plan` (spec.md §6).
pub fn generate_with_plan(model: &QueryModel, table: &str) -> (String, Vec<Value>, Plan) {
    let (sql, params) = generate(model, table);
    let mut steps = vec![format!("scan {table}")];
    if !model.conditions.is_empty() {
        steps.push(format!("filter {} condition(s)", model.conditions.len()));
    }
    if let Some(g) = &model.grouping {
        if !g.fields.is_empty() {
            steps.push(format!("group by {}", g.fields.join(", ")));
        }
    }
    if !model.aggregations.is_empty() {
        steps.push(format!("aggregate {} column(s)", model.aggregations.len()));
    }
    if model.having.is_some() {
        steps.push("having".to_string());
    }
    if !model.ordering.is_empty() {
        steps.push("sort".to_string());
    }
    if model.pagination.is_some() {
        steps.push("paginate".to_string());
    }
    (sql, params, Plan { strategy: "sql-generated".into(), steps })
}

fn select_clause(model: &QueryModel) -> String {
    let mut parts = Vec::new();

    match &model.projection {
        Some(p) if !p.include_all && !p.fields.is_empty() => parts.extend(p.fields.iter().cloned()),
        _ => {
            if model.aggregations.is_empty() {
                parts.push("*".to_string());
            }
        }
    }

    if let Some(grouping) = &model.grouping {
        for f in &grouping.fields {
            if !parts.contains(f) {
                parts.push(f.clone());
            }
        }
    }

    for agg in model.aggregations.iter() {
        parts.push(aggregation_fragment(agg));
    }

    if parts.is_empty() {
        parts.push("*".to_string());
    }
    parts.join(", ")
}

fn aggregation_fragment(agg: &Aggregation) -> String {
    let field = agg.field.as_deref().unwrap_or("*");
    let func = match agg.kind {
        AggregationKind::Count => "COUNT".to_string(),
        AggregationKind::CountDistinct => return format!("COUNT(DISTINCT {field}) AS {}", agg.alias),
        AggregationKind::Sum => "SUM".to_string(),
        AggregationKind::Avg => "AVG".to_string(),
        AggregationKind::Min => "MIN".to_string(),
        AggregationKind::Max => "MAX".to_string(),
    };
    format!("{func}({field}) AS {}", agg.alias)
}

fn having_op_str(op: crate::query::HavingOp) -> &'static str {
    use crate::query::HavingOp::*;
    match op {
        Eq => "=",
        Ne => "!=",
        Gt => ">",
        Lt => "<",
        Gte => ">=",
        Lte => "<=",
    }
}

fn order_fragment(key: &OrderKey) -> String {
    let dir = match key.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let mut s = format!("{} {dir}", key.field);
    if let Some(nulls) = key.nulls {
        s.push_str(match nulls {
            crate::query::NullsOrder::First => " NULLS FIRST",
            crate::query::NullsOrder::Last => " NULLS LAST",
        });
    }
    s
}

fn render_condition(condition: &Condition, p: &mut ParamBuilder) -> String {
    match condition {
        Condition::Equality { field, negate, value } => {
            let op = if *negate { "!=" } else { "=" };
            format!("{field} {op} {}", p.bind(value.clone()))
        }
        Condition::Comparison { field, op, value } => {
            let op = match op {
                CompareOp::Gt => ">",
                CompareOp::Lt => "<",
                CompareOp::Gte => ">=",
                CompareOp::Lte => "<=",
            };
            format!("{field} {op} {}", p.bind(value.clone()))
        }
        Condition::Pattern { field, op, value, case_sensitive } => {
            let like_value = match op {
                PatternOp::Contains => format!("%{value}%"),
                PatternOp::StartsWith => format!("{value}%"),
                PatternOp::EndsWith => format!("%{value}"),
                PatternOp::Matches => value.clone(),
            };
            let operator = match op {
                PatternOp::Matches => "~",
                _ if *case_sensitive => "LIKE",
                _ => "ILIKE",
            };
            format!("{field} {operator} {}", p.bind(Value::String(like_value)))
        }
        Condition::Set { field, op, values } => {
            let placeholder = p.bind_many(values);
            match op {
                SetOp::In => format!("{field} IN ({placeholder})"),
                SetOp::NotIn => format!("{field} NOT IN ({placeholder})"),
            }
        }
        Condition::Null { field, op } => match op {
            NullOp::IsNull => format!("{field} IS NULL"),
            NullOp::IsNotNull => format!("{field} IS NOT NULL"),
        },
        Condition::Composite { op, conditions } => match op {
            CompositeOp::And => {
                let parts: Vec<String> = conditions.iter().map(|c| render_condition(c, p)).collect();
                format!("({})", parts.join(" AND "))
            }
            CompositeOp::Or => {
                let parts: Vec<String> = conditions.iter().map(|c| render_condition(c, p)).collect();
                format!("({})", parts.join(" OR "))
            }
            CompositeOp::Not => format!("NOT ({})", render_condition(&conditions[0], p)),
        },
    }
}
