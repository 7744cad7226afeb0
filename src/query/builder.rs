//! Fluent, immutable [`QueryBuilder`].
//!
//! Every mutator consumes `self` and returns a new `QueryBuilder` by
//! value — there is no way to observe a half-built query through a
//! shared reference, and holding a built [`QueryModel`] is always safe
//! against later builder mutations because `build()` is the only path
//! from builder to model and it never hands back a live reference into
//! the builder's own storage.

use super::*;
use crate::model::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    conditions: Vec<Condition>,
    ordering: Vec<OrderKey>,
    pagination: Option<Pagination>,
    projection: Option<Projection>,
    grouping: Option<Grouping>,
    aggregations: Vec<Aggregation>,
    having: Option<Having>,
    depth: Option<ContextDepth>,
    performance_hints: Option<PerformanceHints>,
    errors: Vec<String>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }

    // ========================================================================
    // where_ family
    // ========================================================================

    /// Generic `where(field, op, value)` — dispatches on the operator
    /// symbol to the appropriate condition variant.
    pub fn where_(mut self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        match op {
            "=" => self.conditions.push(Condition::Equality { field, negate: false, value }),
            "!=" => self.conditions.push(Condition::Equality { field, negate: true, value }),
            ">" => self.conditions.push(Condition::Comparison { field, op: CompareOp::Gt, value }),
            "<" => self.conditions.push(Condition::Comparison { field, op: CompareOp::Lt, value }),
            ">=" => self.conditions.push(Condition::Comparison { field, op: CompareOp::Gte, value }),
            "<=" => self.conditions.push(Condition::Comparison { field, op: CompareOp::Lte, value }),
            other => return self.fail(format!("Unsupported operator: {other}")),
        }
        self
    }

    /// Alias of [`Self::where_`] — spec.md §4.1.
    pub fn and_where(self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        self.where_(field, op, value)
    }

    pub fn where_equal(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equality { field: field.into(), negate: false, value: value.into() });
        self
    }

    pub fn where_not_equal(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Equality { field: field.into(), negate: true, value: value.into() });
        self
    }

    pub fn where_comparison(mut self, field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Comparison { field: field.into(), op, value: value.into() });
        self
    }

    pub fn where_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        if values.is_empty() {
            return self.fail("IN condition requires a non-empty list of values");
        }
        self.conditions.push(Condition::Set { field: field.into(), op: SetOp::In, values });
        self
    }

    pub fn where_not_in(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        if values.is_empty() {
            return self.fail("NOT IN condition requires a non-empty list of values");
        }
        self.conditions.push(Condition::Set { field: field.into(), op: SetOp::NotIn, values });
        self
    }

    pub fn where_null(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(Condition::Null { field: field.into(), op: NullOp::IsNull });
        self
    }

    pub fn where_not_null(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(Condition::Null { field: field.into(), op: NullOp::IsNotNull });
        self
    }

    pub fn where_contains(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.where_pattern(field, PatternOp::Contains, value, true)
    }

    pub fn where_pattern(
        mut self,
        field: impl Into<String>,
        op: PatternOp,
        value: impl Into<String>,
        case_sensitive: bool,
    ) -> Self {
        self.conditions.push(Condition::Pattern {
            field: field.into(),
            op,
            value: value.into(),
            case_sensitive,
        });
        self
    }

    // ========================================================================
    // Composite: and / or / not
    // ========================================================================

    /// Collapse a sub-builder's accumulated top-level conditions into a
    /// single `Condition` — a bare condition if there's exactly one, an
    /// implicit AND composite if there's more than one.
    fn collapse(sub: QueryBuilder) -> std::result::Result<Condition, Vec<String>> {
        if !sub.errors.is_empty() {
            return Err(sub.errors);
        }
        match sub.conditions.len() {
            0 => Err(vec!["sub-condition builder produced no conditions".to_string()]),
            1 => Ok(sub.conditions.into_iter().next().unwrap()),
            _ => Ok(Condition::Composite { op: CompositeOp::And, conditions: sub.conditions }),
        }
    }

    /// `and(|_| [sub-builders])` — requires at least two sub-conditions.
    pub fn and<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Vec<QueryBuilder>,
    {
        let subs = f();
        if subs.len() < 2 {
            return self.fail("AND condition requires at least two sub-conditions");
        }
        let mut conditions = Vec::with_capacity(subs.len());
        for sub in subs {
            match Self::collapse(sub) {
                Ok(c) => conditions.push(c),
                Err(errs) => {
                    self.errors.extend(errs);
                    return self;
                }
            }
        }
        self.conditions.push(Condition::Composite { op: CompositeOp::And, conditions });
        self
    }

    /// `or(|_| [sub-builders])` — requires at least two sub-conditions.
    pub fn or<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> Vec<QueryBuilder>,
    {
        let subs = f();
        if subs.len() < 2 {
            return self.fail("OR condition requires at least two sub-conditions");
        }
        let mut conditions = Vec::with_capacity(subs.len());
        for sub in subs {
            match Self::collapse(sub) {
                Ok(c) => conditions.push(c),
                Err(errs) => {
                    self.errors.extend(errs);
                    return self;
                }
            }
        }
        self.conditions.push(Condition::Composite { op: CompositeOp::Or, conditions });
        self
    }

    /// `not(|_| sub-builder)` — requires exactly one sub-condition.
    pub fn not<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> QueryBuilder,
    {
        let sub = f();
        match Self::collapse(sub) {
            Ok(c) => {
                self.conditions.push(Condition::Composite { op: CompositeOp::Not, conditions: vec![c] });
                self
            }
            Err(errs) => {
                self.errors.extend(errs);
                self
            }
        }
    }

    /// `orWhere(field, op, value)` — spec.md §4.1 & §8 scenario 3.
    ///
    /// If the builder already has ≥1 top-level condition, replaces that
    /// conjunction with a single `or` composite whose left side is the
    /// prior conjunction (wrapped as `and` when there were ≥2 conditions)
    /// and whose right side is the new predicate. Subsequent `orWhere`
    /// calls append into that same `or` composite instead of re-nesting.
    pub fn or_where(mut self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        let new_condition = match op {
            "=" => Condition::Equality { field, negate: false, value },
            "!=" => Condition::Equality { field, negate: true, value },
            ">" => Condition::Comparison { field, op: CompareOp::Gt, value },
            "<" => Condition::Comparison { field, op: CompareOp::Lt, value },
            ">=" => Condition::Comparison { field, op: CompareOp::Gte, value },
            "<=" => Condition::Comparison { field, op: CompareOp::Lte, value },
            other => return self.fail(format!("Unsupported operator: {other}")),
        };

        if self.conditions.is_empty() {
            self.conditions.push(new_condition);
            return self;
        }

        // Already an `or` composite from a previous `orWhere` call — append.
        if self.conditions.len() == 1 {
            if let Condition::Composite { op: CompositeOp::Or, conditions } = &mut self.conditions[0] {
                conditions.push(new_condition);
                return self;
            }
        }

        let prior = if self.conditions.len() == 1 {
            self.conditions.remove(0)
        } else {
            Condition::Composite { op: CompositeOp::And, conditions: std::mem::take(&mut self.conditions) }
        };

        self.conditions = vec![Condition::Composite {
            op: CompositeOp::Or,
            conditions: vec![prior, new_condition],
        }];
        self
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection, nulls: Option<NullsOrder>) -> Self {
        self.ordering.push(OrderKey { field: field.into(), direction, nulls });
        self
    }

    pub fn order_by_asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Asc, None)
    }

    pub fn order_by_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDirection::Desc, None)
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    pub fn limit(mut self, n: i64) -> Self {
        if n < 0 {
            return self.fail("limit must be a non-negative integer");
        }
        let offset = self.pagination.map(|p| p.offset).unwrap_or(0);
        self.pagination = Some(Pagination { limit: n as u64, offset });
        self
    }

    pub fn offset(mut self, n: i64) -> Self {
        if n < 0 {
            return self.fail("offset must be a non-negative integer");
        }
        let limit = self.pagination.map(|p| p.limit).unwrap_or(u64::MAX);
        self.pagination = Some(Pagination { limit, offset: n as u64 });
        self
    }

    // ========================================================================
    // Projection / grouping / aggregation
    // ========================================================================

    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(Projection {
            fields: fields.into_iter().map(Into::into).collect(),
            include_all: false,
        });
        self
    }

    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grouping = Some(Grouping { fields: fields.into_iter().map(Into::into).collect() });
        self
    }

    fn push_aggregation(mut self, kind: AggregationKind, field: Option<String>, alias: Option<String>) -> Self {
        let alias = alias.unwrap_or_else(|| Aggregation::default_alias(kind, field.as_deref()));
        self.aggregations.push(Aggregation { kind, field, alias });
        self
    }

    pub fn count(self, alias: Option<&str>) -> Self {
        self.push_aggregation(AggregationKind::Count, None, alias.map(String::from))
    }

    pub fn count_distinct(self, field: impl Into<String>, alias: Option<&str>) -> Self {
        self.push_aggregation(AggregationKind::CountDistinct, Some(field.into()), alias.map(String::from))
    }

    pub fn sum(self, field: impl Into<String>, alias: Option<&str>) -> Self {
        self.push_aggregation(AggregationKind::Sum, Some(field.into()), alias.map(String::from))
    }

    pub fn avg(self, field: impl Into<String>, alias: Option<&str>) -> Self {
        self.push_aggregation(AggregationKind::Avg, Some(field.into()), alias.map(String::from))
    }

    pub fn min(self, field: impl Into<String>, alias: Option<&str>) -> Self {
        self.push_aggregation(AggregationKind::Min, Some(field.into()), alias.map(String::from))
    }

    pub fn max(self, field: impl Into<String>, alias: Option<&str>) -> Self {
        self.push_aggregation(AggregationKind::Max, Some(field.into()), alias.map(String::from))
    }

    pub fn having(mut self, target: impl Into<String>, op: HavingOp, value: impl Into<Value>) -> Self {
        self.having = Some(Having { target: target.into(), op, value: value.into() });
        self
    }

    // ========================================================================
    // Context depth
    // ========================================================================

    pub fn with_depth(mut self, depth: i64) -> Self {
        match ContextDepth::from_i64(depth) {
            Some(d) => {
                self.performance_hints = Some(d.hints());
                self.depth = Some(d);
            }
            None => return self.fail(format!("Invalid depth value: {depth}")),
        }
        self
    }

    // ========================================================================
    // Build
    // ========================================================================

    pub fn build(self) -> Result<QueryModel> {
        if let Some(msg) = self.errors.into_iter().next() {
            return Err(Error::BuildError(msg));
        }
        Ok(QueryModel {
            conditions: std::sync::Arc::new(self.conditions),
            ordering: std::sync::Arc::new(self.ordering),
            pagination: self.pagination,
            projection: self.projection,
            grouping: self.grouping,
            aggregations: std::sync::Arc::new(self.aggregations),
            having: self.having,
            depth: self.depth,
            performance_hints: self.performance_hints,
        })
    }
}
