//! # Predicate Engine
//!
//! Evaluates a [`Condition`] tree against a single [`Row`], and provides
//! the shared sort/group/aggregate/having machinery the Memory and
//! JSON-file executors both delegate to (spec.md §4.2).

use crate::model::value::{compare_values, values_equal};
use crate::model::{Row, Value};
use crate::query::*;
use crate::{Error, ErrorCode};
use regex::RegexBuilder;
use std::cmp::Ordering;
use std::collections::HashMap;

// ============================================================================
// Condition evaluation
// ============================================================================

/// Evaluate a condition tree against one record. Missing fields behave as
/// `Value::Null` (spec.md §7: null semantics in predicates).
pub fn evaluate(condition: &Condition, row: &Row) -> bool {
    match condition {
        Condition::Equality { field, negate, value } => {
            let actual = row.get(field).unwrap_or(&Value::Null);
            let eq = values_equal(actual, value);
            if *negate { !eq && !actual.is_null() } else { eq }
        }
        Condition::Comparison { field, op, value } => {
            let actual = row.get(field).unwrap_or(&Value::Null);
            match compare_values(actual, value) {
                None => false,
                Some(ord) => match op {
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Gte => ord != Ordering::Less,
                    CompareOp::Lte => ord != Ordering::Greater,
                },
            }
        }
        Condition::Pattern { field, op, value, case_sensitive } => {
            let actual = row.get(field).and_then(|v| v.as_str()).unwrap_or("");
            eval_pattern(actual, *op, value, *case_sensitive)
        }
        Condition::Set { field, op, values } => {
            let actual = row.get(field).unwrap_or(&Value::Null);
            let found = values.iter().any(|v| values_equal(actual, v));
            match op {
                SetOp::In => found,
                SetOp::NotIn => !found && !actual.is_null(),
            }
        }
        Condition::Null { field, op } => {
            let is_null = row.get(field).map(|v| v.is_null()).unwrap_or(true);
            match op {
                NullOp::IsNull => is_null,
                NullOp::IsNotNull => !is_null,
            }
        }
        Condition::Composite { op, conditions } => match op {
            CompositeOp::And => conditions.iter().all(|c| evaluate(c, row)),
            CompositeOp::Or => conditions.iter().any(|c| evaluate(c, row)),
            CompositeOp::Not => !evaluate(&conditions[0], row),
        },
    }
}

fn eval_pattern(actual: &str, op: PatternOp, needle: &str, case_sensitive: bool) -> bool {
    if op == PatternOp::Matches {
        return RegexBuilder::new(needle)
            .case_insensitive(!case_sensitive)
            .build()
            .map(|re| re.is_match(actual))
            .unwrap_or(false);
    }

    let (a, n) = if case_sensitive {
        (actual.to_string(), needle.to_string())
    } else {
        (actual.to_lowercase(), needle.to_lowercase())
    };

    match op {
        PatternOp::Contains => a.contains(&n),
        PatternOp::StartsWith => a.starts_with(&n),
        PatternOp::EndsWith => a.ends_with(&n),
        PatternOp::Matches => unreachable!("handled above"),
    }
}

/// AND conjunction of a full top-level condition list (QueryModel's
/// `conditions` field is conjoined at the top level — spec.md §3).
pub fn evaluate_all(conditions: &[Condition], row: &Row) -> bool {
    conditions.iter().all(|c| evaluate(c, row))
}

// ============================================================================
// Stable multi-key sort
// ============================================================================

/// Stable multi-key comparator. Equal keys across all order keys preserve
/// input order because the sort itself is stable and ties are returned
/// as `Equal` — spec.md §4.2, §8 (sort stability) and scenario 1.
pub fn compare_rows(a: &Row, b: &Row, ordering: &[OrderKey]) -> Ordering {
    for key in ordering {
        let av = a.get(&key.field).unwrap_or(&Value::Null);
        let bv = b.get(&key.field).unwrap_or(&Value::Null);

        let ord = match (av.is_null(), bv.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => null_ordering(key, true),
            (false, true) => null_ordering(key, false),
            (false, false) => compare_values(av, bv).unwrap_or(Ordering::Equal),
        };

        let ord = if key.direction == SortDirection::Desc && !av.is_null() && !bv.is_null() {
            ord.reverse()
        } else {
            ord
        };

        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// `a_is_null` tells us which side of the comparison is the null one.
/// Default (no explicit `nulls` setting): "last for asc, first for desc".
fn null_ordering(key: &OrderKey, a_is_null: bool) -> Ordering {
    let nulls_first = match key.nulls {
        Some(NullsOrder::First) => true,
        Some(NullsOrder::Last) => false,
        None => key.direction == SortDirection::Desc,
    };
    let a_before_b = if nulls_first { a_is_null } else { !a_is_null };
    if a_before_b { Ordering::Less } else { Ordering::Greater }
}

/// Sort rows in place by a stable multi-key comparator (input order is
/// the tiebreaker — `Vec::sort_by` is stable, which is exactly why it's
/// used here rather than `sort_unstable_by`).
pub fn sort_rows(rows: &mut [Row], ordering: &[OrderKey]) {
    rows.sort_by(|a, b| compare_rows(a, b, ordering));
}

// ============================================================================
// Grouping & aggregation
// ============================================================================

/// Partition `rows` by the tuple of `group_fields`, preserving the order
/// in which each distinct group key is first seen.
fn partition(rows: &[Row], group_fields: &[String]) -> Vec<(Vec<Value>, Vec<&Row>)> {
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: HashMap<Vec<String>, Vec<&Row>> = HashMap::new();

    for row in rows {
        let key: Vec<Value> = group_fields.iter().map(|f| row.get(f).cloned().unwrap_or(Value::Null)).collect();
        let key_str: Vec<String> = key.iter().map(|v| v.to_string()).collect();
        if !groups.contains_key(&key_str) {
            order.push(key.clone());
        }
        groups.entry(key_str).or_default().push(row);
    }

    order
        .into_iter()
        .map(|key| {
            let key_str: Vec<String> = key.iter().map(|v| v.to_string()).collect();
            let members = groups.remove(&key_str).unwrap_or_default();
            (key, members)
        })
        .collect()
}

/// Apply grouping + aggregation to already-filtered, already-sorted rows.
/// Empty `aggregations` with no grouping is a pass-through of the raw
/// rows (spec.md §3 invariant 6); aggregations with no grouping produce
/// exactly one summary row.
pub fn group_and_aggregate(
    rows: Vec<Row>,
    grouping: Option<&Grouping>,
    aggregations: &[Aggregation],
) -> std::result::Result<Vec<Row>, Error> {
    if aggregations.is_empty() && grouping.is_none() {
        return Ok(rows);
    }

    let group_fields: Vec<String> = grouping.map(|g| g.fields.clone()).unwrap_or_default();
    let groups = partition(&rows, &group_fields);

    // No GROUP BY but aggregations present: treat the whole set as one group.
    let groups: Vec<(Vec<Value>, Vec<&Row>)> = if group_fields.is_empty() {
        vec![(Vec::new(), rows.iter().collect())]
    } else {
        groups
    };

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut out_row = Row::new();
        for (field, value) in group_fields.iter().zip(key.iter()) {
            out_row.insert(field.clone(), value.clone());
        }
        for agg in aggregations {
            let value = compute_aggregation(agg, &members)?;
            out_row.insert(agg.alias.clone(), value);
        }
        out.push(out_row);
    }
    Ok(out)
}

fn compute_aggregation(agg: &Aggregation, members: &[&Row]) -> std::result::Result<Value, Error> {
    match agg.kind {
        AggregationKind::Count => Ok(Value::from(members.len() as i64)),
        AggregationKind::CountDistinct => {
            let field = agg.field.as_deref().unwrap_or_default();
            let mut seen: Vec<String> = Vec::new();
            for m in members {
                if let Some(v) = m.get(field) {
                    if !v.is_null() {
                        let s = v.to_string();
                        if !seen.contains(&s) {
                            seen.push(s);
                        }
                    }
                }
            }
            Ok(Value::from(seen.len() as i64))
        }
        AggregationKind::Sum => {
            let field = agg.field.as_deref().unwrap_or_default();
            let mut total = 0.0;
            for m in members {
                if let Some(v) = m.get(field) {
                    if v.is_null() {
                        continue;
                    }
                    match v.as_f64() {
                        Some(n) => total += n,
                        None => return type_mismatch(field),
                    }
                }
            }
            Ok(numeric_value(total))
        }
        AggregationKind::Avg => {
            let field = agg.field.as_deref().unwrap_or_default();
            let mut total = 0.0;
            let mut count = 0u64;
            for m in members {
                if let Some(v) = m.get(field) {
                    if v.is_null() {
                        continue;
                    }
                    match v.as_f64() {
                        Some(n) => {
                            total += n;
                            count += 1;
                        }
                        None => return type_mismatch(field),
                    }
                }
            }
            if count == 0 {
                Ok(Value::Null)
            } else {
                Ok(numeric_value(total / count as f64))
            }
        }
        AggregationKind::Min | AggregationKind::Max => {
            let field = agg.field.as_deref().unwrap_or_default();
            let mut best: Option<&Value> = None;
            for m in members {
                if let Some(v) = m.get(field) {
                    if v.is_null() {
                        continue;
                    }
                    best = Some(match best {
                        None => v,
                        Some(b) => match compare_values(v, b) {
                            Some(Ordering::Less) if agg.kind == AggregationKind::Min => v,
                            Some(Ordering::Greater) if agg.kind == AggregationKind::Max => v,
                            _ => b,
                        },
                    });
                }
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
    }
}

fn numeric_value(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn type_mismatch(field: &str) -> std::result::Result<Value, Error> {
    Err(Error::BuildError(format!("TYPE_MISMATCH: field '{field}' is not numeric")))
}

/// A marker so callers can distinguish a genuine build/programmer error
/// from a `TYPE_MISMATCH` that belongs in the result envelope rather than
/// propagating — see `executor::memory` and `executor::json` for how
/// this is caught and turned into `ErrorCode::TypeMismatch`.
pub fn is_type_mismatch(err: &Error) -> bool {
    matches!(err, Error::BuildError(msg) if msg.starts_with("TYPE_MISMATCH"))
}

pub const TYPE_MISMATCH_CODE: ErrorCode = ErrorCode::TypeMismatch;

// ============================================================================
// HAVING
// ============================================================================

/// Apply a post-grouping predicate referencing a group-key field or an
/// aggregation alias (spec.md §4.2).
pub fn apply_having(rows: Vec<Row>, having: Option<&Having>) -> Vec<Row> {
    let Some(having) = having else { return rows };
    rows.into_iter()
        .filter(|row| {
            let actual = row.get(&having.target).unwrap_or(&Value::Null);
            match compare_values(actual, &having.value) {
                None => matches!(having.op, HavingOp::Ne) && !actual.is_null() && !having.value.is_null(),
                Some(ord) => match having.op {
                    HavingOp::Eq => ord == Ordering::Equal,
                    HavingOp::Ne => ord != Ordering::Equal,
                    HavingOp::Gt => ord == Ordering::Greater,
                    HavingOp::Lt => ord == Ordering::Less,
                    HavingOp::Gte => ord != Ordering::Less,
                    HavingOp::Lte => ord != Ordering::Greater,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn equality_and_negation() {
        let r = row(&[("active", json!(true))]);
        assert!(evaluate(&Condition::Equality { field: "active".into(), negate: false, value: json!(true) }, &r));
        assert!(!evaluate(&Condition::Equality { field: "active".into(), negate: true, value: json!(true) }, &r));
    }

    #[test]
    fn null_field_fails_comparisons() {
        let r = row(&[]);
        assert!(!evaluate(&Condition::Comparison { field: "age".into(), op: CompareOp::Gt, value: json!(18) }, &r));
    }

    #[test]
    fn pattern_case_insensitive() {
        let r = row(&[("name", json!("Alice"))]);
        assert!(evaluate(
            &Condition::Pattern { field: "name".into(), op: PatternOp::Contains, value: "ALICE".into(), case_sensitive: false },
            &r
        ));
        assert!(!evaluate(
            &Condition::Pattern { field: "name".into(), op: PatternOp::Contains, value: "ALICE".into(), case_sensitive: true },
            &r
        ));
    }

    #[test]
    fn is_null_matches_missing_and_explicit_null() {
        let r1 = row(&[]);
        let r2 = row(&[("x", Value::Null)]);
        let cond = Condition::Null { field: "x".into(), op: NullOp::IsNull };
        assert!(evaluate(&cond, &r1));
        assert!(evaluate(&cond, &r2));
    }

    /// spec.md §8 scenario 1.
    #[test]
    fn multi_field_sort_is_stable() {
        let mut rows = vec![
            row(&[("name", json!("Alice")), ("age", json!(30)), ("dept", json!("Eng"))]),
            row(&[("name", json!("Bob")), ("age", json!(25)), ("dept", json!("Eng"))]),
            row(&[("name", json!("Charlie")), ("age", json!(35)), ("dept", json!("Mkt"))]),
            row(&[("name", json!("Diana")), ("age", json!(30)), ("dept", json!("Eng"))]),
            row(&[("name", json!("Eve")), ("age", json!(25)), ("dept", json!("Mkt"))]),
            row(&[("name", json!("Frank")), ("age", json!(35)), ("dept", json!("Eng"))]),
        ];
        let ordering = vec![
            OrderKey { field: "dept".into(), direction: SortDirection::Asc, nulls: None },
            OrderKey { field: "age".into(), direction: SortDirection::Desc, nulls: None },
        ];
        sort_rows(&mut rows, &ordering);
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["Frank", "Alice", "Diana", "Bob", "Charlie", "Eve"]);
    }

    /// spec.md §8 scenario 2.
    #[test]
    fn grouped_aggregation_with_having() {
        let rows = vec![
            row(&[("dept", json!("Engineering")), ("salary", json!(75000))]),
            row(&[("dept", json!("Engineering")), ("salary", json!(70000))]),
            row(&[("dept", json!("Engineering")), ("salary", json!(85000))]),
            row(&[("dept", json!("Engineering")), ("salary", json!(90000))]),
        ];
        let grouping = Grouping { fields: vec!["dept".into()] };
        let aggs = vec![
            Aggregation { kind: AggregationKind::Count, field: None, alias: "employee_count".into() },
            Aggregation { kind: AggregationKind::Avg, field: Some("salary".into()), alias: "avg_salary".into() },
        ];
        let grouped = group_and_aggregate(rows, Some(&grouping), &aggs).unwrap();
        let having = Having { target: "employee_count".into(), op: HavingOp::Gt, value: json!(2) };
        let result = apply_having(grouped, Some(&having));

        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["employee_count"], json!(4));
        assert_eq!(result[0]["avg_salary"], json!(80000.0));
    }

    #[test]
    fn sum_over_empty_is_zero_avg_is_null() {
        let aggs_sum = Aggregation { kind: AggregationKind::Sum, field: Some("x".into()), alias: "s".into() };
        let aggs_avg = Aggregation { kind: AggregationKind::Avg, field: Some("x".into()), alias: "a".into() };
        assert_eq!(compute_aggregation(&aggs_sum, &[]).unwrap(), json!(0.0));
        assert_eq!(compute_aggregation(&aggs_avg, &[]).unwrap(), Value::Null);
    }

    #[test]
    fn sum_on_non_numeric_is_type_mismatch() {
        let r = row(&[("x", json!("not a number"))]);
        let agg = Aggregation { kind: AggregationKind::Sum, field: Some("x".into()), alias: "s".into() };
        let err = compute_aggregation(&agg, &[&r]).unwrap_err();
        assert!(is_type_mismatch(&err));
    }
}
