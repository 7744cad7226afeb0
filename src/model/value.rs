//! Dynamic value type for property bags and query rows.
//!
//! Per the design notes, property bags (node/edge/row properties) are a
//! JSON-value union with explicit null handling rather than a bespoke
//! enum — aggregation and comparison operate on typed projections of this
//! union with explicit `TYPE_MISMATCH` failure instead of silent coercion.

use std::cmp::Ordering;

/// A dynamically typed value: null, bool, number, string, list, or map.
///
/// This is `serde_json::Value` under the hood so it serializes directly
/// to/from JSON file rows and JSONB columns without a translation layer.
pub type Value = serde_json::Value;

/// True if `v` is numeric (an integer or float JSON number).
pub fn is_numeric(v: &Value) -> bool {
    v.is_number()
}

/// True if `v` is `Value::Null` or JSON's absence-of-a-field sentinel.
pub fn is_null(v: &Value) -> bool {
    v.is_null()
}

pub fn as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

pub fn as_str(v: &Value) -> Option<&str> {
    v.as_str()
}

/// Three-valued-collapsed-to-two-valued ordering used by `comparison` and
/// `equality` conditions and by `ORDER BY`. Returns `None` when either side
/// is null or the two sides are not comparable (distinct non-numeric
/// types) — callers treat `None` as "condition is false" for predicates,
/// and as an explicit null-sort-position for ordering.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => None,
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(x), Value::Bool(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(_), Value::Number(_)) => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            x.partial_cmp(&y)
        }
        _ => None,
    }
}

/// Equality under the same rules as [`compare_values`], but `a == b` for
/// two nulls is also false (SQL/Neo4j "NULL = NULL is unknown" collapsed
/// to `false`) — per spec.md §7, null comparisons evaluate to false.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    compare_values(a, b) == Some(Ordering::Equal)
}
