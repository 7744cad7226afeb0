//! `Row` / `PropertyMap` — the record shape shared by every executor and
//! by node/edge property bags.

use std::collections::HashMap;
use super::Value;

/// A single record: field name to dynamic value. This is what the
/// Predicate Engine evaluates conditions against and what executors
/// return as `data` rows.
pub type Row = HashMap<String, Value>;

/// Alias used in the graph/vector store where the same shape holds
/// node and edge properties (mirrors the teacher's `PropertyMap`).
pub type PropertyMap = HashMap<String, Value>;

pub fn row_get<'a>(row: &'a Row, field: &str) -> Option<&'a Value> {
    row.get(field)
}
