//! # Data Model
//!
//! Clean DTOs shared by every boundary: query ↔ predicate ↔ executor ↔
//! graph ↔ user. Pure data — no I/O, no state, no async.

pub mod value;
pub mod row;
pub mod graph;

pub use value::Value;
pub use row::{Row, PropertyMap};
pub use graph::{GraphNode, GraphEdge, GraphPath, Direction};
