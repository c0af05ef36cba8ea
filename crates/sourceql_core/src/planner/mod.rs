//! Decomposition of queries over multiple sources into per-source queries.

pub mod multi_part;
pub mod pushdown;
pub mod split;
