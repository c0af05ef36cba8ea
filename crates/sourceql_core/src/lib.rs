//! Query core for SourceQL.
//!
//! Statements are normalized by the optimizer, split into per-source
//! queries by the planner, and executed as lazy row sequences. The scheduler
//! re-runs prepared statements from interval and after-job triggers.

pub mod ast;
pub mod config;
pub mod context;
pub mod datasource;
pub mod engine;
pub mod errors;
pub mod eval;
pub mod functions;
pub mod optimizer;
pub mod planner;
pub mod row;
pub mod scalar;
pub mod scheduler;
pub mod stream;
pub mod trigger;
