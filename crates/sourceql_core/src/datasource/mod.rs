//! Contracts for pluggable data sources and write targets.

pub mod memory;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::ast::Node;
use crate::ast::query::OrderByTerm;
use crate::context::ExecutionContext;
use crate::errors::{Result, plan_err};
use crate::planner::multi_part::MultiPartQuery;
use crate::row::Row;
use crate::scalar::ScalarValue;
use crate::stream::RowSequence;

/// A source of rows, referenced in queries as `name(args...) alias`.
#[async_trait]
pub trait DataSource: Debug + Sync + Send {
    fn name(&self) -> &str;

    /// Field names this source is known to produce, used to resolve
    /// unqualified field references in queries over multiple sources.
    fn known_fields(&self) -> Option<Vec<String>> {
        None
    }

    /// If this source can apply `filter` itself.
    ///
    /// Filters the source cannot handle are applied on top of the rows it
    /// returns.
    fn supports_filter(&self, _filter: &Node) -> bool {
        false
    }

    /// If this source can return rows ordered by `term`.
    fn can_order_by(&self, _term: &OrderByTerm) -> bool {
        false
    }

    /// Produce the rows for one execution.
    ///
    /// The returned rows must contain at least the fields named by `query`,
    /// or every field when the query is a wildcard query. Pushed filters, order
    /// and count must be applied as accepted above.
    async fn scan(
        &self,
        args: &[ScalarValue],
        query: Arc<MultiPartQuery>,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<RowSequence<Row>>;
}

/// Destination for rows written by INSERT statements.
#[async_trait]
pub trait DataTarget: Debug + Sync + Send {
    fn name(&self) -> &str;

    /// Write all rows from a sequence, returning the number of rows written.
    async fn write(
        &self,
        args: &[ScalarValue],
        rows: RowSequence<Row>,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<u64>;
}

/// Data sources and targets keyed by case insensitive name.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
    targets: HashMap<String, Arc<dyn DataTarget>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, source: Arc<dyn DataSource>) {
        self.sources
            .insert(source.name().to_ascii_lowercase(), source);
    }

    pub fn register_target(&mut self, target: Arc<dyn DataTarget>) {
        self.targets
            .insert(target.name().to_ascii_lowercase(), target);
    }

    pub fn with_source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.register_source(source);
        self
    }

    pub fn with_target(mut self, target: Arc<dyn DataTarget>) -> Self {
        self.register_target(target);
        self
    }

    pub fn source(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.sources
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| plan_err!("Unknown data source '{name}'"))
    }

    pub fn target(&self, name: &str) -> Result<Arc<dyn DataTarget>> {
        self.targets
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| plan_err!("Unknown data target '{name}'"))
    }
}
