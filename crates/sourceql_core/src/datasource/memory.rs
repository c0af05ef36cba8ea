use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{DataSource, DataTarget};
use crate::ast::query::OrderByTerm;
use crate::ast::{FieldRef, Node};
use crate::context::ExecutionContext;
use crate::errors::{Result, SourceQlError};
use crate::eval::Evaluator;
use crate::planner::multi_part::MultiPartQuery;
use crate::row::Row;
use crate::scalar::ScalarValue;
use crate::stream::RowSequence;

const DEFAULT_BUFFER: usize = 16;

/// Data source serving a fixed set of rows.
///
/// Rows are produced from a spawned task through a bounded channel.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    rows: Arc<Vec<Row>>,
    filter_pushdown: bool,
    order_pushdown: bool,
    buffer: usize,
    evaluator: Evaluator,
    /// Every query this source was scanned with, most recent last.
    scans: Mutex<Vec<Arc<MultiPartQuery>>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, rows: Vec<Row>) -> Self {
        MemorySource {
            name: name.into(),
            rows: Arc::new(rows),
            filter_pushdown: true,
            order_pushdown: true,
            buffer: DEFAULT_BUFFER,
            evaluator: Evaluator::default(),
            scans: Mutex::new(Vec::new()),
        }
    }

    /// Build a source from `(column, value)` rows.
    pub fn from_records<I, R, S, V>(name: impl Into<String>, records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<ScalarValue>,
    {
        let rows = records
            .into_iter()
            .map(|record| {
                Row::new(
                    record
                        .into_iter()
                        .map(|(name, value)| (FieldRef::bare(name), value.into()))
                        .collect(),
                )
            })
            .collect();
        Self::new(name, rows)
    }

    pub fn without_filter_pushdown(mut self) -> Self {
        self.filter_pushdown = false;
        self
    }

    pub fn without_order_pushdown(mut self) -> Self {
        self.order_pushdown = false;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn last_scan(&self) -> Option<Arc<MultiPartQuery>> {
        self.scans.lock().last().cloned()
    }

    pub fn scan_count(&self) -> usize {
        self.scans.lock().len()
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn known_fields(&self) -> Option<Vec<String>> {
        let mut fields: Vec<String> = Vec::new();
        for row in self.rows.iter() {
            for (field, _) in &row.columns {
                if !fields.iter().any(|f| f.eq_ignore_ascii_case(&field.name)) {
                    fields.push(field.name.clone());
                }
            }
        }
        Some(fields)
    }

    fn supports_filter(&self, filter: &Node) -> bool {
        self.filter_pushdown && !filter.contains_context()
    }

    fn can_order_by(&self, term: &OrderByTerm) -> bool {
        self.order_pushdown && matches!(term.expr.as_ref(), Node::Field(_))
    }

    async fn scan(
        &self,
        _args: &[ScalarValue],
        query: Arc<MultiPartQuery>,
        _context: Arc<dyn ExecutionContext>,
    ) -> Result<RowSequence<Row>> {
        debug!(source = %self.name, %query, "scanning memory source");
        self.scans.lock().push(query.clone());

        let (mut sender, rows_seq) = RowSequence::channel(self.buffer);
        let rows = self.rows.clone();
        let filter = query.filter().cloned();
        let evaluator = self.evaluator.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            for row in rows.iter() {
                let keep = match &filter {
                    Some(filter) => match evaluator.evaluate_predicate(filter, row) {
                        Ok(keep) => keep,
                        Err(e) => {
                            let _ = sender
                                .fail(SourceQlError::source_failure(&name, e.to_string()))
                                .await;
                            return;
                        }
                    },
                    None => true,
                };
                if keep && sender.send(row.clone()).await.is_err() {
                    trace!(source = %name, "consumer went away, stopping producer");
                    return;
                }
            }
        });

        let mut seq = rows_seq;
        if !query.order_by().is_empty() {
            seq = seq.order_rows(self.evaluator.clone(), query.order_by().to_vec());
        }
        if let Some(count) = query.count() {
            seq = seq.take(usize::try_from(count).unwrap_or(usize::MAX));
        }
        if !query.is_wildcard() {
            let fields: Vec<String> = query.fields().iter().cloned().collect();
            seq = seq.map(move |row| Ok(row.retain_names(&fields)));
        }

        Ok(seq)
    }
}

/// Write target collecting rows in memory.
#[derive(Debug)]
pub struct MemoryTarget {
    name: String,
    rows: Mutex<Vec<Row>>,
}

impl MemoryTarget {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryTarget {
            name: name.into(),
            rows: Mutex::new(Vec::new()),
        }
    }

    /// All rows written so far.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl DataTarget for MemoryTarget {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(
        &self,
        _args: &[ScalarValue],
        rows: RowSequence<Row>,
        _context: Arc<dyn ExecutionContext>,
    ) -> Result<u64> {
        let rows = rows.materialize().await?;
        let count = rows.len() as u64;
        self.rows.lock().extend(rows);
        debug!(target = %self.name, count, "wrote rows to memory target");
        Ok(count)
    }
}
