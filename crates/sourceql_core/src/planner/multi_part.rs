use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::ast::NodeRef;
use crate::ast::query::OrderByTerm;

/// The part of a query handed to a single source.
///
/// Instances are immutable. The `replace_*` methods return a new query with
/// exactly one part changed, or the same `Arc` when the replacement is equal
/// to the current value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiPartQuery {
    fields: BTreeSet<String>,
    filter: Option<NodeRef>,
    order_by: Vec<OrderByTerm>,
    count: Option<u64>,
    wildcard_aliases: BTreeSet<String>,
}

impl MultiPartQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_wildcard_alias(mut self, alias: impl Into<String>) -> Self {
        self.wildcard_aliases.insert(alias.into());
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Field names the source must produce.
    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    pub fn filter(&self) -> Option<&NodeRef> {
        self.filter.as_ref()
    }

    pub fn order_by(&self) -> &[OrderByTerm] {
        &self.order_by
    }

    /// Maximum number of rows the source needs to produce.
    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn wildcard_aliases(&self) -> &BTreeSet<String> {
        &self.wildcard_aliases
    }

    /// If the source must produce all of its fields.
    pub fn is_wildcard(&self) -> bool {
        !self.wildcard_aliases.is_empty()
    }

    pub fn replace_filter(self: &Arc<Self>, filter: Option<NodeRef>) -> Arc<Self> {
        if self.filter == filter {
            return self.clone();
        }
        Arc::new(MultiPartQuery {
            filter,
            ..self.as_ref().clone()
        })
    }

    pub fn replace_order_by(self: &Arc<Self>, order_by: Vec<OrderByTerm>) -> Arc<Self> {
        if self.order_by == order_by {
            return self.clone();
        }
        Arc::new(MultiPartQuery {
            order_by,
            ..self.as_ref().clone()
        })
    }

    pub fn replace_fields(self: &Arc<Self>, fields: BTreeSet<String>) -> Arc<Self> {
        if self.fields == fields {
            return self.clone();
        }
        Arc::new(MultiPartQuery {
            fields,
            ..self.as_ref().clone()
        })
    }

    pub fn replace_count(self: &Arc<Self>, count: Option<u64>) -> Arc<Self> {
        if self.count == count {
            return self.clone();
        }
        Arc::new(MultiPartQuery {
            count,
            ..self.as_ref().clone()
        })
    }
}

impl fmt::Display for MultiPartQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fields=[")?;
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")?;
        if !self.wildcard_aliases.is_empty() {
            write!(f, " wildcard=[")?;
            for (idx, alias) in self.wildcard_aliases.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{alias}")?;
            }
            write!(f, "]")?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " filter={filter}")?;
        }
        if !self.order_by.is_empty() {
            write!(f, " order_by=[")?;
            for (idx, term) in self.order_by.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{term}")?;
            }
            write!(f, "]")?;
        }
        if let Some(count) = self.count {
            write!(f, " count={count}")?;
        }
        Ok(())
    }
}
