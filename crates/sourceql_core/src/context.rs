//! Execution context handed to every query run.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::{Result, eval_err};
use crate::scalar::{ContextHandle, ScalarValue};

/// Runtime values visible to a single query execution.
///
/// Query templates reference the context through a placeholder node. Before
/// a filter is sent to a data source the placeholder is replaced with a
/// handle to the concrete context, and member accesses on it are resolved
/// through [`ExecutionContext::member`].
pub trait ExecutionContext: Send + Sync + Debug {
    /// Resolve a named member of the context.
    fn member(&self, name: &str) -> Result<ScalarValue>;
}

/// Produce the handle that replaces context placeholders.
pub fn context_handle(context: &Arc<dyn ExecutionContext>) -> ContextHandle {
    ContextHandle::new(context.clone())
}

/// Execution context backed by a fixed set of named values.
#[derive(Debug, Clone, Default)]
pub struct StaticExecutionContext {
    /// Keys are stored lower cased.
    values: BTreeMap<String, ScalarValue>,
}

impl StaticExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, name: impl AsRef<str>, value: impl Into<ScalarValue>) -> Self {
        self.values
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn into_arc(self) -> Arc<dyn ExecutionContext> {
        Arc::new(self)
    }
}

impl ExecutionContext for StaticExecutionContext {
    fn member(&self, name: &str) -> Result<ScalarValue> {
        self.values
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| eval_err!("Execution context has no member '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_context_lookup() {
        let ctx = StaticExecutionContext::new().with_value("Region", "eu");
        assert_eq!(ScalarValue::from("eu"), ctx.member("region").unwrap());
        assert!(ctx.member("missing").is_err());
    }

    #[test]
    fn handles_compare_by_identity() {
        let a = StaticExecutionContext::new().into_arc();
        let b = StaticExecutionContext::new().into_arc();
        assert_eq!(context_handle(&a), context_handle(&a));
        assert_ne!(context_handle(&a), context_handle(&b));
    }
}
