//! Expression rewrites applied before execution.

pub mod pattern;
pub mod simplify;

use std::sync::Arc;

use pattern::bind_execution_context;
use simplify::Simplifier;
use tracing::debug;

use crate::ast::{Node, NodeRef};
use crate::ast::query::{SelectQuery, Statement};
use crate::ast::visitor::{NodeVisitor, PostOrderRewriter, Transformed};
use crate::context::ExecutionContext;
use crate::errors::Result;
use crate::eval::Evaluator;

/// Applies the expression rewrites enabled by configuration.
#[derive(Debug, Clone)]
pub struct ExpressionOptimizer {
    simplify: bool,
    evaluator: Evaluator,
}

impl Default for ExpressionOptimizer {
    fn default() -> Self {
        Self::new(true, Evaluator::default())
    }
}

impl ExpressionOptimizer {
    pub fn new(simplify: bool, evaluator: Evaluator) -> Self {
        ExpressionOptimizer {
            simplify,
            evaluator,
        }
    }

    fn simplifier(&self) -> Simplifier {
        Simplifier::new(self.evaluator.clone())
    }

    /// Normalize a statement before planning.
    ///
    /// Context placeholders are left in place, the statement stays reusable
    /// across executions.
    pub fn optimize_statement(&self, statement: &Statement) -> Result<Transformed<Statement>> {
        if !self.simplify {
            return Ok(Transformed::no(statement.clone()));
        }
        let out = statement.rewrite_expressions(&mut self.simplifier())?;
        if out.changed {
            debug!(before = %statement, after = %out.data, "simplified statement");
        }
        Ok(out)
    }

    /// Bind the execution context into an expression.
    ///
    /// With simplification enabled the bound expression is fully simplified.
    /// Otherwise only member and index access on constants is folded, which
    /// is enough to resolve lookups on the bound context.
    pub fn bind(
        &self,
        node: &NodeRef,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<Transformed<NodeRef>> {
        let bound = bind_execution_context(node, context)?;
        if !bound.changed {
            return Ok(bound);
        }
        let resolved = if self.simplify {
            self.simplifier().simplify(&bound.data)?
        } else {
            self.fold_lookups(&bound.data)?
        };
        Ok(Transformed::yes(resolved.data))
    }

    fn fold_lookups(&self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        let mut rewriter = PostOrderRewriter::new(|node: &NodeRef| {
            let foldable = match node.as_ref() {
                Node::Member(member) => member.target.is_constant(),
                Node::Index(index) => {
                    index.target.is_constant() && index.args.iter().all(|arg| arg.is_constant())
                }
                _ => false,
            };
            if !foldable {
                return Ok(None);
            }
            let value = self.evaluator.evaluate_constant(node)?;
            Ok(Some(Node::Constant(value).into_ref()))
        });
        rewriter.visit(node)
    }

    /// Bind the execution context into every expression of a query.
    pub fn bind_query(
        &self,
        query: &SelectQuery,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<Transformed<SelectQuery>> {
        query.rewrite_expressions(&mut BindVisitor {
            optimizer: self,
            context,
        })
    }
}

struct BindVisitor<'a> {
    optimizer: &'a ExpressionOptimizer,
    context: &'a Arc<dyn ExecutionContext>,
}

impl NodeVisitor for BindVisitor<'_> {
    fn visit(&mut self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        self.optimizer.bind(node, self.context)
    }
}
