use std::sync::Arc;

use crate::ast::query::Statement;
use crate::ast::visitor::{NodeVisitor, Transformed, dispatch};
use crate::ast::{Node, NodeRef};
use crate::context::{ExecutionContext, context_handle};
use crate::errors::Result;
use crate::scalar::ScalarValue;

/// Replaces every node matching a predicate with the output of a replacement
/// function.
///
/// Matching nodes are replaced whole, their children are not visited. All
/// other nodes are rebuilt only when something below them was replaced, so the
/// input tree can be shared as a template across executions.
pub struct PatternRewriter<P, R> {
    predicate: P,
    replacement: R,
}

impl<P, R> PatternRewriter<P, R>
where
    P: Fn(&Node) -> bool,
    R: FnMut(&NodeRef) -> Result<NodeRef>,
{
    pub fn new(predicate: P, replacement: R) -> Self {
        PatternRewriter {
            predicate,
            replacement,
        }
    }
}

impl<P, R> NodeVisitor for PatternRewriter<P, R>
where
    P: Fn(&Node) -> bool,
    R: FnMut(&NodeRef) -> Result<NodeRef>,
{
    fn visit(&mut self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        if (self.predicate)(node.as_ref()) {
            let replaced = (self.replacement)(node)?;
            return Ok(Transformed::new_node(node, replaced));
        }
        // Default handlers rewrite children through `visit`.
        dispatch(self, node)
    }
}

fn context_binder(
    context: &Arc<dyn ExecutionContext>,
) -> PatternRewriter<impl Fn(&Node) -> bool, impl FnMut(&NodeRef) -> Result<NodeRef>> {
    let bound = Node::Constant(ScalarValue::Context(context_handle(context))).into_ref();
    PatternRewriter::new(
        |node: &Node| matches!(node, Node::Context),
        move |_: &NodeRef| Ok(bound.clone()),
    )
}

/// Replace every execution context placeholder with a constant holding
/// `context`.
pub fn bind_execution_context(
    node: &NodeRef,
    context: &Arc<dyn ExecutionContext>,
) -> Result<Transformed<NodeRef>> {
    context_binder(context).visit(node)
}

/// Bind the execution context into every expression of a statement.
pub fn bind_statement_context(
    statement: &Statement,
    context: &Arc<dyn ExecutionContext>,
) -> Result<Transformed<Statement>> {
    statement.rewrite_expressions(&mut context_binder(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::query::{SelectItem, SelectQuery, SourceRef};
    use crate::ast::{add, and, context, eq, field, lit, member, qualified};
    use crate::context::StaticExecutionContext;
    use crate::optimizer::simplify::Simplifier;

    #[test]
    fn replaces_matching_nodes() {
        let expr = add(field("a"), add(field("b"), lit(1)));
        let mut rewriter = PatternRewriter::new(
            |node: &Node| matches!(node, Node::Field(f) if f.name == "b"),
            |_: &NodeRef| Ok(lit(2)),
        );
        let out = rewriter.visit(&expr).unwrap();
        assert!(out.changed);
        assert_eq!(add(field("a"), add(lit(2), lit(1))), out.data);
        // Untouched sibling is shared.
        assert!(Arc::ptr_eq(expr.children()[0], out.data.children()[0]));
    }

    #[test]
    fn no_match_returns_same_reference() {
        let expr = and(field("a"), field("b"));
        let mut rewriter = PatternRewriter::new(|_: &Node| false, |n: &NodeRef| Ok(n.clone()));
        let out = rewriter.visit(&expr).unwrap();
        assert!(!out.changed);
        assert!(Arc::ptr_eq(&expr, &out.data));
    }

    #[test]
    fn bind_then_simplify_resolves_context_members() {
        let template = eq(qualified("o", "region"), member(context(), "region"));
        let ctx = StaticExecutionContext::new()
            .with_value("region", "emea")
            .into_arc();

        let bound = bind_execution_context(&template, &ctx).unwrap();
        assert!(bound.changed);
        assert!(!bound.data.contains_context());
        // Template is left as is.
        assert!(template.contains_context());

        let simplified = Simplifier::default().simplify(&bound.data).unwrap();
        assert_eq!(eq(qualified("o", "region"), lit("emea")), simplified.data);
    }

    #[test]
    fn bind_statement() {
        let statement = Statement::Select(SelectQuery {
            items: vec![SelectItem::expr(field("id"))],
            sources: vec![SourceRef::new("orders", "o").with_args(vec![member(context(), "tenant")])],
            ..Default::default()
        });
        let ctx = StaticExecutionContext::new().with_value("tenant", 7).into_arc();
        let out = bind_statement_context(&statement, &ctx).unwrap();
        assert!(out.changed);
        assert!(!out.data.query().sources[0].args[0].contains_context());
    }
}
