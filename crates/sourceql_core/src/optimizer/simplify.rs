use tracing::trace;

use crate::ast::visitor::{NodeVisitor, Transformed, rewrite_children};
use crate::ast::{
    BinaryNode, BinaryOperator, CallNode, ConditionalNode, IndexNode, MemberNode, Node, NodeRef,
    UnaryNode,
};
use crate::errors::Result;
use crate::eval::Evaluator;
use crate::scalar::ScalarValue;

/// Bottom-up constant folding.
///
/// Children are simplified first, then the node itself is folded if its
/// operands are now constant. Logical AND and OR with a single constant
/// boolean operand collapse without evaluating the other side.
///
/// A conditional is only folded when the test and both branches are
/// constant. A constant test alone does not select a branch.
#[derive(Debug, Clone, Default)]
pub struct Simplifier {
    evaluator: Evaluator,
}

impl Simplifier {
    pub fn new(evaluator: Evaluator) -> Self {
        Simplifier { evaluator }
    }

    /// Simplify a single expression.
    pub fn simplify(&mut self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        self.visit(node)
    }

    /// Replace a node with the constant it evaluates to.
    ///
    /// All children of `node` must already be constant.
    fn fold(&self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        let value = self.evaluator.evaluate_constant(node)?;
        trace!(%node, %value, "folded constant expression");
        Ok(Transformed::yes(Node::Constant(value).into_ref()))
    }

    /// Simplify children, then apply `func` to the possibly rebuilt node.
    fn after_children<F>(&mut self, node: &NodeRef, func: F) -> Result<Transformed<NodeRef>>
    where
        F: FnOnce(&Self, &NodeRef) -> Result<Option<Transformed<NodeRef>>>,
    {
        let rewritten = rewrite_children(self, node)?;
        match func(self, &rewritten.data)? {
            Some(folded) => Ok(folded),
            None => Ok(rewritten),
        }
    }

    fn simplify_binary(&self, node: &NodeRef, binary: &BinaryNode) -> Result<Option<Transformed<NodeRef>>> {
        let left = binary.left.try_as_constant().and_then(ScalarValue::try_as_bool);
        let right = binary.right.try_as_constant().and_then(ScalarValue::try_as_bool);

        // Absorbing operands win over evaluating the other side.
        match (binary.op, left, right) {
            (BinaryOperator::And, Some(false), _) | (BinaryOperator::And, _, Some(false)) => {
                return Ok(Some(Transformed::yes(lit_bool(false))));
            }
            (BinaryOperator::Or, Some(true), _) | (BinaryOperator::Or, _, Some(true)) => {
                return Ok(Some(Transformed::yes(lit_bool(true))));
            }
            _ => (),
        }

        if binary.left.is_constant() && binary.right.is_constant() {
            return self.fold(node).map(Some);
        }

        let out = match (binary.op, left, right) {
            (BinaryOperator::And, Some(true), _) => Some(binary.right.clone()),
            (BinaryOperator::And, _, Some(true)) => Some(binary.left.clone()),
            (BinaryOperator::Or, Some(false), _) => Some(binary.right.clone()),
            (BinaryOperator::Or, _, Some(false)) => Some(binary.left.clone()),
            _ => None,
        };

        Ok(out.map(Transformed::yes))
    }
}

fn lit_bool(value: bool) -> NodeRef {
    Node::Constant(ScalarValue::Boolean(value)).into_ref()
}

fn as_binary(node: &NodeRef) -> Option<&BinaryNode> {
    match node.as_ref() {
        Node::Binary(binary) => Some(binary),
        _ => None,
    }
}

fn all_constant(nodes: &[NodeRef]) -> bool {
    nodes.iter().all(|node| node.is_constant())
}

impl NodeVisitor for Simplifier {
    fn visit_binary(&mut self, node: &NodeRef, _binary: &BinaryNode) -> Result<Transformed<NodeRef>> {
        self.after_children(node, |this, node| match as_binary(node) {
            Some(binary) => this.simplify_binary(node, binary),
            None => Ok(None),
        })
    }

    fn visit_unary(&mut self, node: &NodeRef, _unary: &UnaryNode) -> Result<Transformed<NodeRef>> {
        self.after_children(node, |this, node| match node.as_ref() {
            Node::Unary(unary) if unary.expr.is_constant() => this.fold(node).map(Some),
            _ => Ok(None),
        })
    }

    fn visit_conditional(
        &mut self,
        node: &NodeRef,
        _conditional: &ConditionalNode,
    ) -> Result<Transformed<NodeRef>> {
        self.after_children(node, |this, node| match node.as_ref() {
            Node::Conditional(c)
                if c.test.is_constant() && c.if_true.is_constant() && c.if_false.is_constant() =>
            {
                this.fold(node).map(Some)
            }
            _ => Ok(None),
        })
    }

    fn visit_member(&mut self, node: &NodeRef, _member: &MemberNode) -> Result<Transformed<NodeRef>> {
        self.after_children(node, |this, node| match node.as_ref() {
            Node::Member(member) if member.target.is_constant() => this.fold(node).map(Some),
            _ => Ok(None),
        })
    }

    fn visit_index(&mut self, node: &NodeRef, _index: &IndexNode) -> Result<Transformed<NodeRef>> {
        self.after_children(node, |this, node| match node.as_ref() {
            Node::Index(index) if index.target.is_constant() && all_constant(&index.args) => {
                this.fold(node).map(Some)
            }
            _ => Ok(None),
        })
    }

    fn visit_call(&mut self, node: &NodeRef, _call: &CallNode) -> Result<Transformed<NodeRef>> {
        self.after_children(node, |this, node| match node.as_ref() {
            Node::Call(call)
                if call.receiver.as_ref().is_none_or(|r| r.is_constant())
                    && all_constant(&call.args)
                    && this.evaluator.functions().is_pure(&call.function) =>
            {
                this.fold(node).map(Some)
            }
            _ => Ok(None),
        })
    }
}
