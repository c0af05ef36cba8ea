//! Rewriting visitors over the AST.
//!
//! A visitor receives a node through [`NodeVisitor::visit`] which dispatches
//! on the node kind to one of the `visit_*` handlers. Handlers that are not
//! overridden fall back to [`rewrite_children`], which visits every child and
//! only allocates a new node if at least one child reported a change.
//!
//! Unchanged subtrees are always returned as the same [`NodeRef`] that was
//! passed in, so callers can rely on `Arc::ptr_eq` for cheap change
//! detection in addition to the explicit `changed` flag.

use std::sync::Arc;

use super::{
    BinaryNode, CallNode, ConditionalNode, FieldRef, IndexNode, MemberNode, Node, NodeRef,
    TargetNode, UnaryNode,
};
use crate::errors::Result;
use crate::scalar::ScalarValue;

/// Result of a rewrite along with whether anything changed.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed<T> {
    pub data: T,
    pub changed: bool,
}

impl<T> Transformed<T> {
    pub fn yes(data: T) -> Self {
        Transformed {
            data,
            changed: true,
        }
    }

    pub fn no(data: T) -> Self {
        Transformed {
            data,
            changed: false,
        }
    }

    pub fn map<U, F>(self, func: F) -> Transformed<U>
    where
        F: FnOnce(T) -> U,
    {
        Transformed {
            data: func(self.data),
            changed: self.changed,
        }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl Transformed<NodeRef> {
    /// Wrap a freshly produced node, comparing against the original to decide
    /// if anything changed.
    pub fn new_node(original: &NodeRef, node: NodeRef) -> Self {
        if Arc::ptr_eq(original, &node) {
            Transformed::no(node)
        } else {
            Transformed::yes(node)
        }
    }
}

pub trait NodeVisitor {
    /// Entry point for visiting a node.
    fn visit(&mut self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        dispatch(self, node)
    }

    fn visit_constant(
        &mut self,
        node: &NodeRef,
        _value: &ScalarValue,
    ) -> Result<Transformed<NodeRef>> {
        Ok(Transformed::no(node.clone()))
    }

    fn visit_field(&mut self, node: &NodeRef, _field: &FieldRef) -> Result<Transformed<NodeRef>> {
        Ok(Transformed::no(node.clone()))
    }

    fn visit_binary(&mut self, node: &NodeRef, _binary: &BinaryNode) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }

    fn visit_unary(&mut self, node: &NodeRef, _unary: &UnaryNode) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }

    fn visit_conditional(
        &mut self,
        node: &NodeRef,
        _conditional: &ConditionalNode,
    ) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }

    fn visit_member(&mut self, node: &NodeRef, _member: &MemberNode) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }

    fn visit_index(&mut self, node: &NodeRef, _index: &IndexNode) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }

    fn visit_call(&mut self, node: &NodeRef, _call: &CallNode) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }

    fn visit_context(&mut self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        Ok(Transformed::no(node.clone()))
    }

    fn visit_target(&mut self, node: &NodeRef, _target: &TargetNode) -> Result<Transformed<NodeRef>> {
        rewrite_children(self, node)
    }
}

/// Route a node to the handler for its kind.
pub fn dispatch<V>(visitor: &mut V, node: &NodeRef) -> Result<Transformed<NodeRef>>
where
    V: NodeVisitor + ?Sized,
{
    match node.as_ref() {
        Node::Constant(value) => visitor.visit_constant(node, value),
        Node::Field(field) => visitor.visit_field(node, field),
        Node::Binary(binary) => visitor.visit_binary(node, binary),
        Node::Unary(unary) => visitor.visit_unary(node, unary),
        Node::Conditional(conditional) => visitor.visit_conditional(node, conditional),
        Node::Member(member) => visitor.visit_member(node, member),
        Node::Index(index) => visitor.visit_index(node, index),
        Node::Call(call) => visitor.visit_call(node, call),
        Node::Context => visitor.visit_context(node),
        Node::Target(target) => visitor.visit_target(node, target),
    }
}

/// Visit all children of `node`, rebuilding it only if a child changed.
pub fn rewrite_children<V>(visitor: &mut V, node: &NodeRef) -> Result<Transformed<NodeRef>>
where
    V: NodeVisitor + ?Sized,
{
    let children = node.children();
    if children.is_empty() {
        return Ok(Transformed::no(node.clone()));
    }

    let mut changed = false;
    let mut new_children = Vec::with_capacity(children.len());
    for child in children {
        let result = visitor.visit(child)?;
        debug_assert!(
            result.changed || Arc::ptr_eq(child, &result.data),
            "visitor returned a new node without marking it changed"
        );
        changed |= result.changed;
        new_children.push(result.data);
    }

    if !changed {
        return Ok(Transformed::no(node.clone()));
    }

    Ok(Transformed::yes(node.with_new_children(new_children)?.into_ref()))
}

/// Visitor that changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityVisitor;

impl NodeVisitor for IdentityVisitor {}

/// Visitor adapter calling a function on every node after its children were
/// rewritten.
///
/// The function returns `None` to keep the node as is.
#[derive(Debug)]
pub struct PostOrderRewriter<F> {
    func: F,
}

impl<F> PostOrderRewriter<F>
where
    F: FnMut(&NodeRef) -> Result<Option<NodeRef>>,
{
    pub fn new(func: F) -> Self {
        PostOrderRewriter { func }
    }
}

impl<F> NodeVisitor for PostOrderRewriter<F>
where
    F: FnMut(&NodeRef) -> Result<Option<NodeRef>>,
{
    fn visit(&mut self, node: &NodeRef) -> Result<Transformed<NodeRef>> {
        let rewritten = rewrite_children(self, node)?;
        match (self.func)(&rewritten.data)? {
            Some(replacement) => Ok(Transformed::yes(replacement)),
            None => Ok(rewritten),
        }
    }
}
