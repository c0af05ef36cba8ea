//! Immutable query AST.
//!
//! Nodes are shared through [`NodeRef`] and never mutated after construction.
//! Rewrites go through [`visitor::NodeVisitor`] which rebuilds only the path
//! from a changed node to the root.

pub mod query;
pub mod visitor;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::errors::{Result, internal};
use crate::scalar::ScalarValue;

pub type NodeRef = Arc<Node>;

/// Reference to a field produced by a source, optionally qualified with the
/// source alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    pub source: Option<String>,
    pub name: String,
}

impl FieldRef {
    pub fn new(source: Option<&str>, name: impl Into<String>) -> Self {
        FieldRef {
            source: source.map(|s| s.to_string()),
            name: name.into(),
        }
    }

    pub fn qualified(source: impl Into<String>, name: impl Into<String>) -> Self {
        FieldRef {
            source: Some(source.into()),
            name: name.into(),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        FieldRef {
            source: None,
            name: name.into(),
        }
    }

    /// Check if this reference resolves to `other`.
    ///
    /// A bare reference matches any source. Names and aliases compare without
    /// regard to ascii case.
    pub fn matches(&self, other: &FieldRef) -> bool {
        if !self.name.eq_ignore_ascii_case(&other.name) {
            return false;
        }
        match (&self.source, &other.source) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOperator {
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

impl UnaryOperator {
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Not => "NOT",
            Self::Negate => "-",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryNode {
    pub op: BinaryOperator,
    pub left: NodeRef,
    pub right: NodeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryNode {
    pub op: UnaryOperator,
    pub expr: NodeRef,
}

/// Three-way conditional, `CASE WHEN test THEN if_true ELSE if_false END`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalNode {
    pub test: NodeRef,
    pub if_true: NodeRef,
    pub if_false: NodeRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberNode {
    pub target: NodeRef,
    pub member: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexNode {
    pub target: NodeRef,
    pub args: Vec<NodeRef>,
}

/// Function call, or method call when a receiver is present.
#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    pub receiver: Option<NodeRef>,
    pub function: String,
    pub args: Vec<NodeRef>,
}

/// Statement level destination, e.g. the target of an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetNode {
    /// `INSERT INTO function(args...)`.
    Function { function: String, args: Vec<NodeRef> },
    /// `INSERT INTO @variable`.
    Variable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant(ScalarValue),
    Field(FieldRef),
    Binary(BinaryNode),
    Unary(UnaryNode),
    Conditional(ConditionalNode),
    Member(MemberNode),
    Index(IndexNode),
    Call(CallNode),
    /// Placeholder for the execution context, bound right before execution.
    Context,
    Target(TargetNode),
}

impl Node {
    pub fn into_ref(self) -> NodeRef {
        Arc::new(self)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Node::Constant(_))
    }

    pub fn try_as_constant(&self) -> Option<&ScalarValue> {
        match self {
            Node::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Child nodes in evaluation order.
    pub fn children(&self) -> Vec<&NodeRef> {
        match self {
            Node::Constant(_) | Node::Field(_) | Node::Context => Vec::new(),
            Node::Target(TargetNode::Variable(_)) => Vec::new(),
            Node::Binary(b) => vec![&b.left, &b.right],
            Node::Unary(u) => vec![&u.expr],
            Node::Conditional(c) => vec![&c.test, &c.if_true, &c.if_false],
            Node::Member(m) => vec![&m.target],
            Node::Index(idx) => std::iter::once(&idx.target).chain(idx.args.iter()).collect(),
            Node::Call(call) => call.receiver.iter().chain(call.args.iter()).collect(),
            Node::Target(TargetNode::Function { args, .. }) => args.iter().collect(),
        }
    }

    /// Rebuild this node with new children.
    ///
    /// `children` must be in the same order and of the same length as
    /// returned by [`Node::children`].
    pub fn with_new_children(&self, children: Vec<NodeRef>) -> Result<Node> {
        let expected = self.children().len();
        if children.len() != expected {
            return Err(internal!(
                "Expected {expected} children when rebuilding '{self}', got {}",
                children.len()
            ));
        }
        let mut children = children.into_iter();
        // Length checked above.
        let mut next = || children.next().ok_or_else(|| internal!("missing child"));

        Ok(match self {
            Node::Constant(_) | Node::Field(_) | Node::Context => self.clone(),
            Node::Target(TargetNode::Variable(_)) => self.clone(),
            Node::Binary(b) => Node::Binary(BinaryNode {
                op: b.op,
                left: next()?,
                right: next()?,
            }),
            Node::Unary(u) => Node::Unary(UnaryNode {
                op: u.op,
                expr: next()?,
            }),
            Node::Conditional(_) => Node::Conditional(ConditionalNode {
                test: next()?,
                if_true: next()?,
                if_false: next()?,
            }),
            Node::Member(m) => Node::Member(MemberNode {
                target: next()?,
                member: m.member.clone(),
            }),
            Node::Index(idx) => {
                let target = next()?;
                let args = (0..idx.args.len()).map(|_| next()).collect::<Result<Vec<_>>>()?;
                Node::Index(IndexNode { target, args })
            }
            Node::Call(call) => {
                let receiver = match call.receiver {
                    Some(_) => Some(next()?),
                    None => None,
                };
                let args = (0..call.args.len()).map(|_| next()).collect::<Result<Vec<_>>>()?;
                Node::Call(CallNode {
                    receiver,
                    function: call.function.clone(),
                    args,
                })
            }
            Node::Target(TargetNode::Function { function, args }) => {
                let args = (0..args.len()).map(|_| next()).collect::<Result<Vec<_>>>()?;
                Node::Target(TargetNode::Function {
                    function: function.clone(),
                    args,
                })
            }
        })
    }

    /// Visit this node and all of its descendants, parents before children.
    pub fn walk<F>(&self, func: &mut F)
    where
        F: FnMut(&Node),
    {
        func(self);
        for child in self.children() {
            child.walk(func);
        }
    }

    /// All field references appearing in this tree.
    pub fn field_refs(&self) -> BTreeSet<FieldRef> {
        let mut refs = BTreeSet::new();
        self.walk(&mut |node| {
            if let Node::Field(field) = node {
                refs.insert(field.clone());
            }
        });
        refs
    }

    /// If this tree contains an unbound context placeholder.
    pub fn contains_context(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| found |= matches!(node, Node::Context));
        found
    }
}

fn fmt_args(f: &mut fmt::Formatter<'_>, args: &[NodeRef]) -> fmt::Result {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Quote strings when printing as part of an expression.
            Node::Constant(ScalarValue::Utf8(s)) => write!(f, "'{s}'"),
            Node::Constant(v) => write!(f, "{v}"),
            Node::Field(field) => write!(f, "{field}"),
            Node::Binary(b) => write!(f, "({} {} {})", b.left, b.op, b.right),
            Node::Unary(u) => match u.op {
                UnaryOperator::Not => write!(f, "NOT {}", u.expr),
                UnaryOperator::Negate => write!(f, "-{}", u.expr),
                UnaryOperator::IsNull | UnaryOperator::IsNotNull => {
                    write!(f, "{} {}", u.expr, u.op.symbol())
                }
            },
            Node::Conditional(c) => write!(
                f,
                "CASE WHEN {} THEN {} ELSE {} END",
                c.test, c.if_true, c.if_false
            ),
            Node::Member(m) => write!(f, "{}.{}", m.target, m.member),
            Node::Index(idx) => {
                write!(f, "{}[", idx.target)?;
                fmt_args(f, &idx.args)?;
                write!(f, "]")
            }
            Node::Call(call) => {
                if let Some(receiver) = &call.receiver {
                    write!(f, "{receiver}.")?;
                }
                write!(f, "{}(", call.function)?;
                fmt_args(f, &call.args)?;
                write!(f, ")")
            }
            Node::Context => write!(f, "@context"),
            Node::Target(TargetNode::Function { function, args }) => {
                write!(f, "{function}(")?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Node::Target(TargetNode::Variable(name)) => write!(f, "@{name}"),
        }
    }
}

pub fn lit(value: impl Into<ScalarValue>) -> NodeRef {
    Node::Constant(value.into()).into_ref()
}

pub fn field(name: impl Into<String>) -> NodeRef {
    Node::Field(FieldRef::bare(name)).into_ref()
}

pub fn qualified(source: impl Into<String>, name: impl Into<String>) -> NodeRef {
    Node::Field(FieldRef::qualified(source, name)).into_ref()
}

pub fn context() -> NodeRef {
    Node::Context.into_ref()
}

pub fn binary(op: BinaryOperator, left: NodeRef, right: NodeRef) -> NodeRef {
    Node::Binary(BinaryNode { op, left, right }).into_ref()
}

pub fn unary(op: UnaryOperator, expr: NodeRef) -> NodeRef {
    Node::Unary(UnaryNode { op, expr }).into_ref()
}

pub fn and(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::And, left, right)
}

pub fn or(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::Or, left, right)
}

pub fn not(expr: NodeRef) -> NodeRef {
    unary(UnaryOperator::Not, expr)
}

pub fn eq(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::Eq, left, right)
}

pub fn gt(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::Gt, left, right)
}

pub fn lt(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::Lt, left, right)
}

pub fn add(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::Add, left, right)
}

pub fn mul(left: NodeRef, right: NodeRef) -> NodeRef {
    binary(BinaryOperator::Multiply, left, right)
}

pub fn conditional(test: NodeRef, if_true: NodeRef, if_false: NodeRef) -> NodeRef {
    Node::Conditional(ConditionalNode {
        test,
        if_true,
        if_false,
    })
    .into_ref()
}

pub fn member(target: NodeRef, member: impl Into<String>) -> NodeRef {
    Node::Member(MemberNode {
        target,
        member: member.into(),
    })
    .into_ref()
}

pub fn index(target: NodeRef, args: Vec<NodeRef>) -> NodeRef {
    Node::Index(IndexNode { target, args }).into_ref()
}

pub fn call(function: impl Into<String>, args: Vec<NodeRef>) -> NodeRef {
    Node::Call(CallNode {
        receiver: None,
        function: function.into(),
        args,
    })
    .into_ref()
}

pub fn method(receiver: NodeRef, function: impl Into<String>, args: Vec<NodeRef>) -> NodeRef {
    Node::Call(CallNode {
        receiver: Some(receiver),
        function: function.into(),
        args,
    })
    .into_ref()
}

pub fn function_target(function: impl Into<String>, args: Vec<NodeRef>) -> NodeRef {
    Node::Target(TargetNode::Function {
        function: function.into(),
        args,
    })
    .into_ref()
}

/// Join expressions with AND, returns `None` if there are none.
pub fn conjunction(exprs: impl IntoIterator<Item = NodeRef>) -> Option<NodeRef> {
    exprs.into_iter().reduce(and)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_expression() {
        let expr = and(
            gt(qualified("a", "age"), lit(21)),
            eq(method(field("name"), "upper", vec![]), lit("BOB")),
        );
        assert_eq!(
            "((a.age > 21) AND (name.upper() = 'BOB'))",
            expr.to_string()
        );
    }

    #[test]
    fn children_of_call_include_receiver() {
        let expr = method(field("x"), "substr", vec![lit(1), lit(2)]);
        assert_eq!(3, expr.children().len());
    }

    #[test]
    fn rebuild_with_wrong_child_count() {
        let expr = add(lit(1), lit(2));
        let err = expr.with_new_children(vec![lit(3)]);
        assert!(err.is_err());
    }

    #[test]
    fn collect_field_refs() {
        let expr = and(
            gt(qualified("a", "age"), lit(21)),
            eq(qualified("b", "id"), qualified("a", "id")),
        );
        let refs: Vec<_> = expr.field_refs().into_iter().map(|f| f.to_string()).collect();
        assert_eq!(vec!["a.age", "a.id", "b.id"], refs);
    }

    #[test]
    fn field_ref_matching() {
        let bare = FieldRef::bare("Name");
        let qualified = FieldRef::qualified("A", "name");
        assert!(bare.matches(&qualified));
        assert!(qualified.matches(&FieldRef::qualified("a", "NAME")));
        assert!(!qualified.matches(&FieldRef::qualified("b", "name")));
    }

    #[test]
    fn detects_context_placeholder() {
        assert!(member(context(), "user").contains_context());
        assert!(!member(field("x"), "user").contains_context());
    }
}
