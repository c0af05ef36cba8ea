//! Statement level AST.

use std::fmt;

use super::visitor::{NodeVisitor, Transformed};
use super::{Node, NodeRef};
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASC"),
            Self::Descending => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByTerm {
    pub expr: NodeRef,
    pub direction: OrderDirection,
}

impl OrderByTerm {
    pub fn asc(expr: NodeRef) -> Self {
        OrderByTerm {
            expr,
            direction: OrderDirection::Ascending,
        }
    }

    pub fn desc(expr: NodeRef) -> Self {
        OrderByTerm {
            expr,
            direction: OrderDirection::Descending,
        }
    }
}

impl fmt::Display for OrderByTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, self.direction)
    }
}

/// A source in the FROM clause, `function(args...) alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub function: String,
    pub args: Vec<NodeRef>,
    pub alias: String,
}

impl SourceRef {
    pub fn new(function: impl Into<String>, alias: impl Into<String>) -> Self {
        SourceRef {
            function: function.into(),
            args: Vec::new(),
            alias: alias.into(),
        }
    }

    pub fn with_args(mut self, args: Vec<NodeRef>) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Expr {
        expr: NodeRef,
        alias: Option<String>,
    },
    /// `*` when `source` is `None`, `alias.*` otherwise.
    Wildcard { source: Option<String> },
}

impl SelectItem {
    pub fn expr(expr: NodeRef) -> Self {
        SelectItem::Expr { expr, alias: None }
    }

    pub fn aliased(expr: NodeRef, alias: impl Into<String>) -> Self {
        SelectItem::Expr {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// Name of the output column produced by an expression item.
    pub fn output_name(&self) -> Option<String> {
        match self {
            SelectItem::Expr {
                alias: Some(alias), ..
            } => Some(alias.clone()),
            SelectItem::Expr { expr, alias: None } => match expr.as_ref() {
                Node::Field(field) => Some(field.name.clone()),
                other => Some(other.to_string()),
            },
            SelectItem::Wildcard { .. } => None,
        }
    }
}

/// `SELECT items FROM sources WHERE filter ORDER BY order_by LIMIT limit`.
///
/// Multiple sources are joined, join conditions live in the filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub items: Vec<SelectItem>,
    pub sources: Vec<SourceRef>,
    pub filter: Option<NodeRef>,
    pub order_by: Vec<OrderByTerm>,
    pub limit: Option<u64>,
}

impl SelectQuery {
    /// Run a visitor over every expression in the query.
    ///
    /// The returned query shares every expression the visitor left unchanged.
    pub fn rewrite_expressions<V>(&self, visitor: &mut V) -> Result<Transformed<SelectQuery>>
    where
        V: NodeVisitor + ?Sized,
    {
        let mut changed = false;
        let mut visit = |node: &NodeRef| -> Result<NodeRef> {
            let result = visitor.visit(node)?;
            changed |= result.changed;
            Ok(result.data)
        };

        let items = self
            .items
            .iter()
            .map(|item| {
                Ok(match item {
                    SelectItem::Expr { expr, alias } => SelectItem::Expr {
                        expr: visit(expr)?,
                        alias: alias.clone(),
                    },
                    other => other.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sources = self
            .sources
            .iter()
            .map(|source| {
                Ok(SourceRef {
                    function: source.function.clone(),
                    args: source
                        .args
                        .iter()
                        .map(&mut visit)
                        .collect::<Result<Vec<_>>>()?,
                    alias: source.alias.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let filter = self.filter.as_ref().map(&mut visit).transpose()?;

        let order_by = self
            .order_by
            .iter()
            .map(|term| {
                Ok(OrderByTerm {
                    expr: visit(&term.expr)?,
                    direction: term.direction,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let query = SelectQuery {
            items,
            sources,
            filter,
            order_by,
            limit: self.limit,
        };

        Ok(Transformed {
            data: query,
            changed,
        })
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        for (idx, item) in self.items.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            match item {
                SelectItem::Expr { expr, alias } => {
                    write!(f, "{expr}")?;
                    if let Some(alias) = alias {
                        write!(f, " AS {alias}")?;
                    }
                }
                SelectItem::Wildcard { source: Some(s) } => write!(f, "{s}.*")?,
                SelectItem::Wildcard { source: None } => write!(f, "*")?,
            }
        }
        if !self.sources.is_empty() {
            write!(f, " FROM ")?;
            for (idx, source) in self.sources.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}(", source.function)?;
                for (arg_idx, arg) in source.args.iter().enumerate() {
                    if arg_idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ") {}", source.alias)?;
            }
        }
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (idx, term) in self.order_by.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{term}")?;
            }
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    /// Must be a [`Node::Target`].
    pub target: NodeRef,
    pub query: SelectQuery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectQuery),
    Insert(InsertStatement),
}

impl Statement {
    pub fn query(&self) -> &SelectQuery {
        match self {
            Statement::Select(query) => query,
            Statement::Insert(insert) => &insert.query,
        }
    }

    pub fn rewrite_expressions<V>(&self, visitor: &mut V) -> Result<Transformed<Statement>>
    where
        V: NodeVisitor + ?Sized,
    {
        match self {
            Statement::Select(query) => Ok(query.rewrite_expressions(visitor)?.map(Statement::Select)),
            Statement::Insert(insert) => {
                let target = visitor.visit(&insert.target)?;
                let query = insert.query.rewrite_expressions(visitor)?;
                Ok(Transformed {
                    changed: target.changed || query.changed,
                    data: Statement::Insert(InsertStatement {
                        target: target.data,
                        query: query.data,
                    }),
                })
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(query) => write!(f, "{query}"),
            Statement::Insert(insert) => write!(f, "INSERT INTO {} {}", insert.target, insert.query),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ast::visitor::IdentityVisitor;
    use crate::ast::{context, eq, field, lit, member, qualified};

    fn sample() -> SelectQuery {
        SelectQuery {
            items: vec![
                SelectItem::expr(qualified("c", "name")),
                SelectItem::Wildcard {
                    source: Some("o".to_string()),
                },
            ],
            sources: vec![
                SourceRef::new("customers", "c"),
                SourceRef::new("orders", "o").with_args(vec![member(context(), "region")]),
            ],
            filter: Some(eq(qualified("c", "id"), qualified("o", "customer_id"))),
            order_by: vec![OrderByTerm::desc(field("total"))],
            limit: Some(10),
        }
    }

    #[test]
    fn display_select() {
        assert_eq!(
            "SELECT c.name, o.* FROM customers() c, orders(@context.region) o WHERE (c.id = o.customer_id) ORDER BY total DESC LIMIT 10",
            sample().to_string()
        );
    }

    #[test]
    fn identity_rewrite_shares_expressions() {
        let query = sample();
        let out = query.rewrite_expressions(&mut IdentityVisitor).unwrap();
        assert!(!out.changed);
        assert_eq!(query, out.data);
        assert!(Arc::ptr_eq(
            query.filter.as_ref().unwrap(),
            out.data.filter.as_ref().unwrap()
        ));
    }

    #[test]
    fn output_names() {
        assert_eq!(
            Some("name".to_string()),
            SelectItem::expr(qualified("c", "name")).output_name()
        );
        assert_eq!(
            Some("total".to_string()),
            SelectItem::aliased(lit(1), "total").output_name()
        );
    }
}
