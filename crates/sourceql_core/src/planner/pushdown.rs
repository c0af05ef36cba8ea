use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::multi_part::MultiPartQuery;
use super::split::split_conjunction;
use crate::ast::query::{OrderByTerm, SelectItem, SelectQuery, SourceRef};
use crate::ast::{FieldRef, Node, NodeRef, conjunction};
use crate::context::ExecutionContext;
use crate::datasource::{DataSource, SourceRegistry};
use crate::errors::{Result, plan_err};
use crate::eval::Evaluator;
use crate::optimizer::ExpressionOptimizer;
use crate::scalar::ScalarValue;

/// A source along with the part of the query pushed to it.
#[derive(Debug, Clone)]
pub struct PlannedSource {
    pub source_ref: SourceRef,
    pub source: Arc<dyn DataSource>,
    /// Evaluated source arguments.
    pub args: Vec<ScalarValue>,
    pub query: Arc<MultiPartQuery>,
    /// Predicates on this source's fields the source can't evaluate itself.
    pub residual_filter: Option<NodeRef>,
}

/// Predicate applied once all sources it references have been joined.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPredicate {
    pub expr: NodeRef,
    /// Indexes of referenced sources, empty for predicates without fields.
    pub sources: BTreeSet<usize>,
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sources: Vec<PlannedSource>,
    pub join_filters: Vec<JoinPredicate>,
    /// Order applied after joining, empty if nothing remains to sort.
    pub order_by: Vec<OrderByTerm>,
    pub limit: Option<u64>,
    pub items: Vec<SelectItem>,
}

impl QueryPlan {
    /// All join level predicates combined with AND.
    pub fn join_filter(&self) -> Option<NodeRef> {
        conjunction(self.join_filters.iter().map(|p| p.expr.clone()))
    }
}

/// Resolves field references to source indexes.
struct AliasScope {
    aliases: Vec<String>,
    known_fields: Vec<Option<Vec<String>>>,
}

impl AliasScope {
    fn try_new(sources: &[SourceRef], resolved: &[Arc<dyn DataSource>]) -> Result<Self> {
        let mut aliases: Vec<String> = Vec::with_capacity(sources.len());
        for source in sources {
            if aliases.iter().any(|a| a.eq_ignore_ascii_case(&source.alias)) {
                return Err(plan_err!("Duplicate source alias '{}'", source.alias));
            }
            aliases.push(source.alias.clone());
        }
        Ok(AliasScope {
            aliases,
            known_fields: resolved.iter().map(|s| s.known_fields()).collect(),
        })
    }

    fn alias_index(&self, alias: &str) -> Result<usize> {
        self.aliases
            .iter()
            .position(|a| a.eq_ignore_ascii_case(alias))
            .ok_or_else(|| plan_err!("Unknown source alias '{alias}'"))
    }

    fn resolve(&self, field: &FieldRef) -> Result<usize> {
        if let Some(alias) = &field.source {
            return self.alias_index(alias);
        }
        match self.aliases.len() {
            0 => Err(plan_err!("Field '{field}' referenced without any source")),
            1 => Ok(0),
            _ => {
                let candidates: Vec<usize> = self
                    .known_fields
                    .iter()
                    .enumerate()
                    .filter(|(_, known)| {
                        known.as_ref().is_some_and(|names| {
                            names.iter().any(|n| n.eq_ignore_ascii_case(&field.name))
                        })
                    })
                    .map(|(idx, _)| idx)
                    .collect();
                match candidates.as_slice() {
                    [idx] => Ok(*idx),
                    [] => Err(plan_err!(
                        "Cannot resolve field '{field}', qualify it with a source alias"
                    )),
                    _ => Err(plan_err!("Field reference '{field}' is ambiguous")),
                }
            }
        }
    }

    fn sources_of(&self, node: &Node) -> Result<BTreeSet<usize>> {
        node.field_refs()
            .iter()
            .map(|field| self.resolve(field))
            .collect()
    }
}

/// Splits a query over multiple sources into per-source queries.
#[derive(Debug)]
pub struct PushdownPlanner<'a> {
    registry: &'a SourceRegistry,
    optimizer: &'a ExpressionOptimizer,
    evaluator: &'a Evaluator,
}

impl<'a> PushdownPlanner<'a> {
    pub fn new(
        registry: &'a SourceRegistry,
        optimizer: &'a ExpressionOptimizer,
        evaluator: &'a Evaluator,
    ) -> Self {
        PushdownPlanner {
            registry,
            optimizer,
            evaluator,
        }
    }

    /// Plan a query for one execution.
    ///
    /// The execution context is bound into every expression first, so filters
    /// handed to sources never contain context placeholders.
    pub fn plan(
        &self,
        query: &SelectQuery,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<QueryPlan> {
        let query = self.optimizer.bind_query(query, context)?.into_inner();

        let sources = query
            .sources
            .iter()
            .map(|s| self.registry.source(&s.function))
            .collect::<Result<Vec<_>>>()?;
        let scope = AliasScope::try_new(&query.sources, &sources)?;

        let mut fields: Vec<BTreeSet<String>> = vec![BTreeSet::new(); sources.len()];
        let mut wildcards: Vec<bool> = vec![false; sources.len()];

        let mut add_fields = |node: &Node| -> Result<()> {
            for field in node.field_refs() {
                let idx = scope.resolve(&field)?;
                fields[idx].insert(field.name.clone());
            }
            Ok(())
        };

        for item in &query.items {
            match item {
                SelectItem::Expr { expr, .. } => add_fields(expr.as_ref())?,
                SelectItem::Wildcard { source: None } => wildcards.iter_mut().for_each(|w| *w = true),
                SelectItem::Wildcard {
                    source: Some(alias),
                } => wildcards[scope.alias_index(alias)?] = true,
            }
        }
        if let Some(filter) = &query.filter {
            add_fields(filter.as_ref())?;
        }
        for term in &query.order_by {
            add_fields(term.expr.as_ref())?;
        }

        // Split the filter into pushed, residual and join level predicates.
        let mut conjuncts = Vec::new();
        if let Some(filter) = &query.filter {
            split_conjunction(filter, &mut conjuncts);
        }

        let mut pushed: Vec<Vec<NodeRef>> = vec![Vec::new(); sources.len()];
        let mut residual: Vec<Vec<NodeRef>> = vec![Vec::new(); sources.len()];
        let mut join_filters = Vec::new();

        for conjunct in conjuncts {
            if matches!(conjunct.as_ref(), Node::Constant(ScalarValue::Boolean(true))) {
                continue;
            }
            let referenced = scope.sources_of(&conjunct)?;
            match referenced.first().copied() {
                Some(idx) if referenced.len() == 1 => {
                    if sources[idx].supports_filter(&conjunct) {
                        pushed[idx].push(conjunct);
                    } else {
                        residual[idx].push(conjunct);
                    }
                }
                _ => join_filters.push(JoinPredicate {
                    expr: conjunct,
                    sources: referenced,
                }),
            }
        }

        // Longest prefix of terms on a single source that the source can
        // order by.
        let mut order_source = None;
        let mut order_prefix = 0;
        for term in &query.order_by {
            let referenced = scope.sources_of(&term.expr)?;
            let idx = match (referenced.len(), referenced.first().copied()) {
                (1, Some(idx)) => idx,
                _ => break,
            };
            if order_source.is_some_and(|s| s != idx) || !sources[idx].can_order_by(term) {
                break;
            }
            order_source = Some(idx);
            order_prefix += 1;
        }

        let single_source = sources.len() == 1;
        let order_by = if single_source && order_prefix == query.order_by.len() {
            Vec::new()
        } else {
            query.order_by.clone()
        };
        let push_limit = single_source
            && residual[0].is_empty()
            && join_filters.is_empty()
            && order_by.is_empty();

        let mut planned = Vec::with_capacity(sources.len());
        for (idx, (source_ref, source)) in query.sources.iter().zip(sources).enumerate() {
            let mut part = MultiPartQuery::new().with_fields(std::mem::take(&mut fields[idx]));
            if wildcards[idx] {
                part = part.with_wildcard_alias(source_ref.alias.clone());
            }
            let mut part = part
                .into_arc()
                .replace_filter(conjunction(std::mem::take(&mut pushed[idx])));
            if order_source == Some(idx) {
                part = part.replace_order_by(query.order_by[..order_prefix].to_vec());
            }
            if push_limit {
                part = part.replace_count(query.limit);
            }

            let args = source_ref
                .args
                .iter()
                .map(|arg| self.evaluator.evaluate_constant(arg))
                .collect::<Result<Vec<_>>>()?;

            debug!(alias = %source_ref.alias, query = %part, "pushed down source query");

            planned.push(PlannedSource {
                source_ref: source_ref.clone(),
                source,
                args,
                query: part,
                residual_filter: conjunction(std::mem::take(&mut residual[idx])),
            });
        }

        Ok(QueryPlan {
            sources: planned,
            join_filters,
            order_by,
            limit: query.limit,
            items: query.items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{and, call, context, eq, field, gt, lit, member, qualified};
    use crate::context::StaticExecutionContext;
    use crate::datasource::memory::MemorySource;

    fn registry() -> SourceRegistry {
        SourceRegistry::new()
            .with_source(Arc::new(MemorySource::from_records(
                "customers",
                [vec![("id", ScalarValue::from(1)), ("name", "ann".into()), ("region", "emea".into())]],
            )))
            .with_source(Arc::new(MemorySource::from_records(
                "orders",
                [vec![("order_id", ScalarValue::from(10)), ("customer_id", 1.into()), ("total", 5.into())]],
            )))
            .with_source(Arc::new(
                MemorySource::from_records("legacy", [vec![("code", ScalarValue::from("x"))]])
                    .without_filter_pushdown()
                    .without_order_pushdown(),
            ))
    }

    fn plan(query: &SelectQuery) -> Result<QueryPlan> {
        let registry = registry();
        let optimizer = ExpressionOptimizer::default();
        let evaluator = Evaluator::default();
        let ctx = StaticExecutionContext::new()
            .with_value("region", "emea")
            .into_arc();
        PushdownPlanner::new(&registry, &optimizer, &evaluator).plan(query, &ctx)
    }

    fn join_query() -> SelectQuery {
        SelectQuery {
            items: vec![
                SelectItem::expr(qualified("c", "name")),
                SelectItem::expr(qualified("o", "total")),
            ],
            sources: vec![
                SourceRef::new("customers", "c"),
                SourceRef::new("orders", "o"),
            ],
            filter: Some(and(
                and(
                    eq(qualified("c", "id"), qualified("o", "customer_id")),
                    eq(qualified("c", "region"), member(context(), "region")),
                ),
                gt(qualified("o", "total"), lit(1)),
            )),
            order_by: vec![OrderByTerm::asc(qualified("c", "name"))],
            limit: Some(10),
        }
    }

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn split_filters_between_sources_and_join() {
        let plan = plan(&join_query()).unwrap();

        let customers = &plan.sources[0].query;
        assert_eq!(
            Some(&eq(qualified("c", "region"), lit("emea"))),
            customers.filter()
        );
        assert_eq!(vec!["id", "name", "region"], names(customers.fields()));

        let orders = &plan.sources[1].query;
        assert_eq!(Some(&gt(qualified("o", "total"), lit(1))), orders.filter());
        assert_eq!(vec!["customer_id", "total"], names(orders.fields()));

        assert_eq!(
            Some(eq(qualified("c", "id"), qualified("o", "customer_id"))),
            plan.join_filter()
        );
        assert_eq!(BTreeSet::from([0, 1]), plan.join_filters[0].sources);
    }

    #[test]
    fn multi_source_order_pushed_but_kept() {
        let plan = plan(&join_query()).unwrap();
        assert_eq!(
            &[OrderByTerm::asc(qualified("c", "name"))],
            plan.sources[0].query.order_by()
        );
        assert!(plan.sources[1].query.order_by().is_empty());
        assert_eq!(1, plan.order_by.len());
        // No limit push down with a join.
        assert_eq!(None, plan.sources[0].query.count());
        assert_eq!(Some(10), plan.limit);
    }

    #[test]
    fn single_source_pushes_order_and_limit() {
        let query = SelectQuery {
            items: vec![SelectItem::expr(field("name"))],
            sources: vec![SourceRef::new("customers", "c")],
            filter: Some(gt(field("id"), lit(0))),
            order_by: vec![OrderByTerm::desc(field("name"))],
            limit: Some(3),
        };
        let plan = plan(&query).unwrap();
        let part = &plan.sources[0].query;
        assert_eq!(1, part.order_by().len());
        assert_eq!(Some(3), part.count());
        assert!(plan.order_by.is_empty());
        assert!(plan.sources[0].residual_filter.is_none());
    }

    #[test]
    fn unsupported_filter_stays_residual() {
        let query = SelectQuery {
            items: vec![SelectItem::Wildcard { source: None }],
            sources: vec![SourceRef::new("legacy", "l")],
            filter: Some(eq(field("code"), lit("x"))),
            order_by: vec![OrderByTerm::asc(field("code"))],
            limit: Some(1),
        };
        let plan = plan(&query).unwrap();
        let source = &plan.sources[0];
        assert_eq!(None, source.query.filter());
        assert_eq!(Some(eq(field("code"), lit("x"))), source.residual_filter);
        assert!(source.query.order_by().is_empty());
        assert_eq!(1, plan.order_by.len());
        assert_eq!(None, source.query.count());
        assert!(source.query.is_wildcard());
    }

    #[test]
    fn constant_predicates_stay_at_join_level() {
        let query = SelectQuery {
            items: vec![SelectItem::expr(field("name"))],
            sources: vec![SourceRef::new("customers", "c")],
            filter: Some(and(gt(field("id"), lit(0)), gt(call("now", vec![]), lit(0)))),
            ..Default::default()
        };
        let plan = plan(&query).unwrap();
        assert_eq!(Some(gt(call("now", vec![]), lit(0))), plan.join_filter());
        assert!(plan.join_filters[0].sources.is_empty());
    }

    #[test]
    fn alias_wildcard() {
        let mut query = join_query();
        query.items.push(SelectItem::Wildcard {
            source: Some("o".to_string()),
        });
        let plan = plan(&query).unwrap();
        assert!(!plan.sources[0].query.is_wildcard());
        assert_eq!(
            vec!["o"],
            plan.sources[1]
                .query
                .wildcard_aliases()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn bare_fields_resolve_through_known_fields() {
        let mut query = join_query();
        query.items = vec![SelectItem::expr(field("total"))];
        let plan = plan(&query).unwrap();
        assert!(plan.sources[1].query.fields().contains("total"));
    }

    #[test]
    fn planning_errors() {
        let mut query = join_query();
        query.items = vec![SelectItem::expr(qualified("x", "name"))];
        assert!(plan(&query).is_err());

        let mut query = join_query();
        query.sources[1].alias = "C".to_string();
        assert!(plan(&query).is_err());

        let mut query = join_query();
        query.sources[1].function = "customers".to_string();
        query.items = vec![SelectItem::expr(field("name"))];
        query.filter = None;
        query.order_by.clear();
        let err = plan(&query).unwrap_err();
        assert!(err.to_string().contains("ambiguous"), "{err}");

        let mut query = join_query();
        query.sources[0].function = "nope".to_string();
        assert!(plan(&query).is_err());
    }
}
