//! Runs statements end to end: simplify, plan, scan, join, filter, order,
//! limit and project.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ast::query::{SelectQuery, Statement};
use crate::ast::{Node, NodeRef, TargetNode, conjunction};
use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::datasource::SourceRegistry;
use crate::errors::{Result, SourceQlError, plan_err};
use crate::eval::Evaluator;
use crate::functions::FunctionRegistry;
use crate::optimizer::ExpressionOptimizer;
use crate::planner::pushdown::{PushdownPlanner, QueryPlan};
use crate::row::Row;
use crate::scalar::ScalarValue;
use crate::stream::RowSequence;

/// A statement normalized once and reusable across executions.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    statement: Arc<Statement>,
}

impl PreparedStatement {
    pub fn statement(&self) -> &Statement {
        &self.statement
    }
}

#[derive(Debug)]
pub enum ExecutionResult {
    Rows(RowSequence<Row>),
    Written { target: String, count: u64 },
}

impl ExecutionResult {
    /// Rows for a query, or nothing for a write.
    pub async fn into_rows(self) -> Result<Vec<Row>> {
        match self {
            ExecutionResult::Rows(rows) => rows.materialize().await,
            ExecutionResult::Written { .. } => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<SourceRegistry>,
    optimizer: ExpressionOptimizer,
    evaluator: Evaluator,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: SourceRegistry, config: EngineConfig) -> Self {
        Self::with_functions(registry, config, FunctionRegistry::builtins())
    }

    pub fn with_functions(
        registry: SourceRegistry,
        config: EngineConfig,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        let evaluator = Evaluator::new(functions);
        Engine {
            registry: Arc::new(registry),
            optimizer: ExpressionOptimizer::new(config.simplify, evaluator.clone()),
            evaluator,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Normalize a statement for repeated execution.
    pub fn prepare(&self, statement: &Statement) -> Result<PreparedStatement> {
        let statement = self.optimizer.optimize_statement(statement)?.into_inner();
        Ok(PreparedStatement {
            statement: Arc::new(statement),
        })
    }

    /// Prepare and execute a statement once.
    pub async fn execute(
        &self,
        statement: &Statement,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<ExecutionResult> {
        let prepared = self.prepare(statement)?;
        self.execute_prepared(&prepared, context, None).await
    }

    /// Execute a prepared statement.
    ///
    /// If `cancel` is given, cancelling it ends the returned row sequence
    /// without an error.
    pub async fn execute_prepared(
        &self,
        prepared: &PreparedStatement,
        context: Arc<dyn ExecutionContext>,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionResult> {
        match prepared.statement() {
            Statement::Select(query) => {
                let rows = self.run_query(query, &context).await?;
                let rows = match cancel {
                    Some(token) => rows.with_cancellation(token),
                    None => rows,
                };
                Ok(ExecutionResult::Rows(rows))
            }
            Statement::Insert(insert) => {
                let rows = self.run_query(&insert.query, &context).await?;
                let rows = match cancel {
                    Some(token) => rows.with_cancellation(token),
                    None => rows,
                };
                let (name, args) = self.resolve_target(&insert.target, &context)?;
                let target = self.registry.target(&name)?;
                let count = target.write(&args, rows, context).await?;
                info!(target = %name, count, "insert complete");
                Ok(ExecutionResult::Written {
                    target: name,
                    count,
                })
            }
        }
    }

    fn resolve_target(
        &self,
        target: &NodeRef,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<(String, Vec<ScalarValue>)> {
        match target.as_ref() {
            Node::Target(TargetNode::Function { function, args }) => {
                let args = args
                    .iter()
                    .map(|arg| {
                        let bound = self.optimizer.bind(arg, context)?.into_inner();
                        self.evaluator.evaluate_constant(&bound)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((function.clone(), args))
            }
            Node::Target(TargetNode::Variable(name)) => {
                Err(plan_err!("Writing to variable '@{name}' is not supported"))
            }
            other => Err(plan_err!("Invalid insert target '{other}'")),
        }
    }

    /// Plan a query and build the row pipeline for it.
    pub async fn run_query(
        &self,
        query: &SelectQuery,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<RowSequence<Row>> {
        let planner = PushdownPlanner::new(&self.registry, &self.optimizer, &self.evaluator);
        let plan = planner.plan(query, context)?;
        debug!(sources = plan.sources.len(), join_filters = plan.join_filters.len(), "planned query");
        self.build_pipeline(plan, context).await
    }

    async fn build_pipeline(
        &self,
        plan: QueryPlan,
        context: &Arc<dyn ExecutionContext>,
    ) -> Result<RowSequence<Row>> {
        let scans = plan.sources.iter().map(|planned| {
            let context = context.clone();
            async move {
                let rows = planned
                    .source
                    .scan(&planned.args, planned.query.clone(), context)
                    .await?;
                let mut rows = rows.qualify(planned.source_ref.alias.clone());
                if self.config.stream_buffer > 0 {
                    rows = rows.prefetch(self.config.stream_buffer);
                }
                if let Some(residual) = &planned.residual_filter {
                    rows = rows.filter_rows(self.evaluator.clone(), residual.clone());
                }
                Ok::<_, SourceQlError>(rows)
            }
        });
        let sequences = try_join_all(scans).await?;

        let mut sequences = sequences.into_iter();
        let mut rows = match sequences.next() {
            Some(first) => first,
            // Queries without sources produce a single empty row.
            None => RowSequence::from_rows(vec![Row::default()]),
        };

        for (idx, next) in sequences.enumerate() {
            let joined_idx = idx + 1;
            // Predicates become applicable once their last source is joined.
            let predicate = conjunction(
                plan.join_filters
                    .iter()
                    .filter(|p| p.sources.last() == Some(&joined_idx))
                    .map(|p| p.expr.clone()),
            );
            let evaluator = self.evaluator.clone();
            rows = rows.join(next, move |left: &Row, right: &Row| {
                let row = left.concat(right);
                if let Some(predicate) = &predicate {
                    if !evaluator.evaluate_predicate(predicate, &row)? {
                        return Ok(None);
                    }
                }
                Ok(Some(row))
            });
        }

        let constant_predicate = conjunction(
            plan.join_filters
                .iter()
                .filter(|p| p.sources.is_empty())
                .map(|p| p.expr.clone()),
        );
        if let Some(predicate) = constant_predicate {
            rows = rows.filter_rows(self.evaluator.clone(), predicate);
        }

        if !plan.order_by.is_empty() {
            rows = rows.order_rows(self.evaluator.clone(), plan.order_by);
        }
        if let Some(limit) = plan.limit {
            rows = rows.take(usize::try_from(limit).unwrap_or(usize::MAX));
        }

        Ok(rows.project(self.evaluator.clone(), plan.items))
    }
}
