//! Expression evaluation against rows.

use std::sync::Arc;

use crate::ast::{BinaryOperator, FieldRef, Node};
use crate::errors::{Result, eval_err};
use crate::functions::FunctionRegistry;
use crate::functions::operators::{eval_binary, eval_index, eval_member, eval_unary};
use crate::scalar::ScalarValue;

/// Provides values for field references during evaluation.
pub trait FieldResolver {
    fn resolve_field(&self, field: &FieldRef) -> Result<ScalarValue>;
}

/// Resolver for expressions that must not reference any fields.
#[derive(Debug, Clone, Copy)]
pub struct NoFields;

impl FieldResolver for NoFields {
    fn resolve_field(&self, field: &FieldRef) -> Result<ScalarValue> {
        Err(eval_err!("Cannot reference field '{field}' in a constant expression"))
    }
}

/// Evaluates expression trees using the operator tables and a function
/// registry.
#[derive(Debug, Clone)]
pub struct Evaluator {
    functions: Arc<FunctionRegistry>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(FunctionRegistry::builtins())
    }
}

impl Evaluator {
    pub fn new(functions: Arc<FunctionRegistry>) -> Self {
        Evaluator { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Evaluate an expression, resolving fields through `fields`.
    ///
    /// AND and OR short circuit, and only the selected branch of a
    /// conditional is evaluated.
    pub fn evaluate(&self, node: &Node, fields: &dyn FieldResolver) -> Result<ScalarValue> {
        match node {
            Node::Constant(value) => Ok(value.clone()),
            Node::Field(field) => fields.resolve_field(field),
            Node::Binary(binary) => {
                let left = self.evaluate(&binary.left, fields)?;
                match (binary.op, left.try_as_bool()) {
                    (BinaryOperator::And, Some(false)) => return Ok(ScalarValue::Boolean(false)),
                    (BinaryOperator::Or, Some(true)) => return Ok(ScalarValue::Boolean(true)),
                    _ => (),
                }
                let right = self.evaluate(&binary.right, fields)?;
                eval_binary(binary.op, &left, &right)
            }
            Node::Unary(unary) => {
                let value = self.evaluate(&unary.expr, fields)?;
                eval_unary(unary.op, &value)
            }
            Node::Conditional(conditional) => {
                let test = self.evaluate(&conditional.test, fields)?;
                if truthy(&test)? {
                    self.evaluate(&conditional.if_true, fields)
                } else {
                    self.evaluate(&conditional.if_false, fields)
                }
            }
            Node::Member(member) => {
                let target = self.evaluate(&member.target, fields)?;
                eval_member(&target, &member.member)
            }
            Node::Index(index) => {
                let target = self.evaluate(&index.target, fields)?;
                let args = self.evaluate_all(&index.args, fields)?;
                eval_index(&target, &args)
            }
            Node::Call(call) => {
                let receiver = match &call.receiver {
                    Some(receiver) => Some(self.evaluate(receiver, fields)?),
                    None => None,
                };
                let args = self.evaluate_all(&call.args, fields)?;
                self.functions
                    .call(&call.function, receiver.as_ref(), &args)
            }
            Node::Context => Err(eval_err!(
                "Execution context placeholder was not bound before evaluation"
            )),
            Node::Target(_) => Err(eval_err!("Cannot evaluate statement target '{node}'")),
        }
    }

    /// Evaluate an expression that references no fields.
    pub fn evaluate_constant(&self, node: &Node) -> Result<ScalarValue> {
        self.evaluate(node, &NoFields)
    }

    /// Evaluate a predicate, treating null as false.
    pub fn evaluate_predicate(&self, node: &Node, fields: &dyn FieldResolver) -> Result<bool> {
        let value = self.evaluate(node, fields)?;
        truthy(&value)
    }

    fn evaluate_all(
        &self,
        nodes: &[Arc<Node>],
        fields: &dyn FieldResolver,
    ) -> Result<Vec<ScalarValue>> {
        nodes
            .iter()
            .map(|node| self.evaluate(node, fields))
            .collect::<Result<Vec<_>>>()
    }
}

/// Interpret a value as a condition. Null is false.
pub fn truthy(value: &ScalarValue) -> Result<bool> {
    match value {
        ScalarValue::Boolean(b) => Ok(*b),
        ScalarValue::Null => Ok(false),
        other => Err(eval_err!(
            "Expected a boolean condition, got {}",
            other.kind_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ast::{add, and, call, conditional, field, gt, lit, member, or};

    struct MapResolver(HashMap<String, ScalarValue>);

    impl FieldResolver for MapResolver {
        fn resolve_field(&self, field: &FieldRef) -> Result<ScalarValue> {
            self.0
                .get(&field.name)
                .cloned()
                .ok_or_else(|| eval_err!("missing {field}"))
        }
    }

    fn resolver() -> MapResolver {
        MapResolver(
            [("age".to_string(), 30.into()), ("name".to_string(), "ann".into())]
                .into_iter()
                .collect(),
        )
    }

    #[test]
    fn evaluate_with_fields() {
        let expr = and(gt(field("age"), lit(21)), gt(call("length", vec![field("name")]), lit(2)));
        let out = Evaluator::default().evaluate(&expr, &resolver()).unwrap();
        assert_eq!(ScalarValue::Boolean(true), out);
    }

    #[test]
    fn and_short_circuits() {
        // Right side would fail on the missing field.
        let expr = and(lit(false), gt(field("missing"), lit(1)));
        let out = Evaluator::default().evaluate(&expr, &resolver()).unwrap();
        assert_eq!(ScalarValue::Boolean(false), out);

        let expr = or(lit(true), field("missing"));
        let out = Evaluator::default().evaluate(&expr, &resolver()).unwrap();
        assert_eq!(ScalarValue::Boolean(true), out);
    }

    #[test]
    fn conditional_evaluates_selected_branch() {
        let expr = conditional(lit(true), add(field("age"), lit(1)), field("missing"));
        let out = Evaluator::default().evaluate(&expr, &resolver()).unwrap();
        assert_eq!(ScalarValue::Int64(31), out);
    }

    #[test]
    fn constant_rejects_fields() {
        assert!(Evaluator::default().evaluate_constant(&field("a")).is_err());
    }

    #[test]
    fn unbound_context_fails() {
        let expr = member(crate::ast::context(), "user");
        assert!(Evaluator::default().evaluate_constant(&expr).is_err());
    }

    #[test]
    fn predicate_null_is_false() {
        let expr = gt(lit(ScalarValue::Null), lit(1));
        assert!(!Evaluator::default().evaluate_predicate(&expr, &NoFields).unwrap());
    }
}
