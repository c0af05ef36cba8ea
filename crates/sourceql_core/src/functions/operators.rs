//! Operator tables.
//!
//! Every operator is described by an entry holding the operand compatibility
//! check and the evaluation function. Evaluation looks the entry up, checks
//! the operand kinds, then evaluates. Nothing here depends on rows or on the
//! AST, so the same table backs constant folding and row evaluation.

use std::cmp::Ordering;

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::errors::{Result, SourceQlError, eval_err, internal};
use crate::scalar::ScalarValue;

pub type BinaryEvalFn = fn(&ScalarValue, &ScalarValue) -> Result<ScalarValue>;
pub type UnaryEvalFn = fn(&ScalarValue) -> Result<ScalarValue>;

#[derive(Debug, Clone, Copy)]
pub struct BinaryOperatorDef {
    pub op: BinaryOperator,
    /// Check if the operand kinds are valid for this operator.
    pub accepts: fn(&ScalarValue, &ScalarValue) -> bool,
    pub eval: BinaryEvalFn,
}

#[derive(Debug, Clone, Copy)]
pub struct UnaryOperatorDef {
    pub op: UnaryOperator,
    pub accepts: fn(&ScalarValue) -> bool,
    pub eval: UnaryEvalFn,
}

pub static BINARY_OPERATORS: &[BinaryOperatorDef] = &[
    BinaryOperatorDef {
        op: BinaryOperator::Add,
        accepts: accepts_add,
        eval: eval_add,
    },
    BinaryOperatorDef {
        op: BinaryOperator::Subtract,
        accepts: accepts_numeric,
        eval: eval_subtract,
    },
    BinaryOperatorDef {
        op: BinaryOperator::Multiply,
        accepts: accepts_numeric,
        eval: eval_multiply,
    },
    BinaryOperatorDef {
        op: BinaryOperator::Divide,
        accepts: accepts_numeric,
        eval: eval_divide,
    },
    BinaryOperatorDef {
        op: BinaryOperator::Modulo,
        accepts: accepts_numeric,
        eval: eval_modulo,
    },
    BinaryOperatorDef {
        op: BinaryOperator::Eq,
        accepts: accepts_equality,
        eval: |l, r| eval_equality(l, r, true),
    },
    BinaryOperatorDef {
        op: BinaryOperator::NotEq,
        accepts: accepts_equality,
        eval: |l, r| eval_equality(l, r, false),
    },
    BinaryOperatorDef {
        op: BinaryOperator::Lt,
        accepts: accepts_ordering,
        eval: |l, r| eval_ordering(l, r, |ord| ord == Ordering::Less),
    },
    BinaryOperatorDef {
        op: BinaryOperator::LtEq,
        accepts: accepts_ordering,
        eval: |l, r| eval_ordering(l, r, |ord| ord != Ordering::Greater),
    },
    BinaryOperatorDef {
        op: BinaryOperator::Gt,
        accepts: accepts_ordering,
        eval: |l, r| eval_ordering(l, r, |ord| ord == Ordering::Greater),
    },
    BinaryOperatorDef {
        op: BinaryOperator::GtEq,
        accepts: accepts_ordering,
        eval: |l, r| eval_ordering(l, r, |ord| ord != Ordering::Less),
    },
    BinaryOperatorDef {
        op: BinaryOperator::And,
        accepts: accepts_logical,
        eval: eval_and,
    },
    BinaryOperatorDef {
        op: BinaryOperator::Or,
        accepts: accepts_logical,
        eval: eval_or,
    },
];

pub static UNARY_OPERATORS: &[UnaryOperatorDef] = &[
    UnaryOperatorDef {
        op: UnaryOperator::Not,
        accepts: |v| matches!(v, ScalarValue::Boolean(_) | ScalarValue::Null),
        eval: |v| {
            Ok(match v {
                ScalarValue::Boolean(b) => ScalarValue::Boolean(!b),
                _ => ScalarValue::Null,
            })
        },
    },
    UnaryOperatorDef {
        op: UnaryOperator::Negate,
        accepts: |v| v.is_numeric() || v.is_null(),
        eval: |v| match v {
            ScalarValue::Int64(i) => i
                .checked_neg()
                .map(ScalarValue::Int64)
                .ok_or_else(|| eval_err!("Integer overflow negating {i}")),
            ScalarValue::Float64(f) => Ok(ScalarValue::Float64(-f)),
            _ => Ok(ScalarValue::Null),
        },
    },
    UnaryOperatorDef {
        op: UnaryOperator::IsNull,
        accepts: |_| true,
        eval: |v| Ok(ScalarValue::Boolean(v.is_null())),
    },
    UnaryOperatorDef {
        op: UnaryOperator::IsNotNull,
        accepts: |_| true,
        eval: |v| Ok(ScalarValue::Boolean(!v.is_null())),
    },
];

pub fn binary_operator_def(op: BinaryOperator) -> Result<&'static BinaryOperatorDef> {
    BINARY_OPERATORS
        .iter()
        .find(|def| def.op == op)
        .ok_or_else(|| internal!("Missing operator table entry for '{op}'"))
}

pub fn unary_operator_def(op: UnaryOperator) -> Result<&'static UnaryOperatorDef> {
    UNARY_OPERATORS
        .iter()
        .find(|def| def.op == op)
        .ok_or_else(|| internal!("Missing operator table entry for '{}'", op.symbol()))
}

/// Evaluate a binary operator on two values.
pub fn eval_binary(
    op: BinaryOperator,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<ScalarValue> {
    let def = binary_operator_def(op)?;
    if !(def.accepts)(left, right) {
        return Err(SourceQlError::TypeMismatch {
            op: op.symbol(),
            left: left.kind_name(),
            right: right.kind_name(),
        });
    }
    (def.eval)(left, right)
}

/// Evaluate a unary operator on a value.
pub fn eval_unary(op: UnaryOperator, value: &ScalarValue) -> Result<ScalarValue> {
    let def = unary_operator_def(op)?;
    if !(def.accepts)(value) {
        return Err(SourceQlError::TypeMismatch {
            op: op.symbol(),
            left: value.kind_name(),
            right: "none",
        });
    }
    (def.eval)(value)
}

/// Access a named member of a value.
pub fn eval_member(target: &ScalarValue, member: &str) -> Result<ScalarValue> {
    match target {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Struct(_) => target
            .struct_member(member)
            .cloned()
            .ok_or_else(|| eval_err!("Struct has no member '{member}'")),
        ScalarValue::Context(handle) => handle.context().member(member),
        other => Err(eval_err!(
            "Cannot access member '{member}' on a value of kind {}",
            other.kind_name()
        )),
    }
}

/// Index into a value.
///
/// Lists and strings take a single zero based integer index, structs take a
/// member name. Out of range indexes produce null.
pub fn eval_index(target: &ScalarValue, args: &[ScalarValue]) -> Result<ScalarValue> {
    let arg = match args {
        [arg] => arg,
        _ => return Err(eval_err!("Expected exactly one index, got {}", args.len())),
    };

    match (target, arg) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => Ok(ScalarValue::Null),
        (ScalarValue::List(values), ScalarValue::Int64(idx)) => Ok(usize::try_from(*idx)
            .ok()
            .and_then(|idx| values.get(idx))
            .cloned()
            .unwrap_or(ScalarValue::Null)),
        (ScalarValue::Utf8(s), ScalarValue::Int64(idx)) => Ok(usize::try_from(*idx)
            .ok()
            .and_then(|idx| s.chars().nth(idx))
            .map(|c| ScalarValue::Utf8(c.to_string()))
            .unwrap_or(ScalarValue::Null)),
        (ScalarValue::Struct(_), ScalarValue::Utf8(name)) => eval_member(target, name),
        (target, arg) => Err(eval_err!(
            "Cannot index a value of kind {} with {}",
            target.kind_name(),
            arg.kind_name()
        )),
    }
}

fn either_null(left: &ScalarValue, right: &ScalarValue) -> bool {
    left.is_null() || right.is_null()
}

fn accepts_numeric(left: &ScalarValue, right: &ScalarValue) -> bool {
    (left.is_numeric() || left.is_null()) && (right.is_numeric() || right.is_null())
}

fn accepts_add(left: &ScalarValue, right: &ScalarValue) -> bool {
    accepts_numeric(left, right)
        || matches!(
            (left, right),
            (ScalarValue::Utf8(_), ScalarValue::Utf8(_) | ScalarValue::Null)
                | (ScalarValue::Null, ScalarValue::Utf8(_))
        )
}

fn accepts_equality(left: &ScalarValue, right: &ScalarValue) -> bool {
    if either_null(left, right) {
        return true;
    }
    (left.is_numeric() && right.is_numeric()) || left.kind_name() == right.kind_name()
}

fn accepts_ordering(left: &ScalarValue, right: &ScalarValue) -> bool {
    if either_null(left, right) {
        return true;
    }
    match (left, right) {
        (ScalarValue::Boolean(_), ScalarValue::Boolean(_))
        | (ScalarValue::Utf8(_), ScalarValue::Utf8(_))
        | (ScalarValue::List(_), ScalarValue::List(_)) => true,
        (l, r) => l.is_numeric() && r.is_numeric(),
    }
}

fn accepts_logical(left: &ScalarValue, right: &ScalarValue) -> bool {
    matches!(left, ScalarValue::Boolean(_) | ScalarValue::Null)
        && matches!(right, ScalarValue::Boolean(_) | ScalarValue::Null)
}

/// Apply an arithmetic operation, using checked integer math when both sides
/// are Int64 and f64 math otherwise.
fn arith(
    left: &ScalarValue,
    right: &ScalarValue,
    symbol: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<ScalarValue> {
    if either_null(left, right) {
        return Ok(ScalarValue::Null);
    }
    match (left, right) {
        (ScalarValue::Int64(l), ScalarValue::Int64(r)) => int_op(*l, *r)
            .map(ScalarValue::Int64)
            .ok_or_else(|| eval_err!("Integer overflow evaluating {l} {symbol} {r}")),
        (l, r) => match (l.try_as_f64(), r.try_as_f64()) {
            (Some(l), Some(r)) => Ok(ScalarValue::Float64(float_op(l, r))),
            _ => Err(eval_err!(
                "Cannot apply '{symbol}' to {} and {}",
                l.kind_name(),
                r.kind_name()
            )),
        },
    }
}

fn is_zero(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Int64(v) => *v == 0,
        ScalarValue::Float64(v) => *v == 0.0,
        _ => false,
    }
}

fn eval_add(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    match (left, right) {
        (ScalarValue::Utf8(l), ScalarValue::Utf8(r)) => Ok(ScalarValue::Utf8(format!("{l}{r}"))),
        _ => arith(left, right, "+", i64::checked_add, |l, r| l + r),
    }
}

fn eval_subtract(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    arith(left, right, "-", i64::checked_sub, |l, r| l - r)
}

fn eval_multiply(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    arith(left, right, "*", i64::checked_mul, |l, r| l * r)
}

fn eval_divide(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    if is_zero(right) {
        return Err(eval_err!("Division by zero"));
    }
    arith(left, right, "/", i64::checked_div, |l, r| l / r)
}

fn eval_modulo(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    if is_zero(right) {
        return Err(eval_err!("Division by zero"));
    }
    arith(left, right, "%", i64::checked_rem, |l, r| l % r)
}

fn eval_equality(left: &ScalarValue, right: &ScalarValue, want_equal: bool) -> Result<ScalarValue> {
    if either_null(left, right) {
        return Ok(ScalarValue::Null);
    }
    let equal = match left.partial_cmp_value(right) {
        Some(ord) => ord == Ordering::Equal,
        None => left == right,
    };
    Ok(ScalarValue::Boolean(equal == want_equal))
}

fn eval_ordering(
    left: &ScalarValue,
    right: &ScalarValue,
    pred: fn(Ordering) -> bool,
) -> Result<ScalarValue> {
    if either_null(left, right) {
        return Ok(ScalarValue::Null);
    }
    match left.partial_cmp_value(right) {
        Some(ord) => Ok(ScalarValue::Boolean(pred(ord))),
        // NaN
        None => Ok(ScalarValue::Boolean(false)),
    }
}

fn eval_and(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    Ok(match (left.try_as_bool(), right.try_as_bool()) {
        (Some(false), _) | (_, Some(false)) => ScalarValue::Boolean(false),
        (Some(true), Some(true)) => ScalarValue::Boolean(true),
        _ => ScalarValue::Null,
    })
}

fn eval_or(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    Ok(match (left.try_as_bool(), right.try_as_bool()) {
        (Some(true), _) | (_, Some(true)) => ScalarValue::Boolean(true),
        (Some(false), Some(false)) => ScalarValue::Boolean(false),
        _ => ScalarValue::Null,
    })
}
