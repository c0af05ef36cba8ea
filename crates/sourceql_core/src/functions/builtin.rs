use chrono::Utc;

use super::ScalarFunction;
use crate::errors::{Result, eval_err};
use crate::scalar::ScalarValue;

pub static BUILTIN_FUNCTIONS: &[ScalarFunction] = &[
    ScalarFunction {
        name: "abs",
        min_args: 1,
        max_args: Some(1),
        pure: true,
        function_impl: abs,
    },
    ScalarFunction {
        name: "round",
        min_args: 1,
        max_args: Some(2),
        pure: true,
        function_impl: round,
    },
    ScalarFunction {
        name: "upper",
        min_args: 1,
        max_args: Some(1),
        pure: true,
        function_impl: |args| map_str(&args[0], |s| s.to_uppercase()),
    },
    ScalarFunction {
        name: "lower",
        min_args: 1,
        max_args: Some(1),
        pure: true,
        function_impl: |args| map_str(&args[0], |s| s.to_lowercase()),
    },
    ScalarFunction {
        name: "trim",
        min_args: 1,
        max_args: Some(1),
        pure: true,
        function_impl: |args| map_str(&args[0], |s| s.trim().to_string()),
    },
    ScalarFunction {
        name: "length",
        min_args: 1,
        max_args: Some(1),
        pure: true,
        function_impl: length,
    },
    ScalarFunction {
        name: "substr",
        min_args: 2,
        max_args: Some(3),
        pure: true,
        function_impl: substr,
    },
    ScalarFunction {
        name: "starts_with",
        min_args: 2,
        max_args: Some(2),
        pure: true,
        function_impl: |args| str_predicate(args, |s, p| s.starts_with(p)),
    },
    ScalarFunction {
        name: "contains",
        min_args: 2,
        max_args: Some(2),
        pure: true,
        function_impl: |args| str_predicate(args, |s, p| s.contains(p)),
    },
    ScalarFunction {
        name: "concat",
        min_args: 0,
        max_args: None,
        pure: true,
        function_impl: concat,
    },
    ScalarFunction {
        name: "coalesce",
        min_args: 1,
        max_args: None,
        pure: true,
        function_impl: |args| {
            Ok(args
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(ScalarValue::Null))
        },
    },
    // Milliseconds since the unix epoch.
    ScalarFunction {
        name: "now",
        min_args: 0,
        max_args: Some(0),
        pure: false,
        function_impl: |_| Ok(ScalarValue::Int64(Utc::now().timestamp_millis())),
    },
];

fn map_str(value: &ScalarValue, func: impl Fn(&str) -> String) -> Result<ScalarValue> {
    match value {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Utf8(s) => Ok(ScalarValue::Utf8(func(s))),
        other => Err(eval_err!("Expected a string, got {}", other.kind_name())),
    }
}

fn str_predicate(args: &[ScalarValue], pred: impl Fn(&str, &str) -> bool) -> Result<ScalarValue> {
    match (&args[0], &args[1]) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => Ok(ScalarValue::Null),
        (ScalarValue::Utf8(s), ScalarValue::Utf8(p)) => Ok(ScalarValue::Boolean(pred(s, p))),
        (a, b) => Err(eval_err!(
            "Expected two strings, got {} and {}",
            a.kind_name(),
            b.kind_name()
        )),
    }
}

fn abs(args: &[ScalarValue]) -> Result<ScalarValue> {
    match &args[0] {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Int64(v) => v
            .checked_abs()
            .map(ScalarValue::Int64)
            .ok_or_else(|| eval_err!("Integer overflow in abs({v})")),
        ScalarValue::Float64(v) => Ok(ScalarValue::Float64(v.abs())),
        other => Err(eval_err!("Expected a number, got {}", other.kind_name())),
    }
}

fn round(args: &[ScalarValue]) -> Result<ScalarValue> {
    let digits = match args.get(1) {
        None => 0,
        Some(ScalarValue::Int64(d)) => *d,
        Some(other) => {
            return Err(eval_err!(
                "Expected an integer digit count, got {}",
                other.kind_name()
            ));
        }
    };

    match &args[0] {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Int64(v) => Ok(ScalarValue::Int64(*v)),
        ScalarValue::Float64(v) => {
            let factor = 10_f64.powi(digits.clamp(-300, 300) as i32);
            Ok(ScalarValue::Float64((v * factor).round() / factor))
        }
        other => Err(eval_err!("Expected a number, got {}", other.kind_name())),
    }
}

fn length(args: &[ScalarValue]) -> Result<ScalarValue> {
    match &args[0] {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Utf8(s) => Ok(ScalarValue::Int64(s.chars().count() as i64)),
        ScalarValue::List(values) => Ok(ScalarValue::Int64(values.len() as i64)),
        other => Err(eval_err!(
            "Expected a string or list, got {}",
            other.kind_name()
        )),
    }
}

/// `substr(s, start[, len])`, start is one based.
fn substr(args: &[ScalarValue]) -> Result<ScalarValue> {
    if args.iter().any(|v| v.is_null()) {
        return Ok(ScalarValue::Null);
    }
    let s = args[0]
        .try_as_str()
        .ok_or_else(|| eval_err!("substr expects a string, got {}", args[0].kind_name()))?;
    let start = args[1]
        .try_as_i64()
        .ok_or_else(|| eval_err!("substr expects an integer start"))?;
    let len = match args.get(2) {
        Some(v) => Some(
            v.try_as_i64()
                .ok_or_else(|| eval_err!("substr expects an integer length"))?,
        ),
        None => None,
    };

    let skip = usize::try_from(start.saturating_sub(1)).unwrap_or(0);
    let chars = s.chars().skip(skip);
    let out: String = match len {
        Some(len) => chars.take(usize::try_from(len).unwrap_or(0)).collect(),
        None => chars.collect(),
    };
    Ok(ScalarValue::Utf8(out))
}

/// Concatenate the string form of all non-null arguments.
fn concat(args: &[ScalarValue]) -> Result<ScalarValue> {
    let mut out = String::new();
    for arg in args {
        match arg {
            ScalarValue::Null => (),
            ScalarValue::Context(_) => {
                return Err(eval_err!("Cannot concatenate an execution context"));
            }
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(ScalarValue::Utf8(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;

    fn call(name: &str, args: &[ScalarValue]) -> ScalarValue {
        FunctionRegistry::builtins().call(name, None, args).unwrap()
    }

    #[test]
    fn string_functions() {
        assert_eq!(ScalarValue::from("ABC"), call("upper", &["abc".into()]));
        assert_eq!(ScalarValue::from("abc"), call("trim", &["  abc ".into()]));
        assert_eq!(ScalarValue::Int64(3), call("length", &["abc".into()]));
        assert_eq!(
            ScalarValue::from("ell"),
            call("substr", &["hello".into(), 2.into(), 3.into()])
        );
        assert_eq!(
            ScalarValue::from("a1"),
            call("concat", &["a".into(), ScalarValue::Null, 1.into()])
        );
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(ScalarValue::Int64(3), call("abs", &[(-3).into()]));
        assert_eq!(ScalarValue::Float64(1.23), call("round", &[1.234.into(), 2.into()]));
    }

    #[test]
    fn coalesce_picks_first_non_null() {
        assert_eq!(
            ScalarValue::Int64(2),
            call("coalesce", &[ScalarValue::Null, 2.into(), 3.into()])
        );
    }

    #[test]
    fn nulls_propagate() {
        assert_eq!(ScalarValue::Null, call("upper", &[ScalarValue::Null]));
        assert_eq!(
            ScalarValue::Null,
            call("contains", &[ScalarValue::Null, "a".into()])
        );
    }

    #[test]
    fn wrong_argument_kind() {
        assert!(FunctionRegistry::builtins()
            .call("upper", None, &[1.into()])
            .is_err());
    }
}
