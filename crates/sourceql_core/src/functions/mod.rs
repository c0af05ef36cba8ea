//! Scalar functions and operators.

pub mod builtin;
pub mod operators;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::errors::{Result, eval_err};
use crate::scalar::ScalarValue;

pub type ScalarFunctionImpl = fn(&[ScalarValue]) -> Result<ScalarValue>;

/// A scalar function callable from queries.
///
/// Method calls (`recv.func(args)`) are evaluated by passing the receiver as
/// the first argument.
#[derive(Clone, Copy)]
pub struct ScalarFunction {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    /// Pure functions always return the same output for the same input and
    /// may be folded at planning time.
    pub pure: bool,
    pub function_impl: ScalarFunctionImpl,
}

impl ScalarFunction {
    pub fn invoke(&self, args: &[ScalarValue]) -> Result<ScalarValue> {
        if args.len() < self.min_args || self.max_args.is_some_and(|max| args.len() > max) {
            return Err(eval_err!(
                "Function '{}' called with {} arguments, expected {}",
                self.name,
                args.len(),
                self.arity_display(),
            ));
        }
        (self.function_impl)(args)
    }

    fn arity_display(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{max}"),
            Some(max) => format!("{} to {max}", self.min_args),
            None => format!("at least {}", self.min_args),
        }
    }
}

impl fmt::Debug for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalarFunction")
            .field("name", &self.name)
            .field("pure", &self.pure)
            .finish_non_exhaustive()
    }
}

/// Lookup table for scalar functions, keyed by lower cased name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, ScalarFunction>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding all builtin functions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for function in builtin::BUILTIN_FUNCTIONS {
            registry.register(*function);
        }
        registry
    }

    /// Shared registry of builtin functions.
    pub fn builtins() -> Arc<FunctionRegistry> {
        static BUILTINS: OnceLock<Arc<FunctionRegistry>> = OnceLock::new();
        BUILTINS
            .get_or_init(|| Arc::new(Self::with_builtins()))
            .clone()
    }

    /// Register a function, replacing any function with the same name.
    pub fn register(&mut self, function: ScalarFunction) {
        self.functions
            .insert(function.name.to_ascii_lowercase(), function);
    }

    pub fn get(&self, name: &str) -> Option<&ScalarFunction> {
        self.functions.get(&name.to_ascii_lowercase())
    }

    /// Check if a function exists and is pure.
    ///
    /// Unknown functions are treated as impure.
    pub fn is_pure(&self, name: &str) -> bool {
        self.get(name).is_some_and(|f| f.pure)
    }

    /// Call a function by name.
    pub fn call(
        &self,
        name: &str,
        receiver: Option<&ScalarValue>,
        args: &[ScalarValue],
    ) -> Result<ScalarValue> {
        let function = self
            .get(name)
            .ok_or_else(|| eval_err!("Unknown function '{name}'"))?;

        match receiver {
            Some(receiver) => {
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(receiver.clone());
                full_args.extend_from_slice(args);
                function.invoke(&full_args)
            }
            None => function.invoke(args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.get("UPPER").is_some());
        assert!(registry.is_pure("Upper"));
        assert!(!registry.is_pure("now"));
        assert!(!registry.is_pure("does_not_exist"));
    }

    #[test]
    fn method_call_passes_receiver_first() {
        let registry = FunctionRegistry::with_builtins();
        let out = registry
            .call("starts_with", Some(&"hello".into()), &["he".into()])
            .unwrap();
        assert_eq!(ScalarValue::Boolean(true), out);
    }

    #[test]
    fn arity_checked() {
        let registry = FunctionRegistry::with_builtins();
        let err = registry.call("upper", None, &[]).unwrap_err();
        assert!(err.to_string().contains("expected 1"), "{err}");
    }

    #[test]
    fn register_custom() {
        let mut registry = FunctionRegistry::empty();
        registry.register(ScalarFunction {
            name: "answer",
            min_args: 0,
            max_args: Some(0),
            pure: true,
            function_impl: |_| Ok(ScalarValue::Int64(42)),
        });
        assert_eq!(
            ScalarValue::Int64(42),
            registry.call("ANSWER", None, &[]).unwrap()
        );
    }
}
