use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;

/// Opaque handle to the execution context a query template was bound to.
///
/// Two handles are equal only if they point at the same context.
#[derive(Debug, Clone)]
pub struct ContextHandle(pub Arc<dyn ExecutionContext>);

impl ContextHandle {
    pub fn new(context: Arc<dyn ExecutionContext>) -> Self {
        ContextHandle(context)
    }

    pub fn context(&self) -> &dyn ExecutionContext {
        self.0.as_ref()
    }
}

impl PartialEq for ContextHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A single constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    List(Vec<ScalarValue>),
    /// Named members, in declaration order.
    Struct(Vec<(String, ScalarValue)>),
    /// Bound execution context.
    Context(ContextHandle),
}

impl ScalarValue {
    /// Short name of the value's kind, used in error messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int64(_) => "int64",
            Self::Float64(_) => "float64",
            Self::Utf8(_) => "utf8",
            Self::List(_) => "list",
            Self::Struct(_) => "struct",
            Self::Context(_) => "context",
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64(_) | Self::Float64(_))
    }

    pub fn try_as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn try_as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value widened to f64.
    pub fn try_as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn try_as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a struct member by name, ignoring ascii case.
    pub fn struct_member(&self, name: &str) -> Option<&ScalarValue> {
        match self {
            Self::Struct(members) => members
                .iter()
                .find(|(member, _)| member.eq_ignore_ascii_case(name))
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Compare two values of compatible kinds.
    ///
    /// Int64 and Float64 compare numerically. Returns `None` for incompatible
    /// kinds, nulls, and NaN.
    pub fn partial_cmp_value(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.try_as_f64()?.partial_cmp(&b.try_as_f64()?)
            }
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) => {
                for (a, b) in a.iter().zip(b.iter()) {
                    match a.partial_cmp_value(b)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Total ordering used for sorting rows.
    ///
    /// Nulls sort first and values of different kinds are grouped by kind.
    /// Int64 and Float64 share one axis, compared as f64 with `total_cmp`, so
    /// NaN sorts after every other number.
    pub fn sort_cmp(&self, other: &ScalarValue) -> Ordering {
        match (self, other) {
            (Self::Int64(_) | Self::Float64(_), Self::Int64(_) | Self::Float64(_)) => self
                .numeric_key()
                .total_cmp(&other.numeric_key())
                // Ties on the f64 axis: integers first, then exact integer
                // order for values beyond f64 precision.
                .then_with(|| match (self, other) {
                    (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
                    (Self::Int64(_), _) => Ordering::Less,
                    (_, Self::Int64(_)) => Ordering::Greater,
                    _ => Ordering::Equal,
                }),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(a, b)| a.sort_cmp(b))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Self::Struct(a), Self::Struct(b)) => a
                .iter()
                .zip(b.iter())
                .map(|((an, av), (bn, bv))| an.cmp(bn).then_with(|| av.sort_cmp(bv)))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.sort_rank().cmp(&other.sort_rank()),
        }
    }

    fn numeric_key(&self) -> f64 {
        self.try_as_f64().unwrap_or(f64::NAN)
    }

    const fn sort_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Int64(_) | Self::Float64(_) => 2,
            Self::Utf8(_) => 3,
            Self::List(_) => 4,
            Self::Struct(_) => 5,
            Self::Context(_) => 6,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(s) => write!(f, "{s}"),
            Self::List(values) => {
                write!(f, "[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            Self::Struct(members) => {
                write!(f, "{{")?;
                for (idx, (name, value)) in members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Context(_) => write!(f, "<context>"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => ScalarValue::Null,
        }
    }
}
