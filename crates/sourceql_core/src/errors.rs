#[derive(Debug, thiserror::Error)]
pub enum SourceQlError {
    /// A constant (or row) expression could not be evaluated.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("type mismatch: operator '{op}' cannot be applied to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("planning error: {0}")]
    Planning(String),

    /// Failure raised by a data source or target while producing or consuming
    /// rows.
    #[error("source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    #[error("query execution was cancelled")]
    Cancelled,

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("internal: {0}")]
    Internal(String),
}

impl SourceQlError {
    pub fn source_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        SourceQlError::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = SourceQlError> = std::result::Result<T, E>;

#[allow(unused_macros)]
macro_rules! internal {
    ($($arg:tt)*) => {
        crate::errors::SourceQlError::Internal(std::format!($($arg)*))
    };
}
#[allow(unused_imports)]
pub(crate) use internal;

macro_rules! eval_err {
    ($($arg:tt)*) => {
        crate::errors::SourceQlError::Evaluation(std::format!($($arg)*))
    };
}
pub(crate) use eval_err;

macro_rules! plan_err {
    ($($arg:tt)*) => {
        crate::errors::SourceQlError::Planning(std::format!($($arg)*))
    };
}
pub(crate) use plan_err;
