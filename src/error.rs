//! Error type shared by every data-context operation.
//!
//! Errors carry enough context to diagnose a failure (target type, statement
//! text, parameter count) but never render bound parameter values, so
//! credentials passed as parameters cannot leak into logs.

use std::fmt;

/// Longest statement prefix rendered in error messages
const MAX_SQL_IN_MESSAGE: usize = 120;

/// Data-context error type
#[derive(Debug)]
pub enum ContextError {
    /// Mapping configuration is missing, duplicated, invalid or could not be instantiated.
    ///
    /// Fatal: raised while the model is being built, or when a caller asks for a type
    /// the model does not know.
    Configuration {
        /// The entity, projection or configuration type involved
        target: String,
        message: String,
    },
    /// A caller passed an argument the operation cannot accept
    InvalidArgument(String),
    /// The backend failed to execute a statement (constraint violation, connectivity, timeout)
    Execution {
        sql: String,
        parameter_count: usize,
        message: String,
    },
    /// Begin, commit or rollback failed
    Transaction(String),
    /// A result row could not be converted into the requested type
    Materialization { target: String, message: String },
    /// Connection string validation or connection establishment failed
    Connection(String),
}

impl ContextError {
    /// Build a configuration error for `target`
    pub fn configuration(target: impl Into<String>, message: impl Into<String>) -> Self {
        ContextError::Configuration {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Build an execution error, keeping a truncated copy of the statement text
    pub fn execution(sql: &str, parameter_count: usize, message: impl Into<String>) -> Self {
        ContextError::Execution {
            sql: truncate_sql(sql),
            parameter_count,
            message: message.into(),
        }
    }

    /// Build a materialization error for `target`
    pub fn materialization(target: impl Into<String>, message: impl Into<String>) -> Self {
        ContextError::Materialization {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort startup rather than a single call
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContextError::Configuration { .. })
    }
}

fn truncate_sql(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.chars().count() <= MAX_SQL_IN_MESSAGE {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_SQL_IN_MESSAGE).collect();
    out.push_str("...");
    out
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::Configuration { target, message } => {
                write!(f, "Configuration error for {target}: {message}")
            }
            ContextError::InvalidArgument(s) => {
                write!(f, "Invalid argument: {s}")
            }
            ContextError::Execution {
                sql,
                parameter_count,
                message,
            } => {
                write!(
                    f,
                    "Execution error: {message} (statement: `{sql}`, {parameter_count} parameter(s))"
                )
            }
            ContextError::Transaction(s) => {
                write!(f, "Transaction error: {s}")
            }
            ContextError::Materialization { target, message } => {
                write!(f, "Materialization error for {target}: {message}")
            }
            ContextError::Connection(s) => {
                write!(f, "Connection error: {s}")
            }
        }
    }
}

impl std::error::Error for ContextError {}

impl From<config::ConfigError> for ContextError {
    fn from(err: config::ConfigError) -> Self {
        ContextError::configuration("ContextConfig", err.to_string())
    }
}
