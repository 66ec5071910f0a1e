//! Configuration errors.
//!
//! Every variant is fatal and raised before any task runs.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A `${...}` or `$name` placeholder matched neither a parameter
    /// nor an environment binding.
    #[error("unresolved reference '{reference}' in {key}")]
    UnresolvedReference { key: String, reference: String },

    /// A memory value without a recognized unit suffix.
    #[error("invalid memory value '{0}': expected a unit suffix such as MB or GB")]
    InvalidUnit(String),

    #[error("unknown executor '{0}' (only 'local' is supported)")]
    UnknownExecutor(String),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("missing required option {0}")]
    MissingValue(String),

    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("failed to read config file '{path}': {message}")]
    Read { path: String, message: String },
}
