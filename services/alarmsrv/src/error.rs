//! Error handling for AlarmSrv
//!
//! Validation failures carry a human-readable reason. Formula, lookup,
//! template and mail errors are normally logged and absorbed by the engine;
//! store errors propagate to the caller.

use thiserror::Error;
use voltage_formula::FormulaError;
use voltage_lookup::LookupError;

/// Result type alias
pub type Result<T> = std::result::Result<T, AlarmError>;

/// Alarm service errors
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Rejected write (subscription admission, monitor/alarm save)
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Backing store failure
    #[error("Store error: {0}")]
    Store(String),

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// Notification template failed to parse or render
    #[error("Template error: {0}")]
    Template(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlarmError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn mail(msg: impl Into<String>) -> Self {
        Self::Mail(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error is a rejected write rather than a failure
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<handlebars::TemplateError> for AlarmError {
    fn from(err: handlebars::TemplateError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<handlebars::RenderError> for AlarmError {
    fn from(err: handlebars::RenderError) -> Self {
        Self::Template(err.to_string())
    }
}

impl From<figment::Error> for AlarmError {
    fn from(err: figment::Error) -> Self {
        Self::Config(err.to_string())
    }
}
