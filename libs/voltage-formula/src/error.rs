//! Error types for voltage-formula

use thiserror::Error;

/// Formula evaluation errors
///
/// Every variant means "no decision" to the caller: the alarm is neither
/// opened nor closed for this evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormulaError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Expression did not evaluate to a boolean: {0}")]
    NotBoolean(String),
}

impl FormulaError {
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn variable_not_found(name: impl Into<String>) -> Self {
        Self::VariableNotFound(name.into())
    }

    pub fn filter(msg: impl Into<String>) -> Self {
        Self::Filter(msg.into())
    }

    pub fn expression(msg: impl Into<String>) -> Self {
        Self::Expression(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FormulaError>;
