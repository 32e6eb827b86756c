//! Error types for voltage-lookup

use thiserror::Error;

/// Lookup expression errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LookupError {
    #[error("Unbalanced brackets: {0}")]
    Unbalanced(String),

    #[error("Invalid lookup syntax: {0}")]
    Syntax(String),

    #[error("Lookup too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl LookupError {
    pub fn unbalanced(msg: impl Into<String>) -> Self {
        Self::Unbalanced(msg.into())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        Self::Syntax(msg.into())
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField(field.into())
    }

    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LookupError>;
