//! Domain module for alarm service
//!
//! Entities, event keys, slug generation and the JSON views exposed to
//! formulas and notification templates.

pub mod context;
pub mod slug;
pub mod types;

pub use slug::{slugify, unique_slug};
pub use types::*;
