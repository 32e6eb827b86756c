//! voltage-formula - Alarm formula evaluation for VoltageEMS
//!
//! An alarm formula is a template that renders to a boolean expression.
//! Evaluation is two-phase:
//!
//! 1. **Render**: `{{ path }}` placeholders and filters are substituted from the context
//! 2. **Evaluate**: the rendered text is parsed as a boolean expression
//!
//! Any failure in either phase is a [`FormulaError`], which callers treat as
//! "no decision".
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use voltage_formula::{Context, FormulaEngine};
//!
//! let engine = FormulaEngine::new();
//! let context: Context = json!({"var": {"value": 34}})
//!     .as_object()
//!     .cloned()
//!     .unwrap_or_default();
//!
//! // 34 = 0b100010
//! assert_eq!(engine.evaluate("{{ var.value|bit:1 }} == 1", &context), Ok(true));
//! assert_eq!(engine.evaluate("bit(var.value, 0) == 1", &context), Ok(false));
//! assert!(engine.evaluate("{{ var.value } == 0", &context).is_err());
//! ```
//!
//! # Built-in Functions
//!
//! | Function | Template form | Expression form | Description |
//! |----------|---------------|-----------------|-------------|
//! | `bit` | `{{ x|bit:i }}` | `bit(x, i)` | Bit `i` of `x`, 0 = least significant |
//! | `default` | `{{ x|default:'v' }}` | - | Fallback for null/empty values |
//! | `upper` / `lower` | `{{ x|upper }}` | - | Case conversion |

pub mod builtin_functions;
pub mod error;
pub mod evaluator;
pub mod template;

/// Evaluation context: a JSON object keyed by top-level name (`var`, `vars`, `device`, ...)
pub type Context = serde_json::Map<String, serde_json::Value>;

// Re-exports for convenience
pub use builtin_functions::{bit, lookup_path};
pub use error::{FormulaError, Result};
pub use evaluator::FormulaEngine;
pub use template::{stringify, TemplateEngine};
