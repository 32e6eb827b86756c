//! voltage-lookup - Lookup expressions for VoltageEMS monitors
//!
//! A lookup selects variables dynamically with Django-style `Q(...)` terms:
//!
//! ```text
//! Q(slug__startswith='food')
//! Q(device__in=[1, 2]) & ~Q(var_type='voltage')
//! (Q(device__profile__name='Feeder') | Q(device__connected=False)), Q(value__gt=0)
//! ```
//!
//! Expressions are validated (length, bracket balance, structure) and parsed
//! into an [`Expr`] tree, then evaluated against any [`LookupRecord`].
//!
//! # Example
//!
//! ```rust
//! use voltage_lookup::{FieldValue, Lookup, LookupRecord};
//!
//! struct Var { slug: &'static str }
//!
//! impl LookupRecord for Var {
//!     fn field(&self, path: &str) -> Option<FieldValue> {
//!         match path {
//!             "slug" => Some(FieldValue::from(self.slug)),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let lookup = Lookup::parse("Q(slug__startswith='food')").unwrap();
//! let vars = [Var { slug: "food-1" }, Var { slug: "water-1" }];
//!
//! assert_eq!(lookup.resolve(&vars).map(|v| v.len()), Ok(1));
//! assert_eq!(lookup.matches(&vars[1]), Ok(false));
//! ```

pub mod ast;
pub mod error;
pub mod executor;
pub mod parser;
pub mod validate;

pub use ast::{Expr, FieldValue, Literal, Operator, Predicate};
pub use error::{LookupError, Result};
pub use executor::LookupRecord;
pub use validate::{check_balanced, check_structure, validate, DEFAULT_MAX_LEN};

use tracing::debug;

/// A validated, parsed lookup expression
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    source: String,
    expr: Expr,
}

impl Lookup {
    /// Validate and parse with the default length limit
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_limit(source, DEFAULT_MAX_LEN)
    }

    pub fn parse_with_limit(source: &str, max_len: usize) -> Result<Self> {
        let expr = validate::validate(source, max_len)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Whether one record falls inside the lookup
    pub fn matches<R: LookupRecord + ?Sized>(&self, record: &R) -> Result<bool> {
        executor::evaluate(&self.expr, record)
    }

    /// All matching records; any evaluation error fails the whole resolve
    pub fn resolve<'a, R, I>(&self, records: I) -> Result<Vec<&'a R>>
    where
        R: LookupRecord + 'a,
        I: IntoIterator<Item = &'a R>,
    {
        let mut matched = Vec::new();
        let mut scanned = 0usize;
        for record in records {
            scanned += 1;
            if self.matches(record)? {
                matched.push(record);
            }
        }
        debug!(
            lookup = %self.source,
            scanned = scanned,
            matched = matched.len(),
            "Lookup resolved"
        );
        Ok(matched)
    }
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
