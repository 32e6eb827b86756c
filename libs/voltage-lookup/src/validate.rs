//! Save-time validation of lookup expressions
//!
//! Runs in order: length limit, bracket balance, structural pattern, full parse.

use crate::ast::Expr;
use crate::error::{LookupError, Result};
use crate::parser;
use regex::Regex;
use std::sync::LazyLock;

/// Default maximum lookup length
pub const DEFAULT_MAX_LEN: usize = 255;

/// `Q(...)` terms, optionally negated/grouped, joined by `,`, `&` or `|`
const STRUCTURE_PATTERN: &str = r"^\s*(?:[(~]\s*)*Q\((?:[^()]|\([^()]*\))*\)(?:\s*\))*(?:\s*[,&|]\s*(?:[(~]\s*)*Q\((?:[^()]|\([^()]*\))*\)(?:\s*\))*)*\s*$";

/// Structure pattern, compiled on first use
static STRUCTURE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(STRUCTURE_PATTERN));

/// Check that `(`/`)` and `[`/`]` are balanced and properly nested
///
/// Brackets inside quoted strings are ignored.
pub fn check_balanced(text: &str) -> Result<()> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut quote: Option<char> = None;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' => stack.push((c, i)),
            ')' | ']' => {
                let open = if c == ')' { '(' } else { '[' };
                match stack.pop() {
                    Some((o, _)) if o == open => {},
                    Some((o, at)) => {
                        return Err(LookupError::unbalanced(format!(
                            "'{}' at offset {} closed by '{}' at offset {}",
                            o, at, c, i
                        )))
                    },
                    None => {
                        return Err(LookupError::unbalanced(format!(
                            "unexpected '{}' at offset {}",
                            c, i
                        )))
                    },
                }
            },
            _ => {},
        }
    }

    match stack.pop() {
        Some((o, at)) => Err(LookupError::unbalanced(format!(
            "'{}' at offset {} is never closed",
            o, at
        ))),
        None => Ok(()),
    }
}

/// Check the overall `Q(...)` term structure
pub fn check_structure(text: &str) -> Result<()> {
    let pattern = STRUCTURE
        .as_ref()
        .map_err(|e| LookupError::syntax(format!("Regex error: {}", e)))?;
    if pattern.is_match(text) {
        Ok(())
    } else {
        Err(LookupError::syntax(format!(
            "'{}' is not a combination of Q(...) terms",
            text
        )))
    }
}

/// Validate a lookup expression and return its AST
pub fn validate(text: &str, max_len: usize) -> Result<Expr> {
    let len = text.chars().count();
    if len > max_len {
        return Err(LookupError::TooLong { len, max: max_len });
    }
    check_balanced(text)?;
    check_structure(text)?;
    parser::parse(text)
}
