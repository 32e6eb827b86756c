//! Lookup evaluation against records

use crate::ast::{Expr, FieldValue, Literal, Operator, Predicate};
use crate::error::{LookupError, Result};
use std::cmp::Ordering;

/// A record that lookups can be evaluated against
///
/// `field` receives the `__`-separated path (`slug`, `device__profile__name`)
/// and returns `None` for fields the record does not have.
pub trait LookupRecord {
    fn field(&self, path: &str) -> Option<FieldValue>;
}

/// Evaluate an expression against one record
///
/// Every branch is evaluated, so an unknown field is reported even when
/// another branch already decided the result.
pub fn evaluate<R: LookupRecord + ?Sized>(expr: &Expr, record: &R) -> Result<bool> {
    match expr {
        Expr::And(children) => Ok(evaluate_all(children, record)?.into_iter().all(|b| b)),
        Expr::Or(children) => Ok(evaluate_all(children, record)?.into_iter().any(|b| b)),
        Expr::Not(inner) => evaluate(inner, record).map(|b| !b),
        Expr::Term(predicates) => {
            let results = predicates
                .iter()
                .map(|p| evaluate_predicate(p, record))
                .collect::<Result<Vec<bool>>>()?;
            Ok(results.into_iter().all(|b| b))
        },
    }
}

fn evaluate_all<R: LookupRecord + ?Sized>(children: &[Expr], record: &R) -> Result<Vec<bool>> {
    children.iter().map(|c| evaluate(c, record)).collect()
}

fn evaluate_predicate<R: LookupRecord + ?Sized>(predicate: &Predicate, record: &R) -> Result<bool> {
    let field = &predicate.field;
    let actual = record
        .field(field)
        .ok_or_else(|| LookupError::unknown_field(field.as_str()))?;
    let expected = &predicate.value;

    match predicate.op {
        Operator::Exact => equals(&actual, expected, field),
        Operator::IExact => text_match(&actual, expected, field, true, |a, e| a == e),
        Operator::Contains => text_match(&actual, expected, field, false, |a, e| a.contains(e)),
        Operator::IContains => text_match(&actual, expected, field, true, |a, e| a.contains(e)),
        Operator::StartsWith => {
            text_match(&actual, expected, field, false, |a, e| a.starts_with(e))
        },
        Operator::IStartsWith => {
            text_match(&actual, expected, field, true, |a, e| a.starts_with(e))
        },
        Operator::EndsWith => text_match(&actual, expected, field, false, |a, e| a.ends_with(e)),
        Operator::IEndsWith => text_match(&actual, expected, field, true, |a, e| a.ends_with(e)),
        Operator::In => match expected {
            Literal::List(items) => {
                for item in items {
                    if equals(&actual, item, field)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
            _ => Err(LookupError::invalid_value(field.as_str(), "'in' requires a list")),
        },
        Operator::Gt => compare(&actual, expected, field, Ordering::is_gt),
        Operator::Gte => compare(&actual, expected, field, Ordering::is_ge),
        Operator::Lt => compare(&actual, expected, field, Ordering::is_lt),
        Operator::Lte => compare(&actual, expected, field, Ordering::is_le),
        Operator::IsNull => match expected {
            Literal::Bool(b) => Ok((actual == FieldValue::Null) == *b),
            _ => Err(LookupError::invalid_value(
                field.as_str(),
                "'isnull' requires True or False",
            )),
        },
    }
}

fn equals(actual: &FieldValue, expected: &Literal, field: &str) -> Result<bool> {
    Ok(match (actual, expected) {
        (FieldValue::Null, Literal::None) => true,
        (FieldValue::Null, _) | (_, Literal::None) => false,
        (FieldValue::Str(a), Literal::Str(e)) => a == e,
        (FieldValue::Bool(a), Literal::Bool(e)) => a == e,
        (FieldValue::Bool(a), Literal::Int(e)) => i64::from(*a) == *e,
        (FieldValue::Int(a), Literal::Int(e)) => a == e,
        (FieldValue::Int(a), Literal::Float(e)) => (*a as f64) == *e,
        (FieldValue::Float(a), Literal::Int(e)) => *a == (*e as f64),
        (FieldValue::Float(a), Literal::Float(e)) => a == e,
        (FieldValue::Int(a), Literal::Str(e)) => {
            let parsed: i64 = e.trim().parse().map_err(|_| {
                LookupError::invalid_value(field, format!("'{}' is not an integer", e))
            })?;
            *a == parsed
        },
        (FieldValue::Str(a), Literal::Int(e)) => *a == e.to_string(),
        (_, Literal::List(_)) => {
            return Err(LookupError::invalid_value(
                field,
                "a list is only valid with 'in'",
            ))
        },
        (a, e) => {
            return Err(LookupError::invalid_value(
                field,
                format!("cannot compare {:?} with {:?}", a, e),
            ))
        },
    })
}

fn text_match(
    actual: &FieldValue,
    expected: &Literal,
    field: &str,
    case_insensitive: bool,
    matcher: fn(&str, &str) -> bool,
) -> Result<bool> {
    let needle = match expected {
        Literal::Str(s) => s.clone(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        _ => {
            return Err(LookupError::invalid_value(
                field,
                "text lookups require a string",
            ))
        },
    };
    let haystack = match actual {
        FieldValue::Null => return Ok(false),
        FieldValue::Str(s) => s.clone(),
        FieldValue::Int(i) => i.to_string(),
        FieldValue::Float(f) => f.to_string(),
        FieldValue::Bool(b) => if *b { "True" } else { "False" }.to_string(),
    };

    if case_insensitive {
        Ok(matcher(&haystack.to_lowercase(), &needle.to_lowercase()))
    } else {
        Ok(matcher(&haystack, &needle))
    }
}

fn compare(
    actual: &FieldValue,
    expected: &Literal,
    field: &str,
    accept: fn(Ordering) -> bool,
) -> Result<bool> {
    let ordering = match (actual, expected) {
        (FieldValue::Null, _) => return Ok(false),
        (FieldValue::Str(a), Literal::Str(e)) => Some(a.as_str().cmp(e.as_str())),
        (FieldValue::Int(a), Literal::Int(e)) => Some(a.cmp(e)),
        (FieldValue::Int(a), Literal::Float(e)) => (*a as f64).partial_cmp(e),
        (FieldValue::Float(a), Literal::Int(e)) => a.partial_cmp(&(*e as f64)),
        (FieldValue::Float(a), Literal::Float(e)) => a.partial_cmp(e),
        (a, e) => {
            return Err(LookupError::invalid_value(
                field,
                format!("cannot order {:?} against {:?}", a, e),
            ))
        },
    };
    Ok(ordering.is_some_and(accept))
}
