//! Built-in functions shared by the template filters and the expression evaluator
//!
//! - `bit(value, index)`: extract one bit of a status register
//! - `lookup_path(context, "a.b.c")`: dotted access into a JSON context

use crate::error::{FormulaError, Result};
use serde_json::Value;

/// Extract bit `index` (0 = least significant) from a non-negative integer
///
/// Lets many independent boolean alarms share one integer status register:
/// `bit(34, 1) == 1`, `bit(34, 5) == 1`, `bit(34, 0) == 0` (34 = 0b100010).
/// Indices beyond the width of the value read as 0.
pub fn bit(value: i64, index: i64) -> Result<i64> {
    if value < 0 {
        return Err(FormulaError::filter(format!(
            "bit: value must be non-negative, got {}",
            value
        )));
    }
    if index < 0 {
        return Err(FormulaError::filter(format!(
            "bit: index must be non-negative, got {}",
            index
        )));
    }
    if index >= 63 {
        return Ok(0);
    }
    Ok((value >> index) & 1)
}

/// Resolve a dotted path (`vars.food.value`, `items.0`) against a JSON value
///
/// Returns `None` when any segment is missing.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Convert a JSON scalar to an integer for bit extraction
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bit_extraction() {
        // 34 = 100010
        assert_eq!(bit(34, 0).unwrap(), 0);
        assert_eq!(bit(34, 1).unwrap(), 1);
        assert_eq!(bit(34, 2).unwrap(), 0);
        assert_eq!(bit(34, 5).unwrap(), 1);
        assert_eq!(bit(32, 1).unwrap(), 0);
        assert_eq!(bit(0, 0).unwrap(), 0);
    }

    #[test]
    fn test_bit_matches_binary_representation() {
        for value in [0_i64, 1, 7, 34, 255, 1023, 65_535, 1 << 40] {
            let binary = format!("{:b}", value);
            for (i, c) in binary.chars().rev().enumerate() {
                let expected = if c == '1' { 1 } else { 0 };
                assert_eq!(bit(value, i as i64).unwrap(), expected, "{} bit {}", value, i);
            }
        }
    }

    #[test]
    fn test_bit_out_of_range_index_is_zero() {
        assert_eq!(bit(34, 40).unwrap(), 0);
        assert_eq!(bit(34, 200).unwrap(), 0);
    }

    #[test]
    fn test_bit_rejects_negative_input() {
        assert!(bit(-1, 0).is_err());
        assert!(bit(4, -1).is_err());
    }

    #[test]
    fn test_lookup_path() {
        let ctx = json!({"vars": {"food": {"value": 3}}, "list": [10, 20]});
        assert_eq!(lookup_path(&ctx, "vars.food.value"), Some(&json!(3)));
        assert_eq!(lookup_path(&ctx, "list.1"), Some(&json!(20)));
        assert_eq!(lookup_path(&ctx, "vars.voltage.value"), None);
        assert_eq!(lookup_path(&ctx, "vars.food.value.extra"), None);
    }
}
