//! Template rendering - first phase of formula evaluation
//!
//! Supports the small template dialect used by alarm formulas:
//!
//! - `{{ path.to.value }}` variable substitution (dotted access into the context)
//! - `{{ value|filter }}` / `{{ value|filter:arg }}` filters: `bit`, `default`,
//!   `upper`, `lower`
//! - `{% load ... %}` tags (accepted and ignored, any other tag is an error)
//! - `{# comment #}` comments
//!
//! A missing variable is an error: a formula that cannot be fully rendered
//! has no decision.

use crate::builtin_functions::{as_integer, bit, lookup_path};
use crate::error::{FormulaError, Result};
use crate::Context;
use serde_json::Value;

/// Formula template renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Render a template against a context
    pub fn render(&self, template: &str, context: &Context) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some((start, close)) = next_block(rest) {
            out.push_str(&rest[..start]);

            let body_start = start + 2;
            let body_len = rest[body_start..].find(close).ok_or_else(|| {
                FormulaError::template(format!(
                    "unclosed '{}' block: expected '{}' in '{}'",
                    &rest[start..body_start],
                    close,
                    template
                ))
            })?;
            let body = rest[body_start..body_start + body_len].trim();

            match close {
                "}}" => out.push_str(&self.render_variable(body, context)?),
                "%}" => check_tag(body)?,
                _ => {}, // comment
            }

            rest = &rest[body_start + body_len + close.len()..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Render the body of a `{{ ... }}` block
    fn render_variable(&self, body: &str, context: &Context) -> Result<String> {
        let mut parts = split_outside_quotes(body, '|').into_iter();
        let head = parts.next().map(str::trim).unwrap_or_default();
        if head.is_empty() {
            return Err(FormulaError::template("empty variable block '{{ }}'"));
        }

        let mut value = self.resolve_operand(head, context)?;
        for filter in parts {
            value = self.apply_filter(filter.trim(), value, context)?;
        }

        Ok(stringify(&value))
    }

    /// Resolve a literal or a context path
    fn resolve_operand(&self, operand: &str, context: &Context) -> Result<Value> {
        if let Some(literal) = parse_literal(operand) {
            return Ok(literal);
        }
        if !is_valid_path(operand) {
            return Err(FormulaError::template(format!(
                "invalid variable expression '{}'",
                operand
            )));
        }

        resolve_path(context, operand)
            .cloned()
            .ok_or_else(|| FormulaError::variable_not_found(operand))
    }

    fn apply_filter(&self, filter: &str, value: Value, context: &Context) -> Result<Value> {
        let (name, arg) = match filter.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (filter, None),
        };

        match name {
            "bit" => {
                let arg = arg.ok_or_else(|| FormulaError::filter("bit requires an index"))?;
                let index = as_integer(&self.resolve_operand(arg, context)?)
                    .ok_or_else(|| FormulaError::filter(format!("bit: invalid index '{}'", arg)))?;
                let number = as_integer(&value).ok_or_else(|| {
                    FormulaError::filter(format!("bit: value is not an integer: {}", value))
                })?;
                Ok(Value::from(bit(number, index)?))
            },
            "default" => {
                let arg = arg.ok_or_else(|| FormulaError::filter("default requires a value"))?;
                if is_truthy(&value) {
                    Ok(value)
                } else {
                    self.resolve_operand(arg, context)
                }
            },
            "upper" => Ok(Value::String(stringify(&value).to_uppercase())),
            "lower" => Ok(Value::String(stringify(&value).to_lowercase())),
            other => Err(FormulaError::filter(format!("unknown filter '{}'", other))),
        }
    }
}

/// Resolve a dotted path whose first segment is a context key
pub fn resolve_path<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        Some((head, tail)) => lookup_path(context.get(head)?, tail),
        None => context.get(path),
    }
}

/// Find the next `{{`, `{%` or `{#` opener, returning its offset and closer
fn next_block(text: &str) -> Option<(usize, &'static str)> {
    let bytes = text.as_bytes();
    text.match_indices('{').find_map(|(i, _)| match bytes.get(i + 1) {
        Some(b'{') => Some((i, "}}")),
        Some(b'%') => Some((i, "%}")),
        Some(b'#') => Some((i, "#}")),
        _ => None,
    })
}

fn check_tag(body: &str) -> Result<()> {
    match body.split_whitespace().next() {
        Some("load") => Ok(()),
        Some(tag) => Err(FormulaError::template(format!("unsupported tag '{}'", tag))),
        None => Err(FormulaError::template("empty tag '{% %}'")),
    }
}

fn split_outside_quotes(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut last = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {},
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == sep => {
                parts.push(&text[last..i]);
                last = i + c.len_utf8();
            },
            None => {},
        }
    }
    parts.push(&text[last..]);
    parts
}

fn parse_literal(operand: &str) -> Option<Value> {
    let quoted = |q: char| operand.len() >= 2 && operand.starts_with(q) && operand.ends_with(q);
    if quoted('"') || quoted('\'') {
        return Some(Value::String(operand[1..operand.len() - 1].to_string()));
    }
    match operand {
        "True" | "true" => return Some(Value::Bool(true)),
        "False" | "false" => return Some(Value::Bool(false)),
        "None" => return Some(Value::Null),
        _ => {},
    }
    if let Ok(i) = operand.parse::<i64>() {
        return Some(Value::from(i));
    }
    operand
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::from)
}

fn is_valid_path(path: &str) -> bool {
    path.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a JSON value as template output
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => panic!("context must be an object"),
        }
    }

    #[test]
    fn test_variable_substitution() {
        let engine = TemplateEngine::new();
        let context = ctx(json!({"var": {"value": 3, "slug": "food-al1"}}));

        assert_eq!(engine.render("{{ var.value }} < 5", &context).unwrap(), "3 < 5");
        assert_eq!(engine.render("{{var.slug}}", &context).unwrap(), "food-al1");
    }

    #[test]
    fn test_bit_filter() {
        let engine = TemplateEngine::new();
        let context = ctx(json!({"var": {"value": 34}}));

        assert_eq!(engine.render("{{ var.value|bit:1 }}", &context).unwrap(), "1");
        assert_eq!(engine.render("{{ var.value | bit:0 }} == 0", &context).unwrap(), "0 == 0");
        assert_eq!(engine.render("{{ var.value|bit:5 }}", &context).unwrap(), "1");
    }

    #[test]
    fn test_load_tag_and_comments_are_dropped() {
        let engine = TemplateEngine::new();
        let context = ctx(json!({"var": {"value": 1}}));

        let rendered = engine
            .render("{% load alarms_template_filters %}{# note #}{{ var.value }} > 0", &context)
            .unwrap();
        assert_eq!(rendered, "1 > 0");
    }

    #[test]
    fn test_unclosed_block_is_error() {
        let engine = TemplateEngine::new();
        let context = ctx(json!({"var": {"value": 0}}));

        let err = engine.render("{{ var.value } == 0", &context).unwrap_err();
        assert!(matches!(err, FormulaError::Template(_)));
    }

    #[test]
    fn test_missing_variable_is_error() {
        let context = ctx(json!({"var": {"value": 0}}));

        let err = TemplateEngine::new()
            .render("{{ device.name }}", &context)
            .unwrap_err();
        assert_eq!(err, FormulaError::VariableNotFound("device.name".to_string()));
    }

    #[test]
    fn test_default_and_case_filters() {
        let engine = TemplateEngine::new();
        let context = ctx(json!({"alarm": {"name": "Low food"}, "device": {"name": null}}));

        assert_eq!(
            engine.render("{{ device.name|default:'n/a' }}", &context).unwrap(),
            "n/a"
        );
        assert_eq!(
            engine.render("{{ alarm.name|upper }}", &context).unwrap(),
            "LOW FOOD"
        );
    }

    #[test]
    fn test_unknown_filter_and_tag() {
        let engine = TemplateEngine::new();
        let context = ctx(json!({"var": {"value": 1}}));

        assert!(matches!(
            engine.render("{{ var.value|explode }}", &context),
            Err(FormulaError::Filter(_))
        ));
        assert!(matches!(
            engine.render("{% if var.value %}x{% endif %}", &context),
            Err(FormulaError::Template(_))
        ));
    }

    #[test]
    fn test_plain_text_passes_through() {
        let engine = TemplateEngine::new();
        assert_eq!(
            engine.render("1 < 2 and 3 > 2", &Context::new()).unwrap(),
            "1 < 2 and 3 > 2"
        );
    }
}
