//! FormulaEngine - two-phase boolean formula evaluation
//!
//! Phase 1 renders the template (`{{ var.value|bit:1 }}`) into a plain string.
//! Phase 2 evaluates that string as a boolean expression with evalexpr:
//! - Comparison: <, >, <=, >=, ==, !=, chained Python-style (`0 < x < 5`)
//! - Logic: `and` / `or` / `not` (or &&, ||, !)
//! - Literals: integers, floats, 'strings', "strings", True, False, None
//! - Dotted context access: `vars.food.value`
//! - Built-in function: `bit(value, index)`

use crate::builtin_functions;
use crate::error::{FormulaError, Result};
use crate::template::{resolve_path, TemplateEngine};
use crate::Context;
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Value,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::debug;

/// FormulaEngine - evaluates alarm formulas to true/false
///
/// Stateless: the same formula and context always give the same result.
///
/// # Example
/// ```
/// use serde_json::json;
/// use voltage_formula::{Context, FormulaEngine};
///
/// let engine = FormulaEngine::new();
/// let context: Context = json!({"vars": {"food": {"value": 3}}})
///     .as_object()
///     .cloned()
///     .unwrap_or_default();
///
/// assert_eq!(engine.evaluate("vars.food.value < 5", &context), Ok(true));
/// assert_eq!(engine.evaluate("{{ vars.food.value }} > 10", &context), Ok(false));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FormulaEngine {
    template: TemplateEngine,
}

impl FormulaEngine {
    pub fn new() -> Self {
        Self {
            template: TemplateEngine::new(),
        }
    }

    /// Render and evaluate a formula
    pub fn evaluate(&self, formula: &str, context: &Context) -> Result<bool> {
        let rendered = self.template.render(formula, context)?;
        debug!(formula = formula, rendered = %rendered, "Formula rendered");
        self.evaluate_expression(&rendered, context)
    }

    /// Phase 1 only
    pub fn render(&self, formula: &str, context: &Context) -> Result<String> {
        self.template.render(formula, context)
    }

    /// Phase 2 only: evaluate an already-rendered boolean expression
    pub fn evaluate_expression(&self, expression: &str, context: &Context) -> Result<bool> {
        if expression.trim().is_empty() {
            return Err(FormulaError::expression("empty expression"));
        }

        let mut eval_context = HashMapContext::new();
        let normalized = expand_chains(&normalize(expression, context, &mut eval_context)?)?;
        Self::register_functions(&mut eval_context)?;

        let result = evalexpr::eval_with_context(&normalized, &eval_context).map_err(|e| {
            FormulaError::expression(format!("Failed to evaluate '{}': {}", expression, e))
        })?;

        match result {
            Value::Boolean(b) => Ok(b),
            other => Err(FormulaError::NotBoolean(format!(
                "'{}' evaluated to {:?}",
                expression, other
            ))),
        }
    }

    /// Register built-in functions with the evalexpr context
    fn register_functions(context: &mut HashMapContext) -> Result<()> {
        fn to_int(value: &Value) -> std::result::Result<i64, EvalexprError> {
            match value {
                Value::Int(i) => Ok(*i),
                Value::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
                Value::Boolean(b) => Ok(i64::from(*b)),
                _ => Err(EvalexprError::expected_int(value.clone())),
            }
        }

        // bit(value, index)
        context
            .set_function(
                "bit".to_string(),
                Function::new(|args| {
                    let tuple = args.as_tuple()?;
                    if tuple.len() != 2 {
                        return Err(EvalexprError::CustomMessage(format!(
                            "bit() takes 2 arguments, got {}",
                            tuple.len()
                        )));
                    }
                    let value = to_int(&tuple[0])?;
                    let index = to_int(&tuple[1])?;
                    builtin_functions::bit(value, index)
                        .map(Value::Int)
                        .map_err(|e| EvalexprError::CustomMessage(e.to_string()))
                }),
            )
            .map_err(|e| FormulaError::expression(format!("Failed to register bit: {}", e)))
    }
}

const FUNCTIONS: &[&str] = &["bit"];

/// Rewrite Python-style syntax into evalexpr syntax and bind context paths
///
/// Every dotted path is resolved against `context` and bound to a generated
/// identifier, so slugs containing `-` never reach the evalexpr tokenizer.
fn normalize(expression: &str, context: &Context, bindings: &mut HashMapContext) -> Result<String> {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::with_capacity(expression.len() + 16);
    let mut bound: HashMap<String, String> = HashMap::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            let (literal, next) = read_string(&chars, i)?;
            out.push('"');
            for ch in literal.chars() {
                if ch == '"' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
            i = next;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            out.extend(&chars[start..i]);
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let (word, consumed) = longest_resolvable(&word, context);
            i = start + consumed;

            match word.as_str() {
                "and" => out.push_str("&&"),
                "or" => out.push_str("||"),
                "not" => out.push('!'),
                "True" | "true" => out.push_str("true"),
                "False" | "false" => out.push_str("false"),
                "None" => {
                    let ident = bind(&mut bound, bindings, "None", Value::Empty)?;
                    out.push_str(&ident);
                },
                _ if next_non_space(&chars, i) == Some('(') => {
                    if !FUNCTIONS.contains(&word.as_str()) {
                        return Err(FormulaError::expression(format!(
                            "unknown function '{}'",
                            word
                        )));
                    }
                    out.push_str(&word);
                },
                path => {
                    let value = resolve_path(context, path)
                        .ok_or_else(|| FormulaError::variable_not_found(path))?;
                    let ident = bind(&mut bound, bindings, path, to_eval_value(path, value)?)?;
                    out.push_str(&ident);
                },
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    Ok(out)
}

const COMPARISONS: &[&str] = &["<", ">", "<=", ">=", "==", "!="];
const TWO_CHAR_OPS: &[&str] = &["<=", ">=", "==", "!=", "&&", "||"];

/// Expand comparison chains: `a < b < c` becomes `(a < b && b < c)`
///
/// A leading `!` is scoped over the comparison it prefixes, since `not`
/// binds looser than comparisons.
fn expand_chains(expression: &str) -> Result<String> {
    let tokens = tokenize(expression);
    let mut pos = 0;
    let out = expand_level(&tokens, &mut pos)?;
    if pos < tokens.len() {
        return Err(FormulaError::expression(format!(
            "unbalanced ')' in '{}'",
            expression
        )));
    }
    Ok(out)
}

/// Split a normalized expression; tokens keep their leading whitespace
fn tokenize(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == bytes.len() {
            break;
        }
        let rest = &bytes[i..];
        i += match rest[0] {
            b'"' => string_len(rest),
            b'(' | b')' | b',' => 1,
            _ if TWO_CHAR_OPS.iter().any(|op| rest.starts_with(op.as_bytes())) => 2,
            b if is_special(b) => 1,
            _ => atom_len(rest),
        };
        tokens.push(&text[start..i]);
        start = i;
    }

    tokens
}

fn is_special(b: u8) -> bool {
    b"\"(),<>=!&|+-*/%^".contains(&b)
}

fn string_len(bytes: &[u8]) -> usize {
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn atom_len(bytes: &[u8]) -> usize {
    let numeric = bytes[0].is_ascii_digit();
    let mut i = 1;
    while i < bytes.len() {
        let b = bytes[i];
        let exponent_sign =
            numeric && matches!(b, b'+' | b'-') && matches!(bytes[i - 1], b'e' | b'E');
        if b.is_ascii_whitespace() || (is_special(b) && !exponent_sign) {
            break;
        }
        i += 1;
    }
    i
}

/// Rewrite one parenthesis level, stopping before its closing `)`
fn expand_level(tokens: &[&str], pos: &mut usize) -> Result<String> {
    let mut out = String::new();
    let mut segment: Vec<String> = Vec::new();

    while let Some(&token) = tokens.get(*pos) {
        match token.trim_start() {
            ")" => break,
            "(" => {
                *pos += 1;
                let inner = expand_level(tokens, pos)?;
                let close = tokens
                    .get(*pos)
                    .filter(|t| t.trim_start() == ")")
                    .ok_or_else(|| FormulaError::expression("unbalanced '('"))?;
                *pos += 1;
                segment.push(format!("{}{}{}", token, inner, close));
            },
            "&&" | "||" | "," => {
                out.push_str(&expand_segment(&segment));
                segment.clear();
                out.push_str(token);
                *pos += 1;
            },
            _ => {
                segment.push(token.to_string());
                *pos += 1;
            },
        }
    }

    out.push_str(&expand_segment(&segment));
    Ok(out)
}

/// Rewrite an operand sequence between logical operators
fn expand_segment(pieces: &[String]) -> String {
    let bangs = pieces.iter().take_while(|p| p.trim() == "!").count();
    let (prefix, body) = pieces.split_at(bangs);
    let comparisons = body
        .iter()
        .filter(|p| COMPARISONS.contains(&p.trim()))
        .count();
    if comparisons == 0 || (comparisons == 1 && bangs == 0) {
        return pieces.concat();
    }

    let mut operands = vec![String::new()];
    let mut operators = Vec::new();
    for piece in body {
        if COMPARISONS.contains(&piece.trim()) {
            operators.push(piece.trim());
            operands.push(String::new());
        } else if let Some(operand) = operands.last_mut() {
            operand.push_str(piece);
        }
    }

    let links: Vec<String> = operators
        .iter()
        .enumerate()
        .map(|(i, op)| format!("{} {} {}", operands[i].trim(), op, operands[i + 1].trim()))
        .collect();
    let leading = pieces
        .first()
        .map(|p| &p[..p.len() - p.trim_start().len()])
        .unwrap_or_default();
    let nots: String = prefix.iter().map(|p| p.trim()).collect();

    format!("{}{}({})", leading, nots, links.join(" && "))
}

/// Trim trailing `-segment`s until the word resolves (or has no `-` left)
///
/// `vars.food-al1.value` stays whole when that slug exists, `a-b` splits into
/// a subtraction otherwise.
fn longest_resolvable(word: &str, context: &Context) -> (String, usize) {
    let trimmed = word.trim_end_matches(['.', '-']);
    let mut candidate = trimmed;
    loop {
        if resolve_path(context, candidate).is_some() {
            break;
        }
        match candidate.rfind('-') {
            Some(pos) => candidate = &candidate[..pos],
            None => {
                candidate = trimmed.split('-').next().unwrap_or(trimmed);
                break;
            },
        }
    }
    (candidate.to_string(), candidate.chars().count())
}

fn bind(
    bound: &mut HashMap<String, String>,
    bindings: &mut HashMapContext,
    path: &str,
    value: Value,
) -> Result<String> {
    if let Some(ident) = bound.get(path) {
        return Ok(ident.clone());
    }
    let ident = format!("__v{}", bound.len());
    bindings
        .set_value(ident.clone(), value)
        .map_err(|e| FormulaError::expression(format!("Failed to bind {}: {}", path, e)))?;
    bound.insert(path.to_string(), ident.clone());
    Ok(ident)
}

fn to_eval_value(path: &str, value: &JsonValue) -> Result<Value> {
    match value {
        JsonValue::Null => Ok(Value::Empty),
        JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| FormulaError::expression(format!("{}: unsupported number", path))),
        },
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(FormulaError::expression(format!(
            "'{}' is not a scalar value",
            path
        ))),
    }
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut literal = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                literal.push(chars[i + 1]);
                i += 2;
            },
            c if c == quote => return Ok((literal, i + 1)),
            c => {
                literal.push(c);
                i += 1;
            },
        }
    }
    Err(FormulaError::expression("unterminated string literal"))
}

fn next_non_space(chars: &[char], from: usize) -> Option<char> {
    chars[from..].iter().copied().find(|c| !c.is_whitespace())
}
