//! Lookup expression parser
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! list    := or (',' or)*            -- AND
//! or      := and ('|' and)*
//! and     := unary ('&' unary)*
//! unary   := '~' unary | primary
//! primary := 'Q' '(' [kwarg (',' kwarg)* [',']] ')' | '(' list ')'
//! kwarg   := IDENT '=' value
//! value   := STRING | NUMBER | True | False | None | '[' values ']' | '(' values ')'
//! ```

use crate::ast::{Expr, Literal, Operator, Predicate};
use crate::error::{LookupError, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Amp,
    Pipe,
    Tilde,
    Eq,
    Ident(String),
    Str(String),
    Number(String),
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '&' => Some(Token::Amp),
            '|' => Some(Token::Pipe),
            '~' => Some(Token::Tilde),
            '=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((token, i));
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            i += 1;
        } else if c == '\'' || c == '"' {
            let start = i;
            let mut literal = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(LookupError::syntax(format!(
                            "unterminated string at offset {}",
                            start
                        )))
                    },
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            literal.push(*next);
                        }
                        i += 2;
                    },
                    Some(q) if *q == c => {
                        i += 1;
                        break;
                    },
                    Some(other) => {
                        literal.push(*other);
                        i += 1;
                    },
                }
            }
            tokens.push((Token::Str(literal), start));
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push((Token::Number(chars[start..i].iter().collect()), start));
        } else if c.is_alphanumeric() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
        } else {
            return Err(LookupError::syntax(format!(
                "unexpected character '{}' at offset {}",
                c, i
            )));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn offset(&self) -> String {
        match self.tokens.get(self.pos) {
            Some((_, offset)) => format!("offset {}", offset),
            None => "end of input".to_string(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        let at = self.offset();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(LookupError::syntax(format!(
                "expected {:?}, found {:?} at {}",
                expected, token, at
            ))),
            None => Err(LookupError::syntax(format!(
                "expected {:?} at end of input",
                expected
            ))),
        }
    }

    fn parse_list(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_or()?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            items.push(self.parse_or()?);
        }
        Ok(collapse(items, Expr::And))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            items.push(self.parse_and()?);
        }
        Ok(collapse(items, Expr::Or))
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut items = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::Amp) {
            self.pos += 1;
            items.push(self.parse_unary()?);
        }
        Ok(collapse(items, Expr::And))
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Tilde) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let at = self.offset();
        match self.next() {
            Some(Token::Ident(name)) if name == "Q" => {
                self.expect(Token::LParen)?;
                self.parse_kwargs().map(Expr::Term)
            },
            Some(Token::LParen) => {
                let inner = self.parse_list()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            },
            Some(token) => Err(LookupError::syntax(format!(
                "expected Q(...) or '(', found {:?} at {}",
                token, at
            ))),
            None => Err(LookupError::syntax("unexpected end of input")),
        }
    }

    /// Keyword arguments of a `Q(...)`, consuming the closing paren
    fn parse_kwargs(&mut self) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::new();
        loop {
            if self.peek() == Some(&Token::RParen) {
                self.pos += 1;
                return Ok(predicates);
            }

            let at = self.offset();
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                other => {
                    return Err(LookupError::syntax(format!(
                        "expected field name, found {:?} at {}",
                        other, at
                    )))
                },
            };
            self.expect(Token::Eq)?;
            let value = self.parse_value()?;
            predicates.push(build_predicate(&name, value)?);

            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::RParen) => {},
                _ => {
                    return Err(LookupError::syntax(format!(
                        "expected ',' or ')' at {}",
                        self.offset()
                    )))
                },
            }
        }
    }

    fn parse_value(&mut self) -> Result<Literal> {
        let at = self.offset();
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Number(n)) => parse_number(&n),
            Some(Token::Ident(word)) => match word.as_str() {
                "True" => Ok(Literal::Bool(true)),
                "False" => Ok(Literal::Bool(false)),
                "None" => Ok(Literal::None),
                // bare words are not names in this language
                _ => Err(LookupError::syntax(format!(
                    "unexpected name '{}' at {}",
                    word, at
                ))),
            },
            Some(Token::LBracket) => self.parse_sequence(Token::RBracket),
            Some(Token::LParen) => self.parse_sequence(Token::RParen),
            other => Err(LookupError::syntax(format!(
                "expected a value, found {:?} at {}",
                other, at
            ))),
        }
    }

    fn parse_sequence(&mut self, close: Token) -> Result<Literal> {
        let mut items = Vec::new();
        loop {
            if self.peek() == Some(&close) {
                self.pos += 1;
                return Ok(Literal::List(items));
            }
            items.push(self.parse_value()?);
            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                Some(token) if *token == close => {},
                _ => {
                    return Err(LookupError::syntax(format!(
                        "expected ',' or {:?} at {}",
                        close,
                        self.offset()
                    )))
                },
            }
        }
    }
}

fn collapse(mut items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

fn parse_number(text: &str) -> Result<Literal> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Literal::Int(i));
    }
    text.parse::<f64>()
        .map(Literal::Float)
        .map_err(|_| LookupError::syntax(format!("invalid number '{}'", text)))
}

/// Split `device__profile__name__startswith` into field path and operator
fn build_predicate(name: &str, value: Literal) -> Result<Predicate> {
    let segments: Vec<&str> = name.split("__").collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(LookupError::syntax(format!("malformed field lookup '{}'", name)));
    }

    let (field, op) = match segments.split_last() {
        Some((last, rest)) if !rest.is_empty() => match Operator::from_suffix(last) {
            Some(op) => (rest.join("__"), op),
            None => (name.to_string(), Operator::Exact),
        },
        _ => (name.to_string(), Operator::Exact),
    };

    Ok(Predicate { field, op, value })
}

/// Parse a lookup expression into an AST
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(LookupError::syntax("empty lookup"));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_list()?;
    if parser.pos < parser.tokens.len() {
        return Err(LookupError::syntax(format!(
            "unexpected trailing input at {}",
            parser.offset()
        )));
    }
    Ok(expr)
}
