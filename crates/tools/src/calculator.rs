//! Calculator tool — evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `%`, `^` (right-associative), parentheses,
//! and unary negation via a recursive-descent parser. The numeric result is
//! recorded as structured data so run history carries `4`, not `"4"`.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolOutput};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports +, -, *, /, %, ^, parentheses, and decimal numbers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        // `expr` is accepted as a shorthand; one of the two must be present.
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                },
                "expr": {
                    "type": "string",
                    "description": "Alias for 'expression'"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .or_else(|| arguments["expr"].as_str())
            .ok_or_else(|| {
                ToolError::invalid_arguments("calculator", "missing required field 'expression'")
            })?;

        let value = evaluate(expr).map_err(|e| ToolError::execution("calculator", e))?;
        let (formatted, data) = format_number(value);
        Ok(ToolOutput::with_data(formatted, data))
    }
}

/// Integral results become JSON integers; everything else stays a float.
fn format_number(value: f64) -> (String, serde_json::Value) {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        let int = value as i64;
        (int.to_string(), serde_json::json!(int))
    } else {
        (value.to_string(), serde_json::json!(value))
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser::new(&tokens);
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.peek() {
        return Err(format!(
            "Unexpected token at position {}: {:?}",
            parser.pos, tok
        ));
    }
    if !result.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        let single = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num_str = &input[start..end];
                let num: f64 = num_str
                    .parse()
                    .map_err(|_| format!("Invalid number: {num_str}"))?;
                tokens.push(Token::Number(num));
                continue;
            }
            c => return Err(format!("Unexpected character: '{c}'")),
        };
        tokens.push(single);
        chars.next();
    }

    Ok(tokens)
}

/// Every recursive path passes through `parse_unary`, so bounding its depth
/// bounds the parser's stack use.
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn consume(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.consume();
                    left += self.parse_term()?;
                }
                Some(Token::Minus) => {
                    self.consume();
                    left -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.consume();
                    left *= self.parse_unary()?;
                }
                Some(op @ (Token::Slash | Token::Percent)) => {
                    self.consume();
                    let right = self.parse_unary()?;
                    if right == 0.0 {
                        return Err("Division by zero".into());
                    }
                    if op == Token::Slash {
                        left /= right;
                    } else {
                        left %= right;
                    }
                }
                _ => break,
            }
        }
        Ok(left)
    }

    // unary = '-' unary | power
    fn parse_unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let result = if let Some(Token::Minus) = self.peek() {
            self.consume();
            self.parse_unary().map(|v| -v)
        } else {
            self.parse_power()
        };
        self.depth -= 1;
        result
    }

    // power = primary ('^' unary)?
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // primary = NUMBER | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let val = self.parse_expr()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(val),
                    _ => Err("Expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("Unexpected token: {tok:?}")),
            None => Err("Unexpected end of expression".into()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
