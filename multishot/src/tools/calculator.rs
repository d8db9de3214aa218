//! Built-in arithmetic adapter.
//!
//! A small recursive-descent evaluator over `+ - * / ( )` with unary minus
//! and decimals, so calculator routing works without an external service.
//! Malformed expressions and division by zero return errors, never panics.

use anyhow::{bail, Result};

use multishot_sdk::{async_trait, ToolAdapter, ToolOutput};

/// Calculator exposed through the uniform invoke contract
pub struct CalculatorTool;

#[async_trait]
impl ToolAdapter for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    async fn invoke(&self, input: &str) -> Result<ToolOutput> {
        let value = evaluate(input)?;
        Ok(ToolOutput::Text(format_value(value)))
    }
}

/// Render whole numbers without a trailing ".0"
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64> {
    let mut parser = Parser {
        chars: expression.chars().collect(),
        pos: 0,
    };
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.pos < parser.chars.len() {
        bail!(
            "unexpected character '{}' in expression",
            parser.chars[parser.pos]
        );
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, |c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('+') => {
                    self.advance();
                    value += self.term()?;
                }
                Some('-') => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    /// term := factor (('*' | '/' | '×' | '÷') factor)*
    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('*') | Some('×') => {
                    self.advance();
                    value *= self.factor()?;
                }
                Some('/') | Some('÷') => {
                    self.advance();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        bail!("division by zero");
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    /// factor := '-' factor | '(' expression ')' | number
    fn factor(&mut self) -> Result<f64> {
        self.skip_whitespace();
        match self.peek() {
            Some('-') => {
                self.advance();
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.advance();
                let value = self.expression()?;
                self.skip_whitespace();
                if self.advance() != Some(')') {
                    bail!("missing closing parenthesis");
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => bail!("unexpected character '{}' in expression", c),
            None => bail!("expression ended unexpectedly"),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while self
            .peek()
            .map_or(false, |c| c.is_ascii_digit() || c == '.' || c == ',')
        {
            self.pos += 1;
        }
        // Tolerate thousands separators in substituted values
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != ',')
            .collect();
        match text.parse::<f64>() {
            Ok(value) => Ok(value),
            Err(_) => bail!("invalid number '{}'", text),
        }
    }
}
