//! Calculator Tool
//!
//! Recursive-descent evaluator for arithmetic expressions:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/' | '%') unary)*
//! unary  := ('-' | '+') unary | power
//! power  := atom ('^' unary)?
//! atom   := number | ident '(' expr ')' | ident | '(' expr ')'
//! ```
//!
//! Nesting through `unary` is capped at [`MAX_DEPTH`] levels.

use agentloop_core::{
    tool::{ParameterSchema, ToolArgs},
    Result, Tool, ToolSchema,
};
use async_trait::async_trait;

use crate::error::{self, ToolInputError};
use crate::geometry::format_number;

/// Deepest nesting of signs, groups and calls the evaluator accepts
pub const MAX_DEPTH: usize = 64;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("calculate", "Evaluate a mathematical expression")
            .param(ParameterSchema::required(
                "expression",
                "string",
                "Mathematical expression to evaluate (e.g., '2 + 2', 'sqrt(3^2 + 4^2)')",
            ))
            .category("math")
    }

    async fn execute(&self, args: &ToolArgs) -> Result<String> {
        let expr = args.str("expression")?;
        let value = evaluate_expression(expr)?;
        Ok(format!("{} = {}", expr.trim(), format_number(value)))
    }
}

/// Evaluate `expr`, rejecting trailing input and non-finite results
pub fn evaluate_expression(expr: &str) -> error::Result<f64> {
    let mut parser = Parser {
        chars: expr.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err(ToolInputError::Expression("empty expression".into()));
    }
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(ToolInputError::Expression(format!(
            "unexpected '{c}' at position {}",
            parser.pos
        )));
    }
    if !value.is_finite() {
        return Err(ToolInputError::Expression("result is not a finite number".into()));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> error::Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ToolInputError::Expression(format!(
                "expected '{expected}' at position {}",
                self.pos
            )))
        }
    }

    fn expr(&mut self) -> error::Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> error::Result<f64> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value *= self.unary()?;
            } else if self.eat('/') {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err(ToolInputError::DivisionByZero);
                }
                value /= divisor;
            } else if self.eat('%') {
                let divisor = self.unary()?;
                if divisor == 0.0 {
                    return Err(ToolInputError::DivisionByZero);
                }
                value %= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn unary(&mut self) -> error::Result<f64> {
        if self.depth >= MAX_DEPTH {
            return Err(ToolInputError::Expression("expression nested too deeply".into()));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> error::Result<f64> {
        if self.eat('-') {
            return Ok(-self.unary()?);
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> error::Result<f64> {
        let base = self.atom()?;
        if self.eat('^') {
            // Right associative: 2^3^2 = 2^9
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> error::Result<f64> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                self.expect(')')?;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(ToolInputError::Expression(format!(
                "unexpected '{c}' at position {}",
                self.pos
            ))),
            None => Err(ToolInputError::Expression("unexpected end of expression".into())),
        }
    }

    fn number(&mut self) -> error::Result<f64> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        literal
            .parse()
            .map_err(|_| ToolInputError::NotANumber(literal))
    }

    fn identifier(&mut self) -> error::Result<f64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        match name.to_ascii_lowercase().as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        self.expect('(')?;
        let arg = self.expr()?;
        self.expect(')')?;
        match name.to_ascii_lowercase().as_str() {
            "sqrt" if arg < 0.0 => Err(ToolInputError::Expression(
                "square root of a negative number".into(),
            )),
            "sqrt" => Ok(arg.sqrt()),
            "abs" => Ok(arg.abs()),
            "ln" => Ok(arg.ln()),
            "log" => Ok(arg.log10()),
            "sin" => Ok(arg.sin()),
            "cos" => Ok(arg.cos()),
            "tan" => Ok(arg.tan()),
            _ => Err(ToolInputError::Expression(format!("unknown function '{name}'"))),
        }
    }
}
