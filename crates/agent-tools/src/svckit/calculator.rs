//! Calculator Tool
//!
//! Evaluates arithmetic expressions with exact decimal math so that
//! `0.1 + 0.2` is `0.3`, not `0.30000000000000004`.

use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use agent_core::{tool::ParameterSchema, Result as CoreResult, Tool, ToolCallRequest, ToolSchema};

use crate::error::{Result, SourceError};

const MAX_EXPRESSION_LEN: usize = 512;
const MAX_EXPONENT: i64 = 64;

/// Tool for evaluating arithmetic
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".into(),
            description: "Evaluate an arithmetic expression exactly. Supports + - * / % ^ and parentheses, e.g. '(12.5 + 7) * 3'.".into(),
            parameters: vec![ParameterSchema::required(
                "expression",
                "string",
                "The arithmetic expression to evaluate",
            )],
            category: Some("utility".into()),
            has_side_effects: false,
            timeout_secs: None,
        }
    }

    async fn execute(&self, call: &ToolCallRequest) -> CoreResult<Value> {
        let expression = call.arg_str("expression").unwrap_or_default();
        let result = evaluate(expression)?;

        Ok(json!({
            "expression": expression,
            "result": result.normalize().to_string(),
        }))
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<Decimal> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(SourceError::InvalidExpression("expression too long".into()));
    }
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    if parser.chars.is_empty() {
        return Err(SourceError::InvalidExpression("expression is empty".into()));
    }

    let value = parser.expr()?;
    match parser.peek() {
        None => Ok(value),
        Some(c) => Err(SourceError::InvalidExpression(format!(
            "unexpected '{c}' at position {}",
            parser.pos
        ))),
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn overflow() -> SourceError {
    SourceError::InvalidExpression("result out of range".into())
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn expr(&mut self) -> Result<Decimal> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' {
                value.checked_add(rhs)
            } else {
                value.checked_sub(rhs)
            }
            .ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<Decimal> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            if op != '*' && rhs.is_zero() {
                return Err(SourceError::InvalidExpression("division by zero".into()));
            }
            value = match op {
                '*' => value.checked_mul(rhs),
                '/' => value.checked_div(rhs),
                _ => value.checked_rem(rhs),
            }
            .ok_or_else(overflow)?;
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<Decimal> {
        let base = self.unary()?;
        if self.peek() != Some('^') {
            return Ok(base);
        }
        self.pos += 1;
        let exponent = self.power()?;

        if !exponent.fract().is_zero() {
            return Err(SourceError::InvalidExpression("exponent must be an integer".into()));
        }
        let exp = exponent.to_i64().ok_or_else(overflow)?;
        if exp.abs() > MAX_EXPONENT {
            return Err(SourceError::InvalidExpression(format!("exponent larger than {MAX_EXPONENT}")));
        }

        let mut result = Decimal::ONE;
        for _ in 0..exp.abs() {
            result = result.checked_mul(base).ok_or_else(overflow)?;
        }
        if exp < 0 {
            if result.is_zero() {
                return Err(SourceError::InvalidExpression("division by zero".into()));
            }
            result = Decimal::ONE.checked_div(result).ok_or_else(overflow)?;
        }
        Ok(result)
    }

    fn unary(&mut self) -> Result<Decimal> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Decimal> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.bump() != Some(')') {
                    return Err(SourceError::InvalidExpression("missing closing parenthesis".into()));
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                Decimal::from_str(&literal)
                    .map_err(|_| SourceError::InvalidExpression(format!("invalid number '{literal}'")))
            }
            Some(c) => Err(SourceError::InvalidExpression(format!(
                "unexpected '{c}' at position {}",
                self.pos
            ))),
            None => Err(SourceError::InvalidExpression("unexpected end of expression".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::AgentError;
    use rust_decimal_macros::dec;

    #[test]
    fn test_precedence_and_exactness() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), dec!(14));
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), dec!(20));
        assert_eq!(evaluate("0.1 + 0.2").unwrap(), dec!(0.3));
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), dec!(512));
        assert_eq!(evaluate("-2 ^ 2").unwrap(), dec!(4));
        assert_eq!(evaluate("10 % 4").unwrap(), dec!(2));
        assert_eq!(evaluate("2 ^ -2").unwrap(), dec!(0.25));
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in ["", "1 +", "2 * (3 + 4", "1 / 0", "abc", "2 ^ 0.5", "1..2"] {
            assert!(evaluate(bad).is_err(), "{bad} should fail");
        }
    }

    #[tokio::test]
    async fn test_tool_output_and_argument_error() {
        let out = CalculatorTool
            .execute(&ToolCallRequest::new("c1", "calculate", json!({"expression": "6 * 7"})))
            .await
            .unwrap();
        assert_eq!(out["result"], "42");

        let err = CalculatorTool
            .execute(&ToolCallRequest::new("c2", "calculate", json!({"expression": "6 / 0"})))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolArgument(_)));
    }
}
