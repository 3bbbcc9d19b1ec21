//! Calculator tool: arithmetic over `+ - * /`, parentheses and decimals.
//!
//! Accepts either a clean `expression` argument or free `text` from which
//! everything but digits, operators and parentheses is stripped first.

use async_trait::async_trait;
use std::iter::Peekable;
use std::str::Chars;
use tierbot_core::error::ToolError;
use tierbot_core::tier::Tier;
use tierbot_core::tool::{Tool, ToolDescriptor, ToolOutput};

pub const NAME: &str = "calculator";

/// Deepest nesting of parentheses and unary signs the parser accepts.
pub const MAX_DEPTH: usize = 256;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: NAME.into(),
            description: "Perform basic math calculations".into(),
            capabilities: "Evaluates expressions like '2 + 2', '10 * 5' or '(100 - 4) / 3'. \
                           Supports +, -, *, /, parentheses and decimal numbers."
                .into(),
            min_tier: Tier::Free,
            enabled: true,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                    }
                },
                "required": ["expression"]
            }),
        }
    }

    async fn process(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let expression = match (arguments["expression"].as_str(), arguments["text"].as_str()) {
            (Some(expr), _) => expr.to_string(),
            (None, Some(text)) => strip_to_math(text),
            (None, None) => {
                return Err(ToolError::InvalidArguments(
                    "calculator needs an 'expression' argument".into(),
                ));
            }
        };

        if expression.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "No valid mathematical expression found".into(),
            ));
        }

        let value = evaluate(&expression).map_err(|e| match e {
            CalcError::DivisionByZero => ToolError::ExecutionFailed {
                tool_name: NAME.into(),
                reason: e.to_string(),
            },
            other => ToolError::InvalidArguments(other.to_string()),
        })?;

        Ok(ToolOutput {
            content: format!("The result is: {}", format_number(value)),
            data: Some(serde_json::json!({ "expression": expression, "result": value })),
        })
    }
}

/// Keep only characters that can appear in an arithmetic expression.
fn strip_to_math(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || "+-*/(). ".contains(*c))
        .collect()
}

/// Integral values print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("Malformed number '{0}'")]
    BadNumber(String),

    #[error("Expected {expected}, found {found}")]
    Unexpected { expected: &'static str, found: String },

    #[error("Expression nests deeper than {0} levels")]
    TooDeep(usize),
}

/// Evaluate an arithmetic expression.
pub fn evaluate(input: &str) -> Result<f64, CalcError> {
    let mut parser = Parser {
        lexer: Lexer::new(input).peekable(),
        depth: 0,
    };
    let value = parser.sum()?;
    match parser.lexer.next() {
        None => Ok(value),
        Some(tok) => Err(CalcError::Unexpected {
            expected: "end of expression",
            found: tok?.describe(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Tok {
    Num(f64),
    Op(char),
    Open,
    Close,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Num(n) => format_number(*n),
            Tok::Op(c) => format!("'{c}'"),
            Tok::Open => "'('".into(),
            Tok::Close => "')'".into(),
        }
    }
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Tok, CalcError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}

        let c = self.chars.next()?;
        Some(match c {
            '+' | '-' | '*' | '/' => Ok(Tok::Op(c)),
            '(' => Ok(Tok::Open),
            ')' => Ok(Tok::Close),
            d if d.is_ascii_digit() || d == '.' => {
                let mut literal = String::from(d);
                while let Some(next) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
                    literal.push(next);
                }
                literal
                    .parse()
                    .map(Tok::Num)
                    .map_err(|_| CalcError::BadNumber(literal))
            }
            other => Err(CalcError::UnexpectedChar(other)),
        })
    }
}

struct Parser<'a> {
    lexer: Peekable<Lexer<'a>>,
    depth: usize,
}

impl Parser<'_> {
    /// Run `rule` one nesting level down, failing past `MAX_DEPTH`.
    fn nested(
        &mut self,
        rule: fn(&mut Self) -> Result<f64, CalcError>,
    ) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = rule(self);
        self.depth -= 1;
        value
    }

    fn peek_op(&mut self, ops: &[char]) -> Option<char> {
        match self.lexer.peek() {
            Some(Ok(Tok::Op(c))) if ops.contains(c) => Some(*c),
            _ => None,
        }
    }

    /// sum := product (('+' | '-') product)*
    fn sum(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.product()?;
        while let Some(op) = self.peek_op(&['+', '-']) {
            self.lexer.next();
            let rhs = self.product()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    /// product := signed (('*' | '/') signed)*
    fn product(&mut self) -> Result<f64, CalcError> {
        let mut acc = self.signed()?;
        while let Some(op) = self.peek_op(&['*', '/']) {
            self.lexer.next();
            let rhs = self.signed()?;
            if op == '*' {
                acc *= rhs;
            } else if rhs == 0.0 {
                return Err(CalcError::DivisionByZero);
            } else {
                acc /= rhs;
            }
        }
        Ok(acc)
    }

    /// signed := ('-' | '+') signed | atom
    fn signed(&mut self) -> Result<f64, CalcError> {
        match self.peek_op(&['-', '+']) {
            Some('-') => {
                self.lexer.next();
                Ok(-self.nested(Self::signed)?)
            }
            Some(_) => {
                self.lexer.next();
                self.nested(Self::signed)
            }
            None => self.atom(),
        }
    }

    /// atom := NUMBER | '(' sum ')'
    fn atom(&mut self) -> Result<f64, CalcError> {
        match self.lexer.next().transpose()? {
            Some(Tok::Num(n)) => Ok(n),
            Some(Tok::Open) => {
                let inner = self.nested(Self::sum)?;
                match self.lexer.next().transpose()? {
                    Some(Tok::Close) => Ok(inner),
                    other => Err(CalcError::Unexpected {
                        expected: "')'",
                        found: other.map_or_else(|| "end of expression".into(), |t| t.describe()),
                    }),
                }
            }
            Some(tok) => Err(CalcError::Unexpected {
                expected: "a number or '('",
                found: tok.describe(),
            }),
            None => Err(CalcError::Unexpected {
                expected: "a number or '('",
                found: "end of expression".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_grouping() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("((1 + 2) * (3 + 4))").unwrap(), 21.0);
    }

    #[test]
    fn left_associative_subtraction_and_division() {
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("100 / 10 / 5").unwrap(), 2.0);
    }

    #[test]
    fn unary_signs_and_decimals() {
        assert_eq!(evaluate("-5 + 3").unwrap(), -2.0);
        assert_eq!(evaluate("-(2 + 1)").unwrap(), -3.0);
        assert_eq!(evaluate("+4").unwrap(), 4.0);
        assert!((evaluate("3.5 * 2").unwrap() - 7.0).abs() < 1e-10);
    }

    #[test]
    fn errors() {
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("2 ^ 3"), Err(CalcError::UnexpectedChar('^')));
        assert!(matches!(evaluate("1.2.3"), Err(CalcError::BadNumber(_))));
        assert!(matches!(evaluate("2 +"), Err(CalcError::Unexpected { .. })));
        assert!(matches!(evaluate("(2 + 3"), Err(CalcError::Unexpected { .. })));
        assert!(matches!(evaluate("2 3"), Err(CalcError::Unexpected { .. })));
        assert!(evaluate("").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let ok = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&ok).unwrap(), 1.0);

        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&parens), Err(CalcError::TooDeep(MAX_DEPTH)));

        let signs = format!("{}1", "-".repeat(200_000));
        assert_eq!(evaluate(&signs), Err(CalcError::TooDeep(MAX_DEPTH)));
    }

    #[tokio::test]
    async fn process_deep_nesting_is_invalid_arguments() {
        let expression = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        let err = CalculatorTool
            .process(serde_json::json!({ "expression": expression }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[tokio::test]
    async fn process_expression() {
        let out = CalculatorTool
            .process(serde_json::json!({"expression": "2+2"}))
            .await
            .unwrap();
        assert_eq!(out.content, "The result is: 4");
        assert_eq!(out.data.unwrap()["result"], 4.0);
    }

    #[tokio::test]
    async fn process_free_text() {
        let out = CalculatorTool
            .process(serde_json::json!({"text": "what is 10 * 5?"}))
            .await
            .unwrap();
        assert_eq!(out.content, "The result is: 50");
    }

    #[tokio::test]
    async fn process_division_by_zero_is_execution_failure() {
        let err = CalculatorTool
            .process(serde_json::json!({"expression": "1/0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn process_missing_or_empty_input() {
        assert!(matches!(
            CalculatorTool.process(serde_json::json!({})).await,
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            CalculatorTool
                .process(serde_json::json!({"text": "hello there"}))
                .await,
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn descriptor_is_free_tier() {
        let d = CalculatorTool.describe();
        assert_eq!(d.name, "calculator");
        assert_eq!(d.min_tier, Tier::Free);
        assert!(d.enabled);
    }
}
