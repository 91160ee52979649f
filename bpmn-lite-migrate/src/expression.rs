//! Expression capability used for gateway conditions, call-activity called
//! elements and multi-instance loop cardinality.
//!
//! The engine only talks to [`ExpressionEvaluator`]; [`SimpleExpressionEvaluator`]
//! is the bundled implementation covering the small JUEL subset process models
//! actually use (`${input == 1}`, `${approved && amount > 100}`, `${subProcessKey}`).

use crate::types::VariableMap;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Unknown property used in expression: {expression}. Cannot resolve identifier '{name}'")]
    UnknownProperty { expression: String, name: String },

    #[error("Error parsing '{expression}': {reason}")]
    Syntax { expression: String, reason: String },

    #[error("Cannot evaluate '{expression}': {reason}")]
    TypeMismatch { expression: String, reason: String },

    #[error("Condition expression returns non-Boolean: {expression} (value: {value})")]
    NonBoolean { expression: String, value: Value },
}

/// Injected expression language.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` against `scope`. Text without `${..}` / `#{..}`
    /// delimiters is a literal and evaluates to itself.
    fn evaluate(&self, expression: &str, scope: &VariableMap) -> Result<Value, ExpressionError>;

    /// Evaluate a sequence-flow condition. Must produce a boolean.
    fn evaluate_condition(
        &self,
        expression: &str,
        scope: &VariableMap,
    ) -> Result<bool, ExpressionError> {
        match self.evaluate(expression, scope)? {
            Value::Bool(b) => Ok(b),
            Value::String(s) if s == "true" => Ok(true),
            Value::String(s) if s == "false" => Ok(false),
            value => Err(ExpressionError::NonBoolean {
                expression: expression.to_string(),
                value,
            }),
        }
    }
}

/// True when the text is a delimited expression rather than a literal.
pub fn is_expression(text: &str) -> bool {
    expression_body(text).is_some()
}

fn expression_body(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("${")
        .or_else(|| trimmed.strip_prefix("#{"))?;
    inner.strip_suffix('}')
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleExpressionEvaluator;

impl SimpleExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for SimpleExpressionEvaluator {
    fn evaluate(&self, expression: &str, scope: &VariableMap) -> Result<Value, ExpressionError> {
        match expression_body(expression) {
            Some(body) => eval_body(expression, body, scope),
            None => Ok(Value::String(expression.to_string())),
        }
    }

    fn evaluate_condition(
        &self,
        expression: &str,
        scope: &VariableMap,
    ) -> Result<bool, ExpressionError> {
        // Conditions are code even when written without delimiters.
        let body = expression_body(expression).unwrap_or(expression);
        match eval_body(expression, body, scope)? {
            Value::Bool(b) => Ok(b),
            value => Err(ExpressionError::NonBoolean {
                expression: expression.to_string(),
                value,
            }),
        }
    }
}

fn eval_body(expression: &str, body: &str, scope: &VariableMap) -> Result<Value, ExpressionError> {
    let tokens = tokenize(expression, body)?;
    let mut parser = Parser {
        expression,
        tokens,
        pos: 0,
    };
    let ast = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(syntax(expression, "unexpected trailing input"));
    }
    ast.eval(expression, scope)
}

fn syntax(expression: &str, reason: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

// ─── Lexer ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Op(BinOp),
    Not,
    LParen,
    RParen,
}

fn tokenize(expression: &str, body: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(syntax(expression, "unterminated string literal"));
                }
                let text: String = chars[start..end].iter().collect();
                tokens.push(Token::Literal(Value::String(text)));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(parse_number(expression, &text)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(keyword(&word).unwrap_or(Token::Ident(word)));
            }
            _ => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let (token, width) = match two.as_str() {
                    "==" => (Token::Op(BinOp::Eq), 2),
                    "!=" => (Token::Op(BinOp::Ne), 2),
                    "<=" => (Token::Op(BinOp::Le), 2),
                    ">=" => (Token::Op(BinOp::Ge), 2),
                    "&&" => (Token::Op(BinOp::And), 2),
                    "||" => (Token::Op(BinOp::Or), 2),
                    _ => match c {
                        '<' => (Token::Op(BinOp::Lt), 1),
                        '>' => (Token::Op(BinOp::Gt), 1),
                        '!' => (Token::Not, 1),
                        other => {
                            return Err(syntax(expression, format!("unexpected character '{other}'")))
                        }
                    },
                };
                tokens.push(token);
                i += width;
            }
        }
    }
    Ok(tokens)
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "true" => Token::Literal(Value::Bool(true)),
        "false" => Token::Literal(Value::Bool(false)),
        "null" => Token::Literal(Value::Null),
        "and" => Token::Op(BinOp::And),
        "or" => Token::Op(BinOp::Or),
        "not" => Token::Not,
        "eq" => Token::Op(BinOp::Eq),
        "ne" => Token::Op(BinOp::Ne),
        "lt" => Token::Op(BinOp::Lt),
        "le" => Token::Op(BinOp::Le),
        "gt" => Token::Op(BinOp::Gt),
        "ge" => Token::Op(BinOp::Ge),
        _ => return None,
    })
}

fn parse_number(expression: &str, text: &str) -> Result<Value, ExpressionError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| syntax(expression, format!("invalid number '{text}'")))
}

// ─── Parser ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Op(BinOp::Or)) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::Op(BinOp::And)) {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_unary()?;
        match self.peek() {
            Some(Token::Op(op)) if !matches!(op, BinOp::And | BinOp::Or) => {
                let op = *op;
                self.pos += 1;
                let right = self.parse_unary()?;
                Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(syntax(self.expression, "expected ')'")),
                }
            }
            Some(other) => Err(syntax(self.expression, format!("unexpected token {other:?}"))),
            None => Err(syntax(self.expression, "unexpected end of expression")),
        }
    }
}

// ─── Evaluation ───────────────────────────────────────────────

impl Expr {
    fn eval(&self, expression: &str, scope: &VariableMap) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(path) => lookup(expression, path, scope),
            Expr::Not(inner) => {
                let value = as_bool(expression, inner.eval(expression, scope)?)?;
                Ok(Value::Bool(!value))
            }
            Expr::Binary(BinOp::And, left, right) => {
                if !as_bool(expression, left.eval(expression, scope)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(as_bool(expression, right.eval(expression, scope)?)?))
            }
            Expr::Binary(BinOp::Or, left, right) => {
                if as_bool(expression, left.eval(expression, scope)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(as_bool(expression, right.eval(expression, scope)?)?))
            }
            Expr::Binary(op, left, right) => {
                let l = left.eval(expression, scope)?;
                let r = right.eval(expression, scope)?;
                compare(expression, *op, &l, &r).map(Value::Bool)
            }
        }
    }
}

fn lookup(expression: &str, path: &str, scope: &VariableMap) -> Result<Value, ExpressionError> {
    let unknown = || ExpressionError::UnknownProperty {
        expression: expression.to_string(),
        name: path.to_string(),
    };
    let mut segments = path.split('.');
    let head = segments.next().ok_or_else(unknown)?;
    let mut current = scope.get(head).ok_or_else(unknown)?;
    for segment in segments {
        current = current.get(segment).ok_or_else(unknown)?;
    }
    Ok(current.clone())
}

fn as_bool(expression: &str, value: Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExpressionError::TypeMismatch {
            expression: expression.to_string(),
            reason: format!("expected a boolean operand, found {other}"),
        }),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(expression: &str, op: BinOp, l: &Value, r: &Value) -> Result<bool, ExpressionError> {
    let numeric = matches!(l, Value::Number(_)) || matches!(r, Value::Number(_));
    if numeric {
        if let (Some(a), Some(b)) = (as_number(l), as_number(r)) {
            return Ok(match op {
                BinOp::Eq => a == b,
                BinOp::Ne => a != b,
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                BinOp::Ge => a >= b,
                BinOp::And | BinOp::Or => false,
            });
        }
    }
    match op {
        BinOp::Eq => Ok(l == r),
        BinOp::Ne => Ok(l != r),
        _ => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            }),
            _ => Err(ExpressionError::TypeMismatch {
                expression: expression.to_string(),
                reason: format!("cannot order {l} and {r}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(pairs: &[(&str, Value)]) -> VariableMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_literal_text_evaluates_to_itself() {
        let eval = SimpleExpressionEvaluator::new();
        assert_eq!(
            eval.evaluate("simpleSubProcess", &VariableMap::new()).unwrap(),
            json!("simpleSubProcess")
        );
        assert!(!is_expression("simpleSubProcess"));
        assert!(is_expression("${simpleSubProcessExpression}"));
        assert!(is_expression("#{key}"));
    }

    #[test]
    fn test_variable_lookup() {
        let eval = SimpleExpressionEvaluator::new();
        let vars = scope(&[("subKey", json!("oneTaskProcess")), ("order", json!({"total": 5}))]);
        assert_eq!(eval.evaluate("${subKey}", &vars).unwrap(), json!("oneTaskProcess"));
        assert_eq!(eval.evaluate("${order.total}", &vars).unwrap(), json!(5));
    }

    #[test]
    fn test_unknown_variable_is_error() {
        let eval = SimpleExpressionEvaluator::new();
        let err = eval
            .evaluate("${simpleSubProcessExpression}", &VariableMap::new())
            .unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownProperty { ref name, .. } if name == "simpleSubProcessExpression"));
    }

    #[test]
    fn test_conditions() {
        let eval = SimpleExpressionEvaluator::new();
        let vars = scope(&[("input", json!(1)), ("name", json!("b")), ("ok", json!(true))]);
        assert!(eval.evaluate_condition("${input == 1}", &vars).unwrap());
        assert!(!eval.evaluate_condition("${input != 1}", &vars).unwrap());
        assert!(eval.evaluate_condition("${input >= 1 && ok}", &vars).unwrap());
        assert!(eval.evaluate_condition("${input > 5 || name == 'b'}", &vars).unwrap());
        assert!(eval.evaluate_condition("${!(input < 1)}", &vars).unwrap());
        assert!(eval.evaluate_condition("${name gt 'a' and not false}", &vars).unwrap());
        assert!(eval.evaluate_condition("input == 1", &vars).unwrap());
    }

    #[test]
    fn test_numeric_string_coerces() {
        let eval = SimpleExpressionEvaluator::new();
        let vars = scope(&[("input", json!("1"))]);
        assert!(eval.evaluate_condition("${input == 1}", &vars).unwrap());
    }

    #[test]
    fn test_short_circuit_skips_unknown() {
        let eval = SimpleExpressionEvaluator::new();
        let vars = scope(&[("a", json!(true))]);
        assert!(eval.evaluate_condition("${a || missing}", &vars).unwrap());
        assert!(eval.evaluate_condition("${a && missing}", &vars).is_err());
    }

    #[test]
    fn test_non_boolean_condition() {
        let eval = SimpleExpressionEvaluator::new();
        let vars = scope(&[("count", json!(3))]);
        let err = eval.evaluate_condition("${count}", &vars).unwrap_err();
        assert!(matches!(err, ExpressionError::NonBoolean { .. }));
    }

    #[test]
    fn test_syntax_errors() {
        let eval = SimpleExpressionEvaluator::new();
        let vars = VariableMap::new();
        assert!(matches!(
            eval.evaluate("${(1 == 1}", &vars),
            Err(ExpressionError::Syntax { .. })
        ));
        assert!(matches!(
            eval.evaluate("${1 == }", &vars),
            Err(ExpressionError::Syntax { .. })
        ));
        assert!(matches!(
            eval.evaluate("${'open}", &vars),
            Err(ExpressionError::Syntax { .. })
        ));
    }
}
