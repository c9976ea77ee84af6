//! A restricted expression language for inline and file handlers.
//!
//! Executing arbitrary source from a configuration document is not an option in a
//! compiled server, so inline handlers are expressions over a fixed set of safe
//! primitives: literals, the call's arguments by name, arithmetic, comparison, boolean
//! logic and a small builtin function set. No loops, no assignment, no I/O.
//!
//! Compilation happens once, at handler resolution; only evaluation runs per call.

use std::fmt;

use serde_json::{Map, Value};

/// A compile-time (parse) failure in an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.position)
    }
}

/// A runtime evaluation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError(pub String);

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Not,
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// A reference to a call argument by name.
    Arg(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

// --- Lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            position: self.pos,
            message: message.into(),
        }
    }

    fn tokens(mut self) -> Result<Vec<(usize, Token)>, ParseError> {
        let mut out = Vec::new();
        while self.pos < self.src.len() {
            let start = self.pos;
            let c = self.src[self.pos];
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.pos += 1;
                }
                b'0'..=b'9' | b'.' => {
                    let begin = self.pos;
                    while self.pos < self.src.len()
                        && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.')
                    {
                        self.pos += 1;
                    }
                    let text = std::str::from_utf8(&self.src[begin..self.pos]).unwrap();
                    let number = text
                        .parse::<f64>()
                        .map_err(|_| self.error(format!("invalid number literal '{text}'")))?;
                    out.push((start, Token::Number(number)));
                }
                b'"' | b'\'' => {
                    let quote = c;
                    self.pos += 1;
                    let mut text = String::new();
                    loop {
                        if self.pos >= self.src.len() {
                            return Err(self.error("unterminated string literal"));
                        }
                        let ch = self.src[self.pos];
                        self.pos += 1;
                        if ch == quote {
                            break;
                        }
                        if ch == b'\\' {
                            if self.pos >= self.src.len() {
                                return Err(self.error("unterminated escape sequence"));
                            }
                            let escaped = self.src[self.pos];
                            self.pos += 1;
                            match escaped {
                                b'n' => text.push('\n'),
                                b't' => text.push('\t'),
                                other => text.push(other as char),
                            }
                        } else {
                            text.push(ch as char);
                        }
                    }
                    out.push((start, Token::Str(text)));
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    let begin = self.pos;
                    while self.pos < self.src.len()
                        && (self.src[self.pos].is_ascii_alphanumeric() || self.src[self.pos] == b'_')
                    {
                        self.pos += 1;
                    }
                    let text = std::str::from_utf8(&self.src[begin..self.pos]).unwrap();
                    out.push((start, Token::Ident(text.to_string())));
                }
                _ => {
                    let two: Option<&'static str> = if self.pos + 1 < self.src.len() {
                        match &self.src[self.pos..self.pos + 2] {
                            b"==" => Some("=="),
                            b"!=" => Some("!="),
                            b"<=" => Some("<="),
                            b">=" => Some(">="),
                            b"&&" => Some("&&"),
                            b"||" => Some("||"),
                            _ => None,
                        }
                    } else {
                        None
                    };
                    if let Some(p) = two {
                        self.pos += 2;
                        out.push((start, Token::Punct(p)));
                        continue;
                    }
                    let one: &'static str = match c {
                        b'+' => "+",
                        b'-' => "-",
                        b'*' => "*",
                        b'/' => "/",
                        b'%' => "%",
                        b'(' => "(",
                        b')' => ")",
                        b',' => ",",
                        b'<' => "<",
                        b'>' => ">",
                        b'!' => "!",
                        _ => return Err(self.error(format!("unexpected character '{}'", c as char))),
                    };
                    self.pos += 1;
                    out.push((start, Token::Punct(one)));
                }
            }
        }
        Ok(out)
    }
}

// --- Parser (recursive descent, precedence climbing) ---

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser {
    fn error_at(&self, message: impl Into<String>) -> ParseError {
        let position = self
            .tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(p, _)| *p)
            .unwrap_or(0);
        ParseError {
            position,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error_at(format!("expected '{punct}'")))
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.eat_punct("||") {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.equality()?;
        while self.eat_punct("&&") {
            let rhs = self.equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = if self.eat_punct("==") {
                BinaryOp::Eq
            } else if self.eat_punct("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            let rhs = self.comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = if self.eat_punct("<=") {
                BinaryOp::Le
            } else if self.eat_punct(">=") {
                BinaryOp::Ge
            } else if self.eat_punct("<") {
                BinaryOp::Lt
            } else if self.eat_punct(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.factor()?;
        loop {
            let op = if self.eat_punct("+") {
                BinaryOp::Add
            } else if self.eat_punct("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let rhs = self.factor()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = if self.eat_punct("*") {
                BinaryOp::Mul
            } else if self.eat_punct("/") {
                BinaryOp::Div
            } else if self.eat_punct("%") {
                BinaryOp::Rem
            } else {
                break;
            };
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_punct("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat_punct("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Str(s))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => return Ok(Expr::Bool(true)),
                    "false" => return Ok(Expr::Bool(false)),
                    "null" => return Ok(Expr::Null),
                    _ => {}
                }
                if self.eat_punct("(") {
                    let mut args = Vec::new();
                    if !self.eat_punct(")") {
                        loop {
                            args.push(self.or_expr()?);
                            if self.eat_punct(")") {
                                break;
                            }
                            self.expect_punct(",")?;
                        }
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Arg(name))
                }
            }
            Some(Token::Punct("(")) => {
                self.pos += 1;
                let expr = self.or_expr()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            _ => Err(self.error_at("expected an expression")),
        }
    }
}

/// Compile an expression. Syntax errors are reported here, not at call time.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(src).tokens()?;
    if tokens.is_empty() {
        return Err(ParseError {
            position: 0,
            message: "empty expression".to_string(),
        });
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error_at("unexpected trailing input"));
    }
    Ok(expr)
}

// --- Evaluation ---

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_number(value: &Value) -> Result<f64, EvalError> {
    value
        .as_f64()
        .ok_or_else(|| EvalError(format!("expected a number, got {value}")))
}

/// Render an f64 back as a JSON number, collapsing integral results so `5 + 3`
/// evaluates to `8`, not `8.0`.
fn number_value(n: f64) -> Result<Value, EvalError> {
    if !n.is_finite() {
        return Err(EvalError("arithmetic produced a non-finite number".to_string()));
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Ok(Value::from(n as i64))
    } else {
        Ok(Value::from(n))
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Expr {
    /// Evaluate against the call's argument object.
    pub fn eval(&self, args: &Map<String, Value>) -> Result<Value, EvalError> {
        match self {
            Expr::Number(n) => number_value(*n),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Arg(name) => Ok(args.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Unary(op, inner) => {
                let value = inner.eval(args)?;
                match op {
                    UnaryOp::Neg => number_value(-as_number(&value)?),
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                }
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs, args),
            Expr::Call(name, call_args) => {
                // `if` is a special form: only the selected branch is evaluated, so an
                // error in the untaken branch cannot fail the call.
                if name == "if" {
                    if call_args.len() != 3 {
                        return Err(EvalError(format!(
                            "if() expects 3 argument(s), got {}",
                            call_args.len()
                        )));
                    }
                    let selected = if truthy(&call_args[0].eval(args)?) {
                        &call_args[1]
                    } else {
                        &call_args[2]
                    };
                    return selected.eval(args);
                }
                let values = call_args
                    .iter()
                    .map(|arg| arg.eval(args))
                    .collect::<Result<Vec<_>, _>>()?;
                eval_call(name, &values)
            }
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        args: &Map<String, Value>,
    ) -> Result<Value, EvalError> {
        // Short-circuit the logical operators.
        match op {
            BinaryOp::And => {
                let left = lhs.eval(args)?;
                if !truthy(&left) {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(truthy(&rhs.eval(args)?)));
            }
            BinaryOp::Or => {
                let left = lhs.eval(args)?;
                if truthy(&left) {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(truthy(&rhs.eval(args)?)));
            }
            _ => {}
        }

        let left = lhs.eval(args)?;
        let right = rhs.eval(args)?;
        match op {
            BinaryOp::Add => {
                // `+` concatenates when either side is a string.
                if left.is_string() || right.is_string() {
                    Ok(Value::String(format!("{}{}", stringify(&left), stringify(&right))))
                } else {
                    number_value(as_number(&left)? + as_number(&right)?)
                }
            }
            BinaryOp::Sub => number_value(as_number(&left)? - as_number(&right)?),
            BinaryOp::Mul => number_value(as_number(&left)? * as_number(&right)?),
            BinaryOp::Div => {
                let divisor = as_number(&right)?;
                if divisor == 0.0 {
                    return Err(EvalError("division by zero".to_string()));
                }
                number_value(as_number(&left)? / divisor)
            }
            BinaryOp::Rem => {
                let divisor = as_number(&right)?;
                if divisor == 0.0 {
                    return Err(EvalError("division by zero".to_string()));
                }
                number_value(as_number(&left)? % divisor)
            }
            BinaryOp::Eq => Ok(Value::Bool(left == right)),
            BinaryOp::Ne => Ok(Value::Bool(left != right)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ordering = compare(&left, &right)?;
                let result = match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    BinaryOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                };
                Ok(Value::Bool(result))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, EvalError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => as_number(left)?
            .partial_cmp(&as_number(right)?)
            .ok_or_else(|| EvalError("numbers are not comparable".to_string())),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(EvalError(format!(
            "cannot compare {left} with {right}"
        ))),
    }
}

fn arity(name: &str, values: &[Value], expected: usize) -> Result<(), EvalError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(EvalError(format!(
            "{name}() expects {expected} argument(s), got {}",
            values.len()
        )))
    }
}

fn eval_call(name: &str, values: &[Value]) -> Result<Value, EvalError> {
    match name {
        "len" => {
            arity(name, values, 1)?;
            let length = match &values[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => return Err(EvalError(format!("len() is not defined for {other}"))),
            };
            Ok(Value::from(length as i64))
        }
        "upper" => {
            arity(name, values, 1)?;
            Ok(Value::String(stringify(&values[0]).to_uppercase()))
        }
        "lower" => {
            arity(name, values, 1)?;
            Ok(Value::String(stringify(&values[0]).to_lowercase()))
        }
        "trim" => {
            arity(name, values, 1)?;
            Ok(Value::String(stringify(&values[0]).trim().to_string()))
        }
        "str" => {
            arity(name, values, 1)?;
            Ok(Value::String(stringify(&values[0])))
        }
        "abs" => {
            arity(name, values, 1)?;
            number_value(as_number(&values[0])?.abs())
        }
        "min" => {
            arity(name, values, 2)?;
            number_value(as_number(&values[0])?.min(as_number(&values[1])?))
        }
        "max" => {
            arity(name, values, 2)?;
            number_value(as_number(&values[0])?.max(as_number(&values[1])?))
        }
        "concat" => Ok(Value::String(
            values.iter().map(stringify).collect::<String>(),
        )),
        other => Err(EvalError(format!("unknown function '{other}'"))),
    }
}
