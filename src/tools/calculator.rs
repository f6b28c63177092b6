//! Safe arithmetic evaluation.
//!
//! Only numeric literals, parentheses, unary `+`/`-` and the binary operators
//! `+ - * / % **` are accepted. Names, calls, comparisons, boolean operators,
//! attribute access and every other construct are rejected before anything
//! is evaluated.

use async_trait::async_trait;
use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

use super::{required_str, to_json_safe, Tool, ToolArgs};

/// Nesting limit for parentheses, unary chains and `**`.
const MAX_DEPTH: usize = 100;

/// Binary operator limit. Left-associative chains nest one level per
/// operator, so this bounds evaluation depth.
const MAX_OPERATORS: usize = 1000;

/// Size limit for integer results, in bits.
const MAX_INT_BITS: u64 = 1 << 17;

const INT_TOO_LARGE: &str = "integer result is too large";
const INT_TO_FLOAT_OVERFLOW: &str = "int too large to convert to float";
const INT_DIVISION_OVERFLOW: &str = "integer division result too large for a float";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalcError {
    #[error("Unsupported expression")]
    Unsupported,

    #[error("invalid syntax")]
    Syntax,

    #[error("expression is too deeply nested")]
    TooDeep,

    #[error("expression is too long")]
    TooLong,

    #[error("{0}")]
    ZeroDivision(&'static str),

    #[error("0.0 cannot be raised to a negative power")]
    ZeroToNegativePower,

    #[error("{0}")]
    Overflow(&'static str),

    #[error("Expression did not evaluate to a finite number")]
    NonFinite,
}

/// Integer or float result, following the usual int/float promotion rules:
/// integer arithmetic is exact and unbounded, `/` always yields a float.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(BigInt),
    Float(f64),
}

impl Number {
    fn as_float(&self) -> Result<f64, CalcError> {
        match self {
            Number::Int(i) => i
                .to_f64()
                .filter(|f| f.is_finite())
                .ok_or(CalcError::Overflow(INT_TO_FLOAT_OVERFLOW)),
            Number::Float(f) => Ok(*f),
        }
    }

    fn is_zero(&self) -> bool {
        match self {
            Number::Int(i) => i.is_zero(),
            Number::Float(f) => *f == 0.0,
        }
    }

    fn is_negative(&self) -> bool {
        match self {
            Number::Int(i) => i.is_negative(),
            Number::Float(f) => *f < 0.0,
        }
    }
}

/// Integers that fit in 64 bits are JSON numbers; larger ones become decimal
/// strings so no digits are lost.
impl Serialize for Number {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Number::Int(i) => match (i.to_i64(), i.to_u64()) {
                (Some(v), _) => serializer.serialize_i64(v),
                (None, Some(v)) => serializer.serialize_u64(v),
                (None, None) => serializer.collect_str(i),
            },
            Number::Float(f) => serializer.serialize_f64(*f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
    /// Names, comparison/bitwise operators and other non-arithmetic syntax.
    Disallowed,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CalcError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let (number, next) = lex_number(&chars, i)?;
                tokens.push(Token::Num(number));
                i = next;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            // Floor division is valid syntax but not whitelisted.
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::Disallowed);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Disallowed);
            }
            '<' | '>' | '=' | '!' | '&' | '|' | '^' | '~' | ',' | '[' | ']' | '{' | '}'
            | '@' | ':' | '\'' | '"' => {
                tokens.push(Token::Disallowed);
                i += 1;
            }
            _ => return Err(CalcError::Syntax),
        }
    }

    Ok(tokens)
}

/// Lex a numeric literal: `12`, `1_000`, `3.5`, `.5`, `2.`, `1e-3`, `0x1f`,
/// `0o17`, `0b101`.
fn lex_number(chars: &[char], start: usize) -> Result<(Number, usize), CalcError> {
    if chars[start] == '0' {
        let radix = match chars.get(start + 1) {
            Some('x' | 'X') => Some(16),
            Some('o' | 'O') => Some(8),
            Some('b' | 'B') => Some(2),
            _ => None,
        };
        if let Some(radix) = radix {
            return lex_radix(chars, start + 2, radix);
        }
    }

    let mut i = start;
    let mut text = String::new();
    let mut is_float = false;

    let take_digits = |i: &mut usize, text: &mut String| {
        let begin = *i;
        while *i < chars.len() && (chars[*i].is_ascii_digit() || chars[*i] == '_') {
            if chars[*i] != '_' {
                text.push(chars[*i]);
            }
            *i += 1;
        }
        *i > begin
    };

    let has_int = take_digits(&mut i, &mut text);
    if !has_int {
        text.push('0');
    }

    if i < chars.len() && chars[i] == '.' {
        is_float = true;
        text.push('.');
        i += 1;
        let has_frac = take_digits(&mut i, &mut text);
        if !has_int && !has_frac {
            // A lone `.` is attribute access.
            return Err(CalcError::Unsupported);
        }
        if !has_frac {
            text.push('0');
        }
    }

    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        let mut exponent = String::from("e");
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            exponent.push(chars[j]);
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            is_float = true;
            text.push_str(&exponent);
            i = j;
            take_digits(&mut i, &mut text);
        }
    }

    if is_float {
        let value = text.parse().map_err(|_| CalcError::Syntax)?;
        return Ok((Number::Float(value), i));
    }

    // `007` is a syntax error, `000` is zero.
    if text.len() > 1 && text.starts_with('0') && text.chars().any(|c| c != '0') {
        return Err(CalcError::Syntax);
    }

    let value = text.parse::<BigInt>().map_err(|_| CalcError::Syntax)?;
    Ok((Number::Int(value), i))
}

/// Lex the digits of a prefixed integer literal (after `0x`, `0o` or `0b`).
fn lex_radix(chars: &[char], start: usize, radix: u32) -> Result<(Number, usize), CalcError> {
    let mut i = start;
    let mut digits = String::new();

    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
        if chars[i] != '_' {
            if !chars[i].is_digit(radix) {
                return Err(CalcError::Syntax);
            }
            digits.push(chars[i]);
        }
        i += 1;
    }

    BigInt::parse_bytes(digits.as_bytes(), radix)
        .map(|value| (Number::Int(value), i))
        .ok_or(CalcError::Syntax)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(Number),
    Neg(Box<Expr>),
    Pos(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn parse(tokens: Vec<Token>) -> Result<Expr, CalcError> {
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            operators: 0,
        };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(Token::Disallowed) => Err(CalcError::Unsupported),
            Some(_) => Err(CalcError::Syntax),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn enter(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(CalcError::TooDeep)
        } else {
            Ok(())
        }
    }

    fn operator(&mut self) -> Result<(), CalcError> {
        self.pos += 1;
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            Err(CalcError::TooLong)
        } else {
            Ok(())
        }
    }

    // expr := term (("+" | "-") term)*
    fn expr(&mut self) -> Result<Expr, CalcError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.operator()?;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    // term := unary (("*" | "/" | "%") unary)*
    fn term(&mut self) -> Result<Expr, CalcError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.operator()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    // unary := ("+" | "-") unary | power
    fn unary(&mut self) -> Result<Expr, CalcError> {
        match self.peek() {
            Some(Token::Minus) | Some(Token::Plus) => {
                let negate = self.advance() == Some(Token::Minus);
                self.enter()?;
                let operand = self.unary()?;
                self.depth -= 1;
                Ok(if negate {
                    Expr::Neg(Box::new(operand))
                } else {
                    Expr::Pos(Box::new(operand))
                })
            }
            _ => self.power(),
        }
    }

    // power := atom ["**" unary]   (right-associative, binds tighter than a
    // unary sign on its left: -2**2 == -4)
    fn power(&mut self) -> Result<Expr, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Pow) {
            self.operator()?;
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    // atom := NUMBER | "(" expr ")"
    fn atom(&mut self) -> Result<Expr, CalcError> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(Token::Disallowed) => Err(CalcError::Unsupported),
                    _ => Err(CalcError::Syntax),
                }
            }
            Some(Token::Disallowed) => Err(CalcError::Unsupported),
            _ => Err(CalcError::Syntax),
        }
    }
}

fn eval(expr: &Expr) -> Result<Number, CalcError> {
    match expr {
        Expr::Num(n) => Ok(n.clone()),
        Expr::Pos(inner) => eval(inner),
        Expr::Neg(inner) => Ok(match eval(inner)? {
            Number::Int(i) => Number::Int(-i),
            Number::Float(f) => Number::Float(-f),
        }),
        Expr::Binary(op, left, right) => {
            let left = eval(left)?;
            let right = eval(right)?;
            apply(*op, left, right)
        }
    }
}

fn apply(op: BinaryOp, left: Number, right: Number) -> Result<Number, CalcError> {
    use Number::{Float, Int};

    let result = match (op, left, right) {
        (BinaryOp::Add, Int(a), Int(b)) => Int(a + b),
        (BinaryOp::Sub, Int(a), Int(b)) => Int(a - b),
        (BinaryOp::Mul, Int(a), Int(b)) => {
            if a.bits() + b.bits() > MAX_INT_BITS {
                return Err(CalcError::Overflow(INT_TOO_LARGE));
            }
            Int(a * b)
        }
        (BinaryOp::Add, a, b) => Float(a.as_float()? + b.as_float()?),
        (BinaryOp::Sub, a, b) => Float(a.as_float()? - b.as_float()?),
        (BinaryOp::Mul, a, b) => Float(a.as_float()? * b.as_float()?),

        (BinaryOp::Div, Int(_), Int(b)) if b.is_zero() => {
            return Err(CalcError::ZeroDivision("division by zero"))
        }
        (BinaryOp::Div, _, b) if b.is_zero() => {
            return Err(CalcError::ZeroDivision("float division by zero"))
        }
        (BinaryOp::Div, Int(a), Int(b)) => Float(int_true_div(&a, &b)?),
        (BinaryOp::Div, a, b) => Float(a.as_float()? / b.as_float()?),

        (BinaryOp::Mod, Int(_), Int(b)) if b.is_zero() => {
            return Err(CalcError::ZeroDivision("integer modulo by zero"))
        }
        (BinaryOp::Mod, _, b) if b.is_zero() => {
            return Err(CalcError::ZeroDivision("float modulo"))
        }
        (BinaryOp::Mod, Int(a), Int(b)) => Int(floor_mod_int(&a, &b)),
        (BinaryOp::Mod, a, b) => Float(floor_mod_float(a.as_float()?, b.as_float()?)),

        (BinaryOp::Pow, a, b) => return power(a, b),
    };

    Ok(result)
}

/// `a / b` rounded to a float, also when the operands overflow a float.
fn int_true_div(a: &BigInt, b: &BigInt) -> Result<f64, CalcError> {
    let negative = a.is_negative() != b.is_negative();

    // Scale so the integer quotient carries at least 64 significant bits.
    let scale = 64 + b.bits() as i64 - a.bits() as i64;
    let quotient = if scale >= 0 {
        (a.magnitude() << scale as usize) / b.magnitude()
    } else {
        a.magnitude() / (b.magnitude() << (-scale) as usize)
    };

    let mut value = quotient
        .to_f64()
        .ok_or(CalcError::Overflow(INT_DIVISION_OVERFLOW))?;
    let mut exponent = -scale;
    while exponent != 0 && value.is_finite() && value != 0.0 {
        let step = exponent.clamp(-1000, 1000);
        value *= 2f64.powi(step as i32);
        exponent -= step;
    }

    if !value.is_finite() {
        return Err(CalcError::Overflow(INT_DIVISION_OVERFLOW));
    }
    Ok(if negative { -value } else { value })
}

/// Remainder with the sign of the divisor.
fn floor_mod_int(a: &BigInt, b: &BigInt) -> BigInt {
    let r = a % b;
    if !r.is_zero() && r.is_negative() != b.is_negative() {
        r + b
    } else {
        r
    }
}

fn floor_mod_float(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r == 0.0 {
        0.0_f64.copysign(b)
    } else if (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn power(base: Number, exponent: Number) -> Result<Number, CalcError> {
    if base.is_zero() && exponent.is_negative() {
        return Err(CalcError::ZeroToNegativePower);
    }

    if let (Number::Int(b), Number::Int(e)) = (&base, &exponent) {
        if !e.is_negative() {
            return int_pow(b, e).map(Number::Int);
        }
    }

    // A negative base with a fractional exponent yields NaN here, which the
    // finiteness check turns into an error.
    Ok(Number::Float(base.as_float()?.powf(exponent.as_float()?)))
}

fn int_pow(base: &BigInt, exponent: &BigInt) -> Result<BigInt, CalcError> {
    if exponent.is_zero() {
        return Ok(BigInt::one());
    }
    if base.is_zero() || base.is_one() {
        return Ok(base.clone());
    }
    if *base == BigInt::from(-1) {
        let even = (exponent % BigInt::from(2)).is_zero();
        return Ok(if even { BigInt::one() } else { base.clone() });
    }

    let exponent = exponent
        .to_u32()
        .ok_or(CalcError::Overflow(INT_TOO_LARGE))?;
    if (base.bits() - 1).saturating_mul(u64::from(exponent)) > MAX_INT_BITS {
        return Err(CalcError::Overflow(INT_TOO_LARGE));
    }
    Ok(base.pow(exponent))
}

/// Parse and evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<Number, CalcError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Syntax);
    }
    let expr = Parser::parse(tokens)?;
    match eval(&expr)? {
        Number::Float(f) if !f.is_finite() => Err(CalcError::NonFinite),
        value => Ok(value),
    }
}

#[derive(Debug, Serialize)]
struct CalculatorOutput<'a> {
    expression: &'a str,
    value: Number,
}

/// Evaluate a math expression without executing arbitrary code.
pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Safely evaluate a mathematical expression."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "OBJECT",
            "properties": {
                "expression": { "type": "STRING", "description": "Math expression" }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: &ToolArgs) -> anyhow::Result<Value> {
        let expression = required_str(args, "expression")
            .ok_or_else(|| anyhow::anyhow!("Missing expression"))?;

        let value = evaluate(expression)?;

        Ok(to_json_safe(&CalculatorOutput { expression, value }))
    }
}
