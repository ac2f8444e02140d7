//! Symbolic expressions in the solver's infix syntax.
//!
//! Parses expressions over two spatial variables (`x`, `y`) with the
//! constant `pi`, the functions `sin`, `cos`, `exp`, `log`, `sqrt`, and the
//! operators `+ - * / ^` (both `^` and `**` are accepted for powers).
//! Supports symbolic partial differentiation, light algebraic
//! simplification, numeric evaluation, and re-serialization back to the
//! same syntax with minimal, precedence-correct parenthesization.
//!
//! The correctness contract for serialization is numeric equivalence: the
//! printed form must parse back to an expression that evaluates to the
//! same value everywhere, not to a textually identical tree.

use std::fmt;
use std::ops;
use std::str::FromStr;

use thiserror::Error;

/// The two spatial variables expressions may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    X,
    Y,
}

impl Var {
    pub fn as_str(self) -> &'static str {
        match self {
            Var::X => "x",
            Var::Y => "y",
        }
    }
}

/// Built-in single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    Sin,
    Cos,
    Exp,
    /// Natural logarithm.
    Log,
    Sqrt,
}

impl UnaryFn {
    pub fn name(self) -> &'static str {
        match self {
            UnaryFn::Sin => "sin",
            UnaryFn::Cos => "cos",
            UnaryFn::Exp => "exp",
            UnaryFn::Log => "log",
            UnaryFn::Sqrt => "sqrt",
        }
    }

    fn apply(self, v: f64) -> f64 {
        match self {
            UnaryFn::Sin => v.sin(),
            UnaryFn::Cos => v.cos(),
            UnaryFn::Exp => v.exp(),
            UnaryFn::Log => v.ln(),
            UnaryFn::Sqrt => v.sqrt(),
        }
    }
}

/// Binary operators, in increasing precedence: `+ -`, `* /`, `^`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        }
    }

    /// Rendering precedence. Unary minus renders as if it sat between the
    /// additive and multiplicative levels, which over-parenthesizes a
    /// little but never changes meaning.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Add | BinOp::Sub => 1,
            BinOp::Mul | BinOp::Div => 2,
            BinOp::Pow => 4,
        }
    }

    fn is_right_assoc(self) -> bool {
        matches!(self, BinOp::Pow)
    }

    /// Left/right binding powers for Pratt parsing. `^` is right
    /// associative and binds tighter than unary minus.
    fn binding_power(self) -> (u8, u8) {
        match self {
            BinOp::Add | BinOp::Sub => (1, 2),
            BinOp::Mul | BinOp::Div => (3, 4),
            BinOp::Pow => (7, 6),
        }
    }
}

/// Binding power of prefix minus: looser than `^`, tighter than `*`.
const NEG_BP: u8 = 5;

/// A symbolic expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Pi,
    Var(Var),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(UnaryFn, Box<Expr>),
}

/// Errors from parsing an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("unexpected character '{ch}' at byte {at}")]
    UnexpectedChar { ch: char, at: usize },
    #[error("expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("unexpected '{found}'")]
    UnexpectedToken { found: String },
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("function '{0}' must be followed by a parenthesized argument")]
    MissingArgument(String),
    #[error("unbalanced parentheses")]
    UnbalancedParen,
}

/// Parse an expression from the solver's infix syntax.
pub fn parse(src: &str) -> Result<Expr, ExprError> {
    let tokens = lex(src)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let expr = parser.parse_expr(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(ExprError::UnexpectedToken {
            found: tok.describe(),
        }),
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl Expr {
    /// Partial derivative with respect to `var`.
    ///
    /// The result is built through the simplifying constructors, so obvious
    /// zero and identity terms are already folded away.
    pub fn diff(&self, var: Var) -> Expr {
        match self {
            Expr::Num(_) | Expr::Pi => Expr::Num(0.0),
            Expr::Var(v) => {
                if *v == var {
                    Expr::Num(1.0)
                } else {
                    Expr::Num(0.0)
                }
            }
            Expr::Neg(e) => neg(e.diff(var)),
            Expr::Bin(op, a, b) => match op {
                BinOp::Add => add(a.diff(var), b.diff(var)),
                BinOp::Sub => sub(a.diff(var), b.diff(var)),
                BinOp::Mul => add(
                    mul(a.diff(var), (**b).clone()),
                    mul((**a).clone(), b.diff(var)),
                ),
                BinOp::Div => div(
                    sub(
                        mul(a.diff(var), (**b).clone()),
                        mul((**a).clone(), b.diff(var)),
                    ),
                    powe((**b).clone(), Expr::Num(2.0)),
                ),
                BinOp::Pow => {
                    if b.is_constant() {
                        // Power rule: (a^c)' = c * a^(c-1) * a'
                        mul(
                            mul(
                                (**b).clone(),
                                powe((**a).clone(), sub((**b).clone(), Expr::Num(1.0))),
                            ),
                            a.diff(var),
                        )
                    } else {
                        // General rule: (a^b)' = a^b * (b'*log(a) + b*a'/a)
                        mul(
                            powe((**a).clone(), (**b).clone()),
                            add(
                                mul(b.diff(var), call(UnaryFn::Log, (**a).clone())),
                                div(mul((**b).clone(), a.diff(var)), (**a).clone()),
                            ),
                        )
                    }
                }
            },
            Expr::Call(fun, g) => {
                let dg = g.diff(var);
                match fun {
                    UnaryFn::Sin => mul(call(UnaryFn::Cos, (**g).clone()), dg),
                    UnaryFn::Cos => neg(mul(call(UnaryFn::Sin, (**g).clone()), dg)),
                    UnaryFn::Exp => mul(call(UnaryFn::Exp, (**g).clone()), dg),
                    UnaryFn::Log => div(dg, (**g).clone()),
                    UnaryFn::Sqrt => div(
                        dg,
                        mul(Expr::Num(2.0), call(UnaryFn::Sqrt, (**g).clone())),
                    ),
                }
            }
        }
    }

    /// Rebuild the tree through the simplifying constructors: folds
    /// constants, strips identity operands, and normalizes signs.
    pub fn simplified(&self) -> Expr {
        match self {
            Expr::Num(n) => num(*n),
            Expr::Pi | Expr::Var(_) => self.clone(),
            Expr::Neg(e) => neg(e.simplified()),
            Expr::Bin(op, a, b) => {
                let (a, b) = (a.simplified(), b.simplified());
                match op {
                    BinOp::Add => add(a, b),
                    BinOp::Sub => sub(a, b),
                    BinOp::Mul => mul(a, b),
                    BinOp::Div => div(a, b),
                    BinOp::Pow => powe(a, b),
                }
            }
            Expr::Call(fun, e) => call(*fun, e.simplified()),
        }
    }

    /// Evaluate at a point.
    pub fn eval(&self, x: f64, y: f64) -> f64 {
        match self {
            Expr::Num(n) => *n,
            Expr::Pi => std::f64::consts::PI,
            Expr::Var(Var::X) => x,
            Expr::Var(Var::Y) => y,
            Expr::Neg(e) => -e.eval(x, y),
            Expr::Bin(op, a, b) => {
                let (va, vb) = (a.eval(x, y), b.eval(x, y));
                match op {
                    BinOp::Add => va + vb,
                    BinOp::Sub => va - vb,
                    BinOp::Mul => va * vb,
                    BinOp::Div => va / vb,
                    BinOp::Pow => va.powf(vb),
                }
            }
            Expr::Call(fun, e) => fun.apply(e.eval(x, y)),
        }
    }

    /// True if the expression references neither spatial variable.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Num(_) | Expr::Pi => true,
            Expr::Var(_) => false,
            Expr::Neg(e) | Expr::Call(_, e) => e.is_constant(),
            Expr::Bin(_, a, b) => a.is_constant() && b.is_constant(),
        }
    }
}

// Arithmetic on expression trees goes through the simplifying constructors,
// so composite fields like a divergence come out already folded.

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        add(self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        sub(self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        mul(self, rhs)
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        neg(self)
    }
}

// Simplifying constructors. Every derivative and every `simplified` call
// funnels through these, so rendered output never carries `* 0`, `+ 0`,
// `^1` noise or a negation directly inside a product.

fn num(n: f64) -> Expr {
    if n < 0.0 {
        Expr::Neg(Box::new(Expr::Num(-n)))
    } else {
        Expr::Num(n)
    }
}

fn neg(e: Expr) -> Expr {
    match e {
        Expr::Num(n) => num(-n),
        Expr::Neg(inner) => *inner,
        Expr::Bin(BinOp::Sub, a, b) => Expr::Bin(BinOp::Sub, b, a),
        other => Expr::Neg(Box::new(other)),
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => num(x + y),
        (Expr::Num(z), b) if z == 0.0 => b,
        (a, Expr::Num(z)) if z == 0.0 => a,
        (a, Expr::Neg(x)) => sub(a, *x),
        (Expr::Neg(x), b) => sub(b, *x),
        (a, b) => Expr::Bin(BinOp::Add, Box::new(a), Box::new(b)),
    }
}

fn sub(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => num(x - y),
        (a, Expr::Num(z)) if z == 0.0 => a,
        (Expr::Num(z), b) if z == 0.0 => neg(b),
        (a, Expr::Neg(x)) => add(a, *x),
        (a, b) if a == b => Expr::Num(0.0),
        (a, b) => Expr::Bin(BinOp::Sub, Box::new(a), Box::new(b)),
    }
}

fn mul(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => num(x * y),
        (Expr::Num(z), _) if z == 0.0 => Expr::Num(0.0),
        (_, Expr::Num(z)) if z == 0.0 => Expr::Num(0.0),
        (Expr::Num(o), b) if o == 1.0 => b,
        (a, Expr::Num(o)) if o == 1.0 => a,
        (Expr::Neg(x), b) => neg(mul(*x, b)),
        (a, Expr::Neg(x)) => neg(mul(a, *x)),
        (a, b) => Expr::Bin(BinOp::Mul, Box::new(a), Box::new(b)),
    }
}

fn div(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) if y != 0.0 => num(x / y),
        (Expr::Num(z), _) if z == 0.0 => Expr::Num(0.0),
        (a, Expr::Num(o)) if o == 1.0 => a,
        (Expr::Neg(x), b) => neg(div(*x, b)),
        (a, Expr::Neg(x)) => neg(div(a, *x)),
        (a, b) if a == b => Expr::Num(1.0),
        (a, b) => Expr::Bin(BinOp::Div, Box::new(a), Box::new(b)),
    }
}

fn powe(a: Expr, b: Expr) -> Expr {
    match (a, b) {
        (Expr::Num(x), Expr::Num(y)) => {
            let v = x.powf(y);
            if v.is_finite() {
                num(v)
            } else {
                Expr::Bin(BinOp::Pow, Box::new(Expr::Num(x)), Box::new(Expr::Num(y)))
            }
        }
        (_, Expr::Num(z)) if z == 0.0 => Expr::Num(1.0),
        (a, Expr::Num(o)) if o == 1.0 => a,
        (Expr::Num(o), _) if o == 1.0 => Expr::Num(1.0),
        (a, b) => Expr::Bin(BinOp::Pow, Box::new(a), Box::new(b)),
    }
}

fn call(fun: UnaryFn, e: Expr) -> Expr {
    Expr::Call(fun, Box::new(e))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_prec(f, self, 0)
    }
}

/// Write `e`, parenthesizing when its precedence is too low for the
/// surrounding context `ctx`.
fn write_prec(f: &mut fmt::Formatter<'_>, e: &Expr, ctx: u8) -> fmt::Result {
    match e {
        Expr::Num(n) => {
            if *n < 0.0 && ctx > 1 {
                write!(f, "(")?;
                write_number(f, *n)?;
                write!(f, ")")
            } else {
                write_number(f, *n)
            }
        }
        Expr::Pi => write!(f, "pi"),
        Expr::Var(v) => write!(f, "{}", v.as_str()),
        Expr::Call(fun, arg) => {
            write!(f, "{}(", fun.name())?;
            write_prec(f, arg, 0)?;
            write!(f, ")")
        }
        Expr::Neg(inner) => {
            let parens = ctx > 1;
            if parens {
                write!(f, "(")?;
            }
            write!(f, "-")?;
            write_prec(f, inner, 2)?;
            if parens {
                write!(f, ")")
            } else {
                Ok(())
            }
        }
        Expr::Bin(op, a, b) => {
            let p = op.precedence();
            let parens = p < ctx;
            let (lhs_ctx, rhs_ctx) = if op.is_right_assoc() {
                (p + 1, p)
            } else {
                (p, p + 1)
            };
            if parens {
                write!(f, "(")?;
            }
            write_prec(f, a, lhs_ctx)?;
            write!(f, "{}", op.symbol())?;
            write_prec(f, b, rhs_ctx)?;
            if parens {
                write!(f, ")")
            } else {
                Ok(())
            }
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n == n.trunc() && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

// Lexer and Pratt parser.

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => format!("{}", n),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::Slash => "/".to_string(),
            Token::Caret => "^".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }

    fn bin_op(&self) -> Option<BinOp> {
        match self {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::Caret => Some(BinOp::Pow),
            _ => None,
        }
    }
}

fn lex(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (at, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = at;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
                if i < chars.len() && chars[i].1 == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
                if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].1.is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].1.is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let end = chars.get(i).map_or(src.len(), |(b, _)| *b);
                let value = src[start..end]
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedChar { ch: c, at })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = at;
                while i < chars.len()
                    && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_')
                {
                    i += 1;
                }
                let end = chars.get(i).map_or(src.len(), |(b, _)| *b);
                tokens.push(Token::Ident(src[start..end].to_string()));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1).is_some_and(|(_, c)| *c == '*') {
                    tokens.push(Token::Caret);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
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
            _ => return Err(ExprError::UnexpectedChar { ch: c, at }),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        match self.advance() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ExprError::UnbalancedParen),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_prefix()?;
        while let Some(op) = self.peek().and_then(Token::bin_op) {
            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr(r_bp)?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, ExprError> {
        let tok = self.advance().ok_or(ExprError::UnexpectedEnd)?.clone();
        match tok {
            Token::Num(n) => Ok(Expr::Num(n)),
            Token::Minus => Ok(Expr::Neg(Box::new(self.parse_expr(NEG_BP)?))),
            Token::Plus => self.parse_expr(NEG_BP),
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "x" => Ok(Expr::Var(Var::X)),
                "y" => Ok(Expr::Var(Var::Y)),
                "pi" => Ok(Expr::Pi),
                "sin" | "cos" | "exp" | "log" | "sqrt" => {
                    let fun = match name.as_str() {
                        "sin" => UnaryFn::Sin,
                        "cos" => UnaryFn::Cos,
                        "exp" => UnaryFn::Exp,
                        "log" => UnaryFn::Log,
                        _ => UnaryFn::Sqrt,
                    };
                    match self.advance() {
                        Some(Token::LParen) => {}
                        _ => return Err(ExprError::MissingArgument(name)),
                    }
                    let arg = self.parse_expr(0)?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(fun, Box::new(arg)))
                }
                _ => Err(ExprError::UnknownIdentifier(name)),
            },
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE_POINTS: [(f64, f64); 3] = [(0.25, 0.25), (0.5, 0.75), (0.9, 0.1)];

    fn roundtrip(src: &str) -> (Expr, Expr) {
        let original = parse(src).unwrap();
        let printed = original.simplified().to_string();
        let reparsed = parse(&printed).unwrap();
        (original, reparsed)
    }

    #[test]
    fn test_parse_basic_arithmetic() {
        let e = parse("1+2*3").unwrap();
        assert_relative_eq!(e.eval(0.0, 0.0), 7.0);
        let e = parse("(1+2)*3").unwrap();
        assert_relative_eq!(e.eval(0.0, 0.0), 9.0);
        let e = parse("2^3^2").unwrap();
        assert_relative_eq!(e.eval(0.0, 0.0), 512.0);
        let e = parse("7/2/2").unwrap();
        assert_relative_eq!(e.eval(0.0, 0.0), 1.75);
    }

    #[test]
    fn test_unary_minus_binds_looser_than_pow() {
        let e = parse("-x^2").unwrap();
        assert_relative_eq!(e.eval(3.0, 0.0), -9.0);
        let e = parse("(-x)^2").unwrap();
        assert_relative_eq!(e.eval(3.0, 0.0), 9.0);
    }

    #[test]
    fn test_double_star_power() {
        let e = parse("x**3").unwrap();
        assert_relative_eq!(e.eval(2.0, 0.0), 8.0);
    }

    #[test]
    fn test_scientific_notation() {
        let e = parse("1.5e2 + 2E-1").unwrap();
        assert_relative_eq!(e.eval(0.0, 0.0), 150.2);
    }

    #[test]
    fn test_log_is_natural() {
        let e = parse("log(x)").unwrap();
        assert_relative_eq!(e.eval(std::f64::consts::E, 0.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse("x + $"),
            Err(ExprError::UnexpectedChar { ch: '$', .. })
        ));
        assert!(matches!(parse("x +"), Err(ExprError::UnexpectedEnd)));
        assert!(matches!(
            parse("sin x"),
            Err(ExprError::MissingArgument(_))
        ));
        assert!(matches!(
            parse("foo(x)"),
            Err(ExprError::UnknownIdentifier(_))
        ));
        assert!(matches!(parse("(x+y"), Err(ExprError::UnbalancedParen)));
        assert!(matches!(
            parse("x y"),
            Err(ExprError::UnexpectedToken { .. })
        ));
    }

    #[test]
    fn test_roundtrip_preserves_value() {
        let sources = [
            "sin(pi*x)*sin(pi*y)",
            "-256*y*(y-1)*(2*y-1)*x^2*(x-1)^2",
            "256*x*(x-1)*(2*x-1)*y^2*(y-1)^2",
            "y*(x^2+y^2-1)",
            "-x*(x^2+y^2-1)",
            "sin(pi*y)*cos(pi*x)",
            "2*sin(pi*x)*cos(pi*y)",
            "exp(x)*log(y+2)/sqrt(x+1)",
        ];
        for src in sources {
            let (original, reparsed) = roundtrip(src);
            for (x, y) in SAMPLE_POINTS {
                assert_relative_eq!(
                    original.eval(x, y),
                    reparsed.eval(x, y),
                    max_relative = 1e-9,
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_derivative_roundtrip_preserves_value() {
        let sources = [
            "sin(pi*x)*sin(pi*y)",
            "-256*y*(y-1)*(2*y-1)*x^2*(x-1)^2",
            "y*(x^2+y^2-1)",
            "2*sin(pi*x)*cos(pi*y)",
        ];
        for src in sources {
            let e = parse(src).unwrap();
            for var in [Var::X, Var::Y] {
                let d = e.diff(var);
                let reparsed = parse(&d.to_string()).unwrap();
                for (x, y) in SAMPLE_POINTS {
                    assert_relative_eq!(
                        d.eval(x, y),
                        reparsed.eval(x, y),
                        max_relative = 1e-9,
                        epsilon = 1e-12
                    );
                }
            }
        }
    }

    #[test]
    fn test_diff_matches_finite_difference() {
        let sources = [
            "sin(pi*x)*sin(pi*y)",
            "x^2*(x-1)^2*y",
            "exp(x*y)",
            "sqrt(x+2)*cos(y)",
            "log(x+2)",
        ];
        let h = 1e-6;
        for src in sources {
            let e = parse(src).unwrap();
            let dx = e.diff(Var::X);
            let dy = e.diff(Var::Y);
            for (x, y) in SAMPLE_POINTS {
                let fd_x = (e.eval(x + h, y) - e.eval(x - h, y)) / (2.0 * h);
                let fd_y = (e.eval(x, y + h) - e.eval(x, y - h)) / (2.0 * h);
                assert_relative_eq!(dx.eval(x, y), fd_x, max_relative = 1e-4, epsilon = 1e-6);
                assert_relative_eq!(dy.eval(x, y), fd_y, max_relative = 1e-4, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_power_rule_constant_exponent() {
        let e = parse("x^3").unwrap();
        let d = e.diff(Var::X);
        assert_relative_eq!(d.eval(2.0, 0.0), 12.0);
        // x^1 folds to x, whose derivative is the constant 1
        let e = parse("x^1").unwrap();
        assert_eq!(e.simplified(), Expr::Var(Var::X));
    }

    #[test]
    fn test_general_power_rule() {
        // d/dx x^x = x^x * (log(x) + 1)
        let e = parse("x^x").unwrap();
        let d = e.diff(Var::X);
        let x = 1.7_f64;
        let expected = x.powf(x) * (x.ln() + 1.0);
        assert_relative_eq!(d.eval(x, 0.0), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(parse("2*3+4").unwrap().simplified(), Expr::Num(10.0));
        assert_eq!(parse("x*1+0").unwrap().simplified(), Expr::Var(Var::X));
        assert_eq!(parse("x-x").unwrap().simplified(), Expr::Num(0.0));
        assert_eq!(parse("x^0").unwrap().simplified(), Expr::Num(1.0));
    }

    #[test]
    fn test_sub_of_negation_normalizes() {
        let e = parse("x - -y").unwrap().simplified();
        assert_eq!(e.to_string(), "x+y");
    }

    #[test]
    fn test_display_parenthesization() {
        let e = parse("(x+y)*(x-y)").unwrap();
        assert_eq!(e.to_string(), "(x+y)*(x-y)");
        let e = parse("x/(y*2)").unwrap();
        assert_eq!(e.to_string(), "x/(y*2)");
        let e = parse("-(x+y)").unwrap();
        assert_eq!(e.to_string(), "-(x+y)");
        let e = parse("-x^2").unwrap();
        assert_eq!(e.to_string(), "-x^2");
        let e = parse("(-x)^2").unwrap();
        assert_eq!(e.to_string(), "(-x)^2");
    }

    #[test]
    fn test_display_uses_caret_for_powers() {
        let e = parse("x**2 + y^3").unwrap();
        assert_eq!(e.to_string(), "x^2+y^3");
    }

    #[test]
    fn test_randomized_roundtrip_agreement() {
        use rand::Rng;
        let mut rng = rand::rng();
        let e = parse("sin(pi*x)*cos(pi*y) + x^2*y - sqrt(x+2)").unwrap();
        let printed = parse(&e.simplified().to_string()).unwrap();
        for _ in 0..50 {
            let x: f64 = rng.random_range(-1.0..1.0);
            let y: f64 = rng.random_range(-1.0..1.0);
            assert_relative_eq!(
                e.eval(x, y),
                printed.eval(x, y),
                max_relative = 1e-9,
                epsilon = 1e-12
            );
        }
    }
}
