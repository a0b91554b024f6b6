//! Scalar expression module for representing symbolic coefficients.
//!
//! This module defines the scalar expression type used everywhere a tensor component,
//! a free parameter or one side of a substitution is needed. The main types are:
//!
//! - `Expr`: An enum representing different kinds of scalar expressions
//! - `LinearForm`: A scalar expression decomposed into `Σ cᵢ·xᵢ + c₀`
//!
//! The expression tree is built recursively using `Box<Expr>` for nested expressions and can be:
//! - Simplified using algebraic rules
//! - Modified by substituting variables with replacement expressions
//! - Split into its additive terms
//! - Decomposed into a linear form for row reduction
//! - Written to and read from a compact binary format
//!
//! # Expression Simplification
//! The simplify method performs algebraic simplifications including:
//! - Constant folding (e.g. 2 + 3 → 5)
//! - Identity rules (e.g. x + 0 → x, x * 1 → x)
//! - Exponent rules (e.g. x^0 → 1, x^1 → x)
//! - Combining like terms with constant factors (e.g. 2*x + 3*x → 5*x)

use std::io::{Read, Write};
use std::ops;

use crate::errors::{SerializeError, SubstitutionError};
use crate::linalg::EPSILON;

/// Nesting limit when reading expressions from untrusted input.
const MAX_DEPTH: usize = 512;

const TAG_CONST: u8 = 0;
const TAG_VAR: u8 = 1;
const TAG_ADD: u8 = 2;
const TAG_SUB: u8 = 3;
const TAG_MUL: u8 = 4;
const TAG_DIV: u8 = 5;
const TAG_POW: u8 = 6;
const TAG_NEG: u8 = 7;

/// An expression tree node representing a symbolic scalar.
///
/// Variables are free parameters of the coefficient tensors (e.g. `e1`, `e2`). They
/// are identified by name only.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant floating point value
    Const(f64),
    /// A named free parameter
    Var(String),
    /// Addition of two expressions
    Add(Box<Expr>, Box<Expr>),
    /// Multiplication of two expressions
    Mul(Box<Expr>, Box<Expr>),
    /// Subtraction of two expressions
    Sub(Box<Expr>, Box<Expr>),
    /// Division of two expressions
    Div(Box<Expr>, Box<Expr>),
    /// Exponentiation of an expression by an integer constant
    Pow(Box<Expr>, i64),
    /// Negation of an expression
    Neg(Box<Expr>),
}

/// Sum of two coefficients, flushed to zero when it cancels to within [`EPSILON`] of the
/// larger operand.
fn cancel(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum.abs() <= EPSILON * a.abs().max(b.abs()) {
        0.0
    } else {
        sum
    }
}

/// A scalar expression of the form `Σ cᵢ·xᵢ + c₀`.
///
/// Terms keep the order in which their variables were first encountered while walking
/// the expression from left to right. Terms whose coefficient cancels to zero are dropped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearForm {
    pub terms: Vec<(String, f64)>,
    pub constant: f64,
}

impl LinearForm {
    fn constant(value: f64) -> Self {
        Self {
            terms: Vec::new(),
            constant: value,
        }
    }

    fn variable(name: &str) -> Self {
        Self {
            terms: vec![(name.to_string(), 1.0)],
            constant: 0.0,
        }
    }

    fn plus(mut self, other: LinearForm) -> Self {
        for (name, coefficient) in other.terms {
            match self.terms.iter_mut().find(|(n, _)| *n == name) {
                Some((_, c)) => *c = cancel(*c, coefficient),
                None => self.terms.push((name, coefficient)),
            }
        }
        self.constant = cancel(self.constant, other.constant);
        self.terms.retain(|(_, c)| *c != 0.0);
        self
    }

    fn scaled(mut self, factor: f64) -> Self {
        for (_, c) in self.terms.iter_mut() {
            *c *= factor;
        }
        self.constant *= factor;
        self.terms.retain(|(_, c)| *c != 0.0);
        self
    }

    /// Returns true if no variable term is left.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// Returns true if the form is identically zero.
    pub fn is_zero(&self) -> bool {
        self.is_constant() && self.constant == 0.0
    }

    /// Returns the coefficient of `variable`, or 0 if it does not occur.
    pub fn coefficient(&self, variable: &str) -> f64 {
        self.terms
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, c)| *c)
            .unwrap_or(0.0)
    }

    /// Rebuilds a scalar expression from the form.
    ///
    /// Unit coefficients are omitted and negative coefficients after the first term are
    /// written as subtractions, so `x - 2*y + 3` comes back in that shape.
    pub fn to_expr(&self) -> Expr {
        let mut parts: Vec<(bool, Expr)> = self
            .terms
            .iter()
            .map(|(name, c)| {
                let magnitude = c.abs();
                let term = if (magnitude - 1.0).abs() <= EPSILON {
                    Expr::Var(name.clone())
                } else {
                    Expr::Mul(
                        Box::new(Expr::Const(magnitude)),
                        Box::new(Expr::Var(name.clone())),
                    )
                };
                (*c < 0.0, term)
            })
            .collect();
        if self.constant != 0.0 {
            parts.push((self.constant < 0.0, Expr::Const(self.constant.abs())));
        }

        let mut parts = parts.into_iter();
        let Some((negative, first)) = parts.next() else {
            return Expr::Const(0.0);
        };
        let first = if negative {
            match first {
                Expr::Const(c) => Expr::Const(-c),
                other => Expr::Neg(Box::new(other)),
            }
        } else {
            first
        };
        parts.fold(first, |acc, (negative, term)| {
            if negative {
                Expr::Sub(Box::new(acc), Box::new(term))
            } else {
                Expr::Add(Box::new(acc), Box::new(term))
            }
        })
    }
}

impl Expr {
    /// Creates a variable node.
    pub fn var(name: &str) -> Self {
        Expr::Var(name.to_string())
    }

    /// Returns the value if the expression is a constant node.
    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Returns true if the expression is identically zero.
    ///
    /// Linear expressions are decided exactly through their linear form; anything else
    /// only counts as zero if it simplifies to the constant 0.
    pub fn is_zero(&self) -> bool {
        match self.linear_form() {
            Ok(form) => form.is_zero(),
            Err(_) => matches!(*self.simplify(), Expr::Const(c) if c.abs() <= EPSILON),
        }
    }

    /// Rewrites linear expressions into their normal form and simplifies everything else.
    ///
    /// Two linear expressions with the same value normalize to equal trees.
    pub fn normalize(&self) -> Expr {
        match self.linear_form() {
            Ok(form) => form.to_expr(),
            Err(_) => *self.simplify(),
        }
    }

    /// Returns the names of all variables in first-seen order, without duplicates.
    pub fn variables(&self) -> Vec<String> {
        fn walk(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Const(_) => {}
                Expr::Var(name) => {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                Expr::Add(l, r) | Expr::Mul(l, r) | Expr::Sub(l, r) | Expr::Div(l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Expr::Pow(e, _) | Expr::Neg(e) => walk(e, out),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }

    /// Simplifies the expression by folding constants and applying basic algebraic rules.
    ///
    /// This method performs several types of algebraic simplifications:
    ///
    /// # Constant Folding
    /// - Evaluates constant expressions: 2 + 3 → 5
    /// - Simplifies operations with special constants: x * 0 → 0
    ///
    /// # Identity Rules
    /// - Additive identity: x + 0 → x
    /// - Multiplicative identity: x * 1 → x
    /// - Division identity: x / 1 → x
    /// - Division by self: x / x → 1
    /// - Self subtraction: x - x → 0
    ///
    /// # Exponent Rules
    /// - Zero exponent: x^0 → 1
    /// - First power: x^1 → x
    ///
    /// # Negation
    /// - Double negation: -(-x) → x
    /// - Constant factors absorb the sign: -(2 * x) → -2 * x
    ///
    /// Constant factors are moved to the left of products so that like terms can be
    /// combined: 2*x + x*3 → 5*x.
    ///
    /// # Returns
    /// A new simplified expression tree
    pub fn simplify(&self) -> Box<Expr> {
        match self {
            Expr::Const(_) | Expr::Var(_) => Box::new(self.clone()),

            Expr::Add(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    // Fold constants: 1 + 2 -> 3
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a + b)),
                    // Identity: x + 0 -> x
                    (expr, Expr::Const(c)) | (Expr::Const(c), expr) if *c == 0.0 => {
                        Box::new(expr.clone())
                    }
                    // Combine like terms: c1*x + c2*x -> (c1+c2)*x
                    (Expr::Mul(a1, x1), Expr::Mul(a2, x2))
                        if x1 == x2 && a1.as_const().is_some() && a2.as_const().is_some() =>
                    {
                        Expr::Mul(Expr::Add(a1.clone(), a2.clone()).simplify(), x1.clone())
                            .simplify()
                    }
                    // x + (-y) -> x - y
                    (expr, Expr::Neg(inner)) => {
                        Expr::Sub(Box::new(expr.clone()), inner.clone()).simplify()
                    }
                    _ => Box::new(Expr::Add(l, r)),
                }
            }

            Expr::Sub(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    // Fold constants: 3 - 2 -> 1
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a - b)),
                    // Identity: x - 0 -> x
                    (expr, Expr::Const(c)) if *c == 0.0 => Box::new(expr.clone()),
                    // 0 - x -> -x
                    (Expr::Const(c), expr) if *c == 0.0 => {
                        Expr::Neg(Box::new(expr.clone())).simplify()
                    }
                    // Zero: x - x -> 0
                    (a, b) if a == b => Box::new(Expr::Const(0.0)),
                    // Combine like terms: c1*x - c2*x -> (c1-c2)*x
                    (Expr::Mul(a1, x1), Expr::Mul(a2, x2))
                        if x1 == x2 && a1.as_const().is_some() && a2.as_const().is_some() =>
                    {
                        Expr::Mul(Expr::Sub(a1.clone(), a2.clone()).simplify(), x1.clone())
                            .simplify()
                    }
                    // x - (-y) -> x + y
                    (expr, Expr::Neg(inner)) => {
                        Expr::Add(Box::new(expr.clone()), inner.clone()).simplify()
                    }
                    _ => Box::new(Expr::Sub(l, r)),
                }
            }

            Expr::Mul(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    // Fold constants: 2 * 3 -> 6
                    (Expr::Const(a), Expr::Const(b)) => Box::new(Expr::Const(a * b)),
                    // Zero: x * 0 -> 0
                    (_, Expr::Const(c)) | (Expr::Const(c), _) if *c == 0.0 => {
                        Box::new(Expr::Const(0.0))
                    }
                    // Identity: x * 1 -> x
                    (expr, Expr::Const(c)) | (Expr::Const(c), expr) if *c == 1.0 => {
                        Box::new(expr.clone())
                    }
                    // Sign: -1 * x -> -x
                    (expr, Expr::Const(c)) | (Expr::Const(c), expr) if *c == -1.0 => {
                        Expr::Neg(Box::new(expr.clone())).simplify()
                    }
                    // Nested constants: c1 * (c2 * x) -> (c1*c2) * x
                    (Expr::Const(a), Expr::Mul(b, x)) | (Expr::Mul(b, x), Expr::Const(a))
                        if b.as_const().is_some() =>
                    {
                        let b = b.as_const().unwrap_or(1.0);
                        Expr::Mul(Box::new(Expr::Const(a * b)), x.clone()).simplify()
                    }
                    // Constants to the left: x * c -> c * x
                    (expr, Expr::Const(c)) => Box::new(Expr::Mul(
                        Box::new(Expr::Const(*c)),
                        Box::new(expr.clone()),
                    )),
                    _ => Box::new(Expr::Mul(l, r)),
                }
            }

            Expr::Div(left, right) => {
                let l = left.simplify();
                let r = right.simplify();
                match (&*l, &*r) {
                    (Expr::Const(a), Expr::Const(b)) if *b != 0.0 => Box::new(Expr::Const(a / b)),
                    // Identity: x / 1 -> x
                    (expr, Expr::Const(c)) if *c == 1.0 => Box::new(expr.clone()),
                    // Division by a constant is a constant factor
                    (expr, Expr::Const(c)) if *c != 0.0 => {
                        Expr::Mul(Box::new(Expr::Const(1.0 / c)), Box::new(expr.clone())).simplify()
                    }
                    // Division by self: x / x -> 1
                    (a, b) if a == b => Box::new(Expr::Const(1.0)),
                    _ => Box::new(Expr::Div(l, r)),
                }
            }

            Expr::Pow(base, exp) => {
                let b = base.simplify();
                match *exp {
                    0 => Box::new(Expr::Const(1.0)),
                    1 => b,
                    n => {
                        let folded = match (&*b, i32::try_from(n)) {
                            (Expr::Const(a), Ok(k)) => Some(a.powi(k)),
                            _ => None,
                        };
                        match folded {
                            Some(value) => Box::new(Expr::Const(value)),
                            None => Box::new(Expr::Pow(b, n)),
                        }
                    }
                }
            }

            Expr::Neg(expr) => {
                let e = expr.simplify();
                match *e {
                    Expr::Const(a) => Box::new(Expr::Const(-a)),
                    // Double negation: -(-x) -> x
                    Expr::Neg(inner) => inner,
                    Expr::Mul(c, x) if c.as_const().is_some() => {
                        let c = c.as_const().unwrap_or(1.0);
                        Expr::Mul(Box::new(Expr::Const(-c)), x).simplify()
                    }
                    other => Box::new(Expr::Neg(Box::new(other))),
                }
            }
        }
    }

    /// Inserts a replacement expression wherever the predicate matches.
    ///
    /// The tree is rebuilt top-down; a matched node is replaced as a whole and its
    /// children are not visited.
    ///
    /// # Arguments
    /// * `predicate` - Function deciding whether a node is replaced
    /// * `replacement` - Expression to insert at matching nodes
    ///
    /// # Returns
    /// A new expression tree with the replacements applied
    pub fn insert<F>(&self, predicate: F, replacement: &Expr) -> Box<Expr>
    where
        F: Fn(&Expr) -> bool + Copy,
    {
        if predicate(self) {
            return Box::new(replacement.clone());
        }

        match self {
            Expr::Const(_) | Expr::Var(_) => Box::new(self.clone()),
            Expr::Add(left, right) => Box::new(Expr::Add(
                left.insert(predicate, replacement),
                right.insert(predicate, replacement),
            )),
            Expr::Mul(left, right) => Box::new(Expr::Mul(
                left.insert(predicate, replacement),
                right.insert(predicate, replacement),
            )),
            Expr::Sub(left, right) => Box::new(Expr::Sub(
                left.insert(predicate, replacement),
                right.insert(predicate, replacement),
            )),
            Expr::Div(left, right) => Box::new(Expr::Div(
                left.insert(predicate, replacement),
                right.insert(predicate, replacement),
            )),
            Expr::Pow(base, exp) => Box::new(Expr::Pow(base.insert(predicate, replacement), *exp)),
            Expr::Neg(expr) => Box::new(Expr::Neg(expr.insert(predicate, replacement))),
        }
    }

    /// Replaces every occurrence of `variable` by `replacement`.
    pub fn substitute(&self, variable: &str, replacement: &Expr) -> Box<Expr> {
        self.insert(
            |e| matches!(e, Expr::Var(name) if name == variable),
            replacement,
        )
    }

    /// Splits the expression into its additive terms.
    ///
    /// Subtractions and negations are pushed into the terms, so `x - (y + 2)` yields
    /// `[x, -y, -2]`.
    pub fn summands(&self) -> Vec<Expr> {
        match self {
            Expr::Add(left, right) => {
                let mut terms = left.summands();
                terms.extend(right.summands());
                terms
            }
            Expr::Sub(left, right) => {
                let mut terms = left.summands();
                terms.extend(right.summands().into_iter().map(negate));
                terms
            }
            Expr::Neg(expr) => expr.summands().into_iter().map(negate).collect(),
            _ => vec![self.clone()],
        }
    }

    /// Decomposes the expression into `Σ cᵢ·xᵢ + c₀`.
    ///
    /// # Errors
    /// Returns `SubstitutionError::NonLinear` if a product of two variable terms, a division
    /// by a variable term or a power of a variable term other than 0 or 1 occurs.
    pub fn linear_form(&self) -> Result<LinearForm, SubstitutionError> {
        let nonlinear = || SubstitutionError::NonLinear(self.to_string());
        match self {
            Expr::Const(c) => Ok(LinearForm::constant(*c)),
            Expr::Var(name) => Ok(LinearForm::variable(name)),
            Expr::Add(left, right) => Ok(left.linear_form()?.plus(right.linear_form()?)),
            Expr::Sub(left, right) => {
                Ok(left.linear_form()?.plus(right.linear_form()?.scaled(-1.0)))
            }
            Expr::Neg(expr) => Ok(expr.linear_form()?.scaled(-1.0)),
            Expr::Mul(left, right) => {
                let l = left.linear_form()?;
                let r = right.linear_form()?;
                if l.is_constant() {
                    Ok(r.scaled(l.constant))
                } else if r.is_constant() {
                    Ok(l.scaled(r.constant))
                } else {
                    Err(nonlinear())
                }
            }
            Expr::Div(left, right) => {
                let r = right.linear_form()?;
                if r.is_constant() && r.constant != 0.0 {
                    Ok(left.linear_form()?.scaled(1.0 / r.constant))
                } else {
                    Err(nonlinear())
                }
            }
            Expr::Pow(base, exp) => {
                let b = base.linear_form()?;
                match *exp {
                    0 => Ok(LinearForm::constant(1.0)),
                    1 => Ok(b),
                    n if b.is_constant() => i32::try_from(n)
                        .map(|n| LinearForm::constant(b.constant.powi(n)))
                        .map_err(|_| nonlinear()),
                    _ => Err(nonlinear()),
                }
            }
        }
    }

    /// Writes the expression in the binary wire format.
    ///
    /// Every node is a one byte tag followed by its payload: constants as little-endian
    /// `f64`, variables as a little-endian `u64` byte length plus UTF-8 bytes, powers as
    /// the base followed by a little-endian `i64` exponent.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        match self {
            Expr::Const(c) => {
                writer.write_all(&[TAG_CONST])?;
                writer.write_all(&c.to_le_bytes())?;
            }
            Expr::Var(name) => {
                writer.write_all(&[TAG_VAR])?;
                writer.write_all(&(name.len() as u64).to_le_bytes())?;
                writer.write_all(name.as_bytes())?;
            }
            Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) | Expr::Div(l, r) => {
                let tag = match self {
                    Expr::Add(..) => TAG_ADD,
                    Expr::Sub(..) => TAG_SUB,
                    Expr::Mul(..) => TAG_MUL,
                    _ => TAG_DIV,
                };
                writer.write_all(&[tag])?;
                l.serialize(writer)?;
                r.serialize(writer)?;
            }
            Expr::Pow(base, exp) => {
                writer.write_all(&[TAG_POW])?;
                base.serialize(writer)?;
                writer.write_all(&exp.to_le_bytes())?;
            }
            Expr::Neg(expr) => {
                writer.write_all(&[TAG_NEG])?;
                expr.serialize(writer)?;
            }
        }
        Ok(())
    }

    /// Reads an expression written by [`Expr::serialize`].
    ///
    /// # Errors
    /// Truncated input surfaces as `SerializeError::Io` with `UnexpectedEof`; unknown tags,
    /// invalid names and nesting deeper than the reader accepts are reported as well.
    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Expr, SerializeError> {
        Self::deserialize_at(reader, 0)
    }

    fn deserialize_at<R: Read>(reader: &mut R, depth: usize) -> Result<Expr, SerializeError> {
        if depth > MAX_DEPTH {
            return Err(SerializeError::TooDeep(MAX_DEPTH));
        }
        let tag = read_array::<R, 1>(reader)?[0];
        let child = |reader: &mut R| Self::deserialize_at(reader, depth + 1).map(Box::new);
        Ok(match tag {
            TAG_CONST => Expr::Const(f64::from_le_bytes(read_array(reader)?)),
            TAG_VAR => {
                let len = u64::from_le_bytes(read_array(reader)?);
                let mut bytes = Vec::new();
                reader.take(len).read_to_end(&mut bytes)?;
                if bytes.len() as u64 != len {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                Expr::Var(String::from_utf8(bytes)?)
            }
            TAG_ADD => Expr::Add(child(reader)?, child(reader)?),
            TAG_SUB => Expr::Sub(child(reader)?, child(reader)?),
            TAG_MUL => Expr::Mul(child(reader)?, child(reader)?),
            TAG_DIV => Expr::Div(child(reader)?, child(reader)?),
            TAG_POW => {
                let base = child(reader)?;
                Expr::Pow(base, i64::from_le_bytes(read_array(reader)?))
            }
            TAG_NEG => Expr::Neg(child(reader)?),
            other => return Err(SerializeError::UnknownTag(other)),
        })
    }
}

fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Const(c) => Expr::Const(-c),
        Expr::Neg(inner) => *inner,
        other => Expr::Neg(Box::new(other)),
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N], SerializeError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

impl ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::Mul(Box::new(self), Box::new(rhs))
    }
}

impl ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

/// Implements string formatting for expressions.
///
/// This implementation converts expressions to their standard mathematical notation:
/// - Constants are formatted as numbers
/// - Variables are formatted as their names
/// - Binary operations (+,-,*,/) are wrapped in parentheses
/// - Exponents use ^
/// - Negation uses - prefix
///
/// The output is valid evalexpr syntax and parses back into an equal tree.
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(val) => write!(f, "{val}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Add(left, right) => write!(f, "({left} + {right})"),
            Expr::Mul(left, right) => write!(f, "({left} * {right})"),
            Expr::Sub(left, right) => write!(f, "({left} - {right})"),
            Expr::Div(left, right) => write!(f, "({left} / {right})"),
            Expr::Pow(base, exp) => write!(f, "({base}^{exp})"),
            Expr::Neg(expr) => write!(f, "-({expr})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::var(name))
    }

    fn c(value: f64) -> Box<Expr> {
        Box::new(Expr::Const(value))
    }

    #[test]
    fn test_simplify() {
        // 2 + 3 → 5
        assert_eq!(*Expr::Add(c(2.0), c(3.0)).simplify(), Expr::Const(5.0));
        // x + 0 → x
        assert_eq!(*Expr::Add(var("x"), c(0.0)).simplify(), *var("x"));
        // x * 1 → x
        assert_eq!(*Expr::Mul(var("x"), c(1.0)).simplify(), *var("x"));
        // x * 0 → 0
        assert_eq!(*Expr::Mul(var("x"), c(0.0)).simplify(), Expr::Const(0.0));
        // x / 1 → x
        assert_eq!(*Expr::Div(var("x"), c(1.0)).simplify(), *var("x"));
        // x / x → 1
        assert_eq!(*Expr::Div(var("x"), var("x")).simplify(), Expr::Const(1.0));
        // x^0 → 1, x^1 → x
        assert_eq!(*Expr::Pow(var("x"), 0).simplify(), Expr::Const(1.0));
        assert_eq!(*Expr::Pow(var("x"), 1).simplify(), *var("x"));
        // -(-x) → x
        assert_eq!(
            *Expr::Neg(Box::new(Expr::Neg(var("x")))).simplify(),
            *var("x")
        );
    }

    #[test]
    fn test_like_terms() {
        // 2*x + x*3 → 5*x
        let expr = Expr::Add(
            Box::new(Expr::Mul(c(2.0), var("x"))),
            Box::new(Expr::Mul(var("x"), c(3.0))),
        );
        assert_eq!(*expr.simplify(), Expr::Mul(c(5.0), var("x")));

        // 2*x - 2*x → 0
        let expr = Expr::Sub(
            Box::new(Expr::Mul(c(2.0), var("x"))),
            Box::new(Expr::Mul(c(2.0), var("x"))),
        );
        assert_eq!(*expr.simplify(), Expr::Const(0.0));
    }

    #[test]
    fn test_substitute() {
        // x + y with x → 2*z
        let expr = Expr::Add(var("x"), var("y"));
        let replacement = Expr::Mul(c(2.0), var("z"));
        assert_eq!(
            *expr.substitute("x", &replacement),
            Expr::Add(Box::new(replacement.clone()), var("y"))
        );

        // untouched when the variable does not occur
        assert_eq!(*expr.substitute("w", &replacement), expr);
    }

    #[test]
    fn test_summands() {
        // x - (y + 2)
        let expr = Expr::Sub(var("x"), Box::new(Expr::Add(var("y"), c(2.0))));
        assert_eq!(
            expr.summands(),
            vec![Expr::var("x"), Expr::Neg(var("y")), Expr::Const(-2.0)]
        );
    }

    #[test]
    fn test_linear_form() {
        // 2*x - 3*(y - x)/3 + 4 = 3x - y + 4
        let expr = Expr::var("x") * Expr::Const(2.0)
            - Expr::Div(
                Box::new(Expr::Const(3.0) * (Expr::var("y") - Expr::var("x"))),
                c(3.0),
            )
            + Expr::Const(4.0);
        let form = expr.linear_form().unwrap();
        assert_eq!(form.coefficient("x"), 3.0);
        assert_eq!(form.coefficient("y"), -1.0);
        assert_eq!(form.constant, 4.0);
        assert_eq!(form.terms[0].0, "x");
    }

    #[test]
    fn test_linear_form_cancels_terms() {
        let expr = Expr::var("x") - Expr::var("x") + Expr::var("y");
        let form = expr.linear_form().unwrap();
        assert_eq!(form.terms, vec![("y".to_string(), 1.0)]);

        // Rounding noise cancels relative to the operands
        let expr = Expr::Mul(c(0.1), var("x")) + Expr::Mul(c(0.2), var("x"))
            - Expr::Mul(c(0.3), var("x"));
        assert!(expr.linear_form().unwrap().is_zero());
    }

    #[test]
    fn test_linear_form_keeps_small_coefficients() {
        let expr = Expr::Mul(c(1e-12), var("x")) + Expr::Const(3e-13);
        let form = expr.linear_form().unwrap();
        assert_eq!(form.coefficient("x"), 1e-12);
        assert_eq!(form.constant, 3e-13);
        assert!(!expr.is_zero());
    }

    #[test]
    fn test_linear_form_rejects_products() {
        let expr = Expr::var("x") * Expr::var("y");
        assert!(matches!(
            expr.linear_form(),
            Err(SubstitutionError::NonLinear(_))
        ));
        let expr = Expr::Pow(var("x"), 2);
        assert!(expr.linear_form().is_err());
        let expr = Expr::Div(c(1.0), var("x"));
        assert!(expr.linear_form().is_err());
    }

    #[test]
    fn test_exponents_outside_i32() {
        let huge = i64::from(i32::MAX) + 1;
        let expr = Expr::Pow(c(2.0), huge);
        assert_eq!(*expr.simplify(), Expr::Pow(c(2.0), huge));
        assert!(matches!(
            expr.linear_form(),
            Err(SubstitutionError::NonLinear(_))
        ));

        // In range exponents of constants still fold
        assert_eq!(*Expr::Pow(c(2.0), 3).simplify(), Expr::Const(8.0));
        assert_eq!(Expr::Pow(c(2.0), -1).linear_form().unwrap().constant, 0.5);
    }

    #[test]
    fn test_linear_form_to_expr() {
        let form = LinearForm {
            terms: vec![("x".to_string(), 1.0), ("y".to_string(), -2.0)],
            constant: 3.0,
        };
        let expr = form.to_expr();
        assert_eq!(expr.to_string(), "((x - (2 * y)) + 3)");
        assert_eq!(expr.linear_form().unwrap(), form);

        assert_eq!(LinearForm::default().to_expr(), Expr::Const(0.0));
        assert_eq!(LinearForm::constant(-4.0).to_expr(), Expr::Const(-4.0));
    }

    #[test]
    fn test_binary_format() {
        let expr = Expr::Sub(
            Box::new(Expr::Pow(var("e1"), 3)),
            Box::new(Expr::Neg(Box::new(Expr::Div(var("e2"), c(0.5))))),
        );
        let mut bytes = Vec::new();
        expr.serialize(&mut bytes).unwrap();
        assert_eq!(Expr::deserialize(&mut bytes.as_slice()).unwrap(), expr);

        // Every strict prefix is rejected
        for len in 0..bytes.len() {
            assert!(Expr::deserialize(&mut &bytes[..len]).is_err());
        }
    }

    #[test]
    fn test_binary_format_unknown_tag() {
        let bytes = [0xffu8];
        assert!(matches!(
            Expr::deserialize(&mut bytes.as_slice()),
            Err(SerializeError::UnknownTag(0xff))
        ));
    }

    #[test]
    fn test_display() {
        let expr = Expr::Add(
            Box::new(Expr::Mul(c(2.0), var("x"))),
            Box::new(Expr::Neg(var("y"))),
        );
        assert_eq!(expr.to_string(), "((2 * x) + -(y))");
    }

    #[test]
    fn test_variables() {
        let expr = Expr::var("b") + Expr::var("a") * Expr::var("b");
        assert_eq!(expr.variables(), vec!["b".to_string(), "a".to_string()]);
    }
}
