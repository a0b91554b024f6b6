//! Symbolic tensors as linear combinations of index-carrying basis products.
//!
//! A [`Tensor`] is an ordered sum of [`Term`]s, each a scalar [`Expr`] times a [`Basis`].
//! A basis is a commutative product of [`Factor`]s such as `gamma{a b}` or
//! `epsilon{a b c d}`; factors are kept sorted so that equal products compare equal.
//! A scalar is a tensor whose terms all use the empty basis.
//!
//! Only structural equality of bases is used. Symmetries of the individual factors
//! (e.g. `gamma{a b} = gamma{b a}`) are not applied.

use std::collections::HashMap;
use std::fmt;
use std::ops;
use std::str::FromStr;

use itertools::Itertools;

use crate::errors::{InterpretError, ParseError};
use crate::expr::Expr;

/// Returns the canonical index labels for a tensor of rank `rank`.
///
/// Labels run `a … z`, then `a1 … z1`, `a2 …` and so on. Coefficient tensors are written
/// in these labels so that an equation can rename them positionally.
///
/// # Example
/// ```
/// use peach::tensor::canonical_indices;
///
/// assert_eq!(canonical_indices(3), vec!["a", "b", "c"]);
/// assert_eq!(canonical_indices(28)[26..], ["a1", "b1"]);
/// ```
pub fn canonical_indices(rank: usize) -> Vec<String> {
    (0..rank)
        .map(|i| {
            let letter = char::from(b'a' + (i % 26) as u8);
            match i / 26 {
                0 => letter.to_string(),
                round => format!("{letter}{round}"),
            }
        })
        .collect()
}

/// Splits an index list such as `"{a b c}"` or `"a b c"` into its labels.
pub fn split_indices(list: &str) -> Vec<String> {
    list.split(|c: char| c.is_whitespace() || c == '{' || c == '}' || c == ',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A named tensor factor with its index labels, e.g. `gamma{a b}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Factor {
    pub name: String,
    pub indices: Vec<String>,
}

impl Factor {
    pub fn new<I, S>(name: &str, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            indices: indices.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.name, self.indices.join(" "))
    }
}

/// A commutative product of factors. The empty product is the scalar basis.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Basis {
    factors: Vec<Factor>,
}

impl Basis {
    /// The empty product.
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn new(mut factors: Vec<Factor>) -> Self {
        factors.sort();
        Self { factors }
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    pub fn is_scalar(&self) -> bool {
        self.factors.is_empty()
    }

    /// Number of free index slots across all factors.
    pub fn rank(&self) -> usize {
        self.factors.iter().map(|f| f.indices.len()).sum()
    }

    pub fn product(&self, other: &Basis) -> Basis {
        Basis::new(
            self.factors
                .iter()
                .chain(other.factors.iter())
                .cloned()
                .collect(),
        )
    }

    fn rename(&self, map: &HashMap<&str, &str>) -> Basis {
        Basis::new(
            self.factors
                .iter()
                .map(|factor| Factor {
                    name: factor.name.clone(),
                    indices: factor
                        .indices
                        .iter()
                        .map(|index| {
                            map.get(index.as_str())
                                .map_or_else(|| index.clone(), |to| to.to_string())
                        })
                        .collect(),
                })
                .collect(),
        )
    }
}

/// Parses a whitespace separated product such as `gamma{a b} epsilon{c d e f}`.
///
/// The empty string parses to the scalar basis.
impl FromStr for Basis {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut factors = Vec::new();
        let mut rest = s.trim();
        while !rest.is_empty() {
            let invalid = || ParseError::InvalidBasis(rest.to_string());
            let open = rest.find('{').ok_or_else(invalid)?;
            let close = rest.find('}').ok_or_else(invalid)?;
            let name = rest[..open].trim();
            if close < open
                || name.is_empty()
                || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(invalid());
            }
            factors.push(Factor::new(name, split_indices(&rest[open + 1..close])));
            rest = rest[close + 1..].trim_start();
        }
        Ok(Basis::new(factors))
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.factors.is_empty() {
            return write!(f, "1");
        }
        write!(f, "{}", self.factors.iter().join(" "))
    }
}

/// One `scalar * basis` summand.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub scalar: Expr,
    pub basis: Basis,
}

/// A linear combination of basis products with symbolic scalar coefficients.
///
/// Tensors built through the public constructors and operators are always collected:
/// every basis occurs at most once and no term has a zero scalar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tensor {
    terms: Vec<Term>,
}

impl Tensor {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Wraps a scalar expression.
    pub fn scalar(value: Expr) -> Self {
        Self::from_terms([(value, Basis::scalar())])
    }

    /// A single `scalar * basis` term.
    pub fn term(scalar: Expr, basis: Basis) -> Self {
        Self::from_terms([(scalar, basis)])
    }

    /// Builds a tensor from `(scalar, basis)` pairs, collecting like bases.
    ///
    /// # Example
    /// ```
    /// use peach::expr::Expr;
    /// use peach::tensor::Tensor;
    ///
    /// let t = Tensor::from_terms([
    ///     (Expr::var("e1"), "gamma{a b}".parse().unwrap()),
    ///     (Expr::var("e2"), "gamma{a b}".parse().unwrap()),
    /// ]);
    /// assert_eq!(t.terms().len(), 1);
    /// assert_eq!(t.to_string(), "(e1 + e2) * gamma{a b}");
    /// ```
    pub fn from_terms<I>(terms: I) -> Self
    where
        I: IntoIterator<Item = (Expr, Basis)>,
    {
        Tensor {
            terms: terms
                .into_iter()
                .map(|(scalar, basis)| Term { scalar, basis })
                .collect(),
        }
        .collect()
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Returns the scalar value if the tensor has no basis factors.
    pub fn as_scalar(&self) -> Option<Expr> {
        match self.terms.as_slice() {
            [] => Some(Expr::Const(0.0)),
            [term] if term.basis.is_scalar() => Some(term.scalar.clone()),
            _ => None,
        }
    }

    /// Multiplies every term by a scalar.
    pub fn scale(&self, factor: &Expr) -> Tensor {
        self.map_scalars(|s| Expr::Mul(Box::new(factor.clone()), Box::new(s.clone())))
    }

    /// Tensor product: every pair of terms multiplies scalars and joins bases.
    pub fn product(&self, other: &Tensor) -> Tensor {
        Tensor {
            terms: self
                .terms
                .iter()
                .cartesian_product(other.terms.iter())
                .map(|(l, r)| Term {
                    scalar: Expr::Mul(Box::new(l.scalar.clone()), Box::new(r.scalar.clone())),
                    basis: l.basis.product(&r.basis),
                })
                .collect(),
        }
        .collect()
    }

    /// Relabels indices positionally: every occurrence of `from[i]` becomes `to[i]`.
    ///
    /// All labels are replaced simultaneously, so `a b → b a` swaps them. Labels not in
    /// `from` are left untouched.
    ///
    /// # Errors
    /// `InterpretError::IndexMismatch` if the two lists differ in length.
    pub fn rename_indices<S: AsRef<str>>(
        &self,
        from: &[S],
        to: &[S],
    ) -> Result<Tensor, InterpretError> {
        if from.len() != to.len() {
            return Err(InterpretError::IndexMismatch {
                expected: from.len(),
                got: to.len(),
            });
        }
        let map: HashMap<&str, &str> = from
            .iter()
            .map(AsRef::as_ref)
            .zip(to.iter().map(AsRef::as_ref))
            .collect();
        Ok(Tensor {
            terms: self
                .terms
                .iter()
                .map(|term| Term {
                    scalar: term.scalar.clone(),
                    basis: term.basis.rename(&map),
                })
                .collect(),
        }
        .collect())
    }

    /// Replaces a free parameter in every scalar.
    pub fn substitute(&self, variable: &str, replacement: &Expr) -> Tensor {
        self.map_scalars(|s| *s.substitute(variable, replacement))
    }

    /// Applies `f` to every scalar and collects the result.
    pub fn map_scalars<F>(&self, f: F) -> Tensor
    where
        F: Fn(&Expr) -> Expr,
    {
        Tensor {
            terms: self
                .terms
                .iter()
                .map(|term| Term {
                    scalar: f(&term.scalar),
                    basis: term.basis.clone(),
                })
                .collect(),
        }
        .collect()
    }

    /// Combines terms with equal bases and drops zero terms.
    ///
    /// Bases keep the order of their first occurrence. Scalars that are linear in their
    /// parameters are rewritten in normal form, others are simplified.
    pub fn collect(self) -> Tensor {
        let mut collected: Vec<Term> = Vec::with_capacity(self.terms.len());
        for term in self.terms {
            match collected.iter_mut().find(|t| t.basis == term.basis) {
                Some(existing) => {
                    let sum = Expr::Add(
                        Box::new(std::mem::replace(&mut existing.scalar, Expr::Const(0.0))),
                        Box::new(term.scalar),
                    );
                    existing.scalar = sum;
                }
                None => collected.push(term),
            }
        }
        let terms = collected
            .into_iter()
            .map(|term| Term {
                scalar: term.scalar.normalize(),
                basis: term.basis,
            })
            .filter(|term| !term.scalar.is_zero())
            .collect();
        Tensor { terms }
    }

    /// Returns one scalar per distinct basis; the tensor vanishes iff all of them do.
    pub fn homogeneous_equations(&self) -> Vec<Expr> {
        self.terms.iter().map(|t| t.scalar.clone()).collect()
    }
}

impl From<Expr> for Tensor {
    fn from(value: Expr) -> Self {
        Tensor::scalar(value)
    }
}

impl ops::Add for Tensor {
    type Output = Tensor;

    fn add(mut self, rhs: Tensor) -> Tensor {
        self.terms.extend(rhs.terms);
        self.collect()
    }
}

impl ops::Neg for Tensor {
    type Output = Tensor;

    fn neg(self) -> Tensor {
        self.map_scalars(|s| Expr::Neg(Box::new(s.clone())))
    }
}

impl ops::Sub for Tensor {
    type Output = Tensor;

    fn sub(self, rhs: Tensor) -> Tensor {
        self + (-rhs)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        let rendered = self.terms.iter().map(|term| {
            if term.basis.is_scalar() {
                term.scalar.to_string()
            } else {
                format!("{} * {}", term.scalar, term.basis)
            }
        });
        write!(f, "{}", rendered.format(" + "))
    }
}
