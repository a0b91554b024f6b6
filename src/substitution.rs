//! Substitutions: ordered `variable = expression` replacements.
//!
//! A [`Substitution`] is applied sequentially, pair by pair, so later pairs see the output
//! of earlier ones. Several substitutions are combined with [`Substitution::merge`], which
//! turns every pair into a linear relation, row-reduces the resulting system and reads
//! one isolated variable per independent relation back out.
//!
//! # Example
//!
//! ```
//! use peach::expr::Expr;
//! use peach::substitution::Substitution;
//!
//! // x = 3 - y and y = x - 1
//! let a = Substitution::from((Expr::var("x"), "3 - y".parse::<Expr>().unwrap()));
//! let b = Substitution::from((Expr::var("y"), "x - 1".parse::<Expr>().unwrap()));
//!
//! let merged = Substitution::merge(&[a, b]).unwrap();
//! assert_eq!(merged.len(), 2);
//! assert_eq!(merged.apply(&Expr::var("x")), Expr::Const(2.0));
//! assert_eq!(merged.apply(&Expr::var("y")), Expr::Const(1.0));
//! ```

use std::fmt;
use std::io::{Read, Write};

use itertools::Itertools;
use nalgebra::DMatrix;
use tracing::trace;

use crate::errors::{SerializeError, SubstitutionError};
use crate::expr::{Expr, LinearForm};
use crate::linalg::to_row_echelon_form;
use crate::tensor::Tensor;

/// Upper bound on pairs reserved up front when reading untrusted input.
const PREALLOCATE_LIMIT: usize = 1024;

/// An ordered list of `(variable, expression)` replacement pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    pairs: Vec<(Expr, Expr)>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pair. It is applied after all pairs inserted before it.
    pub fn insert(&mut self, variable: Expr, value: Expr) {
        self.pairs.push((variable, value));
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Expr, Expr)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Applies every pair in order and normalizes the result.
    ///
    /// Pair `i` replaces occurrences of its left hand side in the output of pairs
    /// `0..i`, so `x → y` followed by `y → 5` maps `x` to `5`, while the reverse order
    /// maps `x` to `y`.
    pub fn apply(&self, expr: &Expr) -> Expr {
        self.pairs
            .iter()
            .fold(expr.clone(), |acc, (lhs, rhs)| {
                *acc.insert(|node| node == lhs, rhs)
            })
            .normalize()
    }

    /// Applies the substitution to every scalar of a tensor and recollects it.
    pub fn apply_tensor(&self, tensor: &Tensor) -> Tensor {
        tensor.map_scalars(|scalar| self.apply(scalar))
    }

    /// Merges several substitutions into one consistent substitution.
    ///
    /// Every pair `lhs = rhs` becomes the relation `lhs - rhs = 0`. The relations are
    /// row-reduced together and every independent row yields one pair isolating its
    /// leading variable. A single input is returned unchanged.
    ///
    /// # Errors
    /// * `SubstitutionError::NonLinear` if a relation is not linear in its variables
    /// * `SubstitutionError::Inconsistent` if the relations contradict each other
    pub fn merge(substitutions: &[Substitution]) -> Result<Substitution, SubstitutionError> {
        if let [single] = substitutions {
            return Ok(single.clone());
        }
        let relations = substitutions
            .iter()
            .flat_map(|s| s.pairs.iter())
            .map(|(lhs, rhs)| {
                rhs.summands()
                    .into_iter()
                    .fold(lhs.clone(), |eq, term| Expr::Sub(Box::new(eq), Box::new(term)))
            });
        reduce(relations)
    }

    /// Solves `expr = 0` for every expression in `equations` simultaneously.
    ///
    /// This is the reduction behind [`Substitution::merge`], applied to relations that are
    /// already in homogeneous form.
    pub fn solve_homogeneous(equations: &[Expr]) -> Result<Substitution, SubstitutionError> {
        reduce(equations.iter().cloned())
    }

    /// Writes the substitution in the binary wire format: a little-endian `u64` pair count
    /// followed by each pair's left and right hand side.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), SerializeError> {
        writer.write_all(&(self.pairs.len() as u64).to_le_bytes())?;
        for (lhs, rhs) in &self.pairs {
            lhs.serialize(writer)?;
            rhs.serialize(writer)?;
        }
        Ok(())
    }

    /// Reads a substitution written by [`Substitution::serialize`].
    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Substitution, SerializeError> {
        let mut count = [0u8; 8];
        reader.read_exact(&mut count)?;
        let count = u64::from_le_bytes(count);

        let mut pairs = Vec::with_capacity((count as usize).min(PREALLOCATE_LIMIT));
        for _ in 0..count {
            let lhs = Expr::deserialize(reader)?;
            let rhs = Expr::deserialize(reader)?;
            pairs.push((lhs, rhs));
        }
        Ok(Substitution { pairs })
    }
}

/// Row-reduces the linear relations `relation = 0` into isolated-variable pairs.
fn reduce<I>(relations: I) -> Result<Substitution, SubstitutionError>
where
    I: IntoIterator<Item = Expr>,
{
    let mut variables: Vec<String> = Vec::new();
    let mut rows: Vec<LinearForm> = Vec::new();
    let mut pivot = 0;

    for relation in relations {
        let form = relation.linear_form()?;
        let mut names = form.terms.iter().map(|(name, _)| name);
        // The leading variable of each relation is placed right after the previous one
        if let Some(first) = names.next() {
            if let Some(at) = variables.iter().position(|v| v == first) {
                variables.remove(at);
            }
            variables.insert(pivot.min(variables.len()), first.clone());
            pivot += 1;
        }
        for name in names {
            if !variables.contains(name) {
                variables.push(name.clone());
            }
        }
        rows.push(form);
    }

    let n = variables.len();
    let mut matrix = DMatrix::from_fn(rows.len(), n + 1, |r, c| match variables.get(c) {
        Some(variable) => rows[r].coefficient(variable),
        None => rows[r].constant,
    });
    to_row_echelon_form(&mut matrix, n);
    trace!(rows = rows.len(), variables = n, "reduced linear system");

    let mut result = Substitution::new();
    for row in 0..matrix.nrows() {
        let Some(lead) = (0..n).find(|&c| matrix[(row, c)] != 0.0) else {
            // Rows without a pivot sit below all pivot rows
            let constant = matrix[(row, n)];
            if constant != 0.0 {
                return Err(SubstitutionError::Inconsistent { row, constant });
            }
            continue;
        };
        let value = matrix[(row, lead)];
        if value != 1.0 {
            return Err(SubstitutionError::MalformedRow { row, value });
        }

        let rhs = LinearForm {
            terms: (lead + 1..n)
                .filter(|&c| matrix[(row, c)] != 0.0)
                .map(|c| (variables[c].clone(), -matrix[(row, c)]))
                .collect(),
            constant: -matrix[(row, n)],
        };
        result.insert(Expr::Var(variables[lead].clone()), rhs.to_expr());
    }
    Ok(result)
}

impl From<(Expr, Expr)> for Substitution {
    fn from(pair: (Expr, Expr)) -> Self {
        Substitution { pairs: vec![pair] }
    }
}

impl FromIterator<(Expr, Expr)> for Substitution {
    fn from_iter<T: IntoIterator<Item = (Expr, Expr)>>(iter: T) -> Self {
        Substitution {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Substitution {
    type Item = &'a (Expr, Expr);
    type IntoIter = std::slice::Iter<'a, (Expr, Expr)>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.pairs
                .iter()
                .format_with("\n", |(lhs, rhs), f| f(&format_args!("{lhs} = {rhs}")))
        )
    }
}
