//! Error types for the peach crate.
//!
//! This module defines the various error types that can occur while parsing equations,
//! converting scalar expressions, merging substitutions, interpreting rewritten equations
//! and solving them. The main error types are:
//!
//! - `ParseError`: Malformed coefficient tags in an equation string
//! - `ConvertError`: Errors during conversion from evalexpr AST to scalar expressions
//! - `SubstitutionError`: Inconsistent or non-linear systems during row reduction
//! - `InterpretError`: Failures while evaluating a rewritten equation
//! - `EquationError`: High-level errors when constructing or waiting on equations
//!
//! Each error type implements the standard Error trait and provides detailed error messages.

use std::num::ParseIntError;
use std::sync::Arc;

use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors raised while scanning an equation string for coefficient tags.
///
/// Positions are byte offsets into the original equation string and point at the `#`
/// that opened the offending tag.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// A `#<` was opened but the input ended before the closing `>`
    #[error("unterminated coefficient tag starting at {position}")]
    UnterminatedTag { position: usize },
    /// The tag was closed before all of its fields were given
    #[error("coefficient tag at {position} is missing the {field} field")]
    MissingField {
        position: usize,
        field: &'static str,
    },
    /// One of the four block sizes is not a non-negative integer
    #[error("invalid {field} '{value}' in coefficient tag at {position}")]
    InvalidShapeField {
        position: usize,
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    /// The block sizes add up to more indices than a coefficient may carry
    #[error("coefficient tag at {position} exceeds the maximum rank of {limit}")]
    RankTooLarge { position: usize, limit: usize },
    /// The coefficient id is empty or contains characters outside `[A-Za-z0-9_]`
    #[error("invalid coefficient id '{id}' in tag at {position}")]
    InvalidId { position: usize, id: String },
    /// A basis product that is not a sequence of `name{i j …}` factors
    #[error("invalid basis factor '{0}'")]
    InvalidBasis(String),
}

/// Errors that can occur during conversion from evalexpr AST to our scalar expressions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    /// Error when trying to convert an exponent that is not a valid integer constant
    #[error("Could not convert exponent in Exp operator: {0}")]
    ExpOperator(String),
    /// Error when encountering an operator that is not supported by our implementation
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when encountering a function that is not supported by our implementation
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Error when the root node does not have exactly one child
    #[error("Expected single child for root node: {0}")]
    RootNode(String),
    /// Error when a constant value is not numeric
    #[error("Expected numeric constant: {0}")]
    ConstOperator(String),
}

/// Errors raised while row-reducing linear systems into substitutions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubstitutionError {
    /// A reduced row has no variable left but a nonzero constant, e.g. `x = 1` and `x = 2`
    #[error("The substitution is invalid: row {row} reduces to {constant} = 0")]
    Inconsistent { row: usize, constant: f64 },
    /// A relation is not linear in its variables or has a non-numeric remainder
    #[error("The substitution is invalid: '{0}' is not linear")]
    NonLinear(String),
    /// The first nonzero entry of a reduced row is not 1
    #[error("row {row} is not normalized: leading entry {value}")]
    MalformedRow { row: usize, value: f64 },
}

/// Errors raised while reading or writing the binary substitution format.
#[derive(Error, Debug)]
pub enum SerializeError {
    /// Underlying I/O failure, including truncated input
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A node tag that does not belong to the expression wire format
    #[error("unknown expression tag {0:#04x}")]
    UnknownTag(u8),
    /// A variable name that is not valid UTF-8
    #[error("variable name is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    /// Expressions nested deeper than the reader accepts
    #[error("expression nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Errors raised by an [`Interpreter`](crate::interpreter::Interpreter) while evaluating
/// a rewritten equation.
#[derive(Error, Debug)]
pub enum InterpretError {
    /// Error when parsing the expression string with evalexpr
    #[error("Failed to build Evalexpr AST")]
    BuildEvalexprError(#[from] EvalexprError<DefaultNumericTypes>),
    /// Error when converting a scalar subtree
    #[error("Failed to convert scalar expression")]
    Convert(#[from] ConvertError),
    /// Error when the homogeneous system could not be reduced
    #[error("Failed to solve homogeneous system")]
    Substitution(#[from] SubstitutionError),
    /// Error when calling a function the interpreter does not know
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),
    /// Error when encountering an operator the interpreter does not know
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// Error when a function receives the wrong number of arguments
    #[error("{function} expects {expected} arguments, got {got}")]
    ArgumentCount {
        function: &'static str,
        expected: usize,
        got: usize,
    },
    /// Error when an operand has the wrong kind of value
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Error when renaming indices with label lists of different length
    #[error("index mismatch: expected {expected} labels, got {got}")]
    IndexMismatch { expected: usize, got: usize },
    /// Error when the evaluated equation does not yield a substitution
    #[error("expression did not evaluate to a substitution but to {0}")]
    NotASubstitution(String),
}

/// Errors raised by coefficients.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoefficientError {
    /// `complete` was called on a coefficient that already finished
    #[error("coefficient {0} is already finished")]
    AlreadyFinished(String),
}

/// Errors raised while setting up a solving session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The worker pool could not be created
    #[error("Failed to build worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// High-level errors that can occur when working with equations.
///
/// A failed solve is shared between every thread waiting on the equation, so the
/// underlying interpreter error is reference counted.
#[derive(Debug, Error, Clone)]
pub enum EquationError {
    /// Error when the equation string contains malformed coefficient tags
    #[error("Failed to parse equation")]
    Parse(#[from] ParseError),
    /// Error when the solve of the equation failed
    #[error("Failed to solve equation")]
    SolveFailed(#[source] Arc<InterpretError>),
}
