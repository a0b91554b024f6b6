//! Dependency-driven concurrent solving of symbolic tensor coefficient equations.
//!
//! Coefficients are symbolic tensors identified by a block shape and an id. Equations relate
//! coefficients through tags of the form `#<id:left:left_deriv:right:right_deriv:{indices}>`.
//! Every equation waits until the coefficients it references have been calculated, solves the
//! resulting homogeneous linear system on a worker pool and substitutes the solution back into
//! every calculated coefficient.
//!
//! Expressions are parsed with [evalexpr](https://github.com/ISibboI/evalexpr); linear systems
//! are reduced with [nalgebra](https://nalgebra.org) and equations are solved on a
//! [rayon](https://github.com/rayon-rs/rayon) thread pool.
//!
//! # Features
//!
//! - Registry of shared coefficients with canonical shapes
//! - Equations that solve themselves once their dependencies are known
//! - Merging of substitutions into a single reduced substitution
//! - Pluggable interpreter for the rewritten equations
//!
//! # Example
//!
//! ```rust
//! use peach::prelude::*;
//!
//! let session = Session::new(SolverConfig::default()).unwrap();
//!
//! // v and w must agree
//! let eq = session.equation("#<v:1:0:0:0:{a}> - #<w:1:0:0:0:{a}>").unwrap();
//!
//! let v = session.registry().get(Shape::new(1, 0, 0, 0), "v");
//! let w = session.registry().get(Shape::new(1, 0, 0, 0), "w");
//! v.complete(Tensor::term(Expr::var("e1"), "x{a}".parse().unwrap())).unwrap();
//! w.complete(Tensor::term(Expr::var("e2"), "x{a}".parse().unwrap())).unwrap();
//!
//! eq.wait().unwrap();
//! assert_eq!(v.tensor().to_string(), "e2 * x{a}");
//! assert_eq!(w.tensor().to_string(), "e2 * x{a}");
//! ```

pub use coefficient::{Coefficient, Registry, Shape};
pub use config::SolverConfig;
pub use equation::{Equation, EquationState};
pub use expr::Expr;
pub use session::Session;
pub use substitution::Substitution;

pub mod prelude {
    pub use crate::coefficient::{Coefficient, Registry, Shape};
    pub use crate::config::SolverConfig;
    pub use crate::equation::{Equation, EquationState};
    pub use crate::expr::Expr;
    pub use crate::interpreter::{Interpreter, TensorInterpreter, Value};
    pub use crate::session::Session;
    pub use crate::substitution::Substitution;
    pub use crate::tensor::{Basis, Factor, Tensor};
}

/// Coefficients, their shapes and the registry sharing them
pub mod coefficient;
/// Solver configuration
pub mod config;
/// Conversion from parsed expressions to symbolic expressions
pub mod convert;
/// Equations between coefficients
pub mod equation;
/// Error types for the various failure modes
pub mod errors;
/// Symbolic scalar expressions
pub mod expr;
/// Evaluation of rewritten equations
pub mod interpreter;
/// Row reduction of dense matrices
pub mod linalg;
/// Solving sessions
pub mod session;
/// Substitutions and their merge
pub mod substitution;
/// Tensors with symbolic coefficients
pub mod tensor;
/// Shared type aliases
pub mod types;
