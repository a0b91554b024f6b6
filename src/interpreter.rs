//! Evaluation of rewritten equations.
//!
//! An equation is reduced to a string such as
//!
//! ```text
//! homogeneous_system(rename_indices(coefficient_2_0_0_0_v, "a b", "{b a}") - ...)
//! ```
//!
//! which is handed to an [`Interpreter`] together with the tensors of the coefficients it
//! references. The interpreter is expected to produce a [`Substitution`]. Solving is generic
//! over the interpreter; [`TensorInterpreter`] is the default implementation and evaluates
//! evalexpr syntax over symbolic tensors.
//!
//! # Supported syntax
//!
//! - Numbers and unbound identifiers evaluate to scalars, bound identifiers to tensors
//! - `+`, `-`, `*`, `/` and unary `-`; `^` with an integer exponent on scalars
//! - String literals, used as index lists
//! - `rename_indices(tensor, "from", "to")` relabels indices positionally
//! - `homogeneous_system(args...)` requires every argument to vanish and solves for the
//!   free parameters

use std::collections::HashMap;
use std::fmt;

use evalexpr::{build_operator_tree, DefaultNumericTypes, Node, Operator};
use tracing::trace;

use crate::convert::integer_constant;
use crate::errors::InterpretError;
use crate::expr::Expr;
use crate::substitution::Substitution;
use crate::tensor::{split_indices, Tensor};

/// Evaluates rewritten equation code.
///
/// `bindings` maps coefficient names to their current tensor values. Implementations must be
/// thread-safe since equations are solved concurrently.
pub trait Interpreter: Send + Sync {
    fn evaluate(
        &self,
        code: &str,
        bindings: &HashMap<String, Tensor>,
    ) -> Result<Value, InterpretError>;
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Expr),
    Tensor(Tensor),
    Substitution(Substitution),
    Text(String),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Tensor(_) => "tensor",
            Value::Substitution(_) => "substitution",
            Value::Text(_) => "text",
        }
    }

    pub fn into_substitution(self) -> Result<Substitution, InterpretError> {
        match self {
            Value::Substitution(s) => Ok(s),
            other => Err(InterpretError::NotASubstitution(other.kind().to_string())),
        }
    }

    /// Converts scalars and tensors into a tensor.
    pub fn into_tensor(self) -> Result<Tensor, InterpretError> {
        match self {
            Value::Scalar(s) => Ok(Tensor::scalar(s)),
            Value::Tensor(t) => Ok(t),
            other => Err(InterpretError::TypeMismatch(format!(
                "expected a tensor, got {}",
                other.kind()
            ))),
        }
    }

    fn into_text(self) -> Result<String, InterpretError> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(InterpretError::TypeMismatch(format!(
                "expected an index list, got {}",
                other.kind()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Tensor(t) => write!(f, "{t}"),
            Value::Substitution(s) => write!(f, "{s}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Default interpreter over symbolic tensors.
///
/// # Example
/// ```
/// use std::collections::HashMap;
/// use peach::expr::Expr;
/// use peach::interpreter::{Interpreter, TensorInterpreter};
/// use peach::tensor::Tensor;
///
/// let mut bindings = HashMap::new();
/// bindings.insert(
///     "t".to_string(),
///     Tensor::term(Expr::var("e1"), "g{a b}".parse().unwrap())
///         + Tensor::term(Expr::var("e2"), "g{b a}".parse().unwrap()),
/// );
///
/// // Require t to be symmetric
/// let value = TensorInterpreter
///     .evaluate(r#"homogeneous_system(t - rename_indices(t, "a b", "b a"))"#, &bindings)
///     .unwrap();
/// let solution = value.into_substitution().unwrap();
/// assert_eq!(solution.len(), 1);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorInterpreter;

impl TensorInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn eval(
        &self,
        node: &Node<DefaultNumericTypes>,
        bindings: &HashMap<String, Tensor>,
    ) -> Result<Value, InterpretError> {
        match node.operator() {
            Operator::RootNode => match node.children() {
                [child] => self.eval(child, bindings),
                children => Err(InterpretError::TypeMismatch(format!(
                    "expected a single expression, got {}",
                    children.len()
                ))),
            },
            Operator::Const { value } => match value {
                evalexpr::Value::Float(f) => Ok(Value::Scalar(Expr::Const(*f))),
                evalexpr::Value::Int(i) => Ok(Value::Scalar(Expr::Const(*i as f64))),
                evalexpr::Value::String(s) => Ok(Value::Text(s.clone())),
                other => Err(InterpretError::TypeMismatch(format!(
                    "unsupported constant {other:?}"
                ))),
            },
            Operator::VariableIdentifierRead { identifier } => Ok(match bindings.get(identifier) {
                Some(tensor) => Value::Tensor(tensor.clone()),
                None => Value::Scalar(Expr::Var(identifier.to_string())),
            }),
            Operator::Add => self.fold(node, bindings, add),
            Operator::Mul => self.fold(node, bindings, multiply),
            Operator::Sub => {
                let [left, right] = self.binary(node, bindings)?;
                add(left, negate(right)?)
            }
            Operator::Div => {
                let [left, right] = self.binary(node, bindings)?;
                divide(left, right)
            }
            Operator::Neg => match node.children() {
                [child] => negate(self.eval(child, bindings)?),
                _ => Err(InterpretError::UnsupportedOperator("Neg".to_string())),
            },
            Operator::Exp => match node.children() {
                [base, exponent] => {
                    let exponent = integer_constant(exponent).ok_or_else(|| {
                        InterpretError::TypeMismatch("exponent must be an integer".to_string())
                    })?;
                    match self.eval(base, bindings)? {
                        Value::Scalar(s) => Ok(Value::Scalar(Expr::Pow(Box::new(s), exponent))),
                        other => Err(InterpretError::TypeMismatch(format!(
                            "cannot raise {} to a power",
                            other.kind()
                        ))),
                    }
                }
                _ => Err(InterpretError::UnsupportedOperator("Exp".to_string())),
            },
            Operator::FunctionIdentifier { identifier } => {
                let args = self.arguments(node, bindings)?;
                self.call(identifier, args)
            }
            other => Err(InterpretError::UnsupportedOperator(format!("{other:?}"))),
        }
    }

    fn fold(
        &self,
        node: &Node<DefaultNumericTypes>,
        bindings: &HashMap<String, Tensor>,
        combine: fn(Value, Value) -> Result<Value, InterpretError>,
    ) -> Result<Value, InterpretError> {
        let mut children = node.children().iter();
        let first = children
            .next()
            .ok_or_else(|| InterpretError::UnsupportedOperator(format!("{:?}", node.operator())))?;
        children.try_fold(self.eval(first, bindings)?, |acc, child| {
            combine(acc, self.eval(child, bindings)?)
        })
    }

    fn binary(
        &self,
        node: &Node<DefaultNumericTypes>,
        bindings: &HashMap<String, Tensor>,
    ) -> Result<[Value; 2], InterpretError> {
        match node.children() {
            [left, right] => Ok([self.eval(left, bindings)?, self.eval(right, bindings)?]),
            _ => Err(InterpretError::UnsupportedOperator(format!(
                "{:?}",
                node.operator()
            ))),
        }
    }

    /// Evaluates the argument list of a function call.
    ///
    /// evalexpr stores the arguments as the single child of the function node, wrapped in
    /// parentheses; several arguments form a tuple. Only the parenthesis wrappers are
    /// skipped, a nested call is evaluated as one argument.
    fn arguments(
        &self,
        node: &Node<DefaultNumericTypes>,
        bindings: &HashMap<String, Tensor>,
    ) -> Result<Vec<Value>, InterpretError> {
        let mut current = match node.children() {
            [] => return Ok(Vec::new()),
            [child] => child,
            children => {
                return children
                    .iter()
                    .map(|child| self.eval(child, bindings))
                    .collect()
            }
        };
        loop {
            match (current.operator(), current.children()) {
                (Operator::RootNode, [child]) => current = child,
                (Operator::RootNode, []) => return Ok(Vec::new()),
                (Operator::Tuple, children) => {
                    return children
                        .iter()
                        .map(|child| self.eval(child, bindings))
                        .collect()
                }
                _ => return Ok(vec![self.eval(current, bindings)?]),
            }
        }
    }

    fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, InterpretError> {
        match function {
            "rename_indices" => {
                let [tensor, from, to]: [Value; 3] =
                    args.try_into()
                        .map_err(|args: Vec<Value>| InterpretError::ArgumentCount {
                            function: "rename_indices",
                            expected: 3,
                            got: args.len(),
                        })?;
                let tensor = tensor.into_tensor()?;
                let from = split_indices(&from.into_text()?);
                let to = split_indices(&to.into_text()?);
                Ok(Value::Tensor(tensor.rename_indices(&from, &to)?))
            }
            "homogeneous_system" => {
                let mut equations = Vec::new();
                for arg in args {
                    equations.extend(arg.into_tensor()?.homogeneous_equations());
                }
                trace!(equations = equations.len(), "solving homogeneous system");
                Ok(Value::Substitution(Substitution::solve_homogeneous(
                    &equations,
                )?))
            }
            other => Err(InterpretError::UnsupportedFunction(other.to_string())),
        }
    }
}

impl Interpreter for TensorInterpreter {
    fn evaluate(
        &self,
        code: &str,
        bindings: &HashMap<String, Tensor>,
    ) -> Result<Value, InterpretError> {
        trace!(code, bindings = bindings.len(), "evaluating");
        let node = build_operator_tree::<DefaultNumericTypes>(code)?;
        self.eval(&node, bindings)
    }
}

fn add(left: Value, right: Value) -> Result<Value, InterpretError> {
    match (left, right) {
        (Value::Scalar(l), Value::Scalar(r)) => Ok(Value::Scalar(l + r)),
        (l, r) => Ok(Value::Tensor(l.into_tensor()? + r.into_tensor()?)),
    }
}

fn multiply(left: Value, right: Value) -> Result<Value, InterpretError> {
    match (left, right) {
        (Value::Scalar(l), Value::Scalar(r)) => Ok(Value::Scalar(l * r)),
        (Value::Scalar(s), Value::Tensor(t)) | (Value::Tensor(t), Value::Scalar(s)) => {
            Ok(Value::Tensor(t.scale(&s)))
        }
        (Value::Tensor(l), Value::Tensor(r)) => Ok(Value::Tensor(l.product(&r))),
        (l, r) => Err(InterpretError::TypeMismatch(format!(
            "cannot multiply {} and {}",
            l.kind(),
            r.kind()
        ))),
    }
}

fn divide(left: Value, right: Value) -> Result<Value, InterpretError> {
    let divisor = match right {
        Value::Scalar(s) => s,
        other => {
            return Err(InterpretError::TypeMismatch(format!(
                "cannot divide by {}",
                other.kind()
            )))
        }
    };
    let quotient = |s: &Expr| Expr::Div(Box::new(s.clone()), Box::new(divisor.clone()));
    match left {
        Value::Scalar(s) => Ok(Value::Scalar(quotient(&s))),
        Value::Tensor(t) => Ok(Value::Tensor(t.map_scalars(quotient))),
        other => Err(InterpretError::TypeMismatch(format!(
            "cannot divide {}",
            other.kind()
        ))),
    }
}

fn negate(value: Value) -> Result<Value, InterpretError> {
    match value {
        Value::Scalar(s) => Ok(Value::Scalar(-s)),
        Value::Tensor(t) => Ok(Value::Tensor(-t)),
        other => Err(InterpretError::TypeMismatch(format!(
            "cannot negate {}",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Basis;

    fn basis(s: &str) -> Basis {
        s.parse().unwrap()
    }

    fn evaluate(code: &str, bindings: &HashMap<String, Tensor>) -> Result<Value, InterpretError> {
        TensorInterpreter::new().evaluate(code, bindings)
    }

    fn bindings() -> HashMap<String, Tensor> {
        let mut bindings = HashMap::new();
        bindings.insert(
            "t".to_string(),
            Tensor::term(Expr::var("e1"), basis("g{a b}"))
                + Tensor::term(Expr::var("e2"), basis("g{b a}")),
        );
        bindings.insert(
            "v".to_string(),
            Tensor::term(Expr::var("e3"), basis("v{a}")),
        );
        bindings
    }

    #[test]
    fn test_scalars() {
        let value = evaluate("2 * x - y / 2 + 1", &HashMap::new()).unwrap();
        let Value::Scalar(s) = value else {
            panic!("expected a scalar, got {value:?}");
        };
        let form = s.linear_form().unwrap();
        assert_eq!(form.coefficient("x"), 2.0);
        assert_eq!(form.coefficient("y"), -0.5);
        assert_eq!(form.constant, 1.0);

        assert!(matches!(
            evaluate("x^2", &HashMap::new()).unwrap(),
            Value::Scalar(Expr::Pow(_, 2))
        ));
        assert_eq!(
            evaluate("\"a b\"", &HashMap::new()).unwrap(),
            Value::Text("a b".to_string())
        );
    }

    #[test]
    fn test_tensor_arithmetic() {
        let b = bindings();
        let value = evaluate("2 * t - t", &b).unwrap();
        assert_eq!(value, Value::Tensor(b["t"].clone()));

        let value = evaluate("v * v", &b).unwrap().into_tensor().unwrap();
        assert_eq!(value.terms()[0].basis, basis("v{a} v{a}"));

        let value = evaluate("t / 2", &b).unwrap().into_tensor().unwrap();
        assert_eq!(value.terms()[0].scalar.linear_form().unwrap().coefficient("e1"), 0.5);
    }

    #[test]
    fn test_rename_indices() {
        let b = bindings();
        let value = evaluate(r#"rename_indices(v, "a", "{c}")"#, &b).unwrap();
        assert_eq!(
            value,
            Value::Tensor(Tensor::term(Expr::var("e3"), basis("v{c}")))
        );

        assert!(matches!(
            evaluate(r#"rename_indices(v, "a b", "c")"#, &b),
            Err(InterpretError::IndexMismatch { .. })
        ));
        assert!(matches!(
            evaluate(r#"rename_indices(v, "a")"#, &b),
            Err(InterpretError::ArgumentCount {
                expected: 3,
                got: 2,
                ..
            })
        ));
        assert!(matches!(
            evaluate(r#"rename_indices(v, v, "a")"#, &b),
            Err(InterpretError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_homogeneous_system() {
        let b = bindings();
        let code = r#"homogeneous_system(t - rename_indices(t, "a b", "b a"))"#;
        let solution = evaluate(code, &b).unwrap().into_substitution().unwrap();
        assert_eq!(solution.len(), 1);

        // The solution symmetrizes t
        let symmetric = solution.apply_tensor(&b["t"]);
        let swapped = symmetric.rename_indices(&["a", "b"], &["b", "a"]).unwrap();
        assert!((symmetric - swapped).is_zero());
    }

    #[test]
    fn test_nested_calls_are_single_arguments() {
        let b = bindings();
        let code = r#"homogeneous_system(rename_indices(t, "a b", "{b a}"))"#;
        let solution = evaluate(code, &b).unwrap().into_substitution().unwrap();
        // e2 g{a b} + e1 g{b a} vanishes only for e1 = e2 = 0
        assert_eq!(solution.len(), 2);
        assert_eq!(solution.apply(&Expr::var("e1")), Expr::Const(0.0));
        assert_eq!(solution.apply(&Expr::var("e2")), Expr::Const(0.0));

        let value = evaluate(r#"2 * rename_indices(rename_indices(v, "a", "b"), "b", "c")"#, &b)
            .unwrap()
            .into_tensor()
            .unwrap();
        assert_eq!(value.terms()[0].basis, basis("v{c}"));

        assert!(matches!(
            evaluate(r#"frobnicate(rename_indices(v, "a", "{a}"))"#, &b),
            Err(InterpretError::UnsupportedFunction(name)) if name == "frobnicate"
        ));
    }

    #[test]
    fn test_homogeneous_system_of_several_arguments() {
        let b = bindings();
        let solution = evaluate("homogeneous_system(e1 - 1, v)", &b)
            .unwrap()
            .into_substitution()
            .unwrap();
        assert_eq!(solution.len(), 2);
        assert_eq!(solution.apply(&Expr::var("e1")), Expr::Const(1.0));
        assert_eq!(solution.apply(&Expr::var("e3")), Expr::Const(0.0));
    }

    #[test]
    fn test_errors() {
        let b = bindings();
        assert!(matches!(
            evaluate("frobnicate(t)", &b),
            Err(InterpretError::UnsupportedFunction(_))
        ));
        assert!(matches!(
            evaluate("t == t", &b),
            Err(InterpretError::UnsupportedOperator(_))
        ));
        assert!(matches!(
            evaluate("t + \"a\"", &b),
            Err(InterpretError::TypeMismatch(_))
        ));
        assert!(matches!(
            evaluate("1 / t", &b),
            Err(InterpretError::TypeMismatch(_))
        ));
        assert!(matches!(
            evaluate("(t + 1", &b),
            Err(InterpretError::BuildEvalexprError(_))
        ));
        assert!(matches!(
            evaluate("homogeneous_system(e1 - 1, e1 - 2)", &b),
            Err(InterpretError::Substitution(_))
        ));
        assert!(matches!(
            evaluate("t", &b).unwrap().into_substitution(),
            Err(InterpretError::NotASubstitution(_))
        ));
    }
}
