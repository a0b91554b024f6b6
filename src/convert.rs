//! Conversion module for transforming evalexpr AST nodes into scalar expressions.
//!
//! This module handles converting the AST nodes from the evalexpr crate into our own
//! scalar expression type. Identifiers become free parameters, numeric constants become
//! constants and the arithmetic operators map onto the matching `Expr` nodes.
//!
//! The main entry point is the `build_ast` function which recursively traverses the
//! evalexpr AST and builds up our expression tree. `Expr` also implements `FromStr`
//! through this module.

use std::str::FromStr;

use evalexpr::{build_operator_tree, DefaultNumericTypes, Node, Operator};

use crate::errors::{ConvertError, InterpretError};
use crate::expr::Expr;

/// Converts an evalexpr AST node into a scalar expression.
///
/// # Arguments
/// * `node` - The evalexpr AST node to convert
///
/// # Returns
/// * `Result<Expr, ConvertError>` - The converted expression or an error if conversion fails
///
/// # Examples of supported operations:
/// * Basic arithmetic: +, -, *, /
/// * Free parameters: e1, e2, etc.
/// * Constants: integer and floating point numbers
/// * Exponentiation: x^n where n is an integer constant
pub fn build_ast(node: &Node<DefaultNumericTypes>) -> Result<Expr, ConvertError> {
    match node.operator() {
        // Addition operator - combines multiple children into a series of binary Add expressions
        Operator::Add => fold_children(node, Expr::Add),
        // Multiplication operator - combines multiple children into a series of binary Mul expressions
        Operator::Mul => fold_children(node, Expr::Mul),
        // Division operator - creates a binary Div expression
        Operator::Div => {
            let [left, right] = binary_children(node)?;
            Ok(Expr::Div(Box::new(left), Box::new(right)))
        }
        // Subtraction operator - creates a binary Sub expression
        Operator::Sub => {
            let [left, right] = binary_children(node)?;
            Ok(Expr::Sub(Box::new(left), Box::new(right)))
        }
        Operator::Const { value } => match value {
            evalexpr::Value::Float(f) => Ok(Expr::Const(*f)),
            evalexpr::Value::Int(i) => Ok(Expr::Const(*i as f64)),
            _ => Err(ConvertError::ConstOperator(format!("{:?}", value))),
        },
        Operator::VariableIdentifierRead { identifier } => Ok(Expr::Var(identifier.to_string())),
        Operator::Neg => {
            let child = node
                .children()
                .first()
                .ok_or_else(|| ConvertError::UnsupportedOperator("empty negation".to_string()))?;
            Ok(Expr::Neg(Box::new(build_ast(child)?)))
        }
        Operator::FunctionIdentifier { identifier } => {
            Err(ConvertError::UnsupportedFunction(identifier.to_string()))
        }
        // Root node - should have exactly one child
        Operator::RootNode => {
            let children = node.children();
            if children.len() == 1 {
                build_ast(&children[0])
            } else {
                Err(ConvertError::RootNode(format!("{:?}", children)))
            }
        }
        // Exponentiation - base can be any expression but exponent must be an integer constant
        Operator::Exp => {
            let children = node.children();
            if children.len() != 2 {
                return Err(ConvertError::ExpOperator(format!(
                    "expected 2 operands, got {}",
                    children.len()
                )));
            }
            match integer_constant(&children[1]) {
                Some(exp) => Ok(Expr::Pow(Box::new(build_ast(&children[0])?), exp)),
                None => Err(ConvertError::ExpOperator(format!(
                    "Expected integer constant for exponent: {:?}",
                    children[1].operator()
                ))),
            }
        }
        other => Err(ConvertError::UnsupportedOperator(format!("{:?}", other))),
    }
}

/// Returns the value of an integer constant, looking through parentheses and negation.
pub(crate) fn integer_constant(node: &Node<DefaultNumericTypes>) -> Option<i64> {
    match node.operator() {
        Operator::Const {
            value: evalexpr::Value::Int(i),
        } => Some(*i),
        Operator::RootNode | Operator::Neg if node.children().len() == 1 => {
            let inner = integer_constant(&node.children()[0])?;
            if matches!(node.operator(), Operator::Neg) {
                Some(-inner)
            } else {
                Some(inner)
            }
        }
        _ => None,
    }
}

fn fold_children(
    node: &Node<DefaultNumericTypes>,
    combine: fn(Box<Expr>, Box<Expr>) -> Expr,
) -> Result<Expr, ConvertError> {
    let children = node.children();
    let first = children
        .first()
        .ok_or_else(|| ConvertError::UnsupportedOperator(format!("{:?}", node.operator())))?;
    children
        .iter()
        .skip(1)
        .try_fold(build_ast(first)?, |acc, child| {
            Ok(combine(Box::new(acc), Box::new(build_ast(child)?)))
        })
}

fn binary_children(node: &Node<DefaultNumericTypes>) -> Result<[Expr; 2], ConvertError> {
    match node.children() {
        [left, right] => Ok([build_ast(left)?, build_ast(right)?]),
        children => Err(ConvertError::UnsupportedOperator(format!(
            "{:?} with {} operands",
            node.operator(),
            children.len()
        ))),
    }
}

impl FromStr for Expr {
    type Err = InterpretError;

    /// Parses a scalar expression written in evalexpr syntax.
    ///
    /// # Example
    /// ```
    /// use peach::expr::Expr;
    ///
    /// let expr: Expr = "2*e1 - e2/4".parse().unwrap();
    /// let form = expr.linear_form().unwrap();
    /// assert_eq!(form.coefficient("e1"), 2.0);
    /// assert_eq!(form.coefficient("e2"), -0.25);
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let node = build_operator_tree::<DefaultNumericTypes>(s)?;
        Ok(build_ast(&node)?)
    }
}
