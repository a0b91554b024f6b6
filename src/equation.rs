//! Coefficient equations and their dependency-driven solve.
//!
//! This module provides the `Equation` type. An equation is written in the interpreter's
//! expression syntax and references coefficients with tags of the form
//!
//! ```text
//! #<id:left:left_deriv:right:right_deriv:{indices}>
//! ```
//!
//! Parsing replaces every tag by a `rename_indices` call that binds the shared coefficient
//! tensor to the given index list and records the coefficient as a dependency. The equation
//! then waits until every dependency has been calculated, solves itself on the session's
//! worker pool and applies the resulting substitution to every finished coefficient.
//!
//! # Features
//!
//! - Shared coefficients: the same tag in several equations resolves to one coefficient
//! - Late subscription: dependencies that finished before the equation was created count
//! - At most one solve per equation, started on the worker pool and never on the
//!   thread that completed the last dependency
//! - Deadlock-free locking: coefficient locks are taken in one pass in key order
//! - Blocking `wait()` and completion observers
//!
//! # Example
//!
//! ```
//! use peach::prelude::*;
//!
//! let session = Session::new(SolverConfig::default().with_workers(2)).unwrap();
//!
//! // Require the coefficient g to be symmetric in its two indices
//! let eq = session
//!     .equation("#<g:1:0:1:0:{a b}> - #<g:1:0:1:0:{b a}> // symmetry")
//!     .unwrap();
//! assert!(eq.is_waiting());
//!
//! let g = session.registry().get(Shape::new(1, 0, 1, 0), "g");
//! g.complete(
//!     Tensor::term(Expr::var("e1"), "gamma{a b}".parse().unwrap())
//!         + Tensor::term(Expr::var("e2"), "gamma{b a}".parse().unwrap()),
//! )
//! .unwrap();
//!
//! eq.wait().unwrap();
//! assert!(eq.is_solved());
//!
//! // e1 = e2 was substituted into the coefficient
//! let terms = g.tensor();
//! assert_eq!(terms.terms().len(), 2);
//! assert_eq!(terms.terms()[0].scalar, terms.terms()[1].scalar);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use colored::Colorize;
use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use crate::coefficient::{Coefficient, Registry, Shape};
use crate::errors::{EquationError, InterpretError, ParseError};
use crate::interpreter::Value;
use crate::session::Session;
use crate::tensor::{canonical_indices, Tensor};
use crate::types::EquationObserver;

/// Field names of a coefficient tag, in order.
const FIELDS: [&str; 6] = [
    "id",
    "left size",
    "left derivative size",
    "right size",
    "right derivative size",
    "index list",
];

/// Largest number of indices a tagged coefficient may carry.
pub const MAX_RANK: usize = 4096;

/// Observable state of an equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationState {
    /// Some dependency has not been calculated yet
    Waiting,
    /// The solve is running on the worker pool
    Solving,
    /// The substitution was applied to the coefficients
    Solved,
    /// The solve failed; no coefficient was modified
    Failed,
}

impl EquationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EquationState::Solved | EquationState::Failed)
    }
}

enum Phase {
    Waiting,
    Solving,
    Solved,
    Failed(Arc<InterpretError>),
}

impl Phase {
    fn state(&self) -> EquationState {
        match self {
            Phase::Waiting => EquationState::Waiting,
            Phase::Solving => EquationState::Solving,
            Phase::Solved => EquationState::Solved,
            Phase::Failed(_) => EquationState::Failed,
        }
    }
}

/// Result of rewriting an equation string.
#[derive(Debug, Clone)]
pub struct Rewritten {
    /// The equation with every tag replaced by a `rename_indices` call
    pub body: String,
    /// Distinct coefficients in order of first occurrence
    pub coefficients: Vec<Arc<Coefficient>>,
}

struct Tag<'a> {
    id: &'a str,
    shape: Shape,
    rank: usize,
    indices: &'a str,
}

/// Scans `code` for coefficient tags and rewrites them.
///
/// Everything after `//` is a comment and dropped. Text outside of tags is copied verbatim.
/// Each tag `#<id:l:ld:r:rd:indices>` resolves its coefficient through `registry` and is
/// replaced by
///
/// ```text
/// rename_indices(coefficient_l_ld_r_rd_id, "a b …", "indices")
/// ```
///
/// where `a b …` are the canonical labels of the coefficient's rank. The index list is
/// forwarded verbatim and may contain `:`.
///
/// # Errors
/// Returns a `ParseError` for unterminated tags, missing fields, block sizes that are not
/// non-negative integers, ranks above [`MAX_RANK`] and ids outside `[A-Za-z0-9_]+`. No
/// coefficient is registered when an error is returned.
pub fn rewrite(code: &str, registry: &Registry) -> Result<Rewritten, ParseError> {
    let code = code.find("//").map_or(code, |end| &code[..end]);

    // Every tag is parsed before the registry is touched
    let mut segments: Vec<(&str, Tag<'_>)> = Vec::new();
    let mut offset = 0;
    while let Some(start) = code[offset..].find("#<") {
        let position = offset + start;
        let inner = &code[position + 2..];
        let end = inner
            .find('>')
            .ok_or(ParseError::UnterminatedTag { position })?;
        segments.push((&code[offset..position], parse_tag(&inner[..end], position)?));
        offset = position + 2 + end + 1;
    }
    let tail = &code[offset..];

    let mut body = String::with_capacity(code.len());
    let mut coefficients: Vec<Arc<Coefficient>> = Vec::new();
    for (text, tag) in segments {
        body.push_str(text);

        let coefficient = registry.get(tag.shape, tag.id);
        let labels = canonical_indices(tag.rank).join(" ");
        body.push_str(&format!(
            "rename_indices({}, \"{}\", \"{}\")",
            coefficient.name(),
            labels,
            escape(tag.indices)
        ));

        if !coefficients.iter().any(|c| Arc::ptr_eq(c, &coefficient)) {
            coefficients.push(coefficient);
        }
    }
    body.push_str(tail);

    Ok(Rewritten { body, coefficients })
}

fn parse_tag(tag: &str, position: usize) -> Result<Tag<'_>, ParseError> {
    let fields: Vec<&str> = tag.splitn(FIELDS.len(), ':').collect();
    if fields.len() < FIELDS.len() {
        return Err(ParseError::MissingField {
            position,
            field: FIELDS[fields.len()],
        });
    }

    let id = fields[0].trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ParseError::InvalidId {
            position,
            id: id.to_string(),
        });
    }

    let size = |i: usize| {
        fields[i]
            .trim()
            .parse::<usize>()
            .map_err(|source| ParseError::InvalidShapeField {
                position,
                field: FIELDS[i],
                value: fields[i].to_string(),
                source,
            })
    };
    let shape = Shape::new(size(1)?, size(2)?, size(3)?, size(4)?).canonical();
    let rank = shape
        .checked_rank()
        .filter(|&rank| rank <= MAX_RANK)
        .ok_or(ParseError::RankTooLarge {
            position,
            limit: MAX_RANK,
        })?;

    Ok(Tag {
        id,
        shape,
        rank,
        indices: fields[5],
    })
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// An equation between coefficients of a session.
///
/// Equations are created through [`Session::equation`] or [`Equation::new`] and shared as
/// `Arc<Equation>`. A running solve holds its own reference, so dropping every handle does
/// not cancel it.
pub struct Equation {
    id: u64,
    code: String,
    body: String,
    expression: String,
    is_empty: bool,
    coefficients: Vec<Arc<Coefficient>>,
    session: Session,
    scheduled: AtomicBool,
    phase: Mutex<Phase>,
    changed: Condvar,
    observers: Mutex<Vec<EquationObserver>>,
}

impl Equation {
    /// Parses `code` and subscribes the equation to its coefficients.
    ///
    /// If every dependency has already been calculated, the solve is scheduled right away.
    /// An equation without tags is empty: it is never scheduled and stays `Waiting`.
    ///
    /// # Arguments
    /// * `code` - Equation text with coefficient tags
    /// * `session` - Session providing registry, interpreter and workers
    ///
    /// # Returns
    /// * `Result<Arc<Self>, EquationError>` - The equation or a parse error
    pub fn new(code: &str, session: &Session) -> Result<Arc<Self>, EquationError> {
        let Rewritten { body, coefficients } = rewrite(code, session.registry())?;
        let is_empty = coefficients.is_empty() || body.trim().is_empty();

        let equation = Arc::new(Equation {
            id: session.next_equation_id(),
            code: code.to_string(),
            expression: format!("homogeneous_system({body})"),
            body,
            is_empty,
            coefficients,
            session: session.clone(),
            scheduled: AtomicBool::new(false),
            phase: Mutex::new(Phase::Waiting),
            changed: Condvar::new(),
            observers: Mutex::new(Vec::new()),
        });
        info!(
            equation = equation.id,
            dependencies = equation.coefficients.len(),
            empty = is_empty,
            "equation created"
        );

        if !is_empty {
            for coefficient in &equation.coefficients {
                let weak = Arc::downgrade(&equation);
                coefficient.register_observer(move |c| {
                    if let Some(equation) = weak.upgrade() {
                        equation.on_coefficient_calculated(c);
                    }
                });
            }
            // Dependencies may have finished before the observers were in place
            equation.schedule_if_ready();
        }
        Ok(equation)
    }

    /// Called by a dependency once it has been calculated.
    ///
    /// Schedules the solve if every dependency is finished. Concurrent calls schedule at
    /// most one solve.
    pub fn on_coefficient_calculated(self: &Arc<Self>, coefficient: &Coefficient) {
        trace!(
            equation = self.id,
            coefficient = coefficient.name(),
            "dependency calculated"
        );
        self.schedule_if_ready();
    }

    fn schedule_if_ready(self: &Arc<Self>) {
        if self.is_empty || !self.coefficients.iter().all(|c| c.is_finished()) {
            return;
        }
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(equation = self.id, "scheduling solve");
        let this = Arc::clone(self);
        self.session.spawn(move || this.solve());
    }

    fn solve(&self) {
        self.set_phase(Phase::Solving);
        info!(equation = self.id, "solving");

        // Lock every finished coefficient, in key order, in a single pass
        let finished = self.session.registry().finished();
        let mut guards: Vec<MutexGuard<'_, Tensor>> = finished.iter().map(|c| c.lock()).collect();

        let bindings: HashMap<String, Tensor> = finished
            .iter()
            .zip(guards.iter())
            .filter(|(c, _)| self.coefficients.iter().any(|own| Arc::ptr_eq(own, *c)))
            .map(|(c, tensor)| (c.name().to_string(), (**tensor).clone()))
            .collect();

        let result = self
            .session
            .interpreter()
            .evaluate(&self.expression, &bindings)
            .and_then(Value::into_substitution);

        let phase = match result {
            Ok(substitution) => {
                for tensor in guards.iter_mut() {
                    let updated = substitution.apply_tensor(tensor);
                    **tensor = updated;
                }
                drop(guards);
                info!(
                    equation = self.id,
                    pairs = substitution.len(),
                    coefficients = finished.len(),
                    "solved"
                );
                Phase::Solved
            }
            Err(error) => {
                drop(guards);
                warn!(equation = self.id, error = %error, "solve failed");
                Phase::Failed(Arc::new(error))
            }
        };

        self.set_phase(phase);
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            observer(self);
        }
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase() = phase;
        self.changed.notify_all();
    }

    /// Blocks until the equation has been solved.
    ///
    /// Returns immediately for empty equations. Do not call this from a task running on
    /// the session's worker pool.
    ///
    /// # Errors
    /// `EquationError::SolveFailed` with the interpreter error if the solve failed.
    pub fn wait(&self) -> Result<(), EquationError> {
        if self.is_empty {
            return Ok(());
        }
        let phase = self
            .changed
            .wait_while(self.phase(), |p| !p.state().is_terminal())
            .unwrap_or_else(|e| e.into_inner());
        match &*phase {
            Phase::Failed(error) => Err(EquationError::SolveFailed(Arc::clone(error))),
            _ => Ok(()),
        }
    }

    /// Registers a listener called after the equation was solved or failed.
    ///
    /// Listeners registered after the solve finished are not called.
    pub fn register_observer<F>(&self, observer: F)
    where
        F: Fn(&Equation) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    pub fn state(&self) -> EquationState {
        self.phase().state()
    }

    pub fn is_waiting(&self) -> bool {
        self.state() == EquationState::Waiting
    }

    pub fn is_solving(&self) -> bool {
        self.state() == EquationState::Solving
    }

    pub fn is_solved(&self) -> bool {
        self.state() == EquationState::Solved
    }

    pub fn is_failed(&self) -> bool {
        self.state() == EquationState::Failed
    }

    /// Whether the equation references no coefficient. Empty equations never leave
    /// `Waiting`.
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    /// The error of a failed solve.
    pub fn failure(&self) -> Option<Arc<InterpretError>> {
        match &*self.phase() {
            Phase::Failed(error) => Some(Arc::clone(error)),
            _ => None,
        }
    }

    /// Sequential id of the equation within its session.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The equation as it was written.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The rewritten equation body.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The expression handed to the interpreter.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Distinct coefficients the equation depends on, in order of first occurrence.
    pub fn coefficients(&self) -> &[Arc<Coefficient>] {
        &self.coefficients
    }
}

impl fmt::Debug for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Equation")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("state", &self.state())
            .field(
                "coefficients",
                &self.coefficients.iter().map(|c| c.name()).collect_vec(),
            )
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Equation".cyan(), self.code.trim())?;
        writeln!(f, "    {}: {:?}", "State".cyan(), self.state())?;
        writeln!(
            f,
            "    {}: [{}]",
            "Coefficients".cyan(),
            self.coefficients.iter().map(|c| c.name()).join(", ")
        )?;
        write!(f, "}}")
    }
}
