use std::sync::Arc;

use crate::coefficient::Coefficient;
use crate::equation::Equation;

/// Type alias for a listener notified when a coefficient has been calculated.
///
/// This represents a function that:
/// - Receives the coefficient that just finished
/// - Is invoked after the coefficient's tensor lock has been released
/// - Is both Send and Sync since completion may happen on any thread
pub type CoefficientObserver = Arc<dyn Fn(&Coefficient) + Send + Sync>;

/// Type alias for a listener notified when an equation reached a terminal state.
///
/// This represents a function that:
/// - Receives the equation after it was solved or failed
/// - Runs on the worker thread that performed the solve
/// - Is both Send and Sync for thread safety
pub type EquationObserver = Arc<dyn Fn(&Equation) + Send + Sync>;
