//! Solving sessions.
//!
//! A [`Session`] is the context every equation lives in: it owns the coefficient registry,
//! the interpreter that evaluates rewritten equations and the worker pool that solves them.
//! Sessions are cheap to clone and independent of each other; coefficients of one session
//! are never visible in another.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::coefficient::Registry;
use crate::config::SolverConfig;
use crate::equation::Equation;
use crate::errors::{EquationError, SessionError};
use crate::interpreter::{Interpreter, TensorInterpreter};

/// Shared context of a set of equations.
///
/// # Example
/// ```
/// use peach::prelude::*;
///
/// let session = Session::new(SolverConfig::default().with_workers(2)).unwrap();
/// let eq = session.equation("#<v:1:0:0:0:{a}>").unwrap();
/// assert!(eq.is_waiting());
/// assert_eq!(session.registry().len(), 1);
/// ```
#[derive(Clone)]
pub struct Session {
    registry: Arc<Registry>,
    interpreter: Arc<dyn Interpreter>,
    pool: Arc<ThreadPool>,
    next_equation: Arc<AtomicU64>,
}

impl Session {
    /// Creates a session with the default [`TensorInterpreter`].
    pub fn new(config: SolverConfig) -> Result<Self, SessionError> {
        Self::with_interpreter(config, TensorInterpreter::new())
    }

    /// Creates a session that evaluates equations with `interpreter`.
    pub fn with_interpreter<I>(config: SolverConfig, interpreter: I) -> Result<Self, SessionError>
    where
        I: Interpreter + 'static,
    {
        let thread_name = config.thread_name.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(move |i| format!("{thread_name}-{i}"))
            .build()?;
        debug!(workers = pool.current_num_threads(), "session started");

        Ok(Self {
            registry: Arc::new(Registry::new()),
            interpreter: Arc::new(interpreter),
            pool: Arc::new(pool),
            next_equation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Parses `code` into an equation of this session.
    pub fn equation(&self, code: &str) -> Result<Arc<Equation>, EquationError> {
        Equation::new(code, self)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn interpreter(&self) -> &dyn Interpreter {
        self.interpreter.as_ref()
    }

    /// Runs `job` on the worker pool.
    pub(crate) fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }

    pub(crate) fn next_equation_id(&self) -> u64 {
        self.next_equation.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of worker threads solving equations.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("coefficients", &self.registry.len())
            .field("workers", &self.workers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coefficient::Shape;

    #[test]
    fn test_sessions_are_independent() {
        let a = Session::new(SolverConfig::default().with_workers(1)).unwrap();
        let b = Session::new(SolverConfig::default().with_workers(1)).unwrap();
        a.registry().get(Shape::new(1, 0, 0, 0), "v");
        assert_eq!(a.registry().len(), 1);
        assert!(b.registry().is_empty());

        // Clones share everything
        let c = a.clone();
        assert_eq!(c.registry().len(), 1);
        assert_eq!(a.next_equation_id(), 0);
        assert_eq!(c.next_equation_id(), 1);
    }

    #[test]
    fn test_worker_count() {
        let session = Session::new(SolverConfig::default().with_workers(3)).unwrap();
        assert_eq!(session.workers(), 3);

        // Zero is raised to one worker
        let session = Session::new(SolverConfig::default().with_workers(0)).unwrap();
        assert_eq!(session.workers(), 1);
    }

    #[test]
    fn test_thread_names() {
        let session =
            Session::new(SolverConfig::default().with_workers(1).with_thread_name("t")).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        session.spawn(move || {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        });
        assert_eq!(rx.recv().unwrap().as_deref(), Some("t-0"));
    }
}
