//! Shared tensor coefficients and the registry that owns them.
//!
//! A coefficient is an unknown tensor identified by its block [`Shape`] and a free-form id.
//! The same coefficient may appear in many equations; the [`Registry`] guarantees that every
//! reference to a given (canonical shape, id) resolves to one shared [`Coefficient`].
//!
//! # Canonical shapes
//!
//! A coefficient with blocks `(l, ld, r, rd)` describes the same object as `(r, rd, l, ld)`.
//! Shapes are therefore canonicalized so that the larger block is on the left, and on a tie
//! the block with more derivative indices:
//!
//! ```
//! use peach::coefficient::Shape;
//!
//! assert_eq!(Shape::new(2, 0, 4, 1).canonical(), Shape::new(4, 1, 2, 0));
//! assert_eq!(Shape::new(2, 0, 2, 1).canonical(), Shape::new(2, 1, 2, 0));
//! assert_eq!(Shape::new(4, 0, 2, 0).canonical(), Shape::new(4, 0, 2, 0));
//! ```
//!
//! # Completion
//!
//! Coefficients start out unfinished. A producer calls [`Coefficient::complete`] exactly once;
//! the finished flag is published before any observer runs and observers are invoked after the
//! tensor lock has been released.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use colored::Colorize;
use tracing::{debug, info};

use crate::errors::CoefficientError;
use crate::tensor::Tensor;
use crate::types::CoefficientObserver;

/// Block sizes of a coefficient: left indices, left derivative indices, right indices and
/// right derivative indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Shape {
    pub left: usize,
    pub left_deriv: usize,
    pub right: usize,
    pub right_deriv: usize,
}

impl Shape {
    pub fn new(left: usize, left_deriv: usize, right: usize, right_deriv: usize) -> Self {
        Self {
            left,
            left_deriv,
            right,
            right_deriv,
        }
    }

    /// Swaps the two blocks, together with their derivative counts, if the right block is
    /// the larger one.
    pub fn canonical(self) -> Self {
        if self.left < self.right || (self.left == self.right && self.left_deriv < self.right_deriv)
        {
            Self {
                left: self.right,
                left_deriv: self.right_deriv,
                right: self.left,
                right_deriv: self.left_deriv,
            }
        } else {
            self
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.canonical() == *self
    }

    /// Total number of indices of the coefficient tensor, saturating at `usize::MAX`.
    pub fn rank(&self) -> usize {
        self.checked_rank().unwrap_or(usize::MAX)
    }

    /// Total number of indices, or `None` on overflow.
    pub fn checked_rank(&self) -> Option<usize> {
        self.left
            .checked_add(self.left_deriv)?
            .checked_add(self.right)?
            .checked_add(self.right_deriv)
    }
}

/// Identity of a coefficient. The derived order is the global lock order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoefficientKey {
    pub shape: Shape,
    pub id: String,
}

impl CoefficientKey {
    /// Builds a key from a possibly non-canonical shape.
    pub fn new(shape: Shape, id: &str) -> Self {
        Self {
            shape: shape.canonical(),
            id: id.to_string(),
        }
    }

    /// The identifier under which the coefficient's tensor is bound in equations.
    pub fn name(&self) -> String {
        let Shape {
            left,
            left_deriv,
            right,
            right_deriv,
        } = self.shape;
        format!(
            "coefficient_{left}_{left_deriv}_{right}_{right_deriv}_{}",
            self.id
        )
    }
}

impl fmt::Display for CoefficientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A shared, shape-typed unknown tensor.
pub struct Coefficient {
    key: CoefficientKey,
    name: String,
    finished: AtomicBool,
    tensor: Mutex<Tensor>,
    observers: Mutex<Vec<CoefficientObserver>>,
}

impl Coefficient {
    fn new(key: CoefficientKey) -> Self {
        Self {
            name: key.name(),
            key,
            finished: AtomicBool::new(false),
            tensor: Mutex::new(Tensor::zero()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &CoefficientKey {
        &self.key
    }

    pub fn shape(&self) -> Shape {
        self.key.shape
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Returns a copy of the current tensor value.
    pub fn tensor(&self) -> Tensor {
        self.lock().clone()
    }

    /// Locks the coefficient and gives access to its tensor.
    ///
    /// Solving equations hold this lock while they rewrite the tensor. Do not hold it while
    /// calling [`Coefficient::complete`] on the same coefficient.
    pub fn lock(&self) -> MutexGuard<'_, Tensor> {
        self.tensor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a listener that is called once the coefficient has been calculated.
    ///
    /// Listeners registered after completion are never called; check
    /// [`Coefficient::is_finished`] after registering.
    pub fn register_observer<F>(&self, observer: F)
    where
        F: Fn(&Coefficient) + Send + Sync + 'static,
    {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(observer));
    }

    /// Stores the calculated tensor, marks the coefficient finished and notifies observers.
    ///
    /// # Errors
    /// `CoefficientError::AlreadyFinished` if the coefficient was completed before. The stored
    /// tensor is left untouched in that case.
    pub fn complete(&self, tensor: Tensor) -> Result<(), CoefficientError> {
        let observers = {
            let mut guard = self.lock();
            if self.finished.load(Ordering::Acquire) {
                return Err(CoefficientError::AlreadyFinished(self.name.clone()));
            }
            *guard = tensor;
            self.finished.store(true, Ordering::Release);
            self.observers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        };

        info!(
            coefficient = %self.name,
            observers = observers.len(),
            "coefficient calculated"
        );
        for observer in observers {
            observer(self);
        }
        Ok(())
    }
}

impl fmt::Debug for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coefficient")
            .field("key", &self.key)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.is_finished() {
            "finished".green()
        } else {
            "pending".yellow()
        };
        write!(f, "{} [{}]: {}", self.name.cyan(), status, self.tensor())
    }
}

/// Owner of all coefficients of a session.
///
/// Coefficients are created lazily on first request and live as long as the registry.
/// Iteration always follows the key order, which is also the order in which solving
/// equations acquire coefficient locks.
#[derive(Debug, Default)]
pub struct Registry {
    coefficients: Mutex<BTreeMap<CoefficientKey, Arc<Coefficient>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, BTreeMap<CoefficientKey, Arc<Coefficient>>> {
        self.coefficients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the coefficient for `(shape, id)`, creating it if necessary.
    ///
    /// The shape is canonicalized first, so `(l, ld, r, rd)` and `(r, rd, l, ld)` with the
    /// same id resolve to the same object.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    /// use peach::coefficient::{Registry, Shape};
    ///
    /// let registry = Registry::new();
    /// let a = registry.get(Shape::new(2, 0, 4, 0), "g");
    /// let b = registry.get(Shape::new(4, 0, 2, 0), "g");
    /// assert!(Arc::ptr_eq(&a, &b));
    /// assert_eq!(a.name(), "coefficient_4_0_2_0_g");
    /// ```
    pub fn get(&self, shape: Shape, id: &str) -> Arc<Coefficient> {
        let key = CoefficientKey::new(shape, id);
        let mut map = self.map();
        if let Some(coefficient) = map.get(&key) {
            return Arc::clone(coefficient);
        }
        debug!(coefficient = %key, "creating coefficient");
        let coefficient = Arc::new(Coefficient::new(key.clone()));
        map.insert(key, Arc::clone(&coefficient));
        coefficient
    }

    /// All coefficients in key order.
    pub fn snapshot(&self) -> Vec<Arc<Coefficient>> {
        self.map().values().cloned().collect()
    }

    /// The finished coefficients in key order.
    pub fn finished(&self) -> Vec<Arc<Coefficient>> {
        self.map()
            .values()
            .filter(|c| c.is_finished())
            .cloned()
            .collect()
    }

    /// Looks a coefficient up by its bound name, e.g. `coefficient_2_0_2_0_g`.
    pub fn find(&self, name: &str) -> Option<Arc<Coefficient>> {
        self.map().values().find(|c| c.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_canonical_shape() {
        assert!(Shape::new(4, 0, 2, 0).is_canonical());
        assert!(!Shape::new(2, 0, 4, 0).is_canonical());
        assert!(Shape::new(2, 1, 2, 0).is_canonical());
        assert!(!Shape::new(2, 0, 2, 1).is_canonical());
        assert!(Shape::new(2, 1, 2, 1).is_canonical());
        assert_eq!(Shape::new(1, 2, 3, 4).rank(), 10);
        assert_eq!(Shape::new(usize::MAX, 1, 0, 0).checked_rank(), None);
        assert_eq!(Shape::new(usize::MAX, 1, 0, 0).rank(), usize::MAX);
    }

    #[test]
    fn test_name() {
        let key = CoefficientKey::new(Shape::new(0, 0, 2, 1), "alpha");
        assert_eq!(key.name(), "coefficient_2_1_0_0_alpha");
        assert_eq!(key.to_string(), key.name());
    }

    #[test]
    fn test_registry_get() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let a = registry.get(Shape::new(2, 0, 2, 0), "g");
        let b = registry.get(Shape::new(2, 0, 2, 0), "g");
        let c = registry.get(Shape::new(2, 0, 2, 0), "h");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);

        assert!(Arc::ptr_eq(
            &registry.find("coefficient_2_0_2_0_h").unwrap(),
            &c
        ));
        assert!(registry.find("coefficient_2_0_2_0_x").is_none());
    }

    #[test]
    fn test_snapshot_is_key_ordered() {
        let registry = Registry::new();
        registry.get(Shape::new(4, 0, 0, 0), "a");
        registry.get(Shape::new(2, 0, 2, 0), "b");
        registry.get(Shape::new(2, 0, 2, 0), "a");

        let keys: Vec<_> = registry.snapshot().iter().map(|c| c.key().clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys[0].id, "a");
        assert_eq!(keys[0].shape, Shape::new(2, 0, 2, 0));
    }

    #[test]
    fn test_complete() {
        let registry = Registry::new();
        let c = registry.get(Shape::new(1, 0, 0, 0), "v");
        assert!(!c.is_finished());
        assert!(registry.finished().is_empty());

        let tensor = Tensor::term(Expr::var("e1"), "v{a}".parse().unwrap());
        c.complete(tensor.clone()).unwrap();
        assert!(c.is_finished());
        assert_eq!(c.tensor(), tensor);
        assert_eq!(registry.finished().len(), 1);

        // A second completion is rejected and keeps the first value
        assert_eq!(
            c.complete(Tensor::zero()),
            Err(CoefficientError::AlreadyFinished(c.name().to_string()))
        );
        assert_eq!(c.tensor(), tensor);
    }

    #[test]
    fn test_observers_run_unlocked() {
        let registry = Registry::new();
        let c = registry.get(Shape::new(1, 0, 1, 0), "g");
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        c.register_observer(move |coefficient| {
            // The tensor lock must be free and the flag already visible
            assert!(coefficient.is_finished());
            let _guard = coefficient.lock();
            seen.fetch_add(1, Ordering::SeqCst);
        });

        c.complete(Tensor::scalar(Expr::Const(1.0))).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Observers fire only once
        let _ = c.complete(Tensor::zero());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_display() {
        let registry = Registry::new();
        let c = registry.get(Shape::new(1, 0, 0, 0), "v");
        colored::control::set_override(false);
        assert_eq!(c.to_string(), "coefficient_1_0_0_0_v [pending]: 0");
    }
}
