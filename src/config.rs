//! Solver configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! - `PEACH_WORKERS`: number of worker threads solving equations
//! - `PEACH_THREAD_NAME`: name prefix of the worker threads
//!
//! Values that fail to parse fall back to the defaults.

use std::env;

pub const WORKERS_ENV: &str = "PEACH_WORKERS";
pub const THREAD_NAME_ENV: &str = "PEACH_THREAD_NAME";

/// Settings of a solving [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverConfig {
    /// Number of worker threads. At least one thread is always started.
    pub workers: usize,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8),
            thread_name: "peach-solver".to_string(),
        }
    }
}

impl SolverConfig {
    /// Reads the configuration from the environment, starting from the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let workers = lookup(WORKERS_ENV)
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(d.workers);
        let thread_name = lookup(THREAD_NAME_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(d.thread_name);
        Self {
            workers,
            thread_name,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_thread_name(mut self, thread_name: &str) -> Self {
        self.thread_name = thread_name.to_string();
        self
    }
}
