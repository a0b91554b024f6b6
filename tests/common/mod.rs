use peach::prelude::*;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

pub fn session(workers: usize) -> Session {
    init_tracing();
    Session::new(SolverConfig::default().with_workers(workers)).unwrap()
}

pub fn vector(scalar: &str) -> Tensor {
    Tensor::term(Expr::var(scalar), "x{a}".parse().unwrap())
}
