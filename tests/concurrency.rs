//! Equations sharing coefficients under randomized completion timing.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use itertools::Itertools;
use peach::prelude::*;
use rand::Rng;

use common::{session, vector};

fn pause(rng: &mut impl Rng) {
    let micros = rng.random_range(0..150u64);
    if micros > 0 {
        thread::sleep(Duration::from_micros(micros));
    }
}

/// Every coefficient holds the same single non-zero term.
fn assert_unified(coefficients: &[Arc<Coefficient>]) {
    let first = coefficients[0].tensor();
    assert_eq!(first.terms().len(), 1, "{first}");
    for coefficient in coefficients {
        assert!(coefficient.is_finished());
        assert_eq!(coefficient.tensor(), first, "{}", coefficient.name());
    }
}

#[test]
fn shared_coefficient_under_random_timing() {
    let shape = Shape::new(1, 0, 0, 0);

    for trial in 0..1000 {
        let session = session(2);
        let s = session.registry().get(shape, &format!("S{trial}"));
        let a = session.registry().get(shape, &format!("A{trial}"));
        let b = session.registry().get(shape, &format!("B{trial}"));

        let completers = [
            (Arc::clone(&s), format!("s{trial}")),
            (Arc::clone(&a), format!("a{trial}")),
            (Arc::clone(&b), format!("b{trial}")),
        ]
        .into_iter()
        .map(|(coefficient, scalar)| {
            thread::spawn(move || {
                pause(&mut rand::rng());
                coefficient.complete(vector(&scalar)).unwrap();
            })
        })
        .collect_vec();

        // Equations race against the completions
        let mut rng = rand::rng();
        pause(&mut rng);
        let first = session
            .equation(&format!("#<S{trial}:1:0:0:0:{{a}}> - #<A{trial}:1:0:0:0:{{a}}>"))
            .unwrap();
        pause(&mut rng);
        let second = session
            .equation(&format!("#<S{trial}:0:0:1:0:{{a}}> - #<B{trial}:1:0:0:0:{{a}}>"))
            .unwrap();

        for completer in completers {
            completer.join().unwrap();
        }
        first.wait().unwrap();
        second.wait().unwrap();

        assert!(first.is_solved(), "trial {trial}");
        assert!(second.is_solved(), "trial {trial}");
        assert_unified(&[s, a, b]);
    }
}

#[test]
fn result_does_not_depend_on_completion_order() {
    let shape = Shape::new(1, 0, 0, 0);

    for order in (0..3).permutations(3) {
        let session = session(2);
        let ids = ["p", "q", "r"];
        let equations = [
            session.equation("#<p:1:0:0:0:{a}> - #<q:1:0:0:0:{a}>").unwrap(),
            session.equation("#<q:1:0:0:0:{a}> - #<r:1:0:0:0:{a}>").unwrap(),
        ];
        let coefficients = ids
            .iter()
            .map(|id| session.registry().get(shape, id))
            .collect_vec();

        for &i in &order {
            coefficients[i]
                .complete(vector(&format!("e_{}", ids[i])))
                .unwrap();
        }
        for equation in &equations {
            equation.wait().unwrap();
            assert!(equation.is_solved(), "{order:?}");
        }

        assert_unified(&coefficients);
        let remaining = coefficients[0].tensor().terms()[0].scalar.variables();
        assert_eq!(remaining.len(), 1, "{order:?}");
    }
}

#[test]
fn failed_solve_leaves_pool_usable() {
    let session = session(1);
    let shape = Shape::new(1, 0, 0, 0);
    let v = session.registry().get(shape, "v");
    v.complete(vector("e1")).unwrap();

    let broken = session.equation("unknown_function(#<v:1:0:0:0:{a}>)").unwrap();
    assert!(broken.wait().is_err());
    assert!(broken.is_failed());
    assert_eq!(v.tensor(), vector("e1"));

    let fine = session.equation("#<v:1:0:0:0:{a}> - #<w:1:0:0:0:{a}>").unwrap();
    session.registry().get(shape, "w").complete(vector("e2")).unwrap();
    fine.wait().unwrap();
    assert!(fine.is_solved());
    assert_eq!(v.tensor(), session.registry().get(shape, "w").tensor());
}

#[test]
fn many_equations_on_one_coefficient() {
    let session = session(4);
    let shape = Shape::new(1, 0, 0, 0);

    let equations = (0..32)
        .map(|i| {
            session
                .equation(&format!("#<hub:1:0:0:0:{{a}}> - #<leaf{i}:1:0:0:0:{{a}}>"))
                .unwrap()
        })
        .collect_vec();

    let mut coefficients = vec![session.registry().get(shape, "hub")];
    coefficients.extend((0..32).map(|i| session.registry().get(shape, &format!("leaf{i}"))));

    let handles = coefficients
        .iter()
        .enumerate()
        .map(|(i, coefficient)| {
            let coefficient = Arc::clone(coefficient);
            thread::spawn(move || {
                pause(&mut rand::rng());
                coefficient.complete(vector(&format!("e{i}"))).unwrap();
            })
        })
        .collect_vec();
    for handle in handles {
        handle.join().unwrap();
    }

    for equation in &equations {
        equation.wait().unwrap();
        assert!(equation.is_solved());
    }
    assert_unified(&coefficients);
}

#[test]
fn single_tag_equations_solve() {
    let session = session(4);
    let shape = Shape::new(1, 0, 0, 0);

    let equations = (0..16)
        .map(|i| session.equation(&format!("#<c{i}:1:0:0:0:{{a}}>")).unwrap())
        .collect_vec();
    assert!(equations.iter().all(|eq| !eq.is_empty()));

    let coefficients = (0..16)
        .map(|i| session.registry().get(shape, &format!("c{i}")))
        .collect_vec();
    let handles = coefficients
        .iter()
        .enumerate()
        .map(|(i, coefficient)| {
            let coefficient = Arc::clone(coefficient);
            thread::spawn(move || {
                pause(&mut rand::rng());
                let scalar = Expr::var(&format!("e{i}")) - Expr::Const(i as f64);
                coefficient
                    .complete(Tensor::term(scalar, "x{a}".parse().unwrap()))
                    .unwrap();
            })
        })
        .collect_vec();
    for handle in handles {
        handle.join().unwrap();
    }

    for equation in &equations {
        equation.wait().unwrap();
        assert!(equation.is_solved());
    }
    // Each coefficient had to vanish on its own
    assert!(coefficients.iter().all(|c| c.tensor().is_zero()));
}

#[test]
fn equation_without_tags_never_solves() {
    let session = session(2);
    let u = session.registry().get(Shape::new(1, 0, 0, 0), "u");
    u.complete(vector("e1")).unwrap();

    let eq = session.equation("e1 - 5").unwrap();
    assert!(eq.is_empty());
    eq.wait().unwrap();
    thread::sleep(Duration::from_millis(20));
    assert!(eq.is_waiting());
    assert_eq!(u.tensor(), vector("e1"));
}
