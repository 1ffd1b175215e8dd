//! Integration tests for the KKT and primal-dual certificates.
//!
//! Each test builds an inner LP, certifies its optimality through one of
//! the generators and then drives the outer objective somewhere else: the
//! certificate alone must keep the inner variables at the inner optimum.

mod common;

use approx::assert_abs_diff_eq;
use metaopt_core::demand::DemandVariables;
use metaopt_core::encoders::{Encoder, OptimalEncoder};
use metaopt_core::inner::{Certificate, EncodingOptions, InnerProblem};
use metaopt_core::kkt::KktGenerator;
use metaopt_core::polynomial::Polynomial;
use metaopt_core::solver::{LpSolver, LpVar, Solver, VarType};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Toy LP: maximize y − x  s.t.  x + 2y = 10, x ≥ 0, y ≥ 0
// ---------------------------------------------------------------------------

fn toy_vars(solver: &mut LpSolver) -> (LpVar, LpVar) {
    let x = solver
        .create_variable("x", VarType::Continuous, f64::NEG_INFINITY, f64::INFINITY)
        .expect("create x");
    let y = solver
        .create_variable("y", VarType::Continuous, f64::NEG_INFINITY, f64::INFINITY)
        .expect("create y");
    (x, y)
}

fn toy_constraints(x: LpVar, y: LpVar) -> (Vec<Polynomial<LpVar>>, Polynomial<LpVar>) {
    let leq = vec![Polynomial::linear(-1.0, x), Polynomial::linear(-1.0, y)];
    let eq = Polynomial::var(x)
        .add(&Polynomial::linear(2.0, y))
        .add(&Polynomial::constant(-10.0));
    (leq, eq)
}

/// The KKT system pins the toy LP to its closed-form optimum x = 0, y = 5
/// for every outer objective.
#[test]
fn kkt_toy_lp_matches_closed_form() {
    common::init_tracing();
    for outer in [1.0, -1.0] {
        let mut solver = LpSolver::new();
        let (x, y) = toy_vars(&mut solver);
        let (leq, eq) = toy_constraints(x, y);
        let mut inner = InnerProblem::new(&EncodingOptions::kkt(), HashSet::new(), HashSet::new()).unwrap();
        for g in leq {
            inner.add_leq_zero(g).unwrap();
        }
        inner.add_eq_zero(eq).unwrap();
        let objective = Polynomial::var(y).sub(&Polynomial::var(x));
        inner
            .add_maximization_constraints(&mut solver, &objective, false)
            .unwrap();

        let sol = solver
            .maximize_objective(&Polynomial::linear(outer, x))
            .expect("KKT system is feasible");
        assert_abs_diff_eq!(solver.value(&sol, &x).unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solver.value(&sol, &y).unwrap(), 5.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solver.evaluate(&sol, &objective).unwrap(), 5.0, epsilon = 1e-6);
    }
}

/// λ_i · g_i = 0 for every inequality, and a strictly slack constraint has λ_i = 0.
#[test]
fn kkt_complementary_slackness_holds() {
    let mut solver = LpSolver::new();
    let (x, y) = toy_vars(&mut solver);
    let (leq, eq) = toy_constraints(x, y);
    let mut kkt = KktGenerator::new(HashSet::new());
    for g in &leq {
        kkt.add_leq_zero(g.clone()).unwrap();
    }
    // A constraint that is slack at the optimum: y − 7 ≤ 0
    kkt.add_leq_zero(Polynomial::var(y).add(&Polynomial::constant(-7.0))).unwrap();
    kkt.add_eq_zero(eq).unwrap();
    let objective = Polynomial::var(y).sub(&Polynomial::var(x));
    let multipliers = kkt
        .add_maximization_constraints(&mut solver, &objective, false)
        .unwrap();

    let sol = solver.maximize_objective(&Polynomial::var(y)).unwrap();
    for (g, lambda) in kkt.leq_constraints().iter().zip(&multipliers.lambdas) {
        let lambda = lambda.expect("every inequality is non-constant");
        let slack = solver.evaluate(&sol, g).unwrap();
        let l = solver.value(&sol, &lambda).unwrap();
        assert!(l >= -1e-7, "λ must be non-negative, got {l}");
        assert!(slack <= 1e-7, "primal infeasible: {slack}");
        assert!((l * slack).abs() < 1e-6, "λ·g = {} for {}", l * slack, g);
        if slack < -1e-6 {
            assert_abs_diff_eq!(l, 0.0, epsilon = 1e-6);
        }
    }
}

// ---------------------------------------------------------------------------
// KKT vs primal-dual
// ---------------------------------------------------------------------------

/// Both certificates on the same flow LP give the same inner optimum. The
/// outer objective is constant, so whichever point the certificate admits
/// first is returned.
#[test]
fn kkt_and_primal_dual_agree_on_flow_lp() {
    let topo = common::diamond();
    let demands: std::collections::BTreeMap<_, _> = topo
        .reachable_pairs()
        .into_iter()
        .map(|p| {
            let v = if p == common::pair("a", "d") { 15.0 } else { 3.0 };
            (p, v)
        })
        .collect();

    let mut totals = Vec::new();
    for options in [EncodingOptions::kkt(), EncodingOptions::primal_dual().with_num_threads(2)] {
        let mut solver = LpSolver::new();
        let mut enc = OptimalEncoder::new(&solver, &topo, 2).unwrap();
        let fixed = DemandVariables::fixed(&demands);
        let encoding = enc.encoding(&mut solver, &fixed, &options).unwrap();
        match (&encoding.certificate, options.inner) {
            (Certificate::Kkt(m), metaopt_core::InnerEncoding::Kkt) => assert!(m.num_created() > 0),
            (Certificate::PrimalDual(d), metaopt_core::InnerEncoding::PrimalDual) => assert!(d.num_created() > 0),
            (other, inner) => panic!("unexpected certificate {:?} for {:?}", other, inner),
        }
        let sol = solver
            .maximize_objective(&Polynomial::constant(0.0))
            .expect("certified model is feasible");
        let out = enc.solution(&solver, &sol).unwrap();
        assert!(out.max_flow_imbalance() < 1e-6);
        totals.push(out.total_demand_met);
    }
    // Single-hop demands (4 × 3) keep their links; a→d gets 7 on each path.
    assert_abs_diff_eq!(totals[0], totals[1], epsilon = 1e-6);
    assert_abs_diff_eq!(totals[0], 26.0, epsilon = 1e-6);
}

// ---------------------------------------------------------------------------
// CleanAll
// ---------------------------------------------------------------------------

/// Rebuilding an identical encoding after `clean_all` gives the same optimum.
#[test]
fn clean_all_then_rebuild_is_idempotent() {
    let topo = common::diamond();
    let mut solver = LpSolver::new();
    let mut enc = OptimalEncoder::new(&solver, &topo, 2).unwrap();
    let pairs = topo.reachable_pairs();

    let mut objectives = Vec::new();
    for _ in 0..2 {
        solver.clean_all();
        assert_eq!(solver.num_variables(), 0);
        let demands = DemandVariables::continuous(&mut solver, &pairs, 8.0).unwrap();
        let encoding = enc
            .encoding(&mut solver, &demands, &EncodingOptions::feasibility_only())
            .unwrap();
        let sol = solver.maximize_objective(&encoding.objective).unwrap();
        objectives.push(solver.objective_value(&sol));
    }
    assert_abs_diff_eq!(objectives[0], objectives[1], epsilon = 1e-9);
}

/// Handles from before `clean_all` are rejected instead of aliasing new columns.
#[test]
fn stale_variables_rejected_after_clean_all() {
    let mut solver = LpSolver::new();
    let x = solver
        .create_variable("x", VarType::Continuous, 0.0, 1.0)
        .unwrap();
    solver.clean_all();
    let err = solver.add_leq_zero(&Polynomial::var(x)).unwrap_err();
    assert!(matches!(err, metaopt_core::MetaOptError::Configuration { .. }));
}
