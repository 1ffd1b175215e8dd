//! Demand pinning: demands at or below a threshold ride their shortest
//! path in full, everything else is routed optimally on the remaining
//! capacity.
//!
//! Whether a demand is pinned is an outer decision `pin_p ∈ {0, 1}` tied to
//! the demand by
//!
//! ```text
//! pin = 1  ⇒  d ≤ T        d − T − M(1 − pin) ≤ 0
//! pin = 0  ⇒  d ≥ T        T − d − M·pin ≤ 0
//! ```
//!
//! and inside the inner problem it acts as a designated binary:
//!
//! ```text
//! d − f ≤ M(1 − pin)                 pinned demand fully served
//! x_q ≤ M(1 − pin)                   no flow off the shortest path
//! ```
//!
//! At `d = T` both settings are admissible.

use super::flow::{build_flow, solution_shell, FlowModel};
use super::{ensure_same_solver, not_encoded, Encoder, OptimizationEncoding, OptimizationSolution};
use crate::demand::DemandVariables;
use crate::error::{MetaOptError, Result};
use crate::inner::{EncodingOptions, InnerProblem};
use crate::polynomial::{Polynomial, Term, Variable};
use crate::solver::{Solver, SolverId, VarType};
use crate::topology::{NodePair, Path, Topology};
use std::collections::BTreeMap;
use tracing::debug;

/// Demand-pinning heuristic.
#[derive(Debug, Clone)]
pub struct DemandPinningEncoder<V> {
    solver_id: SolverId,
    topology: Topology,
    threshold: f64,
    big_m: f64,
    paths: BTreeMap<NodePair, Vec<Path>>,
    model: Option<FlowModel<V>>,
    pins: BTreeMap<NodePair, Polynomial<V>>,
    demands: Option<DemandVariables<V>>,
}

impl<V: Variable> DemandPinningEncoder<V> {
    /// Pin demands `≤ threshold`; the rest use up to `k` shortest paths.
    ///
    /// Big-M defaults to ten times the total capacity.
    pub fn new<S>(solver: &S, topology: &Topology, threshold: f64, k: usize) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        if !(threshold.is_finite() && threshold >= 0.0) {
            return Err(MetaOptError::invalid_parameter("threshold", "must be finite and non-negative"));
        }
        if k == 0 {
            return Err(MetaOptError::invalid_parameter("k", "must be at least 1"));
        }
        Ok(Self {
            solver_id: solver.id(),
            topology: topology.clone(),
            threshold,
            big_m: 10.0 * topology.total_capacity(),
            paths: topology.compute_paths(crate::topology::PathType::KShortest, k)?,
            model: None,
            pins: BTreeMap::new(),
            demands: None,
        })
    }

    pub fn with_big_m(mut self, big_m: f64) -> Result<Self> {
        if !(big_m.is_finite() && big_m > 0.0) {
            return Err(MetaOptError::invalid_parameter("big_m", "must be positive and finite"));
        }
        self.big_m = big_m;
        Ok(self)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn big_m(&self) -> f64 {
        self.big_m
    }

    /// Which pairs were pinned in `solution`
    pub fn pinned<S>(&self, solver: &S, solution: &S::Solution) -> Result<BTreeMap<NodePair, bool>>
    where
        S: Solver<Var = V>,
    {
        self.pins
            .iter()
            .map(|(pair, pin)| Ok((pair.clone(), solver.evaluate(solution, pin)? > 0.5)))
            .collect()
    }

    /// Pin indicator per pair; a constant when the demand is a constant
    fn pin_for<S>(&self, solver: &mut S, pair: &NodePair, demand: &Polynomial<V>) -> Result<(Polynomial<V>, Option<V>)>
    where
        S: Solver<Var = V>,
    {
        if demand.variables().is_empty() {
            let pinned = demand.constant_value() <= self.threshold;
            return Ok((Polynomial::constant(if pinned { 1.0 } else { 0.0 }), None));
        }
        let pin = solver.create_variable(&format!("pin[{},{}]", pair.0, pair.1), VarType::Binary, 0.0, 1.0)?;
        let m = self.big_m;
        let pp = Polynomial::var(pin.clone());
        // d − T − M + M·pin ≤ 0
        solver.add_leq_zero(
            &demand
                .add(&Polynomial::constant(-self.threshold - m))
                .with_term(Term::linear(m, pin.clone())),
        )?;
        // T − d − M·pin ≤ 0
        solver.add_leq_zero(
            &Polynomial::constant(self.threshold)
                .sub(demand)
                .sub(&pp.scale(m)),
        )?;
        Ok((pp, Some(pin)))
    }
}

impl<S: Solver> Encoder<S> for DemandPinningEncoder<S::Var> {
    fn name(&self) -> &str {
        "demand_pinning"
    }

    fn solver_id(&self) -> SolverId {
        self.solver_id
    }

    fn encoding(
        &mut self,
        solver: &mut S,
        demands: &DemandVariables<S::Var>,
        options: &EncodingOptions,
    ) -> Result<OptimizationEncoding<S::Var>> {
        ensure_same_solver(self.solver_id, solver, "demand_pinning")?;
        options.validate()?;
        let pairs: Vec<NodePair> = demands.pairs().cloned().collect();
        for pair in &pairs {
            demands.demand(pair)?;
        }

        let mut pins = BTreeMap::new();
        let mut constants = demands.designated_set();
        let mut binaries = demands.binary_set();
        for pair in &pairs {
            if !self.paths.get(pair).is_some_and(|p| !p.is_empty()) {
                continue;
            }
            let (pin, var) = self.pin_for(solver, pair, demands.demand(pair)?)?;
            if let Some(v) = var {
                constants.insert(v.clone());
                binaries.insert(v);
            }
            pins.insert(pair.clone(), pin);
        }

        let mut inner = InnerProblem::new(options, constants, binaries)?;
        let model = build_flow(solver, &mut inner, "dp", &self.topology, &self.paths, &pairs, demands)?;

        let m = self.big_m;
        for (pair, pin) in &pins {
            let (Some(f), Some(vars)) = (model.flows.get(pair), model.path_flows.get(pair)) else {
                continue;
            };
            // M(1 − pin) = M − M·pin
            let slack = Polynomial::constant(m).sub(&pin.scale(m));
            let demand = demands.demand(pair)?;
            inner.add_leq_zero(demand.sub(&Polynomial::var(f.clone())).sub(&slack))?;
            for (_, x) in vars.iter().skip(1) {
                inner.add_leq_zero(Polynomial::var(x.clone()).sub(&slack))?;
            }
        }

        let objective = Polynomial::var(model.total.clone());
        let num_constraints = inner.num_constraints();
        let certificate = inner.add_maximization_constraints(solver, &objective, options.skip_optimality)?;
        debug!(
            encoder = "demand_pinning",
            threshold = self.threshold,
            pins = pins.len(),
            num_constraints,
            "encoded"
        );

        self.model = Some(model);
        self.pins = pins;
        self.demands = Some(demands.clone());
        Ok(OptimizationEncoding {
            objective,
            demands: demands.clone(),
            certificate,
            num_constraints,
        })
    }

    fn solution(&self, solver: &S, solution: &S::Solution) -> Result<OptimizationSolution> {
        let (Some(model), Some(demands)) = (&self.model, &self.demands) else {
            return Err(not_encoded("demand_pinning"));
        };
        let mut out = solution_shell(solver, solution, demands)?;
        out.total_demand_met = model.collect(solver, solution, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::LpSolver;
    use approx::assert_abs_diff_eq;

    /// a→b direct (cap 10) and a→c→b (cap 10 each); c→b also carries c's own demand.
    fn triangle() -> Topology {
        let mut t = Topology::new();
        t.add_edge("a", "b", 10.0).unwrap();
        t.add_edge("a", "c", 10.0).unwrap();
        t.add_edge("c", "b", 10.0).unwrap();
        t
    }

    fn demands(ab: f64, cb: f64) -> BTreeMap<NodePair, f64> {
        let mut m = BTreeMap::new();
        for p in triangle().reachable_pairs() {
            m.insert(p, 0.0);
        }
        m.insert(("a".into(), "b".into()), ab);
        m.insert(("c".into(), "b".into()), cb);
        m
    }

    fn solve(ab: f64, cb: f64, threshold: f64) -> OptimizationSolution {
        let t = triangle();
        let mut solver = LpSolver::new();
        let mut enc = DemandPinningEncoder::new(&solver, &t, threshold, 2).unwrap();
        let d = DemandVariables::fixed(&demands(ab, cb));
        let e = enc
            .encoding(&mut solver, &d, &EncodingOptions::feasibility_only())
            .unwrap();
        let sol = solver.maximize_objective(&e.objective).unwrap();
        enc.solution(&solver, &sol).unwrap()
    }

    #[test]
    fn test_large_demands_use_both_paths() {
        let out = solve(15.0, 0.0, 5.0);
        assert_abs_diff_eq!(out.total_demand_met, 15.0, epsilon = 1e-6);
        assert!(out.max_flow_imbalance() < 1e-6);
    }

    #[test]
    fn test_pinned_demand_stays_on_shortest_path() {
        // a→b pinned (4 ≤ 5) so it may not use a→c→b even though c→b is idle.
        let out = solve(4.0, 0.0, 5.0);
        let paths = &out.path_flows[&("a".to_string(), "b".to_string())];
        assert_eq!(paths[0].path.hops(), 1);
        assert_abs_diff_eq!(paths[0].flow, 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(paths[1].flow, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_outer_pin_follows_threshold() {
        let t = triangle();
        let mut solver = LpSolver::new();
        let mut enc = DemandPinningEncoder::new(&solver, &t, 5.0, 2).unwrap();
        let pairs = t.reachable_pairs();
        let d = DemandVariables::continuous(&mut solver, &pairs, 20.0).unwrap();
        let e = enc
            .encoding(&mut solver, &d, &EncodingOptions::feasibility_only())
            .unwrap();
        // Fix a→b at 3 and maximize: pinned, so its flow must equal the demand.
        let ab = d.demand(&("a".into(), "b".into())).unwrap().clone();
        solver.add_eq_zero(&ab.add(&Polynomial::constant(-3.0))).unwrap();
        let sol = solver.maximize_objective(&e.objective).unwrap();
        let out = enc.solution(&solver, &sol).unwrap();
        let pinned = enc.pinned(&solver, &sol).unwrap();
        assert!(pinned[&("a".to_string(), "b".to_string())]);
        let flows = &out.path_flows[&("a".to_string(), "b".to_string())];
        assert_abs_diff_eq!(flows[0].flow, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(flows[1].flow, 0.0, epsilon = 1e-6);
    }
}
