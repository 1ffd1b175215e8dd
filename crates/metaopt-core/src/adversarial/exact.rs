//! Exact gap searches over the single-level model.

use super::{AdversarialInputGenerator, ExactModel, GapInterval, GapResult};
use crate::encoders::Encoder;
use crate::error::{MetaOptError, Result};
use crate::solver::Solver;
use tracing::{debug, info};

/// Doubling/halving steps before giving up on bracketing the gap.
const MAX_SCALING_STEPS: usize = 64;
/// Bisection steps before accepting the current bracket.
const MAX_BISECTION_STEPS: usize = 200;

impl AdversarialInputGenerator {
    /// Demands maximizing `optimal − heuristic`.
    pub fn maximize_optimality_gap<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
    ) -> Result<GapResult>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        info!(optimal = optimal.name(), heuristic = heuristic.name(), "maximize optimality gap");
        let model = self.build(solver, optimal, heuristic)?;
        let solution = solver.maximize()?;
        let result = self.collect(solver, optimal, heuristic, &model, &solution)?;
        info!(gap = result.gap, "optimality gap found");
        Ok(result)
    }

    /// Any demands with a gap of at least `min_gap`.
    ///
    /// The returned gap is re-scored at the found demands with both
    /// schemes solved on their own, so it is exact for those demands.
    /// Fails with [`MetaOptError::InfeasibleOrUnbounded`] when none exist.
    pub fn find_optimality_gap_at_least<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
        min_gap: f64,
    ) -> Result<GapResult>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        if !min_gap.is_finite() {
            return Err(MetaOptError::invalid_parameter("min_gap", "must be finite"));
        }
        let model = self.build(solver, optimal, heuristic)?;
        let solution = solver.check_feasibility(min_gap)?;
        let found = self.collect(solver, optimal, heuristic, &model, &solution)?;
        self.rescore(solver, optimal, heuristic, found)
    }

    /// Bracket the maximum gap to relative width `interval_conf`.
    ///
    /// Doubles from `initial_gap` until a target is infeasible (or halves
    /// when the first probe already fails), then bisects until
    /// `(upper − lower) / lower ≤ interval_conf`. The model is built once;
    /// every probe is one feasibility check against it.
    pub fn find_maximum_gap_interval<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
        initial_gap: f64,
        interval_conf: f64,
    ) -> Result<GapInterval>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        if !(initial_gap.is_finite() && initial_gap > 0.0) {
            return Err(MetaOptError::invalid_parameter("initial_gap", "must be positive and finite"));
        }
        if !(interval_conf.is_finite() && interval_conf > 0.0) {
            return Err(MetaOptError::invalid_parameter("interval_conf", "must be positive and finite"));
        }
        info!(initial_gap, interval_conf, "bracketing maximum gap");
        let model = self.build(solver, optimal, heuristic)?;

        let mut probes = 0;
        let mut best: Option<GapResult> = None;
        let mut lower = 0.0;
        let mut upper;

        match self.probe(solver, optimal, heuristic, &model, initial_gap, &mut probes)? {
            Some(found) => {
                lower = found.gap.max(initial_gap);
                best = Some(found);
                let mut steps = 0;
                loop {
                    if steps == MAX_SCALING_STEPS {
                        return Err(MetaOptError::backend(format!(
                            "gap still feasible at {} after {} doublings",
                            lower, steps
                        )));
                    }
                    steps += 1;
                    let target = 2.0 * lower;
                    match self.probe(solver, optimal, heuristic, &model, target, &mut probes)? {
                        Some(found) => {
                            lower = found.gap.max(target);
                            best = Some(found);
                        }
                        None => {
                            upper = target;
                            break;
                        }
                    }
                }
            }
            None => {
                upper = initial_gap;
                for _ in 0..MAX_SCALING_STEPS {
                    let target = upper / 2.0;
                    match self.probe(solver, optimal, heuristic, &model, target, &mut probes)? {
                        Some(found) => {
                            lower = if found.gap < upper { found.gap.max(target) } else { target };
                            best = Some(found);
                            break;
                        }
                        None => upper = target,
                    }
                }
            }
        }

        if lower <= 0.0 {
            info!(upper, probes, "no positive gap found");
            lower = 0.0;
        }

        for _ in 0..MAX_BISECTION_STEPS {
            if lower <= 0.0 {
                break;
            }
            if (upper - lower) / lower <= interval_conf {
                break;
            }
            let mid = 0.5 * (lower + upper);
            match self.probe(solver, optimal, heuristic, &model, mid, &mut probes)? {
                Some(found) => {
                    lower = if found.gap < upper { found.gap.max(mid) } else { mid };
                    best = Some(found);
                }
                None => upper = mid,
            }
        }

        info!(lower, upper, probes, "maximum gap bracketed");
        let best = match best {
            Some(found) => Some(self.rescore(solver, optimal, heuristic, found)?),
            None => None,
        };
        Ok(GapInterval {
            lower,
            upper,
            best,
            probes,
        })
    }

    /// Solve both schemes at `found.demands` on their own.
    ///
    /// Under a feasibility check the optimal side of the embedded model is
    /// only feasible, so its total may sit below its optimum.
    fn rescore<S, O, H>(&mut self, solver: &mut S, optimal: &mut O, heuristic: &mut H, found: GapResult) -> Result<GapResult>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        let exact = self.evaluate_demands(solver, optimal, heuristic, &found.demands)?;
        debug!(embedded = found.gap, exact = exact.gap, "gap rescored");
        Ok(exact)
    }

    /// One feasibility check; `None` when no demands reach `target`.
    fn probe<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &O,
        heuristic: &H,
        model: &ExactModel<S::Var>,
        target: f64,
        probes: &mut usize,
    ) -> Result<Option<GapResult>>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        *probes += 1;
        match solver.check_feasibility(target) {
            Ok(solution) => {
                let found = self.collect(solver, optimal, heuristic, model, &solution)?;
                debug!(target, gap = found.gap, "probe feasible");
                Ok(Some(found))
            }
            Err(e) if e.is_infeasible() => {
                debug!(target, "probe infeasible");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adversarial::{AdversarialConfig, GeneratorState};
    use crate::encoders::OptimalEncoder;
    use crate::solver::LpSolver;
    use crate::topology::Topology;
    use approx::assert_abs_diff_eq;

    /// One link a→b (cap 4) plus a detour a→c→b (cap 4 each).
    fn detour() -> Topology {
        let mut t = Topology::new();
        t.add_edge("a", "b", 4.0).unwrap();
        t.add_edge("a", "c", 4.0).unwrap();
        t.add_edge("c", "b", 4.0).unwrap();
        t
    }

    fn ab() -> crate::topology::NodePair {
        ("a".to_string(), "b".to_string())
    }

    /// Only a→b carries traffic, so the gap is what the detour adds.
    fn config() -> AdversarialConfig {
        let mut cfg = AdversarialConfig::new().with_demand_ub(8.0);
        for pair in detour().reachable_pairs() {
            if pair != ("a".to_string(), "b".to_string()) {
                cfg = cfg.with_constrained_demand(pair, 0.0);
            }
        }
        cfg
    }

    #[test]
    fn test_gap_at_least_respects_target() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let mut gen = AdversarialInputGenerator::new(t, config()).unwrap();

        let found = gen
            .find_optimality_gap_at_least(&mut solver, &mut opt, &mut heur, 2.0)
            .unwrap();
        assert!(found.gap >= 2.0 - 1e-6);
        assert_eq!(gen.state(), GeneratorState::Solved);

        let err = gen
            .find_optimality_gap_at_least(&mut solver, &mut opt, &mut heur, 5.0)
            .unwrap_err();
        assert!(err.is_infeasible());
    }

    #[test]
    fn test_interval_brackets_maximum() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let mut gen = AdversarialInputGenerator::new(t, config()).unwrap();

        let interval = gen
            .find_maximum_gap_interval(&mut solver, &mut opt, &mut heur, 1.0, 0.1)
            .unwrap();
        assert!((interval.upper - interval.lower) / interval.lower <= 0.1 + 1e-9);
        assert!(interval.lower <= 4.0 + 1e-6);
        assert!(interval.upper > 4.0 - 1e-6);
        let best = interval.best.unwrap();
        assert!(best.gap >= interval.lower - 1e-6);
        assert_abs_diff_eq!(best.optimal.total_demand_met, best.demands[&ab()].min(8.0), epsilon = 1e-6);
    }

    #[test]
    fn test_gap_at_least_reports_exact_gap() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let mut gen = AdversarialInputGenerator::new(t, config()).unwrap();

        let found = gen
            .find_optimality_gap_at_least(&mut solver, &mut opt, &mut heur, 1.0)
            .unwrap();
        // The optimal side routes everything it can, not just enough for the target.
        let d = found.demands[&ab()];
        assert_abs_diff_eq!(found.optimal.total_demand_met, d.min(8.0), epsilon = 1e-6);
        assert_abs_diff_eq!(found.heuristic.total_demand_met, d.min(4.0), epsilon = 1e-6);
        let again = gen
            .evaluate_demands(&mut solver, &mut opt, &mut heur, &found.demands)
            .unwrap();
        assert_abs_diff_eq!(found.gap, again.gap, epsilon = 1e-6);
        assert!(found.gap >= 1.0 - 1e-6);
    }

    #[test]
    fn test_invalid_interval_parameters() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let mut gen = AdversarialInputGenerator::new(t, config()).unwrap();
        assert!(gen
            .find_maximum_gap_interval(&mut solver, &mut opt, &mut heur, 0.0, 0.1)
            .is_err());
        assert!(gen
            .find_maximum_gap_interval(&mut solver, &mut opt, &mut heur, 1.0, -1.0)
            .is_err());
        assert_eq!(gen.state(), GeneratorState::Idle);
    }
}
