//! Black-box gap searches over concrete demand matrices.
//!
//! Nothing here is embedded: every candidate is scored by solving the
//! optimal and the heuristic problem separately with the demands fixed.

use super::{AdversarialInputGenerator, GapResult, GeneratorState, ProgressSink, SearchConfig, SearchOutcome};
use crate::demand::{DemandMode, DemandVariables};
use crate::encoders::{Encoder, OptimizationSolution};
use crate::error::{MetaOptError, Result};
use crate::inner::EncodingOptions;
use crate::solver::Solver;
use crate::topology::NodePair;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Gaps within this of each other count as equal.
const IMPROVEMENT_EPS: f64 = 1e-9;

/// Demand domain of one search.
struct Sampler {
    pairs: Vec<NodePair>,
    ub: f64,
    levels: Option<Vec<f64>>,
    fixed: BTreeMap<NodePair, f64>,
    density: f64,
    step: Normal<f64>,
    rng: StdRng,
}

impl Sampler {
    fn random(&mut self) -> BTreeMap<NodePair, f64> {
        let mut out = BTreeMap::new();
        for pair in &self.pairs {
            let value = if self.rng.gen::<f64>() < self.density {
                match &self.levels {
                    Some(levels) => levels[self.rng.gen_range(0..levels.len())],
                    None => self.rng.gen_range(0.0..=self.ub),
                }
            } else {
                0.0
            };
            out.insert(pair.clone(), value);
        }
        self.pin(out)
    }

    /// Gaussian step on every demand, clamped to `[0, ub]`; `ub` is the
    /// top level in quantized mode
    fn neighbor(&mut self, current: &BTreeMap<NodePair, f64>) -> BTreeMap<NodePair, f64> {
        let mut out = BTreeMap::new();
        for (pair, &value) in current {
            let moved = (value + self.step.sample(&mut self.rng)).clamp(0.0, self.ub);
            out.insert(pair.clone(), self.snap(moved));
        }
        self.pin(out)
    }

    /// Nearest admissible value (zero or a level) in quantized mode
    fn snap(&self, value: f64) -> f64 {
        let Some(levels) = &self.levels else {
            return value;
        };
        levels
            .iter()
            .copied()
            .chain(std::iter::once(0.0))
            .fold(0.0, |best, l| if (l - value).abs() < (best - value).abs() { l } else { best })
    }

    fn pin(&self, mut demands: BTreeMap<NodePair, f64>) -> BTreeMap<NodePair, f64> {
        for (pair, &value) in &self.fixed {
            demands.insert(pair.clone(), value);
        }
        demands
    }
}

/// Best-so-far bookkeeping shared by the three searches.
struct Tracker<'a> {
    start: Instant,
    timeout: Option<Duration>,
    best: Option<GapResult>,
    trials: usize,
    timed_out: bool,
    progress: &'a mut dyn ProgressSink,
}

impl Tracker<'_> {
    fn expired(&mut self) -> bool {
        if self.best.is_none() {
            return false;
        }
        if let Some(limit) = self.timeout {
            if self.start.elapsed() >= limit {
                self.timed_out = true;
            }
        }
        self.timed_out
    }

    fn best_gap(&self) -> f64 {
        self.best.as_ref().map_or(f64::NEG_INFINITY, |b| b.gap)
    }

    /// Count a trial and keep it if it beats the best so far
    fn offer(&mut self, result: &GapResult) -> Result<()> {
        self.trials += 1;
        if result.gap > self.best_gap() + IMPROVEMENT_EPS {
            self.best = Some(result.clone());
            self.progress.record(self.start.elapsed(), result.gap)?;
            debug!(trial = self.trials, gap = result.gap, "new best");
        }
        Ok(())
    }

    fn finish(self, method: &str) -> Result<SearchOutcome> {
        let elapsed = self.start.elapsed();
        let best = self
            .best
            .ok_or_else(|| MetaOptError::backend(format!("{} evaluated no demands", method)))?;
        if self.timed_out {
            warn!(method, elapsed_ms = elapsed.as_millis() as u64, gap = best.gap, "search timed out");
        }
        info!(method, trials = self.trials, gap = best.gap, "search finished");
        Ok(SearchOutcome {
            best,
            trials: self.trials,
            elapsed,
            timed_out: self.timed_out,
        })
    }
}

impl AdversarialInputGenerator {
    /// Score `demands` by solving both schemes with the demands fixed.
    pub fn evaluate_demands<S, O, H>(
        &self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
        demands: &BTreeMap<NodePair, f64>,
    ) -> Result<GapResult>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        self.check_inputs(solver, optimal, heuristic)?;
        let fixed = DemandVariables::fixed(demands);
        let opt = solve_fixed(solver, optimal, &fixed, self.config.timeout)?;
        let heur = solve_fixed(solver, heuristic, &fixed, self.config.timeout)?;
        Ok(GapResult {
            gap: opt.total_demand_met - heur.total_demand_met,
            optimal: opt,
            heuristic: heur,
            demands: demands.clone(),
        })
    }

    /// Independent random demand matrices.
    pub fn random_search<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
        search: &SearchConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<SearchOutcome>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        let mut sampler = self.sampler(solver, optimal, heuristic, search)?;
        let mut tracker = self.tracker(search, progress);
        info!(trials = search.num_trials, "random search");

        for _ in 0..search.num_trials {
            if tracker.expired() {
                break;
            }
            let demands = sampler.random();
            let result = self.evaluate_demands(solver, optimal, heuristic, &demands)?;
            tracker.offer(&result)?;
        }
        self.transition(GeneratorState::Solved);
        tracker.finish("random")
    }

    /// First-improvement hill climbing with random restarts.
    ///
    /// Each restart climbs until a sweep of `num_neighbors` neighbors
    /// finds nothing strictly better.
    pub fn hill_climbing<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
        search: &SearchConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<SearchOutcome>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        let mut sampler = self.sampler(solver, optimal, heuristic, search)?;
        let mut tracker = self.tracker(search, progress);
        info!(restarts = search.num_trials, neighbors = search.num_neighbors, "hill climbing");

        'restarts: for restart in 0..search.num_trials {
            if tracker.expired() {
                break;
            }
            let mut current = self.evaluate_demands(solver, optimal, heuristic, &sampler.random())?;
            tracker.offer(&current)?;
            loop {
                if tracker.expired() {
                    break 'restarts;
                }
                let mut improved = false;
                for _ in 0..search.num_neighbors {
                    let candidate = sampler.neighbor(&current.demands);
                    let result = self.evaluate_demands(solver, optimal, heuristic, &candidate)?;
                    tracker.offer(&result)?;
                    if result.gap > current.gap + IMPROVEMENT_EPS {
                        current = result;
                        improved = true;
                        break;
                    }
                }
                if !improved {
                    debug!(restart, gap = current.gap, "local optimum");
                    break;
                }
            }
        }
        self.transition(GeneratorState::Solved);
        tracker.finish("hill_climbing")
    }

    /// Simulated annealing with geometric cooling and restarts.
    ///
    /// Runs `num_trials` temperature levels of `steps_per_temperature`
    /// moves each. A worse neighbor is accepted with probability
    /// `exp((neighbor − current) / T)`. After `no_improvement_restart`
    /// moves without a new best, the walk restarts from a random point.
    pub fn simulated_annealing<S, O, H>(
        &mut self,
        solver: &mut S,
        optimal: &mut O,
        heuristic: &mut H,
        search: &SearchConfig,
        progress: &mut dyn ProgressSink,
    ) -> Result<SearchOutcome>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        let mut sampler = self.sampler(solver, optimal, heuristic, search)?;
        let mut tracker = self.tracker(search, progress);
        info!(
            levels = search.num_trials,
            temperature = search.initial_temperature,
            decay = search.temperature_decay,
            "simulated annealing"
        );

        let mut current = self.evaluate_demands(solver, optimal, heuristic, &sampler.random())?;
        tracker.offer(&current)?;
        let mut temperature = search.initial_temperature;
        let mut stale = 0;

        for _ in 0..search.num_trials {
            if tracker.expired() {
                break;
            }
            for _ in 0..search.steps_per_temperature {
                let candidate = sampler.neighbor(&current.demands);
                let result = self.evaluate_demands(solver, optimal, heuristic, &candidate)?;
                let before = tracker.best_gap();
                tracker.offer(&result)?;
                if tracker.best_gap() > before {
                    stale = 0;
                } else {
                    stale += 1;
                }

                let delta = result.gap - current.gap;
                if delta > 0.0 || sampler.rng.gen::<f64>() < (delta / temperature).exp() {
                    current = result;
                }

                if stale >= search.no_improvement_restart {
                    debug!(temperature, best = tracker.best_gap(), "restart");
                    current = self.evaluate_demands(solver, optimal, heuristic, &sampler.random())?;
                    tracker.offer(&current)?;
                    stale = 0;
                }
            }
            temperature *= search.temperature_decay;
        }
        self.transition(GeneratorState::Solved);
        tracker.finish("simulated_annealing")
    }

    fn sampler<S, O, H>(&mut self, solver: &S, optimal: &O, heuristic: &H, search: &SearchConfig) -> Result<Sampler>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        search.validate()?;
        let pairs = self.check_inputs(solver, optimal, heuristic)?;
        self.transition(GeneratorState::Idle);
        // Quantized demands range over their levels, whatever `demand_ub` says.
        let (ub, levels) = match &self.config.demand_mode {
            DemandMode::Continuous => (self.demand_ub(), None),
            DemandMode::Quantized { levels } => (levels.iter().copied().fold(0.0, f64::max), Some(levels.clone())),
        };
        let step = Normal::new(0.0, search.std_dev * ub)
            .map_err(|e| MetaOptError::invalid_parameter("std_dev", e.to_string()))?;
        let rng = match search.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Sampler {
            pairs,
            ub,
            levels,
            fixed: self.config.constrained_demands.clone(),
            density: search.density,
            step,
            rng,
        })
    }

    fn tracker<'a>(&self, search: &SearchConfig, progress: &'a mut dyn ProgressSink) -> Tracker<'a> {
        Tracker {
            start: Instant::now(),
            timeout: search.timeout,
            best: None,
            trials: 0,
            timed_out: false,
            progress,
        }
    }
}

/// Maximize one encoder alone on a fresh model with fixed demands.
fn solve_fixed<S, E>(
    solver: &mut S,
    encoder: &mut E,
    demands: &DemandVariables<S::Var>,
    timeout: Option<Duration>,
) -> Result<OptimizationSolution>
where
    S: Solver,
    E: Encoder<S> + ?Sized,
{
    solver.clean_all();
    solver.set_timeout(timeout);
    let encoding = encoder.encoding(solver, demands, &EncodingOptions::feasibility_only())?;
    let solution = solver.maximize_objective(&encoding.objective)?;
    encoder.solution(solver, &solution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adversarial::{AdversarialConfig, MemoryProgress, NoProgress};
    use crate::encoders::OptimalEncoder;
    use crate::solver::LpSolver;
    use crate::topology::Topology;
    use approx::assert_abs_diff_eq;

    fn detour() -> Topology {
        let mut t = Topology::new();
        t.add_edge("a", "b", 4.0).unwrap();
        t.add_edge("a", "c", 4.0).unwrap();
        t.add_edge("c", "b", 4.0).unwrap();
        t
    }

    #[test]
    fn test_evaluate_fixed_demands() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let gen = AdversarialInputGenerator::new(t.clone(), AdversarialConfig::new()).unwrap();
        let mut demands: BTreeMap<NodePair, f64> = t.reachable_pairs().into_iter().map(|p| (p, 0.0)).collect();
        demands.insert(("a".into(), "b".into()), 8.0);
        let result = gen.evaluate_demands(&mut solver, &mut opt, &mut heur, &demands).unwrap();
        assert_abs_diff_eq!(result.optimal.total_demand_met, 8.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.heuristic.total_demand_met, 4.0, epsilon = 1e-6);
        assert_abs_diff_eq!(result.gap, 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_random_search_reports_progress() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let mut gen = AdversarialInputGenerator::new(t, AdversarialConfig::new().with_demand_ub(8.0)).unwrap();
        let search = SearchConfig::new().with_num_trials(6).with_seed(7);
        let mut progress = MemoryProgress::new();
        let out = gen
            .random_search(&mut solver, &mut opt, &mut heur, &search, &mut progress)
            .unwrap();
        assert_eq!(out.trials, 6);
        assert!(!out.timed_out);
        assert!(out.best.gap >= -1e-6 && out.best.gap <= 4.0 + 1e-6);
        assert_eq!(progress.last_gap(), Some(out.best.gap));
        let gaps: Vec<f64> = progress.records.iter().map(|(_, g)| *g).collect();
        assert!(gaps.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_quantized_neighbors_stay_on_levels() {
        let t = detour();
        let solver = LpSolver::new();
        let opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let config = AdversarialConfig::new()
            .with_demand_mode(DemandMode::Quantized { levels: vec![2.0, 6.0] })
            .with_demand_ub(8.0);
        let mut gen = AdversarialInputGenerator::new(t, config).unwrap();
        let search = SearchConfig::new().with_seed(3).with_std_dev(0.5).with_density(0.5);
        let mut sampler = gen.sampler(&solver, &opt, &heur, &search).unwrap();
        let start = sampler.random();
        let next = sampler.neighbor(&start);
        for v in start.values().chain(next.values()) {
            assert!([0.0, 2.0, 6.0].contains(v), "{} is not a level", v);
        }
    }

    #[test]
    fn test_levels_above_demand_ub_reachable() {
        let t = detour();
        let solver = LpSolver::new();
        let opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let config = AdversarialConfig::new()
            .with_demand_mode(DemandMode::Quantized { levels: vec![2.0, 20.0] })
            .with_demand_ub(8.0);
        let mut gen = AdversarialInputGenerator::new(t, config).unwrap();
        let search = SearchConfig::new().with_seed(11).with_std_dev(0.3);
        let mut sampler = gen.sampler(&solver, &opt, &heur, &search).unwrap();
        assert_eq!(sampler.ub, 20.0);

        let top: BTreeMap<NodePair, f64> = sampler.pairs.iter().map(|p| (p.clone(), 20.0)).collect();
        let mut seen_top = false;
        for _ in 0..50 {
            let next = sampler.neighbor(&top);
            for v in next.values() {
                assert!([0.0, 2.0, 20.0].contains(v), "{} is not a level", v);
                seen_top |= *v == 20.0;
            }
        }
        assert!(seen_top, "top level never kept by a neighbor step");
    }

    #[test]
    fn test_invalid_search_config_rejected_early() {
        let t = detour();
        let mut solver = LpSolver::new();
        let mut opt = OptimalEncoder::new(&solver, &t, 2).unwrap();
        let mut heur = OptimalEncoder::new(&solver, &t, 1).unwrap();
        let mut gen = AdversarialInputGenerator::new(t, AdversarialConfig::new()).unwrap();
        let search = SearchConfig::new().with_temperature(1.0, 1.5);
        let err = gen
            .simulated_annealing(&mut solver, &mut opt, &mut heur, &search, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, MetaOptError::Configuration { .. }));
        assert_eq!(solver.num_variables(), 0);
    }
}
