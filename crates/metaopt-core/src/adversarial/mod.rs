//! Adversarial Input Generation
//!
//! Searches for demand matrices on which a heuristic falls furthest behind
//! the optimal scheme. Two inner encoders are built against one shared
//! demand map and the outer problem maximizes
//! `optimal objective − heuristic objective`.
//!
//! ## Exact search
//!
//! The heuristic is embedded with its optimality certificate (KKT or
//! primal-dual), so the single-level model only admits flows the heuristic
//! would actually pick. The optimal encoder enters the objective with a
//! positive sign and is embedded feasibility-only: the outer maximization
//! already pushes it to its optimum.
//!
//! - [`AdversarialInputGenerator::maximize_optimality_gap`]
//! - [`AdversarialInputGenerator::find_optimality_gap_at_least`]
//! - [`AdversarialInputGenerator::find_maximum_gap_interval`]
//!
//! ## Black-box search
//!
//! Random sampling, hill climbing and simulated annealing over concrete
//! demand matrices, solving both inner problems from scratch per candidate.
//! See [`SearchConfig`].
//!
//! ## Example
//!
//! ```
//! use metaopt_core::adversarial::{AdversarialConfig, AdversarialInputGenerator};
//! use metaopt_core::encoders::OptimalEncoder;
//! use metaopt_core::solver::LpSolver;
//! use metaopt_core::topology::Topology;
//!
//! let mut topo = Topology::new();
//! topo.add_edge("a", "b", 10.0).unwrap();
//! topo.add_edge("a", "c", 10.0).unwrap();
//! topo.add_edge("b", "d", 10.0).unwrap();
//! topo.add_edge("c", "d", 10.0).unwrap();
//!
//! let mut solver = LpSolver::new();
//! let mut optimal = OptimalEncoder::new(&solver, &topo, 2).unwrap();
//! let mut heuristic = OptimalEncoder::new(&solver, &topo, 1).unwrap();
//!
//! let config = AdversarialConfig::new().with_demand_ub(20.0);
//! let mut generator = AdversarialInputGenerator::new(topo, config).unwrap();
//! let result = generator
//!     .maximize_optimality_gap(&mut solver, &mut optimal, &mut heuristic)
//!     .unwrap();
//! // a→d can use a→c→d only under the optimal scheme
//! assert!(result.gap >= -1e-6 && result.gap <= 10.0 + 1e-6);
//! ```

mod config;
mod exact;
mod progress;
mod search;

pub use config::{AdversarialConfig, SearchConfig};
pub use progress::{MemoryProgress, NoProgress, ProgressSink, WriterProgress};

use crate::demand::{serialize_pair_map, DemandMode, DemandVariables};
use crate::encoders::{Encoder, OptimizationSolution};
use crate::error::{MetaOptError, Result};
use crate::polynomial::Polynomial;
use crate::solver::Solver;
use crate::topology::{NodePair, Topology};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Where the generator is in one exact construction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeneratorState {
    Idle,
    DemandVarsCreated,
    BothInnerEncodingsBuilt,
    ObjectiveSet,
    Solved,
}

impl fmt::Display for GeneratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::DemandVarsCreated => "demand-vars-created",
            Self::BothInnerEncodingsBuilt => "both-inner-encodings-built",
            Self::ObjectiveSet => "objective-set",
            Self::Solved => "solved",
        };
        f.write_str(s)
    }
}

/// One adversarial demand matrix and both schemes' response to it.
#[derive(Debug, Clone, Serialize)]
pub struct GapResult {
    /// `optimal.total_demand_met − heuristic.total_demand_met`
    pub gap: f64,
    pub optimal: OptimizationSolution,
    pub heuristic: OptimizationSolution,
    #[serde(serialize_with = "serialize_pair_map")]
    pub demands: BTreeMap<NodePair, f64>,
}

/// Bracket on the largest achievable gap.
///
/// `lower` is attained by `best`; no demand reaches a gap of `upper`.
#[derive(Debug, Clone, Serialize)]
pub struct GapInterval {
    pub lower: f64,
    pub upper: f64,
    pub best: Option<GapResult>,
    /// Feasibility checks issued
    pub probes: usize,
}

/// Result of a black-box search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub best: GapResult,
    /// Demand matrices evaluated
    pub trials: usize,
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// Gap objective and the demand map it was built over.
struct ExactModel<V> {
    gap: Polynomial<V>,
    demands: DemandVariables<V>,
}

/// Drives gap searches between two encoders over one topology.
#[derive(Debug, Clone)]
pub struct AdversarialInputGenerator {
    topology: Topology,
    config: AdversarialConfig,
    state: GeneratorState,
}

impl AdversarialInputGenerator {
    pub fn new(topology: Topology, config: AdversarialConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            topology,
            config,
            state: GeneratorState::Idle,
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &AdversarialConfig {
        &self.config
    }

    pub fn state(&self) -> GeneratorState {
        self.state
    }

    fn transition(&mut self, next: GeneratorState) {
        debug!(from = %self.state, to = %next, "generator state");
        self.state = next;
    }

    /// Upper bound on any single demand
    pub fn demand_ub(&self) -> f64 {
        self.config.demand_ub.unwrap_or_else(|| self.topology.max_capacity())
    }

    /// Everything that can be rejected without touching the solver.
    fn check_inputs<S, O, H>(&self, solver: &S, optimal: &O, heuristic: &H) -> Result<Vec<NodePair>>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        for (role, name, id) in [
            ("optimal", optimal.name(), optimal.solver_id()),
            ("heuristic", heuristic.name(), heuristic.solver_id()),
        ] {
            if id != solver.id() {
                return Err(MetaOptError::invalid_parameter(
                    "solver",
                    format!("{} encoder {} is bound to {}, driver uses {}", role, name, id, solver.id()),
                ));
            }
        }
        let pairs = self.topology.reachable_pairs();
        if pairs.is_empty() {
            return Err(MetaOptError::invalid_parameter("topology", "no routable node pairs"));
        }
        let known: BTreeSet<&NodePair> = pairs.iter().collect();
        if let Some((s, t)) = self.config.constrained_demands.keys().find(|p| !known.contains(p)) {
            return Err(MetaOptError::invalid_parameter(
                "constrained_demands",
                format!("pair ({}, {}) is not routable", s, t),
            ));
        }
        let ub = self.demand_ub();
        if !(ub.is_finite() && ub > 0.0) {
            return Err(MetaOptError::invalid_parameter("demand_ub", format!("must be positive, got {}", ub)));
        }
        Ok(pairs)
    }

    /// Fresh model: shared demands, both encodings and the gap objective.
    fn build<S, O, H>(&mut self, solver: &mut S, optimal: &mut O, heuristic: &mut H) -> Result<ExactModel<S::Var>>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        let pairs = self.check_inputs(solver, optimal, heuristic)?;
        solver.clean_all();
        solver.set_timeout(self.config.timeout);
        self.transition(GeneratorState::Idle);

        let demands = match &self.config.demand_mode {
            DemandMode::Continuous => DemandVariables::continuous(solver, &pairs, self.demand_ub())?,
            DemandMode::Quantized { levels } => DemandVariables::quantized(solver, &pairs, levels)?,
        };
        for (pair, &value) in &self.config.constrained_demands {
            solver.add_eq_zero(&demands.demand(pair)?.sub(&Polynomial::constant(value)))?;
        }
        self.transition(GeneratorState::DemandVarsCreated);

        let options = self.config.encoding_options();
        let opt = optimal.encoding(solver, &demands, &options.clone().with_skip_optimality(true))?;
        let heur = heuristic.encoding(solver, &demands, &options)?;
        debug!(
            optimal = optimal.name(),
            heuristic = heuristic.name(),
            optimal_constraints = opt.num_constraints,
            heuristic_constraints = heur.num_constraints,
            "inner encodings built"
        );
        self.transition(GeneratorState::BothInnerEncodingsBuilt);

        let gap = opt.objective.sub(&heur.objective);
        solver.set_objective(&gap)?;
        self.transition(GeneratorState::ObjectiveSet);
        Ok(ExactModel { gap, demands })
    }

    /// Read both schemes' flows out of a solved exact model.
    fn collect<S, O, H>(
        &mut self,
        solver: &S,
        optimal: &O,
        heuristic: &H,
        model: &ExactModel<S::Var>,
        solution: &S::Solution,
    ) -> Result<GapResult>
    where
        S: Solver,
        O: Encoder<S> + ?Sized,
        H: Encoder<S> + ?Sized,
    {
        self.transition(GeneratorState::Solved);
        let opt = optimal.solution(solver, solution)?;
        let heur = heuristic.solution(solver, solution)?;
        debug!(gap = solver.evaluate(solution, &model.gap)?, "gap extracted");
        Ok(GapResult {
            gap: opt.total_demand_met - heur.total_demand_met,
            demands: model.demands.values(solver, solution)?,
            optimal: opt,
            heuristic: heur,
        })
    }
}
