//! Maximum total flow over a fixed path set.

use super::flow::{build_flow, solution_shell, FlowModel};
use super::{ensure_same_solver, not_encoded, Encoder, OptimizationEncoding, OptimizationSolution};
use crate::demand::DemandVariables;
use crate::error::{MetaOptError, Result};
use crate::inner::{EncodingOptions, InnerProblem};
use crate::polynomial::{Polynomial, Variable};
use crate::solver::{Solver, SolverId};
use crate::topology::{NodePair, Path, PathType, Topology};
use std::collections::BTreeMap;
use tracing::debug;

/// Multi-commodity flow maximizing total demand met.
///
/// With `k = 1` and [`PathType::KShortest`] this is the single
/// shortest-path heuristic.
#[derive(Debug, Clone)]
pub struct OptimalEncoder<V> {
    solver_id: SolverId,
    name: String,
    topology: Topology,
    paths: BTreeMap<NodePair, Vec<Path>>,
    model: Option<FlowModel<V>>,
    demands: Option<DemandVariables<V>>,
}

impl<V: Variable> OptimalEncoder<V> {
    /// Encoder over the `k` shortest paths of every reachable pair
    pub fn new<S>(solver: &S, topology: &Topology, k: usize) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        Self::with_path_type(solver, topology, PathType::KShortest, k)
    }

    pub fn with_path_type<S>(solver: &S, topology: &Topology, path_type: PathType, k: usize) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        if path_type == PathType::KShortest && k == 0 {
            return Err(MetaOptError::invalid_parameter("k", "must be at least 1"));
        }
        let paths = topology.compute_paths(path_type, k)?;
        let name = match path_type {
            PathType::KShortest => format!("optimal_k{}", k),
            PathType::AllSimple => "optimal_all_paths".to_string(),
        };
        Ok(Self {
            solver_id: solver.id(),
            name,
            topology: topology.clone(),
            paths,
            model: None,
            demands: None,
        })
    }

    /// Path set per pair
    pub fn paths(&self) -> &BTreeMap<NodePair, Vec<Path>> {
        &self.paths
    }
}

impl<S: Solver> Encoder<S> for OptimalEncoder<S::Var> {
    fn name(&self) -> &str {
        &self.name
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
        ensure_same_solver(self.solver_id, solver, &self.name)?;
        let mut inner = InnerProblem::new(options, demands.designated_set(), demands.binary_set())?;
        let pairs: Vec<NodePair> = demands.pairs().cloned().collect();
        let model = build_flow(solver, &mut inner, &self.name, &self.topology, &self.paths, &pairs, demands)?;

        let objective = Polynomial::var(model.total.clone());
        let num_constraints = inner.num_constraints();
        let certificate = inner.add_maximization_constraints(solver, &objective, options.skip_optimality)?;
        debug!(encoder = %self.name, pairs = model.flows.len(), num_constraints, "encoded");

        self.model = Some(model);
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
            return Err(not_encoded(&self.name));
        };
        let mut out = solution_shell(solver, solution, demands)?;
        out.total_demand_met = model.collect(solver, solution, &mut out)?;
        Ok(out)
    }
}
