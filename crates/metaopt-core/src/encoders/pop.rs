//! POP: partition the demand pairs at random, give every partition an
//! equal slice of each link, and solve each partition independently.
//!
//! All partitions live in one inner problem; they share no constraints,
//! so maximizing the sum maximizes each partition.

use super::flow::{build_flow, solution_shell, FlowModel};
use super::{ensure_same_solver, not_encoded, Encoder, OptimizationEncoding, OptimizationSolution};
use crate::demand::DemandVariables;
use crate::error::{MetaOptError, Result};
use crate::inner::{EncodingOptions, InnerProblem};
use crate::polynomial::{Polynomial, Term, Variable};
use crate::solver::{Solver, SolverId};
use crate::topology::{NodePair, Path, PathType, Topology};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::debug;

/// Partitioned optimization heuristic.
#[derive(Debug, Clone)]
pub struct PopEncoder<V> {
    solver_id: SolverId,
    num_partitions: usize,
    split: Topology,
    paths: BTreeMap<NodePair, Vec<Path>>,
    assignment: BTreeMap<NodePair, usize>,
    models: Vec<FlowModel<V>>,
    demands: Option<DemandVariables<V>>,
}

impl<V: Variable> PopEncoder<V> {
    /// `num_partitions` slices over `k` shortest paths; `seed` fixes the pair assignment.
    pub fn new<S>(solver: &S, topology: &Topology, num_partitions: usize, k: usize, seed: u64) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        if num_partitions == 0 {
            return Err(MetaOptError::invalid_parameter("num_partitions", "must be at least 1"));
        }
        if k == 0 {
            return Err(MetaOptError::invalid_parameter("k", "must be at least 1"));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let assignment = topology
            .reachable_pairs()
            .into_iter()
            .map(|pair| (pair, rng.gen_range(0..num_partitions)))
            .collect();
        Ok(Self {
            solver_id: solver.id(),
            num_partitions,
            split: topology.split_capacity(num_partitions)?,
            paths: topology.compute_paths(PathType::KShortest, k)?,
            assignment,
            models: Vec::new(),
            demands: None,
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Partition of each pair
    pub fn assignment(&self) -> &BTreeMap<NodePair, usize> {
        &self.assignment
    }
}

impl<S: Solver> Encoder<S> for PopEncoder<S::Var> {
    fn name(&self) -> &str {
        "pop"
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
        ensure_same_solver(self.solver_id, solver, "pop")?;
        let mut inner = InnerProblem::new(options, demands.designated_set(), demands.binary_set())?;

        let mut buckets: Vec<Vec<NodePair>> = vec![Vec::new(); self.num_partitions];
        for pair in demands.pairs() {
            let part = self.assignment.get(pair).copied().ok_or_else(|| {
                MetaOptError::invalid_parameter("demands", format!("pair ({}, {}) is not routable", pair.0, pair.1))
            })?;
            buckets[part].push(pair.clone());
        }

        let mut models = Vec::with_capacity(self.num_partitions);
        let mut total = Polynomial::new();
        for (part, pairs) in buckets.iter().enumerate() {
            let model = build_flow(
                solver,
                &mut inner,
                &format!("pop{}", part),
                &self.split,
                &self.paths,
                pairs,
                demands,
            )?;
            total.push(Term::linear(1.0, model.total.clone()));
            models.push(model);
        }

        let num_constraints = inner.num_constraints();
        let certificate = inner.add_maximization_constraints(solver, &total, options.skip_optimality)?;
        debug!(
            encoder = "pop",
            partitions = self.num_partitions,
            sizes = ?buckets.iter().map(Vec::len).collect::<Vec<_>>(),
            num_constraints,
            "encoded"
        );

        self.models = models;
        self.demands = Some(demands.clone());
        Ok(OptimizationEncoding {
            objective: total,
            demands: demands.clone(),
            certificate,
            num_constraints,
        })
    }

    fn solution(&self, solver: &S, solution: &S::Solution) -> Result<OptimizationSolution> {
        let Some(demands) = &self.demands else {
            return Err(not_encoded("pop"));
        };
        let mut out = solution_shell(solver, solution, demands)?;
        let mut total = 0.0;
        for model in &self.models {
            total += model.collect(solver, solution, &mut out)?;
        }
        out.total_demand_met = total;
        Ok(out)
    }
}
