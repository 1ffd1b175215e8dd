//! Path-based multi-commodity flow shared by the routing encoders.
//!
//! For every pair with at least one path:
//!
//! ```text
//! x_p ≥ 0                  per path
//! f = Σ_p x_p              per pair
//! 0 ≤ f ≤ demand
//! Σ_{p ∋ e} x_p ≤ cap(e)   per used edge
//! total = Σ f
//! ```

use super::OptimizationSolution;
use crate::demand::DemandVariables;
use crate::error::Result;
use crate::inner::InnerProblem;
use crate::polynomial::{Polynomial, Term};
use crate::solver::{Solver, VarType};
use crate::topology::{NodePair, Path, Topology};
use serde::Serialize;
use std::collections::BTreeMap;

/// Flow carried by one path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathFlow {
    pub path: Path,
    pub flow: f64,
}

/// Variables of one flow block.
#[derive(Debug, Clone)]
pub(crate) struct FlowModel<V> {
    pub(crate) flows: BTreeMap<NodePair, V>,
    pub(crate) path_flows: BTreeMap<NodePair, Vec<(Path, V)>>,
    pub(crate) total: V,
}

/// Build one flow block over `pairs` into `inner`.
///
/// Capacities come from `capacities` so partitioned schemes can route on
/// a scaled copy of the topology.
pub(crate) fn build_flow<S>(
    solver: &mut S,
    inner: &mut InnerProblem<S::Var>,
    prefix: &str,
    capacities: &Topology,
    paths: &BTreeMap<NodePair, Vec<Path>>,
    pairs: &[NodePair],
    demands: &DemandVariables<S::Var>,
) -> Result<FlowModel<S::Var>>
where
    S: Solver,
{
    let mut flows = BTreeMap::new();
    let mut path_flows = BTreeMap::new();
    let mut edge_load: BTreeMap<NodePair, Polynomial<S::Var>> = BTreeMap::new();
    let mut total_sum = Polynomial::new();

    for pair in pairs {
        let Some(pair_paths) = paths.get(pair).filter(|p| !p.is_empty()) else {
            continue;
        };
        let demand = demands.demand(pair)?;
        let (s, t) = pair;
        let f = solver.create_variable(&format!("{}_flow[{},{}]", prefix, s, t), VarType::Continuous, 0.0, f64::INFINITY)?;
        let fp = Polynomial::var(f.clone());

        // f ≤ demand, f ≥ 0
        inner.add_leq_zero(fp.sub(demand))?;
        inner.add_leq_zero(fp.neg())?;

        let mut routed = fp.clone();
        let mut vars = Vec::with_capacity(pair_paths.len());
        for (i, path) in pair_paths.iter().enumerate() {
            let x = solver.create_variable(
                &format!("{}_pathflow[{},{}]_{}", prefix, s, t, i),
                VarType::Continuous,
                0.0,
                f64::INFINITY,
            )?;
            inner.add_leq_zero(Polynomial::linear(-1.0, x.clone()))?;
            routed.push(Term::linear(-1.0, x.clone()));
            for (a, b) in path.edges() {
                edge_load
                    .entry((a.to_string(), b.to_string()))
                    .or_insert_with(Polynomial::new)
                    .push(Term::linear(1.0, x.clone()));
            }
            vars.push((path.clone(), x));
        }
        // f = Σ x_p
        inner.add_eq_zero(routed)?;

        total_sum.push(Term::linear(1.0, f.clone()));
        flows.insert(pair.clone(), f);
        path_flows.insert(pair.clone(), vars);
    }

    for ((a, b), load) in edge_load {
        let cap = capacities.capacity(&a, &b)?;
        inner.add_leq_zero(load.add(&Polynomial::constant(-cap)))?;
    }

    let total = solver.create_variable(&format!("{}_total", prefix), VarType::Continuous, 0.0, f64::INFINITY)?;
    inner.add_eq_zero(Polynomial::var(total.clone()).sub(&total_sum))?;

    Ok(FlowModel {
        flows,
        path_flows,
        total,
    })
}

impl<V: crate::polynomial::Variable> FlowModel<V> {
    /// Add this block's flows to `out`; returns the block total.
    pub(crate) fn collect<S>(&self, solver: &S, solution: &S::Solution, out: &mut OptimizationSolution) -> Result<f64>
    where
        S: Solver<Var = V>,
    {
        for (pair, f) in &self.flows {
            out.flows.insert(pair.clone(), solver.value(solution, f)?);
        }
        for (pair, vars) in &self.path_flows {
            let mut entries = Vec::with_capacity(vars.len());
            for (path, x) in vars {
                entries.push(PathFlow {
                    path: path.clone(),
                    flow: solver.value(solution, x)?,
                });
            }
            out.path_flows.insert(pair.clone(), entries);
        }
        solver.value(solution, &self.total)
    }
}

/// Empty solution carrying the demand values of `solution`
pub(crate) fn solution_shell<S: Solver>(
    solver: &S,
    solution: &S::Solution,
    demands: &DemandVariables<S::Var>,
) -> Result<OptimizationSolution> {
    Ok(OptimizationSolution {
        total_demand_met: 0.0,
        demands: demands.values(solver, solution)?,
        flows: BTreeMap::new(),
        path_flows: BTreeMap::new(),
    })
}
