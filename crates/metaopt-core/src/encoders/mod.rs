//! Inner-Problem Encoders
//!
//! Each encoder states one traffic-engineering scheme as an inner LP over
//! a shared demand map and registers it through an
//! [`InnerProblem`](crate::inner::InnerProblem):
//!
//! | Encoder | Scheme |
//! |---------|--------|
//! | [`OptimalEncoder`] | Max total flow over k paths per pair (k = 1: single shortest path) |
//! | [`DemandPinningEncoder`] | Small demands pinned to their shortest path, the rest optimal |
//! | [`PopEncoder`] | Pairs split into random partitions, each on a slice of every link |
//!
//! [`sp_pifo`] is the packet-scheduling counterpart and has its own driver.
//!
//! An encoder is bound to one solver instance at construction; the
//! adversarial driver refuses encoders bound to a different solver.

mod demand_pinning;
mod flow;
mod optimal;
mod pop;
pub mod sp_pifo;

pub use demand_pinning::DemandPinningEncoder;
pub use flow::PathFlow;
pub use optimal::OptimalEncoder;
pub use pop::PopEncoder;

use crate::demand::{serialize_pair_map, DemandVariables};
use crate::error::{MetaOptError, Result};
use crate::inner::{Certificate, EncodingOptions};
use crate::polynomial::Polynomial;
use crate::solver::{Solver, SolverId};
use crate::topology::NodePair;
use serde::Serialize;
use std::collections::BTreeMap;

/// What an encoder registered for one construction cycle.
#[derive(Debug, Clone)]
pub struct OptimizationEncoding<V> {
    /// Inner objective (total demand met)
    pub objective: Polynomial<V>,
    /// Demand map the encoding was built against
    pub demands: DemandVariables<V>,
    /// Multipliers / duals created for the optimality certificate
    pub certificate: Certificate<V>,
    /// Inner constraints registered
    pub num_constraints: usize,
}

/// Concrete values extracted after a solve.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationSolution {
    pub total_demand_met: f64,
    #[serde(serialize_with = "serialize_pair_map")]
    pub demands: BTreeMap<NodePair, f64>,
    #[serde(serialize_with = "serialize_pair_map")]
    pub flows: BTreeMap<NodePair, f64>,
    #[serde(serialize_with = "serialize_pair_map")]
    pub path_flows: BTreeMap<NodePair, Vec<PathFlow>>,
}

impl OptimizationSolution {
    /// Largest `|flow − Σ path flows|` over all pairs
    pub fn max_flow_imbalance(&self) -> f64 {
        self.flows
            .iter()
            .map(|(pair, &f)| {
                let routed: f64 = self
                    .path_flows
                    .get(pair)
                    .map(|paths| paths.iter().map(|p| p.flow).sum())
                    .unwrap_or(0.0);
                (f - routed).abs()
            })
            .fold(0.0, f64::max)
    }
}

/// An inner traffic-engineering problem.
pub trait Encoder<S: Solver> {
    /// Short scheme name for logs
    fn name(&self) -> &str;

    /// Solver instance this encoder was built for
    fn solver_id(&self) -> SolverId;

    /// Register the inner problem against `demands`.
    fn encoding(
        &mut self,
        solver: &mut S,
        demands: &DemandVariables<S::Var>,
        options: &EncodingOptions,
    ) -> Result<OptimizationEncoding<S::Var>>;

    /// Read flows and demands out of a solution of the last encoding.
    fn solution(&self, solver: &S, solution: &S::Solution) -> Result<OptimizationSolution>;
}

/// Configuration error unless `solver` is the instance the encoder was built for
pub(crate) fn ensure_same_solver<S: Solver>(bound: SolverId, solver: &S, encoder: &str) -> Result<()> {
    if bound == solver.id() {
        Ok(())
    } else {
        Err(MetaOptError::invalid_parameter(
            "solver",
            format!("{} encoder is bound to {}, got {}", encoder, bound, solver.id()),
        ))
    }
}

pub(crate) fn not_encoded(encoder: &str) -> MetaOptError {
    MetaOptError::invalid_parameter("solution", format!("{} encoder has no encoding yet", encoder))
}
