//! # metaopt-core
//!
//! Bilevel encodings for finding adversarial inputs to traffic-engineering
//! heuristics.
//!
//! An inner LP (how a scheme routes a demand matrix) is turned into plain
//! constraints an outer solver can reason about, either through its KKT
//! conditions or through an explicit dual with strong duality. Two such
//! inner problems over one shared demand map give a single-level model
//! whose objective is the performance gap between them.
//!
//! | Module | What it provides |
//! |--------|-----------------|
//! | [`polynomial`] | Linear expressions over solver variables: derivative, constant split, evaluation |
//! | [`solver`] | The `Solver` capability trait and `LpSolver` over `microlp` |
//! | [`kkt`] | Stationarity, dual feasibility and complementary slackness |
//! | [`primal_dual`] | Dual program, strong duality, parallel dual accumulation |
//! | [`inner`] | One front over both certificates plus encoding options |
//! | [`topology`] | Capacitated graphs, k-shortest paths, node-link JSON, partitioning |
//! | [`demand`] | Shared demand variables (continuous, quantized, fixed) |
//! | [`encoders`] | Optimal flow, demand pinning, POP, SP-PIFO |
//! | [`adversarial`] | Exact gap search, bisection, random / hill-climbing / annealing search |
//!
//! ## Quick start
//!
//! ```
//! use metaopt_core::inner::{EncodingOptions, InnerProblem};
//! use metaopt_core::polynomial::Polynomial;
//! use metaopt_core::solver::{LpSolver, Solver, VarType};
//! use std::collections::HashSet;
//!
//! // maximize y − x  s.t.  x + 2y = 10,  x, y ≥ 0
//! let mut solver = LpSolver::new();
//! let x = solver.create_variable("x", VarType::Continuous, 0.0, f64::INFINITY).unwrap();
//! let y = solver.create_variable("y", VarType::Continuous, 0.0, f64::INFINITY).unwrap();
//!
//! let mut inner = InnerProblem::new(&EncodingOptions::kkt(), HashSet::new(), HashSet::new()).unwrap();
//! inner
//!     .add_eq_zero(Polynomial::var(x).add(&Polynomial::linear(2.0, y)).add(&Polynomial::constant(-10.0)))
//!     .unwrap();
//! inner.add_leq_zero(Polynomial::linear(-1.0, x)).unwrap();
//! inner.add_leq_zero(Polynomial::linear(-1.0, y)).unwrap();
//!
//! let objective = Polynomial::var(y).sub(&Polynomial::var(x));
//! inner.add_maximization_constraints(&mut solver, &objective, false).unwrap();
//!
//! // Any KKT point is optimal; the outer objective just reads it back.
//! let solution = solver.maximize_objective(&Polynomial::constant(0.0)).unwrap();
//! assert!((solver.value(&solution, &y).unwrap() - 5.0).abs() < 1e-6);
//! ```

pub mod adversarial;
pub mod demand;
pub mod encoders;
pub mod error;
pub mod inner;
pub mod kkt;
pub mod polynomial;
pub mod primal_dual;
pub mod solver;
pub mod topology;

pub use adversarial::{
    AdversarialConfig, AdversarialInputGenerator, GapInterval, GapResult, GeneratorState, ProgressSink,
    SearchConfig, SearchOutcome,
};
pub use demand::{DemandMode, DemandVariables};
pub use encoders::{
    DemandPinningEncoder, Encoder, OptimalEncoder, OptimizationEncoding, OptimizationSolution, PopEncoder,
};
pub use error::{MetaOptError, Result};
pub use inner::{Certificate, EncodingOptions, InnerEncoding, InnerProblem};
pub use polynomial::{Polynomial, Term, Variable};
pub use solver::{LpSolver, Solver, SolverId, VarType};
pub use topology::{NodePair, Path, PathType, Topology};
