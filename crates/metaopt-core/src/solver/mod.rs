//! Solver Capability Interface
//!
//! Every generator and encoder talks to the numeric backend through
//! [`Solver`] only. Variable handles and solution tokens are opaque
//! associated types; the core holds and compares them but never looks
//! inside.
//!
//! A solver owns all of its model state. [`Solver::clean_all`] drops that
//! state and starts a fresh model on the same instance, which keeps its
//! [`SolverId`].

mod lp;

pub use lp::{LpAssignment, LpSolver, LpVar};

use crate::error::Result;
use crate::polynomial::{Polynomial, Variable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_SOLVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a solver instance, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SolverId(u64);

impl SolverId {
    /// Allocate a fresh id
    pub fn fresh() -> Self {
        Self(NEXT_SOLVER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solver#{}", self.0)
    }
}

/// Handle of a registered constraint, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub usize);

/// Domain of a decision variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Continuous,
    Binary,
    Integer,
}

/// Capabilities the encoding pipeline requires from a numeric backend.
///
/// Constraints are polynomials read as `p ≤ 0` or `p = 0`. The model is
/// append-only between [`Solver::clean_all`] calls.
pub trait Solver {
    /// Opaque variable handle
    type Var: Variable;
    /// Opaque solution token
    type Solution: Clone + fmt::Debug;

    /// Identity of this instance
    fn id(&self) -> SolverId;

    /// Create a decision variable with bounds `[lb, ub]` (infinite allowed).
    fn create_variable(&mut self, name: &str, kind: VarType, lb: f64, ub: f64) -> Result<Self::Var>;

    /// Register `p ≤ 0`
    fn add_leq_zero(&mut self, p: &Polynomial<Self::Var>) -> Result<ConstraintId>;

    /// Register `p = 0`
    fn add_eq_zero(&mut self, p: &Polynomial<Self::Var>) -> Result<ConstraintId>;

    /// Register the disjunction `a = 0 ∨ b = 0`
    fn add_or_eq_zero(&mut self, a: &Polynomial<Self::Var>, b: &Polynomial<Self::Var>) -> Result<()>;

    /// Replace the objective (always maximized)
    fn set_objective(&mut self, objective: &Polynomial<Self::Var>) -> Result<()>;

    /// Maximize the current objective.
    fn maximize(&mut self) -> Result<Self::Solution>;

    /// Set `objective` then maximize it
    fn maximize_objective(&mut self, objective: &Polynomial<Self::Var>) -> Result<Self::Solution> {
        self.set_objective(objective)?;
        self.maximize()
    }

    /// Find any solution whose objective is at least `target`.
    ///
    /// Fails with [`MetaOptError::InfeasibleOrUnbounded`](crate::MetaOptError::InfeasibleOrUnbounded)
    /// when no such solution exists.
    fn check_feasibility(&mut self, target: f64) -> Result<Self::Solution>;

    /// Value of `var` in `solution`
    fn value(&self, solution: &Self::Solution, var: &Self::Var) -> Result<f64>;

    /// Objective value of `solution`
    fn objective_value(&self, solution: &Self::Solution) -> f64;

    /// Drop every variable and constraint and start a fresh model.
    fn clean_all(&mut self);

    /// Merge another model into this one.
    ///
    /// Handles created by `other` stay valid against `self` afterwards.
    fn combine_with(&mut self, other: &Self) -> Result<()>;

    /// Advisory wall-clock budget for subsequent solves
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Value of a polynomial in `solution`
    fn evaluate(&self, solution: &Self::Solution, p: &Polynomial<Self::Var>) -> Result<f64> {
        let mut total = 0.0;
        for term in p.terms() {
            total += match (&term.variable, term.exponent) {
                (None, _) | (_, 0) => term.coefficient,
                (Some(v), 1) => term.coefficient * self.value(solution, v)?,
                (Some(v), _) => {
                    let x = self.value(solution, v)?;
                    term.coefficient * x * x
                }
            };
        }
        Ok(total)
    }
}
