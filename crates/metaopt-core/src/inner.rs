//! Inner-problem construction: one front over the KKT and primal-dual paths.
//!
//! Encoders register constraints on an [`InnerProblem`] and finalize it
//! with their objective; which optimality certificate ends up in the
//! solver is decided by [`EncodingOptions::inner`].

use crate::error::{MetaOptError, Result};
use crate::kkt::{KktGenerator, KktMultipliers};
use crate::polynomial::{Polynomial, Variable};
use crate::primal_dual::{DualVariables, PrimalDualGenerator};
use crate::solver::Solver;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Lifecycle of a constraint generator within one construction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationState {
    Created,
    AccumulatingConstraints,
    Finalized,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::AccumulatingConstraints => "accumulating",
            Self::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

/// How inner optimality is certified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InnerEncoding {
    /// Stationarity plus complementary-slackness disjunctions
    #[default]
    Kkt,
    /// Explicit dual program plus strong duality
    PrimalDual,
}

/// Per-encoding options shared by every encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingOptions {
    /// Optimality certificate
    pub inner: InnerEncoding,
    /// Emit primal feasibility only
    pub skip_optimality: bool,
    /// Workers for primal-dual dual-constraint accumulation
    pub num_threads: usize,
    /// Bound on dual variables multiplied by binary designated variables
    pub dual_big_m: f64,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            inner: InnerEncoding::Kkt,
            skip_optimality: false,
            num_threads: 1,
            dual_big_m: 1e3,
        }
    }
}

impl EncodingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// KKT certificate
    pub fn kkt() -> Self {
        Self::default()
    }

    /// Primal-dual certificate
    pub fn primal_dual() -> Self {
        Self {
            inner: InnerEncoding::PrimalDual,
            ..Self::default()
        }
    }

    /// Primal feasibility only
    pub fn feasibility_only() -> Self {
        Self {
            skip_optimality: true,
            ..Self::default()
        }
    }

    pub fn with_inner(mut self, inner: InnerEncoding) -> Self {
        self.inner = inner;
        self
    }

    pub fn with_skip_optimality(mut self, skip: bool) -> Self {
        self.skip_optimality = skip;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_dual_big_m(mut self, big_m: f64) -> Self {
        self.dual_big_m = big_m;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(MetaOptError::invalid_parameter("num_threads", "must be at least 1"));
        }
        if !(self.dual_big_m.is_finite() && self.dual_big_m > 0.0) {
            return Err(MetaOptError::invalid_parameter(
                "dual_big_m",
                format!("must be positive and finite, got {}", self.dual_big_m),
            ));
        }
        Ok(())
    }
}

/// Multipliers or dual variables created when finalizing.
#[derive(Debug, Clone)]
pub enum Certificate<V> {
    /// Nothing beyond primal feasibility was emitted
    FeasibilityOnly,
    Kkt(KktMultipliers<V>),
    PrimalDual(DualVariables<V>),
}

/// An inner program under construction.
#[derive(Debug, Clone)]
pub enum InnerProblem<V> {
    Kkt(KktGenerator<V>),
    PrimalDual(PrimalDualGenerator<V>),
}

impl<V: Variable> InnerProblem<V> {
    /// Generator for `options.inner`.
    ///
    /// `constants` are the designated (outer) variables; `binaries` is the
    /// subset known to be binary, which the primal-dual path needs to
    /// linearize dual × designated products.
    pub fn new(options: &EncodingOptions, constants: HashSet<V>, binaries: HashSet<V>) -> Result<Self> {
        options.validate()?;
        Ok(match options.inner {
            InnerEncoding::Kkt => Self::Kkt(KktGenerator::new(constants)),
            InnerEncoding::PrimalDual => Self::PrimalDual(
                PrimalDualGenerator::new(constants, binaries)
                    .with_num_threads(options.num_threads)
                    .with_big_m(options.dual_big_m),
            ),
        })
    }

    pub fn state(&self) -> GenerationState {
        match self {
            Self::Kkt(g) => g.state(),
            Self::PrimalDual(g) => g.state(),
        }
    }

    pub fn add_leq_zero(&mut self, p: Polynomial<V>) -> Result<()> {
        match self {
            Self::Kkt(g) => g.add_leq_zero(p),
            Self::PrimalDual(g) => g.add_leq_zero(p),
        }
    }

    pub fn add_eq_zero(&mut self, p: Polynomial<V>) -> Result<()> {
        match self {
            Self::Kkt(g) => g.add_eq_zero(p),
            Self::PrimalDual(g) => g.add_eq_zero(p),
        }
    }

    pub fn num_constraints(&self) -> usize {
        match self {
            Self::Kkt(g) => g.leq_constraints().len() + g.eq_constraints().len(),
            Self::PrimalDual(g) => g.leq_constraints().len() + g.eq_constraints().len(),
        }
    }

    /// Emit everything, certifying that the primal variables maximize `objective`.
    pub fn add_maximization_constraints<S>(
        &mut self,
        solver: &mut S,
        objective: &Polynomial<V>,
        skip_optimality: bool,
    ) -> Result<Certificate<V>>
    where
        S: Solver<Var = V>,
    {
        let certificate = match self {
            Self::Kkt(g) => Certificate::Kkt(g.add_maximization_constraints(solver, objective, skip_optimality)?),
            Self::PrimalDual(g) => {
                Certificate::PrimalDual(g.add_maximization_constraints(solver, objective, skip_optimality)?)
            }
        };
        if skip_optimality {
            return Ok(Certificate::FeasibilityOnly);
        }
        Ok(certificate)
    }
}

/// Reject quadratic input before it reaches derivative-based generators.
pub(crate) fn ensure_linear<V: Variable>(p: &Polynomial<V>, what: &str) -> Result<()> {
    if p.is_linear() {
        Ok(())
    } else {
        Err(MetaOptError::invalid_parameter(
            what,
            format!("optimality conditions need linear input, got {}", p),
        ))
    }
}
