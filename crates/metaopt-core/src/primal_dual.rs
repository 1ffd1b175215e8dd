//! Primal-Dual Constraint Generator
//!
//! Certifies inner optimality through strong duality instead of
//! complementarity disjunctions. For the inner program
//!
//! ```text
//! minimize   f(x)
//! subject to g_i(x) = a_i·x + r_i ≤ 0     (dual μ_i ≥ 0)
//!            h_j(x) = b_j·x + s_j = 0     (dual ν_j free)
//! ```
//!
//! where `r_i`, `s_j` are the parts over designated variables, it emits
//! the primal rows, dual feasibility `∂f/∂x_k + Σ μ_i a_ik + Σ ν_j b_jk = 0`
//! for every decision variable, and strong duality
//! `f_x(x) = Σ μ_i r_i + Σ ν_j s_j`.
//!
//! A designated variable inside `r_i` makes `μ_i · r_i` bilinear. Those
//! variables must be binary (quantized demands, pinning indicators); each
//! product is linearized with a big-M envelope, and the dual variables it
//! touches are bounded by that same M.
//!
//! Dual-feasibility rows are accumulated in parallel: constraint `i` goes
//! to worker `i mod num_threads`, each worker fills a private map, and the
//! maps are merged in worker order after all of them finish.

use crate::error::{MetaOptError, Result};
use crate::inner::{ensure_linear, GenerationState};
use crate::polynomial::{Polynomial, Term, Variable};
use crate::solver::{Solver, VarType};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Dual variables created by one finalization.
#[derive(Debug, Clone)]
pub struct DualVariables<V> {
    /// `μ_i` per inequality; `None` for constant constraints
    pub inequality: Vec<Option<V>>,
    /// `ν_j` per equality; `None` for constant constraints
    pub equality: Vec<Option<V>>,
    /// Number of dual × binary products linearized
    pub linearized_products: usize,
}

impl<V> DualVariables<V> {
    fn empty() -> Self {
        Self {
            inequality: Vec::new(),
            equality: Vec::new(),
            linearized_products: 0,
        }
    }

    pub fn num_created(&self) -> usize {
        self.inequality.iter().flatten().count() + self.equality.iter().flatten().count()
    }
}

/// Buffers inner constraints, then emits them with the dual program.
#[derive(Debug, Clone)]
pub struct PrimalDualGenerator<V> {
    constants: HashSet<V>,
    binaries: HashSet<V>,
    leq: Vec<Polynomial<V>>,
    eq: Vec<Polynomial<V>>,
    state: GenerationState,
    num_threads: usize,
    big_m: f64,
}

impl<V: Variable> PrimalDualGenerator<V> {
    /// `binaries` is the subset of `constants` known to be binary.
    pub fn new(constants: HashSet<V>, binaries: HashSet<V>) -> Self {
        debug!(constants = constants.len(), binaries = binaries.len(), "primal-dual generator created");
        Self {
            constants,
            binaries,
            leq: Vec::new(),
            eq: Vec::new(),
            state: GenerationState::Created,
            num_threads: 1,
            big_m: 1e3,
        }
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn with_big_m(mut self, big_m: f64) -> Self {
        self.big_m = big_m;
        self
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn leq_constraints(&self) -> &[Polynomial<V>] {
        &self.leq
    }

    pub fn eq_constraints(&self) -> &[Polynomial<V>] {
        &self.eq
    }

    fn accept(&mut self) -> Result<()> {
        match self.state {
            GenerationState::Finalized => Err(MetaOptError::invalid_parameter(
                "constraint",
                "generator already finalized; start a new construction cycle",
            )),
            GenerationState::Created => {
                debug!(from = %self.state, to = %GenerationState::AccumulatingConstraints, "primal-dual state");
                self.state = GenerationState::AccumulatingConstraints;
                Ok(())
            }
            GenerationState::AccumulatingConstraints => Ok(()),
        }
    }

    /// Buffer `p ≤ 0`
    pub fn add_leq_zero(&mut self, p: Polynomial<V>) -> Result<()> {
        self.accept()?;
        self.leq.push(p);
        Ok(())
    }

    /// Buffer `p = 0`
    pub fn add_eq_zero(&mut self, p: Polynomial<V>) -> Result<()> {
        self.accept()?;
        self.eq.push(p);
        Ok(())
    }

    /// Emit for `maximize objective`
    pub fn add_maximization_constraints<S>(
        &mut self,
        solver: &mut S,
        objective: &Polynomial<V>,
        skip_optimality: bool,
    ) -> Result<DualVariables<V>>
    where
        S: Solver<Var = V>,
    {
        self.add_minimization_constraints(solver, &objective.neg(), skip_optimality)
    }

    /// Emit for `minimize objective`
    pub fn add_minimization_constraints<S>(
        &mut self,
        solver: &mut S,
        objective: &Polynomial<V>,
        skip_optimality: bool,
    ) -> Result<DualVariables<V>>
    where
        S: Solver<Var = V>,
    {
        if self.state == GenerationState::Finalized {
            return Err(MetaOptError::invalid_parameter("generator", "already finalized"));
        }
        if !skip_optimality {
            self.validate(objective)?;
        }

        for p in &self.leq {
            solver.add_leq_zero(p)?;
        }
        for p in &self.eq {
            solver.add_eq_zero(p)?;
        }

        let duals = if skip_optimality {
            DualVariables::empty()
        } else {
            self.emit_dual(solver, objective)?
        };

        debug!(
            from = %self.state,
            to = %GenerationState::Finalized,
            leq = self.leq.len(),
            eq = self.eq.len(),
            duals = duals.num_created(),
            products = duals.linearized_products,
            skip_optimality,
            "primal-dual state"
        );
        self.state = GenerationState::Finalized;
        Ok(duals)
    }

    fn validate(&self, objective: &Polynomial<V>) -> Result<()> {
        ensure_linear(objective, "objective")?;
        for (i, p) in self.leq.iter().chain(self.eq.iter()).enumerate() {
            ensure_linear(p, "constraint")?;
            if p.is_constant_given(&self.constants) {
                continue;
            }
            for v in p.constant_part(&self.constants).variables() {
                if !self.binaries.contains(&v) {
                    return Err(MetaOptError::invalid_parameter(
                        "demand_mode",
                        format!(
                            "constraint {} depends on non-binary designated variable {:?}; \
                             primal-dual needs quantized demands",
                            i, v
                        ),
                    ));
                }
            }
        }
        if !(self.big_m.is_finite() && self.big_m > 0.0) {
            return Err(MetaOptError::invalid_parameter("dual_big_m", "must be positive and finite"));
        }
        Ok(())
    }

    fn emit_dual<S>(&self, solver: &mut S, objective: &Polynomial<V>) -> Result<DualVariables<V>>
    where
        S: Solver<Var = V>,
    {
        let constraints: Vec<&Polynomial<V>> = self.leq.iter().chain(self.eq.iter()).collect();
        let num_leq = self.leq.len();
        let mut duals: Vec<Option<V>> = Vec::with_capacity(constraints.len());
        let mut dual_objective = Polynomial::new();
        let mut products = 0usize;

        for (i, p) in constraints.iter().enumerate() {
            if p.is_constant_given(&self.constants) {
                duals.push(None);
                continue;
            }
            let inequality = i < num_leq;
            let rhs = p.constant_part(&self.constants).merged();
            let bounded = !rhs.variables().is_empty();
            let m = self.big_m;
            let (lb, ub) = match (inequality, bounded) {
                (true, false) => (0.0, f64::INFINITY),
                (true, true) => (0.0, m),
                (false, false) => (f64::NEG_INFINITY, f64::INFINITY),
                (false, true) => (-m, m),
            };
            let name = if inequality {
                format!("dual_leq_{}", i)
            } else {
                format!("dual_eq_{}", i - num_leq)
            };
            let dual = solver.create_variable(&name, VarType::Continuous, lb, ub)?;

            for term in rhs.terms() {
                match &term.variable {
                    None => dual_objective.push(Term::linear(term.coefficient, dual.clone())),
                    Some(b) => {
                        let z = self.linearize_product(solver, &dual, b, inequality, &name)?;
                        products += 1;
                        dual_objective.push(Term::linear(term.coefficient, z));
                    }
                }
            }
            duals.push(Some(dual));
        }

        // Strong duality on the parts over decision variables.
        let primal = objective.variable_part(&self.constants);
        solver.add_eq_zero(&primal.sub(&dual_objective))?;

        // Dual feasibility per decision variable.
        let order = self.decision_order(objective);
        let rows = self.accumulate(&constraints, &duals);
        for v in &order {
            let mut row = Polynomial::constant(objective.derivative(v));
            if let Some(acc) = rows.get(v) {
                row.extend(acc);
            }
            solver.add_eq_zero(&row)?;
        }

        let equality = duals.split_off(num_leq);
        debug!(
            duals = duals.iter().flatten().count() + equality.iter().flatten().count(),
            products,
            dual_feasibility = order.len(),
            threads = self.num_threads,
            "primal-dual optimality emitted"
        );
        Ok(DualVariables {
            inequality: duals,
            equality,
            linearized_products: products,
        })
    }

    /// Variable `z = dual · b` for binary `b`, valid while `|dual| ≤ M`.
    fn linearize_product<S>(&self, solver: &mut S, dual: &V, b: &V, nonnegative: bool, name: &str) -> Result<V>
    where
        S: Solver<Var = V>,
    {
        let m = self.big_m;
        let lb = if nonnegative { 0.0 } else { -m };
        let z = solver.create_variable(&format!("{}_x_bin", name), VarType::Continuous, lb, m)?;
        let zp = Polynomial::var(z.clone());
        let dp = Polynomial::var(dual.clone());
        let mb = Polynomial::linear(m, b.clone());
        // |z| ≤ M·b
        solver.add_leq_zero(&zp.sub(&mb))?;
        solver.add_leq_zero(&zp.neg().sub(&mb))?;
        // |z − dual| ≤ M·(1 − b)
        let slack = mb.add(&Polynomial::constant(-m));
        solver.add_leq_zero(&zp.sub(&dp).add(&slack))?;
        solver.add_leq_zero(&dp.sub(&zp).add(&slack))?;
        Ok(z)
    }

    fn decision_order(&self, objective: &Polynomial<V>) -> Vec<V> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let sources = std::iter::once(objective).chain(self.leq.iter()).chain(self.eq.iter());
        for p in sources {
            for v in p.variables() {
                if !self.constants.contains(&v) && seen.insert(v.clone()) {
                    order.push(v);
                }
            }
        }
        order
    }

    fn accumulate(&self, constraints: &[&Polynomial<V>], duals: &[Option<V>]) -> HashMap<V, Polynomial<V>> {
        let threads = self.num_threads.max(1);
        let constants = &self.constants;
        let partial = |worker: usize| -> HashMap<V, Polynomial<V>> {
            let mut acc: HashMap<V, Polynomial<V>> = HashMap::new();
            for i in (worker..constraints.len()).step_by(threads) {
                let Some(dual) = &duals[i] else { continue };
                for term in constraints[i].variable_part(constants).terms() {
                    if let Some(v) = &term.variable {
                        acc.entry(v.clone())
                            .or_insert_with(Polynomial::new)
                            .push(Term::linear(term.coefficient, dual.clone()));
                    }
                }
            }
            acc
        };

        #[cfg(feature = "rayon")]
        let partials: Vec<HashMap<V, Polynomial<V>>> = (0..threads).into_par_iter().map(partial).collect();
        #[cfg(not(feature = "rayon"))]
        let partials: Vec<HashMap<V, Polynomial<V>>> = (0..threads).map(partial).collect();

        let mut merged: HashMap<V, Polynomial<V>> = HashMap::new();
        for part in partials {
            for (v, p) in part {
                merged.entry(v).or_insert_with(Polynomial::new).extend(&p);
            }
        }
        merged
    }
}
