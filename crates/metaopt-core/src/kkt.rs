//! KKT Constraint Generator
//!
//! Turns "the primal variables are an optimal solution of this inner LP"
//! into a finite constraint system the outer solver can handle:
//!
//! - primal feasibility: every buffered `g ≤ 0`, `h = 0`
//! - dual feasibility: `λ_i ≥ 0` per non-constant inequality
//! - complementary slackness: `λ_i = 0 ∨ g_i = 0`
//! - stationarity: `∂f/∂x + Σ λ_i ∂g_i/∂x + Σ ν_j ∂h_j/∂x = 0` per decision variable
//!
//! written for `minimize f`; maximization negates the objective.
//!
//! Variables in the designated constant set (the outer decisions, e.g.
//! demands) are treated as parameters: they get no stationarity row and a
//! constraint over them alone gets no multiplier.
//!
//! The conditions characterize optima only for convex (here: linear) inner
//! programs with continuous variables. That is the caller's responsibility.

use crate::error::{MetaOptError, Result};
use crate::inner::{ensure_linear, GenerationState};
use crate::polynomial::{Polynomial, Term, Variable};
use crate::solver::{Solver, VarType};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Multipliers created by one finalization, aligned with the buffered constraints.
#[derive(Debug, Clone)]
pub struct KktMultipliers<V> {
    /// `λ_i` per inequality; `None` for constraints constant under the designated set
    pub lambdas: Vec<Option<V>>,
    /// `ν_j` per equality; `None` for constant equalities
    pub nus: Vec<Option<V>>,
}

impl<V> KktMultipliers<V> {
    fn empty() -> Self {
        Self {
            lambdas: Vec::new(),
            nus: Vec::new(),
        }
    }

    pub fn num_created(&self) -> usize {
        self.lambdas.iter().flatten().count() + self.nus.iter().flatten().count()
    }
}

/// Buffers inner constraints, then emits them with their KKT system.
#[derive(Debug, Clone)]
pub struct KktGenerator<V> {
    constants: HashSet<V>,
    leq: Vec<Polynomial<V>>,
    eq: Vec<Polynomial<V>>,
    state: GenerationState,
}

impl<V: Variable> KktGenerator<V> {
    /// Generator with the given designated constant variables
    pub fn new(constants: HashSet<V>) -> Self {
        debug!(constants = constants.len(), "kkt generator created");
        Self {
            constants,
            leq: Vec::new(),
            eq: Vec::new(),
            state: GenerationState::Created,
        }
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn constants(&self) -> &HashSet<V> {
        &self.constants
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
                debug!(from = %self.state, to = %GenerationState::AccumulatingConstraints, "kkt state");
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
    ) -> Result<KktMultipliers<V>>
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
    ) -> Result<KktMultipliers<V>>
    where
        S: Solver<Var = V>,
    {
        if self.state == GenerationState::Finalized {
            return Err(MetaOptError::invalid_parameter("generator", "already finalized"));
        }
        if !skip_optimality {
            ensure_linear(objective, "objective")?;
            for p in self.leq.iter().chain(self.eq.iter()) {
                ensure_linear(p, "constraint")?;
            }
        }

        for p in &self.leq {
            solver.add_leq_zero(p)?;
        }
        for p in &self.eq {
            solver.add_eq_zero(p)?;
        }

        let multipliers = if skip_optimality {
            KktMultipliers::empty()
        } else {
            self.emit_optimality(solver, objective)?
        };

        debug!(
            from = %self.state,
            to = %GenerationState::Finalized,
            leq = self.leq.len(),
            eq = self.eq.len(),
            multipliers = multipliers.num_created(),
            skip_optimality,
            "kkt state"
        );
        self.state = GenerationState::Finalized;
        Ok(multipliers)
    }

    fn emit_optimality<S>(&self, solver: &mut S, objective: &Polynomial<V>) -> Result<KktMultipliers<V>>
    where
        S: Solver<Var = V>,
    {
        let mut lambdas = Vec::with_capacity(self.leq.len());
        for (i, g) in self.leq.iter().enumerate() {
            if g.is_constant_given(&self.constants) {
                lambdas.push(None);
                continue;
            }
            let lambda = solver.create_variable(&format!("kkt_lambda_{}", i), VarType::Continuous, 0.0, f64::INFINITY)?;
            let l = Polynomial::var(lambda.clone());
            solver.add_leq_zero(&l.neg())?;
            solver.add_or_eq_zero(&l, g)?;
            lambdas.push(Some(lambda));
        }

        let mut nus = Vec::with_capacity(self.eq.len());
        for (j, h) in self.eq.iter().enumerate() {
            if h.is_constant_given(&self.constants) {
                nus.push(None);
                continue;
            }
            let nu = solver.create_variable(
                &format!("kkt_nu_{}", j),
                VarType::Continuous,
                f64::NEG_INFINITY,
                f64::INFINITY,
            )?;
            nus.push(Some(nu));
        }

        // Stationarity rows, keyed by decision variable in first-appearance order.
        let mut order: Vec<V> = Vec::new();
        let mut rows: HashMap<V, Polynomial<V>> = HashMap::new();
        let mut touch = |v: &V, term: Option<Term<V>>, order: &mut Vec<V>| {
            let row = rows.entry(v.clone()).or_insert_with(|| {
                order.push(v.clone());
                Polynomial::new()
            });
            if let Some(t) = term {
                row.push(t);
            }
        };

        for v in objective.variables() {
            if self.constants.contains(&v) {
                continue;
            }
            let d = objective.derivative(&v);
            touch(&v, Some(Term::constant(d)), &mut order);
        }
        let duals = self
            .leq
            .iter()
            .zip(lambdas.iter())
            .chain(self.eq.iter().zip(nus.iter()));
        for (constraint, multiplier) in duals {
            for v in constraint.variables() {
                if self.constants.contains(&v) {
                    continue;
                }
                let term = multiplier.as_ref().and_then(|m| {
                    let d = constraint.derivative(&v);
                    (d != 0.0).then(|| Term::linear(d, m.clone()))
                });
                touch(&v, term, &mut order);
            }
        }

        for v in &order {
            if let Some(row) = rows.get(v) {
                solver.add_eq_zero(row)?;
            }
        }
        debug!(
            lambdas = lambdas.iter().flatten().count(),
            nus = nus.iter().flatten().count(),
            stationarity = order.len(),
            "kkt optimality emitted"
        );
        Ok(KktMultipliers { lambdas, nus })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::LpSolver;
    use approx::assert_abs_diff_eq;

    /// maximize y − x  s.t.  x + 2y = 10, x ≥ 0, y ≥ 0
    fn toy(solver: &mut LpSolver) -> (crate::solver::LpVar, crate::solver::LpVar, KktGenerator<crate::solver::LpVar>) {
        let x = solver.create_variable("x", VarType::Continuous, f64::NEG_INFINITY, f64::INFINITY).unwrap();
        let y = solver.create_variable("y", VarType::Continuous, f64::NEG_INFINITY, f64::INFINITY).unwrap();
        let mut kkt = KktGenerator::new(HashSet::new());
        kkt.add_eq_zero(
            Polynomial::var(x)
                .add(&Polynomial::linear(2.0, y))
                .add(&Polynomial::constant(-10.0)),
        )
        .unwrap();
        kkt.add_leq_zero(Polynomial::linear(-1.0, x)).unwrap();
        kkt.add_leq_zero(Polynomial::linear(-1.0, y)).unwrap();
        (x, y, kkt)
    }

    #[test]
    fn test_state_machine() {
        let mut solver = LpSolver::new();
        let (x, y, mut kkt) = toy(&mut solver);
        assert_eq!(kkt.state(), GenerationState::AccumulatingConstraints);
        let obj = Polynomial::var(y).sub(&Polynomial::var(x));
        kkt.add_maximization_constraints(&mut solver, &obj, false).unwrap();
        assert_eq!(kkt.state(), GenerationState::Finalized);
        assert!(kkt.add_leq_zero(Polynomial::var(x)).is_err());
    }

    #[test]
    fn test_toy_lp_multipliers() {
        let mut solver = LpSolver::new();
        let (x, y, mut kkt) = toy(&mut solver);
        let obj = Polynomial::var(y).sub(&Polynomial::var(x));
        let m = kkt.add_maximization_constraints(&mut solver, &obj, false).unwrap();
        assert_eq!(m.num_created(), 3);

        // Push the outer objective away from the inner optimum; KKT must hold x at 0.
        let sol = solver.maximize_objective(&Polynomial::var(x)).unwrap();
        assert_abs_diff_eq!(solver.value(&sol, &x).unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solver.value(&sol, &y).unwrap(), 5.0, epsilon = 1e-6);

        let l1 = m.lambdas[0].unwrap();
        let l2 = m.lambdas[1].unwrap();
        let nu = m.nus[0].unwrap();
        assert_abs_diff_eq!(solver.value(&sol, &l1).unwrap(), 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(solver.value(&sol, &l2).unwrap(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(solver.value(&sol, &nu).unwrap(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_skip_optimality_emits_primal_only() {
        let mut solver = LpSolver::new();
        let (x, _y, mut kkt) = toy(&mut solver);
        let m = kkt
            .add_maximization_constraints(&mut solver, &Polynomial::var(x), true)
            .unwrap();
        assert_eq!(m.num_created(), 0);
        assert_eq!(solver.num_constraints(), 3);
        let sol = solver.maximize_objective(&Polynomial::var(x)).unwrap();
        assert_abs_diff_eq!(solver.value(&sol, &x).unwrap(), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_constant_constraints_get_no_multiplier() {
        let mut solver = LpSolver::new();
        let d = solver.create_variable("d", VarType::Continuous, 0.0, 4.0).unwrap();
        let f = solver.create_variable("f", VarType::Continuous, f64::NEG_INFINITY, f64::INFINITY).unwrap();
        let constants: HashSet<_> = [d].into_iter().collect();
        let mut kkt = KktGenerator::new(constants);
        // Outer-only constraint d − 3 ≤ 0
        kkt.add_leq_zero(Polynomial::var(d).add(&Polynomial::constant(-3.0))).unwrap();
        // f ≤ d, f ≥ 0
        kkt.add_leq_zero(Polynomial::var(f).sub(&Polynomial::var(d))).unwrap();
        kkt.add_leq_zero(Polynomial::linear(-1.0, f)).unwrap();
        let m = kkt
            .add_maximization_constraints(&mut solver, &Polynomial::var(f), false)
            .unwrap();
        assert!(m.lambdas[0].is_none());
        assert!(m.lambdas[1].is_some());

        // Outer minimizes f (maximizes −f); inner optimality still pins f = d = 3.
        solver.add_eq_zero(&Polynomial::var(d).add(&Polynomial::constant(-3.0))).unwrap();
        let sol = solver.maximize_objective(&Polynomial::linear(-1.0, f)).unwrap();
        assert_abs_diff_eq!(solver.value(&sol, &f).unwrap(), 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_quadratic_rejected_before_emission() {
        let mut solver = LpSolver::new();
        let x = solver.create_variable("x", VarType::Continuous, 0.0, 1.0).unwrap();
        let mut kkt = KktGenerator::new(HashSet::new());
        kkt.add_leq_zero(Polynomial::from_terms(vec![Term::quadratic(1.0, x)])).unwrap();
        let err = kkt
            .add_maximization_constraints(&mut solver, &Polynomial::var(x), false)
            .unwrap_err();
        assert!(matches!(err, MetaOptError::Configuration { .. }));
        assert_eq!(solver.num_constraints(), 0);
    }
}
