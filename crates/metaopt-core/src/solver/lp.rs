//! [`Solver`] adapter over the `microlp` simplex / branch-and-bound engine.
//!
//! The adapter keeps its own row model and hands a fresh
//! [`microlp::Problem`] to the engine on every solve, so `clean_all` and
//! `combine_with` are plain model edits.
//!
//! A disjunction `a = 0 ∨ b = 0` becomes one auxiliary binary `z` with
//! big-M rows: `z = 1` forces `a = 0`, `z = 0` forces `b = 0`. Each side's
//! M comes from the variable bounds when those are finite, otherwise from
//! [`LpSolver::disjunction_big_m`]. Quadratic terms are rejected.

use super::{ConstraintId, Solver, SolverId, VarType};
use crate::error::{MetaOptError, Result};
use crate::polynomial::Polynomial;
use microlp::{ComparisonOp, OptimizationDirection, Problem};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default bound on either side of a disjunction whose variables are unbounded.
pub const DEFAULT_DISJUNCTION_BIG_M: f64 = 1e4;

/// Constant rows are checked against this slack.
const FEASIBILITY_TOL: f64 = 1e-9;

/// Variable handle of an [`LpSolver`].
///
/// Carries the owning model (solver id and clean generation) so handles
/// from another solver, or from before a `clean_all`, are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LpVar {
    owner: SolverId,
    generation: u32,
    index: usize,
}

impl LpVar {
    pub fn owner(&self) -> SolverId {
        self.owner
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for LpVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}@{}", self.index, self.owner.as_u64())
    }
}

/// Solution token of an [`LpSolver`].
#[derive(Debug, Clone)]
pub struct LpAssignment {
    values: Vec<f64>,
    objective: f64,
    generation: u32,
}

impl LpAssignment {
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    kind: VarType,
    lb: f64,
    ub: f64,
}

/// `Σ c_j x_j + constant`, one entry per column.
#[derive(Debug, Clone, Default)]
struct Linear {
    terms: Vec<(usize, f64)>,
    constant: f64,
}

impl Linear {
    fn evaluate(&self, values: &[f64]) -> f64 {
        self.constant + self.terms.iter().map(|&(j, c)| c * values[j]).sum::<f64>()
    }

    fn shifted(&self, offset: usize) -> Linear {
        Linear {
            terms: self.terms.iter().map(|&(j, c)| (j + offset, c)).collect(),
            constant: self.constant,
        }
    }

    fn neg(&self) -> Linear {
        Linear {
            terms: self.terms.iter().map(|&(j, c)| (j, -c)).collect(),
            constant: -self.constant,
        }
    }

    fn with_term(mut self, column: usize, coefficient: f64) -> Linear {
        self.terms.push((column, coefficient));
        self
    }

    fn with_constant(mut self, constant: f64) -> Linear {
        self.constant += constant;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sense {
    Le,
    Eq,
}

/// `expr ≤ 0` or `expr = 0`
#[derive(Debug, Clone)]
struct Row {
    expr: Linear,
    sense: Sense,
}

/// Mixed-integer linear model solved through `microlp`.
#[derive(Debug, Clone)]
pub struct LpSolver {
    id: SolverId,
    generation: u32,
    columns: Vec<Column>,
    rows: Vec<Row>,
    objective: Linear,
    /// Column offsets of models merged through `combine_with`
    imported: HashMap<(SolverId, u32), usize>,
    num_constraints: usize,
    num_disjunctions: usize,
    big_m: f64,
    timeout: Option<Duration>,
}

impl Default for LpSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LpSolver {
    /// Empty model
    pub fn new() -> Self {
        Self {
            id: SolverId::fresh(),
            generation: 0,
            columns: Vec::new(),
            rows: Vec::new(),
            objective: Linear::default(),
            imported: HashMap::new(),
            num_constraints: 0,
            num_disjunctions: 0,
            big_m: DEFAULT_DISJUNCTION_BIG_M,
            timeout: None,
        }
    }

    /// Bound used for disjunction sides that the variable bounds leave open
    pub fn with_disjunction_big_m(mut self, big_m: f64) -> Result<Self> {
        if !(big_m.is_finite() && big_m > 0.0) {
            return Err(MetaOptError::invalid_parameter(
                "disjunction_big_m",
                format!("must be positive and finite, got {}", big_m),
            ));
        }
        self.big_m = big_m;
        Ok(self)
    }

    pub fn disjunction_big_m(&self) -> f64 {
        self.big_m
    }

    /// Columns, including the auxiliary binaries of disjunctions
    pub fn num_variables(&self) -> usize {
        self.columns.len()
    }

    /// Rows added through `add_leq_zero` / `add_eq_zero`
    pub fn num_constraints(&self) -> usize {
        self.num_constraints
    }

    pub fn num_disjunctions(&self) -> usize {
        self.num_disjunctions
    }

    /// Name given at creation (`or_<n>` for disjunction binaries)
    pub fn variable_name(&self, var: &LpVar) -> Result<&str> {
        let j = self.column(var)?;
        Ok(&self.columns[j].name)
    }

    fn column(&self, var: &LpVar) -> Result<usize> {
        let column = if var.owner == self.id && var.generation == self.generation {
            Some(var.index)
        } else {
            self.imported
                .get(&(var.owner, var.generation))
                .map(|offset| offset + var.index)
        };
        match column {
            Some(j) if j < self.columns.len() => Ok(j),
            _ => Err(MetaOptError::invalid_parameter(
                "variable",
                format!("{} does not belong to the current model of {}", var, self.id),
            )),
        }
    }

    /// Linear form with one merged coefficient per column.
    fn to_linear(&self, p: &Polynomial<LpVar>) -> Result<Linear> {
        let mut merged: BTreeMap<usize, f64> = BTreeMap::new();
        let mut constant = 0.0;
        for term in p.terms() {
            match (&term.variable, term.exponent) {
                (None, _) | (_, 0) => constant += term.coefficient,
                (Some(v), 1) => *merged.entry(self.column(v)?).or_insert(0.0) += term.coefficient,
                (Some(v), e) => {
                    return Err(MetaOptError::backend(format!(
                        "term {}*{}^{} is not linear",
                        term.coefficient, v, e
                    )))
                }
            }
        }
        Ok(Linear {
            terms: merged.into_iter().filter(|&(_, c)| c != 0.0).collect(),
            constant,
        })
    }

    fn push_column(&mut self, name: String, kind: VarType, lb: f64, ub: f64) -> usize {
        self.columns.push(Column { name, kind, lb, ub });
        self.columns.len() - 1
    }

    /// Interval of `expr` over the column bounds
    fn range(&self, expr: &Linear) -> (f64, f64) {
        expr.terms.iter().fold((expr.constant, expr.constant), |(lo, hi), &(j, c)| {
            let col = &self.columns[j];
            if c > 0.0 {
                (lo + c * col.lb, hi + c * col.ub)
            } else {
                (lo + c * col.ub, hi + c * col.lb)
            }
        })
    }

    /// `(M⁻, M⁺)` with `−M⁻ ≤ expr ≤ M⁺`, open sides replaced by the default M
    fn envelope(&self, expr: &Linear) -> (f64, f64) {
        let (lo, hi) = self.range(expr);
        let below = if lo.is_finite() { (-lo).max(0.0) } else { self.big_m };
        let above = if hi.is_finite() { hi.max(0.0) } else { self.big_m };
        (below, above)
    }

    fn push_row(&mut self, expr: Linear, sense: Sense) {
        self.rows.push(Row { expr, sense });
    }

    /// Hand the model to the engine and read every column back.
    fn solve(&self, objective: &Linear, extra: Option<&Row>) -> std::result::Result<Vec<f64>, microlp::Error> {
        let rows: Vec<&Row> = self.rows.iter().chain(extra).collect();
        for row in rows.iter().filter(|r| r.expr.terms.is_empty()) {
            let c = row.expr.constant;
            let violated = match row.sense {
                Sense::Le => c > FEASIBILITY_TOL,
                Sense::Eq => c.abs() > FEASIBILITY_TOL,
            };
            if violated {
                return Err(microlp::Error::Infeasible);
            }
        }
        if self.columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut coefficients = vec![0.0; self.columns.len()];
        for &(j, c) in &objective.terms {
            coefficients[j] += c;
        }
        let mut problem = Problem::new(OptimizationDirection::Maximize);
        let vars: Vec<microlp::Variable> = self
            .columns
            .iter()
            .zip(&coefficients)
            .map(|(col, &c)| match col.kind {
                VarType::Continuous => problem.add_var(c, (col.lb, col.ub)),
                VarType::Binary if col.lb <= 0.0 && col.ub >= 1.0 => problem.add_binary_var(c),
                VarType::Binary | VarType::Integer => {
                    problem.add_integer_var(c, (integer_bound(col.lb.ceil()), integer_bound(col.ub.floor())))
                }
            })
            .collect();
        for row in rows.iter().filter(|r| !r.expr.terms.is_empty()) {
            let op = match row.sense {
                Sense::Le => ComparisonOp::Le,
                Sense::Eq => ComparisonOp::Eq,
            };
            problem.add_constraint(
                row.expr.terms.iter().map(|&(j, c)| (vars[j], c)),
                op,
                -row.expr.constant,
            );
        }

        let start = Instant::now();
        let solution = problem.solve()?;
        let elapsed = start.elapsed();
        if let Some(limit) = self.timeout {
            if elapsed > limit {
                warn!(
                    solver = %self.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    limit_ms = limit.as_millis() as u64,
                    "solve exceeded its time budget"
                );
            }
        }
        debug!(solver = %self.id, elapsed_ms = elapsed.as_millis() as u64, "engine solved");
        Ok(vars.iter().map(|&v| solution.var_value_rounded(v)).collect())
    }

    fn assignment(&self, values: Vec<f64>) -> LpAssignment {
        LpAssignment {
            objective: self.objective.evaluate(&values),
            values,
            generation: self.generation,
        }
    }
}

/// Integer column bound in the engine's `i32` domain
fn integer_bound(value: f64) -> i32 {
    value.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

impl Solver for LpSolver {
    type Var = LpVar;
    type Solution = LpAssignment;

    fn id(&self) -> SolverId {
        self.id
    }

    fn create_variable(&mut self, name: &str, kind: VarType, lb: f64, ub: f64) -> Result<LpVar> {
        if lb.is_nan() || ub.is_nan() || lb > ub {
            return Err(MetaOptError::invalid_parameter(
                name,
                format!("invalid bounds [{}, {}]", lb, ub),
            ));
        }
        if kind != VarType::Continuous && lb.ceil() > ub.floor() {
            return Err(MetaOptError::invalid_parameter(
                name,
                format!("no integer in [{}, {}]", lb, ub),
            ));
        }
        let index = self.push_column(name.to_string(), kind, lb, ub);
        Ok(LpVar {
            owner: self.id,
            generation: self.generation,
            index,
        })
    }

    fn add_leq_zero(&mut self, p: &Polynomial<LpVar>) -> Result<ConstraintId> {
        let expr = self.to_linear(p)?;
        self.push_row(expr, Sense::Le);
        self.num_constraints += 1;
        Ok(ConstraintId(self.num_constraints - 1))
    }

    fn add_eq_zero(&mut self, p: &Polynomial<LpVar>) -> Result<ConstraintId> {
        let expr = self.to_linear(p)?;
        self.push_row(expr, Sense::Eq);
        self.num_constraints += 1;
        Ok(ConstraintId(self.num_constraints - 1))
    }

    fn add_or_eq_zero(&mut self, a: &Polynomial<LpVar>, b: &Polynomial<LpVar>) -> Result<()> {
        let a = self.to_linear(a)?;
        let b = self.to_linear(b)?;
        let (a_below, a_above) = self.envelope(&a);
        let (b_below, b_above) = self.envelope(&b);
        let name = format!("or_{}", self.num_disjunctions);
        let z = self.push_column(name, VarType::Binary, 0.0, 1.0);
        self.num_disjunctions += 1;

        // a ≤ M⁺(1 − z), −a ≤ M⁻(1 − z)
        if a_above > 0.0 {
            self.push_row(a.clone().with_term(z, a_above).with_constant(-a_above), Sense::Le);
        }
        if a_below > 0.0 {
            self.push_row(a.neg().with_term(z, a_below).with_constant(-a_below), Sense::Le);
        }
        // b ≤ M⁺z, −b ≤ M⁻z
        if b_above > 0.0 {
            self.push_row(b.clone().with_term(z, -b_above), Sense::Le);
        }
        if b_below > 0.0 {
            self.push_row(b.neg().with_term(z, -b_below), Sense::Le);
        }
        Ok(())
    }

    fn set_objective(&mut self, objective: &Polynomial<LpVar>) -> Result<()> {
        self.objective = self.to_linear(objective)?;
        Ok(())
    }

    fn maximize(&mut self) -> Result<LpAssignment> {
        debug!(
            solver = %self.id,
            columns = self.columns.len(),
            rows = self.rows.len(),
            disjunctions = self.num_disjunctions,
            "maximize"
        );
        let values = self.solve(&self.objective, None)?;
        Ok(self.assignment(values))
    }

    fn check_feasibility(&mut self, target: f64) -> Result<LpAssignment> {
        debug!(solver = %self.id, target, "check feasibility");
        // target − objective ≤ 0, searched with a flat objective
        let bound = Row {
            expr: self.objective.neg().with_constant(target),
            sense: Sense::Le,
        };
        match self.solve(&Linear::default(), Some(&bound)) {
            Ok(values) => Ok(self.assignment(values)),
            Err(microlp::Error::Infeasible) | Err(microlp::Error::Unbounded) => Err(
                MetaOptError::InfeasibleOrUnbounded(format!("no solution with objective ≥ {}", target)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    fn value(&self, solution: &LpAssignment, var: &LpVar) -> Result<f64> {
        if solution.generation != self.generation {
            return Err(MetaOptError::invalid_parameter(
                "solution",
                "solution predates the last clean_all",
            ));
        }
        let j = self.column(var)?;
        solution
            .values
            .get(j)
            .copied()
            .ok_or_else(|| MetaOptError::invalid_parameter("solution", format!("no value for {}", var)))
    }

    fn objective_value(&self, solution: &LpAssignment) -> f64 {
        solution.objective
    }

    fn clean_all(&mut self) {
        debug!(solver = %self.id, generation = self.generation, "clean all");
        self.generation += 1;
        self.columns.clear();
        self.rows.clear();
        self.objective = Linear::default();
        self.imported.clear();
        self.num_constraints = 0;
        self.num_disjunctions = 0;
    }

    fn combine_with(&mut self, other: &Self) -> Result<()> {
        if other.id == self.id {
            return Err(MetaOptError::invalid_parameter("other", "cannot combine a solver with itself"));
        }
        let offset = self.columns.len();
        self.columns.extend(other.columns.iter().cloned());
        for row in &other.rows {
            self.push_row(row.expr.shifted(offset), row.sense);
        }
        self.imported.insert((other.id, other.generation), offset);
        for (key, inner) in &other.imported {
            self.imported.insert(*key, offset + inner);
        }
        self.num_constraints += other.num_constraints;
        self.num_disjunctions += other.num_disjunctions;
        debug!(solver = %self.id, other = %other.id, offset, "combined models");
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_simple_lp() {
        let mut s = LpSolver::new();
        let x = s.create_variable("x", VarType::Continuous, 0.0, f64::INFINITY).unwrap();
        let y = s.create_variable("y", VarType::Continuous, 0.0, f64::INFINITY).unwrap();
        // x + y ≤ 4, x ≤ 3
        s.add_leq_zero(&Polynomial::var(x).add(&Polynomial::var(y)).add(&Polynomial::constant(-4.0)))
            .unwrap();
        s.add_leq_zero(&Polynomial::var(x).add(&Polynomial::constant(-3.0))).unwrap();
        let obj = Polynomial::linear(2.0, x).add(&Polynomial::var(y));
        let sol = s.maximize_objective(&obj).unwrap();
        assert_abs_diff_eq!(s.objective_value(&sol), 7.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s.value(&sol, &x).unwrap(), 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s.evaluate(&sol, &obj).unwrap(), 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_duplicate_terms_merged() {
        let mut s = LpSolver::new();
        let x = s.create_variable("x", VarType::Continuous, 0.0, 10.0).unwrap();
        // x + x − 6 ≤ 0 and an objective with a constant
        s.add_leq_zero(&Polynomial::var(x).add(&Polynomial::var(x)).add(&Polynomial::constant(-6.0)))
            .unwrap();
        let obj = Polynomial::var(x).add(&Polynomial::var(x)).add(&Polynomial::constant(1.0));
        let sol = s.maximize_objective(&obj).unwrap();
        assert_abs_diff_eq!(s.value(&sol, &x).unwrap(), 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s.objective_value(&sol), 7.0, epsilon = 1e-6);
    }

    #[test]
    fn test_disjunction() {
        let mut s = LpSolver::new();
        let x = s.create_variable("x", VarType::Continuous, 0.0, 3.0).unwrap();
        let y = s.create_variable("y", VarType::Continuous, 0.0, 2.0).unwrap();
        assert_eq!(s.variable_name(&y).unwrap(), "y");
        s.add_or_eq_zero(&Polynomial::var(x), &Polynomial::var(y)).unwrap();
        assert_eq!(s.num_disjunctions(), 1);
        let sol = s
            .maximize_objective(&Polynomial::var(x).add(&Polynomial::var(y)))
            .unwrap();
        assert_abs_diff_eq!(s.objective_value(&sol), 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(s.value(&sol, &y).unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_disjunction_with_unbounded_side() {
        // λ ≥ 0 unbounded, slack s = x − 5 with x ∈ [0, 8]; λ·s = 0 and λ = 2 forces x = 5
        let mut s = LpSolver::new();
        let lambda = s.create_variable("lambda", VarType::Continuous, 0.0, f64::INFINITY).unwrap();
        let x = s.create_variable("x", VarType::Continuous, 0.0, 8.0).unwrap();
        let slack = Polynomial::var(x).add(&Polynomial::constant(-5.0));
        s.add_or_eq_zero(&Polynomial::var(lambda), &slack).unwrap();
        s.add_eq_zero(&Polynomial::var(lambda).add(&Polynomial::constant(-2.0))).unwrap();
        let sol = s.maximize_objective(&Polynomial::var(x)).unwrap();
        assert_abs_diff_eq!(s.value(&sol, &x).unwrap(), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_check_feasibility_signals_infeasible() {
        let mut s = LpSolver::new();
        let x = s.create_variable("x", VarType::Continuous, 0.0, 5.0).unwrap();
        s.set_objective(&Polynomial::var(x)).unwrap();
        let sol = s.check_feasibility(4.0).unwrap();
        assert!(s.objective_value(&sol) >= 4.0 - 1e-6);
        let err = s.check_feasibility(6.0).unwrap_err();
        assert!(err.is_infeasible());
        // the bound row is not kept
        let sol = s.maximize().unwrap();
        assert_abs_diff_eq!(s.objective_value(&sol), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_integer_columns() {
        let mut s = LpSolver::new();
        let n = s.create_variable("n", VarType::Integer, 0.0, 10.0).unwrap();
        // 2n ≤ 7
        s.add_leq_zero(&Polynomial::linear(2.0, n).add(&Polynomial::constant(-7.0))).unwrap();
        let sol = s.maximize_objective(&Polynomial::var(n)).unwrap();
        assert_abs_diff_eq!(s.value(&sol, &n).unwrap(), 3.0, epsilon = 1e-9);
        assert!(s.create_variable("m", VarType::Integer, 0.2, 0.8).is_err());
    }

    #[test]
    fn test_violated_constant_row_is_infeasible() {
        let mut s = LpSolver::new();
        let x = s.create_variable("x", VarType::Continuous, 0.0, 1.0).unwrap();
        s.set_objective(&Polynomial::var(x)).unwrap();
        s.add_leq_zero(&Polynomial::constant(1.0)).unwrap();
        assert!(matches!(s.maximize(), Err(MetaOptError::SolverBackend(_))));
        assert!(s.check_feasibility(0.0).unwrap_err().is_infeasible());
    }

    #[test]
    fn test_quadratic_rejected() {
        let mut s = LpSolver::new();
        let x = s.create_variable("x", VarType::Continuous, 0.0, 5.0).unwrap();
        let p = Polynomial::from_terms(vec![crate::polynomial::Term::quadratic(1.0, x)]);
        assert!(matches!(s.add_leq_zero(&p), Err(MetaOptError::SolverBackend(_))));
    }

    #[test]
    fn test_invalid_big_m_rejected() {
        assert!(LpSolver::new().with_disjunction_big_m(0.0).is_err());
        let s = LpSolver::new().with_disjunction_big_m(50.0).unwrap();
        assert_eq!(s.disjunction_big_m(), 50.0);
    }

    #[test]
    fn test_stale_and_foreign_handles_rejected() {
        let mut a = LpSolver::new();
        let mut b = LpSolver::new();
        let x = a.create_variable("x", VarType::Continuous, 0.0, 1.0).unwrap();
        assert!(matches!(
            b.add_leq_zero(&Polynomial::var(x)),
            Err(MetaOptError::Configuration { .. })
        ));
        a.clean_all();
        assert!(a.add_leq_zero(&Polynomial::var(x)).is_err());
    }

    #[test]
    fn test_combine_with_keeps_handles() {
        let mut a = LpSolver::new();
        let x = a.create_variable("x", VarType::Continuous, 0.0, 2.0).unwrap();
        let mut b = LpSolver::new();
        let y = b.create_variable("y", VarType::Continuous, 0.0, 10.0).unwrap();
        b.add_leq_zero(&Polynomial::var(y).add(&Polynomial::constant(-3.0))).unwrap();

        a.combine_with(&b).unwrap();
        assert_eq!(a.num_variables(), 2);
        assert_eq!(a.num_constraints(), 1);
        let sol = a
            .maximize_objective(&Polynomial::var(x).add(&Polynomial::var(y)))
            .unwrap();
        assert_abs_diff_eq!(a.value(&sol, &y).unwrap(), 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(a.objective_value(&sol), 5.0, epsilon = 1e-6);
    }
}
