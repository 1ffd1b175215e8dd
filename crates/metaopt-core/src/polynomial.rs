//! Linear Polynomials over Solver Variables
//!
//! A [`Polynomial`] is a flat sum of [`Term`]s, each a constant, a linear
//! term `c·v`, or (on the dedicated quadratic path) `c·v²`. Duplicate
//! variables may appear in several terms; every query (evaluation,
//! derivative, constant split) sums over them, and [`Polynomial::merged`]
//! folds them when a compact form is wanted.
//!
//! Every operation is value-like: transforms return new polynomials and
//! `clone()` yields an independent term list, so a constraint never shares
//! terms with the expression it was built from.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Requirements on an opaque solver variable handle.
pub trait Variable: Clone + Eq + Hash + fmt::Debug + Send + Sync {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync> Variable for T {}

/// `coefficient · variable^exponent`, exponent ∈ {0, 1, 2}.
#[derive(Debug, Clone, PartialEq)]
pub struct Term<V> {
    pub coefficient: f64,
    pub variable: Option<V>,
    pub exponent: u8,
}

impl<V: Variable> Term<V> {
    /// Constant term
    pub fn constant(coefficient: f64) -> Self {
        Self {
            coefficient,
            variable: None,
            exponent: 0,
        }
    }

    /// Linear term `c·v`
    pub fn linear(coefficient: f64, variable: V) -> Self {
        Self {
            coefficient,
            variable: Some(variable),
            exponent: 1,
        }
    }

    /// Quadratic term `c·v²`
    pub fn quadratic(coefficient: f64, variable: V) -> Self {
        Self {
            coefficient,
            variable: Some(variable),
            exponent: 2,
        }
    }

    /// True for terms without a variable (or with exponent 0)
    pub fn is_constant(&self) -> bool {
        self.variable.is_none() || self.exponent == 0
    }

    /// Whether the term only involves constants or variables in `constants`
    pub fn is_constant_given(&self, constants: &HashSet<V>) -> bool {
        match &self.variable {
            None => true,
            Some(_) if self.exponent == 0 => true,
            Some(v) => constants.contains(v),
        }
    }

    /// Value under an assignment
    pub fn evaluate(&self, value: &impl Fn(&V) -> f64) -> f64 {
        match (&self.variable, self.exponent) {
            (None, _) | (_, 0) => self.coefficient,
            (Some(v), 1) => self.coefficient * value(v),
            (Some(v), _) => {
                let x = value(v);
                self.coefficient * x * x
            }
        }
    }

    /// Same term scaled by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            coefficient: self.coefficient * factor,
            variable: self.variable.clone(),
            exponent: self.exponent,
        }
    }
}

/// A sum of terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial<V> {
    terms: Vec<Term<V>>,
}

impl<V: Variable> Default for Polynomial<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Variable> From<V> for Polynomial<V> {
    fn from(v: V) -> Self {
        Self::var(v)
    }
}

impl<V: Variable> Polynomial<V> {
    /// Zero polynomial
    pub fn new() -> Self {
        Self { terms: Vec::new() }
    }

    /// Constant polynomial
    pub fn constant(c: f64) -> Self {
        Self {
            terms: vec![Term::constant(c)],
        }
    }

    /// The single variable `v`
    pub fn var(v: V) -> Self {
        Self::linear(1.0, v)
    }

    /// `c·v`
    pub fn linear(c: f64, v: V) -> Self {
        Self {
            terms: vec![Term::linear(c, v)],
        }
    }

    pub fn from_terms(terms: Vec<Term<V>>) -> Self {
        Self { terms }
    }

    /// Append a term in place
    pub fn push(&mut self, term: Term<V>) {
        self.terms.push(term);
    }

    /// Builder form of [`Polynomial::push`]
    pub fn with_term(mut self, term: Term<V>) -> Self {
        self.terms.push(term);
        self
    }

    /// Append every term of `other` in place
    pub fn extend(&mut self, other: &Polynomial<V>) {
        self.terms.extend(other.terms.iter().cloned());
    }

    pub fn terms(&self) -> &[Term<V>] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// `self + other`
    pub fn add(&self, other: &Polynomial<V>) -> Polynomial<V> {
        let mut terms = Vec::with_capacity(self.terms.len() + other.terms.len());
        terms.extend(self.terms.iter().cloned());
        terms.extend(other.terms.iter().cloned());
        Polynomial { terms }
    }

    /// `self − other`
    pub fn sub(&self, other: &Polynomial<V>) -> Polynomial<V> {
        self.add(&other.neg())
    }

    /// `−self`
    pub fn neg(&self) -> Polynomial<V> {
        self.scale(-1.0)
    }

    /// `factor · self`
    pub fn scale(&self, factor: f64) -> Polynomial<V> {
        Polynomial {
            terms: self.terms.iter().map(|t| t.scaled(factor)).collect(),
        }
    }

    /// Coefficient of `v`'s linear terms, summed.
    ///
    /// Quadratic terms are not differentiated here; the optimality
    /// generators reject non-linear input before asking for derivatives.
    pub fn derivative(&self, v: &V) -> f64 {
        self.terms
            .iter()
            .filter(|t| t.exponent == 1 && t.variable.as_ref() == Some(v))
            .map(|t| t.coefficient)
            .sum()
    }

    /// Whether every variable in the polynomial belongs to `constants`
    pub fn is_constant_given(&self, constants: &HashSet<V>) -> bool {
        self.terms.iter().all(|t| t.is_constant_given(constants))
    }

    /// Sub-sum of terms that are constants or over variables in `constants`
    pub fn constant_part(&self, constants: &HashSet<V>) -> Polynomial<V> {
        Polynomial {
            terms: self
                .terms
                .iter()
                .filter(|t| t.is_constant_given(constants))
                .cloned()
                .collect(),
        }
    }

    /// Sub-sum of terms over variables outside `constants`
    pub fn variable_part(&self, constants: &HashSet<V>) -> Polynomial<V> {
        Polynomial {
            terms: self
                .terms
                .iter()
                .filter(|t| !t.is_constant_given(constants))
                .cloned()
                .collect(),
        }
    }

    /// Right-hand side when `self ≤ 0` is read as `variable part ≤ −constant part`
    pub fn rhs_given(&self, constants: &HashSet<V>) -> Polynomial<V> {
        self.constant_part(constants).neg()
    }

    /// Sum of the pure constant terms
    pub fn constant_value(&self) -> f64 {
        self.terms
            .iter()
            .filter(|t| t.is_constant())
            .map(|t| t.coefficient)
            .sum()
    }

    /// Value under an assignment
    pub fn evaluate(&self, value: impl Fn(&V) -> f64) -> f64 {
        self.terms.iter().map(|t| t.evaluate(&value)).sum()
    }

    /// Distinct variables in first-appearance order
    pub fn variables(&self) -> Vec<V> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for t in &self.terms {
            if t.is_constant() {
                continue;
            }
            if let Some(v) = &t.variable {
                if seen.insert(v.clone()) {
                    out.push(v.clone());
                }
            }
        }
        out
    }

    /// No quadratic terms
    pub fn is_linear(&self) -> bool {
        self.terms.iter().all(|t| t.exponent <= 1)
    }

    /// Fold duplicate variables and constants; drop zero coefficients.
    ///
    /// Variables keep their first-appearance order; the constant (if
    /// non-zero) comes last.
    pub fn merged(&self) -> Polynomial<V> {
        let mut order: Vec<(V, u8)> = Vec::new();
        let mut sums: std::collections::HashMap<(V, u8), f64> = std::collections::HashMap::new();
        let mut constant = 0.0;
        for t in &self.terms {
            match &t.variable {
                Some(v) if t.exponent > 0 => {
                    let key = (v.clone(), t.exponent);
                    match sums.get_mut(&key) {
                        Some(acc) => *acc += t.coefficient,
                        None => {
                            sums.insert(key.clone(), t.coefficient);
                            order.push(key);
                        }
                    }
                }
                _ => constant += t.coefficient,
            }
        }
        let mut terms: Vec<Term<V>> = order
            .into_iter()
            .filter_map(|key| {
                let c = sums[&key];
                if c == 0.0 {
                    return None;
                }
                let (v, exponent) = key;
                Some(Term {
                    coefficient: c,
                    variable: Some(v),
                    exponent,
                })
            })
            .collect();
        if constant != 0.0 {
            terms.push(Term::constant(constant));
        }
        Polynomial { terms }
    }
}

impl<V: Variable> fmt::Display for Polynomial<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "0");
        }
        let parts: Vec<String> = self
            .terms
            .iter()
            .map(|t| match (&t.variable, t.exponent) {
                (None, _) | (_, 0) => format!("{:.4}", t.coefficient),
                (Some(v), 1) => format!("{:.4}*{:?}", t.coefficient, v),
                (Some(v), e) => format!("{:.4}*{:?}^{}", t.coefficient, v, e),
            })
            .collect();
        write!(f, "{}", parts.join(" + "))
    }
}
