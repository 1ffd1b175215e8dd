//! Demand Variables
//!
//! Demands are polynomials rather than bare variables so one map can hold
//! a continuous variable, a weighted sum of binary level indicators
//! (quantized mode) or a plain constant (black-box search). The map is
//! shared by every encoder in one construction cycle, which is what makes
//! both inner problems see the same traffic.

use crate::error::{MetaOptError, Result};
use crate::polynomial::{Polynomial, Term, Variable};
use crate::solver::{Solver, VarType};
use crate::topology::{NodePair, Topology};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};

/// How adversarial demands are represented.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum DemandMode {
    /// One continuous variable per pair in `[0, ub]`
    #[default]
    Continuous,
    /// Each demand picks at most one of the given levels (or zero)
    Quantized { levels: Vec<f64> },
}

/// Per-pair demand expressions plus the outer variables behind them.
#[derive(Debug, Clone)]
pub struct DemandVariables<V> {
    demands: BTreeMap<NodePair, Polynomial<V>>,
    designated: Vec<V>,
    binaries: Vec<V>,
}

impl<V: Variable> DemandVariables<V> {
    /// One continuous variable `demand[s,t] ∈ [0, ub]` per pair
    pub fn continuous<S>(solver: &mut S, pairs: &[NodePair], ub: f64) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        if !(ub.is_finite() && ub > 0.0) {
            return Err(MetaOptError::invalid_parameter("demand_ub", format!("must be positive, got {}", ub)));
        }
        let mut demands = BTreeMap::new();
        let mut designated = Vec::with_capacity(pairs.len());
        for (s, t) in pairs {
            let v = solver.create_variable(&format!("demand[{},{}]", s, t), VarType::Continuous, 0.0, ub)?;
            demands.insert((s.clone(), t.clone()), Polynomial::var(v.clone()));
            designated.push(v);
        }
        Ok(Self {
            demands,
            designated,
            binaries: Vec::new(),
        })
    }

    /// `demand = Σ_l level_l · b_l` with binary `b_l` and `Σ_l b_l ≤ 1`.
    ///
    /// Zero levels are dropped; all-zero indicators mean zero demand.
    pub fn quantized<S>(solver: &mut S, pairs: &[NodePair], levels: &[f64]) -> Result<Self>
    where
        S: Solver<Var = V>,
    {
        validate_levels(levels)?;
        let nonzero: Vec<f64> = levels.iter().copied().filter(|&l| l > 0.0).collect();
        let mut demands = BTreeMap::new();
        let mut designated = Vec::new();
        for (s, t) in pairs {
            let mut demand = Polynomial::new();
            let mut choice = Polynomial::constant(-1.0);
            for (l, &level) in nonzero.iter().enumerate() {
                let b = solver.create_variable(&format!("demand[{},{}]_level{}", s, t, l), VarType::Binary, 0.0, 1.0)?;
                demand.push(Term::linear(level, b.clone()));
                choice.push(Term::linear(1.0, b.clone()));
                designated.push(b);
            }
            if !nonzero.is_empty() {
                solver.add_leq_zero(&choice)?;
            }
            demands.insert((s.clone(), t.clone()), demand);
        }
        let binaries = designated.clone();
        Ok(Self {
            demands,
            designated,
            binaries,
        })
    }

    /// Constant demands, no variables
    pub fn fixed(values: &BTreeMap<NodePair, f64>) -> Self {
        Self {
            demands: values
                .iter()
                .map(|(pair, &v)| (pair.clone(), Polynomial::constant(v)))
                .collect(),
            designated: Vec::new(),
            binaries: Vec::new(),
        }
    }

    pub fn get(&self, pair: &NodePair) -> Option<&Polynomial<V>> {
        self.demands.get(pair)
    }

    /// Demand of `pair`, or a configuration error naming it
    pub fn demand(&self, pair: &NodePair) -> Result<&Polynomial<V>> {
        self.demands.get(pair).ok_or_else(|| {
            MetaOptError::invalid_parameter("demands", format!("no demand for pair ({}, {})", pair.0, pair.1))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodePair, &Polynomial<V>)> {
        self.demands.iter()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &NodePair> {
        self.demands.keys()
    }

    pub fn len(&self) -> usize {
        self.demands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.demands.is_empty()
    }

    /// Outer variables referenced by the demand expressions
    pub fn designated(&self) -> &[V] {
        &self.designated
    }

    /// The binary subset of [`DemandVariables::designated`]
    pub fn binaries(&self) -> &[V] {
        &self.binaries
    }

    pub fn designated_set(&self) -> HashSet<V> {
        self.designated.iter().cloned().collect()
    }

    pub fn binary_set(&self) -> HashSet<V> {
        self.binaries.iter().cloned().collect()
    }

    /// Concrete demand per pair in `solution`
    pub fn values<S>(&self, solver: &S, solution: &S::Solution) -> Result<BTreeMap<NodePair, f64>>
    where
        S: Solver<Var = V>,
    {
        self.demands
            .iter()
            .map(|(pair, p)| Ok((pair.clone(), solver.evaluate(solution, p)?)))
            .collect()
    }
}

/// Levels must be finite and non-negative, with at least one positive.
pub fn validate_levels(levels: &[f64]) -> Result<()> {
    if levels.iter().any(|l| !(l.is_finite() && *l >= 0.0)) {
        return Err(MetaOptError::invalid_parameter("levels", "must be finite and non-negative"));
    }
    if !levels.iter().any(|&l| l > 0.0) {
        return Err(MetaOptError::invalid_parameter("levels", "need at least one positive level"));
    }
    Ok(())
}

/// Summary of a concrete demand matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandStats {
    /// Ordered node pairs in the topology
    pub num_pairs: usize,
    /// Demands strictly above `eps`
    pub num_positive: usize,
    /// `num_positive / num_pairs`
    pub density: f64,
    /// Largest demand
    pub max_demand: f64,
    /// Sum of demands
    pub total_demand: f64,
}

impl DemandStats {
    pub fn from_demands(topology: &Topology, demands: &BTreeMap<NodePair, f64>, eps: f64) -> Self {
        let n = topology.num_nodes();
        let num_pairs = n * n.saturating_sub(1);
        let num_positive = demands.values().filter(|&&d| d > eps).count();
        Self {
            num_pairs,
            num_positive,
            density: if num_pairs == 0 {
                0.0
            } else {
                num_positive as f64 / num_pairs as f64
            },
            max_demand: demands.values().copied().fold(0.0, f64::max),
            total_demand: demands.values().sum(),
        }
    }
}

/// Longest shortest-path hop count among demands above `threshold`.
pub fn max_distance_above(
    topology: &Topology,
    demands: &BTreeMap<NodePair, f64>,
    threshold: f64,
) -> Result<Option<usize>> {
    let mut longest = None;
    for ((s, t), &d) in demands {
        if d > threshold {
            if let Some(len) = topology.shortest_path_length(s, t)? {
                longest = Some(longest.map_or(len, |m: usize| m.max(len)));
            }
        }
    }
    Ok(longest)
}

/// Serialize a pair-keyed map with `"(s, t)"` string keys
pub fn serialize_pair_map<S, T>(map: &BTreeMap<NodePair, T>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    serializer.collect_map(map.iter().map(|((s, t), v)| (format!("({}, {})", s, t), v)))
}

/// Demands as a JSON object with `"(s, t)"` keys
pub fn demands_to_json(demands: &BTreeMap<NodePair, f64>) -> Result<String> {
    let keyed: BTreeMap<String, f64> = demands
        .iter()
        .map(|((s, t), &v)| (format!("({}, {})", s, t), v))
        .collect();
    Ok(serde_json::to_string_pretty(&keyed)?)
}

/// Inverse of [`serialize_pair_map`]
pub fn deserialize_pair_map<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<NodePair, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let keyed: BTreeMap<String, T> = BTreeMap::deserialize(deserializer)?;
    keyed
        .into_iter()
        .map(|(key, v)| parse_pair_key(&key).map(|pair| (pair, v)).map_err(D::Error::custom))
        .collect()
}

/// Inverse of [`demands_to_json`]
pub fn demands_from_json(json: &str) -> Result<BTreeMap<NodePair, f64>> {
    let keyed: BTreeMap<String, f64> = serde_json::from_str(json)?;
    keyed
        .into_iter()
        .map(|(key, v)| Ok((parse_pair_key(&key)?, v)))
        .collect()
}

fn parse_pair_key(key: &str) -> Result<NodePair> {
    let (s, t) = key
        .strip_prefix('(')
        .and_then(|k| k.strip_suffix(')'))
        .and_then(|k| k.split_once(", "))
        .ok_or_else(|| MetaOptError::topology(format!("malformed pair key {}", key)))?;
    Ok((s.to_string(), t.to_string()))
}
