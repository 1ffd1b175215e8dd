//! Configuration for the adversarial drivers.

use crate::demand::{deserialize_pair_map, serialize_pair_map, validate_levels, DemandMode};
use crate::error::{MetaOptError, Result};
use crate::inner::{EncodingOptions, InnerEncoding};
use crate::topology::NodePair;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Settings shared by the exact and black-box gap searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialConfig {
    /// Per-pair demand upper bound; `None` uses the largest link capacity
    pub demand_ub: Option<f64>,
    pub demand_mode: DemandMode,
    /// How the heuristic's optimality is certified
    pub inner: InnerEncoding,
    /// Workers for primal-dual accumulation
    pub num_threads: usize,
    /// Bound on linearized dual × binary products
    pub dual_big_m: f64,
    /// Wall-clock budget handed to the backend
    pub timeout: Option<Duration>,
    /// Demands pinned to a given value
    #[serde(
        default,
        serialize_with = "serialize_pair_map",
        deserialize_with = "deserialize_pair_map"
    )]
    pub constrained_demands: BTreeMap<NodePair, f64>,
}

impl Default for AdversarialConfig {
    fn default() -> Self {
        Self {
            demand_ub: None,
            demand_mode: DemandMode::Continuous,
            inner: InnerEncoding::Kkt,
            num_threads: 1,
            dual_big_m: 1e3,
            timeout: None,
            constrained_demands: BTreeMap::new(),
        }
    }
}

impl AdversarialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Primal-dual over quantized demand levels
    pub fn primal_dual(levels: Vec<f64>) -> Self {
        Self {
            inner: InnerEncoding::PrimalDual,
            demand_mode: DemandMode::Quantized { levels },
            ..Self::default()
        }
    }

    pub fn with_demand_ub(mut self, ub: f64) -> Self {
        self.demand_ub = Some(ub);
        self
    }

    pub fn with_demand_mode(mut self, mode: DemandMode) -> Self {
        self.demand_mode = mode;
        self
    }

    pub fn with_inner(mut self, inner: InnerEncoding) -> Self {
        self.inner = inner;
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fix the demand of `pair` to `value`
    pub fn with_constrained_demand(mut self, pair: NodePair, value: f64) -> Self {
        self.constrained_demands.insert(pair, value);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ub) = self.demand_ub {
            if !(ub.is_finite() && ub > 0.0) {
                return Err(MetaOptError::invalid_parameter("demand_ub", "must be positive and finite"));
            }
        }
        match (&self.inner, &self.demand_mode) {
            (InnerEncoding::PrimalDual, DemandMode::Continuous) => {
                return Err(MetaOptError::invalid_parameter(
                    "demand_mode",
                    "primal-dual needs quantized demand levels",
                ));
            }
            (_, DemandMode::Quantized { levels }) => validate_levels(levels)?,
            _ => {}
        }
        if let Some((pair, _)) = self
            .constrained_demands
            .iter()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(MetaOptError::invalid_parameter(
                "constrained_demands",
                format!("demand ({}, {}) must be finite and non-negative", pair.0, pair.1),
            ));
        }
        self.encoding_options().validate()
    }

    /// Inner options with full optimality certificates
    pub fn encoding_options(&self) -> EncodingOptions {
        EncodingOptions::new()
            .with_inner(self.inner)
            .with_num_threads(self.num_threads)
            .with_dual_big_m(self.dual_big_m)
    }
}

/// Black-box search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Random samples, hill-climbing restarts, or annealing temperature steps
    pub num_trials: usize,
    /// Neighbors tried per hill-climbing sweep
    pub num_neighbors: usize,
    /// Gaussian neighbor step as a fraction of the demand bound
    pub std_dev: f64,
    /// Probability that a sampled demand is non-zero
    pub density: f64,
    pub initial_temperature: f64,
    /// Geometric cooling factor in `(0, 1)`
    pub temperature_decay: f64,
    pub steps_per_temperature: usize,
    /// Annealing restarts after this many steps without a new best
    pub no_improvement_restart: usize,
    pub timeout: Option<Duration>,
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_trials: 20,
            num_neighbors: 10,
            std_dev: 0.1,
            density: 1.0,
            initial_temperature: 100.0,
            temperature_decay: 0.9,
            steps_per_temperature: 5,
            no_improvement_restart: 20,
            timeout: None,
            seed: None,
        }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_trials(mut self, n: usize) -> Self {
        self.num_trials = n;
        self
    }

    pub fn with_num_neighbors(mut self, n: usize) -> Self {
        self.num_neighbors = n;
        self
    }

    pub fn with_std_dev(mut self, std_dev: f64) -> Self {
        self.std_dev = std_dev;
        self
    }

    pub fn with_density(mut self, density: f64) -> Self {
        self.density = density;
        self
    }

    pub fn with_temperature(mut self, initial: f64, decay: f64) -> Self {
        self.initial_temperature = initial;
        self.temperature_decay = decay;
        self
    }

    pub fn with_steps_per_temperature(mut self, steps: usize) -> Self {
        self.steps_per_temperature = steps;
        self
    }

    pub fn with_no_improvement_restart(mut self, steps: usize) -> Self {
        self.no_improvement_restart = steps;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_trials == 0 {
            return Err(MetaOptError::invalid_parameter("num_trials", "must be positive"));
        }
        if self.num_neighbors == 0 {
            return Err(MetaOptError::invalid_parameter("num_neighbors", "must be positive"));
        }
        if !(self.std_dev.is_finite() && self.std_dev > 0.0) {
            return Err(MetaOptError::invalid_parameter("std_dev", "must be positive and finite"));
        }
        if !(0.0..=1.0).contains(&self.density) {
            return Err(MetaOptError::invalid_parameter("density", "must lie in [0, 1]"));
        }
        if !(self.initial_temperature.is_finite() && self.initial_temperature > 0.0) {
            return Err(MetaOptError::invalid_parameter("initial_temperature", "must be positive"));
        }
        if !(self.temperature_decay > 0.0 && self.temperature_decay < 1.0) {
            return Err(MetaOptError::invalid_parameter("temperature_decay", "must lie in (0, 1)"));
        }
        if self.steps_per_temperature == 0 {
            return Err(MetaOptError::invalid_parameter("steps_per_temperature", "must be positive"));
        }
        if self.no_improvement_restart == 0 {
            return Err(MetaOptError::invalid_parameter("no_improvement_restart", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primal_dual_needs_levels() {
        let cfg = AdversarialConfig::new().with_inner(InnerEncoding::PrimalDual);
        assert!(matches!(cfg.validate(), Err(MetaOptError::Configuration { .. })));
        assert!(AdversarialConfig::primal_dual(vec![0.0, 5.0]).validate().is_ok());
        assert!(AdversarialConfig::primal_dual(vec![0.0]).validate().is_err());
    }

    #[test]
    fn test_demand_bounds_checked() {
        assert!(AdversarialConfig::new().with_demand_ub(0.0).validate().is_err());
        assert!(AdversarialConfig::new()
            .with_constrained_demand(("a".into(), "b".into()), -1.0)
            .validate()
            .is_err());
        assert!(AdversarialConfig::new().with_num_threads(0).validate().is_err());
    }

    #[test]
    fn test_search_config_rejects_bad_schedule() {
        assert!(SearchConfig::new().validate().is_ok());
        assert!(SearchConfig::new().with_num_trials(0).validate().is_err());
        assert!(SearchConfig::new().with_temperature(0.0, 0.5).validate().is_err());
        assert!(SearchConfig::new().with_temperature(10.0, 1.0).validate().is_err());
        assert!(SearchConfig::new().with_density(1.5).validate().is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let cfg = AdversarialConfig::new()
            .with_demand_ub(20.0)
            .with_constrained_demand(("a".into(), "d".into()), 4.0);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"(a, d)\""));
        let back: AdversarialConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.constrained_demands, cfg.constrained_demands);
        assert_eq!(back.demand_ub, Some(20.0));
    }
}
