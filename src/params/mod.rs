//! Tunable parameter catalog and the online optimizer.
//!
//! The catalog declares which parameters exist, their hard bounds, and which
//! feedback metric drives each one. It ships with built-in defaults and can
//! be overridden from a TOML file. The optimizer
//! ([`optimizer::ParameterOptimizer`]) adjusts current values inside the
//! declared bounds as feedback accumulates; the bounds themselves never move
//! at runtime.

pub mod optimizer;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which aggregate feedback metric drives a parameter's adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricDriver {
    /// Driven by average result quality relative to its baseline.
    Quality,
    /// Driven by average relevance relative to its baseline.
    Relevance,
    /// Driven by the spread of recent relevance scores.
    Volatility,
}

/// Declaration of one tunable parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Stable parameter name used in APIs and persistence.
    pub name: String,
    /// What the parameter controls.
    #[serde(default)]
    pub description: String,
    /// Hard lower bound; the optimizer never moves the value below this.
    pub min: f64,
    /// Hard upper bound.
    pub max: f64,
    /// Granularity hint for operators; adjustments themselves are continuous.
    pub step_size: f64,
    /// Which feedback metric drives this parameter.
    pub driver: MetricDriver,
}

impl ParameterSpec {
    /// The initial value: the midpoint of the declared bounds.
    pub fn initial_value(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Clamp a candidate value into this parameter's bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Per-driver learning rates applied to metric deltas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningRates {
    pub quality_factor: f64,
    pub relevance_factor: f64,
    pub exploration_factor: f64,
}

impl Default for LearningRates {
    fn default() -> Self {
        Self {
            quality_factor: 0.1,
            relevance_factor: 0.1,
            exploration_factor: 0.05,
        }
    }
}

impl LearningRates {
    /// The learning rate for a given driver.
    pub fn factor(&self, driver: MetricDriver) -> f64 {
        match driver {
            MetricDriver::Quality => self.quality_factor,
            MetricDriver::Relevance => self.relevance_factor,
            MetricDriver::Volatility => self.exploration_factor,
        }
    }
}

/// When and how strongly optimization runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationThresholds {
    /// Total feedback entries required before any optimization runs.
    pub min_feedback_count: u64,
    /// Steps between optimization runs once the feedback floor is met.
    pub update_interval: u64,
    /// Per-run cap on how far any single parameter may move.
    pub max_adjustment_per_step: f64,
}

impl Default for OptimizationThresholds {
    fn default() -> Self {
        Self {
            min_feedback_count: 5,
            update_interval: 5,
            max_adjustment_per_step: 0.1,
        }
    }
}

/// The full catalog: parameter declarations plus optimization policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterCatalog {
    pub parameters: Vec<ParameterSpec>,
    pub learning_rates: LearningRates,
    pub thresholds: OptimizationThresholds,
}

impl Default for ParameterCatalog {
    fn default() -> Self {
        Self {
            parameters: vec![
                ParameterSpec {
                    name: "base_confidence".into(),
                    description: "starting confidence assigned to new observations".into(),
                    min: 0.1,
                    max: 1.0,
                    step_size: 0.05,
                    driver: MetricDriver::Quality,
                },
                ParameterSpec {
                    name: "relevance_threshold".into(),
                    description: "minimum similarity score for search results".into(),
                    min: 0.3,
                    max: 0.9,
                    step_size: 0.05,
                    driver: MetricDriver::Relevance,
                },
                ParameterSpec {
                    name: "knowledge_weight".into(),
                    description: "weight of stored knowledge versus fresh research".into(),
                    min: 0.1,
                    max: 2.0,
                    step_size: 0.1,
                    driver: MetricDriver::Quality,
                },
                ParameterSpec {
                    name: "exploration_rate".into(),
                    description: "fraction of effort spent on unexplored sources".into(),
                    min: 0.0,
                    max: 0.5,
                    step_size: 0.05,
                    driver: MetricDriver::Volatility,
                },
            ],
            learning_rates: LearningRates::default(),
            thresholds: OptimizationThresholds::default(),
        }
    }
}

impl ParameterCatalog {
    /// Load a catalog from a TOML file, falling back to defaults for any
    /// omitted section.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let catalog: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Reject catalogs with inverted bounds or non-positive steps/rates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for spec in &self.parameters {
            if !(spec.min < spec.max) {
                return Err(ConfigError::InvalidBounds {
                    name: spec.name.clone(),
                    message: format!("min {} must be below max {}", spec.min, spec.max),
                });
            }
            if !(spec.step_size > 0.0) {
                return Err(ConfigError::InvalidBounds {
                    name: spec.name.clone(),
                    message: format!("step_size {} must be positive", spec.step_size),
                });
            }
        }
        let rates = [
            self.learning_rates.quality_factor,
            self.learning_rates.relevance_factor,
            self.learning_rates.exploration_factor,
        ];
        if rates.iter().any(|r| !(*r > 0.0)) {
            return Err(ConfigError::InvalidBounds {
                name: "learning_rates".into(),
                message: "all learning rates must be positive".into(),
            });
        }
        if !(self.thresholds.max_adjustment_per_step > 0.0) {
            return Err(ConfigError::InvalidBounds {
                name: "max_adjustment_per_step".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Look up a parameter declaration by name.
    pub fn spec(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// The initial value for every declared parameter (bound midpoints).
    pub fn initial_values(&self) -> BTreeMap<String, f64> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.initial_value()))
            .collect()
    }
}
