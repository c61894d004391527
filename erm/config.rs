//! # Run Configuration
//!
//! Model and factorization settings, loadable from a TOML file with `[model]`
//! and `[factor]` tables. Every field has a default, so a file only needs to
//! list what it overrides.

use crate::factor::optimizer::AltProxGradOptions;
use crate::source::EmbedHints;
use crate::split::SplitMethod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read the configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse the configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Settings that shape how a model reads and partitions its data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Capacity hint for the number of embedded input columns.
    pub u_est_num_cols: usize,
    /// Capacity hint for the number of embedded target columns.
    pub v_est_num_cols: usize,
    /// Log status after each fit and each data read.
    pub verbose: bool,
    /// Seed for the model's random generator. Drawn from entropy when absent.
    pub seed: Option<u64>,
    pub split_method: SplitMethod,
    /// Training fraction used when `train` is first called without one.
    pub default_train_frac: f64,
    /// Apply the source's default embedding when the model is built.
    pub embed_all: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            u_est_num_cols: 0,
            v_est_num_cols: 0,
            verbose: false,
            seed: None,
            split_method: SplitMethod::Permutation,
            default_train_frac: 0.8,
            embed_all: false,
        }
    }
}

impl ModelConfig {
    pub fn embed_hints(&self) -> EmbedHints {
        EmbedHints {
            u_est_num_cols: self.u_est_num_cols,
            v_est_num_cols: self.v_est_num_cols,
            verbose: self.verbose,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let frac = self.default_train_frac;
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "default_train_frac",
                reason: format!("must lie in (0, 1], got {frac}"),
            });
        }
        Ok(())
    }
}

/// Settings for the alternating proximal-gradient factorization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorConfig {
    /// Number of columns in each factor.
    pub rank: usize,
    pub t_init: f64,
    pub beta: f64,
    pub t_min: f64,
    pub tol: f64,
    pub max_iters: usize,
    pub record_iterates: bool,
    /// Seed for the random initial factors.
    pub seed: Option<u64>,
}

impl Default for FactorConfig {
    fn default() -> Self {
        let options = AltProxGradOptions::default();
        Self {
            rank: 1,
            t_init: options.t_init,
            beta: options.beta,
            t_min: options.t_min,
            tol: options.tol,
            max_iters: options.max_iters,
            record_iterates: options.record_iterates,
            seed: None,
        }
    }
}

impl FactorConfig {
    pub fn options(&self) -> AltProxGradOptions {
        AltProxGradOptions {
            t_init: self.t_init,
            beta: self.beta,
            t_min: self.t_min,
            tol: self.tol,
            max_iters: self.max_iters,
            record_iterates: self.record_iterates,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rank == 0 {
            return Err(ConfigError::Invalid {
                field: "rank",
                reason: "must be at least 1".to_string(),
            });
        }
        self.options()
            .validate()
            .map_err(|e| ConfigError::Invalid {
                field: "factor",
                reason: e.to_string(),
            })
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: ModelConfig,
    pub factor: FactorConfig,
}

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.model.validate()?;
        config.factor.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
