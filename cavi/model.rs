use crate::precision::NoisePrecision;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable TOML format of fit configurations and
// fit results.

/// Fixed prior hyperparameters of the group spike-and-slab model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hyperparameters {
    /// Group penalty strength of the slab, `> 0`.
    pub lambda: f64,
    /// Prior shape pair for the inclusion weight; `w = a0 / (a0 + b0)`.
    pub a0: f64,
    pub b0: f64,
    /// Prior Gamma shape and rate of the residual precision.
    pub tau_a0: f64,
    pub tau_b0: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            a0: 1.0,
            b0: 1.0,
            tau_a0: 1e-3,
            tau_b0: 1e-3,
        }
    }
}

impl Hyperparameters {
    /// Prior inclusion probability `w = a0 / (a0 + b0)`.
    pub fn prior_inclusion(&self) -> f64 {
        self.a0 / (self.a0 + self.b0)
    }
}

/// Outer-loop settings of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Shared L1 tolerance on the change of `mu`, `s` and `g` over one iteration.
    pub tolerance: f64,
    pub track_elbo: bool,
    /// Sample the ELBO after every `track_elbo_every`-th iteration.
    pub track_elbo_every: usize,
    /// Monte-Carlo draws per ELBO evaluation.
    pub elbo_mc_samples: usize,
    pub elbo_seed: u64,
    pub verbose: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-3,
            track_elbo: false,
            track_elbo_every: 5,
            elbo_mc_samples: 500,
            elbo_seed: 0,
            verbose: false,
        }
    }
}

/// A fit configuration file: `[hyperparameters]` and `[options]` tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub hyperparameters: Hyperparameters,
    pub options: FitOptions,
}

/// The variational parameters: per-coefficient slab means `mu`, slab standard
/// deviations `s` and group inclusion probabilities `g`, plus the Gamma factor
/// `(tau_a, tau_b)` of the residual precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationalState {
    pub tau_a: f64,
    pub tau_b: f64,
    pub mu: Array1<f64>,
    pub s: Array1<f64>,
    pub g: Array1<f64>,
}

impl VariationalState {
    /// Starts from the given vectors with the noise precision at its prior.
    pub fn new(mu: Array1<f64>, s: Array1<f64>, g: Array1<f64>, hyper: &Hyperparameters) -> Self {
        Self {
            tau_a: hyper.tau_a0,
            tau_b: hyper.tau_b0,
            mu,
            s,
            g,
        }
    }

    /// The conventional starting point: `mu = 0`, `s = 1`, `g = 0.5`.
    pub fn default_start(p: usize, hyper: &Hyperparameters) -> Self {
        Self::new(
            Array1::zeros(p),
            Array1::ones(p),
            Array1::from_elem(p, 0.5),
            hyper,
        )
    }

    pub fn num_coefficients(&self) -> usize {
        self.mu.len()
    }

    pub fn precision(&self) -> NoisePrecision {
        NoisePrecision {
            tau_a: self.tau_a,
            tau_b: self.tau_b,
        }
    }

    pub fn set_precision(&mut self, precision: NoisePrecision) {
        self.tau_a = precision.tau_a;
        self.tau_b = precision.tau_b;
    }

    /// Posterior mean of the coefficients, `E[b] = g ∘ mu`.
    pub fn coefficient_mean(&self) -> Array1<f64> {
        &self.g * &self.mu
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.mu.iter().all(|v| v.is_finite())
            && self.s.iter().all(|&v| v.is_finite() && v > 0.0)
            && self.g.iter().all(|v| v.is_finite())
            && self.precision().is_valid()
    }
}

/// How the outer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    /// The L1 changes of `mu`, `s` and `g` all fell below the tolerance.
    Converged,
    /// The iteration budget ran out first.
    Exhausted,
    /// The cancellation signal was raised; the state is the last completed iteration.
    Interrupted,
    /// An iteration produced a non-finite or invalid state; it was rolled back.
    Degenerate,
}

/// Final variational parameters and run diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub status: FitStatus,
    /// Number of completed outer iterations.
    pub iterations: usize,
    /// Sampled ELBO values, in iteration order; empty unless tracking was enabled.
    pub elbo: Vec<f64>,
    pub state: VariationalState,
}

/// Custom error type for configuration and result files.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl FitConfig {
    /// Loads a fit configuration from a TOML file. Missing keys take their defaults.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }
}

impl FitResult {
    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }

    /// Saves the result to a file in a human-readable TOML format.
    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a result from a TOML file.
    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let result = toml::from_str(&toml_string)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn config_file_fills_missing_keys_with_defaults() {
        let config: FitConfig = toml::from_str(
            r#"
            [hyperparameters]
            lambda = 2.5

            [options]
            track_elbo = true
            "#,
        )
        .unwrap();

        assert_eq!(config.hyperparameters.lambda, 2.5);
        assert_eq!(config.hyperparameters.a0, Hyperparameters::default().a0);
        assert!(config.options.track_elbo);
        assert_eq!(config.options.track_elbo_every, FitOptions::default().track_elbo_every);
    }

    #[test]
    fn result_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fit.toml");
        let path = path.to_str().unwrap();

        let result = FitResult {
            status: FitStatus::Exhausted,
            iterations: 12,
            elbo: vec![-104.5, -98.25],
            state: VariationalState {
                tau_a: 26.0,
                tau_b: 7.5,
                mu: array![1.5, -0.25, 0.0],
                s: array![0.1, 0.2, 0.3],
                g: array![0.75, 0.75, 0.125],
            },
        };
        result.save(path).unwrap();

        let loaded = FitResult::load(path).unwrap();
        assert_eq!(loaded, result);
        assert!(!loaded.converged());
    }

    #[test]
    fn default_start_uses_prior_precision() {
        let hyper = Hyperparameters {
            tau_a0: 2.0,
            tau_b0: 3.0,
            ..Hyperparameters::default()
        };
        let state = VariationalState::default_start(3, &hyper);

        assert_eq!(state.num_coefficients(), 3);
        assert_eq!((state.tau_a, state.tau_b), (2.0, 3.0));
        assert_eq!(state.g, array![0.5, 0.5, 0.5]);
        assert_eq!(state.coefficient_mean(), array![0.0, 0.0, 0.0]);
        assert!(state.is_finite());
        assert_eq!(hyper.prior_inclusion(), 0.5);
    }
}
