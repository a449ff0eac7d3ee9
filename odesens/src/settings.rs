use crate::{
    Error, OptimizerOptions, Procedure, Result, SensitivityMethod, SolverOptions,
};
use config::Config;
use serde::{Deserialize, Serialize};

/// Settings of an analysis, read from a TOML file.
///
/// Every section and every field is optional. Environment variables prefixed with `ODESENS_`
/// override file values, sections and fields are separated by `__`, e.g.
/// `ODESENS_OPTIMIZER__POP_SIZE=32`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Settings {
    /// Integrator tolerances.
    #[serde(default)]
    pub solver: SolverSettings,
    /// Finite-difference sensitivities.
    #[serde(default)]
    pub numerical: NumericalSettings,
    /// Stochastic design search.
    #[serde(default)]
    pub optimizer: OptimizerOptions,
    /// Robust design loop.
    #[serde(default)]
    pub maximin: MaximinSettings,
}

impl Settings {
    /// Reads a TOML file and applies the environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let parsed = Config::builder()
            .add_source(config::File::with_name(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("ODESENS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config {
                reason: e.to_string(),
            })?;
        parsed.try_deserialize().map_err(|e| Error::Config {
            reason: e.to_string(),
        })
    }
}

/// Integrator tolerances.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SolverSettings {
    /// Relative tolerance.
    #[serde(default = "default_rtol")]
    pub rtol: f64,
    /// Absolute tolerance.
    #[serde(default = "default_atol")]
    pub atol: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            rtol: default_rtol(),
            atol: default_atol(),
        }
    }
}

impl SolverSettings {
    /// Solver options of these tolerances.
    pub fn options(&self) -> SolverOptions {
        SolverOptions::new().with_rtol(self.rtol).with_atol(self.atol)
    }
}

/// Finite-difference sensitivities.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NumericalSettings {
    /// Fractional perturbation of every parameter.
    #[serde(default = "default_perturbation")]
    pub perturbation: f64,
    /// Finite-difference scheme.
    #[serde(default)]
    pub procedure: Procedure,
}

impl Default for NumericalSettings {
    fn default() -> Self {
        Self {
            perturbation: default_perturbation(),
            procedure: Procedure::default(),
        }
    }
}

impl NumericalSettings {
    /// Numeric sensitivity method of these settings.
    pub fn sensitivity_method(&self) -> SensitivityMethod {
        SensitivityMethod::Numeric {
            perturbation: self.perturbation,
            procedure: self.procedure,
        }
    }
}

/// Robust design loop.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MaximinSettings {
    /// Iteration cap.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Evaluation budget of each inner search.
    #[serde(default = "default_maximin_evaluations")]
    pub max_evaluations: usize,
}

impl Default for MaximinSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_evaluations: default_maximin_evaluations(),
        }
    }
}

impl MaximinSettings {
    /// `optimizer` with the evaluation budget of the loop.
    pub fn optimizer(&self, optimizer: &OptimizerOptions) -> OptimizerOptions {
        optimizer.clone().with_max_evaluations(self.max_evaluations)
    }
}

// *********************************
// Default values for deserializing
// *********************************

fn default_rtol() -> f64 {
    1e-8
}

fn default_atol() -> f64 {
    1e-10
}

fn default_perturbation() -> f64 {
    1e-6
}

fn default_max_iterations() -> usize {
    100
}

fn default_maximin_evaluations() -> usize {
    1000
}
