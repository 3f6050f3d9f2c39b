//! Solver settings and their JSON representation.
use crate::monitor::Criteria;
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Quantity reported to the monitor as the residual of a Newton iteration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResidualMeasure {
    /// Max-norm of the Newton increment.
    Increment,
    /// Euclidean norm of the nonlinear residual over unconstrained degrees of freedom.
    Nonlinear,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_iterations: usize,
    pub min_iterations: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
    pub divergence_factor: f64,
    pub measure: ResidualMeasure,
    /// A Newton step may reduce each nodal value to at most this fraction of its current value.
    pub positivity_fraction: f64,
    /// Smallest step length accepted by the line search.
    pub min_step: f64,
    /// Whether to evaluate the discrete energy after every step.
    pub track_energy: bool,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            min_iterations: 0,
            abs_tol: 1e-8,
            rel_tol: 1e-6,
            divergence_factor: 1e6,
            measure: ResidualMeasure::Increment,
            positivity_fraction: 0.1,
            min_step: 1e-8,
            track_energy: false,
        }
    }
}

impl NewtonSettings {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_min_iterations(mut self, min_iterations: usize) -> Self {
        self.min_iterations = min_iterations;
        self
    }

    pub fn with_measure(mut self, measure: ResidualMeasure) -> Self {
        self.measure = measure;
        self
    }

    /// Stopping criteria handed to the monitor for one solve.
    pub fn criteria(&self) -> Criteria {
        Criteria {
            abs_tol: self.abs_tol,
            rel_tol: self.rel_tol,
            max_iterations: self.max_iterations,
            min_iterations: self.min_iterations,
            divergence_factor: self.divergence_factor,
        }
    }
}

/// Relaxation of the interface trace update $g \leftarrow g + \omega (\tilde g - g)$.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum Relaxation {
    Fixed { omega: f64 },
    /// Aitken's dynamic relaxation, with the factor clamped to `[min, max]`.
    Aitken { initial: f64, min: f64, max: f64 },
}

impl Default for Relaxation {
    fn default() -> Self {
        Relaxation::Aitken {
            initial: 0.5,
            min: 0.05,
            max: 1.0,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingSettings {
    pub max_outer_iterations: usize,
    /// Converged once the max-norm of the interface mismatch drops below this value.
    pub interface_tolerance: f64,
    pub relaxation: Relaxation,
    /// Optional wall-clock budget in seconds, checked between outer iterations.
    pub time_limit: Option<f64>,
}

impl Default for CouplingSettings {
    fn default() -> Self {
        Self {
            max_outer_iterations: 50,
            interface_tolerance: 1e-6,
            relaxation: Relaxation::default(),
            time_limit: None,
        }
    }
}

impl CouplingSettings {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Complete configuration of a coupled solve.
///
/// The matching tolerance has no default and must always be given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub matching_tolerance: f64,
    #[serde(default)]
    pub newton: NewtonSettings,
    #[serde(default)]
    pub coupling: CouplingSettings,
}

impl SolverConfig {
    pub fn new(matching_tolerance: f64) -> Self {
        Self {
            matching_tolerance,
            newton: NewtonSettings::default(),
            coupling: CouplingSettings::default(),
        }
    }

    pub fn from_json_str(json: &str) -> eyre::Result<Self> {
        serde_json::from_str(json).wrap_err("failed to parse solver configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read solver configuration from {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> eyre::Result<String> {
        serde_json::to_string_pretty(self).wrap_err("failed to serialize solver configuration")
    }
}
