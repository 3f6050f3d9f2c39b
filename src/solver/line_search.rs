//! Step length selection for Newton updates.
use nalgebra::DVector;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// The line search could not find an admissible step.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSearchError {
    pub step_length: f64,
    pub min_step: f64,
}

impl Display for LineSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "admissible step length {:e} is smaller than minimum allowed step {:e}",
            self.step_length, self.min_step
        )
    }
}

impl Error for LineSearchError {}

pub trait LineSearch {
    /// Chooses the step length $s$ of the update $u \leftarrow u + s \delta$.
    fn step_length(&self, field: &DVector<f64>, direction: &DVector<f64>) -> Result<f64, LineSearchError>;
}

/// Trivial implementation of line search. Equivalent to a single, full Newton step.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoLineSearch;

impl LineSearch for NoLineSearch {
    fn step_length(&self, _field: &DVector<f64>, _direction: &DVector<f64>) -> Result<f64, LineSearchError> {
        Ok(1.0)
    }
}

/// Fraction-to-boundary rule keeping a positive field positive.
///
/// The step is the largest $s \leq 1$ such that $u_i + s \delta_i \geq \tau u_i$ for every
/// node, where $\tau$ is the retained fraction.
#[derive(Debug, Copy, Clone)]
pub struct FractionToBoundary {
    pub fraction: f64,
    pub min_step: f64,
}

impl FractionToBoundary {
    pub fn new(fraction: f64, min_step: f64) -> Self {
        assert!((0.0..1.0).contains(&fraction), "fraction must lie in [0, 1)");
        Self { fraction, min_step }
    }
}

impl LineSearch for FractionToBoundary {
    fn step_length(&self, field: &DVector<f64>, direction: &DVector<f64>) -> Result<f64, LineSearchError> {
        assert_eq!(field.len(), direction.len());
        let step_length = field
            .iter()
            .zip(direction.iter())
            .filter(|&(_, &delta)| delta < 0.0)
            .map(|(&u, &delta)| (1.0 - self.fraction) * u / -delta)
            .fold(1.0, f64::min);

        if step_length.is_nan() || step_length < self.min_step {
            Err(LineSearchError {
                step_length,
                min_step: self.min_step,
            })
        } else {
            Ok(step_length)
        }
    }
}
