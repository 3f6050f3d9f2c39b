use crate::allocators::DimAllocator;
use crate::assembly::{BoundaryConditions, FemProvider};
use crate::config::{NewtonSettings, ResidualMeasure};
use crate::error::{DivergenceReason, NonlinearDivergenceError, SolveError};
use crate::monitor::{ContinueDecision, ConvergenceMonitor, Metrics, StreamId};
use crate::quadrature::CanonicalSimplexQuadrature;
use crate::solver::line_search::LineSearch;
use crate::solver::FieldState;
use crate::weak_form::WeakFormSpec;
use log::debug;
use nalgebra::{DVector, DefaultAllocator};

/// Euclidean norm of the residual restricted to unconstrained degrees of freedom.
pub(crate) fn free_residual_norm(residual: &DVector<f64>, bcs: &BoundaryConditions) -> f64 {
    residual
        .iter()
        .enumerate()
        .filter(|(dof, _)| !bcs.is_constrained(*dof))
        .map(|(_, r)| r * r)
        .sum::<f64>()
        .sqrt()
}

fn divergence(
    stream: StreamId,
    reason: DivergenceReason,
    iterations: usize,
    last_residual: f64,
    monitor: &ConvergenceMonitor,
) -> SolveError {
    SolveError::from(NonlinearDivergenceError {
        stream,
        reason,
        iterations,
        last_residual,
        history: monitor.record(stream),
    })
}

/// Solves the discrete nonlinear system of `form` with Newton's method, starting from `state`.
///
/// Constrained degrees of freedom are set to their prescribed values before the first step, so
/// that every Newton system is homogeneous in the constrained entries. Every iteration is reported
/// to `monitor` under `stream`, which decides when to stop.
///
/// If successful, returns the number of Newton steps taken. On failure `state` is left at the
/// last iterate; restoring it is up to the caller.
#[allow(clippy::too_many_arguments)]
pub fn newton_solve<D, P>(
    provider: &mut P,
    form: &WeakFormSpec<D>,
    bcs: &BoundaryConditions,
    state: &mut FieldState,
    stream: StreamId,
    settings: &NewtonSettings,
    line_search: &dyn LineSearch,
    monitor: &mut ConvergenceMonitor,
) -> Result<usize, SolveError>
where
    D: CanonicalSimplexQuadrature,
    DefaultAllocator: DimAllocator<f64, D>,
    P: FemProvider<D>,
{
    assert_eq!(state.values.len(), form.mesh().num_vertices());
    for (&dof, &value) in &bcs.essential {
        state.values[dof] = value;
    }
    monitor.begin(stream, settings.criteria());

    // The increment is only defined once a step has been taken
    if settings.measure == ResidualMeasure::Nonlinear {
        let residual = free_residual_norm(&provider.residual(form, &state.values, bcs), bcs);
        let metrics = Metrics {
            nonlinear_residual: Some(residual),
            ..Metrics::default()
        };
        match monitor.observe(stream, 0, residual, metrics) {
            ContinueDecision::Continue => {}
            ContinueDecision::Converged => return Ok(0),
            ContinueDecision::Abort(reason) => return Err(divergence(stream, reason, 0, residual, monitor)),
        }
    }

    let mut iteration = 0;
    let mut last_residual = f64::NAN;
    loop {
        iteration += 1;

        let system = provider.assemble(form, &state.values, bcs);
        let direction = provider
            .solve_linear(&system)
            .map_err(|source| SolveError::LinearSolve {
                stream,
                iteration,
                source,
            })?;

        let step_length = match line_search.step_length(&state.values, &direction) {
            Ok(step_length) => step_length,
            Err(err) => {
                debug!("{} Newton iteration {}: {}", stream, iteration, err);
                return Err(divergence(stream, DivergenceReason::LineSearch, iteration, last_residual, monitor));
            }
        };
        state.values.axpy(step_length, &direction, 1.0);
        state.iteration += 1;

        let residual_vector = provider.residual(form, &state.values, bcs);
        let nonlinear_residual = free_residual_norm(&residual_vector, bcs);
        let increment = direction.amax();
        let field_norm = state.values.amax();
        let relative_increment = if field_norm > 0.0 {
            step_length * increment / field_norm
        } else {
            step_length * increment
        };
        let energy = settings
            .track_energy
            .then(|| provider.energy(form, &state.values));
        let metrics = Metrics {
            relative_increment: Some(relative_increment),
            energy,
            nonlinear_residual: Some(nonlinear_residual),
            step_length: Some(step_length),
        };

        let residual = if state.values.iter().all(|u| u.is_finite()) {
            match settings.measure {
                ResidualMeasure::Increment => increment,
                ResidualMeasure::Nonlinear => nonlinear_residual,
            }
        } else {
            f64::NAN
        };
        last_residual = residual;
        debug!(
            "{} Newton iteration {}: residual {:e}, nonlinear residual {:e}, step length {}",
            stream, iteration, residual, nonlinear_residual, step_length
        );

        match monitor.observe(stream, iteration, residual, metrics) {
            ContinueDecision::Continue => {}
            ContinueDecision::Converged => return Ok(iteration),
            ContinueDecision::Abort(reason) => {
                return Err(divergence(stream, reason, iteration, residual, monitor));
            }
        }
    }
}
