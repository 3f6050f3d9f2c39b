//! Convergence monitoring for the nested solver iterations.
//!
//! A [`ConvergenceMonitor`] observes three independent streams: the interior and exterior Newton
//! residuals and the outer interface mismatch. It decides whether an iteration should continue and
//! accumulates an append-only [`ConvergenceRecord`] per stream. It never touches solver state.
use crate::error::DivergenceReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Display;

/// Identifies a monitored stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamId {
    /// Nonlinear residual of the interior sub-domain.
    Interior,
    /// Nonlinear residual of the exterior sub-domain.
    Exterior,
    /// Mismatch of the interface traces in the outer coupling loop.
    Interface,
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamId::Interior => "interior",
            StreamId::Exterior => "exterior",
            StreamId::Interface => "interface",
        };
        write!(f, "{}", name)
    }
}

/// Stopping criteria of one monitored iteration.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    /// Converged when the residual drops below this value.
    pub abs_tol: f64,
    /// Converged when the residual relative to the first residual of the pass drops below this value.
    pub rel_tol: f64,
    /// Abort once this many iterations have been observed without convergence.
    pub max_iterations: usize,
    /// Never declare convergence before this iteration.
    pub min_iterations: usize,
    /// Abort when the residual exceeds this multiple of the first residual of the pass.
    pub divergence_factor: f64,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            abs_tol: 1e-8,
            rel_tol: 1e-6,
            max_iterations: 50,
            min_iterations: 0,
            divergence_factor: 1e6,
        }
    }
}

/// Auxiliary quantities reported alongside a residual.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Size of the accepted update relative to the size of the field.
    pub relative_increment: Option<f64>,
    /// Discrete energy of the current field.
    pub energy: Option<f64>,
    /// Euclidean norm of the nonlinear residual over unconstrained degrees of freedom.
    pub nonlinear_residual: Option<f64>,
    /// Step length accepted by the line search.
    pub step_length: Option<f64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    /// Index of the pass, counting calls to [`ConvergenceMonitor::begin`] for the stream.
    pub pass: usize,
    pub iteration: usize,
    pub residual: f64,
    pub metrics: Metrics,
}

/// Ordered history of one monitored stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    stream: StreamId,
    entries: Vec<RecordEntry>,
}

impl ConvergenceRecord {
    pub fn new(stream: StreamId) -> Self {
        Self {
            stream,
            entries: Vec::new(),
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn residuals(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|entry| entry.residual)
    }

    pub fn initial_residual(&self) -> Option<f64> {
        self.entries.first().map(|entry| entry.residual)
    }

    pub fn final_residual(&self) -> Option<f64> {
        self.entries.last().map(|entry| entry.residual)
    }

    /// Number of passes recorded so far.
    pub fn num_passes(&self) -> usize {
        self.entries
            .last()
            .map(|entry| entry.pass + 1)
            .unwrap_or(0)
    }

    pub fn pass_entries(&self, pass: usize) -> impl Iterator<Item = &RecordEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.pass == pass)
    }

    fn push(&mut self, entry: RecordEntry) {
        self.entries.push(entry);
    }
}

/// Decision returned by [`ConvergenceMonitor::observe`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContinueDecision {
    Continue,
    Converged,
    Abort(DivergenceReason),
}

#[derive(Debug, Clone)]
struct ActivePass {
    criteria: Criteria,
    pass: usize,
    initial: Option<f64>,
}

/// Observer deciding continuation of the monitored iterations.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceMonitor {
    records: BTreeMap<StreamId, ConvergenceRecord>,
    active: BTreeMap<StreamId, ActivePass>,
    passes: BTreeMap<StreamId, usize>,
}

impl ConvergenceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new pass of the given stream with the given criteria.
    ///
    /// Relative tolerances and the divergence factor refer to the first residual observed in the pass.
    pub fn begin(&mut self, stream: StreamId, criteria: Criteria) {
        let count = self.passes.entry(stream).or_insert(0);
        let pass = *count;
        *count += 1;
        self.active.insert(
            stream,
            ActivePass {
                criteria,
                pass,
                initial: None,
            },
        );
        self.records
            .entry(stream)
            .or_insert_with(|| ConvergenceRecord::new(stream));
    }

    /// Records an observation and decides whether the iteration should continue.
    ///
    /// # Panics
    ///
    /// Panics if no pass has been started for the stream.
    pub fn observe(&mut self, stream: StreamId, iteration: usize, residual: f64, metrics: Metrics) -> ContinueDecision {
        let active = self
            .active
            .get_mut(&stream)
            .unwrap_or_else(|| panic!("observed {} stream without starting a pass", stream));
        self.records
            .entry(stream)
            .or_insert_with(|| ConvergenceRecord::new(stream))
            .push(RecordEntry {
                pass: active.pass,
                iteration,
                residual,
                metrics,
            });

        if !residual.is_finite() {
            return ContinueDecision::Abort(DivergenceReason::NonFinite);
        }

        let criteria = active.criteria;
        let initial = *active.initial.get_or_insert(residual);

        if iteration >= criteria.min_iterations {
            let relative_met = initial > 0.0 && residual / initial <= criteria.rel_tol;
            if residual <= criteria.abs_tol || relative_met {
                return ContinueDecision::Converged;
            }
        }
        if initial > 0.0 && residual > criteria.divergence_factor * initial {
            return ContinueDecision::Abort(DivergenceReason::ResidualGrowth);
        }
        if iteration >= criteria.max_iterations {
            return ContinueDecision::Abort(DivergenceReason::IterationCap);
        }
        ContinueDecision::Continue
    }

    /// The accumulated record of a stream, empty if the stream was never observed.
    pub fn record(&self, stream: StreamId) -> ConvergenceRecord {
        self.records
            .get(&stream)
            .cloned()
            .unwrap_or_else(|| ConvergenceRecord::new(stream))
    }

    pub fn records(&self) -> impl Iterator<Item = &ConvergenceRecord> {
        self.records.values()
    }
}
