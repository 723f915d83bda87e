//! Progress reporting and cancellation for a running solver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use super::Volume;

/// Lifecycle of a deconvolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverPhase {
    #[default]
    Idle,
    Iterating,
    Done,
    Cancelled,
    Failed,
}

/// State published at the end of each iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: SolverPhase,
    /// Iterations completed so far.
    pub iteration: usize,
    pub total_iterations: usize,
    /// Residual norm of the latest iteration.
    pub residual_norm: Option<f32>,
    /// Copy of the estimate, present only when snapshots are enabled.
    #[serde(skip)]
    pub estimate: Option<Volume>,
}

struct Shared {
    cancelled: AtomicBool,
    snapshot: RwLock<ProgressSnapshot>,
}

/// Handle for observing and cancelling a solver from another thread.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct SolverMonitor {
    shared: Arc<Shared>,
}

impl Default for SolverMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SolverMonitor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                snapshot: RwLock::new(ProgressSnapshot::default()),
            }),
        }
    }

    /// Ask the solver to stop at the next iteration boundary.
    ///
    /// A request made before a run starts stops that run before its first
    /// iteration.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.phase() == SolverPhase::Iterating
    }

    pub fn phase(&self) -> SolverPhase {
        self.read(|s| s.phase)
    }

    /// Latest published progress, including the estimate copy if enabled.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.read(|s| s.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&ProgressSnapshot) -> T) -> T {
        let guard = self
            .shared
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut guard = self
            .shared
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Reset progress for a new run. A pending cancel request is kept and
    /// honoured at the first iteration boundary.
    pub(crate) fn begin(&self, total_iterations: usize) {
        self.write(|s| {
            *s = ProgressSnapshot {
                phase: SolverPhase::Iterating,
                iteration: 0,
                total_iterations,
                residual_norm: None,
                estimate: None,
            };
        });
    }

    pub(crate) fn publish(&self, iteration: usize, residual_norm: f32, estimate: Option<Volume>) {
        self.write(|s| {
            s.iteration = iteration;
            s.residual_norm = Some(residual_norm);
            if estimate.is_some() {
                s.estimate = estimate;
            }
        });
    }

    /// Record the terminal phase and consume any cancel request.
    pub(crate) fn finish(&self, phase: SolverPhase) {
        self.write(|s| s.phase = phase);
        self.shared.cancelled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Shape;

    #[test]
    fn test_lifecycle() {
        let monitor = SolverMonitor::new();
        assert_eq!(monitor.phase(), SolverPhase::Idle);
        assert!(!monitor.is_running());

        monitor.cancel();
        monitor.begin(4);
        assert!(monitor.is_cancel_requested(), "begin keeps a pending cancel");
        assert!(monitor.is_running());

        monitor.publish(1, 0.5, Some(Volume::zeros(Shape::new(2, 2, 2))));
        monitor.publish(2, 0.25, None);
        let snap = monitor.snapshot();
        assert_eq!(snap.iteration, 2);
        assert_eq!(snap.total_iterations, 4);
        assert_eq!(snap.residual_norm, Some(0.25));
        assert!(snap.estimate.is_some());

        monitor.finish(SolverPhase::Done);
        assert_eq!(monitor.phase(), SolverPhase::Done);
        assert!(!monitor.is_running());
        assert!(!monitor.is_cancel_requested(), "finish consumes the cancel");
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = SolverMonitor::new();
        let other = monitor.clone();
        std::thread::spawn(move || other.cancel()).join().unwrap();
        assert!(monitor.is_cancel_requested());
    }

    #[test]
    fn test_snapshot_serializes_without_estimate() {
        let snap = ProgressSnapshot {
            phase: SolverPhase::Cancelled,
            iteration: 2,
            total_iterations: 10,
            residual_norm: Some(1.5),
            estimate: Some(Volume::zeros(Shape::new(1, 1, 1))),
        };
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"cancelled\""));
        assert!(!json.contains("estimate"));
    }
}
