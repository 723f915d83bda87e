//! Richardson-Lucy deconvolution driver.
//!
//! Each iteration forms the ratio `r = data / forward(f)` and applies the
//! multiplicative update `f = f * max(adjoint(r), 0)`, floored at a tiny
//! positive value so no voxel is ever pinned at zero. The Euclidean norm
//! of `r` is reported after every step.

use serde::{Deserialize, Serialize};

use crate::schema::{DeconvConfig, StartGuess};

use super::{
    ConvolutionOperator, DeconvError, SolverMonitor, SolverPhase, Volume, build_operator,
};

/// Forward values within this fraction of `max|forward|` are round-off.
const FORWARD_ROUND_OFF: f32 = 1e-5;

/// Smallest value an updated estimate voxel may take.
const ESTIMATE_FLOOR: f32 = 1e-12;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Stopped early on request; the estimate is partial.
    Cancelled,
}

/// Diagnostics for one finished iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    /// 1-based iteration number.
    pub iteration: usize,
    pub total_iterations: usize,
    pub residual_norm: f32,
}

/// Result of [`RichardsonLucy::deconv`].
#[derive(Debug, Clone)]
pub struct DeconvOutcome {
    pub estimate: Volume,
    pub status: RunStatus,
    pub iterations_completed: usize,
    pub residual_norms: Vec<f32>,
}

impl DeconvOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Scratch buffers allocated once per run.
struct Buffers {
    forward: Vec<f32>,
    ratio: Vec<f32>,
    correction: Vec<f32>,
}

impl Buffers {
    fn new(len: usize) -> Self {
        Self {
            forward: vec![0.0; len],
            ratio: vec![0.0; len],
            correction: vec![0.0; len],
        }
    }
}

/// Iterative Richardson-Lucy solver over a configured operator.
pub struct RichardsonLucy {
    operator: Box<dyn ConvolutionOperator>,
    start_guess: StartGuess,
    snapshot_estimate: bool,
    monitor: SolverMonitor,
    estimate: Option<Volume>,
    residual_norms: Vec<f32>,
}

impl RichardsonLucy {
    pub fn new(operator: Box<dyn ConvolutionOperator>) -> Self {
        Self {
            operator,
            start_guess: StartGuess::default(),
            snapshot_estimate: false,
            monitor: SolverMonitor::new(),
            estimate: None,
            residual_norms: Vec::new(),
        }
    }

    /// Build an unconfigured solver from a run configuration.
    ///
    /// The operator still needs [`ConvolutionOperator::compute`] through
    /// [`RichardsonLucy::operator_mut`] before a run.
    pub fn from_config(config: &DeconvConfig) -> Self {
        Self::new(build_operator(config.operator, config.boundary))
            .with_start_guess(config.start_guess)
            .with_estimate_snapshots(config.snapshot_estimate)
    }

    pub fn with_start_guess(mut self, start_guess: StartGuess) -> Self {
        self.start_guess = start_guess;
        self
    }

    /// Publish a copy of the estimate to the monitor after every iteration.
    pub fn with_estimate_snapshots(mut self, enabled: bool) -> Self {
        self.snapshot_estimate = enabled;
        self
    }

    pub fn operator(&self) -> &dyn ConvolutionOperator {
        self.operator.as_ref()
    }

    pub fn operator_mut(&mut self) -> &mut dyn ConvolutionOperator {
        self.operator.as_mut()
    }

    /// A handle that can cancel or observe this solver from another thread.
    pub fn monitor(&self) -> SolverMonitor {
        self.monitor.clone()
    }

    /// Estimate left by the last run, if any.
    pub fn estimate(&self) -> Option<&Volume> {
        self.estimate.as_ref()
    }

    /// Residual norms of the last run, one per completed iteration.
    pub fn residual_norms(&self) -> &[f32] {
        &self.residual_norms
    }

    pub fn deconv(
        &mut self,
        data: &Volume,
        lambda: f32,
        iterations: usize,
    ) -> Result<DeconvOutcome, DeconvError> {
        self.deconv_with_callback(data, lambda, iterations, |_| {})
    }

    /// Run `iterations` update steps, calling `callback` after each one.
    ///
    /// `lambda` is recorded in the logs only; the update is unregularised.
    pub fn deconv_with_callback<F>(
        &mut self,
        data: &Volume,
        lambda: f32,
        iterations: usize,
        mut callback: F,
    ) -> Result<DeconvOutcome, DeconvError>
    where
        F: FnMut(&IterationReport),
    {
        self.check_preconditions(data, iterations)?;

        let shape = data.shape();
        let mut estimate = match self.start_guess {
            StartGuess::Mean => Volume::filled(shape, data.mean()),
            StartGuess::Data => data.clone(),
        };
        let mut buffers = Buffers::new(shape.len());

        self.residual_norms.clear();
        self.estimate = None;
        self.monitor.begin(iterations);

        log::info!(
            "Richardson-Lucy: {} iterations on {} with {} operator (lambda = {}, start = {:?})",
            iterations,
            shape,
            self.operator.name(),
            lambda,
            self.start_guess
        );

        let mut status = RunStatus::Completed;
        for iteration in 1..=iterations {
            if self.monitor.is_cancel_requested() {
                log::warn!(
                    "Cancelled after {} of {} iterations",
                    iteration - 1,
                    iterations
                );
                status = RunStatus::Cancelled;
                break;
            }

            let residual_norm = match self.step(data, &mut estimate, &mut buffers, iteration) {
                Ok(norm) => norm,
                Err(err) => {
                    self.monitor.finish(SolverPhase::Failed);
                    self.estimate = Some(estimate);
                    return Err(err);
                }
            };

            log::trace!("Iteration {}: residual norm {}", iteration, residual_norm);
            self.residual_norms.push(residual_norm);

            let snapshot = self.snapshot_estimate.then(|| estimate.clone());
            self.monitor.publish(iteration, residual_norm, snapshot);
            callback(&IterationReport {
                iteration,
                total_iterations: iterations,
                residual_norm,
            });
        }

        let iterations_completed = self.residual_norms.len();
        self.monitor.finish(match status {
            RunStatus::Completed => SolverPhase::Done,
            RunStatus::Cancelled => SolverPhase::Cancelled,
        });
        if status == RunStatus::Completed {
            log::info!(
                "Richardson-Lucy finished: final residual norm {:?}",
                self.residual_norms.last()
            );
        }

        self.estimate = Some(estimate.clone());
        Ok(DeconvOutcome {
            estimate,
            status,
            iterations_completed,
            residual_norms: self.residual_norms.clone(),
        })
    }

    fn check_preconditions(&self, data: &Volume, iterations: usize) -> Result<(), DeconvError> {
        let shape = self.operator.shape().ok_or(DeconvError::NotConfigured)?;
        if shape != data.shape() {
            return Err(DeconvError::ShapeMismatch {
                expected: shape,
                actual: data.shape(),
            });
        }
        if let Some((index, value)) = data.find_invalid() {
            return Err(DeconvError::InvalidData { index, value });
        }
        if iterations == 0 {
            return Err(DeconvError::ZeroIterations);
        }
        Ok(())
    }

    /// One multiplicative update. Leaves `estimate` untouched on error.
    fn step(
        &mut self,
        data: &Volume,
        estimate: &mut Volume,
        buffers: &mut Buffers,
        iteration: usize,
    ) -> Result<f32, DeconvError> {
        self.operator
            .forward(estimate.as_slice(), &mut buffers.forward)?;

        // Transform operators leave round-off of either sign where the exact
        // projection is tiny; only exact zeros and clearly negative values
        // are degenerate.
        let max_abs = buffers
            .forward
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0f32, |m, &v| m.max(v.abs()));
        let round_off = max_abs * FORWARD_ROUND_OFF;

        if let Some(index) = buffers
            .forward
            .iter()
            .position(|&v| !v.is_finite() || v == 0.0 || v < -round_off)
        {
            let value = buffers.forward[index];
            let position = data.shape().position(index);
            log::error!(
                "Degenerate forward projection at iteration {}, voxel {:?}: {}",
                iteration,
                position,
                value
            );
            return Err(DeconvError::DegenerateForward {
                iteration,
                index,
                position,
                value,
            });
        }

        let mut sum_sq = 0.0f64;
        for ((r, &d), &f) in buffers
            .ratio
            .iter_mut()
            .zip(data.as_slice())
            .zip(&buffers.forward)
        {
            *r = d / f.max(round_off);
            sum_sq += (*r as f64) * (*r as f64);
        }

        self.operator
            .adjoint(&buffers.ratio, &mut buffers.correction)?;
        for (e, &c) in estimate
            .as_mut_slice()
            .iter_mut()
            .zip(&buffers.correction)
        {
            *e = (*e * c.max(0.0)).max(ESTIMATE_FLOOR);
        }

        Ok(sum_sq.sqrt() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{Shape, psf};
    use crate::schema::{Bead, Boundary, OperatorKind, PsfModel, SceneConfig};

    const ALL_KINDS: [OperatorKind; 3] = [
        OperatorKind::Direct,
        OperatorKind::Fourier,
        OperatorKind::CachedFourier,
    ];

    fn binomial_psf() -> Volume {
        psf::from_model(&PsfModel::Binomial { size: (3, 3, 3) }).unwrap()
    }

    fn configured(kind: OperatorKind, shape: Shape) -> RichardsonLucy {
        let mut operator = build_operator(kind, Boundary::Reflect);
        operator.compute(&binomial_psf(), shape).unwrap();
        RichardsonLucy::new(operator)
    }

    fn spike_data() -> Volume {
        let mut data = Volume::filled(Shape::new(16, 16, 8), 1.0);
        data.set(5, 9, 3, 100.0);
        data
    }

    #[test]
    fn test_spike_is_recovered() {
        let data = spike_data();
        for kind in ALL_KINDS {
            let mut solver = configured(kind, data.shape());
            let outcome = solver.deconv(&data, 0.0, 5).unwrap();

            assert_eq!(outcome.status, RunStatus::Completed);
            assert_eq!(outcome.iterations_completed, 5);
            assert_eq!(outcome.residual_norms.len(), 5);
            assert_eq!(outcome.estimate.argmax(), (5, 9, 3), "{:?}", kind);
            assert!(outcome.estimate.max() > data.mean());
            assert_eq!(solver.monitor().phase(), SolverPhase::Done);
        }
    }

    #[test]
    fn test_flat_data_is_a_fixed_point() {
        let shape = Shape::new(8, 8, 6);
        let data = Volume::filled(shape, 4.0);
        let mut solver = configured(OperatorKind::CachedFourier, shape).with_estimate_snapshots(true);
        let monitor = solver.monitor();

        let mut changes = Vec::new();
        let mut previous = Volume::filled(shape, 4.0);
        solver
            .deconv_with_callback(&data, 0.0, 6, |_| {
                if let Some(current) = monitor.snapshot().estimate {
                    let change: f32 = current
                        .as_slice()
                        .iter()
                        .zip(previous.as_slice())
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0, f32::max);
                    changes.push(change);
                    previous = current;
                }
            })
            .unwrap();

        assert_eq!(changes.len(), 6);
        assert!(changes.iter().all(|&c| c < 1e-3), "{:?}", changes);
        let estimate = solver.estimate().unwrap();
        assert!(estimate.as_slice().iter().all(|v| (v - 4.0).abs() < 1e-3));
        // Ratio is all ones, so its norm is sqrt(len).
        let expected = (shape.len() as f32).sqrt();
        assert!(
            solver
                .residual_norms()
                .iter()
                .all(|n| (n - expected).abs() < 1e-2 * expected)
        );
    }

    #[test]
    fn test_cancel_after_two_iterations() {
        let data = spike_data();
        let start = Volume::filled(data.shape(), data.mean());

        let mut full = configured(OperatorKind::CachedFourier, data.shape());
        let full_outcome = full.deconv(&data, 0.0, 10).unwrap();

        let mut solver = configured(OperatorKind::CachedFourier, data.shape());
        let monitor = solver.monitor();
        let outcome = solver
            .deconv_with_callback(&data, 0.0, 10, |report| {
                if report.iteration == 2 {
                    monitor.cancel();
                }
            })
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(!outcome.is_complete());
        assert_eq!(outcome.iterations_completed, 2);
        assert_eq!(outcome.residual_norms.len(), 2);
        assert_ne!(outcome.estimate, start);
        assert_ne!(outcome.estimate, full_outcome.estimate);
        assert_eq!(solver.monitor().phase(), SolverPhase::Cancelled);
        assert_eq!(solver.monitor().snapshot().iteration, 2);
    }

    #[test]
    fn test_cancel_before_start_stops_at_first_boundary() {
        let data = spike_data();
        let mut solver = configured(OperatorKind::CachedFourier, data.shape());
        let monitor = solver.monitor();

        // Issued from the driver before the worker reaches the loop.
        monitor.cancel();
        let worker = std::thread::spawn(move || {
            let outcome = solver.deconv(&data, 0.0, 10);
            (solver, outcome)
        });
        let (solver, outcome) = worker.join().unwrap();
        let outcome = outcome.unwrap();

        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert_eq!(outcome.iterations_completed, 0);
        assert!(outcome.residual_norms.is_empty());
        assert_eq!(outcome.estimate, Volume::filled(spike_data().shape(), spike_data().mean()));
        assert_eq!(solver.monitor().phase(), SolverPhase::Cancelled);
        assert!(!monitor.is_cancel_requested());
    }

    #[test]
    fn test_consumed_cancel_does_not_stop_next_run() {
        let data = spike_data();
        let mut solver = configured(OperatorKind::Direct, data.shape());
        let monitor = solver.monitor();

        let first = solver
            .deconv_with_callback(&data, 0.0, 5, |report| {
                if report.iteration == 1 {
                    monitor.cancel();
                }
            })
            .unwrap();
        assert_eq!(first.status, RunStatus::Cancelled);
        assert_eq!(first.iterations_completed, 1);

        let second = solver.deconv(&data, 0.0, 2).unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.iterations_completed, 2);

        // A fresh request between runs still applies to the next one.
        monitor.cancel();
        let third = solver.deconv(&data, 0.0, 2).unwrap();
        assert_eq!(third.status, RunStatus::Cancelled);
        assert_eq!(third.iterations_completed, 0);
    }

    #[test]
    fn test_estimate_stays_non_negative() {
        let shape = Shape::new(10, 10, 6);
        let data = Volume::from_fn(shape, |h, w, d| ((h * 3 + w * 7 + d * 5) % 11) as f32 + 0.5);

        for kind in ALL_KINDS {
            let mut solver = configured(kind, shape).with_estimate_snapshots(true);
            let monitor = solver.monitor();
            solver
                .deconv_with_callback(&data, 0.0, 8, |_| {
                    let estimate = monitor.snapshot().estimate.unwrap();
                    assert!(estimate.as_slice().iter().all(|&v| v >= 0.0));
                })
                .unwrap();
        }
    }

    #[test]
    fn test_zero_data_is_degenerate() {
        let shape = Shape::new(6, 6, 4);
        let data = Volume::zeros(shape);

        for kind in ALL_KINDS {
            let mut solver = configured(kind, shape);
            let err = solver.deconv(&data, 0.0, 3).unwrap_err();
            assert!(
                matches!(err, DeconvError::DegenerateForward { iteration: 1, .. }),
                "{:?}: {}",
                kind,
                err
            );
            assert_eq!(solver.monitor().phase(), SolverPhase::Failed);

            let retained = solver.estimate().unwrap();
            assert!(retained.as_slice().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_zero_block_in_start_guess_is_degenerate() {
        let shape = Shape::new(9, 9, 9);
        let data = Volume::from_fn(shape, |h, w, d| {
            if (2..7).contains(&h) && (2..7).contains(&w) && (2..7).contains(&d) {
                0.0
            } else {
                1.0
            }
        });
        let mut operator = build_operator(OperatorKind::Direct, Boundary::Periodic);
        operator.compute(&binomial_psf(), shape).unwrap();
        let mut solver = RichardsonLucy::new(operator).with_start_guess(StartGuess::Data);

        match solver.deconv(&data, 0.0, 3) {
            Err(DeconvError::DegenerateForward { position, .. }) => {
                assert!((3..6).contains(&position.0));
                assert!((3..6).contains(&position.1));
                assert!((3..6).contains(&position.2));
            }
            other => panic!("expected degenerate forward, got {:?}", other.map(|o| o.status)),
        }
        assert_eq!(solver.estimate(), Some(&data));
    }

    #[test]
    fn test_preconditions() {
        let shape = Shape::new(4, 4, 4);
        let data = Volume::filled(shape, 1.0);

        let mut unconfigured =
            RichardsonLucy::new(build_operator(OperatorKind::CachedFourier, Boundary::Reflect));
        assert!(matches!(
            unconfigured.deconv(&data, 0.0, 1),
            Err(DeconvError::NotConfigured)
        ));

        let mut solver = configured(OperatorKind::Direct, Shape::new(4, 4, 5));
        assert!(matches!(
            solver.deconv(&data, 0.0, 1),
            Err(DeconvError::ShapeMismatch { .. })
        ));

        let mut solver = configured(OperatorKind::Direct, shape);
        assert!(matches!(
            solver.deconv(&data, 0.0, 0),
            Err(DeconvError::ZeroIterations)
        ));

        let mut bad = data.clone();
        bad.set(1, 2, 3, f32::NAN);
        assert!(matches!(
            solver.deconv(&bad, 0.0, 1),
            Err(DeconvError::InvalidData { index, .. }) if index == shape.index(1, 2, 3)
        ));
        bad.set(1, 2, 3, -1.0);
        assert!(matches!(
            solver.deconv(&bad, 0.0, 1),
            Err(DeconvError::InvalidData { .. })
        ));
        assert_eq!(solver.monitor().phase(), SolverPhase::Idle);
    }

    #[test]
    fn test_run_on_worker_thread() {
        let data = spike_data();
        let mut solver = RichardsonLucy::from_config(&DeconvConfig {
            iterations: 3,
            snapshot_estimate: true,
            ..DeconvConfig::default()
        });
        solver
            .operator_mut()
            .compute(&binomial_psf(), data.shape())
            .unwrap();
        let monitor = solver.monitor();

        let handle = std::thread::spawn(move || solver.deconv(&data, 0.01, 3));
        let outcome = handle.join().unwrap().unwrap();

        assert_eq!(outcome.iterations_completed, 3);
        assert_eq!(monitor.phase(), SolverPhase::Done);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.iteration, 3);
        assert_eq!(snapshot.residual_norm, outcome.residual_norms.last().copied());
        assert!(snapshot.estimate.is_some());
    }

    #[test]
    fn test_config_and_builder_defaults_agree() {
        let config = DeconvConfig::default();
        let from_config = RichardsonLucy::from_config(&config);
        let built = RichardsonLucy::new(build_operator(config.operator, config.boundary));

        assert_eq!(from_config.snapshot_estimate, built.snapshot_estimate);
        assert_eq!(from_config.start_guess, built.start_guess);
        assert!(!built.snapshot_estimate);
    }

    #[test]
    fn test_zero_background_scene_completes_with_every_operator() {
        let scene = SceneConfig {
            height: 16,
            width: 16,
            depth: 12,
            background: 0.0,
            beads: vec![Bead {
                position: (8, 7, 6),
                amplitude: 50.0,
                radius: 0.0,
            }],
            psf: PsfModel::Gaussian {
                size: (5, 5, 5),
                sigma: (1.0, 1.0, 1.5),
            },
            noise: None,
        };
        let shape = scene.shape();
        let kernel = psf::from_model(&scene.psf).unwrap();

        let mut blur = build_operator(OperatorKind::CachedFourier, Boundary::Periodic);
        blur.compute(&kernel, shape).unwrap();
        let mut blurred = vec![0.0f32; shape.len()];
        blur.forward(scene.object().as_slice(), &mut blurred).unwrap();
        blurred.iter_mut().for_each(|v| *v = v.max(0.0));
        let data = Volume::new(shape, blurred).unwrap();

        for kind in ALL_KINDS {
            let mut operator = build_operator(kind, Boundary::Reflect);
            operator.compute(&kernel, shape).unwrap();
            let mut solver = RichardsonLucy::new(operator);

            let outcome = solver
                .deconv(&data, 0.0, 20)
                .unwrap_or_else(|e| panic!("{:?}: {}", kind, e));
            assert_eq!(outcome.status, RunStatus::Completed);
            assert_eq!(outcome.iterations_completed, 20);
            assert_eq!(outcome.estimate.argmax(), (8, 7, 6), "{:?}", kind);
            assert!(outcome.estimate.as_slice().iter().all(|&v| v > 0.0));
        }
    }
}
