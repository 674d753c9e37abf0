//! Generalised EM loop
//!
//! Each iteration runs the E-step, then updates the free mixing vectors with
//! their closed-form maximisers and the free NMF factors with one
//! Itakura–Saito multiplicative update. After the M-step every NMF entry is
//! forced above the positivity floor.
//!
//! An iteration is unstable when the E-step could not be computed, the
//! log-likelihood is not finite, a mixing update was not finite, or NaN /
//! infinite NMF entries had to be replaced. Too many consecutive unstable
//! iterations end the run with `ConvergenceFailure`.

use std::ops::Range;

use nalgebra::DMatrix;
use num_complex::Complex64;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::noise::NoiseProfile;
use super::statistics::SufficientStatistics;
use crate::config::SeparationConfig;
use crate::covariance::MixtureCovariance;
use crate::error::SeparationError;
use crate::model::{FloorReport, MixingType, ParameterSet, SpatialComponent};

/// Summary of an EM run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmReport {
    /// Iterations executed
    pub iterations: usize,
    /// Log-likelihood computed by each E-step (NaN when it could not be computed)
    pub log_likelihood: Vec<f64>,
    /// NMF entries clamped or replaced over the whole run
    pub clamped_entries: usize,
    /// Iterations flagged unstable over the whole run
    pub unstable_iterations: usize,
}

impl EmReport {
    /// Last finite log-likelihood
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihood.iter().rev().copied().find(|v| v.is_finite())
    }
}

/// Result of a single EM iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationOutcome {
    /// Log-likelihood of the parameters before the M-step
    pub log_likelihood: f64,
    /// Entries changed by the positivity pass
    pub floor: FloorReport,
    /// Whether the iteration was flagged unstable
    pub unstable: bool,
}

/// EM estimator over a fixed covariance tensor
#[derive(Debug)]
pub struct EmEstimator<'a> {
    cov: &'a MixtureCovariance,
    noise: NoiseProfile,
    iterations: usize,
    floor: f64,
    max_unstable: usize,
    iteration: usize,
    consecutive_unstable: usize,
    report: EmReport,
}

impl<'a> EmEstimator<'a> {
    /// Prepare an estimator using the EM settings of `config`
    pub fn new(config: &SeparationConfig, cov: &'a MixtureCovariance) -> Self {
        Self {
            cov,
            noise: NoiseProfile::new(cov, config.noise, config.iterations),
            iterations: config.iterations,
            floor: config.positivity_floor,
            max_unstable: config.max_unstable_iterations,
            iteration: 0,
            consecutive_unstable: 0,
            report: EmReport::default(),
        }
    }

    /// Iterations executed so far
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// True once the iteration budget is spent
    pub fn is_finished(&self) -> bool {
        self.iteration >= self.iterations
    }

    /// Report of the iterations executed so far
    pub fn report(&self) -> &EmReport {
        &self.report
    }

    /// Run one E-step and M-step
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError` when the parameters do not match the
    /// covariance, and `ConvergenceFailure` when the instability budget is
    /// exhausted
    pub fn step(&mut self, params: &mut ParameterSet) -> Result<IterationOutcome, SeparationError> {
        params.check_dimensions(self.cov.channels(), self.cov.bins(), self.cov.frames())?;

        let noise = self.noise.variances(self.iteration);
        let mut unstable = false;
        let mut log_likelihood = f64::NAN;

        match SufficientStatistics::compute(self.cov, params, &noise) {
            Ok(stats) => {
                log_likelihood = stats.log_likelihood;
                if !log_likelihood.is_finite() {
                    log::warn!(
                        "EM iteration {}: log-likelihood is {}",
                        self.iteration + 1,
                        log_likelihood
                    );
                    unstable = true;
                }
                if !update_mixing(params, &stats) {
                    log::warn!(
                        "EM iteration {}: mixing update was not finite, keeping previous values",
                        self.iteration + 1
                    );
                    unstable = true;
                }
                for (j, source) in params.sources_mut().iter_mut().enumerate() {
                    source.excitation_mut().update(stats.source_power(j))?;
                }
            }
            Err(SeparationError::NumericInstability(msg)) => {
                log::warn!("EM iteration {}: {}", self.iteration + 1, msg);
                unstable = true;
            }
            Err(e) => return Err(e),
        }

        let mut floor = FloorReport::default();
        for source in params.sources_mut() {
            floor.merge(source.excitation_mut().enforce_floor(self.floor));
        }
        if floor.non_finite > 0 {
            log::warn!(
                "EM iteration {}: replaced {} non-finite NMF entries with {:e}",
                self.iteration + 1,
                floor.non_finite,
                self.floor
            );
            unstable = true;
        }
        if floor.clamped > 0 {
            log::warn!(
                "EM iteration {}: clamped {} NMF entries to {:e}",
                self.iteration + 1,
                floor.clamped,
                self.floor
            );
        }

        let previous = self.report.final_log_likelihood();
        self.iteration += 1;
        self.report.iterations = self.iteration;
        self.report.log_likelihood.push(log_likelihood);
        self.report.clamped_entries += floor.total();

        match previous {
            Some(prev) => log::debug!(
                "EM iteration {} of {}: log-likelihood {:.6}, improvement {:.3e}",
                self.iteration,
                self.iterations,
                log_likelihood,
                log_likelihood - prev
            ),
            None => log::debug!(
                "EM iteration {} of {}: log-likelihood {:.6}",
                self.iteration,
                self.iterations,
                log_likelihood
            ),
        }

        if unstable {
            self.report.unstable_iterations += 1;
            self.consecutive_unstable += 1;
            if self.consecutive_unstable > self.max_unstable {
                return Err(SeparationError::ConvergenceFailure(format!(
                    "{} consecutive unstable EM iterations (limit {}) at iteration {}",
                    self.consecutive_unstable, self.max_unstable, self.iteration
                )));
            }
        } else {
            self.consecutive_unstable = 0;
        }

        Ok(IterationOutcome {
            log_likelihood,
            floor,
            unstable,
        })
    }

    /// Run the remaining iterations and return the report
    pub fn run(mut self, params: &mut ParameterSet) -> Result<EmReport, SeparationError> {
        log::debug!(
            "Starting EM: {} sources, {} bins x {} frames, {} iterations",
            params.len(),
            self.cov.bins(),
            self.cov.frames(),
            self.iterations
        );
        while !self.is_finished() {
            self.step(params)?;
        }
        log::info!(
            "EM finished after {} iterations (log-likelihood {:?}, {} entries clamped, \
             {} unstable iterations)",
            self.report.iterations,
            self.report.final_log_likelihood(),
            self.report.clamped_entries,
            self.report.unstable_iterations
        );
        Ok(self.report)
    }
}

/// Columns of `m` listed in `cols`
fn select_columns(m: &DMatrix<Complex64>, cols: &[usize]) -> DMatrix<Complex64> {
    DMatrix::from_fn(m.nrows(), cols.len(), |r, c| m[(r, cols[c])])
}

/// Sub-matrix of `m` with rows `rows` and columns `cols`
fn select(m: &DMatrix<Complex64>, rows: &[usize], cols: &[usize]) -> DMatrix<Complex64> {
    DMatrix::from_fn(rows.len(), cols.len(), |r, c| m[(rows[r], cols[c])])
}

/// `Σ_n R̂xs_C − A_C̄ Σ_n R̂s_{C̄C}` at one bin
fn mixing_target(
    a: &DMatrix<Complex64>,
    rxs: &DMatrix<Complex64>,
    rs: &DMatrix<Complex64>,
    updated: &[usize],
    others: &[usize],
) -> DMatrix<Complex64> {
    let mut target = select_columns(rxs, updated);
    if !others.is_empty() {
        target -= select_columns(a, others) * select(rs, others, updated);
    }
    target
}

/// Update free mixing matrices in place; false when an update was discarded
///
/// Works on the columns of the global mixing matrix: every column of a free
/// convolutive source is re-estimated per bin, every column of a free
/// instantaneous source once from the real parts summed over bins.
fn update_mixing(params: &mut ParameterSet, stats: &SufficientStatistics) -> bool {
    let ranges = params.column_ranges();
    let free = |kind: MixingType| -> Vec<usize> {
        params
            .sources()
            .iter()
            .zip(&ranges)
            .filter(|(s, _)| {
                s.spatial().adaptability().is_free() && s.spatial().mixing_type() == kind
            })
            .flat_map(|(_, range)| range.clone())
            .collect()
    };
    let convolutive = free(MixingType::Convolutive);
    let instantaneous = free(MixingType::Instantaneous);
    let total = params.total_rank();
    let complement = |set: &[usize]| -> Vec<usize> {
        (0..total).filter(|r| !set.contains(r)).collect()
    };
    let mut stable = true;

    if !convolutive.is_empty() {
        let others = complement(&convolutive);
        let snapshot: &ParameterSet = params;
        let updates: Vec<Option<DMatrix<Complex64>>> = (0..snapshot.bins())
            .into_par_iter()
            .map(|f| {
                let a = snapshot.mixing_matrix(f);
                let target =
                    mixing_target(&a, &stats.rxs[f], &stats.rs[f], &convolutive, &others);
                let gram = select(&stats.rs[f], &convolutive, &convolutive);
                let new = target * gram.try_inverse()?;
                new.iter().all(|v| v.is_finite()).then_some(new)
            })
            .collect();

        for (f, update) in updates.into_iter().enumerate() {
            match update {
                Some(new) => write_back(params, &ranges, &convolutive, &new, |spatial, block| {
                    spatial.set_bin(f, &block)
                }),
                None => stable = false,
            }
        }
    }

    if !instantaneous.is_empty() {
        let others = complement(&instantaneous);
        let (channels, count) = (params.channels(), instantaneous.len());
        let mut num = DMatrix::<f64>::zeros(channels, count);
        let mut den = DMatrix::<f64>::zeros(count, count);
        for f in 0..params.bins() {
            let a = params.mixing_matrix(f);
            let target = mixing_target(&a, &stats.rxs[f], &stats.rs[f], &instantaneous, &others);
            num += target.map(|v| v.re);
            den += select(&stats.rs[f], &instantaneous, &instantaneous).map(|v| v.re);
        }
        match den.try_inverse().map(|inv| num * inv) {
            Some(new) if new.iter().all(|v| v.is_finite()) => {
                let new = new.map(|v| Complex64::new(v, 0.0));
                write_back(params, &ranges, &instantaneous, &new, |spatial, block| {
                    spatial.set_shared(&block.map(|v| v.re))
                });
            }
            _ => stable = false,
        }
    }

    stable
}

/// Hand the updated columns `new` (one per entry of `updated`) back to the
/// sources owning them, one I×R_j block at a time
fn write_back(
    params: &mut ParameterSet,
    ranges: &[Range<usize>],
    updated: &[usize],
    new: &DMatrix<Complex64>,
    mut apply: impl FnMut(&mut SpatialComponent, DMatrix<Complex64>),
) {
    for (source, range) in params.sources_mut().iter_mut().zip(ranges) {
        let Some(first) = updated.iter().position(|&c| c == range.start) else {
            continue;
        };
        let block = new.columns(first, range.len()).into_owned();
        apply(source.spatial_mut(), block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseSchedule;
    use crate::model::{build_source_models, Adaptability};
    use crate::transform::{Stft, WindowKind};
    use ndarray::Array2;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn covariance(samples: usize, seed: u64) -> MixtureCovariance {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x = Array2::from_shape_fn((2, samples), |(c, t)| {
            let tone = (t as f64 * 0.1 * (c + 1) as f64).sin();
            tone + 0.1 * (rng.random::<f64>() - 0.5)
        });
        let spec = Stft::new(64, WindowKind::Sine)
            .unwrap()
            .forward(x.view())
            .unwrap();
        MixtureCovariance::from_spectrogram(&spec).unwrap()
    }

    fn config(mixing_type: MixingType, iterations: usize) -> SeparationConfig {
        SeparationConfig {
            sources: 2,
            nmf_rank: 3,
            iterations,
            mixing_type,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_keeps_factors_above_floor() {
        let cov = covariance(2000, 1);
        let config = config(MixingType::Convolutive, 10);
        let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();

        let mut em = EmEstimator::new(&config, &cov);
        while !em.is_finished() {
            let outcome = em.step(&mut params).unwrap();
            assert!(!outcome.unstable);
            for source in params.sources() {
                let e = source.excitation();
                assert!(e
                    .basis()
                    .iter()
                    .chain(e.activation().iter())
                    .all(|&v| v.is_finite() && v >= config.positivity_floor));
            }
        }
        assert_eq!(em.report().iterations, 10);
        assert_eq!(em.report().log_likelihood.len(), 10);
    }

    #[test]
    fn test_likelihood_never_decreases_with_fixed_noise() {
        let cov = covariance(3000, 2);
        let mut config = config(MixingType::Instantaneous, 30);
        config.noise = NoiseSchedule {
            start_ratio: 1e-3,
            end_ratio: 1e-3,
        };
        let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();
        let report = EmEstimator::new(&config, &cov).run(&mut params).unwrap();

        assert!(report.log_likelihood.iter().all(|v| v.is_finite()));
        for (i, pair) in report.log_likelihood.windows(2).enumerate() {
            let tolerance = 1e-9 * pair[0].abs().max(1.0);
            assert!(
                pair[1] >= pair[0] - tolerance,
                "log-likelihood dropped from {} to {} at iteration {}",
                pair[0],
                pair[1],
                i + 2
            );
        }
        let first = report.log_likelihood[0];
        let last = report.final_log_likelihood().unwrap();
        assert!(last > first, "log-likelihood went from {} to {}", first, last);
    }

    #[test]
    fn test_fixed_components_are_not_updated() {
        let cov = covariance(1500, 3);
        let mut config = config(MixingType::Convolutive, 3);
        config.spatial_adaptability = Adaptability::Fixed;
        config.basis_adaptability = Adaptability::Fixed;
        let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();
        let initial = params.clone();

        EmEstimator::new(&config, &cov).run(&mut params).unwrap();
        for (before, after) in initial.sources().iter().zip(params.sources()) {
            assert_eq!(before.spatial(), after.spatial());
            assert_eq!(before.excitation().basis(), after.excitation().basis());
            assert_ne!(
                before.excitation().activation(),
                after.excitation().activation()
            );
        }
    }

    #[test]
    fn test_instantaneous_mixing_stays_real_and_shared() {
        let cov = covariance(1500, 4);
        let config = config(MixingType::Instantaneous, 5);
        let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();
        EmEstimator::new(&config, &cov).run(&mut params).unwrap();
        for source in params.sources() {
            assert_eq!(source.spatial().gains().dim(), (2, 1, 1));
            assert!(!source.spatial().is_complex());
        }
    }

    #[test]
    fn test_rank_two_sources_are_updated_blockwise() {
        let cov = covariance(2000, 8);
        for mixing_type in [MixingType::Convolutive, MixingType::Instantaneous] {
            let mut config = config(mixing_type, 8);
            config.noise = NoiseSchedule {
                start_ratio: 1e-3,
                end_ratio: 1e-3,
            };
            let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();
            let columns = match mixing_type {
                MixingType::Instantaneous => 1,
                MixingType::Convolutive => cov.bins(),
            };
            let gains = ndarray::Array3::from_shape_fn((2, 2, columns), |(i, r, _)| {
                Complex64::new(if i == r { 0.7 } else { 0.2 }, 0.0)
            });
            *params.sources_mut()[0].spatial_mut() =
                SpatialComponent::from_gains(gains, mixing_type, Adaptability::Free, cov.bins())
                    .unwrap();
            let initial = params.clone();

            let report = EmEstimator::new(&config, &cov).run(&mut params).unwrap();
            assert_eq!(report.unstable_iterations, 0);
            let first = report.log_likelihood[0];
            let last = report.final_log_likelihood().unwrap();
            assert!(last > first, "log-likelihood went from {} to {}", first, last);

            let spatial = params.sources()[0].spatial();
            assert_eq!(spatial.rank(), 2);
            assert_eq!(spatial.gains().dim(), (2, 2, columns));
            assert_ne!(spatial, initial.sources()[0].spatial());
            assert!(spatial.gains().iter().all(|g| g.is_finite()));
            if mixing_type == MixingType::Instantaneous {
                assert!(!spatial.is_complex());
            }
            assert_eq!(params.total_rank(), 3);
        }
    }

    #[test]
    fn test_run_is_deterministic() {
        let cov = covariance(1500, 5);
        let config = config(MixingType::Convolutive, 5);
        let run = || {
            let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();
            let report = EmEstimator::new(&config, &cov).run(&mut params).unwrap();
            (params, report)
        };
        let (pa, ra) = run();
        let (pb, rb) = run();
        assert_eq!(pa, pb);
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_persistent_instability_is_fatal() {
        let cov = covariance(800, 6);
        let mut config = config(MixingType::Convolutive, 20);
        config.max_unstable_iterations = 2;
        let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();

        let mut em = EmEstimator::new(&config, &cov);
        let mut failure = None;
        for _ in 0..4 {
            for source in params.sources_mut() {
                source.excitation_mut().factors_mut().0[[0, 0]] = f64::NAN;
            }
            if let Err(e) = em.step(&mut params) {
                failure = Some(e);
                break;
            }
        }
        assert!(
            matches!(failure, Some(SeparationError::ConvergenceFailure(_))),
            "{:?}",
            failure
        );
        assert_eq!(em.report().unstable_iterations, 3);
    }

    #[test]
    fn test_single_unstable_iteration_recovers() {
        let cov = covariance(800, 7);
        let config = config(MixingType::Convolutive, 4);
        let mut params = build_source_models(&config, 2, cov.bins(), cov.frames()).unwrap();

        let mut em = EmEstimator::new(&config, &cov);
        params.sources_mut()[0].excitation_mut().factors_mut().1[[0, 0]] = f64::INFINITY;
        let outcome = em.step(&mut params).unwrap();
        assert!(outcome.unstable);
        assert_eq!(outcome.floor.non_finite, 1);

        while !em.is_finished() {
            assert!(!em.step(&mut params).unwrap().unstable);
        }
        assert_eq!(em.report().unstable_iterations, 1);
    }
}
