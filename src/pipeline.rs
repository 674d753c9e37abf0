//! Pipeline context
//!
//! Owns everything a separation run shares between stages: the validated
//! configuration, the STFT plan, the optional work directory for intermediate
//! files, and per-stage timings. Stages run strictly in order:
//!
//! ```text
//! Resample → Transform → {ModelBuild, Covariance} → Estimation → Reconstruction
//! ```
//!
//! Every error leaving a stage is tagged with that stage.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::SeparationConfig;
use crate::covariance::{save_tensor, MixtureCovariance};
use crate::error::{SeparationError, Stage};
use crate::estimation::{EmEstimator, EmReport};
use crate::io::Mixture;
use crate::model::{self, ParameterSet};
use crate::persist::{ModelDocument, COVARIANCE_FILE, ESTIMATED_SOURCES_FILE, SOURCES_FILE};
use crate::preprocessing::resample::resample_mixture;
use crate::reconstruction;
use crate::result::{SeparationMetadata, SeparationResult, SourceImage, StageTiming};
use crate::transform::{Spectrogram, Stft};

/// Directory receiving intermediate files
#[derive(Debug)]
struct WorkDir {
    path: PathBuf,
    keep: bool,
    created: bool,
}

/// Explicit state of one separation run
#[derive(Debug)]
pub struct PipelineContext {
    config: SeparationConfig,
    stft: Stft,
    work_dir: Option<WorkDir>,
    timings: Vec<StageTiming>,
}

impl PipelineContext {
    /// Validate `config` and plan the transform
    ///
    /// With `persist_intermediates`, intermediate files go to a fresh
    /// directory under the system temporary directory, removed by
    /// [`PipelineContext::finish`]. Use [`PipelineContext::with_work_dir`] to
    /// choose another location.
    pub fn new(config: SeparationConfig) -> Result<Self, SeparationError> {
        config.validate()?;
        let stft = Stft::new(config.wlen, config.window)?;
        let work_dir = config.persist_intermediates.then(|| WorkDir {
            path: std::env::temp_dir().join(format!(
                "stratum-separation-{}-{}",
                std::process::id(),
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default()
            )),
            keep: false,
            created: false,
        });
        Ok(Self {
            config,
            stft,
            work_dir,
            timings: Vec::new(),
        })
    }

    /// Use `path` as work directory; it is created on the first write
    ///
    /// When `keep` is false, [`PipelineContext::finish`] removes the
    /// intermediate files (and the directory, if the pipeline created it).
    pub fn with_work_dir(mut self, path: &Path, keep: bool) -> Self {
        self.work_dir = Some(WorkDir {
            path: path.to_path_buf(),
            keep,
            created: false,
        });
        self
    }

    /// Validated configuration
    pub fn config(&self) -> &SeparationConfig {
        &self.config
    }

    /// Work directory, when intermediate files are written
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_ref().map(|w| w.path.as_path())
    }

    /// Timings of the stages run so far
    pub fn timings(&self) -> &[StageTiming] {
        &self.timings
    }

    fn timed<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce(&Self) -> Result<T, SeparationError>,
    ) -> Result<T, SeparationError> {
        let start = Instant::now();
        let out = f(self).map_err(|e| e.in_stage(stage));
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        log::debug!("Stage {} took {:.2} ms", stage, elapsed_ms);
        self.timings.push(StageTiming {
            stage: stage.name().to_string(),
            elapsed_ms,
        });
        out
    }

    /// Write an intermediate file when a work directory is set
    fn persist(
        &mut self,
        f: impl FnOnce(&Path) -> Result<(), SeparationError>,
    ) -> Result<(), SeparationError> {
        let Some(work_dir) = self.work_dir.as_mut() else {
            return Ok(());
        };
        if !work_dir.path.exists() {
            fs::create_dir_all(&work_dir.path).map_err(|e| {
                SeparationError::Io(format!("cannot create '{}': {}", work_dir.path.display(), e))
                    .in_stage(Stage::Persist)
            })?;
            work_dir.created = true;
        }
        self.timed(Stage::Persist, |ctx| match ctx.work_dir() {
            Some(dir) => f(dir),
            None => Ok(()),
        })
    }

    /// Resample the mixture to the processing rate
    pub fn prepare(&mut self, mixture: &Mixture) -> Result<Mixture, SeparationError> {
        let rate = self.config.target_sample_rate;
        self.timed(Stage::Resample, |_| resample_mixture(mixture, rate))
    }

    /// Forward STFT of a prepared mixture
    pub fn transform(&mut self, mixture: &Mixture) -> Result<Spectrogram, SeparationError> {
        self.timed(Stage::Transform, |ctx| ctx.stft.forward(mixture.samples()))
    }

    /// Per-frame mixture covariance (`Rx.bin` when persisting)
    pub fn compute_mixture_covariance(
        &mut self,
        spec: &Spectrogram,
    ) -> Result<MixtureCovariance, SeparationError> {
        let cov = self.timed(Stage::Covariance, |_| {
            let cov = MixtureCovariance::from_spectrogram(spec)?;
            cov.validate()?;
            Ok(cov)
        })?;
        self.persist(|dir| save_tensor(&cov, &dir.join(COVARIANCE_FILE)))?;
        Ok(cov)
    }

    /// Initial source models for a spectrogram (`sources.xml` when persisting)
    pub fn build_source_models(
        &mut self,
        spec: &Spectrogram,
    ) -> Result<ParameterSet, SeparationError> {
        let params = self.timed(Stage::ModelBuild, |ctx| {
            model::build_source_models(&ctx.config, spec.channels(), spec.bins(), spec.frames())
        })?;
        if self.work_dir.is_some() {
            let doc = self.document(&params);
            self.persist(|dir| doc.save(&dir.join(SOURCES_FILE)))?;
        }
        Ok(params)
    }

    /// Run EM on `params` in place (`sources.xml.new` when persisting)
    pub fn estimate_source_parameters(
        &mut self,
        cov: &MixtureCovariance,
        params: &mut ParameterSet,
    ) -> Result<EmReport, SeparationError> {
        let report = self.timed(Stage::Estimation, |ctx| {
            params.check_dimensions(cov.channels(), cov.bins(), cov.frames())?;
            EmEstimator::new(&ctx.config, cov).run(params)
        })?;
        if self.work_dir.is_some() {
            let doc = self.document(params);
            self.persist(|dir| doc.save(&dir.join(ESTIMATED_SOURCES_FILE)))?;
        }
        Ok(report)
    }

    /// Wiener-filter the mixture into time-domain source images
    ///
    /// Also returns the number of non-finite image values replaced with zero.
    pub fn estimate_sources(
        &mut self,
        spec: &Spectrogram,
        params: &ParameterSet,
        sample_rate: u32,
    ) -> Result<(Vec<SourceImage>, usize), SeparationError> {
        self.timed(Stage::Reconstruction, |ctx| {
            let output = reconstruction::reconstruct(spec, params, &ctx.stft)?;
            let images = output
                .images
                .into_iter()
                .zip(params.sources())
                .enumerate()
                .map(|(index, (samples, source))| SourceImage {
                    index,
                    name: source.name().map(str::to_string),
                    samples,
                    sample_rate,
                })
                .collect();
            Ok((images, output.replaced_values))
        })
    }

    fn document(&self, params: &ParameterSet) -> ModelDocument {
        ModelDocument {
            iterations: self.config.iterations,
            wlen: self.config.wlen,
            params: params.clone(),
        }
    }

    /// Run every stage on a mixture
    pub fn run(&mut self, mixture: &Mixture) -> Result<SeparationResult, SeparationError> {
        let start = Instant::now();
        log::info!(
            "Separating {:.2} s mixture at {} Hz into {} sources",
            mixture.duration_seconds(),
            mixture.sample_rate(),
            self.config.sources
        );

        let prepared = self.prepare(mixture)?;
        let spec = self.transform(&prepared)?;
        let mut params = self.build_source_models(&spec)?;
        let cov = self.compute_mixture_covariance(&spec)?;
        let report = self.estimate_source_parameters(&cov, &mut params)?;
        let (images, replaced_values) =
            self.estimate_sources(&spec, &params, prepared.sample_rate())?;

        let metadata = SeparationMetadata {
            duration_seconds: mixture.duration_seconds(),
            input_sample_rate: mixture.sample_rate(),
            sample_rate: prepared.sample_rate(),
            resampled: prepared.sample_rate() != mixture.sample_rate(),
            sources: images.len(),
            iterations: report.iterations,
            final_log_likelihood: report.final_log_likelihood(),
            clamped_entries: report.clamped_entries,
            unstable_iterations: report.unstable_iterations,
            replaced_values,
            processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            stage_timings: self.timings.clone(),
        };

        log::info!(
            "Separation complete in {:.0} ms ({} EM iterations)",
            metadata.processing_time_ms,
            metadata.iterations
        );

        Ok(SeparationResult { images, metadata })
    }

    /// Tear down the context, removing intermediate files unless kept
    pub fn finish(self) -> Result<(), SeparationError> {
        let Some(work_dir) = self.work_dir else {
            return Ok(());
        };
        if work_dir.keep {
            log::debug!("Keeping intermediate files in {}", work_dir.path.display());
            return Ok(());
        }
        for name in [SOURCES_FILE, COVARIANCE_FILE, ESTIMATED_SOURCES_FILE] {
            let path = work_dir.path.join(name);
            if path.exists() {
                fs::remove_file(&path).map_err(|e| {
                    SeparationError::Io(format!("cannot remove '{}': {}", path.display(), e))
                        .in_stage(Stage::Persist)
                })?;
            }
        }
        if work_dir.created {
            // only succeeds when nothing else was put there
            if let Err(e) = fs::remove_dir(&work_dir.path) {
                log::warn!(
                    "Could not remove work directory {}: {}",
                    work_dir.path.display(),
                    e
                );
            }
        }
        Ok(())
    }
}
