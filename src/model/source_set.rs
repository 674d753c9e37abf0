//! The full parameter set: every source model of one separation run

use std::ops::Range;

use nalgebra::DMatrix;
use ndarray::Array2;
use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::excitation::ExcitationModel;
use super::source::SourceModel;
use super::spatial::SpatialComponent;
use crate::config::SeparationConfig;
use crate::error::SeparationError;

/// All source models, sharing channel, bin and frame counts
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    sources: Vec<SourceModel>,
    channels: usize,
    bins: usize,
    frames: usize,
}

impl ParameterSet {
    /// Collect source models, checking that their dimensions agree
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the list is empty or two sources disagree on
    /// channels, bins, frames or NMF rank
    pub fn new(sources: Vec<SourceModel>) -> Result<Self, SeparationError> {
        let first = sources.first().ok_or_else(|| {
            SeparationError::InvalidInput("at least one source model is required".to_string())
        })?;
        let (channels, bins, frames) = (first.channels(), first.bins(), first.frames());
        let rank = first.excitation().rank();

        for (j, source) in sources.iter().enumerate().skip(1) {
            let dims = (source.channels(), source.bins(), source.frames());
            if dims != (channels, bins, frames) {
                return Err(SeparationError::InvalidInput(format!(
                    "source {} is {} channels x {} bins x {} frames but source 0 is {} x {} x {}",
                    j, dims.0, dims.1, dims.2, channels, bins, frames
                )));
            }
            if source.excitation().rank() != rank {
                return Err(SeparationError::InvalidInput(format!(
                    "source {} has NMF rank {} but source 0 has rank {}",
                    j,
                    source.excitation().rank(),
                    rank
                )));
            }
        }

        Ok(Self {
            sources,
            channels,
            bins,
            frames,
        })
    }

    /// Number of sources J
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Always false: a parameter set holds at least one source
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Number of channels I
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of frequency bins F
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Number of time frames N
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Source models in order
    pub fn sources(&self) -> &[SourceModel] {
        &self.sources
    }

    /// Mutable source models
    pub fn sources_mut(&mut self) -> &mut [SourceModel] {
        &mut self.sources
    }

    /// Check the parameters against observed mixture dimensions
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError` naming both values on the first mismatch
    pub fn check_dimensions(
        &self,
        channels: usize,
        bins: usize,
        frames: usize,
    ) -> Result<(), SeparationError> {
        let checks = [
            ("channels", self.channels, channels),
            ("frequency bins", self.bins, bins),
            ("time frames", self.frames, frames),
        ];
        for (what, model, observed) in checks {
            if model != observed {
                return Err(SeparationError::ProcessingError(format!(
                    "number of {} in the source models ({}) differs from the mixture ({})",
                    what, model, observed
                )));
            }
        }
        Ok(())
    }

    /// Total spatial rank `Σ_j R_j`, the column count of the mixing matrix
    pub fn total_rank(&self) -> usize {
        self.sources.iter().map(|s| s.spatial().rank()).sum()
    }

    /// Columns of the mixing matrix owned by each source, in source order
    pub fn column_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.sources
            .iter()
            .map(|s| {
                let range = start..start + s.spatial().rank();
                start = range.end;
                range
            })
            .collect()
    }

    /// Mixing matrix `A(f)` (I×ΣR_j): the blocks `A_j(f)` side by side
    pub fn mixing_matrix(&self, bin: usize) -> DMatrix<Complex64> {
        let mut a = DMatrix::<Complex64>::zeros(self.channels, self.total_rank());
        for (source, range) in self.sources.iter().zip(self.column_ranges()) {
            a.columns_mut(range.start, range.len())
                .copy_from(&source.spatial().at(bin));
        }
        a
    }

    /// Modelled spectral power of every source (F×N each)
    pub fn powers(&self) -> Vec<Array2<f64>> {
        self.sources.iter().map(|s| s.excitation().power()).collect()
    }
}

/// Build the initial source models of a run
///
/// Spatial vectors are angularly spaced pan positions; NMF factors are drawn
/// from a ChaCha8 generator seeded with `config.seed`, source by source.
pub fn build_source_models(
    config: &SeparationConfig,
    channels: usize,
    bins: usize,
    frames: usize,
) -> Result<ParameterSet, SeparationError> {
    if channels != crate::io::STEREO {
        return Err(SeparationError::UnsupportedFormat(format!(
            "source models need {} channels (has {})",
            crate::io::STEREO,
            channels
        )));
    }

    log::debug!(
        "Building {} source models: rank={}, {} bins x {} frames, {} mixing",
        config.sources,
        config.nmf_rank,
        bins,
        frames,
        config.mixing_type.as_str()
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let sources = (0..config.sources)
        .map(|j| {
            let spatial = SpatialComponent::angular(
                j,
                config.sources,
                config.mixing_type,
                config.spatial_adaptability,
                bins,
            )?;
            let excitation = ExcitationModel::random(
                bins,
                config.nmf_rank,
                frames,
                config.basis_adaptability,
                config.activation_adaptability,
                &mut rng,
            )?;
            SourceModel::builder()
                .spatial(spatial)
                .excitation(excitation)
                .wiener(config.wiener)
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;

    ParameterSet::new(sources)
}
