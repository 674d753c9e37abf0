//! Spatial component of a source (rank-R mixing matrix)

use std::f64::consts::PI;

use nalgebra::DMatrix;
use ndarray::Array3;
use num_complex::Complex64;

use super::adaptability::{Adaptability, MixingType};
use crate::error::SeparationError;

/// Mixing matrix `A_j` of one source, giving the spatial covariance
/// `R_j(f) = A_j(f) A_j(f)ᴴ` of rank R
///
/// Gains are stored as a `(channels, rank, columns)` array: a single real
/// `I×R` matrix for instantaneous mixing, one complex matrix per frequency bin
/// for convolutive mixing.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialComponent {
    gains: Array3<Complex64>,
    mixing_type: MixingType,
    adaptability: Adaptability,
    bins: usize,
}

impl SpatialComponent {
    /// Build from explicit gains
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the array is empty, the column count does not
    /// match the mixing type, or an instantaneous gain has a non-zero
    /// imaginary part
    pub fn from_gains(
        gains: Array3<Complex64>,
        mixing_type: MixingType,
        adaptability: Adaptability,
        bins: usize,
    ) -> Result<Self, SeparationError> {
        let (channels, rank, columns) = gains.dim();
        if channels == 0 || rank == 0 {
            return Err(SeparationError::InvalidInput(format!(
                "mixing matrix is {} x {}, both dimensions must be > 0",
                channels, rank
            )));
        }
        let expected = match mixing_type {
            MixingType::Instantaneous => 1,
            MixingType::Convolutive => bins,
        };
        if columns != expected {
            return Err(SeparationError::InvalidInput(format!(
                "{} mixing parameter covers {} bins but should cover {}",
                mixing_type.as_str(),
                columns,
                expected
            )));
        }
        if mixing_type == MixingType::Instantaneous && gains.iter().any(|g| g.im != 0.0) {
            return Err(SeparationError::InvalidInput(
                "instantaneous mixing gains must be real".to_string(),
            ));
        }
        if gains.iter().any(|g| !g.is_finite()) {
            return Err(SeparationError::InvalidInput(
                "mixing gains must be finite".to_string(),
            ));
        }
        Ok(Self {
            gains,
            mixing_type,
            adaptability,
            bins,
        })
    }

    /// Stereo unit vector at angle `θ = (index + 1) π / (2 (count + 1))`,
    /// tiled across every bin for convolutive mixing
    ///
    /// Sources get evenly spaced pan positions strictly inside the stereo field.
    pub fn angular(
        index: usize,
        count: usize,
        mixing_type: MixingType,
        adaptability: Adaptability,
        bins: usize,
    ) -> Result<Self, SeparationError> {
        if index >= count {
            return Err(SeparationError::InvalidInput(format!(
                "source index {} out of range for {} sources",
                index, count
            )));
        }
        let theta = (index + 1) as f64 * PI / (2.0 * (count + 1) as f64);
        let columns = match mixing_type {
            MixingType::Instantaneous => 1,
            MixingType::Convolutive => bins,
        };
        let pan = [theta.sin(), theta.cos()];
        let gains = Array3::from_shape_fn((2, 1, columns), |(i, _, _)| Complex64::new(pan[i], 0.0));
        Self::from_gains(gains, mixing_type, adaptability, bins)
    }

    /// Number of channels I
    pub fn channels(&self) -> usize {
        self.gains.dim().0
    }

    /// Rank R of the spatial covariance
    pub fn rank(&self) -> usize {
        self.gains.dim().1
    }

    /// Number of frequency bins F the component applies to
    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Mixing type
    pub fn mixing_type(&self) -> MixingType {
        self.mixing_type
    }

    /// Adaptability
    pub fn adaptability(&self) -> Adaptability {
        self.adaptability
    }

    /// Raw gain array `(channels, rank, columns)`
    pub fn gains(&self) -> &Array3<Complex64> {
        &self.gains
    }

    /// True when any gain has a non-zero imaginary part
    pub fn is_complex(&self) -> bool {
        self.gains.iter().any(|g| g.im != 0.0)
    }

    fn column_index(&self, bin: usize) -> usize {
        match self.mixing_type {
            MixingType::Instantaneous => 0,
            MixingType::Convolutive => bin,
        }
    }

    /// Mixing matrix (I×R) at frequency bin `bin`
    pub fn at(&self, bin: usize) -> DMatrix<Complex64> {
        let col = self.column_index(bin);
        DMatrix::from_fn(self.channels(), self.rank(), |i, r| self.gains[[i, r, col]])
    }

    /// Spatial covariance `A Aᴴ` at frequency bin `bin`
    pub fn covariance(&self, bin: usize) -> DMatrix<Complex64> {
        let a = self.at(bin);
        &a * a.adjoint()
    }

    /// Replace the I×R gains of one bin (convolutive mixing)
    pub fn set_bin(&mut self, bin: usize, values: &DMatrix<Complex64>) {
        let col = self.column_index(bin);
        for i in 0..self.channels() {
            for r in 0..self.rank() {
                self.gains[[i, r, col]] = values[(i, r)];
            }
        }
    }

    /// Replace the shared real I×R gains (instantaneous mixing)
    pub fn set_shared(&mut self, values: &DMatrix<f64>) {
        for i in 0..self.channels() {
            for r in 0..self.rank() {
                self.gains[[i, r, 0]] = Complex64::new(values[(i, r)], 0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angular_positions_are_unit_and_distinct() {
        let count = 3;
        let mut previous: Option<f64> = None;
        for j in 0..count {
            let s = SpatialComponent::angular(
                j,
                count,
                MixingType::Convolutive,
                Adaptability::Free,
                5,
            )
            .unwrap();
            assert_eq!(s.gains().dim(), (2, 1, 5));
            assert_eq!(s.rank(), 1);
            let a = s.at(3);
            assert!((a.norm() - 1.0).abs() < 1e-12);
            assert_eq!(s.at(0), s.at(4), "tiled across bins");
            if let Some(p) = previous {
                assert!(a[(0, 0)].re > p, "left gain should grow with index");
            }
            previous = Some(a[(0, 0)].re);
        }
    }

    #[test]
    fn test_instantaneous_shares_one_column() {
        let s = SpatialComponent::angular(0, 1, MixingType::Instantaneous, Adaptability::Fixed, 9)
            .unwrap();
        assert_eq!(s.gains().dim(), (2, 1, 1));
        assert_eq!(s.at(0), s.at(8));
        // θ = π/4 for a single source: centred
        assert!((s.at(0)[(0, 0)].re - s.at(0)[(1, 0)].re).abs() < 1e-12);
        assert!(!s.is_complex());
    }

    #[test]
    fn test_rank_one_covariance_is_singular_hermitian() {
        let gains = Array3::from_shape_vec(
            (2, 1, 1),
            vec![Complex64::new(0.6, 0.0), Complex64::new(0.8, 0.0)],
        )
        .unwrap();
        let s =
            SpatialComponent::from_gains(gains, MixingType::Instantaneous, Adaptability::Free, 4)
                .unwrap();
        let r = s.covariance(2);
        assert!((r[(0, 0)].re - 0.36).abs() < 1e-12);
        assert!((r[(0, 1)] - r[(1, 0)].conj()).norm() < 1e-12);
        assert!((r.determinant().norm()) < 1e-12);
    }

    #[test]
    fn test_rank_two_covariance_is_full() {
        // A = [[1, 0.5i], [0, 1]] at every bin
        let gains = Array3::from_shape_fn((2, 2, 3), |(i, r, _)| match (i, r) {
            (0, 0) | (1, 1) => Complex64::new(1.0, 0.0),
            (0, 1) => Complex64::new(0.0, 0.5),
            _ => Complex64::new(0.0, 0.0),
        });
        let mut s =
            SpatialComponent::from_gains(gains, MixingType::Convolutive, Adaptability::Free, 3)
                .unwrap();
        assert_eq!(s.rank(), 2);
        assert_eq!(s.at(1).shape(), (2, 2));

        let r = s.covariance(1);
        assert!((r[(0, 0)].re - 1.25).abs() < 1e-12);
        assert!((r[(0, 1)] - Complex64::new(0.0, 0.5)).norm() < 1e-12);
        assert!((r.determinant().re - 1.0).abs() < 1e-12);

        let replacement = DMatrix::from_element(2, 2, Complex64::new(0.25, -0.25));
        s.set_bin(2, &replacement);
        assert_eq!(s.at(2), replacement);
        assert_ne!(s.at(1), replacement);
    }

    #[test]
    fn test_set_shared_updates_every_bin() {
        let mut s =
            SpatialComponent::angular(0, 2, MixingType::Instantaneous, Adaptability::Free, 6)
                .unwrap();
        s.set_shared(&DMatrix::from_column_slice(2, 1, &[0.3, -0.4]));
        assert_eq!(s.at(5)[(1, 0)], Complex64::new(-0.4, 0.0));
        assert_eq!(s.at(0), s.at(5));
    }

    #[test]
    fn test_from_gains_checks_shape() {
        let gains = Array3::from_elem((2, 1, 3), Complex64::new(1.0, 0.0));
        assert!(SpatialComponent::from_gains(
            gains,
            MixingType::Convolutive,
            Adaptability::Free,
            4
        )
        .is_err());

        let complex = Array3::from_elem((2, 1, 1), Complex64::new(1.0, 0.5));
        assert!(SpatialComponent::from_gains(
            complex,
            MixingType::Instantaneous,
            Adaptability::Free,
            4
        )
        .is_err());

        let empty = Array3::from_elem((2, 0, 1), Complex64::new(1.0, 0.0));
        assert!(SpatialComponent::from_gains(
            empty,
            MixingType::Instantaneous,
            Adaptability::Free,
            4
        )
        .is_err());
    }
}
