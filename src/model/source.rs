//! Source model and its builder

use super::excitation::ExcitationModel;
use super::spatial::SpatialComponent;
use crate::config::WienerConfig;
use crate::error::SeparationError;

/// One source: a spatial component, an excitation model and the Wiener
/// settings used to reconstruct its image
#[derive(Debug, Clone, PartialEq)]
pub struct SourceModel {
    name: Option<String>,
    spatial: SpatialComponent,
    excitation: ExcitationModel,
    wiener: WienerConfig,
}

impl SourceModel {
    /// Start building a source model
    pub fn builder() -> SourceModelBuilder {
        SourceModelBuilder::default()
    }

    /// Optional source name, used for output file naming
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Spatial component
    pub fn spatial(&self) -> &SpatialComponent {
        &self.spatial
    }

    /// Mutable spatial component
    pub fn spatial_mut(&mut self) -> &mut SpatialComponent {
        &mut self.spatial
    }

    /// Excitation model
    pub fn excitation(&self) -> &ExcitationModel {
        &self.excitation
    }

    /// Mutable excitation model
    pub fn excitation_mut(&mut self) -> &mut ExcitationModel {
        &mut self.excitation
    }

    /// Wiener post-processing settings
    pub fn wiener(&self) -> &WienerConfig {
        &self.wiener
    }

    /// Replace the Wiener settings
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the settings do not validate
    pub fn set_wiener(&mut self, wiener: WienerConfig) -> Result<(), SeparationError> {
        wiener.validate()?;
        self.wiener = wiener;
        Ok(())
    }

    /// Number of frequency bins F
    pub fn bins(&self) -> usize {
        self.excitation.bins()
    }

    /// Number of time frames N
    pub fn frames(&self) -> usize {
        self.excitation.frames()
    }

    /// Number of channels I
    pub fn channels(&self) -> usize {
        self.spatial.channels()
    }
}

/// Builder for [`SourceModel`]
#[derive(Debug, Default)]
pub struct SourceModelBuilder {
    name: Option<String>,
    spatial: Option<SpatialComponent>,
    excitation: Option<ExcitationModel>,
    wiener: WienerConfig,
}

impl SourceModelBuilder {
    /// Set the source name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the spatial component
    pub fn spatial(mut self, spatial: SpatialComponent) -> Self {
        self.spatial = Some(spatial);
        self
    }

    /// Set the excitation model
    pub fn excitation(mut self, excitation: ExcitationModel) -> Self {
        self.excitation = Some(excitation);
        self
    }

    /// Set the Wiener settings (default: no post-processing)
    pub fn wiener(mut self, wiener: WienerConfig) -> Self {
        self.wiener = wiener;
        self
    }

    /// Assemble the source model
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a component is missing, the name is empty
    /// or not usable as a file stem, the Wiener settings are invalid, or the
    /// components disagree on the number of frequency bins
    pub fn build(self) -> Result<SourceModel, SeparationError> {
        let spatial = self.spatial.ok_or_else(|| {
            SeparationError::InvalidInput("source model has no spatial component".to_string())
        })?;
        let excitation = self.excitation.ok_or_else(|| {
            SeparationError::InvalidInput("source model has no excitation model".to_string())
        })?;

        if let Some(name) = &self.name {
            if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(SeparationError::InvalidInput(format!(
                    "source name '{}' cannot be used as a file name",
                    name
                )));
            }
        }

        self.wiener.validate()?;

        if spatial.bins() != excitation.bins() {
            return Err(SeparationError::InvalidInput(format!(
                "spatial component has {} bins but excitation model has {}",
                spatial.bins(),
                excitation.bins()
            )));
        }

        Ok(SourceModel {
            name: self.name,
            spatial,
            excitation,
            wiener: self.wiener,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Adaptability, MixingType};
    use ndarray::Array2;

    fn excitation(bins: usize) -> ExcitationModel {
        ExcitationModel::new(
            Array2::from_elem((bins, 2), 1.0),
            Array2::from_elem((2, 3), 1.0),
            Adaptability::Free,
            Adaptability::Free,
        )
        .unwrap()
    }

    #[test]
    fn test_builder_assembles_model() {
        let spatial =
            SpatialComponent::angular(0, 2, MixingType::Convolutive, Adaptability::Free, 5)
                .unwrap();
        let model = SourceModel::builder()
            .name("vocals")
            .spatial(spatial)
            .excitation(excitation(5))
            .build()
            .unwrap();
        assert_eq!(model.name(), Some("vocals"));
        assert_eq!(model.bins(), 5);
        assert_eq!(model.frames(), 3);
        assert_eq!(model.channels(), 2);
    }

    #[test]
    fn test_builder_rejects_missing_parts_and_mismatch() {
        assert!(SourceModel::builder().excitation(excitation(5)).build().is_err());

        let spatial =
            SpatialComponent::angular(0, 2, MixingType::Convolutive, Adaptability::Free, 4)
                .unwrap();
        let err = SourceModel::builder()
            .spatial(spatial)
            .excitation(excitation(5))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("4 bins"), "{}", err);
    }

    #[test]
    fn test_wiener_settings_are_validated() {
        let spatial =
            SpatialComponent::angular(0, 1, MixingType::Instantaneous, Adaptability::Free, 5)
                .unwrap();
        let bad = WienerConfig {
            spatial_blend: -0.5,
            ..Default::default()
        };
        assert!(SourceModel::builder()
            .spatial(spatial.clone())
            .excitation(excitation(5))
            .wiener(bad)
            .build()
            .is_err());

        let mut model = SourceModel::builder()
            .spatial(spatial)
            .excitation(excitation(5))
            .build()
            .unwrap();
        assert_eq!(model.wiener(), &WienerConfig::default());
        let good = WienerConfig {
            gain_db: 3.0,
            time_smoothing: 2,
            ..Default::default()
        };
        model.set_wiener(good).unwrap();
        assert_eq!(model.wiener().time_smoothing, 2);
        assert!(model.set_wiener(bad).is_err());
        assert_eq!(model.wiener(), &good);
    }

    #[test]
    fn test_builder_rejects_path_names() {
        let spatial =
            SpatialComponent::angular(0, 1, MixingType::Instantaneous, Adaptability::Free, 5)
                .unwrap();
        assert!(SourceModel::builder()
            .name("../escape")
            .spatial(spatial)
            .excitation(excitation(5))
            .build()
            .is_err());
    }
}
