//! Parameter tags: adaptability and mixing type

use serde::{Deserialize, Serialize};

use crate::error::SeparationError;

/// Whether EM may update a model component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adaptability {
    /// Updated by every M-step
    Free,
    /// Kept at its initial value
    Fixed,
}

impl Adaptability {
    /// Attribute value used in configuration documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Adaptability::Free => "free",
            Adaptability::Fixed => "fixed",
        }
    }

    /// Parse `"free"` or `"fixed"`
    pub fn parse(value: &str) -> Result<Self, SeparationError> {
        match value.trim() {
            "free" => Ok(Adaptability::Free),
            "fixed" => Ok(Adaptability::Fixed),
            other => Err(SeparationError::InvalidInput(format!(
                "adaptability is '{}' and should be 'free' or 'fixed'",
                other
            ))),
        }
    }

    /// True for [`Adaptability::Free`]
    pub fn is_free(&self) -> bool {
        matches!(self, Adaptability::Free)
    }
}

/// How a source reaches the microphones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MixingType {
    /// One real gain per channel, shared by all frequency bins
    #[serde(rename = "inst")]
    Instantaneous,
    /// One complex gain per channel and frequency bin
    #[serde(rename = "conv")]
    Convolutive,
}

impl MixingType {
    /// Attribute value used in configuration documents
    pub fn as_str(&self) -> &'static str {
        match self {
            MixingType::Instantaneous => "inst",
            MixingType::Convolutive => "conv",
        }
    }

    /// Parse `"inst"` or `"conv"`
    pub fn parse(value: &str) -> Result<Self, SeparationError> {
        match value.trim() {
            "inst" => Ok(MixingType::Instantaneous),
            "conv" => Ok(MixingType::Convolutive),
            other => Err(SeparationError::InvalidInput(format!(
                "mixing type is '{}' and should be 'inst' or 'conv'",
                other
            ))),
        }
    }
}
