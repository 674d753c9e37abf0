//! Error types for the separation pipeline

use std::fmt;

/// Pipeline stage, used to tag fatal errors with the step that produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading and decoding the mixture
    Load,
    /// Sample-rate conversion
    Resample,
    /// Short-time Fourier transform
    Transform,
    /// Source model construction
    ModelBuild,
    /// Mixture covariance estimation
    Covariance,
    /// EM parameter estimation
    Estimation,
    /// Wiener filtering and inverse transform
    Reconstruction,
    /// Writing source images
    Write,
    /// Intermediate file persistence
    Persist,
}

impl Stage {
    /// Short lowercase stage name
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Resample => "resample",
            Stage::Transform => "transform",
            Stage::ModelBuild => "model-build",
            Stage::Covariance => "covariance",
            Stage::Estimation => "estimation",
            Stage::Reconstruction => "reconstruction",
            Stage::Write => "write",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur during source separation
#[derive(Debug, Clone)]
pub enum SeparationError {
    /// Missing, unreadable or malformed input (files or parameters)
    InvalidInput(String),

    /// Audio with a layout the pipeline cannot process (channel count)
    UnsupportedFormat(String),

    /// Audio decoding error
    DecodingError(String),

    /// NaN or negative values that could not be recovered locally
    NumericInstability(String),

    /// EM kept producing unstable parameters across iterations
    ConvergenceFailure(String),

    /// Processing error (dimension mismatch, singular matrix, ...)
    ProcessingError(String),

    /// File system error
    Io(String),
}

impl SeparationError {
    /// Prefix the message with the stage that failed, keeping the error kind
    pub fn in_stage(self, stage: Stage) -> Self {
        let tag = |msg: String| format!("[{}] {}", stage, msg);
        match self {
            SeparationError::InvalidInput(msg) => SeparationError::InvalidInput(tag(msg)),
            SeparationError::UnsupportedFormat(msg) => {
                SeparationError::UnsupportedFormat(tag(msg))
            }
            SeparationError::DecodingError(msg) => SeparationError::DecodingError(tag(msg)),
            SeparationError::NumericInstability(msg) => {
                SeparationError::NumericInstability(tag(msg))
            }
            SeparationError::ConvergenceFailure(msg) => {
                SeparationError::ConvergenceFailure(tag(msg))
            }
            SeparationError::ProcessingError(msg) => SeparationError::ProcessingError(tag(msg)),
            SeparationError::Io(msg) => SeparationError::Io(tag(msg)),
        }
    }

    /// Process exit status for this error kind (distinct and non-zero)
    pub fn exit_code(&self) -> i32 {
        match self {
            SeparationError::InvalidInput(_) => 2,
            SeparationError::UnsupportedFormat(_) => 3,
            SeparationError::DecodingError(_) => 4,
            SeparationError::NumericInstability(_) => 5,
            SeparationError::ConvergenceFailure(_) => 6,
            SeparationError::ProcessingError(_) => 7,
            SeparationError::Io(_) => 8,
        }
    }
}

impl fmt::Display for SeparationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeparationError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            SeparationError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            SeparationError::DecodingError(msg) => write!(f, "Decoding error: {}", msg),
            SeparationError::NumericInstability(msg) => {
                write!(f, "Numeric instability: {}", msg)
            }
            SeparationError::ConvergenceFailure(msg) => {
                write!(f, "Convergence failure: {}", msg)
            }
            SeparationError::ProcessingError(msg) => write!(f, "Processing error: {}", msg),
            SeparationError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SeparationError {}

impl From<std::io::Error> for SeparationError {
    fn from(e: std::io::Error) -> Self {
        SeparationError::Io(e.to_string())
    }
}

impl From<hound::Error> for SeparationError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => SeparationError::Io(io.to_string()),
            other => SeparationError::InvalidInput(other.to_string()),
        }
    }
}

impl From<quick_xml::DeError> for SeparationError {
    fn from(e: quick_xml::DeError) -> Self {
        SeparationError::InvalidInput(format!("malformed configuration document: {}", e))
    }
}

impl From<quick_xml::SeError> for SeparationError {
    fn from(e: quick_xml::SeError) -> Self {
        SeparationError::ProcessingError(format!("cannot serialize configuration: {}", e))
    }
}
