//! Intermediate file persistence
//!
//! Interchange files written to the pipeline work directory when
//! `persist_intermediates` is enabled. The covariance tensor format lives in
//! [`crate::covariance::tensor`].

pub mod xml;

pub use xml::ModelDocument;

/// Initial source models
pub const SOURCES_FILE: &str = "sources.xml";

/// Mixture covariance tensor
pub const COVARIANCE_FILE: &str = "Rx.bin";

/// Source models after EM
pub const ESTIMATED_SOURCES_FILE: &str = "sources.xml.new";
