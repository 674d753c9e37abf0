//! Source model
//!
//! Each source j is a zero-mean Gaussian in the time-frequency domain with
//! covariance `v_j(f,n) R_j(f)` with `R_j = A_j A_jᴴ`:
//! - a spatial component `A_j` (I×R mixing matrix, instantaneous or convolutive)
//! - an excitation model `v_j = W_j H_j` (NMF of the source power)
//!
//! Every component carries an [`Adaptability`] tag deciding whether EM updates it.

pub mod adaptability;
pub mod excitation;
pub mod source;
pub mod source_set;
pub mod spatial;

pub use adaptability::{Adaptability, MixingType};
pub use excitation::{ExcitationModel, FloorReport};
pub use source::{SourceModel, SourceModelBuilder};
pub use source_set::{build_source_models, ParameterSet};
pub use spatial::SpatialComponent;
