//! XML source configuration document (`sources.xml`)
//!
//! ```xml
//! <sources>
//!   <iterations>200</iterations>
//!   <wlen>1024</wlen>
//!   <tfr_type>STFT</tfr_type>
//!   <source name="vocals">
//!     <A adaptability="free" mixing_type="conv">
//!       <ndims>3</ndims><dim>2</dim><dim>1</dim><dim>513</dim>
//!       <type>complex</type>
//!       <data>...</data>
//!     </A>
//!     <Wex adaptability="free"><rows>513</rows><cols>4</cols><data>...</data></Wex>
//!     <Hex adaptability="free"><rows>4</rows><cols>63</cols><data>...</data></Hex>
//!     <wiener><a>0</a><b>0</b><c1>0</c1><c2>0</c2><d>-Inf</d></wiener>
//!   </source>
//! </sources>
//! ```
//!
//! Mixing dimensions are `[I, R]` (instantaneous) or `[I, R, F]`
//! (convolutive). The data is column-major: an instantaneous `I×R` matrix as
//! `I·R` reals; convolutive matrices bin after bin, each as `I·R` reals
//! followed by `I·R` imaginary parts when the type is `complex`. NMF data is
//! written one column per line.
//!
//! The optional `wiener` node holds the post-processing of the source: gain
//! `a` in dB, spatial blend `b`, smoothing half-widths `c1` (time) and `c2`
//! (frequency), and eigenvalue floor `d` in dB (`-Inf` for none).

use std::fs;
use std::path::Path;

use ndarray::{Array2, Array3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::WienerConfig;
use crate::error::SeparationError;
use crate::model::{
    Adaptability, ExcitationModel, MixingType, ParameterSet, SourceModel, SpatialComponent,
};

const TFR_TYPE: &str = "STFT";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "sources")]
struct SourcesNode {
    iterations: usize,
    wlen: usize,
    #[serde(default = "default_tfr_type")]
    tfr_type: String,
    #[serde(rename = "source", default)]
    sources: Vec<SourceNode>,
}

fn default_tfr_type() -> String {
    TFR_TYPE.to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct SourceNode {
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "A")]
    mixing: MixingNode,
    #[serde(rename = "Wex")]
    basis: MatrixNode,
    #[serde(rename = "Hex")]
    activation: MatrixNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wiener: Option<WienerNode>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WienerNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    c1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    c2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MixingNode {
    #[serde(rename = "@adaptability")]
    adaptability: Adaptability,
    #[serde(rename = "@mixing_type")]
    mixing_type: MixingType,
    ndims: usize,
    #[serde(rename = "dim", default)]
    dims: Vec<usize>,
    #[serde(rename = "type")]
    kind: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MatrixNode {
    #[serde(rename = "@adaptability")]
    adaptability: Adaptability,
    rows: usize,
    cols: usize,
    data: String,
}

/// Source models with the run settings stored alongside them
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDocument {
    /// EM iteration budget
    pub iterations: usize,
    /// STFT frame length
    pub wlen: usize,
    /// Source models
    pub params: ParameterSet,
}

/// Product of header dimensions, `InvalidInput` on overflow
fn element_count(dims: &[usize], what: &str) -> Result<usize, SeparationError> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            SeparationError::InvalidInput(format!("{}: dimensions {:?} overflow", what, dims))
        })
}

fn parse_numbers(text: &str, expected: usize, what: &str) -> Result<Vec<f64>, SeparationError> {
    let values = text
        .split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                let msg = format!("{} contains '{}', not a number", what, token);
                SeparationError::InvalidInput(msg)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != expected {
        return Err(SeparationError::InvalidInput(format!(
            "{} holds {} values but its dimensions imply {}",
            what,
            values.len(),
            expected
        )));
    }
    Ok(values)
}

fn matrix_node(matrix: &Array2<f64>, adaptability: Adaptability) -> MatrixNode {
    let mut data = String::new();
    for column in matrix.columns() {
        let line: Vec<String> = column.iter().map(|v| format!("{:e}", v)).collect();
        data.push_str(&line.join(" "));
        data.push('\n');
    }
    MatrixNode {
        adaptability,
        rows: matrix.nrows(),
        cols: matrix.ncols(),
        data,
    }
}

fn matrix_from_node(node: &MatrixNode, what: &str) -> Result<Array2<f64>, SeparationError> {
    let count = element_count(&[node.rows, node.cols], what)?;
    let values = parse_numbers(&node.data, count, what)?;
    Array2::from_shape_vec((node.cols, node.rows), values)
        .map(|m| m.reversed_axes())
        .map_err(|e| SeparationError::InvalidInput(format!("{}: {}", what, e)))
}

fn mixing_node(spatial: &SpatialComponent) -> MixingNode {
    let gains = spatial.gains();
    let (channels, rank, columns) = gains.dim();
    let complex = spatial.is_complex();
    let mut values = Vec::new();
    for col in 0..columns {
        for r in 0..rank {
            values.extend((0..channels).map(|i| format!("{:e}", gains[[i, r, col]].re)));
        }
        if complex {
            for r in 0..rank {
                values.extend((0..channels).map(|i| format!("{:e}", gains[[i, r, col]].im)));
            }
        }
    }
    let (ndims, dims) = match spatial.mixing_type() {
        MixingType::Instantaneous => (2, vec![channels, rank]),
        MixingType::Convolutive => (3, vec![channels, rank, columns]),
    };
    MixingNode {
        adaptability: spatial.adaptability(),
        mixing_type: spatial.mixing_type(),
        ndims,
        dims,
        kind: if complex { "complex" } else { "real" }.to_string(),
        data: values.join(" "),
    }
}

fn spatial_from_node(
    node: &MixingNode,
    bins: usize,
    index: usize,
) -> Result<SpatialComponent, SeparationError> {
    let what = format!("mixing parameter of source {}", index);
    let expected_ndims = match node.mixing_type {
        MixingType::Instantaneous => 2,
        MixingType::Convolutive => 3,
    };
    if node.ndims != expected_ndims || node.dims.len() != node.ndims {
        return Err(SeparationError::InvalidInput(format!(
            "{}: {} mixing needs ndims = {} with as many dim entries \
             (has ndims = {}, {} dim entries)",
            what,
            node.mixing_type.as_str(),
            expected_ndims,
            node.ndims,
            node.dims.len()
        )));
    }
    let complex = match node.kind.trim() {
        "real" => false,
        "complex" => true,
        other => {
            return Err(SeparationError::InvalidInput(format!(
                "{}: type is '{}' and should be 'real' or 'complex'",
                what, other
            )))
        }
    };
    if node.mixing_type == MixingType::Instantaneous && complex {
        return Err(SeparationError::InvalidInput(format!(
            "{}: instantaneous mixing must be real",
            what
        )));
    }
    let (channels, rank) = (node.dims[0], node.dims[1]);
    let columns = node.dims.get(2).copied().unwrap_or(1);
    let parts = if complex { 2 } else { 1 };
    let block = element_count(&[channels, rank], &what)?;
    let count = element_count(&[block, parts, columns], &what)?;
    let values = parse_numbers(&node.data, count, &what)?;

    let gains = Array3::from_shape_fn((channels, rank, columns), |(i, r, col)| {
        let at = col * parts * block + r * channels + i;
        let im = if complex { values[at + block] } else { 0.0 };
        Complex64::new(values[at], im)
    });
    SpatialComponent::from_gains(gains, node.mixing_type, node.adaptability, bins)
}

fn wiener_node(wiener: &WienerConfig) -> Option<WienerNode> {
    if *wiener == WienerConfig::default() {
        return None;
    }
    Some(WienerNode {
        a: Some(wiener.gain_db),
        b: Some(wiener.spatial_blend),
        c1: Some(wiener.time_smoothing as f64),
        c2: Some(wiener.frequency_smoothing as f64),
        d: Some(match wiener.eigenvalue_floor_db {
            Some(d) => format!("{}", d),
            None => "-Inf".to_string(),
        }),
    })
}

fn half_width(value: Option<f64>, what: &str) -> Result<usize, SeparationError> {
    match value {
        None => Ok(0),
        Some(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Ok(v as usize),
        Some(v) => Err(SeparationError::InvalidInput(format!(
            "{} = {} but should be an integer >= 0",
            what, v
        ))),
    }
}

fn wiener_from_node(node: &WienerNode, index: usize) -> Result<WienerConfig, SeparationError> {
    let what = |field: &str| format!("wiener.{} of source {}", field, index);
    let eigenvalue_floor_db = match node.d.as_deref().map(str::trim) {
        None => None,
        Some(text) if text.eq_ignore_ascii_case("-inf") => None,
        Some(text) => Some(text.parse::<f64>().map_err(|_| {
            SeparationError::InvalidInput(format!("{} = '{}', not a number", what("d"), text))
        })?),
    };
    let wiener = WienerConfig {
        gain_db: node.a.unwrap_or(0.0),
        spatial_blend: node.b.unwrap_or(0.0),
        time_smoothing: half_width(node.c1, &what("c1"))?,
        frequency_smoothing: half_width(node.c2, &what("c2"))?,
        eigenvalue_floor_db,
    };
    wiener
        .validate()
        .map_err(|e| SeparationError::InvalidInput(format!("source {}: {}", index, e)))?;
    Ok(wiener)
}

impl ModelDocument {
    /// Serialise to an XML string
    pub fn to_xml_string(&self) -> Result<String, SeparationError> {
        let root = SourcesNode {
            iterations: self.iterations,
            wlen: self.wlen,
            tfr_type: TFR_TYPE.to_string(),
            sources: self
                .params
                .sources()
                .iter()
                .map(|s| SourceNode {
                    name: s.name().map(str::to_string),
                    mixing: mixing_node(s.spatial()),
                    basis: matrix_node(s.excitation().basis(), s.excitation().basis_adaptability()),
                    activation: matrix_node(
                        s.excitation().activation(),
                        s.excitation().activation_adaptability(),
                    ),
                    wiener: wiener_node(s.wiener()),
                })
                .collect(),
        };
        Ok(quick_xml::se::to_string(&root)?)
    }

    /// Parse an XML string
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for malformed XML, inconsistent dimensions, or
    /// an unsupported time-frequency representation
    pub fn from_xml_str(text: &str) -> Result<Self, SeparationError> {
        let root: SourcesNode = quick_xml::de::from_str(text)?;
        if root.tfr_type.trim() != TFR_TYPE {
            return Err(SeparationError::InvalidInput(format!(
                "time-frequency representation '{}' is not supported (only {})",
                root.tfr_type.trim(),
                TFR_TYPE
            )));
        }

        let sources = root
            .sources
            .iter()
            .enumerate()
            .map(|(j, node)| {
                let basis = matrix_from_node(&node.basis, &format!("Wex of source {}", j))?;
                let activation =
                    matrix_from_node(&node.activation, &format!("Hex of source {}", j))?;
                let excitation = ExcitationModel::new(
                    basis,
                    activation,
                    node.basis.adaptability,
                    node.activation.adaptability,
                )?;
                let spatial = spatial_from_node(&node.mixing, excitation.bins(), j)?;
                let wiener = match &node.wiener {
                    Some(w) => wiener_from_node(w, j)?,
                    None => WienerConfig::default(),
                };
                let builder = SourceModel::builder()
                    .spatial(spatial)
                    .excitation(excitation)
                    .wiener(wiener);
                match &node.name {
                    Some(name) => builder.name(name.clone()),
                    None => builder,
                }
                .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            iterations: root.iterations,
            wlen: root.wlen,
            params: ParameterSet::new(sources)?,
        })
    }

    /// Write the document to `path`
    pub fn save(&self, path: &Path) -> Result<(), SeparationError> {
        log::debug!(
            "Writing {} source models to {}",
            self.params.len(),
            path.display()
        );
        fs::write(path, self.to_xml_string()?)?;
        Ok(())
    }

    /// Read a document from `path`
    pub fn load(path: &Path) -> Result<Self, SeparationError> {
        let text = fs::read_to_string(path).map_err(|e| {
            SeparationError::InvalidInput(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_xml_str(&text)
    }
}
