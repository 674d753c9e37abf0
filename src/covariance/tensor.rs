//! Binary covariance tensor (`Rx.bin`)
//!
//! Layout, all little-endian:
//! - `i32` number of dimensions (always 3)
//! - `i32` dimensions `[I*I, F, N]`
//! - `f32` data, one block of `I*I` values per (frame, bin) with bins varying
//!   fastest: the `I` real diagonal entries, then `(re, im)` of each entry
//!   above the diagonal in row order
//!
//! The lower triangle is restored as the conjugate of the upper one on read.
//! Values are stored in single precision.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::Array4;
use num_complex::Complex64;

use super::estimator::MixtureCovariance;
use crate::error::SeparationError;

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, SeparationError> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| SeparationError::InvalidInput(format!("truncated tensor header: {}", e)))?;
    Ok(i32::from_le_bytes(buf))
}

/// Serialise a covariance tensor
pub fn write_tensor<W: Write>(
    cov: &MixtureCovariance,
    writer: &mut W,
) -> Result<(), SeparationError> {
    let (i, bins, frames) = (cov.channels(), cov.bins(), cov.frames());
    let dims = [3usize, i * i, bins, frames];
    for d in dims {
        let d = i32::try_from(d).map_err(|_| {
            SeparationError::ProcessingError(format!("tensor dimension {} overflows i32", d))
        })?;
        writer.write_all(&d.to_le_bytes())?;
    }

    let data = cov.data();
    for n in 0..frames {
        for f in 0..bins {
            for c in 0..i {
                writer.write_all(&(data[[f, n, c, c]].re as f32).to_le_bytes())?;
            }
            for i1 in 0..i {
                for i2 in (i1 + 1)..i {
                    let v = data[[f, n, i1, i2]];
                    writer.write_all(&(v.re as f32).to_le_bytes())?;
                    writer.write_all(&(v.im as f32).to_le_bytes())?;
                }
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Deserialise a covariance tensor
///
/// # Errors
///
/// Returns `InvalidInput` for a malformed header or truncated data
pub fn read_tensor<R: Read>(reader: &mut R) -> Result<MixtureCovariance, SeparationError> {
    let ndim = read_i32(reader)?;
    if ndim != 3 {
        return Err(SeparationError::InvalidInput(format!(
            "tensor has {} dimensions but should have 3",
            ndim
        )));
    }
    let mut dims = [0usize; 3];
    for d in dims.iter_mut() {
        let value = read_i32(reader)?;
        *d = usize::try_from(value).map_err(|_| {
            SeparationError::InvalidInput(format!("negative tensor dimension {}", value))
        })?;
    }
    let [ii, bins, frames] = dims;
    let i = (ii as f64).sqrt().round() as usize;
    if i * i != ii || i == 0 {
        return Err(SeparationError::InvalidInput(format!(
            "first tensor dimension {} is not a squared channel count",
            ii
        )));
    }

    let expected = ii
        .checked_mul(bins)
        .and_then(|v| v.checked_mul(frames))
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| {
            SeparationError::InvalidInput(format!(
                "tensor dimensions [{}, {}, {}] overflow",
                ii, bins, frames
            ))
        })?;
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    if raw.len() != expected {
        return Err(SeparationError::InvalidInput(format!(
            "tensor holds {} bytes of data but its header implies {}",
            raw.len(),
            expected
        )));
    }
    let values: Vec<f64> = raw
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
        .collect();

    let mut data = Array4::<Complex64>::zeros((bins, frames, i, i));
    for n in 0..frames {
        for f in 0..bins {
            let block = &values[(n * bins + f) * ii..(n * bins + f + 1) * ii];
            for c in 0..i {
                data[[f, n, c, c]] = Complex64::new(block[c], 0.0);
            }
            let mut k = i;
            for i1 in 0..i {
                for i2 in (i1 + 1)..i {
                    let v = Complex64::new(block[k], block[k + 1]);
                    data[[f, n, i1, i2]] = v;
                    data[[f, n, i2, i1]] = v.conj();
                    k += 2;
                }
            }
        }
    }
    MixtureCovariance::from_data(data)
}

/// Write a covariance tensor to `path`
pub fn save_tensor(cov: &MixtureCovariance, path: &Path) -> Result<(), SeparationError> {
    log::debug!("Writing covariance tensor to {}", path.display());
    let mut writer = BufWriter::new(File::create(path)?);
    write_tensor(cov, &mut writer)
}

/// Read a covariance tensor from `path`
pub fn load_tensor(path: &Path) -> Result<MixtureCovariance, SeparationError> {
    let file = File::open(path).map_err(|e| {
        SeparationError::InvalidInput(format!("cannot open '{}': {}", path.display(), e))
    })?;
    read_tensor(&mut BufReader::new(file))
}
