//! Discretization type enum: the closed set of sample encodings a data
//! channel may declare (spec §6, "Discretization type enum").
//!
//! The core only needs two things per type: a byte-size-per-sample lookup
//! and an "import-to-complex-float32" transform. Decoding detail for the
//! compressed-integer encodings is kept deliberately simple; the core does
//! not define a codec framework beyond what the Acoustic Channel consumes.

use crate::error::{CoreError, CoreResult};
use byteorder::{LittleEndian, ReadBytesExt};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// The closed set of sample encodings a data or signals channel may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscretizationType {
    ComplexFloat32,
    Int8,
    Int16,
    Float32,
    AdcInt16,
}

impl DiscretizationType {
    /// Size in bytes of one raw sample of this type.
    pub fn sample_size(self) -> usize {
        match self {
            DiscretizationType::ComplexFloat32 => 8,
            DiscretizationType::Int8 => 1,
            DiscretizationType::Int16 => 2,
            DiscretizationType::Float32 => 4,
            DiscretizationType::AdcInt16 => 2,
        }
    }

    /// Import a raw byte record into a complex float32 slice.
    ///
    /// `raw.len()` must be a multiple of [`Self::sample_size`]; this is a
    /// contract enforced by the caller (Acoustic Channel), which already
    /// treats a non-multiple length as a corrupt record (spec §4.3).
    pub fn import_to_complex(self, raw: &[u8], out: &mut [Complex32]) -> CoreResult<usize> {
        let sample_size = self.sample_size();
        if sample_size == 0 || raw.len() % sample_size != 0 {
            return Err(CoreError::corrupt("record length not a multiple of sample size"));
        }
        let count = raw.len() / sample_size;
        if out.len() < count {
            return Err(CoreError::corrupt("import destination too small"));
        }
        let mut cursor = Cursor::new(raw);
        for slot in out.iter_mut().take(count) {
            *slot = match self {
                DiscretizationType::ComplexFloat32 => {
                    let re = cursor.read_f32::<LittleEndian>()?;
                    let im = cursor.read_f32::<LittleEndian>()?;
                    Complex32::new(re, im)
                }
                DiscretizationType::Int8 => {
                    let v = cursor.read_i8()?;
                    Complex32::new(v as f32, 0.0)
                }
                DiscretizationType::Int16 | DiscretizationType::AdcInt16 => {
                    let v = cursor.read_i16::<LittleEndian>()?;
                    Complex32::new(v as f32, 0.0)
                }
                DiscretizationType::Float32 => {
                    let v = cursor.read_f32::<LittleEndian>()?;
                    Complex32::new(v, 0.0)
                }
            };
        }
        Ok(count)
    }
}
