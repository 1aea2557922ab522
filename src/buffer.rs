//! Typed contiguous memory buffers.
//!
//! `Buffer` and `ComplexBuffer` are the scratch currency between the Store
//! Port, the Acoustic Channel's raw/work buffers, and the Tile Generator's
//! working planes: growable blocks that never shrink once they have grown,
//! matching the scratch-buffer invariant in spec §3 ("both are grown but
//! never shrunk").

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// The element type a [`Buffer`] is declared to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Raw,
    Int16,
    Float32,
    ComplexFloat32,
    Utf8,
}

impl ElementType {
    /// Size in bytes of one element of this type.
    pub fn element_size(self) -> usize {
        match self {
            ElementType::Raw => 1,
            ElementType::Int16 => 2,
            ElementType::Float32 => 4,
            ElementType::ComplexFloat32 => 8,
            ElementType::Utf8 => 1,
        }
    }
}

/// A growable byte buffer tagged with its logical element type.
///
/// Used for raw (undecoded) sample bytes read straight from the store.
/// Growth only ever extends capacity.
#[derive(Debug, Clone)]
pub struct Buffer {
    element_type: ElementType,
    bytes: Vec<u8>,
    len_bytes: usize,
}

impl Buffer {
    pub fn new(element_type: ElementType) -> Self {
        Buffer {
            element_type,
            bytes: Vec::new(),
            len_bytes: 0,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of valid bytes currently stored (the decoded record size,
    /// which may be smaller than capacity).
    pub fn len(&self) -> usize {
        self.len_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.len_bytes == 0
    }

    pub fn capacity_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Grow backing storage to at least `min_bytes`, never shrinking.
    pub fn ensure_capacity(&mut self, min_bytes: usize) {
        if self.bytes.len() < min_bytes {
            self.bytes.resize(min_bytes, 0);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len_bytes]
    }

    /// Full backing storage, including any unused capacity past `len()`.
    pub fn as_bytes_mut_full(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn set_len(&mut self, len_bytes: usize) {
        debug_assert!(len_bytes <= self.bytes.len());
        self.len_bytes = len_bytes;
    }
}

/// A growable buffer of complex float32 samples.
///
/// Serves as the Acoustic Channel's "work" scratch buffer (spec §3):
/// capacity in samples must track `raw.capacity_bytes() / sample_size`.
#[derive(Debug, Clone, Default)]
pub struct ComplexBuffer {
    samples: Vec<Complex32>,
    len: usize,
}

impl ComplexBuffer {
    pub fn new() -> Self {
        ComplexBuffer {
            samples: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Grow to hold at least `min_samples`, never shrinking.
    pub fn ensure_capacity(&mut self, min_samples: usize) {
        if self.samples.len() < min_samples {
            self.samples.resize(min_samples, Complex32::new(0.0, 0.0));
        }
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.samples.len());
        self.len = len;
    }

    pub fn as_slice(&self) -> &[Complex32] {
        &self.samples[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [Complex32] {
        &mut self.samples[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_buffer_grows_but_never_shrinks() {
        let mut buf = Buffer::new(ElementType::Raw);
        buf.ensure_capacity(16);
        assert_eq!(buf.capacity_bytes(), 16);
        buf.ensure_capacity(8);
        assert_eq!(buf.capacity_bytes(), 16, "capacity must never shrink");
        buf.ensure_capacity(32);
        assert_eq!(buf.capacity_bytes(), 32);
    }

    #[test]
    fn element_sizes_match_spec() {
        assert_eq!(ElementType::Raw.element_size(), 1);
        assert_eq!(ElementType::Int16.element_size(), 2);
        assert_eq!(ElementType::Float32.element_size(), 4);
        assert_eq!(ElementType::ComplexFloat32.element_size(), 8);
    }

    #[test]
    fn complex_buffer_tracks_growth_rule() {
        let mut work = ComplexBuffer::new();
        work.ensure_capacity(4);
        assert_eq!(work.capacity(), 4);
        work.ensure_capacity(2);
        assert_eq!(work.capacity(), 4);
    }
}
