//! Cache Port: a string-keyed, byte-buffer-valued external store
//! (spec §4.2). Values may carry a small header ahead of a payload
//! ("two-part" values) for callers that want to validate a value without
//! reading the whole thing.
//!
//! Cache errors never propagate as [`crate::error::CoreError`]; a failed
//! `get`/`get2` simply means "miss," degrading to recomputation (spec §7).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// The cache capability interface. Implementations must treat entries as
/// immutable once written and be safe for concurrent readers and writers
/// (spec §5).
pub trait CachePort: Send + Sync {
    /// Read the full value for `key` into `out`. Returns `false` on miss.
    fn get(&self, key: &str, out: &mut Vec<u8>) -> bool;

    /// Read a two-part value: the first `header_bytes` into `out_header`,
    /// the remainder into `out_body`. Returns `false` on miss or if the
    /// stored value is shorter than `header_bytes`.
    fn get2(&self, key: &str, header_bytes: usize, out_header: &mut Vec<u8>, out_body: &mut Vec<u8>) -> bool;

    /// Upsert a single-part value.
    fn set(&self, key: &str, bytes: &[u8]);

    /// Upsert a two-part value (header then body, concatenated).
    fn set2(&self, key: &str, header: &[u8], body: &[u8]);
}

/// Fetch a double-precision scalar payload, treating any shape mismatch
/// as a miss. Used by the Bathymetry Estimator and Depthometer, whose
/// cached results are each a single `f64`.
pub fn get_f64(cache: &dyn CachePort, key: &str) -> Option<f64> {
    let mut buf = Vec::new();
    if !cache.get(key, &mut buf) || buf.len() != 8 {
        return None;
    }
    (&buf[..]).read_f64::<LittleEndian>().ok()
}

/// Counterpart to [`get_f64`].
pub fn set_f64(cache: &dyn CachePort, key: &str, value: f64) {
    let mut buf = Vec::with_capacity(8);
    // A `Vec<u8>` write never fails.
    buf.write_f64::<LittleEndian>(value).ok();
    cache.set(key, &buf);
}
