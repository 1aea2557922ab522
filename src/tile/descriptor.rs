//! Tile Descriptor: immutable request parameters plus per-result
//! metadata, yielding a stable string token for cache keys (spec §4.9).

/// Bit set in [`TileDescriptor::flags`] selecting ground-range geometry
/// (vs. the slant-range default).
pub const FLAG_GROUND_RANGE: u32 = 1 << 0;
/// Bit set in [`TileDescriptor::flags`] marking a profiler source.
pub const FLAG_PROFILER: u32 = 1 << 1;

/// Immutable request parameters for one waterfall tile, plus the
/// generator-filled result metadata (`w`, `h`, `finalized`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileDescriptor {
    /// mm; may be negative to denote mirroring of the across axis.
    pub across_start: i64,
    pub along_start: i64,
    pub across_end: i64,
    pub along_end: i64,
    pub scale: f64,
    pub ppi: f64,
    pub upsample: u32,
    pub rotate: bool,
    pub flags: u32,
    pub source: u32,
    pub w: u32,
    pub h: u32,
    pub finalized: bool,
}

impl TileDescriptor {
    pub fn ground_range(&self) -> bool {
        self.flags & FLAG_GROUND_RANGE != 0
    }

    /// Deterministic string token, per spec §4.9's grammar.
    pub fn token(&self, track_id: &str) -> String {
        format!(
            "({track_id}|{}.{}.{}.{}.{:010.3}.{:06.3}|{}.{}.{}.{})",
            self.across_start,
            self.along_start,
            self.across_end,
            self.along_end,
            self.scale,
            self.ppi,
            self.upsample,
            self.flags,
            self.rotate as u8,
            self.source
        )
    }

    /// Two descriptors are in the same equivalence class for cache
    /// coalescing iff extents, scale, and ppi match (spec §4.9).
    pub fn equivalence_class(&self, track_id: &str) -> String {
        format!(
            "({track_id}|{}.{}.{}.{}.{:010.3}.{:06.3})",
            self.across_start, self.along_start, self.across_end, self.along_end, self.scale, self.ppi
        )
    }
}
