//! Waterfall Tile module (spec §4.8, §4.9): raster generation plus the
//! request/result descriptor used to key tile caches.

pub mod descriptor;
pub mod generator;

pub use descriptor::{TileDescriptor, FLAG_GROUND_RANGE, FLAG_PROFILER};
pub use generator::{TileRequest, TileResult, WaterfallTileGenerator, TRANSPARENT};
