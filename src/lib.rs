//! Hydrographic sonar data-processing core.
//!
//! A storage- and device-agnostic library that turns raw sonar records
//! pulled from a [`store::StorePort`] into calibrated, cached, and
//! georeferenced data products: matched-filtered amplitude/quadrature
//! traces (`acoustic`), estimated bottom depth (`bathymetry`,
//! `depthometer`), vessel position and course (`navigation`,
//! `track_data`), and waterfall raster tiles (`tile`). NMEA 0183 parsing
//! (`nmea`) and coordinate transforms (`geodesy`) are the supporting
//! utilities these modules share.
//!
//! The crate never opens a device or a socket itself; every module takes
//! its data source as a trait object (`StorePort`, `CachePort`,
//! `DepthSource`, `PositionSource`) so a host application supplies the
//! storage and caching backends while this crate supplies the DSP and
//! the georeferencing. `testutil` ships in-memory implementations of
//! those traits for the crate's own test suite and as a template for
//! host-side fakes.

pub mod acoustic;
pub mod bathymetry;
pub mod buffer;
pub mod cache;
pub mod convolution;
pub mod depthometer;
pub mod discretization;
pub mod error;
pub mod geodesy;
pub mod navigation;
pub mod nmea;
pub mod store;
#[cfg(test)]
pub mod testutil;
pub mod tile;
pub mod track_data;

pub use error::{CoreError, CoreResult};
