//! Track Data: derives smoothed course-over-ground from a lat/lon pair of
//! navigation sources (spec §4, "Track Data"), grounded on
//! `original_source/hyscancore/hyscan-track-data.c`.
//!
//! The original hardcodes a `before = after = 10` index averaging window;
//! the core keeps that as the default but exposes it as a constructor
//! parameter (`TrackData::new_windowed`) since it is a natural small
//! generalization (spec SPEC_FULL.md §B).

use crate::error::{CoreError, CoreResult};

/// A position sample source indexed like a Store Port channel: `(time,
/// lat_deg, lon_deg)` per index, in ascending time order.
pub trait PositionSource {
    fn range(&self) -> Option<(u32, u32)>;
    fn position_at(&self, index: u32) -> CoreResult<(i64, f64, f64)>;
}

const DEFAULT_WINDOW: u32 = 10;

/// Smoothed course-over-ground over a windowed position source.
pub struct TrackData<'a> {
    source: &'a dyn PositionSource,
    before: u32,
    after: u32,
}

impl<'a> TrackData<'a> {
    pub fn new(source: &'a dyn PositionSource) -> Self {
        TrackData::new_windowed(source, DEFAULT_WINDOW, DEFAULT_WINDOW)
    }

    pub fn new_windowed(source: &'a dyn PositionSource, before: u32, after: u32) -> Self {
        TrackData { source, before, after }
    }

    /// Smoothed course-over-ground in radians at `index`: the bearing
    /// from `index - before` (clamped to the source's first index) to
    /// `index + after` (clamped to the last), with speed as the great-
    /// circle distance between those endpoints over elapsed time.
    pub fn course_at(&self, index: u32) -> CoreResult<(f64, f64)> {
        let (first, last) = self.source.range().ok_or(CoreError::NotFound)?;
        let left_index = index.saturating_sub(self.before).max(first);
        let right_index = index.saturating_add(self.after).min(last);
        if left_index == right_index {
            return Err(CoreError::NotFound);
        }
        let (t0, lat0, lon0) = self.source.position_at(left_index)?;
        let (t1, lat1, lon1) = self.source.position_at(right_index)?;
        let dt = (t1 - t0) as f64;
        if dt <= 0.0 {
            return Err(CoreError::NotFound);
        }
        let course = bearing_rad(lat0, lon0, lat1, lon1);
        let dist = haversine_m(lat0, lon0, lat1, lon1);
        let speed_m_s = dist / dt;
        Ok((course, speed_m_s))
    }
}

fn bearing_rad(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let p1 = lat1.to_radians();
    let p2 = lat2.to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let y = dlon.sin() * p2.cos();
    let x = p1.cos() * p2.sin() - p1.sin() * p2.cos() * dlon.cos();
    y.atan2(x)
}

fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let p1 = lat1.to_radians();
    let p2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTrack(Vec<(i64, f64, f64)>);

    impl PositionSource for FakeTrack {
        fn range(&self) -> Option<(u32, u32)> {
            if self.0.is_empty() {
                None
            } else {
                Some((0, self.0.len() as u32 - 1))
            }
        }
        fn position_at(&self, index: u32) -> CoreResult<(i64, f64, f64)> {
            self.0.get(index as usize).copied().ok_or(CoreError::NotFound)
        }
    }

    #[test]
    fn course_due_east_is_roughly_90_degrees() {
        let points: Vec<(i64, f64, f64)> = (0..25).map(|i| (i as i64, 0.0, i as f64 * 0.001)).collect();
        let track = FakeTrack(points);
        let data = TrackData::new(&track);
        let (course, speed) = data.course_at(12).unwrap();
        assert!((course.to_degrees() - 90.0).abs() < 1.0, "course={}", course.to_degrees());
        assert!(speed > 0.0);
    }

    #[test]
    fn custom_window_is_respected() {
        let points: Vec<(i64, f64, f64)> = (0..10).map(|i| (i as i64, 0.0, i as f64 * 0.001)).collect();
        let track = FakeTrack(points);
        let data = TrackData::new_windowed(&track, 2, 2);
        assert!(data.course_at(5).is_ok());
    }
}
