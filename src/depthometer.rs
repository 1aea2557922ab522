//! Depthometer: a time-indexed wrapper over a depth source, snapping a
//! requested timestamp to a validity window and averaging N samples
//! around it (spec §4.7), grounded on
//! `original_source/hyscancore/hyscan-depthometer.c`.

use crate::cache::{get_f64, set_f64, CachePort};
use crate::error::CoreResult;
use crate::store::FindStatus;
use std::sync::Arc;

/// A depth-valued, time-indexed data source (e.g. an [`crate::nmea::NmeaReader`]
/// reading [`crate::nmea::Field::Depth`]).
pub trait DepthSource {
    fn find_data(&self, time: i64) -> crate::store::FindResult;
    fn range(&self) -> Option<(u32, u32)>;
    fn depth_at(&self, index: u32) -> CoreResult<f64>;
    /// Stable token identifying this source, used in the cache key.
    fn token(&self) -> &str;
}

/// Snaps timestamps to a validity window and averages N samples of a
/// [`DepthSource`] around the snapped time.
pub struct Depthometer<'a> {
    source: &'a dyn DepthSource,
    cache: Option<Arc<dyn CachePort>>,
    /// Filter size; odd values are rounded up to the next even number.
    filter_size: u32,
    /// Validity window in microseconds; minimum 1.
    window_us: i64,
}

impl<'a> Depthometer<'a> {
    pub fn new(source: &'a dyn DepthSource, cache: Option<Arc<dyn CachePort>>, filter_size: u32, window_us: i64) -> Self {
        let filter_size = if filter_size % 2 == 1 { filter_size + 1 } else { filter_size.max(2) };
        let window_us = window_us.max(1);
        Depthometer { source, cache, filter_size, window_us }
    }

    fn snap(&self, t: i64) -> i64 {
        let w = self.window_us as f64;
        let snapped = (t as f64 / w).round();
        (snapped * w) as i64
    }

    fn cache_key(&self, snapped: i64) -> String {
        format!("depthometer.{}.{}.{}.{}", self.source.token(), self.filter_size, self.window_us, snapped)
    }

    /// Mean depth around `t`, or `-1.0` if unavailable.
    pub fn get(&self, t: i64) -> f64 {
        let snapped = self.snap(t);
        let key = self.cache_key(snapped);
        if let Some(cache) = &self.cache {
            if let Some(v) = get_f64(cache.as_ref(), &key) {
                return v;
            }
        }

        let result = self.compute(snapped);

        if let Some(cache) = &self.cache {
            if result >= 0.0 {
                set_f64(cache.as_ref(), &key, result);
            }
        }
        result
    }

    /// Cache-only peek: no recompute, no source call. `-1.0` on miss.
    pub fn check(&self, t: i64) -> f64 {
        let snapped = self.snap(t);
        let key = self.cache_key(snapped);
        match &self.cache {
            Some(cache) => get_f64(cache.as_ref(), &key).unwrap_or(-1.0),
            None => -1.0,
        }
    }

    fn compute(&self, snapped: i64) -> f64 {
        let find = self.source.find_data(snapped);
        if !matches!(find.status, FindStatus::Exact | FindStatus::Inside) {
            return -1.0;
        }
        let Some((first, last)) = self.source.range() else {
            return -1.0;
        };
        // Anchor the left run descending from `lindex` and the right run
        // ascending from `rindex`, exactly as `hyscan-depthometer.c`'s
        // `indexes[half-1-i] = MAX(lindex-i, first)` /
        // `indexes[half+i] = MIN(rindex+i, last)` loop does. On an exact
        // hit `lindex == rindex`, so the right run is anchored one past
        // it instead of reusing the same index, keeping the two runs
        // disjoint and the total sample count exactly `N` rather than
        // double-counting the matched sample.
        let (left_anchor, right_anchor) =
            if find.lindex == find.rindex { (find.lindex, find.rindex + 1) } else { (find.lindex, find.rindex) };

        let half = self.filter_size / 2;
        let mut sum = 0.0;
        let mut count = 0u32;
        for i in 0..half {
            let idx = left_anchor.saturating_sub(i).max(first);
            if let Ok(v) = self.source.depth_at(idx) {
                sum += v;
                count += 1;
            }
        }
        for i in 0..half {
            let idx = (right_anchor + i).min(last);
            if let Ok(v) = self.source.depth_at(idx) {
                sum += v;
                count += 1;
            }
        }
        if count == 0 {
            -1.0
        } else {
            sum / count as f64
        }
    }
}
