//! Bathymetry Estimator: finds the seabed echo in an amplitude return and
//! converts its sample index to depth under a tabulated sound-velocity
//! profile (spec §4.4).

use crate::acoustic::AcousticChannel;
use crate::cache::{get_f64, set_f64, CachePort};
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;

/// One row of the sound-velocity table: `depth_meters` (cumulative,
/// sorted ascending, >= 0) paired with the speed applicable down to that
/// depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityPoint {
    pub depth_meters: f64,
    pub speed_m_s: f64,
}

/// Default sound velocity (m/s) used when no table is supplied.
pub const DEFAULT_SOUND_VELOCITY: f64 = 1500.0;

/// Maximum number of candidate peaks collected before merging (spec §4.4
/// step 5).
const MAX_CANDIDATES: usize = 10;

/// Consumes an Acoustic Channel and returns depth in meters for a given
/// ping index.
pub struct BathymetryEstimator<'a> {
    channel: &'a AcousticChannel,
    /// Input quality in `[0, 1]`. Spec §4.4's peak-detection algorithm
    /// (steps 1-9) is fully deterministic and never references this
    /// value; it is validated and carried as part of the estimator's
    /// state because spec §3 names it in the data model, reserved for
    /// callers that want to record acquisition confidence alongside a
    /// depth request.
    #[allow(dead_code)]
    quality: f64,
    table: Option<Vec<VelocityPoint>>,
    cache: Option<Arc<dyn CachePort>>,
    store_uri: String,
    prefix: Option<String>,
    project: String,
    track: String,
    channel_name: String,
}

impl<'a> BathymetryEstimator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: &'a AcousticChannel,
        quality: f64,
        table: Option<Vec<VelocityPoint>>,
        cache: Option<Arc<dyn CachePort>>,
        store_uri: impl Into<String>,
        prefix: Option<String>,
        project: impl Into<String>,
        track: impl Into<String>,
        channel_name: impl Into<String>,
    ) -> CoreResult<Self> {
        if !(0.0..=1.0).contains(&quality) {
            return Err(CoreError::misuse("quality must be in [0, 1]"));
        }
        if let Some(t) = &table {
            if t.is_empty() {
                return Err(CoreError::misuse("sound velocity table must not be empty if provided"));
            }
            for w in t.windows(2) {
                if w[1].depth_meters < w[0].depth_meters || w[0].depth_meters < 0.0 {
                    return Err(CoreError::misuse("sound velocity table must be sorted by non-negative depth"));
                }
            }
        }
        Ok(BathymetryEstimator {
            channel,
            quality,
            table,
            cache,
            store_uri: store_uri.into(),
            prefix,
            project: project.into(),
            track: track.into(),
            channel_name: channel_name.into(),
        })
    }

    fn cache_key(&self, index: u32) -> String {
        match &self.prefix {
            Some(prefix) => format!(
                "{}.{}.{}.{}.{}.{}",
                self.store_uri, prefix, self.project, self.track, self.channel_name, index
            ),
            None => format!("{}.{}.{}.{}.{}", self.store_uri, self.project, self.track, self.channel_name, index),
        }
    }

    /// Depth in meters for `index`, or `-1.0` if unavailable (store error,
    /// out of range, or a degenerate trace).
    pub fn depth(&self, index: u32) -> f64 {
        let key = self.cache_key(index);
        if let Some(cache) = &self.cache {
            if let Some(v) = get_f64(cache.as_ref(), &key) {
                return v;
            }
        }

        let depth = match self.channel.amplitude(index) {
            Ok((samples, _time)) => self.estimate(&samples).unwrap_or(-1.0),
            Err(_) => -1.0,
        };

        if let Some(cache) = &self.cache {
            if depth >= 0.0 {
                set_f64(cache.as_ref(), &key, depth);
            }
        }
        depth
    }

    /// Run the peak-detection + depth-conversion pipeline over one
    /// amplitude trace (spec §4.4 steps 1-8). Returns `None` for a
    /// degenerate trace (empty, or no candidate peak survives).
    fn estimate(&self, trace: &[f32]) -> Option<f64> {
        let k = find_peak_start(trace)?;
        Some(self.samples_to_depth(k))
    }

    fn samples_to_depth(&self, k: usize) -> f64 {
        let freq = self.channel.discretization_frequency();
        match &self.table {
            None => (k as f64) * DEFAULT_SOUND_VELOCITY / (2.0 * freq),
            Some(table) => integrate_table(table, k, freq),
        }
    }
}

/// Convert a peak sample index `k` to depth by piecewise integration
/// through `table`, per spec §4.4 step 8.
fn integrate_table(table: &[VelocityPoint], k: usize, freq: f64) -> f64 {
    let k = k as f64;
    let mut prev_depth = 0.0;
    let mut boundary_samples = 0.0;
    let mut total = 0.0;
    let mut last_speed = table[0].speed_m_s;

    for point in table {
        let thickness = (point.depth_meters - prev_depth).max(0.0);
        let segment_samples = thickness * 2.0 * freq / point.speed_m_s;
        let next_boundary = boundary_samples + segment_samples;

        if next_boundary <= k {
            total += segment_samples * point.speed_m_s;
            boundary_samples = next_boundary;
            prev_depth = point.depth_meters;
            last_speed = point.speed_m_s;
        } else {
            total += (k - boundary_samples) * point.speed_m_s;
            return total / (2.0 * freq);
        }
    }
    // k lies beyond every table boundary: extend with the last segment's speed.
    total += (k - boundary_samples) * last_speed;
    total / (2.0 * freq)
}

/// Candidate peak as a sample-index run `[start, end]` inclusive.
#[derive(Debug, Clone, Copy)]
struct Peak {
    start: usize,
    end: usize,
}

impl Peak {
    fn width(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Run spec §4.4 steps 1-7 over one amplitude trace and return the
/// starting sample index of the widest surviving peak.
fn find_peak_start(trace: &[f32]) -> Option<usize> {
    let n = trace.len();
    if n == 0 {
        return None;
    }
    if n < 3 {
        // Too short for the box filter to mean anything; fall back to
        // treating the single/pair of samples as one peak at index 0.
        return Some(0);
    }

    // Step 1: 3-tap box filter, endpoints preserved.
    let mut smoothed = vec![0.0f64; n];
    smoothed[0] = trace[0] as f64;
    smoothed[n - 1] = trace[n - 1] as f64;
    for i in 1..n - 1 {
        smoothed[i] = (trace[i - 1] as f64 + trace[i] as f64 + trace[i + 1] as f64) / 3.0;
    }

    // Step 2: running integral, rescale to down-weight late samples.
    let mut integral = vec![0.0f64; n];
    let mut running = 0.0;
    for i in 0..n {
        running += smoothed[i];
        integral[i] = running;
    }
    let total = integral[n - 1];
    if total.abs() < 1e-12 {
        return None;
    }
    let mut rescaled = vec![0.0f64; n];
    for i in 0..n {
        rescaled[i] = smoothed[i] * (1.0 - integral[i] / total);
    }

    // Step 3: mean/std/threshold.
    let mean = rescaled.iter().sum::<f64>() / n as f64;
    let variance = rescaled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let sigma = variance.sqrt();
    let threshold = mean + 2.0 * sigma;

    // Step 4: binarize.
    let bits: Vec<bool> = rescaled.iter().map(|&v| v > threshold).collect();

    // Step 5: first up to MAX_CANDIDATES runs of consecutive 1s.
    let mut peaks: Vec<Peak> = Vec::new();
    let mut i = 0;
    while i < n && peaks.len() < MAX_CANDIDATES {
        if bits[i] {
            let start = i;
            while i < n && bits[i] {
                i += 1;
            }
            peaks.push(Peak { start, end: i - 1 });
        } else {
            i += 1;
        }
    }
    if peaks.is_empty() {
        return None;
    }

    // Step 6: merge close pairs.
    let mut merged: Vec<Peak> = Vec::new();
    for peak in peaks {
        if let Some(last) = merged.last_mut() {
            let gap = (peak.start - last.end) as f64;
            let span = (peak.end - last.start) as f64;
            if span > 0.0 && gap / span <= 0.25 {
                last.end = peak.end;
                continue;
            }
        }
        merged.push(peak);
    }

    // Step 7: widest remaining peak.
    merged.into_iter().max_by_key(|p| p.width()).map(|p| p.start)
}
