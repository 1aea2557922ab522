//! Navigation Model: turns a stream of NMEA sentences into a smoothly
//! interpolated position/course estimate for the vessel center (spec
//! §4.6), grounded on `original_source/hyscancore/hyscan-nav-model.c`.
//!
//! Wall-clock values are passed explicitly by the caller (`wall_now`
//! parameters) rather than read from the system clock: this keeps the
//! model pure and deterministic, matching how the rest of the core takes
//! all timing as explicit input (spec §1: "no real-time device
//! acquisition" in the core). A production caller's timer loop supplies
//! real wall-clock seconds each tick.

use crate::geodesy::{Ellipsoid, Geo};
use crate::nmea::{self, Field, FieldValue, SentenceKind};
use log::warn;
use std::collections::VecDeque;
use std::sync::Mutex;

const MAX_FIXES: usize = 30;
const SIGNAL_LOSS_GAP_S: f64 = 2.0;
const DUPLICATE_GAP_S: f64 = 0.01;
const HDT_MATCH_WINDOW_S: f64 = 5.0;
const GGA_FALLBACK_MAX_FIXES: usize = 20;
const GGA_FALLBACK_MAX_SPAN_S: f64 = 5.0;

const NM_METERS: f64 = 1852.0;
const DEG_METERS: f64 = 111_320.0;

fn knots_to_deg_lat(knots: f64) -> f64 {
    knots * NM_METERS / 3600.0 / DEG_METERS
}

fn knots_to_deg_lon(knots: f64, lat_deg: f64) -> f64 {
    let cos_lat = lat_deg.to_radians().cos();
    if cos_lat.abs() < 1e-9 {
        0.0
    } else {
        knots_to_deg_lat(knots) / cos_lat
    }
}

/// Antenna mount offset relative to the vessel center, per spec §3.
#[derive(Debug, Clone, Copy, Default)]
pub struct AntennaOffset {
    pub forward: f64,
    pub starboard: f64,
    pub vertical: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Cubic segment coefficients `s(tau) = a + b*tau + c*tau^2 + d*tau^3`.
#[derive(Debug, Clone, Copy, Default)]
struct CubicParams {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
}

impl CubicParams {
    fn eval(&self, tau: f64) -> f64 {
        self.a + self.b * tau + self.c * tau * tau + self.d * tau * tau * tau
    }
}

/// Solve the cubic segment between `(v0, dv0)` at `tau=0` and `(v1, dv1)`
/// at `tau=dt`, per spec §4.6.2. The formula for `d` omits the customary
/// `/dt` normalization and `c`'s formula re-multiplies `d` by `dt`; this
/// is the source's expression and is reproduced verbatim (spec §9 open
/// question: "reimplementations must reproduce this verbatim").
fn fit_cubic_segment(v0: f64, dv0: f64, v1: f64, dv1: f64, dt: f64) -> CubicParams {
    let d = dt * (dv0 + dv1) - 2.0 * (v1 - v0);
    let c = (v1 - v0 - dv0 * dt) / (dt * dt) - d * dt;
    CubicParams { a: v0, b: dv0, c, d }
}

#[derive(Debug, Clone, Copy)]
struct AntennaFix {
    lat_deg: f64,
    lon_deg: f64,
    cog: f64,
    heading: f64,
    true_heading: bool,
}

#[derive(Debug, Clone)]
struct FixRecord {
    sensor_time: f64,
    antenna_pos: AntennaFix,
    ship_lat_deg: f64,
    ship_lon_deg: f64,
    speed_knots: f64,
    speed_lat: f64,
    speed_lon: f64,
    params_lat: CubicParams,
    params_lon: CubicParams,
    validity_upper_time: f64,
}

/// One resolved navigation estimate (spec §6, "Navigation event payload").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavEvent {
    pub loaded: bool,
    pub time: f64,
    pub coord: (f64, f64),
    pub cog: f64,
    pub true_heading: bool,
    pub heading: f64,
    pub speed: f64,
}

struct SensorIdentity {
    name: String,
    antenna_offset: Option<AntennaOffset>,
}

struct GgaSample {
    time: f64,
    lat_deg: f64,
    lon_deg: f64,
}

struct RingState {
    fixes: VecDeque<FixRecord>,
    last_heading: Option<(f64, f64)>,
    timer_offset: Option<f64>,
    gga_ring: VecDeque<GgaSample>,
}

/// Accepts a live stream of NMEA sentences and maintains an interpolated
/// position/course estimate for the vessel center.
pub struct NavigationModel {
    identity: Mutex<SensorIdentity>,
    state: Mutex<RingState>,
    interval_ms: u64,
    delay_s: f64,
}

impl NavigationModel {
    pub fn new(name: impl Into<String>, antenna_offset: Option<AntennaOffset>, interval_ms: u64, delay_s: f64) -> Self {
        NavigationModel {
            identity: Mutex::new(SensorIdentity { name: name.into(), antenna_offset }),
            state: Mutex::new(RingState {
                fixes: VecDeque::new(),
                last_heading: None,
                timer_offset: None,
                gga_ring: VecDeque::new(),
            }),
            interval_ms,
            delay_s,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Feed one sensor callback delivery: `name` is the source identity,
    /// `sensor_time`/`wall_now` are seconds, `bytes` is the raw payload
    /// (possibly several concatenated NMEA sentences).
    pub fn ingest(&self, name: &str, sensor_time: f64, bytes: &[u8], wall_now: f64) {
        let (configured_name, antenna_offset) = {
            let identity = self.identity.lock().unwrap();
            (identity.name.clone(), identity.antenna_offset)
        };
        if name != configured_name {
            return;
        }
        let text = String::from_utf8_lossy(bytes);
        for sentence in nmea::split_sentences(&text) {
            let kind = nmea::classify(sentence);
            match kind {
                SentenceKind::Rmc => {
                    if let Some(fix) = parse_rmc(sentence, sensor_time) {
                        self.admit_fix(fix, antenna_offset, wall_now);
                    }
                }
                SentenceKind::Gga => {
                    self.note_gga(sentence, sensor_time);
                }
                SentenceKind::Any => {
                    if let Some(heading) = nmea::parse_field(sentence, SentenceKind::Any, Field::Heading) {
                        self.on_heading(heading.as_f64(), sensor_time, antenna_offset);
                    }
                }
                _ => {}
            }
        }
    }

    fn on_heading(&self, heading: f64, sensor_time: f64, antenna_offset: Option<AntennaOffset>) {
        let mut state = self.state.lock().unwrap();
        state.last_heading = Some((heading, sensor_time));
        if let Some(tail) = state.fixes.back_mut() {
            if (tail.sensor_time - sensor_time).abs() <= HDT_MATCH_WINDOW_S {
                tail.antenna_pos.heading = heading;
                tail.antenna_pos.true_heading = true;
                let (ship_lat, ship_lon) = ship_position(&tail.antenna_pos, antenna_offset);
                tail.ship_lat_deg = ship_lat;
                tail.ship_lon_deg = ship_lon;
            }
        }
    }

    fn note_gga(&self, sentence: &str, sensor_time: f64) {
        let Some(lat) = nmea::parse_field(sentence, SentenceKind::Gga, Field::Latitude) else { return };
        let Some(lon) = nmea::parse_field(sentence, SentenceKind::Gga, Field::Longitude) else { return };
        let mut state = self.state.lock().unwrap();
        state.gga_ring.push_back(GgaSample { time: sensor_time, lat_deg: lat.as_f64(), lon_deg: lon.as_f64() });
        while state.gga_ring.len() > GGA_FALLBACK_MAX_FIXES {
            state.gga_ring.pop_front();
        }
    }

    /// §4.6.3 GGA-only course synthesis: mean per-fix bearing (computed
    /// but, faithfully to the source, discarded) followed by a two-point
    /// bearing/speed over the retained window.
    pub fn gga_synthesized_course(&self) -> Option<(f64, f64)> {
        let state = self.state.lock().unwrap();
        let mut window: Vec<&GgaSample> = state.gga_ring.iter().collect();
        if window.len() < 2 {
            return None;
        }
        // Trim to the most recent span <= GGA_FALLBACK_MAX_SPAN_S.
        let last_time = window.last().unwrap().time;
        window.retain(|s| last_time - s.time <= GGA_FALLBACK_MAX_SPAN_S);
        if window.len() < 2 {
            return None;
        }

        let mut last_bearing = bearing(window[0], window[1]);
        for pair in window.windows(2).skip(1) {
            let b = bearing(pair[0], pair[1]);
            let _unwrapped = unwrap_near(b, last_bearing);
            last_bearing = b;
        }

        let first = window.first().unwrap();
        let last = window.last().unwrap();
        let dt = last.time - first.time;
        if dt <= 0.0 {
            return None;
        }
        let course = bearing(first, last);
        let dist = haversine_distance_m(first.lat_deg, first.lon_deg, last.lat_deg, last.lon_deg);
        let speed_knots = (dist / dt) * 3600.0 / NM_METERS;
        Some((course, speed_knots))
    }

    fn admit_fix(&self, parsed: ParsedRmc, antenna_offset: Option<AntennaOffset>, wall_now: f64) {
        let mut state = self.state.lock().unwrap();

        if let Some(tail) = state.fixes.back() {
            if (parsed.sensor_time - tail.sensor_time).abs() > SIGNAL_LOSS_GAP_S {
                warn!("navigation signal lost: gap of {:.3}s, clearing fix ring", (parsed.sensor_time - tail.sensor_time).abs());
                state.fixes.clear();
            }
        }
        if let Some(tail) = state.fixes.back() {
            if (parsed.sensor_time - tail.sensor_time).abs() < DUPLICATE_GAP_S {
                return;
            }
        }

        let (heading, true_heading) = match state.last_heading {
            Some((h, t)) if (t - parsed.sensor_time).abs() <= HDT_MATCH_WINDOW_S => (h, true),
            _ => (parsed.course, false),
        };
        let antenna_pos = AntennaFix { lat_deg: parsed.lat_deg, lon_deg: parsed.lon_deg, cog: parsed.course, heading, true_heading };
        let (ship_lat, ship_lon) = ship_position(&antenna_pos, antenna_offset);

        let speed_lat = knots_to_deg_lat(parsed.speed_knots * parsed.course.cos());
        let speed_lon = knots_to_deg_lon(parsed.speed_knots * parsed.course.sin(), parsed.lat_deg);

        let new_fix = FixRecord {
            sensor_time: parsed.sensor_time,
            antenna_pos,
            ship_lat_deg: ship_lat,
            ship_lon_deg: ship_lon,
            speed_knots: parsed.speed_knots,
            speed_lat,
            speed_lon,
            // Until a successor arrives and overwrites these with the
            // real segment fit, the "segment" is a flat extrapolation
            // from this fix's own position and speed (so `eval(0)`
            // always reduces to the fix's own position, used by the
            // tail/last-value fallback in `resolve_at`).
            params_lat: CubicParams { a: ship_lat, b: speed_lat, c: 0.0, d: 0.0 },
            params_lon: CubicParams { a: ship_lon, b: speed_lon, c: 0.0, d: 0.0 },
            validity_upper_time: f64::INFINITY,
        };

        if let Some(prev) = state.fixes.back_mut() {
            let dt = new_fix.sensor_time - prev.sensor_time;
            prev.params_lat = fit_cubic_segment(prev.ship_lat_deg, prev.speed_lat, new_fix.ship_lat_deg, new_fix.speed_lat, dt);
            prev.params_lon = fit_cubic_segment(prev.ship_lon_deg, prev.speed_lon, new_fix.ship_lon_deg, new_fix.speed_lon, dt);
            prev.validity_upper_time = new_fix.sensor_time;
        }

        state.fixes.push_back(new_fix);
        if state.fixes.len() > MAX_FIXES {
            state.fixes.pop_front();
        }

        if state.timer_offset.is_none() {
            state.timer_offset = Some(parsed.sensor_time - wall_now - self.delay_s);
        }
    }

    /// Resolve the current navigation estimate for wall-clock `wall_now`.
    pub fn resolve_at(&self, wall_now: f64) -> NavEvent {
        let state = self.state.lock().unwrap();
        let Some(timer_offset) = state.timer_offset else {
            return NavEvent { loaded: false, time: wall_now, coord: (0.0, 0.0), cog: 0.0, true_heading: false, heading: 0.0, speed: 0.0 };
        };
        let Some(tail) = state.fixes.back() else {
            return NavEvent { loaded: false, time: wall_now, coord: (0.0, 0.0), cog: 0.0, true_heading: false, heading: 0.0, speed: 0.0 };
        };

        let sensor_time_to_serve = wall_now + timer_offset;
        let signal_lost = (sensor_time_to_serve - tail.sensor_time) > SIGNAL_LOSS_GAP_S;

        if self.delay_s <= 0.0 {
            return self.event_from_fix(tail, tail.sensor_time, sensor_time_to_serve, signal_lost);
        }

        for fix in state.fixes.iter().rev() {
            if fix.sensor_time <= sensor_time_to_serve && sensor_time_to_serve <= fix.validity_upper_time {
                return self.event_from_fix(fix, sensor_time_to_serve, sensor_time_to_serve, signal_lost);
            }
        }
        self.event_from_fix(tail, tail.sensor_time, sensor_time_to_serve, signal_lost)
    }

    fn event_from_fix(&self, fix: &FixRecord, eval_time: f64, report_time: f64, signal_lost: bool) -> NavEvent {
        let tau = eval_time - fix.sensor_time;
        let lat = fix.params_lat.eval(tau);
        let lon = fix.params_lon.eval(tau);
        NavEvent {
            loaded: !signal_lost,
            time: report_time,
            coord: (lat, lon),
            cog: fix.antenna_pos.cog,
            true_heading: fix.antenna_pos.true_heading,
            heading: fix.antenna_pos.heading,
            speed: fix.speed_knots * NM_METERS / 3600.0,
        }
    }
}

fn ship_position(antenna: &AntennaFix, offset: Option<AntennaOffset>) -> (f64, f64) {
    let Some(offset) = offset else {
        return (antenna.lat_deg, antenna.lon_deg);
    };
    let ship_heading = antenna.heading - offset.yaw;
    let geo = Geo::new(antenna.lat_deg.to_radians(), antenna.lon_deg.to_radians(), ship_heading, Ellipsoid::WGS84);
    let (lat, lon) = geo.topo_xy_to_geo(-offset.forward, offset.starboard);
    (lat.to_degrees(), lon.to_degrees())
}

struct ParsedRmc {
    sensor_time: f64,
    lat_deg: f64,
    lon_deg: f64,
    course: f64,
    speed_knots: f64,
}

fn parse_rmc(sentence: &str, fallback_time: f64) -> Option<ParsedRmc> {
    let lat = nmea::parse_field(sentence, SentenceKind::Rmc, Field::Latitude)?;
    let lon = nmea::parse_field(sentence, SentenceKind::Rmc, Field::Longitude)?;
    let course = nmea::parse_field(sentence, SentenceKind::Rmc, Field::Course).map(|v| v.as_f64()).unwrap_or(0.0);
    let speed = nmea::parse_field(sentence, SentenceKind::Rmc, Field::Speed).map(|v| v.as_f64()).unwrap_or(0.0);
    let time = match nmea::parse_field(sentence, SentenceKind::Rmc, Field::Time) {
        Some(FieldValue::Seconds(s)) => s as f64,
        _ => fallback_time,
    };
    Some(ParsedRmc { sensor_time: time, lat_deg: lat.as_f64(), lon_deg: lon.as_f64(), course, speed_knots: speed })
}

fn bearing(from: &GgaSample, to: &GgaSample) -> f64 {
    let lat1 = from.lat_deg.to_radians();
    let lat2 = to.lat_deg.to_radians();
    let dlon = (to.lon_deg - from.lon_deg).to_radians();
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x)
}

fn unwrap_near(angle: f64, reference: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    let mut a = angle;
    while a - reference > std::f64::consts::PI {
        a -= two_pi;
    }
    while a - reference < -std::f64::consts::PI {
        a += two_pi;
    }
    a
}

fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
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

    fn rmc_sentence(time: &str, lat: &str, lat_h: &str, lon: &str, lon_h: &str, speed: &str, course: &str, date: &str) -> String {
        let body = format!("GPRMC,{time},A,{lat},{lat_h},{lon},{lon_h},{speed},{course},{date},000.0,E");
        let checksum = body.bytes().fold(0u8, |a, b| a ^ b);
        format!("${body}*{checksum:02X}")
    }

    /// Invariant 7: cubic segment endpoints match the fixes exactly.
    #[test]
    fn cubic_segment_matches_endpoints() {
        let params = fit_cubic_segment(0.0, 0.0, 1.0, 0.0, 1.0);
        assert!((params.eval(0.0) - 0.0).abs() < 1e-9);
        assert!((params.eval(1.0) - 1.0).abs() < 1e-9);
    }

    /// Invariant 8: a >2s gap between consecutive fixes clears the ring
    /// down to just the newer fix.
    #[test]
    fn signal_loss_clears_ring() {
        let model = NavigationModel::new("gps1", None, 200, 1.0);
        let s1 = rmc_sentence("000000.00", "0000.000", "N", "00000.000", "E", "0.0", "090.0", "010100");
        model.ingest("gps1", 0.0, s1.as_bytes(), 0.0);
        let s2 = rmc_sentence("000010.00", "0000.000", "N", "00000.000", "E", "0.0", "090.0", "010100");
        model.ingest("gps1", 10.0, s2.as_bytes(), 10.0);

        let state = model.state.lock().unwrap();
        assert_eq!(state.fixes.len(), 1);
        assert_eq!(state.fixes.back().unwrap().sensor_time, 10.0);
    }

    #[test]
    fn filters_by_configured_sensor_name() {
        let model = NavigationModel::new("gps1", None, 200, 1.0);
        let s1 = rmc_sentence("000000.00", "0000.000", "N", "00000.000", "E", "0.0", "090.0", "010100");
        model.ingest("other-sensor", 0.0, s1.as_bytes(), 0.0);
        let state = model.state.lock().unwrap();
        assert!(state.fixes.is_empty());
    }

    #[test]
    fn duplicate_within_10ms_is_discarded() {
        let model = NavigationModel::new("gps1", None, 200, 1.0);
        let s1 = rmc_sentence("000000.00", "0000.000", "N", "00000.000", "E", "0.0", "090.0", "010100");
        model.ingest("gps1", 0.0, s1.as_bytes(), 0.0);
        model.ingest("gps1", 0.005, s1.as_bytes(), 0.0);
        let state = model.state.lock().unwrap();
        assert_eq!(state.fixes.len(), 1);
    }

    #[test]
    fn resolve_before_any_fix_is_not_loaded() {
        let model = NavigationModel::new("gps1", None, 200, 1.0);
        let event = model.resolve_at(0.0);
        assert!(!event.loaded);
    }

    #[test]
    fn last_value_mode_always_returns_tail() {
        let model = NavigationModel::new("gps1", None, 200, 0.0);
        let s1 = rmc_sentence("000000.00", "0000.000", "N", "00000.000", "E", "0.0", "090.0", "010100");
        model.ingest("gps1", 0.0, s1.as_bytes(), 0.0);
        let event = model.resolve_at(0.0);
        assert!(event.loaded);
        assert_eq!(event.coord.0, 0.0);
    }
}
