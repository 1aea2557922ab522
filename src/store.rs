//! Store Port: the abstract channel-of-time-indexed-binary-records
//! contract consumed by the rest of the core (spec §4.1).
//!
//! The core never implements a persistent store; it is generic over this
//! trait (spec §9, "polymorphism: express Store Port ... as capability
//! interfaces"). A `MemoryStore` test double lives in [`crate::testutil`].

use crate::error::CoreResult;

/// Result of a time-indexed binary search over a channel, mirroring
/// spec §4.1's `find` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindStatus {
    /// `lindex == rindex` and `ltime == time`.
    Exact,
    /// The entire channel precedes `time`; use the first index.
    Left,
    /// The entire channel follows `time`; use the last index.
    Right,
    /// `ltime <= time < rtime`, with `rindex = lindex + 1`.
    Inside,
    /// The channel is empty, or the lookup otherwise failed.
    Fail,
}

/// Outcome of [`StorePort::find`].
#[derive(Debug, Clone, Copy)]
pub struct FindResult {
    pub status: FindStatus,
    pub lindex: u32,
    pub rindex: u32,
    pub ltime: i64,
    pub rtime: i64,
}

impl FindResult {
    pub fn fail() -> Self {
        FindResult {
            status: FindStatus::Fail,
            lindex: 0,
            rindex: 0,
            ltime: 0,
            rtime: 0,
        }
    }
}

/// A handle identifying one opened channel within a store.
pub type ChannelId = u64;

/// Mode a channel is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Create,
    ReadOnly,
}

/// The abstract channel-of-time-indexed-binary-records contract.
///
/// Implementations are expected to be safe for concurrent readers and a
/// single writer; the core never holds a lock across a call into this
/// trait (spec §5).
pub trait StorePort: Send + Sync {
    /// Open `project/track/channel`, returning a handle for subsequent
    /// calls. `mode == Create` may create the channel if absent.
    fn open(&self, project: &str, track: &str, channel: &str, mode: OpenMode) -> CoreResult<ChannelId>;

    fn close(&self, channel: ChannelId);

    /// Inclusive first/last index, or `None` if the channel is empty.
    fn range(&self, channel: ChannelId) -> Option<(u32, u32)>;

    /// Time-to-index binary search; see [`FindResult`].
    fn find(&self, channel: ChannelId, time: i64) -> FindResult;

    /// Read the record at `index` into `out`, growing `out` if it is too
    /// small. Returns the record's timestamp.
    fn read(&self, channel: ChannelId, index: u32, out: &mut Vec<u8>) -> CoreResult<i64>;

    /// Append a record at `time`, returning the assigned index.
    fn append(&self, channel: ChannelId, time: i64, bytes: &[u8]) -> CoreResult<u32>;

    fn is_writable(&self, channel: ChannelId) -> bool;

    /// Monotonically non-decreasing; a value change signals the channel's
    /// content may have changed since the last observation.
    fn mod_count(&self, channel: ChannelId) -> u32;

    /// Channel parameters, if the channel carries the contract in §6
    /// (`channel.version`, `discretization.type/frequency`). Required for
    /// data and signals channels; absent for plain NMEA channels.
    fn channel_params(&self, channel: ChannelId) -> Option<ChannelParams>;

    fn set_channel_params(&self, channel: ChannelId, params: ChannelParams);
}

/// The channel parameter contract of spec §6.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ChannelParams {
    pub version: u32,
    pub discretization_type: crate::discretization::DiscretizationType,
    pub discretization_frequency: f64,
}

impl ChannelParams {
    /// Major version extracted from `version` (major = version / 100).
    pub fn major_version(self) -> u32 {
        self.version / 100
    }
}
