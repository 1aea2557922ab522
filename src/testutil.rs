//! In-memory test doubles for the Store Port and Cache Port (spec §9:
//! "the device-emulation test harness implements them in-memory").
//!
//! Only compiled for tests; lives alongside the traits it implements
//! rather than under `tests/` since every module in this crate needs it.

use crate::error::{CoreError, CoreResult};
use crate::store::{ChannelId, ChannelParams, FindResult, FindStatus, OpenMode, StorePort};
use std::collections::HashMap;
use std::sync::Mutex;

struct MemoryChannel {
    records: Vec<(i64, Vec<u8>)>,
    writable: bool,
    params: Option<ChannelParams>,
    mod_count: u32,
}

/// An in-memory [`StorePort`]. Channels are keyed by `project/track/channel`
/// and assigned sequential ids on first open.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    by_key: HashMap<String, ChannelId>,
    channels: HashMap<ChannelId, MemoryChannel>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Open (creating if absent) and mark the channel read-only, e.g. to
    /// simulate a closed/finalized track (invariant 11).
    pub fn close_for_writing(&self, channel: ChannelId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.channels.get_mut(&channel) {
            c.writable = false;
        }
    }
}

impl StorePort for MemoryStore {
    fn open(&self, project: &str, track: &str, channel: &str, mode: OpenMode) -> CoreResult<ChannelId> {
        let mut inner = self.inner.lock().unwrap();
        let key = format!("{project}/{track}/{channel}");
        if let Some(&id) = inner.by_key.get(&key) {
            return Ok(id);
        }
        if mode == OpenMode::ReadOnly {
            return Err(CoreError::NotFound);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_key.insert(key, id);
        inner.channels.insert(
            id,
            MemoryChannel {
                records: Vec::new(),
                writable: true,
                params: None,
                mod_count: 0,
            },
        );
        Ok(id)
    }

    fn close(&self, _channel: ChannelId) {}

    fn range(&self, channel: ChannelId) -> Option<(u32, u32)> {
        let inner = self.inner.lock().unwrap();
        let c = inner.channels.get(&channel)?;
        if c.records.is_empty() {
            None
        } else {
            Some((0, c.records.len() as u32 - 1))
        }
    }

    fn find(&self, channel: ChannelId, time: i64) -> FindResult {
        let inner = self.inner.lock().unwrap();
        let Some(c) = inner.channels.get(&channel) else {
            return FindResult::fail();
        };
        if c.records.is_empty() {
            return FindResult::fail();
        }
        let n = c.records.len();
        if time <= c.records[0].0 {
            return FindResult {
                status: if time == c.records[0].0 { FindStatus::Exact } else { FindStatus::Left },
                lindex: 0,
                rindex: 0,
                ltime: c.records[0].0,
                rtime: c.records[0].0,
            };
        }
        if time >= c.records[n - 1].0 {
            return FindResult {
                status: if time == c.records[n - 1].0 { FindStatus::Exact } else { FindStatus::Right },
                lindex: n as u32 - 1,
                rindex: n as u32 - 1,
                ltime: c.records[n - 1].0,
                rtime: c.records[n - 1].0,
            };
        }
        // Binary search for the rightmost record with time <= target.
        let mut lo = 0usize;
        let mut hi = n - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if c.records[mid].0 <= time {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        if c.records[lo].0 == time {
            FindResult {
                status: FindStatus::Exact,
                lindex: lo as u32,
                rindex: lo as u32,
                ltime: time,
                rtime: time,
            }
        } else {
            FindResult {
                status: FindStatus::Inside,
                lindex: lo as u32,
                rindex: lo as u32 + 1,
                ltime: c.records[lo].0,
                rtime: c.records[lo + 1].0,
            }
        }
    }

    fn read(&self, channel: ChannelId, index: u32, out: &mut Vec<u8>) -> CoreResult<i64> {
        let inner = self.inner.lock().unwrap();
        let c = inner.channels.get(&channel).ok_or(CoreError::NotFound)?;
        let (time, bytes) = c.records.get(index as usize).ok_or(CoreError::NotFound)?;
        if out.len() < bytes.len() {
            out.resize(bytes.len(), 0);
        }
        out.truncate(bytes.len());
        out.copy_from_slice(bytes);
        Ok(*time)
    }

    fn append(&self, channel: ChannelId, time: i64, bytes: &[u8]) -> CoreResult<u32> {
        let mut inner = self.inner.lock().unwrap();
        let c = inner.channels.get_mut(&channel).ok_or(CoreError::NotFound)?;
        if !c.writable {
            return Err(CoreError::misuse("channel is read-only"));
        }
        c.records.push((time, bytes.to_vec()));
        c.mod_count += 1;
        Ok(c.records.len() as u32 - 1)
    }

    fn is_writable(&self, channel: ChannelId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.channels.get(&channel).map(|c| c.writable).unwrap_or(false)
    }

    fn mod_count(&self, channel: ChannelId) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.channels.get(&channel).map(|c| c.mod_count).unwrap_or(0)
    }

    fn channel_params(&self, channel: ChannelId) -> Option<ChannelParams> {
        let inner = self.inner.lock().unwrap();
        inner.channels.get(&channel).and_then(|c| c.params)
    }

    fn set_channel_params(&self, channel: ChannelId, params: ChannelParams) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.channels.get_mut(&channel) {
            c.params = Some(params);
        }
    }
}

/// An in-memory [`crate::cache::CachePort`].
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().contains_key(key)
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().unwrap().remove(key);
    }
}

impl crate::cache::CachePort for MemoryCache {
    fn get(&self, key: &str, out: &mut Vec<u8>) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some(v) => {
                out.clear();
                out.extend_from_slice(v);
                true
            }
            None => false,
        }
    }

    fn get2(&self, key: &str, header_bytes: usize, out_header: &mut Vec<u8>, out_body: &mut Vec<u8>) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some(v) if v.len() >= header_bytes => {
                out_header.clear();
                out_header.extend_from_slice(&v[..header_bytes]);
                out_body.clear();
                out_body.extend_from_slice(&v[header_bytes..]);
                true
            }
            _ => false,
        }
    }

    fn set(&self, key: &str, bytes: &[u8]) {
        self.inner.lock().unwrap().insert(key.to_string(), bytes.to_vec());
    }

    fn set2(&self, key: &str, header: &[u8], body: &[u8]) {
        let mut v = Vec::with_capacity(header.len() + body.len());
        v.extend_from_slice(header);
        v.extend_from_slice(body);
        self.inner.lock().unwrap().insert(key.to_string(), v);
    }
}
