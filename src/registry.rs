//! Registry of currently active RuuviTags.
//!
//! The registry is the single source of truth for whether a device is still
//! around. It remembers when each device was last heard from, together with
//! the raw payload of its latest advertisement, and forgets devices that have
//! been silent for longer than the TTL.
//!
//! Two locks live here:
//! - the entry map mutex, held only for map operations, never across metric
//!   store calls;
//! - the sweep gate, which observers share for the duration of one ingestion
//!   and the sweeper takes exclusively while it evicts and deletes series.
//!   That keeps the registry and the metric series in lockstep: a sweep can
//!   never delete series written by an observer whose upsert it did not see.
//!   The sweeper only tries the gate and never waits for an observer.

use std::collections::HashMap;
use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};
use std::time::{Duration, SystemTime};

/// Last known state of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    /// Canonical device address
    pub address: String,
    /// Arrival time of the most recent reading
    pub last_seen: SystemTime,
    /// Raw advertisement re-encoded as uppercase hex, empty for short payloads
    pub raw_payload_hex: String,
    /// Data format byte of the last payload
    pub format_version: u8,
}

impl DeviceEntry {
    /// Whether the entry is strictly older than `ttl` at `now`.
    ///
    /// An entry stamped in the future (clock stepped backwards) is never
    /// considered expired.
    pub fn is_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        now.duration_since(self.last_seen)
            .is_ok_and(|age| age > ttl)
    }
}

/// Thread-safe map from device address to [`DeviceEntry`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: Mutex<HashMap<String, DeviceEntry>>,
    sweep_gate: RwLock<()>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, DeviceEntry>> {
        // Map operations cannot leave the map half-updated, so a poisoned
        // lock is still safe to use.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the entry for `address`.
    ///
    /// Returns `true` when the device was not known before.
    pub fn upsert(
        &self,
        address: &str,
        last_seen: SystemTime,
        raw_payload_hex: String,
        format_version: u8,
    ) -> bool {
        let entry = DeviceEntry {
            address: address.to_string(),
            last_seen,
            raw_payload_hex,
            format_version,
        };
        self.entries().insert(entry.address.clone(), entry).is_none()
    }

    pub fn get(&self, address: &str) -> Option<DeviceEntry> {
        self.entries().get(address).cloned()
    }

    /// Copy of all current entries. No lock is held once this returns.
    pub fn snapshot(&self) -> HashMap<String, DeviceEntry> {
        self.entries().clone()
    }

    /// Remove every entry whose `last_seen` is strictly older than `ttl`
    /// relative to `now`, returning the removed addresses.
    pub fn evict_older_than(&self, ttl: Duration, now: SystemTime) -> Vec<String> {
        let mut entries = self.entries();
        let expired: Vec<String> = entries
            .values()
            .filter(|entry| entry.is_expired(ttl, now))
            .map(|entry| entry.address.clone())
            .collect();
        for address in &expired {
            entries.remove(address);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Shared access held by an observer across its upsert and series writes.
    pub(crate) fn ingest_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.sweep_gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access held by the sweeper across eviction and series
    /// deletion, or `None` while any observer is mid-ingestion.
    pub(crate) fn try_sweep_guard(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        match self.sweep_gate.try_write() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
