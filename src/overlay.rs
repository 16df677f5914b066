use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::types::{DpValue, StatusSnapshot};

pub const DEFAULT_OVERLAY_TTL: Duration = Duration::from_secs(10);

struct Pending {
    value: DpValue,
    expires_at: Instant,
}

/// Short-lived values for just-written data points, read in preference to
/// the last polled snapshot until they expire.
///
/// Expiry is lazy: a stale entry is dropped by the first read that sees it.
/// An expired entry is never returned, whether or not a poll confirmed it.
#[derive(Default)]
pub struct PendingOverlay {
    entries: HashMap<String, Pending>,
}

impl PendingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending(&mut self, code: impl Into<String>, value: DpValue, ttl: Duration) {
        self.set_pending_at(code, value, ttl, Instant::now());
    }

    pub fn get(&mut self, code: &str) -> Option<DpValue> {
        self.get_at(code, Instant::now())
    }

    /// Overlay value if live, else the snapshot's.
    pub fn get_effective(&mut self, code: &str, snapshot: &StatusSnapshot) -> Option<DpValue> {
        self.get_effective_at(code, snapshot, Instant::now())
    }

    pub fn invalidate(&mut self, code: &str) {
        self.entries.remove(code);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries still stored, expired ones included until read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn set_pending_at(
        &mut self,
        code: impl Into<String>,
        value: DpValue,
        ttl: Duration,
        now: Instant,
    ) {
        self.entries.insert(
            code.into(),
            Pending {
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub(crate) fn get_at(&mut self, code: &str, now: Instant) -> Option<DpValue> {
        let pending = self.entries.get(code)?;
        if now >= pending.expires_at {
            self.entries.remove(code);
            return None;
        }
        Some(pending.value.clone())
    }

    pub(crate) fn get_effective_at(
        &mut self,
        code: &str,
        snapshot: &StatusSnapshot,
        now: Instant,
    ) -> Option<DpValue> {
        self.get_at(code, now).or_else(|| snapshot.get(code).cloned())
    }
}
