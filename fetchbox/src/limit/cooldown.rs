//! Per-origin server-advertised cooldowns.

use dashmap::DashMap;

/// Map from origin to the epoch-ms deadline before which requests to that
/// origin must not proceed. Entries are purged on read once past.
#[derive(Debug, Default)]
pub struct CooldownMap {
    deadlines: DashMap<String, i64>,
}

impl CooldownMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining cooldown for `origin` in ms, purging expired entries.
    pub fn remaining_ms(&self, origin: &str, now_ms: i64) -> Option<u64> {
        let deadline = self.deadlines.get(origin).map(|entry| *entry)?;
        if deadline <= now_ms {
            self.deadlines.remove(origin);
            return None;
        }
        Some((deadline - now_ms) as u64)
    }

    /// Engages (or extends) a cooldown ending at `deadline_ms`. A shorter
    /// deadline never shortens an existing cooldown.
    pub fn engage(&self, origin: &str, deadline_ms: i64) {
        self.deadlines
            .entry(origin.to_owned())
            .and_modify(|existing| *existing = (*existing).max(deadline_ms))
            .or_insert(deadline_ms);
    }

    /// Drops every cooldown.
    pub fn clear(&self) {
        self.deadlines.clear();
    }
}
