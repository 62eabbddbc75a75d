//! Rate limiter with exponentially decaying scores.
//!
//! Every identifier carries a score that halves every `halflife`. Decay is
//! applied lazily whenever a record is touched, so no background timer is
//! needed. A record can also be statically blocked (arrested), which wins
//! over any score. Muzzled hashes are kept here too, so a shadow mute
//! outlives the connection it was applied to.

use std::time::Instant;

use dashmap::{DashMap, DashSet};
use tracing::debug;

#[derive(Debug, Clone)]
struct RateRecord {
    score: f64,
    last: Instant,
    arrested: bool,
}

impl RateRecord {
    fn new(now: Instant) -> Self {
        Self {
            score: 0.0,
            last: now,
            arrested: false,
        }
    }

    fn decay(&mut self, now: Instant, halflife_ms: f64) {
        let elapsed_ms = now.saturating_duration_since(self.last).as_secs_f64() * 1000.0;
        self.score *= 2f64.powf(-elapsed_ms / halflife_ms);
        self.last = now;
    }
}

/// Per-identifier abuse scoring.
///
/// Record updates happen under the map's per-key entry lock, so concurrent
/// frisks on one identifier are serialized and never lose an update.
#[derive(Debug)]
pub struct RateLimiter {
    records: DashMap<String, RateRecord>,
    /// Anonymized hash → tracked identifier
    aliases: DashMap<String, String>,
    /// Shadow-muted hashes
    muzzled: DashSet<String>,
    halflife_ms: f64,
    threshold: f64,
}

impl RateLimiter {
    pub fn new(halflife_ms: u64, threshold: f64) -> Self {
        Self {
            records: DashMap::new(),
            aliases: DashMap::new(),
            muzzled: DashSet::new(),
            halflife_ms: halflife_ms.max(1) as f64,
            threshold,
        }
    }

    /// Add `delta` to the decayed score. Returns true when over the limit.
    pub fn frisk(&self, id: &str, delta: f64) -> bool {
        self.frisk_at(id, delta, Instant::now())
    }

    pub(crate) fn frisk_at(&self, id: &str, delta: f64, now: Instant) -> bool {
        let mut record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| RateRecord::new(now));

        if record.arrested {
            return true;
        }

        record.decay(now, self.halflife_ms);
        record.score += delta;
        record.score >= self.threshold
    }

    /// Statically block `id` and remember `hash` as an alias for it.
    pub fn arrest(&self, id: &str, hash: &str) {
        self.records
            .entry(id.to_string())
            .or_insert_with(|| RateRecord::new(Instant::now()))
            .arrested = true;
        if !hash.is_empty() {
            self.aliases.insert(hash.to_string(), id.to_string());
        }
        debug!(id, "rate limiter: arrested");
    }

    /// Lift a static block. `id` may be the identifier or an alias hash.
    /// Returns whether a record was found.
    pub fn pardon(&self, id: &str) -> bool {
        let target = self
            .aliases
            .get(id)
            .map(|alias| alias.value().clone())
            .unwrap_or_else(|| id.to_string());

        match self.records.get_mut(&target) {
            Some(mut record) => {
                record.arrested = false;
                debug!(id = %target, "rate limiter: pardoned");
                true
            }
            None => false,
        }
    }

    pub fn is_arrested(&self, id: &str) -> bool {
        let target = self
            .aliases
            .get(id)
            .map(|alias| alias.value().clone())
            .unwrap_or_else(|| id.to_string());
        self.records.get(&target).is_some_and(|r| r.arrested)
    }

    /// Current decayed score, without penalizing.
    pub fn score(&self, id: &str) -> f64 {
        let now = Instant::now();
        match self.records.get_mut(id) {
            Some(mut record) => {
                record.decay(now, self.halflife_ms);
                record.score
            }
            None => 0.0,
        }
    }

    pub fn muzzle(&self, hash: &str) {
        if !hash.is_empty() {
            self.muzzled.insert(hash.to_string());
        }
    }

    /// Returns whether the hash was muzzled.
    pub fn unmuzzle(&self, hash: &str) -> bool {
        self.muzzled.remove(hash).is_some()
    }

    pub fn is_muzzled(&self, hash: &str) -> bool {
        self.muzzled.contains(hash)
    }

    /// Forget every record, alias and muzzle.
    pub fn clear(&self) {
        self.records.clear();
        self.aliases.clear();
        self.muzzled.clear();
    }
}
