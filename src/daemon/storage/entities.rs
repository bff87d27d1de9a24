use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Accumulated seconds per domain for one day.
pub type DayUsage = BTreeMap<String, u64>;

/// The struct persisted under the `usage` key. Maps a day key (`YYYY-MM-DD`, local time) to the
/// time spent on each domain during that day. `BTreeMap` keeps iteration ordered by day and then
/// by domain, which is also the order of uploaded events.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone, Default)]
#[serde(transparent)]
pub struct UsageLedgerEntity {
    pub days: BTreeMap<String, DayUsage>,
}

/// A single flattened `(day, domain, seconds)` row of the ledger.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct LedgerEntry {
    pub day: String,
    pub domain: String,
    pub seconds: u64,
}

impl UsageLedgerEntity {
    /// Additive upsert. Creates the day bucket and domain entry if needed.
    pub fn add(&mut self, day: &str, domain: &str, seconds: u64) {
        if seconds == 0 {
            return;
        }
        let bucket = self.days.entry(day.to_string()).or_default();
        let total = bucket.entry(domain.to_string()).or_insert(0);
        *total = total.saturating_add(seconds);
    }

    /// Removes the amounts present in `other`, never going below zero. Entries and buckets that
    /// reach zero are dropped.
    pub fn subtract(&mut self, other: &UsageLedgerEntity) {
        for (day, usage) in &other.days {
            let Some(bucket) = self.days.get_mut(day) else {
                continue;
            };
            for (domain, seconds) in usage {
                if let Some(total) = bucket.get_mut(domain) {
                    *total = total.saturating_sub(*seconds);
                    if *total == 0 {
                        bucket.remove(domain);
                    }
                }
            }
            if bucket.is_empty() {
                self.days.remove(day);
            }
        }
    }

    pub fn day(&self, day: &str) -> Option<&DayUsage> {
        self.days.get(day)
    }

    pub fn seconds(&self, day: &str, domain: &str) -> u64 {
        self.day(day)
            .and_then(|v| v.get(domain))
            .copied()
            .unwrap_or(0)
    }

    /// Flattens the ledger into rows, skipping entries without any time.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.days
            .iter()
            .flat_map(|(day, usage)| {
                usage
                    .iter()
                    .filter(|(_, seconds)| **seconds > 0)
                    .map(move |(domain, seconds)| LedgerEntry {
                        day: day.clone(),
                        domain: domain.clone(),
                        seconds: *seconds,
                    })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.days.values().all(|v| v.values().all(|s| *s == 0))
    }
}
