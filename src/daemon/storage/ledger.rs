use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    entities::{DayUsage, UsageLedgerEntity},
    kv_store::{get_typed, set_typed, KeyValueStore},
};

const USAGE_KEY: &str = "usage";

/// Counts resets so that checkpoints taken before a reset can be recognized. Lives in memory
/// only: checkpoints never outlive the process that took them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Generations {
    /// Bumped by [UsageLedger::clear].
    epoch: u64,
    /// Bumped by [UsageLedger::reset_day]. Missing days are generation 0.
    days: BTreeMap<String, u64>,
}

impl Generations {
    fn day(&self, day: &str) -> u64 {
        self.days.get(day).copied().unwrap_or(0)
    }
}

/// Ledger contents as seen by an upload, together with the reset generations at that moment.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub usage: UsageLedgerEntity,
    generations: Generations,
}

/// Durable day-bucketed `domain -> seconds` store. Every mutating operation is a whole-object
/// read-modify-write of the `usage` key, serialized through `guard` so that a merge never
/// interleaves with an acknowledgement.
///
/// The JSON store waits for its file lock without blocking the runtime, but while the cli reads
/// the ledger every operation here waits behind it.
pub struct UsageLedger {
    store: Arc<dyn KeyValueStore>,
    guard: Mutex<Generations>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            guard: Mutex::new(Generations::default()),
        }
    }

    async fn load(&self) -> Result<UsageLedgerEntity> {
        Ok(get_typed::<UsageLedgerEntity>(self.store.as_ref(), USAGE_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, ledger: &UsageLedgerEntity) -> Result<()> {
        set_typed(self.store.as_ref(), USAGE_KEY, ledger).await
    }

    async fn update(
        &self,
        change: impl FnOnce(&mut UsageLedgerEntity, &Generations),
    ) -> Result<()> {
        let generations = self.guard.lock().await;
        let mut ledger = self.load().await?;
        change(&mut ledger, &generations);
        self.save(&ledger).await
    }

    /// Adds `seconds` to `domain` within `day`.
    pub async fn merge(&self, day: &str, domain: &str, seconds: u64) -> Result<()> {
        if seconds == 0 {
            return Ok(());
        }
        self.update(|ledger, _| ledger.add(day, domain, seconds)).await
    }

    /// Adds every entry of `usage` to `day` in one write.
    pub async fn merge_day(&self, day: &str, usage: &DayUsage) -> Result<()> {
        if usage.values().all(|v| *v == 0) {
            return Ok(());
        }
        debug!("Merging {} domains into {day}", usage.len());
        self.update(|ledger, _| {
            for (domain, seconds) in usage {
                ledger.add(day, domain, *seconds);
            }
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<UsageLedgerEntity> {
        let _guard = self.guard.lock().await;
        self.load().await
    }

    /// Snapshot to upload. Hand it back to [UsageLedger::acknowledge] once delivered.
    pub async fn checkpoint(&self) -> Result<Checkpoint> {
        let generations = self.guard.lock().await;
        Ok(Checkpoint {
            usage: self.load().await?,
            generations: generations.clone(),
        })
    }

    /// Drops everything. Outstanding checkpoints no longer remove anything.
    pub async fn clear(&self) -> Result<()> {
        let mut generations = self.guard.lock().await;
        self.save(&UsageLedgerEntity::default()).await?;
        generations.epoch += 1;
        generations.days.clear();
        Ok(())
    }

    /// Removes exactly the seconds of `uploaded` from the ledger. Time merged after the
    /// checkpoint was taken stays in place, and so does everything in days reset since then.
    pub async fn acknowledge(&self, uploaded: &Checkpoint) -> Result<()> {
        self.update(|ledger, current| {
            if current.epoch != uploaded.generations.epoch {
                debug!("Ledger was cleared during the upload, nothing to acknowledge");
                return;
            }
            let mut still_valid = uploaded.usage.clone();
            still_valid.days.retain(|day, _| {
                let unchanged = current.day(day) == uploaded.generations.day(day);
                if !unchanged {
                    debug!("{day} was reset during the upload, keeping its new time");
                }
                unchanged
            });
            ledger.subtract(&still_valid);
        })
        .await
    }

    /// Removes a single day bucket. Outstanding checkpoints no longer remove anything from it.
    pub async fn reset_day(&self, day: &str) -> Result<()> {
        let mut generations = self.guard.lock().await;
        let mut ledger = self.load().await?;
        ledger.days.remove(day);
        self.save(&ledger).await?;
        *generations.days.entry(day.to_string()).or_insert(0) += 1;
        Ok(())
    }
}
