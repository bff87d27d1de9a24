use serde::{Deserialize, Serialize};

use crate::daemon::storage::entities::LedgerEntry;

/// Body of `POST <backendUrl>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub user_id: String,
    pub events: Vec<UploadEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub domain: String,
    pub seconds: u64,
    pub day: String,
    /// Upload time in epoch milliseconds.
    pub ts: i64,
}

impl UploadPayload {
    /// Builds the payload from flattened ledger rows. `timestamp` is called once per event.
    pub fn from_entries(
        user_id: String,
        entries: Vec<LedgerEntry>,
        mut timestamp: impl FnMut() -> i64,
    ) -> Self {
        let events = entries
            .into_iter()
            .map(|entry| UploadEvent {
                domain: entry.domain,
                seconds: entry.seconds,
                day: entry.day,
                ts: timestamp(),
            })
            .collect();
        Self { user_id, events }
    }
}
