//!  Storage is organized through [kv_store::KeyValueStore] namespaces.
//!  The basic idea is:
//!   - There are two JSON files in the application directory: `settings.json` for the
//!     [config_store::ConfigStore] and `local.json` for the [ledger::UsageLedger].
//!   - Each file holds a single object. Reads and writes always move whole values, merging happens
//!     in application code before the value is written back.
//!   - Usage is stored as accumulated seconds per domain inside day buckets.

pub mod config_store;
pub mod entities;
pub mod kv_store;
pub mod ledger;

use std::{path::Path, sync::Arc};

use config_store::ConfigStore;
use kv_store::JsonFileStore;
use ledger::UsageLedger;

pub const SETTINGS_FILE: &str = "settings.json";
pub const LOCAL_FILE: &str = "local.json";

/// Opens the settings namespace of an application directory.
pub fn open_config(dir: &Path) -> Result<ConfigStore, std::io::Error> {
    Ok(ConfigStore::new(Arc::new(JsonFileStore::new(
        dir.join(SETTINGS_FILE),
    )?)))
}

/// Opens the usage ledger of an application directory.
pub fn open_ledger(dir: &Path) -> Result<UsageLedger, std::io::Error> {
    Ok(UsageLedger::new(Arc::new(JsonFileStore::new(
        dir.join(LOCAL_FILE),
    )?)))
}
