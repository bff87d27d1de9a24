use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::kv_store::{get_typed, KeyValueStore};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000/api/track";
pub const DEFAULT_IDLE_SECONDS: u32 = 30;
pub const DEFAULT_USER_ID: &str = "demo-user";

const BACKEND_URL_KEY: &str = "backendUrl";
const IDLE_SECONDS_KEY: &str = "idleSeconds";
const USER_ID_KEY: &str = "userId";

/// User adjustable settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub backend_url: String,
    pub idle_seconds: u32,
    pub user_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.into(),
            idle_seconds: DEFAULT_IDLE_SECONDS,
            user_id: DEFAULT_USER_ID.into(),
        }
    }
}

impl Config {
    /// Idle threshold to feed into idle detection. Zero means "not set".
    pub fn idle_threshold(&self) -> u32 {
        if self.idle_seconds == 0 {
            DEFAULT_IDLE_SECONDS
        } else {
            self.idle_seconds
        }
    }
}

/// Partial config change. Also used to report which fields were actually written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ConfigUpdate {
    /// Drops fields that must not overwrite stored values: blank strings.
    fn effective(self) -> ConfigUpdate {
        let keep = |v: String| {
            let trimmed = v.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };
        ConfigUpdate {
            backend_url: self.backend_url.and_then(keep),
            idle_seconds: self.idle_seconds,
            user_id: self.user_id.and_then(keep),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backend_url.is_none() && self.idle_seconds.is_none() && self.user_id.is_none()
    }
}

/// Settings namespace. Missing keys fall back to [Config::default].
pub struct ConfigStore {
    store: Arc<dyn KeyValueStore>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Result<Config> {
        let defaults = Config::default();
        let store = self.store.as_ref();
        Ok(Config {
            backend_url: get_typed(store, BACKEND_URL_KEY)
                .await?
                .unwrap_or(defaults.backend_url),
            idle_seconds: get_typed(store, IDLE_SECONDS_KEY)
                .await?
                .unwrap_or(defaults.idle_seconds),
            user_id: get_typed(store, USER_ID_KEY)
                .await?
                .unwrap_or(defaults.user_id),
        })
    }

    /// Persists the non-blank fields of `update` and returns them.
    pub async fn update(&self, update: ConfigUpdate) -> Result<ConfigUpdate> {
        let saved = update.effective();
        if saved.is_empty() {
            return Ok(saved);
        }

        let mut values = Map::new();
        if let Some(v) = &saved.backend_url {
            values.insert(BACKEND_URL_KEY.into(), Value::from(v.as_str()));
        }
        if let Some(v) = saved.idle_seconds {
            values.insert(IDLE_SECONDS_KEY.into(), Value::from(v));
        }
        if let Some(v) = &saved.user_id {
            values.insert(USER_ID_KEY.into(), Value::from(v.as_str()));
        }
        self.store.set(values).await?;
        Ok(saved)
    }
}
