use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::fs::operations::{read_optional, write_atomic, FileLock};

/// Interface for abstracting a persisted namespace of JSON values. Values are always read and
/// written whole; there are no partial updates at this layer.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes every entry of `values`. Completes only after the data is durable.
    async fn set(&self, values: Map<String, Value>) -> Result<()>;
}

/// Reads `key` and deserializes it.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(
            serde_json::from_value(value).with_context(|| format!("Malformed value for {key}"))?,
        )),
        None => Ok(None),
    }
}

/// Serializes `value` and stores it under `key`.
pub async fn set_typed<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let mut values = Map::new();
    values.insert(key.to_string(), serde_json::to_value(value)?);
    store.set(values).await
}

/// The main realization of [KeyValueStore]. The namespace is a single JSON object stored in a
/// file that is replaced atomically on every write.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    // File locks conflict even within one process, so tasks of this process coordinate here
    // before touching them.
    access: RwLock<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        Ok(Self {
            path,
            lock_path,
            access: RwLock::new(()),
        })
    }

    async fn read_object(&self) -> Result<Map<String, Value>> {
        let Some(bytes) = read_optional(&self.path).await? else {
            return Ok(Map::new());
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        match serde_json::from_slice::<Value>(&bytes)
            .with_context(|| format!("Failed to parse {:?}", self.path))?
        {
            Value::Object(map) => Ok(map),
            other => Err(anyhow!(
                "Expected an object in {:?}, found {other}",
                self.path
            )),
        }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.access.read().await;
        let lock = FileLock::shared(&self.lock_path).await?;
        let result = self.read_object().await;
        lock.release().await?;
        Ok(result?.remove(key))
    }

    async fn set(&self, values: Map<String, Value>) -> Result<()> {
        let _guard = self.access.write().await;
        let lock = FileLock::exclusive(&self.lock_path).await?;
        let result: Result<()> = async {
            let mut object = self.read_object().await?;
            object.extend(values);
            let bytes = serde_json::to_vec(&Value::Object(object))?;
            write_atomic(&self.path, &bytes).await?;
            Ok(())
        }
        .await;
        lock.release().await?;
        debug!("Persisted {:?}", self.path);
        result
    }
}
