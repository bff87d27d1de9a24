use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};

/// Replaces the contents of `path` so that readers observe either the old or the new bytes, never
/// a mix. The data is synced to disk before this returns.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), std::io::Error> {
    let temp = temp_path(path);
    {
        let mut file = File::create(&temp).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
    }
    fs::rename(&temp, path).await?;
    if let Some(parent) = path.parent() {
        // Persisting the rename itself requires syncing the directory. Not supported on every
        // platform, so failures are ignored.
        if let Ok(dir) = File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
    Ok(())
}

/// Reads the whole file, returning `None` if it doesn't exist yet.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, std::io::Error> {
    match fs::read(path).await {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Delay between attempts to take a contended lock.
const LOCK_RETRY: Duration = Duration::from_millis(10);

/// Advisory lock held on a sidecar file. The data file itself is replaced on every write, so it
/// can't carry the lock.
///
/// Waiting for a contended lock sleeps on the runtime instead of blocking the thread, so another
/// process holding the lock only delays tasks that need it.
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub async fn exclusive(path: &Path) -> Result<Self> {
        Self::acquire(path, |file| file.try_lock_exclusive()).await
    }

    pub async fn shared(path: &Path) -> Result<Self> {
        Self::acquire(path, |file| file.try_lock_shared()).await
    }

    async fn acquire(path: &Path, try_lock: impl Fn(&File) -> io::Result<()>) -> Result<Self> {
        let file = Self::open(path).await?;
        loop {
            match try_lock(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(e) if is_contended(&e) => {
                    tokio::time::sleep(LOCK_RETRY).await
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn open(path: &Path) -> Result<File, io::Error> {
        File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
    }

    pub async fn release(self) -> Result<()> {
        self.file.unlock_async().await?;
        Ok(())
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
