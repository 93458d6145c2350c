use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

/// Key holding the serialized usage statistics.
pub const TIME_DATA_KEY: &str = "timeData";
/// Key owned by the settings collaborator. The engine never reads it.
pub const SETTINGS_KEY: &str = "settings";

const LOCK_FILE: &str = ".lock";
const VALUE_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {key}: {source}")]
    Read {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to clear the store: {0}")]
    Clear(#[source] std::io::Error),
    #[error("failed to serialize {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} is not a valid storage key")]
    InvalidKey(String),
}

/// Persistent key-value boundary. Values are opaque bytes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;
}

/// Stores every key as `<dir>/<key>.json`. Writes go to a temporary file that is then renamed
/// over the target, so a torn write leaves the previous value intact. An advisory lock on
/// `<dir>/.lock` serializes access between the daemon and the cli.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.dir.join(format!("{key}.{VALUE_EXTENSION}")))
    }

    async fn open_lock(&self) -> Result<File, std::io::Error> {
        File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILE))
            .await
    }

    async fn write_value(path: &Path, value: &[u8]) -> Result<(), std::io::Error> {
        let temporary = path.with_extension("tmp");
        let mut file = File::create(&temporary).await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temporary, path).await
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.value_path(key)?;
        let read_error = |source| StorageError::Read {
            key: key.to_owned(),
            source,
        };

        let lock = self.open_lock().await.map_err(read_error)?;
        lock.lock_shared().map_err(read_error)?;
        let result = match tokio::fs::read(&path).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(e)),
        };
        lock.unlock_async().await.map_err(read_error)?;
        debug!("Read {key} from {path:?}");
        result
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let path = self.value_path(key)?;
        let write_error = |source| StorageError::Write {
            key: key.to_owned(),
            source,
        };

        let lock = self.open_lock().await.map_err(write_error)?;
        lock.lock_exclusive().map_err(write_error)?;
        let result = Self::write_value(&path, &value).await.map_err(write_error);
        lock.unlock_async().await.map_err(write_error)?;
        debug!("Wrote {} bytes of {key} to {path:?}", value.len());
        result
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let lock = self.open_lock().await.map_err(StorageError::Clear)?;
        lock.lock_exclusive().map_err(StorageError::Clear)?;

        let result = async {
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().is_some_and(|v| v == VALUE_EXTENSION) {
                    tokio::fs::remove_file(&path).await?;
                }
            }
            Ok::<_, std::io::Error>(())
        }
        .await
        .map_err(StorageError::Clear);

        lock.unlock_async().await.map_err(StorageError::Clear)?;
        result
    }
}

/// Keeps values in memory. Handy when embedding the engine somewhere that brings its own
/// persistence, and in tests.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.values.lock().await.clear();
        Ok(())
    }
}
