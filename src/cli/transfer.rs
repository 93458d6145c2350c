//! Edits of the persisted store made from the command line. They read, change and write the
//! store while the daemon is not running; a running daemon would overwrite them on its next
//! flush.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::daemon::storage::{
    entities::AggregateStore,
    kv::{KeyValueStore, SETTINGS_KEY, TIME_DATA_KEY},
    merge::{merge_into, parse_snapshot_bytes},
};

/// Reads the persisted statistics. Missing data is an empty store, unreadable data is an
/// error since the cli must never overwrite it.
pub async fn load_store(storage: &dyn KeyValueStore) -> Result<AggregateStore> {
    let Some(bytes) = storage.get(TIME_DATA_KEY).await? else {
        info!("No persisted statistics yet");
        return Ok(AggregateStore::new());
    };
    parse_snapshot_bytes(&bytes).context("Persisted statistics are unreadable")
}

async fn save_store(storage: &dyn KeyValueStore, store: &AggregateStore) -> Result<()> {
    storage.set(TIME_DATA_KEY, store.to_json()?).await?;
    Ok(())
}

/// Writes the persisted statistics to `file` in the export format.
pub async fn export(storage: &dyn KeyValueStore, file: &Path) -> Result<usize> {
    let store = load_store(storage).await?;
    tokio::fs::write(file, store.to_json_pretty()?)
        .await
        .with_context(|| format!("Couldn't write {}", file.display()))?;
    info!("Exported {} domains to {file:?}", store.len());
    Ok(store.len())
}

/// Merges the statistics in `file` into the persisted ones. An invalid file changes nothing.
/// Importing the same file twice counts its time twice.
pub async fn import(storage: &dyn KeyValueStore, file: &Path) -> Result<usize> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Couldn't read {}", file.display()))?;
    let incoming = parse_snapshot_bytes(&bytes)
        .with_context(|| format!("{} is not a valid statistics file", file.display()))?;

    let mut store = load_store(storage).await?;
    merge_into(&mut store, &incoming)
        .with_context(|| format!("Couldn't merge {}", file.display()))?;
    save_store(storage, &store).await?;
    info!("Imported {} domains from {file:?}", incoming.len());
    Ok(incoming.len())
}

/// Removes all persisted data except the settings.
pub async fn clear(storage: &dyn KeyValueStore) -> Result<()> {
    let settings = storage.get(SETTINGS_KEY).await?;
    storage.clear().await?;
    match settings {
        Some(settings) => storage.set(SETTINGS_KEY, settings).await?,
        None => warn!("No settings to preserve"),
    }
    info!("Cleared persisted statistics");
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        daemon::storage::kv::{FileStore, MemoryStore},
        utils::logging::TEST_LOGGING,
    };

    const EXISTING: &[u8] =
        br#"{"a.com":{"totalTime":500,"visits":1,"lastVisit":50,"daily":{"2024-01-01":500}}}"#;
    const INCOMING: &str =
        r#"{"a.com":{"totalTime":1000,"visits":1,"lastVisit":100,"daily":{"2024-01-01":1000}}}"#;

    #[tokio::test]
    async fn import_merges_into_persisted() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let storage = FileStore::new(dir.path().join("store"))?;
        storage.set(TIME_DATA_KEY, EXISTING.to_vec()).await?;
        let file = dir.path().join("import.json");
        tokio::fs::write(&file, INCOMING).await?;

        assert_eq!(import(&storage, &file).await?, 1);

        let store = load_store(&storage).await?;
        let record = store.get("a.com").unwrap();
        assert_eq!(record.total_time(), 1500);
        assert_eq!(record.visits(), 2);
        assert_eq!(record.last_visit(), 100);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_import_changes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let storage = FileStore::new(dir.path().join("store"))?;
        storage.set(TIME_DATA_KEY, EXISTING.to_vec()).await?;
        let file = dir.path().join("import.json");
        tokio::fs::write(
            &file,
            r#"{"a.com":{"totalTime":1000,"lastVisit":100,"daily":{"2024-01-01":1000}}}"#,
        )
        .await?;

        assert!(import(&storage, &file).await.is_err());
        assert_eq!(storage.get(TIME_DATA_KEY).await?.unwrap(), EXISTING);
        Ok(())
    }

    #[tokio::test]
    async fn overflowing_import_changes_nothing() -> Result<()> {
        let storage = MemoryStore::new();
        let full = format!(
            r#"{{"a.com":{{"totalTime":{max},"visits":1,"lastVisit":50,"daily":{{"2024-01-01":{max}}}}}}}"#,
            max = u64::MAX
        );
        storage.set(TIME_DATA_KEY, full.clone().into_bytes()).await?;
        let dir = tempdir()?;
        let file = dir.path().join("import.json");
        tokio::fs::write(&file, INCOMING).await?;

        assert!(import(&storage, &file).await.is_err());
        assert_eq!(storage.get(TIME_DATA_KEY).await?.unwrap(), full.into_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn export_then_import_into_empty_store() -> Result<()> {
        let dir = tempdir()?;
        let source = MemoryStore::new();
        source.set(TIME_DATA_KEY, EXISTING.to_vec()).await?;
        let file = dir.path().join("export.json");

        assert_eq!(export(&source, &file).await?, 1);

        let target = MemoryStore::new();
        import(&target, &file).await?;
        assert_eq!(load_store(&target).await?, load_store(&source).await?);
        Ok(())
    }

    #[tokio::test]
    async fn clear_keeps_settings() -> Result<()> {
        let storage = MemoryStore::new();
        storage.set(TIME_DATA_KEY, EXISTING.to_vec()).await?;
        storage.set(SETTINGS_KEY, b"{\"theme\":\"dark\"}".to_vec()).await?;

        clear(&storage).await?;

        assert_eq!(storage.get(TIME_DATA_KEY).await?, None);
        assert_eq!(
            storage.get(SETTINGS_KEY).await?.unwrap(),
            b"{\"theme\":\"dark\"}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_store_is_not_overwritten() -> Result<()> {
        let dir = tempdir()?;
        let storage = MemoryStore::new();
        storage.set(TIME_DATA_KEY, b"not json".to_vec()).await?;
        let file = dir.path().join("import.json");
        tokio::fs::write(&file, INCOMING).await?;

        assert!(import(&storage, &file).await.is_err());
        assert_eq!(storage.get(TIME_DATA_KEY).await?.unwrap(), b"not json");
        Ok(())
    }
}
