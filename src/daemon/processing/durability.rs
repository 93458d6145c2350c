use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::daemon::{
    accounting::reconciler::{Effect, FlushReason},
    storage::{
        entities::AggregateStore,
        kv::{KeyValueStore, StorageError, TIME_DATA_KEY},
        merge::{ImportError, merge_into, parse_snapshot_bytes},
    },
};

/// Where unreadable persisted data is moved before it gets overwritten.
pub const CORRUPT_TIME_DATA_KEY: &str = "timeDataCorrupt";

/// Serialized state of the store at a given generation.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generation: u64,
    pub bytes: Vec<u8>,
}

/// Owns the in-memory store and decides what reaches storage.
///
/// Every mutation bumps `generation`. A write carries the generation it was taken at and
/// only marks the store clean up to that generation, so mutations made while the write was in
/// flight keep the store dirty.
pub struct DurabilityController {
    store: AggregateStore,
    storage: Arc<dyn KeyValueStore>,
    generation: u64,
    persisted: u64,
    /// The persisted value could not be read at startup. It has to be merged in before the
    /// first write, otherwise writing would erase it.
    pending_load: bool,
}

impl DurabilityController {
    /// Loads persisted statistics. A failed read is not fatal: the engine starts empty and
    /// retries the read before its first write.
    pub async fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let mut controller = Self {
            store: AggregateStore::new(),
            storage,
            generation: 0,
            persisted: 0,
            pending_load: true,
        };
        if let Err(e) = controller.reconcile_persisted().await {
            warn!("Couldn't read persisted statistics, will retry before writing: {e}");
        }
        controller
    }

    pub fn store(&self) -> &AggregateStore {
        &self.store
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.storage
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.generation > self.persisted
    }

    /// Whether everything up to `generation` has reached storage.
    pub fn is_persisted(&self, generation: u64) -> bool {
        self.persisted >= generation
    }

    fn mark_dirty(&mut self) {
        self.generation += 1;
    }

    /// Applies reconciler effects. Returns the reason of the last flush they ask for.
    pub fn apply(&mut self, effects: impl IntoIterator<Item = Effect>) -> Option<FlushReason> {
        let mut flush = None;
        for effect in effects {
            match effect {
                Effect::Attribute {
                    key,
                    day,
                    duration_ms,
                    at,
                } => {
                    debug!("Attributing {duration_ms}ms to {key}");
                    self.store.attribute(&key, day, duration_ms, at);
                    self.mark_dirty();
                }
                Effect::Visit { key, at } => {
                    debug!("Visit of {key}");
                    self.store.record_visit(&key, at);
                    self.mark_dirty();
                }
                Effect::Flush(reason) => flush = Some(reason),
            }
        }
        flush
    }

    /// Replaces the store wholesale.
    pub fn replace(&mut self, store: AggregateStore) {
        self.store = store;
        self.pending_load = false;
        self.mark_dirty();
    }

    pub fn clear(&mut self) {
        self.replace(AggregateStore::new());
    }

    /// Merges an already validated snapshot into the store. A failed merge changes nothing.
    pub fn import(&mut self, incoming: &AggregateStore) -> Result<(), ImportError> {
        merge_into(&mut self.store, incoming)?;
        self.mark_dirty();
        Ok(())
    }

    /// Serializes the store if it has unflushed mutations. Returns `None` when there is
    /// nothing to write or when persisted data still has to be read first.
    pub async fn prepare_flush(&mut self) -> Result<Option<Snapshot>, StorageError> {
        if self.pending_load {
            self.reconcile_persisted().await?;
        }
        if !self.is_dirty() {
            return Ok(None);
        }
        let bytes = self
            .store
            .to_json()
            .map_err(|source| StorageError::Serialization {
                key: TIME_DATA_KEY.into(),
                source,
            })?;
        Ok(Some(Snapshot {
            generation: self.generation,
            bytes,
        }))
    }

    /// Records the outcome of writing a snapshot. A failure leaves the store dirty so the next
    /// trigger retries.
    pub fn complete_flush(&mut self, generation: u64, result: &Result<(), StorageError>) {
        match result {
            Ok(()) => {
                self.persisted = self.persisted.max(generation);
                if self.is_dirty() {
                    debug!(
                        "Flushed generation {generation}, store changed meanwhile (now {})",
                        self.generation
                    );
                } else {
                    debug!("Flushed generation {generation}");
                }
            }
            Err(e) => {
                error!("Flush of generation {generation} failed, keeping changes in memory: {e}");
            }
        }
    }

    /// Writes the store inline. Used where waiting is fine: shutdown and the cli.
    pub async fn flush(&mut self) -> Result<(), StorageError> {
        let Some(snapshot) = self.prepare_flush().await? else {
            return Ok(());
        };
        let generation = snapshot.generation;
        let result = write_snapshot(self.storage.clone(), snapshot).await;
        self.complete_flush(generation, &result);
        result
    }

    /// Merges whatever storage holds into the store, so nothing persisted by a previous run or
    /// by the cli is lost.
    async fn reconcile_persisted(&mut self) -> Result<(), StorageError> {
        let Some(bytes) = self.storage.get(TIME_DATA_KEY).await? else {
            info!("No persisted statistics found");
            self.pending_load = false;
            return Ok(());
        };

        let merged = parse_snapshot_bytes(&bytes).and_then(|mut persisted| {
            merge_into(&mut persisted, &self.store)?;
            Ok(persisted)
        });
        match merged {
            Ok(persisted) => {
                let mutated = !self.store.is_empty();
                self.store = persisted;
                if mutated {
                    self.mark_dirty();
                }
                info!("Loaded statistics for {} domains", self.store.len());
            }
            Err(e) => {
                error!("Persisted statistics can't be loaded, moving them aside: {e}");
                self.storage.set(CORRUPT_TIME_DATA_KEY, bytes).await?;
                self.mark_dirty();
            }
        }
        self.pending_load = false;
        Ok(())
    }
}

/// Writes a snapshot. Free standing so it can run as its own task while the store keeps
/// changing.
pub async fn write_snapshot(
    storage: Arc<dyn KeyValueStore>,
    snapshot: Snapshot,
) -> Result<(), StorageError> {
    storage.set(TIME_DATA_KEY, snapshot.bytes).await
}
