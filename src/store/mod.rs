pub mod disk;
pub mod memory;

use crate::core::cache::{KeyValueCollection, Store};
use anyhow::{Context, Result};
use disk::DiskCollection;
use fjall::{Keyspace, PartitionCreateOptions};
use memory::MemoryCollection;
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

/// A thread-safe key-value store that can hold multiple collections.
///
/// Persistent collections map to fjall partitions; without a keyspace every
/// collection lives in memory.
pub struct KeyValueStore {
    collections: RwLock<HashMap<String, Arc<dyn KeyValueCollection>>>,
    keyspace: Option<Keyspace>,
}

impl KeyValueStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create data directory: {}", path.display()))?;
        let keyspace = fjall::Config::new(path.join("store"))
            .open()
            .with_context(|| format!("Failed to open store at {}", path.display()))?;
        debug!("Opened store at {}", path.display());
        Ok(Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: Some(keyspace),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keyspace: None,
        }
    }

    /// Syncs the journal so writes survive a process exit.
    pub fn flush(&self) -> Result<()> {
        if let Some(ks) = &self.keyspace {
            ks.persist(fjall::PersistMode::SyncAll)
                .context("Failed to persist store")?;
        }
        Ok(())
    }

    fn create(&self, name: &str, persist: bool) -> Option<Arc<dyn KeyValueCollection>> {
        if !persist {
            return Some(Arc::new(MemoryCollection::new()));
        }
        match &self.keyspace {
            Some(ks) => match ks.open_partition(name, PartitionCreateOptions::default()) {
                Ok(partition) => Some(Arc::new(DiskCollection::new(partition))),
                Err(e) => {
                    warn!("Failed to open partition {name}: {e}");
                    None
                }
            },
            None => Some(Arc::new(MemoryCollection::new())),
        }
    }
}

impl Default for KeyValueStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Store for KeyValueStore {
    fn get_collection(
        &self,
        name: &str,
        persist: bool,
        create_if_missing: bool,
    ) -> Option<Arc<dyn KeyValueCollection>> {
        if let Some(existing) = self.collections.read().unwrap().get(name) {
            return Some(Arc::clone(existing));
        }
        if !create_if_missing {
            return None;
        }

        let mut collections = self.collections.write().unwrap();
        if let Some(existing) = collections.get(name) {
            return Some(Arc::clone(existing));
        }
        let collection = self.create(name, persist)?;
        collections.insert(name.to_string(), Arc::clone(&collection));
        Some(collection)
    }

    fn remove_collection(&self, name: &str) -> bool {
        let mut collections = self.collections.write().unwrap();
        collections.remove(name).is_some()
    }
}
