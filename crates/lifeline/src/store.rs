//! The credential store the facade was configured with.

use std::path::PathBuf;
use std::sync::Arc;

use lifeline_session::{CredentialStore, FileStore, MemoryStore, StoreError};

/// Where the facade keeps the credential between runs.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Nothing survives the process.
    #[default]
    Memory,
    /// A JSON document at this path.
    File(PathBuf),
}

impl StoreConfig {
    pub(crate) fn open(&self) -> Result<LifelineStore, StoreError> {
        Ok(match self {
            Self::Memory => LifelineStore::Memory(MemoryStore::new()),
            Self::File(path) => LifelineStore::File(Arc::new(FileStore::open(path.clone())?)),
        })
    }
}

/// One of the stores shipped with the session crate.
#[derive(Debug, Clone)]
pub enum LifelineStore {
    Memory(MemoryStore),
    File(Arc<FileStore>),
}

impl LifelineStore {
    /// Waits until pending writes are on disk. Immediate for the memory
    /// store.
    pub async fn flush(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::File(store) => store.flush().await,
        }
    }
}

impl CredentialStore for LifelineStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self {
            Self::Memory(store) => store.get(key),
            Self::File(store) => store.get(key),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set(key, value),
            Self::File(store) => store.set(key, value),
        }
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.remove(key),
            Self::File(store) => store.remove(key),
        }
    }
}
