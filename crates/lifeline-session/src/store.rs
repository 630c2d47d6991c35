//! Durable key/value slot for the credential.
//!
//! The lifecycle manager persists exactly two keys: [`TOKEN_KEY`] (the raw
//! bearer token) and [`SESSION_KEY`] (the serialized [`Session`]). A
//! missing key means "no session".
//!
//! [`Session`]: crate::Session

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};

use crate::StoreError;

/// Key holding the raw bearer token.
pub const TOKEN_KEY: &str = "token";

/// Key holding the serialized session.
pub const SESSION_KEY: &str = "user";

/// A string key/value store that outlives the process (or, for tests, does
/// not).
pub trait CredentialStore: Send + Sync + 'static {
    /// Reads a key. `Ok(None)` if it is absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a key, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes a key. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: CredentialStore> CredentialStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

fn lock(map: &Mutex<HashMap<String, String>>) -> MutexGuard<'_, HashMap<String, String>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock(&self.map).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock(&self.map).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        lock(&self.map).remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Progress of the background writer.
#[derive(Debug, Clone, Default)]
struct Written {
    version: u64,
    error: Option<String>,
}

struct WriteJob {
    version: u64,
    document: Vec<u8>,
}

#[derive(Debug, Default)]
struct Cache {
    map: HashMap<String, String>,
    version: u64,
}

/// A store backed by one JSON object on disk.
///
/// Reads are served from memory. Writes update memory immediately and hand
/// a snapshot to a background task that rewrites the file with `tokio::fs`
/// through a temporary sibling and a rename, so a crash mid-write leaves
/// either the old or the new document. Queued snapshots are coalesced;
/// [`flush`](Self::flush) waits until the latest one is on disk.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Cache>,
    jobs: mpsc::UnboundedSender<WriteJob>,
    written: watch::Receiver<Written>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path` and starts its writer.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// [`StoreError::Corrupt`] if the file exists but is not a JSON object
    /// of strings; [`StoreError::Io`] if it cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        // One small read at startup, before any session traffic.
        let map = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), keys = map.len(), "credential store opened");

        let (jobs, jobs_rx) = mpsc::unbounded_channel();
        let (written_tx, written) = watch::channel(Written::default());
        tokio::spawn(write_behind(path.clone(), jobs_rx, written_tx));

        Ok(Self {
            path,
            cache: Mutex::new(Cache { map, version: 0 }),
            jobs,
            written,
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits until every change made so far has been written.
    ///
    /// # Errors
    /// [`StoreError::WriteFailed`] if the latest write failed or the writer
    /// has stopped.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let target = lock_cache(&self.cache).version;
        let mut written = self.written.clone();
        let state = written
            .wait_for(|w| w.version >= target)
            .await
            .map_err(|_| StoreError::WriteFailed("store writer stopped".into()))?
            .clone();
        match state.error {
            Some(reason) => Err(StoreError::WriteFailed(reason)),
            None => Ok(()),
        }
    }

    fn enqueue(&self, cache: &mut Cache) -> Result<(), StoreError> {
        cache.version += 1;
        let document = serde_json::to_vec_pretty(&cache.map)?;
        self.jobs
            .send(WriteJob {
                version: cache.version,
                document,
            })
            .map_err(|_| StoreError::WriteFailed("store writer stopped".into()))
    }
}

fn lock_cache(cache: &Mutex<Cache>) -> MutexGuard<'_, Cache> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

async fn write_behind(
    path: PathBuf,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    written: watch::Sender<Written>,
) {
    while let Some(mut job) = jobs.recv().await {
        // Only the newest snapshot matters.
        while let Ok(newer) = jobs.try_recv() {
            job = newer;
        }
        let error = match write_document(&path, &job.document).await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write credential store");
                Some(e.to_string())
            }
        };
        written.send_replace(Written {
            version: job.version,
            error,
        });
    }
}

async fn write_document(path: &Path, document: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, document).await?;
    tokio::fs::rename(&tmp, path).await
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock_cache(&self.cache).map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut cache = lock_cache(&self.cache);
        cache.map.insert(key.to_string(), value.to_string());
        self.enqueue(&mut cache)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut cache = lock_cache(&self.cache);
        if cache.map.remove(key).is_some() {
            self.enqueue(&mut cache)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lifeline-store-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("credentials.json")
    }

    #[test]
    fn test_memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);

        store.set(TOKEN_KEY, "abc").unwrap();
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));

        store.remove(TOKEN_KEY).unwrap();
        store.remove(TOKEN_KEY).unwrap(); // idempotent
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let a = MemoryStore::new();
        let b = a.clone();

        a.set(SESSION_KEY, "{}").unwrap();

        assert_eq!(b.get(SESSION_KEY).unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let path = scratch_path("reopen");
        {
            let store = FileStore::open(&path).unwrap();
            store.set(TOKEN_KEY, "persisted").unwrap();
            store.flush().await.unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();

        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("persisted"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_remove_persists() {
        let path = scratch_path("remove");
        let store = FileStore::open(&path).unwrap();
        store.set(TOKEN_KEY, "t").unwrap();
        store.set(SESSION_KEY, "s").unwrap();

        store.remove(TOKEN_KEY).unwrap();
        store.flush().await.unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(reopened.get(SESSION_KEY).unwrap().as_deref(), Some("s"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_reads_see_writes_before_flush() {
        let path = scratch_path("cache");
        let store = FileStore::open(&path).unwrap();

        store.set(TOKEN_KEY, "fresh").unwrap();

        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("fresh"));
        store.flush().await.unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_flush_reports_write_failure() {
        let path = scratch_path("blocked");
        let store = FileStore::open(&path).unwrap();
        // A plain file where the parent directory should be.
        std::fs::write(path.parent().unwrap(), b"").unwrap();

        store.set(TOKEN_KEY, "t").unwrap();

        assert!(matches!(store.flush().await, Err(StoreError::WriteFailed(_))));
        assert_eq!(store.get(TOKEN_KEY).unwrap().as_deref(), Some("t"));
        let _ = std::fs::remove_file(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_file_store_flush_without_changes_returns_immediately() {
        let store = FileStore::open(scratch_path("idle")).unwrap();
        store.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_missing_file_is_empty() {
        let path = scratch_path("missing");

        let store = FileStore::open(&path).unwrap();

        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert!(!path.exists(), "open must not create the file");
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_error() {
        let path = scratch_path("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        let result = FileStore::open(&path);

        assert!(matches!(result, Err(StoreError::Corrupt(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
