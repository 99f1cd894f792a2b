//! In-process key-value store with expiry and optional persistence.
//!
//! Backs tests, single-host deployments and the CLI. Entries carry an
//! optional expiry; an expired entry is invisible to every read and is
//! purged lazily on the next write.
//!
//! # Thread Safety
//!
//! All operations are thread-safe. [`MemoryStore`] uses:
//! - [`RwLock`] for the entry map (allows concurrent reads)
//! - [`Mutex`] for snapshot writes (keeps file writes in mutation order)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{KeyValue, Store};
use crate::error::{Error, Result};

/// A stored value and its expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: String,

    /// When the entry disappears (UTC). `None` never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn new(value: &str, ttl: Option<Duration>) -> Result<Self> {
        let expires_at = match ttl {
            Some(ttl) => {
                let delta = TimeDelta::from_std(ttl)
                    .map_err(|error| Error::InvalidConfig(format!("invalid ttl: {}", error)))?;
                Some(Utc::now() + delta)
            }
            None => None,
        };
        Ok(Self {
            value: value.to_string(),
            expires_at,
        })
    }

    /// Returns true if the entry has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Utc::now() > expires_at)
    }
}

/// Persistent snapshot format (serialized to JSON).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Snapshot {
    entries: BTreeMap<String, StoredValue>,
}

/// Thread-safe in-memory store.
///
/// # Example
///
/// ```no_run
/// use kvlease::store::{MemoryStore, Store};
///
/// # async fn example() -> kvlease::Result<()> {
/// let store = MemoryStore::open("kvlease-store.json").await?;
/// store.put("nets", r#"["lab"]"#).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<String, StoredValue>>>,
    path: Option<PathBuf>,
    save_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    /// Creates an empty store that lives only as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a store persisted at `path`, loading the snapshot if it exists.
    ///
    /// Every mutation rewrites the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let snapshot = Self::load_snapshot(path).await?;
        debug!(
            "Loaded {} store entries from {}",
            snapshot.entries.len(),
            path.display()
        );

        Ok(Self {
            entries: Arc::new(RwLock::new(snapshot.entries)),
            path: Some(path.to_path_buf()),
            save_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn load_snapshot(path: &Path) -> Result<Snapshot> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            Ok(snapshot)
        } else {
            Ok(Snapshot::default())
        }
    }

    async fn write_snapshot(&self, entries: BTreeMap<String, StoredValue>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&Snapshot { entries })?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Applies `mutation` under the write lock, then persists the result.
    ///
    /// The save lock is taken first so snapshots land in mutation order.
    async fn mutate<T>(
        &self,
        mutation: impl FnOnce(&mut BTreeMap<String, StoredValue>) -> Result<T>,
    ) -> Result<T> {
        let _save = self.save_lock.lock().await;

        let mut entries = self.entries.write().await;
        entries.retain(|_, stored| !stored.is_expired());
        let outcome = mutation(&mut *entries)?;
        let snapshot = self.path.is_some().then(|| entries.clone());
        drop(entries);

        if let Some(snapshot) = snapshot {
            self.write_snapshot(snapshot).await?;
        }
        Ok(outcome)
    }

    /// Forces an immediate save of the store to disk.
    pub async fn save(&self) -> Result<()> {
        let _save = self.save_lock.lock().await;
        let entries = self.entries.read().await.clone();
        self.write_snapshot(entries).await
    }

    /// Returns the count of live entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|stored| !stored.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the stored value with its expiry, if live.
    pub async fn entry(&self, key: &str) -> Option<StoredValue> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|stored| !stored.is_expired()).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entry(key).await.map(|stored| stored.value))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, stored)| !stored.is_expired())
            .map(|(key, stored)| KeyValue::new(key.clone(), stored.value.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let stored = StoredValue::new(value, None)?;
        self.mutate(|entries| {
            entries.insert(key.to_string(), stored);
            Ok(())
        })
        .await
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let stored = StoredValue::new(value, ttl)?;
        self.mutate(|entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(key.to_string(), stored);
            Ok(true)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.mutate(|entries| Ok(entries.remove(key).is_some()))
            .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            Ok(before - entries.len())
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        self.save().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestGuard(String);
    impl Drop for TestGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[tokio::test]
    async fn test_get_put_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.put("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        store.put("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("2".to_string()));

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        store.put("net/b/subnet4", "x").await.unwrap();
        store.put("net/a/pool4/2", "m2").await.unwrap();
        store.put("net/a/pool4/0", "m0").await.unwrap();
        store.put("net/a/pool4x", "no").await.unwrap();

        let listed = store.list("net/a/pool4/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                KeyValue::new("net/a/pool4/0", "m0"),
                KeyValue::new("net/a/pool4/2", "m2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let store = MemoryStore::new();
        assert!(store.create("k", "first", None).await.unwrap());
        assert!(!store.create("k", "second", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let store = MemoryStore::new();
        store
            .create("k", "v", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert!(store.entry("k").await.unwrap().expires_at.is_some());

        {
            let mut entries = store.entries.write().await;
            if let Some(stored) = entries.get_mut("k") {
                stored.expires_at = Some(Utc::now() - TimeDelta::seconds(1));
            }
        }

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.list("").await.unwrap().is_empty());
        assert!(store.create("k", "again", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("again".to_string()));
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryStore::new();
        store.put("net/a/subnet4", "x").await.unwrap();
        store.put("net/a/pool4/0", "m").await.unwrap();
        store.put("net/ab/subnet4", "y").await.unwrap();

        assert_eq!(store.delete_prefix("net/a/").await.unwrap(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_persistence() {
        let path = "test_store_persist.json".to_string();
        let _guard = TestGuard(path.clone());

        {
            let store = MemoryStore::open(&path).await.unwrap();
            store.put("nets", r#"["lab"]"#).await.unwrap();
            store
                .create("net/lab/pool4/0", "aa:bb", Some(Duration::from_secs(3600)))
                .await
                .unwrap();
        }

        {
            let store = MemoryStore::open(&path).await.unwrap();
            assert_eq!(
                store.get("nets").await.unwrap(),
                Some(r#"["lab"]"#.to_string())
            );
            let entry = store.entry("net/lab/pool4/0").await.unwrap();
            assert_eq!(entry.value, "aa:bb");
            assert!(entry.expires_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_concurrent_creates_have_one_winner() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = vec![];
        for index in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create("net/lab/pool4/0", &format!("mac-{}", index), None)
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
