//! State stores
//!
//! [`FileStateStore`] keeps one JSON document per cluster under
//! `<root>/.clusterflow/state/`. [`MemoryStateStore`] keeps them in process.

use crate::error::{CloudError, Result};
use crate::state::{ClusterKey, ClusterState, ClusterType, ProviderKind, STATE_VERSION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;

const STATE_DIR: &str = ".clusterflow";
const STATE_SUBDIR: &str = "state";
const LOCK_SUBDIR: &str = "locks";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const STATE_TEMP: &str = "state.json.tmp";
const STALE_LOCK_HOURS: i64 = 1;

/// Filter used by [`StateStore::list`]
#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    pub provider: Option<ProviderKind>,
    pub cluster_type: Option<ClusterType>,
}

impl ClusterFilter {
    pub fn matches(&self, key: &ClusterKey) -> bool {
        self.provider.is_none_or(|p| p == key.provider)
            && self.cluster_type.is_none_or(|t| t == key.cluster_type)
    }
}

/// Persistence for cluster state documents
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the record for `key`. `None` when no record exists.
    async fn load(&self, key: &ClusterKey) -> Result<Option<ClusterState>>;

    /// Persist the whole document
    async fn save(&self, state: &ClusterState) -> Result<()>;

    /// Remove the record for `key`. Removing a missing record is not an error.
    async fn delete(&self, key: &ClusterKey) -> Result<()>;

    /// All records matching `filter`
    async fn list(&self, filter: &ClusterFilter) -> Result<Vec<ClusterState>>;

    /// Exclusive access to one cluster record
    async fn acquire_lock(&self, key: &ClusterKey) -> Result<StateLock>;
}

/// JSON file store rooted at a project or home directory
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn state_root(&self) -> PathBuf {
        self.root.join(STATE_DIR).join(STATE_SUBDIR)
    }

    /// Directory holding one cluster's state files
    fn cluster_dir(&self, key: &ClusterKey) -> PathBuf {
        self.state_root()
            .join(key.provider.to_string())
            .join(key.cluster_type.to_string())
            .join(format!("{}@{}", key.name, key.region))
    }

    fn lock_path(&self, key: &ClusterKey) -> PathBuf {
        self.root.join(STATE_DIR).join(LOCK_SUBDIR).join(format!(
            "{}-{}-{}@{}.json",
            key.provider, key.cluster_type, key.name, key.region
        ))
    }

    async fn read_document(path: &Path) -> Result<ClusterState> {
        let content = fs::read_to_string(path).await?;
        let state: ClusterState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, key: &ClusterKey) -> Result<Option<ClusterState>> {
        let dir = self.cluster_dir(key);
        let path = dir.join(STATE_FILE);
        if path.exists() {
            let state = Self::read_document(&path).await?;
            tracing::debug!("Loaded state for {}", key);
            return Ok(Some(state));
        }

        // A crash between backup and rename leaves only the backup behind
        let backup = dir.join(STATE_BACKUP);
        if backup.exists() {
            tracing::warn!("State file missing for {}, recovering from backup", key);
            return Ok(Some(Self::read_document(&backup).await?));
        }

        tracing::debug!("State file not found for {}", key);
        Ok(None)
    }

    async fn save(&self, state: &ClusterState) -> Result<()> {
        let key = state.key();
        let dir = self.cluster_dir(&key);
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }

        let path = dir.join(STATE_FILE);
        if path.exists() {
            fs::copy(&path, dir.join(STATE_BACKUP)).await?;
        }

        let content = serde_json::to_string_pretty(state)?;
        let tmp = dir.join(STATE_TEMP);
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved state for {}", key);
        Ok(())
    }

    async fn delete(&self, key: &ClusterKey) -> Result<()> {
        let dir = self.cluster_dir(key);
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
            tracing::debug!("Removed state for {}", key);
        }
        Ok(())
    }

    async fn list(&self, filter: &ClusterFilter) -> Result<Vec<ClusterState>> {
        let root = self.state_root();
        let mut clusters = Vec::new();
        if !root.exists() {
            return Ok(clusters);
        }

        // <provider>/<cluster_type>/<name>@<region>/state.json
        let mut providers = fs::read_dir(&root).await?;
        while let Some(provider) = providers.next_entry().await? {
            if !provider.file_type().await?.is_dir() {
                continue;
            }
            let mut types = fs::read_dir(provider.path()).await?;
            while let Some(cluster_type) = types.next_entry().await? {
                if !cluster_type.file_type().await?.is_dir() {
                    continue;
                }
                let mut entries = fs::read_dir(cluster_type.path()).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path().join(STATE_FILE);
                    if !path.exists() {
                        continue;
                    }
                    match Self::read_document(&path).await {
                        Ok(state) if filter.matches(&state.key()) => clusters.push(state),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Skipping unreadable state {}: {}", path.display(), e),
                    }
                }
            }
        }

        clusters.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        Ok(clusters)
    }

    async fn acquire_lock(&self, key: &ClusterKey) -> Result<StateLock> {
        let lock_path = self.lock_path(key);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Check for existing lock
        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < STALE_LOCK_HOURS {
                return Err(CloudError::LockError(format!(
                    "{} is locked by {} since {}",
                    key, lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!("Removing stale lock from {}", lock_info.holder);
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!("Acquired state lock for {}", key);
        Ok(StateLock {
            lock_path: Some(lock_path),
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for a cluster lock
pub struct StateLock {
    lock_path: Option<PathBuf>,
    released: bool,
}

impl StateLock {
    /// A guard that is not backed by a file
    pub fn detached() -> Self {
        Self {
            lock_path: None,
            released: false,
        }
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if let Some(path) = &self.lock_path
                && path.exists()
            {
                fs::remove_file(path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(path) = &self.lock_path
            && path.exists()
        {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// In-process store, mostly for tests and dry runs
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<ClusterKey, ClusterState>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Current record without going through the async trait
    pub fn get(&self, key: &ClusterKey) -> Option<ClusterState> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(key).cloned())
    }

    fn poisoned() -> CloudError {
        CloudError::StateError("memory store mutex poisoned".to_string())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &ClusterKey) -> Result<Option<ClusterState>> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn save(&self, state: &ClusterState) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.insert(state.key(), state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &ClusterKey) -> Result<()> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.remove(key);
        Ok(())
    }

    async fn list(&self, filter: &ClusterFilter) -> Result<Vec<ClusterState>> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        let mut clusters: Vec<ClusterState> = records
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(_, state)| state.clone())
            .collect();
        clusters.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        Ok(clusters)
    }

    async fn acquire_lock(&self, key: &ClusterKey) -> Result<StateLock> {
        // The process owns every in-memory record, so the guard is detached
        tracing::debug!("Acquired in-memory lock for {}", key);
        Ok(StateLock::detached())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NodeRecord, Role, RoleInventory};
    use tempfile::tempdir;

    fn key(name: &str) -> ClusterKey {
        ClusterKey::new(ProviderKind::Local, "local-1", name, ClusterType::SelfManaged)
    }

    fn populated_state(name: &str) -> ClusterState {
        let mut state = ClusterState::new(&key(name), Some("platform".to_string()));
        state.network.id = "net-1".to_string();
        state.network.extra.insert("cidr".to_string(), "10.0.0.0/16".to_string());
        state.control_plane = Some(RoleInventory::with_len(3));
        state.worker_plane = Some(RoleInventory::with_len(0));
        state.set_node(
            Role::ControlPlane,
            1,
            NodeRecord {
                instance_id: "vm-1".to_string(),
                hostname: "demo-vm-cp-1".to_string(),
                ..Default::default()
            },
        );
        state
    }

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let state = populated_state("demo");
        store.save(&state).await.unwrap();

        let loaded = store.load(&key("demo")).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_of_load_is_lossless() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        store.save(&populated_state("demo")).await.unwrap();

        let path = temp_dir
            .path()
            .join(".clusterflow/state/local/self-managed/demo@local-1/state.json");
        let before = std::fs::read_to_string(&path).unwrap();

        let loaded = store.load(&key("demo")).await.unwrap().unwrap();
        store.save(&loaded).await.unwrap();

        let after = std::fs::read_to_string(&path).unwrap();
        assert_eq!(before, after);
        assert_eq!(store.load(&key("demo")).await.unwrap().unwrap(), loaded);
    }

    #[tokio::test]
    async fn test_missing_state() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        assert!(store.load(&key("nope")).await.unwrap().is_none());
        assert!(store.list(&ClusterFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_from_backup() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let state = populated_state("demo");
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();

        let dir = temp_dir
            .path()
            .join(".clusterflow/state/local/self-managed/demo@local-1");
        std::fs::remove_file(dir.join(STATE_FILE)).unwrap();

        let loaded = store.load(&key("demo")).await.unwrap().unwrap();
        assert_eq!(loaded.network.id, "net-1");
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let mut state = populated_state("demo");
        state.version = STATE_VERSION + 1;
        store.save(&state).await.unwrap();

        let err = store.load(&key("demo")).await.unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        store.save(&populated_state("beta")).await.unwrap();
        store.save(&populated_state("alpha")).await.unwrap();

        let listed = store.list(&ClusterFilter::default()).await.unwrap();
        let names: Vec<_> = listed.iter().map(|s| s.meta.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        let managed_only = ClusterFilter {
            cluster_type: Some(ClusterType::Managed),
            ..Default::default()
        };
        assert!(store.list(&managed_only).await.unwrap().is_empty());

        store.delete(&key("alpha")).await.unwrap();
        store.delete(&key("alpha")).await.unwrap();
        assert!(store.load(&key("alpha")).await.unwrap().is_none());
        assert_eq!(store.list(&ClusterFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        let lock = store.acquire_lock(&key("demo")).await.unwrap();
        let err = store.acquire_lock(&key("demo")).await.err().unwrap();
        assert!(matches!(err, CloudError::LockError(_)));

        // other clusters are independent
        let other = store.acquire_lock(&key("other")).await.unwrap();

        lock.release().await.unwrap();
        let again = store.acquire_lock(&key("demo")).await.unwrap();
        drop(again);
        drop(other);
        assert!(store.acquire_lock(&key("demo")).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_store_counts_saves() {
        let store = MemoryStateStore::new();
        let state = populated_state("demo");
        store.save(&state).await.unwrap();
        store.save(&state).await.unwrap();

        assert_eq!(store.save_count(), 2);
        assert_eq!(store.get(&key("demo")), Some(state));
        store.delete(&key("demo")).await.unwrap();
        assert!(store.load(&key("demo")).await.unwrap().is_none());
    }
}
