use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::domain::errors::SyncResult;
use crate::domain::model::LocalSnapshot;
use crate::domain::repository::SnapshotStore;

/// 内存快照存储（测试与无持久化场景）
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    entries: Arc<RwLock<Map<String, Value>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LocalSnapshot) -> Self {
        Self {
            entries: Arc::new(RwLock::new(snapshot.into_map())),
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> SyncResult<LocalSnapshot> {
        let map = self.entries.read().await;
        Ok(LocalSnapshot::from_map(map.clone()))
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        let map = self.entries.read().await;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, entries: Map<String, Value>) -> SyncResult<()> {
        let mut map = self.entries.write().await;
        map.extend(entries);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> SyncResult<()> {
        let mut map = self.entries.write().await;
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}
