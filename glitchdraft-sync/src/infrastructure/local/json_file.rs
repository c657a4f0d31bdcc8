//! JSON 文件快照存储
//!
//! 整个快照保存为一个 JSON 对象；写入先落到临时文件再原子替换。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::model::LocalSnapshot;
use crate::domain::repository::SnapshotStore;

pub struct JsonFileSnapshotStore {
    path: PathBuf,
    // None 表示尚未从磁盘加载
    cache: Mutex<Option<Map<String, Value>>>,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_from_disk(&self) -> SyncResult<Map<String, Value>> {
        match fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Map::new()),
            Ok(bytes) => {
                let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    SyncError::Storage(format!(
                        "corrupt snapshot file {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                Ok(LocalSnapshot::from_value(value)?.into_map())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "snapshot file missing, starting empty");
                Ok(Map::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn write_to_disk(&self, entries: &Map<String, Value>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// 在锁内读-改-写，修改成功才更新缓存
    async fn update<F>(&self, f: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Map<String, Value>),
    {
        let mut cache = self.cache.lock().await;
        let mut entries = match cache.as_ref() {
            Some(entries) => entries.clone(),
            None => self.read_from_disk().await?,
        };
        f(&mut entries);
        self.write_to_disk(&entries).await?;
        *cache = Some(entries);
        Ok(())
    }

    async fn snapshot(&self) -> SyncResult<Map<String, Value>> {
        let mut cache = self.cache.lock().await;
        if let Some(entries) = cache.as_ref() {
            return Ok(entries.clone());
        }
        let entries = self.read_from_disk().await?;
        *cache = Some(entries.clone());
        Ok(entries)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn load(&self) -> SyncResult<LocalSnapshot> {
        Ok(LocalSnapshot::from_map(self.snapshot().await?))
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Value>> {
        Ok(self.snapshot().await?.get(key).cloned())
    }

    async fn set(&self, entries: Map<String, Value>) -> SyncResult<()> {
        self.update(|map| map.extend(entries)).await
    }

    async fn remove(&self, keys: &[&str]) -> SyncResult<()> {
        self.update(|map| {
            for key in keys {
                map.remove(*key);
            }
        })
        .await
    }
}
