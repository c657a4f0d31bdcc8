//! 本地草稿读写：对 `drafts` 键做串行化的读-改-写

use serde_json::Map;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::domain::errors::SyncResult;
use crate::domain::model::{DraftsByChat, KEY_DRAFTS, LocalSnapshot, SavedMessage};
use crate::domain::repository::SnapshotStoreRef;

pub struct DraftBook {
    storage: SnapshotStoreRef,
    write_lock: Mutex<()>,
}

impl DraftBook {
    pub fn new(storage: SnapshotStoreRef) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> SyncResult<DraftsByChat> {
        let value = self.storage.get(KEY_DRAFTS).await?;
        let mut snapshot = LocalSnapshot::new();
        if let Some(value) = value {
            snapshot.insert(KEY_DRAFTS, value);
        }
        snapshot.drafts()
    }

    async fn store(&self, drafts: &DraftsByChat) -> SyncResult<()> {
        let mut entries = Map::new();
        entries.insert(KEY_DRAFTS.to_string(), serde_json::to_value(drafts)?);
        self.storage.set(entries).await
    }

    /// 草稿写锁；持有期间其他读-改-写会等待，用于整体替换 `drafts` 键
    pub async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// 在锁内对草稿集合执行修改并写回
    pub async fn modify<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&mut DraftsByChat) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let mut drafts = self.load().await?;
        let result = f(&mut drafts);
        self.store(&drafts).await?;
        Ok(result)
    }

    /// 新增草稿；同一聊天内 createdAt 冲突时顺延，保证唯一
    pub async fn insert(&self, chat_id: &str, mut message: SavedMessage) -> SyncResult<SavedMessage> {
        let saved = self
            .modify(|drafts| {
                let messages = drafts.entry(chat_id.to_string()).or_default();
                while messages.iter().any(|m| m.created_at == message.created_at) {
                    message.created_at += 1;
                }
                insert_sorted(messages, message.clone());
                message
            })
            .await?;
        debug!(chat_id, created_at = saved.created_at, "draft saved locally");
        Ok(saved)
    }

    pub async fn find(&self, chat_id: &str, created_at: i64) -> SyncResult<Option<SavedMessage>> {
        let drafts = self.load().await?;
        Ok(drafts
            .get(chat_id)
            .and_then(|messages| messages.iter().find(|m| m.created_at == created_at))
            .cloned())
    }

    /// 删除草稿，返回被删除的条目
    pub async fn remove(&self, chat_id: &str, created_at: i64) -> SyncResult<Option<SavedMessage>> {
        self.modify(|drafts| {
            let messages = drafts.get_mut(chat_id)?;
            let index = messages.iter().position(|m| m.created_at == created_at)?;
            let removed = messages.remove(index);
            if messages.is_empty() {
                drafts.remove(chat_id);
            }
            Some(removed)
        })
        .await
    }

    /// 记录上传后得到的远端 ID；草稿已被删除时返回 false
    pub async fn record_remote_ids(
        &self,
        chat_id: &str,
        created_at: i64,
        remote_file_id: Option<String>,
        remote_image_id: Option<String>,
    ) -> SyncResult<bool> {
        self.modify(|drafts| {
            let Some(message) = drafts
                .get_mut(chat_id)
                .and_then(|messages| messages.iter_mut().find(|m| m.created_at == created_at))
            else {
                return false;
            };
            if remote_file_id.is_some() {
                message.remote_file_id = remote_file_id;
            }
            if remote_image_id.is_some() {
                message.remote_image_id = remote_image_id;
            }
            true
        })
        .await
    }
}

/// 按 createdAt 倒序插入
pub fn insert_sorted(messages: &mut Vec<SavedMessage>, message: SavedMessage) {
    let index = messages
        .iter()
        .position(|m| m.created_at < message.created_at)
        .unwrap_or(messages.len());
    messages.insert(index, message);
}
