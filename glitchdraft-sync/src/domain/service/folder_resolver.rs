//! 应用目录解析
//!
//! 状态流转：
//! - `Unresolved -> Verified`：搜索或创建成功
//! - `CachedUnverified -> Verified`：缓存 ID 校验通过
//! - `CachedUnverified -> Unresolved`：校验失败，清除缓存
//!
//! 整个解析过程持有同一把异步锁，同一进程内不会并发创建两个目录。

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::errors::SyncResult;
use crate::domain::model::KEY_APP_FOLDER_ID;
use crate::domain::repository::SnapshotStoreRef;
use crate::domain::service::remote::RemoteObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderState {
    Unresolved,
    CachedUnverified(String),
    Verified(String),
}

pub struct AppFolderResolver {
    remote: Arc<RemoteObjectStore>,
    storage: SnapshotStoreRef,
    folder_name: String,
    // None 表示尚未从本地存储加载
    state: Mutex<Option<FolderState>>,
}

impl AppFolderResolver {
    pub fn new(
        remote: Arc<RemoteObjectStore>,
        storage: SnapshotStoreRef,
        folder_name: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            storage,
            folder_name: folder_name.into(),
            state: Mutex::new(None),
        }
    }

    /// 当前状态快照（用于诊断）
    pub async fn state(&self) -> FolderState {
        self.state
            .lock()
            .await
            .clone()
            .unwrap_or(FolderState::Unresolved)
    }

    /// 返回应用目录 ID，必要时校验缓存、搜索或创建
    pub async fn resolve(&self, interactive: bool) -> SyncResult<String> {
        self.remote.tokens().ensure_token(interactive).await?;

        let mut state = self.state.lock().await;
        if state.is_none() {
            let cached = self
                .storage
                .get(KEY_APP_FOLDER_ID)
                .await?
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|id| !id.is_empty());
            *state = Some(match cached {
                Some(id) => FolderState::CachedUnverified(id),
                None => FolderState::Unresolved,
            });
        }

        let current = state.clone().unwrap_or(FolderState::Unresolved);
        let folder_id = self.resolve_from(current).await?;
        *state = Some(FolderState::Verified(folder_id.clone()));
        Ok(folder_id)
    }

    /// 丢弃缓存并重新解析（下游操作发现目录失效时调用）
    pub async fn force_recreate(&self, interactive: bool) -> SyncResult<String> {
        self.remote.tokens().ensure_token(interactive).await?;

        let mut state = self.state.lock().await;
        info!(folder = %self.folder_name, "discarding cached app folder");
        *state = Some(FolderState::Unresolved);
        self.clear_cached_id().await?;

        let folder_id = self.resolve_from(FolderState::Unresolved).await?;
        *state = Some(FolderState::Verified(folder_id.clone()));
        Ok(folder_id)
    }

    /// 清除缓存但不重新解析（退出登录时使用）
    pub async fn reset(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        *state = Some(FolderState::Unresolved);
        self.clear_cached_id().await
    }

    async fn resolve_from(&self, state: FolderState) -> SyncResult<String> {
        match state {
            FolderState::Verified(id) => Ok(id),
            FolderState::CachedUnverified(id) => match self.remote.get_file(&id).await {
                Ok(_) => {
                    debug!(folder_id = %id, "cached app folder verified");
                    Ok(id)
                }
                Err(err) if err.is_auth() => Err(err),
                Err(err) => {
                    warn!(folder_id = %id, error = %err, "cached app folder failed verification");
                    self.clear_cached_id().await?;
                    self.search_or_create().await
                }
            },
            FolderState::Unresolved => self.search_or_create().await,
        }
    }

    async fn search_or_create(&self) -> SyncResult<String> {
        let folders = self.remote.find_folders(&self.folder_name).await?;
        let folder_id = match folders.into_iter().next() {
            Some(folder) => {
                debug!(folder_id = %folder.id, "found existing app folder");
                folder.id
            }
            None => {
                let folder = self.remote.create_folder(&self.folder_name).await?;
                info!(folder_id = %folder.id, name = %self.folder_name, "created app folder");
                folder.id
            }
        };

        let mut entries = Map::new();
        entries.insert(KEY_APP_FOLDER_ID.to_string(), Value::from(folder_id.clone()));
        self.storage.set(entries).await?;
        Ok(folder_id)
    }

    async fn clear_cached_id(&self) -> SyncResult<()> {
        self.storage.remove(&[KEY_APP_FOLDER_ID]).await
    }
}
