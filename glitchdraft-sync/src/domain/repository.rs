use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::SyncResult;
use crate::domain::model::{LocalSnapshot, NameFilter, NewFile, RemoteFile, SyncEvent};

/// 本地快照存储（UI 与同步引擎共享）
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 读取完整快照
    async fn load(&self) -> SyncResult<LocalSnapshot>;
    async fn get(&self, key: &str) -> SyncResult<Option<Value>>;
    /// 批量写入，单次调用内的键一起落盘
    async fn set(&self, entries: Map<String, Value>) -> SyncResult<()>;
    async fn remove(&self, keys: &[&str]) -> SyncResult<()>;
}

/// 远端对象存储接口（无状态，令牌由调用方传入）
///
/// 状态码约定：401 -> `Auth`，403/404 -> `NotFound`，其余非 2xx -> `Request`
#[async_trait::async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// 轻量令牌校验
    async fn validate_token(&self, token: &str) -> SyncResult<()>;
    async fn get_file(&self, token: &str, file_id: &str) -> SyncResult<RemoteFile>;
    /// 按名称查找未删除的文件夹
    async fn find_folders(&self, token: &str, name: &str) -> SyncResult<Vec<RemoteFile>>;
    async fn create_folder(&self, token: &str, name: &str) -> SyncResult<RemoteFile>;
    /// 列出目录下未删除的文件
    async fn find_files(
        &self,
        token: &str,
        folder_id: &str,
        filter: &NameFilter,
    ) -> SyncResult<Vec<RemoteFile>>;
    /// multipart 上传新文件
    async fn create_file(
        &self,
        token: &str,
        metadata: &NewFile,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile>;
    /// 原地覆盖文件内容
    async fn update_file(
        &self,
        token: &str,
        file_id: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile>;
    async fn download(&self, token: &str, file_id: &str) -> SyncResult<Bytes>;
    async fn delete_file(&self, token: &str, file_id: &str) -> SyncResult<()>;
}

/// 凭证获取方（浏览器授权流程等）
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 获取访问令牌；`cancel` 被触发时必须尽快返回并释放资源
    async fn acquire_token(&self, interactive: bool, cancel: CancellationToken)
    -> SyncResult<String>;
}

/// UI 通知通道，尽力投递
pub trait UiNotifier: Send + Sync {
    /// 返回成功投递的订阅方数量
    fn broadcast(&self, event: &SyncEvent) -> usize;
}

pub type SnapshotStoreRef = Arc<dyn SnapshotStore>;
pub type ObjectStoreApiRef = Arc<dyn ObjectStoreApi>;
pub type IdentityProviderRef = Arc<dyn IdentityProvider>;
pub type UiNotifierRef = Arc<dyn UiNotifier>;
