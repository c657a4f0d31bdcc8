//! 带令牌的远端存储访问：自动附带令牌，遇到 401 时清除本地令牌

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::model::{NameFilter, NewFile, RemoteFile};
use crate::domain::repository::ObjectStoreApiRef;
use crate::domain::service::token_store::TokenStore;

pub const JSON_MIME_TYPE: &str = "application/json";

pub struct RemoteObjectStore {
    api: ObjectStoreApiRef,
    tokens: Arc<TokenStore>,
}

impl RemoteObjectStore {
    pub fn new(api: ObjectStoreApiRef, tokens: Arc<TokenStore>) -> Self {
        Self { api, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    async fn token(&self) -> SyncResult<String> {
        self.tokens
            .get_token()
            .await?
            .ok_or_else(|| SyncError::Auth("no access token available".to_string()))
    }

    async fn checked<T>(&self, result: SyncResult<T>) -> SyncResult<T> {
        if let Err(err) = &result {
            if err.is_auth() {
                self.tokens.invalidate().await;
            }
        }
        result
    }

    pub async fn get_file(&self, file_id: &str) -> SyncResult<RemoteFile> {
        let token = self.token().await?;
        self.checked(self.api.get_file(&token, file_id).await).await
    }

    pub async fn find_folders(&self, name: &str) -> SyncResult<Vec<RemoteFile>> {
        let token = self.token().await?;
        self.checked(self.api.find_folders(&token, name).await).await
    }

    pub async fn create_folder(&self, name: &str) -> SyncResult<RemoteFile> {
        let token = self.token().await?;
        self.checked(self.api.create_folder(&token, name).await).await
    }

    pub async fn list_files(
        &self,
        folder_id: &str,
        filter: &NameFilter,
    ) -> SyncResult<Vec<RemoteFile>> {
        let token = self.token().await?;
        self.checked(self.api.find_files(&token, folder_id, filter).await)
            .await
    }

    /// 按名称查找文件，多个匹配时取第一个
    pub async fn find_file(&self, folder_id: &str, name: &str) -> SyncResult<Option<RemoteFile>> {
        let files = self
            .list_files(folder_id, &NameFilter::Exact(name.to_string()))
            .await?;
        if files.len() > 1 {
            debug!(folder_id, name, count = files.len(), "duplicate remote files, using first");
        }
        Ok(files.into_iter().next())
    }

    pub async fn create_file(&self, metadata: &NewFile, content: Vec<u8>) -> SyncResult<RemoteFile> {
        let token = self.token().await?;
        self.checked(self.api.create_file(&token, metadata, content).await)
            .await
    }

    pub async fn update_file(
        &self,
        file_id: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        let token = self.token().await?;
        self.checked(self.api.update_file(&token, file_id, mime_type, content).await)
            .await
    }

    /// 同名文件存在则原地更新，否则新建
    pub async fn upsert_file(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        match self.find_file(folder_id, name).await? {
            Some(existing) => {
                debug!(file_id = %existing.id, name, "updating remote file in place");
                self.update_file(&existing.id, mime_type, content).await
            }
            None => {
                debug!(folder_id, name, "creating remote file");
                let metadata = NewFile::in_folder(name, folder_id, mime_type);
                self.create_file(&metadata, content).await
            }
        }
    }

    pub async fn download(&self, file_id: &str) -> SyncResult<Bytes> {
        let token = self.token().await?;
        self.checked(self.api.download(&token, file_id).await).await
    }

    pub async fn download_json<T: serde::de::DeserializeOwned>(&self, file_id: &str) -> SyncResult<T> {
        let bytes = self.download(file_id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete_file(&self, file_id: &str) -> SyncResult<()> {
        let token = self.token().await?;
        self.checked(self.api.delete_file(&token, file_id).await).await
    }
}
