//! # Drive v3 HTTP 客户端
//!
//! 基于 reqwest 的 [`ObjectStoreApi`] 实现。无状态，每次调用携带 Bearer 令牌。

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::model::{FOLDER_MIME_TYPE, NameFilter, NewFile, RemoteFile, RemoteFileList};
use crate::domain::repository::ObjectStoreApi;
use crate::infrastructure::drive::{multipart, query};

const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct FileWithTrash {
    #[serde(flatten)]
    file: RemoteFile,
    #[serde(default)]
    trashed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListPage {
    #[serde(flatten)]
    list: RemoteFileList,
    next_page_token: Option<String>,
}

/// Drive HTTP 客户端
pub struct DriveHttpClient {
    client: Client,
    api_base: String,
    upload_base: String,
}

impl DriveHttpClient {
    /// 创建客户端
    pub fn new(api_base: &str, upload_base: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, base: &str, path: &str, params: &[(&str, &str)]) -> SyncResult<Url> {
        let raw = format!("{}{}", base, path);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| SyncError::Config(format!("invalid url {}: {}", raw, e)))
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.client.request(method, url).bearer_auth(token)
    }

    /// 发送请求并把非 2xx 响应映射为错误
    async fn send(&self, builder: RequestBuilder, operation: &str) -> SyncResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "drive request completed");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, operation, &body))
    }

    async fn list(&self, token: &str, q: &str) -> SyncResult<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", q),
                ("fields", query::LIST_FIELDS),
                ("spaces", "drive"),
                ("pageSize", PAGE_SIZE),
            ];
            if let Some(page) = page_token.as_deref() {
                params.push(("pageToken", page));
            }
            let url = self.url(&self.api_base, "/files", &params)?;
            let response = self
                .send(self.request(Method::GET, url, token), "files.list")
                .await?;
            let page: FileListPage = response.json().await?;
            files.extend(page.list.files);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(files)
    }
}

/// 状态码映射：401 -> Auth，403/404 -> NotFound，其余 -> Request
pub fn map_status(status: StatusCode, operation: &str, body: &str) -> SyncError {
    let detail = if body.is_empty() {
        format!("{} returned {}", operation, status)
    } else {
        format!("{} returned {}: {}", operation, status, truncate(body, 256))
    };
    match status {
        StatusCode::UNAUTHORIZED => SyncError::Auth(detail),
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => SyncError::NotFound(detail),
        other => SyncError::Request {
            status: other.as_u16(),
            message: detail,
        },
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[async_trait::async_trait]
impl ObjectStoreApi for DriveHttpClient {
    async fn validate_token(&self, token: &str) -> SyncResult<()> {
        let url = self.url(&self.api_base, "/about", &[("fields", "user")])?;
        self.send(self.request(Method::GET, url, token), "about.get")
            .await?;
        Ok(())
    }

    async fn get_file(&self, token: &str, file_id: &str) -> SyncResult<RemoteFile> {
        let path = format!("/files/{}", file_id);
        let url = self.url(&self.api_base, &path, &[("fields", query::FILE_FIELDS)])?;
        let response = self
            .send(self.request(Method::GET, url, token), "files.get")
            .await?;
        let file: FileWithTrash = response.json().await?;
        if file.trashed {
            return Err(SyncError::NotFound(format!("file {} is trashed", file_id)));
        }
        Ok(file.file)
    }

    async fn find_folders(&self, token: &str, name: &str) -> SyncResult<Vec<RemoteFile>> {
        self.list(token, &query::folder_query(name)).await
    }

    async fn create_folder(&self, token: &str, name: &str) -> SyncResult<RemoteFile> {
        let url = self.url(&self.api_base, "/files", &[("fields", query::FILE_FIELDS)])?;
        let metadata = NewFile {
            name: name.to_string(),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: Vec::new(),
        };
        let response = self
            .send(
                self.request(Method::POST, url, token).json(&metadata),
                "files.create(folder)",
            )
            .await?;
        let file: RemoteFile = response.json().await?;
        debug!(folder_id = %file.id, name, "folder created");
        Ok(file)
    }

    async fn find_files(
        &self,
        token: &str,
        folder_id: &str,
        filter: &NameFilter,
    ) -> SyncResult<Vec<RemoteFile>> {
        let files = self
            .list(token, &query::files_query(folder_id, filter))
            .await?;
        Ok(files
            .into_iter()
            .filter(|f| query::matches(filter, &f.name))
            .collect())
    }

    async fn create_file(
        &self,
        token: &str,
        metadata: &NewFile,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        let content_mime = metadata
            .mime_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let body = multipart::build_body(metadata, content_mime, &content)?;
        let url = self.url(
            &self.upload_base,
            "/files",
            &[("uploadType", "multipart"), ("fields", query::FILE_FIELDS)],
        )?;
        let response = self
            .send(
                self.request(Method::POST, url, token)
                    .header(header::CONTENT_TYPE, multipart::content_type())
                    .body(body),
                "files.create",
            )
            .await?;
        let file: RemoteFile = response.json().await?;
        debug!(file_id = %file.id, name = %metadata.name, "file created");
        Ok(file)
    }

    async fn update_file(
        &self,
        token: &str,
        file_id: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        let path = format!("/files/{}", file_id);
        let url = self.url(
            &self.upload_base,
            &path,
            &[("uploadType", "media"), ("fields", query::FILE_FIELDS)],
        )?;
        let response = self
            .send(
                self.request(Method::PATCH, url, token)
                    .header(header::CONTENT_TYPE, mime_type)
                    .body(content),
                "files.update",
            )
            .await?;
        let file: RemoteFile = response.json().await?;
        debug!(file_id = %file.id, "file updated");
        Ok(file)
    }

    async fn download(&self, token: &str, file_id: &str) -> SyncResult<Bytes> {
        let path = format!("/files/{}", file_id);
        let url = self.url(&self.api_base, &path, &[("alt", "media")])?;
        let response = self
            .send(self.request(Method::GET, url, token), "files.download")
            .await?;
        Ok(response.bytes().await?)
    }

    async fn delete_file(&self, token: &str, file_id: &str) -> SyncResult<()> {
        let path = format!("/files/{}", file_id);
        let url = self.url(&self.api_base, &path, &[])?;
        self.send(self.request(Method::DELETE, url, token), "files.delete")
            .await?;
        debug!(file_id, "file deleted");
        Ok(())
    }
}
