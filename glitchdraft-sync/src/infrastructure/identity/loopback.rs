//! # 本地回环授权
//!
//! 隐式授权流程：在浏览器中打开授权页，授权服务器把令牌放在 URL 片段中
//! 重定向到 `http://127.0.0.1:<port>/callback`。片段不会发送到服务端，
//! 因此回调页先返回一段跳转脚本，把片段改写为 `/token?...` 查询串再请求一次。

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::repository::IdentityProvider;

const MAX_REQUEST_BYTES: usize = 16 * 1024;

const BOUNCE_PAGE: &str = "<!doctype html><html><body><p>Completing sign-in...</p>\
<script>var h=window.location.hash.substring(1);\
window.location.replace('/token?'+(h||'error=missing_fragment'));</script></body></html>";

const DONE_PAGE: &str =
    "<!doctype html><html><body><p>Sign-in complete. You can close this window.</p></body></html>";

const FAILED_PAGE: &str =
    "<!doctype html><html><body><p>Sign-in failed. You can close this window.</p></body></html>";

/// 回环授权参数
#[derive(Debug, Clone)]
pub struct LoopbackSettings {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub auth_url: String,
    pub redirect_port: u16,
}

/// 回调请求的解析结果
#[derive(Debug, PartialEq, Eq)]
pub enum CallbackRequest {
    /// 需要返回跳转页
    Bounce,
    Token(String),
    Denied(String),
    Other,
}

pub struct LoopbackIdentityProvider {
    settings: LoopbackSettings,
}

impl LoopbackIdentityProvider {
    pub fn new(settings: LoopbackSettings) -> Self {
        Self { settings }
    }

    fn redirect_uri(&self, port: u16) -> String {
        format!("http://127.0.0.1:{}/callback", port)
    }

    async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> SyncResult<String> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(SyncError::Cancelled("authorization flow cancelled".to_string()));
                }
                accepted = listener.accept() => accepted?,
            };
            debug!(%peer, "authorization callback connection");

            match handle_connection(stream).await {
                Ok(CallbackRequest::Token(token)) => return Ok(token),
                Ok(CallbackRequest::Denied(reason)) => {
                    return Err(SyncError::Auth(format!("authorization denied: {}", reason)));
                }
                Ok(_) => {}
                Err(err) => debug!(error = %err, "ignoring malformed callback request"),
            }
        }
    }
}

/// 构造授权地址
pub fn build_authorization_url(
    settings: &LoopbackSettings,
    redirect_uri: &str,
    interactive: bool,
) -> SyncResult<Url> {
    let scope = settings.scopes.join(" ");
    let prompt = if interactive { "consent" } else { "none" };
    Url::parse_with_params(
        &settings.auth_url,
        &[
            ("client_id", settings.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "token"),
            ("scope", scope.as_str()),
            ("prompt", prompt),
        ],
    )
    .map_err(|e| SyncError::Config(format!("invalid auth_url {}: {}", settings.auth_url, e)))
}

/// 解析请求行中的目标路径
pub fn parse_callback(request_line: &str) -> CallbackRequest {
    let mut parts = request_line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return CallbackRequest::Other;
    };
    let Ok(url) = Url::parse(&format!("http://127.0.0.1{}", target)) else {
        return CallbackRequest::Other;
    };

    match url.path() {
        "/callback" => CallbackRequest::Bounce,
        "/token" => {
            let mut token = None;
            let mut error = None;
            for (key, value) in url.query_pairs() {
                match key.as_ref() {
                    "access_token" if !value.is_empty() => token = Some(value.into_owned()),
                    "error" => error = Some(value.into_owned()),
                    _ => {}
                }
            }
            match (token, error) {
                (Some(token), _) => CallbackRequest::Token(token),
                (None, Some(error)) => CallbackRequest::Denied(error),
                (None, None) => CallbackRequest::Denied("no access_token in callback".to_string()),
            }
        }
        _ => CallbackRequest::Other,
    }
}

async fn handle_connection(mut stream: TcpStream) -> SyncResult<CallbackRequest> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buffer);
    let request_line = text.lines().next().unwrap_or_default();
    let request = parse_callback(request_line);

    let (status, body) = match &request {
        CallbackRequest::Bounce => ("200 OK", BOUNCE_PAGE),
        CallbackRequest::Token(_) => ("200 OK", DONE_PAGE),
        CallbackRequest::Denied(_) => ("200 OK", FAILED_PAGE),
        CallbackRequest::Other => ("404 Not Found", ""),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(request)
}

#[async_trait]
impl IdentityProvider for LoopbackIdentityProvider {
    async fn acquire_token(
        &self,
        interactive: bool,
        cancel: CancellationToken,
    ) -> SyncResult<String> {
        if !interactive {
            // 没有浏览器会话可静默复用
            return Err(SyncError::Auth(
                "silent authorization is not available, sign in required".to_string(),
            ));
        }
        if self.settings.client_id.is_empty() {
            return Err(SyncError::Config("oauth.client_id is not configured".to_string()));
        }

        let listener = TcpListener::bind(("127.0.0.1", self.settings.redirect_port)).await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = self.redirect_uri(port);
        let auth_url = build_authorization_url(&self.settings, &redirect_uri, interactive)?;

        info!(%redirect_uri, "opening browser for authorization");
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!(error = %e, url = %auth_url, "failed to open browser, open the url manually");
        }

        self.serve(listener, cancel).await
    }
}
