//! 同步核心错误类型定义

use thiserror::Error;

/// 同步核心错误类型
#[derive(Debug, Error)]
pub enum SyncError {
    /// 凭证缺失、过期或被拒绝
    #[error("Authentication error: {0}")]
    Auth(String),

    /// 预期内的缺失（远端文件不存在、目录缓存失效等）
    #[error("Not found: {0}")]
    NotFound(String),

    /// 无明确状态码的网络失败
    #[error("Network error: {0}")]
    Network(String),

    /// 远端返回非 2xx
    #[error("Request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    /// 超时（交互式授权、请求超时）
    #[error("Timed out: {0}")]
    Timeout(String),

    /// 被调用方取消
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// 已有同步在进行
    #[error("Sync already in progress")]
    SyncInProgress,

    /// 本地存储读写失败
    #[error("Storage error: {0}")]
    Storage(String),

    /// 序列化 / 反序列化失败
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 同一草稿在多端被修改，当前策略不支持自动合并
    #[error("Unsupported conflict: {0}")]
    UnsupportedConflict(String),
}

/// 同步核心结果类型
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// 下一次调度可能自行恢复的错误
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Request { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// 面向用户的失败提示
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Auth(_) => "Not signed in to cloud storage. Please sign in and try again.".to_string(),
            SyncError::SyncInProgress => "A sync is already in progress.".to_string(),
            SyncError::Network(_) | SyncError::Timeout(_) => {
                format!("Sync failed, cloud storage unreachable: {}", self)
            }
            other => format!("Sync failed: {}", other),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            SyncError::Request {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}
