use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::repository::IdentityProvider;

/// 预先配置的访问令牌（无浏览器环境、测试）
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn acquire_token(
        &self,
        _interactive: bool,
        cancel: CancellationToken,
    ) -> SyncResult<String> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled("authorization flow cancelled".to_string()));
        }
        self.token
            .clone()
            .ok_or_else(|| SyncError::Auth("no static access token configured".to_string()))
    }
}
