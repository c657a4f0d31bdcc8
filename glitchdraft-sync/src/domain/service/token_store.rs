//! 访问令牌管理：懒加载缓存、持久化、失效清理与授权流程串行化

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::{SyncError, SyncResult};
use crate::domain::model::KEY_AUTH_TOKEN;
use crate::domain::repository::{IdentityProviderRef, ObjectStoreApiRef, SnapshotStoreRef};

#[derive(Debug, Clone)]
enum CachedToken {
    Unloaded,
    Loaded(Option<String>),
}

/// 授权超时配置
#[derive(Debug, Clone, Copy)]
pub struct AuthTimeouts {
    pub interactive: Duration,
    pub silent: Duration,
}

impl Default for AuthTimeouts {
    fn default() -> Self {
        Self {
            interactive: Duration::from_secs(120),
            silent: Duration::from_secs(30),
        }
    }
}

pub struct TokenStore {
    storage: SnapshotStoreRef,
    api: ObjectStoreApiRef,
    identity: IdentityProviderRef,
    cache: Mutex<CachedToken>,
    auth_lock: Mutex<()>,
    // 每次授权成功自增，用于合并排队中的授权请求
    generation: AtomicU64,
    timeouts: AuthTimeouts,
}

impl TokenStore {
    pub fn new(
        storage: SnapshotStoreRef,
        api: ObjectStoreApiRef,
        identity: IdentityProviderRef,
        timeouts: AuthTimeouts,
    ) -> Self {
        Self {
            storage,
            api,
            identity,
            cache: Mutex::new(CachedToken::Unloaded),
            auth_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            timeouts,
        }
    }

    /// 读取令牌；首次调用时从本地存储加载，之后使用缓存
    pub async fn get_token(&self) -> SyncResult<Option<String>> {
        let mut cache = self.cache.lock().await;
        if let CachedToken::Loaded(token) = &*cache {
            return Ok(token.clone());
        }

        let token = self
            .storage
            .get(KEY_AUTH_TOKEN)
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|t| !t.is_empty());
        debug!(present = token.is_some(), "auth token loaded from storage");
        *cache = CachedToken::Loaded(token.clone());
        Ok(token)
    }

    /// 仅检查缓存中是否有令牌，不发起网络请求
    pub async fn has_token(&self) -> bool {
        match self.get_token().await {
            Ok(token) => token.is_some(),
            Err(err) => {
                warn!(error = %err, "failed to read auth token");
                false
            }
        }
    }

    pub async fn set_token(&self, token: &str) -> SyncResult<()> {
        let mut cache = self.cache.lock().await;
        let mut entries = Map::new();
        entries.insert(KEY_AUTH_TOKEN.to_string(), Value::from(token));
        self.storage.set(entries).await?;
        *cache = CachedToken::Loaded(Some(token.to_string()));
        Ok(())
    }

    pub async fn clear_token(&self) -> SyncResult<()> {
        let mut cache = self.cache.lock().await;
        *cache = CachedToken::Loaded(None);
        self.storage.remove(&[KEY_AUTH_TOKEN]).await?;
        info!("auth token cleared");
        Ok(())
    }

    /// 清理令牌，失败只记录日志
    pub async fn invalidate(&self) {
        if let Err(err) = self.clear_token().await {
            warn!(error = %err, "failed to clear invalid auth token");
        }
    }

    /// 在线校验令牌；401 时清除令牌
    pub async fn is_authenticated(&self) -> bool {
        let token = match self.get_token().await {
            Ok(Some(token)) => token,
            Ok(None) => return false,
            Err(err) => {
                warn!(error = %err, "failed to read auth token");
                return false;
            }
        };

        match self.api.validate_token(&token).await {
            Ok(()) => true,
            Err(err) if err.is_auth() => {
                debug!("auth token rejected by remote store");
                self.invalidate().await;
                false
            }
            Err(err) => {
                warn!(error = %err, "auth token validation failed");
                false
            }
        }
    }

    /// 运行授权流程并保存令牌
    ///
    /// 并发调用被串行化；排队期间已有其他调用成功时直接复用其结果
    pub async fn force_authenticate(&self, interactive: bool) -> SyncResult<String> {
        let observed = self.generation.load(Ordering::Acquire);
        let _guard = self.auth_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            if let Some(token) = self.get_token().await? {
                debug!("reusing token acquired by concurrent authentication");
                return Ok(token);
            }
        }

        let timeout = if interactive {
            self.timeouts.interactive
        } else {
            self.timeouts.silent
        };
        let cancel = CancellationToken::new();
        let flow = self.identity.acquire_token(interactive, cancel.clone());

        let token = match tokio::time::timeout(timeout, flow).await {
            Ok(Ok(token)) => token,
            Ok(Err(err)) => {
                warn!(interactive, error = %err, "authentication failed");
                return Err(err);
            }
            Err(_) => {
                cancel.cancel();
                warn!(interactive, timeout_secs = timeout.as_secs(), "authentication timed out");
                return Err(SyncError::Timeout(format!(
                    "authentication did not complete within {}s",
                    timeout.as_secs()
                )));
            }
        };

        if token.trim().is_empty() {
            return Err(SyncError::Auth("identity provider returned an empty token".to_string()));
        }

        self.set_token(&token).await?;
        self.generation.fetch_add(1, Ordering::AcqRel);
        info!(interactive, "authentication succeeded");
        Ok(token)
    }

    /// 返回可用令牌，缺失时触发授权流程
    pub async fn ensure_token(&self, interactive: bool) -> SyncResult<String> {
        match self.get_token().await? {
            Some(token) => Ok(token),
            None => self.force_authenticate(interactive).await,
        }
    }
}
