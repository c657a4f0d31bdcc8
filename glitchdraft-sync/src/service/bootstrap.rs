//! 应用启动器 - 负责依赖注入和服务启动
use std::sync::Arc;

use anyhow::{Context, Result};
use glitchdraft_core::GlitchDraftConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::handler::SyncCommandHandler;
use crate::application::scheduler::PollScheduler;
use crate::config::SyncServiceConfig;
use crate::domain::repository::{
    IdentityProviderRef, ObjectStoreApiRef, SnapshotStoreRef, UiNotifierRef,
};
use crate::domain::service::{
    AppFolderResolver, DraftBook, RemoteObjectStore, SyncEngine, TokenStore,
};
use crate::infrastructure::drive::DriveHttpClient;
use crate::infrastructure::identity::{LoopbackIdentityProvider, StaticTokenProvider};
use crate::infrastructure::local::JsonFileSnapshotStore;
use crate::infrastructure::notify::BroadcastNotifier;
use crate::interface::native_messaging::NativeMessagingHost;

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub handler: Arc<SyncCommandHandler>,
    pub engine: Arc<SyncEngine>,
    pub scheduler: Arc<PollScheduler>,
    pub notifier: BroadcastNotifier,
}

/// 外部依赖（可替换为测试实现）
pub struct Adapters {
    pub storage: SnapshotStoreRef,
    pub api: ObjectStoreApiRef,
    pub identity: IdentityProviderRef,
    pub notifier: BroadcastNotifier,
}

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run(config: &'static GlitchDraftConfig) -> Result<()> {
        let context = Self::create_context(config)?;
        Self::start_host(context).await
    }

    /// 创建应用上下文
    pub fn create_context(config: &GlitchDraftConfig) -> Result<ApplicationContext> {
        let service_config = SyncServiceConfig::from_app_config(config);
        let adapters = Self::build_adapters(&service_config)?;
        Ok(Self::assemble(&service_config, adapters))
    }

    /// 根据配置构建外部依赖
    fn build_adapters(config: &SyncServiceConfig) -> Result<Adapters> {
        let storage: SnapshotStoreRef = Arc::new(JsonFileSnapshotStore::new(&config.snapshot_path));

        let api: ObjectStoreApiRef = Arc::new(
            DriveHttpClient::new(&config.api_base, &config.upload_base, config.request_timeout)
                .context("failed to create drive client")?,
        );

        let identity: IdentityProviderRef = match &config.static_token {
            Some(token) => {
                info!("using statically configured access token");
                Arc::new(StaticTokenProvider::new(Some(token.clone())))
            }
            None => Arc::new(LoopbackIdentityProvider::new(config.loopback.clone())),
        };

        Ok(Adapters {
            storage,
            api,
            identity,
            notifier: BroadcastNotifier::new(),
        })
    }

    /// 组装领域服务与应用服务
    pub fn assemble(config: &SyncServiceConfig, adapters: Adapters) -> ApplicationContext {
        let Adapters {
            storage,
            api,
            identity,
            notifier,
        } = adapters;

        let tokens = Arc::new(TokenStore::new(
            storage.clone(),
            api.clone(),
            identity,
            config.auth_timeouts,
        ));
        let remote = Arc::new(RemoteObjectStore::new(api, tokens.clone()));
        let folders = Arc::new(AppFolderResolver::new(
            remote.clone(),
            storage.clone(),
            config.folder_name.clone(),
        ));
        let drafts = Arc::new(DraftBook::new(storage.clone()));
        let ui: UiNotifierRef = Arc::new(notifier.clone());

        let engine = Arc::new(SyncEngine::new(
            storage.clone(),
            remote,
            folders.clone(),
            drafts.clone(),
            ui,
            config.engine.clone(),
        ));
        let scheduler = Arc::new(PollScheduler::new(engine.clone(), config.scheduler));
        let handler = Arc::new(SyncCommandHandler::new(
            engine.clone(),
            tokens,
            folders,
            drafts,
            storage,
        ));

        ApplicationContext {
            handler,
            engine,
            scheduler,
            notifier,
        }
    }

    /// 启动调度器并在标准输入输出上提供服务
    pub async fn start_host(context: ApplicationContext) -> Result<()> {
        context.scheduler.start().await;

        let shutdown = CancellationToken::new();
        let host = NativeMessagingHost::new(context.handler.clone(), context.notifier.subscribe());
        let serve = host.serve(tokio::io::stdin(), tokio::io::stdout(), shutdown.clone());
        tokio::pin!(serve);

        let result = tokio::select! {
            res = &mut serve => res,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                shutdown.cancel();
                serve.await
            }
        };

        // 执行优雅停机
        Self::graceful_shutdown(&context).await;

        if let Err(err) = &result {
            warn!(error = %err, "native messaging host stopped with error");
        }
        info!("glitchdraft sync host stopped");
        result
    }

    /// 优雅停机处理
    async fn graceful_shutdown(context: &ApplicationContext) {
        context.scheduler.suspend().await;
    }
}
