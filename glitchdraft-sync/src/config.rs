use std::time::Duration;

use glitchdraft_core::config::GlitchDraftConfig;

use crate::application::scheduler::SchedulerSettings;
use crate::domain::service::{AuthTimeouts, SyncSettings};
use crate::infrastructure::identity::LoopbackSettings;

/// 同步服务运行参数
#[derive(Clone, Debug)]
pub struct SyncServiceConfig {
    pub snapshot_path: String,
    pub api_base: String,
    pub upload_base: String,
    pub request_timeout: Duration,
    pub folder_name: String,
    pub static_token: Option<String>,
    pub loopback: LoopbackSettings,
    pub auth_timeouts: AuthTimeouts,
    pub engine: SyncSettings,
    pub scheduler: SchedulerSettings,
}

impl SyncServiceConfig {
    pub fn from_app_config(app: &GlitchDraftConfig) -> Self {
        let drive = &app.drive;
        let oauth = &app.oauth;
        let sync = &app.sync;

        let static_token = oauth
            .static_token
            .as_ref()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Self {
            snapshot_path: app.storage.snapshot_path.clone(),
            api_base: drive.api_base.clone(),
            upload_base: drive.upload_base.clone(),
            request_timeout: Duration::from_secs(drive.request_timeout_secs.max(1)),
            folder_name: drive.folder_name.clone(),
            static_token,
            loopback: LoopbackSettings {
                client_id: oauth.client_id.clone(),
                scopes: oauth.scopes.clone(),
                auth_url: oauth.auth_url.clone(),
                redirect_port: oauth.redirect_port,
            },
            auth_timeouts: AuthTimeouts {
                interactive: Duration::from_secs(oauth.interactive_timeout_secs.max(1)),
                silent: Duration::from_secs(oauth.silent_timeout_secs.max(1)),
            },
            engine: SyncSettings {
                strategy: sync.strategy,
                sync_file_name: drive.sync_file_name.clone(),
                marker_file_name: drive.marker_file_name.clone(),
                draft_prefix: drive.draft_prefix.clone(),
                idle_streak_threshold: sync.idle_streak_threshold,
                idle_check_interval: Duration::from_secs(sync.idle_check_interval_secs),
                marker_cache_ttl: Duration::from_millis(sync.marker_cache_ttl_ms),
            },
            scheduler: SchedulerSettings {
                quick_check_interval: Duration::from_secs(sync.quick_check_interval_secs.max(1)),
                full_sync_interval: Duration::from_secs(sync.full_sync_interval_secs.max(1)),
                full_sync_initial_delay: Duration::from_secs(sync.full_sync_initial_delay_secs),
            },
        }
    }
}
