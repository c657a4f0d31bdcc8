//! GlitchDraft Core 公共库
//!
//! 提供统一的配置加载、日志初始化与时间工具

pub mod config;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, DriveConfig, GlitchDraftConfig, LoggingConfig, OAuthConfig, StorageConfig,
    SyncConfig, SyncStrategyKind, app_config, load_config, load_config_from_path,
};
pub use utils::*;
