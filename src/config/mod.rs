//! GlitchDraft Core 配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录合并）
//! - 环境特定配置覆盖
//! - 日志、本地存储、远端存储、授权与同步调度配置定义

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use toml::Value;
use tracing::warn;

// 导入配置管理器模块
mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<GlitchDraftConfig> = OnceLock::new();

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    pub level: String,
    /// 是否输出 target
    pub with_target: bool,
    /// 是否输出线程 ID
    pub with_thread_ids: bool,
    /// 是否输出文件名
    pub with_file: bool,
    /// 是否输出行号
    pub with_line_number: bool,
    /// 是否以 JSON 格式输出
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 本地快照存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 快照文件路径
    pub snapshot_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "./data/glitchdraft/storage.json".to_string(),
        }
    }
}

/// 远端对象存储（Drive v3 兼容接口）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// 元数据接口基础 URL
    pub api_base: String,
    /// 上传接口基础 URL
    pub upload_base: String,
    /// 应用目录名称
    pub folder_name: String,
    /// 整体快照文件名
    pub sync_file_name: String,
    /// 时间戳标记文件名
    pub marker_file_name: String,
    /// 单条草稿文件名前缀
    pub draft_prefix: String,
    /// 单次请求超时时间（秒）
    pub request_timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            folder_name: "GlitchDraft".to_string(),
            sync_file_name: "messenger_sync.json".to_string(),
            marker_file_name: "messenger_sync_marker.json".to_string(),
            draft_prefix: "draft-".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// 授权配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// OAuth 客户端 ID
    pub client_id: String,
    /// 授权范围
    pub scopes: Vec<String>,
    /// 授权页面地址
    pub auth_url: String,
    /// 本地回调端口
    pub redirect_port: u16,
    /// 交互式授权超时（秒）
    pub interactive_timeout_secs: u64,
    /// 非交互式授权超时（秒）
    pub silent_timeout_secs: u64,
    /// 静态访问令牌（无浏览器环境使用）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_token: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            scopes: vec!["https://www.googleapis.com/auth/drive.file".to_string()],
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            redirect_port: 8765,
            interactive_timeout_secs: 120,
            silent_timeout_secs: 30,
            static_token: None,
        }
    }
}

/// 对账策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategyKind {
    /// 整体快照，时间戳大者覆盖
    #[default]
    WholeSnapshot,
    /// 按草稿增量合并
    PerDraft,
}

/// 同步调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub strategy: SyncStrategyKind,
    /// 快速检查间隔（秒）
    pub quick_check_interval_secs: u64,
    /// 全量同步间隔（秒）
    pub full_sync_interval_secs: u64,
    /// 首次全量同步延迟（秒）
    pub full_sync_initial_delay_secs: u64,
    /// 连续无变化次数阈值，超过后降频
    pub idle_streak_threshold: u32,
    /// 降频后的最小检查间隔（秒）
    pub idle_check_interval_secs: u64,
    /// 远端时间戳缓存有效期（毫秒）
    pub marker_cache_ttl_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategy: SyncStrategyKind::WholeSnapshot,
            quick_check_interval_secs: 10,
            full_sync_interval_secs: 15 * 60,
            full_sync_initial_delay_secs: 60,
            idle_streak_threshold: 10,
            idle_check_interval_secs: 60,
            marker_cache_ttl_ms: 2_000,
        }
    }
}

/// 应用配置根
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlitchDraftConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub drive: DriveConfig,
    pub oauth: OAuthConfig,
    pub sync: SyncConfig,
}

impl GlitchDraftConfig {
    /// 修正非法取值，保证调度参数可用
    pub fn ensure_defaults(&mut self) {
        let defaults = SyncConfig::default();
        if self.sync.quick_check_interval_secs == 0 {
            self.sync.quick_check_interval_secs = defaults.quick_check_interval_secs;
        }
        if self.sync.full_sync_interval_secs == 0 {
            self.sync.full_sync_interval_secs = defaults.full_sync_interval_secs;
        }
        if self.sync.idle_check_interval_secs == 0 {
            self.sync.idle_check_interval_secs = defaults.idle_check_interval_secs;
        }
        if self.drive.request_timeout_secs == 0 {
            self.drive.request_timeout_secs = DriveConfig::default().request_timeout_secs;
        }
        if self.drive.folder_name.trim().is_empty() {
            self.drive.folder_name = DriveConfig::default().folder_name;
        }
        self.drive.api_base = self.drive.api_base.trim_end_matches('/').to_string();
        self.drive.upload_base = self.drive.upload_base.trim_end_matches('/').to_string();
    }
}

/// 加载应用配置
///
/// 首次调用时初始化全局配置，之后直接返回缓存的实例
pub fn load_config(path: Option<&str>) -> &'static GlitchDraftConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| {
        let mut cfg = load_with_fallback(&candidates);
        // 加载环境特定配置
        if let Err(e) = ConfigManager::load_environment_config(&mut cfg) {
            warn!("failed to load environment config: {}", e);
        }
        ConfigManager::apply_env_overrides(&mut cfg);
        cfg
    })
}

/// 获取应用配置
pub fn app_config() -> Option<&'static GlitchDraftConfig> {
    APP_CONFIG.get()
}

/// 从指定路径加载配置（不写入全局实例）
pub fn load_config_from_path(path: &Path) -> Result<GlitchDraftConfig> {
    let mut cfg = load_config_from_source(path)?;
    cfg.ensure_defaults();
    Ok(cfg)
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> GlitchDraftConfig {
    for path in candidates {
        match load_config_from_path(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    let mut cfg = GlitchDraftConfig::default();
    cfg.ensure_defaults();
    cfg
}

/// 从源加载配置
fn load_config_from_source(path: &Path) -> Result<GlitchDraftConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    if metadata.is_dir() {
        load_config_from_directory(path)
    } else {
        load_config_from_file(path)
    }
}

/// 从文件加载配置
fn load_config_from_file(path: &Path) -> Result<GlitchDraftConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let cfg: GlitchDraftConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(cfg)
}

/// 从目录加载配置：base.toml + overrides/*.toml
fn load_config_from_directory(path: &Path) -> Result<GlitchDraftConfig> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("overrides"))?;

    let cfg: GlitchDraftConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;

    Ok(cfg)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 合并值：表递归合并，其余类型直接覆盖
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_cadence() {
        let cfg = GlitchDraftConfig::default();
        assert_eq!(cfg.sync.strategy, SyncStrategyKind::WholeSnapshot);
        assert_eq!(cfg.sync.full_sync_interval_secs, 900);
        assert_eq!(cfg.sync.full_sync_initial_delay_secs, 60);
        assert_eq!(cfg.sync.idle_streak_threshold, 10);
        assert_eq!(cfg.sync.marker_cache_ttl_ms, 2_000);
        assert_eq!(cfg.oauth.interactive_timeout_secs, 120);
        assert_eq!(cfg.drive.folder_name, "GlitchDraft");
    }

    #[test]
    fn test_load_single_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[sync]
strategy = "per_draft"
quick_check_interval_secs = 0

[drive]
api_base = "http://127.0.0.1:9000/drive/v3/"
"#,
        )
        .unwrap();

        let cfg = load_config_from_path(&path).unwrap();
        assert_eq!(cfg.sync.strategy, SyncStrategyKind::PerDraft);
        // 0 被修正为默认值
        assert_eq!(cfg.sync.quick_check_interval_secs, 10);
        assert_eq!(cfg.drive.api_base, "http://127.0.0.1:9000/drive/v3");
        assert_eq!(cfg.drive.sync_file_name, "messenger_sync.json");
    }

    #[test]
    fn test_load_directory_merges_overrides_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.toml"),
            "[logging]\nlevel = \"debug\"\n[sync]\nquick_check_interval_secs = 5\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("overrides")).unwrap();
        fs::write(
            dir.path().join("overrides").join("10-sync.toml"),
            "[sync]\nquick_check_interval_secs = 7\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("overrides").join("20-sync.toml"),
            "[sync]\nquick_check_interval_secs = 15\n",
        )
        .unwrap();

        let cfg = load_config_from_path(dir.path()).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.sync.quick_check_interval_secs, 15);
    }

    #[test]
    fn test_missing_directory_base_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from_path(dir.path()).is_err());
    }
}
