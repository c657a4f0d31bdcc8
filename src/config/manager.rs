//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 该模块提供了配置管理功能，包括：
//! - 加载环境特定配置
//! - 从环境变量注入访问令牌

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

use super::{GlitchDraftConfig, merge_value};

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 GLITCHDRAFT_ENV 获取当前环境名称，
    /// 如果未设置则默认为 "development"
    pub fn get_environment() -> String {
        env::var("GLITCHDRAFT_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置
    ///
    /// 加载 config/environments/{environment}.toml 文件中的配置，
    /// 并将其合并到基础配置中
    pub fn load_environment_config(base_config: &mut GlitchDraftConfig) -> Result<()> {
        let env = Self::get_environment();
        let env_config_path = format!("config/environments/{}.toml", env);
        Self::merge_file(base_config, Path::new(&env_config_path))
    }

    /// 将一个 TOML 片段合并到已加载的配置上
    pub fn merge_file(base_config: &mut GlitchDraftConfig, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let env_config_content = fs::read_to_string(path)
            .with_context(|| format!("无法读取环境配置文件: {}", path.display()))?;
        let env_config: Value = toml::from_str(&env_config_content)
            .with_context(|| format!("无效的环境配置格式: {}", path.display()))?;

        let mut current = Value::try_from(&*base_config)
            .context("failed to re-encode base configuration")?;
        merge_value(&mut current, env_config);

        let mut merged: GlitchDraftConfig = current
            .try_into()
            .with_context(|| format!("invalid configuration after merging {}", path.display()))?;
        merged.ensure_defaults();
        *base_config = merged;
        Ok(())
    }

    /// 环境变量覆盖
    ///
    /// GLITCHDRAFT_ACCESS_TOKEN 优先于配置文件中的 static_token
    pub fn apply_env_overrides(config: &mut GlitchDraftConfig) {
        if let Ok(token) = env::var("GLITCHDRAFT_ACCESS_TOKEN") {
            let token = token.trim();
            if !token.is_empty() {
                config.oauth.static_token = Some(token.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("production.toml");
        fs::write(&path, "[sync]\nstrategy = \"per_draft\"\n[oauth]\nredirect_port = 9999\n")
            .unwrap();

        let mut cfg = GlitchDraftConfig::default();
        cfg.ensure_defaults();
        ConfigManager::merge_file(&mut cfg, &path).unwrap();

        assert_eq!(cfg.sync.strategy, super::super::SyncStrategyKind::PerDraft);
        assert_eq!(cfg.oauth.redirect_port, 9999);
        assert_eq!(cfg.sync.quick_check_interval_secs, 10);
        assert_eq!(cfg.drive.folder_name, "GlitchDraft");
    }

    #[test]
    fn test_merge_missing_file_is_noop() {
        let mut cfg = GlitchDraftConfig::default();
        ConfigManager::merge_file(&mut cfg, Path::new("/nonexistent/glitchdraft.toml")).unwrap();
        assert_eq!(cfg.logging.level, "info");
    }
}
