use anyhow::Result;
use glitchdraft_core::load_config;
use glitchdraft_core::tracing::init_tracing_from_config;
use glitchdraft_sync::ApplicationBootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    // 浏览器启动宿主时会把扩展来源作为参数传入，配置路径只从环境变量读取
    let config_path = std::env::var("GLITCHDRAFT_CONFIG").ok();
    let app_config = load_config(config_path.as_deref());

    init_tracing_from_config(Some(&app_config.logging));

    ApplicationBootstrap::run(app_config).await
}
