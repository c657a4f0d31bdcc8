//! GlitchDraft 同步核心
//!
//! 把浏览器扩展的本地快照（草稿、设置、同步时间戳）与云端对象存储中的
//! 应用目录对账，并通过 native messaging 向扩展 UI 暴露请求接口。

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use service::{ApplicationBootstrap, ApplicationContext};
