// logging.rs
// 日志初始化：tracing 输出到标准错误，RUST_LOG 优先于配置中的级别。
use crate::error::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// 安装全局 subscriber，只能调用一次
pub fn init_logging(default_level: &str) -> Result<()> {
    let filter = build_filter(default_level)?;
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| Error::Config(format!("无法初始化日志: {}", e)))
}

fn build_filter(default_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|e| Error::Config(format!("无效的日志级别 {:?}: {}", default_level, e))),
    }
}
