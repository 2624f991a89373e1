//! 日志系统初始化
//!
//! 桥接层所有诊断都通过 `tracing` 宏输出，target 统一以 `bridge::` 开头：
//!
//! | target               | 来源                     |
//! |----------------------|--------------------------|
//! | `bridge::convert`    | 值转换器                 |
//! | `bridge::function`   | 函数跳板与函数表         |
//! | `bridge::raw`        | 原始字节编解码器         |
//! | `bridge::serializer` | GENERIC 结构化序列化器   |
//!
//! 宿主程序通常已有自己的 subscriber，此时不需要调用 [`init_logging`]。

use crate::config::{LogLevel, LoggingConfig};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// 初始化日志系统
///
/// `RUST_LOG` 环境变量优先于配置中的级别。重复调用是安全的，
/// 已存在全局 subscriber 时返回 `false`。
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config.level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if config.log_to_file {
        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file_path)
        {
            Ok(file) => builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .is_ok(),
            Err(e) => {
                eprintln!(
                    "Failed to open log file {}: {}, falling back to console",
                    config.log_file_path, e
                );
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(filter_directive(config.level)))
                    .try_init()
                    .is_ok()
            }
        }
    } else if config.log_to_console {
        builder.try_init().is_ok()
    } else {
        false
    };

    if installed {
        tracing::debug!(target: "bridge", "Logging initialized at {:?}", config.level);
    }
    installed
}

/// 将日志级别转换为 `EnvFilter` 指令
pub fn filter_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive() {
        assert_eq!(filter_directive(LogLevel::Warn), "warn");
        assert_eq!(filter_directive(LogLevel::Trace), "trace");
    }

    #[test]
    fn test_disabled_logging_installs_nothing() {
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: false,
            ..LoggingConfig::default()
        };
        assert!(!init_logging(&config));
    }
}
