/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量和运行时调整
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod codec;
pub mod conversion;

pub use codec::CodecConfig;
pub use conversion::{ConversionConfig, FetchFailurePolicy, MAX_DEPTH_LIMIT};

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 桥接层主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 值转换配置
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// 原始字节编解码配置
    #[serde(default)]
    pub codec: CodecConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BRIDGE_MAX_DEPTH") {
            if let Ok(depth) = val.parse() {
                self.conversion.max_depth = depth;
            }
        }
        if let Ok(val) = env::var("BRIDGE_FETCH_FAILURE") {
            match val.parse::<FetchFailurePolicy>() {
                Ok(policy) => self.conversion.fetch_failure = policy,
                Err(e) => tracing::warn!(target: "bridge", "Ignoring BRIDGE_FETCH_FAILURE: {}", e),
            }
        }
        if let Ok(val) = env::var("BRIDGE_FUNCTION_TABLE") {
            self.conversion.function_table = val.parse().unwrap_or(self.conversion.function_table);
        }
        if let Ok(val) = env::var("BRIDGE_CODEC_MAX_DEPTH") {
            if let Ok(depth) = val.parse() {
                self.codec.max_depth = depth;
            }
        }
        if let Ok(val) = env::var("BRIDGE_LOG_LEVEL") {
            if let Ok(level) = val.parse() {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.conversion.validate()?;
        self.codec.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./bridge.toml
    /// 2. ./bridge.json
    /// 3. ~/.config/mvalue_bridge/bridge.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置会再经过环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::find_config_file().unwrap_or_default();
        config.apply_env_overrides();
        if let Err(e) = config.validate() {
            tracing::warn!(target: "bridge", "Invalid bridge config, using defaults: {}", e);
            return Self::default();
        }
        config
    }

    fn find_config_file() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("bridge.toml") {
            tracing::info!(target: "bridge", "Loaded config from bridge.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("bridge.json") {
            tracing::info!(target: "bridge", "Loaded config from bridge.json");
            return Some(config);
        }

        if let Some(home) = env::var_os("HOME") {
            let config_path = PathBuf::from(home)
                .join(".config")
                .join("mvalue_bridge")
                .join("bridge.toml");

            if let Ok(config) = Self::from_toml_file(&config_path) {
                tracing::info!(target: "bridge", "Loaded config from {:?}", config_path);
                return Some(config);
            }
        }

        None
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到文件
    pub log_to_file: bool,

    /// 日志文件路径
    pub log_file_path: String,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_file: false,
    log_file_path: "mvalue_bridge.log".to_string(),
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::ParseError(format!("Unknown log level: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.conversion.fetch_failure, FetchFailurePolicy::Skip);
        assert!(config.conversion.function_table);
    }

    #[test]
    fn test_toml_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.conversion.max_depth, parsed.conversion.max_depth);
        assert_eq!(config.codec.max_depth, parsed.codec.max_depth);
    }

    #[test]
    fn test_json_serialization() {
        let config = BridgeConfig::default();
        let json_str = serde_json::to_string(&config).unwrap();
        let parsed = BridgeConfig::from_json_str(&json_str).unwrap();
        assert_eq!(config.logging.level, parsed.logging.level);
    }

    #[test]
    fn test_partial_toml() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [conversion]
            max_depth = 16
            fetch_failure = "placeholder"
            function_table = false
            "#,
        )
        .unwrap();
        assert_eq!(config.conversion.max_depth, 16);
        assert_eq!(config.conversion.fetch_failure, FetchFailurePolicy::Placeholder);
        assert!(!config.conversion.function_table);
        assert_eq!(config.codec.max_depth, CodecConfig::default().max_depth);
    }

    #[test]
    fn test_validation() {
        let mut config = BridgeConfig::default();
        config.conversion.max_depth = 0;
        assert!(config.validate().is_err());

        config.conversion.max_depth = MAX_DEPTH_LIMIT + 1;
        assert!(config.validate().is_err());

        config.conversion.max_depth = 32;
        config.codec.max_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");

        let mut config = BridgeConfig::default();
        config.conversion.max_depth = 64;
        config.save_toml(&path).unwrap();

        let loaded = BridgeConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.conversion.max_depth, 64);
    }

    #[test]
    fn test_policy_and_level_parsing() {
        assert_eq!("SKIP".parse::<FetchFailurePolicy>().unwrap(), FetchFailurePolicy::Skip);
        assert!("drop".parse::<FetchFailurePolicy>().is_err());
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    }
}
