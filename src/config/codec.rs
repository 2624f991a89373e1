/// 原始字节编解码配置

use super::conversion::MAX_DEPTH_LIMIT;
use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// 原始字节编解码配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// GENERIC 负载序列化/反序列化的最大嵌套深度
    pub max_depth: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

impl CodecConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "Invalid codec max depth: {}",
                self.max_depth
            )));
        }
        Ok(())
    }
}
