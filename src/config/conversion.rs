/// 值转换配置

use super::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

/// 递归深度的硬上限，超过这个值会有栈溢出的风险
pub const MAX_DEPTH_LIMIT: usize = 4096;

/// 数组元素或对象属性读取失败时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// 记录日志并跳过该元素（结果列表可能比源数组短）
    Skip,
    /// 记录日志并在该位置放入 None
    Placeholder,
}

impl std::str::FromStr for FetchFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "placeholder" => Ok(Self::Placeholder),
            other => Err(ConfigError::ParseError(format!(
                "Unknown fetch failure policy: {}",
                other
            ))),
        }
    }
}

/// 值转换配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// 最大递归深度，超出的子树降级为 None
    pub max_depth: usize,

    /// 元素读取失败策略
    pub fetch_failure: FetchFailurePolicy,

    /// 是否按宿主函数身份缓存引擎侧跳板函数
    pub function_table: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_depth: 128,
            fetch_failure: FetchFailurePolicy::Skip,
            function_table: true,
        }
    }
}

impl ConversionConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "Invalid conversion max depth: {} (expected 1..={})",
                self.max_depth, MAX_DEPTH_LIMIT
            )));
        }
        Ok(())
    }
}
