//! 统一错误处理模块
//!
//! 提供桥接层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **编解码错误** (`CodecError`): 原始字节缓冲区的读写错误（魔数、截断、类型标签等）
//! - **序列化错误** (`SerializeError`): GENERIC 负载的结构化克隆错误
//! - **脚本错误** (`ScriptError`): 脚本运行时创建与执行错误
//!
//! 公开的转换入口不会向调用方传播这些错误：它们在本地降级为
//! None/Nil/undefined 并记录日志。`try_*` 变体才会返回具体错误。

use crate::config::ConfigError;
use thiserror::Error;

/// 桥接层错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Serialize error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

/// 原始值编解码错误
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Buffer of {len} bytes does not start with the raw value marker")]
    MissingMagic { len: usize },

    #[error("Truncated {field}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Unknown raw value type tag: {0}")]
    UnknownTag(u8),

    #[error("Unknown entity id: {0}")]
    UnknownEntity(u16),

    #[error("Base object was destroyed and is now invalid")]
    DestroyedHandle,

    #[error("Value cannot be encoded as a raw value: {0}")]
    NotEncodable(String),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] SerializeError),

    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

/// 结构化克隆序列化错误
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("Data clone error: {0}")]
    DataClone(String),

    #[error("Value nesting exceeds the depth limit of {0}")]
    DepthExceeded(usize),

    #[error("Invalid serializer header")]
    InvalidHeader,

    #[error("Unsupported serializer version: {0}")]
    UnsupportedVersion(u32),

    #[error("Unexpected end of data at offset {0}")]
    UnexpectedEnd(usize),

    #[error("Invalid tag 0x{tag:02x} at offset {offset}")]
    InvalidTag { tag: u8, offset: usize },

    #[error("Invalid back reference: {0}")]
    InvalidReference(u32),

    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    #[error("Engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

/// 脚本系统错误
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script runtime creation failed: {0}")]
    Runtime(String),

    #[error("Script evaluation error: {0}")]
    Evaluation(String),

    #[error("Invalid script binding: {0}")]
    InvalidBinding(String),
}

/// 结果类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
pub type CodecResult<T> = Result<T, CodecError>;
pub type SerializeResult<T> = Result<T, SerializeError>;
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let codec_err = CodecError::UnknownEntity(42);
        let bridge_err: BridgeError = codec_err.into();
        assert!(matches!(bridge_err, BridgeError::Codec(_)));

        let clone_err = SerializeError::DataClone("function could not be cloned".into());
        let codec_err: CodecError = clone_err.into();
        assert!(matches!(codec_err, CodecError::Serialize(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::Truncated {
            field: "vector3 payload",
            needed: 12,
            remaining: 7,
        };
        assert_eq!(
            err.to_string(),
            "Truncated vector3 payload: needed 12 bytes, 7 remaining"
        );
        assert_eq!(
            SerializeError::InvalidTag { tag: 0x7f, offset: 3 }.to_string(),
            "Invalid tag 0x7f at offset 3"
        );
    }
}
