//! 原始值编解码
//!
//! 把单个脚本值编码为自描述的字节缓冲区，或反向解码。
//!
//! ```text
//! [5 字节魔数 "JSVal"][1 字节类型标签][负载]
//! ```
//!
//! | 标签 | 类型    | 负载                                  |
//! |------|---------|---------------------------------------|
//! | 0    | GENERIC | 结构化克隆格式（见 [`super::serializer`]） |
//! | 1    | ENTITY  | u16 实体 ID                           |
//! | 2    | VECTOR3 | 3 × f32                               |
//! | 3    | VECTOR2 | 2 × f32                               |
//! | 4    | RGBA    | 4 × u8                                |
//!
//! 所有多字节字段为小端序。`INVALID` (5) 只用于分类结果，从不写入缓冲区。

use super::convert::Bridge;
use super::embedding::WrapperState;
use super::intrinsics::Intrinsics;
use super::serializer::{LogDelegate, ValueDeserializer, ValueSerializer};
use super::shape::{object_shape, ObjectShape};
use crate::core::error::{CodecError, CodecResult};
use crate::mvalue::{BaseObjectRef, MValue, Rgba};
use glam::{Vec2, Vec3};
use rquickjs::{Ctx, Value};
use tracing::{debug, error, warn};

/// 原始值缓冲区的魔数
pub const RAW_MAGIC: [u8; 5] = *b"JSVal";

/// 魔数 + 类型标签的长度
pub const RAW_HEADER_LEN: usize = RAW_MAGIC.len() + 1;

/// 原始值类型标签
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawValueType {
    Generic = 0,
    Entity = 1,
    Vector3 = 2,
    Vector2 = 3,
    Rgba = 4,
    Invalid = 5,
}

impl TryFrom<u8> for RawValueType {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Generic),
            1 => Ok(Self::Entity),
            2 => Ok(Self::Vector3),
            3 => Ok(Self::Vector2),
            4 => Ok(Self::Rgba),
            5 => Ok(Self::Invalid),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

/// 缓冲区是否以原始值魔数开头
pub fn is_raw_value(bytes: &[u8]) -> bool {
    bytes.starts_with(&RAW_MAGIC)
}

/// 编码前的分类结果
enum RawSource<'js> {
    Generic(Value<'js>),
    /// `None` 表示实体已被销毁
    Entity(Option<BaseObjectRef>),
    Vector3(Vec3),
    Vector2(Vec2),
    Rgba(Rgba),
    Invalid(&'static str),
}

impl RawSource<'_> {
    fn value_type(&self) -> RawValueType {
        match self {
            RawSource::Generic(_) => RawValueType::Generic,
            RawSource::Entity(_) => RawValueType::Entity,
            RawSource::Vector3(_) => RawValueType::Vector3,
            RawSource::Vector2(_) => RawValueType::Vector2,
            RawSource::Rgba(_) => RawValueType::Rgba,
            RawSource::Invalid(_) => RawValueType::Invalid,
        }
    }
}

impl Bridge {
    /// 脚本值编码时会使用的类型标签
    pub fn raw_value_type<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>) -> RawValueType {
        match Intrinsics::get(ctx) {
            Ok(intrinsics) => self.classify_raw(ctx, &intrinsics, value).value_type(),
            Err(err) => {
                let _ = ctx.catch();
                error!(target: "bridge::raw", "Failed to load engine intrinsics: {}", err);
                RawValueType::Invalid
            }
        }
    }

    fn classify_raw<'js>(
        &self,
        ctx: &Ctx<'js>,
        intrinsics: &Intrinsics<'js>,
        value: &Value<'js>,
    ) -> RawSource<'js> {
        let Some(object) = value.as_object() else {
            return RawSource::Generic(value.clone());
        };

        match self.embedding().wrapper_state(ctx, object) {
            Some(WrapperState::Live(handle)) if handle.is_entity() => {
                return RawSource::Entity(Some(handle))
            }
            // 非实体句柄没有可传输的 ID
            Some(WrapperState::Live(_)) => return RawSource::Invalid("base object"),
            Some(WrapperState::Destroyed) => return RawSource::Entity(None),
            None => {}
        }

        match object_shape(object, |_| None) {
            ObjectShape::Vector3(v) => return RawSource::Vector3(v),
            ObjectShape::Vector2(v) => return RawSource::Vector2(v),
            ObjectShape::Rgba(c) => return RawSource::Rgba(c),
            _ => {}
        }

        if intrinsics.is_shared_array_buffer(object) {
            return RawSource::Invalid("SharedArrayBuffer");
        }
        if value.is_function() {
            return RawSource::Invalid("function");
        }
        RawSource::Generic(value.clone())
    }

    // ========================================================================
    // 编码
    // ========================================================================

    /// 编码脚本值，返回具体错误
    pub fn try_to_raw_bytes<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>) -> CodecResult<Vec<u8>> {
        let intrinsics = Intrinsics::get(ctx)?;
        let source = self.classify_raw(ctx, &intrinsics, value);

        let mut writer = ValueSerializer::new(
            ctx.clone(),
            &intrinsics,
            &LogDelegate,
            self.config().codec.max_depth,
        );
        writer.write_raw_bytes(&RAW_MAGIC);
        writer.write_raw_bytes(&[source.value_type() as u8]);

        match source {
            RawSource::Generic(value) => {
                writer.write_header();
                writer.write_value(&value)?;
            }
            RawSource::Entity(Some(handle)) => writer.write_raw_bytes(&handle.id().to_le_bytes()),
            RawSource::Entity(None) => return Err(CodecError::DestroyedHandle),
            RawSource::Vector3(v) => {
                for component in v.to_array() {
                    writer.write_raw_bytes(&component.to_le_bytes());
                }
            }
            RawSource::Vector2(v) => {
                for component in v.to_array() {
                    writer.write_raw_bytes(&component.to_le_bytes());
                }
            }
            RawSource::Rgba(c) => writer.write_raw_bytes(bytemuck::bytes_of(&c)),
            RawSource::Invalid(what) => return Err(CodecError::NotEncodable(what.to_string())),
        }

        // 缓冲区归调用方所有，不与引擎内存共享
        Ok(writer.release())
    }

    /// 编码脚本值，无法编码时返回 `None` 并记录日志
    pub fn encode_raw<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>) -> Option<Vec<u8>> {
        match self.try_to_raw_bytes(ctx, value) {
            Ok(bytes) => Some(bytes),
            Err(CodecError::NotEncodable(what)) => {
                debug!(target: "bridge::raw", "Value of kind {} is not encodable", what);
                None
            }
            Err(err) => {
                let _ = ctx.catch();
                error!(target: "bridge::raw", "Failed to encode raw value: {}", err);
                None
            }
        }
    }

    /// 编码脚本值为宿主字节数组
    ///
    /// 无法编码时返回 [`MValue::None`]。
    pub fn to_raw_bytes<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>) -> MValue {
        self.encode_raw(ctx, value)
            .map(MValue::ByteArray)
            .unwrap_or(MValue::None)
    }

    // ========================================================================
    // 解码
    // ========================================================================

    /// 解码原始值缓冲区，返回具体错误
    ///
    /// 输入先被复制到编解码器自己的缓冲区，读取过程不引用调用方的内存。
    pub fn try_from_raw_bytes<'js>(&self, ctx: &Ctx<'js>, bytes: &[u8]) -> CodecResult<Value<'js>> {
        if !is_raw_value(bytes) {
            return Err(CodecError::MissingMagic { len: bytes.len() });
        }

        let scratch = bytes.to_vec();
        let intrinsics = Intrinsics::get(ctx)?;
        let mut reader = ValueDeserializer::new(
            ctx.clone(),
            &intrinsics,
            &scratch,
            self.config().codec.max_depth,
        );
        reader.read_raw_bytes(RAW_MAGIC.len());

        let [tag] = read_field::<1>(&mut reader, "type tag")?;
        let embedding = self.embedding();
        match RawValueType::try_from(tag)? {
            RawValueType::Generic => {
                reader.read_header()?;
                Ok(reader.read_value()?)
            }
            RawValueType::Entity => {
                let id = u16::from_le_bytes(read_field(&mut reader, "entity id")?);
                let handle = embedding
                    .entity_by_id(id)
                    .ok_or(CodecError::UnknownEntity(id))?;
                embedding
                    .wrapper_of(ctx, &handle)?
                    .map(|wrapper| wrapper.into_value())
                    .ok_or(CodecError::UnknownEntity(id))
            }
            RawValueType::Vector3 => {
                let x = read_f32(&mut reader, "vector3.x")?;
                let y = read_f32(&mut reader, "vector3.y")?;
                let z = read_f32(&mut reader, "vector3.z")?;
                Ok(embedding.create_vector3(ctx, Vec3::new(x, y, z))?)
            }
            RawValueType::Vector2 => {
                let x = read_f32(&mut reader, "vector2.x")?;
                let y = read_f32(&mut reader, "vector2.y")?;
                Ok(embedding.create_vector2(ctx, Vec2::new(x, y))?)
            }
            RawValueType::Rgba => {
                let channels = read_field::<4>(&mut reader, "rgba")?;
                let color: Rgba = bytemuck::cast(channels);
                Ok(embedding.create_rgba(ctx, color)?)
            }
            RawValueType::Invalid => Err(CodecError::UnknownTag(tag)),
        }
    }

    /// 解码原始值缓冲区，失败时返回 `None` 并记录日志
    pub fn from_raw_bytes<'js>(&self, ctx: &Ctx<'js>, bytes: &[u8]) -> Option<Value<'js>> {
        match self.try_from_raw_bytes(ctx, bytes) {
            Ok(value) => Some(value),
            Err(err @ CodecError::MissingMagic { .. }) => {
                debug!(target: "bridge::raw", "{}", err);
                None
            }
            Err(err @ CodecError::UnknownEntity(_)) => {
                warn!(target: "bridge::raw", "{}", err);
                None
            }
            Err(err) => {
                let _ = ctx.catch();
                error!(target: "bridge::raw", "Failed to decode raw value: {}", err);
                None
            }
        }
    }
}

fn read_field<const N: usize>(
    reader: &mut ValueDeserializer<'_, '_>,
    field: &'static str,
) -> CodecResult<[u8; N]> {
    let remaining = reader.remaining();
    let bytes = reader.read_raw_bytes(N).ok_or(CodecError::Truncated {
        field,
        needed: N,
        remaining,
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

fn read_f32(reader: &mut ValueDeserializer<'_, '_>, field: &'static str) -> CodecResult<f32> {
    read_field::<4>(reader, field).map(f32::from_le_bytes)
}
