//! 脚本值分类
//!
//! 每个脚本值在转换前只分类一次，得到一个封闭的 [`Shape`]，
//! 后续分派只依赖分类结果，不会对同一对象重复探测。
//!
//! 对象形状的优先级：Vector3 (数值 x,y,z) → Vector2 (数值 x,y)
//! → RGBA (数值 r,g,b,a) → BaseObject 包装对象 → 普通对象。

use super::embedding::{Embedding, WrapperState};
use super::intrinsics::Intrinsics;
use crate::mvalue::Rgba;
use glam::{Vec2, Vec3};
use rquickjs::{Array, ArrayBuffer, BigInt, Ctx, Function, Object, Value};

/// 脚本值分类结果
pub enum Shape<'js> {
    Undefined,
    Null,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    BigInt(BigInt<'js>),
    Number(f64),
    String(rquickjs::String<'js>),
    Array(Array<'js>),
    Function(Function<'js>),
    ArrayBuffer(ArrayBuffer<'js>),
    SharedArrayBuffer(Object<'js>),
    Map(Object<'js>),
    Object(Object<'js>, ObjectShape),
    /// Symbol 等无法表示的值
    Unsupported,
}

/// 普通对象的专用形状
#[derive(Debug, Clone)]
pub enum ObjectShape {
    Vector3(Vec3),
    Vector2(Vec2),
    Rgba(Rgba),
    BaseObject(WrapperState),
    Plain,
}

/// 数值分类
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberKind {
    Int32(i32),
    Uint32(u32),
    Double(f64),
}

/// 按 int32 → uint32 → double 的顺序给浮点数分类
///
/// -0.0 不属于任何整数类别。
pub fn classify_number(n: f64) -> NumberKind {
    let integral = n.is_finite() && n.fract() == 0.0 && !(n == 0.0 && n.is_sign_negative());
    if integral {
        if n >= i32::MIN as f64 && n <= i32::MAX as f64 {
            return NumberKind::Int32(n as i32);
        }
        if n >= 0.0 && n <= u32::MAX as f64 {
            return NumberKind::Uint32(n as u32);
        }
    }
    NumberKind::Double(n)
}

/// 分类脚本值
pub fn classify<'js>(
    ctx: &Ctx<'js>,
    intrinsics: &Intrinsics<'js>,
    embedding: &dyn Embedding,
    value: &Value<'js>,
) -> Shape<'js> {
    if value.is_undefined() {
        return Shape::Undefined;
    }
    if value.is_null() {
        return Shape::Null;
    }
    if let Some(b) = value.as_bool() {
        return Shape::Bool(b);
    }
    if let Some(i) = value.as_int() {
        return Shape::Int32(i);
    }
    if let Some(big) = value.as_big_int() {
        return Shape::BigInt(big.clone());
    }
    if let Some(n) = value.as_float() {
        return match classify_number(n) {
            NumberKind::Int32(i) => Shape::Int32(i),
            NumberKind::Uint32(u) => Shape::Uint32(u),
            NumberKind::Double(d) => Shape::Number(d),
        };
    }
    if let Some(s) = value.as_string() {
        return Shape::String(s.clone());
    }

    let Some(object) = value.as_object() else {
        return Shape::Unsupported;
    };

    if let Some(array) = value.as_array() {
        return Shape::Array(array.clone());
    }
    if let Some(function) = value.as_function() {
        return Shape::Function(function.clone());
    }
    if intrinsics.is_shared_array_buffer(object) {
        return Shape::SharedArrayBuffer(object.clone());
    }
    if let Some(buffer) = ArrayBuffer::from_object(object.clone()) {
        return Shape::ArrayBuffer(buffer);
    }
    if intrinsics.is_map(object) {
        return Shape::Map(object.clone());
    }

    let shape = object_shape(object, |obj| embedding.wrapper_state(ctx, obj));
    Shape::Object(object.clone(), shape)
}

/// 探测对象形状
///
/// `wrapper` 只在专用形状都不匹配时调用。
pub fn object_shape<'js>(
    object: &Object<'js>,
    wrapper: impl FnOnce(&Object<'js>) -> Option<WrapperState>,
) -> ObjectShape {
    let x = number_property(object, "x");
    let y = number_property(object, "y");

    if let (Some(x), Some(y)) = (x, y) {
        if let Some(z) = number_property(object, "z") {
            return ObjectShape::Vector3(Vec3::new(x as f32, y as f32, z as f32));
        }
        return ObjectShape::Vector2(Vec2::new(x as f32, y as f32));
    }

    if let Some(rgba) = rgba_properties(object) {
        return ObjectShape::Rgba(rgba);
    }

    match wrapper(object) {
        Some(state) => ObjectShape::BaseObject(state),
        None => ObjectShape::Plain,
    }
}

fn number_property<'js>(object: &Object<'js>, key: &str) -> Option<f64> {
    object.get::<_, Value>(key).ok()?.as_number()
}

fn rgba_properties<'js>(object: &Object<'js>) -> Option<Rgba> {
    let r = number_property(object, "r")?;
    let g = number_property(object, "g")?;
    let b = number_property(object, "b")?;
    let a = number_property(object, "a")?;
    // 超出范围的通道按饱和截断
    Some(Rgba::new(r as u8, g as u8, b as u8, a as u8))
}
