//! 宿主侧通用值 (MValue)
//!
//! 脚本与宿主之间传递的一切数据都表示为 `MValue`。除了 `BaseObject`
//! 与 `Function` 两种句柄之外，每个 `MValue` 要么是标量，要么完全拥有其子节点，
//! 因此一棵 `MValue` 树内部不存在循环引用。

pub mod function;
pub mod object;

pub use function::{Callable, MValueFunction, WeakFunction};
pub use object::{BaseObjectHandle, BaseObjectRef, BaseObjectType};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

/// 字典类型（按键排序迭代）
pub type MValueDict = BTreeMap<String, MValue>;

/// RGBA 颜色
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable, Serialize, Deserialize,
)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// MValue 类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MValueType {
    None,
    Nil,
    Bool,
    Int,
    UInt,
    Double,
    String,
    List,
    Dict,
    BaseObject,
    Function,
    Vector3,
    Vector2,
    Rgba,
    ByteArray,
}

/// 宿主侧通用值
#[derive(Debug, Clone)]
pub enum MValue {
    None,
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    List(Vec<MValue>),
    Dict(MValueDict),
    BaseObject(BaseObjectRef),
    Function(MValueFunction),
    Vector3(Vec3),
    Vector2(Vec2),
    Rgba(Rgba),
    ByteArray(Vec<u8>),
}

impl Default for MValue {
    fn default() -> Self {
        MValue::None
    }
}

impl MValue {
    /// 获取类型标签
    pub fn value_type(&self) -> MValueType {
        match self {
            MValue::None => MValueType::None,
            MValue::Nil => MValueType::Nil,
            MValue::Bool(_) => MValueType::Bool,
            MValue::Int(_) => MValueType::Int,
            MValue::UInt(_) => MValueType::UInt,
            MValue::Double(_) => MValueType::Double,
            MValue::String(_) => MValueType::String,
            MValue::List(_) => MValueType::List,
            MValue::Dict(_) => MValueType::Dict,
            MValue::BaseObject(_) => MValueType::BaseObject,
            MValue::Function(_) => MValueType::Function,
            MValue::Vector3(_) => MValueType::Vector3,
            MValue::Vector2(_) => MValueType::Vector2,
            MValue::Rgba(_) => MValueType::Rgba,
            MValue::ByteArray(_) => MValueType::ByteArray,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, MValue::None)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, MValue::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            MValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            MValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MValue]> {
        match self {
            MValue::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&MValueDict> {
        match self {
            MValue::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_base_object(&self) -> Option<&BaseObjectRef> {
        match self {
            MValue::BaseObject(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&MValueFunction> {
        match self {
            MValue::Function(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MValue::ByteArray(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for MValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MValue::None, MValue::None) | (MValue::Nil, MValue::Nil) => true,
            (MValue::Bool(a), MValue::Bool(b)) => a == b,
            (MValue::Int(a), MValue::Int(b)) => a == b,
            (MValue::UInt(a), MValue::UInt(b)) => a == b,
            (MValue::Double(a), MValue::Double(b)) => a == b,
            (MValue::String(a), MValue::String(b)) => a == b,
            (MValue::List(a), MValue::List(b)) => a == b,
            (MValue::Dict(a), MValue::Dict(b)) => a == b,
            // 句柄按身份比较
            (MValue::BaseObject(a), MValue::BaseObject(b)) => Rc::ptr_eq(a, b),
            (MValue::Function(a), MValue::Function(b)) => a == b,
            (MValue::Vector3(a), MValue::Vector3(b)) => a == b,
            (MValue::Vector2(a), MValue::Vector2(b)) => a == b,
            (MValue::Rgba(a), MValue::Rgba(b)) => a == b,
            (MValue::ByteArray(a), MValue::ByteArray(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for MValue {
    fn from(v: bool) -> Self {
        MValue::Bool(v)
    }
}

impl From<i32> for MValue {
    fn from(v: i32) -> Self {
        MValue::Int(v as i64)
    }
}

impl From<i64> for MValue {
    fn from(v: i64) -> Self {
        MValue::Int(v)
    }
}

impl From<u32> for MValue {
    fn from(v: u32) -> Self {
        MValue::UInt(v as u64)
    }
}

impl From<u64> for MValue {
    fn from(v: u64) -> Self {
        MValue::UInt(v)
    }
}

impl From<f64> for MValue {
    fn from(v: f64) -> Self {
        MValue::Double(v)
    }
}

impl From<&str> for MValue {
    fn from(v: &str) -> Self {
        MValue::String(v.to_string())
    }
}

impl From<String> for MValue {
    fn from(v: String) -> Self {
        MValue::String(v)
    }
}

impl From<Vec<MValue>> for MValue {
    fn from(v: Vec<MValue>) -> Self {
        MValue::List(v)
    }
}

impl From<MValueDict> for MValue {
    fn from(v: MValueDict) -> Self {
        MValue::Dict(v)
    }
}

impl From<Vec3> for MValue {
    fn from(v: Vec3) -> Self {
        MValue::Vector3(v)
    }
}

impl From<Vec2> for MValue {
    fn from(v: Vec2) -> Self {
        MValue::Vector2(v)
    }
}

impl From<Rgba> for MValue {
    fn from(v: Rgba) -> Self {
        MValue::Rgba(v)
    }
}

impl From<BaseObjectRef> for MValue {
    fn from(v: BaseObjectRef) -> Self {
        MValue::BaseObject(v)
    }
}

impl From<MValueFunction> for MValue {
    fn from(v: MValueFunction) -> Self {
        MValue::Function(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type() {
        assert_eq!(MValue::None.value_type(), MValueType::None);
        assert_eq!(MValue::from(3i64).value_type(), MValueType::Int);
        assert_eq!(MValue::from(Rgba::new(1, 2, 3, 4)).value_type(), MValueType::Rgba);
    }

    #[test]
    fn test_handle_equality_is_identity() {
        let a = BaseObjectHandle::new(BaseObjectType::Player, 3);
        let b = BaseObjectHandle::new(BaseObjectType::Player, 3);
        assert_eq!(MValue::BaseObject(a.clone()), MValue::BaseObject(a.clone()));
        assert_ne!(MValue::BaseObject(a), MValue::BaseObject(b));
    }

    #[test]
    fn test_nested_equality() {
        let mut dict = MValueDict::new();
        dict.insert("a".into(), MValue::List(vec![1i64.into(), true.into(), "x".into()]));
        let value = MValue::Dict(dict.clone());
        assert_eq!(value, MValue::Dict(dict));
        assert_ne!(MValue::Int(1), MValue::UInt(1));
    }

    #[test]
    fn test_rgba_is_pod() {
        let color = Rgba::new(255, 0, 12, 255);
        assert_eq!(bytemuck::bytes_of(&color), &[255, 0, 12, 255]);
    }
}
