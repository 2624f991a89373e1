//! 值转换器
//!
//! 在脚本值与宿主 [`MValue`] 之间递归转换。两个方向都不会向调用方抛出错误：
//! 无法转换的输入降级为 None / Nil / undefined 并记录一条日志，
//! 脚本传入的任何值都不允许让宿主崩溃。

use super::embedding::{Embedding, WrapperState};
use super::function::{self, FunctionState};
use super::intrinsics::Intrinsics;
use super::shape::{classify, ObjectShape, Shape};
use crate::config::{BridgeConfig, FetchFailurePolicy};
use crate::mvalue::{MValue, MValueDict, MValueFunction};
use rquickjs::{Array, ArrayBuffer, BigInt, Context, Ctx, Object, Value};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error, warn};

/// 脚本与宿主之间的值转换器
///
/// 绑定到一个上下文。克隆代价很低，所有克隆共享函数表与作用域状态。
#[derive(Clone)]
pub struct Bridge {
    embedding: Rc<dyn Embedding>,
    config: Rc<BridgeConfig>,
    functions: Rc<FunctionState>,
}

impl Bridge {
    pub fn new(context: &Context, embedding: Rc<dyn Embedding>, config: BridgeConfig) -> Self {
        Self {
            embedding,
            config: Rc::new(config),
            functions: Rc::new(FunctionState::new(context)),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn embedding(&self) -> &dyn Embedding {
        self.embedding.as_ref()
    }

    pub(crate) fn function_state(&self) -> &Rc<FunctionState> {
        &self.functions
    }

    // ========================================================================
    // 脚本 → 宿主
    // ========================================================================

    /// 把脚本值转换为宿主值
    ///
    /// `allow_function` 为 `false` 时函数值被替换为 None 并记录错误。
    pub fn to_generic<'js>(&self, ctx: &Ctx<'js>, value: &Value<'js>, allow_function: bool) -> MValue {
        let intrinsics = match Intrinsics::get(ctx) {
            Ok(intrinsics) => intrinsics,
            Err(err) => {
                let _ = ctx.catch();
                error!(target: "bridge::convert", "Failed to load engine intrinsics: {}", err);
                return MValue::None;
            }
        };
        self.generic_value(ctx, &intrinsics, value, allow_function, 0)
    }

    /// 按顺序转换整个参数列表
    pub fn to_generic_args<'js>(
        &self,
        ctx: &Ctx<'js>,
        args: &[Value<'js>],
        allow_function: bool,
    ) -> Vec<MValue> {
        args.iter()
            .map(|arg| self.to_generic(ctx, arg, allow_function))
            .collect()
    }

    fn generic_value<'js>(
        &self,
        ctx: &Ctx<'js>,
        intrinsics: &Intrinsics<'js>,
        value: &Value<'js>,
        allow_function: bool,
        depth: usize,
    ) -> MValue {
        if depth > self.config.conversion.max_depth {
            error!(
                target: "bridge::convert",
                "Maximum conversion depth of {} exceeded, value replaced by None",
                self.config.conversion.max_depth
            );
            return MValue::None;
        }

        match classify(ctx, intrinsics, self.embedding.as_ref(), value) {
            Shape::Undefined => MValue::None,
            Shape::Null => MValue::Nil,
            Shape::Bool(b) => MValue::Bool(b),
            Shape::Int32(i) => MValue::Int(i as i64),
            Shape::Uint32(u) => MValue::UInt(u as u64),
            Shape::BigInt(big) => match big.to_i64() {
                Ok(v) => MValue::Int(v),
                Err(err) => {
                    let _ = ctx.catch();
                    warn!(target: "bridge::convert", "Failed to read BigInt: {}", err);
                    MValue::None
                }
            },
            Shape::Number(n) => MValue::Double(n),
            Shape::String(s) => match s.to_string() {
                Ok(s) => MValue::String(s),
                Err(err) => {
                    warn!(target: "bridge::convert", "Failed to read string: {}", err);
                    MValue::None
                }
            },
            Shape::Array(array) => {
                self.generic_list(ctx, intrinsics, &array, allow_function, depth)
            }
            Shape::Function(f) => {
                if !allow_function {
                    error!(target: "bridge::convert", "Cannot convert function to MValue");
                    return MValue::None;
                }
                match function::wrap_engine_function(self, ctx, f) {
                    Some(f) => MValue::Function(f),
                    None => {
                        error!(target: "bridge::convert", "Bridge is detached from its context, function replaced by None");
                        MValue::None
                    }
                }
            }
            // 拷贝而非视图：宿主持有的字节与引擎缓冲区的后续分离、扩容无关
            Shape::ArrayBuffer(buffer) => {
                MValue::ByteArray(buffer.as_bytes().map(<[u8]>::to_vec).unwrap_or_default())
            }
            Shape::SharedArrayBuffer(_) => {
                warn!(target: "bridge::convert", "SharedArrayBuffer cannot be converted to MValue");
                MValue::None
            }
            Shape::Map(map) => self.generic_map(ctx, intrinsics, &map, depth),
            Shape::Object(object, shape) => match shape {
                ObjectShape::Vector3(v) => MValue::Vector3(v),
                ObjectShape::Vector2(v) => MValue::Vector2(v),
                ObjectShape::Rgba(c) => MValue::Rgba(c),
                ObjectShape::BaseObject(WrapperState::Live(handle)) => MValue::BaseObject(handle),
                ObjectShape::BaseObject(WrapperState::Destroyed) => {
                    error!(target: "bridge::convert", "Base object is invalid, it was already destroyed");
                    MValue::Nil
                }
                ObjectShape::Plain => {
                    self.generic_dict(ctx, intrinsics, &object, allow_function, depth)
                }
            },
            Shape::Unsupported => MValue::None,
        }
    }

    fn generic_list<'js>(
        &self,
        ctx: &Ctx<'js>,
        intrinsics: &Intrinsics<'js>,
        array: &Array<'js>,
        allow_function: bool,
        depth: usize,
    ) -> MValue {
        let len = array.len();
        let mut list = Vec::with_capacity(len);
        for i in 0..len {
            match array.get::<Value>(i) {
                Ok(item) => {
                    list.push(self.generic_value(ctx, intrinsics, &item, allow_function, depth + 1))
                }
                Err(err) => list.extend(self.fetch_failed(ctx, format_args!("array element {}", i), &err)),
            }
        }
        MValue::List(list)
    }

    fn generic_map<'js>(
        &self,
        ctx: &Ctx<'js>,
        intrinsics: &Intrinsics<'js>,
        map: &Object<'js>,
        depth: usize,
    ) -> MValue {
        let entries = match intrinsics.map_entries(map) {
            Ok(entries) => entries,
            Err(err) => {
                let _ = ctx.catch();
                error!(target: "bridge::convert", "Failed to read map entries: {}", err);
                return MValue::None;
            }
        };

        let mut dict = MValueDict::new();
        for i in (0..entries.len()).step_by(2) {
            let key = entries.get::<Value>(i).and_then(|k| property_key(intrinsics, &k));
            let key = match key {
                Ok(key) => key,
                Err(err) => {
                    let _ = ctx.catch();
                    warn!(target: "bridge::convert", "Failed to convert map key {}: {}", i / 2, err);
                    continue;
                }
            };
            match entries.get::<Value>(i + 1) {
                // Map 的值永远不携带函数
                Ok(item) => {
                    let item = self.generic_value(ctx, intrinsics, &item, false, depth + 1);
                    dict.insert(key, item);
                }
                Err(err) => {
                    if let Some(placeholder) =
                        self.fetch_failed(ctx, format_args!("map value {:?}", key), &err)
                    {
                        dict.insert(key, placeholder);
                    }
                }
            }
        }
        MValue::Dict(dict)
    }

    fn generic_dict<'js>(
        &self,
        ctx: &Ctx<'js>,
        intrinsics: &Intrinsics<'js>,
        object: &Object<'js>,
        allow_function: bool,
        depth: usize,
    ) -> MValue {
        let mut dict = MValueDict::new();
        for key in object.keys::<String>() {
            let key = match key {
                Ok(key) => key,
                Err(err) => {
                    let _ = ctx.catch();
                    warn!(target: "bridge::convert", "Failed to read property name: {}", err);
                    continue;
                }
            };
            match object.get::<_, Value>(key.as_str()) {
                Ok(item) if item.is_undefined() => {}
                Ok(item) => {
                    let item = self.generic_value(ctx, intrinsics, &item, allow_function, depth + 1);
                    dict.insert(key, item);
                }
                Err(err) => {
                    if let Some(placeholder) =
                        self.fetch_failed(ctx, format_args!("property {:?}", key), &err)
                    {
                        dict.insert(key, placeholder);
                    }
                }
            }
        }
        MValue::Dict(dict)
    }

    /// 元素读取失败时按策略处理，返回需要放入的占位值
    fn fetch_failed(
        &self,
        ctx: &Ctx<'_>,
        location: fmt::Arguments<'_>,
        err: &rquickjs::Error,
    ) -> Option<MValue> {
        let _ = ctx.catch();
        match self.config.conversion.fetch_failure {
            FetchFailurePolicy::Skip => {
                warn!(target: "bridge::convert", "Failed to fetch {}, skipped: {}", location, err);
                None
            }
            FetchFailurePolicy::Placeholder => {
                warn!(target: "bridge::convert", "Failed to fetch {}, stored None: {}", location, err);
                Some(MValue::None)
            }
        }
    }

    // ========================================================================
    // 宿主 → 脚本
    // ========================================================================

    /// 把宿主值转换为脚本值
    ///
    /// 构造失败时返回 undefined 并记录错误。
    pub fn to_engine<'js>(&self, ctx: &Ctx<'js>, value: &MValue) -> Value<'js> {
        let result = Intrinsics::get(ctx)
            .and_then(|intrinsics| self.engine_value(ctx, &intrinsics, value, 0));
        match result {
            Ok(value) => value,
            Err(err) => {
                let _ = ctx.catch();
                error!(target: "bridge::convert", "Failed to convert {:?} to script value: {}", value.value_type(), err);
                Value::new_undefined(ctx.clone())
            }
        }
    }

    /// 按顺序转换整个参数列表
    pub fn to_engine_args<'js>(&self, ctx: &Ctx<'js>, args: &[MValue]) -> Vec<Value<'js>> {
        args.iter().map(|arg| self.to_engine(ctx, arg)).collect()
    }

    fn engine_value<'js>(
        &self,
        ctx: &Ctx<'js>,
        intrinsics: &Intrinsics<'js>,
        value: &MValue,
        depth: usize,
    ) -> rquickjs::Result<Value<'js>> {
        if depth > self.config.conversion.max_depth {
            error!(
                target: "bridge::convert",
                "Maximum conversion depth of {} exceeded, value replaced by undefined",
                self.config.conversion.max_depth
            );
            return Ok(Value::new_undefined(ctx.clone()));
        }

        let ctx_owned = ctx.clone();
        let value = match value {
            MValue::None => Value::new_undefined(ctx_owned),
            MValue::Nil => Value::new_null(ctx_owned),
            MValue::Bool(b) => Value::new_bool(ctx_owned, *b),
            MValue::Int(v) => match i32::try_from(*v) {
                Ok(i) => Value::new_int(ctx_owned, i),
                Err(_) => BigInt::from_i64(ctx_owned, *v)?.into_value(),
            },
            MValue::UInt(v) => match u32::try_from(*v) {
                Ok(u) => Value::new_number(ctx_owned, u as f64),
                Err(_) => BigInt::from_u64(ctx_owned, *v)?.into_value(),
            },
            MValue::Double(d) => Value::new_float(ctx_owned, *d),
            MValue::String(s) => rquickjs::String::from_str(ctx_owned, s)?.into_value(),
            MValue::List(items) => {
                let array = Array::new(ctx_owned)?;
                for (i, item) in items.iter().enumerate() {
                    array.set(i, self.engine_value(ctx, intrinsics, item, depth + 1)?)?;
                }
                array.into_value()
            }
            MValue::Dict(dict) => {
                let object = Object::new(ctx_owned)?;
                for (key, item) in dict {
                    object.set(key.as_str(), self.engine_value(ctx, intrinsics, item, depth + 1)?)?;
                }
                object.into_value()
            }
            MValue::BaseObject(handle) => match self.embedding.wrapper_of(ctx, handle)? {
                Some(wrapper) => wrapper.into_value(),
                None => Value::new_null(ctx_owned),
            },
            MValue::Function(f) => function::engine_function(self, ctx, intrinsics, f)?.into_value(),
            MValue::Vector3(v) => self.embedding.create_vector3(ctx, *v)?,
            MValue::Vector2(v) => self.embedding.create_vector2(ctx, *v)?,
            MValue::Rgba(c) => self.embedding.create_rgba(ctx, *c)?,
            MValue::ByteArray(bytes) => match self.try_from_raw_bytes(ctx, bytes) {
                Ok(value) => value,
                Err(err) => {
                    if super::raw::is_raw_value(bytes) {
                        let _ = ctx.catch();
                        debug!(target: "bridge::convert", "Raw value decode failed, passing bytes through: {}", err);
                    }
                    ArrayBuffer::new_copy(ctx_owned, bytes.as_slice())?.into_value()
                }
            },
        };
        Ok(value)
    }

    /// 从宿主侧函数表中移除该函数的跳板
    ///
    /// 返回表中是否存在该条目。
    pub fn forget_function(&self, ctx: &Ctx<'_>, function: &MValueFunction) -> bool {
        let removed = Intrinsics::get(ctx)
            .and_then(|intrinsics| self.forget_function_id(&intrinsics, function.id()));
        match removed {
            Ok(removed) => removed,
            Err(err) => {
                let _ = ctx.catch();
                warn!(target: "bridge::function", "Failed to drop function table entry: {}", err);
                false
            }
        }
    }
}

fn property_key<'js>(intrinsics: &Intrinsics<'js>, key: &Value<'js>) -> rquickjs::Result<String> {
    match key.as_string() {
        Some(s) => s.to_string(),
        None => intrinsics.stringify(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::mvalue::{BaseObjectHandle, BaseObjectType, Rgba};
    use crate::scripting::embedding::ResourceBindings;
    use glam::{Vec2, Vec3};
    use rquickjs::{Context, Runtime};

    fn with_bridge(config: BridgeConfig, f: impl FnOnce(&Bridge, &ResourceBindings, Ctx<'_>)) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let bindings = Rc::new(ResourceBindings::new());
        let bridge = Bridge::new(&context, bindings.clone(), config);
        context.with(|ctx| {
            ResourceBindings::install(&ctx).unwrap();
            f(&bridge, &bindings, ctx)
        });
    }

    fn generic(source: &str, allow_function: bool) -> MValue {
        let mut out = MValue::None;
        with_bridge(BridgeConfig::default(), |bridge, _, ctx| {
            let value: Value = ctx.eval(source).unwrap();
            out = bridge.to_generic(&ctx, &value, allow_function);
        });
        out
    }

    #[test]
    fn test_scalars_to_generic() {
        assert_eq!(generic("undefined", false), MValue::None);
        assert_eq!(generic("null", false), MValue::Nil);
        assert_eq!(generic("true", false), MValue::Bool(true));
        assert_eq!(generic("-7", false), MValue::Int(-7));
        assert_eq!(generic("3000000000", false), MValue::UInt(3_000_000_000));
        assert_eq!(generic("1.25", false), MValue::Double(1.25));
        assert_eq!(generic("-(2n ** 40n)", false), MValue::Int(-(1i64 << 40)));
        assert_eq!(generic("'héllo'", false), MValue::String("héllo".into()));
        assert_eq!(generic("Symbol('x')", false), MValue::None);
    }

    #[test]
    fn test_object_shapes_to_generic() {
        assert_eq!(
            generic("({ r: 255, g: 0, b: 12, a: 255 })", false),
            MValue::Rgba(Rgba::new(255, 0, 12, 255))
        );
        assert_eq!(
            generic("({ x: 1, y: 2, z: 3 })", false),
            MValue::Vector3(Vec3::new(1.0, 2.0, 3.0))
        );
        assert_eq!(generic("new Vector2(4, 5)", false), MValue::Vector2(Vec2::new(4.0, 5.0)));

        let mut expected = MValueDict::new();
        expected.insert("kept".into(), MValue::Int(1));
        assert_eq!(generic("({ kept: 1, dropped: undefined })", false), MValue::Dict(expected));
    }

    #[test]
    fn test_function_policy() {
        assert_eq!(
            generic("[1, () => 2, 3]", false),
            MValue::List(vec![MValue::Int(1), MValue::None, MValue::Int(3)])
        );
        match generic("[() => 2]", true) {
            MValue::List(items) => assert!(matches!(items[0], MValue::Function(_))),
            other => panic!("unexpected {:?}", other),
        }

        // Map 的值不携带函数，即使调用方允许
        match generic("new Map([['f', () => 1], [2, 'two']])", true) {
            MValue::Dict(dict) => {
                assert_eq!(dict.get("f"), Some(&MValue::None));
                assert_eq!(dict.get("2"), Some(&MValue::String("two".into())));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_array_buffer_is_copied() {
        with_bridge(BridgeConfig::default(), |bridge, _, ctx| {
            let value: Value = ctx
                .eval("globalThis.buf = new Uint8Array([1, 2, 3]).buffer; buf")
                .unwrap();
            let converted = bridge.to_generic(&ctx, &value, false);
            ctx.eval::<(), _>("new Uint8Array(buf)[0] = 99").unwrap();
            assert_eq!(converted, MValue::ByteArray(vec![1, 2, 3]));
        });
    }

    #[test]
    fn test_fetch_failure_policy() {
        let source = "(() => { const a = [1, 2, 3]; \
                      Object.defineProperty(a, 1, { get() { throw new Error('boom'); } }); \
                      return a; })()";
        assert_eq!(
            generic(source, false),
            MValue::List(vec![MValue::Int(1), MValue::Int(3)])
        );

        let mut config = BridgeConfig::default();
        config.conversion.fetch_failure = FetchFailurePolicy::Placeholder;
        with_bridge(config, |bridge, _, ctx| {
            let value: Value = ctx.eval(source).unwrap();
            assert_eq!(
                bridge.to_generic(&ctx, &value, false),
                MValue::List(vec![MValue::Int(1), MValue::None, MValue::Int(3)])
            );
        });
    }

    #[test]
    fn test_cycles_are_bounded() {
        let mut config = BridgeConfig::default();
        config.conversion.max_depth = 4;
        with_bridge(config, |bridge, _, ctx| {
            let value: Value = ctx.eval("(() => { const a = []; a.push(a); return a; })()").unwrap();
            let mut current = bridge.to_generic(&ctx, &value, false);
            let mut depth = 0;
            while let MValue::List(mut items) = current {
                current = items.pop().unwrap_or_default();
                depth += 1;
            }
            assert_eq!(current, MValue::None);
            assert_eq!(depth, 5);
        });
    }

    #[test]
    fn test_base_object_identity() {
        with_bridge(BridgeConfig::default(), |bridge, bindings, ctx| {
            let player = BaseObjectHandle::new(BaseObjectType::Player, 7);
            bindings.register(player.clone());

            let wrapper = bridge.to_engine(&ctx, &MValue::BaseObject(player.clone()));
            let again = bridge.to_engine(&ctx, &MValue::BaseObject(player.clone()));
            assert!(wrapper == again);

            match bridge.to_generic(&ctx, &wrapper, false) {
                MValue::BaseObject(handle) => assert!(Rc::ptr_eq(&handle, &player)),
                other => panic!("unexpected {:?}", other),
            }

            bindings.destroy(&ctx, &player).unwrap();
            assert_eq!(bridge.to_generic(&ctx, &wrapper, false), MValue::Nil);
            assert!(bridge.to_engine(&ctx, &MValue::BaseObject(player)).is_null());
        });
    }

    #[test]
    fn test_integer_narrowing() {
        with_bridge(BridgeConfig::default(), |bridge, _, ctx| {
            assert!(bridge.to_engine(&ctx, &MValue::Int(42)).is_int());
            assert!(bridge.to_engine(&ctx, &MValue::Int(1 << 40)).as_big_int().is_some());
            assert!(bridge.to_engine(&ctx, &MValue::UInt(u64::MAX)).as_big_int().is_some());

            let big = bridge.to_engine(&ctx, &MValue::UInt(3_000_000_000));
            assert_eq!(big.as_number(), Some(3_000_000_000.0));
        });
    }

    #[test]
    fn test_plain_bytes_pass_through() {
        with_bridge(BridgeConfig::default(), |bridge, _, ctx| {
            let value = bridge.to_engine(&ctx, &MValue::ByteArray(vec![9, 8, 7]));
            let buffer = value.as_object().and_then(|o| ArrayBuffer::from_object(o.clone())).unwrap();
            assert_eq!(buffer.as_bytes(), Some(&[9u8, 8, 7][..]));
        });
    }
}
