//! 嵌入方协作接口
//!
//! 值转换器与编解码器不直接了解宿主的实体模型，它们只通过
//! [`Embedding`] 进行三类操作：
//!
//! - 实体注册表查询（按 ID 解析、从包装对象取句柄）
//! - 句柄到脚本包装对象的解析（同一句柄始终得到同一个包装对象）
//! - Vector3 / Vector2 / RGBA 专用对象的构造
//!
//! [`ResourceBindings`] 是默认实现：它在上下文中安装 `Vector3`、`Vector2`、
//! `RGBA`、`BaseObject`、`Entity` 类，并维护句柄注册表。

use crate::mvalue::{BaseObjectRef, Rgba};
use glam::{Vec2, Vec3};
use rquickjs::{Ctx, Function, Object, Value};
use std::cell::RefCell;
use std::collections::HashMap;

/// 包装对象所指向的句柄状态
#[derive(Debug, Clone)]
pub enum WrapperState {
    /// 句柄仍然有效
    Live(BaseObjectRef),
    /// 宿主对象已被销毁
    Destroyed,
}

/// 嵌入方协作接口
pub trait Embedding {
    /// 按实体 ID 查找存活的实体句柄
    fn entity_by_id(&self, id: u16) -> Option<BaseObjectRef>;

    /// 若对象是 BaseObject 包装对象，返回其句柄状态
    fn wrapper_state<'js>(&self, ctx: &Ctx<'js>, object: &Object<'js>) -> Option<WrapperState>;

    /// 句柄对应的包装对象，无法解析时返回 `None`
    fn wrapper_of<'js>(
        &self,
        ctx: &Ctx<'js>,
        handle: &BaseObjectRef,
    ) -> rquickjs::Result<Option<Object<'js>>>;

    fn create_vector3<'js>(&self, ctx: &Ctx<'js>, value: Vec3) -> rquickjs::Result<Value<'js>>;

    fn create_vector2<'js>(&self, ctx: &Ctx<'js>, value: Vec2) -> rquickjs::Result<Value<'js>>;

    fn create_rgba<'js>(&self, ctx: &Ctx<'js>, value: Rgba) -> rquickjs::Result<Value<'js>>;
}

/// 全局对象上的隐藏属性名
pub const BINDINGS_KEY: &str = "__resourceBindings";

/// 包装对象上保存句柄键的隐藏属性名
pub const HANDLE_KEY_PROPERTY: &str = "__handleKey";

const BINDINGS_SCRIPT: &str = r#"
(function (global) {
    'use strict';
    class Vector3 {
        constructor(x = 0, y = 0, z = 0) {
            this.x = x;
            this.y = y;
            this.z = z;
        }
    }
    class Vector2 {
        constructor(x = 0, y = 0) {
            this.x = x;
            this.y = y;
        }
    }
    class RGBA {
        constructor(r = 0, g = 0, b = 0, a = 255) {
            this.r = r;
            this.g = g;
            this.b = b;
            this.a = a;
        }
    }
    class BaseObject {
        constructor(key, type) {
            Object.defineProperty(this, '__handleKey', { value: key, writable: true });
            Object.defineProperty(this, 'type', { value: type, enumerable: true });
        }
        get valid() {
            return this.__handleKey >= 0;
        }
    }
    class Entity extends BaseObject {
        constructor(key, type, id) {
            super(key, type);
            Object.defineProperty(this, 'id', { value: id, enumerable: true });
        }
    }
    const wrappers = new Map();
    const bindings = Object.freeze({
        vector3: (x, y, z) => new Vector3(x, y, z),
        vector2: (x, y) => new Vector2(x, y),
        rgba: (r, g, b, a) => new RGBA(r, g, b, a),
        wrap: (key, type, id, isEntity) => {
            let wrapper = wrappers.get(key);
            if (wrapper === undefined) {
                wrapper = isEntity ? new Entity(key, type, id) : new BaseObject(key, type);
                wrappers.set(key, wrapper);
            }
            return wrapper;
        },
        release: (key) => {
            const wrapper = wrappers.get(key);
            if (wrapper !== undefined) {
                wrapper.__handleKey = -1;
                wrappers.delete(key);
            }
        },
    });
    Object.defineProperty(global, '__resourceBindings', { value: bindings });
    global.Vector3 = Vector3;
    global.Vector2 = Vector2;
    global.RGBA = RGBA;
    global.BaseObject = BaseObject;
    global.Entity = Entity;
})(globalThis);
"#;

/// 默认嵌入实现：资源绑定与句柄注册表
#[derive(Default)]
pub struct ResourceBindings {
    handles: RefCell<HashMap<u32, BaseObjectRef>>,
}

impl ResourceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在上下文中安装脚本侧类（已安装时不做任何事）
    pub fn install(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
        let existing: Option<Object> = ctx.globals().get(BINDINGS_KEY)?;
        if existing.is_none() {
            ctx.eval::<(), _>(BINDINGS_SCRIPT)?;
        }
        Ok(())
    }

    /// 注册宿主对象句柄
    pub fn register(&self, handle: BaseObjectRef) {
        self.handles.borrow_mut().insert(handle.key(), handle);
    }

    /// 销毁宿主对象
    ///
    /// 句柄被标记为无效并移出注册表，已有的包装对象随之失效。
    pub fn destroy(&self, ctx: &Ctx<'_>, handle: &BaseObjectRef) -> rquickjs::Result<()> {
        handle.invalidate();
        self.handles.borrow_mut().remove(&handle.key());
        let release: Function = bindings(ctx)?.get("release")?;
        release.call::<_, ()>((handle.key(),))
    }

    /// 已注册的句柄数量
    pub fn len(&self) -> usize {
        self.handles.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.borrow().is_empty()
    }

    fn lookup(&self, key: u32) -> Option<BaseObjectRef> {
        self.handles.borrow().get(&key).cloned()
    }
}

fn bindings<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Object<'js>> {
    ResourceBindings::install(ctx)?;
    ctx.globals().get(BINDINGS_KEY)
}

fn factory<'js>(ctx: &Ctx<'js>, name: &str) -> rquickjs::Result<Function<'js>> {
    bindings(ctx)?.get(name)
}

impl Embedding for ResourceBindings {
    fn entity_by_id(&self, id: u16) -> Option<BaseObjectRef> {
        self.handles
            .borrow()
            .values()
            .find(|h| h.is_entity() && h.is_valid() && h.id() == id)
            .cloned()
    }

    fn wrapper_state<'js>(&self, _ctx: &Ctx<'js>, object: &Object<'js>) -> Option<WrapperState> {
        let key = object.get::<_, Value>(HANDLE_KEY_PROPERTY).ok()?.as_number()?;
        if key < 0.0 {
            return Some(WrapperState::Destroyed);
        }
        match self.lookup(key as u32) {
            Some(handle) if handle.is_valid() => Some(WrapperState::Live(handle)),
            _ => Some(WrapperState::Destroyed),
        }
    }

    fn wrapper_of<'js>(
        &self,
        ctx: &Ctx<'js>,
        handle: &BaseObjectRef,
    ) -> rquickjs::Result<Option<Object<'js>>> {
        if !handle.is_valid() || self.lookup(handle.key()).is_none() {
            return Ok(None);
        }
        let wrap = factory(ctx, "wrap")?;
        let wrapper: Object = wrap.call((
            handle.key(),
            handle.kind().name(),
            handle.id(),
            handle.is_entity(),
        ))?;
        Ok(Some(wrapper))
    }

    fn create_vector3<'js>(&self, ctx: &Ctx<'js>, value: Vec3) -> rquickjs::Result<Value<'js>> {
        factory(ctx, "vector3")?.call((value.x as f64, value.y as f64, value.z as f64))
    }

    fn create_vector2<'js>(&self, ctx: &Ctx<'js>, value: Vec2) -> rquickjs::Result<Value<'js>> {
        factory(ctx, "vector2")?.call((value.x as f64, value.y as f64))
    }

    fn create_rgba<'js>(&self, ctx: &Ctx<'js>, value: Rgba) -> rquickjs::Result<Value<'js>> {
        factory(ctx, "rgba")?.call((value.r, value.g, value.b, value.a))
    }
}
