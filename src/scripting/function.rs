//! 函数跳板
//!
//! 两个方向的函数值转换：
//!
//! - 宿主 [`MValueFunction`] → 脚本函数：创建一个跳板，脚本调用时把参数转换为
//!   宿主值、调用宿主函数、再把结果转换回来。开启函数表时，同一宿主函数
//!   在同一上下文中只创建一个跳板。跳板只持有宿主函数的弱引用，
//!   宿主释放函数后跳板返回 undefined，函数表条目随之清除。
//! - 脚本函数 → [`EngineFunction`]：宿主调用时恢复脚本函数并在其上下文中执行。
//!   再次转换回脚本时得到原来的脚本函数。
//!
//! 宿主函数经由跳板执行期间，桥接器记录当前已加锁的上下文，
//! 此时调用 [`EngineFunction`] 直接复用该上下文而不再次加锁。

use super::convert::Bridge;
use super::intrinsics::Intrinsics;
use crate::mvalue::{Callable, MValue, MValueFunction, WeakFunction};
use rquickjs::function::Rest;
use rquickjs::{qjs, Context, Ctx, Function, Persistent, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;
use tracing::{error, trace, warn};

/// 桥接器所有克隆共享的函数状态
#[derive(Default)]
pub(crate) struct FunctionState {
    /// 脚本函数包装所属的上下文，运行时关闭时清空
    context: RefCell<Option<Context>>,
    /// 当前持有运行时锁的上下文，按进入顺序
    active: RefCell<Vec<NonNull<qjs::JSContext>>>,
    /// 函数表中登记的宿主函数
    table: RefCell<HashMap<u64, WeakFunction>>,
}

impl FunctionState {
    pub(crate) fn new(context: &Context) -> Self {
        Self {
            context: RefCell::new(Some(context.clone())),
            ..Self::default()
        }
    }

    fn is_active(&self, ctx: NonNull<qjs::JSContext>) -> bool {
        self.active.borrow().contains(&ctx)
    }
}

/// 已进入的上下文作用域，析构时退出
pub(crate) struct ActiveScope {
    state: Rc<FunctionState>,
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        self.state.active.borrow_mut().pop();
    }
}

impl Bridge {
    /// 标记上下文已加锁，直到返回的作用域被析构
    pub(crate) fn enter_scope(&self, ctx: &Ctx<'_>) -> ActiveScope {
        let state = self.function_state().clone();
        state.active.borrow_mut().push(ctx.as_raw());
        ActiveScope { state }
    }

    /// 脚本函数包装所属的上下文
    pub fn context(&self) -> Option<Context> {
        self.function_state().context.borrow().clone()
    }

    /// 断开与上下文的关联
    ///
    /// 跳板闭包持有桥接器，桥接器持有上下文；运行时关闭前必须断开，
    /// 否则上下文永远不会被释放。
    pub(crate) fn detach(&self) {
        let context = self.function_state().context.borrow_mut().take();
        drop(context);
    }

    /// 函数表中登记的宿主函数数量
    pub fn registered_functions(&self) -> usize {
        self.function_state().table.borrow().len()
    }

    /// 从函数表移除指定 ID 的条目
    pub(crate) fn forget_function_id(
        &self,
        intrinsics: &Intrinsics<'_>,
        id: u64,
    ) -> rquickjs::Result<bool> {
        self.function_state().table.borrow_mut().remove(&id);
        intrinsics.table_delete(id)
    }

    /// 清除宿主已释放的函数表条目
    fn sweep_functions(&self, intrinsics: &Intrinsics<'_>) -> rquickjs::Result<()> {
        let dead: Vec<u64> = self
            .function_state()
            .table
            .borrow()
            .values()
            .filter(|f| !f.is_alive())
            .map(WeakFunction::id)
            .collect();
        for id in dead {
            self.forget_function_id(intrinsics, id)?;
            trace!(target: "bridge::function", "Released trampoline for dropped host function #{}", id);
        }
        Ok(())
    }
}

/// 宿主函数对应的脚本函数
pub(crate) fn engine_function<'js>(
    bridge: &Bridge,
    ctx: &Ctx<'js>,
    intrinsics: &Intrinsics<'js>,
    function: &MValueFunction,
) -> rquickjs::Result<Function<'js>> {
    if let Some(engine) = function.downcast_ref::<EngineFunction>() {
        if let Some(original) = engine.restore(ctx) {
            return Ok(original);
        }
    }

    if !bridge.config().conversion.function_table {
        return create_trampoline(bridge, ctx, function);
    }

    bridge.sweep_functions(intrinsics)?;
    if let Some(existing) = intrinsics.table_get(function.id())? {
        return Ok(existing);
    }
    let trampoline = create_trampoline(bridge, ctx, function)?;
    intrinsics.table_set(function.id(), &trampoline)?;
    bridge
        .function_state()
        .table
        .borrow_mut()
        .insert(function.id(), function.downgrade());
    trace!(target: "bridge::function", "Cached trampoline for host function #{}", function.id());
    Ok(trampoline)
}

fn create_trampoline<'js>(
    bridge: &Bridge,
    ctx: &Ctx<'js>,
    function: &MValueFunction,
) -> rquickjs::Result<Function<'js>> {
    let bridge = bridge.clone();
    let host = function.downgrade();
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> Value<'js> {
            let Some(function) = host.upgrade() else {
                warn!(target: "bridge::function", "Host function #{} was dropped, returning undefined", host.id());
                let removed = Intrinsics::get(&ctx)
                    .and_then(|intrinsics| bridge.forget_function_id(&intrinsics, host.id()));
                if removed.is_err() {
                    let _ = ctx.catch();
                }
                return Value::new_undefined(ctx);
            };
            let args = bridge.to_generic_args(&ctx, &args.0, true);
            let result = {
                let _scope = bridge.enter_scope(&ctx);
                function.call(&args)
            };
            bridge.to_engine(&ctx, &result)
        },
    )
}

/// 把脚本函数包装为宿主函数
///
/// 桥接器已与上下文断开时返回 `None`。
pub(crate) fn wrap_engine_function<'js>(
    bridge: &Bridge,
    ctx: &Ctx<'js>,
    function: Function<'js>,
) -> Option<MValueFunction> {
    let context = bridge.context()?;
    Some(MValueFunction::new(EngineFunction {
        function: Persistent::save(ctx, function),
        context,
        bridge: bridge.clone(),
    }))
}

/// 由宿主持有的脚本函数
///
/// 字段按声明顺序析构：持久引用必须在上下文之前释放。
pub struct EngineFunction {
    function: Persistent<Function<'static>>,
    context: Context,
    bridge: Bridge,
}

impl EngineFunction {
    fn restore<'js>(&self, ctx: &Ctx<'js>) -> Option<Function<'js>> {
        self.function.clone().restore(ctx).ok()
    }

    /// 在已经进入的上下文中调用
    ///
    /// 结果中的函数值被丢弃。[`Callable::call`] 在没有外层作用域时自行进入上下文。
    pub fn call_with<'js>(&self, ctx: &Ctx<'js>, args: &[MValue]) -> MValue {
        let Some(function) = self.restore(ctx) else {
            error!(target: "bridge::function", "Script function belongs to another runtime");
            return MValue::None;
        };
        let args = self.bridge.to_engine_args(ctx, args);
        match function.call::<_, Value>((Rest(args),)) {
            Ok(result) => self.bridge.to_generic(ctx, &result, false),
            Err(rquickjs::Error::Exception) => {
                error!(target: "bridge::function", "Script function threw: {}", exception_message(ctx));
                MValue::None
            }
            Err(err) => {
                error!(target: "bridge::function", "Script function call failed: {}", err);
                MValue::None
            }
        }
    }
}

impl Callable for EngineFunction {
    fn call(&self, args: &[MValue]) -> MValue {
        let raw = self.context.as_raw();
        if self.bridge.function_state().is_active(raw) {
            // SAFETY: 外层 `Context::with` 仍持有该上下文所在运行时的锁，
            // 新建的 Ctx 只在本次调用内使用
            let ctx = unsafe { Ctx::from_raw(raw) };
            return self.call_with(&ctx, args);
        }
        self.context.with(|ctx| {
            let _scope = self.bridge.enter_scope(&ctx);
            self.call_with(&ctx, args)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for EngineFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineFunction").finish_non_exhaustive()
    }
}

/// 取出并描述当前挂起的异常
pub(crate) fn exception_message(ctx: &Ctx<'_>) -> String {
    let exception = ctx.catch();
    if let Some(message) = exception
        .as_object()
        .and_then(|e| e.get::<_, Option<String>>("message").ok().flatten())
    {
        return message;
    }
    Intrinsics::get(ctx)
        .and_then(|intrinsics| intrinsics.stringify(&exception))
        .unwrap_or_else(|_| "unknown exception".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::scripting::embedding::ResourceBindings;
    use rquickjs::Runtime;
    use std::cell::Cell;
    use std::rc::Rc;

    fn setup(config: BridgeConfig) -> (Runtime, Context, Bridge) {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let bridge = Bridge::new(&context, Rc::new(ResourceBindings::new()), config);
        (runtime, context, bridge)
    }

    #[test]
    fn test_host_function_trampoline() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let add = MValueFunction::new(move |args: &[MValue]| {
            counter.set(counter.get() + 1);
            MValue::Int(args.iter().filter_map(MValue::as_int).sum())
        });

        context.with(|ctx| {
            let f = bridge.to_engine(&ctx, &MValue::Function(add.clone()));
            ctx.globals().set("add", f).unwrap();
            let sum: i32 = ctx.eval("add(2, 40)").unwrap();
            assert_eq!(sum, 42);

            // 函数表：同一宿主函数得到同一个跳板
            let again = bridge.to_engine(&ctx, &MValue::Function(add.clone()));
            let same: bool = ctx.globals().get::<_, Value>("add").unwrap() == again;
            assert!(same);
            assert_eq!(Intrinsics::get(&ctx).unwrap().table_size().unwrap(), 1);

            assert!(bridge.forget_function(&ctx, &add));
            assert!(!bridge.forget_function(&ctx, &add));
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_without_function_table() {
        let mut config = BridgeConfig::default();
        config.conversion.function_table = false;
        let (_runtime, context, bridge) = setup(config);
        let f = MValueFunction::new(|_: &[MValue]| MValue::Nil);

        context.with(|ctx| {
            let a = bridge.to_engine(&ctx, &MValue::Function(f.clone()));
            let b = bridge.to_engine(&ctx, &MValue::Function(f.clone()));
            assert!(a != b);
            assert_eq!(Intrinsics::get(&ctx).unwrap().table_size().unwrap(), 0);
        });
    }

    #[test]
    fn test_engine_function_roundtrip() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        let wrapped = context.with(|ctx| {
            let value: Value = ctx.eval("globalThis.twice = (x) => x * 2; twice").unwrap();
            bridge.to_generic(&ctx, &value, true)
        });

        let f = wrapped.as_function().unwrap().clone();
        assert!(f.downcast_ref::<EngineFunction>().is_some());
        assert_eq!(f.call(&[MValue::Int(21)]), MValue::Int(42));

        context.with(|ctx| {
            let back = bridge.to_engine(&ctx, &wrapped);
            let original: Value = ctx.globals().get("twice").unwrap();
            assert!(back == original);
        });
    }

    #[test]
    fn test_engine_function_exception_is_logged() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        let wrapped = context.with(|ctx| {
            let value: Value = ctx.eval("() => { throw new Error('nope'); }").unwrap();
            bridge.to_generic(&ctx, &value, true)
        });
        assert_eq!(wrapped.as_function().unwrap().call(&[]), MValue::None);
    }

    #[test]
    fn test_host_function_invokes_script_callback() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        let invoke = MValueFunction::new(|args: &[MValue]| match args.first() {
            Some(MValue::Function(callback)) => callback.call(&[MValue::Int(1)]),
            _ => MValue::None,
        });

        context.with(|ctx| {
            let f = bridge.to_engine(&ctx, &MValue::Function(invoke.clone()));
            ctx.globals().set("invoke", f).unwrap();
            let result: Value = ctx.eval("invoke((x) => x + 41)").unwrap();
            assert_eq!(bridge.to_generic(&ctx, &result, false), MValue::Int(42));

            // 嵌套：回调再次经由宿主函数调用另一个回调
            let nested: Value = ctx
                .eval("invoke((x) => invoke((y) => x + y + 40))")
                .unwrap();
            assert_eq!(bridge.to_generic(&ctx, &nested, false), MValue::Int(42));
        });
    }

    #[test]
    fn test_dropped_host_function_is_released() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let dropped = MValueFunction::new(move |_: &[MValue]| {
            counter.set(counter.get() + 1);
            MValue::Int(1)
        });
        let kept = MValueFunction::new(|_: &[MValue]| MValue::Int(2));

        context.with(|ctx| {
            let f = bridge.to_engine(&ctx, &MValue::Function(dropped.clone()));
            ctx.globals().set("dropped", f).unwrap();
            bridge.to_engine(&ctx, &MValue::Function(kept.clone()));
            assert_eq!(Intrinsics::get(&ctx).unwrap().table_size().unwrap(), 2);
            assert_eq!(ctx.eval::<i32, _>("dropped()").unwrap(), 1);
        });
        assert_eq!(bridge.registered_functions(), 2);
        drop(dropped);

        context.with(|ctx| {
            // 下一次转换时清除已释放的条目
            let other = MValueFunction::new(|_: &[MValue]| MValue::Nil);
            bridge.to_engine(&ctx, &MValue::Function(other.clone()));
            assert_eq!(Intrinsics::get(&ctx).unwrap().table_size().unwrap(), 2);

            let result: Value = ctx.eval("dropped()").unwrap();
            assert!(result.is_undefined());
        });
        assert_eq!(calls.get(), 1);
        assert_eq!(bridge.registered_functions(), 2);
    }

    #[test]
    fn test_dead_trampoline_removes_its_entry() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        let f = MValueFunction::new(|_: &[MValue]| MValue::Int(7));

        context.with(|ctx| {
            let engine = bridge.to_engine(&ctx, &MValue::Function(f.clone()));
            ctx.globals().set("seven", engine).unwrap();
        });
        drop(f);

        context.with(|ctx| {
            assert!(ctx.eval::<Value, _>("seven()").unwrap().is_undefined());
            assert_eq!(Intrinsics::get(&ctx).unwrap().table_size().unwrap(), 0);
        });
        assert_eq!(bridge.registered_functions(), 0);
    }

    #[test]
    fn test_detached_bridge_does_not_wrap_functions() {
        let (_runtime, context, bridge) = setup(BridgeConfig::default());
        bridge.detach();
        context.with(|ctx| {
            let value: Value = ctx.eval("() => 1").unwrap();
            assert_eq!(bridge.to_generic(&ctx, &value, true), MValue::None);
        });
    }
}
