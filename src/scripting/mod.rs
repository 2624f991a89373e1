//! 脚本运行时与值桥接
//!
//! - [`ScriptingRuntime`]: QuickJS 运行时 + 上下文 + 资源绑定
//! - [`Bridge`]: 脚本值与 [`MValue`] 之间的转换、原始值编解码
//! - [`Embedding`]: 宿主实体模型的协作接口，默认实现为 [`ResourceBindings`]

pub mod convert;
pub mod embedding;
pub mod function;
pub mod intrinsics;
pub mod raw;
pub mod serializer;
pub mod shape;

#[cfg(test)]
mod property_tests;

pub use convert::Bridge;
pub use embedding::{Embedding, ResourceBindings, WrapperState};
pub use function::EngineFunction;
pub use raw::{is_raw_value, RawValueType, RAW_MAGIC};
pub use serializer::{LogDelegate, SerializerDelegate, ValueDeserializer, ValueSerializer};
pub use shape::{classify, classify_number, NumberKind, ObjectShape, Shape};

use crate::config::BridgeConfig;
use crate::core::error::{ScriptError, ScriptResult};
use crate::mvalue::MValue;
use intrinsics::Intrinsics;
use rquickjs::{Context, Ctx, Function, Runtime, Value};
use std::rc::Rc;

/// 脚本运行时
///
/// 持有一个 QuickJS 运行时和一个完整上下文，上下文中已安装资源绑定类
/// 与内建辅助函数。
pub struct ScriptingRuntime {
    bridge: Bridge,
    bindings: Rc<ResourceBindings>,
    context: Context,
    runtime: Runtime,
}

impl ScriptingRuntime {
    /// 使用默认配置创建
    pub fn new() -> ScriptResult<Self> {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|e| ScriptError::Runtime(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| ScriptError::Runtime(e.to_string()))?;

        context
            .with(|ctx| {
                ResourceBindings::install(&ctx)?;
                Intrinsics::install(&ctx)
            })
            .map_err(|e| ScriptError::InvalidBinding(e.to_string()))?;

        let bindings = Rc::new(ResourceBindings::new());
        let bridge = Bridge::new(&context, bindings.clone(), config);

        tracing::info!("Scripting runtime initialized");
        Ok(Self {
            bridge,
            bindings,
            context,
            runtime,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn bindings(&self) -> &ResourceBindings {
        &self.bindings
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// 进入上下文
    ///
    /// 作用域内可以直接调用宿主持有的 [`EngineFunction`]。
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        self.context.with(|ctx| {
            let _scope = self.bridge.enter_scope(&ctx);
            f(ctx)
        })
    }

    /// 执行脚本，丢弃结果
    pub fn run_script(&self, code: &str) -> ScriptResult<()> {
        self.with(|ctx| {
            ctx.eval::<(), _>(code)
                .map_err(|err| evaluation_error(&ctx, err))
        })
    }

    /// 执行脚本并把结果转换为宿主值
    pub fn eval_generic(&self, code: &str) -> ScriptResult<MValue> {
        self.with(|ctx| {
            let value: Value = ctx
                .eval(code)
                .map_err(|err| evaluation_error(&ctx, err))?;
            Ok(self.bridge.to_generic(&ctx, &value, true))
        })
    }

    /// 设置全局变量
    ///
    /// 宿主函数的生命周期仍由宿主管理，脚本侧只持有弱引用。
    pub fn set_global(&self, name: &str, value: &MValue) -> ScriptResult<()> {
        self.with(|ctx| {
            let value = self.bridge.to_engine(&ctx, value);
            ctx.globals()
                .set(name, value)
                .map_err(|err| evaluation_error(&ctx, err))
        })
    }

    /// 以宿主值调用全局函数
    pub fn call_global(&self, name: &str, args: &[MValue]) -> ScriptResult<MValue> {
        self.with(|ctx| {
            let function: Function = ctx
                .globals()
                .get(name)
                .map_err(|_| ScriptError::Evaluation(format!("{} is not a function", name)))?;
            let args = self.bridge.to_engine_args(&ctx, args);
            let result: Value = function
                .call((rquickjs::function::Rest(args),))
                .map_err(|err| evaluation_error(&ctx, err))?;
            Ok(self.bridge.to_generic(&ctx, &result, true))
        })
    }
}

impl Drop for ScriptingRuntime {
    fn drop(&mut self) {
        self.bridge.detach();
    }
}

fn evaluation_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> ScriptError {
    match err {
        rquickjs::Error::Exception => ScriptError::Evaluation(function::exception_message(ctx)),
        other => ScriptError::Evaluation(other.to_string()),
    }
}
