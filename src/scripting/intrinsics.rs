//! 引擎内建对象辅助函数
//!
//! QuickJS 的 Map/Set/Date/SharedArrayBuffer 没有直接的 Rust 侧类型，
//! 这里在上下文中安装一组隐藏的辅助函数（不可枚举的 `__bridgeIntrinsics`），
//! 每次顶层转换时取出一次并沿递归向下传递。

use rquickjs::{Array, Ctx, Function, Object, Value};

/// 全局对象上的隐藏属性名
pub const INTRINSICS_KEY: &str = "__bridgeIntrinsics";

const INTRINSICS_SCRIPT: &str = r#"
(function (global) {
    'use strict';
    const hasShared = typeof SharedArrayBuffer === 'function';
    const functionTable = new Map();
    const intrinsics = Object.freeze({
        isMap: (v) => v instanceof Map,
        isSet: (v) => v instanceof Set,
        isDate: (v) => v instanceof Date,
        isSharedArrayBuffer: (v) => hasShared && v instanceof SharedArrayBuffer,
        mapEntries: (m) => {
            const out = [];
            for (const [k, v] of m) {
                out.push(k, v);
            }
            return out;
        },
        setValues: (s) => Array.from(s),
        newMap: () => new Map(),
        mapSet: (m, k, v) => { m.set(k, v); },
        newSet: () => new Set(),
        setAdd: (s, v) => { s.add(v); },
        newDate: (ms) => new Date(ms),
        dateValue: (d) => d.getTime(),
        stringify: (v) => String(v),
        tableGet: (id) => functionTable.get(id),
        tableSet: (id, fn) => { functionTable.set(id, fn); },
        tableDelete: (id) => functionTable.delete(id),
        tableSize: () => functionTable.size,
    });
    Object.defineProperty(global, '__bridgeIntrinsics', { value: intrinsics });
})(globalThis);
"#;

/// 内建对象辅助函数集合
pub struct Intrinsics<'js> {
    is_map: Function<'js>,
    is_set: Function<'js>,
    is_date: Function<'js>,
    is_shared_array_buffer: Function<'js>,
    map_entries: Function<'js>,
    set_values: Function<'js>,
    new_map: Function<'js>,
    map_set: Function<'js>,
    new_set: Function<'js>,
    set_add: Function<'js>,
    new_date: Function<'js>,
    date_value: Function<'js>,
    stringify: Function<'js>,
    table_get: Function<'js>,
    table_set: Function<'js>,
    table_delete: Function<'js>,
    table_size: Function<'js>,
}

impl<'js> Intrinsics<'js> {
    /// 在上下文中安装辅助函数（已安装时不做任何事）
    pub fn install(ctx: &Ctx<'js>) -> rquickjs::Result<()> {
        let existing: Option<Object<'js>> = ctx.globals().get(INTRINSICS_KEY)?;
        if existing.is_none() {
            ctx.eval::<(), _>(INTRINSICS_SCRIPT)?;
        }
        Ok(())
    }

    /// 取出辅助函数，必要时先安装
    pub fn get(ctx: &Ctx<'js>) -> rquickjs::Result<Self> {
        Self::install(ctx)?;
        let obj: Object<'js> = ctx.globals().get(INTRINSICS_KEY)?;
        Ok(Self {
            is_map: obj.get("isMap")?,
            is_set: obj.get("isSet")?,
            is_date: obj.get("isDate")?,
            is_shared_array_buffer: obj.get("isSharedArrayBuffer")?,
            map_entries: obj.get("mapEntries")?,
            set_values: obj.get("setValues")?,
            new_map: obj.get("newMap")?,
            map_set: obj.get("mapSet")?,
            new_set: obj.get("newSet")?,
            set_add: obj.get("setAdd")?,
            new_date: obj.get("newDate")?,
            date_value: obj.get("dateValue")?,
            stringify: obj.get("stringify")?,
            table_get: obj.get("tableGet")?,
            table_set: obj.get("tableSet")?,
            table_delete: obj.get("tableDelete")?,
            table_size: obj.get("tableSize")?,
        })
    }

    pub fn is_map(&self, obj: &Object<'js>) -> bool {
        check(&self.is_map, obj)
    }

    pub fn is_set(&self, obj: &Object<'js>) -> bool {
        check(&self.is_set, obj)
    }

    pub fn is_date(&self, obj: &Object<'js>) -> bool {
        check(&self.is_date, obj)
    }

    pub fn is_shared_array_buffer(&self, obj: &Object<'js>) -> bool {
        check(&self.is_shared_array_buffer, obj)
    }

    /// Map 的扁平化条目 `[k0, v0, k1, v1, ...]`
    pub fn map_entries(&self, map: &Object<'js>) -> rquickjs::Result<Array<'js>> {
        self.map_entries.call((map.clone(),))
    }

    pub fn set_values(&self, set: &Object<'js>) -> rquickjs::Result<Array<'js>> {
        self.set_values.call((set.clone(),))
    }

    pub fn new_map(&self) -> rquickjs::Result<Object<'js>> {
        self.new_map.call(())
    }

    pub fn map_set(
        &self,
        map: &Object<'js>,
        key: Value<'js>,
        value: Value<'js>,
    ) -> rquickjs::Result<()> {
        self.map_set.call((map.clone(), key, value))
    }

    pub fn new_set(&self) -> rquickjs::Result<Object<'js>> {
        self.new_set.call(())
    }

    pub fn set_add(&self, set: &Object<'js>, value: Value<'js>) -> rquickjs::Result<()> {
        self.set_add.call((set.clone(), value))
    }

    pub fn new_date(&self, millis: f64) -> rquickjs::Result<Object<'js>> {
        self.new_date.call((millis,))
    }

    pub fn date_value(&self, date: &Object<'js>) -> rquickjs::Result<f64> {
        self.date_value.call((date.clone(),))
    }

    /// `String(value)` 强制转换
    pub fn stringify(&self, value: &Value<'js>) -> rquickjs::Result<String> {
        self.stringify.call((value.clone(),))
    }

    // ==================== 函数表 ====================

    pub fn table_get(&self, id: u64) -> rquickjs::Result<Option<Function<'js>>> {
        self.table_get.call((id as f64,))
    }

    pub fn table_set(&self, id: u64, function: &Function<'js>) -> rquickjs::Result<()> {
        self.table_set.call((id as f64, function.clone()))
    }

    pub fn table_delete(&self, id: u64) -> rquickjs::Result<bool> {
        self.table_delete.call((id as f64,))
    }

    pub fn table_size(&self) -> rquickjs::Result<usize> {
        self.table_size.call::<_, u32>(()).map(|n| n as usize)
    }
}

/// 类型判断；判断本身抛出时清除挂起的异常并视为不匹配
fn check<'js>(predicate: &Function<'js>, obj: &Object<'js>) -> bool {
    match predicate.call::<_, bool>((obj.clone(),)) {
        Ok(result) => result,
        Err(_) => {
            let _ = obj.ctx().catch();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    #[test]
    fn test_install_is_idempotent() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            Intrinsics::install(&ctx).unwrap();
            Intrinsics::install(&ctx).unwrap();
            let keys: Vec<String> = ctx
                .globals()
                .keys::<String>()
                .filter_map(Result::ok)
                .collect();
            assert!(!keys.iter().any(|k| k == INTRINSICS_KEY));
        });
    }

    #[test]
    fn test_builtin_detection() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let intrinsics = Intrinsics::get(&ctx).unwrap();
            let map: Object = ctx.eval("new Map([['a', 1]])").unwrap();
            let date: Object = ctx.eval("new Date(0)").unwrap();
            let plain: Object = ctx.eval("({})").unwrap();

            assert!(intrinsics.is_map(&map));
            assert!(!intrinsics.is_map(&plain));
            assert!(intrinsics.is_date(&date));
            assert_eq!(intrinsics.date_value(&date).unwrap(), 0.0);
            assert_eq!(intrinsics.map_entries(&map).unwrap().len(), 2);
        });
    }

    #[test]
    fn test_throwing_check_leaves_no_pending_exception() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let intrinsics = Intrinsics::get(&ctx).unwrap();
            let proxy: Object = ctx
                .eval("new Proxy({}, { getPrototypeOf() { throw new Error('trap'); } })")
                .unwrap();

            assert!(!intrinsics.is_map(&proxy));
            assert!(!intrinsics.is_date(&proxy));
            assert!(ctx.catch().is_null());

            let value: Value = ctx.eval("1 + 1").unwrap();
            assert_eq!(value.as_int(), Some(2));
        });
    }
}
