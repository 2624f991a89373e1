//! 宿主函数值
//!
//! `MValueFunction` 是不透明的可调用引用。它可能包装宿主闭包，
//! 也可能包装一个脚本函数（见 `scripting::function::EngineFunction`）。

use super::MValue;
use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FUNCTION_ID: AtomicU64 = AtomicU64::new(1);

/// 可调用的宿主对象
pub trait Callable: 'static {
    /// 以宿主值调用
    fn call(&self, args: &[MValue]) -> MValue;

    /// 用于向下转型到具体实现
    fn as_any(&self) -> &dyn Any;
}

impl<F> Callable for F
where
    F: Fn(&[MValue]) -> MValue + 'static,
{
    fn call(&self, args: &[MValue]) -> MValue {
        self(args)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 宿主函数引用
///
/// 克隆共享同一个可调用对象与同一个身份 ID。
#[derive(Clone)]
pub struct MValueFunction {
    id: u64,
    callable: Rc<dyn Callable>,
}

impl MValueFunction {
    pub fn new(callable: impl Callable) -> Self {
        Self {
            id: NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed),
            callable: Rc::new(callable),
        }
    }

    /// 身份 ID，在进程内唯一
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn call(&self, args: &[MValue]) -> MValue {
        self.callable.call(args)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.callable.as_any().downcast_ref::<T>()
    }

    /// 不延长可调用对象生命周期的引用
    pub fn downgrade(&self) -> WeakFunction {
        WeakFunction {
            id: self.id,
            callable: Rc::downgrade(&self.callable),
        }
    }
}

/// [`MValueFunction`] 的弱引用，保留身份 ID
#[derive(Clone)]
pub struct WeakFunction {
    id: u64,
    callable: Weak<dyn Callable>,
}

impl WeakFunction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn upgrade(&self) -> Option<MValueFunction> {
        self.callable.upgrade().map(|callable| MValueFunction {
            id: self.id,
            callable,
        })
    }

    pub fn is_alive(&self) -> bool {
        self.callable.strong_count() > 0
    }
}

impl PartialEq for MValueFunction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for MValueFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MValueFunction(#{})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_callable() {
        let add = MValueFunction::new(|args: &[MValue]| {
            let sum: i64 = args.iter().filter_map(MValue::as_int).sum();
            MValue::Int(sum)
        });
        assert_eq!(add.call(&[MValue::Int(2), MValue::Int(40)]), MValue::Int(42));
    }

    #[test]
    fn test_identity() {
        let f = MValueFunction::new(|_: &[MValue]| MValue::None);
        let g = MValueFunction::new(|_: &[MValue]| MValue::None);
        assert_eq!(f.clone(), f);
        assert_ne!(f, g);
    }

    #[test]
    fn test_weak_reference() {
        let f = MValueFunction::new(|_: &[MValue]| MValue::Bool(true));
        let weak = f.downgrade();
        assert_eq!(weak.id(), f.id());
        assert_eq!(weak.upgrade().unwrap(), f);
        assert_eq!(weak.upgrade().unwrap().call(&[]), MValue::Bool(true));

        drop(f);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
