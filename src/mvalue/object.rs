//! 宿主对象句柄
//!
//! 脚本侧的 BaseObject 包装对象只持有句柄，不持有宿主对象本身。
//! 句柄由宿主创建并引用计数，销毁后仍可被持有，但 [`BaseObjectHandle::is_valid`]
//! 返回 `false`。

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_HANDLE_KEY: AtomicU32 = AtomicU32::new(1);

/// 宿主对象引用
pub type BaseObjectRef = Rc<BaseObjectHandle>;

/// 宿主对象类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseObjectType {
    Player,
    Vehicle,
    Ped,
    Object,
    Blip,
    Marker,
    Checkpoint,
    ColShape,
    WebView,
    Audio,
}

impl BaseObjectType {
    /// 是否为世界实体（拥有网络同步的 16 位 ID）
    pub fn is_entity(self) -> bool {
        matches!(self, Self::Player | Self::Vehicle | Self::Ped | Self::Object)
    }

    /// 脚本侧可见的类型名
    pub fn name(self) -> &'static str {
        match self {
            Self::Player => "Player",
            Self::Vehicle => "Vehicle",
            Self::Ped => "Ped",
            Self::Object => "Object",
            Self::Blip => "Blip",
            Self::Marker => "Marker",
            Self::Checkpoint => "Checkpoint",
            Self::ColShape => "ColShape",
            Self::WebView => "WebView",
            Self::Audio => "Audio",
        }
    }
}

/// 宿主对象句柄
pub struct BaseObjectHandle {
    key: u32,
    kind: BaseObjectType,
    id: u16,
    valid: Cell<bool>,
}

impl BaseObjectHandle {
    /// 创建新的宿主对象句柄
    ///
    /// `key` 在进程内唯一，`id` 是宿主分配的运行时 ID（实体同步用）。
    pub fn new(kind: BaseObjectType, id: u16) -> BaseObjectRef {
        Rc::new(Self {
            key: NEXT_HANDLE_KEY.fetch_add(1, Ordering::Relaxed),
            kind,
            id,
            valid: Cell::new(true),
        })
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn kind(&self) -> BaseObjectType {
        self.kind
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn is_entity(&self) -> bool {
        self.kind.is_entity()
    }

    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// 标记宿主对象已销毁
    pub fn invalidate(&self) {
        self.valid.set(false);
    }
}

impl fmt::Debug for BaseObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseObjectHandle")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("valid", &self.valid.get())
            .finish()
    }
}
