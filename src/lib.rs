//! # MValue Bridge
//!
//! Value marshaling between an embedded JavaScript engine (QuickJS through
//! `rquickjs`) and the host's generic value type [`MValue`].
//!
//! ## Features
//!
//! - **Tagged Value Converter**: recursive conversion of script values to
//!   [`MValue`] and back, with explicit shape classification
//! - **Raw Byte Codec**: the `JSVal` tagged byte format for carrying a single
//!   script value (entity, vector, color or an arbitrary value graph) through
//!   an opaque byte channel
//! - **Function trampolines**: host functions callable from scripts and
//!   script functions callable from the host
//! - **Resource bindings**: `Vector3`, `Vector2`, `RGBA`, `BaseObject` and
//!   `Entity` classes backed by host handles
//!
//! ### Example
//!
//! ```ignore
//! use mvalue_bridge::{MValue, ScriptingRuntime};
//!
//! let runtime = ScriptingRuntime::new()?;
//! runtime.with(|ctx| {
//!     let value = runtime.bridge().to_engine(&ctx, &MValue::from("hello"));
//!     let bytes = runtime.bridge().to_raw_bytes(&ctx, &value);
//! });
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Errors, logging and helper macros
//! - [`config`]: Configuration system
//! - [`mvalue`]: Host-side values and handles
//! - [`scripting`]: Script runtime, converter and codec

/// Errors, logging initialisation and helper macros
#[macro_use]
pub mod core;
/// Configuration system
pub mod config;
/// Host-side generic values
pub mod mvalue;
/// Script runtime, value converter and raw byte codec
pub mod scripting;

pub use crate::config::{BridgeConfig, CodecConfig, ConversionConfig, FetchFailurePolicy};
pub use crate::core::{init_logging, BridgeError, BridgeResult, CodecError, CodecResult};
pub use crate::mvalue::{
    BaseObjectHandle, BaseObjectRef, BaseObjectType, Callable, MValue, MValueDict,
    MValueFunction, MValueType, Rgba, WeakFunction,
};
pub use crate::scripting::{
    Bridge, Embedding, EngineFunction, RawValueType, ResourceBindings, ScriptingRuntime,
    RAW_MAGIC,
};
