//! The application message registry: maps a wire id to a Rust type and back.
//!
//! # 设计背景（Why）
//! - 原始实现用 `fmt.Sprintf("%v", id)` 把数值 id 和字符串 id 统一塞进同一个
//!   `map[string]*msgInfo`，这是个取巧的“万能键”。Rust 有 `enum` 可以原生表达
//!   “id 要么是数字要么是名字”这个封闭集合，不需要经过字符串格式化这道弯路。

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::codec::Codec;
use crate::error::SluiceError;

/// A message identifier: either a numeric wire id or a named one.
///
/// # 契约说明（What）
/// - `Hash`/`Eq` are derived so both variants can key a [`DashMap`] directly,
///   replacing the original's string-formatting indirection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MsgId {
    Numeric(u64),
    Named(String),
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MsgId::Numeric(n) => write!(f, "{n}"),
            MsgId::Named(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for MsgId {
    fn from(value: u64) -> Self {
        MsgId::Numeric(value)
    }
}

impl From<&str> for MsgId {
    fn from(value: &str) -> Self {
        MsgId::Named(value.to_string())
    }
}

/// Metadata describing one registered message type.
///
/// # 设计背景（Why）
/// - `create_instance` stands in for the original's reflection-based
///   `reflect.New(msgType)`: instead of runtime reflection, registration
///   captures a `T::default` factory closure once, at the call site that
///   already knows `T`. `codec` is a per-type override cell so a handful of
///   message types can use a different wire format than the pipeline's
///   default codec without a second registry.
#[derive(Clone)]
pub struct Meta {
    pub id: MsgId,
    pub type_name: &'static str,
    pub type_id: TypeId,
    factory: Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>,
    codec: Arc<Mutex<Option<Arc<dyn Codec>>>>,
}

impl Meta {
    /// Returns a fresh zero value of the registered type, boxed and type-erased.
    pub fn create_instance(&self) -> Box<dyn Any + Send> {
        (self.factory)()
    }

    /// Installs a per-type codec override, taking precedence over the
    /// pipeline's default codec for this message type only.
    pub fn set_codec(&self, codec: Arc<dyn Codec>) {
        *self.codec.lock() = Some(codec);
    }

    /// The per-type codec override, if one was set via [`Self::set_codec`].
    pub fn codec(&self) -> Option<Arc<dyn Codec>> {
        self.codec.lock().clone()
    }
}

/// The process-wide (or per-application) table mapping message ids to Rust types
/// and back, used by [`super::message::IdParserHandler`] and the higher-level
/// serializer/deserializer handlers.
///
/// # 契约说明（What）
/// - Re-registering an id that is already bound logs a warning and overwrites —
///   matching the original's "warn, don't fail" policy, since hot-reloadable
///   message sets are expected during development.
#[derive(Default)]
pub struct MessageRegistry {
    by_id: DashMap<MsgId, Meta>,
    by_type: DashMap<TypeId, Meta>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        MessageRegistry {
            by_id: DashMap::new(),
            by_type: DashMap::new(),
        }
    }

    /// Registers `T` under `id`, using `T::default()` as the "fresh zero value"
    /// factory that [`Meta::create_instance`] will call on every inbound decode.
    /// Safe to call again with a different id for the same type, or a different
    /// type for the same id; both cases log a warning and overwrite the previous
    /// binding (re-registration never fails).
    pub fn register<T: Any + Default + Send>(&self, id: impl Into<MsgId>) -> Meta {
        let id = id.into();
        let meta = Meta {
            id: id.clone(),
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
            factory: Arc::new(|| Box::new(T::default())),
            codec: Arc::new(Mutex::new(None)),
        };
        if self.by_id.contains_key(&id) {
            warn!(id = %meta.id, "re-registering message id, overwriting previous binding");
        }
        self.by_type.insert(meta.type_id, meta.clone());
        self.by_id.insert(id, meta.clone());
        meta
    }

    pub fn meta_by_id(&self, id: &MsgId) -> Result<Meta, SluiceError> {
        self.by_id
            .get(id)
            .map(|m| m.clone())
            .ok_or_else(|| SluiceError::UnknownMessage { id: id.to_string() })
    }

    pub fn meta_by_type<T: Any>(&self) -> Result<Meta, SluiceError> {
        self.meta_by_type_id(TypeId::of::<T>())
    }

    /// Reverse lookup by an already-boxed value's runtime type, as handlers
    /// operating on type-erased `dyn Any` messages must use.
    pub fn meta_by_msg(&self, msg: &dyn Any) -> Result<Meta, SluiceError> {
        self.meta_by_type_id(msg.type_id())
    }

    /// Same as [`Self::meta_by_type`] but for a [`TypeId`] recovered at runtime
    /// from a type-erased `dyn Any`, as handlers operating on boxed messages must.
    pub fn meta_by_type_id(&self, type_id: TypeId) -> Result<Meta, SluiceError> {
        self.by_type
            .get(&type_id)
            .map(|m| m.clone())
            .ok_or_else(|| SluiceError::UnknownMessage {
                id: format!("{type_id:?}"),
            })
    }
}

pub type SharedRegistry = Arc<MessageRegistry>;
