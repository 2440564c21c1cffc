use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Concurrent key→value store with typed accessors, attached to every channel.
///
/// # 设计背景（Why）
/// - 管线里的 handler 经常需要在事件之间共享少量状态（比如认证结果、重连计数），
///   但彼此互不知晓对方的 Rust 类型；用字符串键而不是 `TypeId` 键，是因为 spec 把
///   `AttrMap` 描述为应用按名字寻址的普通 key→value 存储，而不是按 Rust 类型寻址。
///
/// # 契约说明（What）
/// - `set_if_absent` 是原子的：并发调用时只有一个调用方真正写入，返回值告知调用方
///   自己是否是赢家。
/// - 其余写操作均为“后写者胜出”。
#[derive(Default)]
pub struct AttrMap {
    inner: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl AttrMap {
    pub fn new() -> Self {
        AttrMap {
            inner: DashMap::new(),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.inner.insert(key.into(), Arc::new(value));
    }

    /// Atomically sets `key` to `value` only if absent. Returns `true` iff this
    /// call performed the insertion.
    pub fn set_if_absent(&self, key: impl Into<String>, value: impl Any + Send + Sync) -> bool {
        match self.inner.entry(key.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(value));
                true
            }
        }
    }

    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.inner
            .get(key)
            .and_then(|v| v.downcast_ref::<T>().cloned())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn clear(&self) {
        self.inner.clear();
    }
}
