use std::net::SocketAddr;
use std::sync::Arc;

use rand::Rng;

use crate::error::SluiceError;
use crate::pipeline::{Pipeline, PipelineMessage};
use crate::transport::RawConn;

use super::attr::AttrMap;

/// Capability set shared by every channel role (Acceptor, Connector, SubChannel).
///
/// # 设计背景（Why）
/// - `HeadContext.on_write` 需要统一地拿到“这条管线背后的原始连接”，`Context::write`/
///   `close` 需要统一地拿到“写入/关闭这条连接”的入口，而不必关心自己挂在哪一种角色上。
///
/// # 契约说明（What）
/// - `raw_conn()` 对没有自身连接的角色（如 Acceptor，它只用管线承载连接/断开的生命
///   周期事件）返回 `None`；`HeadContext` 在这种情况下记录日志而不是 panic。
pub trait ChannelHandle: Send + Sync {
    fn id(&self) -> &str;
    fn attr(&self) -> &AttrMap;
    /// This channel's pipeline. Returned by value — `Pipeline` is itself a thin,
    /// `Clone`able handle onto `Arc`-shared state — so that a channel built via
    /// `Arc::new_cyclic` (the pipeline's `channel` field closes the cycle back to
    /// the channel that owns it) never needs to hand out a reference borrowed
    /// from behind an upgraded `Weak`.
    fn pipeline(&self) -> Pipeline;
    /// The channel's current underlying connection, if it has one (Acceptors do
    /// not). Returned by value (an `Arc` clone) rather than by reference since a
    /// `SubChannel`'s connection is swapped out in place on reconnect; a borrowed
    /// reference could not outlive the lock guarding that swap.
    fn raw_conn(&self) -> Option<Arc<dyn RawConn>>;
    fn write(&self, msg: PipelineMessage) -> Result<(), SluiceError>;
    fn close(&self);
    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Generates a short, collision-resistant channel id. Pluggable: callers needing a
/// different id scheme can simply not use this and set their own.
pub fn generate_channel_id() -> String {
    let mut rng = rand::thread_rng();
    let raw: u64 = rng.r#gen();
    format!("ch-{raw:016x}")
}

/// The shared skeleton carried by every concrete channel: id, attribute map, and a
/// pipeline reference. Concrete roles (Acceptor/Connector/SubChannel) embed this and
/// add their own I/O behavior.
pub struct BaseChannel {
    id: String,
    attr: AttrMap,
}

impl BaseChannel {
    pub fn new() -> Self {
        BaseChannel {
            id: generate_channel_id(),
            attr: AttrMap::new(),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        BaseChannel {
            id: id.into(),
            attr: AttrMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attr(&self) -> &AttrMap {
        &self.attr
    }
}

impl Default for BaseChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared helper for channel configuration: outbound queue depth, initial read
/// buffer capacity, max connections, auto-reconnect policy. See SPEC_FULL.md §6.
#[derive(Debug, Clone)]
pub struct SubChannelConfig {
    pub write_buf_size: usize,
    pub read_buf_size: usize,
    pub auto_reconnect: bool,
    pub max_reconnect_times: u32,
}

impl Default for SubChannelConfig {
    fn default() -> Self {
        SubChannelConfig {
            write_buf_size: 128,
            read_buf_size: 4096,
            auto_reconnect: false,
            max_reconnect_times: 5,
        }
    }
}

pub(crate) fn pipeline_channel(channel: Arc<dyn ChannelHandle>) -> Pipeline {
    Pipeline::new(channel)
}
