//! The minimal transport capability the framework consumes.
//!
//! # 设计背景（Why）
//! - 具体传输驱动（TCP、WebSocket）明确排除在本 crate 范围之外：核心只依赖一组最小的
//!   字节 I/O 能力，真正的套接字实现由宿主应用或独立 crate 提供。
//!
//! # 契约说明（What）
//! - `read` 应当把底层传输的一次读取结果追加进缓冲的空闲区域并推进 `end`；对流式传输，
//!   一次读取对应“尽力而为”的可用字节；对 WebSocket 这类数据报传输，一次读取对应一条
//!   完整的二进制消息。

use std::net::SocketAddr;
use std::sync::Arc;

use crate::buffer::ReadOnlyBuffer;
use crate::error::SluiceError;

/// Transport-agnostic byte I/O capability backing a [`crate::channel::SubChannel`].
pub trait RawConn: Send + Sync {
    /// Appends one underlying transport read into `buf`'s free region.
    fn read(&self, buf: &mut ReadOnlyBuffer) -> Result<(), SluiceError>;

    /// Writes `data` to the peer.
    fn write(&self, data: &[u8]) -> Result<(), SluiceError>;

    /// Closes the underlying connection. Idempotent.
    fn close(&self) -> Result<(), SluiceError>;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// The minimal listening capability an [`crate::channel::Acceptor`] consumes.
///
/// Out of scope (§1): a concrete implementation binding an actual stream or
/// WebSocket listener is a transport driver, provided by the host application
/// or a companion crate. `accept()` is expected to block until either a new
/// connection is available (`Ok`) or the listener itself fails; the caller
/// distinguishes transient from permanent failures via [`SluiceError::TransportError`]
/// — the Acceptor's retry-with-backoff loop treats every `Err` as transient and
/// only gives up when `accept()` itself is dropped (no separate "permanent"
/// signal is threaded through the trait, since std's own listener types do not
/// expose that distinction either).
pub trait Listener: Send + Sync {
    /// Blocks until one new connection is accepted.
    fn accept(&self) -> Result<Arc<dyn RawConn>, SluiceError>;

    fn local_addr(&self) -> Option<SocketAddr>;
}
