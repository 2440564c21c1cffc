//! `Connector`: dials a single remote endpoint and holds the resulting
//! [`SubChannel`], forwarding writes/closes to it.
//!
//! # 设计背景（Why）
//! - 镜像 `examples/original_source/core/connector_channel.go`：`Connector` 本身
//!   不跑读写循环，只是把 `Write`/`LocalAddr`/`RemoteAddr`/`Close` 转发给内部唯一的
//!   `SubChannel`。与 `Acceptor` 一样，实际的 connect 事件由 [`SubChannel::new`]
//!   在构造时自己触发。

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use crate::error::SluiceError;
use crate::pipeline::{Pipeline, PipelineMessage};
use crate::transport::RawConn;

use super::attr::AttrMap;
use super::base::{pipeline_channel, BaseChannel, ChannelHandle, SubChannelConfig};
use super::subchannel::{Dialer, SubChannel};

/// A single-`SubChannel` holder produced by a successful dial.
///
/// # 契约说明（What）
/// - `connect` dials via `dialer` once to produce the initial connection, then
///   wraps it in a [`SubChannel`] (which fires `connect` through its own
///   pipeline during construction) and stores it. Subsequent calls to
///   `write`/`close`/`local_addr`/`remote_addr` simply forward to that
///   `SubChannel`.
pub struct Connector {
    base: BaseChannel,
    pipeline: OnceLock<Pipeline>,
    sub_channel: OnceLock<Arc<SubChannel>>,
}

impl Connector {
    pub fn new() -> Arc<Self> {
        let connector = Arc::new(Connector {
            base: BaseChannel::new(),
            pipeline: OnceLock::new(),
            sub_channel: OnceLock::new(),
        });
        let handle: Arc<dyn ChannelHandle> = connector.clone();
        let pipeline = pipeline_channel(handle);
        connector
            .pipeline
            .set(pipeline)
            .unwrap_or_else(|_| unreachable!("pipeline set exactly once in Connector::new"));
        connector
    }

    fn pipeline_ref(&self) -> &Pipeline {
        self.pipeline
            .get()
            .expect("Connector pipeline accessed before Connector::new finished initializing it")
    }

    /// Dials via `dialer`, wraps the resulting connection in a [`SubChannel`]
    /// (auto-reconnecting against the same `dialer` if `config.auto_reconnect`),
    /// and fires `connect` through its pipeline. Returns the new `SubChannel`,
    /// or the dial error if the very first attempt fails.
    pub fn connect(
        self: &Arc<Self>,
        dialer: Dialer,
        config: SubChannelConfig,
        init: impl FnOnce(&Pipeline),
    ) -> Result<Arc<SubChannel>, SluiceError> {
        let conn = dialer()?;
        let sub = SubChannel::new(conn, config, Some(dialer), init);
        self.sub_channel
            .set(sub.clone())
            .unwrap_or_else(|_| panic!("Connector::connect called more than once"));
        Ok(sub)
    }

    pub fn sub_channel(&self) -> Option<Arc<SubChannel>> {
        self.sub_channel.get().cloned()
    }
}

impl ChannelHandle for Connector {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn attr(&self) -> &AttrMap {
        self.base.attr()
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline_ref().clone()
    }

    fn raw_conn(&self) -> Option<Arc<dyn RawConn>> {
        self.sub_channel.get().and_then(|sc| sc.raw_conn())
    }

    fn write(&self, msg: PipelineMessage) -> Result<(), SluiceError> {
        match self.sub_channel.get() {
            Some(sc) => sc.write(msg),
            None => Err(SluiceError::ConnLost),
        }
    }

    fn close(&self) {
        if let Some(sc) = self.sub_channel.get() {
            sc.close();
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.sub_channel.get().and_then(|sc| sc.local_addr())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.sub_channel.get().and_then(|sc| sc.remote_addr())
    }
}
