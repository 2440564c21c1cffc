//! `Acceptor`: owns a listener, spawns a [`SubChannel`] per accepted connection,
//! and tracks the live set for broadcast/multicast.
//!
//! # 设计背景（Why）
//! - 原始实现（`examples/original_source/core/acceptor_channel.go`）里
//!   `Acceptor.FireConnect` 同时做三件事：跑用户初始化回调、把新连接登记进
//!   `subChannels`/`channels`、再驱动这条子连接自己管线上的 `FireConnect`。这里的
//!   [`SubChannel::new`] 已经在构造时自己完成"初始化 + fire connect"这一步（见
//!   `subchannel.rs` 顶部模块注释），所以 `Acceptor::handle_accepted` 只需要把
//!   "注册进活跃集合"这一半责任接过来，在子连接构造完成之后执行——净效果与原始实现
//!   等价，只是寄存器登记相对 `connect` 事件的先后顺序被轻微倒转（由已构造好的
//!   `SubChannel::new` 的契约决定），记于 `DESIGN.md`。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::error::SluiceError;
use crate::pipeline::{Pipeline, PipelineMessage};
use crate::transport::{Listener, RawConn};

use super::attr::AttrMap;
use super::base::{pipeline_channel, BaseChannel, ChannelHandle, SubChannelConfig};
use super::subchannel::SubChannel;

/// Acceptor-level configuration: the cap on simultaneously live [`SubChannel`]s
/// and the config template handed to each one spawned on accept.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    pub max_conn_num: usize,
    pub sub_channel: SubChannelConfig,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        AcceptorConfig {
            max_conn_num: usize::MAX,
            sub_channel: SubChannelConfig::default(),
        }
    }
}

/// Called once per accepted connection, before it begins firing events, to let
/// the host application assemble the new `SubChannel`'s handler chain.
pub type ChannelInitializer = Arc<dyn Fn(&Pipeline) + Send + Sync>;

/// Owns a [`Listener`], spawns a [`SubChannel`] per accepted connection, and
/// tracks the live set in an id-keyed map plus an insertion-ordered list for
/// broadcast.
///
/// # 契约说明（What）
/// - `accept()`'s retry loop sleeps `min(5ms·2^k, 1s)` between attempts on
///   listener error, resetting `k` on the next successful accept; it never
///   gives up on its own (see [`crate::transport::Listener`]'s doc for why a
///   permanent-vs-transient distinction isn't threaded through the trait).
/// - A connection accepted while already at `max_conn_num` live subchannels is
///   closed immediately; no `connect` event fires for it.
pub struct Acceptor {
    base: BaseChannel,
    pipeline: OnceLock<Pipeline>,
    listener: Arc<dyn Listener>,
    init: ChannelInitializer,
    config: AcceptorConfig,
    channels: DashMap<String, Arc<SubChannel>>,
    order: RwLock<Vec<Arc<SubChannel>>>,
    closed: AtomicBool,
    accept_loop: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    /// Builds an `Acceptor` around an already-bound `listener` and spawns the
    /// accept loop thread immediately.
    pub fn new(listener: Arc<dyn Listener>, config: AcceptorConfig, init: ChannelInitializer) -> Arc<Self> {
        let acceptor = Arc::new(Acceptor {
            base: BaseChannel::new(),
            pipeline: OnceLock::new(),
            listener,
            init,
            config,
            channels: DashMap::new(),
            order: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            accept_loop: parking_lot::Mutex::new(None),
        });

        let handle: Arc<dyn ChannelHandle> = acceptor.clone();
        let pipeline = pipeline_channel(handle);
        acceptor
            .pipeline
            .set(pipeline)
            .unwrap_or_else(|_| unreachable!("pipeline set exactly once in Acceptor::new"));

        let runner = acceptor.clone();
        let thread = std::thread::Builder::new()
            .name(format!("sluice-acceptor-{}", acceptor.id()))
            .spawn(move || runner.accept_loop())
            .expect("failed to spawn acceptor accept loop thread");
        *acceptor.accept_loop.lock() = Some(thread);

        acceptor
    }

    fn pipeline_ref(&self) -> &Pipeline {
        self.pipeline
            .get()
            .expect("Acceptor pipeline accessed before Acceptor::new finished initializing it")
    }

    fn accept_loop(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            match self.listener.accept() {
                Ok(conn) => {
                    attempt = 0;
                    self.handle_accepted(conn);
                }
                Err(err) => {
                    warn!(id = %self.id(), error = %err, "acceptor accept() failed, retrying with backoff");
                    self.pipeline_ref().fire_error(err);
                    if self.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let backoff_ms = 5u64.saturating_mul(1u64 << attempt.min(8));
                    std::thread::sleep(Duration::from_millis(backoff_ms).min(Duration::from_secs(1)));
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn handle_accepted(self: &Arc<Self>, conn: Arc<dyn RawConn>) {
        if self.channels.len() >= self.config.max_conn_num {
            warn!(
                id = %self.id(),
                max = self.config.max_conn_num,
                "acceptor at max_conn_num, rejecting new connection"
            );
            if let Err(err) = conn.close() {
                warn!(error = %err, "failed to close over-cap connection");
            }
            return;
        }

        let init = self.init.clone();
        let sub = SubChannel::new(conn, self.config.sub_channel.clone(), None, move |pipeline| {
            init(pipeline);
        });

        debug!(id = %self.id(), sub_id = %sub.id(), "acceptor registered new subchannel");
        self.channels.insert(sub.id().to_string(), sub.clone());
        self.order.write().push(sub);
    }

    /// Removes a subchannel from the live set, e.g. once it observes its own
    /// disconnect. Safe to call more than once.
    pub fn forget(&self, id: &str) {
        if self.channels.remove(id).is_some() {
            self.order.write().retain(|c| c.id() != id);
        }
    }

    /// The live subchannels, in accept order, at the moment of the call.
    pub fn sub_channels(&self) -> Vec<Arc<SubChannel>> {
        self.order.read().clone()
    }

    /// Sends a freshly built message to every live subchannel. `make_msg` is
    /// invoked once per channel rather than the message being shared, since
    /// [`PipelineMessage::Typed`] is a uniquely-owned `Box<dyn Any>` consumed by
    /// the outbound codec chain and cannot be broadcast by reference the way the
    /// original's `interface{}` payload could.
    ///
    /// Snapshots the subchannel list under a read lock and drops the lock before
    /// writing (SPEC_FULL.md §9 open question 3), so a slow or blocked write
    /// cannot stall concurrent pipeline mutation.
    pub fn broadcast(&self, mut make_msg: impl FnMut() -> PipelineMessage) {
        let snapshot = self.order.read().clone();
        debug!(id = %self.id(), count = snapshot.len(), "acceptor broadcast");
        for channel in snapshot {
            if let Err(err) = channel.write(make_msg()) {
                error!(id = %self.id(), sub_id = %channel.id(), error = %err, "Acceptor.broadcast failed");
            }
        }
    }

    /// Sends a freshly built message to exactly the subchannels named in `ids`.
    pub fn multicast(&self, ids: &[String], mut make_msg: impl FnMut() -> PipelineMessage) {
        for id in ids {
            if let Some(channel) = self.channels.get(id) {
                if let Err(err) = channel.write(make_msg()) {
                    error!(id = %self.id(), sub_id = %id, error = %err, "Acceptor.multicast failed");
                }
            }
        }
    }
}

impl ChannelHandle for Acceptor {
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
        None
    }

    fn write(&self, _msg: PipelineMessage) -> Result<(), SluiceError> {
        Err(SluiceError::unsupported(
            "Acceptor has no single connection to write to; use broadcast/multicast",
        ))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for channel in self.order.write().drain(..) {
            channel.close();
        }
        self.channels.clear();
        self.pipeline_ref().fire_disconnect();
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.accept_loop.lock().take() {
            let _ = handle.join();
        }
    }
}
