//! `SubChannel`: the live per-connection endpoint running the read loop, the
//! write loop, and the reconnect state machine.
//!
//! # 设计背景（Why）
//! - `SubChannel` 的 pipeline 需要一个指回自身的 `Arc<dyn ChannelHandle>`
//!   （`HeadContext.on_write` 要通过它拿到 `raw_conn()`），但 `Pipeline::new` 要求
//!   这个 `Arc` 在构造时就已存在——这是一个先有鸡还是先有蛋的问题。这里用
//!   `Arc::new` 先构造好 `SubChannel` 本体（pipeline 字段留空），再用
//!   `sc.clone() as Arc<dyn ChannelHandle>` 建管线、跑初始化回调，最后把建好的
//!   管线塞进 `OnceLock`，整个过程只在 [`SubChannel::new`] 内部发生一次。

use std::net::SocketAddr;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::SluiceError;
use crate::pipeline::{shared_read_buffer, Pipeline, PipelineMessage};
use crate::transport::RawConn;
use crate::buffer::ReadOnlyBuffer;

use super::attr::AttrMap;
use super::base::{pipeline_channel, BaseChannel, ChannelHandle, SubChannelConfig};

/// A zero-argument re-dial closure, capturing whatever address/credentials it
/// needs internally. `None` disables reconnect even if
/// [`SubChannelConfig::auto_reconnect`] is set.
pub type Dialer = Arc<dyn Fn() -> Result<Arc<dyn RawConn>, SluiceError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectState {
    Idle,
    Reconnecting,
}

struct Loops {
    read: Mutex<Option<JoinHandle<()>>>,
    write: Mutex<Option<JoinHandle<()>>>,
}

/// One live connection: owns a [`RawConn`], a [`Pipeline`], and the read/write
/// loop threads driving them.
///
/// # 契约说明（What）
/// - `write` enqueues non-blockingly: [`SluiceError::WriteQueueFull`] if the
///   bounded queue is at capacity, [`SluiceError::ConnLost`] once closed.
/// - `close` is idempotent and fires `disconnect` through the pipeline exactly
///   once, guarded by `close_state`.
pub struct SubChannel {
    base: BaseChannel,
    pipeline: OnceLock<Pipeline>,
    conn: Mutex<Option<Arc<dyn RawConn>>>,
    dialer: Option<Dialer>,
    config: SubChannelConfig,
    write_tx: Mutex<Option<SyncSender<PipelineMessage>>>,
    reconnect_state: Mutex<ReconnectState>,
    close_state: Mutex<bool>,
    loops: Loops,
}

impl SubChannel {
    /// Builds and starts a `SubChannel` around an already-established `conn`.
    /// `init` is called with the (not-yet-event-firing) pipeline so the caller
    /// can assemble its handler chain before `connect` fires. Spawns the read
    /// and write loop threads and fires `connect` before returning.
    pub fn new(
        conn: Arc<dyn RawConn>,
        config: SubChannelConfig,
        dialer: Option<Dialer>,
        init: impl FnOnce(&Pipeline),
    ) -> Arc<Self> {
        let (tx, rx) = sync_channel(config.write_buf_size.max(1));
        let sc = Arc::new(SubChannel {
            base: BaseChannel::new(),
            pipeline: OnceLock::new(),
            conn: Mutex::new(Some(conn)),
            dialer,
            config,
            write_tx: Mutex::new(Some(tx)),
            reconnect_state: Mutex::new(ReconnectState::Idle),
            close_state: Mutex::new(false),
            loops: Loops {
                read: Mutex::new(None),
                write: Mutex::new(None),
            },
        });

        let handle: Arc<dyn ChannelHandle> = sc.clone();
        let pipeline = pipeline_channel(handle);
        init(&pipeline);
        sc.pipeline
            .set(pipeline)
            .unwrap_or_else(|_| unreachable!("pipeline set exactly once in SubChannel::new"));

        sc.pipeline().fire_connect();

        let reader = sc.clone();
        let read_handle = std::thread::Builder::new()
            .name(format!("sluice-subchannel-read-{}", sc.id()))
            .spawn(move || reader.read_loop())
            .expect("failed to spawn subchannel read loop thread");
        *sc.loops.read.lock() = Some(read_handle);

        let writer = sc.clone();
        let write_handle = std::thread::Builder::new()
            .name(format!("sluice-subchannel-write-{}", sc.id()))
            .spawn(move || writer.write_loop(rx))
            .expect("failed to spawn subchannel write loop thread");
        *sc.loops.write.lock() = Some(write_handle);

        sc
    }

    /// Liveness hook. The original `isAlive` check this mirrors is a stub that
    /// always returns `true`; kept as an overridable extension point rather
    /// than a real timer, since there is no further behavior to specify.
    pub fn is_alive(&self) -> bool {
        true
    }

    fn read_loop(self: Arc<Self>) {
        let shared = shared_read_buffer(ReadOnlyBuffer::new(self.config.read_buf_size));
        loop {
            if *self.close_state.lock() {
                return;
            }
            let conn = match self.conn.lock().clone() {
                Some(conn) => conn,
                None => return,
            };
            let read_result = {
                let mut locked = shared.lock();
                conn.read(&mut locked)
            };
            match read_result {
                Ok(()) => {
                    loop {
                        let before = shared.lock().len();
                        if before == 0 {
                            break;
                        }
                        self.pipeline()
                            .fire_read(PipelineMessage::ReadView(shared.clone()));
                        let after = shared.lock().len();
                        if after >= before {
                            break;
                        }
                    }
                }
                Err(err) => {
                    warn!(id = %self.id(), error = %err, "subchannel read failed");
                    if self.config.auto_reconnect && self.try_reconnect() {
                        continue;
                    }
                    break;
                }
            }
        }
        self.close();
    }

    fn write_loop(self: Arc<Self>, rx: Receiver<PipelineMessage>) {
        loop {
            match rx.recv() {
                Ok(msg) => {
                    while *self.reconnect_state.lock() == ReconnectState::Reconnecting {
                        if *self.close_state.lock() {
                            return;
                        }
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    self.pipeline().fire_write(msg);
                }
                Err(_) => break,
            }
        }
        self.close();
    }

    /// Attempts up to `max_reconnect_times` re-dials with `min(2^k, 120)`
    /// second backoff between attempts. Returns `true` iff a new connection
    /// was installed.
    fn try_reconnect(&self) -> bool {
        let Some(dialer) = self.dialer.clone() else {
            return false;
        };
        *self.reconnect_state.lock() = ReconnectState::Reconnecting;
        for attempt in 0..self.config.max_reconnect_times {
            if *self.close_state.lock() {
                *self.reconnect_state.lock() = ReconnectState::Idle;
                return false;
            }
            match dialer() {
                Ok(new_conn) => {
                    *self.conn.lock() = Some(new_conn);
                    *self.reconnect_state.lock() = ReconnectState::Idle;
                    debug!(id = %self.id(), attempt, "subchannel reconnected");
                    return true;
                }
                Err(err) => {
                    warn!(id = %self.id(), attempt, error = %err, "reconnect attempt failed");
                    let backoff = Duration::from_secs(2u64.saturating_pow(attempt).min(120));
                    std::thread::sleep(backoff);
                }
            }
        }
        *self.reconnect_state.lock() = ReconnectState::Idle;
        false
    }
}

impl ChannelHandle for SubChannel {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn attr(&self) -> &AttrMap {
        self.base.attr()
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline
            .get()
            .expect("SubChannel pipeline accessed before SubChannel::new finished initializing it")
            .clone()
    }

    fn raw_conn(&self) -> Option<Arc<dyn RawConn>> {
        self.conn.lock().clone()
    }

    fn write(&self, msg: PipelineMessage) -> Result<(), SluiceError> {
        let guard = self.write_tx.lock();
        match guard.as_ref() {
            Some(tx) => match tx.try_send(msg) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(SluiceError::WriteQueueFull),
                Err(TrySendError::Disconnected(_)) => Err(SluiceError::ConnLost),
            },
            None => Err(SluiceError::ConnLost),
        }
    }

    fn close(&self) {
        let mut closed = self.close_state.lock();
        if *closed {
            return;
        }
        *closed = true;
        self.write_tx.lock().take();
        if let Some(conn) = self.conn.lock().take() {
            if let Err(err) = conn.close() {
                warn!(id = %self.id(), error = %err, "raw_conn close failed");
            }
        }
        drop(closed);
        self.pipeline().fire_disconnect();
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.lock().as_ref().and_then(|c| c.local_addr())
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.lock().as_ref().and_then(|c| c.remote_addr())
    }
}

impl Drop for SubChannel {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.loops.read.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.loops.write.lock().take() {
            let _ = handle.join();
        }
    }
}
