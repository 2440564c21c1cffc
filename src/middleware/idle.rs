//! Idle-connection detection: [`IdleStateHandler`] fires an [`IdleEvent`] once
//! reads and/or writes have been quiet past a configured timeout.
//!
//! # 设计背景（Why）
//! - 原始实现（`examples/original_source/handler/idle_state_handler.go`）用
//!   `time.AfterFunc` 递归重排定时器，每次醒来用挂钟纳秒差重新计算剩余延迟。这里
//!   用 `std::thread::sleep` 驱动等价的自重排循环——DESIGN.md 里关于这个模块的
//!   Open Question 已经定下来：改用 `std::time::Instant` 单调时钟取代挂钟纳秒差，
//!   避免跨秒边界导致剩余延迟计算错误。每条连接各自起一条读定时器线程和一条写
//!   定时器线程，`on_disconnect` 翻转 `stopped` 标志，定时器在下一次醒来时自行
//!   退出，不强行打断 sleep。
//! - handler 本身不持有 `ctx`（`&dyn Context` 只在一次调用期间有效），定时器线程
//!   改为持有从 `ctx.channel().pipeline()` 取到的 [`Pipeline`]（`Clone`，内部
//!   `Arc` 背书），到期时直接 `pipeline.fire_event(..)`，和原始实现里定时器闭包
//!   捕获 `ctx` 是等价的效果。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::pipeline::{Context, InboundHandler, OutboundHandler, Pipeline, PipelineMessage};

/// Which side(s) went idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleKind {
    Read,
    Write,
    All,
}

/// Fired via `Context::fire_event`/`Pipeline::fire_event` once a configured
/// idle timeout elapses.
#[derive(Debug, Clone, Copy)]
pub struct IdleEvent {
    pub kind: IdleKind,
}

struct Timers {
    read_timeout: Duration,
    write_timeout: Duration,
    need_all_timeout: bool,
    last_read: Mutex<Instant>,
    last_write: Mutex<Instant>,
    read_delay: Mutex<Duration>,
    write_delay: Mutex<Duration>,
    r_timeout: AtomicBool,
    w_timeout: AtomicBool,
    stopped: AtomicBool,
}

impl Timers {
    fn read_timer(self: Arc<Self>, pipeline: Pipeline) {
        loop {
            std::thread::sleep((*self.read_delay.lock()).max(Duration::from_millis(1)));
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let elapsed = self.last_read.lock().elapsed();
            let mut delay = self.read_delay.lock();
            *delay = delay.saturating_sub(elapsed);
            if !delay.is_zero() {
                continue;
            }
            self.r_timeout.store(true, Ordering::SeqCst);
            if !self.need_all_timeout {
                pipeline.fire_event(Box::new(IdleEvent { kind: IdleKind::Read }));
            } else if self.w_timeout.load(Ordering::SeqCst) {
                pipeline.fire_event(Box::new(IdleEvent { kind: IdleKind::All }));
                self.r_timeout.store(false, Ordering::SeqCst);
                self.w_timeout.store(false, Ordering::SeqCst);
            }
            *delay = self.read_timeout;
        }
    }

    fn write_timer(self: Arc<Self>, pipeline: Pipeline) {
        loop {
            std::thread::sleep((*self.write_delay.lock()).max(Duration::from_millis(1)));
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let elapsed = self.last_write.lock().elapsed();
            let mut delay = self.write_delay.lock();
            *delay = delay.saturating_sub(elapsed);
            if !delay.is_zero() {
                continue;
            }
            self.w_timeout.store(true, Ordering::SeqCst);
            if !self.need_all_timeout {
                pipeline.fire_event(Box::new(IdleEvent { kind: IdleKind::Write }));
            } else if self.r_timeout.load(Ordering::SeqCst) {
                pipeline.fire_event(Box::new(IdleEvent { kind: IdleKind::All }));
                self.r_timeout.store(false, Ordering::SeqCst);
                self.w_timeout.store(false, Ordering::SeqCst);
            }
            *delay = self.write_timeout;
        }
    }
}

/// Watches inbound reads and outbound writes on the connection it's installed
/// on, firing [`IdleEvent`] once `read_timeout`/`write_timeout` elapses with no
/// corresponding traffic. When `need_all_timeout` is set, only fires
/// [`IdleKind::All`] once *both* sides have gone idle, rather than firing
/// `Read`/`Write` independently.
pub struct IdleStateHandler {
    timers: Arc<Timers>,
}

impl IdleStateHandler {
    pub fn new(read_timeout: Duration, write_timeout: Duration, need_all_timeout: bool) -> Self {
        let now = Instant::now();
        IdleStateHandler {
            timers: Arc::new(Timers {
                read_timeout,
                write_timeout,
                need_all_timeout,
                last_read: Mutex::new(now),
                last_write: Mutex::new(now),
                read_delay: Mutex::new(read_timeout),
                write_delay: Mutex::new(write_timeout),
                r_timeout: AtomicBool::new(false),
                w_timeout: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }
}

impl InboundHandler for IdleStateHandler {
    fn on_connect(&self, ctx: &dyn Context) {
        let pipeline = ctx.channel().pipeline();
        let read_timers = self.timers.clone();
        let read_pipeline = pipeline.clone();
        std::thread::Builder::new()
            .name("sluice-idle-read".to_string())
            .spawn(move || read_timers.read_timer(read_pipeline))
            .expect("failed to spawn idle read timer thread");

        let write_timers = self.timers.clone();
        std::thread::Builder::new()
            .name("sluice-idle-write".to_string())
            .spawn(move || write_timers.write_timer(pipeline))
            .expect("failed to spawn idle write timer thread");

        ctx.fire_connect();
    }

    fn on_disconnect(&self, ctx: &dyn Context) {
        self.timers.stopped.store(true, Ordering::SeqCst);
        ctx.fire_disconnect();
    }

    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        *self.timers.last_read.lock() = Instant::now();
        *self.timers.read_delay.lock() = self.timers.read_timeout;
        self.timers.r_timeout.store(false, Ordering::SeqCst);
        ctx.fire_read(msg);
    }
}

impl OutboundHandler for IdleStateHandler {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        *self.timers.last_write.lock() = Instant::now();
        *self.timers.write_delay.lock() = self.timers.write_timeout;
        self.timers.w_timeout.store(false, Ordering::SeqCst);
        ctx.fire_write(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Mutex as StdMutex;

    use crate::channel::{ChannelHandle, SubChannel, SubChannelConfig};
    use crate::error::SluiceError;
    use crate::pipeline::{HandlerRegistration, UserEvent};
    use crate::transport::RawConn;

    /// Never returns from `read`, so the subchannel stays alive for the
    /// duration of the test without the read loop itself tripping a close.
    struct BlockingConn;
    impl RawConn for BlockingConn {
        fn read(&self, _buf: &mut crate::buffer::ReadOnlyBuffer) -> Result<(), SluiceError> {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(())
        }
        fn write(&self, _data: &[u8]) -> Result<(), SluiceError> {
            Ok(())
        }
        fn close(&self) -> Result<(), SluiceError> {
            Ok(())
        }
        fn local_addr(&self) -> Option<SocketAddr> {
            None
        }
        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }
    }

    struct RecordEvents(Arc<StdMutex<Vec<IdleKind>>>);
    impl InboundHandler for RecordEvents {
        fn on_event(&self, _ctx: &dyn Context, evt: UserEvent) {
            if let Ok(idle) = evt.downcast::<IdleEvent>() {
                self.0.lock().unwrap().push(idle.kind);
            }
        }
    }

    #[test]
    fn fires_read_idle_event_after_timeout_elapses() {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let ev = events.clone();
        let sc = SubChannel::new(
            Arc::new(BlockingConn),
            SubChannelConfig::default(),
            None,
            move |pipeline| {
                let idle = Arc::new(IdleStateHandler::new(
                    Duration::from_millis(30),
                    Duration::from_secs(3600),
                    false,
                ));
                pipeline.add_last(HandlerRegistration::duplex(
                    "idle",
                    idle.clone() as Arc<dyn InboundHandler>,
                    idle as Arc<dyn OutboundHandler>,
                ));
                pipeline.add_last(HandlerRegistration::inbound("record", Arc::new(RecordEvents(ev.clone()))));
            },
        );
        std::thread::sleep(Duration::from_millis(150));
        assert!(events.lock().unwrap().contains(&IdleKind::Read));
        sc.close();
    }

    #[test]
    fn need_all_timeout_waits_for_both_sides() {
        let events = Arc::new(StdMutex::new(Vec::new()));
        let ev = events.clone();
        let sc = SubChannel::new(
            Arc::new(BlockingConn),
            SubChannelConfig::default(),
            None,
            move |pipeline| {
                let idle = Arc::new(IdleStateHandler::new(
                    Duration::from_millis(30),
                    Duration::from_millis(30),
                    true,
                ));
                pipeline.add_last(HandlerRegistration::duplex(
                    "idle",
                    idle.clone() as Arc<dyn InboundHandler>,
                    idle as Arc<dyn OutboundHandler>,
                ));
                pipeline.add_last(HandlerRegistration::inbound("record", Arc::new(RecordEvents(ev.clone()))));
            },
        );
        std::thread::sleep(Duration::from_millis(200));
        assert!(events.lock().unwrap().contains(&IdleKind::All));
        assert!(!events.lock().unwrap().contains(&IdleKind::Read));
        sc.close();
    }
}
