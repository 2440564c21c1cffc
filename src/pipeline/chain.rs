use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::channel::ChannelHandle;
use crate::error::SluiceError;
use crate::runtime::event_loop::EventLoop;

use super::handler::{Context, InboundHandler, OutboundHandler};
use super::message::{PipelineMessage, UserEvent};

const HEAD_INDEX: usize = 0;
pub(crate) const HEAD_NAME: &str = "HeadContext";
pub(crate) const TAIL_NAME: &str = "TailContext";

/// One node of the handler chain.
///
/// # 设计背景（Why）
/// - spec 的设计笔记要求用 arena + 下标替代裸的双向指针链表（Rust 里可变的相互引用
///   结构天然别扭）。这里的“arena”就是 [`Pipeline`] 内部持有的 `Vec<Arc<ContextEntry>>`，
///   通过 [`ArcSwap`] 整体替换实现插入时的写时复制：读路径永远拿到一份不可变快照，
///   不需要为遍历加锁。
pub(crate) struct ContextEntry {
    pub(crate) name: String,
    pub(crate) is_inbound: bool,
    pub(crate) is_outbound: bool,
    pub(crate) inbound: Option<Arc<dyn InboundHandler>>,
    pub(crate) outbound: Option<Arc<dyn OutboundHandler>>,
    pub(crate) executor: Option<Arc<EventLoop>>,
}

impl ContextEntry {
    fn head() -> Self {
        ContextEntry {
            name: HEAD_NAME.to_string(),
            is_inbound: true,
            is_outbound: true,
            inbound: None,
            outbound: None,
            executor: None,
        }
    }

    fn tail() -> Self {
        ContextEntry {
            name: TAIL_NAME.to_string(),
            is_inbound: true,
            is_outbound: false,
            inbound: None,
            outbound: None,
            executor: None,
        }
    }
}

enum InboundEvent {
    Connect,
    Disconnect,
    Read(PipelineMessage),
    Error(SluiceError),
    Event(UserEvent),
}

/// The doubly-linked (conceptually) handler chain attached to one channel.
///
/// # 设计背景（Why）
/// - 一条连接一个管线；管线在用户提供的 channel 初始化回调里一次性装配完毕，随后所有
///   入站/出站事件都沿这条链传播。装配之后仍允许热插拔（`add_before`/`add_after`），
///   借助 [`ArcSwap`] 做到插入不阻塞正在进行的遍历。
///
/// # 契约说明（What）
/// - head 与 tail 是永久哨兵，用户 handler 严格居于两者之间。
/// - 出站遍历永远不会真正到达 tail；入站遍历永远不会越过 tail。
#[derive(Clone)]
pub struct Pipeline {
    channel: Arc<dyn ChannelHandle>,
    chain: Arc<ArcSwap<Vec<Arc<ContextEntry>>>>,
    mutation: Arc<Mutex<()>>,
}

impl Pipeline {
    pub fn new(channel: Arc<dyn ChannelHandle>) -> Self {
        debug!("+--------------------ChannelHandler list------------------------+");
        let entries = vec![Arc::new(ContextEntry::head()), Arc::new(ContextEntry::tail())];
        Pipeline {
            channel,
            chain: Arc::new(ArcSwap::from_pointee(entries)),
            mutation: Arc::new(Mutex::new(())),
        }
    }

    pub fn channel(&self) -> &Arc<dyn ChannelHandle> {
        &self.channel
    }

    fn tail_index(snapshot: &[Arc<ContextEntry>]) -> usize {
        snapshot.len() - 1
    }

    fn find_next_inbound(snapshot: &[Arc<ContextEntry>], from: usize) -> usize {
        let mut i = from + 1;
        while !snapshot[i].is_inbound {
            i += 1;
        }
        i
    }

    fn find_prev_outbound(snapshot: &[Arc<ContextEntry>], from: usize) -> usize {
        let mut i = from - 1;
        while !snapshot[i].is_outbound {
            i -= 1;
        }
        i
    }

    fn insert_at(&self, index: usize, entry: ContextEntry) {
        let _guard = self.mutation.lock();
        let mut entries: Vec<Arc<ContextEntry>> = (**self.chain.load()).clone();
        debug!(
            name = %entry.name,
            is_inbound = entry.is_inbound,
            is_outbound = entry.is_outbound,
            "inserting handler into pipeline"
        );
        entries.insert(index, Arc::new(entry));
        self.chain.store(Arc::new(entries));
    }

    /// Inserts immediately after the permanent head sentinel.
    pub fn add_first(&self, entry: HandlerRegistration) {
        self.insert_at(HEAD_INDEX + 1, entry.into_entry());
    }

    /// Inserts immediately before the permanent tail sentinel.
    pub fn add_last(&self, entry: HandlerRegistration) {
        let snapshot = self.chain.load();
        let tail = Self::tail_index(&snapshot);
        drop(snapshot);
        self.insert_at(tail, entry.into_entry());
    }

    /// Searches from head forward for `name` and inserts before it.
    /// Failing the search logs and leaves the pipeline unchanged.
    pub fn add_before(&self, name: &str, entry: HandlerRegistration) {
        let snapshot = self.chain.load();
        match snapshot.iter().position(|e| e.name == name) {
            Some(idx) => {
                drop(snapshot);
                self.insert_at(idx, entry.into_entry());
            }
            None => warn!(target = %name, "add_before: named context not found, pipeline unchanged"),
        }
    }

    /// Searches from head forward for `name` and inserts after it.
    pub fn add_after(&self, name: &str, entry: HandlerRegistration) {
        let snapshot = self.chain.load();
        match snapshot.iter().position(|e| e.name == name) {
            Some(idx) => {
                drop(snapshot);
                self.insert_at(idx + 1, entry.into_entry());
            }
            None => warn!(target = %name, "add_after: named context not found, pipeline unchanged"),
        }
    }

    fn invoke_inbound(&self, target: usize, event: InboundEvent) {
        let snapshot = self.chain.load_full();
        let entry = snapshot[target].clone();
        let pipeline = self.clone();
        let run = move || {
            let ctx = ContextImpl {
                pipeline: pipeline.clone(),
                index: target,
                name: entry.name.clone(),
            };
            if entry.name == TAIL_NAME {
                // TailContext: all inbound handlers no-op, chain terminates here.
                return;
            }
            match (&entry.inbound, event) {
                (Some(handler), InboundEvent::Connect) => handler.on_connect(&ctx),
                (Some(handler), InboundEvent::Disconnect) => handler.on_disconnect(&ctx),
                (Some(handler), InboundEvent::Read(msg)) => handler.on_read(&ctx, msg),
                (Some(handler), InboundEvent::Error(err)) => handler.on_error(&ctx, err),
                (Some(handler), InboundEvent::Event(evt)) => handler.on_event(&ctx, evt),
                (None, InboundEvent::Connect) => ctx.fire_connect(),
                (None, InboundEvent::Disconnect) => ctx.fire_disconnect(),
                (None, InboundEvent::Read(msg)) => ctx.fire_read(msg),
                (None, InboundEvent::Error(err)) => ctx.fire_error(err),
                (None, InboundEvent::Event(evt)) => ctx.fire_event(evt),
            }
        };
        match &entry_executor(&snapshot, target) {
            Some(executor) => executor.execute(Box::new(run)),
            None => run(),
        }
    }

    fn invoke_outbound(&self, target: usize, msg: PipelineMessage) {
        let snapshot = self.chain.load_full();
        let entry = snapshot[target].clone();
        let pipeline = self.clone();
        let run = move || {
            if entry.name == HEAD_NAME {
                head_write(&pipeline, msg);
                return;
            }
            let ctx = ContextImpl {
                pipeline: pipeline.clone(),
                index: target,
                name: entry.name.clone(),
            };
            match &entry.outbound {
                Some(handler) => handler.on_write(&ctx, msg),
                None => ctx.fire_write(msg),
            }
        };
        match &entry_executor(&snapshot, target) {
            Some(executor) => executor.execute(Box::new(run)),
            None => run(),
        }
    }

    pub fn fire_connect(&self) {
        let snapshot = self.chain.load_full();
        let target = Self::find_next_inbound(&snapshot, HEAD_INDEX);
        drop(snapshot);
        self.invoke_inbound(target, InboundEvent::Connect);
    }

    pub fn fire_disconnect(&self) {
        let snapshot = self.chain.load_full();
        let target = Self::find_next_inbound(&snapshot, HEAD_INDEX);
        drop(snapshot);
        self.invoke_inbound(target, InboundEvent::Disconnect);
    }

    pub fn fire_read(&self, msg: PipelineMessage) {
        let snapshot = self.chain.load_full();
        let target = Self::find_next_inbound(&snapshot, HEAD_INDEX);
        drop(snapshot);
        self.invoke_inbound(target, InboundEvent::Read(msg));
    }

    pub fn fire_error(&self, err: SluiceError) {
        error!(code = err.code(), "pipeline fire_error");
        let snapshot = self.chain.load_full();
        let target = Self::find_next_inbound(&snapshot, HEAD_INDEX);
        drop(snapshot);
        self.invoke_inbound(target, InboundEvent::Error(err));
    }

    pub fn fire_event(&self, evt: UserEvent) {
        let snapshot = self.chain.load_full();
        let target = Self::find_next_inbound(&snapshot, HEAD_INDEX);
        drop(snapshot);
        self.invoke_inbound(target, InboundEvent::Event(evt));
    }

    pub fn fire_write(&self, msg: PipelineMessage) {
        let snapshot = self.chain.load_full();
        let tail = Self::tail_index(&snapshot);
        let target = Self::find_prev_outbound(&snapshot, tail);
        drop(snapshot);
        self.invoke_outbound(target, msg);
    }
}

fn entry_executor(snapshot: &[Arc<ContextEntry>], index: usize) -> Option<Arc<EventLoop>> {
    snapshot[index].executor.clone()
}

/// HeadContext's `on_write` contract: raw bytes or a write-only buffer go straight
/// to the RawConn; anything else is logged and dropped.
fn head_write(pipeline: &Pipeline, msg: PipelineMessage) {
    let Some(conn) = pipeline.channel.raw_conn() else {
        warn!("HeadContext.on_write: channel has no raw connection, dropping write");
        return;
    };
    match msg {
        PipelineMessage::Raw(bytes) => {
            if let Err(err) = conn.write(&bytes) {
                warn!(error = %err, "HeadContext on_write: raw_conn write failed");
            }
        }
        PipelineMessage::WriteView(buf) => {
            if let Err(err) = conn.write(buf.bytes()) {
                warn!(error = %err, "HeadContext on_write: raw_conn write failed");
            }
        }
        other => {
            error!(msg = ?other, "HeadContext.on_write: unsupported message type");
        }
    }
}

/// A handler plus its registration name and optional executor affinity, ready to
/// be inserted into a [`Pipeline`].
pub struct HandlerRegistration {
    name: String,
    inbound: Option<Arc<dyn InboundHandler>>,
    outbound: Option<Arc<dyn OutboundHandler>>,
    executor: Option<Arc<EventLoop>>,
}

impl HandlerRegistration {
    pub fn inbound(name: impl Into<String>, handler: Arc<dyn InboundHandler>) -> Self {
        HandlerRegistration {
            name: name.into(),
            inbound: Some(handler),
            outbound: None,
            executor: None,
        }
    }

    pub fn outbound(name: impl Into<String>, handler: Arc<dyn OutboundHandler>) -> Self {
        HandlerRegistration {
            name: name.into(),
            inbound: None,
            outbound: Some(handler),
            executor: None,
        }
    }

    pub fn duplex(
        name: impl Into<String>,
        inbound: Arc<dyn InboundHandler>,
        outbound: Arc<dyn OutboundHandler>,
    ) -> Self {
        HandlerRegistration {
            name: name.into(),
            inbound: Some(inbound),
            outbound: Some(outbound),
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<EventLoop>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn into_entry(self) -> ContextEntry {
        ContextEntry {
            name: self.name,
            is_inbound: self.inbound.is_some(),
            is_outbound: self.outbound.is_some(),
            inbound: self.inbound,
            outbound: self.outbound,
            executor: self.executor,
        }
    }
}

struct ContextImpl {
    pipeline: Pipeline,
    index: usize,
    name: String,
}

impl Context for ContextImpl {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel(&self) -> &Arc<dyn ChannelHandle> {
        self.pipeline.channel()
    }

    fn fire_connect(&self) {
        let snapshot = self.pipeline.chain.load_full();
        let target = Pipeline::find_next_inbound(&snapshot, self.index);
        drop(snapshot);
        self.pipeline.invoke_inbound(target, InboundEvent::Connect);
    }

    fn fire_disconnect(&self) {
        let snapshot = self.pipeline.chain.load_full();
        let target = Pipeline::find_next_inbound(&snapshot, self.index);
        drop(snapshot);
        self.pipeline
            .invoke_inbound(target, InboundEvent::Disconnect);
    }

    fn fire_read(&self, msg: PipelineMessage) {
        let snapshot = self.pipeline.chain.load_full();
        let target = Pipeline::find_next_inbound(&snapshot, self.index);
        drop(snapshot);
        self.pipeline.invoke_inbound(target, InboundEvent::Read(msg));
    }

    fn fire_error(&self, err: SluiceError) {
        let snapshot = self.pipeline.chain.load_full();
        let target = Pipeline::find_next_inbound(&snapshot, self.index);
        drop(snapshot);
        self.pipeline
            .invoke_inbound(target, InboundEvent::Error(err));
    }

    fn fire_event(&self, evt: UserEvent) {
        let snapshot = self.pipeline.chain.load_full();
        let target = Pipeline::find_next_inbound(&snapshot, self.index);
        drop(snapshot);
        self.pipeline
            .invoke_inbound(target, InboundEvent::Event(evt));
    }

    fn fire_write(&self, msg: PipelineMessage) {
        let snapshot = self.pipeline.chain.load_full();
        let target = Pipeline::find_prev_outbound(&snapshot, self.index);
        drop(snapshot);
        self.pipeline.invoke_outbound(target, msg);
    }

    fn write(&self, msg: PipelineMessage) {
        let _ = self.pipeline.channel().write(msg);
    }

    fn close(&self) {
        self.pipeline.channel().close();
    }
}
