//! Processor dispatch: routes a decoded message to the callback registered
//! for its id, the layer just above [`crate::codec::message::MessageDeserializer`]/
//! [`crate::codec::message::MessageDecoder`] in a typical pipeline.
//!
//! # 设计背景（Why）
//! - 镜像 `examples/original_source/message/processor.go` 和
//!   `examples/original_source/handler/message_processor.go`：这是和
//!   [`crate::codec::registry::MessageRegistry`] 并列的第二张“按 id 查表”，但冲突
//!   策略刻意不同——注册表对重复 id 选择警告后覆盖（开发期热更新友好），而这里的
//!   `ProcessorMgr` 对重复 id 直接返回错误，和原始 Go 实现的
//!   `RegisterProcessorByID` 一致：一个 id 同时绑两个业务回调通常意味着装配代码
//!   写错了，不该被静默覆盖。
//! - Go 原始的 `DefaultMessageHandler.OnRead` 在调用完处理器之后，无条件把同一个
//!   `msg` 再 `ctx.FireRead(msg)` 一次——这依赖 Go 的接口值是引用语义，处理器拿到的
//!   和继续向下传播的是同一份数据。Rust 里 `Box<dyn Any + Send>` 在传给回调时已经
//!   被值消费，没有“调用完还留一份”这回事。这里选择让 `ProcessorHandler` 终结传播：
//!   分发到已注册处理器的消息到此为止，不再向下游 `fire_read`；只有找不到处理器
//!   （未知 id）时才把原始 `Tuple2` 消息继续传播下去，让后面的 handler（或最终的
//!   "unhandled message" 日志）有机会观察到它。这个决定记在 DESIGN.md 里。

use std::any::Any;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::codec::registry::{MsgId, SharedRegistry};
use crate::error::SluiceError;
use crate::pipeline::{Context, InboundHandler, PipelineMessage};
use crate::runtime::fault_barrier::run_guarded;

/// A registered business callback: receives the pipeline context (so it can
/// reply via `ctx.write`) and the decoded, type-erased message value.
pub type ProcessorFn = Arc<dyn Fn(&dyn Context, Box<dyn Any + Send>) + Send + Sync>;

/// The id-keyed callback table. Distinct from [`crate::codec::registry::MessageRegistry`]:
/// that one maps an id to a *type*, this one maps an id to a *callback*.
///
/// # 契约说明（What）
/// - [`Self::register_by_id`] fails with [`SluiceError::UnknownMessage`]-shaped
///   intent if `id` is already bound — see the module-level note on why this
///   diverges from `MessageRegistry`'s overwrite-and-warn policy. Use
///   [`crate::codec::registry::MessageRegistry::register`] first and
///   [`Self::register`] to additionally bind a callback under that type's id.
#[derive(Default)]
pub struct ProcessorMgr {
    processors: DashMap<MsgId, ProcessorFn>,
}

impl ProcessorMgr {
    pub fn new() -> Self {
        ProcessorMgr {
            processors: DashMap::new(),
        }
    }

    /// Binds `callback` to the id that `registry` already has `sample`'s
    /// concrete type registered under, mirroring the original's
    /// `RegisterProcessor(msg, handlerFunc)` convenience entry point.
    pub fn register(
        &self,
        registry: &SharedRegistry,
        sample: &dyn Any,
        callback: ProcessorFn,
    ) -> Result<(), SluiceError> {
        let meta = registry.meta_by_msg(sample)?;
        self.register_by_id(meta.id, callback)
    }

    /// Binds `callback` directly to `id`. Fails rather than overwriting if a
    /// callback is already bound to `id`.
    pub fn register_by_id(&self, id: impl Into<MsgId>, callback: ProcessorFn) -> Result<(), SluiceError> {
        let id = id.into();
        match self.processors.entry(id.clone()) {
            Entry::Occupied(_) => Err(SluiceError::decode(format!(
                "processor already registered for message id {id}"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(callback);
                Ok(())
            }
        }
    }

    /// Looks up and invokes the processor bound to `id`, wrapped in
    /// [`run_guarded`] so a panicking business callback takes down only this
    /// dispatch, not the read loop it runs on. Returns `msg` back unclaimed
    /// if no processor is bound to `id`, so the caller can still do something
    /// with it (e.g. re-propagate it downstream).
    pub fn dispatch(
        &self,
        ctx: &dyn Context,
        id: &MsgId,
        msg: Box<dyn Any + Send>,
    ) -> Option<Box<dyn Any + Send>> {
        let Some(callback) = self.processors.get(id).map(|entry| entry.value().clone()) else {
            return Some(msg);
        };
        let label = format!("processor:{id}");
        let msg = std::sync::Mutex::new(Some(msg));
        run_guarded(&label, || {
            let msg = msg.lock().unwrap().take().expect("dispatch closure runs exactly once");
            callback(ctx, msg);
        });
        None
    }
}

pub type SharedProcessorMgr = Arc<ProcessorMgr>;

/// Bridges [`crate::codec::message::MessageDeserializer`]/[`crate::codec::message::MessageDecoder`]
/// output to a [`ProcessorMgr`]. Install as the last inbound handler in a
/// typical pipeline.
///
/// # 契约说明（What）
/// - Expects [`PipelineMessage::Tuple2`] of `(IdValue, Typed)`, the shape both
///   deserializer handlers produce.
/// - On a known id, dispatches and stops propagation there.
/// - On an unknown id, fires [`SluiceError::UnknownMessage`] and re-propagates
///   the original message unchanged, so a fallback handler further down the
///   chain still gets a chance at it.
pub struct ProcessorHandler {
    mgr: SharedProcessorMgr,
}

impl ProcessorHandler {
    pub fn new(mgr: SharedProcessorMgr) -> Self {
        ProcessorHandler { mgr }
    }
}

impl InboundHandler for ProcessorHandler {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let PipelineMessage::Tuple2(id_msg, value_msg) = msg else {
            ctx.fire_error(SluiceError::unsupported(
                "ProcessorHandler expected Tuple2(IdValue, Typed)",
            ));
            return;
        };
        let PipelineMessage::IdValue(id) = *id_msg else {
            ctx.fire_error(SluiceError::unsupported(
                "ProcessorHandler expected Tuple2 first element to be IdValue",
            ));
            return;
        };
        let PipelineMessage::Typed(value) = *value_msg else {
            ctx.fire_error(SluiceError::unsupported(
                "ProcessorHandler expected Tuple2 second element to be Typed",
            ));
            return;
        };

        if let Some(value) = self.mgr.dispatch(ctx, &id, value) {
            warn!(id = %id, "no processor registered for message id");
            ctx.fire_error(SluiceError::UnknownMessage { id: id.to_string() });
            ctx.fire_read(PipelineMessage::Tuple2(
                Box::new(PipelineMessage::IdValue(id)),
                Box::new(PipelineMessage::Typed(value)),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::registry::MessageRegistry;
    use crate::pipeline::test_support::RecordingContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Ping;

    #[test]
    fn register_by_id_rejects_duplicate_ids() {
        let mgr = ProcessorMgr::new();
        mgr.register_by_id(1u64, Arc::new(|_ctx, _msg| {})).unwrap();
        assert!(mgr.register_by_id(1u64, Arc::new(|_ctx, _msg| {})).is_err());
    }

    #[test]
    fn register_resolves_id_via_the_message_registry() {
        let registry: SharedRegistry = Arc::new(MessageRegistry::new());
        registry.register::<Ping>(7u64);
        let mgr = ProcessorMgr::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        mgr.register(&registry, &Ping, Arc::new(move |_ctx, _msg| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        let ctx = RecordingContext::new();
        let leftover = mgr.dispatch(&ctx, &MsgId::Numeric(7), Box::new(Ping));
        assert!(leftover.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_panicking_processor_does_not_escape_dispatch() {
        let mgr = ProcessorMgr::new();
        mgr.register_by_id(1u64, Arc::new(|_ctx, _msg| panic!("boom")))
            .unwrap();
        let ctx = RecordingContext::new();
        let leftover = mgr.dispatch(&ctx, &MsgId::Numeric(1), Box::new(Ping));
        assert!(leftover.is_none());
    }

    #[test]
    fn dispatch_returns_the_message_back_when_no_processor_is_bound() {
        let mgr = ProcessorMgr::new();
        let ctx = RecordingContext::new();
        let leftover = mgr.dispatch(&ctx, &MsgId::Numeric(42), Box::new(Ping));
        assert!(leftover.is_some());
    }

    #[test]
    fn handler_fires_error_for_unknown_id() {
        let mgr = Arc::new(ProcessorMgr::new());
        let handler = ProcessorHandler::new(mgr);
        let ctx = RecordingContext::new();
        handler.on_read(
            &ctx,
            PipelineMessage::Tuple2(
                Box::new(PipelineMessage::IdValue(MsgId::Numeric(99))),
                Box::new(PipelineMessage::Typed(Box::new(Ping))),
            ),
        );
        assert_eq!(ctx.errors_fired(), 1);
        assert_eq!(ctx.reads_fired(), 1);
    }

    #[test]
    fn handler_dispatches_known_id_without_repropagating() {
        let registry: SharedRegistry = Arc::new(MessageRegistry::new());
        registry.register::<Ping>(3u64);
        let mgr = Arc::new(ProcessorMgr::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        mgr.register(&registry, &Ping, Arc::new(move |_ctx, _msg| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        let handler = ProcessorHandler::new(mgr);
        let ctx = RecordingContext::new();
        handler.on_read(
            &ctx,
            PipelineMessage::Tuple2(
                Box::new(PipelineMessage::IdValue(MsgId::Numeric(3))),
                Box::new(PipelineMessage::Typed(Box::new(Ping))),
            ),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.reads_fired(), 0);
        assert_eq!(ctx.errors_fired(), 0);
    }
}
