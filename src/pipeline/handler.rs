use std::sync::Arc;

use crate::channel::ChannelHandle;
use crate::error::SluiceError;

use super::message::{PipelineMessage, UserEvent};

/// The gateway a handler uses to interact with its pipeline and the rest of the chain.
///
/// # 设计背景（Why）
/// - Handler 本身不持有管线引用，所有穿越状态都由调用时传入的 context 携带——这样同一个
///   handler 实例可以安全地挂在多条管线上（理论上），也便于测试时构造一次性 context。
///
/// # 契约说明（What）
/// - `fire_*` 方法是该 handler 继续向前传播事件的唯一手段；不调用即终止传播。
pub trait Context: Send + Sync {
    /// This context's position name, as given at registration time.
    fn name(&self) -> &str;

    /// The channel this pipeline belongs to.
    fn channel(&self) -> &Arc<dyn ChannelHandle>;

    /// Continues inbound `connect` propagation from this context.
    fn fire_connect(&self);

    /// Continues inbound `disconnect` propagation from this context.
    fn fire_disconnect(&self);

    /// Continues inbound `read` propagation from this context.
    fn fire_read(&self, msg: PipelineMessage);

    /// Continues inbound `error` propagation from this context.
    fn fire_error(&self, err: SluiceError);

    /// Continues inbound custom-event propagation from this context.
    fn fire_event(&self, evt: UserEvent);

    /// Continues outbound `write` propagation from this context (toward the head).
    fn fire_write(&self, msg: PipelineMessage);

    /// Writes directly to the channel, bypassing the remaining outbound chain.
    fn write(&self, msg: PipelineMessage);

    /// Closes the channel, bypassing the remaining outbound chain.
    fn close(&self);
}

/// A handler that reacts to events originating from the network.
pub trait InboundHandler: Send + Sync {
    fn on_connect(&self, ctx: &dyn Context) {
        ctx.fire_connect();
    }

    fn on_disconnect(&self, ctx: &dyn Context) {
        ctx.fire_disconnect();
    }

    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.fire_read(msg);
    }

    fn on_event(&self, ctx: &dyn Context, evt: UserEvent) {
        ctx.fire_event(evt);
    }

    fn on_error(&self, ctx: &dyn Context, err: SluiceError) {
        ctx.fire_error(err);
    }
}

/// A handler that reacts to events originating from the application.
pub trait OutboundHandler: Send + Sync {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.fire_write(msg);
    }
}
