//! The handler pipeline: doubly-linked (conceptually) chain of contexts, inbound/
//! outbound event propagation, and executor affinity.
//!
//! # 模块架构（Why）
//! - 这是整个框架的引擎室：每一条连接独立持有一条管线，管线上挂着用户装配的
//!   handler。读写循环只认识 `fire_read`/`fire_write` 这两个入口，剩下的调度细节对
//!   它们透明。
//! - 实现拆成三个子模块：[`message`] 定义穿越管线的负载形状；[`handler`] 定义
//!   handler 与 context 的 trait 边界；[`chain`] 是真正的链路实现（arena + 下标，
//!   用 [`arc_swap::ArcSwap`] 支持热插拔）。

mod chain;
mod handler;
pub mod message;
#[cfg(test)]
pub mod test_support;

pub use chain::{HandlerRegistration, Pipeline};
pub use handler::{Context, InboundHandler, OutboundHandler};
pub use message::{shared_read_buffer, PipelineMessage, SharedReadBuffer, UserEvent};
