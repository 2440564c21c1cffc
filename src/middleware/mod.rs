//! Reusable handlers that plug into a [`crate::pipeline::Pipeline`] without
//! depending on any particular framing/codec choice.
//!
//! # 设计背景（Why）
//! - 三个子模块分别对应 Go 原始实现里三个独立的 handler 文件：空闲检测
//!   （`idle_state_handler.go`）、字符串编解码（字符串方向的 `MessageToMessageCodec`
//!   示例)、RC4 对称加解密（`encryption_rc4.go`）。它们彼此没有依赖，按需挂载。

pub mod idle;
pub mod rc4;
pub mod string_codec;

pub use idle::{IdleEvent, IdleKind, IdleStateHandler};
pub use rc4::Rc4Cipher;
pub use string_codec::StringEncoder;
