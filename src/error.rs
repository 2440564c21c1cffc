//! Error taxonomy shared across every layer of the pipeline.
//!
//! # 设计背景（Why）
//! - 每一种失败都有明确的传播策略（致命 / 非致命 / 触发重连），不能用一个笼统的
//!   `io::Error` 吞掉语义；调用方需要按错误种类决定是否继续读循环、是否断开连接。
//! - 借鉴 Netty 的异常层级与本仓库既有的 `code: &'static str` 约定，给每个变体配一个
//!   稳定字符串码，便于跨进程日志关联而不依赖 `Debug` 输出的格式细节。
//!
//! # 契约说明（What）
//! - `SluiceError::code()` 返回的字符串在次版本之间保持稳定，可被外部监控系统索引。
//! - 大多数变体不携带 cause；`TransportError`/`DecodeError` 通过 `source` 保留底层错误链。

use std::fmt;
use std::io;

use thiserror::Error;

/// Stable "domain.reason" error codes, mirrored one-to-one with [`SluiceError`] variants.
pub mod codes {
    pub const NOT_ENOUGH_DATA: &str = "buffer.not_enough_data";
    pub const NO_HEADROOM: &str = "buffer.no_headroom";
    pub const TOO_LARGE: &str = "buffer.too_large";
    pub const FRAME_TOO_LONG: &str = "framing.frame_too_long";
    pub const WRITE_QUEUE_FULL: &str = "channel.write_queue_full";
    pub const CONN_LOST: &str = "channel.conn_lost";
    pub const UNKNOWN_MESSAGE: &str = "codec.unknown_message";
    pub const UNSUPPORTED_TYPE: &str = "codec.unsupported_type";
    pub const DECODE_ERROR: &str = "codec.decode_error";
    pub const TRANSPORT_ERROR: &str = "transport.io";
}

/// The unified error type threaded through buffers, pipeline, channels and codecs.
///
/// # 契约说明（What）
/// - `NotEnoughData` — a buffer read would exceed available bytes; expected during
///   framing, non-fatal.
/// - `NoHeadroom` — a write-only buffer has insufficient reserved headroom; a
///   configuration bug, fatal to the current write.
/// - `TooLarge` — buffer growth would exceed feasible allocation.
/// - `FrameTooLong` — encoded frame exceeds the length field's capacity.
/// - `WriteQueueFull` — non-blocking write couldn't enqueue; channel remains alive.
/// - `ConnLost` — operation invoked after close.
/// - `UnknownMessage` — no registered meta/processor for an inbound ID.
/// - `UnsupportedType` — codec received a value it cannot encode.
/// - `DecodeError` — codec failure on inbound; frame dropped, stream continues.
/// - `TransportError` — RawConn read/write failure; triggers reconnect if enabled.
#[derive(Debug, Error)]
pub enum SluiceError {
    #[error("not enough data: need {needed} bytes, have {available}")]
    NotEnoughData { needed: usize, available: usize },

    #[error("no headroom: need {needed} bytes, have {available}")]
    NoHeadroom { needed: usize, available: usize },

    #[error("buffer growth would exceed feasible allocation ({requested} bytes)")]
    TooLarge { requested: usize },

    #[error("frame too long: {actual} bytes exceeds max {max}")]
    FrameTooLong { actual: u64, max: u64 },

    #[error("write queue full")]
    WriteQueueFull,

    #[error("connection lost")]
    ConnLost,

    #[error("unknown message id {id}")]
    UnknownMessage { id: String },

    #[error("unsupported message type: {description}")]
    UnsupportedType { description: String },

    #[error("decode error: {message}")]
    DecodeError {
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    #[error("transport error: {message}")]
    TransportError {
        message: String,
        #[source]
        cause: Option<io::Error>,
    },
}

impl SluiceError {
    /// The stable error code for this variant, suitable for log indexing.
    pub fn code(&self) -> &'static str {
        match self {
            SluiceError::NotEnoughData { .. } => codes::NOT_ENOUGH_DATA,
            SluiceError::NoHeadroom { .. } => codes::NO_HEADROOM,
            SluiceError::TooLarge { .. } => codes::TOO_LARGE,
            SluiceError::FrameTooLong { .. } => codes::FRAME_TOO_LONG,
            SluiceError::WriteQueueFull => codes::WRITE_QUEUE_FULL,
            SluiceError::ConnLost => codes::CONN_LOST,
            SluiceError::UnknownMessage { .. } => codes::UNKNOWN_MESSAGE,
            SluiceError::UnsupportedType { .. } => codes::UNSUPPORTED_TYPE,
            SluiceError::DecodeError { .. } => codes::DECODE_ERROR,
            SluiceError::TransportError { .. } => codes::TRANSPORT_ERROR,
        }
    }

    pub fn transport(message: impl Into<String>, cause: io::Error) -> Self {
        SluiceError::TransportError {
            message: message.into(),
            cause: Some(cause),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        SluiceError::DecodeError {
            message: message.into(),
            cause: None,
        }
    }

    pub fn unsupported(description: impl fmt::Display) -> Self {
        SluiceError::UnsupportedType {
            description: description.to_string(),
        }
    }
}
