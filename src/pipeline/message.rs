use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{ReadOnlyBuffer, WriteOnlyBuffer};
use crate::codec::registry::MsgId;

/// A read-only buffer shared by reference between the read loop and the pipeline.
///
/// # 设计背景（Why）
/// - 原始实现中 `bytes.ReadOnlyBuffer` 是一个接口（引用语义）：读循环持有的缓冲对象
///   和传给 `FireRead` 的是同一个对象，framing handler 原地推进其读指针，读循环据此
///   判断“这一轮消费了多少字节”。若直接把 `ReadOnlyBuffer` 按值放进
///   [`PipelineMessage::ReadView`]，所有权转移会切断这种共享，读循环将无法在下一次
///   `fire_read` 前观察到同一块缓冲的剩余长度。
/// - 用 `Arc<Mutex<ReadOnlyBuffer>>` 重建这种引用语义，是把 Go 接口的别名行为映射到
///   Rust 的最直接方式。
pub type SharedReadBuffer = Arc<Mutex<ReadOnlyBuffer>>;

pub fn shared_read_buffer(buf: ReadOnlyBuffer) -> SharedReadBuffer {
    Arc::new(Mutex::new(buf))
}

/// The tagged variant carried through every pipeline event.
///
/// # 设计背景（Why）
/// - 原始实现（Go）把每个事件的负载当作 `interface{}`，由每个 handler 自行做类型断言。
///   spec 的设计笔记建议把这个小而封闭的形状集合改写成一个带标签的联合类型：惯用 Rust
///   不鼓励到处 `Box<dyn Any>` 再到处下转型。
///
/// # 契约说明（What）
/// - handler 通过 `match` 消费自己认识的形状；遇到不认识的形状应当返回
///   [`crate::error::SluiceError::UnsupportedType`]，而不是 panic。
pub enum PipelineMessage {
    /// Raw bytes with no further structure (e.g. already-framed wire bytes).
    Raw(Vec<u8>),
    /// A read-only view, typically produced by the read loop or a framing handler.
    ///
    /// Shared ([`SharedReadBuffer`]) rather than owned: the read loop keeps advancing
    /// the same underlying buffer across repeated `fire_read` calls within one drain
    /// iteration, mirroring the reference semantics of the original `bytes.ReadOnlyBuffer`
    /// interface.
    ReadView(SharedReadBuffer),
    /// A write-only buffer under construction by the outbound codec chain.
    WriteView(WriteOnlyBuffer),
    /// A bare message identifier, e.g. the output of an ID-parsing decode step.
    IdValue(MsgId),
    /// An identifier paired with the remaining undecoded payload.
    IdAndPayload(MsgId, SharedReadBuffer),
    /// Two related messages traveling together (e.g. `[buffer, original_msg]`).
    Tuple2(Box<PipelineMessage>, Box<PipelineMessage>),
    /// A fully decoded application value, opaque to the framework past this point.
    Typed(Box<dyn Any + Send>),
    /// A UTF-8 string, as produced/consumed by [`crate::middleware::string_codec::StringEncoder`].
    Text(String),
}

impl std::fmt::Debug for PipelineMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMessage::Raw(b) => write!(f, "Raw({} bytes)", b.len()),
            PipelineMessage::ReadView(b) => write!(f, "ReadView({} bytes)", b.lock().len()),
            PipelineMessage::WriteView(b) => write!(f, "WriteView({} bytes)", b.len()),
            PipelineMessage::IdValue(id) => write!(f, "IdValue({id:?})"),
            PipelineMessage::IdAndPayload(id, b) => {
                write!(f, "IdAndPayload({id:?}, {} bytes)", b.lock().len())
            }
            PipelineMessage::Tuple2(a, b) => write!(f, "Tuple2({a:?}, {b:?})"),
            PipelineMessage::Typed(_) => write!(f, "Typed(..)"),
            PipelineMessage::Text(s) => write!(f, "Text({s:?})"),
        }
    }
}

/// A user event fired via `fire_event`, e.g. [`crate::middleware::idle::IdleEvent`].
pub type UserEvent = Box<dyn Any + Send + Sync>;
