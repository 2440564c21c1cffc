//! The ID-parser and payload (de)serializer handlers that sit between framing
//! and the application's typed processors, plus the `MessageEncoder`/
//! `MessageDecoder` composites that wire both steps in the standard order.
//!
//! # 设计背景（Why）
//! - `IdParserHandler`、`MessageSerializer`/`MessageDeserializer` 是可以独立装配的
//!   细粒度 handler，这样贴近原始实现一个 handler 对应一个职责的粒度；但它们的出站顺序
//!   有一个不那么直观的约束（见下），大多数应用不需要关心这个约束——直接用
//!   [`MessageEncoder`]/[`MessageDecoder`] 这两个把两步按正确顺序捏合在一起的组合
//!   handler 即可，这也是 spec 里"convenience composites"一词的由来。
//!
//! # 细粒度组合的顺序约束（重要）
//! - 入站遍历从 head 向 tail 走，出站遍历从 tail 向 head 走——这是同一条链上方向相反的
//!   两次遍历。`IdParserHandler` 的 inbound 能力（解出 id）必须排在
//!   `MessageDeserializer` 之前（更靠近 head），好让 id 在反序列化前就已解出；它的
//!   outbound 能力（写 id 头）必须排在 `MessageSerializer` 之前（更靠近 tail，因为出站
//!   遍历从 tail 出发）。这两个约束对同一个位置是自相矛盾的，所以 `IdParserHandler`
//!   在本实现中只声明了 inbound 能力，outbound 的等价物是独立的 [`IdEncoderHandler`]，
//!   可以摆在 `MessageSerializer` 更靠近 tail 的位置，从而让两个方向都各自满足自己的
//!   顺序要求而不互相冲突。

use std::any::Any;
use std::sync::Arc;

use crate::buffer::WriteOnlyBuffer;
use crate::error::SluiceError;
use crate::pipeline::{Context, InboundHandler, OutboundHandler, PipelineMessage, SharedReadBuffer};

use super::id_parser::{IdCodec, MAX_EXTRA_LEN, MAX_PACKET_LEN};
use super::registry::{MsgId, SharedRegistry};
use super::Codec;

/// An already wire-ready `(id, payload bytes)` envelope, bypassing the
/// registry/codec lookup entirely. Used for forwarding pre-encoded messages
/// (e.g. relayed from another connection) without a round-trip through a
/// registered Rust type.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub id: MsgId,
    pub payload: Vec<u8>,
}

/// Intermediate carrier threaded from [`IdEncoderHandler`] to
/// [`MessageSerializer`]: the in-progress write buffer (with the id already
/// written into its headroom), the original type-erased message, and its
/// resolved id. Reuses `PipelineMessage::Typed` as the carrier rather than
/// adding a fourth tuple-shaped enum variant, since this is private wiring
/// between two adjacent handlers, not a shape other handlers need to
/// recognize.
struct PendingEncode {
    buffer: WriteOnlyBuffer,
    msg: Box<dyn Any + Send>,
    id: MsgId,
}

fn resolve_outbound_id(
    registry: &SharedRegistry,
    value: &dyn Any,
) -> Result<MsgId, SluiceError> {
    if let Some(raw) = value.downcast_ref::<RawPacket>() {
        return Ok(raw.id.clone());
    }
    registry.meta_by_msg(value).map(|meta| meta.id)
}

/// Inbound-only: decodes the leading `IdCodec::width()` bytes off the front
/// of a frame and forwards the remaining bytes paired with the decoded id.
///
/// # 契约说明（What）
/// - Expects `PipelineMessage::ReadView` holding exactly one already-framed
///   message (as produced by [`super::LengthFieldDecoder`] or
///   [`super::CombinedDecoder`]'s main segment).
pub struct IdParserHandler {
    id_codec: Arc<dyn IdCodec>,
}

impl IdParserHandler {
    pub fn new(id_codec: Arc<dyn IdCodec>) -> Self {
        IdParserHandler { id_codec }
    }
}

impl InboundHandler for IdParserHandler {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let shared: SharedReadBuffer = match msg {
            PipelineMessage::ReadView(shared) => shared,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "IdParserHandler expected ReadView, got {other:?}"
                )));
                return;
            }
        };
        let width = self.id_codec.width();
        let decoded = {
            let mut locked = shared.lock();
            locked
                .read(0, width)
                .and_then(|bytes| self.id_codec.decode(&bytes))
        };
        match decoded {
            Ok(id) => ctx.fire_read(PipelineMessage::IdAndPayload(id, shared)),
            Err(err) => ctx.fire_error(err),
        }
    }
}

/// Outbound-only counterpart of [`IdParserHandler`]: resolves the message's
/// wire id (via the registry for application types, or directly for
/// [`RawPacket`] envelopes), allocates the headroom-bearing write buffer, and
/// writes the id into it. See the module doc for why this is a separate
/// handler from `IdParserHandler` rather than a second capability on it.
pub struct IdEncoderHandler {
    id_codec: Arc<dyn IdCodec>,
    registry: SharedRegistry,
}

impl IdEncoderHandler {
    pub fn new(id_codec: Arc<dyn IdCodec>, registry: SharedRegistry) -> Self {
        IdEncoderHandler { id_codec, registry }
    }
}

impl OutboundHandler for IdEncoderHandler {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let value = match msg {
            PipelineMessage::Typed(value) => value,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "IdEncoderHandler expected Typed, got {other:?}"
                )));
                return;
            }
        };
        let id = match resolve_outbound_id(&self.registry, value.as_ref()) {
            Ok(id) => id,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let id_bytes = match self.id_codec.encode(&id) {
            Ok(bytes) => bytes,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let mut buffer = WriteOnlyBuffer::new(MAX_PACKET_LEN + MAX_EXTRA_LEN);
        if let Err(err) = buffer.write_header(&id_bytes) {
            ctx.fire_error(err);
            return;
        }
        ctx.fire_write(PipelineMessage::Typed(Box::new(PendingEncode {
            buffer,
            msg: value,
            id,
        })));
    }
}

/// Outbound-only: appends the serialized payload to an in-progress
/// [`PendingEncode`] buffer and forwards the completed [`PipelineMessage::WriteView`].
pub struct MessageSerializer {
    registry: SharedRegistry,
    default_codec: Arc<dyn Codec>,
}

impl MessageSerializer {
    pub fn new(registry: SharedRegistry, default_codec: Arc<dyn Codec>) -> Self {
        MessageSerializer {
            registry,
            default_codec,
        }
    }

    fn encode_body(&self, id: &MsgId, msg: Box<dyn Any + Send>) -> Result<Vec<u8>, SluiceError> {
        match msg.downcast::<RawPacket>() {
            Ok(raw) => Ok(raw.payload),
            Err(boxed) => {
                let codec = self
                    .registry
                    .meta_by_id(id)
                    .ok()
                    .and_then(|meta| meta.codec())
                    .unwrap_or_else(|| self.default_codec.clone());
                codec.marshal(boxed.as_ref())
            }
        }
    }
}

impl OutboundHandler for MessageSerializer {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let pending = match msg {
            PipelineMessage::Typed(value) => match value.downcast::<PendingEncode>() {
                Ok(pending) => pending,
                Err(_) => {
                    ctx.fire_error(SluiceError::unsupported(
                        "MessageSerializer expected a PendingEncode carrier",
                    ));
                    return;
                }
            },
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "MessageSerializer expected Typed, got {other:?}"
                )));
                return;
            }
        };
        let PendingEncode {
            mut buffer,
            msg,
            id,
        } = *pending;
        let body = match self.encode_body(&id, msg) {
            Ok(bytes) => bytes,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        if let Err(err) = buffer.write_tail(&body) {
            ctx.fire_error(err);
            return;
        }
        ctx.fire_write(PipelineMessage::WriteView(buffer));
    }
}

/// Inbound-only: looks up the registered type for a decoded id, instantiates
/// a fresh zero value, and unmarshals the remaining bytes into it.
pub struct MessageDeserializer {
    registry: SharedRegistry,
    default_codec: Arc<dyn Codec>,
}

impl MessageDeserializer {
    pub fn new(registry: SharedRegistry, default_codec: Arc<dyn Codec>) -> Self {
        MessageDeserializer {
            registry,
            default_codec,
        }
    }
}

impl InboundHandler for MessageDeserializer {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let (id, shared) = match msg {
            PipelineMessage::IdAndPayload(id, shared) => (id, shared),
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "MessageDeserializer expected IdAndPayload, got {other:?}"
                )));
                return;
            }
        };
        let meta = match self.registry.meta_by_id(&id) {
            Ok(meta) => meta,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let mut instance = meta.create_instance();
        let codec = meta.codec().unwrap_or_else(|| self.default_codec.clone());
        let bytes = shared.lock().bytes().to_vec();
        if let Err(err) = codec.unmarshal(&bytes, instance.as_mut()) {
            ctx.fire_error(SluiceError::DecodeError {
                message: err.to_string(),
                cause: None,
            });
            return;
        }
        ctx.fire_read(PipelineMessage::Tuple2(
            Box::new(PipelineMessage::IdValue(id)),
            Box::new(PipelineMessage::Typed(instance)),
        ));
    }
}

/// Outbound composite: resolves id, marshals the payload and assembles the
/// complete `[id][payload]` write buffer in one pass, in the "standard order"
/// the spec describes `IdParserHandler`+`MessageSerializer` as together
/// implementing. Bypasses all of that when the message is already raw bytes.
pub struct MessageEncoder {
    id_codec: Arc<dyn IdCodec>,
    registry: SharedRegistry,
    default_codec: Arc<dyn Codec>,
}

impl MessageEncoder {
    pub fn new(id_codec: Arc<dyn IdCodec>, registry: SharedRegistry, default_codec: Arc<dyn Codec>) -> Self {
        MessageEncoder {
            id_codec,
            registry,
            default_codec,
        }
    }
}

impl OutboundHandler for MessageEncoder {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let value = match msg {
            PipelineMessage::Raw(bytes) => {
                ctx.fire_write(PipelineMessage::Raw(bytes));
                return;
            }
            PipelineMessage::Typed(value) => value,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "MessageEncoder expected Raw or Typed, got {other:?}"
                )));
                return;
            }
        };
        let id = match resolve_outbound_id(&self.registry, value.as_ref()) {
            Ok(id) => id,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let body = match value.downcast::<RawPacket>() {
            Ok(raw) => raw.payload.clone(),
            Err(boxed) => {
                let codec = self
                    .registry
                    .meta_by_id(&id)
                    .ok()
                    .and_then(|meta| meta.codec())
                    .unwrap_or_else(|| self.default_codec.clone());
                match codec.marshal(boxed.as_ref()) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        ctx.fire_error(err);
                        return;
                    }
                }
            }
        };
        let id_bytes = match self.id_codec.encode(&id) {
            Ok(bytes) => bytes,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let mut buffer = WriteOnlyBuffer::new(MAX_PACKET_LEN + MAX_EXTRA_LEN);
        if let Err(err) = buffer.write_header(&id_bytes) {
            ctx.fire_error(err);
            return;
        }
        if let Err(err) = buffer.write_tail(&body) {
            ctx.fire_error(err);
            return;
        }
        ctx.fire_write(PipelineMessage::WriteView(buffer));
    }
}

/// Inbound composite: the standard-order pairing of id-decode and
/// deserialize in one pass.
pub struct MessageDecoder {
    id_codec: Arc<dyn IdCodec>,
    registry: SharedRegistry,
    default_codec: Arc<dyn Codec>,
}

impl MessageDecoder {
    pub fn new(id_codec: Arc<dyn IdCodec>, registry: SharedRegistry, default_codec: Arc<dyn Codec>) -> Self {
        MessageDecoder {
            id_codec,
            registry,
            default_codec,
        }
    }
}

impl InboundHandler for MessageDecoder {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let shared: SharedReadBuffer = match msg {
            PipelineMessage::ReadView(shared) => shared,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "MessageDecoder expected ReadView, got {other:?}"
                )));
                return;
            }
        };
        let width = self.id_codec.width();
        let decoded_id = {
            let mut locked = shared.lock();
            locked
                .read(0, width)
                .and_then(|bytes| self.id_codec.decode(&bytes))
        };
        let id = match decoded_id {
            Ok(id) => id,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let meta = match self.registry.meta_by_id(&id) {
            Ok(meta) => meta,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let mut instance = meta.create_instance();
        let codec = meta.codec().unwrap_or_else(|| self.default_codec.clone());
        let bytes = shared.lock().bytes().to_vec();
        if let Err(err) = codec.unmarshal(&bytes, instance.as_mut()) {
            ctx.fire_error(SluiceError::DecodeError {
                message: err.to_string(),
                cause: None,
            });
            return;
        }
        ctx.fire_read(PipelineMessage::Tuple2(
            Box::new(PipelineMessage::IdValue(id)),
            Box::new(PipelineMessage::Typed(instance)),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadOnlyBuffer;
    use crate::codec::id_parser::Uint16IdCodec;
    use crate::codec::registry::MessageRegistry;
    use crate::pipeline::{shared_read_buffer, test_support::RecordingContext};

    struct EchoCodec;
    impl Codec for EchoCodec {
        fn marshal(&self, value: &dyn Any) -> Result<Vec<u8>, SluiceError> {
            let s = value
                .downcast_ref::<String>()
                .ok_or_else(|| SluiceError::unsupported("expected String"))?;
            Ok(s.as_bytes().to_vec())
        }

        fn unmarshal(&self, bytes: &[u8], target: &mut dyn Any) -> Result<(), SluiceError> {
            let s = target
                .downcast_mut::<String>()
                .ok_or_else(|| SluiceError::unsupported("expected String"))?;
            *s = String::from_utf8_lossy(bytes).into_owned();
            Ok(())
        }
    }

    #[test]
    fn message_encoder_then_decoder_round_trip_a_string() {
        let registry = Arc::new(MessageRegistry::new());
        registry.register::<String>(1u64);
        let codec: Arc<dyn Codec> = Arc::new(EchoCodec);
        let id_codec: Arc<dyn IdCodec> = Arc::new(Uint16IdCodec::new());

        let encoder = MessageEncoder::new(id_codec.clone(), registry.clone(), codec.clone());
        let ctx = RecordingContext::new();
        encoder.on_write(
            &ctx,
            PipelineMessage::Typed(Box::new("hello".to_string())),
        );
        let PipelineMessage::WriteView(buf) = ctx.take_write().unwrap() else {
            panic!("expected WriteView");
        };
        assert_eq!(buf.bytes(), [0, 1, b'h', b'e', b'l', b'l', b'o']);

        let decoder = MessageDecoder::new(id_codec, registry, codec);
        let ctx2 = RecordingContext::new();
        let read_buf = ReadOnlyBuffer::with_bytes(buf.bytes().to_vec());
        decoder.on_read(&ctx2, PipelineMessage::ReadView(shared_read_buffer(read_buf)));
        let PipelineMessage::Tuple2(id_msg, value_msg) = ctx2.take_read().unwrap() else {
            panic!("expected Tuple2");
        };
        assert!(matches!(*id_msg, PipelineMessage::IdValue(MsgId::Numeric(1))));
        let PipelineMessage::Typed(value) = *value_msg else {
            panic!("expected Typed");
        };
        assert_eq!(*value.downcast::<String>().unwrap(), "hello");
    }

    #[test]
    fn id_parser_then_message_deserializer_granular_path() {
        let registry = Arc::new(MessageRegistry::new());
        registry.register::<String>(2u64);
        let codec: Arc<dyn Codec> = Arc::new(EchoCodec);
        let id_codec: Arc<dyn IdCodec> = Arc::new(Uint16IdCodec::new());

        let mut wire = 2u16.to_be_bytes().to_vec();
        wire.extend_from_slice(b"hi");
        let parser = IdParserHandler::new(id_codec);
        let ctx = RecordingContext::new();
        parser.on_read(
            &ctx,
            PipelineMessage::ReadView(shared_read_buffer(ReadOnlyBuffer::with_bytes(wire))),
        );
        let id_and_payload = ctx.take_read().unwrap();

        let deserializer = MessageDeserializer::new(registry, codec);
        let ctx2 = RecordingContext::new();
        deserializer.on_read(&ctx2, id_and_payload);
        let PipelineMessage::Tuple2(_, value_msg) = ctx2.take_read().unwrap() else {
            panic!("expected Tuple2");
        };
        let PipelineMessage::Typed(value) = *value_msg else {
            panic!("expected Typed");
        };
        assert_eq!(*value.downcast::<String>().unwrap(), "hi");
    }

    #[test]
    fn unknown_id_fires_error_instead_of_panicking() {
        let registry = Arc::new(MessageRegistry::new());
        let codec: Arc<dyn Codec> = Arc::new(EchoCodec);
        let deserializer = MessageDeserializer::new(registry, codec);
        let ctx = RecordingContext::new();
        deserializer.on_read(
            &ctx,
            PipelineMessage::IdAndPayload(
                MsgId::Numeric(99),
                shared_read_buffer(ReadOnlyBuffer::with_bytes(vec![1, 2, 3])),
            ),
        );
        assert_eq!(ctx.errors_fired(), 1);
        assert!(matches!(
            ctx.take_error().unwrap(),
            SluiceError::UnknownMessage { .. }
        ));
    }
}
