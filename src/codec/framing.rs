//! Length-prefixed framing: turns a byte stream into discrete frames and back.
//!
//! # 设计背景（Why）
//! - 这是管线里最早接触原始字节的一层：从 `SubChannel` 的读循环反复注入的共享缓冲里
//!   切出恰好一帧，再把剩下的字节留给下一次 `fire_read`。`LengthFieldDecoder` 因此
//!   直接操作 [`SharedReadBuffer`] 背后的同一个缓冲对象，和原始实现里 handler 共享同一个
//!   `bytes.ReadOnlyBuffer` 接口实例是同一回事。

use tracing::error;

use crate::buffer::{ReadOnlyBuffer, WriteOnlyBuffer};
use crate::codec::id_parser::IdCodec;
use crate::error::SluiceError;
use crate::pipeline::{
    shared_read_buffer, Context, InboundHandler, OutboundHandler, PipelineMessage,
    SharedReadBuffer,
};

/// The 4-byte sentinel marking an extra-message piggyback segment at the
/// front of a frame's payload, per SPEC_FULL.md §6's wire layout.
pub const EXTRA_MSG_FLAG: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

fn calc_max_frame_len(width: usize) -> u64 {
    match width {
        1 => u8::MAX as u64,
        2 => u16::MAX as u64,
        4 => u32::MAX as u64,
        8 => u64::MAX,
        other => panic!("unsupported length field width: {other}"),
    }
}

pub(crate) fn parse_length(bytes: &[u8], order: ByteOrder) -> u64 {
    let mut buf = [0u8; 8];
    let width = bytes.len();
    match order {
        ByteOrder::Big => buf[8 - width..].copy_from_slice(bytes),
        ByteOrder::Little => {
            let mut rev: Vec<u8> = bytes.to_vec();
            rev.reverse();
            buf[8 - width..].copy_from_slice(&rev);
        }
    }
    u64::from_be_bytes(buf)
}

pub(crate) fn encode_length(value: u64, width: usize, order: ByteOrder) -> Vec<u8> {
    let be = value.to_be_bytes();
    let mut out = be[8 - width..].to_vec();
    if order == ByteOrder::Little {
        out.reverse();
    }
    out
}

/// Extracts one length-prefixed frame at a time from a persistent read buffer.
///
/// # 契约说明（What）
/// - `decode` returns `Ok(None)` when the buffer does not yet hold a full frame
///   (caller should wait for more bytes); it never blocks or mutates on the
///   partial-frame path.
/// - `initial_bytes_to_strip` defaults to `length_field_offset + size_of_length_field`
///   (strip the whole length header); set explicitly to keep some of it.
pub struct LengthFieldDecoder {
    max_frame_length: u64,
    length_field_offset: usize,
    size_of_length_field: usize,
    length_field_end_offset: usize,
    initial_bytes_to_strip: Option<usize>,
    byteorder: ByteOrder,
}

impl LengthFieldDecoder {
    pub fn new(size_of_length_field: usize) -> Self {
        LengthFieldDecoder {
            max_frame_length: calc_max_frame_len(size_of_length_field),
            length_field_offset: 0,
            size_of_length_field,
            length_field_end_offset: size_of_length_field,
            initial_bytes_to_strip: None,
            byteorder: ByteOrder::Big,
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byteorder = order;
        self
    }

    pub fn with_max_frame_length(mut self, max: u64) -> Self {
        self.max_frame_length = max;
        self
    }

    pub fn with_length_field_offset(mut self, offset: usize) -> Self {
        self.length_field_offset = offset;
        self.length_field_end_offset = offset + self.size_of_length_field;
        self
    }

    pub fn with_initial_bytes_to_strip(mut self, n: usize) -> Self {
        self.initial_bytes_to_strip = Some(n);
        self
    }

    fn strip_len(&self) -> usize {
        self.initial_bytes_to_strip
            .unwrap_or(self.length_field_end_offset)
    }

    /// Pulls exactly one frame off the front of `buf`, if a full one is present.
    pub fn decode(&self, buf: &mut ReadOnlyBuffer) -> Result<Option<ReadOnlyBuffer>, SluiceError> {
        if buf.len() < self.length_field_end_offset {
            return Ok(None);
        }
        let header = buf.seek(self.length_field_end_offset)?;
        let length_bytes = &header[self.length_field_offset..self.length_field_end_offset];
        let frame_length = parse_length(length_bytes, self.byteorder);

        if (buf.len() as u64) < frame_length {
            return Ok(None);
        }
        if frame_length > self.max_frame_length {
            return Err(SluiceError::FrameTooLong {
                actual: frame_length,
                max: self.max_frame_length,
            });
        }

        let skip = self.strip_len();
        let actual_frame_len = (frame_length as usize)
            .checked_sub(skip)
            .ok_or_else(|| SluiceError::decode("initial_bytes_to_strip exceeds frame length"))?;
        let payload = buf.read(skip, actual_frame_len)?;
        Ok(Some(ReadOnlyBuffer::with_bytes(payload)))
    }
}

impl InboundHandler for LengthFieldDecoder {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let shared: SharedReadBuffer = match msg {
            PipelineMessage::ReadView(shared) => shared,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "LengthFieldDecoder expected ReadView, got {other:?}"
                )));
                return;
            }
        };
        let frame = {
            let mut locked = shared.lock();
            self.decode(&mut locked)
        };
        match frame {
            Ok(Some(frame)) => ctx.fire_read(PipelineMessage::ReadView(shared_read_buffer(frame))),
            Ok(None) => {
                // Partial frame: stop here, the read loop will call again once more
                // bytes have arrived.
            }
            Err(err) => ctx.fire_error(err),
        }
    }
}

/// The write-side counterpart: prepends a length field computed from the buffer's
/// own length plus the field width.
pub struct LengthFieldPrepender {
    length_field_length: usize,
    byteorder: ByteOrder,
}

impl LengthFieldPrepender {
    pub fn new(length_field_length: usize) -> Self {
        LengthFieldPrepender {
            length_field_length,
            byteorder: ByteOrder::Big,
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byteorder = order;
        self
    }

    /// Prepends the length header in place. Exposed directly (mirroring
    /// [`LengthFieldDecoder::decode`]) so callers can drive the framing logic
    /// without assembling a full [`Context`]/handler round-trip.
    pub fn encode(&self, buf: &mut WriteOnlyBuffer) -> Result<(), SluiceError> {
        let actual_len = buf.len() + self.length_field_length;
        let max = calc_max_frame_len(self.length_field_length);
        if actual_len as u64 > max {
            return Err(SluiceError::FrameTooLong {
                actual: actual_len as u64,
                max,
            });
        }
        let head = encode_length(actual_len as u64, self.length_field_length, self.byteorder);
        buf.write_header(&head)
    }
}

impl OutboundHandler for LengthFieldPrepender {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        match msg {
            PipelineMessage::Raw(bytes) => ctx.fire_write(PipelineMessage::Raw(bytes)),
            PipelineMessage::WriteView(mut buf) => match self.encode(&mut buf) {
                Ok(()) => ctx.fire_write(PipelineMessage::WriteView(buf)),
                Err(err) => {
                    error!(error = %err, "LengthFieldPrepender: encode failed");
                    ctx.fire_error(err);
                }
            },
            other => ctx.fire_error(SluiceError::unsupported(format!(
                "LengthFieldPrepender expected Raw or WriteView, got {other:?}"
            ))),
        }
    }
}

/// Optional piggyback layer: unwraps an extra message that precedes the main
/// payload in a frame, per the `[flag|extraLen|extraID|extraPayload|mainID|
/// mainPayload]` layout of SPEC_FULL.md §6.
///
/// # 设计背景（Why）
/// - 拆出的 extra 段只做到“id + 剩余字节”为止（[`PipelineMessage::IdAndPayload`]），
///   并不在这一层完成具体类型的反序列化：这一层不依赖消息注册表或 codec，和
///   [`LengthFieldDecoder`] 一样只处理框架层的切分。应用若要把 extra 段还原成具体
///   类型，可以把它得到的 `IdAndPayload` 再喂给 [`super::message::MessageDeserializer`]
///   一次（两者共享同样的 id 解析与反序列化逻辑，无需重复实现）。
pub struct CombinedDecoder {
    id_codec: std::sync::Arc<dyn IdCodec>,
}

impl CombinedDecoder {
    pub fn new(id_codec: std::sync::Arc<dyn IdCodec>) -> Self {
        CombinedDecoder { id_codec }
    }
}

impl InboundHandler for CombinedDecoder {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let shared: SharedReadBuffer = match msg {
            PipelineMessage::ReadView(shared) => shared,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "CombinedDecoder expected ReadView, got {other:?}"
                )));
                return;
            }
        };

        let flag = {
            let locked = shared.lock();
            if locked.len() < 4 {
                None
            } else {
                match locked.seek(4) {
                    Ok(bytes) => Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
                    Err(_) => None,
                }
            }
        };

        if flag != Some(EXTRA_MSG_FLAG) {
            ctx.fire_read(PipelineMessage::ReadView(shared));
            return;
        }

        let extra = {
            let mut locked = shared.lock();
            (|| -> Result<_, SluiceError> {
                locked.discard(4)?;
                let len_bytes = locked.read(0, 4)?;
                let extra_len =
                    u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                        as usize;
                let extra_bytes = locked.read(0, extra_len)?;
                Ok(extra_bytes)
            })()
        };
        let extra_bytes = match extra {
            Ok(bytes) => bytes,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };

        let mut extra_buf = ReadOnlyBuffer::with_bytes(extra_bytes);
        let width = self.id_codec.width();
        let id_bytes = match extra_buf.read(0, width) {
            Ok(bytes) => bytes,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };
        let extra_id = match self.id_codec.decode(&id_bytes) {
            Ok(id) => id,
            Err(err) => {
                ctx.fire_error(err);
                return;
            }
        };

        ctx.fire_read(PipelineMessage::Tuple2(
            Box::new(PipelineMessage::ReadView(shared)),
            Box::new(PipelineMessage::IdAndPayload(
                extra_id,
                shared_read_buffer(extra_buf),
            )),
        ));
    }
}

/// The write-side counterpart of [`CombinedDecoder`]: combines an already
/// fully-encoded main message buffer with an already fully-encoded extra
/// message buffer (both typically produced upstream by
/// [`super::message::MessageEncoder`]) into one frame body.
///
/// # 契约说明（What）
/// - Expects `PipelineMessage::Tuple2(main, extra)` where both elements are
///   `WriteView`. Anything else is forwarded unchanged, matching the spec's
///   "if the flag is absent, forward unchanged" symmetry on the decode side.
pub struct CombinedEncoder;

impl OutboundHandler for CombinedEncoder {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let (main, extra) = match msg {
            PipelineMessage::Tuple2(main, extra) => (main, extra),
            other => {
                ctx.fire_write(other);
                return;
            }
        };
        let (PipelineMessage::WriteView(main_buf), PipelineMessage::WriteView(extra_buf)) =
            (*main, *extra)
        else {
            ctx.fire_error(SluiceError::unsupported(
                "CombinedEncoder expects Tuple2(WriteView, WriteView)",
            ));
            return;
        };

        let extra_bytes = extra_buf.bytes().to_vec();
        let mut out = WriteOnlyBuffer::new(8);
        if let Err(err) = out.write_tail(&extra_bytes) {
            ctx.fire_error(err);
            return;
        }
        let len_header = (extra_bytes.len() as u32).to_be_bytes();
        if let Err(err) = out.write_header(&len_header) {
            ctx.fire_error(err);
            return;
        }
        if let Err(err) = out.write_header(&EXTRA_MSG_FLAG.to_be_bytes()) {
            ctx.fire_error(err);
            return;
        }
        if let Err(err) = out.write_tail(main_buf.bytes()) {
            ctx.fire_error(err);
            return;
        }
        ctx.fire_write(PipelineMessage::WriteView(out));
    }
}
