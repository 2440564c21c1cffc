//! [`StringEncoder`]: a convenience handler for line/text protocols that
//! reads a whole frame as a UTF-8 string and writes bare `String`s back out as
//! bytes.
//!
//! # 设计背景（Why）
//! - 镜像 `examples/original_source/handler/string_encoder.go`：入站把整个
//!   `ReadOnlyBuffer` 读空并转成字符串再 `FireRead`；出站对 `[]byte`/
//!   `WriteOnlyBuffer` 直接透传，对 `string` 转成字节再继续传播。Go 的
//!   `string(bytes)` 转换不校验 UTF-8 合法性，这里用 `String::from_utf8_lossy`
//!   对齐这种宽松语义，而不是在非法字节上 `fire_error`。

use crate::error::SluiceError;
use crate::pipeline::{Context, InboundHandler, OutboundHandler, PipelineMessage};

/// Turns a fully-framed [`PipelineMessage::ReadView`] into
/// [`PipelineMessage::Text`] on the way in, and a bare
/// [`PipelineMessage::Text`] into [`PipelineMessage::Raw`] bytes on the way
/// out. `Raw`/`WriteView` outbound messages pass through unchanged.
pub struct StringEncoder;

impl InboundHandler for StringEncoder {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        let shared = match msg {
            PipelineMessage::ReadView(shared) => shared,
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "StringEncoder expected ReadView, got {other:?}"
                )));
                return;
            }
        };
        let bytes = {
            let mut locked = shared.lock();
            let len = locked.len();
            match locked.read(0, len) {
                Ok(bytes) => bytes,
                Err(err) => {
                    ctx.fire_error(err);
                    return;
                }
            }
        };
        ctx.fire_read(PipelineMessage::Text(String::from_utf8_lossy(&bytes).into_owned()));
    }
}

impl OutboundHandler for StringEncoder {
    fn on_write(&self, ctx: &dyn Context, msg: PipelineMessage) {
        match msg {
            raw @ PipelineMessage::Raw(_) => ctx.fire_write(raw),
            view @ PipelineMessage::WriteView(_) => ctx.fire_write(view),
            PipelineMessage::Text(s) => ctx.fire_write(PipelineMessage::Raw(s.into_bytes())),
            other => {
                ctx.fire_error(SluiceError::unsupported(format!(
                    "StringEncoder cannot encode {other:?}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadOnlyBuffer;
    use crate::pipeline::{shared_read_buffer, test_support::RecordingContext};

    #[test]
    fn on_read_decodes_the_whole_buffer_as_utf8() {
        let encoder = StringEncoder;
        let ctx = RecordingContext::new();
        let shared = shared_read_buffer(ReadOnlyBuffer::with_bytes(b"hello".to_vec()));
        encoder.on_read(&ctx, PipelineMessage::ReadView(shared));
        match ctx.take_read().unwrap() {
            PipelineMessage::Text(s) => assert_eq!(s, "hello"),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn on_write_encodes_text_and_passes_through_raw() {
        let encoder = StringEncoder;
        let ctx = RecordingContext::new();
        encoder.on_write(&ctx, PipelineMessage::Text("hi".to_string()));
        match ctx.take_write().unwrap() {
            PipelineMessage::Raw(bytes) => assert_eq!(bytes, b"hi"),
            other => panic!("expected Raw, got {other:?}"),
        }

        let ctx2 = RecordingContext::new();
        encoder.on_write(&ctx2, PipelineMessage::Raw(vec![1, 2, 3]));
        match ctx2.take_write().unwrap() {
            PipelineMessage::Raw(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("expected Raw, got {other:?}"),
        }
    }

    #[test]
    fn on_write_rejects_unsupported_shapes() {
        let encoder = StringEncoder;
        let ctx = RecordingContext::new();
        encoder.on_write(&ctx, PipelineMessage::IdValue(crate::codec::registry::MsgId::Numeric(1)));
        assert_eq!(ctx.errors_fired(), 1);
    }
}
