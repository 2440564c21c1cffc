//! Fixed-width numeric message-id encoding/decoding, as consumed by
//! [`super::message::IdParserHandler`].
//!
//! # 设计背景（Why）
//! - 原始实现里的 id 编解码只处理定长数值 id（2/4 字节），默认按大端写在每帧的最前面。
//!   宽度是部署时固定的协议选择，所以做成一个小 trait 加两个定长实现，而不是运行时
//!   可变宽度；字节序则跟长度字段一样保留一个 setter（spec.md §4.F），复用
//!   [`super::framing::ByteOrder`] 而不是再造一个同形状的枚举。

use crate::error::SluiceError;

use super::framing::ByteOrder;
use super::registry::MsgId;

/// Reserved headroom budget for id + any extra framing a handler further up the
/// write chain might still prepend (length prefix, flags, ...).
pub const MAX_PACKET_LEN: usize = 8;
pub const MAX_EXTRA_LEN: usize = 8;

/// Encodes/decodes a numeric [`MsgId`] as a fixed number of big-endian bytes at
/// the front of a frame.
pub trait IdCodec: Send + Sync {
    /// Number of bytes this codec consumes/produces.
    fn width(&self) -> usize;

    /// Reads `width()` bytes from the front of `bytes` and returns the decoded id.
    fn decode(&self, bytes: &[u8]) -> Result<MsgId, SluiceError>;

    /// Encodes `id` as `width()` big-endian bytes.
    fn encode(&self, id: &MsgId) -> Result<Vec<u8>, SluiceError>;
}

fn numeric_or_err(id: &MsgId) -> Result<u64, SluiceError> {
    match id {
        MsgId::Numeric(n) => Ok(*n),
        MsgId::Named(name) => Err(SluiceError::unsupported(format!(
            "fixed-width id codec cannot encode named id {name:?}"
        ))),
    }
}

/// A 2-byte numeric id codec, big-endian by default.
pub struct Uint16IdCodec {
    byteorder: ByteOrder,
}

impl Default for Uint16IdCodec {
    fn default() -> Self {
        Uint16IdCodec {
            byteorder: ByteOrder::Big,
        }
    }
}

impl Uint16IdCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byteorder = order;
        self
    }
}

impl IdCodec for Uint16IdCodec {
    fn width(&self) -> usize {
        2
    }

    fn decode(&self, bytes: &[u8]) -> Result<MsgId, SluiceError> {
        if bytes.len() < 2 {
            return Err(SluiceError::NotEnoughData {
                needed: 2,
                available: bytes.len(),
            });
        }
        let value = super::framing::parse_length(&bytes[..2], self.byteorder);
        Ok(MsgId::Numeric(value))
    }

    fn encode(&self, id: &MsgId) -> Result<Vec<u8>, SluiceError> {
        let value = numeric_or_err(id)?;
        let _: u16 = value
            .try_into()
            .map_err(|_| SluiceError::unsupported(format!("id {value} does not fit in u16")))?;
        Ok(super::framing::encode_length(value, 2, self.byteorder))
    }
}

/// A 4-byte numeric id codec, big-endian by default.
pub struct Uint32IdCodec {
    byteorder: ByteOrder,
}

impl Default for Uint32IdCodec {
    fn default() -> Self {
        Uint32IdCodec {
            byteorder: ByteOrder::Big,
        }
    }
}

impl Uint32IdCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byteorder = order;
        self
    }
}

impl IdCodec for Uint32IdCodec {
    fn width(&self) -> usize {
        4
    }

    fn decode(&self, bytes: &[u8]) -> Result<MsgId, SluiceError> {
        if bytes.len() < 4 {
            return Err(SluiceError::NotEnoughData {
                needed: 4,
                available: bytes.len(),
            });
        }
        let value = super::framing::parse_length(&bytes[..4], self.byteorder);
        Ok(MsgId::Numeric(value))
    }

    fn encode(&self, id: &MsgId) -> Result<Vec<u8>, SluiceError> {
        let value = numeric_or_err(id)?;
        let _: u32 = value
            .try_into()
            .map_err(|_| SluiceError::unsupported(format!("id {value} does not fit in u32")))?;
        Ok(super::framing::encode_length(value, 4, self.byteorder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uint16_round_trips() {
        let codec = Uint16IdCodec::new();
        let bytes = codec.encode(&MsgId::Numeric(4242)).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), MsgId::Numeric(4242));
    }

    #[test]
    fn uint32_round_trips() {
        let codec = Uint32IdCodec::new();
        let bytes = codec.encode(&MsgId::Numeric(70_000)).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), MsgId::Numeric(70_000));
    }

    #[test]
    fn rejects_named_ids() {
        let codec = Uint16IdCodec::new();
        assert!(codec.encode(&MsgId::Named("x".into())).is_err());
    }

    #[test]
    fn uint16_defaults_to_big_endian_on_the_wire() {
        let codec = Uint16IdCodec::new();
        let bytes = codec.encode(&MsgId::Numeric(1)).unwrap();
        assert_eq!(bytes, vec![0x00, 0x01]);
    }

    #[test]
    fn uint16_little_endian_round_trips_and_differs_on_the_wire() {
        let big = Uint16IdCodec::new();
        let little = Uint16IdCodec::new().with_byte_order(ByteOrder::Little);

        let big_bytes = big.encode(&MsgId::Numeric(0x1234)).unwrap();
        let little_bytes = little.encode(&MsgId::Numeric(0x1234)).unwrap();
        assert_eq!(big_bytes, vec![0x12, 0x34]);
        assert_eq!(little_bytes, vec![0x34, 0x12]);
        assert_eq!(little.decode(&little_bytes).unwrap(), MsgId::Numeric(0x1234));
    }

    #[test]
    fn uint32_little_endian_round_trips_and_differs_on_the_wire() {
        let big = Uint32IdCodec::new();
        let little = Uint32IdCodec::new().with_byte_order(ByteOrder::Little);

        let big_bytes = big.encode(&MsgId::Numeric(0x0102_0304)).unwrap();
        let little_bytes = little.encode(&MsgId::Numeric(0x0102_0304)).unwrap();
        assert_eq!(big_bytes, vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(little_bytes, vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(little.decode(&little_bytes).unwrap(), MsgId::Numeric(0x0102_0304));
    }
}
