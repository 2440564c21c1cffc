//! Property-based coverage for [`sluice_core::codec::framing`], property 4 of
//! SPEC_FULL.md §8.
//!
//! # 设计背景（Why）
//! - `LengthFieldPrepender`/`LengthFieldDecoder` 是管线里最早、也是后续一切编解码
//!   握手的基础；用随机 payload 验证"prepend 再 decode 等于原样拿回"这件事，
//!   比固定用例更贴近 spec.md §8 对任意长度小于字段最大值的载荷都成立的措辞。

use proptest::prelude::*;

use sluice_core::buffer::{ReadOnlyBuffer, WriteOnlyBuffer};
use sluice_core::codec::framing::{ByteOrder, LengthFieldDecoder, LengthFieldPrepender};
use sluice_core::SluiceError;

fn prepend(width: usize, order: ByteOrder, payload: &[u8]) -> Result<Vec<u8>, SluiceError> {
    let prepender = LengthFieldPrepender::new(width).with_byte_order(order);
    let mut buf = WriteOnlyBuffer::new(width);
    buf.write_tail(payload).unwrap();
    prepender.encode(&mut buf)?;
    Ok(buf.bytes().to_vec())
}

fn round_trip_with(width: usize, order: ByteOrder, payload: &[u8]) {
    let wire = prepend(width, order, payload).expect("payload fits within field width");

    let decoder = LengthFieldDecoder::new(width).with_byte_order(order);
    let mut read_buf = ReadOnlyBuffer::with_bytes(wire);
    let frame = decoder.decode(&mut read_buf).unwrap().unwrap();
    assert_eq!(frame.bytes(), payload);
    assert!(read_buf.is_empty());
}

proptest! {
    /// Property 4: for all payloads smaller than the field's max frame length,
    /// decode(prepend(p)) == p, for both field widths and both byte orders.
    #[test]
    fn length_prefix_round_trips_big_endian_u32(
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        round_trip_with(4, ByteOrder::Big, &payload);
    }

    #[test]
    fn length_prefix_round_trips_little_endian_u32(
        payload in prop::collection::vec(any::<u8>(), 0..4096),
    ) {
        round_trip_with(4, ByteOrder::Little, &payload);
    }

    #[test]
    fn length_prefix_round_trips_big_endian_u16(
        payload in prop::collection::vec(any::<u8>(), 0..(u16::MAX as usize - 2)),
    ) {
        round_trip_with(2, ByteOrder::Big, &payload);
    }

    /// Any payload whose encoded frame length would exceed the field's max is
    /// rejected at encode time rather than silently truncated.
    #[test]
    fn oversized_payload_is_rejected_at_encode_time(
        extra in 1usize..64,
    ) {
        let width = 1;
        let max = u8::MAX as usize;
        let payload = vec![0u8; max - width + extra];
        let err = prepend(width, ByteOrder::Big, &payload).unwrap_err();
        prop_assert!(matches!(err, SluiceError::FrameTooLong { .. }));
    }
}
