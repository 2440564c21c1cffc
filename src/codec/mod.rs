//! Payload (de)serialization, framing, message ids and the message registry.
//!
//! # 模块架构（Why）
//! - 具体编解码库（JSON、Protobuf）明确排除在本 crate 范围之外：核心只依赖
//!   [`Codec`] 这一个最小能力（序列化一个类型擦除的值、把字节反序列化进一个已分配好的
//!   目标），具体实现由宿主应用提供；可选的 `std_json` feature 内建一个
//!   `serde_json` 适配器，方便快速接线和测试。

mod framing;
mod id_parser;
pub mod message;
pub mod registry;

pub use framing::{
    ByteOrder, CombinedDecoder, CombinedEncoder, LengthFieldDecoder, LengthFieldPrepender,
    EXTRA_MSG_FLAG,
};
pub use id_parser::{IdCodec, Uint16IdCodec, Uint32IdCodec, MAX_EXTRA_LEN, MAX_PACKET_LEN};
pub use message::{
    IdEncoderHandler, IdParserHandler, MessageDecoder, MessageDeserializer, MessageEncoder,
    MessageSerializer, RawPacket,
};
pub use registry::{Meta, MessageRegistry, MsgId, SharedRegistry};

use std::any::Any;

use crate::error::SluiceError;

/// The minimal payload (de)serialization capability the framework consumes.
///
/// # 契约说明（What）
/// - `marshal` turns a type-erased application value into wire bytes.
/// - `unmarshal` populates an already-allocated, type-erased target (produced
///   by [`registry::Meta::create_instance`]) from wire bytes, mirroring the
///   original's `codec.Unmarshal(data, msg)` in-place-populate signature rather
///   than returning a freshly constructed value.
pub trait Codec: Send + Sync {
    fn marshal(&self, value: &dyn Any) -> Result<Vec<u8>, SluiceError>;
    fn unmarshal(&self, bytes: &[u8], target: &mut dyn Any) -> Result<(), SluiceError>;
}

/// Builds a [`Codec`] for one concrete `serde`-compatible message type `T`,
/// backed by `serde_json`. Intended to be installed per message type via
/// [`registry::Meta::set_codec`], since [`Codec::marshal`]/[`Codec::unmarshal`]
/// operate on type-erased values and `serde_json` needs a concrete type to
/// dispatch on.
#[cfg(feature = "std_json")]
pub fn json_codec_for<T>() -> std::sync::Arc<dyn Codec>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Any + Send + Sync + 'static,
{
    std::sync::Arc::new(TypedJsonCodec::<T>(std::marker::PhantomData))
}

#[cfg(feature = "std_json")]
struct TypedJsonCodec<T>(std::marker::PhantomData<T>);

#[cfg(feature = "std_json")]
impl<T> Codec for TypedJsonCodec<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Any + Send + Sync + 'static,
{
    fn marshal(&self, value: &dyn Any) -> Result<Vec<u8>, SluiceError> {
        let typed = value
            .downcast_ref::<T>()
            .ok_or_else(|| SluiceError::unsupported("value does not match codec's registered type"))?;
        serde_json::to_vec(typed).map_err(|e| SluiceError::decode(e.to_string()))
    }

    fn unmarshal(&self, bytes: &[u8], target: &mut dyn Any) -> Result<(), SluiceError> {
        let typed = target
            .downcast_mut::<T>()
            .ok_or_else(|| SluiceError::unsupported("target does not match codec's registered type"))?;
        *typed = serde_json::from_slice(bytes).map_err(|e| SluiceError::decode(e.to_string()))?;
        Ok(())
    }
}
