//! End-to-end exercise of a typical pipeline assembly: length-prefixed framing,
//! a fixed-width id, payload (de)serialization, and processor dispatch, driven
//! through a real [`SubChannel`] read/write loop against an in-memory mock
//! transport.
//!
//! # 设计背景（Why）
//! - 单元测试里每个 handler 都是孤立验证的；这里把它们按应用实际会装配的顺序串起来
//!   跑一遍，覆盖“一条真实字节流从 socket 进来，一路被拆帧、解 id、反序列化、分发到
//!   业务回调，业务回调再写回一条应答”这整条路径，这是单测覆盖不到的装配正确性。

use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use sluice_core::buffer::ReadOnlyBuffer;
use sluice_core::channel::{ChannelHandle, SubChannel, SubChannelConfig};
use sluice_core::codec::registry::{MessageRegistry, MsgId, SharedRegistry};
use sluice_core::codec::{
    Codec, IdCodec, LengthFieldDecoder, LengthFieldPrepender, MessageDecoder, MessageEncoder,
    Uint16IdCodec,
};
use sluice_core::dispatch::{ProcessorHandler, ProcessorMgr};
use sluice_core::error::SluiceError;
use sluice_core::pipeline::{Context, HandlerRegistration, InboundHandler, OutboundHandler, PipelineMessage};
use sluice_core::transport::RawConn;

/// Installs a `fmt + EnvFilter` subscriber once per test binary, mirroring the
/// teacher's `tracing_subscriber::registry().with(fmt::layer())` composition
/// minus the OpenTelemetry layer (no collector in a test run). `RUST_LOG`
/// controls verbosity; defaults to `info` so handler-level traces surface on
/// a failing run without extra flags.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

#[derive(Default)]
struct PingMsg(String);

#[derive(Default)]
struct PongMsg(String);

struct TextCodec;

impl Codec for TextCodec {
    fn marshal(&self, value: &dyn Any) -> Result<Vec<u8>, SluiceError> {
        if let Some(v) = value.downcast_ref::<PingMsg>() {
            return Ok(v.0.as_bytes().to_vec());
        }
        if let Some(v) = value.downcast_ref::<PongMsg>() {
            return Ok(v.0.as_bytes().to_vec());
        }
        Err(SluiceError::unsupported("TextCodec: unsupported message type"))
    }

    fn unmarshal(&self, bytes: &[u8], target: &mut dyn Any) -> Result<(), SluiceError> {
        if let Some(v) = target.downcast_mut::<PingMsg>() {
            v.0 = String::from_utf8_lossy(bytes).into_owned();
            return Ok(());
        }
        if let Some(v) = target.downcast_mut::<PongMsg>() {
            v.0 = String::from_utf8_lossy(bytes).into_owned();
            return Ok(());
        }
        Err(SluiceError::unsupported("TextCodec: unsupported message type"))
    }
}

/// A one-shot in-memory transport: delivers a single pre-baked frame on the
/// first `read`, then goes quiet (mirroring an idle peer) so the read loop
/// doesn't spin; records everything written back out.
struct ScriptedConn {
    inbound: StdMutex<Option<Vec<u8>>>,
    outbound: Arc<StdMutex<Vec<u8>>>,
    closed: AtomicBool,
}

impl ScriptedConn {
    fn new(frame: Vec<u8>) -> (Arc<Self>, Arc<StdMutex<Vec<u8>>>) {
        let outbound = Arc::new(StdMutex::new(Vec::new()));
        let conn = Arc::new(ScriptedConn {
            inbound: StdMutex::new(Some(frame)),
            outbound: outbound.clone(),
            closed: AtomicBool::new(false),
        });
        (conn, outbound)
    }
}

impl RawConn for ScriptedConn {
    fn read(&self, buf: &mut ReadOnlyBuffer) -> Result<(), SluiceError> {
        match self.inbound.lock().unwrap().take() {
            Some(frame) => {
                let mut cursor = std::io::Cursor::new(frame);
                buf.read_from(&mut cursor)?;
                Ok(())
            }
            None => {
                std::thread::sleep(Duration::from_secs(3600));
                Ok(())
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), SluiceError> {
        self.outbound.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn close(&self) -> Result<(), SluiceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

fn encode_frame(id_codec: &dyn IdCodec, id: MsgId, payload: &[u8]) -> Vec<u8> {
    let mut body = id_codec.encode(&id).unwrap();
    body.extend_from_slice(payload);
    let frame_length = (body.len() + 4) as u32;
    let mut wire = frame_length.to_be_bytes().to_vec();
    wire.extend_from_slice(&body);
    wire
}

#[test]
fn a_framed_ping_is_decoded_dispatched_and_answered_with_a_pong() {
    init_tracing();

    let registry: SharedRegistry = Arc::new(MessageRegistry::new());
    registry.register::<PingMsg>(1u64);
    registry.register::<PongMsg>(2u64);
    let codec: Arc<dyn Codec> = Arc::new(TextCodec);
    let id_codec: Arc<dyn IdCodec> = Arc::new(Uint16IdCodec::new());

    let processors = Arc::new(ProcessorMgr::new());
    let received = Arc::new(StdMutex::new(Vec::new()));
    let r = received.clone();
    processors
        .register(&registry, &PingMsg::default(), Arc::new(move |ctx: &dyn Context, msg: Box<dyn Any + Send>| {
            let ping = msg.downcast::<PingMsg>().expect("dispatched value should be PingMsg");
            r.lock().unwrap().push(ping.0.clone());
            ctx.write(PipelineMessage::Typed(Box::new(PongMsg(format!("pong:{}", ping.0)))));
        }))
        .unwrap();

    let frame = encode_frame(id_codec.as_ref(), MsgId::Numeric(1), b"hi");
    let (conn, outbound) = ScriptedConn::new(frame);

    let reg = registry.clone();
    let idc = id_codec.clone();
    let cdc = codec.clone();
    let sc = SubChannel::new(conn, SubChannelConfig::default(), None, move |pipeline| {
        pipeline.add_last(HandlerRegistration::inbound(
            "framing-decode",
            Arc::new(LengthFieldDecoder::new(4)),
        ));
        pipeline.add_last(HandlerRegistration::inbound(
            "message-decode",
            Arc::new(MessageDecoder::new(idc.clone(), reg.clone(), cdc.clone())),
        ));
        pipeline.add_last(HandlerRegistration::inbound(
            "processor-dispatch",
            Arc::new(ProcessorHandler::new(processors.clone())),
        ));
        pipeline.add_last(HandlerRegistration::outbound(
            "framing-encode",
            Arc::new(LengthFieldPrepender::new(4)) as Arc<dyn OutboundHandler>,
        ));
        pipeline.add_last(HandlerRegistration::outbound(
            "message-encode",
            Arc::new(MessageEncoder::new(idc.clone(), reg.clone(), cdc.clone())) as Arc<dyn OutboundHandler>,
        ));
    });

    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(received.lock().unwrap().as_slice(), ["hi".to_string()]);

    let expected_payload = b"pong:hi";
    let expected_body = {
        let mut b = id_codec.encode(&MsgId::Numeric(2)).unwrap();
        b.extend_from_slice(expected_payload);
        b
    };
    let expected_wire = {
        let mut w = ((expected_body.len() + 4) as u32).to_be_bytes().to_vec();
        w.extend_from_slice(&expected_body);
        w
    };
    assert_eq!(outbound.lock().unwrap().as_slice(), expected_wire.as_slice());

    sc.close();
}
