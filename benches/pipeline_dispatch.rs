use std::env;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use criterion::{black_box, Criterion};
use sluice_core::channel::{AttrMap, ChannelHandle};
use sluice_core::codec::registry::MsgId;
use sluice_core::error::SluiceError;
use sluice_core::pipeline::{
    Context, HandlerRegistration, InboundHandler, Pipeline, PipelineMessage,
};
use sluice_core::transport::RawConn;

/// A channel handle with no backing connection, used only to anchor a
/// [`Pipeline`] for benchmarking handler dispatch in isolation from any real
/// socket I/O.
struct NoopChannel {
    id: String,
    attr: AttrMap,
    pipeline: OnceLock<Pipeline>,
}

impl NoopChannel {
    fn new() -> Arc<Self> {
        let channel = Arc::new(NoopChannel {
            id: "bench-channel".to_string(),
            attr: AttrMap::new(),
            pipeline: OnceLock::new(),
        });
        let handle: Arc<dyn ChannelHandle> = channel.clone();
        let pipeline = Pipeline::new(handle);
        channel
            .pipeline
            .set(pipeline)
            .unwrap_or_else(|_| unreachable!("pipeline set exactly once in NoopChannel::new"));
        channel
    }
}

impl ChannelHandle for NoopChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn attr(&self) -> &AttrMap {
        &self.attr
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline.get().expect("pipeline initialized in new").clone()
    }

    fn raw_conn(&self) -> Option<Arc<dyn RawConn>> {
        None
    }

    fn write(&self, _msg: PipelineMessage) -> Result<(), SluiceError> {
        Ok(())
    }

    fn close(&self) {}

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Counts reads instead of doing anything with them, so the benchmark isolates
/// pipeline traversal cost from handler-body cost.
struct CountingHandler;

impl InboundHandler for CountingHandler {
    fn on_read(&self, ctx: &dyn Context, msg: PipelineMessage) {
        ctx.fire_read(msg);
    }
}

/// Measures the cost of a `fire_read` traversing a five-handler pipeline, the
/// shape a typical framing+codec+dispatch stack assembles into.
///
/// # 设计背景（Why）
/// - The pipeline is an `ArcSwap`-backed arena walked by index on every event;
///   this benchmark is the guard against that traversal regressing as the
///   handler count the framework is expected to support in practice grows.
fn bench_five_handler_pipeline_dispatch(c: &mut Criterion) {
    let channel = NoopChannel::new();
    let pipeline = channel.pipeline();
    for i in 0..5 {
        pipeline.add_last(HandlerRegistration::inbound(
            format!("counter-{i}"),
            Arc::new(CountingHandler),
        ));
    }

    c.bench_function("five_handler_pipeline_dispatch", |b| {
        b.iter(|| {
            pipeline.fire_read(PipelineMessage::IdValue(MsgId::Numeric(black_box(1))));
        });
    });
}

fn main() {
    let mut quick_mode = false;
    for arg in env::args().skip(1) {
        if arg == "--quick" {
            quick_mode = true;
        }
    }

    let mut criterion = Criterion::default();
    if quick_mode {
        criterion = criterion
            .sample_size(10)
            .warm_up_time(Duration::from_millis(100))
            .measurement_time(Duration::from_millis(250));
    }

    bench_five_handler_pipeline_dispatch(&mut criterion);
    criterion.final_summary();
}
