#![deny(unsafe_code)]
#![doc = "sluice-core：基于拦截过滤器（Intercepting Filter）模式的双向网络通信框架核心。"]
#![doc = ""]
#![doc = "每条连接独立持有一条 handler 管线，入站事件沿管线从头向尾传播，出站事件从尾向头"]
#![doc = "传播；框架本身不对管线中间插入任何隐式逻辑，所有编解码、空闲检测、加解密、消息"]
#![doc = "分发都由可插拔的 handler 组成。执行模型是线程阻塞 I/O：每条连接各自的读循环"]
#![doc = "跑在一条专属操作系统线程上，配合单线程事件循环（[`runtime::EventLoop`]）承载对"]
#![doc = "顺序敏感的回调；CPU 密集型工作可以通过 [`runtime::WorkerPool`] 派发到有界线程池。"]

pub mod buffer;
pub mod channel;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod pipeline;
pub mod runtime;
pub mod transport;

pub use error::SluiceError;
