//! Channel objects: the four connection-endpoint roles (Acceptor, Connector,
//! SubChannel, BaseChannel), the attribute map, and channel id generation.
//!
//! # 模块架构（Why）
//! - 四种角色共享同一个最小能力集合 [`ChannelHandle`]（见 [`base`]），各自只在
//!   它们真正具备的那部分行为上有差异：`Acceptor`/`Connector` 没有自己的单个
//!   `RawConn`，只用管线承载 connect/disconnect/error 这几类生命周期事件；
//!   `SubChannel` 才真正拥有连接、跑读写循环。

mod acceptor;
mod attr;
mod base;
mod connector;
mod subchannel;

pub use acceptor::{Acceptor, AcceptorConfig, ChannelInitializer};
pub use attr::AttrMap;
pub use base::{generate_channel_id, BaseChannel, ChannelHandle, SubChannelConfig};
pub use connector::Connector;
pub use subchannel::{Dialer, SubChannel};
