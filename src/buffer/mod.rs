//! Zero-copy dual-ended buffer pair.
//!
//! # 模块架构（Why）
//! - 每个编解码 handler 消费/产出这对缓冲之一；二者刻意保持为具体类型而非 trait
//!   对象，因为协议本身只需要两种形状（只读滑动窗口、带前导余量的可写缓冲），没有
//!   第三种实现需要被抽象掉。
//! - 所有返回的切片借用自 `&self`/`&mut self`，零拷贝契约由借用检查器静态强制：
//!   在持有某次 `bytes()`/`seek()` 返回的切片期间，编译器不允许再次可变借用。
//!
//! # 命名共识（Consistency）
//! - 字段与方法名直接对应 `amsalt/nginet` 的 `bytes.ReadOnlyBuffer`/`bytes.WriteOnlyBuffer`
//!   接口，保留其 `off`/`end`/`start` 术语以便对照原始实现。

mod readable;
mod writable;

pub use readable::ReadOnlyBuffer;
pub use writable::WriteOnlyBuffer;

const DEFAULT_CAPACITY: usize = 1024;
