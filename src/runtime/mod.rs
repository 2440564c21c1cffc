//! Execution primitives: single-threaded executors for ordering/affinity, a
//! bounded thread pool for fan-out work, and a shared panic containment barrier.
//!
//! # 设计背景（Why）
//! - spec 明确要求原生 OS 线程 + 阻塞 I/O 模型（见 SPEC_FULL.md §5），而不是
//!   async/await 运行时：这里的 `EventLoop`/`WorkerPool` 都构建在 `std::thread` 之上。

pub mod event_loop;
pub mod fault_barrier;
pub mod queue;
pub mod worker_pool;

pub use event_loop::EventLoop;
pub use worker_pool::WorkerPool;
