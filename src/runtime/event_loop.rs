//! A single-threaded task executor providing ordering and executor-affinity
//! guarantees to pipeline contexts that request them.
//!
//! # 设计背景（Why）
//! - 每个 `ContextEntry` 可以选择绑定一个 [`EventLoop`]：一旦绑定，落在该 context 上的
//!   入站/出站事件都改派到这一个线程串行执行，而不是在触发事件的线程（可能是读循环、
//!   也可能是另一个 event loop）上直接内联运行。这是 Netty `EventExecutor` 亲和性在
//!   Rust 里的等价物，直接对应原始实现里 `aio.EventLoop`。
//! - 消费者线程一次 `poll_all` 取走队列里当前所有任务，逐个套 [`fault_barrier`] 执行，
//!   任何单个任务的 panic 都不会打断后续任务或整条线程。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use super::fault_barrier::run_guarded;
use super::queue::{Task, TaskQueue};

/// A single-threaded, FIFO task executor. Cheap to create; typically one per
/// logical "lane" a pipeline wants serialized (e.g. one per connection, or one
/// shared across a group of connections that must not interleave).
pub struct EventLoop {
    name: String,
    queue: Arc<TaskQueue>,
    stopped: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Spawns the backing consumer thread and returns a handle to it.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let queue = Arc::new(TaskQueue::new());
        let stopped = Arc::new(AtomicBool::new(false));

        let loop_queue = queue.clone();
        let loop_name = name.clone();
        let worker = std::thread::Builder::new()
            .name(format!("sluice-event-loop-{loop_name}"))
            .spawn(move || {
                let mut batch = Vec::new();
                loop {
                    batch.clear();
                    if !loop_queue.poll_all(&mut batch) {
                        for task in batch {
                            run_guarded(&loop_name, task);
                        }
                        debug!(event_loop = %loop_name, "event loop stopped");
                        return;
                    }
                    for task in batch.drain(..) {
                        run_guarded(&loop_name, task);
                    }
                }
            })
            .expect("failed to spawn event loop thread");

        Arc::new(EventLoop {
            name,
            queue,
            stopped,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schedules `task` to run on this loop's thread. Never blocks the caller.
    pub fn execute(&self, task: Task) {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(event_loop = %self.name, "execute() called after stop, task dropped");
            return;
        }
        self.queue.push(task);
    }

    /// Runs `task` every `period`, starting after `initial_delay`, until the loop
    /// is stopped. Mirrors `ScheduleAtFixedRate`: the next firing is scheduled
    /// from the previous firing's start time, independent of how long the task took.
    pub fn schedule_at_fixed_rate<F>(self: &Arc<Self>, initial_delay: Duration, period: Duration, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let this = self.clone();
        let task = Arc::new(task);
        std::thread::spawn(move || {
            std::thread::sleep(initial_delay);
            loop {
                if this.stopped.load(Ordering::SeqCst) {
                    return;
                }
                let t = task.clone();
                this.execute(Box::new(move || t()));
                std::thread::sleep(period);
            }
        });
    }

    /// Runs `task` repeatedly with `delay` between the end of one run and the
    /// start of the next. Mirrors `ScheduleAtFixedDelay`.
    pub fn schedule_at_fixed_delay<F>(self: &Arc<Self>, initial_delay: Duration, delay: Duration, task: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        // Queue dispatch is async, so "end of run" can't be observed from here;
        // fixed-delay and fixed-rate coincide in this executor. Callers that need
        // true post-completion delay (e.g. idle timers) compute their own rearm
        // logic, as `middleware::idle::IdleStateHandler` does.
        self.schedule_at_fixed_rate(initial_delay, delay, task);
    }

    /// Stops accepting new work, drains and runs whatever is already queued, then
    /// joins the consumer thread. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.push_stop();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn executes_tasks_in_fifo_order() {
        let loop_ = EventLoop::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = seen.clone();
            loop_.execute(Box::new(move || seen.lock().push(i)));
        }
        loop_.stop();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn panicking_task_does_not_stop_subsequent_tasks() {
        let loop_ = EventLoop::new("test");
        let counter = Arc::new(AtomicUsize::new(0));
        loop_.execute(Box::new(|| panic!("boom")));
        let c = counter.clone();
        loop_.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        loop_.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let loop_ = EventLoop::new("test");
        loop_.stop();
        loop_.stop();
    }
}
