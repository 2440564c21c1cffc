//! The blocking task queue backing [`super::event_loop::EventLoop`].
//!
//! # 设计背景（Why）
//! - 原始实现里 `evtQueue` 支持 `PollAll`：消费者线程一次性把队列中当前所有任务取走再
//!   逐个执行，而不是每取一个任务就唤醒一次，减少锁竞争。`None` 作为停机哨兵任务随
//!   `Stop()` 一起入队，消费者线程看到它就退出循环。

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

enum Slot {
    Task(Task),
    Stop,
}

pub(crate) struct TaskQueue {
    inner: Mutex<VecDeque<Slot>>,
    ready: Condvar,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        TaskQueue {
            inner: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, task: Task) {
        let mut guard = self.inner.lock();
        guard.push_back(Slot::Task(task));
        self.ready.notify_one();
    }

    pub(crate) fn push_stop(&self) {
        let mut guard = self.inner.lock();
        guard.push_back(Slot::Stop);
        self.ready.notify_one();
    }

    /// Blocks until at least one slot is queued, then drains everything currently
    /// present. Returns `false` once a stop sentinel has been drained, meaning the
    /// caller should not poll again.
    pub(crate) fn poll_all(&self, out: &mut Vec<Task>) -> bool {
        let mut guard = self.inner.lock();
        while guard.is_empty() {
            self.ready.wait(&mut guard);
        }
        let mut keep_running = true;
        while let Some(slot) = guard.pop_front() {
            match slot {
                Slot::Task(t) => out.push(t),
                Slot::Stop => {
                    keep_running = false;
                    break;
                }
            }
        }
        keep_running
    }
}
