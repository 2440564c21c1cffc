//! A reusable, size-capped pool of worker threads with idle-worker reaping.
//!
//! # 设计背景（Why）
//! - 原始实现维护一个按“归还时间”排序的空闲 worker 栈：`applyW` 从栈顶弹出复用
//!   （后进先出，最近归还的最先被复用），而 `clearW` 从栈底（最早归还、最久未被复用）
//!   开始回收，一旦遇到第一个尚未超过 `clearWorkerInterval` 的 worker 就停止——因为
//!   插入顺序即归还时间顺序，后面的只会更“新鲜”。这个“遇新即停”的提前退出在 Rust 里
//!   原样保留，而不是无条件扫描整个空闲列表。
//!
//! # 契约说明（What）
//! - `execute` 在容量未满时按需新建 worker 线程；容量已满且无空闲 worker 时阻塞调用方，
//!   直到有 worker 归还。
//! - `stop` 幂等：关闭所有空闲 worker 线程；正在执行任务的 worker 完成后发现池已关闭，
//!   自行退出而不归还到空闲列表。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::SluiceError;

use super::fault_barrier::run_guarded;
use super::queue::Task;

struct WorkerHandle {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    join: Mutex<Option<JoinHandle<()>>>,
    returned_at: Mutex<Instant>,
}

impl WorkerHandle {
    fn spawn(inner: Arc<Inner>) -> Arc<WorkerHandle> {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = Arc::new(WorkerHandle {
            sender: Mutex::new(Some(tx)),
            join: Mutex::new(None),
            returned_at: Mutex::new(Instant::now()),
        });
        let handle_for_thread = handle.clone();
        let join = std::thread::Builder::new()
            .name("sluice-pool-worker".to_string())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    run_guarded("worker", task);
                    inner.return_worker(handle_for_thread.clone());
                }
            })
            .expect("failed to spawn pool worker thread");
        *handle.join.lock() = Some(join);
        handle
    }

    fn send(&self, task: Task) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }

    fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

struct Inner {
    capacity: AtomicUsize,
    running: AtomicUsize,
    closed: AtomicBool,
    free: Mutex<VecDeque<Arc<WorkerHandle>>>,
    has_free_or_capacity: Condvar,
}

impl Inner {
    fn return_worker(&self, handle: Arc<WorkerHandle>) {
        if self.closed.load(Ordering::SeqCst) {
            handle.shutdown();
            self.running.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        *handle.returned_at.lock() = Instant::now();
        self.free.lock().push_back(handle);
        self.has_free_or_capacity.notify_one();
    }

    /// Reaps idle workers older than `interval`, stopping at the first worker
    /// that is still fresh (the free list is insertion-ordered by return time).
    fn reap_idle(&self, interval: Duration) {
        let mut free = self.free.lock();
        let now = Instant::now();
        while let Some(oldest) = free.front() {
            if now.duration_since(*oldest.returned_at.lock()) < interval {
                break;
            }
            let worker = free.pop_front().unwrap();
            drop(free);
            worker.shutdown();
            self.running.fetch_sub(1, Ordering::SeqCst);
            free = self.free.lock();
        }
    }
}

/// A bounded pool of reusable worker threads, mirroring `pool.Pool`.
pub struct WorkerPool {
    inner: Arc<Inner>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Self::with_clear_interval(capacity, Duration::from_secs(60))
    }

    pub fn with_clear_interval(capacity: usize, clear_worker_interval: Duration) -> Arc<Self> {
        let inner = Arc::new(Inner {
            capacity: AtomicUsize::new(capacity),
            running: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            free: Mutex::new(VecDeque::new()),
            has_free_or_capacity: Condvar::new(),
        });

        let reaper_inner = inner.clone();
        let reaper = std::thread::Builder::new()
            .name("sluice-pool-reaper".to_string())
            .spawn(move || loop {
                std::thread::sleep(clear_worker_interval);
                if reaper_inner.closed.load(Ordering::SeqCst) {
                    return;
                }
                reaper_inner.reap_idle(clear_worker_interval);
            })
            .expect("failed to spawn pool reaper thread");

        Arc::new(WorkerPool {
            inner,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Adjusts the pool's worker capacity. Shrinking does not kill running workers;
    /// it only stops new ones from being started until `running` falls back under
    /// the new capacity.
    pub fn set_size(&self, capacity: usize) {
        self.inner.capacity.store(capacity, Ordering::SeqCst);
    }

    /// Runs `task` on a pooled worker thread, blocking the caller only if the pool
    /// is at capacity and no worker is free.
    pub fn execute(&self, task: Task) -> Result<(), SluiceError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(SluiceError::ConnLost);
        }

        let mut free = self.inner.free.lock();
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(SluiceError::ConnLost);
            }
            if let Some(worker) = free.pop_back() {
                drop(free);
                if !worker.send(task) {
                    warn!("pool worker channel unexpectedly closed, task dropped");
                    return Err(SluiceError::ConnLost);
                }
                return Ok(());
            }
            if self.inner.running.load(Ordering::SeqCst) < self.inner.capacity.load(Ordering::SeqCst) {
                drop(free);
                self.inner.running.fetch_add(1, Ordering::SeqCst);
                let worker = WorkerHandle::spawn(self.inner.clone());
                if !worker.send(task) {
                    warn!("freshly spawned pool worker rejected its first task");
                    return Err(SluiceError::ConnLost);
                }
                return Ok(());
            }
            self.inner.has_free_or_capacity.wait(&mut free);
        }
    }

    /// Stops the pool: idle workers and the reaper thread are shut down. Already
    /// running workers finish their current task and then exit instead of
    /// returning to the free list. Idempotent.
    pub fn stop(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<_> = self.inner.free.lock().drain(..).collect();
        for worker in drained {
            worker.shutdown();
            self.inner.running.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.has_free_or_capacity.notify_all();
        if let Some(join) = self.reaper.lock().take() {
            let _ = join.join();
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as AU;
    use std::sync::Arc as A;

    #[test]
    fn runs_tasks_up_to_capacity_without_blocking() {
        let pool = WorkerPool::new(2);
        let counter = A::new(AU::new(0));
        for _ in 0..2 {
            let c = counter.clone();
            pool.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reuses_returned_workers() {
        let pool = WorkerPool::new(1);
        for _ in 0..5 {
            pool.execute(Box::new(|| {})).unwrap();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pool.inner.running.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent_and_rejects_further_work() {
        let pool = WorkerPool::new(1);
        pool.stop();
        pool.stop();
        assert!(pool.execute(Box::new(|| {})).is_err());
    }
}
