//! Uniform panic containment for every task executed off the caller's own stack.
//!
//! # 设计背景（Why）
//! - `event_loop.go`/`pool.go` 在调用用户回调前都套了一层 `safe.Call`/`exception.Safecall`：
//!   event loop、worker pool、processor dispatch 都不应该因为一个 handler 的 panic 而
//!   整体带崩——拖垮的应当只是那一个任务。这里用同一个 `catch_unwind` 包裹点统一三处。
//!
//! # 契约说明（What）
//! - `run_guarded` 捕获 panic 并记录一条 error 日志，吞掉 panic，不向上传播。
//! - 传入的闭包必须是 `UnwindSafe`；调用方若在闭包里使用了内部可变性（`Mutex`/`Cell`）
//!   通常已经满足这个约束，必要时可用 `AssertUnwindSafe` 包裹。

use std::panic::{self, AssertUnwindSafe};

use tracing::error;

/// Runs `task`, catching any panic and logging it instead of propagating.
pub fn run_guarded<F: FnOnce()>(label: &str, task: F) {
    let result = panic::catch_unwind(AssertUnwindSafe(task));
    if let Err(payload) = result {
        let msg = panic_message(&payload);
        error!(target = label, panic = %msg, "task panicked, contained by fault barrier");
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn contains_panic_without_propagating() {
        run_guarded("test", || panic!("boom"));
    }

    #[test]
    fn runs_task_to_completion_when_no_panic() {
        let ran = AtomicBool::new(false);
        run_guarded("test", || ran.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }
}
