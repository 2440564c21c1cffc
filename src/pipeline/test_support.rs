//! Test-only [`Context`] double shared by unit tests across `codec`/`middleware`
//! handlers so each module doesn't hand-roll its own fixture.
//!
//! # 设计背景（Why）
//! - 大多数 handler 单测只关心“这个 handler 调用了哪个 `fire_*`、传了什么负载”，
//!   不关心管线里的下一个 context 是谁；`RecordingContext` 把传播动作替换成一次
//!   记录，省去在每个测试文件里重新搭建一整条 `Pipeline` + `ChannelHandle`。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::ChannelHandle;
use crate::error::SluiceError;

use super::handler::Context;
use super::message::{PipelineMessage, UserEvent};

#[derive(Default)]
pub struct RecordingContext {
    reads: Mutex<Vec<PipelineMessage>>,
    writes: Mutex<Vec<PipelineMessage>>,
    errors: Mutex<Vec<SluiceError>>,
    connects: Mutex<usize>,
    disconnects: Mutex<usize>,
    events: Mutex<Vec<UserEvent>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads_fired(&self) -> usize {
        self.reads.lock().len()
    }

    pub fn writes_fired(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn errors_fired(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn connects_fired(&self) -> usize {
        *self.connects.lock()
    }

    pub fn disconnects_fired(&self) -> usize {
        *self.disconnects.lock()
    }

    /// Pops the single most recent fired read, for tests that expect exactly one.
    pub fn take_read(&self) -> Option<PipelineMessage> {
        self.reads.lock().pop()
    }

    pub fn take_write(&self) -> Option<PipelineMessage> {
        self.writes.lock().pop()
    }

    pub fn take_error(&self) -> Option<SluiceError> {
        self.errors.lock().pop()
    }
}

impl Context for RecordingContext {
    fn name(&self) -> &str {
        "recording-test-context"
    }

    fn channel(&self) -> &Arc<dyn ChannelHandle> {
        unimplemented!("RecordingContext does not back a real channel")
    }

    fn fire_connect(&self) {
        *self.connects.lock() += 1;
    }

    fn fire_disconnect(&self) {
        *self.disconnects.lock() += 1;
    }

    fn fire_read(&self, msg: PipelineMessage) {
        self.reads.lock().push(msg);
    }

    fn fire_error(&self, err: SluiceError) {
        self.errors.lock().push(err);
    }

    fn fire_event(&self, evt: UserEvent) {
        self.events.lock().push(evt);
    }

    fn fire_write(&self, msg: PipelineMessage) {
        self.writes.lock().push(msg);
    }

    fn write(&self, msg: PipelineMessage) {
        self.writes.lock().push(msg);
    }

    fn close(&self) {}
}
