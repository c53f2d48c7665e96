use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ActionOutcome;

/// Emitted once per attempted action, in plan order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub action_index: usize,
    pub total: usize,
    pub path: PathBuf,
    pub outcome: ActionOutcome,
}

/// Receives progress events while a plan executes
pub trait ProgressSink {
    fn emit(&self, event: ProgressEvent);
}

impl ProgressSink for Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is watching
        let _ = self.send(event);
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Unbounded event channel; the executor never blocks on a slow consumer
pub fn channel() -> (Sender<ProgressEvent>, Receiver<ProgressEvent>) {
    crossbeam_channel::unbounded()
}

/// Cooperative cancellation flag shared between the caller and the executor.
/// Checked between actions, never in the middle of one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
