//! Asynchronous frames.
//!
//! A [`RenderTask`] is the handle of one frame running on a background
//! thread. The thread and the handle share a [`FrameControl`]: a mutex
//! protected status plus a condition variable for waiters, and lock-free
//! counters for cancellation and progress.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::error::{RenderError, Result};

/// Milestones of a frame, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SyncEvent {
    #[default]
    None,
    /// All tiles have been rendered and accumulated
    WorldRendered,
    /// The renderer's end-of-frame work is done
    FrameFinished,
    /// The task is over and its result is available
    TaskFinished,
}

/// Lifecycle of a [`RenderTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Cancelled)
    }
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    reached: SyncEvent,
    result: Option<Result<f32>>,
}

/// State shared between a frame in flight and its observers.
#[derive(Debug)]
pub struct FrameControl {
    state: Mutex<TaskState>,
    changed: Condvar,
    cancelled: AtomicBool,
    started: AtomicBool,
    total_tiles: AtomicUsize,
    completed_tiles: AtomicUsize,
}

impl Default for FrameControl {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                reached: SyncEvent::None,
                result: None,
            }),
            changed: Condvar::new(),
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            total_tiles: AtomicUsize::new(0),
            completed_tiles: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        // Waiters only read plain values, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Record the tile count of the frame about to run.
    pub(crate) fn begin(&self, total_tiles: usize) {
        self.completed_tiles.store(0, Ordering::Relaxed);
        self.total_tiles.store(total_tiles, Ordering::Release);
    }

    /// Called by every tile job; only the first one takes the lock.
    pub(crate) fn mark_running(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.lock();
        if state.status == TaskStatus::Pending {
            state.status = TaskStatus::Running;
        }
    }

    pub(crate) fn tile_done(&self) {
        self.completed_tiles.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark `event` (and every earlier event) as reached.
    pub(crate) fn signal(&self, event: SyncEvent) {
        let mut state = self.lock();
        if event > state.reached {
            state.reached = event;
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Store the outcome and wake every waiter.
    pub(crate) fn finish(&self, status: TaskStatus, result: Result<f32>) {
        let mut state = self.lock();
        state.status = status;
        state.result = Some(result);
        state.reached = SyncEvent::TaskFinished;
        drop(state);
        self.changed.notify_all();
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn is_ready(&self, event: SyncEvent) -> bool {
        self.lock().reached >= event
    }

    /// Block until `event` is reached. Returns immediately once the task
    /// has finished, whatever event was asked for.
    pub fn wait(&self, event: SyncEvent) {
        let mut state = self.lock();
        while state.reached < event && state.reached != SyncEvent::TaskFinished {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Fraction of tiles finished, in [0, 1].
    pub fn progress(&self) -> f32 {
        if self.is_ready(SyncEvent::WorldRendered) {
            return 1.0;
        }
        let total = self.total_tiles.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        let done = self.completed_tiles.load(Ordering::Acquire).min(total);
        done as f32 / total as f32
    }

    pub fn result(&self) -> Option<Result<f32>> {
        self.lock().result.clone()
    }
}

/// Handle of a frame rendering in the background.
///
/// Dropping the handle does not cancel the frame; the thread keeps running
/// to completion and releases the framebuffer and world afterwards.
#[derive(Debug)]
pub struct RenderTask {
    control: Arc<FrameControl>,
    handle: Option<JoinHandle<()>>,
}

impl RenderTask {
    pub(crate) fn new(control: Arc<FrameControl>, handle: JoinHandle<()>) -> Self {
        Self {
            control,
            handle: Some(handle),
        }
    }

    pub fn is_ready(&self, event: SyncEvent) -> bool {
        self.control.is_ready(event)
    }

    pub fn wait(&self, event: SyncEvent) {
        self.control.wait(event);
    }

    /// Ask the frame to stop. Tiles in progress finish; no new tile starts.
    /// Safe to call any number of times, from any thread.
    pub fn cancel(&self) {
        if !self.control.is_cancelled() {
            log::debug!("Render task cancel requested");
        }
        self.control.request_cancel();
    }

    pub fn progress(&self) -> f32 {
        self.control.progress()
    }

    pub fn status(&self) -> TaskStatus {
        self.control.status()
    }

    /// The frame's result once the task has finished. A cancelled frame
    /// reports the variance of the last completed frame.
    pub fn result(&self) -> Option<Result<f32>> {
        self.control.result()
    }

    /// Wait for the task to finish and return its result.
    pub fn wait_result(mut self) -> Result<f32> {
        self.control.wait(SyncEvent::TaskFinished);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| RenderError::Threading("render thread panicked".into()))?;
        }
        self.control
            .result()
            .unwrap_or_else(|| {
                Err(RenderError::Threading("render task ended without a result".into()))
            })
    }
}
