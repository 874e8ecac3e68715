//! Frame completion tracking.
//!
//! The frame graph stamps every persistent resource it touches with the index of the
//! frame that touched it. CPU access to those resources then blocks on
//! [`FrameCompletion::wait_for_frame`] until the backend reports the corresponding
//! timeline value, which makes cross-frame hazards impossible without any per-resource
//! fences.
//!
//! Frames are numbered from 1; frame 0 is "nothing has completed yet".

use std::sync::{Arc, Condvar, Mutex};

/// Process-wide monotonically increasing counter of the last frame whose GPU work has
/// fully completed. Cheap to clone; all clones observe the same counter.
#[derive(Debug, Clone, Default)]
pub struct FrameCompletion {
    inner: Arc<CompletionInner>,
}

#[derive(Debug, Default)]
struct CompletionInner {
    frame: Mutex<u64>,
    cond: Condvar,
}

impl FrameCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last frame known to have completed on the GPU.
    pub fn last_completed_frame(&self) -> u64 {
        *self.inner.frame.lock().unwrap()
    }

    /// Block until `frame` has completed. Returns immediately if it already has.
    pub fn wait_for_frame(&self, frame: u64) {
        let mut completed = self.inner.frame.lock().unwrap();
        while *completed < frame {
            completed = self.inner.cond.wait(completed).unwrap();
        }
    }

    /// Advance the counter after the backend reports completion of `frame`. The counter
    /// never moves backwards.
    pub(crate) fn advance_to(&self, frame: u64) {
        let mut completed = self.inner.frame.lock().unwrap();
        if frame > *completed {
            *completed = frame;
            self.inner.cond.notify_all();
        }
    }
}

/// Counting semaphore gating how many frames may be recording or in flight on the GPU at
/// once. Acquired before a frame starts recording, released when its GPU work completes.
#[derive(Debug, Clone)]
pub struct InflightFrameSemaphore {
    inner: Arc<SemaphoreInner>,
}

#[derive(Debug)]
struct SemaphoreInner {
    available: Mutex<u32>,
    cond: Condvar,
}

impl InflightFrameSemaphore {
    pub fn new(inflight_count: u32) -> Self {
        assert!(inflight_count > 0, "at least one frame must be allowed in flight");
        InflightFrameSemaphore {
            inner: Arc::new(SemaphoreInner {
                available: Mutex::new(inflight_count),
                cond: Condvar::new(),
            }),
        }
    }

    /// Block until a frame slot is available, then take it.
    pub fn acquire(&self) {
        let mut available = self.inner.available.lock().unwrap();
        while *available == 0 {
            available = self.inner.cond.wait(available).unwrap();
        }
        *available -= 1;
    }

    /// Return a frame slot.
    pub fn signal(&self) {
        let mut available = self.inner.available.lock().unwrap();
        *available += 1;
        self.inner.cond.notify_one();
    }
}
