//! Logical submission queues.
//!
//! A [`Queue`] is a submission lane with a monotone timeline counter mirroring the
//! backend's timeline semaphore. The frame graph assigns passes to queues, partitions
//! command buffers per queue, and bumps the timeline once per submitted command buffer;
//! the backend signals the same values as the GPU retires them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Queues are divided into three types, mirroring the common hardware queue families.
///
/// A graphics queue accepts draw, compute and blit work; a compute queue accepts compute
/// and blit work; a transfer queue accepts blit work only.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// A logical submission lane. Cheap to clone; clones share the timeline.
#[derive(Debug, Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    index: u32,
    queue_type: QueueType,
    /// Timeline value of the most recently submitted command buffer.
    last_submitted: AtomicU64,
    /// Timeline value the backend has reported as reached.
    last_completed: AtomicU64,
}

impl Queue {
    pub(crate) fn new(index: u32, queue_type: QueueType) -> Self {
        Queue {
            inner: Arc::new(QueueInner {
                index,
                queue_type,
                last_submitted: AtomicU64::new(0),
                last_completed: AtomicU64::new(0),
            }),
        }
    }

    /// Position of this queue in the context's queue list.
    pub fn index(&self) -> u32 {
        self.inner.index
    }

    pub fn queue_type(&self) -> QueueType {
        self.inner.queue_type
    }

    /// Reserve the next timeline value for a command buffer about to be submitted on this
    /// queue, and return it. The backend signals this value when the command buffer
    /// retires.
    pub(crate) fn advance_submitted(&self) -> u64 {
        self.inner.last_submitted.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Timeline value of the most recently submitted command buffer.
    pub fn last_submitted(&self) -> u64 {
        self.inner.last_submitted.load(Ordering::Relaxed)
    }

    /// Record that the backend reached `value` on this queue's timeline.
    pub(crate) fn mark_completed(&self, value: u64) {
        // Completion callbacks can arrive out of order across command buffers.
        self.inner.last_completed.fetch_max(value, Ordering::Relaxed);
    }

    /// Timeline value the backend has reported as reached.
    pub fn last_completed(&self) -> u64 {
        self.inner.last_completed.load(Ordering::Relaxed)
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.inner.index == other.inner.index
    }
}

impl Eq for Queue {}
