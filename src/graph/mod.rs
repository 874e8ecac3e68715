//! The frame graph.
//!
//! A [`FrameGraph`] describes one frame as a set of passes declaring how they use
//! resources, then compiles that description into a linear backend command stream with
//! the minimum synchronization required for correctness:
//!
//! - passes are recorded with typed encoders ([`record`]),
//! - the compiler culls, partitions and fuses them ([`compile`]),
//! - the analyzer derives barriers, layout transitions and cross-queue events,
//! - and the executor replays everything into the backend and cycles frame state
//!   ([`executor`]).
//!
//! # Example
//!
//! ```no_run
//! # use deimos::prelude::*;
//! # fn run(context: Context) -> anyhow::Result<()> {
//! let mut graph = FrameGraph::new(&context, 2);
//!
//! let data = Buffer::new(&context, BufferDescriptor::new(256, MemoryType::GpuOnly));
//! data.with_deferred_slice(0..256, |bytes| bytes.fill(0));
//!
//! graph.add_compute_pass("integrate", |enc| {
//!     enc.bind_pipeline("integrate");
//!     enc.write_buffer(&data);
//!     enc.dispatch(4, 1, 1);
//! });
//! graph.execute()?;
//! # Ok(())
//! # }
//! ```

use crate::core::context::Context;
use crate::graph::pass::RenderPassRecord;
use crate::graph::record::FrameCommand;
use crate::sync::frame_completion::InflightFrameSemaphore;

pub(crate) mod analysis;
pub mod compile;
pub mod executor;
pub mod pass;
pub mod record;
pub mod usage;

/// A frame graph instance: records passes, compiles them and submits the frame.
///
/// Recording and compilation are single-threaded per instance. Multiple instances may
/// execute in parallel as long as they do not write the same persistent resources
/// concurrently.
pub struct FrameGraph {
    pub(crate) context: Context,
    pub(crate) inflight: InflightFrameSemaphore,
    pub(crate) recording: bool,
    /// Number of the frame currently being recorded. Frame numbers start at 1.
    pub(crate) frame_index: u64,
    pub(crate) passes: Vec<RenderPassRecord>,
    pub(crate) commands: Vec<FrameCommand>,
    /// Callbacks to run when the frame being recorded completes on the GPU.
    pub(crate) completion_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

impl FrameGraph {
    /// Create a frame graph allowing `inflight_count` frames to be recording or on the
    /// GPU simultaneously.
    pub fn new(context: &Context, inflight_count: u32) -> Self {
        FrameGraph {
            context: context.clone(),
            inflight: InflightFrameSemaphore::new(inflight_count),
            recording: false,
            frame_index: 1,
            passes: Vec::new(),
            commands: Vec::new(),
            completion_callbacks: Vec::new(),
        }
    }

    /// Run `callback` once the frame currently being recorded has fully completed on
    /// the GPU (or was skipped).
    pub fn add_completion_callback(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.completion_callbacks.push(Box::new(callback));
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Number of the frame currently being recorded.
    pub fn current_frame(&self) -> u64 {
        self.frame_index
    }

    /// Number of passes recorded so far this frame.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Block until an inflight slot is free, the first time a frame records anything.
    pub(crate) fn begin_recording(&mut self) {
        if !self.recording {
            self.inflight.acquire();
            self.recording = true;
        }
    }
}
