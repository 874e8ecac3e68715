//! The backend contract.
//!
//! The frame graph core never talks to a graphics API directly. Everything it needs from
//! one is captured by the [`Backend`] trait: materialising and freeing resources, mapping
//! buffer memory, replaying recorded commands and compacted resource commands into
//! command buffers, and submitting those with a timeline signal value.
//!
//! Barriers and events are described with plain-old-data mirrors of the
//! `VK_KHR_synchronization2` structures, so a stream of [`ResourceCommand`]s can be
//! stored, sorted and replayed without carrying raw pointers around.

use std::ops::Range;
use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::graph::compile::{CompiledRenderPass, EncoderKind};
use crate::graph::record::FrameCommand;
use crate::resource::descriptor::{BufferDescriptor, TextureDescriptor, TextureRegion};
use crate::resource::handle::ResourceHandle;
use crate::sync::queue::Queue;

/// Identifies an event primitive within one frame. The backend maps indices to real
/// event objects and may recycle them across frames.
pub type EventIndex = u32;

/// A global execution/memory dependency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryBarrierInfo {
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// A dependency on a byte range of one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBarrierInfo {
    pub buffer: ResourceHandle,
    pub range: Range<vk::DeviceSize>,
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

/// A dependency on a texture, optionally transitioning its layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBarrierInfo {
    pub texture: ResourceHandle,
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

/// A backend-ready resource command, emitted by the dependency analyzer and replayed by
/// the executor at a specific command index.
#[derive(Debug)]
pub enum ResourceCommand {
    /// Allocate or alias backing memory for a transient buffer, with the union of usage
    /// flags over every declared usage this frame.
    MaterialiseBuffer {
        buffer: ResourceHandle,
        usage: vk::BufferUsageFlags,
    },
    /// Allocate or alias backing memory for a transient texture.
    MaterialiseTexture {
        texture: ResourceHandle,
        usage: vk::ImageUsageFlags,
    },
    /// Release a resource after its last use this frame.
    DisposeResource {
        resource: ResourceHandle,
    },
    /// A pipeline barrier with tightly packed per-kind sub-arrays.
    PipelineBarrier {
        memory: Vec<MemoryBarrierInfo>,
        buffers: Vec<BufferBarrierInfo>,
        images: Vec<ImageBarrierInfo>,
    },
    /// Signal an event after the source stages complete.
    SignalEvent {
        event: EventIndex,
        stages: vk::PipelineStageFlags2,
    },
    /// Wait on events, applying the attached barriers.
    WaitForEvents {
        events: Vec<EventIndex>,
        memory: Vec<MemoryBarrierInfo>,
        buffers: Vec<BufferBarrierInfo>,
        images: Vec<ImageBarrierInfo>,
    },
}

/// Whether a resource command executes before or after the command it is attached to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PlacementOrder {
    Before,
    After,
}

/// A [`ResourceCommand`] pinned to its position in the frame command stream.
#[derive(Debug)]
pub struct CompactedResourceCommand {
    /// Index into the frame's recorded command list.
    pub command: u32,
    pub order: PlacementOrder,
    pub command_data: ResourceCommand,
}

/// Callback invoked by the backend when a submitted command buffer completes (or fails).
pub type CompletionCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Everything the core requires from a graphics backend. Implementations are internally
/// synchronized; the core calls them from the thread executing the frame graph.
pub trait Backend: Send + Sync {
    // --- Resource lifetime -------------------------------------------------------------

    /// Allocate (or alias) backing memory for a buffer. Called for transient buffers at
    /// their first active usage, and for persistent buffers at creation.
    fn materialise_buffer(
        &self,
        buffer: ResourceHandle,
        descriptor: &BufferDescriptor,
        usage: vk::BufferUsageFlags,
    ) -> Result<()>;

    /// Allocate (or alias) backing memory for a texture.
    fn materialise_texture(
        &self,
        texture: ResourceHandle,
        descriptor: &TextureDescriptor,
        usage: vk::ImageUsageFlags,
    ) -> Result<()>;

    /// True if backing memory exists for `resource`.
    fn is_materialised(&self, resource: ResourceHandle) -> bool;

    /// Free the backing store of `resource`. Never called for resources with external
    /// ownership.
    fn dispose_resource(&self, resource: ResourceHandle);

    // --- Host access -------------------------------------------------------------------

    /// Map `range` of a host-visible buffer. Fails on buffers without host-visible
    /// memory.
    fn map_buffer(
        &self,
        buffer: ResourceHandle,
        range: Range<vk::DeviceSize>,
    ) -> Result<NonNull<u8>>;

    /// Flush a written range of a mapped buffer to the device.
    fn did_modify_range(&self, buffer: ResourceHandle, range: Range<vk::DeviceSize>);

    /// Copy `data` into a region of a texture from the CPU.
    fn replace_texture_region(
        &self,
        texture: ResourceHandle,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<()>;

    /// Copy a region of a texture out to CPU memory.
    fn copy_texture_region(
        &self,
        texture: ResourceHandle,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<()>;

    // --- Command recording -------------------------------------------------------------

    /// Ensure `count` event primitives exist for this frame.
    fn prepare_events(&self, count: u32);

    fn begin_command_buffer(&self, index: u32, queue: &Queue);

    fn begin_render_pass(&self, render_pass: &CompiledRenderPass) -> Result<()>;

    fn next_subpass(&self);

    fn end_render_pass(&self);

    /// Open a non-draw encoder. Draw encoders are opened by [`Self::begin_render_pass`].
    fn begin_encoder(&self, kind: EncoderKind);

    fn end_encoder(&self);

    /// Replay one recorded pass command into the open encoder.
    fn record_command(&self, command: &FrameCommand) -> Result<()>;

    /// Replay one compacted resource command at its scheduled position.
    fn record_resource_command(&self, command: &ResourceCommand) -> Result<()>;

    fn end_command_buffer(&self, index: u32);

    // --- Submission --------------------------------------------------------------------

    /// Submit command buffer `index` on `queue`, signalling `signal_value` on the queue's
    /// timeline when it retires, then invoking `on_complete`. Submission order within a
    /// queue is the call order.
    fn submit(
        &self,
        index: u32,
        queue: &Queue,
        signal_value: u64,
        on_complete: CompletionCallback,
    ) -> Result<()>;
}
