//! Re-exports the most commonly used types.
//!
//! ```
//! use deimos::prelude::*;
//! ```

pub use anyhow::Result;
pub use ash::vk;

pub use crate::backend::{
    Backend, BufferBarrierInfo, CompactedResourceCommand, ImageBarrierInfo, MemoryBarrierInfo,
    PlacementOrder, ResourceCommand,
};
pub use crate::core::context::Context;
pub use crate::core::error::Error;
pub use crate::core::job::{InlineJobManager, JobManager, JobPriority};
pub use crate::descriptor::{
    DescriptorResourceReflection, DescriptorSetReflection, ResourceBindingPath, TargetApi,
};
pub use crate::graph::compile::{CompiledRenderPass, EncoderKind, SubpassDependency};
pub use crate::graph::pass::{PassKind, RenderPass, RenderTargetDescriptor};
pub use crate::graph::record::{
    BlitCommandEncoder, ComputeCommandEncoder, FrameCommand, RenderCommandEncoder,
};
pub use crate::graph::usage::{ResourceUsage, ResourceUsageType};
pub use crate::graph::FrameGraph;
pub use crate::resource::argument_buffer::{ArgumentBuffer, ArgumentBufferArray, ArgumentBufferValue};
pub use crate::resource::buffer::{Buffer, BufferSlice, SliceAccess};
pub use crate::resource::descriptor::{
    BufferDescriptor, MemoryType, TextureDescriptor, TextureRegion,
};
pub use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType, StateFlags};
pub use crate::resource::registry::{PersistentRegistry, TransientRegistry};
pub use crate::resource::texture::Texture;
pub use crate::sync::frame_completion::{FrameCompletion, InflightFrameSemaphore};
pub use crate::sync::queue::{Queue, QueueType};
pub use crate::util::upload::ResourceUploader;
