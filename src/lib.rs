//! # deimos
//!
//! A frame graph core for GPU workloads targeting modern explicit graphics APIs.
//!
//! An application describes a frame as a set of *passes* (draw, compute, blit, external,
//! CPU) that declare how they use *resources*. From those declarations deimos
//!
//! - determines a valid execution order and culls passes with no visible effect,
//! - materialises transient resources late, so the backend can alias their memory,
//! - inserts the minimum set of pipeline barriers, image layout transitions, subpass
//!   dependencies and cross-queue events required for correctness,
//! - fuses compatible draw passes into multi-subpass render passes for tiled GPUs,
//! - and batches commands into command buffers submitted with per-queue timeline values.
//!
//! The core never talks to a graphics API directly: everything it needs from one is the
//! [`Backend`](crate::backend::Backend) trait. Synchronization state is expressed in the
//! `VK_KHR_synchronization2` vocabulary via [`ash`], which backends translate or use
//! directly.
//!
//! Start at [`Context`](crate::core::context::Context) for the process-wide state,
//! [`FrameGraph`](crate::graph::FrameGraph) for recording and executing frames, and
//! [`ResourceUploader`](crate::util::upload::ResourceUploader) for batched
//! host-to-device copies.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod backend;
pub mod core;
pub mod descriptor;
pub mod graph;
pub mod prelude;
pub mod resource;
pub mod sync;
pub mod util;

pub use crate::core::context::Context;
pub use crate::core::error::Error;
pub use crate::graph::pass::{PassKind, RenderPass, RenderTargetDescriptor};
pub use crate::graph::usage::{ResourceUsage, ResourceUsageType};
pub use crate::graph::FrameGraph;
pub use crate::resource::argument_buffer::{ArgumentBuffer, ArgumentBufferArray};
pub use crate::resource::buffer::{Buffer, BufferSlice, SliceAccess};
pub use crate::resource::descriptor::{
    BufferDescriptor, MemoryType, TextureDescriptor, TextureRegion,
};
pub use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType, StateFlags};
pub use crate::resource::texture::Texture;
pub use crate::sync::frame_completion::FrameCompletion;
pub use crate::sync::queue::{Queue, QueueType};
pub use crate::util::upload::ResourceUploader;
