//! Resource usage tracking.
//!
//! Every declaration a pass makes about a resource becomes a [`ResourceUsage`] appended to
//! that resource's usage list in its registry slot. The dependency analyzer walks these
//! lists first to last to derive barriers, layout transitions and cross-queue events, so
//! the usage type is the single source of truth for access masks, image layouts and
//! usage-flag unions.

use std::ops::Range;

use ash::vk;

/// Marker stage for work that happens on the CPU before the frame is submitted. Usages at
/// this stage never participate in GPU ordering, but still drive materialisation.
pub const CPU_BEFORE_RENDER: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::HOST;

/// How a pass accesses a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceUsageType {
    /// Generic shader read (storage or sampled).
    Read,
    /// Generic shader write.
    Write,
    /// Combined shader read/write.
    ReadWrite,
    /// Read through a uniform/constant buffer binding.
    ConstantBuffer,
    /// Source of a blit or copy.
    BlitSource,
    /// Destination of a blit or copy.
    BlitDestination,
    /// Both sides of an in-place blit; also used to order whole-resource transfers.
    BlitSynchronisation,
    /// Read as a vertex buffer.
    VertexBuffer,
    /// Read as an index buffer.
    IndexBuffer,
    /// Read as an indirect command buffer.
    IndirectBuffer,
    /// Bound as a sampler.
    Sampler,
    /// Read as an input attachment outside a render target binding.
    InputAttachment,
    /// Bound as a render target that is both read and written.
    ReadWriteRenderTarget,
    /// Bound as a render target that is only written.
    WriteOnlyRenderTarget,
    /// Bound as a render target that is also read as an input attachment in the same pass.
    InputAttachmentRenderTarget,
    /// Declared on the render target descriptor but untouched by the pass. Contributes to
    /// usage-flag unions only.
    UnusedRenderTarget,
    /// Present in an argument buffer but unreferenced by the pass. Contributes to
    /// usage-flag unions only.
    UnusedArgumentBuffer,
}

impl ResourceUsageType {
    /// True if this usage may write the resource.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            ResourceUsageType::Write
                | ResourceUsageType::ReadWrite
                | ResourceUsageType::BlitDestination
                | ResourceUsageType::BlitSynchronisation
                | ResourceUsageType::ReadWriteRenderTarget
                | ResourceUsageType::WriteOnlyRenderTarget
                | ResourceUsageType::InputAttachmentRenderTarget
        )
    }

    /// True if this usage may read the resource.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            ResourceUsageType::Read
                | ResourceUsageType::ReadWrite
                | ResourceUsageType::ConstantBuffer
                | ResourceUsageType::BlitSource
                | ResourceUsageType::BlitSynchronisation
                | ResourceUsageType::VertexBuffer
                | ResourceUsageType::IndexBuffer
                | ResourceUsageType::IndirectBuffer
                | ResourceUsageType::Sampler
                | ResourceUsageType::InputAttachment
                | ResourceUsageType::ReadWriteRenderTarget
                | ResourceUsageType::InputAttachmentRenderTarget
        )
    }

    /// True if this usage binds the resource as a render target attachment.
    pub fn is_render_target(self) -> bool {
        matches!(
            self,
            ResourceUsageType::ReadWriteRenderTarget
                | ResourceUsageType::WriteOnlyRenderTarget
                | ResourceUsageType::InputAttachmentRenderTarget
                | ResourceUsageType::UnusedRenderTarget
        )
    }

    /// Unused declarations never introduce dependencies.
    pub fn is_unused(self) -> bool {
        matches!(
            self,
            ResourceUsageType::UnusedRenderTarget | ResourceUsageType::UnusedArgumentBuffer
        )
    }

    /// The access mask for this usage, following the VK_KHR_synchronization2 vocabulary.
    pub fn access_mask(self, is_depth_stencil: bool) -> vk::AccessFlags2 {
        use ResourceUsageType::*;
        match self {
            Read => vk::AccessFlags2::SHADER_READ,
            Write => vk::AccessFlags2::SHADER_WRITE,
            ReadWrite => vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
            ConstantBuffer => vk::AccessFlags2::UNIFORM_READ,
            BlitSource => vk::AccessFlags2::TRANSFER_READ,
            BlitDestination => vk::AccessFlags2::TRANSFER_WRITE,
            BlitSynchronisation => {
                vk::AccessFlags2::TRANSFER_READ | vk::AccessFlags2::TRANSFER_WRITE
            }
            VertexBuffer => vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
            IndexBuffer => vk::AccessFlags2::INDEX_READ,
            IndirectBuffer => vk::AccessFlags2::INDIRECT_COMMAND_READ,
            Sampler => vk::AccessFlags2::SHADER_SAMPLED_READ,
            InputAttachment => vk::AccessFlags2::INPUT_ATTACHMENT_READ,
            ReadWriteRenderTarget => {
                if is_depth_stencil {
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                } else {
                    vk::AccessFlags2::COLOR_ATTACHMENT_READ
                        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                }
            }
            WriteOnlyRenderTarget => {
                if is_depth_stencil {
                    vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE
                } else {
                    vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
                }
            }
            InputAttachmentRenderTarget => {
                vk::AccessFlags2::INPUT_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
            }
            UnusedRenderTarget | UnusedArgumentBuffer => vk::AccessFlags2::NONE,
        }
    }

    /// The image layout a texture must be in for this usage.
    pub fn image_layout(self, is_depth_stencil: bool) -> vk::ImageLayout {
        use ResourceUsageType::*;
        match self {
            Read | ConstantBuffer | Sampler | InputAttachment => {
                if is_depth_stencil {
                    vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
                } else {
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
                }
            }
            Write | ReadWrite | InputAttachmentRenderTarget => vk::ImageLayout::GENERAL,
            BlitSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            BlitDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            BlitSynchronisation => vk::ImageLayout::GENERAL,
            ReadWriteRenderTarget | WriteOnlyRenderTarget => {
                if is_depth_stencil {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                }
            }
            // Vertex/index/indirect usages are buffer only; a texture never reaches here.
            VertexBuffer | IndexBuffer | IndirectBuffer => vk::ImageLayout::UNDEFINED,
            UnusedRenderTarget | UnusedArgumentBuffer => vk::ImageLayout::UNDEFINED,
        }
    }

    /// Contribution of this usage to a buffer's usage-flag union at materialisation.
    pub fn buffer_usage_flags(self) -> vk::BufferUsageFlags {
        use ResourceUsageType::*;
        match self {
            Read | Write | ReadWrite => vk::BufferUsageFlags::STORAGE_BUFFER,
            ConstantBuffer => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BlitSource => vk::BufferUsageFlags::TRANSFER_SRC,
            BlitDestination => vk::BufferUsageFlags::TRANSFER_DST,
            BlitSynchronisation => {
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
            }
            VertexBuffer => vk::BufferUsageFlags::VERTEX_BUFFER,
            IndexBuffer => vk::BufferUsageFlags::INDEX_BUFFER,
            IndirectBuffer => vk::BufferUsageFlags::INDIRECT_BUFFER,
            _ => vk::BufferUsageFlags::empty(),
        }
    }

    /// Contribution of this usage to a texture's usage-flag union at materialisation.
    pub fn image_usage_flags(self, is_depth_stencil: bool) -> vk::ImageUsageFlags {
        use ResourceUsageType::*;
        match self {
            Read | ConstantBuffer | Sampler => vk::ImageUsageFlags::SAMPLED,
            Write | ReadWrite => vk::ImageUsageFlags::STORAGE,
            BlitSource => vk::ImageUsageFlags::TRANSFER_SRC,
            BlitDestination => vk::ImageUsageFlags::TRANSFER_DST,
            BlitSynchronisation => {
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST
            }
            InputAttachment => vk::ImageUsageFlags::INPUT_ATTACHMENT,
            ReadWriteRenderTarget | WriteOnlyRenderTarget | UnusedRenderTarget => {
                if is_depth_stencil {
                    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                } else {
                    vk::ImageUsageFlags::COLOR_ATTACHMENT
                }
            }
            InputAttachmentRenderTarget => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT
            }
            VertexBuffer | IndexBuffer | IndirectBuffer | UnusedArgumentBuffer => {
                vk::ImageUsageFlags::empty()
            }
        }
    }
}

/// One recorded usage of a resource by a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Index of the declaring pass in the frame.
    pub pass: u32,
    /// Range of frame command indices this usage spans.
    pub commands: Range<u32>,
    pub usage_type: ResourceUsageType,
    /// Pipeline stages the resource is accessed in, or [`CPU_BEFORE_RENDER`].
    pub stages: vk::PipelineStageFlags2,
}

impl ResourceUsage {
    /// True if this usage participates in GPU ordering.
    pub fn is_gpu_ordered(&self) -> bool {
        self.stages != CPU_BEFORE_RENDER && !self.usage_type.is_unused()
    }
}
