//! Resource descriptors: the immutable creation-time description of a buffer, texture or
//! argument buffer. Descriptors are stored in the registries and handed to the backend
//! when a resource is materialised.

use ash::vk;

use crate::resource::handle::ResourceHandle;

/// The memory type of a resource indicates where its backing allocation should live.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// GPU only accessible memory - typically the fastest, and where most resources live.
    GpuOnly,
    /// Memory useful for uploading data to the GPU and for constant buffers. Host visible,
    /// write combined.
    CpuToGpu,
    /// Memory useful for CPU readback of data.
    GpuToCpu,
}

impl MemoryType {
    /// True if the CPU can map this memory directly.
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryType::GpuOnly)
    }
}

/// Describes a buffer to be created.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size of the buffer in bytes.
    pub size: vk::DeviceSize,
    /// Where the backing memory should live.
    pub memory_type: MemoryType,
    /// Usages the application knows about up front. Transient buffers may leave this empty,
    /// in which case the union of declared usages is computed at materialisation.
    /// Persistent buffers must declare a non-empty hint, since they are materialised
    /// before any usage is known.
    pub usage_hint: vk::BufferUsageFlags,
}

impl BufferDescriptor {
    pub fn new(size: vk::DeviceSize, memory_type: MemoryType) -> Self {
        BufferDescriptor {
            size,
            memory_type,
            usage_hint: vk::BufferUsageFlags::empty(),
        }
    }

    pub fn with_usage(mut self, usage: vk::BufferUsageFlags) -> Self {
        self.usage_hint = usage;
        self
    }
}

/// Describes a texture to be created. For 2D textures, `extent.depth == 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub memory_type: MemoryType,
    /// See [`BufferDescriptor::usage_hint`].
    pub usage_hint: vk::ImageUsageFlags,
}

impl TextureDescriptor {
    /// A single-sampled 2D texture with one mip level.
    pub fn new_2d(format: vk::Format, width: u32, height: u32) -> Self {
        TextureDescriptor {
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            memory_type: MemoryType::GpuOnly,
            usage_hint: vk::ImageUsageFlags::empty(),
        }
    }

    pub fn with_usage(mut self, usage: vk::ImageUsageFlags) -> Self {
        self.usage_hint = usage;
        self
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    /// True if `format` has a depth or stencil aspect.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self.format,
            vk::Format::D16_UNORM
                | vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT
                | vk::Format::D32_SFLOAT_S8_UINT
                | vk::Format::S8_UINT
                | vk::Format::X8_D24_UNORM_PACK32
        )
    }
}

/// A region of a texture, used by the blit commands and the uploader.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureRegion {
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
}

impl TextureRegion {
    /// The full region of mip level 0 of `descriptor`.
    pub fn full(descriptor: &TextureDescriptor) -> Self {
        TextureRegion {
            offset: vk::Offset3D {
                x: 0,
                y: 0,
                z: 0,
            },
            extent: descriptor.extent,
        }
    }
}

/// Describes an argument buffer: a logical descriptor set with `binding_count` slots.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArgumentBufferDescriptor {
    pub binding_count: u32,
}

/// Describes an array of argument buffers sharing one layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArgumentBufferArrayDescriptor {
    pub binding_count: u32,
    pub array_length: u32,
}

/// The descriptor stored in a registry slot. The variant always matches the type bits of
/// the slot's handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDescriptor {
    Buffer(BufferDescriptor),
    Texture(TextureDescriptor),
    ArgumentBuffer(ArgumentBufferDescriptor),
    ArgumentBufferArray(ArgumentBufferArrayDescriptor),
}

impl ResourceDescriptor {
    /// The buffer descriptor, if this is a buffer.
    pub fn as_buffer(&self) -> Option<&BufferDescriptor> {
        match self {
            ResourceDescriptor::Buffer(desc) => Some(desc),
            _ => None,
        }
    }

    /// The texture descriptor, if this is a texture.
    pub fn as_texture(&self) -> Option<&TextureDescriptor> {
        match self {
            ResourceDescriptor::Texture(desc) => Some(desc),
            _ => None,
        }
    }

    /// True if a persistent resource with this descriptor declares the usage hint it is
    /// required to carry.
    pub fn has_usage_hint(&self) -> bool {
        match self {
            ResourceDescriptor::Buffer(desc) => !desc.usage_hint.is_empty(),
            ResourceDescriptor::Texture(desc) => !desc.usage_hint.is_empty(),
            // Argument buffers encode into backend descriptor storage and need no hint.
            ResourceDescriptor::ArgumentBuffer(_) | ResourceDescriptor::ArgumentBufferArray(_) => {
                true
            }
        }
    }
}

/// A deferred action on a byte range of a transient buffer, parked until the buffer is
/// materialised by the backend.
pub struct DeferredSliceAction {
    pub range: std::ops::Range<vk::DeviceSize>,
    pub apply: Box<dyn FnOnce(ResourceHandle, &mut [u8]) + Send>,
}

impl std::fmt::Debug for DeferredSliceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSliceAction")
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}
