//! Opaque resource handles.
//!
//! Every resource in the system is identified by a [`ResourceHandle`]: a 64-bit value
//! packing the resource type, its lifecycle flags and a logical index into one of the
//! registries. Handles are cheap to copy and hash, and carry enough information to route
//! any operation to the right registry without a lookup.
//!
//! The bit layout is a stability contract and must not change between versions:
//!
//! ```text
//! 63      56 55      48 47            32 31             0
//! +--------+----------+----------------+----------------+
//! |  pad   |   type   |     flags      |     index      |
//! +--------+----------+----------------+----------------+
//! ```
//!
//! Only the lower 29 bits of the index are usable. The all-ones value is reserved as
//! [`ResourceHandle::INVALID`].

use std::fmt;

use bitflags::bitflags;

const TYPE_SHIFT: u32 = 48;
const FLAG_SHIFT: u32 = 32;

/// Largest logical index a handle can carry.
pub const MAX_RESOURCE_INDEX: u32 = (1 << 29) - 1;

/// The type of resource a handle refers to. Stored in bits 48..56 of the handle.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A linear allocation of GPU memory.
    Buffer = 0,
    /// An image, possibly with multiple mip levels and array slices.
    Texture = 1,
    /// An immutable sampler object.
    Sampler = 2,
    /// Scratch memory shared by a compute threadgroup.
    ThreadgroupMemory = 3,
    /// A logical descriptor set, encoded lazily into backend bindings.
    ArgumentBuffer = 4,
    /// An array of argument buffers sharing one layout.
    ArgumentBufferArray = 5,
    /// Tile-local pixel storage data.
    ImageblockData = 6,
    /// A tile-local imageblock.
    Imageblock = 7,
}

impl ResourceType {
    /// Decode a type from its handle bits, or `None` for unknown bit patterns.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(ResourceType::Buffer),
            1 => Some(ResourceType::Texture),
            2 => Some(ResourceType::Sampler),
            3 => Some(ResourceType::ThreadgroupMemory),
            4 => Some(ResourceType::ArgumentBuffer),
            5 => Some(ResourceType::ArgumentBufferArray),
            6 => Some(ResourceType::ImageblockData),
            7 => Some(ResourceType::Imageblock),
            _ => None,
        }
    }
}

bitflags! {
    /// Lifecycle flags of a resource. Stored in bits 32..48 of the handle, so they can be
    /// inspected without touching the registry.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u16 {
        /// Lives across frames, allocated from the persistent registry. Must declare a
        /// usage hint at creation.
        const PERSISTENT = 1 << 0;
        /// Backs a swapchain image. Disposed every frame even when persistent-like.
        const WINDOW_HANDLE = 1 << 1;
        /// Retained so that a read in frame N observes the write from frame N - 1.
        /// Allocated from the persistent registry.
        const HISTORY_BUFFER = 1 << 2;
        /// Backing memory was registered by the application and is never freed here.
        const EXTERNAL_OWNERSHIP = 1 << 3;
        /// Writes are rejected once the resource has been initialised.
        const IMMUTABLE_ONCE_INITIALISED = 1 << 4;
        /// A view into another resource. Views are transient only.
        const RESOURCE_VIEW = 1 << 5;
    }
}

impl ResourceFlags {
    /// True if the resource is allocated from the persistent registry.
    pub fn uses_persistent_registry(self) -> bool {
        self.intersects(ResourceFlags::PERSISTENT | ResourceFlags::HISTORY_BUFFER)
    }
}

bitflags! {
    /// Mutable per-resource state, stored in the registry rather than the handle.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct StateFlags: u8 {
        /// Set once the resource has been written by any pass or CPU path.
        const INITIALISED = 1 << 0;
    }
}

/// An opaque 64-bit handle to a registered resource. See the [module](self) documentation
/// for the encoding.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    /// The reserved invalid handle. Returned by fallible creation paths on backend
    /// allocation failure.
    pub const INVALID: ResourceHandle = ResourceHandle(u64::MAX);

    /// Encode a handle from its parts.
    ///
    /// Panics if `index` exceeds [`MAX_RESOURCE_INDEX`]; running out of handle space is
    /// not a recoverable condition.
    pub fn new(ty: ResourceType, flags: ResourceFlags, index: u32) -> Self {
        assert!(
            index <= MAX_RESOURCE_INDEX,
            "resource index {index} exceeds the 29-bit handle index space"
        );
        ResourceHandle(
            ((ty as u64) << TYPE_SHIFT) | ((flags.bits() as u64) << FLAG_SHIFT) | index as u64,
        )
    }

    /// Reconstruct a handle from its raw bits, e.g. when passed back through a backend.
    pub fn from_raw(raw: u64) -> Self {
        ResourceHandle(raw)
    }

    /// The raw 64-bit value. Equality and hashing are defined over this.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// The resource type encoded in this handle.
    ///
    /// Panics on unknown type bits: a handle that decodes to no known type was either
    /// corrupted or fabricated, which is a programmer error.
    pub fn resource_type(self) -> ResourceType {
        let bits = (self.0 >> TYPE_SHIFT) as u8;
        ResourceType::from_bits(bits)
            .unwrap_or_else(|| panic!("handle {self:?} decodes to unknown resource type {bits}"))
    }

    /// The lifecycle flags encoded in this handle. Unknown flag bits are dropped.
    pub fn flags(self) -> ResourceFlags {
        ResourceFlags::from_bits_truncate((self.0 >> FLAG_SHIFT) as u16)
    }

    /// The logical index into the owning registry.
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    /// True if this handle is allocated from the persistent registry.
    pub fn uses_persistent_registry(self) -> bool {
        self.flags().uses_persistent_registry()
    }

    /// True if this handle is a view into another resource.
    pub fn is_view(self) -> bool {
        self.flags().contains(ResourceFlags::RESOURCE_VIEW)
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return write!(f, "ResourceHandle(INVALID)");
        }
        let ty = ResourceType::from_bits((self.0 >> TYPE_SHIFT) as u8);
        write!(
            f,
            "ResourceHandle({:?}, index = {}, flags = {:?})",
            ty,
            self.index(),
            self.flags()
        )
    }
}
