//! The texture facade.
//!
//! Mirrors the [`Buffer`](crate::resource::buffer::Buffer) facade for image resources.
//! CPU access to texture contents goes through the backend (`replace_region` /
//! `copy_region_to`) after the usual cross-frame wait; there is no mapped-pointer path
//! since image memory is rarely linear.

use anyhow::Result;

use crate::core::context::Context;
use crate::resource::descriptor::{ResourceDescriptor, TextureDescriptor, TextureRegion};
use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType, StateFlags};

/// Typed facade over a texture resource.
#[derive(Debug, Clone)]
pub struct Texture {
    handle: ResourceHandle,
    context: Context,
}

impl Texture {
    /// Create a transient texture, owned by the frame currently being recorded.
    pub fn new(context: &Context, descriptor: TextureDescriptor) -> Self {
        Self::with_flags(context, descriptor, ResourceFlags::empty(), None)
            .expect("transient texture creation does not allocate and cannot fail")
    }

    /// Create a persistent texture. The descriptor must declare a usage hint; backing
    /// memory is materialised immediately.
    pub fn new_persistent(
        context: &Context,
        descriptor: TextureDescriptor,
        label: impl Into<String>,
    ) -> Result<Self> {
        Self::with_flags(
            context,
            descriptor,
            ResourceFlags::PERSISTENT,
            Some(label.into()),
        )
    }

    /// Create a texture with explicit lifecycle flags. Window handles and history
    /// buffers go through here.
    pub fn with_flags(
        context: &Context,
        descriptor: TextureDescriptor,
        flags: ResourceFlags,
        label: Option<String>,
    ) -> Result<Self> {
        let handle = if flags.uses_persistent_registry() {
            context.drain_disposes();
            let handle = context.persistent_registry().allocate(
                ResourceType::Texture,
                flags,
                ResourceDescriptor::Texture(descriptor),
                label,
            );
            context
                .backend()
                .materialise_texture(handle, &descriptor, descriptor.usage_hint)?;
            handle
        } else {
            context.transient_registry().allocate(
                ResourceType::Texture,
                flags,
                ResourceDescriptor::Texture(descriptor),
                label,
            )
        };
        Ok(Texture {
            handle,
            context: context.clone(),
        })
    }

    /// Wrap an existing handle. Panics if the handle's type bits are not `Texture`.
    pub fn from_handle(context: &Context, handle: ResourceHandle) -> Self {
        assert_eq!(
            handle.resource_type(),
            ResourceType::Texture,
            "handle {handle:?} is not a texture"
        );
        Texture {
            handle,
            context: context.clone(),
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn descriptor(&self) -> TextureDescriptor {
        *self
            .context
            .descriptor(self.handle)
            .as_texture()
            .expect("texture handle stored a non-texture descriptor")
    }

    pub fn is_initialised(&self) -> bool {
        self.context.state(self.handle).contains(StateFlags::INITIALISED)
    }

    /// Create a transient view reinterpreting this texture with a different descriptor
    /// (format, mip range). The view's usages are attributed to this texture.
    pub fn view(&self, descriptor: TextureDescriptor) -> Texture {
        let handle = self.context.transient_registry().allocate_view(
            ResourceType::Texture,
            ResourceFlags::empty(),
            ResourceDescriptor::Texture(descriptor),
            // Attribute through to the base so view-of-view chains stay flat.
            self.context.resolve_base(self.handle),
        );
        Texture {
            handle,
            context: self.context.clone(),
        }
    }

    /// Replace a region of the texture with CPU data. Blocks until writing is safe with
    /// respect to earlier frames, then delegates the byte shuffle to the backend.
    pub fn replace_region(
        &self,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        data: &[u8],
        bytes_per_row: u32,
    ) -> Result<()> {
        if self.handle.flags().contains(ResourceFlags::IMMUTABLE_ONCE_INITIALISED)
            && self.is_initialised()
        {
            panic!(
                "write to immutable texture {:?} after initialisation",
                self.context.label(self.handle).unwrap_or_default()
            );
        }
        self.context.wait_for_cpu_access(self.handle, true);
        self.context.backend().replace_texture_region(
            self.handle,
            region,
            mip_level,
            array_slice,
            data,
            bytes_per_row,
        )?;
        self.context.insert_state(self.handle, StateFlags::INITIALISED);
        Ok(())
    }

    /// Copy a region of the texture out to CPU memory. Blocks until the last GPU write
    /// has completed.
    pub fn copy_region_to(
        &self,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        out: &mut [u8],
        bytes_per_row: u32,
    ) -> Result<()> {
        self.context.wait_for_cpu_access(self.handle, false);
        self.context.backend().copy_texture_region(
            self.handle,
            region,
            mip_level,
            array_slice,
            out,
            bytes_per_row,
        )
    }

    /// Dispose a persistent texture. Freeing is deferred until the GPU is done with it.
    pub fn dispose(self) {
        self.context.dispose(self.handle);
    }
}
