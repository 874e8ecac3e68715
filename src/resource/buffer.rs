//! The buffer facade.
//!
//! A [`Buffer`] is a cheap typed facade over a [`ResourceHandle`] whose type bits say
//! `Buffer`. CPU access goes through [`BufferSlice`]s obtained from [`Buffer::slice`]:
//! a slice knows its byte range and access mode, and a slice that was written through
//! flushes the range to the backend when it drops.
//!
//! Transient buffers have no backing memory until the frame compiler materialises them,
//! so CPU writes to them are recorded with [`Buffer::with_deferred_slice`] and replayed
//! once backing exists. On a buffer that is already materialised the closure runs
//! immediately instead.

use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::NonNull;

use anyhow::Result;
use ash::vk;

use crate::core::context::Context;
use crate::core::error::Error;
use crate::graph::usage::{ResourceUsage, ResourceUsageType, CPU_BEFORE_RENDER};
use crate::resource::descriptor::{BufferDescriptor, DeferredSliceAction, ResourceDescriptor};
use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType, StateFlags};

/// Access mode of a [`BufferSlice`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SliceAccess {
    Read,
    Write,
    ReadWrite,
}

impl SliceAccess {
    pub fn is_write(self) -> bool {
        matches!(self, SliceAccess::Write | SliceAccess::ReadWrite)
    }

    pub fn is_read(self) -> bool {
        matches!(self, SliceAccess::Read | SliceAccess::ReadWrite)
    }
}

/// Typed facade over a buffer resource.
#[derive(Debug, Clone)]
pub struct Buffer {
    handle: ResourceHandle,
    context: Context,
}

impl Buffer {
    /// Create a transient buffer, owned by the frame currently being recorded.
    pub fn new(context: &Context, descriptor: BufferDescriptor) -> Self {
        Self::with_flags(context, descriptor, ResourceFlags::empty(), None)
            .expect("transient buffer creation does not allocate and cannot fail")
    }

    /// Create a persistent buffer. The descriptor must declare a usage hint; backing
    /// memory is materialised immediately.
    pub fn new_persistent(
        context: &Context,
        descriptor: BufferDescriptor,
        label: impl Into<String>,
    ) -> Result<Self> {
        Self::with_flags(
            context,
            descriptor,
            ResourceFlags::PERSISTENT,
            Some(label.into()),
        )
    }

    /// Create a buffer with explicit lifecycle flags.
    pub fn with_flags(
        context: &Context,
        descriptor: BufferDescriptor,
        flags: ResourceFlags,
        label: Option<String>,
    ) -> Result<Self> {
        let handle = if flags.uses_persistent_registry() {
            context.drain_disposes();
            let handle = context.persistent_registry().allocate(
                ResourceType::Buffer,
                flags,
                ResourceDescriptor::Buffer(descriptor),
                label,
            );
            context
                .backend()
                .materialise_buffer(handle, &descriptor, descriptor.usage_hint)?;
            handle
        } else {
            context.transient_registry().allocate(
                ResourceType::Buffer,
                flags,
                ResourceDescriptor::Buffer(descriptor),
                label,
            )
        };
        Ok(Buffer {
            handle,
            context: context.clone(),
        })
    }

    /// Wrap an existing handle. Panics if the handle's type bits are not `Buffer`.
    pub fn from_handle(context: &Context, handle: ResourceHandle) -> Self {
        assert_eq!(
            handle.resource_type(),
            ResourceType::Buffer,
            "handle {handle:?} is not a buffer"
        );
        Buffer {
            handle,
            context: context.clone(),
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn descriptor(&self) -> BufferDescriptor {
        *self
            .context
            .descriptor(self.handle)
            .as_buffer()
            .expect("buffer handle stored a non-buffer descriptor")
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.descriptor().size
    }

    /// True once any pass or CPU path has written this buffer.
    pub fn is_initialised(&self) -> bool {
        self.context.state(self.handle).contains(StateFlags::INITIALISED)
    }

    /// Map `range` for CPU access. Blocks until the access is safe with respect to
    /// earlier frames still on the GPU.
    ///
    /// Fails on buffers without host-visible, materialised backing memory; panics if
    /// `range` exceeds the buffer, or on a write to an immutable buffer that was already
    /// initialised.
    pub fn slice(&self, range: Range<vk::DeviceSize>, access: SliceAccess) -> Result<BufferSlice<'_>> {
        let descriptor = self.descriptor();
        assert!(
            range.start <= range.end && range.end <= descriptor.size,
            "slice {range:?} is out of range of buffer of size {}",
            descriptor.size
        );
        if access.is_write() {
            self.assert_mutable();
        }
        if !descriptor.memory_type.is_host_visible() {
            return Err(Error::UnmappableBuffer.into());
        }
        self.context.wait_for_cpu_access(self.handle, access.is_write());
        let pointer = self.context.backend().map_buffer(self.handle, range.clone())?;
        Ok(BufferSlice {
            buffer: self,
            pointer,
            range,
            access,
            written: false,
        })
    }

    /// Map the whole buffer for CPU access.
    pub fn slice_full(&self, access: SliceAccess) -> Result<BufferSlice<'_>> {
        self.slice(0..self.size(), access)
    }

    /// Run `f` over `range` once backing memory exists. On a buffer that is already
    /// materialised this happens immediately; on an unmaterialised transient buffer the
    /// closure is parked on the registry slot and replayed by the frame compiler, after
    /// allocation and before the buffer's first command.
    pub fn with_deferred_slice(
        &self,
        range: Range<vk::DeviceSize>,
        f: impl FnOnce(&mut [u8]) + Send + 'static,
    ) {
        assert!(
            range.end <= self.size(),
            "deferred slice {range:?} is out of range of buffer of size {}",
            self.size()
        );
        self.assert_mutable();
        if self.context.backend().is_materialised(self.handle) {
            let mut slice = self
                .slice(range, SliceAccess::Write)
                .expect("materialised buffer must be mappable for a deferred slice");
            f(slice.as_bytes_mut());
            return;
        }
        // The eventual CPU write makes the buffer a transfer destination; record that so
        // the usage-flag union at materialisation includes it.
        self.context.append_usage(
            self.handle,
            ResourceUsage {
                // Not attributable to any pass; pinned to the start of the frame.
                pass: u32::MAX,
                commands: 0..0,
                usage_type: ResourceUsageType::BlitDestination,
                stages: CPU_BEFORE_RENDER,
            },
        );
        let context = self.context.clone();
        let handle = self.handle;
        self.context.push_deferred_slice(
            self.handle,
            DeferredSliceAction {
                range: range.clone(),
                apply: Box::new(move |buffer, bytes| {
                    debug_assert_eq!(buffer, handle);
                    f(bytes);
                    context.backend().did_modify_range(handle, range);
                    context.insert_state(handle, StateFlags::INITIALISED);
                }),
            },
        );
    }

    /// Dispose a persistent buffer. Freeing is deferred until the GPU is done with it.
    pub fn dispose(self) {
        self.context.dispose(self.handle);
    }

    fn assert_mutable(&self) {
        if self.handle.flags().contains(ResourceFlags::IMMUTABLE_ONCE_INITIALISED)
            && self.is_initialised()
        {
            panic!(
                "write to immutable buffer {:?} after initialisation",
                self.context.label(self.handle).unwrap_or_default()
            );
        }
    }
}

/// A mapped view of a byte range of a buffer. Dropping a slice that was written through
/// flushes the range to the backend and marks the buffer initialised.
#[derive(Debug)]
pub struct BufferSlice<'a> {
    buffer: &'a Buffer,
    pointer: NonNull<u8>,
    range: Range<vk::DeviceSize>,
    access: SliceAccess,
    written: bool,
}

impl BufferSlice<'_> {
    pub fn len(&self) -> usize {
        (self.range.end - self.range.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.range.start == self.range.end
    }

    pub fn access(&self) -> SliceAccess {
        self.access
    }

    pub fn range(&self) -> Range<vk::DeviceSize> {
        self.range.clone()
    }

    /// The mapped bytes. Panics if the slice was opened write-only.
    pub fn as_bytes(&self) -> &[u8] {
        assert!(self.access.is_read(), "slice was opened write-only");
        unsafe { std::slice::from_raw_parts(self.pointer.as_ptr(), self.len()) }
    }

    /// The mapped bytes, mutably. Panics if the slice was opened read-only.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        assert!(self.access.is_write(), "slice was opened read-only");
        self.written = true;
        unsafe { std::slice::from_raw_parts_mut(self.pointer.as_ptr(), self.len()) }
    }

    /// Reinterpret the mapped range as a slice of `T`. The range length must be a
    /// multiple of `size_of::<T>()`.
    pub fn as_typed<T: Copy>(&self) -> TypedSlice<'_, T> {
        assert!(self.access.is_read(), "slice was opened write-only");
        let size = std::mem::size_of::<T>();
        assert_eq!(self.len() % size, 0, "slice length is not a multiple of element size");
        TypedSlice {
            pointer: self.pointer.cast(),
            len: self.len() / size,
            _marker: PhantomData,
        }
    }

    /// Copy `data` into the mapped range, which must be exactly as long.
    pub fn copy_from_slice<T: Copy>(&mut self, data: &[T]) {
        let bytes = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const u8, std::mem::size_of_val(data))
        };
        self.as_bytes_mut().copy_from_slice(bytes);
    }
}

impl Drop for BufferSlice<'_> {
    fn drop(&mut self) {
        if self.written {
            self.buffer
                .context
                .backend()
                .did_modify_range(self.buffer.handle, self.range.clone());
            self.buffer
                .context
                .insert_state(self.buffer.handle, StateFlags::INITIALISED);
        }
    }
}

/// A typed, read-only view into a mapped buffer range.
pub struct TypedSlice<'a, T> {
    pointer: NonNull<T>,
    len: usize,
    _marker: PhantomData<&'a T>,
}

impl<T: Copy> std::ops::Deref for TypedSlice<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.pointer.as_ptr(), self.len) }
    }
}
