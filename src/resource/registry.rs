//! Chunked resource registries.
//!
//! Registries are column stores arranged in fixed-size chunks: every chunk holds parallel
//! arrays for descriptors, labels, state flags, usage lists, wait frames and
//! type-specific columns. A handle's logical index decomposes into `(chunk, offset)` by
//! integer quotient and remainder, so allocation is O(1) amortized and nothing ever
//! moves.
//!
//! There are two registries with different lifetimes:
//! - the [`TransientRegistry`] owns resources of the current frame; its indices reset
//!   wholesale in [`TransientRegistry::cycle_frames`].
//! - the [`PersistentRegistry`] owns caller-managed resources; indices are allocated
//!   monotonically and recycled only after a deferred dispose has drained past the
//!   resource's last GPU use.
//!
//! Both are cheap to clone and internally synchronized, following the sharing idiom of
//! the rest of the crate.

use std::sync::{Arc, Mutex};

use ash::vk;

use crate::graph::usage::ResourceUsage;
use crate::resource::descriptor::{DeferredSliceAction, ResourceDescriptor};
use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType, StateFlags};

/// Number of slots per registry chunk.
pub const CHUNK_SIZE: usize = 256;

/// One chunk of parallel columns. All vectors always have identical length.
#[derive(Debug, Default)]
struct ResourceChunk {
    handles: Vec<ResourceHandle>,
    descriptors: Vec<ResourceDescriptor>,
    labels: Vec<Option<String>>,
    states: Vec<StateFlags>,
    usages: Vec<Vec<ResourceUsage>>,
    read_wait_frames: Vec<u64>,
    write_wait_frames: Vec<u64>,
    /// Base resource when the slot holds a view, [`ResourceHandle::INVALID`] otherwise.
    base_resources: Vec<ResourceHandle>,
    /// Slice actions parked until the backend materialises the resource.
    deferred_slices: Vec<Vec<DeferredSliceAction>>,
    /// Image layout the resource was left in by its last GPU use. Textures only.
    gpu_layouts: Vec<vk::ImageLayout>,
    /// False once the slot has been disposed. Only meaningful in the persistent registry.
    live: Vec<bool>,
}

impl ResourceChunk {
    fn len(&self) -> usize {
        self.handles.len()
    }

    fn push_slot(&mut self, handle: ResourceHandle, descriptor: ResourceDescriptor, label: Option<String>) {
        self.handles.push(handle);
        self.descriptors.push(descriptor);
        self.labels.push(label);
        self.states.push(StateFlags::empty());
        self.usages.push(Vec::new());
        self.read_wait_frames.push(0);
        self.write_wait_frames.push(0);
        self.base_resources.push(ResourceHandle::INVALID);
        self.deferred_slices.push(Vec::new());
        self.gpu_layouts.push(vk::ImageLayout::UNDEFINED);
        self.live.push(true);
    }

    fn overwrite_slot(
        &mut self,
        offset: usize,
        handle: ResourceHandle,
        descriptor: ResourceDescriptor,
        label: Option<String>,
    ) {
        self.handles[offset] = handle;
        self.descriptors[offset] = descriptor;
        self.labels[offset] = label;
        self.states[offset] = StateFlags::empty();
        self.usages[offset].clear();
        self.read_wait_frames[offset] = 0;
        self.write_wait_frames[offset] = 0;
        self.base_resources[offset] = ResourceHandle::INVALID;
        self.deferred_slices[offset].clear();
        self.gpu_layouts[offset] = vk::ImageLayout::UNDEFINED;
        self.live[offset] = true;
    }
}

#[derive(Debug, Default)]
struct Columns {
    chunks: Vec<ResourceChunk>,
    count: u32,
}

impl Columns {
    fn chunk_of(&self, index: u32) -> (&ResourceChunk, usize) {
        let chunk = index as usize / CHUNK_SIZE;
        let offset = index as usize % CHUNK_SIZE;
        let chunk = self
            .chunks
            .get(chunk)
            .unwrap_or_else(|| panic!("resource index {index} is not allocated in this registry"));
        assert!(offset < chunk.len(), "resource index {index} is not allocated in this registry");
        (chunk, offset)
    }

    fn chunk_of_mut(&mut self, index: u32) -> (&mut ResourceChunk, usize) {
        let chunk = index as usize / CHUNK_SIZE;
        let offset = index as usize % CHUNK_SIZE;
        let chunk = self
            .chunks
            .get_mut(chunk)
            .unwrap_or_else(|| panic!("resource index {index} is not allocated in this registry"));
        assert!(offset < chunk.len(), "resource index {index} is not allocated in this registry");
        (chunk, offset)
    }

    fn append_slot(&mut self, handle: ResourceHandle, descriptor: ResourceDescriptor, label: Option<String>) -> u32 {
        let index = self.count;
        if self.chunks.last().map_or(true, |chunk| chunk.len() == CHUNK_SIZE) {
            self.chunks.push(ResourceChunk::default());
        }
        self.chunks.last_mut().unwrap().push_slot(handle, descriptor, label);
        self.count += 1;
        index
    }
}

/// Operations shared by both registries, generic over where the columns live.
macro_rules! column_accessors {
    () => {
        /// The descriptor stored for `index`.
        pub fn descriptor(&self, index: u32) -> ResourceDescriptor {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of(index);
                chunk.descriptors[offset].clone()
            })
        }

        /// The debug label stored for `index`, if any.
        pub fn label(&self, index: u32) -> Option<String> {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of(index);
                chunk.labels[offset].clone()
            })
        }

        pub fn state(&self, index: u32) -> StateFlags {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of(index);
                chunk.states[offset]
            })
        }

        pub(crate) fn insert_state(&self, index: u32, flags: StateFlags) {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of_mut(index);
                chunk.states[offset] |= flags;
            })
        }

        /// Wait frames for CPU access: `(read_wait_frame, write_wait_frame)`.
        pub fn wait_frames(&self, index: u32) -> (u64, u64) {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of(index);
                (chunk.read_wait_frames[offset], chunk.write_wait_frames[offset])
            })
        }

        /// Stamp the frame a reader or writer must wait for before touching the resource
        /// from the CPU.
        pub(crate) fn stamp_wait_frames(&self, index: u32, read: Option<u64>, write: Option<u64>) {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of_mut(index);
                if let Some(frame) = read {
                    chunk.read_wait_frames[offset] = chunk.read_wait_frames[offset].max(frame);
                }
                if let Some(frame) = write {
                    chunk.write_wait_frames[offset] = chunk.write_wait_frames[offset].max(frame);
                }
            })
        }

        pub(crate) fn append_usage(&self, index: u32, usage: ResourceUsage) {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of_mut(index);
                chunk.usages[offset].push(usage);
            })
        }

        /// Snapshot of every slot with a non-empty usage list, in allocation order.
        pub(crate) fn collect_usages(&self) -> Vec<(ResourceHandle, Vec<ResourceUsage>)> {
            self.with(|columns| {
                let mut out = Vec::new();
                for chunk in &columns.chunks {
                    for offset in 0..chunk.len() {
                        if chunk.live[offset] && !chunk.usages[offset].is_empty() {
                            out.push((chunk.handles[offset], chunk.usages[offset].clone()));
                        }
                    }
                }
                out
            })
        }

        /// Drop all usage lists, at the end of a frame.
        pub(crate) fn clear_usages(&self) {
            self.with(|columns| {
                for chunk in &mut columns.chunks {
                    for usages in &mut chunk.usages {
                        usages.clear();
                    }
                }
            })
        }

        pub(crate) fn push_deferred_slice(&self, index: u32, action: DeferredSliceAction) {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of_mut(index);
                chunk.deferred_slices[offset].push(action);
            })
        }

        pub(crate) fn take_deferred_slices(&self, index: u32) -> Vec<DeferredSliceAction> {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of_mut(index);
                std::mem::take(&mut chunk.deferred_slices[offset])
            })
        }

        /// The image layout the resource was left in by its last GPU use.
        pub(crate) fn current_layout(&self, index: u32) -> vk::ImageLayout {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of(index);
                chunk.gpu_layouts[offset]
            })
        }

        pub(crate) fn set_current_layout(&self, index: u32, layout: vk::ImageLayout) {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of_mut(index);
                chunk.gpu_layouts[offset] = layout;
            })
        }

        /// The base resource when `index` holds a view.
        pub(crate) fn base_resource(&self, index: u32) -> ResourceHandle {
            self.with(|columns| {
                let (chunk, offset) = columns.chunk_of(index);
                chunk.base_resources[offset]
            })
        }
    };
}

/// Registry for resources owned by the current frame. Indices reset wholesale every
/// frame; backing memory may be aliased by the backend.
#[derive(Debug, Clone, Default)]
pub struct TransientRegistry {
    inner: Arc<Mutex<Columns>>,
}

impl TransientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Columns) -> R) -> R {
        let mut columns = self.inner.lock().unwrap();
        f(&mut columns)
    }

    column_accessors!();

    /// Allocate a transient slot and return its handle.
    pub fn allocate(
        &self,
        ty: ResourceType,
        flags: ResourceFlags,
        descriptor: ResourceDescriptor,
        label: Option<String>,
    ) -> ResourceHandle {
        assert!(
            !flags.uses_persistent_registry(),
            "persistent resources must be allocated from the persistent registry"
        );
        self.with(|columns| {
            let index = columns.count;
            let handle = ResourceHandle::new(ty, flags, index);
            columns.append_slot(handle, descriptor, label);
            #[cfg(feature = "log-objects")]
            trace!("Allocated transient slot {handle:?}");
            handle
        })
    }

    /// Allocate a view slot referencing `base`. Views are transient only and their usage
    /// lists alias the base resource's.
    pub(crate) fn allocate_view(
        &self,
        ty: ResourceType,
        flags: ResourceFlags,
        descriptor: ResourceDescriptor,
        base: ResourceHandle,
    ) -> ResourceHandle {
        assert!(base.is_valid(), "a resource view needs a valid base resource");
        self.with(|columns| {
            let index = columns.count;
            let handle = ResourceHandle::new(ty, flags | ResourceFlags::RESOURCE_VIEW, index);
            columns.append_slot(handle, descriptor, None);
            let (chunk, offset) = columns.chunk_of_mut(index);
            chunk.base_resources[offset] = base;
            handle
        })
    }

    /// Number of slots allocated this frame.
    pub fn count(&self) -> u32 {
        self.with(|columns| columns.count)
    }

    /// Reset all per-frame state and recycle every index. Called once per frame by the
    /// executor, after the frame's command buffers have been handed to the backend.
    pub fn cycle_frames(&self) {
        self.with(|columns| {
            for chunk in &mut columns.chunks {
                chunk.handles.clear();
                chunk.descriptors.clear();
                chunk.labels.clear();
                chunk.states.clear();
                chunk.usages.clear();
                chunk.read_wait_frames.clear();
                chunk.write_wait_frames.clear();
                chunk.base_resources.clear();
                chunk.deferred_slices.clear();
                chunk.gpu_layouts.clear();
                chunk.live.clear();
            }
            columns.count = 0;
        })
    }
}

#[derive(Debug, Default)]
struct PersistentInner {
    columns: Columns,
    /// Indices returned by a completed dispose, available for reuse.
    free_indices: Vec<u32>,
    /// Disposed indices still potentially in use by the GPU, keyed by the frame that must
    /// complete before the backing store may be freed.
    deferred_disposes: Vec<(u64, u32)>,
}

/// Registry for caller-owned resources that live across frames.
#[derive(Debug, Clone, Default)]
pub struct PersistentRegistry {
    inner: Arc<Mutex<PersistentInner>>,
}

impl PersistentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Columns) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.columns)
    }

    column_accessors!();

    /// Allocate a persistent slot and return its handle.
    ///
    /// Panics if `descriptor` lacks the usage hint every persistent resource must declare:
    /// persistent resources are materialised before any usage is recorded, so the hint is
    /// the only source of creation flags.
    pub fn allocate(
        &self,
        ty: ResourceType,
        flags: ResourceFlags,
        descriptor: ResourceDescriptor,
        label: Option<String>,
    ) -> ResourceHandle {
        assert!(
            flags.uses_persistent_registry(),
            "transient resources must be allocated from the transient registry"
        );
        assert!(
            descriptor.has_usage_hint(),
            "persistent resource {label:?} created without a usage hint"
        );
        let mut inner = self.inner.lock().unwrap();
        let handle;
        if let Some(index) = inner.free_indices.pop() {
            handle = ResourceHandle::new(ty, flags, index);
            let (chunk, offset) = inner.columns.chunk_of_mut(index);
            chunk.overwrite_slot(offset, handle, descriptor, label);
        } else {
            let index = inner.columns.count;
            handle = ResourceHandle::new(ty, flags, index);
            inner.columns.append_slot(handle, descriptor, label);
        }
        #[cfg(feature = "log-objects")]
        trace!("Allocated persistent slot {handle:?}");
        handle
    }

    /// Queue `index` for disposal once the GPU is done with it. The slot stays live (and
    /// its index unavailable) until [`PersistentRegistry::drain_disposes`] observes the
    /// wait frame as completed.
    ///
    /// Panics on double dispose.
    pub(crate) fn dispose(&self, index: u32) {
        let mut inner = self.inner.lock().unwrap();
        let wait_frame = {
            let (chunk, offset) = inner.columns.chunk_of_mut(index);
            assert!(chunk.live[offset], "persistent resource index {index} disposed twice");
            chunk.live[offset] = false;
            chunk.read_wait_frames[offset].max(chunk.write_wait_frames[offset])
        };
        inner.deferred_disposes.push((wait_frame, index));
    }

    /// Release every queued dispose whose wait frame has completed, returning the handles
    /// whose backing stores the caller must now free. Called before allocations and at
    /// frame boundaries.
    pub(crate) fn drain_disposes(&self, last_completed_frame: u64) -> Vec<ResourceHandle> {
        let mut inner = self.inner.lock().unwrap();
        let mut freed = Vec::new();
        let mut remaining = Vec::with_capacity(inner.deferred_disposes.len());
        for (wait_frame, index) in std::mem::take(&mut inner.deferred_disposes) {
            if wait_frame <= last_completed_frame {
                let (chunk, offset) = inner.columns.chunk_of(index);
                freed.push(chunk.handles[offset]);
                inner.free_indices.push(index);
            } else {
                remaining.push((wait_frame, index));
            }
        }
        inner.deferred_disposes = remaining;
        freed
    }

    /// True if `index` has been allocated and not yet disposed.
    pub fn is_live(&self, index: u32) -> bool {
        self.with(|columns| {
            let (chunk, offset) = columns.chunk_of(index);
            chunk.live[offset]
        })
    }
}
