//! The deimos context.
//!
//! A [`Context`] bundles the process-wide pieces every other component needs: the two
//! resource registries, the frame completion counter, the logical queues and the backend.
//! It is cheap to clone (everything inside is shared) and is passed to the frame graph,
//! the facades and the uploader explicitly. For ergonomics a thread-safe singleton
//! accessor is provided, initialized at startup and torn down at shutdown.

use std::sync::{Arc, Mutex, OnceLock};

use crate::backend::Backend;
use crate::graph::pass::PassKind;
use crate::graph::usage::ResourceUsage;
use crate::resource::descriptor::{DeferredSliceAction, ResourceDescriptor};
use crate::resource::handle::{ResourceFlags, ResourceHandle, StateFlags};
use crate::resource::registry::{PersistentRegistry, TransientRegistry};
use crate::sync::frame_completion::FrameCompletion;
use crate::sync::queue::{Queue, QueueType};

static CURRENT: OnceLock<Mutex<Option<Context>>> = OnceLock::new();

/// Shared state behind every frame graph. Clones observe the same registries, queues and
/// completion counter.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    transient: TransientRegistry,
    persistent: PersistentRegistry,
    completion: FrameCompletion,
    queues: Vec<Queue>,
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("queues", &self.inner.queues)
            .field("last_completed_frame", &self.inner.completion.last_completed_frame())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context over `backend` with one logical queue per entry of `queues`.
    pub fn new(backend: Arc<dyn Backend>, queues: impl IntoIterator<Item = QueueType>) -> Self {
        let queues = queues
            .into_iter()
            .enumerate()
            .map(|(index, queue_type)| Queue::new(index as u32, queue_type))
            .collect::<Vec<_>>();
        assert!(!queues.is_empty(), "a context needs at least one queue");
        info!("Created context with queues:");
        for queue in &queues {
            info!("  Queue #{} supports {:?}", queue.index(), queue.queue_type());
        }
        Context {
            inner: Arc::new(ContextInner {
                transient: TransientRegistry::new(),
                persistent: PersistentRegistry::new(),
                completion: FrameCompletion::new(),
                queues,
                backend,
            }),
        }
    }

    pub fn transient_registry(&self) -> &TransientRegistry {
        &self.inner.transient
    }

    pub fn persistent_registry(&self) -> &PersistentRegistry {
        &self.inner.persistent
    }

    pub fn frame_completion(&self) -> &FrameCompletion {
        &self.inner.completion
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn queues(&self) -> &[Queue] {
        &self.inner.queues
    }

    /// The first queue of the given type, if one was requested at creation.
    pub fn queue(&self, queue_type: QueueType) -> Option<Queue> {
        self.inner
            .queues
            .iter()
            .find(|queue| queue.queue_type() == queue_type)
            .cloned()
    }

    /// The queue a pass of `kind` runs on when none is named explicitly. Compute and blit
    /// work falls back to more general queues when no dedicated one exists.
    pub(crate) fn default_queue_for(&self, kind: PassKind) -> Queue {
        let preference: &[QueueType] = match kind {
            PassKind::Draw | PassKind::External | PassKind::Cpu => &[QueueType::Graphics],
            PassKind::Compute => &[QueueType::Compute, QueueType::Graphics],
            PassKind::Blit => &[QueueType::Transfer, QueueType::Compute, QueueType::Graphics],
        };
        preference
            .iter()
            .find_map(|&queue_type| self.queue(queue_type))
            .unwrap_or_else(|| self.inner.queues[0].clone())
    }

    // --- Registry dispatch -------------------------------------------------------------
    // A handle routes to its registry through its lifecycle flags; these helpers keep
    // that dispatch in one place.

    pub fn descriptor(&self, handle: ResourceHandle) -> ResourceDescriptor {
        if handle.uses_persistent_registry() {
            self.inner.persistent.descriptor(handle.index())
        } else {
            self.inner.transient.descriptor(handle.index())
        }
    }

    pub fn label(&self, handle: ResourceHandle) -> Option<String> {
        if handle.uses_persistent_registry() {
            self.inner.persistent.label(handle.index())
        } else {
            self.inner.transient.label(handle.index())
        }
    }

    pub fn state(&self, handle: ResourceHandle) -> StateFlags {
        if handle.uses_persistent_registry() {
            self.inner.persistent.state(handle.index())
        } else {
            self.inner.transient.state(handle.index())
        }
    }

    pub(crate) fn insert_state(&self, handle: ResourceHandle, flags: StateFlags) {
        if handle.uses_persistent_registry() {
            self.inner.persistent.insert_state(handle.index(), flags);
        } else {
            self.inner.transient.insert_state(handle.index(), flags);
        }
    }

    /// Resolve a view to its base resource; other handles resolve to themselves. A view's
    /// usage list aliases its base's, so everything usage-related goes through this.
    pub(crate) fn resolve_base(&self, handle: ResourceHandle) -> ResourceHandle {
        if handle.is_view() {
            // Views are transient only.
            self.inner.transient.base_resource(handle.index())
        } else {
            handle
        }
    }

    pub(crate) fn append_usage(&self, handle: ResourceHandle, usage: ResourceUsage) {
        let base = self.resolve_base(handle);
        if base.uses_persistent_registry() {
            self.inner.persistent.append_usage(base.index(), usage);
        } else {
            self.inner.transient.append_usage(base.index(), usage);
        }
    }

    pub(crate) fn stamp_wait_frames(
        &self,
        handle: ResourceHandle,
        read: Option<u64>,
        write: Option<u64>,
    ) {
        if handle.uses_persistent_registry() {
            self.inner.persistent.stamp_wait_frames(handle.index(), read, write);
        } else {
            self.inner.transient.stamp_wait_frames(handle.index(), read, write);
        }
    }

    pub(crate) fn push_deferred_slice(&self, handle: ResourceHandle, action: DeferredSliceAction) {
        if handle.uses_persistent_registry() {
            self.inner.persistent.push_deferred_slice(handle.index(), action);
        } else {
            self.inner.transient.push_deferred_slice(handle.index(), action);
        }
    }

    pub(crate) fn current_layout(&self, handle: ResourceHandle) -> ash::vk::ImageLayout {
        if handle.uses_persistent_registry() {
            self.inner.persistent.current_layout(handle.index())
        } else {
            self.inner.transient.current_layout(handle.index())
        }
    }

    pub(crate) fn set_current_layout(&self, handle: ResourceHandle, layout: ash::vk::ImageLayout) {
        if handle.uses_persistent_registry() {
            self.inner.persistent.set_current_layout(handle.index(), layout);
        } else {
            self.inner.transient.set_current_layout(handle.index(), layout);
        }
    }

    pub(crate) fn take_deferred_slices(&self, handle: ResourceHandle) -> Vec<DeferredSliceAction> {
        if handle.uses_persistent_registry() {
            self.inner.persistent.take_deferred_slices(handle.index())
        } else {
            self.inner.transient.take_deferred_slices(handle.index())
        }
    }

    // --- CPU access discipline ---------------------------------------------------------

    /// Block until CPU access of the given kind is safe on `handle`. Reads wait on the
    /// last GPU write; writes wait on the last GPU read and write.
    pub fn wait_for_cpu_access(&self, handle: ResourceHandle, write: bool) {
        if !handle.uses_persistent_registry() {
            // Transient resources belong to the frame being recorded; nothing to wait on.
            return;
        }
        let (read_wait, write_wait) = self.inner.persistent.wait_frames(handle.index());
        let frame = if write {
            read_wait.max(write_wait)
        } else {
            write_wait
        };
        if frame > 0 {
            self.inner.completion.wait_for_frame(frame);
        }
    }

    // --- Disposal ----------------------------------------------------------------------

    /// Dispose a persistent resource. The backing store is freed once every frame that
    /// touched the resource has completed on the GPU.
    pub fn dispose(&self, handle: ResourceHandle) {
        assert!(handle.is_valid(), "cannot dispose an invalid handle");
        assert!(
            handle.uses_persistent_registry(),
            "transient resources are disposed collectively when their frame executes"
        );
        self.inner.persistent.dispose(handle.index());
        self.drain_disposes();
    }

    /// Free every disposed resource whose last GPU use has completed. Called before
    /// persistent allocations and at frame boundaries.
    pub(crate) fn drain_disposes(&self) {
        let completed = self.inner.completion.last_completed_frame();
        for handle in self.inner.persistent.drain_disposes(completed) {
            // Externally owned memory was registered by the application and is never
            // freed here.
            if !handle.flags().contains(ResourceFlags::EXTERNAL_OWNERSHIP) {
                self.inner.backend.dispose_resource(handle);
            }
        }
    }

    // --- Singleton ---------------------------------------------------------------------

    /// Install this context as the process-wide current context.
    pub fn make_current(&self) {
        let slot = CURRENT.get_or_init(|| Mutex::new(None));
        *slot.lock().unwrap() = Some(self.clone());
    }

    /// The process-wide current context, if one was installed.
    pub fn current() -> Option<Context> {
        CURRENT.get().and_then(|slot| slot.lock().unwrap().clone())
    }

    /// Tear down the process-wide current context.
    pub fn clear_current() {
        if let Some(slot) = CURRENT.get() {
            *slot.lock().unwrap() = None;
        }
    }
}
