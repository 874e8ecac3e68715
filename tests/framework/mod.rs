//! Test framework: a backend that records every call it receives into an inspectable
//! event log, plus context constructors for the tests. No GPU required.

// Each test binary uses a different subset of the framework.
#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use deimos::backend::{
    Backend, BufferBarrierInfo, CompletionCallback, ImageBarrierInfo, MemoryBarrierInfo,
    ResourceCommand,
};
use deimos::graph::compile::{CompiledRenderPass, EncoderKind, SubpassDependency};
use deimos::graph::record::FrameCommand;
use deimos::prelude::vk;
use deimos::resource::descriptor::{BufferDescriptor, TextureDescriptor, TextureRegion};
use deimos::{Context, Queue, QueueType, ResourceHandle};

/// One observed backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    MaterialiseBuffer {
        buffer: ResourceHandle,
        usage: vk::BufferUsageFlags,
    },
    MaterialiseTexture {
        texture: ResourceHandle,
        usage: vk::ImageUsageFlags,
    },
    Dispose(ResourceHandle),
    DidModifyRange {
        buffer: ResourceHandle,
        range: Range<vk::DeviceSize>,
    },
    BeginCommandBuffer(u32),
    EndCommandBuffer(u32),
    BeginRenderPass {
        subpass_count: u32,
        dependencies: Vec<SubpassDependency>,
        initial_layouts: Vec<(ResourceHandle, vk::ImageLayout)>,
        final_layouts: Vec<(ResourceHandle, vk::ImageLayout)>,
    },
    NextSubpass,
    EndRenderPass,
    BeginEncoder(EncoderKind),
    EndEncoder,
    /// A replayed pass command, rendered with `Debug`.
    Command(String),
    PipelineBarrier {
        memory: Vec<MemoryBarrierInfo>,
        buffers: Vec<BufferBarrierInfo>,
        images: Vec<ImageBarrierInfo>,
    },
    SignalEvent {
        event: u32,
        stages: vk::PipelineStageFlags2,
    },
    WaitForEvents {
        events: Vec<u32>,
        buffers: Vec<BufferBarrierInfo>,
        images: Vec<ImageBarrierInfo>,
    },
    Submit {
        command_buffer: u32,
        queue: u32,
        signal_value: u64,
    },
}

#[derive(Default)]
struct TestBackendState {
    events: Vec<BackendEvent>,
    buffers: HashMap<u64, Box<[u8]>>,
    textures: HashMap<u64, Vec<u8>>,
}

/// Backend that records calls and keeps buffer contents in host memory. Command buffers
/// complete synchronously at submit.
#[derive(Default)]
pub struct TestBackend {
    state: Mutex<TestBackendState>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<BackendEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Drain the event log.
    pub fn take_events(&self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.state.lock().unwrap().events)
    }

    /// The bytes currently stored for a buffer.
    pub fn buffer_contents(&self, buffer: ResourceHandle) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .buffers
            .get(&buffer.as_raw())
            .map(|bytes| bytes.to_vec())
    }

    fn record(&self, event: BackendEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}

impl Backend for TestBackend {
    fn materialise_buffer(
        &self,
        buffer: ResourceHandle,
        descriptor: &BufferDescriptor,
        usage: vk::BufferUsageFlags,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .buffers
            .insert(buffer.as_raw(), vec![0u8; descriptor.size as usize].into_boxed_slice());
        state.events.push(BackendEvent::MaterialiseBuffer {
            buffer,
            usage,
        });
        Ok(())
    }

    fn materialise_texture(
        &self,
        texture: ResourceHandle,
        _descriptor: &TextureDescriptor,
        usage: vk::ImageUsageFlags,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.textures.insert(texture.as_raw(), Vec::new());
        state.events.push(BackendEvent::MaterialiseTexture {
            texture,
            usage,
        });
        Ok(())
    }

    fn is_materialised(&self, resource: ResourceHandle) -> bool {
        let state = self.state.lock().unwrap();
        state.buffers.contains_key(&resource.as_raw())
            || state.textures.contains_key(&resource.as_raw())
    }

    fn dispose_resource(&self, resource: ResourceHandle) {
        let mut state = self.state.lock().unwrap();
        state.buffers.remove(&resource.as_raw());
        state.textures.remove(&resource.as_raw());
        state.events.push(BackendEvent::Dispose(resource));
    }

    fn map_buffer(
        &self,
        buffer: ResourceHandle,
        range: Range<vk::DeviceSize>,
    ) -> Result<NonNull<u8>> {
        let mut state = self.state.lock().unwrap();
        let bytes = state
            .buffers
            .get_mut(&buffer.as_raw())
            .ok_or(deimos::Error::UnmappableBuffer)?;
        assert!(range.end as usize <= bytes.len());
        // The box's heap block is stable while the entry lives, so the pointer stays
        // valid after the lock drops.
        let pointer = unsafe { bytes.as_mut_ptr().add(range.start as usize) };
        Ok(NonNull::new(pointer).unwrap())
    }

    fn did_modify_range(&self, buffer: ResourceHandle, range: Range<vk::DeviceSize>) {
        self.record(BackendEvent::DidModifyRange {
            buffer,
            range,
        });
    }

    fn replace_texture_region(
        &self,
        texture: ResourceHandle,
        _region: TextureRegion,
        _mip_level: u32,
        _array_slice: u32,
        data: &[u8],
        _bytes_per_row: u32,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.textures.insert(texture.as_raw(), data.to_vec());
        Ok(())
    }

    fn copy_texture_region(
        &self,
        texture: ResourceHandle,
        _region: TextureRegion,
        _mip_level: u32,
        _array_slice: u32,
        out: &mut [u8],
        _bytes_per_row: u32,
    ) -> Result<()> {
        let state = self.state.lock().unwrap();
        if let Some(data) = state.textures.get(&texture.as_raw()) {
            let len = out.len().min(data.len());
            out[..len].copy_from_slice(&data[..len]);
        }
        Ok(())
    }

    fn prepare_events(&self, _count: u32) {}

    fn begin_command_buffer(&self, index: u32, _queue: &Queue) {
        self.record(BackendEvent::BeginCommandBuffer(index));
    }

    fn begin_render_pass(&self, render_pass: &CompiledRenderPass) -> Result<()> {
        self.record(BackendEvent::BeginRenderPass {
            subpass_count: render_pass.subpass_count,
            dependencies: render_pass.dependencies.clone(),
            initial_layouts: render_pass.initial_layouts.clone(),
            final_layouts: render_pass.final_layouts.clone(),
        });
        Ok(())
    }

    fn next_subpass(&self) {
        self.record(BackendEvent::NextSubpass);
    }

    fn end_render_pass(&self) {
        self.record(BackendEvent::EndRenderPass);
    }

    fn begin_encoder(&self, kind: EncoderKind) {
        self.record(BackendEvent::BeginEncoder(kind));
    }

    fn end_encoder(&self) {
        self.record(BackendEvent::EndEncoder);
    }

    fn record_command(&self, command: &FrameCommand) -> Result<()> {
        self.record(BackendEvent::Command(format!("{command:?}")));
        Ok(())
    }

    fn record_resource_command(&self, command: &ResourceCommand) -> Result<()> {
        let event = match command {
            ResourceCommand::PipelineBarrier {
                memory,
                buffers,
                images,
            } => BackendEvent::PipelineBarrier {
                memory: memory.clone(),
                buffers: buffers.clone(),
                images: images.clone(),
            },
            ResourceCommand::SignalEvent {
                event,
                stages,
            } => BackendEvent::SignalEvent {
                event: *event,
                stages: *stages,
            },
            ResourceCommand::WaitForEvents {
                events,
                buffers,
                images,
                ..
            } => BackendEvent::WaitForEvents {
                events: events.clone(),
                buffers: buffers.clone(),
                images: images.clone(),
            },
            other => panic!("unexpected resource command in the record stream: {other:?}"),
        };
        self.record(event);
        Ok(())
    }

    fn end_command_buffer(&self, index: u32) {
        self.record(BackendEvent::EndCommandBuffer(index));
    }

    fn submit(
        &self,
        index: u32,
        queue: &Queue,
        signal_value: u64,
        on_complete: CompletionCallback,
    ) -> Result<()> {
        self.record(BackendEvent::Submit {
            command_buffer: index,
            queue: queue.index(),
            signal_value,
        });
        // The test backend retires work instantly.
        on_complete(Ok(()));
        Ok(())
    }
}

/// A context over a [`TestBackend`] with a single graphics queue.
pub fn make_context() -> (Context, Arc<TestBackend>) {
    make_context_with_queues([QueueType::Graphics])
}

/// A context over a [`TestBackend`] with the given queues.
pub fn make_context_with_queues(
    queues: impl IntoIterator<Item = QueueType>,
) -> (Context, Arc<TestBackend>) {
    let backend = Arc::new(TestBackend::new());
    let context = Context::new(backend.clone(), queues);
    (context, backend)
}
