//! Handle encoding and registry lifetime tests.

mod framework;

use deimos::prelude::*;
use deimos::resource::descriptor::ResourceDescriptor;
use deimos::resource::handle::MAX_RESOURCE_INDEX;
use framework::{make_context, BackendEvent};

#[test]
fn handle_round_trip() {
    let types = [
        ResourceType::Buffer,
        ResourceType::Texture,
        ResourceType::Sampler,
        ResourceType::ThreadgroupMemory,
        ResourceType::ArgumentBuffer,
        ResourceType::ArgumentBufferArray,
        ResourceType::ImageblockData,
        ResourceType::Imageblock,
    ];
    let flag_sets = [
        ResourceFlags::empty(),
        ResourceFlags::PERSISTENT,
        ResourceFlags::PERSISTENT | ResourceFlags::IMMUTABLE_ONCE_INITIALISED,
        ResourceFlags::HISTORY_BUFFER,
        ResourceFlags::WINDOW_HANDLE | ResourceFlags::EXTERNAL_OWNERSHIP,
        ResourceFlags::RESOURCE_VIEW,
    ];
    let mut seen = std::collections::HashSet::new();
    for ty in types {
        for flags in flag_sets {
            for index in [0, 1, 255, 256, 12345, MAX_RESOURCE_INDEX] {
                let handle = ResourceHandle::new(ty, flags, index);
                assert_eq!(handle.resource_type(), ty);
                assert_eq!(handle.flags(), flags);
                assert_eq!(handle.index(), index);
                assert!(handle.is_valid());
                // Injectivity: every distinct (type, flags, index) has distinct bits.
                assert!(seen.insert(handle.as_raw()));
            }
        }
    }
}

#[test]
fn handle_bit_layout_is_stable() {
    // The encoding is a stability contract: type in bits 48..56, flags in 32..48,
    // index in 0..32.
    let handle = ResourceHandle::new(ResourceType::Texture, ResourceFlags::PERSISTENT, 5);
    assert_eq!(handle.as_raw(), (1u64 << 48) | (1u64 << 32) | 5);
    assert_eq!(ResourceHandle::INVALID.as_raw(), u64::MAX);
    assert!(!ResourceHandle::INVALID.is_valid());
    assert_eq!(ResourceHandle::default(), ResourceHandle::INVALID);
}

#[test]
#[should_panic(expected = "unknown resource type")]
fn unknown_type_bits_are_fatal() {
    let corrupted = ResourceHandle::from_raw(200u64 << 48);
    let _ = corrupted.resource_type();
}

#[test]
#[should_panic(expected = "29-bit handle index space")]
fn out_of_range_index_is_fatal() {
    let _ = ResourceHandle::new(ResourceType::Buffer, ResourceFlags::empty(), MAX_RESOURCE_INDEX + 1);
}

#[test]
fn transient_registry_spills_into_chunks_and_recycles() {
    let registry = TransientRegistry::new();
    let descriptor =
        ResourceDescriptor::Buffer(BufferDescriptor::new(16, MemoryType::GpuOnly));

    let mut handles = Vec::new();
    for index in 0..600u32 {
        let handle = registry.allocate(
            ResourceType::Buffer,
            ResourceFlags::empty(),
            descriptor.clone(),
            Some(format!("scratch-{index}")),
        );
        assert_eq!(handle.index(), index);
        handles.push(handle);
    }
    assert_eq!(registry.count(), 600);
    // Slots across the chunk boundary read back their own columns.
    assert_eq!(registry.label(255).as_deref(), Some("scratch-255"));
    assert_eq!(registry.label(256).as_deref(), Some("scratch-256"));
    assert_eq!(registry.descriptor(599), descriptor);

    registry.cycle_frames();
    assert_eq!(registry.count(), 0);
    let recycled = registry.allocate(
        ResourceType::Buffer,
        ResourceFlags::empty(),
        descriptor,
        None,
    );
    assert_eq!(recycled.index(), 0);
}

#[test]
fn persistent_dispose_is_deferred_until_frame_completion() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(64, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER),
        "doomed",
    )
    .unwrap();
    let handle = buffer.handle();

    graph.add_compute_pass("touch", |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    backend.take_events();
    // The frame completed (test backend retires synchronously), so the dispose drains
    // immediately and the backing store is freed.
    buffer.dispose();
    assert!(backend.events().contains(&BackendEvent::Dispose(handle)));

    // The freed index is recycled for the next persistent allocation.
    let next = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(32, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER),
        "replacement",
    )
    .unwrap();
    assert_eq!(next.handle().index(), handle.index());
}

#[test]
#[should_panic(expected = "disposed twice")]
fn double_dispose_is_fatal() {
    let (context, _backend) = make_context();
    let buffer = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(64, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER),
        "twice",
    )
    .unwrap();
    let handle = buffer.handle();
    context.dispose(handle);
    context.dispose(handle);
}

#[test]
#[should_panic(expected = "usage hint")]
fn persistent_resource_without_usage_hint_is_fatal() {
    let (context, _backend) = make_context();
    let _ = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(64, MemoryType::GpuOnly),
        "hintless",
    );
}
