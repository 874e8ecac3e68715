//! Buffer and texture facade tests: CPU access, slices, immutability and cross-frame
//! wait discipline.

mod framework;

use std::sync::mpsc;
use std::time::Duration;

use deimos::prelude::*;
use framework::{make_context, BackendEvent};

fn upload_buffer(context: &Context, label: &str) -> Buffer {
    Buffer::new_persistent(
        context,
        BufferDescriptor::new(64, MemoryType::CpuToGpu)
            .with_usage(vk::BufferUsageFlags::UNIFORM_BUFFER),
        label,
    )
    .unwrap()
}

#[test]
fn written_slice_flushes_on_drop_and_initialises() {
    let (context, backend) = make_context();
    let buffer = upload_buffer(&context, "constants");
    assert!(!buffer.is_initialised());
    backend.take_events();

    {
        let mut slice = buffer.slice(0..16, SliceAccess::Write).unwrap();
        slice.copy_from_slice(&[1.0f32, 2.0, 3.0, 4.0]);
    }
    assert!(buffer.is_initialised());
    assert!(backend.events().contains(&BackendEvent::DidModifyRange {
        buffer: buffer.handle(),
        range: 0..16,
    }));

    let slice = buffer.slice(0..16, SliceAccess::Read).unwrap();
    let values = slice.as_typed::<f32>();
    assert_eq!(&*values, &[1.0, 2.0, 3.0, 4.0]);

    // A read-only slice does not flush.
    drop(slice);
    let flushes = backend
        .events()
        .iter()
        .filter(|event| matches!(event, BackendEvent::DidModifyRange { .. }))
        .count();
    assert_eq!(flushes, 1);
}

#[test]
#[should_panic(expected = "out of range")]
fn out_of_range_slice_is_fatal() {
    let (context, _backend) = make_context();
    let buffer = upload_buffer(&context, "small");
    let _ = buffer.slice(32..128, SliceAccess::Read);
}

#[test]
fn device_local_buffers_cannot_be_mapped() {
    let (context, _backend) = make_context();
    let buffer = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(64, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER),
        "device-local",
    )
    .unwrap();
    let error = buffer.slice(0..64, SliceAccess::Read).unwrap_err();
    assert!(matches!(error.downcast_ref::<Error>(), Some(Error::UnmappableBuffer)));
}

#[test]
#[should_panic(expected = "immutable buffer")]
fn immutable_buffer_rejects_writes_after_initialisation() {
    let (context, _backend) = make_context();
    let buffer = Buffer::with_flags(
        &context,
        BufferDescriptor::new(64, MemoryType::CpuToGpu)
            .with_usage(vk::BufferUsageFlags::UNIFORM_BUFFER),
        ResourceFlags::PERSISTENT | ResourceFlags::IMMUTABLE_ONCE_INITIALISED,
        Some("immutable".into()),
    )
    .unwrap();

    buffer
        .slice(0..64, SliceAccess::Write)
        .unwrap()
        .as_bytes_mut()
        .fill(1);
    // First write initialised the buffer; the second is rejected.
    let _ = buffer.slice(0..64, SliceAccess::Write);
}

#[test]
fn deferred_slice_on_materialised_buffer_runs_immediately() {
    let (context, backend) = make_context();
    let buffer = upload_buffer(&context, "eager");
    buffer.with_deferred_slice(0..8, |bytes| bytes.copy_from_slice(&[9; 8]));

    assert_eq!(
        backend.buffer_contents(buffer.handle()).unwrap()[..8],
        [9u8; 8]
    );
    assert!(buffer.is_initialised());
}

#[test]
fn texture_region_round_trip() {
    let (context, _backend) = make_context();
    let texture = Texture::new_persistent(
        &context,
        TextureDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 2, 2)
            .with_usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST),
        "pixels",
    )
    .unwrap();

    let data = [10u8, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110, 120, 130, 140, 150, 160];
    let region = TextureRegion::full(&texture.descriptor());
    texture.replace_region(region, 0, 0, &data, 8).unwrap();
    assert!(texture.is_initialised());

    let mut readback = [0u8; 16];
    texture.copy_region_to(region, 0, 0, &mut readback, 8).unwrap();
    assert_eq!(readback, data);
}

#[test]
fn inflight_semaphore_blocks_at_capacity() {
    let semaphore = InflightFrameSemaphore::new(2);
    semaphore.acquire();
    semaphore.acquire();

    let (sender, receiver) = mpsc::channel();
    let blocked = semaphore.clone();
    std::thread::spawn(move || {
        blocked.acquire();
        sender.send(()).unwrap();
    });
    // The third acquire parks until a slot is returned.
    assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
    semaphore.signal();
    receiver.recv_timeout(Duration::from_secs(5)).unwrap();
}

#[test]
fn cpu_access_waits_on_the_stamped_frame() {
    let (context, _backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = upload_buffer(&context, "readback");

    graph.add_compute_pass("produce", |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    // The write stamped frame 1; with the backend retiring synchronously the wait is
    // already satisfied and the read proceeds.
    let (_, write_wait) = context.persistent_registry().wait_frames(buffer.handle().index());
    assert_eq!(write_wait, 1);
    assert!(context.frame_completion().last_completed_frame() >= write_wait);
    let slice = buffer.slice(0..4, SliceAccess::Read).unwrap();
    assert_eq!(slice.as_bytes().len(), 4);
}
