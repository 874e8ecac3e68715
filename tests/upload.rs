//! Resource uploader tests: budget discipline and the direct/staged copy paths.

mod framework;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use deimos::prelude::*;
use framework::{make_context, BackendEvent};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

fn submit_count(backend: &framework::TestBackend) -> usize {
    backend
        .events()
        .iter()
        .filter(|event| matches!(event, BackendEvent::Submit { .. }))
        .count()
}

#[test]
fn budget_overflow_flushes_synchronously() {
    let (context, backend) = make_context();
    let mut uploader = ResourceUploader::with_budget(&context, MIB);
    let target = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(400 * KIB, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST),
        "bulk",
    )
    .unwrap();

    let mut stage_one = |uploader: &mut ResourceUploader| {
        uploader
            .add_upload_pass(400 * KIB, |staging, encoder| {
                staging.with_deferred_slice(0..4, |bytes| bytes.fill(1));
                encoder.copy_buffer(staging, 0, &target, 0, 400 * KIB);
            })
            .unwrap();
    };

    stage_one(&mut uploader);
    stage_one(&mut uploader);
    assert_eq!(uploader.enqueued_bytes(), 800 * KIB);
    assert_eq!(submit_count(&backend), 0);

    // The third pass would put the batch at 1.2 MiB, so the pending 800 KiB flush first.
    stage_one(&mut uploader);
    assert_eq!(uploader.enqueued_bytes(), 400 * KIB);
    assert_eq!(submit_count(&backend), 1);

    uploader.flush().unwrap();
    assert_eq!(uploader.enqueued_bytes(), 0);
    assert_eq!(submit_count(&backend), 2);
}

#[test]
fn oversized_upload_is_rejected() {
    let (context, _backend) = make_context();
    let mut uploader = ResourceUploader::with_budget(&context, MIB);
    let error = uploader
        .add_upload_pass(2 * MIB, |_staging, _encoder| {})
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::UploadTooLarge {
            requested,
            budget,
        }) if *requested == 2 * MIB && *budget == MIB
    ));
}

#[test]
fn host_visible_targets_are_written_directly() {
    let (context, backend) = make_context();
    let mut uploader = ResourceUploader::new(&context);
    let target = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(64, MemoryType::CpuToGpu)
            .with_usage(vk::BufferUsageFlags::UNIFORM_BUFFER),
        "host-visible",
    )
    .unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    uploader
        .upload_to_buffer(&target, 8, &[5u8; 16], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    // No staging, no GPU work; the callback has already run.
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(uploader.enqueued_bytes(), 0);
    assert_eq!(submit_count(&backend), 0);
    assert_eq!(backend.buffer_contents(target.handle()).unwrap()[8..24], [5u8; 16]);
}

#[test]
fn device_local_targets_are_staged_and_complete_on_flush() {
    let (context, backend) = make_context();
    let mut uploader = ResourceUploader::new(&context);
    let target = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(256, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST),
        "device-local",
    )
    .unwrap();
    backend.take_events();

    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    uploader
        .upload_to_buffer(&target, 0, &[3u8; 128], move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(uploader.enqueued_bytes(), 128);
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    uploader.flush().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(uploader.enqueued_bytes(), 0);

    let events = backend.events();
    assert!(events
        .iter()
        .any(|event| matches!(event, BackendEvent::Command(text) if text.starts_with("CopyBuffer"))));
    assert!(events
        .iter()
        .any(|event| matches!(event, BackendEvent::BeginEncoder(EncoderKind::Blit))));
    assert_eq!(submit_count(&backend), 1);
}

#[test]
fn texture_uploads_record_a_buffer_to_texture_copy() {
    let (context, backend) = make_context();
    let mut uploader = ResourceUploader::new(&context);
    let target = Texture::new_persistent(
        &context,
        TextureDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4)
            .with_usage(vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST),
        "texture-target",
    )
    .unwrap();
    backend.take_events();

    let region = TextureRegion::full(&target.descriptor());
    uploader
        .upload_to_texture(&target, region, 0, 0, 16, 64, &[7u8; 64], || {})
        .unwrap();
    uploader.flush().unwrap();

    assert!(backend
        .events()
        .iter()
        .any(|event| matches!(event, BackendEvent::Command(text) if text.starts_with("CopyBufferToTexture"))));
}
