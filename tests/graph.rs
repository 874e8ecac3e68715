//! Frame graph compilation and execution tests, driven through the recording backend in
//! the test framework.

mod framework;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use deimos::prelude::*;
use framework::{make_context, make_context_with_queues, BackendEvent};

fn storage_buffer(context: &Context, label: &str) -> Buffer {
    Buffer::new_persistent(
        context,
        BufferDescriptor::new(64, MemoryType::GpuOnly)
            .with_usage(vk::BufferUsageFlags::STORAGE_BUFFER),
        label,
    )
    .unwrap()
}

#[test]
fn write_after_write_in_one_compute_encoder() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = storage_buffer(&context, "target");
    backend.take_events();

    graph.add_compute_pass("c1", |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    graph.add_compute_pass("c2", |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    let events = backend.events();
    // Both passes share one compute encoder in one command buffer.
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, BackendEvent::BeginEncoder(EncoderKind::Compute)))
            .count(),
        1
    );
    let expected = BackendEvent::PipelineBarrier {
        memory: vec![MemoryBarrierInfo {
            src_stages: vk::PipelineStageFlags2::COMPUTE_SHADER,
            src_access: vk::AccessFlags2::SHADER_WRITE,
            dst_stages: vk::PipelineStageFlags2::COMPUTE_SHADER,
            dst_access: vk::AccessFlags2::SHADER_WRITE,
        }],
        buffers: vec![],
        images: vec![],
    };
    let barrier = events.iter().position(|event| event == &expected).unwrap();
    let dispatches = events
        .iter()
        .enumerate()
        .filter(|(_, event)| matches!(event, BackendEvent::Command(text) if text.starts_with("Dispatch")))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    assert_eq!(dispatches.len(), 2);
    // The barrier sits between the two dispatches, and no events are involved.
    assert!(dispatches[0] < barrier && barrier < dispatches[1]);
    assert!(!events
        .iter()
        .any(|event| matches!(event, BackendEvent::SignalEvent { .. } | BackendEvent::WaitForEvents { .. })));
    assert!(events.contains(&BackendEvent::Submit {
        command_buffer: 0,
        queue: 0,
        signal_value: 1,
    }));
}

#[test]
fn read_after_write_across_queues() {
    let (context, backend) = make_context_with_queues([QueueType::Graphics, QueueType::Compute]);
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = storage_buffer(&context, "shared");
    backend.take_events();

    let compute = context.queue(QueueType::Compute);
    graph.add_compute_pass_on("produce", compute, |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    // Reads on the graphics queue, in the fragment stage.
    graph.add_compute_pass_on("consume", context.queue(QueueType::Graphics), |enc| {
        enc.use_resource(
            buffer.handle(),
            ResourceUsageType::Read,
            vk::PipelineStageFlags2::FRAGMENT_SHADER,
        );
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    let events = backend.events();
    let signal = events
        .iter()
        .position(|event| {
            event
                == &BackendEvent::SignalEvent {
                    event: 0,
                    stages: vk::PipelineStageFlags2::COMPUTE_SHADER,
                }
        })
        .expect("missing signal after the producing pass");
    let wait = events
        .iter()
        .position(|event| {
            event
                == &BackendEvent::WaitForEvents {
                    events: vec![0],
                    buffers: vec![BufferBarrierInfo {
                        buffer: buffer.handle(),
                        range: 0..64,
                        src_stages: vk::PipelineStageFlags2::COMPUTE_SHADER,
                        src_access: vk::AccessFlags2::SHADER_WRITE,
                        dst_stages: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                        dst_access: vk::AccessFlags2::SHADER_READ,
                    }],
                    images: vec![],
                }
        })
        .expect("missing wait before the consuming pass");
    assert!(signal < wait);

    // Separate submission lanes mean separate command buffers, submitted in order.
    let submits = events
        .iter()
        .filter_map(|event| match event {
            BackendEvent::Submit {
                command_buffer,
                queue,
                ..
            } => Some((*command_buffer, *queue)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(submits, vec![(0, 1), (1, 0)]);
}

#[test]
fn subpass_fusion_with_sampled_attachment() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);

    let target = Texture::new_persistent(
        &context,
        TextureDescriptor::new_2d(vk::Format::B8G8R8A8_UNORM, 128, 128)
            .with_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT),
        "present-target",
    )
    .unwrap();
    let offscreen = Texture::new(
        &context,
        TextureDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 128, 128),
    );
    backend.take_events();

    let clear = vk::ClearColorValue {
        float32: [0.0, 0.0, 0.0, 1.0],
    };
    let first = RenderTargetDescriptor::new()
        .with_color_attachment(
            target.handle(),
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
            Some(clear),
        )
        .with_color_attachment(
            offscreen.handle(),
            vk::AttachmentLoadOp::CLEAR,
            vk::AttachmentStoreOp::STORE,
            Some(clear),
        );
    let second = RenderTargetDescriptor::new()
        .with_color_attachment(
            target.handle(),
            vk::AttachmentLoadOp::LOAD,
            vk::AttachmentStoreOp::STORE,
            None,
        )
        .with_color_attachment(
            offscreen.handle(),
            vk::AttachmentLoadOp::DONT_CARE,
            vk::AttachmentStoreOp::DONT_CARE,
            None,
        );

    graph.add_draw_pass("offscreen", first, |enc| {
        enc.bind_pipeline("geometry");
        enc.draw(3, 1, 0, 0);
    });
    graph.add_draw_pass("composite", second, |enc| {
        enc.sample_texture(&offscreen, vk::PipelineStageFlags2::FRAGMENT_SHADER);
        enc.bind_pipeline("composite");
        enc.draw(3, 1, 0, 0);
    });
    graph.execute().unwrap();

    let events = backend.events();
    let render_pass = events
        .iter()
        .find_map(|event| match event {
            BackendEvent::BeginRenderPass {
                subpass_count,
                dependencies,
                initial_layouts,
                ..
            } => Some((*subpass_count, dependencies.clone(), initial_layouts.clone())),
            _ => None,
        })
        .expect("no render pass was begun");
    let (subpass_count, dependencies, initial_layouts) = render_pass;

    // The two draw passes fused into one render pass with two subpasses.
    assert_eq!(subpass_count, 2);
    assert_eq!(
        events
            .iter()
            .filter(|event| matches!(event, BackendEvent::BeginRenderPass { .. }))
            .count(),
        1
    );
    assert_eq!(
        events.iter().filter(|event| matches!(event, BackendEvent::NextSubpass)).count(),
        1
    );

    // Writing the offscreen attachment in subpass 0 and sampling it in subpass 1 becomes
    // a subpass dependency.
    assert!(dependencies.contains(&SubpassDependency {
        src_subpass: 0,
        dst_subpass: 1,
        src_stages: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        src_access: vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        dst_stages: vk::PipelineStageFlags2::FRAGMENT_SHADER,
        dst_access: vk::AccessFlags2::SHADER_READ,
        by_region: true,
    }));

    // Both attachments enter the render pass from their pre-frame layouts.
    assert!(initial_layouts.contains(&(offscreen.handle(), vk::ImageLayout::UNDEFINED)));
    assert!(initial_layouts.contains(&(target.handle(), vk::ImageLayout::UNDEFINED)));

    // The transient attachment materialises as a sampled color attachment and is handed
    // back at the end of the frame.
    assert!(events.contains(&BackendEvent::MaterialiseTexture {
        texture: offscreen.handle(),
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
    }));
    let end = events
        .iter()
        .position(|event| matches!(event, BackendEvent::EndRenderPass))
        .unwrap();
    let dispose = events
        .iter()
        .position(|event| event == &BackendEvent::Dispose(offscreen.handle()))
        .unwrap();
    assert!(dispose > end);
}

#[test]
fn transient_buffer_materialisation_with_deferred_slice() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let sink = storage_buffer(&context, "sink");
    backend.take_events();

    let uniforms = Buffer::new(&context, BufferDescriptor::new(64, MemoryType::GpuOnly));
    let written = Arc::new(AtomicBool::new(false));
    let written_flag = written.clone();
    uniforms.with_deferred_slice(0..64, move |bytes| {
        bytes.fill(7);
        written_flag.store(true, Ordering::SeqCst);
    });
    assert!(!written.load(Ordering::SeqCst), "deferred slice ran before materialisation");

    graph.add_compute_pass("integrate", |enc| {
        enc.bind_uniform_buffer(0, &uniforms, 0);
        enc.write_buffer(&sink);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    assert!(written.load(Ordering::SeqCst), "deferred slice never ran");
    let events = backend.events();
    let materialise = events
        .iter()
        .position(|event| {
            event
                == &BackendEvent::MaterialiseBuffer {
                    buffer: uniforms.handle(),
                    usage: vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                }
        })
        .expect("transient buffer never materialised (or with the wrong usage union)");
    // The deferred write flushed to the backend once it ran.
    let flushed = events
        .iter()
        .position(|event| {
            event
                == &BackendEvent::DidModifyRange {
                    buffer: uniforms.handle(),
                    range: 0..64,
                }
        })
        .unwrap();
    let first_command = events
        .iter()
        .position(|event| matches!(event, BackendEvent::Command(_)))
        .unwrap();
    assert!(materialise < flushed && flushed < first_command);
    assert!(events.contains(&BackendEvent::Dispose(uniforms.handle())));
}

#[test]
fn image_layouts_follow_usage() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let sink = storage_buffer(&context, "sink");
    let texture = Texture::new(
        &context,
        TextureDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 4, 4),
    );
    backend.take_events();

    graph.add_compute_pass("produce", |enc| {
        enc.write_texture(&texture);
        enc.dispatch(1, 1, 1);
    });
    graph.add_compute_pass("consume", |enc| {
        enc.use_resource(
            texture.handle(),
            ResourceUsageType::Read,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
        enc.write_buffer(&sink);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    let transitions = backend
        .events()
        .iter()
        .filter_map(|event| match event {
            BackendEvent::PipelineBarrier {
                images, ..
            } if !images.is_empty() => Some((images[0].old_layout, images[0].new_layout)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        transitions,
        vec![
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL),
            (vk::ImageLayout::GENERAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        ]
    );
}

#[test]
fn unreferenced_passes_are_culled() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    backend.take_events();

    let scratch = Buffer::new(&context, BufferDescriptor::new(16, MemoryType::GpuOnly));
    graph.add_compute_pass("dead-end", |enc| {
        enc.write_buffer(&scratch);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    // Nothing escaped the frame: the pass is culled and its resource never materialises.
    assert!(backend.events().is_empty());
    assert_eq!(context.frame_completion().last_completed_frame(), 1);
}

#[test]
fn empty_execute_cycles_frame_state() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    backend.take_events();

    graph.execute().unwrap();
    graph.execute().unwrap();

    assert!(backend.events().is_empty());
    assert_eq!(context.frame_completion().last_completed_frame(), 2);
    assert_eq!(graph.current_frame(), 3);
    context.frame_completion().wait_for_frame(2);
}

#[test]
fn persistent_resources_are_stamped_with_their_frame() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = storage_buffer(&context, "stamped");
    backend.take_events();

    graph.add_compute_pass("touch", |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    graph.execute().unwrap();

    let (read_wait, write_wait) = context.persistent_registry().wait_frames(buffer.handle().index());
    assert_eq!(read_wait.max(write_wait), 1);
    assert_eq!(write_wait, 1);
    // The test backend completes synchronously, so the wait returns immediately.
    context.frame_completion().wait_for_frame(write_wait);
}

#[test]
fn cpu_passes_run_between_gpu_work() {
    let (context, backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = storage_buffer(&context, "target");
    backend.take_events();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    graph.add_cpu_pass("readback-prep", move |enc| {
        enc.use_resource(buffer.handle(), ResourceUsageType::Read);
        enc.perform(move || flag.store(true, Ordering::SeqCst));
    });
    graph.execute().unwrap();

    assert!(ran.load(Ordering::SeqCst));
    // CPU passes emit no backend commands.
    assert!(!backend.events().iter().any(|event| matches!(event, BackendEvent::Command(_))));
}

#[test]
fn pass_graph_dot_dump_names_passes() {
    let (context, _backend) = make_context();
    let mut graph = FrameGraph::new(&context, 2);
    let buffer = storage_buffer(&context, "target");

    graph.add_compute_pass("simulate", |enc| {
        enc.write_buffer(&buffer);
        enc.dispatch(1, 1, 1);
    });
    let dot = graph.dot();
    assert!(dot.contains("simulate"));
    graph.execute().unwrap();
}
