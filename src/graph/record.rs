//! Pass recording.
//!
//! Passes are added to a [`FrameGraph`] through the `add_*_pass` family. Each pass body
//! runs immediately with a typed encoder that appends [`FrameCommand`]s to the frame's
//! command list and emits usage records into the registries. Nothing reaches the backend
//! here; the executor replays the recorded commands after compilation, interleaved with
//! the compacted resource commands the analyzer produced.

use ash::vk;

use crate::core::context::Context;
use crate::graph::pass::{PassKind, RenderPass, RenderPassRecord, RenderTargetDescriptor};
use crate::graph::usage::{ResourceUsage, ResourceUsageType, CPU_BEFORE_RENDER};
use crate::graph::FrameGraph;
use crate::resource::argument_buffer::ArgumentBuffer;
use crate::resource::buffer::Buffer;
use crate::resource::descriptor::TextureRegion;
use crate::resource::handle::{ResourceHandle, StateFlags};
use crate::resource::texture::Texture;
use crate::sync::queue::Queue;

/// One recorded pass command, replayed into a backend encoder by the executor.
#[derive(Debug, Clone)]
pub enum FrameCommand {
    BindPipeline {
        name: String,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: ResourceHandle,
        offset: vk::DeviceSize,
    },
    BindIndexBuffer {
        buffer: ResourceHandle,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    BindUniformBuffer {
        binding: u32,
        buffer: ResourceHandle,
        offset: vk::DeviceSize,
    },
    BindArgumentBuffer {
        index: u32,
        argument_buffer: ResourceHandle,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    Dispatch {
        group_counts: [u32; 3],
    },
    CopyBuffer {
        src: ResourceHandle,
        src_offset: vk::DeviceSize,
        dst: ResourceHandle,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    CopyBufferToTexture {
        src: ResourceHandle,
        src_offset: vk::DeviceSize,
        bytes_per_row: u32,
        bytes_per_image: u32,
        dst: ResourceHandle,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
    },
    CopyTextureToBuffer {
        src: ResourceHandle,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        dst: ResourceHandle,
        dst_offset: vk::DeviceSize,
        bytes_per_row: u32,
        bytes_per_image: u32,
    },
}

/// How a pass uses an attachment, from its load and store actions. An attachment that
/// neither loads nor stores is carried for render pass compatibility only.
fn attachment_usage_type(
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
) -> ResourceUsageType {
    if load_op == vk::AttachmentLoadOp::DONT_CARE && store_op == vk::AttachmentStoreOp::DONT_CARE {
        ResourceUsageType::UnusedRenderTarget
    } else if load_op == vk::AttachmentLoadOp::LOAD {
        ResourceUsageType::ReadWriteRenderTarget
    } else {
        ResourceUsageType::WriteOnlyRenderTarget
    }
}

/// A usage noted during recording, completed with the pass's full command range when the
/// body finishes.
struct PendingUsage {
    resource: ResourceHandle,
    usage_type: ResourceUsageType,
    stages: vk::PipelineStageFlags2,
    first_command: u32,
}

/// Shared recording state behind every typed encoder.
struct PassRecorder<'graph> {
    context: Context,
    commands: &'graph mut Vec<FrameCommand>,
    pass_index: u32,
    usages: Vec<PendingUsage>,
}

impl PassRecorder<'_> {
    fn push_command(&mut self, command: FrameCommand) {
        self.commands.push(command);
    }

    fn declare(&mut self, resource: ResourceHandle, usage_type: ResourceUsageType, stages: vk::PipelineStageFlags2) {
        self.usages.push(PendingUsage {
            resource,
            usage_type,
            stages,
            first_command: self.commands.len() as u32,
        });
    }

    /// Flush pending usages into the registries, closing every command range at the end
    /// of the pass.
    fn finish(self, pass_end: u32) {
        for pending in self.usages {
            if pending.usage_type.is_write() {
                self.context.insert_state(pending.resource, StateFlags::INITIALISED);
            }
            self.context.append_usage(
                pending.resource,
                ResourceUsage {
                    pass: self.pass_index,
                    commands: pending.first_command..pass_end,
                    usage_type: pending.usage_type,
                    stages: pending.stages,
                },
            );
        }
    }
}

macro_rules! common_encoder_methods {
    () => {
        /// Explicitly declare a resource usage that the typed methods cannot infer.
        pub fn use_resource(
            &mut self,
            resource: ResourceHandle,
            usage_type: ResourceUsageType,
            stages: vk::PipelineStageFlags2,
        ) {
            self.recorder.declare(resource, usage_type, stages);
        }

        /// Bind an argument buffer at a logical set index. Every resource recorded in the
        /// argument buffer is declared with its binding's usage type.
        pub fn bind_argument_buffer(
            &mut self,
            index: u32,
            argument_buffer: &ArgumentBuffer,
            stages: vk::PipelineStageFlags2,
        ) {
            self.recorder
                .declare(argument_buffer.handle(), ResourceUsageType::Read, stages);
            for binding in argument_buffer.bindings() {
                let (resource, usage) = binding.value.resource_usage();
                self.recorder.declare(resource, usage, stages);
            }
            self.recorder.push_command(FrameCommand::BindArgumentBuffer {
                index,
                argument_buffer: argument_buffer.handle(),
            });
        }

        pub fn bind_pipeline(&mut self, name: impl Into<String>) {
            self.recorder.push_command(FrameCommand::BindPipeline {
                name: name.into(),
            });
        }
    };
}

/// Encoder for draw passes.
pub struct RenderCommandEncoder<'graph> {
    recorder: PassRecorder<'graph>,
}

impl RenderCommandEncoder<'_> {
    common_encoder_methods!();

    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: &Buffer, offset: vk::DeviceSize) {
        self.recorder.declare(
            buffer.handle(),
            ResourceUsageType::VertexBuffer,
            vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
        );
        self.recorder.push_command(FrameCommand::BindVertexBuffer {
            binding,
            buffer: buffer.handle(),
            offset,
        });
    }

    pub fn bind_index_buffer(&mut self, buffer: &Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.recorder.declare(
            buffer.handle(),
            ResourceUsageType::IndexBuffer,
            vk::PipelineStageFlags2::INDEX_INPUT,
        );
        self.recorder.push_command(FrameCommand::BindIndexBuffer {
            buffer: buffer.handle(),
            offset,
            index_type,
        });
    }

    pub fn bind_uniform_buffer(
        &mut self,
        binding: u32,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        stages: vk::PipelineStageFlags2,
    ) {
        self.recorder
            .declare(buffer.handle(), ResourceUsageType::ConstantBuffer, stages);
        self.recorder.push_command(FrameCommand::BindUniformBuffer {
            binding,
            buffer: buffer.handle(),
            offset,
        });
    }

    /// Declare that a texture is sampled in the given stages.
    pub fn sample_texture(&mut self, texture: &Texture, stages: vk::PipelineStageFlags2) {
        self.recorder
            .declare(texture.handle(), ResourceUsageType::Read, stages);
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.recorder.push_command(FrameCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.recorder.push_command(FrameCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }
}

/// Encoder for compute passes.
pub struct ComputeCommandEncoder<'graph> {
    recorder: PassRecorder<'graph>,
}

impl ComputeCommandEncoder<'_> {
    common_encoder_methods!();

    pub fn bind_uniform_buffer(&mut self, binding: u32, buffer: &Buffer, offset: vk::DeviceSize) {
        self.recorder.declare(
            buffer.handle(),
            ResourceUsageType::ConstantBuffer,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
        self.recorder.push_command(FrameCommand::BindUniformBuffer {
            binding,
            buffer: buffer.handle(),
            offset,
        });
    }

    /// Declare a storage buffer read in the compute stage.
    pub fn read_buffer(&mut self, buffer: &Buffer) {
        self.recorder.declare(
            buffer.handle(),
            ResourceUsageType::Read,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
    }

    /// Declare a storage buffer write in the compute stage.
    pub fn write_buffer(&mut self, buffer: &Buffer) {
        self.recorder.declare(
            buffer.handle(),
            ResourceUsageType::Write,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
    }

    /// Declare a storage texture write in the compute stage.
    pub fn write_texture(&mut self, texture: &Texture) {
        self.recorder.declare(
            texture.handle(),
            ResourceUsageType::Write,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.recorder.push_command(FrameCommand::Dispatch {
            group_counts: [x, y, z],
        });
    }
}

/// Encoder for blit passes.
pub struct BlitCommandEncoder<'graph> {
    recorder: PassRecorder<'graph>,
}

impl BlitCommandEncoder<'_> {
    common_encoder_methods!();

    pub fn copy_buffer(
        &mut self,
        src: &Buffer,
        src_offset: vk::DeviceSize,
        dst: &Buffer,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        self.recorder.declare(
            src.handle(),
            ResourceUsageType::BlitSource,
            vk::PipelineStageFlags2::TRANSFER,
        );
        self.recorder.declare(
            dst.handle(),
            ResourceUsageType::BlitDestination,
            vk::PipelineStageFlags2::TRANSFER,
        );
        self.recorder.push_command(FrameCommand::CopyBuffer {
            src: src.handle(),
            src_offset,
            dst: dst.handle(),
            dst_offset,
            size,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_buffer_to_texture(
        &mut self,
        src: &Buffer,
        src_offset: vk::DeviceSize,
        bytes_per_row: u32,
        bytes_per_image: u32,
        dst: &Texture,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
    ) {
        self.recorder.declare(
            src.handle(),
            ResourceUsageType::BlitSource,
            vk::PipelineStageFlags2::TRANSFER,
        );
        self.recorder.declare(
            dst.handle(),
            ResourceUsageType::BlitDestination,
            vk::PipelineStageFlags2::TRANSFER,
        );
        self.recorder.push_command(FrameCommand::CopyBufferToTexture {
            src: src.handle(),
            src_offset,
            bytes_per_row,
            bytes_per_image,
            dst: dst.handle(),
            region,
            mip_level,
            array_slice,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy_texture_to_buffer(
        &mut self,
        src: &Texture,
        region: TextureRegion,
        mip_level: u32,
        array_slice: u32,
        dst: &Buffer,
        dst_offset: vk::DeviceSize,
        bytes_per_row: u32,
        bytes_per_image: u32,
    ) {
        self.recorder.declare(
            src.handle(),
            ResourceUsageType::BlitSource,
            vk::PipelineStageFlags2::TRANSFER,
        );
        self.recorder.declare(
            dst.handle(),
            ResourceUsageType::BlitDestination,
            vk::PipelineStageFlags2::TRANSFER,
        );
        self.recorder.push_command(FrameCommand::CopyTextureToBuffer {
            src: src.handle(),
            region,
            mip_level,
            array_slice,
            dst: dst.handle(),
            dst_offset,
            bytes_per_row,
            bytes_per_image,
        });
    }
}

/// Encoder for external passes: only declares the resources the externally recorded
/// work touches.
pub struct ExternalCommandEncoder<'graph> {
    recorder: PassRecorder<'graph>,
}

impl ExternalCommandEncoder<'_> {
    pub fn use_resource(
        &mut self,
        resource: ResourceHandle,
        usage_type: ResourceUsageType,
        stages: vk::PipelineStageFlags2,
    ) {
        self.recorder.declare(resource, usage_type, stages);
    }
}

/// Encoder for CPU passes: declares resources at the host stage and carries the work to
/// run at the pass's position during execution.
pub struct CpuCommandEncoder<'graph> {
    recorder: PassRecorder<'graph>,
    work: Option<Box<dyn FnOnce() + Send>>,
}

impl CpuCommandEncoder<'_> {
    /// Declare a resource the CPU work touches. The usage never participates in GPU
    /// ordering but drives materialisation.
    pub fn use_resource(&mut self, resource: ResourceHandle, usage_type: ResourceUsageType) {
        self.recorder.declare(resource, usage_type, CPU_BEFORE_RENDER);
    }

    /// The work to run when the frame executes. At most one closure per pass.
    pub fn perform(&mut self, work: impl FnOnce() + Send + 'static) {
        assert!(self.work.is_none(), "CPU pass already carries work");
        self.work = Some(Box::new(work));
    }
}

impl FrameGraph {
    fn begin_pass(&mut self, kind: PassKind, queue: Option<Queue>) -> (u32, u32, Queue) {
        self.begin_recording();
        let queue = queue.unwrap_or_else(|| self.context().default_queue_for(kind));
        let pass_index = self.passes.len() as u32;
        let first_command = self.commands.len() as u32;
        (pass_index, first_command, queue)
    }

    /// Add a draw pass rendering to `descriptor`'s attachments.
    pub fn add_draw_pass(
        &mut self,
        name: impl Into<String>,
        descriptor: RenderTargetDescriptor,
        body: impl FnOnce(&mut RenderCommandEncoder<'_>),
    ) {
        self.add_draw_pass_on(name, None, descriptor, body)
    }

    /// Add a draw pass on an explicit queue.
    pub fn add_draw_pass_on(
        &mut self,
        name: impl Into<String>,
        queue: Option<Queue>,
        descriptor: RenderTargetDescriptor,
        body: impl FnOnce(&mut RenderCommandEncoder<'_>),
    ) {
        let (pass_index, first_command, queue) = self.begin_pass(PassKind::Draw, queue);
        let mut recorder = PassRecorder {
            context: self.context.clone(),
            commands: &mut self.commands,
            pass_index,
            usages: Vec::new(),
        };
        // Attachments are usages of the whole pass, declared before the body runs.
        for attachment in &descriptor.color_attachments {
            recorder.declare(
                attachment.texture,
                attachment_usage_type(attachment.load_op, attachment.store_op),
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            );
        }
        for attachment in descriptor
            .depth_attachment
            .iter()
            .chain(descriptor.stencil_attachment.iter())
        {
            recorder.declare(
                attachment.texture,
                attachment_usage_type(attachment.load_op, attachment.store_op),
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
            );
        }
        let mut encoder = RenderCommandEncoder {
            recorder,
        };
        body(&mut encoder);
        let end = encoder.recorder.commands.len() as u32;
        encoder.recorder.finish(end);
        self.passes.push(RenderPassRecord {
            name: name.into(),
            pass: RenderPass::Draw(descriptor),
            queue,
            commands: first_command..end,
            active: true,
            color: None,
            cpu_work: None,
        });
    }

    pub fn add_compute_pass(
        &mut self,
        name: impl Into<String>,
        body: impl FnOnce(&mut ComputeCommandEncoder<'_>),
    ) {
        self.add_compute_pass_on(name, None, body)
    }

    pub fn add_compute_pass_on(
        &mut self,
        name: impl Into<String>,
        queue: Option<Queue>,
        body: impl FnOnce(&mut ComputeCommandEncoder<'_>),
    ) {
        let (pass_index, first_command, queue) = self.begin_pass(PassKind::Compute, queue);
        let mut encoder = ComputeCommandEncoder {
            recorder: PassRecorder {
                context: self.context.clone(),
                commands: &mut self.commands,
                pass_index,
                usages: Vec::new(),
            },
        };
        body(&mut encoder);
        let end = encoder.recorder.commands.len() as u32;
        encoder.recorder.finish(end);
        self.passes.push(RenderPassRecord {
            name: name.into(),
            pass: RenderPass::Compute,
            queue,
            commands: first_command..end,
            active: true,
            color: None,
            cpu_work: None,
        });
    }

    pub fn add_blit_pass(
        &mut self,
        name: impl Into<String>,
        body: impl FnOnce(&mut BlitCommandEncoder<'_>),
    ) {
        self.add_blit_pass_on(name, None, body)
    }

    pub fn add_blit_pass_on(
        &mut self,
        name: impl Into<String>,
        queue: Option<Queue>,
        body: impl FnOnce(&mut BlitCommandEncoder<'_>),
    ) {
        let (pass_index, first_command, queue) = self.begin_pass(PassKind::Blit, queue);
        let mut encoder = BlitCommandEncoder {
            recorder: PassRecorder {
                context: self.context.clone(),
                commands: &mut self.commands,
                pass_index,
                usages: Vec::new(),
            },
        };
        body(&mut encoder);
        let end = encoder.recorder.commands.len() as u32;
        encoder.recorder.finish(end);
        self.passes.push(RenderPassRecord {
            name: name.into(),
            pass: RenderPass::Blit,
            queue,
            commands: first_command..end,
            active: true,
            color: None,
            cpu_work: None,
        });
    }

    /// Add a pass whose commands the application records outside the frame graph. The
    /// body declares the resources that work touches so it is ordered correctly.
    pub fn add_external_pass(
        &mut self,
        name: impl Into<String>,
        body: impl FnOnce(&mut ExternalCommandEncoder<'_>),
    ) {
        let (pass_index, first_command, queue) = self.begin_pass(PassKind::External, None);
        let mut encoder = ExternalCommandEncoder {
            recorder: PassRecorder {
                context: self.context.clone(),
                commands: &mut self.commands,
                pass_index,
                usages: Vec::new(),
            },
        };
        body(&mut encoder);
        let end = encoder.recorder.commands.len() as u32;
        encoder.recorder.finish(end);
        self.passes.push(RenderPassRecord {
            name: name.into(),
            pass: RenderPass::External,
            queue,
            commands: first_command..end,
            active: true,
            color: None,
            cpu_work: None,
        });
    }

    /// Add CPU work ordered between GPU passes.
    pub fn add_cpu_pass(
        &mut self,
        name: impl Into<String>,
        body: impl FnOnce(&mut CpuCommandEncoder<'_>),
    ) {
        let (pass_index, first_command, queue) = self.begin_pass(PassKind::Cpu, None);
        let mut encoder = CpuCommandEncoder {
            recorder: PassRecorder {
                context: self.context.clone(),
                commands: &mut self.commands,
                pass_index,
                usages: Vec::new(),
            },
            work: None,
        };
        body(&mut encoder);
        let end = encoder.recorder.commands.len() as u32;
        let work = encoder.work.take();
        encoder.recorder.finish(end);
        self.passes.push(RenderPassRecord {
            name: name.into(),
            pass: RenderPass::Cpu,
            queue,
            commands: first_command..end,
            active: true,
            color: None,
            cpu_work: work,
        });
    }

    /// Set the debug color of the most recently added pass.
    pub fn color_last_pass(&mut self, color: [f32; 4]) {
        if let Some(pass) = self.passes.last_mut() {
            pass.color = Some(color);
        }
    }
}
