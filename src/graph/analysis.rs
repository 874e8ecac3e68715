//! The dependency analyzer.
//!
//! Walks every resource's usage list, first to last, and decides where synchronization
//! must live. Each consecutive pair of active usages is classified by one rule chain:
//!
//! - neither usage writes: nothing to do;
//! - both bind the same render-target kind inside the same render pass: covered by the
//!   subpass self-dependency;
//! - same render pass, different subpasses: a subpass dependency (plus an in-subpass
//!   pipeline barrier with layouts coerced to `GENERAL` when source and destination are
//!   the same subpass);
//! - different queues: a signal/wait event pair, with the layout transition folded into
//!   the wait's image barrier;
//! - otherwise: a pipeline barrier attached before the destination, or after the
//!   source when the source sits inside a render pass and the destination does not.
//!
//! Attachment layout transitions crossing a render pass boundary are folded into the
//! render pass object's initial/final layouts instead of explicit barriers.
//!
//! The analyzer also decides where transient resources materialise (first active usage)
//! and where resources are disposed (after the last active usage), and collects the
//! persistent resources whose wait frames must be stamped at submission.

use ash::vk;

use crate::backend::{
    BufferBarrierInfo, CompactedResourceCommand, EventIndex, ImageBarrierInfo,
    MemoryBarrierInfo, PlacementOrder, ResourceCommand,
};
use crate::core::context::Context;
use crate::graph::compile::{
    CompiledRenderPass, EncoderInfo, EncoderKind, PassSchedule, SubpassDependency, ENCODER_NONE,
};
use crate::graph::pass::RenderPassRecord;
use crate::graph::usage::ResourceUsage;
use crate::resource::descriptor::ResourceDescriptor;
use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType};

pub(crate) struct AnalysisInput<'a> {
    pub passes: &'a [RenderPassRecord],
    pub schedule: &'a [PassSchedule],
    pub encoders: &'a [EncoderInfo],
    pub render_passes: &'a mut Vec<CompiledRenderPass>,
    pub usage_lists: &'a [(ResourceHandle, Vec<ResourceUsage>)],
    pub context: &'a Context,
}

pub(crate) struct AnalysisOutput {
    pub resource_commands: Vec<CompactedResourceCommand>,
    pub wait_stamps: Vec<(ResourceHandle, bool, bool)>,
    pub event_count: u32,
}

/// Placement before the first command of a usage.
fn placement_before(usage: &ResourceUsage) -> (u32, PlacementOrder) {
    (usage.commands.start, PlacementOrder::Before)
}

/// Placement after the last command of a usage. Usages without commands (external
/// passes) anchor at their position in the stream instead.
fn placement_after(usage: &ResourceUsage) -> (u32, PlacementOrder) {
    if usage.commands.is_empty() {
        (usage.commands.start, PlacementOrder::Before)
    } else {
        (usage.commands.end - 1, PlacementOrder::After)
    }
}

struct ResourceAnalysis<'a, 'b> {
    input: &'b mut AnalysisInput<'a>,
    out: &'b mut AnalysisOutput,
    handle: ResourceHandle,
    is_texture: bool,
    is_depth_stencil: bool,
    size: vk::DeviceSize,
}

impl ResourceAnalysis<'_, '_> {
    fn push(&mut self, placement: (u32, PlacementOrder), command: ResourceCommand) {
        self.out.resource_commands.push(CompactedResourceCommand {
            command: placement.0,
            order: placement.1,
            command_data: command,
        });
    }

    /// The draw encoder a usage records into, if any.
    fn draw_encoder(&self, usage: &ResourceUsage) -> Option<u32> {
        let schedule = self.input.schedule[usage.pass as usize];
        if schedule.encoder == ENCODER_NONE {
            return None;
        }
        (self.input.encoders[schedule.encoder as usize].kind == EncoderKind::Draw)
            .then_some(schedule.encoder)
    }

    fn subpass(&self, usage: &ResourceUsage) -> u32 {
        self.input.schedule[usage.pass as usize].subpass
    }

    fn render_pass_mut(&mut self, encoder: u32) -> &mut CompiledRenderPass {
        let index = self.input.encoders[encoder as usize]
            .render_pass
            .expect("draw encoder without a render pass");
        &mut self.input.render_passes[index as usize]
    }

    fn image_barrier(
        &self,
        u1: &ResourceUsage,
        u2: &ResourceUsage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> ImageBarrierInfo {
        ImageBarrierInfo {
            texture: self.handle,
            src_stages: u1.stages,
            src_access: u1.usage_type.access_mask(self.is_depth_stencil),
            dst_stages: u2.stages,
            dst_access: u2.usage_type.access_mask(self.is_depth_stencil),
            old_layout,
            new_layout,
        }
    }

    fn buffer_barrier(&self, u1: &ResourceUsage, u2: &ResourceUsage) -> BufferBarrierInfo {
        BufferBarrierInfo {
            buffer: self.handle,
            range: 0..self.size,
            src_stages: u1.stages,
            src_access: u1.usage_type.access_mask(false),
            dst_stages: u2.stages,
            dst_access: u2.usage_type.access_mask(false),
        }
    }

    /// Emit the dependency between one consecutive pair of GPU-ordered usages.
    fn pairwise(&mut self, u1: &ResourceUsage, u2: &ResourceUsage) {
        if !u1.usage_type.is_write() && !u2.usage_type.is_write() {
            return;
        }

        let encoder1 = self.draw_encoder(u1);
        let encoder2 = self.draw_encoder(u2);
        let same_render_pass = encoder1.is_some() && encoder1 == encoder2;

        if same_render_pass
            && u1.usage_type == u2.usage_type
            && u1.usage_type.is_render_target()
        {
            // Covered by the subpass self-dependency of the attachment.
            return;
        }

        let queue1 = &self.input.passes[u1.pass as usize].queue;
        let queue2 = &self.input.passes[u2.pass as usize].queue;
        let old_layout = u1.usage_type.image_layout(self.is_depth_stencil);
        let new_layout = u2.usage_type.image_layout(self.is_depth_stencil);

        if queue1 != queue2 {
            // Cross-queue ordering exists only through events.
            let event: EventIndex = self.out.event_count;
            self.out.event_count += 1;
            self.push(
                placement_after(u1),
                ResourceCommand::SignalEvent {
                    event,
                    stages: u1.stages,
                },
            );
            let (mut buffers, mut images) = (Vec::new(), Vec::new());
            if self.is_texture {
                images.push(self.image_barrier(u1, u2, old_layout, new_layout));
            } else {
                buffers.push(self.buffer_barrier(u1, u2));
            }
            self.push(
                placement_before(u2),
                ResourceCommand::WaitForEvents {
                    events: vec![event],
                    memory: Vec::new(),
                    buffers,
                    images,
                },
            );
            return;
        }

        if same_render_pass {
            let (src_subpass, dst_subpass) = (self.subpass(u1), self.subpass(u2));
            let dependency = SubpassDependency {
                src_subpass,
                dst_subpass,
                src_stages: u1.stages,
                src_access: u1.usage_type.access_mask(self.is_depth_stencil),
                dst_stages: u2.stages,
                dst_access: u2.usage_type.access_mask(self.is_depth_stencil),
                by_region: true,
            };
            let encoder = encoder1.unwrap();
            self.render_pass_mut(encoder).dependencies.push(dependency);
            if src_subpass == dst_subpass {
                // A dependency within one subpass needs an explicit barrier as well, and
                // the attachment must sit in the general layout for both sides.
                let barrier = self.is_texture.then(|| {
                    self.image_barrier(u1, u2, vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL)
                });
                self.push(
                    placement_before(u2),
                    ResourceCommand::PipelineBarrier {
                        memory: if self.is_texture {
                            Vec::new()
                        } else {
                            vec![MemoryBarrierInfo {
                                src_stages: u1.stages,
                                src_access: u1.usage_type.access_mask(false),
                                dst_stages: u2.stages,
                                dst_access: u2.usage_type.access_mask(false),
                            }]
                        },
                        buffers: Vec::new(),
                        images: barrier.into_iter().collect(),
                    },
                );
            }
            return;
        }

        // An attachment crossing a render pass boundary transitions through the render
        // pass object itself; the barrier then only orders execution.
        if self.is_texture && u1.usage_type.is_render_target() != u2.usage_type.is_render_target() {
            if let Some(encoder) = encoder2 {
                if u2.usage_type.is_render_target() {
                    let handle = self.handle;
                    self.render_pass_mut(encoder)
                        .initial_layouts
                        .push((handle, old_layout));
                    let barrier = self.image_barrier(u1, u2, old_layout, old_layout);
                    self.push(
                        placement_before(u2),
                        ResourceCommand::PipelineBarrier {
                            memory: Vec::new(),
                            buffers: Vec::new(),
                            images: vec![barrier],
                        },
                    );
                    return;
                }
            }
            if let Some(encoder) = encoder1 {
                if u1.usage_type.is_render_target() {
                    let handle = self.handle;
                    self.render_pass_mut(encoder)
                        .final_layouts
                        .push((handle, new_layout));
                    let barrier = self.image_barrier(u1, u2, new_layout, new_layout);
                    self.push(
                        placement_after(u1),
                        ResourceCommand::PipelineBarrier {
                            memory: Vec::new(),
                            buffers: Vec::new(),
                            images: vec![barrier],
                        },
                    );
                    return;
                }
            }
        }

        // A plain pipeline barrier. It attaches before the destination, except when the
        // source sits inside a render pass and the destination does not: then it attaches
        // after the source render pass instead.
        let placement = if encoder1.is_some() && encoder2.is_none() {
            placement_after(u1)
        } else {
            placement_before(u2)
        };
        let (mut memory, buffers, mut images) = (Vec::new(), Vec::new(), Vec::new());
        if self.is_texture {
            images.push(self.image_barrier(u1, u2, old_layout, new_layout));
        } else {
            // Drivers implement buffer barriers as global memory barriers anyway.
            memory.push(MemoryBarrierInfo {
                src_stages: u1.stages,
                src_access: u1.usage_type.access_mask(false),
                dst_stages: u2.stages,
                dst_access: u2.usage_type.access_mask(false),
            });
        }
        self.push(
            placement,
            ResourceCommand::PipelineBarrier {
                memory,
                buffers,
                images,
            },
        );
    }
}

/// Collapse adjacent declarations by the same pass with identical type and stages into
/// one usage spanning both command ranges.
fn collapse(usages: Vec<ResourceUsage>) -> Vec<ResourceUsage> {
    let mut collapsed: Vec<ResourceUsage> = Vec::with_capacity(usages.len());
    for usage in usages {
        if let Some(last) = collapsed.last_mut() {
            if last.pass == usage.pass
                && last.usage_type == usage.usage_type
                && last.stages == usage.stages
            {
                last.commands.start = last.commands.start.min(usage.commands.start);
                last.commands.end = last.commands.end.max(usage.commands.end);
                continue;
            }
        }
        collapsed.push(usage);
    }
    collapsed
}

pub(crate) fn analyse(mut input: AnalysisInput<'_>) -> AnalysisOutput {
    let mut out = AnalysisOutput {
        resource_commands: Vec::new(),
        wait_stamps: Vec::new(),
        event_count: 0,
    };

    for list_index in 0..input.usage_lists.len() {
        let (handle, usages) = {
            let (handle, usages) = &input.usage_lists[list_index];
            (*handle, usages.clone())
        };
        let is_texture = match handle.resource_type() {
            ResourceType::Buffer => false,
            ResourceType::Texture => true,
            // Argument buffers and the other types synchronize through the resources
            // they contain, which carry their own usage lists.
            _ => continue,
        };

        let active = collapse(
            usages
                .iter()
                .filter(|usage| input.passes.get(usage.pass as usize).map_or(
                    // Usages recorded outside any pass (deferred CPU writes) are pinned
                    // to the frame start and always stay.
                    usage.commands.is_empty(),
                    |pass| pass.active,
                ))
                .cloned()
                .collect(),
        );
        if active.is_empty() {
            continue;
        }

        let descriptor = input.context.descriptor(handle);
        let (is_depth_stencil, size) = match &descriptor {
            ResourceDescriptor::Buffer(desc) => (false, desc.size),
            ResourceDescriptor::Texture(desc) => (desc.is_depth_stencil(), 0),
            _ => (false, 0),
        };

        let gpu = active
            .iter()
            .filter(|usage| usage.is_gpu_ordered())
            .cloned()
            .collect::<Vec<_>>();

        let mut analysis = ResourceAnalysis {
            input: &mut input,
            out: &mut out,
            handle,
            is_texture,
            is_depth_stencil,
            size,
        };

        materialise(&mut analysis, &descriptor, &active, &gpu);

        for pair in gpu.windows(2) {
            analysis.pairwise(&pair[0], &pair[1]);
        }

        dispose(&mut analysis, &active, &gpu);
    }

    out
}

/// Place materialisation at the first active usage, with the usage-flag union over every
/// declaration of the frame.
fn materialise(
    analysis: &mut ResourceAnalysis<'_, '_>,
    descriptor: &ResourceDescriptor,
    active: &[ResourceUsage],
    gpu: &[ResourceUsage],
) {
    let handle = analysis.handle;
    let persistent = handle.uses_persistent_registry();
    let first = &active[0];

    if !persistent {
        match descriptor {
            ResourceDescriptor::Buffer(desc) => {
                let usage = active
                    .iter()
                    .fold(desc.usage_hint, |flags, u| flags | u.usage_type.buffer_usage_flags());
                analysis.push(
                    placement_before(first),
                    ResourceCommand::MaterialiseBuffer {
                        buffer: handle,
                        usage,
                    },
                );
            }
            ResourceDescriptor::Texture(desc) => {
                let is_depth_stencil = analysis.is_depth_stencil;
                let usage = active.iter().fold(desc.usage_hint, |flags, u| {
                    flags | u.usage_type.image_usage_flags(is_depth_stencil)
                });
                analysis.push(
                    placement_before(first),
                    ResourceCommand::MaterialiseTexture {
                        texture: handle,
                        usage,
                    },
                );
            }
            _ => {}
        }
    }

    // Textures additionally need their first layout established: transient images leave
    // `UNDEFINED`, persistent images leave whatever last frame stored.
    if analysis.is_texture {
        let Some(first_gpu) = gpu.first() else {
            return;
        };
        let old_layout = if persistent {
            analysis.input.context.current_layout(handle)
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let new_layout = first_gpu.usage_type.image_layout(analysis.is_depth_stencil);
        if old_layout == new_layout {
            return;
        }
        if first_gpu.usage_type.is_render_target() {
            if let Some(encoder) = analysis.draw_encoder(first_gpu) {
                analysis
                    .render_pass_mut(encoder)
                    .initial_layouts
                    .push((handle, old_layout));
                return;
            }
        }
        let barrier = ImageBarrierInfo {
            texture: handle,
            src_stages: vk::PipelineStageFlags2::NONE,
            src_access: vk::AccessFlags2::NONE,
            dst_stages: first_gpu.stages,
            dst_access: first_gpu.usage_type.access_mask(analysis.is_depth_stencil),
            old_layout,
            new_layout,
        };
        analysis.push(
            placement_before(first_gpu),
            ResourceCommand::PipelineBarrier {
                memory: Vec::new(),
                buffers: Vec::new(),
                images: vec![barrier],
            },
        );
    }
}

/// Place disposal after the last active usage, and collect the wait-frame stamps for
/// persistent resources.
fn dispose(analysis: &mut ResourceAnalysis<'_, '_>, active: &[ResourceUsage], gpu: &[ResourceUsage]) {
    let handle = analysis.handle;
    let persistent = handle.uses_persistent_registry();
    let last = gpu.last().unwrap_or_else(|| active.last().unwrap());

    // Window handles hand their image back every frame even when persistent-like.
    if !persistent || handle.flags().contains(ResourceFlags::WINDOW_HANDLE) {
        analysis.push(
            placement_after(last),
            ResourceCommand::DisposeResource {
                resource: handle,
            },
        );
    }

    if persistent {
        let read = active.iter().any(|usage| usage.usage_type.is_read());
        let written = active.iter().any(|usage| usage.usage_type.is_write());
        analysis.out.wait_stamps.push((handle, read, written));
        if analysis.is_texture {
            if let Some(last_gpu) = gpu.last() {
                let layout = last_gpu.usage_type.image_layout(analysis.is_depth_stencil);
                analysis.input.context.set_current_layout(handle, layout);
            }
        }
    }
}
