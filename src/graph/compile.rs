//! The frame compiler.
//!
//! Compilation turns the recorded frame into a [`FrameCommandInfo`]:
//!
//! 1. *Culling*: passes that contribute to no externally visible result (persistent,
//!    history, window or externally owned resources, external or CPU passes) are
//!    deactivated, via reverse reachability on a pass dependency graph.
//! 2. *Encoder partitioning*: consecutive active passes of the same kind on the same
//!    queue share a command encoder; consecutive draw passes additionally fuse into one
//!    render pass with multiple subpasses when their render target descriptors are
//!    compatible.
//! 3. *Command buffer partitioning*: a new command buffer starts whenever an encoder's
//!    `(is_external, uses_window_texture)` pair (or its queue, since submission is per
//!    queue) differs from the previous encoder's.
//! 4. *Analysis*: the dependency analyzer emits compacted resource commands and subpass
//!    dependencies (see [`analysis`](crate::graph::analysis)), which are then sorted by
//!    `(command index, order)` for replay.

use std::collections::HashSet;

use anyhow::Result;
use ash::vk;
use petgraph::dot::{Config, Dot};
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};

use crate::backend::PlacementOrder;
use crate::graph::analysis;
use crate::graph::pass::{PassKind, RenderTargetDescriptor};
use crate::graph::usage::ResourceUsage;
use crate::graph::FrameGraph;
use crate::resource::handle::{ResourceFlags, ResourceHandle};
use crate::sync::queue::Queue;

/// Sentinel for passes without an encoder (CPU passes and culled passes).
pub const ENCODER_NONE: u32 = u32::MAX;

/// The kind of backend encoder a run of passes records into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncoderKind {
    Draw,
    Compute,
    Blit,
    External,
}

impl EncoderKind {
    fn of(kind: PassKind) -> Option<EncoderKind> {
        match kind {
            PassKind::Draw => Some(EncoderKind::Draw),
            PassKind::Compute => Some(EncoderKind::Compute),
            PassKind::Blit => Some(EncoderKind::Blit),
            PassKind::External => Some(EncoderKind::External),
            PassKind::Cpu => None,
        }
    }
}

/// A dependency between two subpasses of a fused render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stages: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stages: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
    pub by_region: bool,
}

/// A render pass after fusion: the merged descriptor plus everything the backend needs
/// to create the render pass object. Attachment layouts are locked once compilation
/// finishes.
#[derive(Debug, Clone)]
pub struct CompiledRenderPass {
    /// Attachments with the first fused pass's load actions and the last one's store
    /// actions.
    pub descriptor: RenderTargetDescriptor,
    pub subpass_count: u32,
    pub dependencies: Vec<SubpassDependency>,
    /// Layouts attachments are in when the render pass begins; the render pass object
    /// performs the transition to the attachment layout implicitly.
    pub initial_layouts: Vec<(ResourceHandle, vk::ImageLayout)>,
    /// Layouts attachments are left in when the render pass ends.
    pub final_layouts: Vec<(ResourceHandle, vk::ImageLayout)>,
}

/// One command encoder: a contiguous run of same-kind passes.
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub kind: EncoderKind,
    pub queue: Queue,
    /// Index of the command buffer this encoder records into.
    pub command_buffer: u32,
    /// Index into [`FrameCommandInfo::render_passes`] for draw encoders.
    pub render_pass: Option<u32>,
    pub is_external: bool,
    pub uses_window_texture: bool,
}

/// Per-pass scheduling result, indexed by original pass index.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PassSchedule {
    pub encoder: u32,
    pub subpass: u32,
}

/// Everything the executor needs to run a compiled frame.
pub struct FrameCommandInfo {
    /// Indices of passes that survived culling, in declaration order.
    pub active_passes: Vec<u32>,
    /// Encoder index per entry of `active_passes`; [`ENCODER_NONE`] for CPU passes.
    pub pass_encoders: Vec<u32>,
    pub encoders: Vec<EncoderInfo>,
    pub render_passes: Vec<CompiledRenderPass>,
    pub command_buffer_count: u32,
    /// Compacted resource commands, sorted by `(command index, order)`.
    pub resource_commands: Vec<crate::backend::CompactedResourceCommand>,
    /// Persistent resources touched this frame: `(handle, read, written)`. Stamped with
    /// the frame number at submission.
    pub wait_stamps: Vec<(ResourceHandle, bool, bool)>,
    /// Number of event primitives the frame needs.
    pub event_count: u32,
    pub(crate) schedule: Vec<PassSchedule>,
}

impl FrameCommandInfo {
    fn empty() -> Self {
        FrameCommandInfo {
            active_passes: Vec::new(),
            pass_encoders: Vec::new(),
            encoders: Vec::new(),
            render_passes: Vec::new(),
            command_buffer_count: 0,
            resource_commands: Vec::new(),
            wait_stamps: Vec::new(),
            event_count: 0,
            schedule: Vec::new(),
        }
    }
}

impl FrameGraph {
    /// Compile the recorded frame. Recording is left untouched; the executor consumes
    /// the result and then cycles the frame.
    pub(crate) fn compile(&mut self) -> Result<FrameCommandInfo> {
        if self.passes.is_empty() {
            return Ok(FrameCommandInfo::empty());
        }

        let mut usage_lists = self.context.transient_registry().collect_usages();
        usage_lists.extend(self.context.persistent_registry().collect_usages());

        self.cull_passes(&usage_lists);

        let touches_window = passes_touching_window(self.passes.len(), &usage_lists);
        let mut info = self.partition_encoders(&touches_window);

        let analysed = analysis::analyse(analysis::AnalysisInput {
            passes: &self.passes,
            schedule: &info.schedule,
            encoders: &info.encoders,
            render_passes: &mut info.render_passes,
            usage_lists: &usage_lists,
            context: &self.context,
        });
        info.resource_commands = analysed.resource_commands;
        info.wait_stamps = analysed.wait_stamps;
        info.event_count = analysed.event_count;

        // Stable sort: commands scheduled at the same point keep their emission order
        // (materialisation ahead of the barriers that reference the resource).
        info.resource_commands.sort_by_key(|command| {
            (
                command.command,
                match command.order {
                    PlacementOrder::Before => 0,
                    PlacementOrder::After => 1,
                },
            )
        });

        trace!(
            "Compiled frame {}: {} active passes, {} encoders, {} command buffers, {} resource commands",
            self.frame_index,
            info.active_passes.len(),
            info.encoders.len(),
            info.command_buffer_count,
            info.resource_commands.len()
        );
        Ok(info)
    }

    /// Deactivate passes from which no externally visible write is reachable.
    fn cull_passes(&mut self, usage_lists: &[(ResourceHandle, Vec<ResourceUsage>)]) {
        let mut graph = Graph::<u32, ResourceHandle>::new();
        let nodes = (0..self.passes.len())
            .map(|index| graph.add_node(index as u32))
            .collect::<Vec<_>>();

        let mut roots = HashSet::new();
        for (index, pass) in self.passes.iter().enumerate() {
            if pass.is_root() {
                roots.insert(nodes[index]);
            }
        }

        for (handle, usages) in usage_lists {
            let external = handle.flags().intersects(
                ResourceFlags::PERSISTENT
                    | ResourceFlags::HISTORY_BUFFER
                    | ResourceFlags::WINDOW_HANDLE
                    | ResourceFlags::EXTERNAL_OWNERSHIP,
            );
            for pair in usages.windows(2) {
                let (u1, u2) = (&pair[0], &pair[1]);
                // Usages recorded outside any pass carry a sentinel pass index.
                if (u1.pass as usize) >= nodes.len() || (u2.pass as usize) >= nodes.len() {
                    continue;
                }
                if u1.pass != u2.pass && (u1.usage_type.is_write() || u2.usage_type.is_write()) {
                    graph.add_edge(nodes[u1.pass as usize], nodes[u2.pass as usize], *handle);
                }
            }
            if external {
                for usage in usages {
                    if usage.usage_type.is_write() && (usage.pass as usize) < nodes.len() {
                        roots.insert(nodes[usage.pass as usize]);
                    }
                }
            }
        }

        // A pass is active iff a root is reachable from it: walk ancestors of the roots.
        let mut active = roots.clone();
        let mut stack = roots.into_iter().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            for parent in graph.neighbors_directed(node, Direction::Incoming) {
                if active.insert(parent) {
                    stack.push(parent);
                }
            }
        }

        for (index, pass) in self.passes.iter_mut().enumerate() {
            pass.active = active.contains(&nodes[index]);
            if !pass.active {
                trace!("Culled pass `{}`", pass.name);
            }
        }
    }

    /// Assign active passes to encoders and encoders to command buffers.
    fn partition_encoders(&self, touches_window: &[bool]) -> FrameCommandInfo {
        let mut info = FrameCommandInfo::empty();
        info.schedule = vec![
            PassSchedule {
                encoder: ENCODER_NONE,
                subpass: 0,
            };
            self.passes.len()
        ];

        for (index, pass) in self.passes.iter().enumerate() {
            if !pass.active {
                continue;
            }
            info.active_passes.push(index as u32);

            let Some(kind) = EncoderKind::of(pass.kind()) else {
                // CPU passes run between encoders.
                info.pass_encoders.push(ENCODER_NONE);
                continue;
            };

            let descriptor = pass.pass.render_target_descriptor();
            let fits_current = info.encoders.last().map_or(false, |encoder: &EncoderInfo| {
                // The encoder list only ever grows at the tail, so `last` is the encoder
                // of the previously scheduled GPU pass.
                encoder.kind == kind
                    && encoder.queue == pass.queue
                    && match (kind, descriptor) {
                        (EncoderKind::Draw, Some(descriptor)) => {
                            let render_pass =
                                &info.render_passes[encoder.render_pass.unwrap() as usize];
                            render_pass.descriptor.is_compatible_with(descriptor)
                        }
                        _ => true,
                    }
                    && !was_interrupted_by_cpu_pass(&info)
            });

            let encoder_index = if fits_current {
                (info.encoders.len() - 1) as u32
            } else {
                let render_pass = descriptor.map(|descriptor| {
                    info.render_passes.push(CompiledRenderPass {
                        descriptor: descriptor.clone(),
                        subpass_count: 0,
                        dependencies: Vec::new(),
                        initial_layouts: Vec::new(),
                        final_layouts: Vec::new(),
                    });
                    (info.render_passes.len() - 1) as u32
                });
                info.encoders.push(EncoderInfo {
                    kind,
                    queue: pass.queue.clone(),
                    command_buffer: 0,
                    render_pass,
                    is_external: kind == EncoderKind::External,
                    uses_window_texture: false,
                });
                (info.encoders.len() - 1) as u32
            };

            let encoder = info.encoders.last_mut().unwrap();
            if touches_window[index] {
                encoder.uses_window_texture = true;
            }
            let subpass = if let Some(render_pass) = encoder.render_pass {
                let render_pass = &mut info.render_passes[render_pass as usize];
                let subpass = render_pass.subpass_count;
                render_pass.subpass_count += 1;
                if subpass > 0 {
                    // The fused render pass stores with the actions of its last subpass.
                    merge_store_actions(&mut render_pass.descriptor, descriptor.unwrap());
                }
                subpass
            } else {
                0
            };

            info.schedule[index] = PassSchedule {
                encoder: encoder_index,
                subpass,
            };
            info.pass_encoders.push(encoder_index);
        }

        // Command buffer boundaries isolate external and presentation-touching encoders,
        // and submission lanes.
        let mut command_buffer = 0u32;
        let mut previous: Option<(bool, bool, u32)> = None;
        for encoder in &mut info.encoders {
            let key = (encoder.is_external, encoder.uses_window_texture, encoder.queue.index());
            if let Some(previous) = previous {
                if previous != key {
                    command_buffer += 1;
                }
            }
            encoder.command_buffer = command_buffer;
            previous = Some(key);
        }
        info.command_buffer_count = if info.encoders.is_empty() {
            0
        } else {
            command_buffer + 1
        };

        info
    }

    /// The pass dependency graph in graphviz `dot` format, for debugging.
    pub fn dot(&self) -> String {
        let mut usage_lists = self.context.transient_registry().collect_usages();
        usage_lists.extend(self.context.persistent_registry().collect_usages());

        let mut graph = Graph::<String, String>::new();
        let nodes = self
            .passes
            .iter()
            .map(|pass| graph.add_node(format!("{} ({:?})", pass.name, pass.kind())))
            .collect::<Vec<NodeIndex>>();
        for (handle, usages) in &usage_lists {
            for pair in usages.windows(2) {
                let (u1, u2) = (&pair[0], &pair[1]);
                if (u1.pass as usize) >= nodes.len() || (u2.pass as usize) >= nodes.len() {
                    continue;
                }
                if u1.pass != u2.pass && (u1.usage_type.is_write() || u2.usage_type.is_write()) {
                    let label = self
                        .context
                        .label(*handle)
                        .unwrap_or_else(|| format!("{handle:?}"));
                    graph.add_edge(nodes[u1.pass as usize], nodes[u2.pass as usize], label);
                }
            }
        }
        format!("{}", Dot::with_config(&graph, &[Config::GraphContentOnly]))
    }
}

/// Fusing across a CPU pass would reorder the CPU work relative to the GPU commands
/// around it.
fn was_interrupted_by_cpu_pass(info: &FrameCommandInfo) -> bool {
    info.pass_encoders.last() == Some(&ENCODER_NONE)
}

fn merge_store_actions(merged: &mut RenderTargetDescriptor, last: &RenderTargetDescriptor) {
    for (attachment, incoming) in merged
        .color_attachments
        .iter_mut()
        .zip(&last.color_attachments)
    {
        attachment.store_op = incoming.store_op;
    }
    if let (Some(attachment), Some(incoming)) = (&mut merged.depth_attachment, &last.depth_attachment) {
        attachment.store_op = incoming.store_op;
    }
    if let (Some(attachment), Some(incoming)) =
        (&mut merged.stencil_attachment, &last.stencil_attachment)
    {
        attachment.store_op = incoming.store_op;
    }
}

/// Which passes touch a window-handle resource, from the frame's usage lists.
fn passes_touching_window(
    pass_count: usize,
    usage_lists: &[(ResourceHandle, Vec<ResourceUsage>)],
) -> Vec<bool> {
    let mut touches = vec![false; pass_count];
    for (handle, usages) in usage_lists {
        if handle.flags().contains(ResourceFlags::WINDOW_HANDLE) {
            for usage in usages {
                if (usage.pass as usize) < pass_count {
                    touches[usage.pass as usize] = true;
                }
            }
        }
    }
    touches
}
