//! Pass types.
//!
//! A pass is a unit of GPU work of one of five kinds, expressed as a tagged variant
//! rather than trait objects so the compiler and executor can match on it directly. Draw
//! passes carry a [`RenderTargetDescriptor`] describing their attachments; the compiler
//! fuses consecutive draw passes with compatible descriptors into a single render pass
//! with multiple subpasses.

use std::ops::Range;

use ash::vk;

use crate::resource::handle::ResourceHandle;
use crate::sync::queue::Queue;

/// The kind of a pass, used for encoder partitioning.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    Draw,
    Compute,
    Blit,
    External,
    Cpu,
}

/// One pass in the frame. The payload of the `Draw` variant describes the attachments
/// the pass renders to.
#[derive(Debug, Clone)]
pub enum RenderPass {
    Draw(RenderTargetDescriptor),
    Compute,
    Blit,
    /// Work recorded by the application outside the frame graph, present only for
    /// ordering and resource synchronization.
    External,
    /// CPU work ordered between GPU passes. Never emits GPU commands.
    Cpu,
}

impl RenderPass {
    pub fn kind(&self) -> PassKind {
        match self {
            RenderPass::Draw(_) => PassKind::Draw,
            RenderPass::Compute => PassKind::Compute,
            RenderPass::Blit => PassKind::Blit,
            RenderPass::External => PassKind::External,
            RenderPass::Cpu => PassKind::Cpu,
        }
    }

    pub fn render_target_descriptor(&self) -> Option<&RenderTargetDescriptor> {
        match self {
            RenderPass::Draw(descriptor) => Some(descriptor),
            _ => None,
        }
    }
}

/// A color attachment of a draw pass. If `load_op` is [`vk::AttachmentLoadOp::CLEAR`],
/// `clear_value` must be set.
#[derive(Derivative, Copy, Clone)]
#[derivative(Debug)]
pub struct ColorAttachment {
    pub texture: ResourceHandle,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    #[derivative(Debug = "ignore")]
    pub clear_value: Option<vk::ClearColorValue>,
}

/// A depth or stencil attachment of a draw pass.
#[derive(Debug, Copy, Clone)]
pub struct DepthStencilAttachment {
    pub texture: ResourceHandle,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub clear_value: Option<vk::ClearDepthStencilValue>,
}

/// Describes the attachments of a draw pass, with their load/store/clear actions.
#[derive(Debug, Clone, Default)]
pub struct RenderTargetDescriptor {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthStencilAttachment>,
    pub stencil_attachment: Option<DepthStencilAttachment>,
}

impl RenderTargetDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a color attachment. If `load_op` is [`vk::AttachmentLoadOp::CLEAR`], `clear`
    /// must not be `None`.
    pub fn with_color_attachment(
        mut self,
        texture: ResourceHandle,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        clear: Option<vk::ClearColorValue>,
    ) -> Self {
        assert!(
            load_op != vk::AttachmentLoadOp::CLEAR || clear.is_some(),
            "color attachment with VK_ATTACHMENT_LOAD_OP_CLEAR needs a clear value"
        );
        self.color_attachments.push(ColorAttachment {
            texture,
            load_op,
            store_op,
            clear_value: clear,
        });
        self
    }

    pub fn with_depth_attachment(
        mut self,
        texture: ResourceHandle,
        load_op: vk::AttachmentLoadOp,
        store_op: vk::AttachmentStoreOp,
        clear: Option<vk::ClearDepthStencilValue>,
    ) -> Self {
        self.depth_attachment = Some(DepthStencilAttachment {
            texture,
            load_op,
            store_op,
            clear_value: clear,
        });
        self
    }

    /// Every attached texture, with whether it is bound as depth/stencil.
    pub fn textures(&self) -> impl Iterator<Item = (ResourceHandle, bool)> + '_ {
        self.color_attachments
            .iter()
            .map(|attachment| (attachment.texture, false))
            .chain(self.depth_attachment.iter().map(|attachment| (attachment.texture, true)))
            .chain(self.stencil_attachment.iter().map(|attachment| (attachment.texture, true)))
    }

    pub fn contains_texture(&self, texture: ResourceHandle) -> bool {
        self.textures().any(|(handle, _)| handle == texture)
    }

    /// Two descriptors are compatible for subpass fusion when they bind the same
    /// attachments in the same order. Load and store actions do not participate: the
    /// fused render pass loads with the first pass's actions and stores with the last's.
    pub fn is_compatible_with(&self, other: &RenderTargetDescriptor) -> bool {
        self.color_attachments.len() == other.color_attachments.len()
            && self
                .color_attachments
                .iter()
                .zip(&other.color_attachments)
                .all(|(a, b)| a.texture == b.texture)
            && self.depth_attachment.map(|a| a.texture) == other.depth_attachment.map(|a| a.texture)
            && self.stencil_attachment.map(|a| a.texture)
                == other.stencil_attachment.map(|a| a.texture)
    }
}

/// A recorded pass: the pass itself plus everything the compiler needs to schedule it.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RenderPassRecord {
    pub name: String,
    pub pass: RenderPass,
    /// The queue this pass was assigned to.
    pub queue: Queue,
    /// Range of frame command indices recorded by this pass's body.
    pub commands: Range<u32>,
    /// Cleared by the compiler when the pass contributes to no externally visible result.
    pub active: bool,
    /// Optional debug color, shown in graphics debuggers by backends that support it.
    pub color: Option<[f32; 4]>,
    /// CPU work to run at this pass's position during execution.
    #[derivative(Debug = "ignore")]
    pub cpu_work: Option<Box<dyn FnOnce() + Send>>,
}

impl RenderPassRecord {
    pub fn kind(&self) -> PassKind {
        self.pass.kind()
    }

    /// True if this pass must never be culled: its effects are visible outside the frame.
    pub fn is_root(&self) -> bool {
        matches!(self.kind(), PassKind::External | PassKind::Cpu)
    }
}
