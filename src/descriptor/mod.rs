//! Logical descriptor sets and their encoding into backend binding paths.
//!
//! A [`DescriptorSetReflection`] describes one descriptor set as a shader sees it:
//! bindings, array lengths, resource types and names, plus the per-platform index
//! overrides shader tooling emits for Metal targets. Encoding an argument buffer against
//! a reflection yields [`EncodedBinding`]s: `(path, value)` pairs a backend can apply
//! directly.

use ash::vk;

use crate::resource::argument_buffer::{ArgumentBinding, ArgumentBufferValue};

/// Minimum number of matching resources for two descriptor sets to be considered
/// compatible for reuse.
pub const SET_COMPATIBILITY_THRESHOLD: usize = 2;

/// The kind of resource a descriptor binding expects.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorResourceType {
    ConstantBuffer,
    StorageBuffer,
    SampledTexture,
    StorageTexture,
    Sampler,
}

/// Dimensionality of a texture binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureViewType {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

/// Per-platform binding index overrides, emitted by the shader tool for targets whose
/// binding model differs from the reflected SPIR-V.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct PlatformBindings {
    pub macos_metal_index: Option<u32>,
    pub apple_silicon_metal_index: Option<u32>,
}

/// One resource slot of a reflected descriptor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorResourceReflection {
    pub binding: u32,
    pub array_length: u32,
    pub ty: DescriptorResourceType,
    pub view_type: Option<TextureViewType>,
    pub platform_bindings: PlatformBindings,
    pub name: String,
}

/// A reflected descriptor set: the stages it is visible to and its resource slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetReflection {
    pub set: u32,
    pub stages: vk::ShaderStageFlags,
    pub resources: Vec<DescriptorResourceReflection>,
}

impl DescriptorSetReflection {
    pub fn resource_for_binding(&self, binding: u32) -> Option<&DescriptorResourceReflection> {
        self.resources.iter().find(|resource| resource.binding == binding)
    }

    /// Two sets are compatible for reuse when they share at least
    /// [`SET_COMPATIBILITY_THRESHOLD`] resources with identical
    /// `(binding, array_length, name, type)`.
    pub fn is_compatible_with(&self, other: &DescriptorSetReflection) -> bool {
        self.is_compatible_with_threshold(other, SET_COMPATIBILITY_THRESHOLD)
    }

    /// Compatibility with an explicit match threshold, for callers tuning the policy.
    pub fn is_compatible_with_threshold(
        &self,
        other: &DescriptorSetReflection,
        threshold: usize,
    ) -> bool {
        let matching = self
            .resources
            .iter()
            .filter(|resource| {
                other.resources.iter().any(|candidate| {
                    candidate.binding == resource.binding
                        && candidate.array_length == resource.array_length
                        && candidate.name == resource.name
                        && candidate.ty == resource.ty
                })
            })
            .count();
        matching >= threshold
    }
}

/// The API (and Metal GPU family) argument buffers are encoded for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TargetApi {
    Vulkan,
    MacOSMetal,
    AppleSiliconMetal,
}

/// The slot type a Metal binding lands in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MetalBindingType {
    Buffer,
    Texture,
    Sampler,
}

/// Where a bound resource lives, in the target API's addressing scheme.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceBindingPath {
    Vulkan {
        set: u32,
        binding: u32,
        array_index: u32,
    },
    Metal {
        descriptor_set: u32,
        index: u32,
        ty: MetalBindingType,
    },
}

/// One encoded binding, ready for a backend to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBinding {
    pub path: ResourceBindingPath,
    pub value: ArgumentBufferValue,
    /// Storage images on Apple-silicon Metal bypass the argument buffer and bind
    /// directly on the encoder.
    pub bind_directly_on_encoder: bool,
}

fn metal_binding_type(value: &ArgumentBufferValue) -> MetalBindingType {
    match value {
        ArgumentBufferValue::Buffer {
            ..
        } => MetalBindingType::Buffer,
        ArgumentBufferValue::Texture {
            ..
        } => MetalBindingType::Texture,
        ArgumentBufferValue::Sampler {
            ..
        } => MetalBindingType::Sampler,
    }
}

/// Materialise recorded argument buffer bindings against a set reflection.
///
/// Bindings without a slot in the reflection are skipped: a shader variant may consume a
/// subset of what the application binds. Array indices must stay within the reflected
/// array length.
pub fn encode_argument_buffer(
    reflection: &DescriptorSetReflection,
    bindings: &[ArgumentBinding],
    target: TargetApi,
) -> Vec<EncodedBinding> {
    let mut encoded = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let Some(resource) = reflection.resource_for_binding(binding.binding) else {
            continue;
        };
        assert!(
            binding.array_index < resource.array_length.max(1),
            "array index {} out of range for binding `{}` (array length {})",
            binding.array_index,
            resource.name,
            resource.array_length
        );
        let (path, direct) = match target {
            TargetApi::Vulkan => (
                ResourceBindingPath::Vulkan {
                    set: reflection.set,
                    binding: binding.binding,
                    array_index: binding.array_index,
                },
                false,
            ),
            TargetApi::MacOSMetal | TargetApi::AppleSiliconMetal => {
                let index = match target {
                    TargetApi::MacOSMetal => resource.platform_bindings.macos_metal_index,
                    _ => resource.platform_bindings.apple_silicon_metal_index,
                }
                .unwrap_or(binding.binding)
                    + binding.array_index;
                let direct = target == TargetApi::AppleSiliconMetal
                    && resource.ty == DescriptorResourceType::StorageTexture;
                (
                    ResourceBindingPath::Metal {
                        descriptor_set: reflection.set,
                        index,
                        ty: metal_binding_type(&binding.value),
                    },
                    direct,
                )
            }
        };
        encoded.push(EncodedBinding {
            path,
            value: binding.value.clone(),
            bind_directly_on_encoder: direct,
        });
    }
    encoded
}
