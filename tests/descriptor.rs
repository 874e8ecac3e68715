//! Argument buffer encoding and descriptor set compatibility tests.

mod framework;

use deimos::descriptor::{
    DescriptorResourceReflection, DescriptorResourceType, DescriptorSetReflection,
    MetalBindingType, PlatformBindings, ResourceBindingPath, TargetApi,
};
use deimos::prelude::*;
use deimos::resource::descriptor::ArgumentBufferDescriptor;
use framework::make_context;

fn resource(
    binding: u32,
    name: &str,
    ty: DescriptorResourceType,
    apple_silicon_index: Option<u32>,
) -> DescriptorResourceReflection {
    DescriptorResourceReflection {
        binding,
        array_length: 1,
        ty,
        view_type: None,
        platform_bindings: PlatformBindings {
            macos_metal_index: None,
            apple_silicon_metal_index: apple_silicon_index,
        },
        name: name.to_string(),
    }
}

fn material_set() -> DescriptorSetReflection {
    DescriptorSetReflection {
        set: 1,
        stages: vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::COMPUTE,
        resources: vec![
            resource(0, "material", DescriptorResourceType::ConstantBuffer, Some(4)),
            resource(1, "albedo", DescriptorResourceType::SampledTexture, Some(0)),
            resource(2, "output", DescriptorResourceType::StorageTexture, Some(1)),
        ],
    }
}

#[test]
fn vulkan_encoding_uses_set_and_binding() {
    let (context, _backend) = make_context();
    let reflection = material_set();

    let material = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(256, MemoryType::CpuToGpu)
            .with_usage(vk::BufferUsageFlags::UNIFORM_BUFFER),
        "material",
    )
    .unwrap();
    let albedo = Texture::new(
        &context,
        TextureDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 16, 16),
    );

    let mut argument_buffer = ArgumentBuffer::new(
        &context,
        ArgumentBufferDescriptor {
            binding_count: 3,
        },
    );
    argument_buffer.set_buffer(0, &material, 0, ResourceUsageType::ConstantBuffer);
    argument_buffer.set_texture(1, &albedo, ResourceUsageType::Read);

    let encoded = argument_buffer.encode(&reflection, TargetApi::Vulkan);
    assert_eq!(encoded.len(), 2);
    assert_eq!(
        encoded[0].path,
        ResourceBindingPath::Vulkan {
            set: 1,
            binding: 0,
            array_index: 0,
        }
    );
    assert!(!encoded[0].bind_directly_on_encoder);
    assert_eq!(
        encoded[1].path,
        ResourceBindingPath::Vulkan {
            set: 1,
            binding: 1,
            array_index: 0,
        }
    );
}

#[test]
fn apple_silicon_overrides_indices_and_binds_storage_images_directly() {
    let (context, _backend) = make_context();
    let reflection = material_set();

    let output = Texture::new(
        &context,
        TextureDescriptor::new_2d(vk::Format::R8G8B8A8_UNORM, 16, 16),
    );
    let mut argument_buffer = ArgumentBuffer::new(
        &context,
        ArgumentBufferDescriptor {
            binding_count: 3,
        },
    );
    argument_buffer.set_texture(2, &output, ResourceUsageType::Write);

    let encoded = argument_buffer.encode(&reflection, TargetApi::AppleSiliconMetal);
    assert_eq!(encoded.len(), 1);
    assert_eq!(
        encoded[0].path,
        ResourceBindingPath::Metal {
            descriptor_set: 1,
            index: 1,
            ty: MetalBindingType::Texture,
        }
    );
    // Storage images bypass the argument buffer on Apple silicon.
    assert!(encoded[0].bind_directly_on_encoder);
}

#[test]
fn bindings_without_a_reflected_slot_are_skipped() {
    let (context, _backend) = make_context();
    let reflection = material_set();

    let stray = Buffer::new_persistent(
        &context,
        BufferDescriptor::new(16, MemoryType::CpuToGpu)
            .with_usage(vk::BufferUsageFlags::UNIFORM_BUFFER),
        "stray",
    )
    .unwrap();
    let mut argument_buffer = ArgumentBuffer::new(
        &context,
        ArgumentBufferDescriptor {
            binding_count: 8,
        },
    );
    argument_buffer.set_buffer(7, &stray, 0, ResourceUsageType::ConstantBuffer);

    assert!(argument_buffer.encode(&reflection, TargetApi::Vulkan).is_empty());
}

#[test]
fn set_compatibility_needs_two_matching_resources() {
    let base = material_set();

    // Shares two resources with identical (binding, array length, name, type).
    let mut compatible = material_set();
    compatible.resources.remove(2);
    compatible
        .resources
        .push(resource(5, "extra", DescriptorResourceType::StorageBuffer, None));
    assert!(base.is_compatible_with(&compatible));

    // Shares only one: the albedo texture moved bindings.
    let mut incompatible = material_set();
    incompatible.resources[1].binding = 4;
    incompatible.resources[2].name = "other_output".to_string();
    assert!(base.is_compatible_with_threshold(&incompatible, 1));
    assert!(!base.is_compatible_with(&incompatible));
}
