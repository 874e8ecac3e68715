//! Argument buffers: logical descriptor sets.
//!
//! An [`ArgumentBuffer`] collects `(binding, value)` pairs during pass recording. It is
//! not encoded into backend descriptor storage until the frame compiles, at which point
//! [`ArgumentBuffer::encode`] materialises the bindings against a
//! [`DescriptorSetReflection`](crate::descriptor::DescriptorSetReflection) into
//! backend-specific binding paths.

use ash::vk;

use crate::core::context::Context;
use crate::descriptor::{encode_argument_buffer, DescriptorSetReflection, EncodedBinding, TargetApi};
use crate::graph::usage::ResourceUsageType;
use crate::resource::buffer::Buffer;
use crate::resource::descriptor::{
    ArgumentBufferArrayDescriptor, ArgumentBufferDescriptor, ResourceDescriptor,
};
use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceType};
use crate::resource::texture::Texture;

/// A value bound into one slot of an argument buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentBufferValue {
    Buffer {
        buffer: ResourceHandle,
        offset: vk::DeviceSize,
        usage: ResourceUsageType,
    },
    Texture {
        texture: ResourceHandle,
        usage: ResourceUsageType,
    },
    Sampler {
        sampler: ResourceHandle,
    },
}

impl ArgumentBufferValue {
    /// The resource this value references, with how it is used. Samplers carry no
    /// read/write semantics.
    pub fn resource_usage(&self) -> (ResourceHandle, ResourceUsageType) {
        match *self {
            ArgumentBufferValue::Buffer {
                buffer,
                usage,
                ..
            } => (buffer, usage),
            ArgumentBufferValue::Texture {
                texture,
                usage,
            } => (texture, usage),
            ArgumentBufferValue::Sampler {
                sampler,
            } => (sampler, ResourceUsageType::Sampler),
        }
    }
}

/// One recorded binding: slot, array element and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentBinding {
    pub binding: u32,
    pub array_index: u32,
    pub value: ArgumentBufferValue,
}

/// Typed facade over an argument buffer resource, recording bindings for later encoding.
#[derive(Debug)]
pub struct ArgumentBuffer {
    handle: ResourceHandle,
    context: Context,
    bindings: Vec<ArgumentBinding>,
}

impl ArgumentBuffer {
    pub fn new(context: &Context, descriptor: ArgumentBufferDescriptor) -> Self {
        let handle = context.transient_registry().allocate(
            ResourceType::ArgumentBuffer,
            ResourceFlags::empty(),
            ResourceDescriptor::ArgumentBuffer(descriptor),
            None,
        );
        ArgumentBuffer {
            handle,
            context: context.clone(),
            bindings: Vec::new(),
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn bindings(&self) -> &[ArgumentBinding] {
        &self.bindings
    }

    pub fn set_buffer(&mut self, binding: u32, buffer: &Buffer, offset: vk::DeviceSize, usage: ResourceUsageType) {
        self.set_value(
            binding,
            0,
            ArgumentBufferValue::Buffer {
                buffer: buffer.handle(),
                offset,
                usage,
            },
        );
    }

    pub fn set_texture(&mut self, binding: u32, texture: &Texture, usage: ResourceUsageType) {
        self.set_value(
            binding,
            0,
            ArgumentBufferValue::Texture {
                texture: texture.handle(),
                usage,
            },
        );
    }

    pub fn set_sampler(&mut self, binding: u32, sampler: ResourceHandle) {
        assert_eq!(sampler.resource_type(), ResourceType::Sampler);
        self.set_value(
            binding,
            0,
            ArgumentBufferValue::Sampler {
                sampler,
            },
        );
    }

    /// Bind a value at an explicit array element. Rebinding a `(binding, array_index)`
    /// pair replaces the previous value.
    pub fn set_value(&mut self, binding: u32, array_index: u32, value: ArgumentBufferValue) {
        if let Some(existing) = self
            .bindings
            .iter_mut()
            .find(|b| b.binding == binding && b.array_index == array_index)
        {
            existing.value = value;
        } else {
            self.bindings.push(ArgumentBinding {
                binding,
                array_index,
                value,
            });
        }
    }

    /// Materialise the recorded bindings against a descriptor set layout for a target
    /// API.
    pub fn encode(&self, reflection: &DescriptorSetReflection, target: TargetApi) -> Vec<EncodedBinding> {
        encode_argument_buffer(reflection, &self.bindings, target)
    }
}

/// An array of argument buffers sharing one layout. Elements are encoded with the same
/// reflection at consecutive array offsets.
#[derive(Debug)]
pub struct ArgumentBufferArray {
    handle: ResourceHandle,
    context: Context,
    elements: Vec<Vec<ArgumentBinding>>,
}

impl ArgumentBufferArray {
    pub fn new(context: &Context, descriptor: ArgumentBufferArrayDescriptor) -> Self {
        let handle = context.transient_registry().allocate(
            ResourceType::ArgumentBufferArray,
            ResourceFlags::empty(),
            ResourceDescriptor::ArgumentBufferArray(descriptor),
            None,
        );
        ArgumentBufferArray {
            handle,
            context: context.clone(),
            elements: (0..descriptor.array_length).map(|_| Vec::new()).collect(),
        }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    pub fn element_count(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn bindings(&self, element: u32) -> &[ArgumentBinding] {
        &self.elements[element as usize]
    }

    pub fn set_value(&mut self, element: u32, binding: u32, array_index: u32, value: ArgumentBufferValue) {
        let bindings = &mut self.elements[element as usize];
        if let Some(existing) = bindings
            .iter_mut()
            .find(|b| b.binding == binding && b.array_index == array_index)
        {
            existing.value = value;
        } else {
            bindings.push(ArgumentBinding {
                binding,
                array_index,
                value,
            });
        }
    }

    pub fn encode_element(
        &self,
        element: u32,
        reflection: &DescriptorSetReflection,
        target: TargetApi,
    ) -> Vec<EncodedBinding> {
        encode_argument_buffer(reflection, &self.elements[element as usize], target)
    }

    pub fn descriptor(&self) -> ArgumentBufferArrayDescriptor {
        match self.context.descriptor(self.handle) {
            ResourceDescriptor::ArgumentBufferArray(descriptor) => descriptor,
            other => panic!("argument buffer array slot stored {other:?}"),
        }
    }
}
