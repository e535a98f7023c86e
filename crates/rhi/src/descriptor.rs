//! Descriptor set layouts and descriptor sets.
//!
//! A [`DescriptorSetLayout`] declares the binding points a shader expects. A
//! [`DescriptorSet`] allocated against it is filled with
//! [`DescriptorWrite`]s and bound through a command buffer.
//!
//! # Example
//!
//! ```
//! use mango_rhi::{
//!     BufferDesc, BufferUsage, DescriptorBinding, DescriptorSetLayoutDesc, DescriptorWrite,
//!     Device, DeviceDesc, MemoryType, ShaderStages,
//! };
//!
//! # fn main() -> Result<(), mango_rhi::RhiError> {
//! let device = Device::new(&DeviceDesc::headless(), None)?;
//! let layout = device.create_descriptor_set_layout(&DescriptorSetLayoutDesc {
//!     bindings: vec![DescriptorBinding::uniform_buffer(0, ShaderStages::VERTEX)],
//! })?;
//! let ubo = device.create_buffer(&BufferDesc::new(256, BufferUsage::UNIFORM, MemoryType::CpuToGpu))?;
//!
//! let mut set = device.create_descriptor_set(&layout)?;
//! set.update(&[DescriptorWrite::buffer(0, &ubo)])?;
//! assert!(set.is_complete());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::headless::{HeadlessDescriptorSet, HeadlessDescriptorSetLayout};
use crate::resource::{Buffer, Sampler, Texture};
use crate::types::{Backend, BufferUsage, ShaderStages, TextureUsage};

#[cfg(feature = "vulkan")]
use crate::vulkan::descriptor::{VulkanDescriptorSet, VulkanDescriptorSetLayout};

backend_inner!(DescriptorSetLayoutInner {
    vulkan: VulkanDescriptorSetLayout,
    headless: HeadlessDescriptorSetLayout,
});

backend_inner!(DescriptorSetInner {
    vulkan: VulkanDescriptorSet,
    headless: HeadlessDescriptorSet,
});

/// Kind of resource a binding holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    StorageBuffer,
    SampledTexture,
    StorageTexture,
    Sampler,
    CombinedTextureSampler,
}

impl DescriptorType {
    fn name(self) -> &'static str {
        match self {
            DescriptorType::UniformBuffer => "uniform buffer",
            DescriptorType::StorageBuffer => "storage buffer",
            DescriptorType::SampledTexture => "sampled texture",
            DescriptorType::StorageTexture => "storage texture",
            DescriptorType::Sampler => "sampler",
            DescriptorType::CombinedTextureSampler => "combined texture sampler",
        }
    }
}

/// One binding point of a descriptor set layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: DescriptorType,
    /// Array size; 1 for a plain binding.
    pub count: u32,
    pub stages: ShaderStages,
}

impl DescriptorBinding {
    pub fn new(binding: u32, ty: DescriptorType, stages: ShaderStages) -> Self {
        Self {
            binding,
            ty,
            count: 1,
            stages,
        }
    }

    pub fn uniform_buffer(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, DescriptorType::UniformBuffer, stages)
    }

    pub fn storage_buffer(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, DescriptorType::StorageBuffer, stages)
    }

    pub fn sampled_texture(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, DescriptorType::SampledTexture, stages)
    }

    pub fn storage_texture(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, DescriptorType::StorageTexture, stages)
    }

    pub fn sampler(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, DescriptorType::Sampler, stages)
    }

    pub fn combined_texture_sampler(binding: u32, stages: ShaderStages) -> Self {
        Self::new(binding, DescriptorType::CombinedTextureSampler, stages)
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}

/// Descriptor set layout creation parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutDesc {
    pub(crate) fn validate(&self) -> RhiResult<()> {
        let mut seen = BTreeSet::new();
        for binding in &self.bindings {
            if !seen.insert(binding.binding) {
                return Err(RhiError::InvalidDescription(format!(
                    "binding {} declared twice",
                    binding.binding
                )));
            }
            if binding.count == 0 {
                return Err(RhiError::InvalidDescription(format!(
                    "binding {} has a zero array size",
                    binding.binding
                )));
            }
            if binding.stages.is_empty() {
                return Err(RhiError::InvalidDescription(format!(
                    "binding {} is visible to no shader stage",
                    binding.binding
                )));
            }
        }
        Ok(())
    }
}

/// Binding layout shared by every set allocated against it.
pub struct DescriptorSetLayout {
    inner: DescriptorSetLayoutInner,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    pub(crate) fn from_inner(inner: DescriptorSetLayoutInner, desc: &DescriptorSetLayoutDesc) -> Self {
        debug!(
            "Created descriptor set layout with {} binding(s)",
            desc.bindings.len()
        );
        Self {
            inner,
            bindings: desc.bindings.clone(),
        }
    }

    pub(crate) fn inner(&self) -> &DescriptorSetLayoutInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    #[inline]
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    pub fn binding(&self, binding: u32) -> Option<&DescriptorBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

/// Resource written into a descriptor.
#[derive(Clone, Copy)]
pub enum DescriptorResource<'a> {
    Buffer {
        buffer: &'a Buffer,
        offset: u64,
        /// Bytes visible to the shader; the rest of the buffer if `None`.
        range: Option<u64>,
    },
    Texture(&'a Texture),
    Sampler(&'a Sampler),
    CombinedTextureSampler {
        texture: &'a Texture,
        sampler: &'a Sampler,
    },
}

/// One descriptor update.
#[derive(Clone, Copy)]
pub struct DescriptorWrite<'a> {
    pub binding: u32,
    pub array_element: u32,
    pub resource: DescriptorResource<'a>,
}

impl<'a> DescriptorWrite<'a> {
    /// Whole-buffer write for a uniform or storage buffer binding.
    pub fn buffer(binding: u32, buffer: &'a Buffer) -> Self {
        Self::buffer_range(binding, buffer, 0, None)
    }

    pub fn buffer_range(binding: u32, buffer: &'a Buffer, offset: u64, range: Option<u64>) -> Self {
        Self {
            binding,
            array_element: 0,
            resource: DescriptorResource::Buffer {
                buffer,
                offset,
                range,
            },
        }
    }

    pub fn texture(binding: u32, texture: &'a Texture) -> Self {
        Self {
            binding,
            array_element: 0,
            resource: DescriptorResource::Texture(texture),
        }
    }

    pub fn sampler(binding: u32, sampler: &'a Sampler) -> Self {
        Self {
            binding,
            array_element: 0,
            resource: DescriptorResource::Sampler(sampler),
        }
    }

    pub fn combined(binding: u32, texture: &'a Texture, sampler: &'a Sampler) -> Self {
        Self {
            binding,
            array_element: 0,
            resource: DescriptorResource::CombinedTextureSampler { texture, sampler },
        }
    }

    pub fn at_element(mut self, array_element: u32) -> Self {
        self.array_element = array_element;
        self
    }

    fn backend(&self) -> Backend {
        match self.resource {
            DescriptorResource::Buffer { buffer, .. } => buffer.backend(),
            DescriptorResource::Texture(texture) => texture.backend(),
            DescriptorResource::Sampler(sampler) => sampler.backend(),
            DescriptorResource::CombinedTextureSampler { texture, .. } => texture.backend(),
        }
    }

    fn check_against(&self, binding: &DescriptorBinding) -> Result<(), String> {
        if self.array_element >= binding.count {
            return Err(format!(
                "element {} is outside binding {} of size {}",
                self.array_element, binding.binding, binding.count
            ));
        }

        match (binding.ty, self.resource) {
            (
                DescriptorType::UniformBuffer | DescriptorType::StorageBuffer,
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                },
            ) => {
                let required = if binding.ty == DescriptorType::UniformBuffer {
                    BufferUsage::UNIFORM
                } else {
                    BufferUsage::STORAGE
                };
                if !buffer.usage().contains(required) {
                    return Err(format!(
                        "buffer usage {:?} lacks {:?}",
                        buffer.usage(),
                        required
                    ));
                }
                let end = offset.checked_add(range.unwrap_or(0));
                if offset >= buffer.size() || end.is_none_or(|end| end > buffer.size()) {
                    return Err(format!(
                        "range {}+{:?} exceeds buffer of {} bytes",
                        offset,
                        range,
                        buffer.size()
                    ));
                }
                Ok(())
            }
            (DescriptorType::SampledTexture, DescriptorResource::Texture(texture))
            | (
                DescriptorType::CombinedTextureSampler,
                DescriptorResource::CombinedTextureSampler { texture, .. },
            ) => require_texture_usage(texture, TextureUsage::SAMPLED),
            (DescriptorType::StorageTexture, DescriptorResource::Texture(texture)) => {
                require_texture_usage(texture, TextureUsage::STORAGE)
            }
            (DescriptorType::Sampler, DescriptorResource::Sampler(_)) => Ok(()),
            (ty, _) => Err(format!(
                "binding {} is a {} binding",
                binding.binding,
                ty.name()
            )),
        }
    }
}

fn require_texture_usage(texture: &Texture, usage: TextureUsage) -> Result<(), String> {
    if texture.usage().contains(usage) {
        Ok(())
    } else {
        Err(format!(
            "texture usage {:?} lacks {:?}",
            texture.usage(),
            usage
        ))
    }
}

/// A set of resource bindings matching one layout.
pub struct DescriptorSet {
    inner: DescriptorSetInner,
    bindings: Vec<DescriptorBinding>,
    written: BTreeSet<(u32, u32)>,
}

impl DescriptorSet {
    pub(crate) fn from_inner(inner: DescriptorSetInner, layout: &DescriptorSetLayout) -> Self {
        Self {
            inner,
            bindings: layout.bindings().to_vec(),
            written: BTreeSet::new(),
        }
    }

    pub(crate) fn inner(&self) -> &DescriptorSetInner {
        &self.inner
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.inner.backend()
    }

    /// Writes resources into the set.
    ///
    /// All writes are validated before any is applied. The set must not be
    /// in use by a pending command buffer.
    ///
    /// # Errors
    ///
    /// Returns a protocol violation if a write names an unknown binding, an
    /// element past the array size, or a resource of the wrong kind or usage.
    pub fn update(&mut self, writes: &[DescriptorWrite<'_>]) -> RhiResult<()> {
        for write in writes {
            if write.backend() != self.backend() {
                return Err(RhiError::BackendMismatch {
                    expected: self.backend(),
                    found: write.backend(),
                });
            }
            let binding = self
                .bindings
                .iter()
                .find(|b| b.binding == write.binding)
                .ok_or_else(|| {
                    RhiError::protocol_violation(
                        "DescriptorSet::update",
                        format!("binding {} is not in the layout", write.binding),
                    )
                })?;
            write
                .check_against(binding)
                .map_err(|detail| RhiError::protocol_violation("DescriptorSet::update", detail))?;
        }

        match &mut self.inner {
            #[cfg(feature = "vulkan")]
            DescriptorSetInner::Vulkan(set) => set.update(&self.bindings, writes)?,
            DescriptorSetInner::Headless(set) => set.update(writes),
        }

        self.written
            .extend(writes.iter().map(|w| (w.binding, w.array_element)));
        Ok(())
    }

    /// Returns true once every element of every binding has been written.
    pub fn is_complete(&self) -> bool {
        self.bindings.iter().all(|binding| {
            (0..binding.count).all(|element| self.written.contains(&(binding.binding, element)))
        })
    }
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("backend", &self.backend())
            .field("bindings", &self.bindings.len())
            .field("written", &self.written.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceDesc};
    use crate::resource::{BufferDesc, SamplerDesc, TextureDesc};
    use crate::types::{Format, MemoryType};

    fn device() -> std::sync::Arc<Device> {
        Device::new(&DeviceDesc::headless(), None).unwrap()
    }

    #[test]
    fn test_layout_rejects_duplicate_bindings() {
        let desc = DescriptorSetLayoutDesc {
            bindings: vec![
                DescriptorBinding::uniform_buffer(0, ShaderStages::VERTEX),
                DescriptorBinding::sampler(0, ShaderStages::FRAGMENT),
            ],
        };
        assert!(matches!(
            desc.validate(),
            Err(RhiError::InvalidDescription(_))
        ));

        let zero = DescriptorSetLayoutDesc {
            bindings: vec![DescriptorBinding::sampler(0, ShaderStages::FRAGMENT).with_count(0)],
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_update_checks_kind_and_usage() {
        let device = device();
        let layout = device
            .create_descriptor_set_layout(&DescriptorSetLayoutDesc {
                bindings: vec![
                    DescriptorBinding::uniform_buffer(0, ShaderStages::VERTEX),
                    DescriptorBinding::combined_texture_sampler(1, ShaderStages::FRAGMENT),
                ],
            })
            .unwrap();
        let mut set = device.create_descriptor_set(&layout).unwrap();

        let vertices = device
            .create_buffer(&BufferDesc::new(64, BufferUsage::VERTEX, MemoryType::CpuToGpu))
            .unwrap();
        let ubo = device
            .create_buffer(&BufferDesc::new(64, BufferUsage::UNIFORM, MemoryType::CpuToGpu))
            .unwrap();
        let texture = device
            .create_texture(&TextureDesc::new_2d(
                Format::Rgba8Unorm,
                4,
                4,
                TextureUsage::SAMPLED,
            ))
            .unwrap();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();

        assert!(matches!(
            set.update(&[DescriptorWrite::buffer(0, &vertices)]),
            Err(RhiError::ProtocolViolation { .. })
        ));
        assert!(set.update(&[DescriptorWrite::texture(1, &texture)]).is_err());
        assert!(set.update(&[DescriptorWrite::buffer(7, &ubo)]).is_err());
        assert!(
            set.update(&[DescriptorWrite::buffer_range(0, &ubo, 32, Some(64))])
                .is_err()
        );
        assert!(!set.is_complete());

        set.update(&[
            DescriptorWrite::buffer(0, &ubo),
            DescriptorWrite::combined(1, &texture, &sampler),
        ])
        .unwrap();
        assert!(set.is_complete());
    }

    #[test]
    fn test_array_element_bounds() {
        let device = device();
        let layout = device
            .create_descriptor_set_layout(&DescriptorSetLayoutDesc {
                bindings: vec![DescriptorBinding::sampler(0, ShaderStages::FRAGMENT).with_count(2)],
            })
            .unwrap();
        let mut set = device.create_descriptor_set(&layout).unwrap();
        let sampler = device.create_sampler(&SamplerDesc::default()).unwrap();

        set.update(&[DescriptorWrite::sampler(0, &sampler)]).unwrap();
        assert!(!set.is_complete());
        assert!(
            set.update(&[DescriptorWrite::sampler(0, &sampler).at_element(2)])
                .is_err()
        );
        set.update(&[DescriptorWrite::sampler(0, &sampler).at_element(1)])
            .unwrap();
        assert!(set.is_complete());
    }
}
