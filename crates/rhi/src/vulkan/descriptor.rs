use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;

use crate::descriptor::{DescriptorBinding, DescriptorResource, DescriptorSetLayoutDesc, DescriptorType, DescriptorWrite};
use crate::error::{RhiError, RhiResult};

use super::VulkanContext;
use super::conv;

pub(crate) struct VulkanDescriptorSetLayout {
    ctx: Arc<VulkanContext>,
    layout: vk::DescriptorSetLayout,
}

impl VulkanDescriptorSetLayout {
    pub(crate) fn new(ctx: Arc<VulkanContext>, desc: &DescriptorSetLayoutDesc) -> RhiResult<Self> {
        let bindings = desc
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(conv::descriptor_type(binding.ty))
                    .descriptor_count(binding.count)
                    .stage_flags(conv::shader_stages(binding.stages))
            })
            .collect::<Vec<_>>();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { ctx.device().create_descriptor_set_layout(&create_info, None)? };
        Ok(Self { ctx, layout })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for VulkanDescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.ctx
                .device()
                .destroy_descriptor_set_layout(self.layout, None)
        };
    }
}

/// A descriptor set allocated from a pool sized for exactly this set.
pub(crate) struct VulkanDescriptorSet {
    ctx: Arc<VulkanContext>,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl VulkanDescriptorSet {
    pub(crate) fn new(
        ctx: Arc<VulkanContext>,
        layout: &VulkanDescriptorSetLayout,
        bindings: &[DescriptorBinding],
    ) -> RhiResult<Self> {
        let sizes = pool_sizes(bindings);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&sizes);
        let device = ctx.device();
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets.into_iter().next(),
            Err(e) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                return Err(e.into());
            }
        };
        let Some(set) = set else {
            unsafe { device.destroy_descriptor_pool(pool, None) };
            return Err(RhiError::ResourceCreation("no descriptor set allocated".to_string()));
        };
        Ok(Self { ctx, pool, set })
    }

    #[inline]
    pub(crate) fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Writes are validated against `bindings` by the caller.
    pub(crate) fn update(
        &mut self,
        bindings: &[DescriptorBinding],
        writes: &[DescriptorWrite<'_>],
    ) -> RhiResult<()> {
        enum Info {
            Buffer(usize),
            Image(usize),
        }

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        let mut entries = Vec::with_capacity(writes.len());
        for write in writes {
            let ty = bindings
                .iter()
                .find(|b| b.binding == write.binding)
                .map(|b| b.ty)
                .ok_or_else(|| {
                    RhiError::InvalidDescription(format!("binding {} is not in the layout", write.binding))
                })?;
            let info = match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: buffer.inner().as_vulkan()?.handle(),
                        offset,
                        range: range.unwrap_or(vk::WHOLE_SIZE),
                    });
                    Info::Buffer(buffer_infos.len() - 1)
                }
                DescriptorResource::Texture(texture) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: texture.inner().as_vulkan()?.view(),
                        image_layout: image_layout(ty),
                    });
                    Info::Image(image_infos.len() - 1)
                }
                DescriptorResource::Sampler(sampler) => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: sampler.inner().as_vulkan()?.handle(),
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    Info::Image(image_infos.len() - 1)
                }
                DescriptorResource::CombinedTextureSampler { texture, sampler } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: sampler.inner().as_vulkan()?.handle(),
                        image_view: texture.inner().as_vulkan()?.view(),
                        image_layout: image_layout(ty),
                    });
                    Info::Image(image_infos.len() - 1)
                }
            };
            entries.push((write, ty, info));
        }

        let vk_writes = entries
            .iter()
            .map(|(write, ty, info)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(write.binding)
                    .dst_array_element(write.array_element)
                    .descriptor_type(conv::descriptor_type(*ty));
                match *info {
                    Info::Buffer(i) => base.buffer_info(std::slice::from_ref(&buffer_infos[i])),
                    Info::Image(i) => base.image_info(std::slice::from_ref(&image_infos[i])),
                }
            })
            .collect::<Vec<_>>();
        unsafe { self.ctx.device().update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }
}

impl Drop for VulkanDescriptorSet {
    fn drop(&mut self) {
        // The set is freed with its pool.
        unsafe { self.ctx.device().destroy_descriptor_pool(self.pool, None) };
    }
}

fn image_layout(ty: DescriptorType) -> vk::ImageLayout {
    match ty {
        DescriptorType::StorageTexture => vk::ImageLayout::GENERAL,
        _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

/// Descriptor counts per type, merged across bindings.
fn pool_sizes(bindings: &[DescriptorBinding]) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in bindings {
        *counts
            .entry(conv::descriptor_type(binding.ty).as_raw())
            .or_default() += binding.count;
    }
    if counts.is_empty() {
        // Pools may not be created without sizes.
        counts.insert(vk::DescriptorType::UNIFORM_BUFFER.as_raw(), 1);
    }
    counts
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShaderStages;

    #[test]
    fn test_pool_sizes_merge_by_type() {
        let bindings = [
            DescriptorBinding::uniform_buffer(0, ShaderStages::VERTEX),
            DescriptorBinding::combined_texture_sampler(1, ShaderStages::FRAGMENT).with_count(4),
            DescriptorBinding::uniform_buffer(2, ShaderStages::FRAGMENT),
        ];
        let sizes = pool_sizes(&bindings);
        assert_eq!(sizes.len(), 2);
        let uniform = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(uniform.descriptor_count, 2);
        let combined = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .unwrap();
        assert_eq!(combined.descriptor_count, 4);
    }

    #[test]
    fn test_empty_layout_still_gets_a_pool_size() {
        assert_eq!(pool_sizes(&[]).len(), 1);
    }

    #[test]
    fn test_storage_textures_use_general_layout() {
        assert_eq!(image_layout(DescriptorType::StorageTexture), vk::ImageLayout::GENERAL);
        assert_eq!(
            image_layout(DescriptorType::SampledTexture),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }
}
