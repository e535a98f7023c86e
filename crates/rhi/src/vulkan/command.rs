use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::barrier::{ImageAspect, ResolvedBarriers, SubresourceRange};
use crate::command::{BeginInfo, Command, CommandPoolFlags, RenderPassInheritance};
use crate::error::RhiResult;
use crate::types::CommandBufferLevel;

use super::VulkanContext;
use super::conv;

// =========================================================================
// Command Pool
// =========================================================================

pub(crate) struct VulkanCommandPool {
    ctx: Arc<VulkanContext>,
    pool: vk::CommandPool,
}

impl VulkanCommandPool {
    pub(crate) fn new(ctx: Arc<VulkanContext>, family: u32, flags: CommandPoolFlags) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::from_raw(flags.bits()));
        let pool = unsafe { ctx.device().create_command_pool(&create_info, None)? };
        debug!("Command pool created for family {} ({:?})", family, flags);
        Ok(Self { ctx, pool })
    }

    pub(crate) fn allocate(&self, level: CommandBufferLevel) -> RhiResult<VulkanCommandBuffer> {
        let vk_level = match level {
            CommandBufferLevel::Primary => vk::CommandBufferLevel::PRIMARY,
            CommandBufferLevel::Secondary => vk::CommandBufferLevel::SECONDARY,
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk_level)
            .command_buffer_count(1);
        let buffers = unsafe { self.ctx.device().allocate_command_buffers(&alloc_info)? };
        let buffer = buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;
        Ok(VulkanCommandBuffer {
            ctx: self.ctx.clone(),
            buffer,
        })
    }

    pub(crate) fn free(&self, buffer: &VulkanCommandBuffer) {
        unsafe {
            self.ctx
                .device()
                .free_command_buffers(self.pool, &[buffer.buffer]);
        }
    }

    /// Returns every buffer of the pool to the initial state.
    pub(crate) fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.ctx
                .device()
                .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        // Buffers allocated from the pool are freed with it.
        unsafe { self.ctx.device().destroy_command_pool(self.pool, None) };
        debug!("Command pool destroyed");
    }
}

// =========================================================================
// Command Buffer
// =========================================================================

/// A `vk::CommandBuffer` owned by a [`VulkanCommandPool`].
///
/// Recording calls arrive already validated, so each one maps to a single
/// `vkCmd*` call.
pub(crate) struct VulkanCommandBuffer {
    ctx: Arc<VulkanContext>,
    buffer: vk::CommandBuffer,
}

impl VulkanCommandBuffer {
    #[inline]
    pub(crate) fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    pub(crate) fn begin(
        &mut self,
        info: BeginInfo,
        level: CommandBufferLevel,
        inheritance: Option<&RenderPassInheritance<'_>>,
    ) -> RhiResult<()> {
        let mut flags = if info.one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        // Without inheritance a secondary records outside any render pass.
        let mut inheritance_info = vk::CommandBufferInheritanceInfo::default();
        if let Some(inheritance) = inheritance {
            flags |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
            inheritance_info = inheritance_info
                .render_pass(inheritance.render_pass.inner().as_vulkan()?.handle())
                .subpass(inheritance.subpass);
            if let Some(framebuffer) = inheritance.framebuffer {
                inheritance_info =
                    inheritance_info.framebuffer(framebuffer.inner().as_vulkan()?.handle());
            }
        }
        let mut begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        if level == CommandBufferLevel::Secondary {
            begin_info = begin_info.inheritance_info(&inheritance_info);
        }
        unsafe { self.ctx.device().begin_command_buffer(self.buffer, &begin_info)? };
        Ok(())
    }

    pub(crate) fn end(&mut self) -> RhiResult<()> {
        unsafe { self.ctx.device().end_command_buffer(self.buffer)? };
        Ok(())
    }

    pub(crate) fn reset(&mut self) -> RhiResult<()> {
        unsafe {
            self.ctx
                .device()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, command: &Command<'_>) -> RhiResult<()> {
        let device = self.ctx.device();
        let cb = self.buffer;
        match *command {
            Command::BeginRenderPass {
                render_pass,
                framebuffer,
                area,
                clear_values,
                contents,
            } => {
                let clears = clear_values
                    .iter()
                    .map(|&value| conv::clear_value(value))
                    .collect::<Vec<_>>();
                let begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(render_pass.inner().as_vulkan()?.handle())
                    .framebuffer(framebuffer.inner().as_vulkan()?.handle())
                    .render_area(conv::rect(area))
                    .clear_values(&clears);
                unsafe {
                    device.cmd_begin_render_pass(cb, &begin_info, conv::subpass_contents(contents))
                };
            }
            Command::NextSubpass(contents) => unsafe {
                device.cmd_next_subpass(cb, conv::subpass_contents(contents));
            },
            Command::EndRenderPass => unsafe { device.cmd_end_render_pass(cb) },
            Command::BindPipeline(pipeline) => {
                let handle = pipeline.inner().as_vulkan()?.handle();
                unsafe {
                    device.cmd_bind_pipeline(cb, conv::bind_point(pipeline.bind_point()), handle)
                };
            }
            Command::BindDescriptorSet {
                bind_point,
                layout,
                index,
                set,
            } => {
                let sets = [set.inner().as_vulkan()?.handle()];
                unsafe {
                    device.cmd_bind_descriptor_sets(
                        cb,
                        conv::bind_point(bind_point),
                        layout.inner().as_vulkan()?.handle(),
                        index,
                        &sets,
                        &[],
                    );
                }
            }
            Command::BindVertexBuffer {
                binding,
                buffer,
                offset,
            } => {
                let buffers = [buffer.inner().as_vulkan()?.handle()];
                unsafe { device.cmd_bind_vertex_buffers(cb, binding, &buffers, &[offset]) };
            }
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            } => {
                let handle = buffer.inner().as_vulkan()?.handle();
                unsafe {
                    device.cmd_bind_index_buffer(cb, handle, offset, conv::index_type(index_type))
                };
            }
            Command::SetViewport(viewport) => unsafe {
                device.cmd_set_viewport(cb, 0, &[conv::viewport(viewport)]);
            },
            Command::SetScissor(rect) => unsafe {
                device.cmd_set_scissor(cb, 0, &[conv::rect(rect)]);
            },
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => unsafe {
                device.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance);
            },
            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => unsafe {
                device.cmd_draw_indexed(
                    cb,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                );
            },
            Command::Dispatch { x, y, z } => unsafe { device.cmd_dispatch(cb, x, y, z) },
            Command::CopyBuffer { src, dst, region } => {
                let copy = vk::BufferCopy {
                    src_offset: region.src_offset,
                    dst_offset: region.dst_offset,
                    size: region.size,
                };
                unsafe {
                    device.cmd_copy_buffer(
                        cb,
                        src.inner().as_vulkan()?.handle(),
                        dst.inner().as_vulkan()?.handle(),
                        &[copy],
                    );
                }
            }
            Command::CopyBufferToTexture { src, dst, region } => {
                // Copies address exactly one aspect.
                let aspect = if dst.format().is_depth() {
                    vk::ImageAspectFlags::DEPTH
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                let copy = vk::BufferImageCopy::default()
                    .buffer_offset(region.buffer_offset)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(aspect)
                            .mip_level(region.mip_level)
                            .base_array_layer(region.array_layer)
                            .layer_count(1),
                    )
                    .image_extent(vk::Extent3D {
                        width: region.width,
                        height: region.height,
                        depth: 1,
                    });
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cb,
                        src.inner().as_vulkan()?.handle(),
                        dst.inner().as_vulkan()?.image(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy],
                    );
                }
            }
            Command::Barrier(barriers) => self.record_barriers(barriers)?,
            Command::PushConstants {
                layout,
                stages,
                offset,
                data,
            } => unsafe {
                device.cmd_push_constants(
                    cb,
                    layout.inner().as_vulkan()?.handle(),
                    conv::shader_stages(stages),
                    offset,
                    data,
                );
            },
            Command::ExecuteSecondary(secondaries) => {
                let handles = secondaries
                    .iter()
                    .map(|cmd| cmd.inner().as_vulkan().map(VulkanCommandBuffer::handle))
                    .collect::<RhiResult<Vec<_>>>()?;
                unsafe { device.cmd_execute_commands(cb, &handles) };
            }
            Command::BeginDebugRegion { name, color } => {
                if let Some(debug_utils) = self.ctx.debug_utils() {
                    match CString::new(name) {
                        Ok(name) => {
                            let label = vk::DebugUtilsLabelEXT::default()
                                .label_name(&name)
                                .color(color);
                            unsafe { debug_utils.cmd_begin_debug_utils_label(cb, &label) };
                        }
                        Err(_) => warn!("Debug region name contains a NUL byte; label skipped"),
                    }
                }
            }
            Command::EndDebugRegion => {
                if let Some(debug_utils) = self.ctx.debug_utils() {
                    unsafe { debug_utils.cmd_end_debug_utils_label(cb) };
                }
            }
        }
        Ok(())
    }

    fn record_barriers(&self, barriers: &ResolvedBarriers<'_>) -> RhiResult<()> {
        let buffer_barriers = barriers
            .buffers
            .iter()
            .map(|transition| {
                let (src_family, dst_family) = queue_families(transition.queue_transfer);
                Ok(vk::BufferMemoryBarrier::default()
                    .src_access_mask(conv::access_flags(transition.src_access))
                    .dst_access_mask(conv::access_flags(transition.dst_access))
                    .src_queue_family_index(src_family)
                    .dst_queue_family_index(dst_family)
                    .buffer(transition.buffer.inner().as_vulkan()?.handle())
                    .offset(0)
                    .size(vk::WHOLE_SIZE))
            })
            .collect::<RhiResult<Vec<_>>>()?;

        let image_barriers = barriers
            .images
            .iter()
            .map(|transition| {
                let (src_family, dst_family) = queue_families(transition.queue_transfer);
                Ok(vk::ImageMemoryBarrier::default()
                    .src_access_mask(conv::access_flags(transition.src_access))
                    .dst_access_mask(conv::access_flags(transition.dst_access))
                    .old_layout(conv::image_layout(transition.old_layout))
                    .new_layout(conv::image_layout(transition.new_layout))
                    .src_queue_family_index(src_family)
                    .dst_queue_family_index(dst_family)
                    .image(transition.texture.inner().as_vulkan()?.image())
                    .subresource_range(subresource_range(transition.aspect, transition.range)))
            })
            .collect::<RhiResult<Vec<_>>>()?;

        unsafe {
            self.ctx.device().cmd_pipeline_barrier(
                self.buffer,
                conv::pipeline_stages(barriers.src_stages),
                conv::pipeline_stages(barriers.dst_stages),
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
        Ok(())
    }
}

fn queue_families(transfer: Option<crate::barrier::QueueTransfer>) -> (u32, u32) {
    transfer.map_or((vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED), |t| {
        (t.src_family, t.dst_family)
    })
}

fn subresource_range(aspect: ImageAspect, range: SubresourceRange) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: conv::image_aspect(aspect),
        base_mip_level: range.base_mip,
        level_count: range.mip_count.unwrap_or(vk::REMAINING_MIP_LEVELS),
        base_array_layer: range.base_layer,
        layer_count: range.layer_count.unwrap_or(vk::REMAINING_ARRAY_LAYERS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::QueueTransfer;

    #[test]
    fn test_whole_resource_range() {
        let range = subresource_range(ImageAspect::COLOR, SubresourceRange::default());
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }

    #[test]
    fn test_explicit_range_is_kept() {
        let range = subresource_range(
            ImageAspect::DEPTH,
            SubresourceRange {
                base_mip: 2,
                mip_count: Some(1),
                base_layer: 3,
                layer_count: Some(2),
            },
        );
        assert_eq!(range.base_mip_level, 2);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.base_array_layer, 3);
        assert_eq!(range.layer_count, 2);
    }

    #[test]
    fn test_queue_family_ownership() {
        assert_eq!(
            queue_families(None),
            (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
        );
        assert_eq!(
            queue_families(Some(QueueTransfer {
                src_family: 1,
                dst_family: 0
            })),
            (1, 0)
        );
    }
}
