//! Command pool and per-frame command recording.
//!
//! Each frame slot owns one [`CommandRecorder`]. A frame's recording is
//! bracketed by [`CommandRecorder::begin`] (which resets the buffer; safe
//! because the slot's fence was waited on first) and
//! [`CommandRecorder::end`]. Binding a pipeline latches its layout so later
//! descriptor binds do not need it repeated.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::buffer::Buffer;
use crate::cache::CachedPipeline;
use crate::descriptor::DescriptorSet;
use crate::device::Device;
use crate::error::GfxResult;

/// Width of index buffer elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    U16,
    U32,
}

impl IndexWidth {
    pub const fn to_vk(self) -> vk::IndexType {
        match self {
            IndexWidth::U16 => vk::IndexType::UINT16,
            IndexWidth::U32 => vk::IndexType::UINT32,
        }
    }
}

/// Command pool for graphics command buffers.
///
/// Created with `RESET_COMMAND_BUFFER` so individual buffers can be reset
/// and re-recorded each frame.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    pub fn new(device: Arc<Device>) -> GfxResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.queue_families().graphics);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("Created command pool");

        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers from this pool.
    pub fn allocate(&self, count: u32) -> GfxResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
    }
}

/// Records one frame slot's command buffer.
pub struct CommandRecorder {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
    /// Layout latched by the last `bind_pipeline`, used for descriptor binds.
    bound_layout: vk::PipelineLayout,
    /// Present only when validation/debug utils are active.
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl CommandRecorder {
    pub fn new(
        device: Arc<Device>,
        pool: &CommandPool,
        debug_utils: Option<ash::ext::debug_utils::Device>,
    ) -> GfxResult<Self> {
        let buffer = pool.allocate(1)?[0];

        Ok(Self {
            device,
            buffer,
            bound_layout: vk::PipelineLayout::null(),
            debug_utils,
        })
    }

    /// Returns the raw command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Resets the buffer and begins a one-time recording.
    ///
    /// The slot's in-flight fence must have been waited on; resetting a
    /// buffer the GPU is still executing is undefined behavior.
    pub fn begin(&mut self) -> GfxResult<()> {
        self.bound_layout = vk::PipelineLayout::null();

        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Ends the recording.
    pub fn end(&mut self) -> GfxResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Transitions an image between layouts with a full-subresource barrier.
    pub fn transition_image(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(1),
            );

        let barriers = [barrier];
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, &dependency_info);
        }
    }

    /// Begins a dynamic rendering scope targeting one color attachment and
    /// an optional depth attachment, both cleared on load.
    pub fn begin_rendering(
        &self,
        color_view: vk::ImageView,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
        depth_view: Option<vk::ImageView>,
    ) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });

        let color_attachments = [color_attachment];
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        let depth_attachment;
        if let Some(depth_view) = depth_view {
            depth_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(depth_view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                });
            rendering_info = rendering_info.depth_attachment(&depth_attachment);
        }

        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, &rendering_info);
        }
    }

    /// Ends the current dynamic rendering scope.
    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Sets viewport and scissor to cover the full extent.
    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    /// Binds a graphics pipeline and latches its layout for subsequent
    /// descriptor binds.
    pub fn bind_pipeline(&mut self, pipeline: &CachedPipeline) {
        self.bound_layout = pipeline.layout();
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }
    }

    /// Binds vertex buffers to consecutive bindings starting at
    /// `first_binding`, each at offset zero.
    ///
    /// The binding indices must match the pipeline's vertex buffer layouts,
    /// in order.
    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[&Buffer]) {
        debug_assert!(!buffers.is_empty(), "bind_vertex_buffers with no buffers");

        let handles: Vec<vk::Buffer> = buffers.iter().map(|b| b.handle()).collect();
        let offsets: Vec<vk::DeviceSize> = vec![0; buffers.len()];

        unsafe {
            self.device.handle().cmd_bind_vertex_buffers(
                self.buffer,
                first_binding,
                &handles,
                &offsets,
            );
        }
    }

    /// Binds a single vertex buffer at binding 0.
    pub fn bind_vertex_buffer(&self, buffer: &Buffer) {
        self.bind_vertex_buffers(0, &[buffer]);
    }

    /// Binds an index buffer with the given element width.
    pub fn bind_index_buffer(&self, buffer: &Buffer, width: IndexWidth) {
        unsafe {
            self.device.handle().cmd_bind_index_buffer(
                self.buffer,
                buffer.handle(),
                0,
                width.to_vk(),
            );
        }
    }

    /// Binds a descriptor set at the given set index using the layout
    /// latched by the last `bind_pipeline`.
    pub fn bind_descriptor_set(&self, set: &DescriptorSet, set_index: u32) {
        debug_assert!(
            self.bound_layout != vk::PipelineLayout::null(),
            "bind_descriptor_set called before bind_pipeline"
        );

        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.bound_layout,
                set_index,
                &[set.handle()],
                &[],
            );
        }
    }

    /// Issues an indexed draw.
    pub fn draw_indexed(&self, index_count: u32, instance_count: u32) {
        debug_assert!(index_count > 0, "draw_indexed with zero indices");
        debug_assert!(instance_count > 0, "draw_indexed with zero instances");

        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, instance_count, 0, 0, 0);
        }
    }

    /// Opens a debug label region. No-op when debug utils are inactive.
    pub fn begin_label(&self, name: &std::ffi::CStr) {
        if let Some(debug_utils) = &self.debug_utils {
            let label = vk::DebugUtilsLabelEXT::default().label_name(name);
            unsafe {
                debug_utils.cmd_begin_debug_utils_label(self.buffer, &label);
            }
        }
    }

    /// Closes the innermost debug label region.
    pub fn end_label(&self) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.buffer);
            }
        }
    }

    /// Inserts a single debug label at the current point in the stream.
    /// No-op when debug utils are inactive.
    pub fn insert_label(&self, name: &std::ffi::CStr) {
        if let Some(debug_utils) = &self.debug_utils {
            let label = vk::DebugUtilsLabelEXT::default().label_name(name);
            unsafe {
                debug_utils.cmd_insert_debug_utils_label(self.buffer, &label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_width_maps_to_vk() {
        assert_eq!(IndexWidth::U16.to_vk(), vk::IndexType::UINT16);
        assert_eq!(IndexWidth::U32.to_vk(), vk::IndexType::UINT32);
    }
}
