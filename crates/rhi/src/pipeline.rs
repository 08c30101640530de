//! Graphics pipeline construction for dynamic rendering.
//!
//! There is no render pass object: the attachment formats a pipeline will
//! render into are described by [`RenderTargetDesc`] and chained into the
//! pipeline via `vk::PipelineRenderingCreateInfo`. The same struct is
//! hashable and doubles as the render-target component of pipeline cache
//! keys.

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{GfxError, GfxResult};
use crate::shader::ShaderModule;
use crate::vertex::VertexBufferLayout;

/// Attachment formats and sample count a pipeline renders into.
///
/// Two pipelines with equal `RenderTargetDesc`s are compatible with the
/// same rendering scope; any differing field means a distinct pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTargetDesc {
    /// Color attachment formats, in attachment order.
    pub color_formats: Vec<vk::Format>,
    /// Depth attachment format, if depth testing is used.
    pub depth_format: Option<vk::Format>,
    /// MSAA sample count.
    pub samples: vk::SampleCountFlags,
}

impl RenderTargetDesc {
    /// Single color attachment, no depth, no MSAA. The common case for
    /// rendering straight to the swapchain.
    pub fn single_color(format: vk::Format) -> Self {
        Self {
            color_formats: vec![format],
            depth_format: None,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Single color attachment plus a depth attachment.
    pub fn color_depth(color: vk::Format, depth: vk::Format) -> Self {
        Self {
            color_formats: vec![color],
            depth_format: Some(depth),
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

/// Everything needed to build one graphics pipeline.
///
/// `polygon_mode` is deliberately not part of any cache key; the cache owns
/// it globally so a wireframe toggle can rebuild every pipeline in place.
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: &'a ShaderModule,
    pub fragment_shader: &'a ShaderModule,
    pub vertex_layouts: &'a [VertexBufferLayout],
    pub targets: &'a RenderTargetDesc,
    pub layout: vk::PipelineLayout,
    pub polygon_mode: vk::PolygonMode,
}

/// Creates a pipeline layout from descriptor set layouts.
pub fn create_pipeline_layout(
    device: &Device,
    set_layouts: &[vk::DescriptorSetLayout],
) -> GfxResult<vk::PipelineLayout> {
    let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
    let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };
    Ok(layout)
}

/// Builds a graphics pipeline targeting dynamic rendering.
///
/// Viewport and scissor are dynamic states, so pipelines survive window
/// resizes unchanged. Depth testing is enabled iff the target description
/// carries a depth format.
pub fn build_graphics_pipeline(
    device: &Device,
    desc: &GraphicsPipelineDesc<'_>,
) -> GfxResult<vk::Pipeline> {
    let entry_point = c"main";

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex_shader.handle())
            .name(entry_point),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(desc.fragment_shader.handle())
            .name(entry_point),
    ];

    // Flatten the layouts into Vulkan binding/attribute descriptions,
    // one binding index per buffer layout.
    let mut bindings = Vec::with_capacity(desc.vertex_layouts.len());
    let mut attributes = Vec::new();
    for (binding, layout) in desc.vertex_layouts.iter().enumerate() {
        let binding = binding as u32;
        bindings.push(layout.binding_description(binding));
        attributes.extend(layout.attribute_descriptions(binding));
    }

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only; the actual rects are set at record time.
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(desc.polygon_mode)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(desc.targets.samples);

    let depth_stencil = if desc.targets.depth_format.is_some() {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
    } else {
        vk::PipelineDepthStencilStateCreateInfo::default()
    };

    let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
        .targets
        .color_formats
        .iter()
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        })
        .collect();

    let color_blend =
        vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&desc.targets.color_formats);
    if let Some(depth_format) = desc.targets.depth_format {
        rendering_info = rendering_info.depth_attachment_format(depth_format);
    }

    let create_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .push_next(&mut rendering_info);

    let pipelines = unsafe {
        device
            .handle()
            .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
            .map_err(|(_, e)| GfxError::Pipeline(format!("pipeline creation failed: {:?}", e)))?
    };

    debug!(
        "Built graphics pipeline (vs '{}', fs '{}', {:?})",
        desc.vertex_shader.id(),
        desc.fragment_shader.id(),
        desc.polygon_mode
    );

    Ok(pipelines[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_render_target_desc_equality() {
        let a = RenderTargetDesc::single_color(vk::Format::B8G8R8A8_SRGB);
        let b = RenderTargetDesc::single_color(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_render_target_desc_distinguishes_formats() {
        let a = RenderTargetDesc::single_color(vk::Format::B8G8R8A8_SRGB);
        let b = RenderTargetDesc::single_color(vk::Format::B8G8R8A8_UNORM);
        assert_ne!(a, b);
    }

    #[test]
    fn test_render_target_desc_distinguishes_depth() {
        let a = RenderTargetDesc::single_color(vk::Format::B8G8R8A8_SRGB);
        let b = RenderTargetDesc::color_depth(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT);
        assert_ne!(a, b);
        assert_ne!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_render_target_desc_distinguishes_samples() {
        let a = RenderTargetDesc::single_color(vk::Format::B8G8R8A8_SRGB);
        let mut b = a.clone();
        b.samples = vk::SampleCountFlags::TYPE_4;
        assert_ne!(a, b);
    }
}
