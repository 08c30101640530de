//! Frame orchestration.
//!
//! One `render_frame` call walks the full frame lifecycle:
//!
//! 1. Apply any pending resize (recreates the swapchain).
//! 2. Wait on the slot's in-flight fence, then drain the slot's deferred
//!    garbage; everything the GPU could have referenced is now done.
//! 3. Acquire a swapchain image. A stale swapchain is recreated and the
//!    frame is skipped without advancing the frame slot.
//! 4. Reset the fence only once submission is certain, record, submit.
//! 5. Present, recreating afterwards if the swapchain reports suboptimal.
//! 6. Advance the frame slot.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{error, info, warn};

use lumen_core::{Error, RendererConfig, Result};
use lumen_platform::Window;
use lumen_rhi::{
    AcquireResult, BindingDesc, BindingKind, Buffer, CachedPipeline, CommandRecorder,
    DeferredReclaimer, DescriptorSet, DescriptorSetBuilder, GraphicsContext, IndexWidth,
    MAX_FRAMES_IN_FLIGHT, PipelineKey, RenderTargetDesc, ResourceCache, ShaderModule, Swapchain,
    Vertex,
};

use crate::frame::{FrameCounter, FrameSync};
use crate::ubo::SceneUniform;

/// Background clear color (linear values).
const CLEAR_COLOR: [f32; 4] = [0.015, 0.015, 0.02, 1.0];

/// Per-slot recording state.
struct FrameContext {
    sync: FrameSync,
    recorder: CommandRecorder,
}

/// The demo content: a spinning colored quad.
struct DemoScene {
    pipeline: Arc<CachedPipeline>,
    vertex_shader: Arc<ShaderModule>,
    fragment_shader: Arc<ShaderModule>,
    set_layout: vk::DescriptorSetLayout,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
    /// One set per frame slot so a write never races the previous frame's
    /// GPU reads.
    uniform_sets: Vec<DescriptorSet>,
    color_format: vk::Format,
}

impl DemoScene {
    fn create(
        context: &GraphicsContext,
        reclaimer: &Arc<DeferredReclaimer>,
        cache: &ResourceCache,
        color_format: vk::Format,
    ) -> Result<Self> {
        let device = context.device();
        let vertex_shader = Arc::new(ShaderModule::from_spirv_file(
            device.clone(),
            "shaders/mesh.vert.spv",
            vk::ShaderStageFlags::VERTEX,
        )?);
        let fragment_shader = Arc::new(ShaderModule::from_spirv_file(
            device.clone(),
            "shaders/mesh.frag.spv",
            vk::ShaderStageFlags::FRAGMENT,
        )?);

        let vertices = [
            Vertex::new(
                glam::Vec3::new(-0.6, 0.0, -0.6),
                glam::Vec3::new(1.0, 0.2, 0.2),
                glam::Vec2::new(0.0, 0.0),
            ),
            Vertex::new(
                glam::Vec3::new(0.6, 0.0, -0.6),
                glam::Vec3::new(0.2, 1.0, 0.2),
                glam::Vec2::new(1.0, 0.0),
            ),
            Vertex::new(
                glam::Vec3::new(0.6, 0.0, 0.6),
                glam::Vec3::new(0.2, 0.2, 1.0),
                glam::Vec2::new(1.0, 1.0),
            ),
            Vertex::new(
                glam::Vec3::new(-0.6, 0.0, 0.6),
                glam::Vec3::new(1.0, 1.0, 0.2),
                glam::Vec2::new(0.0, 1.0),
            ),
        ];
        let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];

        let vertex_buffer = Buffer::from_data(
            device.clone(),
            reclaimer.clone(),
            bytemuck::cast_slice(&vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "quad.vertices",
        )?;
        let index_buffer = Buffer::from_data(
            device.clone(),
            reclaimer.clone(),
            bytemuck::cast_slice(&indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "quad.indices",
        )?;

        let mut uniform_sets = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            let set = DescriptorSetBuilder::new(
                device.clone(),
                reclaimer.clone(),
                context.descriptor_pool(),
                format!("scene.slot{}", slot),
            )
            .add_uniform::<SceneUniform>(0, vk::ShaderStageFlags::VERTEX)
            .build(cache)?;
            uniform_sets.push(set);
        }

        let set_layout = cache.descriptor_set_layout(&[BindingDesc {
            binding: 0,
            kind: BindingKind::UniformBuffer,
            stages: vk::ShaderStageFlags::VERTEX,
        }])?;

        let pipeline = cache.get_or_create_pipeline(
            &Self::pipeline_key(&vertex_shader, &fragment_shader, color_format),
            &vertex_shader,
            &fragment_shader,
            &[set_layout],
        )?;

        Ok(Self {
            pipeline,
            vertex_shader,
            fragment_shader,
            set_layout,
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            uniform_sets,
            color_format,
        })
    }

    fn pipeline_key(
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        color_format: vk::Format,
    ) -> PipelineKey {
        PipelineKey {
            vertex_shader: vertex_shader.id().clone(),
            fragment_shader: fragment_shader.id().clone(),
            targets: RenderTargetDesc::single_color(color_format),
            vertex_layouts: vec![Vertex::layout()],
        }
    }

    /// Swaps to a pipeline targeting the new swapchain format, if it
    /// changed during recreation. The old pipeline retires through its
    /// `Arc` drop.
    fn refresh_pipeline(&mut self, cache: &ResourceCache, color_format: vk::Format) -> Result<()> {
        if self.color_format == color_format {
            return Ok(());
        }

        warn!(
            "Swapchain format changed ({:?} -> {:?}), refreshing pipeline",
            self.color_format, color_format
        );

        self.pipeline = cache.get_or_create_pipeline(
            &Self::pipeline_key(&self.vertex_shader, &self.fragment_shader, color_format),
            &self.vertex_shader,
            &self.fragment_shader,
            &[self.set_layout],
        )?;
        self.color_format = color_format;
        Ok(())
    }
}

/// Owns the full GPU state and drives the frame loop.
///
/// Field order doubles as destruction order: scene resources defer
/// themselves through the reclaimer before it drains, and the context
/// (pools, device, surface, instance) goes last.
pub struct Renderer {
    scene: Option<DemoScene>,
    frames: Vec<FrameContext>,
    counter: FrameCounter,
    swapchain: Swapchain,
    cache: ResourceCache,
    reclaimer: Arc<DeferredReclaimer>,
    context: GraphicsContext,
    resize_pending: Option<(u32, u32)>,
    window_size: (u32, u32),
    start_time: Instant,
}

impl Renderer {
    /// Brings up the whole Vulkan stack for `window`.
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| Error::Window(format!("failed to get display handle: {}", e)))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| Error::Window(format!("failed to get window handle: {}", e)))?;

        let context = GraphicsContext::new(
            display_handle.as_raw(),
            window_handle.as_raw(),
            config.enable_validation,
        )?;

        let reclaimer = DeferredReclaimer::new(context.device().clone());

        let swapchain = Swapchain::new(
            context.instance(),
            context.device().clone(),
            reclaimer.clone(),
            context.surface().handle(),
            window.width(),
            window.height(),
        )?;

        let cache = ResourceCache::new(context.device().clone(), reclaimer.clone());

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            frames.push(FrameContext {
                sync: FrameSync::new(context.device().clone())?,
                recorder: CommandRecorder::new(
                    context.device().clone(),
                    context.command_pool(),
                    context.debug_utils(),
                )?,
            });
        }

        let scene = DemoScene::create(&context, &reclaimer, &cache, swapchain.format())?;

        info!("Renderer initialized");

        Ok(Self {
            scene: Some(scene),
            frames,
            counter: FrameCounter::new(MAX_FRAMES_IN_FLIGHT),
            swapchain,
            cache,
            reclaimer,
            context,
            resize_pending: None,
            window_size: (window.width(), window.height()),
            start_time: Instant::now(),
        })
    }

    /// Notes a new window size; the swapchain is recreated at the start of
    /// the next frame.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
        self.resize_pending = Some((width, height));
    }

    /// Toggles wireframe rendering, rebuilding every live pipeline.
    /// Returns the new state.
    pub fn toggle_wireframe(&mut self) -> Result<bool> {
        let enabled = !self.cache.is_wireframe();
        self.cache.set_wireframe(enabled)?;
        Ok(enabled)
    }

    /// Records, submits, and presents one frame.
    pub fn render_frame(&mut self) -> Result<()> {
        if let Some((width, height)) = self.resize_pending {
            if width == 0 || height == 0 {
                // Minimized; nothing to present until the size comes back
                return Ok(());
            }
            self.resize_pending = None;
            self.recreate_swapchain(width, height)?;
        }

        let slot = self.counter.slot();

        // The slot's previous submission must be fully done before its
        // command buffer is reset or its garbage drained.
        self.frames[slot].sync.in_flight().wait(u64::MAX)?;
        self.reclaimer.begin_slot(slot);

        let acquire = self
            .swapchain
            .acquire_next_image(self.frames[slot].sync.image_available())?;

        let (image_index, mut needs_recreate) = match acquire {
            AcquireResult::Acquired {
                image_index,
                suboptimal,
            } => (image_index as usize, suboptimal),
            AcquireResult::Stale => {
                // Skip the frame; the fence is still signaled and the slot
                // cursor stays put, so the retry reuses this slot.
                let (width, height) = self.window_size;
                self.recreate_swapchain(width, height)?;
                return Ok(());
            }
        };

        // Nothing to draw without a scene. Checked before the fence reset:
        // returning after a reset with no submission would deadlock the
        // slot's next wait.
        let Some(scene) = &mut self.scene else {
            return Ok(());
        };

        // From here on a submission is guaranteed, so the fence may be
        // reset without risking a deadlocked wait.
        self.frames[slot].sync.in_flight().reset()?;

        let extent = self.swapchain.extent();
        let aspect_ratio = extent.width as f32 / extent.height as f32;
        let elapsed = self.start_time.elapsed().as_secs_f32();

        scene.uniform_sets[slot]
            .set_uniform(0, &SceneUniform::spinning_quad(elapsed, aspect_ratio))?;

        let scene = &*scene;
        let recorder = &mut self.frames[slot].recorder;

        recorder.begin()?;
        recorder.begin_label(c"scene");

        recorder.transition_image(
            self.swapchain.image(image_index),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        recorder.begin_rendering(
            self.swapchain.image_view(image_index),
            extent,
            CLEAR_COLOR,
            None,
        );
        recorder.set_viewport_scissor(extent);

        recorder.bind_pipeline(&scene.pipeline);
        recorder.bind_vertex_buffers(0, &[&scene.vertex_buffer]);
        recorder.bind_index_buffer(&scene.index_buffer, IndexWidth::U16);
        recorder.bind_descriptor_set(&scene.uniform_sets[slot], 0);
        recorder.insert_label(c"draw.quad");
        recorder.draw_indexed(scene.index_count, 1);

        recorder.end_rendering();

        recorder.transition_image(
            self.swapchain.image(image_index),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        recorder.end_label();
        recorder.end()?;

        let wait_semaphores = [self.frames[slot].sync.image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.frames[slot].recorder.handle()];
        let signal_semaphores = [self.frames[slot].sync.render_finished()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.context
                .device()
                .submit_graphics(&[submit_info], self.frames[slot].sync.in_flight().handle())?;
        }

        let present_suboptimal = self.swapchain.present(
            self.context.device().present_queue(),
            image_index as u32,
            self.frames[slot].sync.render_finished(),
        )?;
        needs_recreate |= present_suboptimal;

        if needs_recreate {
            let (width, height) = self.window_size;
            self.recreate_swapchain(width, height)?;
        }

        self.counter.advance();
        Ok(())
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.swapchain.recreate(
            self.context.instance(),
            self.context.surface().handle(),
            width,
            height,
        )?;

        // A format change invalidates pipelines keyed on the old format
        if let Some(scene) = &mut self.scene {
            scene.refresh_pipeline(&self.cache, self.swapchain.format())?;
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.device().wait_idle() {
            error!("Failed to wait for device idle during shutdown: {}", e);
        }

        // Retire the scene's resources, then drain every slot; the device
        // is idle so nothing can still reference them.
        self.scene = None;
        self.reclaimer.flush_all();

        info!("Renderer shut down");
    }
}
