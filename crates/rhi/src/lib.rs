//! Vulkan backend for the Lumen renderer.
//!
//! Layering, bottom to top:
//! - [`instance`], [`device`], [`context`]: API setup, GPU selection, and
//!   the owned context bundle
//! - [`sync`], [`reclaim`]: fences, semaphores, and deferred destruction
//! - [`buffer`], [`shader`], [`vertex`], [`descriptor`]: resources
//! - [`pipeline`], [`cache`]: pipeline construction and content-addressed
//!   caching
//! - [`swapchain`], [`command`]: presentation and recording

pub mod buffer;
pub mod cache;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod reclaim;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use buffer::Buffer;
pub use cache::{CachedPipeline, PipelineKey, ResourceCache};
pub use command::{CommandPool, CommandRecorder, IndexWidth};
pub use context::{GraphicsContext, Surface};
pub use descriptor::{BindingDesc, BindingKind, DescriptorPool, DescriptorSet, DescriptorSetBuilder};
pub use device::{AdapterInfo, Device, QueueFamilyIndices, select_adapter};
pub use error::{GfxError, GfxResult};
pub use instance::Instance;
pub use pipeline::RenderTargetDesc;
pub use reclaim::{DeferredReclaimer, Garbage};
pub use shader::{ShaderId, ShaderModule};
pub use swapchain::{AcquireResult, Swapchain};
pub use sync::{Fence, MAX_FRAMES_IN_FLIGHT, Semaphore};
pub use vertex::{Vertex, VertexAttribute, VertexBufferLayout, VertexFormat};
