//! Error types for the graphics backend.

use thiserror::Error;

/// Errors produced by the graphics backend.
#[derive(Error, Debug)]
pub enum GfxError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocation error: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfied the requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader loading or reflection error
    #[error("Shader error: {0}")]
    Shader(String),

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swapchain creation or negotiation error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Pipeline construction error
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Caller passed an argument that violates an API precondition
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for graphics backend operations.
pub type GfxResult<T> = std::result::Result<T, GfxError>;

impl From<GfxError> for lumen_core::Error {
    fn from(err: GfxError) -> Self {
        lumen_core::Error::Graphics(err.to_string())
    }
}
