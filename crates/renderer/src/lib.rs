//! Frame lifecycle orchestration for the Lumen renderer.

mod frame;
mod renderer;
mod ubo;

pub use frame::{FrameCounter, FrameSync};
pub use renderer::Renderer;
pub use ubo::SceneUniform;
