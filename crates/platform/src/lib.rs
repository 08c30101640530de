//! Windowing glue for the Lumen renderer.

mod window;

pub use window::Window;
