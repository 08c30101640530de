//! Core utilities for the Lumen renderer.
//!
//! This crate provides foundational types used across the renderer:
//! - Error types and result aliases
//! - Logging initialization
//! - Renderer configuration

mod config;
mod error;
mod logging;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
