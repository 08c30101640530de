//! Error types for the renderer.

use thiserror::Error;

/// Main error type for the renderer.
///
/// Resource-creation failures from any layer end up here and are handled
/// once, at the application entry point, which logs and exits with a
/// failure status. Transient swapchain results (out of date, suboptimal)
/// never reach this type; they are handled locally by recreation.
#[derive(Error, Debug)]
pub enum Error {
    /// GPU API errors
    #[error("Graphics error: {0}")]
    Graphics(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Shader loading errors
    #[error("Shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the renderer's Error type.
pub type Result<T> = std::result::Result<T, Error>;
