//! Renderer configuration.

/// Top-level configuration for the renderer and its window.
///
/// Constructed once in `main` and passed down by reference. There is no
/// config file; log filtering is controlled separately via `RUST_LOG`.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Initial window width in physical pixels.
    pub width: u32,
    /// Initial window height in physical pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
    /// Enable Vulkan validation layers.
    pub enable_validation: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "Lumen".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert!(!config.title.is_empty());
    }
}
