//! Startup configuration.

/// Settings decided once by the application shell and handed to every
/// component that needs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Window title, also advertised as the Vulkan application name.
    pub title: String,
    /// Initial window width in logical pixels.
    pub width: u32,
    /// Initial window height in logical pixels.
    pub height: u32,
    /// Request the Khronos validation layer and a debug messenger.
    pub enable_diagnostics: bool,
}

impl AppConfig {
    /// Default window width.
    pub const DEFAULT_WIDTH: u32 = 800;
    /// Default window height.
    pub const DEFAULT_HEIGHT: u32 = 600;

    /// Window title to use.
    #[inline]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Initial window size.
    #[inline]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Turn validation layers and the debug messenger on or off.
    #[inline]
    pub fn with_diagnostics(mut self, enable_diagnostics: bool) -> Self {
        self.enable_diagnostics = enable_diagnostics;
        self
    }
}

impl Default for AppConfig {
    /// Diagnostics follow the build profile: on for debug builds, off for
    /// release builds.
    fn default() -> Self {
        AppConfig {
            title: "vkBabySteps".to_owned(),
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            enable_diagnostics: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AppConfig::default();
        assert_eq!(config.title, "vkBabySteps");
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.enable_diagnostics, cfg!(debug_assertions));
    }

    #[test]
    fn builder_overrides() {
        let config = AppConfig::default()
            .with_title("demo")
            .with_size(1280, 720)
            .with_diagnostics(false);
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (1280, 720));
        assert!(!config.enable_diagnostics);
    }
}
