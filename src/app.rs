//! Application shell.
use crate::{AppConfig, Backend, Error, GraphicsContext, Vulkan, Window};

/// Owns the window and everything Vulkan created for it.
pub struct Application<B: Backend = Vulkan, W = Window> {
    // Dropped before the window it presents to.
    graphics: GraphicsContext<B>,
    window: W,
    config: AppConfig,
}

impl Application {
    /// Open the window and bring up Vulkan on it.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        log::info!("starting {}", config.title);

        let window = Window::new(&config)?;
        let graphics = GraphicsContext::new(&window, &config)?;

        Ok(Application {
            graphics,
            window,
            config,
        })
    }

    /// Pump window events until the user closes the window.
    pub fn run(&mut self) {
        let device = self.graphics.device();
        log::info!(
            "running on {} (graphics family {:?}, present family {:?})",
            device.physical_device().name,
            device.queue_family_indices().graphics,
            device.queue_family_indices().present
        );

        self.window.pump_until_close();
    }
}

impl<B: Backend, W> Application<B, W> {
    /// The window.
    #[inline]
    pub fn window(&self) -> &W {
        &self.window
    }

    /// Vulkan objects created at startup.
    #[inline]
    pub fn graphics(&self) -> &GraphicsContext<B> {
        &self.graphics
    }

    /// Configuration the application was started with.
    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl<B: Backend, W> Drop for Application<B, W> {
    fn drop(&mut self) {
        log::info!("shutting down {}", self.config.title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{stub_context, CallLog, Tracked};

    #[test]
    fn window_outlives_graphics() {
        let log = CallLog::default();
        let app = Application {
            graphics: stub_context(&log),
            window: Tracked::new("window", &log),
            config: AppConfig::default(),
        };
        log.borrow_mut().clear();

        drop(app);
        assert_eq!(
            *log.borrow(),
            [
                "destroy device",
                "drop surface",
                "drop instance",
                "drop runtime",
                "drop window"
            ]
        );
    }
}
