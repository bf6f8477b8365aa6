//! Ownership of the Vulkan objects created at startup.
use crate::{
    AppConfig, DeviceBuilder, DeviceHandle, Error, Instance, InstanceBuilder,
    InstanceCreationError, LogicalDevice, Runtime, Surface, ValidationLayers, VulkanDevices,
    Window,
};

/// The object types a [`GraphicsContext`] owns.
pub trait Backend {
    /// Loaded API runtime. Unloaded last.
    type Runtime;
    /// API instance.
    type Instance;
    /// Window surface, created from the instance.
    type Surface;
    /// Logical device, created from the instance and surface.
    type Device: DeviceHandle;
}

/// The real Vulkan backend.
pub enum Vulkan {}

impl Backend for Vulkan {
    type Runtime = Runtime;
    type Instance = Instance;
    type Surface = Surface;
    type Device = ash::Device;
}

/// Everything created from the Vulkan runtime, torn down in reverse order of
/// creation: device, surface, instance, then the runtime itself.
pub struct GraphicsContext<B: Backend> {
    // Field order is drop order.
    device: LogicalDevice<B::Device>,
    surface: B::Surface,
    instance: B::Instance,
    runtime: B::Runtime,
}

impl<B: Backend> GraphicsContext<B> {
    /// Take ownership of already created objects.
    pub fn from_parts(
        runtime: B::Runtime,
        instance: B::Instance,
        surface: B::Surface,
        device: LogicalDevice<B::Device>,
    ) -> Self {
        GraphicsContext {
            device,
            surface,
            instance,
            runtime,
        }
    }

    /// The logical device and its queues.
    #[inline]
    pub fn device(&self) -> &LogicalDevice<B::Device> {
        &self.device
    }

    /// The window surface.
    #[inline]
    pub fn surface(&self) -> &B::Surface {
        &self.surface
    }

    /// The instance.
    #[inline]
    pub fn instance(&self) -> &B::Instance {
        &self.instance
    }

    /// The loaded runtime.
    #[inline]
    pub fn runtime(&self) -> &B::Runtime {
        &self.runtime
    }
}

impl GraphicsContext<Vulkan> {
    /// Load Vulkan, then create the instance, a surface for `window` and the
    /// logical device. If a step fails, everything created so far is
    /// released in reverse order.
    pub fn new(window: &Window, config: &AppConfig) -> Result<Self, Error> {
        let runtime = Runtime::load()
            .map_err(|err| Error::Initialization(format!("failed to load vulkan: {err}")))?;

        let instance = InstanceBuilder::new()
            .app_name(&config.title)
            .map_err(InstanceCreationError::from)?
            .app_version(1, 0)
            .engine_name("No Engine")
            .map_err(InstanceCreationError::from)?
            .engine_version(1, 0)
            .api_version(1, 3)
            .validation_layers(ValidationLayers::from_diagnostics(
                config.enable_diagnostics,
            ))
            .request_debug_messenger(config.enable_diagnostics)
            .require_surface_extensions(window)?
            .build(&runtime)?;

        let surface =
            Surface::new(&runtime, &instance, window).map_err(Error::SurfaceCreation)?;

        let device = DeviceBuilder::new()
            .enable_diagnostics(config.enable_diagnostics, instance.metadata())
            .build(&VulkanDevices::new(&instance, &surface))?;

        Ok(GraphicsContext::from_parts(runtime, instance, surface, device))
    }
}
