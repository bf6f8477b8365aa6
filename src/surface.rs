//! Window surface creation and capability queries.
use ash::{extensions::khr, prelude::VkResult, vk};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::{Instance, Runtime};

/// A presentable surface bound to one window. Destroyed on drop, which must
/// happen before the instance it was created from goes away.
pub struct Surface {
    loader: khr::Surface,
    handle: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface for `window`.
    pub fn new(
        runtime: &Runtime,
        instance: &Instance,
        window: &(impl HasRawDisplayHandle + HasRawWindowHandle),
    ) -> VkResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(
                runtime.entry(),
                instance.handle(),
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )?
        };
        let loader = khr::Surface::new(runtime.entry(), instance.handle());
        log::debug!("created surface {:?}", handle);

        Ok(Surface { loader, handle })
    }

    /// Raw surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// `VK_KHR_surface` function table.
    #[inline]
    pub fn loader(&self) -> &khr::Surface {
        &self.loader
    }

    /// Returns true if queue family `queue_family_index` of
    /// `physical_device` can present to this surface.
    pub fn supports_presentation(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> VkResult<bool> {
        unsafe {
            self.loader.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.handle,
            )
        }
    }

    /// Query capabilities, formats and present modes of this surface on
    /// `physical_device`.
    pub fn details(&self, physical_device: vk::PhysicalDevice) -> VkResult<SurfaceDetails> {
        unsafe {
            Ok(SurfaceDetails {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.handle)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.handle)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.handle)?,
            })
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("destroying surface {:?}", self.handle);
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

/// What a surface supports on a given physical device.
#[derive(Debug, Clone, Default)]
pub struct SurfaceDetails {
    /// Image count bounds, extents and transforms.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported color formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceDetails {
    /// Minimum number of swapchain images.
    #[inline]
    pub fn min_image_count(&self) -> u32 {
        self.capabilities.min_image_count
    }

    /// Maximum number of swapchain images, `None` if unbounded.
    #[inline]
    pub fn max_image_count(&self) -> Option<u32> {
        match self.capabilities.max_image_count {
            0 => None,
            max => Some(max),
        }
    }

    /// Current size of the surface. `u32::MAX` in both dimensions means the
    /// swapchain decides.
    #[inline]
    pub fn current_extent(&self) -> vk::Extent2D {
        self.capabilities.current_extent
    }

    /// Write everything to the log at info level.
    pub fn log(&self) {
        log::info!(
            "Surface images: min {}, max {}, current extent {}x{}",
            self.min_image_count(),
            self.max_image_count()
                .map_or_else(|| "unbounded".to_owned(), |max| max.to_string()),
            self.current_extent().width,
            self.current_extent().height
        );

        log::info!("Surface supports {} formats:", self.formats.len());
        for (i, format) in self.formats.iter().enumerate() {
            log::info!(
                "\tFormat {}: {:?}, {:?}",
                i,
                format.format,
                format.color_space
            );
        }

        log::info!("Surface supports {} present modes:", self.present_modes.len());
        for (i, mode) in self.present_modes.iter().enumerate() {
            log::info!("\tPresentMode {}: {:?}", i, mode);
        }
    }
}
