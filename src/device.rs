//! Physical device selection, queue family discovery and device creation.
use std::{
    ffi::{CStr, CString},
    fmt,
    os::raw::{c_char, c_float},
};

use ash::{extensions::khr, prelude::VkResult, vk};
use thiserror::Error;

use crate::{
    validation_layer_name, BootstrapSmallVec, Instance, InstanceMetadata, Surface, SurfaceDetails,
};

/// Classification of a physical device as reported by the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PhysicalDeviceKind {
    /// Doesn't match any other kind.
    Other,
    /// GPU embedded in or tightly coupled with the host.
    Integrated,
    /// Separate GPU connected via an interlink.
    Discrete,
    /// Virtual node in a virtualization environment.
    Virtual,
    /// Running on the host CPU.
    Host,
    /// A value this crate doesn't know about.
    Unknown,
}

impl From<vk::PhysicalDeviceType> for PhysicalDeviceKind {
    fn from(device_type: vk::PhysicalDeviceType) -> Self {
        match device_type {
            vk::PhysicalDeviceType::OTHER => PhysicalDeviceKind::Other,
            vk::PhysicalDeviceType::INTEGRATED_GPU => PhysicalDeviceKind::Integrated,
            vk::PhysicalDeviceType::DISCRETE_GPU => PhysicalDeviceKind::Discrete,
            vk::PhysicalDeviceType::VIRTUAL_GPU => PhysicalDeviceKind::Virtual,
            vk::PhysicalDeviceType::CPU => PhysicalDeviceKind::Host,
            _ => PhysicalDeviceKind::Unknown,
        }
    }
}

impl fmt::Display for PhysicalDeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhysicalDeviceKind::Other => "OTHER",
            PhysicalDeviceKind::Integrated => "INTEGRATED GPU",
            PhysicalDeviceKind::Discrete => "DISCRETE GPU",
            PhysicalDeviceKind::Virtual => "VIRTUAL GPU",
            PhysicalDeviceKind::Host => "CPU",
            PhysicalDeviceKind::Unknown => "UNKNOWN",
        })
    }
}

/// A physical device candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalDeviceInfo {
    /// Raw handle.
    pub handle: vk::PhysicalDevice,
    /// Device type.
    pub kind: PhysicalDeviceKind,
    /// Human readable name.
    pub name: String,
}

/// Read-only queries against physical devices, bound to the surface that
/// presentation support is checked for.
pub trait DeviceQuery {
    /// All physical devices, in the order the driver reports them.
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;

    /// Name and type of `physical_device`.
    fn describe(&self, physical_device: vk::PhysicalDevice) -> PhysicalDeviceInfo;

    /// Queue families of `physical_device`, in enumeration order.
    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;

    /// Whether queue family `queue_family_index` can present to the surface.
    fn supports_presentation(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> VkResult<bool>;

    /// Surface capabilities, formats and present modes. Diagnostics only.
    fn surface_details(&self, physical_device: vk::PhysicalDevice) -> VkResult<SurfaceDetails>;

    /// Names of the device extensions `physical_device` supports.
    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<CString>>;
}

/// Creates logical devices.
pub trait DeviceFactory: DeviceQuery {
    /// The created device.
    type Device: DeviceHandle;

    /// Create a logical device on `physical_device`.
    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> VkResult<Self::Device>;
}

/// A created logical device.
pub trait DeviceHandle {
    /// Queue `queue_index` of family `queue_family_index`. The family must
    /// have been requested at creation time.
    unsafe fn queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue;

    /// Destroy the device. Called exactly once.
    unsafe fn destroy(&mut self);
}

impl DeviceHandle for ash::Device {
    #[inline]
    unsafe fn queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        self.get_device_queue(queue_family_index, queue_index)
    }

    #[inline]
    unsafe fn destroy(&mut self) {
        self.destroy_device(None);
    }
}

/// [`DeviceFactory`] over a live [`Instance`] and [`Surface`].
pub struct VulkanDevices<'a> {
    instance: &'a ash::Instance,
    surface: &'a Surface,
}

impl<'a> VulkanDevices<'a> {
    /// Query devices of `instance`, checking presentation against `surface`.
    #[inline]
    pub fn new(instance: &'a Instance, surface: &'a Surface) -> Self {
        VulkanDevices {
            instance: instance.handle(),
            surface,
        }
    }
}

impl DeviceQuery for VulkanDevices<'_> {
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.enumerate_physical_devices() }
    }

    fn describe(&self, physical_device: vk::PhysicalDevice) -> PhysicalDeviceInfo {
        let properties = unsafe { self.instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        PhysicalDeviceInfo {
            handle: physical_device,
            kind: properties.device_type.into(),
            name,
        }
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    fn supports_presentation(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> VkResult<bool> {
        self.surface
            .supports_presentation(physical_device, queue_family_index)
    }

    fn surface_details(&self, physical_device: vk::PhysicalDevice) -> VkResult<SurfaceDetails> {
        self.surface.details(physical_device)
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        let properties = unsafe {
            self.instance
                .enumerate_device_extension_properties(physical_device)?
        };

        Ok(properties
            .iter()
            .map(|extension| unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) }.to_owned())
            .collect())
    }
}

impl DeviceFactory for VulkanDevices<'_> {
    type Device = ash::Device;

    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> VkResult<ash::Device> {
        self.instance
            .create_device(physical_device, create_info, None)
    }
}

/// Errors that can occur during device selection and creation.
#[derive(Debug, Error)]
pub enum DeviceCreationError {
    /// Enumerating physical devices or queue family support failed.
    #[error("enumeration failed: {0}")]
    Enumeration(vk::Result),
    /// No physical device survived selection.
    #[error("no physical device met the requirements")]
    NoSuitableDevice,
    /// The selected device has no queue family for graphics or for
    /// presentation.
    #[error("no graphics and present queue families on {device}: {indices:?}")]
    QueueFamiliesIncomplete {
        /// Name of the selected device.
        device: String,
        /// What was found.
        indices: QueueFamilyIndices,
    },
    /// One or more required device extensions are not present.
    #[error("device extensions ({0:?}) not present")]
    ExtensionsNotPresent(BootstrapSmallVec<CString>),
    /// Vulkan Error.
    #[error("vulkan error: {0}")]
    VulkanError(#[from] vk::Result),
}

/// Enumerates and describes all physical devices.
pub fn enumerate_physical_devices(
    query: &impl DeviceQuery,
) -> Result<Vec<PhysicalDeviceInfo>, DeviceCreationError> {
    let physical_devices = query
        .enumerate_physical_devices()
        .map_err(DeviceCreationError::Enumeration)?;

    Ok(physical_devices
        .into_iter()
        .map(|physical_device| query.describe(physical_device))
        .collect())
}

/// Picks the first discrete device in `devices`. Without one, the last
/// integrated device is picked. Returns `None` if there is neither.
pub fn select_physical_device(devices: &[PhysicalDeviceInfo]) -> Option<&PhysicalDeviceInfo> {
    log::info!("Choosing first discrete gpu found, falling back to integrated if none");

    let mut integrated = None;
    for (i, device) in devices.iter().enumerate() {
        log::info!("GPU {}: {} : {}", i, device.name, device.kind);

        match device.kind {
            PhysicalDeviceKind::Discrete => {
                log::info!("Discrete GPU selected: {}", device.name);
                return Some(device);
            }
            // Later integrated devices replace earlier ones.
            PhysicalDeviceKind::Integrated => integrated = Some(device),
            _ => (),
        }
    }

    match integrated {
        Some(device) => log::info!(
            "Failed to find discrete GPU, falling back to integrated: {}",
            device.name
        ),
        None => log::warn!("Found neither a discrete nor an integrated GPU"),
    }

    integrated
}

/// Queue family indices for graphics and presentation. One family may fill
/// both roles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueueFamilyIndices {
    /// First family with graphics support.
    pub graphics: Option<u32>,
    /// First family able to present to the surface.
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both roles are filled.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// `(graphics, present)` if both roles are filled.
    #[inline]
    pub fn complete(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }
}

/// Scans the queue families of `physical_device` in order. The first
/// graphics capable family and the first present capable family win, and the
/// scan stops as soon as both are known.
pub fn find_queue_families(
    query: &impl DeviceQuery,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices, DeviceCreationError> {
    let mut indices = QueueFamilyIndices::default();

    let families = query.queue_family_properties(physical_device);
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(i);
        }

        let present_support = query
            .supports_presentation(physical_device, i)
            .map_err(DeviceCreationError::Enumeration)?;
        if present_support {
            if indices.present.is_none() {
                indices.present = Some(i);
            }

            match query.surface_details(physical_device) {
                Ok(details) => details.log(),
                Err(err) => log::warn!("failed to query surface details: {}", err),
            }
        }

        if indices.is_complete() {
            break;
        }
    }

    log::debug!("queue families: {:?}", indices);
    Ok(indices)
}

/// Queues requested from one queue family at device creation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSetup {
    /// Index of the queue family in the queue family array.
    pub queue_family_index: u32,
    /// Specifies the amount of queues and the respective priority for each.
    pub queue_priorities: BootstrapSmallVec<c_float>,
}

impl QueueSetup {
    /// `queue_count` queues from `queue_family_index`, all at priority 1.0.
    #[inline]
    pub fn simple(queue_family_index: u32, queue_count: usize) -> QueueSetup {
        QueueSetup {
            queue_family_index,
            queue_priorities: (0..queue_count).map(|_| 1.0).collect(),
        }
    }

    #[inline]
    fn as_vulkan(&self) -> vk::DeviceQueueCreateInfoBuilder<'_> {
        vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(self.queue_family_index)
            .queue_priorities(&self.queue_priorities)
    }
}

/// One queue from the graphics family, plus one from the present family if
/// it is a different family. Vulkan rejects two entries for the same family.
pub fn plan_queue_setups(graphics: u32, present: u32) -> BootstrapSmallVec<QueueSetup> {
    let mut queue_setups = BootstrapSmallVec::new();
    queue_setups.push(QueueSetup::simple(graphics, 1));
    if present != graphics {
        queue_setups.push(QueueSetup::simple(present, 1));
    }

    queue_setups
}

/// A logical device with its graphics and present queues. The device is
/// destroyed on drop.
pub struct LogicalDevice<D: DeviceHandle> {
    handle: D,
    physical_device: PhysicalDeviceInfo,
    queue_family_indices: QueueFamilyIndices,
    queue_setups: BootstrapSmallVec<QueueSetup>,
    enabled_layers: BootstrapSmallVec<CString>,
    enabled_extensions: BootstrapSmallVec<CString>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
}

impl<D: DeviceHandle> LogicalDevice<D> {
    /// The device itself.
    #[inline]
    pub fn handle(&self) -> &D {
        &self.handle
    }

    /// The physical device this device was created on.
    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// The queue families in use.
    #[inline]
    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.queue_family_indices
    }

    /// The queue setups requested at creation.
    #[inline]
    pub fn queue_setups(&self) -> &[QueueSetup] {
        &self.queue_setups
    }

    /// Layers enabled on the device.
    #[inline]
    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    /// Extensions enabled on the device.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Queue for graphics submission.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Queue for presentation. Same as [`Self::graphics_queue`] when one
    /// family fills both roles.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }
}

impl<D: DeviceHandle> Drop for LogicalDevice<D> {
    fn drop(&mut self) {
        log::debug!("destroying logical device on {}", self.physical_device.name);
        // SAFETY: the device owns no child objects, and the queues handed out
        // are plain handles that die with it.
        unsafe { self.handle.destroy() };
    }
}

/// Selects a physical device and creates a [`LogicalDevice`] on it.
pub struct DeviceBuilder {
    extensions: BootstrapSmallVec<&'static CStr>,
    enable_diagnostics: bool,
}

impl DeviceBuilder {
    /// A builder requiring only the swapchain extension.
    #[inline]
    pub fn new() -> Self {
        let mut extensions = BootstrapSmallVec::new();
        extensions.push(khr::Swapchain::name());

        DeviceBuilder {
            extensions,
            enable_diagnostics: false,
        }
    }

    /// Require a device which supports `extension`.
    /// The extension will be enabled.
    #[inline]
    pub fn require_extension(mut self, extension: &'static CStr) -> Self {
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
        self
    }

    /// Enable the Khronos validation layer on the device, as long as the
    /// instance it is created from enabled it too.
    #[inline]
    pub fn enable_diagnostics(
        mut self,
        enable_diagnostics: bool,
        instance: &InstanceMetadata,
    ) -> Self {
        self.enable_diagnostics =
            enable_diagnostics && instance.is_layer_enabled(validation_layer_name());
        self
    }

    /// Enumerate physical devices, select one and create the device on it.
    pub fn build<F: DeviceFactory>(
        self,
        factory: &F,
    ) -> Result<LogicalDevice<F::Device>, DeviceCreationError> {
        let devices = enumerate_physical_devices(factory)?;
        let selected = select_physical_device(&devices).cloned();
        self.build_for(factory, selected)
    }

    /// Create the device on an already selected physical device. `None`
    /// fails with [`DeviceCreationError::NoSuitableDevice`].
    pub fn build_for<F: DeviceFactory>(
        self,
        factory: &F,
        physical_device: Option<PhysicalDeviceInfo>,
    ) -> Result<LogicalDevice<F::Device>, DeviceCreationError> {
        let physical_device = physical_device.ok_or(DeviceCreationError::NoSuitableDevice)?;

        let queue_family_indices = find_queue_families(factory, physical_device.handle)?;
        let (graphics, present) = queue_family_indices.complete().ok_or_else(|| {
            DeviceCreationError::QueueFamiliesIncomplete {
                device: physical_device.name.clone(),
                indices: queue_family_indices,
            }
        })?;

        let available_extensions = factory.device_extensions(physical_device.handle)?;
        let extensions_not_present: BootstrapSmallVec<CString> = self
            .extensions
            .iter()
            .filter(|&&wanted| {
                !available_extensions
                    .iter()
                    .any(|available| available.as_c_str() == wanted)
            })
            .map(|&missing| missing.to_owned())
            .collect();
        if !extensions_not_present.is_empty() {
            return Err(DeviceCreationError::ExtensionsNotPresent(
                extensions_not_present,
            ));
        }

        let mut enabled_layers = BootstrapSmallVec::<&CStr>::new();
        if self.enable_diagnostics {
            enabled_layers.push(validation_layer_name());
        }

        let queue_setups = plan_queue_setups(graphics, present);
        let queue_create_infos: BootstrapSmallVec<_> = queue_setups
            .iter()
            .map(QueueSetup::as_vulkan)
            .map(|x| x.build())
            .collect();
        let layer_names: BootstrapSmallVec<*const c_char> =
            enabled_layers.iter().map(|name| name.as_ptr()).collect();
        let extension_names: BootstrapSmallVec<*const c_char> =
            self.extensions.iter().map(|name| name.as_ptr()).collect();
        let features = vk::PhysicalDeviceFeatures::default();

        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let handle = unsafe { factory.create_device(physical_device.handle, &device_info)? };
        drop(queue_create_infos);
        log::info!("created logical device on {}", physical_device.name);

        let graphics_queue = unsafe { handle.queue(graphics, 0) };
        let present_queue = if present == graphics {
            graphics_queue
        } else {
            unsafe { handle.queue(present, 0) }
        };

        Ok(LogicalDevice {
            handle,
            physical_device,
            queue_family_indices,
            queue_setups,
            enabled_layers: enabled_layers.iter().map(|&name| name.to_owned()).collect(),
            enabled_extensions: self.extensions.iter().map(|&name| name.to_owned()).collect(),
            graphics_queue,
            present_queue,
        })
    }
}

impl Default for DeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
