//! Scripted stand-ins for the device seams, for unit tests.
use std::{
    cell::RefCell,
    ffi::{CStr, CString},
    os::raw::c_char,
    rc::Rc,
    slice,
};

use ash::{
    extensions::khr,
    prelude::VkResult,
    vk::{self, Handle},
};

use crate::{
    Backend, DeviceBuilder, DeviceFactory, DeviceHandle, DeviceQuery, GraphicsContext,
    PhysicalDeviceInfo, PhysicalDeviceKind, SurfaceDetails,
};

/// Shared, ordered record of calls and drops.
pub type CallLog = Rc<RefCell<Vec<String>>>;

#[derive(Debug, Copy, Clone)]
pub struct StubFamily {
    pub flags: vk::QueueFlags,
    pub present: bool,
}

impl StubFamily {
    pub fn both() -> Self {
        StubFamily {
            flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            present: true,
        }
    }

    pub fn graphics() -> Self {
        StubFamily {
            flags: vk::QueueFlags::GRAPHICS,
            present: false,
        }
    }

    pub fn present() -> Self {
        StubFamily {
            flags: vk::QueueFlags::TRANSFER,
            present: true,
        }
    }

    pub fn compute() -> Self {
        StubFamily {
            flags: vk::QueueFlags::COMPUTE,
            present: false,
        }
    }
}

/// What a `create_device` call asked for.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: Vec<u32>,
    pub queue_priorities: Vec<Vec<f32>>,
    pub layers: Vec<CString>,
    pub extensions: Vec<CString>,
    pub default_features: bool,
}

/// A fake driver exposing `devices`, each with the same queue families and
/// extensions.
pub struct StubGpu {
    devices: Vec<(PhysicalDeviceKind, String)>,
    families: Vec<StubFamily>,
    extensions: Vec<CString>,
    pub enumeration_error: Option<vk::Result>,
    pub creation_error: Option<vk::Result>,
    pub log: CallLog,
    pub present_queries: RefCell<Vec<u32>>,
    pub create_requests: RefCell<Vec<CreateRequest>>,
}

impl StubGpu {
    /// One graphics+present family and the swapchain extension on every
    /// device.
    pub fn new(devices: &[(PhysicalDeviceKind, &str)]) -> Self {
        StubGpu {
            devices: devices
                .iter()
                .map(|&(kind, name)| (kind, name.to_owned()))
                .collect(),
            families: vec![StubFamily::both()],
            extensions: vec![khr::Swapchain::name().to_owned()],
            enumeration_error: None,
            creation_error: None,
            log: CallLog::default(),
            present_queries: RefCell::default(),
            create_requests: RefCell::default(),
        }
    }

    pub fn with_families(mut self, families: &[StubFamily]) -> Self {
        self.families = families.to_vec();
        self
    }

    pub fn with_extensions(mut self, extensions: &[&CStr]) -> Self {
        self.extensions = extensions.iter().map(|&name| name.to_owned()).collect();
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn physical_device(&self, index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(index as u64 + 1)
    }

    pub fn queue_handle(queue_family_index: u32, queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(0x1000 + u64::from(queue_family_index) * 0x10 + u64::from(queue_index))
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn index_of(&self, physical_device: vk::PhysicalDevice) -> usize {
        physical_device.as_raw() as usize - 1
    }
}

unsafe fn c_strings(names: *const *const c_char, count: u32) -> Vec<CString> {
    if count == 0 {
        return Vec::new();
    }

    slice::from_raw_parts(names, count as usize)
        .iter()
        .map(|&name| CStr::from_ptr(name).to_owned())
        .collect()
}

impl DeviceQuery for StubGpu {
    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        if let Some(err) = self.enumeration_error {
            return Err(err);
        }

        Ok((0..self.devices.len())
            .map(|i| self.physical_device(i))
            .collect())
    }

    fn describe(&self, physical_device: vk::PhysicalDevice) -> PhysicalDeviceInfo {
        let (kind, name) = &self.devices[self.index_of(physical_device)];
        PhysicalDeviceInfo {
            handle: physical_device,
            kind: *kind,
            name: name.clone(),
        }
    }

    fn queue_family_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.families
            .iter()
            .map(|family| vk::QueueFamilyProperties {
                queue_flags: family.flags,
                queue_count: 1,
                ..Default::default()
            })
            .collect()
    }

    fn supports_presentation(
        &self,
        _physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> VkResult<bool> {
        self.present_queries.borrow_mut().push(queue_family_index);
        Ok(self.families[queue_family_index as usize].present)
    }

    fn surface_details(&self, _physical_device: vk::PhysicalDevice) -> VkResult<SurfaceDetails> {
        Ok(SurfaceDetails {
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
            ..Default::default()
        })
    }

    fn device_extensions(&self, _physical_device: vk::PhysicalDevice) -> VkResult<Vec<CString>> {
        Ok(self.extensions.clone())
    }
}

impl DeviceFactory for StubGpu {
    type Device = StubDevice;

    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> VkResult<StubDevice> {
        let queue_infos = if create_info.queue_create_info_count == 0 {
            &[][..]
        } else {
            slice::from_raw_parts(
                create_info.p_queue_create_infos,
                create_info.queue_create_info_count as usize,
            )
        };

        self.create_requests.borrow_mut().push(CreateRequest {
            physical_device,
            queue_families: queue_infos
                .iter()
                .map(|info| info.queue_family_index)
                .collect(),
            queue_priorities: queue_infos
                .iter()
                .map(|info| {
                    slice::from_raw_parts(info.p_queue_priorities, info.queue_count as usize)
                        .to_vec()
                })
                .collect(),
            layers: c_strings(
                create_info.pp_enabled_layer_names,
                create_info.enabled_layer_count,
            ),
            extensions: c_strings(
                create_info.pp_enabled_extension_names,
                create_info.enabled_extension_count,
            ),
            default_features: !create_info.p_enabled_features.is_null() && {
                let features = &*create_info.p_enabled_features;
                features.robust_buffer_access == vk::FALSE
                    && features.geometry_shader == vk::FALSE
                    && features.tessellation_shader == vk::FALSE
                    && features.sampler_anisotropy == vk::FALSE
            },
        });
        self.log.borrow_mut().push("create device".to_owned());

        match self.creation_error {
            Some(err) => Err(err),
            None => Ok(StubDevice {
                log: Rc::clone(&self.log),
            }),
        }
    }
}

/// Device handed out by [`StubGpu`]. Records queue lookups and destruction.
pub struct StubDevice {
    log: CallLog,
}

impl DeviceHandle for StubDevice {
    unsafe fn queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        self.log
            .borrow_mut()
            .push(format!("queue {}:{}", queue_family_index, queue_index));
        StubGpu::queue_handle(queue_family_index, queue_index)
    }

    unsafe fn destroy(&mut self) {
        self.log.borrow_mut().push("destroy device".to_owned());
    }
}

/// Pushes `drop <name>` to the log when dropped.
pub struct Tracked {
    name: &'static str,
    log: CallLog,
}

impl Tracked {
    pub fn new(name: &'static str, log: &CallLog) -> Self {
        Tracked {
            name,
            log: Rc::clone(log),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.log.borrow_mut().push(format!("drop {}", self.name));
    }
}

/// Backend whose parts only record their own teardown.
pub enum StubBackend {}

impl Backend for StubBackend {
    type Runtime = Tracked;
    type Instance = Tracked;
    type Surface = Tracked;
    type Device = StubDevice;
}

/// A context on a single discrete stub device, logging into `log`.
pub fn stub_context(log: &CallLog) -> GraphicsContext<StubBackend> {
    let runtime = Tracked::new("runtime", log);
    let instance = Tracked::new("instance", log);
    let surface = Tracked::new("surface", log);
    let gpu = StubGpu::new(&[(PhysicalDeviceKind::Discrete, "dgpu")]).with_log(log.clone());
    let device = DeviceBuilder::new().build(&gpu).unwrap();

    GraphicsContext::from_parts(runtime, instance, surface, device)
}
