//! Runtime loading and instance creation utils.
use std::{
    borrow::Cow,
    ffi::{c_void, CStr, CString, NulError},
    fmt,
    os::raw::c_char,
};

use ash::{extensions::ext::DebugUtils, vk, Entry, LoadingError};
use cstr::cstr;
use raw_window_handle::HasRawDisplayHandle;
use thiserror::Error;

use crate::BootstrapSmallVec;

/// Name of the Khronos validation layer.
#[inline]
pub fn validation_layer_name() -> &'static CStr {
    cstr!("VK_LAYER_KHRONOS_validation")
}

/// The dynamically loaded Vulkan runtime. Must be created before any other
/// Vulkan object and is unloaded when dropped, so it has to outlive all of
/// them.
pub struct Runtime {
    entry: Entry,
}

impl Runtime {
    /// Load the system Vulkan loader.
    pub fn load() -> Result<Self, LoadingError> {
        let entry = unsafe { Entry::load()? };
        log::debug!("loaded vulkan runtime");
        Ok(Runtime { entry })
    }

    /// Loader entry points.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        log::debug!("unloading vulkan runtime");
    }
}

/// Require, request or disable validation layers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValidationLayers {
    /// Instance creation will fail if there are no validation layers installed.
    Require,
    /// If there are validation layers installed, enable them.
    Request,
    /// Don't enable validation layers.
    Disable,
}

impl ValidationLayers {
    /// Request the layers when diagnostics are on, leave them out otherwise.
    #[inline]
    pub fn from_diagnostics(enable_diagnostics: bool) -> Self {
        if enable_diagnostics {
            ValidationLayers::Request
        } else {
            ValidationLayers::Disable
        }
    }
}

fn severity_level(message_severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    }
}

/// Debug messenger callback forwarding validation messages to [`log`].
pub unsafe extern "system" fn log_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        Cow::Borrowed("")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    log::log!(
        target: "vulkan",
        severity_level(message_severity),
        "{:?} | {}",
        message_type,
        message
    );

    vk::FALSE
}

/// Metadata for after instance creation.
#[derive(Clone)]
pub struct InstanceMetadata {
    api_version: u32,
    enabled_layers: BootstrapSmallVec<CString>,
    enabled_extensions: BootstrapSmallVec<CString>,
}

impl InstanceMetadata {
    /// Retrieve the used instance API major version.
    #[inline]
    pub fn api_version_major(&self) -> u32 {
        vk::api_version_major(self.api_version)
    }

    /// Retrieve the used instance API minor version.
    #[inline]
    pub fn api_version_minor(&self) -> u32 {
        vk::api_version_minor(self.api_version)
    }

    /// List of all enabled layers in the instance.
    #[inline]
    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    /// Returns true if `layer` is enabled.
    #[inline]
    pub fn is_layer_enabled(&self, layer: &CStr) -> bool {
        self.enabled_layers.iter().any(|e| e.as_c_str() == layer)
    }

    /// List of all enabled extensions in the instance.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Returns true if `extension` is enabled.
    #[inline]
    pub fn is_extension_enabled(&self, extension: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|e| e.as_c_str() == extension)
    }
}

#[cfg(test)]
impl InstanceMetadata {
    pub(crate) fn with_layers(layers: &[&CStr]) -> Self {
        InstanceMetadata {
            api_version: vk::API_VERSION_1_3,
            enabled_layers: layers.iter().map(|&layer| layer.to_owned()).collect(),
            enabled_extensions: BootstrapSmallVec::new(),
        }
    }
}

impl fmt::Debug for InstanceMetadata {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("InstanceMetadata")
            .field(
                "api_version",
                &format_args!("{}.{}", self.api_version_major(), self.api_version_minor()),
            )
            .field("enabled_layers", &self.enabled_layers)
            .field("enabled_extensions", &self.enabled_extensions)
            .finish()
    }
}

/// Errors that can occur during instance creation.
#[derive(Debug, Error)]
pub enum InstanceCreationError {
    /// Vulkan Error.
    #[error("vulkan error: {0}")]
    VulkanError(#[from] vk::Result),
    /// One or more layers are not present.
    #[error("layers ({0:?}) not present")]
    LayersNotPresent(BootstrapSmallVec<CString>),
    /// One or more extensions are not present.
    #[error("extensions ({0:?}) not present")]
    ExtensionsNotPresent(BootstrapSmallVec<CString>),
    /// The window system did not report which surface extensions it needs.
    #[error("surface extensions unavailable: {0}")]
    SurfaceExtensionsUnavailable(vk::Result),
    /// An application or engine name contained a nul byte.
    #[error("invalid name: {0}")]
    InvalidName(#[from] NulError),
}

/// An owned Vulkan instance, together with its debug messenger if one was
/// created. Both are destroyed on drop.
pub struct Instance {
    handle: ash::Instance,
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    metadata: InstanceMetadata,
}

impl Instance {
    /// The instance function table.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.handle
    }

    /// What is actually enabled in the instance.
    #[inline]
    pub fn metadata(&self) -> &InstanceMetadata {
        &self.metadata
    }

    /// Returns true if validation messages are being forwarded to the log.
    #[inline]
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        log::debug!("destroying vulkan instance");
        // SAFETY: every object created from this instance is owned by a
        // wrapper that is dropped before it.
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.handle.destroy_instance(None);
        }
    }
}

/// Allows to easily create an [`Instance`].
pub struct InstanceBuilder {
    app_name: Option<CString>,
    app_version: Option<u32>,
    engine_name: Option<CString>,
    engine_version: Option<u32>,
    api_version: u32,
    layers: BootstrapSmallVec<(&'static CStr, bool)>,
    extensions: BootstrapSmallVec<(&'static CStr, bool)>,
    debug_messenger: bool,
}

impl InstanceBuilder {
    /// Create a new instance builder with opinionated defaults.
    #[inline]
    pub fn new() -> Self {
        InstanceBuilder {
            app_name: None,
            app_version: None,
            engine_name: None,
            engine_version: None,
            api_version: vk::API_VERSION_1_3,
            layers: BootstrapSmallVec::new(),
            extensions: BootstrapSmallVec::new(),
            debug_messenger: false,
        }
    }

    /// Application name to advertise.
    #[inline]
    pub fn app_name(mut self, app_name: &str) -> Result<Self, NulError> {
        self.app_name = Some(CString::new(app_name)?);
        Ok(self)
    }

    /// Application version to advertise.
    #[inline]
    pub fn app_version(mut self, major: u32, minor: u32) -> Self {
        self.app_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Engine name to advertise.
    #[inline]
    pub fn engine_name(mut self, engine_name: &str) -> Result<Self, NulError> {
        self.engine_name = Some(CString::new(engine_name)?);
        Ok(self)
    }

    /// Engine version to advertise.
    #[inline]
    pub fn engine_version(mut self, major: u32, minor: u32) -> Self {
        self.engine_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Instance API version to request. If the loader doesn't support it,
    /// fall back to the highest supported version.
    #[inline]
    pub fn api_version(mut self, major: u32, minor: u32) -> Self {
        self.api_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    /// Try to enable this extension, ignore if it is not supported.
    #[inline]
    pub fn request_extension(mut self, extension: &'static CStr) -> Self {
        self.extensions.push((extension, false));
        self
    }

    /// Enable this extension, fail if it's not supported.
    #[inline]
    pub fn require_extension(mut self, extension: &'static CStr) -> Self {
        self.extensions.push((extension, true));
        self
    }

    /// Adds a requirement on all Vulkan extensions necessary to create a
    /// surface for `display_handle`.
    pub fn require_surface_extensions(
        mut self,
        display_handle: &impl HasRawDisplayHandle,
    ) -> Result<Self, InstanceCreationError> {
        let required_extensions =
            ash_window::enumerate_required_extensions(display_handle.raw_display_handle())
                .map_err(InstanceCreationError::SurfaceExtensionsUnavailable)?;
        self.extensions.extend(
            required_extensions
                .iter()
                // SAFETY: ash-window hands out pointers to static, nul
                // terminated extension names.
                .map(|&name| (unsafe { CStr::from_ptr(name) }, true)),
        );
        Ok(self)
    }

    /// Add Khronos validation layers.
    #[inline]
    pub fn validation_layers(mut self, validation_layers: ValidationLayers) -> Self {
        match validation_layers {
            ValidationLayers::Require | ValidationLayers::Request => {
                self.layers.push((
                    validation_layer_name(),
                    matches!(validation_layers, ValidationLayers::Require),
                ));
            }
            ValidationLayers::Disable => (),
        }

        self
    }

    /// Try to create a debug messenger that forwards validation messages to
    /// the log through [`log_debug_callback`].
    #[inline]
    pub fn request_debug_messenger(mut self, enable: bool) -> Self {
        if enable && !self.debug_messenger {
            self.extensions.push((DebugUtils::name(), false));
        }

        self.debug_messenger |= enable;
        self
    }

    /// Creates the [`Instance`], and a debug messenger if it was requested
    /// and the debug utils extension is available.
    pub fn build(self, runtime: &Runtime) -> Result<Instance, InstanceCreationError> {
        let entry = runtime.entry();

        let loader_version = entry
            .try_enumerate_instance_version()?
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = self.api_version.min(vk::make_api_version(
            0,
            vk::api_version_major(loader_version),
            vk::api_version_minor(loader_version),
            0,
        ));

        let mut app_info = vk::ApplicationInfo::builder().api_version(api_version);
        if let Some(app_name) = &self.app_name {
            app_info = app_info.application_name(app_name);
        }
        if let Some(app_version) = self.app_version {
            app_info = app_info.application_version(app_version);
        }
        if let Some(engine_name) = &self.engine_name {
            app_info = app_info.engine_name(engine_name);
        }
        if let Some(engine_version) = self.engine_version {
            app_info = app_info.engine_version(engine_version);
        }

        let layer_properties = entry.enumerate_instance_layer_properties()?;
        let (enabled_layers, layers_not_present) = negotiate(&self.layers, |name| {
            layer_properties
                .iter()
                .any(|supported| unsafe { CStr::from_ptr(supported.layer_name.as_ptr()) } == name)
        });

        if !layers_not_present.is_empty() {
            return Err(InstanceCreationError::LayersNotPresent(layers_not_present));
        }

        for &(layer, _) in self.layers.iter() {
            if !enabled_layers.contains(&layer) {
                log::warn!("layer {:?} not present, continuing without it", layer);
            }
        }

        let mut extension_properties = entry.enumerate_instance_extension_properties(None)?;
        for &layer_name in &enabled_layers {
            extension_properties
                .extend(entry.enumerate_instance_extension_properties(Some(layer_name))?);
        }

        let enabled_extensions = self.negotiate_extensions(&extension_properties)?;

        log::info!("Using extensions:");
        for (i, extension) in enabled_extensions.iter().enumerate() {
            log::info!("\tExtension {}: {}", i, extension.to_string_lossy());
        }

        let create_debug_messenger =
            self.debug_messenger && enabled_extensions.contains(&DebugUtils::name());

        let layer_names: BootstrapSmallVec<*const c_char> =
            enabled_layers.iter().map(|name| name.as_ptr()).collect();
        let extension_names: BootstrapSmallVec<*const c_char> =
            enabled_extensions.iter().map(|name| name.as_ptr()).collect();

        let mut messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(log_debug_callback))
            .build();

        let mut instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);
        // Also catches messages emitted by instance creation itself.
        if create_debug_messenger {
            instance_info = instance_info.push_next(&mut messenger_info);
        }

        let handle = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_messenger = if create_debug_messenger {
            let debug_utils = DebugUtils::new(entry, &handle);
            match unsafe { debug_utils.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(err) => {
                    unsafe { handle.destroy_instance(None) };
                    return Err(err.into());
                }
            }
        } else {
            None
        };

        let metadata = InstanceMetadata {
            api_version,
            enabled_layers: enabled_layers.iter().map(|&name| name.to_owned()).collect(),
            enabled_extensions: enabled_extensions
                .iter()
                .map(|&name| name.to_owned())
                .collect(),
        };
        log::debug!("created vulkan instance: {:?}", metadata);

        Ok(Instance {
            handle,
            debug_messenger,
            metadata,
        })
    }

    /// Picks the wanted extensions out of `available`. Fails if a required
    /// one is missing.
    fn negotiate_extensions(
        &self,
        available: &[vk::ExtensionProperties],
    ) -> Result<BootstrapSmallVec<&'static CStr>, InstanceCreationError> {
        log::info!("Available extensions:");
        for (i, extension) in available.iter().enumerate() {
            let name = unsafe { CStr::from_ptr(extension.extension_name.as_ptr()) };
            log::info!("\tExtension {}: {}", i, name.to_string_lossy());
        }

        let (enabled, not_present) = negotiate(&self.extensions, |name| {
            available.iter().any(|supported| {
                let supported = unsafe { CStr::from_ptr(supported.extension_name.as_ptr()) };
                supported == name
            })
        });

        if !not_present.is_empty() {
            return Err(InstanceCreationError::ExtensionsNotPresent(not_present));
        }

        Ok(enabled)
    }
}

impl Default for InstanceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `wanted` into the names to enable and the required names that are
/// missing. Unsupported optional names are dropped; duplicates are enabled
/// once.
fn negotiate(
    wanted: &[(&'static CStr, bool)],
    mut is_present: impl FnMut(&CStr) -> bool,
) -> (BootstrapSmallVec<&'static CStr>, BootstrapSmallVec<CString>) {
    let mut enabled = BootstrapSmallVec::new();
    let mut not_present = BootstrapSmallVec::new();
    for &(name, required) in wanted {
        match (required, is_present(name)) {
            (_, true) => {
                if !enabled.contains(&name) {
                    enabled.push(name);
                }
            }
            (true, false) => not_present.push(name.to_owned()),
            (false, false) => (),
        }
    }

    (enabled, not_present)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_splits_required_and_requested() {
        let present = [cstr!("VK_KHR_surface"), cstr!("VK_EXT_debug_utils")];
        let wanted = [
            (cstr!("VK_KHR_surface"), true),
            (cstr!("VK_KHR_xcb_surface"), true),
            (cstr!("VK_EXT_debug_utils"), false),
            (cstr!("VK_EXT_validation_features"), false),
            (cstr!("VK_KHR_surface"), false),
        ];

        let (enabled, missing) = negotiate(&wanted, |name| present.iter().any(|&p| p == name));
        assert_eq!(
            enabled.as_slice(),
            &[cstr!("VK_KHR_surface"), cstr!("VK_EXT_debug_utils")]
        );
        assert_eq!(missing.as_slice(), &[CString::from(cstr!("VK_KHR_xcb_surface"))]);
    }

    #[test]
    fn validation_layers_follow_diagnostics() {
        let builder = InstanceBuilder::new()
            .validation_layers(ValidationLayers::from_diagnostics(true))
            .request_debug_messenger(true);
        assert_eq!(
            builder.layers.as_slice(),
            &[(validation_layer_name(), false)]
        );
        assert_eq!(builder.extensions.as_slice(), &[(DebugUtils::name(), false)]);

        let builder = InstanceBuilder::new()
            .validation_layers(ValidationLayers::from_diagnostics(false))
            .request_debug_messenger(false);
        assert!(builder.layers.is_empty());
        assert!(builder.extensions.is_empty());
    }

    #[test]
    fn required_validation_layer_is_flagged() {
        let builder = InstanceBuilder::new().validation_layers(ValidationLayers::Require);
        assert_eq!(builder.layers.as_slice(), &[(validation_layer_name(), true)]);
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut properties = vk::ExtensionProperties::default();
        for (dst, &src) in properties
            .extension_name
            .iter_mut()
            .zip(name.to_bytes_with_nul())
        {
            *dst = src as c_char;
        }
        properties
    }

    #[test]
    fn missing_required_extension() {
        let available = [extension(cstr!("VK_KHR_surface"))];
        let builder = InstanceBuilder::new()
            .require_extension(cstr!("VK_KHR_surface"))
            .require_extension(cstr!("VK_KHR_xcb_surface"));

        match builder.negotiate_extensions(&available) {
            Err(InstanceCreationError::ExtensionsNotPresent(missing)) => {
                assert_eq!(missing.as_slice(), &[CString::from(cstr!("VK_KHR_xcb_surface"))]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn requested_extensions_are_optional() {
        let available = [
            extension(cstr!("VK_KHR_surface")),
            extension(cstr!("VK_EXT_debug_utils")),
        ];
        let builder = InstanceBuilder::new()
            .require_extension(cstr!("VK_KHR_surface"))
            .request_extension(cstr!("VK_EXT_validation_features"))
            .request_extension(cstr!("VK_EXT_debug_utils"))
            .request_extension(cstr!("VK_KHR_surface"));

        let enabled = builder.negotiate_extensions(&available).unwrap();
        assert_eq!(
            enabled.as_slice(),
            &[cstr!("VK_KHR_surface"), cstr!("VK_EXT_debug_utils")]
        );
    }

    #[test]
    fn severity_maps_to_log_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

        assert_eq!(severity_level(Severity::ERROR), log::Level::Error);
        assert_eq!(severity_level(Severity::WARNING), log::Level::Warn);
        assert_eq!(severity_level(Severity::INFO), log::Level::Info);
        assert_eq!(severity_level(Severity::VERBOSE), log::Level::Trace);
    }

    #[test]
    fn metadata_queries() {
        let metadata = InstanceMetadata {
            api_version: vk::API_VERSION_1_3,
            enabled_layers: [validation_layer_name().to_owned()].into_iter().collect(),
            enabled_extensions: [DebugUtils::name().to_owned()].into_iter().collect(),
        };

        assert_eq!(metadata.api_version_major(), 1);
        assert_eq!(metadata.api_version_minor(), 3);
        assert!(metadata.is_layer_enabled(validation_layer_name()));
        assert!(metadata.is_extension_enabled(DebugUtils::name()));
        assert!(!metadata.is_extension_enabled(cstr!("VK_KHR_surface")));
    }

    #[test]
    #[ignore = "requires a Vulkan loader"]
    fn basic() {
        let runtime = Runtime::load().unwrap();
        let instance = InstanceBuilder::new().build(&runtime).unwrap();
        assert!(!instance.has_debug_messenger());
    }

    #[test]
    #[ignore = "requires a Vulkan loader"]
    fn validation_and_messenger() {
        let runtime = Runtime::load().unwrap();
        let instance = InstanceBuilder::new()
            .validation_layers(ValidationLayers::Request)
            .request_debug_messenger(true)
            .build(&runtime)
            .unwrap();
        assert_eq!(
            instance.has_debug_messenger(),
            instance.metadata().is_extension_enabled(DebugUtils::name())
        );
    }
}
