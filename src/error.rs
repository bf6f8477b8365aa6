//! Top-level startup errors.
use ash::vk;
use thiserror::Error;

use crate::{DeviceCreationError, InstanceCreationError};

/// Any failure that aborts application startup. None of these are retried.
#[derive(Debug, Error)]
pub enum Error {
    /// The windowing system or the Vulkan runtime could not be started.
    #[error("initialization failed: {0}")]
    Initialization(String),
    /// The window surface could not be created.
    #[error("failed to create surface: {0}")]
    SurfaceCreation(vk::Result),
    /// The Vulkan instance could not be created.
    #[error("failed to create vulkan instance: {0}")]
    InstanceCreation(#[from] InstanceCreationError),
    /// Physical device selection or logical device creation failed.
    #[error("failed to create logical device: {0}")]
    Device(#[from] DeviceCreationError),
}
