use ash::vk;
use surface_share::{RegistrationError, SyncError};
use thiserror::Error;

/// Failures of the bridge. Session entry points turn these into a logged
/// `false`; nothing here is fatal to the render loop.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("shared texture allocation failed: {0}")]
    Allocation(String),
    #[error("external memory capability missing: {0}")]
    Capability(String),
    #[error("no device-local memory type in filter {type_bits:#x}")]
    NoSuitableMemoryType { type_bits: u32 },
    #[error("failed to create linked image: {0}")]
    ImageCreation(vk::Result),
    #[error("failed to import shared memory: {0}")]
    Import(vk::Result),
    #[error("failed to bind imported memory: {0}")]
    Bind(vk::Result),
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("surface `{0}` is in use by another process")]
    Contention(String),
    #[error("missing device extensions: {}", .0.join(", "))]
    MissingExtensions(Vec<String>),
    #[error("invalid surface: {0}")]
    InvalidSurface(String),
    #[error("failed to load Vulkan: {0}")]
    Loader(String),
}
