//! Vulkan side of a named shared-surface bridge.
//!
//! A [`Sender`] publishes a Vulkan image through a shareable texture of the
//! host API (Direct3D 11 on Windows); a [`Receiver`] in any process imports
//! that texture's memory and copies it into its own image. Discovery and
//! access control come from [`surface_share`].
//!
//! All GPU work is recorded into command buffers the caller owns. Nothing
//! here submits, waits on fences or spawns threads.

pub mod blit;
pub mod device;
pub mod error;
pub mod format;
pub mod host;
pub mod import;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use blit::{CrossApiBlitter, ImageRegion, TransferKind, blit_supported, plan_transfer};
pub use device::{AshDevice, REQUIRED_DEVICE_EXTENSIONS, VulkanDevice, find_memory_type_index};
pub use error::BridgeError;
pub use format::{to_host_format, to_vulkan_format};
#[cfg(target_os = "windows")]
pub use host::d3d11::D3D11Host;
pub use host::{HostDevice, SharedSurfaceManager};
pub use import::{AllocationStrategy, ExternalImageImporter, LinkedImage, choose_allocation_strategy};
pub use session::{Receiver, Sender, Session, SessionState, default_sender_name};
pub use surface_share;
