//! Cross-process plumbing for named shared GPU surfaces.
//!
//! This crate carries no graphics API types. It defines the values exchanged
//! between senders and receivers ([`SurfaceDescriptor`], [`ShareHandle`],
//! [`HostFormat`]), the directory that lets them find each other
//! ([`SurfaceRegistry`]), and the per-surface access mutex and frame counter
//! ([`SynchronizationGuard`]).

pub mod config;
pub mod registry;
pub mod sync;
pub mod types;

pub use config::BridgeConfig;
pub use registry::{MemoryStore, RegistrationError, RegistryStore, SurfaceRegistry};
pub use sync::local::LocalSync;
#[cfg(target_os = "windows")]
pub use sync::win32::Win32Sync;
pub use sync::{NamedCounter, NamedLock, SyncBackend, SyncError, SynchronizationGuard};
pub use types::{
    HostFormat, MAX_SURFACE_NAME_LEN, ShareHandle, SurfaceDescriptor, validate_surface_name,
};

/// Guard type produced by a given backend.
pub type GuardFor<B> =
    SynchronizationGuard<<B as SyncBackend>::Lock, <B as SyncBackend>::Counter>;
