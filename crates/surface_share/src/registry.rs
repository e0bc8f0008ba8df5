//! Process-wide directory of named shared surfaces.
//!
//! Storage is behind [`RegistryStore`] so the same naming, discovery and
//! cleanup rules run on top of OS shared memory in production and on the
//! in-process [`MemoryStore`] in tests. Name disambiguation is advisory:
//! two processes picking a suffixed name at the same moment can still collide,
//! and the second `create` then fails with [`RegistrationError::AlreadyRegistered`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BridgeConfig, DEFAULT_REGISTRY_CAPACITY};
use crate::types::{
    HostFormat, MAX_SURFACE_NAME_LEN, ShareHandle, SurfaceDescriptor, validate_surface_name,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("surface name is empty")]
    EmptyName,
    #[error("surface name is {len} bytes, limit is {max}")]
    NameTooLong { len: usize, max: usize },
    #[error("surface `{0}` is already registered")]
    AlreadyRegistered(String),
    #[error("surface `{0}` is not registered")]
    NotFound(String),
    #[error("registry is full ({capacity} surfaces)")]
    RegistryFull { capacity: usize },
    #[error("registry storage unavailable: {0}")]
    Storage(String),
}

/// Backing storage for the registry, shared by every process that opens it.
pub trait RegistryStore: Send + Sync {
    fn create(&self, descriptor: &SurfaceDescriptor) -> Result<(), RegistrationError>;
    fn find(&self, name: &str) -> Option<SurfaceDescriptor>;
    fn update(&self, descriptor: &SurfaceDescriptor) -> Result<(), RegistrationError>;
    fn remove(&self, name: &str) -> bool;
    /// Registered names in registration order.
    fn names(&self) -> Vec<String>;
    fn active(&self) -> Option<String>;
    fn set_active(&self, name: Option<&str>);
    /// Whether the per-surface shared state written by the owner still exists.
    /// A registered name without it belongs to a process that went away.
    fn has_shared_state(&self, name: &str) -> bool;
}

struct StoreEntry {
    descriptor: SurfaceDescriptor,
    shared_state: bool,
}

struct StoreState {
    entries: Vec<StoreEntry>,
    active: Option<String>,
    capacity: usize,
}

/// In-process [`RegistryStore`]. Clones share the same storage, so separate
/// clones behave like separate processes looking at one directory.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl MemoryStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                entries: Vec::new(),
                active: None,
                capacity,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the owner-side shared state of `name` while leaving its entry,
    /// which is what a crashed sender leaves behind.
    pub fn drop_shared_state(&self, name: &str) {
        if let Some(entry) = self
            .lock()
            .entries
            .iter_mut()
            .find(|e| e.descriptor.name == name)
        {
            entry.shared_state = false;
        }
    }
}

impl RegistryStore for MemoryStore {
    fn create(&self, descriptor: &SurfaceDescriptor) -> Result<(), RegistrationError> {
        let mut state = self.lock();
        if state
            .entries
            .iter()
            .any(|e| e.descriptor.name == descriptor.name)
        {
            return Err(RegistrationError::AlreadyRegistered(
                descriptor.name.clone(),
            ));
        }
        if state.entries.len() >= state.capacity {
            return Err(RegistrationError::RegistryFull {
                capacity: state.capacity,
            });
        }
        state.entries.push(StoreEntry {
            descriptor: descriptor.clone(),
            shared_state: true,
        });
        Ok(())
    }

    fn find(&self, name: &str) -> Option<SurfaceDescriptor> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.descriptor.name == name)
            .map(|e| e.descriptor.clone())
    }

    fn update(&self, descriptor: &SurfaceDescriptor) -> Result<(), RegistrationError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .iter_mut()
            .find(|e| e.descriptor.name == descriptor.name)
            .ok_or_else(|| RegistrationError::NotFound(descriptor.name.clone()))?;
        entry.descriptor = descriptor.clone();
        Ok(())
    }

    fn remove(&self, name: &str) -> bool {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|e| e.descriptor.name != name);
        state.entries.len() != before
    }

    fn names(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    fn active(&self) -> Option<String> {
        self.lock().active.clone()
    }

    fn set_active(&self, name: Option<&str>) {
        self.lock().active = name.map(str::to_owned);
    }

    fn has_shared_state(&self, name: &str) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|e| e.descriptor.name == name && e.shared_state)
    }
}

/// Naming, discovery and cleanup rules over a [`RegistryStore`].
pub struct SurfaceRegistry<S: RegistryStore> {
    store: S,
    capacity: usize,
}

impl<S: RegistryStore> SurfaceRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }

    /// Registry admitting at most `config.registry_capacity` live surfaces.
    pub fn with_config(store: S, config: &BridgeConfig) -> Self {
        Self {
            store,
            capacity: config.registry_capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when `name` is registered and its owner is still around.
    pub fn is_live(&self, name: &str) -> bool {
        self.store.find(name).is_some() && self.store.has_shared_state(name)
    }

    /// Returns `base` if no live surface uses it, otherwise the first free
    /// `base_1`, `base_2`, ... suffix. `base` is shortened as needed so the
    /// suffixed name stays within [`MAX_SURFACE_NAME_LEN`].
    pub fn unique_name(&self, base: &str) -> String {
        if !self.is_live(base) {
            return base.to_owned();
        }
        let mut index = 1u32;
        loop {
            let candidate = suffixed_name(base, index);
            if !self.is_live(&candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    pub fn register(
        &self,
        name: &str,
        width: u32,
        height: u32,
        share_handle: ShareHandle,
        format: HostFormat,
    ) -> Result<(), RegistrationError> {
        validate_surface_name(name)?;
        self.cleanup();
        if self.store.names().len() >= self.capacity {
            return Err(RegistrationError::RegistryFull {
                capacity: self.capacity,
            });
        }

        let descriptor = SurfaceDescriptor::new(name, width, height, share_handle, format);
        self.store.create(&descriptor)?;

        if self.store.active().is_none() {
            self.store.set_active(Some(name));
        }
        debug!(
            "[SurfaceShare/Registry] Registered `{}` {}x{} format={} handle={:#x}",
            name, width, height, format.0, share_handle.0
        );
        Ok(())
    }

    /// Looks up `name`, or the active surface when `name` is empty.
    pub fn find(&self, name: &str) -> Option<SurfaceDescriptor> {
        if name.is_empty() {
            let active = self.store.active()?;
            return self.store.find(&active);
        }
        self.store.find(name)
    }

    pub fn update(
        &self,
        name: &str,
        width: u32,
        height: u32,
        share_handle: ShareHandle,
        format: HostFormat,
    ) -> Result<(), RegistrationError> {
        let descriptor = SurfaceDescriptor::new(name, width, height, share_handle, format);
        self.store.update(&descriptor)
    }

    /// Unregisters `name`. If it was the active surface, the first remaining
    /// surface becomes active.
    pub fn release(&self, name: &str) -> bool {
        let removed = self.store.remove(name);
        if removed {
            self.promote_if_active(name);
            debug!("[SurfaceShare/Registry] Released `{}`", name);
        }
        removed
    }

    pub fn list(&self) -> Vec<String> {
        self.store.names()
    }

    pub fn active_name(&self) -> Option<String> {
        self.store.active()
    }

    pub fn set_active(&self, name: &str) -> Result<(), RegistrationError> {
        if self.store.find(name).is_none() {
            return Err(RegistrationError::NotFound(name.to_owned()));
        }
        self.store.set_active(Some(name));
        Ok(())
    }

    /// Removes entries whose owner-side shared state is gone. Returns how
    /// many were dropped.
    pub fn cleanup(&self) -> usize {
        let stale: Vec<String> = self
            .store
            .names()
            .into_iter()
            .filter(|name| !self.store.has_shared_state(name))
            .collect();
        for name in &stale {
            if self.store.remove(name) {
                info!("[SurfaceShare/Registry] Removed stale surface `{}`", name);
                self.promote_if_active(name);
            }
        }
        stale.len()
    }

    fn promote_if_active(&self, removed: &str) {
        if self.store.active().as_deref() == Some(removed) {
            let next = self.store.names().into_iter().next();
            self.store.set_active(next.as_deref());
        }
    }
}

fn suffixed_name(base: &str, index: u32) -> String {
    let suffix = format!("_{index}");
    let mut end = MAX_SURFACE_NAME_LEN
        .saturating_sub(suffix.len())
        .min(base.len());
    while !base.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &base[..end], suffix)
}
