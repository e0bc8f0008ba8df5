//! Sender and receiver state machines.
//!
//! A session is either Uninitialized or Active (surface known and linked).
//! Every entry point returns `bool`: a frame that could not be transferred is
//! simply skipped and the next call retries from whatever state is left.
//! Failures tear the session back down to Uninitialized; contention on the
//! surface mutex keeps the session as it is and is not logged.
//!
//! Sender and receiver own the [`VulkanDevice`] their linked image lives on
//! and free it on drop. Pass `&device` or an `Arc` to share one device.

use ash::vk;
use surface_share::{
    BridgeConfig, GuardFor, HostFormat, RegistrationError, RegistryStore, ShareHandle,
    SurfaceDescriptor, SurfaceRegistry, SyncBackend, SynchronizationGuard,
};
use tracing::{debug, error, info, warn};

use crate::blit::{CrossApiBlitter, ImageRegion};
use crate::device::{REQUIRED_DEVICE_EXTENSIONS, VulkanDevice};
use crate::error::BridgeError;
use crate::format::{to_host_format, to_vulkan_format};
use crate::host::{HostDevice, SharedSurfaceManager};
use crate::import::{ExternalImageImporter, LinkedImage};

const FALLBACK_SENDER_NAME: &str = "vkshare";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
}

/// What one sender or receiver keeps between frames.
pub struct Session<B: SyncBackend> {
    surface: Option<SurfaceDescriptor>,
    importer: ExternalImageImporter,
    guard: Option<GuardFor<B>>,
    extensions_checked: bool,
}

impl<B: SyncBackend> Session<B> {
    fn new() -> Self {
        Self {
            surface: None,
            importer: ExternalImageImporter::new(),
            guard: None,
            extensions_checked: false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.surface.is_some() && self.importer.is_linked() {
            SessionState::Active
        } else {
            SessionState::Uninitialized
        }
    }

    pub fn surface(&self) -> Option<&SurfaceDescriptor> {
        self.surface.as_ref()
    }

    pub fn linked(&self) -> Option<&LinkedImage> {
        self.importer.linked()
    }

    /// Checked once; a failed check is repeated on the next call.
    fn check_extensions<G: VulkanDevice>(
        &mut self,
        gpu: &G,
        required: bool,
    ) -> Result<(), BridgeError> {
        if !required || self.extensions_checked {
            return Ok(());
        }
        let missing: Vec<String> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .filter(|name| !gpu.supports_device_extension(name))
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        if !missing.is_empty() {
            return Err(BridgeError::MissingExtensions(missing));
        }
        self.extensions_checked = true;
        Ok(())
    }

    /// Drops the linked image once the device has finished with it.
    fn release_link<G: VulkanDevice>(&mut self, gpu: &G) {
        if !self.importer.is_linked() {
            return;
        }
        if let Err(result) = gpu.wait_idle() {
            warn!("[SurfaceBridge/Session] wait_idle before release failed: {:?}", result);
        }
        self.importer.release(gpu);
    }

    fn teardown<G: VulkanDevice>(&mut self, gpu: &G) {
        self.release_link(gpu);
        self.guard = None;
        self.surface = None;
    }

    fn open_guard(&mut self, sync: &B, name: &str, config: &BridgeConfig) -> Result<(), BridgeError> {
        if self.guard.as_ref().is_some_and(|g| g.name() == name) {
            return Ok(());
        }
        self.guard = None;
        self.guard = Some(SynchronizationGuard::open(
            sync,
            name,
            config.acquire_timeout(),
        )?);
        Ok(())
    }
}

fn log_failure(role: &str, e: &BridgeError) {
    match e {
        BridgeError::MissingExtensions(_) => error!("[SurfaceBridge/{}] {}", role, e),
        _ => warn!("[SurfaceBridge/{}] {}", role, e),
    }
}

/// File stem of the running executable.
pub fn default_sender_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| FALLBACK_SENDER_NAME.to_owned())
}

/// Publishes a caller's Vulkan image as a named shared surface.
pub struct Sender<G: VulkanDevice, H: HostDevice, S: RegistryStore, B: SyncBackend> {
    config: BridgeConfig,
    gpu: G,
    host: SharedSurfaceManager<H>,
    registry: SurfaceRegistry<S>,
    sync: B,
    session: Session<B>,
    base_name: String,
    registered: Option<String>,
}

impl<G: VulkanDevice, H: HostDevice, S: RegistryStore, B: SyncBackend> Sender<G, H, S, B> {
    /// An empty `name` publishes under the executable's name. Nothing is
    /// allocated until the first [`Sender::send_image`].
    pub fn new(name: &str, gpu: G, host: H, store: S, sync: B, config: BridgeConfig) -> Self {
        let base_name = if name.is_empty() {
            default_sender_name()
        } else {
            name.to_owned()
        };
        Self {
            registry: SurfaceRegistry::with_config(store, &config),
            config,
            gpu,
            host: SharedSurfaceManager::new(host),
            sync,
            session: Session::new(),
            base_name,
            registered: None,
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    /// The registered name once publishing, otherwise the requested one.
    pub fn name(&self) -> &str {
        self.registered.as_deref().unwrap_or(&self.base_name)
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn registry(&self) -> &SurfaceRegistry<S> {
        &self.registry
    }

    /// Handle of the shared texture currently published, if any.
    pub fn share_handle(&self) -> Option<ShareHandle> {
        self.host.current().map(|shared| shared.share_handle)
    }

    pub fn frame_number(&self) -> u64 {
        self.session.guard.as_ref().map_or(0, |g| g.frame_number())
    }

    /// Records a copy of `source` into the shared surface, creating or
    /// resizing the surface to `source`'s extent first. `source` is returned
    /// to its declared layout. Returns false when nothing was recorded.
    pub fn send_image(&mut self, command_buffer: vk::CommandBuffer, source: &ImageRegion) -> bool {
        match self.try_send(command_buffer, source) {
            Ok(()) => true,
            Err(BridgeError::Contention(_)) => false,
            Err(e) => {
                log_failure("Sender", &e);
                self.release();
                false
            }
        }
    }

    fn try_send(
        &mut self,
        command_buffer: vk::CommandBuffer,
        source: &ImageRegion,
    ) -> Result<(), BridgeError> {
        if source.width == 0 || source.height == 0 {
            return Err(BridgeError::InvalidSurface(format!(
                "source image is {}x{}",
                source.width, source.height
            )));
        }
        self.session
            .check_extensions(&self.gpu, self.config.require_extensions)?;
        self.ensure_surface(source.width, source.height, to_host_format(source.format))?;

        let target = self
            .session
            .importer
            .linked()
            .map(LinkedImage::region)
            .ok_or_else(|| BridgeError::InvalidSurface("no linked image".into()))?;
        let guard = self
            .session
            .guard
            .as_mut()
            .ok_or_else(|| BridgeError::InvalidSurface("no access mutex".into()))?;

        if !guard.acquire() {
            return Err(BridgeError::Contention(guard.name().to_owned()));
        }
        CrossApiBlitter::transfer(&self.gpu, command_buffer, source, &target);
        guard.release();
        guard.mark_new_frame();
        Ok(())
    }

    /// Makes sure a shared surface of the given geometry exists, is linked
    /// and is advertised. A geometry or format change rebuilds the texture
    /// and link but keeps the registered name.
    fn ensure_surface(
        &mut self,
        width: u32,
        height: u32,
        format: HostFormat,
    ) -> Result<(), BridgeError> {
        if let Some(current) = self.session.surface.as_ref() {
            if self.session.importer.is_linked()
                && current.width == width
                && current.height == height
                && current.format == format
            {
                return Ok(());
            }
            info!(
                "[SurfaceBridge/Sender] `{}` changed {}x{} format={} -> {}x{} format={}",
                current.name, current.width, current.height, current.format.0, width, height, format.0
            );
        }

        self.session.release_link(&self.gpu);
        self.session.surface = None;
        self.host.release();

        let share_handle = self.host.create(width, height, format)?;
        self.session.importer.link(
            &self.gpu,
            share_handle,
            width,
            height,
            to_vulkan_format(format),
        )?;

        let name = if let Some(name) = self.registered.clone() {
            self.registry
                .update(&name, width, height, share_handle, format)?;
            name
        } else {
            let name = self.registry.unique_name(&self.base_name);
            self.registry
                .register(&name, width, height, share_handle, format)?;
            info!("[SurfaceBridge/Sender] Publishing `{}`", name);
            self.registered = Some(name.clone());
            name
        };

        self.session.open_guard(&self.sync, &name, &self.config)?;
        self.session.surface = Some(SurfaceDescriptor::new(
            name,
            width,
            height,
            share_handle,
            format,
        ));
        Ok(())
    }

    /// Sleeps so sends are at most `fps` per second.
    pub fn throttle(&mut self, fps: u32) {
        if let Some(guard) = self.session.guard.as_mut() {
            guard.throttle(fps);
        }
    }

    /// Stops publishing: unlinks, frees the shared texture and unregisters.
    pub fn release(&mut self) {
        self.session.teardown(&self.gpu);
        self.host.release();
        if let Some(name) = self.registered.take() {
            self.registry.release(&name);
            info!("[SurfaceBridge/Sender] Stopped publishing `{}`", name);
        }
    }
}

impl<G: VulkanDevice, H: HostDevice, S: RegistryStore, B: SyncBackend> Drop
    for Sender<G, H, S, B>
{
    fn drop(&mut self) {
        self.release();
    }
}

/// Copies a named shared surface into a caller's Vulkan image.
pub struct Receiver<G: VulkanDevice, S: RegistryStore, B: SyncBackend> {
    config: BridgeConfig,
    gpu: G,
    registry: SurfaceRegistry<S>,
    sync: B,
    session: Session<B>,
    /// Empty follows whichever surface is active.
    requested: String,
    frame_new: bool,
}

impl<G: VulkanDevice, S: RegistryStore, B: SyncBackend> Receiver<G, S, B> {
    pub fn new(name: &str, gpu: G, store: S, sync: B, config: BridgeConfig) -> Self {
        Self {
            registry: SurfaceRegistry::with_config(store, &config),
            config,
            gpu,
            sync,
            session: Session::new(),
            requested: name.to_owned(),
            frame_new: false,
        }
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn registry(&self) -> &SurfaceRegistry<S> {
        &self.registry
    }

    pub fn surface_name(&self) -> Option<&str> {
        self.session.surface.as_ref().map(|s| s.name.as_str())
    }

    pub fn surface_width(&self) -> u32 {
        self.session.surface.as_ref().map_or(0, |s| s.width)
    }

    pub fn surface_height(&self) -> u32 {
        self.session.surface.as_ref().map_or(0, |s| s.height)
    }

    pub fn surface_format(&self) -> Option<HostFormat> {
        self.session.surface.as_ref().map(|s| s.format)
    }

    /// Whether the last successful receive saw content the sender published
    /// after the previous one.
    pub fn is_frame_new(&self) -> bool {
        self.frame_new
    }

    pub fn frame_number(&self) -> u64 {
        self.session.guard.as_ref().map_or(0, |g| g.frame_number())
    }

    /// Makes `name` the active surface and drops the current link so the next
    /// call connects to it.
    pub fn select_surface(&mut self, name: &str) -> Result<(), BridgeError> {
        self.registry.set_active(name)?;
        self.session.teardown(&self.gpu);
        self.requested = name.to_owned();
        debug!("[SurfaceBridge/Receiver] Selected `{}`", name);
        Ok(())
    }

    /// Records a copy of the shared surface into `target`. A zero target
    /// width or height is replaced by the surface's own. Returns false when
    /// nothing was recorded.
    pub fn receive_image(&mut self, command_buffer: vk::CommandBuffer, target: &ImageRegion) -> bool {
        match self.try_receive(command_buffer, target) {
            Ok(()) => true,
            Err(BridgeError::Contention(_)) => false,
            Err(BridgeError::Registration(RegistrationError::NotFound(name))) => {
                debug!("[SurfaceBridge/Receiver] No surface `{}`", name);
                false
            }
            Err(e) => {
                log_failure("Receiver", &e);
                self.session.teardown(&self.gpu);
                false
            }
        }
    }

    fn try_receive(
        &mut self,
        command_buffer: vk::CommandBuffer,
        target: &ImageRegion,
    ) -> Result<(), BridgeError> {
        let relinked = self.receive_surface()?;

        let (Some(surface), Some(linked)) =
            (self.session.surface.as_ref(), self.session.importer.linked())
        else {
            return Err(BridgeError::InvalidSurface("no linked surface".into()));
        };
        let destination = ImageRegion {
            width: if target.width == 0 {
                surface.width
            } else {
                target.width
            },
            height: if target.height == 0 {
                surface.height
            } else {
                target.height
            },
            ..*target
        };
        let guard = self
            .session
            .guard
            .as_mut()
            .ok_or_else(|| BridgeError::InvalidSurface("no access mutex".into()))?;

        if !guard.acquire() {
            return Err(BridgeError::Contention(guard.name().to_owned()));
        }
        CrossApiBlitter::transfer(&self.gpu, command_buffer, &linked.region(), &destination);
        guard.release();
        self.frame_new = guard.is_new_frame() || relinked;
        Ok(())
    }

    /// Looks the surface up and links it if it is new or changed. Returns
    /// true when a new link was made. A surface that disappeared resets the
    /// session.
    pub fn receive_surface(&mut self) -> Result<bool, BridgeError> {
        self.session
            .check_extensions(&self.gpu, self.config.require_extensions)?;

        let Some(found) = self.registry.find(&self.requested) else {
            if let Some(lost) = self.session.surface.as_ref() {
                info!("[SurfaceBridge/Receiver] `{}` is gone", lost.name);
            }
            self.session.teardown(&self.gpu);
            return Err(RegistrationError::NotFound(self.requested.clone()).into());
        };

        let unchanged = self.session.importer.is_linked()
            && self
                .session
                .surface
                .as_ref()
                .is_some_and(|current| current.name == found.name && !current.differs_from(&found));
        if unchanged {
            return Ok(false);
        }

        self.session.release_link(&self.gpu);
        self.session.surface = None;
        self.session.importer.link(
            &self.gpu,
            found.share_handle,
            found.width,
            found.height,
            to_vulkan_format(found.format),
        )?;
        self.session.open_guard(&self.sync, &found.name, &self.config)?;
        info!(
            "[SurfaceBridge/Receiver] Linked `{}` {}x{} format={}",
            found.name, found.width, found.height, found.format.0
        );
        self.session.surface = Some(found);
        Ok(true)
    }

    /// Sleeps so receives are at most `fps` per second.
    pub fn throttle(&mut self, fps: u32) {
        if let Some(guard) = self.session.guard.as_mut() {
            guard.throttle(fps);
        }
    }

    /// Unlinks and closes the surface primitives. The requested name is kept.
    pub fn release(&mut self) {
        self.session.teardown(&self.gpu);
        self.frame_new = false;
    }
}

impl<G: VulkanDevice, S: RegistryStore, B: SyncBackend> Drop for Receiver<G, S, B> {
    fn drop(&mut self) {
        self.release();
    }
}
