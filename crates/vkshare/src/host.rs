//! The shareable texture a sender publishes.

#[cfg(target_os = "windows")]
pub mod d3d11;

use surface_share::{HostFormat, ShareHandle};
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Device of the API that owns shared textures.
pub trait HostDevice {
    type Texture;

    /// Creates a texture other processes and APIs can open through the
    /// returned handle.
    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: HostFormat,
    ) -> Result<(Self::Texture, ShareHandle), BridgeError>;

    fn release_texture(&self, texture: Self::Texture);
}

pub struct SharedTexture<T> {
    pub texture: T,
    pub share_handle: ShareHandle,
    pub width: u32,
    pub height: u32,
    pub format: HostFormat,
}

/// Owns at most one shared texture on `H`.
pub struct SharedSurfaceManager<H: HostDevice> {
    host: H,
    current: Option<SharedTexture<H::Texture>>,
}

impl<H: HostDevice> SharedSurfaceManager<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&SharedTexture<H::Texture>> {
        self.current.as_ref()
    }

    /// Allocates a shared texture and returns its handle. An existing texture
    /// is a caller error: it is reported and released, never leaked.
    pub fn create(
        &mut self,
        width: u32,
        height: u32,
        format: HostFormat,
    ) -> Result<ShareHandle, BridgeError> {
        if let Some(existing) = &self.current {
            warn!(
                "[SurfaceBridge/Host] Creating a shared texture while handle {:#x} is still alive; releasing it",
                existing.share_handle.0
            );
            self.release();
        }
        if width == 0 || height == 0 {
            return Err(BridgeError::Allocation(format!(
                "invalid texture size {}x{}",
                width, height
            )));
        }
        if !format.is_supported() {
            return Err(BridgeError::Allocation(format!(
                "format {} is not shareable",
                format.0
            )));
        }

        let (texture, share_handle) = self.host.create_shared_texture(width, height, format)?;
        if share_handle.is_null() {
            self.host.release_texture(texture);
            return Err(BridgeError::Allocation(
                "device returned a null share handle".into(),
            ));
        }

        debug!(
            "[SurfaceBridge/Host] Created shared texture {}x{} format={} handle={:#x}",
            width, height, format.0, share_handle.0
        );
        self.current = Some(SharedTexture {
            texture,
            share_handle,
            width,
            height,
            format,
        });
        Ok(share_handle)
    }

    /// No-op when nothing is allocated.
    pub fn release(&mut self) {
        if let Some(shared) = self.current.take() {
            debug!(
                "[SurfaceBridge/Host] Released shared texture handle={:#x}",
                shared.share_handle.0
            );
            self.host.release_texture(shared.texture);
        }
    }
}

impl<H: HostDevice> Drop for SharedSurfaceManager<H> {
    fn drop(&mut self) {
        self.release();
    }
}
