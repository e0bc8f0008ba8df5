//! Direct3D 11 shared textures with legacy (KMT) share handles.

use surface_share::{HostFormat, ShareHandle};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIResource;
use windows::core::Interface;

use super::HostDevice;
use crate::error::BridgeError;

/// Wraps a device created elsewhere.
pub struct D3D11Host {
    device: ID3D11Device,
}

impl D3D11Host {
    pub fn new(device: ID3D11Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }
}

impl HostDevice for D3D11Host {
    type Texture = ID3D11Texture2D;

    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: HostFormat,
    ) -> Result<(ID3D11Texture2D, ShareHandle), BridgeError> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT(format.0 as i32),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
        };

        let mut texture = None;
        unsafe {
            self.device
                .CreateTexture2D(&desc, None, Some(&mut texture as *mut _))
        }
        .map_err(|e| BridgeError::Allocation(format!("CreateTexture2D failed: {e}")))?;
        let texture: ID3D11Texture2D = texture
            .ok_or_else(|| BridgeError::Allocation("CreateTexture2D returned no texture".into()))?;

        let resource: IDXGIResource = texture
            .cast()
            .map_err(|e| BridgeError::Allocation(format!("texture is not a DXGI resource: {e}")))?;
        let handle = unsafe { resource.GetSharedHandle() }
            .map_err(|e| BridgeError::Allocation(format!("GetSharedHandle failed: {e}")))?;

        Ok((texture, ShareHandle(handle.0 as usize as u64)))
    }

    fn release_texture(&self, texture: ID3D11Texture2D) {
        drop(texture);
    }
}
