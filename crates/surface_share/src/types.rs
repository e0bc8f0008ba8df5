use serde::{Deserialize, Serialize};

use crate::RegistrationError;

/// Longest surface name accepted by the registry, in bytes.
pub const MAX_SURFACE_NAME_LEN: usize = 255;

/// OS-level identifier of a shareable GPU allocation.
///
/// The value is not owned: whoever created the backing texture keeps it alive.
/// Receivers only copy the raw value around and import it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShareHandle(pub u64);

impl ShareHandle {
    pub const NULL: ShareHandle = ShareHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Raw value in the pointer-sized form Win32 APIs and `ash` expect.
    pub fn as_raw(self) -> isize {
        self.0 as isize
    }

    pub fn from_raw(raw: isize) -> Self {
        Self(raw as u64)
    }
}

/// Pixel format of the host-side (Direct3D 11) shared texture.
///
/// Values are `DXGI_FORMAT` enumerants, kept as a plain integer so the
/// registry can be used on hosts without the Windows SDK types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostFormat(pub u32);

impl HostFormat {
    pub const R32G32B32A32_FLOAT: HostFormat = HostFormat(2);
    pub const R16G16B16A16_FLOAT: HostFormat = HostFormat(10);
    pub const R16G16B16A16_UNORM: HostFormat = HostFormat(11);
    pub const R10G10B10A2_UNORM: HostFormat = HostFormat(24);
    pub const R8G8B8A8_UNORM: HostFormat = HostFormat(28);
    pub const B8G8R8A8_UNORM: HostFormat = HostFormat(87);

    /// The closed set of formats a shared surface may carry.
    pub const SUPPORTED: [HostFormat; 6] = [
        HostFormat::B8G8R8A8_UNORM,
        HostFormat::R8G8B8A8_UNORM,
        HostFormat::R10G10B10A2_UNORM,
        HostFormat::R16G16B16A16_UNORM,
        HostFormat::R16G16B16A16_FLOAT,
        HostFormat::R32G32B32A32_FLOAT,
    ];

    pub fn is_supported(self) -> bool {
        Self::SUPPORTED.contains(&self)
    }
}

impl Default for HostFormat {
    fn default() -> Self {
        HostFormat::B8G8R8A8_UNORM
    }
}

/// Registry entry describing one live shared surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceDescriptor {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: HostFormat,
    pub share_handle: ShareHandle,
}

impl SurfaceDescriptor {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        share_handle: ShareHandle,
        format: HostFormat,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format,
            share_handle,
        }
    }

    /// True when a link built for `other` can not be reused for `self`.
    pub fn differs_from(&self, other: &SurfaceDescriptor) -> bool {
        self.width != other.width
            || self.height != other.height
            || self.format != other.format
            || self.share_handle != other.share_handle
    }
}

/// Checks the naming rules shared by the registry and the named primitives.
pub fn validate_surface_name(name: &str) -> Result<(), RegistrationError> {
    if name.is_empty() {
        return Err(RegistrationError::EmptyName);
    }
    if name.len() > MAX_SURFACE_NAME_LEN {
        return Err(RegistrationError::NameTooLong {
            len: name.len(),
            max: MAX_SURFACE_NAME_LEN,
        });
    }
    Ok(())
}
