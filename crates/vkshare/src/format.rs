//! Pixel format mapping between the shared texture (DXGI) and Vulkan.
//!
//! Both directions are total. Anything outside the supported set maps to
//! 8-bit BGRA, so an unusual source format still yields a usable surface.

use ash::vk;
use surface_share::HostFormat;

const FORMAT_PAIRS: [(HostFormat, vk::Format); 6] = [
    (HostFormat::B8G8R8A8_UNORM, vk::Format::B8G8R8A8_UNORM),
    (HostFormat::R8G8B8A8_UNORM, vk::Format::R8G8B8A8_UNORM),
    (HostFormat::R10G10B10A2_UNORM, vk::Format::A2B10G10R10_UNORM_PACK32),
    (HostFormat::R16G16B16A16_UNORM, vk::Format::R16G16B16A16_UNORM),
    (HostFormat::R16G16B16A16_FLOAT, vk::Format::R16G16B16A16_SFLOAT),
    (HostFormat::R32G32B32A32_FLOAT, vk::Format::R32G32B32A32_SFLOAT),
];

pub const DEFAULT_HOST_FORMAT: HostFormat = HostFormat::B8G8R8A8_UNORM;
pub const DEFAULT_VULKAN_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

/// Vulkan format of a local image -> format of the shared texture.
pub fn to_host_format(format: vk::Format) -> HostFormat {
    FORMAT_PAIRS
        .iter()
        .find(|(_, vk_format)| *vk_format == format)
        .map_or(DEFAULT_HOST_FORMAT, |(host, _)| *host)
}

/// Format of the shared texture -> Vulkan format for the linked image.
pub fn to_vulkan_format(format: HostFormat) -> vk::Format {
    FORMAT_PAIRS
        .iter()
        .find(|(host, _)| *host == format)
        .map_or(DEFAULT_VULKAN_FORMAT, |(_, vk_format)| *vk_format)
}
