//! Linking a local Vulkan image to a foreign shared texture.
//!
//! The shared texture's memory is imported as a `vk::DeviceMemory` and bound
//! to a freshly created image, so both APIs read and write the same pixels.
//! Every failure releases whatever was created before it.

use ash::vk;
use surface_share::ShareHandle;
use tracing::{debug, warn};

use crate::blit::ImageRegion;
use crate::device::{ExternalImageDesc, MemoryImport, VulkanDevice, find_memory_type_index};
use crate::error::BridgeError;

/// Handle type of legacy (non-NT) D3D11 share handles, the only kind a
/// shared surface advertises.
pub const SHARE_HANDLE_TYPE: vk::ExternalMemoryHandleTypeFlags =
    vk::ExternalMemoryHandleTypeFlags::D3D11_TEXTURE_KMT;

/// Linked images are both blit sources (receive) and destinations (send).
pub const LINKED_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::SAMPLED.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Layout a linked image is declared in between transfers.
pub const LINKED_IMAGE_LAYOUT: vk::ImageLayout = vk::ImageLayout::GENERAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// The allocation is tied to exactly one image.
    Dedicated,
    Plain,
}

/// The driver, not the caller, decides whether an import must be dedicated.
pub fn choose_allocation_strategy(features: vk::ExternalMemoryFeatureFlags) -> AllocationStrategy {
    if features.contains(vk::ExternalMemoryFeatureFlags::DEDICATED_ONLY) {
        AllocationStrategy::Dedicated
    } else {
        AllocationStrategy::Plain
    }
}

/// A local image whose memory is the foreign shared texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub share_handle: ShareHandle,
    pub strategy: AllocationStrategy,
}

impl LinkedImage {
    pub fn region(&self) -> ImageRegion {
        ImageRegion {
            image: self.image,
            layout: LINKED_IMAGE_LAYOUT,
            format: self.format,
            width: self.width,
            height: self.height,
        }
    }
}

/// Owns at most one [`LinkedImage`].
#[derive(Debug, Default)]
pub struct ExternalImageImporter {
    linked: Option<LinkedImage>,
}

impl ExternalImageImporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked(&self) -> Option<&LinkedImage> {
        self.linked.as_ref()
    }

    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    /// Releases any previous link, then imports `share_handle` as a
    /// `width` x `height` image of `format`.
    ///
    /// The caller must make sure no pending command buffer still uses the
    /// previous image.
    pub fn link<G: VulkanDevice>(
        &mut self,
        gpu: &G,
        share_handle: ShareHandle,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<&LinkedImage, BridgeError> {
        self.release(gpu);

        if share_handle.is_null() {
            return Err(BridgeError::InvalidSurface("share handle is null".into()));
        }
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidSurface(format!(
                "invalid dimensions: {}x{}",
                width, height
            )));
        }

        let features = probe_import_support(gpu, format)?;
        let strategy = choose_allocation_strategy(features);

        let image = gpu
            .create_image(&ExternalImageDesc {
                format,
                width,
                height,
                usage: LINKED_IMAGE_USAGE,
                handle_type: SHARE_HANDLE_TYPE,
            })
            .map_err(BridgeError::ImageCreation)?;

        let memory = match import_and_bind(gpu, image, share_handle, strategy) {
            Ok(memory) => memory,
            Err(e) => {
                gpu.destroy_image(image);
                return Err(e);
            }
        };

        debug!(
            "[SurfaceBridge/Import] Linked handle {:#x} as {}x{} {:?} ({:?} allocation)",
            share_handle.0, width, height, format, strategy
        );

        Ok(self.linked.insert(LinkedImage {
            image,
            memory,
            width,
            height,
            format,
            share_handle,
            strategy,
        }))
    }

    /// Destroys the linked image and frees its memory. Safe to call when
    /// nothing is linked.
    pub fn release<G: VulkanDevice>(&mut self, gpu: &G) {
        if let Some(linked) = self.linked.take() {
            gpu.destroy_image(linked.image);
            gpu.free_memory(linked.memory);
        }
    }
}

impl Drop for ExternalImageImporter {
    fn drop(&mut self) {
        if let Some(linked) = &self.linked {
            warn!(
                "[SurfaceBridge/Import] Importer dropped while linked to handle {:#x}; image and memory leaked",
                linked.share_handle.0
            );
        }
    }
}

/// Checks that `format` images can import the shared handle type and
/// returns the driver's external memory feature flags.
fn probe_import_support<G: VulkanDevice>(
    gpu: &G,
    format: vk::Format,
) -> Result<vk::ExternalMemoryFeatureFlags, BridgeError> {
    let props = gpu
        .external_image_properties(format, LINKED_IMAGE_USAGE, SHARE_HANDLE_TYPE)
        .map_err(|result| {
            BridgeError::Capability(format!(
                "{:?} handles not supported for {:?} images: {:?}",
                SHARE_HANDLE_TYPE, format, result
            ))
        })?;

    if !props
        .external_memory_features
        .contains(vk::ExternalMemoryFeatureFlags::IMPORTABLE)
    {
        return Err(BridgeError::Capability(format!(
            "{:?} memory is not importable for {:?} images",
            SHARE_HANDLE_TYPE, format
        )));
    }
    Ok(props.external_memory_features)
}

fn import_and_bind<G: VulkanDevice>(
    gpu: &G,
    image: vk::Image,
    share_handle: ShareHandle,
    strategy: AllocationStrategy,
) -> Result<vk::DeviceMemory, BridgeError> {
    let requirements = gpu.image_memory_requirements(image);
    let memory_type_index = find_memory_type_index(
        &gpu.memory_properties(),
        requirements.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .ok_or(BridgeError::NoSuitableMemoryType {
        type_bits: requirements.memory_type_bits,
    })?;

    let memory = gpu
        .import_memory(
            image,
            &MemoryImport {
                handle: share_handle,
                handle_type: SHARE_HANDLE_TYPE,
                allocation_size: requirements.size,
                memory_type_index,
                strategy,
            },
        )
        .map_err(BridgeError::Import)?;

    if let Err(result) = gpu.bind_image_memory(image, memory) {
        gpu.free_memory(memory);
        return Err(BridgeError::Bind(result));
    }
    Ok(memory)
}
