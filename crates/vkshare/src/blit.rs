//! Recording the pixel transfer between a caller image and a linked image.
//!
//! Commands are only recorded into the caller's command buffer. Submission,
//! fences and queue ownership stay with the caller.

use ash::vk;
use tracing::trace;

use crate::device::VulkanDevice;

/// An image plus what the transfer needs to know about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub image: vk::Image,
    /// Layout the image is in before the transfer and is returned to after.
    pub layout: vk::ImageLayout,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
}

impl ImageRegion {
    pub fn new(
        image: vk::Image,
        layout: vk::ImageLayout,
        format: vk::Format,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            image,
            layout,
            format,
            width,
            height,
        }
    }

    fn same_extent(&self, other: &ImageRegion) -> bool {
        self.width == other.width && self.height == other.height
    }

    fn far_corner(&self) -> vk::Offset3D {
        vk::Offset3D {
            x: self.width as i32,
            y: self.height as i32,
            z: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Scaled, format-converting blit over both full extents.
    Blit,
    /// Same-extent raw copy used when the formats cannot be blitted.
    Copy,
    /// Extents differ and blit is unsupported; nothing is transferred.
    Skipped,
}

/// Picks the transfer for the given support and extents.
pub fn plan_transfer(blit_supported: bool, src: &ImageRegion, dst: &ImageRegion) -> TransferKind {
    if blit_supported {
        TransferKind::Blit
    } else if src.same_extent(dst) {
        TransferKind::Copy
    } else {
        TransferKind::Skipped
    }
}

/// Optimal-tiling blit support: `src_format` as source, `dst_format` as
/// destination.
pub fn blit_supported<G: VulkanDevice>(
    gpu: &G,
    src_format: vk::Format,
    dst_format: vk::Format,
) -> bool {
    gpu.format_properties(src_format)
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::BLIT_SRC)
        && gpu
            .format_properties(dst_format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::BLIT_DST)
}

const COLOR_LAYER: vk::ImageSubresourceLayers = vk::ImageSubresourceLayers {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    mip_level: 0,
    base_array_layer: 0,
    layer_count: 1,
};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub struct CrossApiBlitter;

impl CrossApiBlitter {
    /// Records `src` -> `dst` into `command_buffer` and returns what was
    /// recorded. Both images end in the layouts they started in.
    pub fn transfer<G: VulkanDevice>(
        gpu: &G,
        command_buffer: vk::CommandBuffer,
        src: &ImageRegion,
        dst: &ImageRegion,
    ) -> TransferKind {
        let to_src = layout_barrier(
            src.image,
            src.layout,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::MEMORY_READ,
            vk::AccessFlags::TRANSFER_READ,
        );
        gpu.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            &to_src,
        );

        let to_dst = layout_barrier(
            dst.image,
            dst.layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::MEMORY_READ,
            vk::AccessFlags::TRANSFER_WRITE,
        );
        gpu.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
            &to_dst,
        );

        let kind = plan_transfer(blit_supported(gpu, src.format, dst.format), src, dst);
        match kind {
            TransferKind::Blit => {
                let region = vk::ImageBlit {
                    src_subresource: COLOR_LAYER,
                    src_offsets: [vk::Offset3D::default(), src.far_corner()],
                    dst_subresource: COLOR_LAYER,
                    dst_offsets: [vk::Offset3D::default(), dst.far_corner()],
                };
                gpu.cmd_blit_image(
                    command_buffer,
                    src.image,
                    dst.image,
                    &region,
                    vk::Filter::LINEAR,
                );
            }
            TransferKind::Copy => {
                let region = vk::ImageCopy {
                    src_subresource: COLOR_LAYER,
                    src_offset: vk::Offset3D::default(),
                    dst_subresource: COLOR_LAYER,
                    dst_offset: vk::Offset3D::default(),
                    extent: vk::Extent3D {
                        width: dst.width,
                        height: dst.height,
                        depth: 1,
                    },
                };
                gpu.cmd_copy_image(command_buffer, src.image, dst.image, &region);
            }
            TransferKind::Skipped => {
                trace!(
                    "[SurfaceBridge/Blit] No blit support for {:?} -> {:?} and extents differ ({}x{} vs {}x{})",
                    src.format, dst.format, src.width, src.height, dst.width, dst.height
                );
            }
        }

        let restore_dst = layout_barrier(
            dst.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            dst.layout,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::MEMORY_READ,
        );
        gpu.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &restore_dst,
        );

        let restore_src = layout_barrier(
            src.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src.layout,
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::MEMORY_READ,
        );
        gpu.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &restore_src,
        );

        kind
    }
}

fn layout_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
}
