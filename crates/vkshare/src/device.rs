//! The Vulkan calls the bridge needs, behind one trait.
//!
//! [`AshDevice`] forwards to a device the application already created. The
//! bridge never creates or destroys instances or devices itself.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;
use surface_share::ShareHandle;

use crate::error::BridgeError;
use crate::import::AllocationStrategy;

const VK_KHR_EXTERNAL_MEMORY_NAME: &CStr = c"VK_KHR_external_memory";
const VK_KHR_EXTERNAL_MEMORY_WIN32_NAME: &CStr = c"VK_KHR_external_memory_win32";
const VK_KHR_DEDICATED_ALLOCATION_NAME: &CStr = c"VK_KHR_dedicated_allocation";
const VK_KHR_GET_MEMORY_REQUIREMENTS2_NAME: &CStr = c"VK_KHR_get_memory_requirements2";

/// Device extensions an importing device has to expose.
pub const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 4] = [
    VK_KHR_EXTERNAL_MEMORY_NAME,
    VK_KHR_EXTERNAL_MEMORY_WIN32_NAME,
    VK_KHR_DEDICATED_ALLOCATION_NAME,
    VK_KHR_GET_MEMORY_REQUIREMENTS2_NAME,
];

/// Parameters of a 2D, single mip, single layer image that will be backed by
/// imported memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalImageDesc {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub usage: vk::ImageUsageFlags,
    pub handle_type: vk::ExternalMemoryHandleTypeFlags,
}

/// How to turn a foreign share handle into a `vk::DeviceMemory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryImport {
    pub handle: ShareHandle,
    pub handle_type: vk::ExternalMemoryHandleTypeFlags,
    pub allocation_size: vk::DeviceSize,
    pub memory_type_index: u32,
    pub strategy: AllocationStrategy,
}

pub trait VulkanDevice {
    fn supports_device_extension(&self, name: &CStr) -> bool;

    /// External memory properties for importing `handle_type` into an
    /// optimal-tiling 2D image of `format` with `usage`. An error means the
    /// combination is not supported at all.
    fn external_image_properties(
        &self,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> Result<vk::ExternalMemoryProperties, vk::Result>;

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    fn create_image(&self, desc: &ExternalImageDesc) -> Result<vk::Image, vk::Result>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn import_memory(
        &self,
        image: vk::Image,
        import: &MemoryImport,
    ) -> Result<vk::DeviceMemory, vk::Result>;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory)
    -> Result<(), vk::Result>;
    fn destroy_image(&self, image: vk::Image);
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn wait_idle(&self) -> Result<(), vk::Result>;

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    );
    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    );
    fn cmd_copy_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: &vk::ImageCopy,
    );
}

macro_rules! forward_vulkan_device {
    ($($target:ty),*) => {$(
        impl<T: VulkanDevice + ?Sized> VulkanDevice for $target {
            fn supports_device_extension(&self, name: &CStr) -> bool {
                (**self).supports_device_extension(name)
            }
            fn external_image_properties(
                &self,
                format: vk::Format,
                usage: vk::ImageUsageFlags,
                handle_type: vk::ExternalMemoryHandleTypeFlags,
            ) -> Result<vk::ExternalMemoryProperties, vk::Result> {
                (**self).external_image_properties(format, usage, handle_type)
            }
            fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
                (**self).format_properties(format)
            }
            fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
                (**self).memory_properties()
            }
            fn create_image(&self, desc: &ExternalImageDesc) -> Result<vk::Image, vk::Result> {
                (**self).create_image(desc)
            }
            fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
                (**self).image_memory_requirements(image)
            }
            fn import_memory(
                &self,
                image: vk::Image,
                import: &MemoryImport,
            ) -> Result<vk::DeviceMemory, vk::Result> {
                (**self).import_memory(image, import)
            }
            fn bind_image_memory(
                &self,
                image: vk::Image,
                memory: vk::DeviceMemory,
            ) -> Result<(), vk::Result> {
                (**self).bind_image_memory(image, memory)
            }
            fn destroy_image(&self, image: vk::Image) {
                (**self).destroy_image(image)
            }
            fn free_memory(&self, memory: vk::DeviceMemory) {
                (**self).free_memory(memory)
            }
            fn wait_idle(&self) -> Result<(), vk::Result> {
                (**self).wait_idle()
            }
            fn cmd_pipeline_barrier(
                &self,
                command_buffer: vk::CommandBuffer,
                src_stage: vk::PipelineStageFlags,
                dst_stage: vk::PipelineStageFlags,
                barrier: &vk::ImageMemoryBarrier<'_>,
            ) {
                (**self).cmd_pipeline_barrier(command_buffer, src_stage, dst_stage, barrier)
            }
            fn cmd_blit_image(
                &self,
                command_buffer: vk::CommandBuffer,
                src: vk::Image,
                dst: vk::Image,
                region: &vk::ImageBlit,
                filter: vk::Filter,
            ) {
                (**self).cmd_blit_image(command_buffer, src, dst, region, filter)
            }
            fn cmd_copy_image(
                &self,
                command_buffer: vk::CommandBuffer,
                src: vk::Image,
                dst: vk::Image,
                region: &vk::ImageCopy,
            ) {
                (**self).cmd_copy_image(command_buffer, src, dst, region)
            }
        }
    )*};
}

// Sessions own their device; a shared one is passed as a reference or `Arc`.
forward_vulkan_device!(&T, Arc<T>);

/// Index of the first memory type allowed by `type_bits` whose flags contain
/// `required`.
pub fn find_memory_type_index(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, _)| i as u32)
}

/// [`VulkanDevice`] over an application-owned instance and device.
pub struct AshDevice {
    _entry: Option<ash::Entry>,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
}

impl AshDevice {
    /// Wraps already loaded `ash` objects.
    pub fn new(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Self {
        Self {
            _entry: None,
            instance,
            physical_device,
            device,
        }
    }

    /// Loads the system Vulkan loader and function tables for raw handles
    /// owned by another component.
    ///
    /// # Safety
    /// The handles must be valid, belong together, and outlive the returned
    /// value.
    pub unsafe fn from_raw(
        instance: vk::Instance,
        physical_device: vk::PhysicalDevice,
        device: vk::Device,
    ) -> Result<Self, BridgeError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| BridgeError::Loader(e.to_string()))?;
        let instance = unsafe { ash::Instance::load(entry.static_fn(), instance) };
        let device = unsafe { ash::Device::load(instance.fp_v1_0(), device) };
        Ok(Self {
            _entry: Some(entry),
            instance,
            physical_device,
            device,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }
}

impl VulkanDevice for AshDevice {
    fn supports_device_extension(&self, name: &CStr) -> bool {
        let properties = match unsafe {
            self.instance
                .enumerate_device_extension_properties(self.physical_device)
        } {
            Ok(p) => p,
            Err(_) => return false,
        };
        properties.iter().any(|prop| {
            let ext = unsafe { CStr::from_ptr(prop.extension_name.as_ptr()) };
            ext == name
        })
    }

    fn external_image_properties(
        &self,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> Result<vk::ExternalMemoryProperties, vk::Result> {
        let mut external_info =
            vk::PhysicalDeviceExternalImageFormatInfo::default().handle_type(handle_type);
        let format_info = vk::PhysicalDeviceImageFormatInfo2::default()
            .format(format)
            .ty(vk::ImageType::TYPE_2D)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .push_next(&mut external_info);

        let mut external_props = vk::ExternalImageFormatProperties::default();
        let mut props = vk::ImageFormatProperties2::default().push_next(&mut external_props);

        unsafe {
            self.instance.get_physical_device_image_format_properties2(
                self.physical_device,
                &format_info,
                &mut props,
            )
        }?;
        Ok(external_props.external_memory_properties)
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        }
    }

    fn create_image(&self, desc: &ExternalImageDesc) -> Result<vk::Image, vk::Result> {
        let mut external_memory_info =
            vk::ExternalMemoryImageCreateInfo::default().handle_types(desc.handle_type);

        let image_info = vk::ImageCreateInfo::default()
            .push_next(&mut external_memory_info)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        unsafe { self.device.create_image(&image_info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn import_memory(
        &self,
        image: vk::Image,
        import: &MemoryImport,
    ) -> Result<vk::DeviceMemory, vk::Result> {
        let mut import_info = vk::ImportMemoryWin32HandleInfoKHR::default()
            .handle_type(import.handle_type)
            .handle(import.handle.as_raw());
        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().image(image);

        let mut alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(import.allocation_size)
            .memory_type_index(import.memory_type_index)
            .push_next(&mut import_info);
        if import.strategy == AllocationStrategy::Dedicated {
            alloc_info = alloc_info.push_next(&mut dedicated_info);
        }

        unsafe { self.device.allocate_memory(&alloc_info, None) }
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
    ) -> Result<(), vk::Result> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            )
        };
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    ) {
        unsafe {
            self.device.cmd_blit_image(
                command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
                filter,
            )
        };
    }

    fn cmd_copy_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: &vk::ImageCopy,
    ) {
        unsafe {
            self.device.cmd_copy_image(
                command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(region),
            )
        };
    }
}
