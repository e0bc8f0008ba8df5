//! Software stand-ins for both GPU APIs.
//!
//! A [`MockHost`] owns shared textures keyed by share handle. Any number of
//! [`MockGpu`]s attached to it play separate processes: images bound to
//! imported memory read and write the host texture's pixels directly.
//! Recorded commands only move pixels when [`MockGpu::execute_recorded`] runs.

use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use surface_share::{HostFormat, ShareHandle};

use crate::device::{ExternalImageDesc, MemoryImport, VulkanDevice};
use crate::error::BridgeError;
use crate::format::to_vulkan_format;
use crate::host::HostDevice;
use crate::import::AllocationStrategy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Barrier {
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    Blit {
        src: vk::Image,
        dst: vk::Image,
        src_extent: (u32, u32),
        dst_extent: (u32, u32),
        filter: vk::Filter,
    },
    Copy {
        src: vk::Image,
        dst: vk::Image,
        extent: (u32, u32),
    },
}

struct HostTexture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

struct HostState {
    next_handle: u64,
    textures: HashMap<u64, HostTexture>,
    fail_create: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, PartialEq, Eq)]
pub struct MockTexture(u64);

#[derive(Clone)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                next_handle: 0x100,
                textures: HashMap::new(),
                fail_create: false,
            })),
        }
    }

    pub fn live_textures(&self) -> usize {
        lock(&self.state).textures.len()
    }

    pub fn texture_size(&self, handle: ShareHandle) -> Option<(u32, u32)> {
        lock(&self.state)
            .textures
            .get(&handle.0)
            .map(|t| (t.width, t.height))
    }

    pub fn texture_pixels(&self, handle: ShareHandle) -> Option<Vec<u8>> {
        lock(&self.state)
            .textures
            .get(&handle.0)
            .map(|t| t.pixels.clone())
    }

    pub fn fail_create(&self, fail: bool) {
        lock(&self.state).fail_create = fail;
    }
}

impl HostDevice for MockHost {
    type Texture = MockTexture;

    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: HostFormat,
    ) -> Result<(MockTexture, ShareHandle), BridgeError> {
        let mut state = lock(&self.state);
        if state.fail_create {
            return Err(BridgeError::Allocation("device rejected texture".into()));
        }
        let handle = state.next_handle;
        state.next_handle += 0x10;
        let bpp = bytes_per_pixel(to_vulkan_format(format));
        state.textures.insert(
            handle,
            HostTexture {
                width,
                height,
                pixels: vec![0; width as usize * height as usize * bpp],
            },
        );
        Ok((MockTexture(handle), ShareHandle(handle)))
    }

    fn release_texture(&self, texture: MockTexture) {
        lock(&self.state).textures.remove(&texture.0);
    }
}

struct MockImage {
    width: u32,
    height: u32,
    format: vk::Format,
    caller_owned: bool,
    pixels: Vec<u8>,
    memory: Option<u64>,
}

struct MockMemory {
    handle: ShareHandle,
}

struct GpuState {
    next_id: u64,
    images: HashMap<u64, MockImage>,
    memories: HashMap<u64, MockMemory>,
    recorded: Vec<Recorded>,
    external_features: vk::ExternalMemoryFeatureFlags,
    handle_type_supported: bool,
    memory_types: Vec<vk::MemoryPropertyFlags>,
    fail_bind: bool,
    blit_supported: bool,
    missing_extension: Option<&'static CStr>,
    last_import_strategy: Option<AllocationStrategy>,
    wait_idle_calls: usize,
}

fn bytes_per_pixel(format: vk::Format) -> usize {
    match format {
        vk::Format::R16G16B16A16_UNORM | vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

/// A device with every capability the bridge needs until told otherwise.
pub struct MockGpu {
    state: Mutex<GpuState>,
    host: Arc<Mutex<HostState>>,
}

impl MockGpu {
    /// A device with its own, otherwise unused, host.
    pub fn new() -> Self {
        Self::attached(&MockHost::new())
    }

    /// A device that sees the textures of `host`.
    pub fn attached(host: &MockHost) -> Self {
        Self {
            state: Mutex::new(GpuState {
                next_id: 1,
                images: HashMap::new(),
                memories: HashMap::new(),
                recorded: Vec::new(),
                external_features: vk::ExternalMemoryFeatureFlags::IMPORTABLE,
                handle_type_supported: true,
                memory_types: vec![
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                ],
                fail_bind: false,
                blit_supported: true,
                missing_extension: None,
                last_import_strategy: None,
                wait_idle_calls: 0,
            }),
            host: host.state.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, GpuState> {
        lock(&self.state)
    }

    pub fn set_external_features(&self, features: vk::ExternalMemoryFeatureFlags) {
        self.state().external_features = features;
    }

    pub fn set_handle_type_supported(&self, supported: bool) {
        self.state().handle_type_supported = supported;
    }

    pub fn set_memory_types(&self, types: &[vk::MemoryPropertyFlags]) {
        self.state().memory_types = types.to_vec();
    }

    pub fn fail_bind(&self, fail: bool) {
        self.state().fail_bind = fail;
    }

    pub fn set_blit_supported(&self, supported: bool) {
        self.state().blit_supported = supported;
    }

    pub fn set_missing_extension(&self, name: Option<&'static CStr>) {
        self.state().missing_extension = name;
    }

    /// Images created through [`VulkanDevice::create_image`] and not yet
    /// destroyed. Caller-side test images are not counted.
    pub fn live_images(&self) -> usize {
        self.state()
            .images
            .values()
            .filter(|i| !i.caller_owned)
            .count()
    }

    pub fn live_memories(&self) -> usize {
        self.state().memories.len()
    }

    pub fn image_exists(&self, image: vk::Image) -> bool {
        self.state().images.contains_key(&image.as_raw())
    }

    pub fn is_bound(&self, image: vk::Image, memory: vk::DeviceMemory) -> bool {
        self.state()
            .images
            .get(&image.as_raw())
            .is_some_and(|i| i.memory == Some(memory.as_raw()))
    }

    pub fn imported_handle(&self, memory: vk::DeviceMemory) -> Option<ShareHandle> {
        self.state().memories.get(&memory.as_raw()).map(|m| m.handle)
    }

    pub fn last_import_strategy(&self) -> Option<AllocationStrategy> {
        self.state().last_import_strategy
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.state().wait_idle_calls
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.state().recorded.clone()
    }

    pub fn clear_recorded(&self) {
        self.state().recorded.clear();
    }

    /// A caller-owned optimal image with zeroed private pixels.
    pub fn create_test_image(&self, width: u32, height: u32, format: vk::Format) -> vk::Image {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.images.insert(
            id,
            MockImage {
                width,
                height,
                format,
                caller_owned: true,
                pixels: vec![0; width as usize * height as usize * bytes_per_pixel(format)],
                memory: None,
            },
        );
        vk::Image::from_raw(id)
    }

    pub fn write_pixels(&self, image: vk::Image, pixels: &[u8]) {
        let mut state = self.state();
        let mut host = lock(&self.host);
        store_pixels(&mut state, &mut host, image.as_raw(), pixels);
    }

    /// Current pixels of `image`, read through imported memory when bound.
    pub fn read_pixels(&self, image: vk::Image) -> Option<Vec<u8>> {
        let state = self.state();
        let host = lock(&self.host);
        load_pixels(&state, &host, image.as_raw())
    }

    /// Runs and clears the recorded commands against the pixel store.
    pub fn execute_recorded(&self) {
        let mut state = self.state();
        let mut host = lock(&self.host);
        let commands = std::mem::take(&mut state.recorded);
        for command in commands {
            match command {
                Recorded::Barrier { .. } => {}
                Recorded::Copy { src, dst, extent } => {
                    transfer_pixels(&mut state, &mut host, src, dst, extent, extent);
                }
                Recorded::Blit {
                    src,
                    dst,
                    src_extent,
                    dst_extent,
                    ..
                } => {
                    transfer_pixels(&mut state, &mut host, src, dst, src_extent, dst_extent);
                }
            }
        }
    }
}

fn load_pixels(state: &GpuState, host: &HostState, raw: u64) -> Option<Vec<u8>> {
    let image = state.images.get(&raw)?;
    match image.memory {
        Some(memory) => {
            let handle = state.memories.get(&memory)?.handle;
            host.textures.get(&handle.0).map(|t| t.pixels.clone())
        }
        None => Some(image.pixels.clone()),
    }
}

fn store_pixels(state: &mut GpuState, host: &mut HostState, raw: u64, pixels: &[u8]) {
    let Some(image) = state.images.get_mut(&raw) else {
        return;
    };
    let target = match image.memory {
        Some(memory) => {
            let Some(handle) = state.memories.get(&memory).map(|m| m.handle) else {
                return;
            };
            match host.textures.get_mut(&handle.0) {
                Some(texture) => &mut texture.pixels,
                None => return,
            }
        }
        None => &mut image.pixels,
    };
    if target.len() == pixels.len() {
        target.copy_from_slice(pixels);
    }
}

/// Nearest-neighbour scale from the `src_extent` corner of `src` into the
/// `dst_extent` corner of `dst`. Formats of different sizes are left alone.
fn transfer_pixels(
    state: &mut GpuState,
    host: &mut HostState,
    src: vk::Image,
    dst: vk::Image,
    src_extent: (u32, u32),
    dst_extent: (u32, u32),
) {
    let (Some(src_image), Some(dst_image)) = (
        state.images.get(&src.as_raw()),
        state.images.get(&dst.as_raw()),
    ) else {
        return;
    };
    let bpp = bytes_per_pixel(src_image.format);
    if bpp != bytes_per_pixel(dst_image.format) || dst_extent.0 == 0 || dst_extent.1 == 0 {
        return;
    }
    let src_stride = src_image.width as usize * bpp;
    let dst_stride = dst_image.width as usize * bpp;
    let (Some(source), Some(mut target)) = (
        load_pixels(state, host, src.as_raw()),
        load_pixels(state, host, dst.as_raw()),
    ) else {
        return;
    };

    for y in 0..dst_extent.1 as usize {
        let sy = y * src_extent.1 as usize / dst_extent.1 as usize;
        for x in 0..dst_extent.0 as usize {
            let sx = x * src_extent.0 as usize / dst_extent.0 as usize;
            let from = sy * src_stride + sx * bpp;
            let to = y * dst_stride + x * bpp;
            if let (Some(pixel), Some(slot)) =
                (source.get(from..from + bpp), target.get_mut(to..to + bpp))
            {
                slot.copy_from_slice(pixel);
            }
        }
    }
    store_pixels(state, host, dst.as_raw(), &target);
}

impl VulkanDevice for MockGpu {
    fn supports_device_extension(&self, name: &CStr) -> bool {
        self.state().missing_extension != Some(name)
    }

    fn external_image_properties(
        &self,
        _format: vk::Format,
        _usage: vk::ImageUsageFlags,
        handle_type: vk::ExternalMemoryHandleTypeFlags,
    ) -> Result<vk::ExternalMemoryProperties, vk::Result> {
        let state = self.state();
        if !state.handle_type_supported {
            return Err(vk::Result::ERROR_FORMAT_NOT_SUPPORTED);
        }
        Ok(vk::ExternalMemoryProperties {
            external_memory_features: state.external_features,
            export_from_imported_handle_types: vk::ExternalMemoryHandleTypeFlags::empty(),
            compatible_handle_types: handle_type,
        })
    }

    fn format_properties(&self, _format: vk::Format) -> vk::FormatProperties {
        let mut features =
            vk::FormatFeatureFlags::TRANSFER_SRC | vk::FormatFeatureFlags::TRANSFER_DST;
        if self.state().blit_supported {
            features |= vk::FormatFeatureFlags::BLIT_SRC | vk::FormatFeatureFlags::BLIT_DST;
        }
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let state = self.state();
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: state.memory_types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(&state.memory_types) {
            slot.property_flags = *flags;
        }
        props
    }

    fn create_image(&self, desc: &ExternalImageDesc) -> Result<vk::Image, vk::Result> {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.images.insert(
            id,
            MockImage {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                caller_owned: false,
                pixels: Vec::new(),
                memory: None,
            },
        );
        Ok(vk::Image::from_raw(id))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let state = self.state();
        let count = state.memory_types.len() as u32;
        let size = state.images.get(&image.as_raw()).map_or(0, |i| {
            u64::from(i.width) * u64::from(i.height) * bytes_per_pixel(i.format) as u64
        });
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: if count == 0 { 0 } else { u32::MAX >> (32 - count) },
        }
    }

    fn import_memory(
        &self,
        _image: vk::Image,
        import: &MemoryImport,
    ) -> Result<vk::DeviceMemory, vk::Result> {
        let mut state = self.state();
        let id = state.next_id;
        state.next_id += 1;
        state.memories.insert(
            id,
            MockMemory {
                handle: import.handle,
            },
        );
        state.last_import_strategy = Some(import.strategy);
        Ok(vk::DeviceMemory::from_raw(id))
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
    ) -> Result<(), vk::Result> {
        let mut state = self.state();
        if state.fail_bind {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let image = state
            .images
            .get_mut(&image.as_raw())
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        image.memory = Some(memory.as_raw());
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        self.state().images.remove(&image.as_raw());
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.state().memories.remove(&memory.as_raw());
    }

    fn wait_idle(&self) -> Result<(), vk::Result> {
        self.state().wait_idle_calls += 1;
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        _command_buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) {
        self.state().recorded.push(Recorded::Barrier {
            image: barrier.image,
            old: barrier.old_layout,
            new: barrier.new_layout,
        });
    }

    fn cmd_blit_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: &vk::ImageBlit,
        filter: vk::Filter,
    ) {
        let extent = |offsets: &[vk::Offset3D; 2]| {
            (
                (offsets[1].x - offsets[0].x) as u32,
                (offsets[1].y - offsets[0].y) as u32,
            )
        };
        self.state().recorded.push(Recorded::Blit {
            src,
            dst,
            src_extent: extent(&region.src_offsets),
            dst_extent: extent(&region.dst_offsets),
            filter,
        });
    }

    fn cmd_copy_image(
        &self,
        _command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Image,
        region: &vk::ImageCopy,
    ) {
        self.state().recorded.push(Recorded::Copy {
            src,
            dst,
            extent: (region.extent.width, region.extent.height),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_image_reads_host_texture() {
        let host = MockHost::new();
        let (texture, handle) = host
            .create_shared_texture(2, 2, HostFormat::B8G8R8A8_UNORM)
            .unwrap();
        let gpu = MockGpu::attached(&host);
        let image = gpu
            .create_image(&ExternalImageDesc {
                format: vk::Format::B8G8R8A8_UNORM,
                width: 2,
                height: 2,
                usage: vk::ImageUsageFlags::TRANSFER_DST,
                handle_type: vk::ExternalMemoryHandleTypeFlags::D3D11_TEXTURE_KMT,
            })
            .unwrap();
        let memory = gpu
            .import_memory(
                image,
                &MemoryImport {
                    handle,
                    handle_type: vk::ExternalMemoryHandleTypeFlags::D3D11_TEXTURE_KMT,
                    allocation_size: 16,
                    memory_type_index: 1,
                    strategy: AllocationStrategy::Plain,
                },
            )
            .unwrap();
        gpu.bind_image_memory(image, memory).unwrap();

        gpu.write_pixels(image, &[9; 16]);
        assert_eq!(host.texture_pixels(handle), Some(vec![9; 16]));

        host.release_texture(texture);
        assert_eq!(gpu.read_pixels(image), None);
    }

    #[test]
    fn test_blit_scales_nearest() {
        let gpu = MockGpu::new();
        let src = gpu.create_test_image(1, 1, vk::Format::R8G8B8A8_UNORM);
        let dst = gpu.create_test_image(2, 2, vk::Format::R8G8B8A8_UNORM);
        gpu.write_pixels(src, &[1, 2, 3, 4]);
        gpu.cmd_blit_image(
            vk::CommandBuffer::null(),
            src,
            dst,
            &vk::ImageBlit {
                src_offsets: [vk::Offset3D::default(), vk::Offset3D { x: 1, y: 1, z: 1 }],
                dst_offsets: [vk::Offset3D::default(), vk::Offset3D { x: 2, y: 2, z: 1 }],
                ..Default::default()
            },
            vk::Filter::LINEAR,
        );
        gpu.execute_recorded();
        assert_eq!(gpu.read_pixels(dst), Some([1, 2, 3, 4].repeat(4)));
        assert!(gpu.recorded().is_empty());
    }
}
