//! Explicit GPU memory management.
//!
//! Every buffer and image gets its own dedicated `VkDeviceMemory` allocation
//! resolved through the physical device's memory type table. There is no
//! sub-allocation or pooling; this holds up for a small number of long-lived
//! resources, not for high buffer churn.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use ash::vk;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Scan the memory type table for the first index whose bit is set in
/// `type_bits` and whose property flags are a superset of `required`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        let type_matches = type_bits & (1 << i) != 0;
        let props = memory_properties.memory_types[i as usize].property_flags;
        type_matches && props.contains(required)
    })
}

/// Allocator for dedicated buffer and image memory.
///
/// Keeps a live-allocation count so shutdown and tests can verify that every
/// allocation was returned.
pub struct MemoryAllocator {
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    live_allocations: AtomicUsize,
}

impl MemoryAllocator {
    /// Create an allocator for the given context.
    pub fn new(context: &DeviceContext) -> Self {
        Self {
            device: context.device_arc(),
            memory_properties: *context.memory_properties(),
            live_allocations: AtomicUsize::new(0),
        }
    }

    /// Resolve a memory type index for the given requirements.
    pub fn memory_type_index(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_bits, required).ok_or(
            GpuError::NoSuitableMemoryType {
                type_bits,
                required,
            },
        )
    }

    /// Number of device memory allocations currently alive.
    pub fn allocation_count(&self) -> usize {
        self.live_allocations.load(Ordering::Relaxed)
    }

    /// Create a buffer with its own memory allocation, bound at offset 0.
    ///
    /// Host-visible buffers are left unmapped; use [`Self::create_mapped_buffer`]
    /// for persistently mapped memory.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let (buffer, memory) = self.allocate_buffer(size, usage, properties)?;
        Ok(GpuBuffer {
            buffer,
            memory,
            size,
            mapped: None,
        })
    }

    /// Create a host-visible buffer and leave it persistently mapped.
    pub fn create_mapped_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        debug_assert!(properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        let (buffer, memory) = self.allocate_buffer(size, usage, properties)?;
        let mapped = unsafe {
            self.device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        };
        let mapped = match mapped {
            Ok(ptr) => ptr.cast::<u8>(),
            Err(e) => {
                unsafe {
                    self.device.destroy_buffer(buffer, None);
                    self.device.free_memory(memory, None);
                }
                self.live_allocations.fetch_sub(1, Ordering::Relaxed);
                return Err(GpuError::AllocationFailed(format!("map failed: {e}")));
            }
        };
        Ok(GpuBuffer {
            buffer,
            memory,
            size,
            mapped: Some(mapped),
        })
    }

    fn allocate_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type = match self.memory_type_index(requirements.memory_type_bits, properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = unsafe {
            match self.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(GpuError::from(e));
                }
            }
        };

        unsafe {
            if let Err(e) = self.device.bind_buffer_memory(buffer, memory, 0) {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
                return Err(GpuError::from(e));
            }
        }

        self.live_allocations.fetch_add(1, Ordering::Relaxed);
        Ok((buffer, memory))
    }

    /// Create a 2D image with its own memory allocation.
    pub fn create_image(
        &self,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None)? };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory_type = match self.memory_type_index(requirements.memory_type_bits, properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = unsafe {
            match self.device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(GpuError::from(e));
                }
            }
        };

        unsafe {
            if let Err(e) = self.device.bind_image_memory(image, memory, 0) {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
                return Err(GpuError::from(e));
            }
        }

        self.live_allocations.fetch_add(1, Ordering::Relaxed);
        Ok((image, memory))
    }

    /// Destroy a buffer and free its memory.
    ///
    /// # Safety
    /// No in-flight GPU work may reference the buffer; callers wait for
    /// device idle (or the frame fence) first.
    pub unsafe fn destroy_buffer(&self, buffer: &mut GpuBuffer) {
        if buffer.mapped.take().is_some() {
            self.device.unmap_memory(buffer.memory);
        }
        self.device.destroy_buffer(buffer.buffer, None);
        self.device.free_memory(buffer.memory, None);
        buffer.buffer = vk::Buffer::null();
        buffer.memory = vk::DeviceMemory::null();
        self.live_allocations.fetch_sub(1, Ordering::Relaxed);
    }

    /// Destroy an image created by this allocator and free its memory.
    ///
    /// # Safety
    /// No in-flight GPU work may reference the image.
    pub unsafe fn destroy_image(&self, image: vk::Image, memory: vk::DeviceMemory) {
        self.device.destroy_image(image, None);
        self.device.free_memory(memory, None);
        self.live_allocations.fetch_sub(1, Ordering::Relaxed);
    }

    /// Destroy a texture: view, image, and memory.
    ///
    /// # Safety
    /// No in-flight GPU work may reference the texture.
    pub unsafe fn destroy_texture(&self, texture: &mut GpuTexture) {
        self.device.destroy_image_view(texture.view, None);
        self.destroy_image(texture.image, texture.memory);
        texture.image = vk::Image::null();
        texture.view = vk::ImageView::null();
        texture.memory = vk::DeviceMemory::null();
    }
}

/// A buffer with its dedicated memory allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: Option<*mut u8>,
}

impl GpuBuffer {
    /// Pointer to persistently mapped memory, if this buffer was created
    /// mapped.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped
    }

    /// Write raw bytes at the given offset through the persistent mapping.
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let ptr = self
            .mapped
            .ok_or_else(|| GpuError::InvalidState("buffer is not mapped".to_string()))?;

        let end = offset
            .checked_add(data.len() as vk::DeviceSize)
            .ok_or_else(|| GpuError::InvalidState("offset overflow".to_string()))?;
        if end > self.size {
            return Err(GpuError::InvalidState(
                "data range exceeds buffer size".to_string(),
            ));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Write one plain-old-data value at offset 0.
    pub fn write<T: bytemuck::Pod>(&self, value: &T) -> Result<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }

    /// Write a slice of plain-old-data values at offset 0.
    pub fn write_slice<T: bytemuck::Pod>(&self, values: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(values))
    }
}

/// A sampled texture: image, view, memory, and dimensions.
///
/// Created fully resident in `SHADER_READ_ONLY_OPTIMAL` layout before first
/// use; there is no streaming or mip chain.
pub struct GpuTexture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub width: u32,
    pub height: u32,
}

/// Create a linear-filtering, repeat-addressing sampler.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_default_sampler(device: &ash::Device) -> Result<vk::Sampler> {
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .max_anisotropy(1.0);

    let sampler = device.create_sampler(&create_info, None)?;
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(types: &[(vk::MemoryPropertyFlags, u32)]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &(flags, heap)) in types.iter().enumerate() {
            props.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: heap,
            };
        }
        props
    }

    #[test]
    fn picks_first_matching_type() {
        let props = table(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                1,
            ),
            (
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                1,
            ),
        ]);

        let index = find_memory_type(
            &props,
            0b111,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, Some(1));
    }

    #[test]
    fn returned_index_always_has_its_bit_set() {
        let props = table(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
        ]);

        // Type 0 satisfies the properties but is masked out
        let index = find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn property_flags_must_be_superset() {
        let props = table(&[(vk::MemoryPropertyFlags::HOST_VISIBLE, 0)]);

        // HOST_VISIBLE alone is not enough when coherent is also required
        let index = find_memory_type(
            &props,
            0b1,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert_eq!(index, None);
    }

    #[test]
    fn no_match_reports_failure_not_an_arbitrary_index() {
        let props = table(&[
            (vk::MemoryPropertyFlags::DEVICE_LOCAL, 0),
            (vk::MemoryPropertyFlags::HOST_VISIBLE, 1),
        ]);

        // Mask selects only type 0, but type 0 is not host-visible
        assert_eq!(
            find_memory_type(&props, 0b01, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
        // Empty mask never matches
        assert_eq!(
            find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()),
            None
        );
    }
}
