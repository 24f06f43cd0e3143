//! Staged transfers into device-local memory.
//!
//! Uploads go through a temporary host-visible staging buffer and a one-time
//! command buffer, then block until the copy completes. One synchronous
//! round-trip per upload: fine for load-time resources, not for streaming.

use crate::barrier::{color_subresource_range, transition_image_layout};
use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuTexture, MemoryAllocator};
use ash::vk;
use std::sync::Arc;

/// Index element types accepted by [`TransferEngine::upload_index_buffer`].
pub trait IndexElement: bytemuck::Pod {
    /// The matching `vk::IndexType`.
    const INDEX_TYPE: vk::IndexType;
}

impl IndexElement for u16 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;
}

impl IndexElement for u32 {
    const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT32;
}

/// A device-local vertex buffer.
pub struct VertexBuffer {
    pub buffer: GpuBuffer,
    pub vertex_count: u32,
}

/// A device-local index buffer.
pub struct IndexBuffer {
    pub buffer: GpuBuffer,
    pub index_count: u32,
    pub index_type: vk::IndexType,
}

/// A host-visible, persistently mapped uniform buffer.
pub struct UniformBuffer {
    pub buffer: GpuBuffer,
}

impl UniformBuffer {
    /// Overwrite the buffer contents with one value.
    pub fn update<T: bytemuck::Pod>(&self, value: &T) -> Result<()> {
        self.buffer.write(value)
    }
}

/// Uploads CPU data into GPU-local memory via staging buffers.
pub struct TransferEngine {
    device: Arc<ash::Device>,
    queue: vk::Queue,
    pool: CommandPool,
}

impl TransferEngine {
    /// Create a transfer engine with its own transient command pool.
    pub fn new(context: &DeviceContext) -> Result<Self> {
        let pool = unsafe {
            CommandPool::new(
                context.device(),
                context.graphics_queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )
        }?;
        Ok(Self {
            device: context.device_arc(),
            queue: context.graphics_queue(),
            pool,
        })
    }

    /// Upload bytes into a new device-local buffer.
    ///
    /// On return the destination is fully populated and the staging buffer
    /// has been reclaimed.
    pub fn upload_buffer(
        &self,
        allocator: &MemoryAllocator,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let size = data.len() as vk::DeviceSize;
        if size == 0 {
            return Err(GpuError::InvalidState("upload of empty buffer".to_string()));
        }

        let mut staging = self.create_staging(allocator, size)?;
        if let Err(e) = staging.write_bytes(0, data) {
            unsafe { allocator.destroy_buffer(&mut staging) };
            return Err(e);
        }

        let dst = allocator.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        );
        let dst = match dst {
            Ok(dst) => dst,
            Err(e) => {
                unsafe { allocator.destroy_buffer(&mut staging) };
                return Err(e);
            }
        };

        let copied = unsafe {
            execute_single_time_commands(&self.device, &self.pool, self.queue, |cmd| {
                let region = vk::BufferCopy::default().size(size);
                self.device
                    .cmd_copy_buffer(cmd, staging.buffer, dst.buffer, &[region]);
                Ok(())
            })
        };

        unsafe { allocator.destroy_buffer(&mut staging) };

        match copied {
            Ok(()) => Ok(dst),
            Err(e) => {
                let mut dst = dst;
                unsafe { allocator.destroy_buffer(&mut dst) };
                Err(e)
            }
        }
    }

    /// Upload vertices into a new device-local vertex buffer.
    pub fn upload_vertex_buffer<T: bytemuck::Pod>(
        &self,
        allocator: &MemoryAllocator,
        vertices: &[T],
    ) -> Result<VertexBuffer> {
        let buffer = self.upload_buffer(
            allocator,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        Ok(VertexBuffer {
            buffer,
            vertex_count: vertices.len() as u32,
        })
    }

    /// Upload indices into a new device-local index buffer.
    pub fn upload_index_buffer<I: IndexElement>(
        &self,
        allocator: &MemoryAllocator,
        indices: &[I],
    ) -> Result<IndexBuffer> {
        let buffer = self.upload_buffer(
            allocator,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        Ok(IndexBuffer {
            buffer,
            index_count: indices.len() as u32,
            index_type: I::INDEX_TYPE,
        })
    }

    /// Create a host-visible uniform buffer, persistently mapped for
    /// per-frame updates, initialized with `value`.
    pub fn create_uniform_buffer<T: bytemuck::Pod>(
        &self,
        allocator: &MemoryAllocator,
        value: &T,
    ) -> Result<UniformBuffer> {
        let buffer = allocator.create_mapped_buffer(
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.write(value)?;
        Ok(UniformBuffer { buffer })
    }

    /// Read a device-local buffer back into host memory.
    ///
    /// The buffer must have been created with `TRANSFER_SRC` usage.
    pub fn read_back_buffer(
        &self,
        allocator: &MemoryAllocator,
        buffer: &GpuBuffer,
    ) -> Result<Vec<u8>> {
        let mut staging = allocator.create_mapped_buffer(
            buffer.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        let copied = unsafe {
            execute_single_time_commands(&self.device, &self.pool, self.queue, |cmd| {
                let region = vk::BufferCopy::default().size(buffer.size);
                self.device
                    .cmd_copy_buffer(cmd, buffer.buffer, staging.buffer, &[region]);
                Ok(())
            })
        };

        let bytes = copied.and_then(|()| {
            let ptr = staging
                .mapped_ptr()
                .ok_or_else(|| GpuError::InvalidState("staging buffer not mapped".to_string()))?;
            let mut out = vec![0u8; buffer.size as usize];
            unsafe {
                std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), out.len());
            }
            Ok(out)
        });

        unsafe { allocator.destroy_buffer(&mut staging) };
        bytes
    }

    /// Create an RGBA8 texture from a flat row-major pixel buffer.
    ///
    /// The image is uploaded through staging with layout transitions
    /// `UNDEFINED -> TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`, so it
    /// is sampleable when this returns.
    pub fn create_texture(
        &self,
        allocator: &MemoryAllocator,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<GpuTexture> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GpuError::InvalidState(format!(
                "texture data is {} bytes, expected {expected} for {width}x{height} RGBA",
                pixels.len()
            )));
        }

        let format = vk::Format::R8G8B8A8_UNORM;
        let (image, memory) = allocator.create_image(
            width,
            height,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let uploaded = self.upload_to_image(allocator, image, pixels, width, height);
        if let Err(e) = uploaded {
            unsafe { allocator.destroy_image(image, memory) };
            return Err(e);
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(color_subresource_range());

        let view = unsafe {
            match self.device.create_image_view(&view_info, None) {
                Ok(view) => view,
                Err(e) => {
                    allocator.destroy_image(image, memory);
                    return Err(GpuError::from(e));
                }
            }
        };

        Ok(GpuTexture {
            image,
            view,
            memory,
            width,
            height,
        })
    }

    /// Upload pixels into an existing image via staging, transitioning it
    /// into `SHADER_READ_ONLY_OPTIMAL`.
    pub fn upload_to_image(
        &self,
        allocator: &MemoryAllocator,
        image: vk::Image,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<()> {
        let size = pixels.len() as vk::DeviceSize;
        let mut staging = self.create_staging(allocator, size)?;
        if let Err(e) = staging.write_bytes(0, pixels) {
            unsafe { allocator.destroy_buffer(&mut staging) };
            return Err(e);
        }

        let result = unsafe {
            execute_single_time_commands(&self.device, &self.pool, self.queue, |cmd| {
                transition_image_layout(
                    &self.device,
                    cmd,
                    image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    color_subresource_range(),
                )?;

                let region = vk::BufferImageCopy::default()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_offset(vk::Offset3D::default())
                    .image_extent(vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    });

                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                transition_image_layout(
                    &self.device,
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    color_subresource_range(),
                )
            })
        };

        unsafe { allocator.destroy_buffer(&mut staging) };
        result
    }

    /// Destroy the engine's command pool.
    ///
    /// # Safety
    /// The device must be valid and no transfer may be in flight (transfers
    /// are synchronous, so any completed call satisfies this).
    pub unsafe fn destroy(&self) {
        self.pool.destroy(&self.device);
    }

    fn create_staging(
        &self,
        allocator: &MemoryAllocator,
        size: vk::DeviceSize,
    ) -> Result<GpuBuffer> {
        allocator.create_mapped_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }
}
