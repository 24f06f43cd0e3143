//! Descriptor set layouts and pool-backed set allocation.
//!
//! Pool sizing is derived from the declared layouts instead of guessed at
//! call sites: a layout built here carries its binding metadata, and the
//! binding factory sums those into pool sizes.

use crate::error::Result;
use ash::vk;

/// A descriptor set layout together with the bindings it declares.
pub struct DescriptorLayout {
    handle: vk::DescriptorSetLayout,
    bindings: Vec<(vk::DescriptorType, u32)>,
}

impl DescriptorLayout {
    /// The Vulkan layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Declared (type, count) pairs.
    pub fn bindings(&self) -> &[(vk::DescriptorType, u32)] {
        &self.bindings
    }

    /// Destroy the layout.
    ///
    /// # Safety
    /// The device must be valid and no pipeline may still use the layout.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_set_layout(self.handle, None);
    }
}

/// Builder for descriptor set layouts.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a combined image sampler binding.
    pub fn combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<DescriptorLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);
        let handle = device.create_descriptor_set_layout(&layout_info, None)?;

        let bindings = self
            .bindings
            .iter()
            .map(|b| (b.descriptor_type, b.descriptor_count))
            .collect();

        Ok(DescriptorLayout { handle, bindings })
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sum per-type descriptor counts across layouts, scaled by `max_sets`.
pub fn pool_sizes_for_layouts(
    layouts: &[&DescriptorLayout],
    max_sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for layout in layouts {
        for &(descriptor_type, count) in layout.bindings() {
            match sizes.iter_mut().find(|s| s.ty == descriptor_type) {
                Some(size) => size.descriptor_count += count * max_sets,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: descriptor_type,
                    descriptor_count: count * max_sets,
                }),
            }
        }
    }
    sizes
}

/// Owns a descriptor pool sized for a known set of layouts.
pub struct BindingFactory {
    pool: vk::DescriptorPool,
}

impl BindingFactory {
    /// Create a pool sized for `max_sets` sets of each given layout.
    ///
    /// # Safety
    /// The device and layouts must be valid.
    pub unsafe fn for_layouts(
        device: &ash::Device,
        layouts: &[&DescriptorLayout],
        max_sets: u32,
    ) -> Result<Self> {
        let pool_sizes = pool_sizes_for_layouts(layouts, max_sets);

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets * layouts.len() as u32)
            .pool_sizes(&pool_sizes);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Allocate `count` sets of the given layout.
    ///
    /// # Safety
    /// The device must be valid and the layout must be one the pool was
    /// sized for.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        layout: &DescriptorLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout.handle(); count];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets)
    }

    /// Destroy the pool and every set allocated from it.
    ///
    /// # Safety
    /// The device must be valid and no set may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device, set, and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: vk::DeviceSize,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .buffer_info(std::slice::from_ref(&buffer_info));

    device.update_descriptor_sets(&[write], &[]);
}

/// Write a combined image sampler descriptor.
///
/// # Safety
/// Device, set, view, and sampler must be valid; the image must be in
/// `SHADER_READ_ONLY_OPTIMAL` layout when sampled.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(view)
        .sampler(sampler)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    device.update_descriptor_sets(&[write], &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(bindings: &[(vk::DescriptorType, u32)]) -> DescriptorLayout {
        DescriptorLayout {
            handle: vk::DescriptorSetLayout::null(),
            bindings: bindings.to_vec(),
        }
    }

    #[test]
    fn pool_sizes_scale_with_max_sets() {
        let layout = layout(&[
            (vk::DescriptorType::UNIFORM_BUFFER, 1),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
        ]);
        let sizes = pool_sizes_for_layouts(&[&layout], 3);

        assert_eq!(sizes.len(), 2);
        assert!(sizes
            .iter()
            .any(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER && s.descriptor_count == 3));
        assert!(sizes.iter().any(
            |s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER && s.descriptor_count == 3
        ));
    }

    #[test]
    fn pool_sizes_merge_duplicate_types_across_layouts() {
        let a = layout(&[(vk::DescriptorType::UNIFORM_BUFFER, 2)]);
        let b = layout(&[(vk::DescriptorType::UNIFORM_BUFFER, 1)]);
        let sizes = pool_sizes_for_layouts(&[&a, &b], 2);

        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].descriptor_count, 6);
    }
}
