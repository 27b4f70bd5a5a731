//! Descriptor sets: the binding tables that expose images and buffers to
//! shaders.
//!
//! - [`DescriptorSetLayout`] describes which resource sits at which binding.
//! - [`DescriptorPool`] allocates sets for a layout.
//! - [`pool_sizes_for`] derives the pool sizes from a layout's bindings.

use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool whose sets are freed together when it drops.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={:?}",
            max_sets, pool_sizes
        );

        Ok(Self { device, pool })
    }

    /// Allocates one set per entry of `layouts`.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        Ok(unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? })
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
    }
}

pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet<'_>]) {
    if writes.is_empty() {
        return;
    }
    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }
}

/// Image info for a storage image bound in `GENERAL` layout.
#[inline]
pub fn storage_image_info(image_view: vk::ImageView) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .image_layout(vk::ImageLayout::GENERAL)
}

/// Pool sizes able to hold `sets` copies of a layout with `bindings`.
pub fn pool_sizes_for(
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in bindings {
        *counts.entry(binding.descriptor_type.as_raw()).or_default() += binding.descriptor_count;
    }

    counts
        .into_iter()
        .map(|(ty, count)| {
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::from_raw(ty))
                .descriptor_count(count * sets)
        })
        .collect()
}

pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    #[inline]
    pub fn storage_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    #[inline]
    pub fn storage_image(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        Self::single(binding, vk::DescriptorType::STORAGE_IMAGE, stage_flags)
    }

    fn single(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_builder() {
        let binding = DescriptorBindingBuilder::storage_image(1, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(binding.binding, 1);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_pool_sizes_merge_types() {
        let stage = vk::ShaderStageFlags::COMPUTE;
        let bindings = [
            DescriptorBindingBuilder::storage_image(0, stage),
            DescriptorBindingBuilder::storage_image(1, stage),
            DescriptorBindingBuilder::storage_buffer(2, stage),
            DescriptorBindingBuilder::uniform_buffer(3, stage),
        ];

        let sizes = pool_sizes_for(&bindings, 2);
        assert_eq!(sizes.len(), 3);

        let count_of = |ty| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };
        assert_eq!(count_of(vk::DescriptorType::STORAGE_IMAGE), Some(4));
        assert_eq!(count_of(vk::DescriptorType::STORAGE_BUFFER), Some(2));
        assert_eq!(count_of(vk::DescriptorType::UNIFORM_BUFFER), Some(2));
    }

    #[test]
    fn test_storage_image_info_layout() {
        let info = storage_image_info(vk::ImageView::null());
        assert_eq!(info.image_layout, vk::ImageLayout::GENERAL);
        assert_eq!(info.sampler, vk::Sampler::null());
    }
}
