//! Progressive sample accumulation.
//!
//! The accumulation image is a float storage image the compute program
//! blends each new sample into. It lives outside the surface chain and is
//! recreated only when the output resolution changes.
//!
//! Resetting is logical: [`AccumulationBuffer::reset`] bumps a generation
//! and leaves the memory alone. The program overwrites instead of blending
//! whenever the uploaded frame count is zero, which is what makes stale
//! contents harmless.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use raytracer_rhi::command::CommandPool;
//! use raytracer_rhi::device::Device;
//! use raytracer_renderer::accumulation::AccumulationBuffer;
//!
//! # fn example(device: Arc<Device>, pool: &CommandPool) -> Result<(), raytracer_rhi::RhiError> {
//! let mut accumulation: AccumulationBuffer = AccumulationBuffer::new();
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! assert!(accumulation.ensure(&device, pool, extent)?);
//! // Same extent: nothing is recreated.
//! assert!(!accumulation.ensure(&device, pool, extent)?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use raytracer_rhi::command::{CommandPool, ImageTransition, color_subresource_range};
use raytracer_rhi::device::Device;
use raytracer_rhi::{RhiError, RhiResult};

/// Four 32-bit float channels; the running sum needs more than 8 bits.
pub const ACCUMULATION_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// What [`AccumulationBuffer`] needs to know about its image.
pub trait AccumulationTarget {
    fn extent(&self) -> vk::Extent2D;
    fn view(&self) -> vk::ImageView;
}

/// One-time transition that makes a fresh image storage-writable.
pub fn initial_transition() -> ImageTransition {
    ImageTransition {
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::GENERAL,
        src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        src_access: vk::AccessFlags::empty(),
        dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
    }
}

/// GPU-only float storage image with its view, left in `GENERAL` layout.
pub struct AccumulationImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
}

impl AccumulationImage {
    /// Creates the image and transitions it to `GENERAL` with a one-time
    /// submission from `pool`. Blocks until that submission completes.
    pub fn new(device: Arc<Device>, pool: &CommandPool, extent: vk::Extent2D) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Accumulation image dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(ACCUMULATION_FORMAT)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        // Drop cleans up whatever exists from here on.
        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: None,
            extent,
        };

        let requirements = unsafe { this.device.handle().get_image_memory_requirements(image) };
        let allocation = this
            .device
            .allocator()
            .lock()
            .map_err(|_| RhiError::AllocatorPoisoned)?
            .allocate(&AllocationCreateDesc {
                name: "accumulation_image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?;

        unsafe {
            this.device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }
        this.allocation = Some(allocation);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(ACCUMULATION_FORMAT)
            .subresource_range(color_subresource_range());
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        pool.submit_one_time(|cmd| initial_transition().record(cmd, image))?;

        info!(
            "Created accumulation image: {}x{} ({:?})",
            extent.width, extent.height, ACCUMULATION_FORMAT
        );
        Ok(this)
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }
}

impl AccumulationTarget for AccumulationImage {
    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for AccumulationImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.allocator().lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free accumulation image allocation: {:?}", e);
                    }
                }
                Err(_) => error!("Allocator poisoned while freeing accumulation image"),
            }
        }

        debug!(
            "Destroyed accumulation image: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

/// Owns the current accumulation image and its logical generation.
pub struct AccumulationBuffer<I = AccumulationImage> {
    image: Option<I>,
    generation: u64,
    recreate_count: u64,
}

impl<I> Default for AccumulationBuffer<I> {
    fn default() -> Self {
        Self {
            image: None,
            generation: 0,
            recreate_count: 0,
        }
    }
}

impl<I: AccumulationTarget> AccumulationBuffer<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the image match `extent`, building a new one with `create`
    /// when it does not. The old image is dropped before `create` runs.
    ///
    /// Returns whether a new image was created. A new image also starts a
    /// new generation, since its contents are undefined.
    pub fn ensure_with<E>(
        &mut self,
        extent: vk::Extent2D,
        create: impl FnOnce(vk::Extent2D) -> Result<I, E>,
    ) -> Result<bool, E> {
        if self.image.as_ref().is_some_and(|image| image.extent() == extent) {
            return Ok(false);
        }

        self.image = None;
        self.image = Some(create(extent)?);
        self.recreate_count += 1;
        self.generation += 1;
        debug!(
            "Accumulation buffer recreated at {}x{} (generation {})",
            extent.width, extent.height, self.generation
        );
        Ok(true)
    }

    /// Marks the accumulated contents stale without touching memory.
    pub fn reset(&mut self) {
        self.generation += 1;
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of images created so far.
    #[inline]
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    pub fn view(&self) -> Option<vk::ImageView> {
        self.image.as_ref().map(AccumulationTarget::view)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.image.as_ref().map(AccumulationTarget::extent)
    }

    pub fn image(&self) -> Option<&I> {
        self.image.as_ref()
    }

    /// Drops the image, e.g. before tearing down the device.
    pub fn release(&mut self) {
        self.image = None;
    }
}

impl AccumulationBuffer<AccumulationImage> {
    /// [`AccumulationBuffer::ensure_with`] backed by [`AccumulationImage`].
    pub fn ensure(
        &mut self,
        device: &Arc<Device>,
        pool: &CommandPool,
        extent: vk::Extent2D,
    ) -> RhiResult<bool> {
        self.ensure_with(extent, |extent| {
            AccumulationImage::new(device.clone(), pool, extent)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    struct FakeImage {
        extent: vk::Extent2D,
    }

    impl AccumulationTarget for FakeImage {
        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn view(&self) -> vk::ImageView {
            vk::ImageView::from_raw((u64::from(self.extent.width) << 32) | u64::from(self.extent.height))
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn fake(extent: vk::Extent2D) -> Result<FakeImage, ()> {
        Ok(FakeImage { extent })
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut buffer = AccumulationBuffer::new();
        assert!(buffer.ensure_with(extent(800, 600), fake).unwrap());
        assert_eq!(buffer.recreate_count(), 1);

        assert!(!buffer.ensure_with(extent(800, 600), fake).unwrap());
        assert_eq!(buffer.recreate_count(), 1);
    }

    #[test]
    fn test_ensure_recreates_on_resize() {
        let mut buffer = AccumulationBuffer::new();
        buffer.ensure_with(extent(800, 600), fake).unwrap();
        let generation = buffer.generation();

        assert!(buffer.ensure_with(extent(1024, 768), fake).unwrap());
        assert_eq!(buffer.recreate_count(), 2);
        assert_eq!(buffer.extent(), Some(extent(1024, 768)));
        assert!(buffer.generation() > generation);
    }

    #[test]
    fn test_reset_is_logical() {
        let mut buffer = AccumulationBuffer::new();
        buffer.ensure_with(extent(64, 64), fake).unwrap();
        let view = buffer.view();
        let generation = buffer.generation();

        buffer.reset();

        assert_eq!(buffer.generation(), generation + 1);
        assert_eq!(buffer.recreate_count(), 1);
        assert_eq!(buffer.view(), view);
    }

    #[test]
    fn test_failed_create_leaves_no_image() {
        let mut buffer: AccumulationBuffer<FakeImage> = AccumulationBuffer::new();
        buffer.ensure_with(extent(64, 64), fake).unwrap();

        let result = buffer.ensure_with(extent(128, 128), |_| Err("out of memory"));
        assert!(result.is_err());
        assert!(buffer.view().is_none());
        assert_eq!(buffer.recreate_count(), 1);
    }

    #[test]
    fn test_initial_transition_targets_compute() {
        let transition = initial_transition();
        assert_eq!(transition.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(transition.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(transition.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
    }
}
