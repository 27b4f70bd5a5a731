//! The chain of presentable images behind the window surface.
//!
//! [`SurfaceChain`] owns the `VkSwapchainKHR`, one view per image and the
//! chosen output format. Images are created with `STORAGE` usage so the
//! compute program writes them directly, then the overlay pass draws on top.
//!
//! A surface that no longer matches the chain (window resized, display
//! mode changed) is reported as [`Acquire::Stale`] or [`Present::Stale`];
//! the caller rebuilds and skips the frame. Every other failure is an error.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::instance::Instance;
//! use raytracer_rhi::surface_chain::{Acquire, Present, SurfaceChain};
//!
//! # fn example(
//! #     instance: &Instance,
//! #     device: Arc<Device>,
//! #     surface: vk::SurfaceKHR,
//! #     acquired: vk::Semaphore,
//! #     rendered: vk::Semaphore,
//! # ) -> Result<(), raytracer_rhi::RhiError> {
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let mut chain = SurfaceChain::new(instance, device.clone(), surface, extent, true)?;
//!
//! match chain.acquire(acquired)? {
//!     Acquire::Image(image) => {
//!         // ... record work targeting image.image / image.view ...
//!         if chain.present(device.present_queue(), image.index, rendered)? == Present::Stale {
//!             chain.rebuild(extent)?;
//!         }
//!     }
//!     Acquire::Stale => {
//!         chain.rebuild(extent)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::command::color_subresource_range;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Usage of every image in the chain.
pub const CHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::STORAGE.as_raw(),
);

/// Output formats in order of preference. Gamma is applied by the compute
/// program, so only linear UNORM formats are considered first.
const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Result of [`SurfaceChain::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image(AcquiredImage),
    /// The chain no longer matches the surface. Nothing was acquired and the
    /// semaphore will not be signaled.
    Stale,
}

/// A presentable image handed out for one frame.
///
/// The handles are valid until the next [`SurfaceChain::rebuild`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    /// The surface still accepts this image but a rebuild is advisable.
    pub suboptimal: bool,
}

/// Result of [`SurfaceChain::present`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Ok,
    /// Presented (or dropped) but the chain must be rebuilt.
    Stale,
}

/// Surface properties needed to build a chain.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?,
                surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        debug!(
            "Surface support: {} formats, {} present modes, image count {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty()
            && !self.present_modes.is_empty()
            && self
                .capabilities
                .supported_usage_flags
                .contains(CHAIN_IMAGE_USAGE)
    }
}

pub struct SurfaceChain {
    device: Arc<Device>,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    prefer_mailbox: bool,
    generation: u64,
}

impl SurfaceChain {
    /// Builds the chain for `surface`. The surface itself stays owned by
    /// the caller and must outlive the chain.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());

        let mut chain = Self {
            device,
            instance: instance.handle().clone(),
            surface_loader,
            swapchain_loader,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            prefer_mailbox,
            generation: 0,
        };
        chain.create(extent)?;
        Ok(chain)
    }

    /// Waits for all GPU work, then recreates the chain and its views for
    /// the current surface extent.
    ///
    /// Returns `false` and keeps the old chain when the surface has zero
    /// area (minimized window); the caller should retry later.
    ///
    /// Every previously returned image handle and view is invalid afterwards.
    pub fn rebuild(&mut self, extent: vk::Extent2D) -> RhiResult<bool> {
        self.device.wait_idle()?;

        let support = self.query_support()?;
        let target = choose_extent(&support.capabilities, extent.width, extent.height);
        if target.width == 0 || target.height == 0 {
            debug!("Surface has zero area, deferring rebuild");
            return Ok(false);
        }

        info!(
            "Rebuilding surface chain: {}x{} -> {}x{}",
            self.extent.width, self.extent.height, target.width, target.height
        );
        self.create(extent)?;
        Ok(true)
    }

    fn query_support(&self) -> RhiResult<SurfaceSupport> {
        SurfaceSupport::query(
            self.device.physical_device(),
            self.surface,
            &self.surface_loader,
        )
    }

    fn supports_storage(&self, format: vk::Format) -> bool {
        let properties = unsafe {
            self.instance
                .get_physical_device_format_properties(self.device.physical_device(), format)
        };
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::STORAGE_IMAGE)
    }

    fn create(&mut self, requested: vk::Extent2D) -> RhiResult<()> {
        let support = self.query_support()?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Surface lacks formats, present modes or storage usage".to_string(),
            ));
        }

        let format = choose_surface_format(&support.formats, |f| self.supports_storage(f))
            .ok_or_else(|| {
                RhiError::SwapchainError("No surface format supports storage images".to_string())
            })?;
        let present_mode = choose_present_mode(&support.present_modes, self.prefer_mailbox);
        let extent = choose_extent(&support.capabilities, requested.width, requested.height);
        let image_count = determine_image_count(&support.capabilities);

        let families = self.device.queue_families();
        let indices: Vec<u32> = families.unique_families();
        let (sharing_mode, shared_indices) = if indices.len() > 1 {
            (vk::SharingMode::CONCURRENT, indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(CHAIN_IMAGE_USAGE)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        // The old chain is retired by the create call; release it and its views.
        self.destroy_image_views();
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.image_views = create_image_views(&self.device, &self.images, format.format)?;
        self.format = format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.generation += 1;

        info!(
            "Surface chain created: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    /// Blocks until an image is available.
    ///
    /// On success `signal` is signaled once the image can be written.
    pub fn acquire(&self, signal: vk::Semaphore) -> RhiResult<Acquire> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                let i = index as usize;
                Ok(Acquire::Image(AcquiredImage {
                    index,
                    image: self.images[i],
                    view: self.image_views[i],
                    suboptimal,
                }))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Acquire reported out-of-date surface");
                Ok(Acquire::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues image `index` for presentation once `wait` is signaled.
    pub fn present(&self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> RhiResult<Present> {
        let swapchains = [self.swapchain];
        let image_indices = [index];
        let wait_semaphores = [wait];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(Present::Ok),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Present reported stale surface");
                Ok(Present::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Incremented on every (re)creation. Consumers holding image handles
    /// compare it to know when to drop them.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn destroy_image_views(&mut self) {
        for image_view in self.image_views.drain(..) {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
    }
}

impl Drop for SurfaceChain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
        }
        info!(
            "Surface chain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

/// Picks the output format among those the surface offers.
///
/// Only formats for which `supports_storage` holds are eligible. Preferred
/// formats come first, then any other eligible format in surface order.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    supports_storage: impl Fn(vk::Format) -> bool,
) -> Option<vk::SurfaceFormatKHR> {
    let eligible: Vec<vk::SurfaceFormatKHR> = formats
        .iter()
        .copied()
        .filter(|f| supports_storage(f.format))
        .collect();

    for preferred in PREFERRED_FORMATS {
        if let Some(&format) = eligible.iter().find(|f| {
            f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        }) {
            return Some(format);
        }
    }

    let fallback = eligible.first().copied();
    if let Some(format) = fallback {
        warn!("Using fallback surface format {:?}", format.format);
    }
    fallback
}

/// MAILBOX when preferred and offered, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> vk::PresentModeKHR {
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent when it defines one, else clamps the
/// window size to the surface limits.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, bounded by the maximum (0 = unbounded).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for (i, &image) in images.iter().enumerate() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(color_subresource_range());

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for view in image_views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "Failed to create image view {}: {:?}",
                    i, e
                )));
            }
        }
    }

    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_format_prefers_bgra_unorm() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let selected = choose_surface_format(&formats, |_| true).unwrap();
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_format_skips_non_storage() {
        // sRGB formats usually lack storage support.
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::R8G8B8A8_UNORM),
        ];
        let selected =
            choose_surface_format(&formats, |f| f == vk::Format::R8G8B8A8_UNORM).unwrap();
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_format_falls_back_to_any_storage_format() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::A2B10G10R10_UNORM_PACK32),
        ];
        let selected =
            choose_surface_format(&formats, |f| f != vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(selected.format, vk::Format::A2B10G10R10_UNORM_PACK32);
    }

    #[test]
    fn test_format_none_without_storage() {
        let formats = [surface_format(vk::Format::B8G8R8A8_SRGB)];
        assert!(choose_surface_format(&formats, |_| false).is_none());
    }

    #[test]
    fn test_present_mode_preference() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_image_count() {
        let bounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&bounded), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded), 3);
    }

    #[test]
    fn test_support_requires_storage_usage() {
        let mut support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                ..Default::default()
            },
            formats: vec![surface_format(vk::Format::B8G8R8A8_UNORM)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!support.is_adequate());

        support.capabilities.supported_usage_flags |= vk::ImageUsageFlags::STORAGE;
        assert!(support.is_adequate());

        support.present_modes.clear();
        assert!(!support.is_adequate());
    }
}
