//! Top-level renderer.
//!
//! [`Renderer`] creates the Vulkan context for a window and drives the
//! [`FrameScheduler`] over a [`VulkanBackend`].

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use raytracer_core::RendererConfig;
use raytracer_platform::{Surface, Window};
use raytracer_rhi::device::Device;
use raytracer_rhi::instance::Instance;
use raytracer_rhi::physical_device::select_physical_device;
use raytracer_scene::Scene;

use crate::backend::{BackendOptions, VulkanBackend};
use crate::error::RendererResult;
use crate::scheduler::{FrameBackend, FrameOutcome, FrameScheduler};

/// Owns the Vulkan context and the frame loop for one window.
///
/// ManuallyDrop fields are released in dependency order by `Drop`.
pub struct Renderer {
    scheduler: ManuallyDrop<FrameScheduler<VulkanBackend>>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    instance: ManuallyDrop<Instance>,
    width: u32,
    height: u32,
}

impl Renderer {
    /// Initializes Vulkan for `window`.
    ///
    /// # Errors
    ///
    /// Fails when no GPU supports compute storage writes to a presentable
    /// surface, when the compute program cannot be loaded, or when any
    /// Vulkan object cannot be created.
    pub fn new(window: &Window, config: &RendererConfig) -> RendererResult<Self> {
        let width = window.width();
        let height = window.height();
        info!("Initializing ray tracer ({}x{})", width, height);

        let extensions = window.required_extensions()?;
        let instance = Instance::new(c"raytracer", config.validation, &extensions)?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let backend = VulkanBackend::new(
            &instance,
            device.clone(),
            surface.handle(),
            window.extent(),
            BackendOptions {
                compute_shader: &config.compute_shader,
                object_capacity: config.object_capacity,
                prefer_mailbox: config.prefer_mailbox,
            },
        )?;

        info!(
            "Renderer initialized: {:?}, {:?}",
            backend.chain().format(),
            backend.chain().present_mode()
        );

        Ok(Self {
            scheduler: ManuallyDrop::new(FrameScheduler::new(backend)),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            instance: ManuallyDrop::new(instance),
            width,
            height,
        })
    }

    /// Renders and presents one frame of `scene`.
    ///
    /// # Errors
    ///
    /// [`crate::RendererError::CapacityExceeded`] is recoverable with
    /// [`Renderer::grow_objects`]; everything else is fatal.
    pub fn render(&mut self, scene: &mut Scene) -> RendererResult<FrameOutcome> {
        self.scheduler.render_frame(scene)
    }

    /// Notifies the renderer that the window's drawable size changed.
    ///
    /// The surface chain is rebuilt after the next present.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.scheduler
            .backend_mut()
            .set_window_extent(vk::Extent2D { width, height });

        if width == 0 || height == 0 {
            debug!("Window minimized, rendering paused");
            return;
        }

        if width != self.width || height != self.height {
            debug!(
                "Resize triggered: {}x{} -> {}x{}",
                self.width, self.height, width, height
            );
            self.width = width;
            self.height = height;
            self.scheduler.notify_resized();
        }
    }

    /// Grows the per-slot object buffers to hold `required` objects.
    pub fn grow_objects(&mut self, required: usize) -> RendererResult<()> {
        self.scheduler.backend_mut().grow_objects(required)
    }

    /// Returns whether the overlay is now visible.
    pub fn toggle_overlay(&mut self) -> bool {
        self.scheduler.backend_mut().toggle_overlay()
    }

    #[inline]
    pub fn object_capacity(&self) -> usize {
        self.scheduler.backend().object_capacity()
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.scheduler.frame_index()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.scheduler.backend().chain().extent()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during renderer drop: {:?}",
                e
            );
        }

        // SAFETY: each field is dropped exactly once, here, after the GPU is
        // idle. The chain goes before its surface and the device before the
        // instance.
        unsafe {
            ManuallyDrop::drop(&mut self.scheduler);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}
