//! Vulkan implementation of [`FrameBackend`].

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use raytracer_rhi::command::{CommandBuffer, CommandPool};
use raytracer_rhi::device::Device;
use raytracer_rhi::instance::Instance;
use raytracer_rhi::surface_chain::{Acquire, AcquiredImage, Present, SurfaceChain};
use raytracer_rhi::sync::{FRAMES_IN_FLIGHT, FrameSync, Semaphore};
use raytracer_scene::Scene;

use crate::accumulation::{AccumulationBuffer, AccumulationTarget};
use crate::compute_stage::{ComputeBindings, ComputeStage, binding_layout};
use crate::error::{RendererError, RendererResult};
use crate::frame_resources::FrameResourcePool;
use crate::overlay::Overlay;
use crate::overlay_stage::OverlayStage;
use crate::scheduler::{FrameBackend, RebuildOutcome};

/// Command buffers and synchronization owned by one frame slot.
struct SlotCommands {
    compute: CommandBuffer,
    overlay: CommandBuffer,
    sync: FrameSync,
}

/// Settings for [`VulkanBackend::new`].
#[derive(Debug, Clone, Copy)]
pub struct BackendOptions<'a> {
    pub compute_shader: &'a Path,
    pub object_capacity: usize,
    pub prefer_mailbox: bool,
}

/// Owns every GPU object the frame loop touches.
///
/// Field order is drop order: command buffers and semaphores go before the
/// pools, and everything goes before the surface chain.
pub struct VulkanBackend {
    device: Arc<Device>,
    window_extent: vk::Extent2D,
    slots: Vec<SlotCommands>,
    /// One per chain image; signaled by the overlay submission of whichever
    /// frame renders that image.
    present_semaphores: Vec<Semaphore>,
    resources: FrameResourcePool,
    accumulation: AccumulationBuffer,
    compute: ComputeStage,
    overlay_stage: OverlayStage,
    overlay: Overlay,
    _command_pool: CommandPool,
    transient_pool: CommandPool,
    chain: SurfaceChain,
}

impl VulkanBackend {
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        options: BackendOptions<'_>,
    ) -> RendererResult<Self> {
        let chain = SurfaceChain::new(
            instance,
            device.clone(),
            surface,
            window_extent,
            options.prefer_mailbox,
        )?;

        let family = device.graphics_family();
        let command_pool = CommandPool::new(device.clone(), family)?;
        let transient_pool = CommandPool::new_transient(device.clone(), family)?;

        let compute = ComputeStage::new(device.clone(), options.compute_shader)?;
        let resources = FrameResourcePool::new(
            device.clone(),
            compute.set_layout(),
            &binding_layout(),
            options.object_capacity,
        )?;

        let mut accumulation = AccumulationBuffer::new();
        accumulation.ensure(&device, &transient_pool, chain.extent())?;

        let slots = (0..FRAMES_IN_FLIGHT)
            .map(|_| {
                Ok(SlotCommands {
                    compute: CommandBuffer::new(device.clone(), &command_pool)?,
                    overlay: CommandBuffer::new(device.clone(), &command_pool)?,
                    sync: FrameSync::new(device.clone())?,
                })
            })
            .collect::<RendererResult<Vec<_>>>()?;

        let present_semaphores = Self::create_present_semaphores(&device, chain.image_count())?;

        info!(
            "Vulkan backend ready: {} chain images, {} frame slots",
            chain.image_count(),
            slots.len()
        );

        Ok(Self {
            device,
            window_extent,
            slots,
            present_semaphores,
            resources,
            accumulation,
            compute,
            overlay_stage: OverlayStage::new(),
            overlay: Overlay::new(),
            _command_pool: command_pool,
            transient_pool,
            chain,
        })
    }

    fn create_present_semaphores(
        device: &Arc<Device>,
        count: usize,
    ) -> RendererResult<Vec<Semaphore>> {
        (0..count)
            .map(|_| Semaphore::new(device.clone()).map_err(RendererError::from))
            .collect()
    }

    /// Records the window's latest drawable size. The chain follows on the
    /// next rebuild.
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    /// Replaces every slot's object buffer with one that holds at least
    /// `required` objects. Blocks until the GPU is idle.
    pub fn grow_objects(&mut self, required: usize) -> RendererResult<()> {
        self.resources.grow(required)
    }

    /// Returns the new visibility.
    pub fn toggle_overlay(&mut self) -> bool {
        self.overlay.toggle_visible()
    }

    #[inline]
    pub fn chain(&self) -> &SurfaceChain {
        &self.chain
    }

    #[inline]
    pub fn accumulation_generation(&self) -> u64 {
        self.accumulation.generation()
    }

    fn slot_commands(&self, slot: usize) -> RendererResult<&SlotCommands> {
        self.slots.get(slot).ok_or(RendererError::SlotOutOfRange {
            slot,
            count: self.slots.len(),
        })
    }
}

impl FrameBackend for VulkanBackend {
    fn surface_extent(&self) -> vk::Extent2D {
        self.window_extent
    }

    fn object_capacity(&self) -> usize {
        self.resources.object_capacity()
    }

    fn wait_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.slot_commands(slot)?.sync.frame_complete().wait(u64::MAX)?;
        self.resources.retire(slot)
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<Acquire> {
        let signal = self.slot_commands(slot)?.sync.image_acquired();
        Ok(self.chain.acquire(signal)?)
    }

    fn reset_accumulation(&mut self) {
        self.accumulation.reset();
        debug!(
            "Accumulation generation {}",
            self.accumulation.generation()
        );
    }

    fn upload(&mut self, slot: usize, scene: &Scene) -> RendererResult<()> {
        self.resources.upload(slot, scene)
    }

    fn record(&mut self, slot: usize, image: &AcquiredImage, scene: &Scene) -> RendererResult<()> {
        let accumulation = self.accumulation.image().ok_or_else(|| {
            raytracer_core::Error::Internal("accumulation image missing".to_string())
        })?;
        let extent = self.chain.extent();
        let draw_list = self.overlay.build(scene, extent);

        let frame = self.resources.slot(slot)?;
        let binding_table = frame.binding_table();
        self.compute.update_bindings(
            binding_table,
            &ComputeBindings {
                target_view: image.view,
                accumulation_view: accumulation.view(),
                objects: frame.objects(),
                scene_uniform: frame.scene_uniform(),
            },
        );

        let commands = self.slot_commands(slot)?;

        commands.compute.reset()?;
        commands.compute.begin()?;
        self.compute.record(
            &commands.compute,
            image.image,
            accumulation.image(),
            binding_table,
            extent,
        );
        commands.compute.end()?;

        commands.overlay.reset()?;
        commands.overlay.begin()?;
        self.overlay_stage
            .record(&commands.overlay, image.image, image.view, &draw_list);
        commands.overlay.end()?;

        Ok(())
    }

    fn submit(&mut self, slot: usize, image: &AcquiredImage) -> RendererResult<()> {
        let commands = self.slot_commands(slot)?;
        let present_semaphore = self
            .present_semaphores
            .get(image.index as usize)
            .ok_or(RendererError::SlotOutOfRange {
                slot: image.index as usize,
                count: self.present_semaphores.len(),
            })?
            .handle();

        let fence = commands.sync.frame_complete();
        // Only reset once the submission is certain.
        fence.reset()?;

        let compute_waits = [commands.sync.image_acquired()];
        let compute_stages = [vk::PipelineStageFlags::COMPUTE_SHADER];
        let compute_buffers = [commands.compute.handle()];
        let compute_signals = [commands.sync.compute_complete()];

        let overlay_waits = [commands.sync.compute_complete()];
        let overlay_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let overlay_buffers = [commands.overlay.handle()];
        let overlay_signals = [present_semaphore];

        let submits = [
            vk::SubmitInfo::default()
                .wait_semaphores(&compute_waits)
                .wait_dst_stage_mask(&compute_stages)
                .command_buffers(&compute_buffers)
                .signal_semaphores(&compute_signals),
            vk::SubmitInfo::default()
                .wait_semaphores(&overlay_waits)
                .wait_dst_stage_mask(&overlay_stages)
                .command_buffers(&overlay_buffers)
                .signal_semaphores(&overlay_signals),
        ];

        // SAFETY: both buffers were recorded by `record` for this slot; the
        // slot's resources stay alive until its fence is waited on.
        unsafe {
            self.device.submit_graphics(&submits, fence.handle())?;
        }

        self.resources.mark_submitted(slot)
    }

    fn present(&mut self, _slot: usize, image: &AcquiredImage) -> RendererResult<Present> {
        let wait = self
            .present_semaphores
            .get(image.index as usize)
            .map(Semaphore::handle)
            .ok_or(RendererError::SlotOutOfRange {
                slot: image.index as usize,
                count: self.present_semaphores.len(),
            })?;
        Ok(self
            .chain
            .present(self.device.present_queue(), image.index, wait)?)
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<RebuildOutcome> {
        if !self.chain.rebuild(extent)? {
            return Ok(RebuildOutcome::Deferred);
        }
        if self.present_semaphores.len() != self.chain.image_count() {
            self.present_semaphores =
                Self::create_present_semaphores(&self.device, self.chain.image_count())?;
        }

        let accumulation_recreated =
            self.accumulation
                .ensure(&self.device, &self.transient_pool, self.chain.extent())?;

        Ok(RebuildOutcome::Rebuilt {
            accumulation_recreated,
        })
    }
}
