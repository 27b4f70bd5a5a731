//! Per-frame-in-flight GPU resources.
//!
//! Each of the [`FRAMES_IN_FLIGHT`] slots owns a scene uniform buffer, an
//! object storage buffer and a binding table (descriptor set) for the
//! compute program. Buffers are persistently mapped, so an upload is a copy.
//!
//! A slot may only be written once the GPU is done with its previous use.
//! [`SlotTracker`] records which slots have unretired submissions and
//! [`FrameResourcePool::upload`] refuses to write those.
//!
//! # Slot lifecycle
//!
//! ```text
//!   writable ── upload ──▶ written ── mark_submitted ──▶ in flight
//!      ▲                                                   │
//!      └────────────── retire (after the slot fence) ──────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_renderer::compute_stage::{ComputeStage, binding_layout};
//! use raytracer_renderer::{FrameResourcePool, RendererResult};
//! use raytracer_rhi::device::Device;
//! use raytracer_scene::Scene;
//!
//! # fn example(device: Arc<Device>, stage: &ComputeStage, scene: &Scene) -> RendererResult<()> {
//! let mut pool = FrameResourcePool::new(device, stage.set_layout(), &binding_layout(), 32)?;
//!
//! pool.upload(0, scene)?;
//! pool.mark_submitted(0)?;
//! // ... wait on slot 0's fence ...
//! pool.retire(0)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use raytracer_rhi::buffer::{Buffer, BufferUsage};
use raytracer_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, pool_sizes_for};
use raytracer_rhi::device::Device;
use raytracer_rhi::sync::FRAMES_IN_FLIGHT;
use raytracer_scene::Scene;

use crate::error::{RendererError, RendererResult};
use crate::gpu_types::{GpuSceneUniform, GpuSphere, pack_objects};

/// Tracks which frame slots have GPU work that is not yet retired.
///
/// Pure host-side bookkeeping with no GPU handles, so the write-after-submit
/// rule can be checked without a device. Every slot starts writable.
#[derive(Clone, Debug)]
pub struct SlotTracker {
    in_flight: Vec<bool>,
}

impl SlotTracker {
    /// Tracker for `count` slots, all writable.
    pub fn new(count: usize) -> Self {
        Self {
            in_flight: vec![false; count],
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.in_flight.len()
    }

    fn check_range(&self, slot: usize) -> RendererResult<()> {
        if slot < self.in_flight.len() {
            Ok(())
        } else {
            Err(RendererError::SlotOutOfRange {
                slot,
                count: self.in_flight.len(),
            })
        }
    }

    /// True while `slot` has submitted work that is not retired.
    /// Out-of-range slots report `false`.
    pub fn is_in_flight(&self, slot: usize) -> bool {
        self.in_flight.get(slot).copied().unwrap_or(false)
    }

    /// Fails unless the host may write `slot`.
    ///
    /// # Errors
    ///
    /// [`RendererError::SlotInFlight`] for an unretired slot and
    /// [`RendererError::SlotOutOfRange`] for an index past the end.
    pub fn ensure_writable(&self, slot: usize) -> RendererResult<()> {
        self.check_range(slot)?;
        if self.in_flight[slot] {
            return Err(RendererError::SlotInFlight(slot));
        }
        Ok(())
    }

    /// Marks `slot` as read by submitted GPU work.
    pub fn submit(&mut self, slot: usize) -> RendererResult<()> {
        self.check_range(slot)?;
        self.in_flight[slot] = true;
        Ok(())
    }

    /// Marks `slot` free. Call only after its fence has signaled.
    pub fn retire(&mut self, slot: usize) -> RendererResult<()> {
        self.check_range(slot)?;
        self.in_flight[slot] = false;
        Ok(())
    }

    /// Marks every slot free. Call only after the device is idle.
    pub fn retire_all(&mut self) {
        self.in_flight.fill(false);
    }
}

/// Capacity after growing to fit `required` objects: at least double.
pub fn grown_capacity(current: usize, required: usize) -> usize {
    required.max(current.saturating_mul(2)).max(1)
}

/// Byte size of an object buffer. Never zero, so an empty scene still binds.
pub fn object_buffer_size(capacity: usize) -> vk::DeviceSize {
    (capacity.max(1) * GpuSphere::SIZE) as vk::DeviceSize
}

/// Resources of one frame slot.
///
/// Rewritten by the host once per use and read by that use's compute
/// dispatch. The binding table is owned by the pool's descriptor pool.
pub struct FrameSlot {
    scene_uniform: Buffer,
    objects: Buffer,
    binding_table: vk::DescriptorSet,
}

impl FrameSlot {
    /// Camera basis, object count and accumulated frame count.
    #[inline]
    pub fn scene_uniform(&self) -> &Buffer {
        &self.scene_uniform
    }

    /// Packed sphere records, sized to the pool's object capacity.
    #[inline]
    pub fn objects(&self) -> &Buffer {
        &self.objects
    }

    #[inline]
    pub fn binding_table(&self) -> vk::DescriptorSet {
        self.binding_table
    }
}

/// The [`FRAMES_IN_FLIGHT`] slots of per-frame GPU data.
///
/// Object buffers are sized for a shared capacity. A scene larger than that
/// is rejected with [`RendererError::CapacityExceeded`] before any GPU work,
/// and the caller may [`grow`](FrameResourcePool::grow) the pool and retry.
///
/// Field order is drop order: slot buffers go first, then the descriptor
/// pool that owns every binding table.
pub struct FrameResourcePool {
    device: Arc<Device>,
    slots: Vec<FrameSlot>,
    tracker: SlotTracker,
    object_capacity: usize,
    // Drops after `slots`; frees every binding table.
    _descriptor_pool: DescriptorPool,
}

impl FrameResourcePool {
    /// Creates [`FRAMES_IN_FLIGHT`] slots whose binding tables follow
    /// `set_layout` (built from `bindings`), each able to hold
    /// `object_capacity` objects.
    pub fn new(
        device: Arc<Device>,
        set_layout: &DescriptorSetLayout,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        object_capacity: usize,
    ) -> RendererResult<Self> {
        let slot_count = FRAMES_IN_FLIGHT;
        let pool_sizes = pool_sizes_for(bindings, slot_count as u32);
        let descriptor_pool = DescriptorPool::new(device.clone(), slot_count as u32, &pool_sizes)?;

        let layouts = vec![set_layout.handle(); slot_count];
        let binding_tables = descriptor_pool.allocate(&layouts)?;

        let object_capacity = object_capacity.max(1);
        let mut slots = Vec::with_capacity(slot_count);
        for (i, binding_table) in binding_tables.into_iter().enumerate() {
            let scene_uniform = Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                GpuSceneUniform::SIZE as vk::DeviceSize,
            )?;
            let objects = Buffer::new(
                device.clone(),
                BufferUsage::Storage,
                object_buffer_size(object_capacity),
            )?;
            debug!("Created frame slot {}", i);

            slots.push(FrameSlot {
                scene_uniform,
                objects,
                binding_table,
            });
        }

        info!(
            "Frame resource pool created: {} slots, object capacity {}",
            slot_count, object_capacity
        );

        Ok(Self {
            device,
            slots,
            tracker: SlotTracker::new(slot_count),
            object_capacity,
            _descriptor_pool: descriptor_pool,
        })
    }

    /// Always [`FRAMES_IN_FLIGHT`].
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Objects each slot's buffer can hold; at least 1.
    #[inline]
    pub fn object_capacity(&self) -> usize {
        self.object_capacity
    }

    /// Rejects scenes that do not fit the object buffers.
    pub fn check_capacity(&self, required: usize) -> RendererResult<()> {
        if required > self.object_capacity {
            return Err(RendererError::CapacityExceeded {
                required,
                capacity: self.object_capacity,
            });
        }
        Ok(())
    }

    /// The resources of `slot`, or [`RendererError::SlotOutOfRange`].
    pub fn slot(&self, slot: usize) -> RendererResult<&FrameSlot> {
        self.slots.get(slot).ok_or(RendererError::SlotOutOfRange {
            slot,
            count: self.slots.len(),
        })
    }

    /// Descriptor set for `slot`. Its contents are rewritten every frame,
    /// since the target image changes with each acquisition.
    pub fn binding_table(&self, slot: usize) -> RendererResult<vk::DescriptorSet> {
        Ok(self.slot(slot)?.binding_table)
    }

    /// Copies the scene's camera and objects into `slot`'s buffers.
    ///
    /// Fails with [`RendererError::SlotInFlight`] if the slot's previous
    /// submission was not retired, and with
    /// [`RendererError::CapacityExceeded`] if the objects do not fit.
    pub fn upload(&self, slot: usize, scene: &Scene) -> RendererResult<()> {
        self.tracker.ensure_writable(slot)?;
        self.check_capacity(scene.objects().len())?;

        let frame = &self.slots[slot];
        let uniform = GpuSceneUniform::from_scene(scene);
        frame
            .scene_uniform
            .write_data(0, bytemuck::bytes_of(&uniform))?;

        let spheres = pack_objects(scene.objects());
        frame.objects.write_data(0, bytemuck::cast_slice(&spheres))?;
        Ok(())
    }

    /// Records that `slot` is read by submitted GPU work.
    pub fn mark_submitted(&mut self, slot: usize) -> RendererResult<()> {
        self.tracker.submit(slot)
    }

    /// Records that `slot`'s fence has signaled.
    pub fn retire(&mut self, slot: usize) -> RendererResult<()> {
        self.tracker.retire(slot)
    }

    /// Replaces every slot's object buffer with one holding at least
    /// `required` objects. Waits for the device to go idle first.
    pub fn grow(&mut self, required: usize) -> RendererResult<()> {
        if required <= self.object_capacity {
            return Ok(());
        }

        self.device.wait_idle()?;
        self.tracker.retire_all();

        let capacity = grown_capacity(self.object_capacity, required);
        for frame in &mut self.slots {
            frame.objects = Buffer::new(
                self.device.clone(),
                BufferUsage::Storage,
                object_buffer_size(capacity),
            )?;
        }

        info!(
            "Object capacity grown: {} -> {}",
            self.object_capacity, capacity
        );
        self.object_capacity = capacity;
        Ok(())
    }
}
