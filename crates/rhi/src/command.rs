//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a `VkCommandPool` and hands out primary buffers.
//! - [`CommandBuffer`] records the handful of commands the ray tracer needs:
//!   compute dispatch, image barriers and attachment clears inside dynamic
//!   rendering.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::command::{CommandPool, CommandBuffer};
//!
//! # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let cmd = CommandBuffer::new(device.clone(), &pool)?;
//!
//! cmd.begin()?;
//! cmd.dispatch(100, 75, 1);
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// Not thread-safe; each recording thread needs its own pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool whose buffers can be reset individually.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(
            device,
            queue_family_index,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )
    }

    /// Creates a pool for short-lived buffers that are recorded once,
    /// submitted, and discarded.
    pub fn new_transient(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        Self::with_flags(device, queue_family_index, vk::CommandPoolCreateFlags::TRANSIENT)
    }

    fn with_flags(
        device: Arc<Device>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(flags);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!(
            "Command pool created for queue family {} ({:?})",
            queue_family_index, flags
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? })
    }

    /// Records `record` into a throwaway buffer, submits it to the graphics
    /// queue and blocks until the queue is idle.
    ///
    /// Only suitable for rare, already-stalling events such as resizes.
    pub fn submit_one_time(&self, record: impl FnOnce(&CommandBuffer)) -> RhiResult<()> {
        let cmd = CommandBuffer::new(self.device.clone(), self)?;
        let command_buffers = [cmd.handle()];

        run_then_release(
            || {
                cmd.begin()?;
                record(&cmd);
                cmd.end()?;

                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                unsafe { self.device.submit_graphics(&[submit_info], vk::Fence::null())? };
                self.device.wait_graphics_idle()
            },
            // SAFETY: allocated from this pool above. Either the queue is
            // idle, the buffer was never submitted, or the wait failed
            // because the device is lost.
            || unsafe {
                self.device
                    .handle()
                    .free_command_buffers(self.pool, &command_buffers);
            },
        )
    }
}

/// Runs `body`, then `release` on every exit path of `body`.
fn run_then_release<T>(body: impl FnOnce() -> RhiResult<T>, release: impl FnOnce()) -> RhiResult<T> {
    let result = body();
    release();
    result
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}

/// Vulkan command buffer wrapper.
///
/// Does not own the handle; it is freed with its [`CommandPool`].
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_command_buffers(1)?[0];
        Ok(Self { device, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Returns the buffer to the initial state, discarding anything
    /// recorded, including a half-finished recording.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    // =========================================================================
    // Dynamic Rendering (Vulkan 1.3)
    // =========================================================================

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo<'_>) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Clears regions of the bound attachments. Must be inside rendering.
    pub fn clear_attachments(
        &self,
        attachments: &[vk::ClearAttachment],
        rects: &[vk::ClearRect],
    ) {
        if attachments.is_empty() || rects.is_empty() {
            return;
        }
        unsafe {
            self.device
                .handle()
                .cmd_clear_attachments(self.buffer, attachments, rects);
        }
    }

    // =========================================================================
    // Pipeline State
    // =========================================================================

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }

    // =========================================================================
    // Compute
    // =========================================================================

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device.handle().cmd_dispatch(
                self.buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            );
        }
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
    }
}

/// Describes one layout transition of a single-mip color image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

impl ImageTransition {
    /// Builds the image barrier for `image`.
    pub fn barrier(&self, image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range())
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
    }

    /// Records the transition on `cmd`.
    pub fn record(&self, cmd: &CommandBuffer, image: vk::Image) {
        cmd.pipeline_barrier(self.src_stage, self.dst_stage, &[self.barrier(image)]);
    }
}

/// Whole color image, one mip, one layer.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RhiError;

    #[test]
    fn test_command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
    }

    #[test]
    fn test_release_runs_when_recording_fails() {
        let released = std::cell::Cell::new(false);
        let result: RhiResult<()> = run_then_release(
            || Err(RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
            || released.set(true),
        );

        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert!(released.get());
    }

    #[test]
    fn test_release_runs_after_success() {
        let released = std::cell::Cell::new(false);
        assert_eq!(run_then_release(|| Ok(7), || released.set(true)).unwrap(), 7);
        assert!(released.get());
    }

    #[test]
    fn test_transition_barrier_fields() {
        let transition = ImageTransition {
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::GENERAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::COMPUTE_SHADER,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::SHADER_WRITE,
        };
        let barrier = transition.barrier(vk::Image::null());

        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(
            barrier.subresource_range.aspect_mask,
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(barrier.subresource_range.level_count, 1);
    }
}
