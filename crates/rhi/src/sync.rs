//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue submissions on the GPU timeline.
//! - [`Fence`] lets the host wait for a submission to finish.
//! - [`FrameSync`] groups the primitives owned by one frame slot.
//!
//! # Overview
//!
//! A frame touches the GPU twice: the compute dispatch that writes the
//! surface image, then the overlay pass that draws over it. Neither may start
//! before the presentation engine has released the image, and the host must
//! not rewrite a slot's buffers until the GPU has finished reading them.
//!
//! - **Semaphores** chain acquire, compute, overlay and present on the GPU
//!   timeline without involving the host.
//! - **Fences** are the only point where the host blocks: once per frame, on
//!   the slot it is about to reuse.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use raytracer_rhi::device::Device;
//! use raytracer_rhi::sync::{FRAMES_IN_FLIGHT, FrameSync};
//!
//! # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
//! let slots = (0..FRAMES_IN_FLIGHT)
//!     .map(|_| FrameSync::new(device.clone()))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! // Before reusing slot 0, wait for its previous submission.
//! let fence = slots[0].frame_complete();
//! fence.wait(u64::MAX)?;
//! fence.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Number of frame slots the host may record ahead of the GPU.
///
/// Slot `k = frame_index % FRAMES_IN_FLIGHT` is reused every
/// `FRAMES_IN_FLIGHT` frames, so at most this many submissions are pending.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Binary semaphore, created unsignaled.
///
/// Used for GPU-to-GPU ordering between queue operations:
/// - image acquired: signaled by the presentation engine, waited by compute
/// - compute complete: signaled by compute, waited by the overlay pass
/// - present: signaled by the overlay pass, waited by presentation
///
/// # Thread Safety
///
/// The wrapper is immutable after creation. Submissions that wait on or
/// signal it still need external queue synchronization.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::VulkanError`](crate::RhiError::VulkanError) when
    /// the driver is out of memory.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use raytracer_rhi::device::Device;
    /// use raytracer_rhi::sync::Semaphore;
    ///
    /// # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
    /// let present_ready = Semaphore::new(device)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    /// Raw handle for submit and present info structures.
    ///
    /// Valid only while this `Semaphore` exists.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Host-waitable fence.
///
/// Each frame slot owns one. The overlay submission signals it, and the
/// host waits on it before touching that slot's command buffers, binding
/// table or uniform and object buffers again.
///
/// # Thread Safety
///
/// `wait` may be called from any thread. `reset` must not race with a
/// submission that signals the same fence.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence. A `signaled` fence lets the first wait return at once.
    ///
    /// Frame slot fences start signaled: a slot that was never submitted is
    /// free to use.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::VulkanError`](crate::RhiError::VulkanError) when
    /// creation fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use raytracer_rhi::device::Device;
    /// use raytracer_rhi::sync::Fence;
    ///
    /// # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
    /// let fence = Fence::new(device, true)?;
    /// fence.wait(u64::MAX)?; // returns immediately
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self { device, fence })
    }

    /// Raw handle to pass to `vkQueueSubmit`.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence signals or `timeout` nanoseconds elapse.
    ///
    /// # Errors
    ///
    /// `vk::Result::TIMEOUT` is returned as an error, as is
    /// `ERROR_DEVICE_LOST`. Both are fatal for the frame loop.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout)?
        };
        Ok(())
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// Must not be called while a pending submission will signal it. Reset
    /// immediately before the submission that signals it again, so an
    /// early return in between cannot leave the slot waiting forever.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization owned by one frame slot.
///
/// ```text
/// acquire      ── signals ──▶ image_acquired
/// compute      ── waits image_acquired, signals ──▶ compute_complete
/// overlay      ── waits compute_complete, signals ──▶ frame_complete (fence)
/// ```
///
/// The overlay's present semaphore is per surface image, not per slot,
/// because presentation may hold an image longer than one slot rotation.
/// The renderer keeps those alongside the surface chain.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ash::vk;
/// use raytracer_rhi::device::Device;
/// use raytracer_rhi::sync::FrameSync;
///
/// # fn example(device: Arc<Device>) -> Result<(), raytracer_rhi::RhiError> {
/// let sync = FrameSync::new(device)?;
///
/// let wait = [sync.image_acquired()];
/// let stages = [vk::PipelineStageFlags::COMPUTE_SHADER];
/// let signal = [sync.compute_complete()];
/// let compute_submit = vk::SubmitInfo::default()
///     .wait_semaphores(&wait)
///     .wait_dst_stage_mask(&stages)
///     .signal_semaphores(&signal);
/// # Ok(())
/// # }
/// ```
pub struct FrameSync {
    image_acquired: Semaphore,
    compute_complete: Semaphore,
    frame_complete: Fence,
}

impl FrameSync {
    /// Creates the slot's two semaphores and its fence.
    ///
    /// The fence starts signaled so the first wait on a fresh slot returns.
    ///
    /// # Errors
    ///
    /// Fails if any of the three objects cannot be created; those already
    /// created are destroyed.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_acquired = Semaphore::new(device.clone())?;
        let compute_complete = Semaphore::new(device.clone())?;
        let frame_complete = Fence::new(device, true)?;
        debug!("Created frame slot synchronization");

        Ok(Self {
            image_acquired,
            compute_complete,
            frame_complete,
        })
    }

    /// Signaled by the presentation engine when the acquired image is free.
    #[inline]
    pub fn image_acquired(&self) -> vk::Semaphore {
        self.image_acquired.handle()
    }

    /// Signaled by the compute submission, waited by the overlay submission.
    #[inline]
    pub fn compute_complete(&self) -> vk::Semaphore {
        self.compute_complete.handle()
    }

    /// Signaled when both of the slot's submissions have completed.
    #[inline]
    pub fn frame_complete(&self) -> &Fence {
        &self.frame_complete
    }
}
