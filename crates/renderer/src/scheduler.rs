//! Frame orchestration state machine.
//!
//! ```text
//!            ┌──────────── Stale ───────────┐
//!            │                              ▼
//! Idle ─▶ Acquiring ─▶ Recording ─▶ Submitted ─▶ Presenting ─▶ Idle
//!                                                   │            ▲
//!                                                   └─ Stale ─▶ Resizing
//! ```
//!
//! Each tick uses frame slot `k = frame_index mod FRAMES_IN_FLIGHT`:
//!
//! 1. Wait on slot `k`'s fence. This is the only per-frame host block.
//! 2. Acquire a surface image. On `Stale`, rebuild and end the tick with no
//!    GPU work submitted.
//! 3. Upload the scene into slot `k` and record the compute and overlay work.
//! 4. Submit compute, then overlay; the overlay submission signals slot `k`'s fence.
//! 5. Present. A stale present, or a pending resize, rebuilds afterwards.
//! 6. Advance `k`.
//!
//! The GPU side is abstracted behind [`FrameBackend`] so the ordering rules
//! can be exercised against a simulated timeline.

use ash::vk;
use tracing::{debug, info, trace};

use raytracer_rhi::surface_chain::{Acquire, AcquiredImage, Present};
use raytracer_rhi::sync::FRAMES_IN_FLIGHT;
use raytracer_scene::Scene;

use crate::error::{RendererError, RendererResult};

/// Where the scheduler is within the current tick.
///
/// After an error the state is left where the failure happened, so logs and
/// tests can tell which step failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// Between ticks.
    Idle,
    /// Waiting for the slot fence and a surface image.
    Acquiring,
    /// Uploading the scene and recording command buffers.
    Recording,
    /// The slot's work is queued on the GPU.
    Submitted,
    /// Handing the image back to the presentation engine.
    Presenting,
    /// Draining the device and rebuilding the surface chain.
    Resizing,
}

/// What happened to one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented. `rebuilt` is set when the
    /// surface was rebuilt afterwards.
    Presented {
        slot: usize,
        image_index: u32,
        rebuilt: bool,
    },
    /// Acquisition found a stale surface; nothing was submitted.
    Stale,
    /// The window has no area; nothing was touched.
    Minimized,
}

/// Result of [`FrameBackend::rebuild`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// The surface had no area; the old chain was kept.
    Deferred,
    Rebuilt {
        /// A new accumulation image was created, so its contents are undefined.
        accumulation_recreated: bool,
    },
}

/// GPU operations the scheduler sequences.
///
/// Implementations own the device-side objects. Every method except
/// [`FrameBackend::wait_slot`] and [`FrameBackend::rebuild`] must not block
/// on the GPU.
pub trait FrameBackend {
    /// Current drawable size; zero while minimized.
    fn surface_extent(&self) -> vk::Extent2D;

    /// Objects each slot's buffers can hold.
    fn object_capacity(&self) -> usize;

    /// Blocks until the previous submission using `slot` has completed and
    /// marks the slot writable.
    fn wait_slot(&mut self, slot: usize) -> RendererResult<()>;

    fn acquire(&mut self, slot: usize) -> RendererResult<Acquire>;

    /// Accumulated samples are stale; start a new generation.
    fn reset_accumulation(&mut self);

    /// Copies `scene` into `slot`'s buffers.
    fn upload(&mut self, slot: usize, scene: &Scene) -> RendererResult<()>;

    /// Records compute and overlay work for `image` into `slot`'s command buffers.
    fn record(&mut self, slot: usize, image: &AcquiredImage, scene: &Scene) -> RendererResult<()>;

    /// Submits the recorded work. The last submission signals `slot`'s fence.
    fn submit(&mut self, slot: usize, image: &AcquiredImage) -> RendererResult<()>;

    fn present(&mut self, slot: usize, image: &AcquiredImage) -> RendererResult<Present>;

    /// Drains the GPU and rebuilds the surface chain for `extent`.
    ///
    /// Returns [`RebuildOutcome::Deferred`] while the surface has no area.
    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<RebuildOutcome>;
}

/// Drives one [`FrameBackend`] through the frame loop.
///
/// Owns the frame index and the pending-resize flag. The scene is passed in
/// by mutable reference on every tick; the scheduler advances its
/// accumulated frame counter after a successful submission and resets it
/// when a rebuild recreates the accumulation image.
///
/// # Example
///
/// ```no_run
/// use raytracer_renderer::{FrameBackend, FrameOutcome, FrameScheduler, RendererResult};
/// use raytracer_scene::Scene;
///
/// # fn example<B: FrameBackend>(backend: B, scene: &mut Scene) -> RendererResult<()> {
/// let mut scheduler = FrameScheduler::new(backend);
/// match scheduler.render_frame(scene)? {
///     FrameOutcome::Presented { slot, .. } => assert_eq!(slot, 0),
///     FrameOutcome::Stale | FrameOutcome::Minimized => {}
/// }
/// # Ok(())
/// # }
/// ```
pub struct FrameScheduler<B: FrameBackend> {
    backend: B,
    state: FrameState,
    frame_index: u64,
    resized: bool,
    /// Scene revision the accumulation generation was last synced to.
    seen_revision: Option<u64>,
}

impl<B: FrameBackend> FrameScheduler<B> {
    /// Starts idle at frame 0 with no resize pending.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: FrameState::Idle,
            frame_index: 0,
            resized: false,
            seen_revision: None,
        }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Frames presented so far.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Slot the next tick will use: `frame_index % FRAMES_IN_FLIGHT`.
    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_index % FRAMES_IN_FLIGHT as u64) as usize
    }

    /// Records a window resize. The surface is rebuilt after the next present.
    pub fn notify_resized(&mut self) {
        self.resized = true;
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resized
    }

    /// Runs one tick of the frame loop for `scene`.
    ///
    /// A stale surface is handled here and reported as an outcome.
    ///
    /// # Errors
    ///
    /// [`RendererError::CapacityExceeded`] is returned before any GPU work
    /// and is recoverable. Any other error is fatal. A failure before
    /// submission leaves the frame index and the scene's frame counter
    /// unchanged.
    pub fn render_frame(&mut self, scene: &mut Scene) -> RendererResult<FrameOutcome> {
        self.state = FrameState::Idle;

        let extent = self.backend.surface_extent();
        if extent.width == 0 || extent.height == 0 {
            trace!("Surface has zero area, skipping frame");
            return Ok(FrameOutcome::Minimized);
        }

        let capacity = self.backend.object_capacity();
        let required = scene.objects().len();
        if required > capacity {
            return Err(RendererError::CapacityExceeded { required, capacity });
        }

        let slot = self.current_slot();
        self.backend.wait_slot(slot)?;

        self.state = FrameState::Acquiring;
        let image = match self.backend.acquire(slot)? {
            Acquire::Image(image) => image,
            Acquire::Stale => {
                debug!("Surface stale at acquire, rebuilding");
                self.rebuild(scene, extent)?;
                self.state = FrameState::Idle;
                return Ok(FrameOutcome::Stale);
            }
        };

        self.state = FrameState::Recording;
        if self.seen_revision != Some(scene.revision()) {
            self.backend.reset_accumulation();
            self.seen_revision = Some(scene.revision());
        }
        self.backend.upload(slot, scene)?;
        self.backend.record(slot, &image, scene)?;

        self.state = FrameState::Submitted;
        self.backend.submit(slot, &image)?;
        scene.advance_frame();

        self.state = FrameState::Presenting;
        let present = self.backend.present(slot, &image)?;
        self.frame_index += 1;

        let rebuilt = if present == Present::Stale || image.suboptimal || self.resized {
            debug!(
                "Rebuilding after present (stale: {}, suboptimal: {}, resized: {})",
                present == Present::Stale,
                image.suboptimal,
                self.resized
            );
            self.rebuild(scene, extent)?
        } else {
            false
        };

        self.state = FrameState::Idle;
        Ok(FrameOutcome::Presented {
            slot,
            image_index: image.index,
            rebuilt,
        })
    }

    fn rebuild(&mut self, scene: &mut Scene, extent: vk::Extent2D) -> RendererResult<bool> {
        self.state = FrameState::Resizing;
        match self.backend.rebuild(extent)? {
            RebuildOutcome::Deferred => Ok(false),
            RebuildOutcome::Rebuilt {
                accumulation_recreated,
            } => {
                self.resized = false;
                if accumulation_recreated {
                    info!(
                        "Output resized to {}x{}, restarting accumulation",
                        extent.width, extent.height
                    );
                    scene.reset_accumulation();
                }
                Ok(true)
            }
        }
    }
}
