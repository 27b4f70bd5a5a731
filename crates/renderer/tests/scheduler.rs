//! Frame loop ordering against a simulated GPU timeline.

use std::collections::{BTreeSet, VecDeque};

use ash::vk;
use glam::Vec3;

use raytracer_renderer::compute_stage::dispatch_groups;
use raytracer_renderer::{
    FRAMES_IN_FLIGHT, FrameBackend, FrameOutcome, FrameScheduler, FrameState, RebuildOutcome,
    RendererError, RendererResult,
};
use raytracer_rhi::RhiError;
use raytracer_rhi::surface_chain::{Acquire, AcquiredImage, Present};
use raytracer_scene::{Camera, Object, Scene};

const IMAGE_COUNT: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Event {
    Wait(usize),
    Acquire(usize),
    ResetAccumulation,
    Upload { slot: usize, frame_count: u32 },
    Record { slot: usize, image: u32, groups: (u32, u32) },
    Submit(usize),
    Present { slot: usize, image: u32 },
    Rebuild(vk::Extent2D),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AcquireScript {
    Ok,
    Suboptimal,
    Stale,
}

struct MockBackend {
    extent: vk::Extent2D,
    chain_extent: vk::Extent2D,
    capacity: usize,
    events: Vec<Event>,
    /// Submitted slots the simulated GPU has not finished, oldest first.
    gpu_queue: VecDeque<usize>,
    acquire_script: VecDeque<AcquireScript>,
    present_script: VecDeque<Present>,
    next_image: u32,
    /// Images handed to the host and not yet presented.
    outstanding: BTreeSet<u32>,
    accumulation_generation: u64,
    defer_rebuilds: bool,
    /// Device errors returned by the next call of each operation.
    fail_acquire: Option<vk::Result>,
    fail_submit: Option<vk::Result>,
    fail_present: Option<vk::Result>,
}

impl MockBackend {
    fn new(width: u32, height: u32) -> Self {
        let extent = vk::Extent2D { width, height };
        Self {
            extent,
            chain_extent: extent,
            capacity: 16,
            events: Vec::new(),
            gpu_queue: VecDeque::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_image: 0,
            outstanding: BTreeSet::new(),
            accumulation_generation: 0,
            defer_rebuilds: false,
            fail_acquire: None,
            fail_submit: None,
            fail_present: None,
        }
    }

    fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| matches(e)).count()
    }

    fn position(&self, matches: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.iter().position(matches)
    }
}

impl FrameBackend for MockBackend {
    fn surface_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn object_capacity(&self) -> usize {
        self.capacity
    }

    fn wait_slot(&mut self, slot: usize) -> RendererResult<()> {
        self.events.push(Event::Wait(slot));
        // The GPU completes in submission order.
        if let Some(pos) = self.gpu_queue.iter().position(|&s| s == slot) {
            self.gpu_queue.drain(..=pos);
        }
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> RendererResult<Acquire> {
        self.events.push(Event::Acquire(slot));
        if let Some(result) = self.fail_acquire.take() {
            return Err(RhiError::from(result).into());
        }
        let script = self.acquire_script.pop_front().unwrap_or(AcquireScript::Ok);
        if script == AcquireScript::Stale {
            return Ok(Acquire::Stale);
        }

        let index = self.next_image;
        self.next_image = (self.next_image + 1) % IMAGE_COUNT;
        assert!(
            self.outstanding.insert(index),
            "image {index} acquired twice"
        );
        Ok(Acquire::Image(AcquiredImage {
            index,
            image: vk::Image::null(),
            view: vk::ImageView::null(),
            suboptimal: script == AcquireScript::Suboptimal,
        }))
    }

    fn reset_accumulation(&mut self) {
        self.events.push(Event::ResetAccumulation);
        self.accumulation_generation += 1;
    }

    fn upload(&mut self, slot: usize, scene: &Scene) -> RendererResult<()> {
        assert!(
            !self.gpu_queue.contains(&slot),
            "slot {slot} written while the GPU still reads it"
        );
        self.events.push(Event::Upload {
            slot,
            frame_count: scene.frame_count(),
        });
        Ok(())
    }

    fn record(&mut self, slot: usize, image: &AcquiredImage, _scene: &Scene) -> RendererResult<()> {
        self.events.push(Event::Record {
            slot,
            image: image.index,
            groups: dispatch_groups(self.chain_extent),
        });
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image: &AcquiredImage) -> RendererResult<()> {
        self.events.push(Event::Submit(slot));
        if let Some(result) = self.fail_submit.take() {
            return Err(RhiError::from(result).into());
        }
        self.gpu_queue.push_back(slot);
        assert!(self.gpu_queue.len() <= FRAMES_IN_FLIGHT);
        Ok(())
    }

    fn present(&mut self, slot: usize, image: &AcquiredImage) -> RendererResult<Present> {
        if let Some(result) = self.fail_present.take() {
            return Err(RhiError::from(result).into());
        }
        self.events.push(Event::Present {
            slot,
            image: image.index,
        });
        assert!(
            self.outstanding.remove(&image.index),
            "presented an image that was not acquired"
        );
        Ok(self.present_script.pop_front().unwrap_or(Present::Ok))
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> RendererResult<RebuildOutcome> {
        if self.defer_rebuilds {
            return Ok(RebuildOutcome::Deferred);
        }
        self.events.push(Event::Rebuild(extent));
        // Rebuilding drains the device.
        self.gpu_queue.clear();
        self.next_image = 0;

        let accumulation_recreated = self.chain_extent != extent;
        self.chain_extent = extent;
        Ok(RebuildOutcome::Rebuilt {
            accumulation_recreated,
        })
    }
}

fn scheduler(width: u32, height: u32) -> FrameScheduler<MockBackend> {
    FrameScheduler::new(MockBackend::new(width, height))
}

fn scene() -> Scene {
    Scene::random(4, Some(7))
}

fn presented_slot(outcome: FrameOutcome) -> usize {
    match outcome {
        FrameOutcome::Presented { slot, .. } => slot,
        other => panic!("expected a presented frame, got {other:?}"),
    }
}

#[test]
fn test_slots_rotate_and_are_never_overwritten_in_flight() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();

    for frame in 0..100 {
        let outcome = scheduler.render_frame(&mut scene).unwrap();
        assert_eq!(presented_slot(outcome), frame % FRAMES_IN_FLIGHT);
        assert_eq!(scheduler.state(), FrameState::Idle);
    }

    assert_eq!(scheduler.frame_index(), 100);
    assert_eq!(scene.frame_count(), 100);
    let backend = scheduler.backend();
    assert_eq!(backend.count(|e| matches!(e, Event::Submit(_))), 100);
    assert!(backend.outstanding.is_empty());
}

#[test]
fn test_each_tick_orders_gpu_work() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();
    scheduler.render_frame(&mut scene).unwrap();

    assert_eq!(
        scheduler.backend().events,
        vec![
            Event::Wait(0),
            Event::Acquire(0),
            Event::ResetAccumulation,
            Event::Upload {
                slot: 0,
                frame_count: 0
            },
            Event::Record {
                slot: 0,
                image: 0,
                groups: (100, 75)
            },
            Event::Submit(0),
            Event::Present { slot: 0, image: 0 },
        ]
    );
}

#[test]
fn test_stale_acquire_rebuilds_without_gpu_work() {
    let mut scheduler = scheduler(800, 600);
    scheduler
        .backend_mut()
        .acquire_script
        .push_back(AcquireScript::Stale);
    let mut scene = scene();

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(outcome, FrameOutcome::Stale);
    assert_eq!(scheduler.frame_index(), 0);
    assert_eq!(scene.frame_count(), 0);

    let extent = vk::Extent2D {
        width: 800,
        height: 600,
    };
    assert_eq!(
        scheduler.backend().events,
        vec![Event::Wait(0), Event::Acquire(0), Event::Rebuild(extent)]
    );

    // The next tick reuses the same slot and proceeds normally.
    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(presented_slot(outcome), 0);
    assert_eq!(scene.frame_count(), 1);
}

#[test]
fn test_accumulation_follows_scene_revision() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();

    for _ in 0..3 {
        scheduler.render_frame(&mut scene).unwrap();
    }
    assert_eq!(scheduler.backend().accumulation_generation, 1);
    assert_eq!(scene.frame_count(), 3);

    let moved = scene.update_camera(|camera| camera.translate(Vec3::new(0.0, 0.0, 1.0)));
    assert!(moved);
    scheduler.render_frame(&mut scene).unwrap();

    let backend = scheduler.backend();
    assert_eq!(backend.accumulation_generation, 2);
    // The first frame of the new generation uploads a zero frame count.
    assert_eq!(
        backend.events.iter().rev().find_map(|e| match e {
            Event::Upload { frame_count, .. } => Some(*frame_count),
            _ => None,
        }),
        Some(0)
    );
    assert_eq!(scene.frame_count(), 1);
}

#[test]
fn test_small_camera_drift_keeps_accumulating() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();
    scheduler.render_frame(&mut scene).unwrap();

    let moved = scene.update_camera(|camera| camera.translate(Vec3::new(0.001, 0.0, 0.0)));
    assert!(!moved);
    scheduler.render_frame(&mut scene).unwrap();

    assert_eq!(scheduler.backend().accumulation_generation, 1);
    assert_eq!(scene.frame_count(), 2);
}

#[test]
fn test_capacity_checked_before_any_gpu_work() {
    let mut scheduler = scheduler(800, 600);
    scheduler.backend_mut().capacity = 4;
    let mut scene = scene();
    scene.add_object(Object::new(Vec3::ZERO, 1.0, Vec3::ONE));

    let err = scheduler.render_frame(&mut scene).unwrap_err();
    assert!(matches!(
        err,
        RendererError::CapacityExceeded {
            required: 5,
            capacity: 4
        }
    ));
    assert!(err.is_recoverable());
    assert!(scheduler.backend().events.is_empty());

    scheduler.backend_mut().capacity = 8;
    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(presented_slot(outcome), 0);
}

#[test]
fn test_every_acquired_image_is_presented() {
    let mut scheduler = scheduler(800, 600);
    {
        let backend = scheduler.backend_mut();
        backend.acquire_script.extend([
            AcquireScript::Ok,
            AcquireScript::Stale,
            AcquireScript::Suboptimal,
            AcquireScript::Ok,
            AcquireScript::Stale,
        ]);
        backend
            .present_script
            .extend([Present::Ok, Present::Stale, Present::Ok, Present::Stale]);
    }
    let mut scene = scene();

    for _ in 0..50 {
        scheduler.render_frame(&mut scene).unwrap();
        assert!(scheduler.backend().outstanding.is_empty());
    }

    let backend = scheduler.backend();
    assert_eq!(
        backend.count(|e| matches!(e, Event::Acquire(_))) - 2,
        backend.count(|e| matches!(e, Event::Present { .. }))
    );
}

#[test]
fn test_resize_rebuilds_after_present() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();
    scheduler.render_frame(&mut scene).unwrap();
    scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(scene.frame_count(), 2);

    let resized = vk::Extent2D {
        width: 1024,
        height: 768,
    };
    scheduler.backend_mut().extent = resized;
    scheduler.notify_resized();
    assert!(scheduler.resize_pending());

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented { rebuilt: true, .. }
    ));
    assert!(!scheduler.resize_pending());

    let backend = scheduler.backend();
    let present = backend
        .events
        .iter()
        .rposition(|e| matches!(e, Event::Present { .. }))
        .unwrap();
    assert_eq!(backend.events.last(), Some(&Event::Rebuild(resized)));
    assert_eq!(present, backend.events.len() - 2);

    // A new accumulation image restarts the average.
    assert_eq!(scene.frame_count(), 0);

    scheduler.render_frame(&mut scene).unwrap();
    let backend = scheduler.backend();
    assert_eq!(
        backend.events.iter().rev().find_map(|e| match e {
            Event::Record { groups, .. } => Some(*groups),
            _ => None,
        }),
        Some((128, 96))
    );
}

#[test]
fn test_deferred_rebuild_stays_pending() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();
    scheduler.backend_mut().defer_rebuilds = true;
    scheduler.notify_resized();

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented { rebuilt: false, .. }
    ));
    assert!(scheduler.resize_pending());

    scheduler.backend_mut().defer_rebuilds = false;
    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented { rebuilt: true, .. }
    ));
    assert!(!scheduler.resize_pending());
}

#[test]
fn test_minimized_window_skips_frame() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();
    scheduler.backend_mut().extent = vk::Extent2D {
        width: 0,
        height: 600,
    };

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(outcome, FrameOutcome::Minimized);
    assert!(scheduler.backend().events.is_empty());
    assert_eq!(scheduler.frame_index(), 0);
    assert_eq!(scene.frame_count(), 0);
}

#[test]
fn test_suboptimal_acquire_still_renders_then_rebuilds() {
    let mut scheduler = scheduler(800, 600);
    scheduler
        .backend_mut()
        .acquire_script
        .push_back(AcquireScript::Suboptimal);
    let mut scene = scene();

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Presented {
            slot: 0,
            image_index: 0,
            rebuilt: true
        }
    );

    let backend = scheduler.backend();
    let present = backend
        .position(|e| matches!(e, Event::Present { .. }))
        .unwrap();
    let rebuild = backend
        .position(|e| matches!(e, Event::Rebuild(_)))
        .unwrap();
    assert!(present < rebuild);
    // Same extent: the accumulation image survives and keeps its samples.
    assert_eq!(scene.frame_count(), 1);
}

#[test]
fn test_stale_present_rebuilds_same_extent() {
    let mut scheduler = scheduler(640, 480);
    scheduler.backend_mut().present_script.push_back(Present::Stale);
    let mut scene = scene();

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented { rebuilt: true, .. }
    ));
    assert_eq!(scheduler.backend().accumulation_generation, 1);
    assert_eq!(scene.frame_count(), 1);

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert!(matches!(
        outcome,
        FrameOutcome::Presented { rebuilt: false, .. }
    ));
}

#[test]
fn test_empty_scene_dispatch_covers_output() {
    let mut camera = Camera::default();
    camera.set_position(Vec3::ZERO);
    let mut scene = Scene::new(camera, Vec::new());
    let mut scheduler = scheduler(800, 600);

    let outcome = scheduler.render_frame(&mut scene).unwrap();
    assert_eq!(presented_slot(outcome), 0);
    assert!(scheduler.backend().events.contains(&Event::Record {
        slot: 0,
        image: 0,
        groups: (100, 75)
    }));
}

fn assert_fatal(result: RendererResult<FrameOutcome>) {
    match result {
        Err(e @ RendererError::Rhi(_)) => assert!(!e.is_recoverable()),
        other => panic!("expected a fatal device error, got {other:?}"),
    }
}

#[test]
fn test_failed_acquire_is_fatal_and_touches_nothing() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();
    scheduler.render_frame(&mut scene).unwrap();
    scheduler.backend_mut().events.clear();

    scheduler.backend_mut().fail_acquire = Some(vk::Result::ERROR_DEVICE_LOST);
    assert_fatal(scheduler.render_frame(&mut scene));

    let backend = scheduler.backend();
    assert_eq!(backend.events, vec![Event::Wait(1), Event::Acquire(1)]);
    assert_eq!(scheduler.frame_index(), 1);
    assert_eq!(scene.frame_count(), 1);
}

#[test]
fn test_failed_submit_does_not_advance() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();

    scheduler.backend_mut().fail_submit = Some(vk::Result::ERROR_DEVICE_LOST);
    assert_fatal(scheduler.render_frame(&mut scene));

    let backend = scheduler.backend();
    assert_eq!(backend.count(|e| matches!(e, Event::Submit(_))), 1);
    assert_eq!(backend.count(|e| matches!(e, Event::Present { .. })), 0);
    assert_eq!(scheduler.frame_index(), 0);
    assert_eq!(scene.frame_count(), 0);
    assert_eq!(scheduler.state(), FrameState::Submitted);
}

#[test]
fn test_failed_present_is_fatal() {
    let mut scheduler = scheduler(800, 600);
    let mut scene = scene();

    scheduler.backend_mut().fail_present = Some(vk::Result::ERROR_SURFACE_LOST_KHR);
    assert_fatal(scheduler.render_frame(&mut scene));

    assert_eq!(scheduler.frame_index(), 0);
    assert_eq!(
        scheduler
            .backend()
            .count(|e| matches!(e, Event::Rebuild(_))),
        0
    );
}
