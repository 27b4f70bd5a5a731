//! Progressive Vulkan ray tracer - main entry point.
//!
//! Renders a scene of spheres with a compute path tracer, accumulating
//! samples while the view is still.

mod controls;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use raytracer_core::{AppConfig, FpsCounter, Timer};
use raytracer_platform::{InputState, Window};
use raytracer_renderer::Renderer;
use raytracer_scene::{CameraController, Scene};

use crate::controls::{Command, OBJECT_MOVE_SPEED, OBJECT_RESIZE_SPEED};

#[derive(Parser, Debug)]
#[command(version, about = "Progressive Vulkan compute ray tracer")]
struct Cli {
    /// Configuration file; missing files fall back to defaults.
    #[arg(long, default_value = AppConfig::DEFAULT_PATH)]
    config: PathBuf,

    /// Enable the Vulkan validation layer.
    #[arg(long)]
    validation: bool,

    /// Seed for the random scene.
    #[arg(long)]
    seed: Option<u64>,
}

struct App {
    config: AppConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    scene: Scene,
    controller: CameraController,
    input: InputState,
    timer: Timer,
    fps: FpsCounter,
    /// First fatal error; reported once the renderer is torn down.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: AppConfig) -> Self {
        let scene = Scene::random(config.scene.object_count, config.scene.seed)
            .with_movement_threshold(config.scene.movement_threshold);
        let controller = CameraController::new(config.camera.move_speed, config.camera.look_speed);

        Self {
            config,
            window: None,
            renderer: None,
            scene,
            controller,
            input: InputState::new(),
            timer: Timer::new(),
            fps: FpsCounter::new(),
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window_config = &self.config.window;
        let window = Window::new(
            event_loop,
            window_config.width,
            window_config.height,
            &window_config.title,
        )?;

        let mut renderer_config = self.config.renderer.clone();
        renderer_config.object_capacity = renderer_config
            .object_capacity
            .max(self.scene.objects().len());
        let renderer = Renderer::new(&window, &renderer_config)?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        self.timer = Timer::new();
        Ok(())
    }

    /// Records a fatal error and leaves the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    /// Destroys the renderer, then the window. The surface must be
    /// destroyed before its window.
    fn shutdown(&mut self) {
        self.renderer = None;
        self.window = None;
    }

    /// Applies held keys and one-shot commands to the scene.
    fn update(&mut self, event_loop: &ActiveEventLoop, delta_secs: f32) {
        for command in controls::commands(&self.input) {
            match command {
                Command::ResetAccumulation => {
                    info!("Accumulation reset");
                    self.scene.reset_accumulation();
                }
                Command::SelectNext => {
                    let selected = self.scene.select_next();
                    info!("Selected object: {:?}", selected);
                }
                Command::AddObject => {
                    let index = self.scene.add_random_object();
                    info!("Added sphere {}", index);
                }
                Command::ToggleOverlay => {
                    if let Some(renderer) = self.renderer.as_mut() {
                        let visible = renderer.toggle_overlay();
                        info!("Overlay {}", if visible { "shown" } else { "hidden" });
                    }
                }
                Command::Exit => {
                    info!("Escape pressed, shutting down");
                    event_loop.exit();
                }
            }
        }

        self.controller.apply(
            &mut self.scene,
            controls::camera_motion(&self.input),
            delta_secs,
        );

        let motion = controls::object_motion(&self.input);
        if motion != glam::Vec3::ZERO {
            self.scene
                .move_selected(motion * OBJECT_MOVE_SPEED * delta_secs);
        }
        let resize = controls::object_resize(&self.input);
        if resize != 0.0 {
            self.scene
                .resize_selected(resize * OBJECT_RESIZE_SPEED * delta_secs);
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let delta = self.timer.tick();
        self.update(event_loop, delta.as_secs_f32());

        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match renderer.render(&mut self.scene) {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!("{}, growing object buffers", e);
                if let Err(e) = renderer.grow_objects(self.scene.objects().len()) {
                    self.fail(
                        event_loop,
                        anyhow::Error::new(e).context("Failed to grow object buffers"),
                    );
                }
                return;
            }
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Render error"));
                return;
            }
        }

        if let Some(fps) = self.fps.frame(delta)
            && let Some(window) = self.window.as_ref()
        {
            window.set_title(&format!(
                "{} [{} FPS] {} spp",
                window.base_title(),
                fps,
                self.scene.frame_count()
            ));
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("Initialization failed"));
                return;
            }
            info!("Initialization complete, entering main loop");
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::Focused(false) => self.input.release_all(),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        if let Some(ref window) = self.window {
            // Sleep until the next event while there is nothing to draw.
            if window.is_minimized() {
                event_loop.set_control_flow(ControlFlow::Wait);
            } else {
                event_loop.set_control_flow(ControlFlow::Poll);
                window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    raytracer_core::init_logging();
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    if cli.validation {
        config.renderer.validation = true;
    }
    if cli.seed.is_some() {
        config.scene.seed = cli.seed;
    }
    info!("Starting ray tracer");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    app.shutdown();

    exit_result(app.fatal.take())
}

/// Turns the recorded fatal error, if any, into the process result.
fn exit_result(fatal: Option<anyhow::Error>) -> Result<()> {
    match fatal {
        Some(e) => {
            error!("{:#}", e);
            Err(e.context("Ray tracer stopped after a fatal error"))
        }
        None => {
            info!("Ray tracer exited cleanly");
            Ok(())
        }
    }
}
