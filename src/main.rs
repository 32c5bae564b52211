use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use sphere_rt::camera::{Camera, CameraInput};
use sphere_rt::frame::{FramePipeline, RendererState, TickOutcome};
use sphere_rt::timing::FrameTimer;
use sphere_rt::vk::{VulkanBackend, VulkanDevice, VulkanInstance};
use sphere_rt::{RendererConfig, RendererError, Result, MAX_SPHERES};

/// Pixels of trackpad scroll that count as one wheel notch.
const PIXELS_PER_NOTCH: f32 = 40.0;

#[derive(Default)]
struct HeldKeys {
    left: bool,
    right: bool,
    forward: bool,
    back: bool,
}

impl HeldKeys {
    fn set(&mut self, key: KeyCode, down: bool) -> bool {
        let slot = match key {
            KeyCode::KeyA | KeyCode::ArrowLeft => &mut self.left,
            KeyCode::KeyD | KeyCode::ArrowRight => &mut self.right,
            KeyCode::KeyW | KeyCode::ArrowUp => &mut self.forward,
            KeyCode::KeyS | KeyCode::ArrowDown => &mut self.back,
            _ => return false,
        };
        *slot = down;
        true
    }

    fn axis(neg: bool, pos: bool) -> f32 {
        (pos as i32 - neg as i32) as f32
    }

    fn input(&self, wheel: f32) -> CameraInput {
        CameraInput {
            strafe: Self::axis(self.left, self.right),
            advance: Self::axis(self.back, self.forward),
            wheel,
        }
    }
}

struct Renderer {
    pipeline: FramePipeline<VulkanBackend>,
    camera: Camera,
    timer: FrameTimer,
    started: Instant,
    last_frame: Instant,
}

impl Renderer {
    fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let display_handle = window
            .display_handle()
            .map_err(|e| RendererError::Window(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RendererError::Window(e.to_string()))?
            .as_raw();

        let size = window.inner_size();
        let instance = VulkanInstance::new(display_handle, window_handle, config.validation)?;
        let device = VulkanDevice::new(&instance)?;
        let backend = VulkanBackend::new(instance, device, config, size.width, size.height)?;

        let extent = backend.extent();
        let state = RendererState::new(
            config.scene_config(),
            config.show_grid,
            (extent.width, extent.height),
        );
        let camera = Camera::for_area(&state.area);
        let now = Instant::now();
        Ok(Renderer {
            pipeline: FramePipeline::new(backend, state),
            camera,
            timer: FrameTimer::default(),
            started: now,
            last_frame: now,
        })
    }

    fn regenerate(&mut self, seed_step: u32, count: Option<u32>) {
        let mut cfg = self.pipeline.state().scene_config;
        cfg.seed = cfg.seed.wrapping_add(seed_step);
        if let Some(count) = count {
            cfg.target_count = count.clamp(1, MAX_SPHERES);
        }
        log::info!("Regenerating {} spheres with seed {:#x}", cfg.target_count, cfg.seed);
        self.pipeline.request_scene_generation(cfg);
        self.camera = Camera::for_area(&self.pipeline.state().area);
    }

    fn frame(&mut self, framebuffer: (u32, u32), input: &CameraInput) -> Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame);
        self.last_frame = now;

        if self.camera.update(dt.as_secs_f32(), input) {
            self.pipeline.state_mut().accumulation.request_reset();
        }

        match self.pipeline.tick(framebuffer, &self.camera.params())? {
            TickOutcome::Presented { .. } => {
                self.timer.record(now.duration_since(self.started), dt);
            }
            TickOutcome::Recreated { .. } | TickOutcome::Stale | TickOutcome::Deferred => {}
        }
        Ok(())
    }
}

struct App {
    config: RendererConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    keys: HeldKeys,
    wheel: f32,
    failure: Option<RendererError>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        App {
            config,
            window: None,
            renderer: None,
            keys: HeldKeys::default(),
            wheel: 0.0,
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: RendererError) {
        log::error!("{err}");
        self.failure = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.pipeline.shutdown() {
                log::warn!("Shutdown did not drain cleanly: {e}");
            }
        }
        event_loop.exit();
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode, state: ElementState) {
        let down = state == ElementState::Pressed;
        if self.keys.set(key, down) || !down {
            return;
        }
        if key == KeyCode::Escape {
            return self.shutdown(event_loop);
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match key {
            KeyCode::KeyG => {
                let state = renderer.pipeline.state_mut();
                state.show_grid = !state.show_grid;
                state.accumulation.request_reset();
                log::info!("Grid overlay {}", if state.show_grid { "on" } else { "off" });
            }
            KeyCode::KeyR => renderer.regenerate(1, None),
            KeyCode::Equal | KeyCode::NumpadAdd => {
                let count = renderer.pipeline.state().scene_config.target_count;
                renderer.regenerate(0, Some(count.saturating_mul(2)));
            }
            KeyCode::Minus | KeyCode::NumpadSubtract => {
                let count = renderer.pipeline.state().scene_config.target_count;
                renderer.regenerate(0, Some(count / 2));
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title("sphere-rt")
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.width,
                self.config.height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, RendererError::Window(e.to_string())),
        };
        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => return self.fail(event_loop, e),
        }
        window.request_redraw();
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::Resized(_) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.pipeline.notify_resized();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state,
                        ..
                    },
                ..
            } => self.handle_key(event_loop, key, state),
            WindowEvent::MouseWheel { delta, .. } => {
                self.wheel += match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32 / PIXELS_PER_NOTCH,
                };
            }
            WindowEvent::RedrawRequested => {
                let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut())
                else {
                    return;
                };
                let size = window.inner_size();
                let input = self.keys.input(std::mem::take(&mut self.wheel));
                let result = renderer.frame((size.width, size.height), &input);
                window.request_redraw();
                if let Err(e) = result {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }
}

fn main() -> ExitCode {
    let config = RendererConfig::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = config.log_level {
        logger.filter_level(level.filter());
    }
    logger.init();

    if let Err(e) = config.validate() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    log::info!(
        "sphere-rt: {} spheres, radius {}..{}, seed {:#x}",
        config.sphere_target_count,
        config.sphere_min_radius,
        config.sphere_max_radius,
        config.seed
    );
    log::info!("Controls: WASD/arrows move, wheel zooms, G grid, R reseed, +/- sphere count, Esc quits");

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut app = App::new(config);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop failed: {e}");
        return ExitCode::FAILURE;
    }

    match app.failure {
        Some(_) => ExitCode::FAILURE,
        None => ExitCode::SUCCESS,
    }
}
