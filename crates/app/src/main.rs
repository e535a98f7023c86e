//! mango - sample application
//!
//! Opens a window, creates a [`Renderer`] for it and clears every frame to
//! a slowly cycling color. Settings are read from `mango.toml` in the
//! working directory (or the path given as the first argument) when it
//! exists.

use anyhow::Result;
use glam::Vec4;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::window::WindowId;

use mango_core::Timer;
use mango_platform::{ActiveEventLoop, ControlFlow, EventLoop, Window, WindowConfig, WindowEvent};
use mango_renderer::{Renderer, RendererConfig};
use mango_rhi::ErrorKind;

const DEFAULT_CONFIG_PATH: &str = "mango.toml";

/// Colors the clear color cycles between.
const COLOR_A: Vec4 = Vec4::new(0.05, 0.07, 0.12, 1.0);
const COLOR_B: Vec4 = Vec4::new(0.35, 0.18, 0.08, 1.0);

/// Seconds for one full A -> B -> A cycle.
const CYCLE_SECS: f32 = 6.0;

/// Contents of `mango.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    window: WindowConfig,
    renderer: RendererConfig,
}

fn clear_color_at(seconds: f32) -> [f32; 4] {
    let phase = (seconds / CYCLE_SECS) * std::f32::consts::TAU;
    let t = 0.5 - 0.5 * phase.cos();
    COLOR_A.lerp(COLOR_B, t).to_array()
}

struct App {
    config: AppConfig,
    // Dropped before the window it presents to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    timer: Timer,
}

impl App {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            timer: Timer::new(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let renderer_config = &self.config.renderer;
        let window = Window::with_config(
            event_loop,
            &self.config.window,
            renderer_config.width,
            renderer_config.height,
        )?;
        let renderer = Renderer::new(renderer_config, Some(window.native_window()?))?;

        info!(
            "Initialization complete ({} {:?}), entering main loop",
            renderer.extent(),
            renderer.swapchain_format()
        );
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if renderer.is_minimized() {
            return;
        }

        self.timer.tick();
        renderer.set_clear_color(clear_color_at(self.timer.elapsed_secs()));

        let result = renderer.render_frame_with(|frame| {
            let cmd = frame.command_buffer();
            cmd.begin_debug_region("clear", [0.8, 0.8, 0.8, 1.0])?;
            cmd.end_debug_region()
        });

        match result {
            Ok(()) => {
                if self.timer.frame_count() % 600 == 0 {
                    debug!(
                        "{:.1} fps average, {:?}",
                        self.timer.average_fps(),
                        renderer.stats()
                    );
                }
            }
            Err(e) if e.kind() == ErrorKind::Device => {
                error!("Device failure, shutting down: {}", e);
                event_loop.exit();
            }
            Err(e) => warn!("Frame dropped: {}", e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                error!("Failed to initialize: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Some(renderer) = self.renderer.as_ref() {
                    if let Err(e) = renderer.wait_idle() {
                        error!("Failed to wait for device idle: {}", e);
                    }
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.handle_resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Release GPU objects while the window still exists.
        self.renderer = None;
        info!("Exiting after {} frames", self.timer.frame_count());
    }
}

fn main() -> Result<()> {
    mango_core::init_logging();
    info!("Starting mango");

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config: AppConfig = mango_core::config::load_toml_or_default(&path)?;
    config.renderer.validate()?;
    info!("Configuration loaded from {} ({:?} backend)", path, config.renderer.backend);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
