// =============================================================================
// DEFERRED RENDERER - Demo application
// =============================================================================
//
// Drives the frame core from a winit event loop.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, timing)                              │
// │    └── Renderer (frame driver, worker pool, render graph)       │
// │          └── VulkanContext (device, swapchain, memory)          │
// │                └── Demo scene (meshes, materials)               │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW (per redraw):
// 1. begin_frame with this frame's camera
// 2. Queue draws, lights and overlays from the demo scene
// 3. end_frame: acquire, record in parallel, submit, present
//
// `--headless [frames]` runs the same loop against the in-memory backend.
//
// =============================================================================

mod demo;

use anyhow::{Context, Result};
use ash::vk;
use deferred_renderer::backend::{Completion, HeadlessContext, VulkanContext};
use deferred_renderer::gpu::GpuContext;
use deferred_renderer::{
    Config, FrameCamera, FrameOutcome, RenderError, Renderer, RendererSettings,
};
use demo::DemoScene;
use glam::{Mat4, Vec3};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting deferred renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("--headless") {
        let frames = match args.next() {
            Some(n) => n.parse().context("--headless expects a frame count")?,
            None => 120,
        };
        return run_headless(&config, frames);
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging at the configured level; RUST_LOG still wins
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.debug.log_filter());
    builder.parse_env("RUST_LOG");
    builder.init();
}

/// Smoke run without a window or GPU.
fn run_headless(config: &Config, frames: u32) -> Result<()> {
    let extent = vk::Extent2D {
        width: config.window.width,
        height: config.window.height,
    };
    let headless = Arc::new(HeadlessContext::new(extent, 3, Completion::Immediate));
    let gpu: Arc<dyn GpuContext> = headless.clone();
    let scene = Arc::new(DemoScene::new(&gpu)?);
    let mut renderer = Renderer::new(
        Arc::clone(&gpu),
        scene.clone(),
        extent,
        RendererSettings::from_config(config),
    )?;

    for frame in 0..frames {
        let time = frame as f32 / 60.0;
        renderer.begin_frame(orbit_camera(time, extent));
        scene.populate(&mut renderer, time);
        renderer.end_frame()?;
    }

    let stats = renderer.stats();
    log::info!(
        "Headless run: {} presented, {} skipped, {} dropped, {} recreations",
        stats.presented,
        stats.skipped,
        stats.dropped,
        stats.recreations
    );

    drop(renderer);
    let violations = headless.violations();
    if !violations.is_empty() {
        for v in &violations {
            log::error!("{}", v);
        }
        anyhow::bail!("{} synchronization violations", violations.len());
    }
    Ok(())
}

/// Camera circling the origin, Vulkan clip space (y down).
fn orbit_camera(time: f32, extent: vk::Extent2D) -> FrameCamera {
    let position = Vec3::new((time * 0.2).sin() * 8.0, 4.0, (time * 0.2).cos() * 8.0);
    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    let mut projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
    projection.y_axis.y *= -1.0;
    FrameCamera {
        view: Mat4::look_at_rh(position, Vec3::ZERO, Vec3::Y),
        projection,
        position,
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Main application struct.
///
/// IMPORTANT: Field order matters for Drop! The renderer goes before the
/// scene, both before the GPU context, and the window outlives the surface.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,
    scene: Option<Arc<DemoScene>>,
    gpu: Option<Arc<dyn GpuContext>>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION & STATE
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,
    /// Set when the renderer can no longer continue; returned from main
    fatal: Option<anyhow::Error>,
    start: Instant,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            renderer: None,
            scene: None,
            gpu: None,
            window: None,
            is_fullscreen,
            config,
            fatal: None,
            start: now,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Creates the Vulkan context, the demo scene and the renderer.
    ///
    /// The swapchain is built lazily by the renderer's first frame.
    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        // STEP 1: Vulkan device + surface for this window
        let gpu: Arc<dyn GpuContext> = Arc::new(
            VulkanContext::new(
                &self.config,
                window.raw_display_handle(),
                window.raw_window_handle(),
            )
            .context("Failed to initialize Vulkan")?,
        );

        // STEP 2: Scene resources
        let scene = Arc::new(DemoScene::new(&gpu).context("Failed to create demo scene")?);

        // STEP 3: Frame core
        let size = window.inner_size();
        let renderer = Renderer::new(
            Arc::clone(&gpu),
            scene.clone(),
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            RendererSettings::from_config(&self.config),
        )
        .context("Failed to create renderer")?;

        self.renderer = Some(renderer);
        self.scene = Some(scene);
        self.gpu = Some(gpu);
        Ok(())
    }

    // =========================================================================
    // RENDER FRAME
    // =========================================================================

    /// Returns true if a frame reached the screen.
    fn render_frame(&mut self) -> Result<bool, RenderError> {
        let (Some(renderer), Some(scene), Some(window)) =
            (self.renderer.as_mut(), self.scene.as_ref(), self.window.as_ref())
        else {
            return Ok(false);
        };

        let size = window.inner_size();
        let extent = vk::Extent2D {
            width: size.width,
            height: size.height,
        };
        let time = self.start.elapsed().as_secs_f32();

        renderer.begin_frame(orbit_camera(time, extent));
        scene.populate(renderer, time);

        let outcome = renderer.end_frame()?;
        Ok(matches!(outcome, FrameOutcome::Presented { .. }))
    }

    // =========================================================================
    // FULLSCREEN TOGGLE
    // =========================================================================

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
            // The resize event that follows rebuilds the swapchain
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let (Some(window), Some(renderer)) = (&self.window, &self.renderer) {
                let stats = renderer.stats();
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{} lights, {} dropped]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    renderer.lights().len(),
                    stats.dropped
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Create window with settings from config
        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:?}", e);
            self.fatal = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED (0x0 while minimized; the renderer skips frames)
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(RenderError::ResourceExhausted(e)) => {
                    log::error!("Renderer out of resources, exiting: {}", e);
                    self.fatal = Some(anyhow::anyhow!("resource exhaustion: {e}"));
                    event_loop.exit();
                }
                Err(e) => {
                    log::error!("Render error: {}", e);
                }
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            // ESC - Quit application
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            // F11 - Toggle fullscreen
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer resources...");

        if let Some(renderer) = self.renderer.as_ref() {
            let stats = renderer.stats();
            log::info!(
                "Frames: {} presented, {} skipped, {} dropped, {} swapchain recreations",
                stats.presented,
                stats.skipped,
                stats.dropped,
                stats.recreations
            );
        }

        // Renderer drains the device in its own Drop; then the scene's
        // buffers go, then the context itself
        self.renderer = None;
        self.scene = None;
        self.gpu = None;

        log::info!("Cleanup complete");
    }
}
