// =============================================================================
// HELLO TRIANGLE - Vulkan renderer
// =============================================================================
//
// Opens one window and draws a single colored triangle every frame until the
// window is closed, rebuilding the swapchain whenever the window changes size.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── FrameLoop (acquire / submit / present / recreate)        │
// │          └── Renderer (swapchain generation + sync objects)     │
// │                └── VulkanDevice (instance, surface, device)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for the previous submission (optional fence)
// 2. Acquire swapchain image
// 3. Submit the command buffer pre-recorded for that image
// 4. Present once rendering has finished
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame_loop;
mod renderer;

use anyhow::{Context, Result};
use ash::vk;
use backend::debug::log_sink;
use backend::VulkanDevice;
use config::Config;
use frame_loop::{FrameLoop, StepOutcome, WindowSignals};
use renderer::Renderer;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, origin) = Config::load();

    init_logging(&config);
    origin.log();
    log::info!("Starting Vulkan renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.resizable { "resizable" } else { "fixed" }
    );

    let event_loop = EventLoop::new()?;
    // Render continuously instead of waiting for input
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if let Some(error) = app.error.take() {
        return Err(error);
    }

    log::info!("Presented {} frames", app.frames.frames_presented());
    Ok(())
}

/// Level comes from the config file; `RUST_LOG` overrides it when set.
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let level = config.log_level();

    let mut builder = Builder::new();
    builder.filter_level(level.unwrap_or(log::LevelFilter::Info));
    builder.parse_default_env();
    builder.init();

    if level.is_none() {
        log::warn!(
            "Unknown log level '{}', defaulting to info",
            config.debug.log_level
        );
    }
}

// =============================================================================
// WINDOW STATE
// =============================================================================

/// The window plus the signals the frame loop polls once per iteration.
struct WindowState {
    window: Arc<Window>,
    close_requested: bool,
    resized: bool,
}

impl WindowState {
    fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            close_requested: false,
            resized: false,
        }
    }
}

impl WindowSignals for WindowState {
    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer holds the surface,
/// which must be destroyed before the window it was created from.
struct App {
    renderer: Option<Renderer>,
    window: Option<WindowState>,
    frames: FrameLoop,
    config: Config,
    /// First fatal error; returned from `main` after the event loop exits.
    error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            renderer: None,
            window: None,
            frames: FrameLoop::new(),
            config,
            error: None,
        }
    }

    /// Device, surface and the first swapchain generation for `window`.
    fn init_vulkan(&self, window: &WindowState) -> Result<Renderer> {
        log::info!("Initializing Vulkan...");

        let diagnostics = self.config.validation_enabled().then(log_sink);
        let device = VulkanDevice::new(&self.config.window.title, window.window.as_ref(), diagnostics)
            .context("Failed to create Vulkan device")?;

        let renderer = Renderer::new(device, &self.config, window.framebuffer_extent())
            .context("Failed to create renderer")?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
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

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => WindowState::new(Arc::new(w)),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_mut() else {
            return;
        };

        match event {
            // Handled by the next frame loop step, which drains the GPU first
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                window.close_requested = true;
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                window.resized = true;
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    window.close_requested = true;
                }
            }

            _ => {}
        }
    }

    /// One frame loop iteration per pass through the event loop.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.frames.is_closed() {
            event_loop.exit();
            return;
        }

        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_mut()) else {
            return;
        };

        match self.frames.step(renderer, window) {
            Ok(StepOutcome::Closed) => event_loop.exit(),
            Ok(_) => {}
            Err(e) => {
                log::error!("Frame failed ({:?})", e.kind());
                self.fail(event_loop, anyhow::Error::new(e).context("Render loop aborted"));
            }
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        // Renderer first: its device owns the surface created from the window
        self.renderer = None;
        self.window = None;
        log::info!("Cleanup complete");
    }
}
