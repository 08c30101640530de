//! Lumen demo application.
//!
//! Opens a window, renders a spinning quad, and exercises the interactive
//! paths: live resizing and the wireframe toggle (`W`).

use anyhow::Context;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use lumen_core::{Error, RendererConfig};
use lumen_platform::Window;
use lumen_renderer::Renderer;

struct App {
    config: RendererConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    /// Set when the loop is exited by a failure; `main` turns it into a
    /// non-zero exit status.
    exit_error: Option<Error>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            exit_error: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let result = Window::new(
            event_loop,
            self.config.width,
            self.config.height,
            &self.config.title,
        )
        .and_then(|window| {
            let renderer = Renderer::new(&window, &self.config)?;
            Ok((window, renderer))
        });

        match result {
            Ok((window, renderer)) => {
                window.request_redraw();
                self.window = Some(window);
                self.renderer = Some(renderer);
            }
            Err(e) => {
                error!("Failed to initialize renderer: {}", e);
                self.exit_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &mut self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = &mut self.renderer {
                    renderer.handle_resize(size.width, size.height);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyW),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(renderer) = &mut self.renderer {
                    match renderer.toggle_wireframe() {
                        Ok(enabled) => info!(
                            "Wireframe {}",
                            if enabled { "enabled" } else { "disabled" }
                        ),
                        Err(e) => error!("Failed to toggle wireframe: {}", e),
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
                    return;
                };

                if window.is_zero_sized() {
                    // Minimized; skip rendering but keep the loop alive
                    return;
                }

                if let Err(e) = renderer.render_frame() {
                    error!("Frame failed: {}", e);
                    self.exit_error = Some(e);
                    event_loop.exit();
                    return;
                }

                window.request_redraw();
            }
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    lumen_core::init_logging();

    let config = RendererConfig::default();
    info!(
        "Starting {} ({}x{})",
        config.title, config.width, config.height
    );

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app).context("event loop failed")?;

    // A failure inside the loop must surface as a non-zero exit status
    if let Some(err) = app.exit_error {
        return Err(err.into());
    }

    Ok(())
}
