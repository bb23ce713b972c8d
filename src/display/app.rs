//! Windowed shell: owns the window, ticks the presenter and maps keys to parameter changes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowId};

use crate::gpu::GpuContext;
use crate::pipeline::FramePipeline;
use crate::Config;

use super::presenter::Presenter;

/// Modifier change per arrow key press
pub const MODIFIER_STEP: f32 = 0.05;

/// Move `current` by `steps` grid positions, snapping to the [`MODIFIER_STEP`] grid so
/// repeated presses land back on exact values
pub fn step_modifier(current: f32, steps: f32) -> f32 {
    ((current / MODIFIER_STEP).round() + steps) * MODIFIER_STEP
}

/// Events injected into the loop from outside the window system
#[derive(Debug, Clone, Copy)]
pub enum AppEvent {
    Shutdown,
}

/// Called once the pipeline exists, to hand it to whatever produces frames
pub type StartProducer = Box<dyn FnOnce(Arc<FramePipeline>)>;

/// Parameter change requested from the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    IncreaseModifier,
    DecreaseModifier,
    Rotate,
    CycleContentMode,
    ToggleMirrored,
    ToggleFrontFacing,
    Quit,
}

impl Command {
    pub fn from_key(key: Key<&str>) -> Option<Self> {
        match key {
            Key::Named(NamedKey::ArrowUp) => Some(Self::IncreaseModifier),
            Key::Named(NamedKey::ArrowDown) => Some(Self::DecreaseModifier),
            Key::Named(NamedKey::Escape) => Some(Self::Quit),
            Key::Character(c) => match c.to_ascii_lowercase().as_str() {
                "r" => Some(Self::Rotate),
                "c" => Some(Self::CycleContentMode),
                "m" => Some(Self::ToggleMirrored),
                "f" => Some(Self::ToggleFrontFacing),
                _ => None,
            },
            _ => None,
        }
    }
}

struct Running {
    presenter: Presenter,
    pipeline: Arc<FramePipeline>,
}

pub struct FisheyeApp {
    config: Config,
    shutdown: Arc<AtomicBool>,
    start_producer: Option<StartProducer>,
    running: Option<Running>,
    error: Option<color_eyre::Report>,
}

impl FisheyeApp {
    pub fn new(config: Config, shutdown: Arc<AtomicBool>, start_producer: StartProducer) -> Self {
        Self {
            config,
            shutdown,
            start_producer: Some(start_producer),
            running: None,
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let display = &self.config.display;
        let mut attributes = Window::default_attributes()
            .with_title("Fisheye")
            .with_inner_size(PhysicalSize::new(display.width, display.height));
        if display.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }
        let window = Arc::new(event_loop.create_window(attributes)?);

        // The surface has to exist before the adapter so the adapter can present to it
        let instance = GpuContext::instance();
        let surface = instance.create_surface(window.clone())?;
        let gpu = Arc::new(pollster::block_on(GpuContext::from_instance(
            &instance,
            Some(&surface),
        ))?);

        let pipeline = Arc::new(FramePipeline::new(
            gpu.clone(),
            &self.config.pipeline,
            &self.config.effect,
        )?);
        let presenter = Presenter::new(
            gpu,
            window,
            surface,
            display,
            pipeline.layout().clone(),
            pipeline.published().clone(),
        )?;

        let start_producer = self
            .start_producer
            .take()
            .ok_or_else(|| eyre!("frame producer already started"))?;
        start_producer(pipeline.clone());

        Ok(Running {
            presenter,
            pipeline,
        })
    }

    fn apply(&self, event_loop: &ActiveEventLoop, command: Command) {
        let Some(running) = &self.running else {
            return;
        };
        let pipeline = &running.pipeline;
        let layout = pipeline.layout();
        let pending = layout.pending();

        match command {
            Command::Quit => {
                event_loop.exit();
                return;
            }
            Command::IncreaseModifier => {
                pipeline.set_modifier(step_modifier(pipeline.modifier(), 1.0))
            }
            Command::DecreaseModifier => {
                pipeline.set_modifier(step_modifier(pipeline.modifier(), -1.0))
            }
            Command::Rotate => layout.set_rotation(pending.rotation.rotated_clockwise()),
            Command::CycleContentMode => layout.set_content_mode(pending.content_mode.next()),
            Command::ToggleMirrored => layout.set_mirrored(!pending.mirrored),
            Command::ToggleFrontFacing => layout.set_front_facing(!pending.front_facing),
        }

        match command {
            Command::IncreaseModifier | Command::DecreaseModifier => {
                info!("Fisheye modifier {:.2}", pipeline.modifier());
            }
            _ => {
                layout.invalidate();
                info!("Layout {:?}", layout.active());
            }
        }
    }
}

impl ApplicationHandler<AppEvent> for FisheyeApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(running) => {
                info!("Display ready");
                self.running = Some(running);
            }
            Err(e) => {
                error!("Failed to initialize display: {}", e);
                self.error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::Shutdown => {
                info!("Shutdown requested");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(running) = &mut self.running {
                    running.presenter.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(running) = &mut self.running {
                    running.presenter.render();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                if let Some(command) = Command::from_key(event.logical_key.as_ref()) {
                    self.apply(event_loop, command);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.presenter.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(running) = &self.running {
            let stats = running.pipeline.published().stats();
            info!(
                "Published {} frames, presented {}, skipped {}",
                stats.published, stats.presented, stats.skipped
            );
        }
    }
}

/// Run the windowed shell until it is closed or [`AppEvent::Shutdown`] arrives
pub fn run_display(
    event_loop: EventLoop<AppEvent>,
    config: Config,
    shutdown: Arc<AtomicBool>,
    start_producer: StartProducer,
) -> Result<()> {
    let mut app = FisheyeApp::new(config, shutdown, start_producer);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
