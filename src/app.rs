use ab_glyph::FontVec;
use anyhow::{Context, Result, anyhow};
use peg_core::{ResponseSpec, RunPhase};
use peg_experiment::{RuntimeEvent, TrialRuntime};
use peg_render::{Screen, StimulusCanvas};
use peg_timing::{HighPrecisionTimer, Timer};
use pixels::{Pixels, SurfaceTexture};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowId},
};

use crate::session::{Session, completion_message, environment_info};

const SAVING_MESSAGE: &str = "Saving results...";

/// Where the window is in its lifetime, beyond what the runtime tracks.
enum Stage {
    Running,
    /// The run finished; results go out on the next frame so the saving
    /// screen is visible first.
    Saving,
    Done(String),
}

/// Fullscreen presenter: one redraw per display frame, the runtime polled
/// for due deadlines on every frame.
pub struct App {
    session: Session,
    runtime: TrialRuntime<HighPrecisionTimer>,
    frames: HighPrecisionTimer,
    last_frame_ns: Option<u64>,

    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    canvas: Option<StimulusCanvas>,
    font: Option<FontVec>,
    current_size: Option<PhysicalSize<u32>>,
    refresh_rate: Option<f64>,

    stage: Stage,
    /// Typed text of the current text-entry trial.
    entry: String,
    dirty: bool,
    failure: Option<anyhow::Error>,
}

impl App {
    pub fn new(session: Session, font: FontVec) -> Result<Self> {
        let timer = HighPrecisionTimer::new();
        let runtime = TrialRuntime::new(
            session.sequence.clone(),
            timer.clone(),
            session.config.runtime_settings(),
        );

        Ok(Self {
            session,
            runtime,
            frames: timer,
            last_frame_ns: None,
            window: None,
            pixels: None,
            canvas: None,
            font: Some(font),
            current_size: None,
            refresh_rate: None,
            stage: Stage::Running,
            entry: String::new(),
            dirty: true,
            failure: None,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .ok_or_else(|| anyhow!("no monitor available"))?;
        self.refresh_rate = monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let attributes = Window::default_attributes()
            .with_title("Experiment")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor))))
            .with_resizable(false);
        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();
        self.current_size = Some(size);
        info!(
            width = size.width,
            height = size.height,
            scale = window.scale_factor(),
            refresh_hz = ?self.refresh_rate,
            "display ready"
        );

        let surface = SurfaceTexture::new(size.width, size.height, window.clone());
        self.pixels = Some(Pixels::new(size.width, size.height, surface)?);

        let font = self.font.take().context("window created twice")?;
        let mut canvas = StimulusCanvas::new(size.width, size.height, font, &self.session.config.image_dir)?;
        let loaded = canvas
            .preload_specs(self.session.sequence.iter().map(|t| t.spec.as_ref()))
            .context("failed to load stimulus images")?;
        debug!(images = loaded, "images preloaded");
        self.canvas = Some(canvas);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);

        if self.runtime.handle_event(RuntimeEvent::Start) {
            self.on_transition();
        }
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        for event in self.runtime.update() {
            if self.runtime.handle_event(event) {
                self.on_transition();
            }
        }

        if let Stage::Saving = self.stage {
            if !self.dirty {
                self.save()?;
            }
        }
        if self.dirty {
            self.draw()?;
            self.dirty = false;
        }

        let pixels = self.pixels.as_mut().context("surface missing")?;
        pixels.render()?;

        let now = self.frames.now();
        if let Some(last) = self.last_frame_ns {
            self.frames
                .record_frame(std::time::Duration::from_nanos(now.saturating_sub(last)));
        }
        self.last_frame_ns = Some(now);
        Ok(())
    }

    fn draw(&mut self) -> Result<()> {
        let (Some(canvas), Some(pixels)) = (self.canvas.as_mut(), self.pixels.as_mut()) else {
            return Ok(());
        };
        let runtime = &self.runtime;
        let screen = match &self.stage {
            Stage::Saving => Screen::Message(SAVING_MESSAGE),
            Stage::Done(message) => Screen::Message(message),
            Stage::Running => match runtime.phase() {
                RunPhase::Presenting => match runtime.current() {
                    Some(trial) => Screen::Trial {
                        spec: &trial.spec,
                        entry: trial.spec.response.is_text().then_some(self.entry.as_str()),
                    },
                    None => Screen::Blank,
                },
                RunPhase::Resolved => match runtime.feedback() {
                    Some((trial, message)) => Screen::Feedback {
                        spec: &trial.spec,
                        message,
                    },
                    None => Screen::Blank,
                },
                RunPhase::Idle | RunPhase::Finished => Screen::Blank,
            },
        };
        canvas.draw(screen)?;
        canvas.copy_to(pixels.frame_mut());
        Ok(())
    }

    /// Called after every event the runtime accepted.
    fn on_transition(&mut self) {
        self.entry.clear();
        self.dirty = true;
        if self.runtime.phase().is_finished() {
            self.stage = Stage::Saving;
        }
    }

    fn save(&mut self) -> Result<()> {
        let Some(results) = self.runtime.take_results() else {
            return Ok(());
        };
        let stats = self.frames.frame_stats();
        let environment = format!(
            "{}; {}x{} @ {} Hz; {} frames, mean {:.3} ms, jitter {:.3} ms, {:.1} fps",
            environment_info("window"),
            self.current_size.map_or(0, |s| s.width),
            self.current_size.map_or(0, |s| s.height),
            self.refresh_rate.map_or("?".to_string(), |r| format!("{r:.1}")),
            stats.samples,
            stats.average_frame_time_ns / 1e6,
            stats.jitter_ns / 1e6,
            stats.effective_fps,
        );
        let delivery = self
            .session
            .save(
                results,
                self.runtime.started_at(),
                self.runtime.timer().wall_clock(),
                environment,
            )?;
        self.stage = Stage::Done(completion_message(&delivery));
        self.dirty = true;
        Ok(())
    }

    fn handle_key(&mut self, event: &KeyEvent, event_loop: &ActiveEventLoop) {
        if let Key::Named(NamedKey::Escape) = event.logical_key {
            self.exit(event_loop);
            return;
        }
        if event.repeat || !self.runtime.phase().allows_input() {
            return;
        }

        let text_trial = match self.runtime.current() {
            Some(trial) => match &trial.spec.response {
                ResponseSpec::Text { options } => Some(options.max_length),
                _ => None,
            },
            None => return,
        };

        match text_trial {
            Some(max_length) => match &event.logical_key {
                Key::Named(NamedKey::Enter) => {
                    let text = std::mem::take(&mut self.entry);
                    if self.runtime.handle_event(RuntimeEvent::TextSubmitted(text)) {
                        self.on_transition();
                    }
                }
                Key::Named(NamedKey::Backspace) => {
                    self.entry.pop();
                    self.dirty = true;
                }
                _ => {
                    if let Some(typed) = &event.text {
                        for ch in typed.chars().filter(|c| !c.is_control()) {
                            let full = max_length.is_some_and(|max| self.entry.chars().count() >= max as usize);
                            if !full {
                                self.entry.push(ch);
                            }
                        }
                        self.dirty = true;
                    }
                }
            },
            None => {
                let Some(name) = key_name(&event.logical_key) else {
                    return;
                };
                if self.runtime.handle_event(RuntimeEvent::Key(name)) {
                    self.on_transition();
                }
            }
        }
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) {
        self.current_size = Some(size);
        if let Some(pixels) = &mut self.pixels {
            if let Err(e) = pixels.resize_surface(size.width, size.height) {
                warn!(error = %e, "failed to resize surface");
            }
            if let Err(e) = pixels.resize_buffer(size.width, size.height) {
                warn!(error = %e, "failed to resize buffer");
            }
        }
        if let Some(canvas) = &mut self.canvas {
            if let Err(e) = canvas.resize(size.width, size.height) {
                warn!(error = %e, "failed to resize canvas");
            }
        }
        self.dirty = true;
    }

    fn exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        if !matches!(self.stage, Stage::Done(_)) {
            warn!(
                completed = self.runtime.results().len(),
                total = self.runtime.len(),
                "window closed before the run finished; no results were saved"
            );
        }
        event_loop.exit();
    }

    fn fail(&mut self, err: anyhow::Error, event_loop: &ActiveEventLoop) {
        error!(error = %err, "presenter failed");
        self.failure = Some(err);
        event_loop.exit();
    }
}

/// Browser-style key name: the character itself, or the lowercased name of a
/// named key (`" "` for the space bar).
fn key_name(key: &Key) -> Option<String> {
    match key {
        Key::Character(text) => Some(text.to_string()),
        Key::Named(NamedKey::Space) => Some(" ".to_string()),
        Key::Named(named) => Some(format!("{named:?}").to_lowercase()),
        _ => None,
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                self.fail(e, event_loop);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    self.fail(e, event_loop);
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() => {
                self.handle_key(&event, event_loop);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
