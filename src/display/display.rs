//! SDL2 Window Display Module
//! Shows the latest published frame and turns key presses into capture
//! requests and exposure changes.
//! All SDL state lives in [`Sdl2Display`] and is released when it is dropped.

use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect as SdlRect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::EventPump;
use tracing::{info, warn};

use super::alert::CompletionAlert;
use super::settings::ViewSettings;
use super::transform::{dest_rect, render_rgb24, source_rect, Rect};
use crate::pipeline::{AcquisitionThread, Mode, PipelineEvent, PipelineHandle};
use crate::DisplayConfig;

/// Result of handling one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Continue,
    Quit,
}

/// SDL2 Window Display
/// Owns the window, renderer and event pump for the live view.
pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    settings: ViewSettings,
    alert: CompletionAlert,
    title: String,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, config: &DisplayConfig) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("stillview", config.width, config.height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            settings: ViewSettings::default(),
            alert: CompletionAlert::new(Duration::from_secs(config.bell_interval_secs)),
            title: String::new(),
        })
    }

    /// Seed the exposure settings from what the pipeline currently uses.
    pub fn with_settings(mut self, settings: ViewSettings) -> Self {
        self.settings = settings;
        self
    }

    fn handle_key(&mut self, scancode: Scancode, handle: &PipelineHandle) -> KeyAction {
        match scancode {
            Scancode::Right => self.settings.increase(),
            Scancode::Left => self.settings.decrease(),
            Scancode::Down => self.settings.cycle_forward(),
            Scancode::Up => self.settings.cycle_back(),
            Scancode::S => {
                let pending = handle.request_capture();
                info!(pending, "capture requested");
            }
            Scancode::B => self.alert.toggle(),
            Scancode::Escape => return KeyAction::Quit,
            _ => return KeyAction::Continue,
        }

        if self.settings.selected().is_exposure() {
            let updates = [
                (Mode::Live, self.settings.live_exposure()),
                (Mode::Capture, self.settings.capture_exposure()),
            ];
            for (mode, seconds) in updates {
                if let Err(e) = handle.set_exposure(mode, seconds) {
                    warn!(error = %e, ?mode, "exposure not applied");
                }
            }
        }
        KeyAction::Continue
    }

    fn drain_events(&mut self, handle: &PipelineHandle) {
        for event in handle.events().try_iter() {
            match event {
                PipelineEvent::CaptureComplete => self.alert.start(),
                PipelineEvent::FrameSaved(path) => info!("Saved {}", path.display()),
                PipelineEvent::SaveFailed(reason) => warn!(%reason, "frame was not saved"),
            }
        }
    }

    pub fn render_frame(&mut self, handle: &PipelineHandle) -> Result<()> {
        let frame = handle.latest_frame();
        let (width, height) = (frame.width(), frame.height());
        let rgb_data = render_rgb24(&frame, &self.settings);

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, width, height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &rgb_data, (width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        let (window_width, window_height) = self.canvas.window().size();
        let src = source_rect(width, height, self.settings.zoom()).map(to_sdl);
        let dst = to_sdl(dest_rect(width, height, window_width, window_height));

        self.canvas.set_draw_color(Color::RGB(0, 0, 0));
        self.canvas.clear();
        self.canvas
            .copy(&texture, src, dst)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        Ok(())
    }

    fn update_title(&mut self, handle: &PipelineHandle) -> Result<()> {
        let title = self.settings.summary(handle.pending_capture_count());
        if title != self.title {
            self.canvas.window_mut().set_title(&title)?;
            self.title = title;
        }
        Ok(())
    }

    /// Event loop. Returns when the window is closed, Escape is pressed or
    /// the acquisition thread has stopped.
    pub fn run(&mut self, handle: &PipelineHandle, acquisition: &AcquisitionThread) -> Result<()> {
        'running: loop {
            let events: Vec<Event> = self.event_pump.poll_iter().collect();
            for event in events {
                match event {
                    Event::Quit { .. } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    Event::KeyDown {
                        scancode: Some(scancode),
                        ..
                    } => {
                        if self.handle_key(scancode, handle) == KeyAction::Quit {
                            info!("Quit key pressed");
                            break 'running;
                        }
                    }
                    _ => {}
                }
            }

            if handle.is_shutting_down() || acquisition.is_finished() {
                break;
            }

            self.drain_events(handle);
            self.alert.tick(Instant::now());
            self.update_title(handle)?;
            self.render_frame(handle)?;
        }

        Ok(())
    }
}

fn to_sdl(rect: Rect) -> SdlRect {
    SdlRect::new(rect.x as i32, rect.y as i32, rect.width, rect.height)
}
