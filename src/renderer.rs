//! SDL2 window for the desktop frontend.
//!
//! Shows the active slot's latest frame aspect-fit on black and turns key and
//! mouse presses into [`Command`]s.

use crate::console::Command;
use crate::gst_video::VideoFrame;
use crate::playback::Input;
use anyhow::{Context, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::mouse::MouseButton;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, Texture, TextureCreator};
use sdl2::video::{Window, WindowContext};

pub struct Renderer {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: sdl2::EventPump,
    screen_width: u32,
    screen_height: u32,
}

impl Renderer {
    /// Initialize SDL2 and open a window sized to the desktop.
    pub fn new(title: &str) -> Result<Self> {
        let sdl_context = sdl2::init().map_err(|e| anyhow::anyhow!("SDL init failed: {}", e))?;

        let video_subsystem = sdl_context
            .video()
            .map_err(|e| anyhow::anyhow!("SDL video init failed: {}", e))?;

        let display_mode = video_subsystem
            .desktop_display_mode(0)
            .map_err(|e| anyhow::anyhow!("Failed to get display mode: {}", e))?;

        let screen_width = display_mode.w as u32;
        let screen_height = display_mode.h as u32;

        tracing::info!("Creating window: {}x{}", screen_width, screen_height);

        let window = video_subsystem
            .window(title, screen_width, screen_height)
            .fullscreen_desktop()
            .build()
            .context("Failed to create window")?;

        let mut canvas = window
            .into_canvas()
            .accelerated()
            .present_vsync()
            .build()
            .context("Failed to create canvas")?;

        canvas.set_draw_color(Color::RGB(0, 0, 0));
        canvas.clear();
        canvas.present();

        let texture_creator = canvas.texture_creator();
        let event_pump = sdl_context
            .event_pump()
            .map_err(|e| anyhow::anyhow!("Failed to get event pump: {}", e))?;

        Ok(Self {
            canvas,
            texture_creator,
            event_pump,
            screen_width,
            screen_height,
        })
    }

    fn create_texture_from_frame<'a>(
        texture_creator: &'a TextureCreator<WindowContext>,
        frame: &VideoFrame,
    ) -> Result<Texture<'a>> {
        let mut texture = texture_creator
            .create_texture_streaming(PixelFormatEnum::ABGR8888, frame.width, frame.height)
            .context("Failed to create texture")?;

        let row_bytes = frame.width as usize * 4;
        texture
            .with_lock(None, |buffer: &mut [u8], pitch: usize| {
                for (y, row) in frame.pixels.chunks_exact(row_bytes).enumerate() {
                    let dst = y * pitch;
                    buffer[dst..dst + row_bytes].copy_from_slice(row);
                }
            })
            .map_err(|e| anyhow::anyhow!("Failed to update texture: {}", e))?;

        Ok(texture)
    }

    fn calculate_aspect_fit(&self, width: u32, height: u32) -> Rect {
        aspect_fit(self.screen_width, self.screen_height, width, height)
    }

    /// Draw `frame`, or black when there is none.
    pub fn render(&mut self, frame: Option<&VideoFrame>) -> Result<()> {
        self.canvas.set_draw_color(Color::RGB(0, 0, 0));
        self.canvas.clear();

        if let Some(frame) = frame.filter(|f| f.width > 0 && f.height > 0) {
            let dest = self.calculate_aspect_fit(frame.width, frame.height);
            let texture = Self::create_texture_from_frame(&self.texture_creator, frame)?;
            self.canvas
                .copy(&texture, None, dest)
                .map_err(|e| anyhow::anyhow!("Failed to render frame: {}", e))?;
        }

        self.canvas.present();
        Ok(())
    }

    /// Drain pending window events.
    pub fn process_events(&mut self) -> Vec<Command> {
        self.event_pump
            .poll_iter()
            .filter_map(|event| match event {
                Event::Quit { .. } => Some(Command::Quit),
                Event::KeyDown {
                    keycode: Some(key), ..
                } => command_for_key(key),
                Event::MouseButtonDown {
                    mouse_btn: MouseButton::Left,
                    ..
                } => Some(Command::Input(Input::Continue)),
                Event::MouseButtonDown {
                    mouse_btn: MouseButton::Right,
                    ..
                } => Some(Command::Input(Input::Skip)),
                _ => None,
            })
            .collect()
    }
}

fn command_for_key(key: Keycode) -> Option<Command> {
    let select = |n| Some(Command::Input(Input::Select(n)));
    match key {
        Keycode::Escape | Keycode::Q => Some(Command::Quit),
        Keycode::Space => Some(Command::Input(Input::Skip)),
        Keycode::Return | Keycode::KpEnter => Some(Command::Input(Input::Continue)),
        Keycode::F5 => Some(Command::Reset),
        Keycode::F6 => Some(Command::Save),
        Keycode::Num1 => select(0),
        Keycode::Num2 => select(1),
        Keycode::Num3 => select(2),
        Keycode::Num4 => select(3),
        Keycode::Num5 => select(4),
        Keycode::Num6 => select(5),
        Keycode::Num7 => select(6),
        Keycode::Num8 => select(7),
        Keycode::Num9 => select(8),
        _ => None,
    }
}

/// Largest centred rectangle with the image's aspect ratio inside the screen.
fn aspect_fit(screen_width: u32, screen_height: u32, width: u32, height: u32) -> Rect {
    let screen_ratio = screen_width as f32 / screen_height as f32;
    let img_ratio = width as f32 / height as f32;

    let (fit_width, fit_height) = if img_ratio > screen_ratio {
        (screen_width, (screen_width as f32 / img_ratio) as u32)
    } else {
        ((screen_height as f32 * img_ratio) as u32, screen_height)
    };

    let x = (screen_width.saturating_sub(fit_width) / 2) as i32;
    let y = (screen_height.saturating_sub(fit_height) / 2) as i32;
    Rect::new(x, y, fit_width, fit_height)
}
