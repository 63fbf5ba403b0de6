//! The presentation window: an SDL2 wrapper that blits received
//! video frames.
//!
//! The window starts hidden and only shows once a frame with pixels
//! arrives. At every file boundary the streaming texture is recreated
//! to the new geometry; empty first frames hide the window again. The
//! texture is created in the frame's own pixel format and the renderer
//! converts while copying.

use sdl2::event::Event;
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::render::{Texture, TextureCreator, WindowCanvas};
use sdl2::video::WindowContext;
use sdl2::EventPump;
use thiserror::Error;
use tracing::warn;

use gifcast_core::client::FrameSink;
use gifcast_core::frame::{FrameHeader, PixelFormat};

/// Errors that can occur while building the window.
#[derive(Debug, Error)]
pub enum GuiError {
    /// SDL reported a plain-string failure.
    #[error("sdl error: {0}")]
    Sdl(String),

    /// The window could not be created.
    #[error("window creation failed: {0}")]
    Window(#[from] sdl2::video::WindowBuildError),

    /// The renderer could not be created or configured.
    #[error("renderer creation failed: {0}")]
    Renderer(#[from] sdl2::IntegerOrSdlError),
}

// ── FancyWindow ──────────────────────────────────────────────────

/// A resizable window rendering a stream of video frames.
pub struct FancyWindow {
    canvas: WindowCanvas,
    texture_creator: TextureCreator<WindowContext>,
    texture: Option<Texture>,
    event_pump: EventPump,
    width: u32,
    height: u32,
    pitch: usize,
    last_sequence: i32,
}

impl FancyWindow {
    /// Create the window: centered, resizable, initially hidden, with
    /// a vsynced renderer. The requested size is clamped to the
    /// display bounds.
    pub fn new(width: u32, height: u32) -> Result<Self, GuiError> {
        let sdl = sdl2::init().map_err(GuiError::Sdl)?;
        let video = sdl.video().map_err(GuiError::Sdl)?;

        let (width, height) = match video.display_bounds(0) {
            Ok(display) => (width.min(display.width()), height.min(display.height())),
            Err(_) => (width, height),
        };

        let window = video
            .window("Look at me!", width, height)
            .position_centered()
            .resizable()
            .hidden()
            .build()?;
        let mut canvas = window.into_canvas().present_vsync().build()?;

        canvas.window_mut().set_minimum_size(width, height)?;
        canvas.set_logical_size(width, height)?;
        canvas.set_integer_scale(true).map_err(GuiError::Sdl)?;
        canvas.set_draw_color(Color::RGBA(240, 240, 240, 240));

        let texture_creator = canvas.texture_creator();
        let event_pump = sdl.event_pump().map_err(GuiError::Sdl)?;

        Ok(FancyWindow {
            canvas,
            texture_creator,
            texture: None,
            event_pump,
            width: 0,
            height: 0,
            pitch: 0,
            last_sequence: i32::MAX,
        })
    }

    /// Adjust window and texture to a frame header.
    ///
    /// Only first frames change anything: empty ones hide the window,
    /// the rest re-establish the texture at the announced geometry and
    /// show the window.
    pub fn update_from(&mut self, header: &FrameHeader) {
        let first = header.is_first_frame(self.last_sequence);
        self.last_sequence = header.sequence;
        if !first {
            return;
        }

        if header.is_empty() {
            self.canvas.window_mut().hide();
            self.drop_texture();
            return;
        }

        self.width = header.width.max(0) as u32;
        self.height = header.height.max(0) as u32;
        self.pitch = header.line_pitch.max(0) as usize;
        let format = match header.format {
            PixelFormat::Rgba => PixelFormatEnum::ABGR8888,
            _ => PixelFormatEnum::ARGB8888,
        };

        self.drop_texture();
        match self
            .texture_creator
            .create_texture_streaming(format, self.width, self.height)
        {
            Ok(texture) => self.texture = Some(texture),
            Err(error) => warn!(%error, "could not create a streaming texture"),
        }

        let _ = self.canvas.window_mut().set_minimum_size(self.width, self.height);
        let _ = self.canvas.set_logical_size(self.width, self.height);
        self.canvas.window_mut().show();
    }

    /// Render the frame's pixels, or just the clear color when there
    /// is nothing to show.
    pub fn present(&mut self, pixels: &[u8]) {
        self.canvas.clear();
        if let Some(texture) = &mut self.texture {
            if !pixels.is_empty()
                && self.pitch > 0
                && texture.update(None, pixels, self.pitch).is_ok()
            {
                let _ = self.canvas.copy(texture, None, None);
            }
        }
        self.canvas.present();
    }

    /// Drain pending window events. Returns false once the user asked
    /// to quit.
    pub fn is_alive(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            if matches!(event, Event::Quit { .. }) {
                return false;
            }
        }
        true
    }

    fn drop_texture(&mut self) {
        if let Some(texture) = self.texture.take() {
            // with `unsafe_textures` the texture is not scoped to its
            // creator and must be destroyed by hand
            unsafe { texture.destroy() };
        }
    }
}

impl FrameSink for FancyWindow {
    fn update_from(&mut self, header: &FrameHeader) {
        FancyWindow::update_from(self, header);
    }

    fn present(&mut self, pixels: &[u8]) {
        FancyWindow::present(self, pixels);
    }
}

impl Drop for FancyWindow {
    fn drop(&mut self) {
        self.drop_texture();
    }
}
