//! SDL2 Stereo Preview Module
//! Renders the left and right eye images side by side in one window.
//! Every presented frame runs one consumer tick of the stereo camera, so the
//! relay is driven at display rate while capture stays device-paced.

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};

use tracing::{info, warn};

use crate::capture::device::StereoDevice;
use crate::capture::frame::{CaptureBuffer, Eye};
use crate::pipeline::StereoCamera;

/// SDL2 Window Display
/// Handles window creation, event loop, and stereo frame rendering.
pub struct StereoDisplay {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    width: u32,
    height: u32,
}

impl StereoDisplay {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window_builder = video_subsystem
            .window("Stereo Camera Preview", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas_builder = window_builder.into_canvas().present_vsync();

        let canvas = canvas_builder.build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            width,
            height,
        })
    }

    pub fn render_images(&mut self, left: &CaptureBuffer, right: &CaptureBuffer) -> Result<()> {
        self.canvas.clear();

        let half = self.width / 2;
        for (i, image) in [left, right].into_iter().enumerate() {
            if image.is_empty() {
                continue;
            }

            let mut texture = self
                .texture_creator
                .create_texture_streaming(PixelFormatEnum::RGB24, image.width(), image.height())
                .map_err(|e| eyre!(e))?;

            texture
                .update(None, image.as_slice(), (image.width() * 3) as usize)
                .map_err(|e| eyre!(e))?;

            let target = Rect::new((i as u32 * half) as i32, 0, half, self.height);
            self.canvas
                .copy(&texture, None, Some(target))
                .map_err(|e| eyre!(e))?;
        }

        self.canvas.present();
        Ok(())
    }

    pub fn run<D: StereoDevice>(
        &mut self,
        sdl_context: &sdl2::Sdl,
        camera: &mut StereoCamera<D>,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: loop {
            for event in event_pump.poll_iter() {
                match event {
                    Event::Quit { .. }
                    | Event::KeyDown {
                        keycode: Some(Keycode::Escape),
                        ..
                    } => {
                        info!("Quit event received");
                        break 'running;
                    }
                    _ => {}
                }
            }

            // Without a new frame the previous images are shown again.
            if let Err(e) = camera.tick() {
                warn!("Stereo capture ended: {}", e);
                return Err(e.into());
            }

            self.render_images(camera.image(Eye::Left), camera.image(Eye::Right))?;
        }

        Ok(())
    }
}
