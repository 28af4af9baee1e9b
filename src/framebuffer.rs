use embedded_graphics::{
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Size},
    image::Image,
    mono_font::MonoTextStyle,
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
    Pixel,
};
use log::debug;
use tinybmp::Bmp;

use crate::frame::{Align, Frame, Primitive as FramePrimitive};
use crate::layout::{ACTIVITY_PIXEL, PANEL_H, PANEL_W};

pub const FB_WIDTH: u32 = PANEL_W as u32;
pub const FB_HEIGHT: u32 = PANEL_H as u32;

/// 64x64 RGB888 raster a panel driver can scan out row by row.
pub struct Framebuffer {
    buf: Vec<Rgb888>,
    width: u32,
    height: u32,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new(FB_WIDTH, FB_HEIGHT)
    }
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: vec![Rgb888::BLACK; (width * height) as usize],
            width,
            height,
        }
    }

    pub fn clear_color(&mut self, color: Rgb888) {
        self.buf.fill(color);
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgb888> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(self.buf[(y as u32 * self.width + x as u32) as usize])
    }

    pub fn row(&self, y: u32) -> &[Rgb888] {
        let start = (y * self.width) as usize;
        &self.buf[start..start + self.width as usize]
    }

    pub fn lit_pixels(&self) -> usize {
        self.buf.iter().filter(|c| **c != Rgb888::BLACK).count()
    }

    /// Rasterize a frame description. Undecodable bitmaps are skipped.
    pub fn render(&mut self, frame: &Frame) {
        self.clear_color(frame.background);
        for item in &frame.items {
            match item {
                FramePrimitive::Fill { area, color } => {
                    let _ = self.fill_solid(area, *color);
                }
                FramePrimitive::Circle {
                    top_left,
                    diameter,
                    color,
                } => {
                    let _ = Circle::new(*top_left, *diameter)
                        .into_styled(PrimitiveStyle::with_fill(*color))
                        .draw(self);
                }
                FramePrimitive::Text {
                    position,
                    text,
                    color,
                    font,
                    align,
                } => {
                    let style = MonoTextStyle::new(font.mono_font(), *color);
                    let alignment = match align {
                        Align::Left => Alignment::Left,
                        Align::Center => Alignment::Center,
                        Align::Right => Alignment::Right,
                    };
                    let text_style = TextStyleBuilder::new()
                        .alignment(alignment)
                        .baseline(Baseline::Top)
                        .build();
                    let _ = Text::with_text_style(text, *position, style, text_style).draw(self);
                }
                FramePrimitive::Bitmap { position, data } => match Bmp::<Rgb888>::from_slice(data) {
                    Ok(bmp) => {
                        let _ = Image::new(&bmp, *position).draw(self);
                    }
                    Err(e) => debug!("Skipping undecodable bitmap: {:?}", e),
                },
            }
        }
    }

    /// Light the top-right corner while the request queue is busy.
    pub fn overlay_activity(&mut self, active: bool, background: Rgb888) {
        let idx = (self.width - 1) as usize;
        self.buf[idx] = if active { ACTIVITY_PIXEL } else { background };
    }

    /// Copy with every channel scaled by `level` (0.0..=1.0).
    pub fn scaled(&self, level: f32) -> Vec<Rgb888> {
        let level = level.clamp(0.0, 1.0);
        let scale = |c: u8| ((c as f32) * level).round() as u8;
        self.buf
            .iter()
            .map(|c| Rgb888::new(scale(c.r()), scale(c.g()), scale(c.b())))
            .collect()
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Framebuffer {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let w = self.width as i32;
        let h = self.height as i32;
        for Pixel(coord, color) in pixels {
            if coord.x >= 0 && coord.x < w && coord.y >= 0 && coord.y < h {
                let idx = (coord.y * w + coord.x) as usize;
                self.buf[idx] = color;
            }
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let area = area.intersection(&self.bounding_box());
        let Some(bottom_right) = area.bottom_right() else {
            return Ok(());
        };
        for y in area.top_left.y..=bottom_right.y {
            let start = (y as u32 * self.width + area.top_left.x as u32) as usize;
            let end = start + area.size.width as usize;
            self.buf[start..end].fill(color);
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        self.clear_color(color);
        Ok(())
    }
}
