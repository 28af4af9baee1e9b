//! Abstract frame description produced by widgets and consumed by a
//! [`FrameSink`](crate::scheduler::FrameSink).

use std::rc::Rc;

use embedded_graphics::mono_font::{ascii::FONT_4X6, MonoFont};
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::Rectangle;
use profont::{PROFONT_7_POINT, PROFONT_9_POINT};

use crate::layout::{BLACK, PANEL_H, PANEL_W};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSize {
    Small,
    Medium,
    Large,
}

impl FontSize {
    pub fn mono_font(self) -> &'static MonoFont<'static> {
        match self {
            FontSize::Small => &FONT_4X6,
            FontSize::Medium => &PROFONT_7_POINT,
            FontSize::Large => &PROFONT_9_POINT,
        }
    }

    pub fn advance(self) -> i32 {
        let font = self.mono_font();
        (font.character_size.width + font.character_spacing) as i32
    }

    pub fn line_height(self) -> i32 {
        self.mono_font().character_size.height as i32 + 1
    }

    pub fn text_width(self, text: &str) -> i32 {
        text.chars().count() as i32 * self.advance()
    }

    /// Characters that fit across the panel with a one pixel margin each side.
    pub fn chars_per_row(self) -> usize {
        ((PANEL_W - 2) / self.advance()).max(1) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Fill {
        area: Rectangle,
        color: Rgb888,
    },
    Circle {
        top_left: Point,
        diameter: u32,
        color: Rgb888,
    },
    /// `position` is the top of the text; x is interpreted per `align`.
    Text {
        position: Point,
        text: String,
        color: Rgb888,
        font: FontSize,
        align: Align,
    },
    /// BMP file bytes drawn with their top-left corner at `position`.
    Bitmap {
        position: Point,
        data: Rc<[u8]>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub background: Rgb888,
    pub items: Vec<Primitive>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new(BLACK)
    }
}

impl Frame {
    pub fn new(background: Rgb888) -> Self {
        Self {
            background,
            items: Vec::new(),
        }
    }

    pub fn fill(&mut self, top_left: Point, size: Size, color: Rgb888) -> &mut Self {
        self.items.push(Primitive::Fill {
            area: Rectangle::new(top_left, size),
            color,
        });
        self
    }

    pub fn circle(&mut self, top_left: Point, diameter: u32, color: Rgb888) -> &mut Self {
        self.items.push(Primitive::Circle {
            top_left,
            diameter,
            color,
        });
        self
    }

    pub fn text(&mut self, position: Point, text: impl Into<String>, color: Rgb888, font: FontSize, align: Align) -> &mut Self {
        self.items.push(Primitive::Text {
            position,
            text: text.into(),
            color,
            font,
            align,
        });
        self
    }

    pub fn bitmap(&mut self, position: Point, data: Rc<[u8]>) -> &mut Self {
        self.items.push(Primitive::Bitmap { position, data });
        self
    }

    /// Lines centered horizontally and vertically on the panel.
    pub fn centered_lines<S: AsRef<str>>(&mut self, lines: &[S], color: Rgb888, font: FontSize) -> &mut Self {
        let line_height = font.line_height();
        let total = line_height * lines.len() as i32;
        let mut y = ((PANEL_H - total) / 2).max(0);
        for line in lines {
            self.text(Point::new(PANEL_W / 2, y), line.as_ref(), color, font, Align::Center);
            y += line_height;
        }
        self
    }

    /// All text runs, in draw order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|p| match p {
            Primitive::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn contains_text(&self, needle: &str) -> bool {
        self.texts().any(|t| t == needle)
    }

    pub fn has_bitmap(&self) -> bool {
        self.items.iter().any(|p| matches!(p, Primitive::Bitmap { .. }))
    }
}
