pub mod announcements;
pub mod now_playing;
pub mod train_time;

use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;

use crate::buttons::ButtonAction;
use crate::frame::{Align, FontSize, Frame};
use crate::layout::{ERROR_RED, PANEL_H, PANEL_W, WHITE};

/// A screen in the rotation. Lives for the whole process; the scheduler only
/// talks to the active one.
pub trait Widget {
    fn name(&self) -> &'static str;

    /// Called when the widget becomes the active one.
    fn on_activate(&mut self, now: Instant);

    /// Advance timers and enqueue refreshes. Never blocks on the network.
    fn update(&mut self, now: Instant) -> anyhow::Result<()>;

    /// A new frame, or `None` to keep what is on the panel.
    fn render(&mut self, now: Instant) -> Option<Frame>;

    fn handle_button(&mut self, action: ButtonAction, now: Instant);

    /// Redraw on the next render and refetch where that makes sense.
    fn force_refresh(&mut self, now: Instant);
}

pub const LOADING_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];
pub const LOADING_INTERVAL: Duration = Duration::from_millis(250);

/// "Loading" followed by a spinner that steps every 250 ms.
#[derive(Debug, Clone)]
pub struct LoadingAnimator {
    color: Rgb888,
    index: usize,
    last: Option<Instant>,
}

impl LoadingAnimator {
    pub fn new(color: Rgb888) -> Self {
        Self {
            color,
            index: 0,
            last: None,
        }
    }

    /// The next spinner frame when one is due.
    pub fn next_frame(&mut self, now: Instant) -> Option<Frame> {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < LOADING_INTERVAL {
                return None;
            }
        }
        let spinner = LOADING_FRAMES[self.index];
        self.index = (self.index + 1) % LOADING_FRAMES.len();
        self.last = Some(now);

        let font = FontSize::Medium;
        let base = "Loading ";
        let mut frame = Frame::default();
        let y = PANEL_H / 2 - font.line_height() / 2;
        frame.text(Point::new(2, y), base, self.color, font, Align::Left);
        frame.text(Point::new(2 + font.text_width(base) + 1, y), spinner, self.color, font, Align::Left);
        Some(frame)
    }

    /// Show the next frame immediately.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

impl Default for LoadingAnimator {
    fn default() -> Self {
        Self::new(WHITE)
    }
}

/// Centered lines, each with its own colour. Lines past the end of
/// `colors` reuse the last colour.
pub fn message_frame<S: AsRef<str>>(lines: &[S], colors: &[Rgb888]) -> Frame {
    let font = FontSize::Medium;
    let mut frame = Frame::default();
    let fallback = [String::from("Error")];
    let texts: Vec<&str> = if lines.is_empty() {
        fallback.iter().map(String::as_str).collect()
    } else {
        lines.iter().map(AsRef::as_ref).collect()
    };
    let last = colors.last().copied().unwrap_or(ERROR_RED);
    let line_height = font.line_height().max(8);
    let mut y = ((PANEL_H - line_height * texts.len() as i32) / 2).max(0);
    for (i, text) in texts.iter().enumerate() {
        let color = colors.get(i).copied().unwrap_or(last);
        frame.text(Point::new(PANEL_W / 2, y), *text, color, font, Align::Center);
        y += line_height;
    }
    frame
}

/// Red cross with "ERROR" underneath, for failures with no better message.
pub fn error_frame() -> Frame {
    let mut frame = Frame::default();
    for i in 0..PANEL_W.min(PANEL_H) {
        frame.fill(Point::new(i, i), Size::new(2, 1), ERROR_RED);
        frame.fill(Point::new(PANEL_W - 2 - i, i), Size::new(2, 1), ERROR_RED);
    }
    let font = FontSize::Small;
    frame.text(
        Point::new(PANEL_W / 2, PANEL_H - 8),
        "ERROR",
        ERROR_RED,
        font,
        Align::Center,
    );
    frame
}
