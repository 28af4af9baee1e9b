//! Cron-scheduled messages with an optional picture and a progress bar
//! along the bottom row.

use std::rc::Rc;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::buttons::ButtonAction;
use crate::cron::CronSchedule;
use crate::frame::{Align, FontSize, Frame};
use crate::image_proxy::{bmp_size, validate_bmp};
use crate::layout::{parse_color, rgb, wrap_words, PANEL_H, PANEL_W, PROGRESS_GREEN, PROGRESS_ROW, WHITE};
use crate::source::RefreshCallbacks;
use crate::time_sync::civil_from_epoch;
use crate::weather::WeatherClient;

use super::{error_frame, Widget};

pub const DEFAULT_ROTATION: Duration = Duration::from_secs(10);
/// How often to ask for a weather fetch while no clock anchor exists.
const CLOCK_RETRY: Duration = Duration::from_secs(60);
const FALLBACK_LABEL: &str = "No messages";

/// A colour written either as a number or as "0xRRGGBB" / "#RRGGBB".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorValue {
    Number(u32),
    Text(String),
}

impl ColorValue {
    pub fn to_rgb(&self) -> Option<Rgb888> {
        match self {
            ColorValue::Number(n) => Some(rgb(*n)),
            ColorValue::Text(t) => parse_color(t),
        }
    }
}

fn default_cron() -> String {
    "* * * * *".into()
}

/// One stored announcement, as kept in the `announcements` config key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementEntry {
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Path of a BMP file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub x_image_offset: i32,
    #[serde(default)]
    pub y_image_offset: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<ColorValue>,
}

/// Parse the JSON array stored under `announcements`. Blank means none.
pub fn parse_entries(text: &str) -> anyhow::Result<Vec<AnnouncementEntry>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

/// Reads image bytes for an entry's `image` path.
pub type ImageLoader = Box<dyn Fn(&str) -> std::io::Result<Vec<u8>>>;

struct Announcement {
    label: String,
    schedule: CronSchedule,
    image: Option<Result<Rc<[u8]>, String>>,
    offset: Point,
    duration: Option<Duration>,
    color: Option<Rgb888>,
}

impl Announcement {
    fn load(entry: &AnnouncementEntry, loader: &ImageLoader) -> Self {
        let image = entry
            .image
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|path| -> Result<Rc<[u8]>, String> {
                let bytes = loader(path).map_err(|e| format!("{}: {}", path, e))?;
                validate_bmp(&bytes).map_err(|e| format!("{}: {}", path, e))?;
                Ok(Rc::<[u8]>::from(bytes))
            });
        if let Some(Err(e)) = &image {
            warn!("Announcement image error: {}", e);
        }
        Self {
            label: entry.label.trim().to_string(),
            schedule: CronSchedule::parse(&entry.cron),
            image,
            offset: Point::new(entry.x_image_offset, entry.y_image_offset),
            duration: entry.duration_seconds.map(|s| Duration::from_secs(s.max(1))),
            color: entry.text_color.as_ref().and_then(ColorValue::to_rgb),
        }
    }

    fn fallback() -> Self {
        Self {
            label: FALLBACK_LABEL.into(),
            schedule: CronSchedule::parse("* * * * *"),
            image: None,
            offset: Point::zero(),
            duration: None,
            color: None,
        }
    }
}

/// Centre an image, apply the offsets and keep it on the panel. Images
/// larger than the panel may pan with negative offsets.
pub fn image_position(width: i32, height: i32, offset: Point) -> Point {
    let clamp_axis = |size: i32, panel: i32, off: i32| {
        let (lo, hi) = if size >= panel { (panel - size, 0) } else { (0, panel - size) };
        ((panel - size) / 2 + off).clamp(lo, hi)
    };
    Point::new(clamp_axis(width, PANEL_W, offset.x), clamp_axis(height, PANEL_H, offset.y))
}

pub struct AnnouncementsWidget {
    items: Vec<Announcement>,
    fallback: Announcement,
    /// Indices into `items` matching the current minute.
    active: Vec<usize>,
    position: usize,
    /// `None` while the fallback is showing.
    current: Option<usize>,
    started: Instant,
    last_minute: Option<Option<i64>>,
    rotation: Duration,
    text_color: Rgb888,
    progress_color: Rgb888,
    paused: bool,
    dirty: bool,
    last_progress_px: Option<i32>,
    clock: WeatherClient,
    next_clock_retry: Option<Instant>,
}

impl AnnouncementsWidget {
    pub fn new(entries: &[AnnouncementEntry], rotation: Duration, clock: WeatherClient, loader: ImageLoader) -> Self {
        let items = entries.iter().map(|e| Announcement::load(e, &loader)).collect();
        Self {
            items,
            fallback: Announcement::fallback(),
            active: Vec::new(),
            position: 0,
            current: None,
            started: Instant::now(),
            last_minute: None,
            rotation: rotation.max(Duration::from_secs(1)),
            text_color: WHITE,
            progress_color: PROGRESS_GREEN,
            paused: false,
            dirty: true,
            last_progress_px: None,
            clock,
            next_clock_retry: None,
        }
    }

    pub fn with_colors(mut self, text: Option<Rgb888>, progress: Option<Rgb888>) -> Self {
        self.text_color = text.unwrap_or(WHITE);
        self.progress_color = progress.unwrap_or(PROGRESS_GREEN);
        self
    }

    pub fn current_label(&self) -> &str {
        &self.current_item().label
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn current_item(&self) -> &Announcement {
        self.current.and_then(|i| self.items.get(i)).unwrap_or(&self.fallback)
    }

    fn duration(&self) -> Duration {
        self.current_item().duration.unwrap_or(self.rotation)
    }

    fn set_current(&mut self, index: Option<usize>, now: Instant) {
        self.current = index;
        self.started = now;
        self.dirty = true;
        self.last_progress_px = None;
    }

    /// Recompute the entries that match `local_epoch`'s minute.
    fn refresh_active(&mut self, local_epoch: Option<i64>, now: Instant) {
        self.active = match local_epoch {
            Some(epoch) => {
                let t = civil_from_epoch(epoch);
                (0..self.items.len()).filter(|&i| self.items[i].schedule.matches(&t)).collect()
            }
            None => Vec::new(),
        };
        let still_active = self.current.map(|c| self.active.contains(&c)).unwrap_or(self.active.is_empty());
        if !still_active {
            self.position = 0;
            self.set_current(self.active.first().copied(), now);
        }
    }

    fn advance(&mut self, now: Instant) {
        if self.active.is_empty() {
            if self.current.is_some() {
                self.set_current(None, now);
            } else {
                self.started = now;
                self.last_progress_px = None;
            }
            return;
        }
        self.position = (self.position + 1) % self.active.len();
        self.set_current(Some(self.active[self.position]), now);
    }

    fn progress_px(&self, now: Instant) -> i32 {
        let duration = self.duration().as_secs_f32().max(1.0);
        let progress = (now.saturating_duration_since(self.started).as_secs_f32() / duration).clamp(0.0, 1.0);
        (progress * PANEL_W as f32).round() as i32
    }

    fn build_frame(&self, progress_px: i32) -> Frame {
        let item = self.current_item();
        let mut frame = Frame::default();

        if let Some(Ok(bmp)) = &item.image {
            let (w, h) = bmp_size(bmp).unwrap_or((PANEL_W as u32, PANEL_H as u32));
            frame.bitmap(image_position(w as i32, h as i32, item.offset), bmp.clone());
        }

        let font = FontSize::Medium;
        let lines = wrap_words(&item.label, font.chars_per_row(), 2);
        if !lines.is_empty() {
            // Row 63 belongs to the progress bar.
            let total = font.line_height() * lines.len() as i32;
            let mut y = ((PROGRESS_ROW - total) / 2).max(0);
            let color = item.color.unwrap_or(self.text_color);
            for line in lines {
                frame.text(Point::new(PANEL_W / 2, y), line, color, font, Align::Center);
                y += font.line_height();
            }
        }

        if progress_px > 0 {
            frame.fill(Point::new(0, PROGRESS_ROW), Size::new(progress_px as u32, 1), self.progress_color);
        }
        frame
    }
}

impl Widget for AnnouncementsWidget {
    fn name(&self) -> &'static str {
        "announcements"
    }

    fn on_activate(&mut self, now: Instant) {
        self.last_minute = None;
        self.started = now;
        self.dirty = true;
        self.last_progress_px = None;
    }

    fn update(&mut self, now: Instant) -> anyhow::Result<()> {
        let local = self.clock.local_epoch(now);
        if local.is_none() && self.next_clock_retry.map(|t| now >= t).unwrap_or(true) {
            self.clock.request_refresh(RefreshCallbacks::new(), crate::http_client::DEFAULT_TIMEOUT);
            self.next_clock_retry = Some(now + CLOCK_RETRY);
        }

        let minute = local.map(|e| e.div_euclid(60));
        if self.last_minute != Some(minute) {
            self.refresh_active(local, now);
            self.last_minute = Some(minute);
        }

        if !self.paused && now.saturating_duration_since(self.started) >= self.duration() {
            self.advance(now);
        }
        Ok(())
    }

    fn render(&mut self, now: Instant) -> Option<Frame> {
        if let Some(Err(_)) = &self.current_item().image {
            if !std::mem::take(&mut self.dirty) {
                return None;
            }
            return Some(error_frame());
        }
        let px = match (self.paused, self.last_progress_px) {
            (true, Some(px)) => px,
            _ => self.progress_px(now),
        };
        if !self.dirty && self.last_progress_px == Some(px) {
            return None;
        }
        self.dirty = false;
        self.last_progress_px = Some(px);
        Some(self.build_frame(px))
    }

    fn handle_button(&mut self, action: ButtonAction, now: Instant) {
        match action {
            ButtonAction::Click => {
                self.advance(now);
                info!("Announcements -> next: {}", self.current_label());
            }
            ButtonAction::Hold => {
                self.paused = !self.paused;
                info!("Announcements -> paused: {}", self.paused);
            }
        }
    }

    fn force_refresh(&mut self, now: Instant) {
        self.dirty = true;
        self.started = now;
        self.last_progress_px = None;
    }
}
