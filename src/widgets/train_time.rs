//! Next arrivals for one stop, with the local time and outside temperature
//! along the bottom.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use log::{info, warn};

use crate::buttons::ButtonAction;
use crate::error::SourceError;
use crate::frame::{Align, FontSize, Frame};
use crate::layout::*;
use crate::source::RefreshCallbacks;
use crate::time_sync::{format_clock, TimeFormat};
use crate::transit::{Arrival, TransitClient};
use crate::weather::{convert_temperature, format_temperature, TemperatureUnit, WeatherClient};
use crate::weather_icons::{draw_icon, ICON_W};

use super::{message_frame, LoadingAnimator, Widget};

pub const MIN_REFRESH: Duration = Duration::from_secs(10);
const ACTIVATE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct TrainSettings {
    /// Only arrivals whose route starts with this are shown. Picked from
    /// the stop's busiest route when unset.
    pub route_prefix: Option<String>,
    pub max_trains: usize,
    pub refresh: Duration,
    pub time_format: TimeFormat,
    pub temperature_unit: TemperatureUnit,
    /// Minutes it takes to walk to the stop.
    pub time_to_stop: i64,
    pub request_timeout: Duration,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            route_prefix: None,
            max_trains: 2,
            refresh: Duration::from_secs(30),
            time_format: TimeFormat::Twelve,
            temperature_unit: TemperatureUnit::Fahrenheit,
            time_to_stop: 5,
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Dot colour for an arrival given the walk time to the stop.
pub fn dot_color(minutes: Option<i64>, time_to_stop: i64) -> Rgb888 {
    match minutes {
        None => DOT_UNKNOWN,
        Some(m) if m <= time_to_stop => DOT_TOO_LATE,
        Some(m) if m <= time_to_stop + 3 => DOT_HURRY,
        Some(_) => DOT_RELAXED,
    }
}

pub fn arrival_text(minutes: Option<i64>) -> String {
    match minutes {
        None => "No data".into(),
        Some(m) if m <= 0 => "Arriving".into(),
        Some(1) => "1 minute".into(),
        Some(m) => format!("{} minutes", m),
    }
}

/// Set from completion callbacks, read by the widget.
#[derive(Default)]
struct Signals {
    data_ready: Cell<bool>,
    dirty: Cell<bool>,
}

pub struct TrainTimeWidget {
    transit: TransitClient,
    weather: WeatherClient,
    settings: TrainSettings,
    route_prefix: Rc<RefCell<Option<String>>>,
    unit: TemperatureUnit,
    show_time: bool,
    show_temperature: bool,
    next_refresh: Option<Instant>,
    signals: Rc<Signals>,
    last_minute: Option<i64>,
    showing_error: bool,
    loading: LoadingAnimator,
    last_error_sig: Option<String>,
}

impl TrainTimeWidget {
    pub fn new(transit: TransitClient, weather: WeatherClient, mut settings: TrainSettings) -> Self {
        settings.refresh = settings.refresh.max(MIN_REFRESH);
        let prefix = settings
            .route_prefix
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_uppercase);
        let signals = Signals::default();
        signals.dirty.set(true);
        Self {
            transit,
            weather,
            unit: settings.temperature_unit,
            settings,
            route_prefix: Rc::new(RefCell::new(prefix)),
            show_time: true,
            show_temperature: true,
            next_refresh: None,
            signals: Rc::new(signals),
            last_minute: None,
            showing_error: false,
            loading: LoadingAnimator::default(),
            last_error_sig: None,
        }
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn route_prefix(&self) -> Option<String> {
        self.route_prefix.borrow().clone()
    }

    fn mark_dirty(&self) {
        self.signals.dirty.set(true);
    }

    fn request_refresh(&self) {
        let timeout = self.settings.request_timeout;

        let (signals, prefix, transit) = (self.signals.clone(), self.route_prefix.clone(), self.transit.clone());
        let signals_err = self.signals.clone();
        self.transit.request_refresh(
            RefreshCallbacks::new()
                .on_update(move || {
                    let mut prefix = prefix.borrow_mut();
                    if prefix.is_none() {
                        let primary = transit.primary_route();
                        if !primary.is_empty() {
                            info!("Train widget following route {}", primary);
                            *prefix = Some(primary.to_uppercase());
                        }
                    }
                    signals.data_ready.set(true);
                    signals.dirty.set(true);
                })
                .on_error(move |_: &SourceError| {
                    signals_err.data_ready.set(true);
                    signals_err.dirty.set(true);
                }),
            timeout,
        );

        let (signals, signals_err) = (self.signals.clone(), self.signals.clone());
        self.weather.request_refresh(
            RefreshCallbacks::new()
                .on_update(move || {
                    signals.data_ready.set(true);
                    signals.dirty.set(true);
                })
                .on_error(move |_: &SourceError| {
                    signals_err.data_ready.set(true);
                    signals_err.dirty.set(true);
                }),
            timeout,
        );
    }

    /// Arrivals after the route filter.
    pub fn filtered_arrivals(&self) -> Vec<Arrival> {
        let arrivals = self.transit.snapshot().arrivals;
        match self.route_prefix.borrow().as_deref() {
            None => arrivals,
            Some(prefix) => arrivals
                .into_iter()
                .filter(|a| a.route.to_uppercase().starts_with(prefix))
                .collect(),
        }
    }

    /// One line per shown arrival with its minutes, or "No trains".
    pub fn next_times(&self, now_epoch: Option<i64>) -> Vec<(String, Option<i64>)> {
        let arrivals = self.filtered_arrivals();
        if arrivals.is_empty() {
            return vec![("No trains".into(), None)];
        }
        arrivals
            .iter()
            .take(self.settings.max_trains.max(1))
            .map(|a| {
                let minutes = now_epoch.and_then(|now| a.minutes_until(now));
                (arrival_text(minutes), minutes)
            })
            .collect()
    }

    /// Message lines when the transit side cannot show arrivals.
    fn error_screen(&mut self) -> Option<Frame> {
        if let Some(lines) = self.transit.fatal_lines() {
            self.log_error_once(format!("fatal:{}", lines.join("|")));
            return Some(message_frame(&lines, &[FATAL_ORANGE]));
        }
        let err = self.transit.last_error()?;
        self.log_error_once(format!("err:{}", err));
        Some(message_frame(&err.display_lines(), &[ERROR_RED]))
    }

    fn log_error_once(&mut self, sig: String) {
        if self.last_error_sig.as_deref() != Some(sig.as_str()) {
            warn!("Train widget error: {}", sig);
            self.last_error_sig = Some(sig);
        }
    }

    fn build_frame(&self, now: Instant) -> Frame {
        let mut frame = Frame::default();
        let utc = self.transit.current_epoch(now).or_else(|| self.weather.utc_epoch(now));
        let local = self.weather.local_epoch(now).or(utc);

        // Header: route logo and "Line".
        let prefix = self.route_prefix.borrow().clone().unwrap_or_else(|| "M".into());
        frame.circle(Point::zero(), LOGO_SIZE, LOGO_BLUE);
        let logo_letter: String = prefix.chars().take(2).collect();
        frame.text(
            Point::new(LOGO_SIZE as i32 / 2, LOGO_SIZE as i32 / 2 - FontSize::Large.line_height() / 2),
            logo_letter,
            WHITE,
            FontSize::Large,
            Align::Center,
        );
        let header_x = LOGO_SIZE as i32 + 2;
        frame.fill(Point::new(header_x, HEADER_TEXT_Y + 4), Size::new(4, 1), WHITE);
        frame.text(Point::new(header_x + 5, HEADER_TEXT_Y), "Line", WHITE, FontSize::Medium, Align::Left);

        // Arrival rows.
        let times = self.next_times(utc);
        for (i, row_y) in TRAIN_ROW_Y.iter().enumerate() {
            let Some((text, minutes)) = times.get(i) else {
                break;
            };
            frame.circle(Point::new(1, row_y + 2), DOT_SIZE, dot_color(*minutes, self.settings.time_to_stop));
            frame.text(Point::new(TIME_TEXT_X, *row_y), text.as_str(), WHITE, FontSize::Medium, Align::Left);
        }

        // Footer: temperature, icon, clock.
        if self.show_temperature {
            let snapshot = self.weather.snapshot();
            let text = match (snapshot.temperature, self.weather.last_error()) {
                (Some(t), None) => format_temperature(convert_temperature(t, snapshot.unit, self.unit), self.unit),
                _ => format!("--{}", self.unit.symbol()),
            };
            frame.text(Point::new(1, FOOTER_Y), text, WHITE, FontSize::Medium, Align::Left);
            if let Some(icon) = snapshot.icon() {
                draw_icon(&mut frame, icon, Point::new(PANEL_W / 2 - ICON_W / 2 - 2, FOOTER_Y));
            }
        }
        if self.show_time {
            let clock = local
                .map(|e| format_clock(e, self.settings.time_format))
                .unwrap_or_else(|| "--:--".into());
            frame.text(Point::new(PANEL_W - 1, FOOTER_Y), clock, WHITE, FontSize::Medium, Align::Right);
        }
        frame
    }
}

impl Widget for TrainTimeWidget {
    fn name(&self) -> &'static str {
        "train_time"
    }

    /// Shows the spinner at once and holds the fetch back briefly so fast
    /// widget switching does not flood the queue.
    fn on_activate(&mut self, now: Instant) {
        self.signals.data_ready.set(false);
        self.mark_dirty();
        self.loading.reset();
        let delay_until = now + ACTIVATE_DELAY;
        if self.next_refresh.map(|t| t < delay_until).unwrap_or(true) {
            self.next_refresh = Some(delay_until);
        }
    }

    fn update(&mut self, now: Instant) -> anyhow::Result<()> {
        if self.next_refresh.map(|t| now >= t).unwrap_or(true) {
            self.request_refresh();
            self.next_refresh = Some(now + self.settings.refresh);
        }
        Ok(())
    }

    fn render(&mut self, now: Instant) -> Option<Frame> {
        if let Some(frame) = self.error_screen() {
            let fresh = !self.showing_error || self.signals.dirty.replace(false);
            self.showing_error = true;
            return fresh.then_some(frame);
        }
        if self.showing_error {
            self.showing_error = false;
            self.mark_dirty();
        }
        if !self.signals.data_ready.get() {
            return self.loading.next_frame(now);
        }

        let minute = self
            .transit
            .current_epoch(now)
            .or_else(|| self.weather.utc_epoch(now))
            .map(|e| e.div_euclid(60));
        if !self.signals.dirty.get() && minute == self.last_minute {
            return None;
        }
        self.last_minute = minute;
        self.signals.dirty.set(false);
        Some(self.build_frame(now))
    }

    fn handle_button(&mut self, action: ButtonAction, _now: Instant) {
        match action {
            ButtonAction::Click => {
                self.unit = self.unit.toggled();
                info!("Train widget -> temp unit: {}", self.unit.as_query());
            }
            ButtonAction::Hold => {
                let show = !(self.show_time || self.show_temperature);
                self.show_time = show;
                self.show_temperature = show;
                info!("Train widget -> {} time/temp", if show { "show" } else { "hide" });
            }
        }
        self.mark_dirty();
    }

    fn force_refresh(&mut self, now: Instant) {
        self.next_refresh = Some(now);
        self.mark_dirty();
    }
}
