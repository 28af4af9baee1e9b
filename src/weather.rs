use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::debug_flags::{self, DEBUG_WEATHER};
use crate::decode;
use crate::error::{Outcome, SourceError};
use crate::http_client::{QueueHandle, QueuedRequest, Response};
use crate::source::{self, RefreshCallbacks};
use crate::time_sync::EpochAnchor;
use crate::weather_icons::{icon_for_wmo_code, WeatherIcon};

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";
const REQUEST_KEY: &str = "weather";

// ── Units ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemperatureUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

impl TemperatureUnit {
    /// Anything starting with "c" is Celsius; everything else Fahrenheit.
    pub fn parse(value: &str) -> Self {
        if value.trim().to_ascii_lowercase().starts_with('c') {
            TemperatureUnit::Celsius
        } else {
            TemperatureUnit::Fahrenheit
        }
    }

    pub fn as_query(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "C",
            TemperatureUnit::Fahrenheit => "F",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            TemperatureUnit::Celsius => TemperatureUnit::Fahrenheit,
            TemperatureUnit::Fahrenheit => TemperatureUnit::Celsius,
        }
    }
}

pub fn celsius_to_fahrenheit(c: f32) -> f32 {
    c * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(f: f32) -> f32 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn convert_temperature(value: f32, from: TemperatureUnit, to: TemperatureUnit) -> f32 {
    match (from, to) {
        (TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit) => celsius_to_fahrenheit(value),
        (TemperatureUnit::Fahrenheit, TemperatureUnit::Celsius) => fahrenheit_to_celsius(value),
        _ => value,
    }
}

/// Rounded whole degrees with unit letter, e.g. "58F".
pub fn format_temperature(value: f32, unit: TemperatureUnit) -> String {
    format!("{}{}", value.round() as i32, unit.symbol())
}

// ── Data types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeatherSnapshot {
    pub temperature: Option<f32>,
    pub weather_code: Option<i32>,
    pub daily_min: Option<f32>,
    pub daily_max: Option<f32>,
    pub utc_offset_seconds: i32,
    pub server_epoch: Option<i64>,
    /// Unit the provider was asked for; temperatures above are in it.
    pub unit: TemperatureUnit,
}

impl WeatherSnapshot {
    pub fn icon(&self) -> Option<WeatherIcon> {
        self.weather_code.map(icon_for_wmo_code)
    }

    pub fn temperature_in(&self, unit: TemperatureUnit) -> Option<f32> {
        self.temperature.map(|t| convert_temperature(t, self.unit, unit))
    }
}

// ── Open-Meteo JSON structures ──────────────────────────────────────

#[derive(Deserialize)]
struct OmRoot {
    error: Option<bool>,
    reason: Option<String>,
    utc_offset_seconds: Option<i32>,
    current: Option<OmCurrent>,
    current_weather: Option<OmCurrentWeather>,
    daily: Option<OmDaily>,
}

#[derive(Deserialize)]
struct OmCurrent {
    time: Option<i64>,
    temperature_2m: Option<f32>,
    weather_code: Option<i32>,
}

#[derive(Deserialize)]
struct OmCurrentWeather {
    time: Option<i64>,
    temperature: Option<f32>,
    weathercode: Option<i32>,
}

#[derive(Deserialize)]
struct OmDaily {
    temperature_2m_min: Option<Vec<Option<f32>>>,
    temperature_2m_max: Option<Vec<Option<f32>>>,
}

fn first(values: Option<Vec<Option<f32>>>) -> Option<f32> {
    values.and_then(|v| v.into_iter().next().flatten())
}

/// Interpret a forecast body fetched in `unit`.
pub fn interpret_payload(text: &str, unit: TemperatureUnit) -> Outcome<WeatherSnapshot> {
    let root: OmRoot = match decode::parse_payload(text) {
        Ok(root) => root,
        Err(e) => return Outcome::Retryable(e),
    };
    if root.error.unwrap_or(false) {
        let reason = root.reason.unwrap_or_else(|| "weather API error".into());
        warn!("Weather API error: {}", reason);
        return Outcome::Retryable(SourceError::Api(reason));
    }

    let mut snapshot = WeatherSnapshot {
        utc_offset_seconds: root.utc_offset_seconds.unwrap_or(0),
        unit,
        ..Default::default()
    };
    if let Some(current) = root.current {
        snapshot.server_epoch = current.time;
        snapshot.temperature = current.temperature_2m;
        snapshot.weather_code = current.weather_code;
    }
    if snapshot.temperature.is_none() {
        if let Some(cw) = root.current_weather {
            snapshot.server_epoch = snapshot.server_epoch.or(cw.time);
            snapshot.temperature = cw.temperature;
            snapshot.weather_code = snapshot.weather_code.or(cw.weathercode);
        }
    }
    if let Some(daily) = root.daily {
        snapshot.daily_min = first(daily.temperature_2m_min);
        snapshot.daily_max = first(daily.temperature_2m_max);
    }
    Outcome::Ok(snapshot)
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Default)]
struct WeatherState {
    snapshot: WeatherSnapshot,
    anchor: Option<EpochAnchor>,
    last_error: Option<SourceError>,
    in_flight: bool,
    failures: u32,
}

/// Open-Meteo client. Clones share state, so the train and announcement
/// widgets see the same clock anchor.
#[derive(Clone)]
pub struct WeatherClient {
    latitude: f64,
    longitude: f64,
    base_url: Rc<str>,
    unit: TemperatureUnit,
    queue: QueueHandle,
    state: Rc<RefCell<WeatherState>>,
}

impl WeatherClient {
    pub fn new(queue: QueueHandle, latitude: f64, longitude: f64, unit: TemperatureUnit) -> Self {
        Self::with_base_url(queue, latitude, longitude, unit, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(queue: QueueHandle, latitude: f64, longitude: f64, unit: TemperatureUnit, base_url: &str) -> Self {
        Self {
            latitude,
            longitude,
            base_url: base_url.into(),
            unit,
            queue,
            state: Rc::default(),
        }
    }

    pub fn build_url(&self) -> String {
        format!(
            "{}?latitude={}&longitude={}&daily=temperature_2m_min,temperature_2m_max&current=temperature_2m,weather_code&timezone=auto&timeformat=unixtime&wind_speed_unit=mph&temperature_unit={}&precipitation_unit=inch",
            self.base_url,
            self.latitude,
            self.longitude,
            self.unit.as_query()
        )
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        self.unit
    }

    pub fn request_refresh(&self, callbacks: RefreshCallbacks, timeout: Duration) -> bool {
        if self.state.borrow().in_flight {
            return false;
        }
        let unit = self.unit;
        let callbacks = callbacks.shared();
        let (cb_ok, cb_err) = (callbacks.clone(), callbacks);
        let (state_ok, state_err) = (self.state.clone(), self.state.clone());

        let request = QueuedRequest::get(self.build_url())
            .key(REQUEST_KEY)
            .timeout(timeout)
            .on_success(move |resp: Response| {
                let outcome = if resp.status >= 400 && !resp.text.contains("\"reason\"") {
                    Outcome::Retryable(SourceError::Status(resp.status))
                } else {
                    interpret_payload(&resp.text, unit)
                };
                let result = apply_outcome(&state_ok, outcome, Instant::now());
                match result {
                    Ok(()) => cb_ok.updated(),
                    Err(e) => cb_ok.failed(&e),
                }
            })
            .on_error(move |err| {
                let err = SourceError::from(err);
                record_failure(&mut state_err.borrow_mut(), err.clone());
                cb_err.failed(&err);
            });

        let started = self.queue.enqueue(request);
        if started {
            self.state.borrow_mut().in_flight = true;
        }
        started
    }

    pub fn snapshot(&self) -> WeatherSnapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn has_data(&self) -> bool {
        self.state.borrow().anchor.is_some()
    }

    pub fn last_error(&self) -> Option<SourceError> {
        self.state.borrow().last_error.clone()
    }

    pub fn utc_epoch(&self, now: Instant) -> Option<i64> {
        self.state.borrow().anchor.map(|a| a.current_epoch(now))
    }

    pub fn local_epoch(&self, now: Instant) -> Option<i64> {
        let state = self.state.borrow();
        let offset = state.snapshot.utc_offset_seconds as i64;
        state.anchor.map(|a| a.current_epoch(now) + offset)
    }
}

fn apply_outcome(state: &Rc<RefCell<WeatherState>>, outcome: Outcome<WeatherSnapshot>, now: Instant) -> Result<(), SourceError> {
    let mut st = state.borrow_mut();
    match outcome.into_result() {
        Ok(snapshot) => {
            if let Some(epoch) = snapshot.server_epoch {
                st.anchor = Some(EpochAnchor::new(epoch, now));
            }
            if debug_flags::is_on(&DEBUG_WEATHER) {
                info!(
                    "Weather: {:?}{} code={:?} min={:?} max={:?} offset={}s",
                    snapshot.temperature,
                    snapshot.unit.symbol(),
                    snapshot.weather_code,
                    snapshot.daily_min,
                    snapshot.daily_max,
                    snapshot.utc_offset_seconds
                );
            } else {
                debug!("Weather updated ({:?}{})", snapshot.temperature, snapshot.unit.symbol());
            }
            st.snapshot = snapshot;
            st.last_error = None;
            st.in_flight = false;
            st.failures = 0;
            Ok(())
        }
        Err(e) => {
            record_failure(&mut st, e.clone());
            Err(e)
        }
    }
}

fn record_failure(st: &mut WeatherState, err: SourceError) {
    st.in_flight = false;
    st.failures += 1;
    if source::should_warn(st.failures) {
        warn!("Weather refresh failed ({} in a row): {}", st.failures, err);
    }
    st.last_error = Some(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::{drain, fake_queue};
    use std::cell::Cell;

    const SAMPLE: &str = r#"{"latitude":37.76,"longitude":-122.43,"utc_offset_seconds":-25200,
        "current":{"time":1717200000,"interval":900,"temperature_2m":17.4,"weather_code":3},
        "daily":{"time":[1717138800],"temperature_2m_min":[12.1],"temperature_2m_max":[19.8]}}"#;

    #[test]
    fn fahrenheit_round_trip_within_tolerance() {
        let mut f = -40.0f32;
        while f <= 120.0 {
            let back = celsius_to_fahrenheit(fahrenheit_to_celsius(f));
            assert!((back - f).abs() < 1e-3, "{} -> {}", f, back);
            f += 0.5;
        }
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
        assert_eq!(convert_temperature(100.0, TemperatureUnit::Celsius, TemperatureUnit::Fahrenheit), 212.0);
    }

    #[test]
    fn unit_parsing_is_forgiving() {
        assert_eq!(TemperatureUnit::parse("C"), TemperatureUnit::Celsius);
        assert_eq!(TemperatureUnit::parse("celsius"), TemperatureUnit::Celsius);
        assert_eq!(TemperatureUnit::parse("farenheit"), TemperatureUnit::Fahrenheit);
        assert_eq!(TemperatureUnit::parse(""), TemperatureUnit::Fahrenheit);
    }

    #[test]
    fn payload_is_interpreted() {
        let snap = interpret_payload(SAMPLE, TemperatureUnit::Celsius).into_result().unwrap();
        assert_eq!(snap.temperature, Some(17.4));
        assert_eq!(snap.weather_code, Some(3));
        assert_eq!(snap.daily_min, Some(12.1));
        assert_eq!(snap.daily_max, Some(19.8));
        assert_eq!(snap.utc_offset_seconds, -25200);
        assert_eq!(snap.server_epoch, Some(1_717_200_000));
        assert_eq!(snap.icon(), Some(WeatherIcon::Overcast));
        let f = snap.temperature_in(TemperatureUnit::Fahrenheit).unwrap();
        assert!((f - 63.32).abs() < 0.01);
    }

    #[test]
    fn legacy_current_weather_block_is_used() {
        let body = r#"{"current_weather":{"time":100,"temperature":55.0,"weathercode":61}}"#;
        let snap = interpret_payload(body, TemperatureUnit::Fahrenheit).into_result().unwrap();
        assert_eq!(snap.temperature, Some(55.0));
        assert_eq!(snap.weather_code, Some(61));
        assert_eq!(snap.server_epoch, Some(100));
    }

    #[test]
    fn provider_error_is_reported() {
        let body = r#"{"error":true,"reason":"Latitude must be in range of -90 to 90°."}"#;
        match interpret_payload(body, TemperatureUnit::Fahrenheit) {
            Outcome::Retryable(SourceError::Api(reason)) => assert!(reason.starts_with("Latitude")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn refresh_anchors_local_clock() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(200, SAMPLE);
        let client = WeatherClient::new(queue.handle(), 37.76, -122.43, TemperatureUnit::Celsius);
        assert!(client.build_url().contains("temperature_unit=celsius"));
        assert!(client.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10)));
        assert!(!client.request_refresh(RefreshCallbacks::new(), Duration::from_secs(10)));
        drain(&mut queue);

        let now = Instant::now();
        let utc = client.utc_epoch(now).unwrap();
        assert!(utc >= 1_717_200_000);
        assert_eq!(client.local_epoch(now).unwrap(), utc - 25_200);
        assert!(client.last_error().is_none());
    }

    #[test]
    fn transport_failure_lands_in_last_error() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push_err(crate::error::TransportErrorKind::Connect);
        let client = WeatherClient::new(queue.handle(), 0.0, 0.0, TemperatureUnit::Fahrenheit);
        let failed = Rc::new(Cell::new(false));
        let f = failed.clone();
        client.request_refresh(RefreshCallbacks::new().on_error(move |_| f.set(true)), Duration::from_secs(1));
        drain(&mut queue);
        assert!(failed.get());
        assert!(matches!(client.last_error(), Some(SourceError::Transport(_))));
        assert!(client.utc_epoch(Instant::now()).is_none());
    }
}
