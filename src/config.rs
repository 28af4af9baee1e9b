use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use embedded_graphics::pixelcolor::Rgb888;
use log::{info, warn};

use crate::layout::parse_color;
use crate::time_sync::TimeFormat;
use crate::weather::TemperatureUnit;
use crate::widgets::announcements::{parse_entries, AnnouncementEntry};

/// NVS namespace on the device.
pub const NS: &str = "app_cfg";

// NVS keys are limited to 15 characters.
pub const KEY_WIFI_SSID: &str = "ssid";
pub const KEY_WIFI_PASS: &str = "ssid_password";
pub const KEY_TRANSIT_TOKEN: &str = "muni_api_token";
pub const KEY_TRANSIT_URL: &str = "transit_url";
pub const KEY_AGENCY: &str = "agency";
pub const KEY_STOP_CODE: &str = "stop_code";
pub const KEY_ROUTE_PREFIX: &str = "route_prefix";
pub const KEY_MAX_TRAINS: &str = "max_trains";
pub const KEY_REFRESH_SECS: &str = "refresh_secs";
pub const KEY_TIME_TO_STOP: &str = "time_to_stop";
pub const KEY_LATITUDE: &str = "latitude";
pub const KEY_LONGITUDE: &str = "longitude";
pub const KEY_TEMP_UNIT: &str = "temp_unit";
pub const KEY_TIME_FORMAT: &str = "time_format";
pub const KEY_WEATHER_URL: &str = "weather_url";
pub const KEY_SPOTIFY_ID: &str = "sp_client_id";
pub const KEY_SPOTIFY_SECRET: &str = "sp_secret";
pub const KEY_SPOTIFY_REFRESH: &str = "sp_refresh";
pub const KEY_IMAGE_PROXY: &str = "image_proxy";
pub const KEY_WIDGETS: &str = "widgets";
pub const KEY_ANNOUNCEMENTS: &str = "announcements";
pub const KEY_ANNOUNCE_SECS: &str = "announce_secs";
pub const KEY_TEXT_COLOR: &str = "text_color";
pub const KEY_PROGRESS_COLOR: &str = "progress_color";
pub const KEY_BRIGHT_MIN: &str = "bright_min";
pub const KEY_BRIGHT_MAX: &str = "bright_max";
pub const KEY_KNOB_INVERT: &str = "knob_invert";
pub const KEY_HOLD_MS: &str = "hold_ms";
pub const KEY_COMBO_MS: &str = "combo_ms";

/// Every key the console may show or set. The flag marks secrets.
pub const KEYS: &[(&str, bool)] = &[
    (KEY_WIFI_SSID, false),
    (KEY_WIFI_PASS, true),
    (KEY_TRANSIT_TOKEN, true),
    (KEY_TRANSIT_URL, false),
    (KEY_AGENCY, false),
    (KEY_STOP_CODE, false),
    (KEY_ROUTE_PREFIX, false),
    (KEY_MAX_TRAINS, false),
    (KEY_REFRESH_SECS, false),
    (KEY_TIME_TO_STOP, false),
    (KEY_LATITUDE, false),
    (KEY_LONGITUDE, false),
    (KEY_TEMP_UNIT, false),
    (KEY_TIME_FORMAT, false),
    (KEY_WEATHER_URL, false),
    (KEY_SPOTIFY_ID, true),
    (KEY_SPOTIFY_SECRET, true),
    (KEY_SPOTIFY_REFRESH, true),
    (KEY_IMAGE_PROXY, false),
    (KEY_WIDGETS, false),
    (KEY_ANNOUNCEMENTS, false),
    (KEY_ANNOUNCE_SECS, false),
    (KEY_TEXT_COLOR, false),
    (KEY_PROGRESS_COLOR, false),
    (KEY_BRIGHT_MIN, false),
    (KEY_BRIGHT_MAX, false),
    (KEY_KNOB_INVERT, false),
    (KEY_HOLD_MS, false),
    (KEY_COMBO_MS, false),
];

const PLACEHOLDER_TOKEN: &str = "YOUR_511_API_TOKEN";
const DEFAULT_AGENCY: &str = "SF";
const DEFAULT_WIDGETS: &str = "train_time,now_playing,announcements";

// Filled from secrets.local.rs by build.rs when present.
const DEFAULT_WIFI_SSID: &str = match option_env!("LOCAL_WIFI_SSID") {
    Some(v) => v,
    None => "",
};
const DEFAULT_WIFI_PASS: &str = match option_env!("LOCAL_WIFI_PASS") {
    Some(v) => v,
    None => "",
};
const DEFAULT_TRANSIT_TOKEN: &str = match option_env!("LOCAL_MUNI_API_TOKEN") {
    Some(v) => v,
    None => "",
};
const DEFAULT_SPOTIFY_ID: &str = match option_env!("LOCAL_SPOTIFY_CLIENT_ID") {
    Some(v) => v,
    None => "",
};
const DEFAULT_SPOTIFY_SECRET: &str = match option_env!("LOCAL_SPOTIFY_CLIENT_SECRET") {
    Some(v) => v,
    None => "",
};
const DEFAULT_SPOTIFY_REFRESH: &str = match option_env!("LOCAL_SPOTIFY_REFRESH_TOKEN") {
    Some(v) => v,
    None => "",
};

pub fn is_secret(key: &str) -> bool {
    KEYS.iter().any(|(k, secret)| *k == key && *secret)
}

pub fn is_known_key(key: &str) -> bool {
    KEYS.iter().any(|(k, _)| *k == key)
}

/// Value as the console and the boot log print it.
pub fn display_value(key: &str, value: &str) -> String {
    if is_secret(key) {
        format!("<{} chars>", value.len())
    } else {
        format!("{:?}", value)
    }
}

// ── Sources ─────────────────────────────────────────────────────────

/// Flat string key/value lookup.
pub trait ConfigSource {
    /// `None` for missing or empty values.
    fn get_str(&self, key: &str) -> Option<String>;
}

/// A source that can also persist changes.
pub trait ConfigStore: ConfigSource {
    fn set_str(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// In-memory store, mostly for tests and the host run mode.
#[derive(Debug, Clone, Default)]
pub struct MapSource(BTreeMap<String, String>);

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

impl ConfigSource for MapSource {
    fn get_str(&self, key: &str) -> Option<String> {
        self.0.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

impl ConfigStore for MapSource {
    fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.0.remove(key);
        Ok(())
    }
}

/// A `config.json` document. Non-string values are read back as their JSON
/// text, so `announcements` may be written as a plain array.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    path: Option<PathBuf>,
    values: serde_json::Map<String, serde_json::Value>,
}

impl JsonConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let values = serde_json::from_str(text).context("config is not a JSON object")?;
        Ok(Self { path: None, values })
    }

    /// Load `path`; a missing file gives an empty document that will be
    /// created on the first write.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("bad {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        cfg.path = Some(path.to_path_buf());
        Ok(cfg)
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }
}

impl ConfigSource for JsonConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        let text = match self.values.get(key)? {
            serde_json::Value::Null => return None,
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

impl ConfigStore for JsonConfig {
    fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        // Keep structured values structured when the text parses.
        let json = if key == KEY_ANNOUNCEMENTS {
            serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.into()))
        } else {
            serde_json::Value::String(value.into())
        };
        self.values.insert(key.to_string(), json);
        self.save()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.save()
    }
}

// ── Typed config ────────────────────────────────────────────────────

/// A configuration problem the app can't start with. `lines` go on the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
    pub lines: Vec<String>,
}

impl ConfigError {
    fn new(message: &str, lines: [&str; 2]) -> Self {
        Self {
            message: message.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub wifi_ssid: String,
    pub wifi_pass: String,

    pub transit_token: String,
    pub transit_url: String,
    pub agency: String,
    pub stop_code: String,
    pub route_prefix: Option<String>,
    pub max_trains: usize,
    pub refresh: Duration,
    pub time_to_stop: i64,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub temperature_unit: TemperatureUnit,
    pub time_format: TimeFormat,
    pub weather_url: String,

    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_refresh_token: String,
    pub image_proxy: String,

    pub widgets: Vec<String>,
    pub announcements: Vec<AnnouncementEntry>,
    pub announcement_rotation: Duration,
    pub text_color: Option<Rgb888>,
    pub progress_color: Option<Rgb888>,

    pub brightness_min: f32,
    pub brightness_max: f32,
    pub knob_invert: bool,
    pub hold: Duration,
    pub combo_hold: Duration,
}

fn get_logged(src: &dyn ConfigSource, key: &str) -> Option<String> {
    let value = src.get_str(key);
    match &value {
        Some(v) => info!("config {} = {}", key, display_value(key, v)),
        None => info!("config {} = <unset>", key),
    }
    value
}

fn get_or(src: &dyn ConfigSource, key: &str, default: &str) -> String {
    get_logged(src, key).unwrap_or_else(|| default.to_string())
}

/// Parse a number, warning and falling back to `default` when malformed.
fn get_num<T: std::str::FromStr>(src: &dyn ConfigSource, key: &str, default: T) -> T {
    match get_logged(src, key) {
        None => default,
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            warn!("config {}: {:?} is not a number, using default", key, v);
            default
        }),
    }
}

fn get_bool(src: &dyn ConfigSource, key: &str, default: bool) -> bool {
    match get_logged(src, key).as_deref().map(str::trim) {
        Some("1" | "true" | "on" | "yes") => true,
        Some("0" | "false" | "off" | "no") => false,
        _ => default,
    }
}

fn get_color(src: &dyn ConfigSource, key: &str) -> Option<Rgb888> {
    let value = get_logged(src, key)?;
    let color = parse_color(&value);
    if color.is_none() {
        warn!("config {}: {:?} is not a colour", key, value);
    }
    color
}

impl Config {
    /// Read every key from `src`, falling back to defaults for anything
    /// missing or malformed.
    pub fn load(src: &dyn ConfigSource) -> Config {
        let announcements = match get_logged(src, KEY_ANNOUNCEMENTS) {
            None => Vec::new(),
            Some(text) => parse_entries(&text).unwrap_or_else(|e| {
                warn!("config announcements: {}", e);
                Vec::new()
            }),
        };

        Config {
            wifi_ssid: get_or(src, KEY_WIFI_SSID, DEFAULT_WIFI_SSID),
            wifi_pass: get_or(src, KEY_WIFI_PASS, DEFAULT_WIFI_PASS),
            transit_token: get_or(src, KEY_TRANSIT_TOKEN, DEFAULT_TRANSIT_TOKEN),
            transit_url: get_or(src, KEY_TRANSIT_URL, crate::transit::DEFAULT_BASE_URL),
            agency: get_or(src, KEY_AGENCY, DEFAULT_AGENCY),
            stop_code: get_or(src, KEY_STOP_CODE, ""),
            route_prefix: get_logged(src, KEY_ROUTE_PREFIX),
            max_trains: get_num(src, KEY_MAX_TRAINS, 2),
            refresh: Duration::from_secs(get_num(src, KEY_REFRESH_SECS, 30)),
            time_to_stop: get_num(src, KEY_TIME_TO_STOP, 5),
            latitude: get_logged(src, KEY_LATITUDE).and_then(|v| v.trim().parse().ok()),
            longitude: get_logged(src, KEY_LONGITUDE).and_then(|v| v.trim().parse().ok()),
            temperature_unit: get_logged(src, KEY_TEMP_UNIT)
                .map(|v| TemperatureUnit::parse(&v))
                .unwrap_or_default(),
            time_format: get_logged(src, KEY_TIME_FORMAT)
                .map(|v| TimeFormat::parse(&v))
                .unwrap_or_default(),
            weather_url: get_or(src, KEY_WEATHER_URL, crate::weather::DEFAULT_BASE_URL),
            spotify_client_id: get_or(src, KEY_SPOTIFY_ID, DEFAULT_SPOTIFY_ID),
            spotify_client_secret: get_or(src, KEY_SPOTIFY_SECRET, DEFAULT_SPOTIFY_SECRET),
            spotify_refresh_token: get_or(src, KEY_SPOTIFY_REFRESH, DEFAULT_SPOTIFY_REFRESH),
            image_proxy: get_or(src, KEY_IMAGE_PROXY, ""),
            widgets: get_or(src, KEY_WIDGETS, DEFAULT_WIDGETS)
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect(),
            announcements,
            announcement_rotation: Duration::from_secs(get_num(src, KEY_ANNOUNCE_SECS, 10u64).max(1)),
            text_color: get_color(src, KEY_TEXT_COLOR),
            progress_color: get_color(src, KEY_PROGRESS_COLOR),
            brightness_min: get_num(src, KEY_BRIGHT_MIN, 0.0),
            brightness_max: get_num(src, KEY_BRIGHT_MAX, 1.0),
            knob_invert: get_bool(src, KEY_KNOB_INVERT, false),
            hold: Duration::from_millis(get_num(src, KEY_HOLD_MS, 3_000)),
            combo_hold: Duration::from_millis(get_num(src, KEY_COMBO_MS, 1_000)),
        }
    }

    /// Settings the app can't run without. Only checked when the widget
    /// that needs them is enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.widget_enabled("train_time") {
            if self.transit_token.is_empty() || self.transit_token == PLACEHOLDER_TOKEN {
                return Err(ConfigError::new("Missing API token.", ["Set API token", "in config"]));
            }
            if self.stop_code.is_empty() {
                return Err(ConfigError::new("Missing stop code.", ["Set stop code", "in config"]));
            }
        }
        if self.latitude.is_none() || self.longitude.is_none() {
            return Err(ConfigError::new("Missing location.", ["Set latitude", "in config"]));
        }
        if self.widgets.is_empty() {
            return Err(ConfigError::new("No widgets enabled.", ["Set widgets", "in config"]));
        }
        Ok(())
    }

    pub fn widget_enabled(&self, name: &str) -> bool {
        self.widgets.iter().any(|w| w == name)
    }
}
