//! Device entry point and ESP-IDF glue.

pub mod http;
pub mod inputs;
pub mod nvs;
pub mod wifi;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use embedded_graphics::pixelcolor::Rgb888;
use esp_idf_hal::gpio::IOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use log::{info, warn};

use crate::app;
use crate::config::{self, Config};
use crate::console::spawn_console;
use crate::scheduler::FramebufferSink;

use self::http::EspTransport;
use self::inputs::BoardInputs;
use self::nvs::{EspSystem, NvsConfig};

/// The HUB75 refresh is driven outside this crate; frames are only counted here.
fn panel_output(pixels: &[Rgb888]) {
    let lit = pixels.iter().filter(|p| **p != Rgb888::new(0, 0, 0)).count();
    log::trace!("panel: {} lit pixels", lit);
}

pub fn run() -> Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("muni-matrix starting");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_part = EspDefaultNvsPartition::take()?;
    let store = NvsConfig::new(EspNvs::new(nvs_part, config::NS, true)?);

    let cfg = Config::load(&store);
    spawn_console(Arc::new(Mutex::new(store)), Arc::new(Mutex::new(cfg.clone())), EspSystem)?;

    if cfg.wifi_ssid.is_empty() {
        warn!("No WiFi SSID configured (use 'set ssid <name>' on the console)");
    } else {
        let result = wifi::connect_wifi(peripherals.modem, sysloop.clone(), &cfg.wifi_ssid, &cfg.wifi_pass)?;
        info!(
            "WiFi: connected={} ip={}",
            result.connected,
            result.ip_address.as_deref().unwrap_or("-")
        );
        wifi::spawn_watchdog(result.wifi, sysloop)?;
    }

    let pins = peripherals.pins;
    let inputs = BoardInputs::new(pins.gpio6.downgrade(), pins.gpio7.downgrade(), peripherals.adc1, pins.gpio1)?;

    app::run(&cfg, EspTransport, FramebufferSink::new(panel_output), inputs)
}
