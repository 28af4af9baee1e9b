use std::time::Duration;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{info, warn};

const ATTEMPTS: u32 = 5;
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(300);

pub struct WifiResult {
    pub wifi: Box<EspWifi<'static>>,
    pub connected: bool,
    pub ip_address: Option<String>,
}

fn elapsed_ms(t0: i64) -> i64 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } - t0) / 1000
}

/// Log association state from ESP-IDF internals.
fn log_wifi_diag(label: &str) {
    unsafe {
        let mut ap_info: esp_idf_sys::wifi_ap_record_t = core::mem::zeroed();
        let ap_rc = esp_idf_sys::esp_wifi_sta_get_ap_info(&mut ap_info);
        if ap_rc == esp_idf_sys::ESP_OK {
            let ssid = core::str::from_utf8(&ap_info.ssid)
                .unwrap_or("?")
                .trim_end_matches('\0');
            info!(
                "WiFi [{}]: assoc=YES rssi={} ch={} ssid={}",
                label, ap_info.rssi, ap_info.primary, ssid
            );
        } else {
            info!("WiFi [{}]: assoc=NO (ap_info err={})", label, ap_rc);
        }
    }
}

/// Up to five connect attempts with a full stop/start between them.
fn connect_with_retries(wifi: &mut BlockingWifi<&mut EspWifi<'static>>, label: &str) -> bool {
    for attempt in 1..=ATTEMPTS {
        let t0 = unsafe { esp_idf_sys::esp_timer_get_time() };
        match wifi.connect() {
            Ok(_) => {
                info!("WiFi {} OK on attempt {} ({}ms)", label, attempt, elapsed_ms(t0));
                log_wifi_diag(&format!("{} {} OK", label, attempt));
                return true;
            }
            Err(e) => {
                warn!(
                    "WiFi {} attempt {}/{} failed after {}ms: {}",
                    label,
                    attempt,
                    ATTEMPTS,
                    elapsed_ms(t0),
                    e
                );
                log_wifi_diag(&format!("{} {} FAIL", label, attempt));
                if attempt < ATTEMPTS {
                    let _ = wifi.disconnect();
                    wifi.stop().ok();
                    std::thread::sleep(Duration::from_millis(500));
                    wifi.start().ok();
                    std::thread::sleep(Duration::from_millis(300));
                }
            }
        }
    }
    false
}

pub fn connect_wifi(modem: Modem, sysloop: EspSystemEventLoop, ssid: &str, password: &str) -> Result<WifiResult> {
    let mut esp_wifi = EspWifi::new(modem, sysloop.clone(), None)?;

    let auth = if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    let mut wifi_ssid = heapless::String::<32>::new();
    let mut wifi_pass = heapless::String::<64>::new();
    if wifi_ssid.push_str(ssid).is_err() || wifi_pass.push_str(password).is_err() {
        warn!("WiFi credentials too long, truncated");
    }

    esp_wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: wifi_ssid,
        password: wifi_pass,
        auth_method: auth,
        ..Default::default()
    }))?;

    let mut blocking_wifi = BlockingWifi::wrap(&mut esp_wifi, sysloop)?;
    blocking_wifi.start()?;
    info!("WiFi connecting to '{}'...", ssid);

    let connected = connect_with_retries(&mut blocking_wifi, "connect");
    let mut ip_address = None;
    if connected {
        info!("WiFi associated, waiting for IP address...");
        blocking_wifi.wait_netif_up()?;
        let ip_info = blocking_wifi.wifi().sta_netif().get_ip_info()?;
        info!("WiFi connected, IP: {}", ip_info.ip);
        ip_address = Some(ip_info.ip.to_string());
    } else {
        warn!("WiFi failed after {} attempts; will retry later", ATTEMPTS);
    }
    drop(blocking_wifi);

    Ok(WifiResult {
        wifi: Box::new(esp_wifi),
        connected,
        ip_address,
    })
}

/// Returns the new IP address, or `None` when every attempt failed.
pub fn reconnect_existing(wifi: &mut EspWifi<'static>, sysloop: EspSystemEventLoop) -> Result<Option<String>> {
    let mut blocking_wifi = BlockingWifi::wrap(wifi, sysloop)?;
    let _ = blocking_wifi.start();

    if !connect_with_retries(&mut blocking_wifi, "reconnect") {
        return Ok(None);
    }
    blocking_wifi.wait_netif_up()?;
    let ip_info = blocking_wifi.wifi().sta_netif().get_ip_info()?;
    info!("WiFi reconnected, IP: {}", ip_info.ip);
    Ok(Some(ip_info.ip.to_string()))
}

/// Check the link every [`RECONNECT_INTERVAL`] and reconnect when it dropped.
/// The radio lives in this thread from now on.
pub fn spawn_watchdog(mut wifi: Box<EspWifi<'static>>, sysloop: EspSystemEventLoop) -> Result<()> {
    std::thread::Builder::new()
        .name("wifi".into())
        .stack_size(8192)
        .spawn(move || loop {
            std::thread::sleep(RECONNECT_INTERVAL);
            if wifi.is_connected().unwrap_or(false) {
                continue;
            }
            warn!("WiFi link down, reconnecting");
            match reconnect_existing(&mut wifi, sysloop.clone()) {
                Ok(Some(_)) => {}
                Ok(None) => warn!("WiFi reconnect failed; next try in {}s", RECONNECT_INTERVAL.as_secs()),
                Err(e) => warn!("WiFi reconnect error: {}", e),
            }
        })?;
    Ok(())
}
