use anyhow::Result;
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use log::info;

use crate::config::{ConfigSource, ConfigStore};
use crate::console::SystemControl;

/// Config keys stored as strings in one NVS namespace.
pub struct NvsConfig(EspNvs<NvsDefault>);

impl NvsConfig {
    pub fn new(nvs: EspNvs<NvsDefault>) -> Self {
        Self(nvs)
    }
}

/// Read a string from NVS, returning None if the key is absent or on error.
fn nvs_get_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    let len = match nvs.str_len(key) {
        Ok(Some(len)) => len,
        _ => return None,
    };

    let mut buf = vec![0u8; len];
    match nvs.get_str(key, &mut buf) {
        Ok(Some(val)) => {
            let s = val.trim_end_matches('\0').to_string();
            if s.is_empty() { None } else { Some(s) }
        }
        _ => None,
    }
}

impl ConfigSource for NvsConfig {
    fn get_str(&self, key: &str) -> Option<String> {
        nvs_get_str(&self.0, key)
    }
}

impl ConfigStore for NvsConfig {
    fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.0.set_str(key, value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        if self.0.remove(key)? {
            info!("NVS removed {}", key);
        }
        Ok(())
    }
}

pub struct EspSystem;

impl SystemControl for EspSystem {
    fn free_heap(&self) -> Option<u32> {
        Some(unsafe { esp_idf_sys::esp_get_free_heap_size() })
    }

    fn reboot(&self) {
        unsafe { esp_idf_sys::esp_restart() };
    }
}
