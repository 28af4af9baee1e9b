use anyhow::{anyhow, Result};
use log::{info, warn};
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{self, Config, ConfigStore, KEYS};
use crate::debug_flags;

/// Platform hooks for `status` and `reboot`.
pub trait SystemControl: Send {
    fn free_heap(&self) -> Option<u32>;
    fn reboot(&self);
}

/// Host process: no heap figure, `reboot` exits.
pub struct HostSystem;

impl SystemControl for HostSystem {
    fn free_heap(&self) -> Option<u32> {
        None
    }

    fn reboot(&self) {
        info!("console: exiting");
        std::process::exit(0);
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|_| anyhow!("lock poisoned"))
}

pub fn spawn_console<S, C>(store: Arc<Mutex<S>>, config: Arc<Mutex<Config>>, system: C) -> Result<()>
where
    S: ConfigStore + Send + 'static,
    C: SystemControl + 'static,
{
    std::thread::Builder::new()
        .name("console".into())
        .stack_size(8192)
        .spawn(move || {
            info!("console: ready (type 'help')");
            let stdin = io::stdin();
            let mut reader = stdin.lock();
            let mut line = String::new();
            let mut buf = [0u8; 1];
            let mut in_escape = false;
            loop {
                match reader.read(&mut buf) {
                    Ok(1) => {
                        let ch = buf[0];
                        if in_escape {
                            if (ch as char).is_ascii_alphabetic() || ch == b'~' {
                                in_escape = false;
                            }
                            continue;
                        }
                        if ch == 0x1b {
                            in_escape = true;
                            continue;
                        }
                        if ch == b'\n' || ch == b'\r' {
                            if line.is_empty() {
                                continue;
                            }
                            info!("> {}", line);
                            if let Err(e) = process_line(&line, &store, &config, &system) {
                                warn!("console: error: {}", e);
                            }
                            line.clear();
                        } else if ch == 0x7f || ch == 0x08 {
                            line.pop();
                        } else if ch >= 0x20 {
                            line.push(ch as char);
                        }
                    }
                    Ok(_) => {
                        std::thread::sleep(std::time::Duration::from_millis(50));
                    }
                    Err(_) => {
                        std::thread::sleep(std::time::Duration::from_millis(100));
                    }
                }
            }
        })?;
    Ok(())
}

pub fn process_line<S: ConfigStore>(
    line: &str,
    store: &Mutex<S>,
    config: &Mutex<Config>,
    system: &dyn SystemControl,
) -> Result<()> {
    let clean = line.trim().trim_end_matches('\\');
    if clean.is_empty() {
        return Ok(());
    }
    let mut parts = clean.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match cmd {
        "help" | "?" => print_help(),
        "show" => handle_show(store)?,
        "set" => handle_set(rest, store, config)?,
        "clear" => handle_clear(rest, store, config)?,
        "debug" => handle_debug(rest),
        "next" => {
            debug_flags::set(&debug_flags::REQUEST_NEXT_WIDGET, true);
            info!("next widget requested");
        }
        "refresh" => {
            debug_flags::set(&debug_flags::REQUEST_REFRESH, true);
            info!("refresh requested");
        }
        "reset-session" => {
            debug_flags::set(&debug_flags::REQUEST_SESSION_RESET, true);
            info!("HTTP session reset requested");
        }
        "status" => {
            let cfg = lock(config)?;
            info!("wifi: {}", if cfg.wifi_ssid.is_empty() { "not configured" } else { &cfg.wifi_ssid });
            info!("stop: {} ({})", cfg.stop_code, cfg.agency);
            info!("route: {}", cfg.route_prefix.as_deref().unwrap_or("<auto>"));
            info!("widgets: {}", cfg.widgets.join(", "));
            info!("announcements: {}", cfg.announcements.len());
            info!("music: {}", if cfg.spotify_refresh_token.is_empty() { "not configured" } else { "configured" });
            if let Some(heap) = system.free_heap() {
                info!("free heap: {} KB", heap / 1024);
            }
            info!("debug: {}", debug_flags::status_line());
        }
        "reboot" => {
            info!("console: rebooting now");
            std::thread::sleep(std::time::Duration::from_millis(100));
            system.reboot();
        }
        _ => {
            warn!("console: unknown command '{}' (type 'help')", cmd);
        }
    }
    Ok(())
}

fn print_help() {
    info!("commands:");
    info!("  show                       - show every config key");
    info!("  set <key> <value>          - store a config value");
    info!("  clear <key>                - remove a stored value");
    info!("  next                       - switch to the next widget");
    info!("  refresh                    - refresh the active widget");
    info!("  reset-session              - drop the HTTP session");
    info!("  debug <module>             - toggle debug for module");
    info!("    modules: http, transit, weather, music, input, all");
    info!("  debug show                 - show debug flag status");
    info!("  status                     - show system status");
    info!("  reboot                     - reboot device");
}

fn handle_show<S: ConfigStore>(store: &Mutex<S>) -> Result<()> {
    let store = lock(store)?;
    for (key, _) in KEYS {
        match store.get_str(key) {
            Some(v) => info!("  {:<15} {}", key, config::display_value(key, &v)),
            None => info!("  {:<15} <unset>", key),
        }
    }
    Ok(())
}

fn handle_set<S: ConfigStore>(rest: &str, store: &Mutex<S>, config: &Mutex<Config>) -> Result<()> {
    let (key, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let value = value.trim().trim_matches('"').trim_matches('\'');
    if key.is_empty() || value.is_empty() {
        warn!("usage: set <key> <value>");
        return Ok(());
    }
    if !config::is_known_key(key) {
        warn!("unknown key '{}' (type 'show')", key);
        return Ok(());
    }
    let mut store = lock(store)?;
    store.set_str(key, value)?;
    *lock(config)? = Config::load(&*store);
    info!("saved: {} = {}", key, config::display_value(key, value));
    info!("type 'reboot' to apply");
    Ok(())
}

fn handle_clear<S: ConfigStore>(key: &str, store: &Mutex<S>, config: &Mutex<Config>) -> Result<()> {
    if !config::is_known_key(key) {
        warn!("usage: clear <key>");
        return Ok(());
    }
    let mut store = lock(store)?;
    store.remove(key)?;
    *lock(config)? = Config::load(&*store);
    info!("{} cleared (default restored)", key);
    Ok(())
}

fn handle_debug(sub: &str) {
    use crate::debug_flags::*;
    match sub {
        "show" | "" => {
            info!("debug: {}", status_line());
        }
        "all" => {
            // If any flag is off, turn all on; if all on, turn all off
            let any_off = MODULES.iter().any(|(_, flag)| !is_on(flag));
            for (_, flag) in MODULES.iter() {
                set(flag, any_off);
            }
            info!("debug all: {}", if any_off { "ON" } else { "OFF" });
        }
        name => match by_name(name) {
            Some(flag) => {
                let on = toggle(flag);
                info!("debug {}: {}", name, if on { "ON" } else { "OFF" });
            }
            None => info!("unknown module '{}'. options: http, transit, weather, music, input, all", name),
        },
    }
}
