//! Host run mode: JSON config, plain-HTTP transport and a panel that only
//! logs. Useful for trying widgets without a board.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use embedded_graphics::pixelcolor::Rgb888;
use log::{info, Level, LevelFilter, Log, Metadata, Record};

use crate::app;
use crate::config::{Config, JsonConfig};
use crate::console::{spawn_console, HostSystem};
use crate::error::TransportError;
use crate::http_client::{PreparedRequest, RawResponse, Session, Transport};
use crate::raw_socket;
use crate::scheduler::{FramebufferSink, NoInput};

pub const CONFIG_PATH: &str = "config.json";
/// `error`, `warn`, `info`, `debug` or `trace`.
pub const LOG_ENV: &str = "MUNI_LOG";

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "E",
            Level::Warn => "W",
            Level::Info => "I",
            Level::Debug => "D",
            Level::Trace => "V",
        };
        eprintln!("{} ({}) {}", tag, record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logger() {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Every request on its own connection; there is nothing to pool.
#[derive(Debug, Default)]
pub struct HostTransport;

struct HostSession;

impl Session for HostSession {
    fn execute(
        &mut self,
        request: &PreparedRequest<'_>,
        progress: &mut dyn FnMut(),
    ) -> Result<RawResponse, TransportError> {
        raw_socket::send(request, progress)
    }
}

impl Transport for HostTransport {
    fn open_session(&mut self) -> Result<Box<dyn Session>, TransportError> {
        Ok(Box::new(HostSession))
    }
}

/// Count lit pixels so the log shows something changed.
fn log_panel(pixels: &[Rgb888]) {
    let lit = pixels.iter().filter(|p| **p != Rgb888::new(0, 0, 0)).count();
    log::trace!("panel: {} lit pixels", lit);
}

pub fn run() -> Result<()> {
    init_logger();
    info!("Host mode, config from {}", CONFIG_PATH);

    let store = JsonConfig::load(CONFIG_PATH)?;
    let cfg = Config::load(&store);
    let shared_cfg = Arc::new(Mutex::new(cfg.clone()));
    spawn_console(Arc::new(Mutex::new(store)), shared_cfg, HostSystem)?;

    app::run(&cfg, HostTransport, FramebufferSink::new(log_panel), NoInput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{Headers, Method};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn session_speaks_plain_http() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut req = [0u8; 512];
            let _ = conn.read(&mut req).unwrap();
            conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").unwrap();
        });

        let mut session = HostTransport.open_session().unwrap();
        let url = format!("http://127.0.0.1:{}/", port);
        let headers = Headers::new();
        let request = PreparedRequest {
            method: Method::Get,
            url: &url,
            headers: &headers,
            body: None,
            timeout: Duration::from_secs(5),
        };
        let resp = session.execute(&request, &mut || {}).unwrap();
        server.join().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"ok");
    }
}
