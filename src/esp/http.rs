//! TLS-capable transport on ESP-IDF's HTTP client.

use std::time::Duration;

use embedded_svc::http::client::Client;
use embedded_svc::http::Method as SvcMethod;
use embedded_svc::io::Write;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::io::EspIOError;
use esp_idf_sys::EspError;
use log::{debug, info};

use crate::debug_flags::{self, DEBUG_HTTP};
use crate::error::{TransportError, TransportErrorKind};
use crate::http_client::{redact, Headers, Method, PreparedRequest, RawResponse, Session, Transport};

/// The ESP connection takes its timeout once, at creation.
const SESSION_TIMEOUT: Duration = Duration::from_secs(20);
const CHUNK: usize = 1024;
/// Response headers handed back to the queue for decoding.
const KEPT_HEADERS: [&str; 3] = ["Content-Encoding", "Content-Type", "Connection"];

fn classify(err: EspError, context: &str) -> TransportError {
    let code = err.code();
    let kind = if code == esp_idf_sys::ESP_ERR_NO_MEM as i32 {
        TransportErrorKind::ResourceExhausted
    } else if code == esp_idf_sys::ESP_ERR_HTTP_CONNECT as i32 {
        TransportErrorKind::Connect
    } else if code == esp_idf_sys::ESP_ERR_HTTP_EAGAIN as i32 || code == esp_idf_sys::ESP_ERR_TIMEOUT as i32 {
        TransportErrorKind::Timeout
    } else {
        TransportErrorKind::Io
    };
    TransportError::new(kind, format!("{}: {}", context, err))
}

fn io_err(context: &'static str) -> impl Fn(EspIOError) -> TransportError {
    move |e| classify(e.0, context)
}

#[derive(Debug, Default)]
pub struct EspTransport;

impl Transport for EspTransport {
    fn open_session(&mut self) -> Result<Box<dyn Session>, TransportError> {
        let config = Configuration {
            timeout: Some(SESSION_TIMEOUT),
            use_global_ca_store: true,
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&config).map_err(|e| classify(e, "session"))?;
        debug!("HTTP session opened");
        Ok(Box::new(EspSession {
            client: Client::wrap(connection),
        }))
    }
}

struct EspSession {
    client: Client<EspHttpConnection>,
}

impl Session for EspSession {
    fn execute(
        &mut self,
        request: &PreparedRequest<'_>,
        progress: &mut dyn FnMut(),
    ) -> Result<RawResponse, TransportError> {
        let method = match request.method {
            Method::Get => SvcMethod::Get,
            Method::Post => SvcMethod::Post,
        };
        let headers: Vec<(&str, &str)> = request.headers.iter().collect();
        if debug_flags::is_on(&DEBUG_HTTP) {
            info!("ESP {} {}", request.method.as_str(), redact(request.url));
        }

        let mut req = self
            .client
            .request(method, request.url, &headers)
            .map_err(io_err("request"))?;
        if let Some(body) = request.body {
            req.write_all(body).map_err(io_err("write"))?;
        }
        let mut response = req.submit().map_err(io_err("submit"))?;

        let status = response.status();
        let mut kept = Headers::new();
        for name in KEPT_HEADERS {
            if let Some(value) = response.header(name) {
                kept.insert(name, value);
            }
        }

        let mut body = Vec::new();
        let mut buf = [0u8; CHUNK];
        loop {
            let n = response.read(&mut buf).map_err(io_err("read"))?;
            if n == 0 {
                break;
            }
            body.try_reserve(n).map_err(|_| {
                TransportError::new(TransportErrorKind::ResourceExhausted, "body buffer allocation failed")
            })?;
            body.extend_from_slice(&buf[..n]);
            progress();
        }

        Ok(RawResponse {
            status,
            headers: kept,
            body,
        })
    }
}
