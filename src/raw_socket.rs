//! Bare-socket HTTP/1.1 used when the pooled session runs out of memory, and
//! as the whole transport on the host. Plain HTTP only; the body is streamed
//! straight into a buffer.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{TransportError, TransportErrorKind};
use crate::http_client::{Headers, Method, PreparedRequest, RawResponse};

const CHUNK: usize = 1024;
const MAX_HEADER_BYTES: usize = 8 * 1024;
/// Read slice, so progress callbacks keep firing on slow links.
const POLL_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub port: u16,
    pub path: String,
}

pub fn parse_url(url: &str) -> Result<UrlParts, TransportError> {
    let invalid = |msg: &str| TransportError::new(TransportErrorKind::InvalidUrl, format!("{}: {}", msg, url));
    let rest = if let Some(rest) = url.strip_prefix("http://") {
        rest
    } else if url.starts_with("https://") {
        return Err(invalid("raw socket fetch supports http only"));
    } else {
        return Err(invalid("missing scheme"));
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid("bad port"))?),
        None => (authority, 80),
    };
    Ok(UrlParts {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

pub fn fetch(url: &str, timeout: Duration, progress: &mut dyn FnMut()) -> Result<RawResponse, TransportError> {
    let mut headers = Headers::new();
    headers.insert("Accept-Encoding", "identity");
    let request = PreparedRequest {
        method: Method::Get,
        url,
        headers: &headers,
        body: None,
        timeout,
    };
    send(&request, progress)
}

/// One request on a fresh connection, always sent with `Connection: close`.
pub fn send(request: &PreparedRequest<'_>, progress: &mut dyn FnMut()) -> Result<RawResponse, TransportError> {
    let parts = parse_url(request.url)?;
    let timeout = request.timeout;
    let deadline = Instant::now() + timeout;

    let addr = (parts.host.as_str(), parts.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| TransportError::new(TransportErrorKind::Connect, format!("cannot resolve {}", parts.host)))?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(POLL_SLICE))?;
    stream.set_write_timeout(Some(timeout))?;

    let host_header = if parts.port == 80 {
        parts.host.clone()
    } else {
        format!("{}:{}", parts.host, parts.port)
    };
    let mut head = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", request.method.as_str(), parts.path, host_header);
    for (name, value) in request.headers.iter() {
        if !name.eq_ignore_ascii_case("connection") && !name.eq_ignore_ascii_case("host") {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
    }
    head.push_str("Connection: close\r\n\r\n");
    stream.write_all(head.as_bytes())?;
    if let Some(body) = request.body {
        stream.write_all(body)?;
    }

    let mut raw = Vec::new();
    let mut buf = [0u8; CHUNK];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                raw.try_reserve(n).map_err(|_| {
                    TransportError::new(TransportErrorKind::ResourceExhausted, "body buffer allocation failed")
                })?;
                raw.extend_from_slice(&buf[..n]);
                progress();
            }
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                progress();
            }
            Err(e) => return Err(e.into()),
        }
        if Instant::now() >= deadline {
            return Err(TransportError::new(TransportErrorKind::Timeout, format!("no complete response after {:?}", timeout)));
        }
    }
    debug!("Raw {} {} read {} bytes", request.method.as_str(), parts.host, raw.len());
    parse_response(&raw)
}

/// Split a complete HTTP/1.x response into status, headers and body.
pub fn parse_response(raw: &[u8]) -> Result<RawResponse, TransportError> {
    let protocol = |msg: &str| TransportError::new(TransportErrorKind::Protocol, msg.to_string());
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| protocol("response header terminator missing"))?;
    if head_end > MAX_HEADER_BYTES {
        return Err(protocol("response headers too large"));
    }
    let head = String::from_utf8_lossy(&raw[..head_end]);
    let mut lines = head.split("\r\n");
    let status_line = lines.next().ok_or_else(|| protocol("empty response"))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| protocol("malformed status line"))?;

    let mut headers = Headers::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim(), value.trim());
        }
    }

    let body = &raw[head_end + 4..];
    let chunked = headers
        .get("transfer-encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let body = if chunked {
        decode_chunked(body)?
    } else {
        match headers.get("content-length").and_then(|v| v.trim().parse::<usize>().ok()) {
            Some(len) if len <= body.len() => body[..len].to_vec(),
            _ => body.to_vec(),
        }
    };
    Ok(RawResponse { status, headers, body })
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, TransportError> {
    let protocol = |msg: &str| TransportError::new(TransportErrorKind::Protocol, msg.to_string());
    let mut out = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| protocol("chunk size line missing"))?;
        let size_text = String::from_utf8_lossy(&data[..line_end]);
        let size_text = size_text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| protocol("bad chunk size"))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size {
            return Err(protocol("truncated chunk"));
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size + 2..).unwrap_or(&[]);
    }
}
