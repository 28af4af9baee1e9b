//! Response body decoding and tolerant JSON extraction.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use log::{debug, warn};

use crate::error::SourceError;
use crate::http_client::Headers;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const PREVIEW_CHARS: usize = 200;

/// Undo a declared `Content-Encoding`. Unknown encodings and corrupt
/// streams pass the raw bytes through unchanged.
pub fn decompress(body: Vec<u8>, headers: &Headers) -> Vec<u8> {
    let Some(encoding) = headers.get("content-encoding") else {
        return body;
    };
    let encoding = encoding.trim().to_ascii_lowercase();
    let mut out = Vec::new();
    let result = match encoding.as_str() {
        "gzip" | "x-gzip" => GzDecoder::new(body.as_slice()).read_to_end(&mut out),
        // "deflate" is zlib-wrapped in practice, but some servers send raw deflate.
        "deflate" => ZlibDecoder::new(body.as_slice())
            .read_to_end(&mut out)
            .or_else(|_| {
                out.clear();
                DeflateDecoder::new(body.as_slice()).read_to_end(&mut out)
            }),
        "identity" | "" => return body,
        other => {
            debug!("Unknown content-encoding '{}', passing body through", other);
            return body;
        }
    };
    match result {
        Ok(_) => out,
        Err(e) => {
            warn!("Failed to decode {} body: {}", encoding, e);
            body
        }
    }
}

pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Decode bytes to text: strict UTF-8, then Latin-1 when the server declared
/// it, then lossy UTF-8. Never fails. A leading BOM is dropped.
pub fn decode_text(bytes: &[u8], headers: &Headers) -> String {
    let bytes = strip_bom(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    if declares_latin1(headers) {
        return bytes.iter().map(|&b| b as char).collect();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn declares_latin1(headers: &Headers) -> bool {
    headers
        .get("content-type")
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("iso-8859-1") || ct.contains("latin1") || ct.contains("latin-1")
        })
        .unwrap_or(false)
}

/// Skip any preamble before the earliest `{` or `[`.
pub fn json_start(text: &str) -> Option<&str> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let idx = text.find(['{', '['])?;
    Some(&text[idx..])
}

/// Parse a provider payload that may carry a BOM or leading garbage.
pub fn parse_json_lenient(text: &str) -> Result<serde_json::Value, SourceError> {
    let Some(json) = json_start(text) else {
        warn!("Response is not JSON: {}", preview(text));
        return Err(SourceError::Parse("response is not JSON".into()));
    };
    serde_json::from_str(json).map_err(|e| {
        warn!("JSON parse failed ({}): {}", e, preview(json));
        SourceError::Parse(e.to_string())
    })
}

/// Same as [`parse_json_lenient`] but straight into a typed payload.
pub fn parse_payload<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, SourceError> {
    let value = parse_json_lenient(text)?;
    serde_json::from_value(value).map_err(|e| {
        warn!("Unexpected payload shape: {}", e);
        SourceError::Parse(e.to_string())
    })
}

pub fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (k, v) in pairs {
            h.insert(k, v);
        }
        h
    }

    #[test]
    fn bom_is_stripped_once_and_decode_is_idempotent() {
        let body = b"\xEF\xBB\xBF{\"a\":1}";
        let once = decode_text(body, &Headers::new());
        assert_eq!(once, "{\"a\":1}");
        let twice = decode_text(once.as_bytes(), &Headers::new());
        assert_eq!(once, twice);
    }

    #[test]
    fn invalid_utf8_never_fails() {
        let text = decode_text(b"caf\xE9", &Headers::new());
        assert!(text.starts_with("caf"));
        let latin = decode_text(b"caf\xE9", &headers(&[("Content-Type", "text/plain; charset=ISO-8859-1")]));
        assert_eq!(latin, "café");
    }

    #[test]
    fn gzip_body_is_inflated() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello matrix").unwrap();
        let gz = enc.finish().unwrap();
        let out = decompress(gz, &headers(&[("Content-Encoding", "gzip")]));
        assert_eq!(out, b"hello matrix");
    }

    #[test]
    fn corrupt_gzip_passes_through() {
        let out = decompress(b"not gzip".to_vec(), &headers(&[("Content-Encoding", "gzip")]));
        assert_eq!(out, b"not gzip");
    }

    #[test]
    fn preamble_before_json_is_skipped() {
        let value = parse_json_lenient("\u{feff}garbage\r\n{\"ok\":true}").unwrap();
        assert_eq!(value["ok"], serde_json::Value::Bool(true));
        assert!(parse_json_lenient("no json here").is_err());
    }
}
