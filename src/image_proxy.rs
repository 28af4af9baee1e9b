//! Album-art fetcher. The board cannot decode JPEG, so images go through an
//! imgproxy instance that resizes and re-encodes them as BMP.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use embedded_graphics::pixelcolor::Rgb888;
use log::{info, warn};
use tinybmp::Bmp;

use crate::error::SourceError;
use crate::http_client::{redact, url_encode, QueueHandle, QueuedRequest, Response};

const REQUEST_KEY: &str = "image_proxy";

pub type BitmapCallback = Box<dyn FnOnce(Rc<[u8]>)>;
pub type BitmapErrorCallback = Box<dyn FnOnce(&SourceError)>;

#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Base URL, or a template containing `{url}`.
    pub proxy_url: String,
    pub width: u32,
    pub height: u32,
    pub resize_mode: String,
    pub enlarge: bool,
}

impl ProxySettings {
    pub fn new(proxy_url: &str) -> Self {
        Self {
            proxy_url: proxy_url.trim().to_string(),
            width: 64,
            height: 64,
            resize_mode: "fill".into(),
            enlarge: true,
        }
    }
}

pub fn build_proxy_url(settings: &ProxySettings, image_url: &str) -> String {
    let encoded = url_encode(image_url);
    if settings.proxy_url.contains("{url}") {
        return settings.proxy_url.replace("{url}", &encoded);
    }
    format!(
        "{}/unsafe/resize:{}:{}:{}:{}/plain/{}@bmp",
        settings.proxy_url.trim_end_matches('/'),
        settings.resize_mode,
        settings.width,
        settings.height,
        u8::from(settings.enlarge),
        encoded
    )
}

/// Checks the body is a BMP this crate can draw.
pub fn validate_bmp(body: &[u8]) -> Result<(), SourceError> {
    if body.is_empty() {
        return Err(SourceError::Parse("empty image response".into()));
    }
    Bmp::<Rgb888>::from_slice(body)
        .map(|_| ())
        .map_err(|e| SourceError::Parse(format!("not a usable BMP: {:?}", e)))
}

/// Width and height from a BMP info header.
pub fn bmp_size(data: &[u8]) -> Option<(u32, u32)> {
    let word = |at: usize| -> Option<i32> { Some(i32::from_le_bytes(data.get(at..at + 4)?.try_into().ok()?)) };
    Some((word(18)?.unsigned_abs(), word(22)?.unsigned_abs()))
}

#[derive(Clone)]
pub struct ImageProxy {
    settings: Rc<ProxySettings>,
    queue: QueueHandle,
    pending: Rc<Cell<bool>>,
}

impl ImageProxy {
    pub fn new(queue: QueueHandle, settings: ProxySettings) -> Self {
        Self {
            settings: Rc::new(settings),
            queue,
            pending: Rc::default(),
        }
    }

    pub fn available(&self) -> bool {
        !self.settings.proxy_url.is_empty()
    }

    pub fn pending(&self) -> bool {
        self.pending.get()
    }

    pub fn request_bmp(
        &self,
        image_url: &str,
        on_success: impl FnOnce(Rc<[u8]>) + 'static,
        on_error: impl FnOnce(&SourceError) + 'static,
        timeout: Duration,
    ) -> bool {
        if self.pending.get() {
            return false;
        }
        if !self.available() {
            on_error(&SourceError::config("image proxy URL missing", &["Set image", "proxy URL"]));
            return false;
        }
        if image_url.is_empty() {
            on_error(&SourceError::Parse("image URL missing".into()));
            return false;
        }

        let url = build_proxy_url(&self.settings, image_url);
        info!("Image proxy request {}", redact(&url));

        // Only one of the two closures runs, but both need the callbacks.
        let on_success: Rc<Cell<Option<BitmapCallback>>> = Rc::new(Cell::new(Some(Box::new(on_success))));
        let on_error: Rc<Cell<Option<BitmapErrorCallback>>> = Rc::new(Cell::new(Some(Box::new(on_error))));
        let (ok_success, ok_error, err_error) = (on_success, on_error.clone(), on_error);
        let (pending_ok, pending_err) = (self.pending.clone(), self.pending.clone());

        let request = QueuedRequest::get(url)
            .key(REQUEST_KEY)
            .header("Accept", "image/bmp,*/*")
            .header("Connection", "close")
            .timeout(timeout)
            .on_success(move |resp: Response| {
                pending_ok.set(false);
                let result = if resp.status >= 400 || resp.status == 0 {
                    Err(SourceError::Status(resp.status))
                } else {
                    validate_bmp(&resp.body).map(|()| Rc::<[u8]>::from(resp.body))
                };
                match result {
                    Ok(bytes) => {
                        if let Some(cb) = ok_success.take() {
                            cb(bytes);
                        }
                    }
                    Err(e) => {
                        warn!("Image proxy failed: {}", e);
                        if let Some(cb) = ok_error.take() {
                            cb(&e);
                        }
                    }
                }
            })
            .on_error(move |err| {
                pending_err.set(false);
                let err = SourceError::from(err);
                warn!("Image proxy failed: {}", err);
                if let Some(cb) = err_error.take() {
                    cb(&err);
                }
            });

        let started = self.queue.enqueue(request);
        self.pending.set(started);
        started
    }
}
