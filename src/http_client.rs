//! Cooperative HTTP request queue.
//!
//! Data sources enqueue requests through a cloneable [`QueueHandle`]; the
//! scheduler owns the [`RequestQueue`] and calls [`RequestQueue::tick`] once
//! per loop iteration. Each tick executes at most one request synchronously,
//! then hands the result to the request's callback.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::debug_flags::{self, DEBUG_HTTP};
use crate::decode;
use crate::error::{TransportError, TransportErrorKind};
use crate::raw_socket;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DUPLICATE_LOG_WINDOW: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("muni-matrix/", env!("CARGO_PKG_VERSION"));

// ── Wire types ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn insert(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            slot.1 = value.to_string();
        } else {
            self.0.push((name.to_string(), value.to_string()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn wants_close(&self) -> bool {
        self.get("connection")
            .map(|v| v.trim().eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    /// `self` layered over `base`: caller values win.
    fn merged_over(&self, base: &Headers) -> Headers {
        let mut merged = base.clone();
        for (k, v) in self.iter() {
            merged.insert(k, v);
        }
        merged
    }
}

fn default_headers() -> Headers {
    let mut h = Headers::new();
    h.insert("Accept-Encoding", "identity");
    h.insert("User-Agent", USER_AGENT);
    h
}

/// Undecoded response as produced by a transport.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// What a success callback receives. The status is not interpreted: 4xx and
/// 5xx responses arrive here too.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub text: String,
    pub body: Vec<u8>,
    pub status: u16,
    pub headers: Headers,
}

impl From<RawResponse> for Response {
    fn from(raw: RawResponse) -> Self {
        let body = decode::decompress(raw.body, &raw.headers);
        let text = decode::decode_text(&body, &raw.headers);
        Response {
            text,
            body,
            status: raw.status,
            headers: raw.headers,
        }
    }
}

// ── Transport seam ──

pub struct PreparedRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    pub headers: &'a Headers,
    pub body: Option<&'a [u8]>,
    pub timeout: Duration,
}

/// A reusable connection context.
pub trait Session {
    fn execute(
        &mut self,
        request: &PreparedRequest<'_>,
        progress: &mut dyn FnMut(),
    ) -> Result<RawResponse, TransportError>;
}

pub trait Transport {
    fn open_session(&mut self) -> Result<Box<dyn Session>, TransportError>;

    /// Plain-HTTP GET over a bare socket, bypassing the session.
    fn raw_get(
        &mut self,
        url: &str,
        timeout: Duration,
        progress: &mut dyn FnMut(),
    ) -> Result<RawResponse, TransportError> {
        raw_socket::fetch(url, timeout, progress)
    }
}

/// Receives busy/idle transitions of the queue.
pub trait ActivityIndicator {
    fn set_active(&mut self, active: bool);
}

/// Indicator whose state is read back by whoever draws it.
#[derive(Debug, Clone, Default)]
pub struct SharedIndicator(Rc<Cell<bool>>);

impl SharedIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.get()
    }
}

impl ActivityIndicator for SharedIndicator {
    fn set_active(&mut self, active: bool) {
        self.0.set(active);
    }
}

// ── Requests ──

pub type SuccessCallback = Box<dyn FnOnce(Response)>;
pub type ErrorCallback = Box<dyn FnOnce(TransportError)>;
pub type ProgressCallback = Box<dyn FnMut()>;

pub struct QueuedRequest {
    key: String,
    method: Method,
    url: String,
    body: Option<String>,
    headers: Headers,
    timeout: Duration,
    on_progress: Option<ProgressCallback>,
    on_success: SuccessCallback,
    on_error: ErrorCallback,
}

impl QueuedRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            key: url.clone(),
            method,
            url,
            body: None,
            headers: Headers::new(),
            timeout: DEFAULT_TIMEOUT,
            on_progress: None,
            on_success: Box::new(|_| {}),
            on_error: Box::new(|_| {}),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut req = Self::new(Method::Post, url);
        req.body = Some(body.into());
        req
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn on_success(mut self, f: impl FnOnce(Response) + 'static) -> Self {
        self.on_success = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(TransportError) + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }

    pub fn on_progress(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }
}

// ── Queue ──

#[derive(Default)]
struct QueueState {
    requests: VecDeque<QueuedRequest>,
    pending: HashSet<String>,
    last_duplicate_log: Option<Instant>,
    suppressed_duplicates: u32,
}

impl QueueState {
    fn note_duplicate(&mut self, key: &str, now: Instant) {
        let due = self
            .last_duplicate_log
            .map(|t| now.saturating_duration_since(t) >= DUPLICATE_LOG_WINDOW)
            .unwrap_or(true);
        if due {
            info!(
                "Request '{}' already pending, skipping ({} more suppressed)",
                key, self.suppressed_duplicates
            );
            self.last_duplicate_log = Some(now);
            self.suppressed_duplicates = 0;
        } else {
            self.suppressed_duplicates += 1;
        }
    }
}

/// Shared enqueue handle held by data sources.
#[derive(Clone, Default)]
pub struct QueueHandle(Rc<RefCell<QueueState>>);

impl QueueHandle {
    /// Append a request unless its key is already pending.
    pub fn enqueue(&self, request: QueuedRequest) -> bool {
        let mut state = self.0.borrow_mut();
        if state.pending.contains(&request.key) {
            state.note_duplicate(&request.key, Instant::now());
            return false;
        }
        state.pending.insert(request.key.clone());
        if debug_flags::is_on(&DEBUG_HTTP) {
            info!("HTTP queued {} ({} waiting)", request.key, state.requests.len() + 1);
        }
        state.requests.push_back(request);
        true
    }

    pub fn enqueue_get(
        &self,
        url: &str,
        key: &str,
        on_success: impl FnOnce(Response) + 'static,
        on_error: impl FnOnce(TransportError) + 'static,
    ) -> bool {
        self.enqueue(
            QueuedRequest::get(url)
                .key(key)
                .on_success(on_success)
                .on_error(on_error),
        )
    }

    pub fn enqueue_post(
        &self,
        url: &str,
        body: &str,
        key: &str,
        on_success: impl FnOnce(Response) + 'static,
        on_error: impl FnOnce(TransportError) + 'static,
    ) -> bool {
        self.enqueue(
            QueuedRequest::post(url, body)
                .key(key)
                .on_success(on_success)
                .on_error(on_error),
        )
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.0.borrow().pending.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().requests.is_empty()
    }

    fn pop(&self) -> Option<QueuedRequest> {
        self.0.borrow_mut().requests.pop_front()
    }

    fn release(&self, key: &str) {
        self.0.borrow_mut().pending.remove(key);
    }
}

pub struct RequestQueue<T: Transport> {
    handle: QueueHandle,
    transport: T,
    session: Option<Box<dyn Session>>,
    indicator: Box<dyn ActivityIndicator>,
    executed: u64,
}

impl<T: Transport> RequestQueue<T> {
    pub fn new(transport: T, indicator: Box<dyn ActivityIndicator>) -> Self {
        Self {
            handle: QueueHandle::default(),
            transport,
            session: None,
            indicator,
            executed: 0,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn close_session(&mut self) {
        if self.session.take().is_some() {
            debug!("HTTP session closed");
        }
    }

    /// Run the next queued request to completion. Returns false when idle.
    pub fn tick(&mut self) -> bool {
        let Some(request) = self.handle.pop() else {
            self.indicator.set_active(false);
            return false;
        };
        self.indicator.set_active(true);

        let QueuedRequest {
            key,
            method,
            url,
            body,
            headers,
            timeout,
            mut on_progress,
            on_success,
            on_error,
        } = request;

        let mut noop = || {};
        let progress: &mut dyn FnMut() = match on_progress.as_mut() {
            Some(f) => f.as_mut(),
            None => &mut noop,
        };
        let result = self.execute(method, &url, body.as_deref(), &headers, timeout, progress);
        self.executed += 1;

        // Released before the callback so it can re-enqueue the same key.
        self.handle.release(&key);

        match result {
            Ok(response) => on_success(response),
            Err(err) => on_error(err),
        }
        true
    }

    fn execute(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&str>,
        headers: &Headers,
        timeout: Duration,
        progress: &mut dyn FnMut(),
    ) -> Result<Response, TransportError> {
        let close = headers.wants_close();
        if close {
            self.close_session();
        }

        let mut merged = headers.merged_over(&default_headers());
        if let Some(body) = body {
            merged.insert("Content-Length", &body.len().to_string());
        }
        let prepared = PreparedRequest {
            method,
            url,
            headers: &merged,
            body: body.map(str::as_bytes),
            timeout,
        };

        let started = Instant::now();
        let attempt = match self.session() {
            Ok(session) => session.execute(&prepared, progress),
            Err(e) => Err(e),
        };

        let attempt = match attempt {
            Err(e) if e.wants_raw_fallback() && method == Method::Get => {
                warn!("HTTP {} exhausted resources ({}), retrying over raw socket", redact(url), e);
                self.close_session();
                self.transport.raw_get(url, timeout, progress)
            }
            other => other,
        };

        match attempt {
            Ok(raw) => {
                let elapsed = started.elapsed().as_millis();
                if debug_flags::is_on(&DEBUG_HTTP) {
                    info!("HTTP {} {} -> {} ({} bytes, {}ms)", method.as_str(), redact(url), raw.status, raw.body.len(), elapsed);
                } else {
                    debug!("HTTP {} {} -> {} ({}ms)", method.as_str(), redact(url), raw.status, elapsed);
                }
                if close {
                    self.close_session();
                }
                Ok(Response::from(raw))
            }
            Err(e) => {
                warn!("HTTP {} {} failed: {}", method.as_str(), redact(url), e);
                self.close_session();
                Err(e)
            }
        }
    }

    fn session(&mut self) -> Result<&mut Box<dyn Session>, TransportError> {
        if self.session.is_none() {
            debug!("Opening HTTP session");
            self.session = Some(self.transport.open_session()?);
        }
        self.session
            .as_mut()
            .ok_or_else(|| TransportError::new(TransportErrorKind::Io, "session unavailable"))
    }
}

/// URL without its query string, for logs.
pub fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub fn url_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scripted transport: pops canned results and records what it saw.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        pub log: Rc<RefCell<FakeLog>>,
    }

    #[derive(Default)]
    pub(crate) struct FakeLog {
        pub responses: VecDeque<Result<RawResponse, TransportError>>,
        pub raw_responses: VecDeque<Result<RawResponse, TransportError>>,
        pub requests: Vec<(Method, String, Headers, Option<String>)>,
        pub raw_requests: Vec<String>,
        pub sessions_opened: usize,
        pub sessions_closed: usize,
    }

    impl FakeLog {
        pub fn push(&mut self, status: u16, body: &str) {
            self.responses.push_back(Ok(RawResponse {
                status,
                headers: Headers::new(),
                body: body.as_bytes().to_vec(),
            }));
        }

        pub fn push_err(&mut self, kind: TransportErrorKind) {
            self.responses.push_back(Err(TransportError::new(kind, "scripted")));
        }
    }

    struct FakeSession(Rc<RefCell<FakeLog>>);

    impl Drop for FakeSession {
        fn drop(&mut self) {
            if let Ok(mut log) = self.0.try_borrow_mut() {
                log.sessions_closed += 1;
            }
        }
    }

    impl Session for FakeSession {
        fn execute(
            &mut self,
            request: &PreparedRequest<'_>,
            progress: &mut dyn FnMut(),
        ) -> Result<RawResponse, TransportError> {
            progress();
            let mut log = self.0.borrow_mut();
            log.requests.push((
                request.method,
                request.url.to_string(),
                request.headers.clone(),
                request.body.map(|b| String::from_utf8_lossy(b).into_owned()),
            ));
            log.responses.pop_front().unwrap_or(Ok(RawResponse {
                status: 200,
                ..Default::default()
            }))
        }
    }

    impl Transport for FakeTransport {
        fn open_session(&mut self) -> Result<Box<dyn Session>, TransportError> {
            self.log.borrow_mut().sessions_opened += 1;
            Ok(Box::new(FakeSession(self.log.clone())))
        }

        fn raw_get(
            &mut self,
            url: &str,
            _timeout: Duration,
            _progress: &mut dyn FnMut(),
        ) -> Result<RawResponse, TransportError> {
            let mut log = self.log.borrow_mut();
            log.raw_requests.push(url.to_string());
            log.raw_responses
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::new(TransportErrorKind::Connect, "no raw script")))
        }
    }

    pub(crate) fn fake_queue() -> (RequestQueue<FakeTransport>, Rc<RefCell<FakeLog>>) {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        (RequestQueue::new(transport, Box::new(SharedIndicator::new())), log)
    }

    /// Tick until the queue drains.
    pub(crate) fn drain<T: Transport>(queue: &mut RequestQueue<T>) {
        while queue.tick() {}
    }

    #[test]
    fn duplicate_keys_are_rejected_until_completion() {
        let (mut queue, log) = fake_queue();
        let handle = queue.handle();
        assert!(handle.enqueue(QueuedRequest::get("http://a/x").key("k")));
        assert!(!handle.enqueue(QueuedRequest::get("http://a/y").key("k")));
        assert_eq!(handle.len(), 1);
        assert!(handle.is_pending("k"));

        assert!(queue.tick());
        assert!(!handle.is_pending("k"));
        assert!(handle.enqueue(QueuedRequest::get("http://a/y").key("k")));
        assert_eq!(log.borrow().requests.len(), 1);
    }

    #[test]
    fn shorthand_get_and_post() {
        let (mut queue, log) = fake_queue();
        let handle = queue.handle();
        let got = Rc::new(Cell::new(0u16));
        let g = got.clone();
        assert!(handle.enqueue_get("http://h/a", "a", move |r| g.set(r.status), |_| {}));
        assert!(handle.enqueue_post("http://h/token", "x=1", "token", |_| {}, |_| {}));
        drain(&mut queue);
        assert_eq!(got.get(), 200);
        let log = log.borrow();
        assert_eq!(log.requests[1].0, Method::Post);
        assert_eq!(log.requests[1].3.as_deref(), Some("x=1"));
        assert_eq!(log.requests[1].2.get("Content-Length"), Some("3"));
    }

    #[test]
    fn key_defaults_to_url() {
        let (queue, _) = fake_queue();
        let handle = queue.handle();
        assert!(handle.enqueue(QueuedRequest::get("http://a/x")));
        assert!(handle.is_pending("http://a/x"));
    }

    #[test]
    fn requests_execute_in_fifo_order_one_per_tick() {
        let (mut queue, log) = fake_queue();
        let handle = queue.handle();
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let order = order.clone();
            handle.enqueue(
                QueuedRequest::get(format!("http://h/{}", name))
                    .on_success(move |_| order.borrow_mut().push(name)),
            );
        }
        assert!(queue.tick());
        assert_eq!(*order.borrow(), vec!["first"]);
        drain(&mut queue);
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
        assert_eq!(log.borrow().requests.len(), 3);
        assert!(!queue.tick());
    }

    #[test]
    fn shared_key_in_one_tick_executes_once_and_only_first_callback_fires() {
        let (mut queue, log) = fake_queue();
        let handle = queue.handle();
        let fired = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (fired.clone(), fired.clone());
        assert!(handle.enqueue(QueuedRequest::get("http://h/one").key("shared").on_success(move |_| a.borrow_mut().push("A"))));
        assert!(!handle.enqueue(QueuedRequest::get("http://h/two").key("shared").on_success(move |_| b.borrow_mut().push("B"))));
        drain(&mut queue);
        assert_eq!(*fired.borrow(), vec!["A"]);
        assert_eq!(log.borrow().requests.len(), 1);
    }

    #[test]
    fn error_statuses_still_reach_on_success() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(503, "busy");
        let seen = Rc::new(Cell::new(0u16));
        let s = seen.clone();
        queue.handle().enqueue(QueuedRequest::get("http://h/").on_success(move |r| s.set(r.status)));
        queue.tick();
        assert_eq!(seen.get(), 503);
    }

    #[test]
    fn transport_failure_closes_session_and_calls_on_error() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push_err(TransportErrorKind::Timeout);
        let failed = Rc::new(Cell::new(false));
        let f = failed.clone();
        queue.handle().enqueue(QueuedRequest::get("http://h/").on_error(move |e| {
            assert_eq!(e.kind, TransportErrorKind::Timeout);
            f.set(true);
        }));
        queue.tick();
        assert!(failed.get());
        assert!(!queue.has_session());
        assert!(!queue.handle().is_pending("http://h/"));
    }

    #[test]
    fn callback_may_reenqueue_its_own_key() {
        let (mut queue, log) = fake_queue();
        let handle = queue.handle();
        let h2 = handle.clone();
        let requeued = Rc::new(Cell::new(false));
        let r = requeued.clone();
        handle.enqueue(QueuedRequest::get("http://h/poll").on_success(move |_| {
            r.set(h2.enqueue(QueuedRequest::get("http://h/poll")));
        }));
        queue.tick();
        assert!(requeued.get());
        queue.tick();
        assert_eq!(log.borrow().requests.len(), 2);
    }

    #[test]
    fn session_is_reused_and_recreated_around_connection_close() {
        let (mut queue, log) = fake_queue();
        let handle = queue.handle();
        handle.enqueue(QueuedRequest::get("http://h/1"));
        handle.enqueue(QueuedRequest::get("http://h/2"));
        drain(&mut queue);
        assert_eq!(log.borrow().sessions_opened, 1);
        assert!(queue.has_session());

        handle.enqueue(QueuedRequest::get("http://h/img").header("Connection", "close"));
        queue.tick();
        assert_eq!(log.borrow().sessions_opened, 2);
        assert!(!queue.has_session());
    }

    #[test]
    fn default_headers_merge_under_caller_headers() {
        let (mut queue, log) = fake_queue();
        queue
            .handle()
            .enqueue(QueuedRequest::get("http://h/").header("user-agent", "custom"));
        queue.tick();
        let log = log.borrow();
        let headers = &log.requests[0].2;
        assert_eq!(headers.get("Accept-Encoding"), Some("identity"));
        assert_eq!(headers.get("User-Agent"), Some("custom"));
    }

    #[test]
    fn post_body_and_length_are_sent() {
        let (mut queue, log) = fake_queue();
        queue.handle().enqueue(QueuedRequest::post("http://h/token", "a=b"));
        queue.tick();
        let log = log.borrow();
        assert_eq!(log.requests[0].0, Method::Post);
        assert_eq!(log.requests[0].3.as_deref(), Some("a=b"));
        assert_eq!(log.requests[0].2.get("content-length"), Some("3"));
    }

    #[test]
    fn resource_exhaustion_on_get_falls_back_to_raw_socket() {
        let (mut queue, log) = fake_queue();
        {
            let mut l = log.borrow_mut();
            l.push_err(TransportErrorKind::ResourceExhausted);
            l.raw_responses.push_back(Ok(RawResponse {
                status: 200,
                headers: Headers::new(),
                body: b"BMdata".to_vec(),
            }));
        }
        let got = Rc::new(RefCell::new(Vec::new()));
        let g = got.clone();
        queue
            .handle()
            .enqueue(QueuedRequest::get("http://proxy/img").on_success(move |r| *g.borrow_mut() = r.body));
        queue.tick();
        assert_eq!(*got.borrow(), b"BMdata");
        assert_eq!(log.borrow().raw_requests, vec!["http://proxy/img".to_string()]);
    }

    #[test]
    fn resource_exhaustion_on_post_is_not_retried() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push_err(TransportErrorKind::ResourceExhausted);
        let failed = Rc::new(Cell::new(false));
        let f = failed.clone();
        queue
            .handle()
            .enqueue(QueuedRequest::post("http://h/", "x").on_error(move |_| f.set(true)));
        queue.tick();
        assert!(failed.get());
        assert!(log.borrow().raw_requests.is_empty());
    }

    #[test]
    fn progress_callback_is_forwarded() {
        let (mut queue, _) = fake_queue();
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        queue
            .handle()
            .enqueue(QueuedRequest::get("http://h/").on_progress(move || c.set(c.get() + 1)));
        queue.tick();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn indicator_tracks_activity() {
        let indicator = SharedIndicator::new();
        let mut queue = RequestQueue::new(FakeTransport::default(), Box::new(indicator.clone()));
        queue.handle().enqueue(QueuedRequest::get("http://h/"));
        queue.tick();
        assert!(indicator.is_active());
        queue.tick();
        assert!(!indicator.is_active());
    }

    #[test]
    fn url_encoding_and_redaction() {
        assert_eq!(url_encode("a b/c?d"), "a%20b%2Fc%3Fd");
        assert_eq!(redact("http://h/p?api_key=secret"), "http://h/p");
    }
}
