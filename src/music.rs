//! Spotify now-playing client.
//!
//! Polling needs a short-lived access token obtained from a long-lived
//! refresh token. Callers that arrive while a refresh is in flight are parked
//! in `waiting` and resumed together with a single now-playing request once
//! the token arrives (or all failed if it does not).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use base64::prelude::{Engine as _, BASE64_STANDARD};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::debug_flags::{self, DEBUG_MUSIC};
use crate::decode;
use crate::http_client::{url_encode, QueueHandle, QueuedRequest, Response};
use crate::source::{self, RefreshCallbacks, SharedCallbacks};

pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_NOW_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";
const TOKEN_KEY: &str = "spotify_token";
const NOW_PLAYING_KEY: &str = "spotify_now_playing";
const DEFAULT_EXPIRES_IN: u64 = 3_600;
/// Refresh this long before the provider's stated expiry.
const EXPIRY_MARGIN: u64 = 60;
pub const ART_TARGET_PX: u32 = 64;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicStage {
    Config,
    Token,
    NowPlaying,
    Parse,
    Request,
}

impl MusicStage {
    pub fn as_str(self) -> &'static str {
        match self {
            MusicStage::Config => "config",
            MusicStage::Token => "token",
            MusicStage::NowPlaying => "now_playing",
            MusicStage::Parse => "parse",
            MusicStage::Request => "request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicError {
    pub stage: MusicStage,
    pub message: String,
}

impl MusicError {
    pub fn new(stage: MusicStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for MusicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage.as_str(), self.message)
    }
}

impl std::error::Error for MusicError {}

// ── Data types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playback {
    pub is_playing: bool,
    pub track_name: String,
    pub track_id: String,
    pub artist_name: String,
    pub album_name: String,
    pub album_id: String,
    pub album_image_url: String,
}

impl Playback {
    pub fn has_track(&self) -> bool {
        !self.track_name.is_empty() || !self.track_id.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MusicCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl MusicCredentials {
    pub fn is_complete(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty() && !self.refresh_token.trim().is_empty()
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64_STANDARD.encode(raw))
    }
}

// ── Spotify JSON structures ─────────────────────────────────────────

#[derive(Deserialize)]
struct TokenPayload {
    access_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct NowPlayingPayload {
    is_playing: Option<bool>,
    item: Option<TrackItem>,
}

#[derive(Deserialize)]
struct TrackItem {
    id: Option<String>,
    name: Option<String>,
    artists: Option<Vec<ArtistRef>>,
    album: Option<AlbumRef>,
}

#[derive(Deserialize)]
struct ArtistRef {
    name: Option<String>,
}

#[derive(Deserialize)]
struct AlbumRef {
    id: Option<String>,
    name: Option<String>,
    images: Option<Vec<ImageRef>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    pub url: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// URL of the image whose larger side is closest to `target`; the first
/// entry wins ties. Falls back to the first image's URL.
pub fn pick_image_url(images: &[ImageRef], target: u32) -> String {
    let mut best: Option<(&str, u32)> = None;
    for img in images {
        let Some(url) = img.url.as_deref().filter(|u| !u.is_empty()) else {
            continue;
        };
        let size = img.width.unwrap_or(0).max(img.height.unwrap_or(0));
        let score = size.abs_diff(target);
        if best.map(|(_, s)| score < s).unwrap_or(true) {
            best = Some((url, score));
        }
    }
    match best {
        Some((url, _)) => url.to_string(),
        None => images.first().and_then(|i| i.url.clone()).unwrap_or_default(),
    }
}

fn parse_playback(text: &str) -> Result<Playback, MusicError> {
    let payload: NowPlayingPayload =
        decode::parse_payload(text).map_err(|e| MusicError::new(MusicStage::Parse, e.to_string()))?;
    let mut playback = Playback {
        is_playing: payload.is_playing.unwrap_or(false),
        ..Default::default()
    };
    if let Some(item) = payload.item {
        playback.track_name = item.name.unwrap_or_default();
        playback.track_id = item.id.unwrap_or_default();
        playback.artist_name = item
            .artists
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.name.filter(|n| !n.is_empty()))
            .collect::<Vec<_>>()
            .join(", ");
        if let Some(album) = item.album {
            playback.album_name = album.name.unwrap_or_default();
            playback.album_id = album.id.unwrap_or_default();
            let images = album.images.unwrap_or_default();
            if debug_flags::is_on(&DEBUG_MUSIC) {
                for img in &images {
                    info!("Album image {:?}x{:?} {}", img.width, img.height, img.url.as_deref().unwrap_or(""));
                }
            }
            playback.album_image_url = pick_image_url(&images, ART_TARGET_PX);
        }
    }
    Ok(playback)
}

fn parse_token(resp: &Response) -> Result<(String, u64), MusicError> {
    if resp.status >= 400 {
        return Err(MusicError::new(MusicStage::Token, format!("token refresh failed: HTTP {}", resp.status)));
    }
    let payload: TokenPayload =
        decode::parse_payload(&resp.text).map_err(|e| MusicError::new(MusicStage::Token, e.to_string()))?;
    let token = payload
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| MusicError::new(MusicStage::Token, "no access_token in response"))?;
    Ok((token, payload.expires_in.unwrap_or(DEFAULT_EXPIRES_IN)))
}

// ── Client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPhase {
    #[default]
    Idle,
    AwaitingToken,
}

struct PendingPoll {
    callbacks: RefreshCallbacks<MusicError>,
    timeout: Duration,
}

#[derive(Default)]
struct MusicState {
    access_token: Option<String>,
    token_deadline: Option<Instant>,
    phase: TokenPhase,
    waiting: Vec<PendingPoll>,
    playback: Playback,
    last_error: Option<MusicError>,
    failures: u32,
}

struct Endpoints {
    token_url: String,
    now_playing_url: String,
}

#[derive(Clone)]
pub struct MusicClient {
    creds: Rc<MusicCredentials>,
    endpoints: Rc<Endpoints>,
    queue: QueueHandle,
    state: Rc<RefCell<MusicState>>,
}

impl MusicClient {
    pub fn new(queue: QueueHandle, creds: MusicCredentials) -> Self {
        Self::with_endpoints(queue, creds, DEFAULT_TOKEN_URL, DEFAULT_NOW_PLAYING_URL)
    }

    pub fn with_endpoints(queue: QueueHandle, creds: MusicCredentials, token_url: &str, now_playing_url: &str) -> Self {
        Self {
            creds: Rc::new(creds),
            endpoints: Rc::new(Endpoints {
                token_url: token_url.to_string(),
                now_playing_url: now_playing_url.to_string(),
            }),
            queue,
            state: Rc::default(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.creds.is_complete()
    }

    pub fn playback(&self) -> Playback {
        self.state.borrow().playback.clone()
    }

    pub fn last_error(&self) -> Option<MusicError> {
        self.state.borrow().last_error.clone()
    }

    pub fn token_phase(&self) -> TokenPhase {
        self.state.borrow().phase
    }

    pub fn token_valid(&self, now: Instant) -> bool {
        let st = self.state.borrow();
        st.access_token.is_some() && st.token_deadline.map(|d| now < d).unwrap_or(false)
    }

    /// Poll current playback, refreshing the access token first if needed.
    pub fn request_currently_playing(&self, callbacks: RefreshCallbacks<MusicError>, timeout: Duration) -> bool {
        if !self.has_credentials() {
            let err = MusicError::new(MusicStage::Config, "Spotify credentials missing");
            self.set_error(&err);
            callbacks.failed(&err);
            return false;
        }
        let poll = PendingPoll { callbacks, timeout };
        if !self.token_valid(Instant::now()) {
            return self.request_token(poll);
        }
        self.enqueue_now_playing(vec![poll]).is_ok()
    }

    fn request_token(&self, poll: PendingPoll) -> bool {
        let timeout = poll.timeout;
        let already_refreshing = {
            let mut st = self.state.borrow_mut();
            st.waiting.push(poll);
            st.phase == TokenPhase::AwaitingToken
        };
        if already_refreshing {
            debug!("Spotify token refresh in flight, parking poll");
            return true;
        }

        let body = format!(
            "grant_type=refresh_token&refresh_token={}",
            url_encode(&self.creds.refresh_token)
        );
        let (ok, failed) = (self.clone(), self.clone());
        let request = QueuedRequest::post(self.endpoints.token_url.as_str(), body)
            .key(TOKEN_KEY)
            .header("Authorization", &self.creds.basic_auth())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .timeout(timeout)
            .on_success(move |resp| ok.on_token_response(&resp))
            .on_error(move |err| failed.on_token_failure(MusicError::new(MusicStage::Token, err.to_string())));

        if self.queue.enqueue(request) {
            self.state.borrow_mut().phase = TokenPhase::AwaitingToken;
            true
        } else {
            self.state.borrow_mut().waiting.clear();
            false
        }
    }

    fn on_token_response(&self, resp: &Response) {
        match parse_token(resp) {
            Ok((token, expires_in)) => {
                let lifetime = Duration::from_secs(expires_in.saturating_sub(EXPIRY_MARGIN));
                let waiting = {
                    let mut st = self.state.borrow_mut();
                    st.access_token = Some(token);
                    st.token_deadline = Some(Instant::now() + lifetime);
                    st.phase = TokenPhase::Idle;
                    std::mem::take(&mut st.waiting)
                };
                info!("Spotify token refreshed, valid for {}s", lifetime.as_secs());
                if waiting.is_empty() {
                    return;
                }
                if let Err(rejected) = self.enqueue_now_playing(waiting) {
                    let err = MusicError::new(MusicStage::Request, "now playing request already pending");
                    for cb in rejected {
                        cb.failed(&err);
                    }
                }
            }
            Err(err) => self.on_token_failure(err),
        }
    }

    fn on_token_failure(&self, err: MusicError) {
        let waiting = {
            let mut st = self.state.borrow_mut();
            st.phase = TokenPhase::Idle;
            std::mem::take(&mut st.waiting)
        };
        self.set_error(&err);
        for poll in waiting {
            poll.callbacks.failed(&err);
        }
    }

    /// One request serves every poll in `polls`. On rejection the callbacks
    /// are handed back untouched; an empty list means they already failed.
    fn enqueue_now_playing(&self, polls: Vec<PendingPoll>) -> Result<(), Vec<SharedCallbacks<MusicError>>> {
        let timeout = polls.iter().map(|p| p.timeout).max().unwrap_or(crate::http_client::DEFAULT_TIMEOUT);
        let callbacks: Vec<SharedCallbacks<MusicError>> = polls.into_iter().map(|p| p.callbacks.shared()).collect();

        let token = self.state.borrow().access_token.clone();
        let Some(token) = token else {
            let err = MusicError::new(MusicStage::Token, "Spotify access token missing");
            self.set_error(&err);
            for cb in &callbacks {
                cb.failed(&err);
            }
            return Err(Vec::new());
        };

        let (ok, failed) = (self.clone(), self.clone());
        let (cb_ok, cb_err) = (callbacks.clone(), callbacks.clone());
        let request = QueuedRequest::get(self.endpoints.now_playing_url.as_str())
            .key(NOW_PLAYING_KEY)
            .header("Authorization", &format!("Bearer {}", token))
            .timeout(timeout)
            .on_success(move |resp| {
                let result = ok.apply_now_playing(&resp);
                for cb in &cb_ok {
                    match &result {
                        Ok(()) => cb.updated(),
                        Err(e) => cb.failed(e),
                    }
                }
            })
            .on_error(move |err| {
                let err = MusicError::new(MusicStage::Request, err.to_string());
                failed.set_error(&err);
                for cb in &cb_err {
                    cb.failed(&err);
                }
            });

        if self.queue.enqueue(request) {
            Ok(())
        } else {
            Err(callbacks)
        }
    }

    fn apply_now_playing(&self, resp: &Response) -> Result<(), MusicError> {
        let result = match resp.status {
            204 => {
                self.state.borrow_mut().playback = Playback::default();
                Ok(())
            }
            401 => {
                let mut st = self.state.borrow_mut();
                st.access_token = None;
                st.token_deadline = None;
                Err(MusicError::new(MusicStage::Token, "Spotify access token expired"))
            }
            s if s >= 400 => Err(MusicError::new(MusicStage::NowPlaying, format!("Spotify API error {}", s))),
            _ => parse_playback(&resp.text).map(|playback| {
                if debug_flags::is_on(&DEBUG_MUSIC) {
                    info!(
                        "Now playing: '{}' by '{}' (playing={})",
                        playback.track_name, playback.artist_name, playback.is_playing
                    );
                }
                self.state.borrow_mut().playback = playback;
            }),
        };
        match &result {
            Ok(()) => self.clear_error(),
            Err(e) => self.set_error(e),
        }
        result
    }

    fn set_error(&self, err: &MusicError) {
        let mut st = self.state.borrow_mut();
        st.failures += 1;
        if source::should_warn(st.failures) {
            warn!("Spotify {} ({} in a row)", err, st.failures);
        }
        st.last_error = Some(err.clone());
    }

    fn clear_error(&self) {
        let mut st = self.state.borrow_mut();
        st.last_error = None;
        st.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::tests::{drain, fake_queue};
    use crate::http_client::Method;
    use std::cell::Cell;

    const TOKEN_OK: &str = r#"{"access_token":"AT1","token_type":"Bearer","expires_in":3600}"#;
    const PLAYING: &str = r#"{"is_playing":true,"item":{"id":"t1","name":"Song",
        "artists":[{"name":"A"},{"name":"B"}],
        "album":{"id":"al1","name":"Album","images":[
            {"url":"https://i/640","width":640,"height":640},
            {"url":"https://i/300","width":300,"height":300},
            {"url":"https://i/64","width":64,"height":64}]}}}"#;

    fn creds() -> MusicCredentials {
        MusicCredentials {
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "r/t".into(),
        }
    }

    #[test]
    fn image_closest_to_target_wins() {
        let img = |url: &str, w, h| ImageRef { url: Some(url.into()), width: Some(w), height: Some(h) };
        assert_eq!(pick_image_url(&[img("a", 640, 640), img("b", 60, 60), img("c", 68, 68)], 64), "b");
        assert_eq!(pick_image_url(&[img("a", 300, 300), img("b", 300, 300)], 64), "a");
        let no_size = ImageRef { url: Some("x".into()), width: None, height: None };
        assert_eq!(pick_image_url(&[no_size], 64), "x");
        assert_eq!(pick_image_url(&[], 64), "");
    }

    #[test]
    fn missing_credentials_is_config_error() {
        let (queue, log) = fake_queue();
        let client = MusicClient::new(queue.handle(), MusicCredentials::default());
        let stage = Rc::new(Cell::new(None));
        let s = stage.clone();
        let started = client.request_currently_playing(
            RefreshCallbacks::new().on_error(move |e: &MusicError| s.set(Some(e.stage))),
            Duration::from_secs(5),
        );
        assert!(!started);
        assert_eq!(stage.get(), Some(MusicStage::Config));
        assert!(log.borrow().requests.is_empty());
    }

    #[test]
    fn token_then_poll() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(200, TOKEN_OK);
        log.borrow_mut().push(200, PLAYING);
        let client = MusicClient::new(queue.handle(), creds());
        assert!(client.request_currently_playing(RefreshCallbacks::new(), Duration::from_secs(5)));
        assert_eq!(client.token_phase(), TokenPhase::AwaitingToken);
        drain(&mut queue);

        let log = log.borrow();
        let (method, url, headers, body) = &log.requests[0];
        assert_eq!(*method, Method::Post);
        assert_eq!(url, DEFAULT_TOKEN_URL);
        assert_eq!(headers.get("Authorization"), Some("Basic aWQ6c2VjcmV0"));
        assert_eq!(body.as_deref(), Some("grant_type=refresh_token&refresh_token=r%2Ft"));
        assert_eq!(log.requests[1].2.get("Authorization"), Some("Bearer AT1"));

        let playback = client.playback();
        assert!(playback.is_playing);
        assert_eq!(playback.artist_name, "A, B");
        assert_eq!(playback.album_image_url, "https://i/64");
        assert!(client.token_valid(Instant::now()));
        assert_eq!(client.token_phase(), TokenPhase::Idle);
    }

    #[test]
    fn concurrent_callers_share_one_refresh() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(200, TOKEN_OK);
        log.borrow_mut().push(200, PLAYING);
        let client = MusicClient::new(queue.handle(), creds());
        let updates = Rc::new(Cell::new(0));
        for _ in 0..2 {
            let u = updates.clone();
            assert!(client.request_currently_playing(
                RefreshCallbacks::new().on_update(move || u.set(u.get() + 1)),
                Duration::from_secs(5)
            ));
        }
        drain(&mut queue);
        assert_eq!(updates.get(), 2);
        assert_eq!(log.borrow().requests.len(), 2);
    }

    #[test]
    fn token_failure_fails_every_waiting_poll() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(400, r#"{"error":"invalid_grant"}"#);
        let client = MusicClient::new(queue.handle(), creds());
        let failures = Rc::new(Cell::new(0));
        for _ in 0..3 {
            let f = failures.clone();
            client.request_currently_playing(
                RefreshCallbacks::new().on_error(move |e: &MusicError| {
                    assert_eq!(e.stage, MusicStage::Token);
                    f.set(f.get() + 1);
                }),
                Duration::from_secs(5),
            );
        }
        drain(&mut queue);
        assert_eq!(failures.get(), 3);
        assert_eq!(client.token_phase(), TokenPhase::Idle);
        assert_eq!(log.borrow().requests.len(), 1);
    }

    #[test]
    fn unauthorized_forces_token_refresh_next_time() {
        let (mut queue, log) = fake_queue();
        {
            let mut l = log.borrow_mut();
            l.push(200, TOKEN_OK);
            l.push(401, "");
            l.push(200, r#"{"access_token":"AT2"}"#);
            l.responses.push_back(Ok(crate::http_client::RawResponse { status: 204, ..Default::default() }));
        }
        let client = MusicClient::new(queue.handle(), creds());
        client.request_currently_playing(RefreshCallbacks::new(), Duration::from_secs(5));
        drain(&mut queue);
        assert_eq!(client.last_error().map(|e| e.stage), Some(MusicStage::Token));
        assert!(!client.token_valid(Instant::now()));

        client.request_currently_playing(RefreshCallbacks::new(), Duration::from_secs(5));
        drain(&mut queue);
        let log = log.borrow();
        assert_eq!(log.requests[2].0, Method::Post);
        assert_eq!(log.requests[3].2.get("Authorization"), Some("Bearer AT2"));
        assert!(client.last_error().is_none());
        assert!(!client.playback().has_track());
    }

    #[test]
    fn server_errors_and_bad_bodies_are_staged() {
        let (mut queue, log) = fake_queue();
        {
            let mut l = log.borrow_mut();
            l.push(200, TOKEN_OK);
            l.push(503, "");
            l.push(200, "not json");
        }
        let client = MusicClient::new(queue.handle(), creds());
        client.request_currently_playing(RefreshCallbacks::new(), Duration::from_secs(5));
        drain(&mut queue);
        assert_eq!(client.last_error().map(|e| e.stage), Some(MusicStage::NowPlaying));
        client.request_currently_playing(RefreshCallbacks::new(), Duration::from_secs(5));
        drain(&mut queue);
        assert_eq!(client.last_error().map(|e| e.stage), Some(MusicStage::Parse));
    }

    #[test]
    fn transport_failure_is_request_stage() {
        let (mut queue, log) = fake_queue();
        log.borrow_mut().push(200, TOKEN_OK);
        log.borrow_mut().push_err(crate::error::TransportErrorKind::Timeout);
        let client = MusicClient::new(queue.handle(), creds());
        client.request_currently_playing(RefreshCallbacks::new(), Duration::from_secs(5));
        drain(&mut queue);
        assert_eq!(client.last_error().map(|e| e.stage), Some(MusicStage::Request));
    }
}
