//! Album art of whatever is playing, fetched through the image proxy.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use embedded_graphics::prelude::*;
use log::{info, warn};

use crate::buttons::ButtonAction;
use crate::debug_flags::{self, DEBUG_MUSIC};
use crate::error::SourceError;
use crate::frame::{FontSize, Frame};
use crate::image_proxy::{bmp_size, ImageProxy};
use crate::layout::{MUSIC_GREEN, MUSIC_ORANGE, MUSIC_RED, PANEL_H, PANEL_W};
use crate::music::{MusicClient, MusicError, MusicStage};
use crate::source::RefreshCallbacks;

use super::{message_frame, LoadingAnimator, Widget};

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Credentials missing; nothing is ever requested.
    Config,
    Loading,
    NoMusic,
    Ok,
    AuthError,
    Error,
}

/// Where the album art for the current track is.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtPhase {
    Empty,
    Fetching { url: String },
    Ready { url: String, bmp: Rc<[u8]> },
    Failed { url: String },
}

impl ArtPhase {
    fn url(&self) -> Option<&str> {
        match self {
            ArtPhase::Empty => None,
            ArtPhase::Fetching { url } | ArtPhase::Ready { url, .. } | ArtPhase::Failed { url } => Some(url),
        }
    }
}

struct Inner {
    status: Status,
    art: ArtPhase,
    poll_pending: bool,
    dirty: bool,
}

pub struct NowPlayingWidget {
    music: MusicClient,
    proxy: ImageProxy,
    timeout: Duration,
    inner: Rc<RefCell<Inner>>,
    last_poll: Option<Instant>,
    loading: LoadingAnimator,
}

fn status_for(err: &MusicError) -> Status {
    match err.stage {
        MusicStage::Token | MusicStage::Config => Status::AuthError,
        _ => Status::Error,
    }
}

/// Start fetching `url` unless that image is already held or on its way.
fn fetch_art(inner: &Rc<RefCell<Inner>>, proxy: &ImageProxy, url: String, timeout: Duration) {
    let (ok_inner, err_inner) = (inner.clone(), inner.clone());
    let (ok_url, err_url) = (url.clone(), url.clone());
    let started = proxy.request_bmp(
        &url,
        move |bmp| {
            let mut st = ok_inner.borrow_mut();
            st.art = ArtPhase::Ready { url: ok_url, bmp };
            st.status = Status::Ok;
            st.dirty = true;
        },
        move |err: &SourceError| {
            warn!("Album art failed: {}", err);
            let mut st = err_inner.borrow_mut();
            st.art = ArtPhase::Failed { url: err_url };
            st.status = Status::Error;
            st.dirty = true;
        },
        timeout,
    );
    let mut st = inner.borrow_mut();
    if started {
        st.art = ArtPhase::Fetching { url };
        st.status = Status::Loading;
        st.dirty = true;
    } else if !matches!(st.art, ArtPhase::Failed { .. }) {
        // Skipped because another fetch is in flight; retry on the next poll.
        st.art = ArtPhase::Empty;
    }
}

impl NowPlayingWidget {
    pub fn new(music: MusicClient, proxy: ImageProxy, timeout: Duration) -> Self {
        let status = if music.has_credentials() { Status::Loading } else { Status::Config };
        Self {
            music,
            proxy,
            timeout,
            inner: Rc::new(RefCell::new(Inner {
                status,
                art: ArtPhase::Empty,
                poll_pending: false,
                dirty: true,
            })),
            last_poll: None,
            loading: LoadingAnimator::new(MUSIC_GREEN),
        }
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().status
    }

    pub fn art_phase(&self) -> ArtPhase {
        self.inner.borrow().art.clone()
    }

    fn request_poll(&mut self, now: Instant) {
        {
            let mut st = self.inner.borrow_mut();
            if st.poll_pending || st.status == Status::Config {
                return;
            }
            st.poll_pending = true;
            st.status = Status::Loading;
            st.dirty = true;
        }
        self.last_poll = Some(now);

        let (ok_inner, err_inner) = (self.inner.clone(), self.inner.clone());
        let (music, proxy, timeout) = (self.music.clone(), self.proxy.clone(), self.timeout);
        let callbacks = RefreshCallbacks::<MusicError>::new()
            .on_update(move || {
                let url = music.playback().album_image_url;
                if debug_flags::is_on(&DEBUG_MUSIC) {
                    info!("Album art URL: {}", url);
                }
                let fetch = {
                    let mut st = ok_inner.borrow_mut();
                    st.poll_pending = false;
                    st.dirty = true;
                    if url.is_empty() {
                        st.status = Status::NoMusic;
                        st.art = ArtPhase::Empty;
                        false
                    } else if st.art.url() == Some(url.as_str()) && !matches!(st.art, ArtPhase::Failed { .. }) {
                        if matches!(st.art, ArtPhase::Ready { .. }) {
                            st.status = Status::Ok;
                        }
                        false
                    } else {
                        true
                    }
                };
                if fetch {
                    fetch_art(&ok_inner, &proxy, url, timeout);
                }
            })
            .on_error(move |err| {
                let mut st = err_inner.borrow_mut();
                st.poll_pending = false;
                st.status = status_for(err);
                st.dirty = true;
            });

        if !self.music.request_currently_playing(callbacks, self.timeout) {
            let mut st = self.inner.borrow_mut();
            // A synchronous failure already ran on_error; otherwise the poll
            // was coalesced or rejected and the next tick may retry.
            if st.poll_pending {
                st.poll_pending = false;
                if let Some(err) = self.music.last_error() {
                    st.status = status_for(&err);
                }
            }
        }
    }

    fn build_frame(&self) -> Frame {
        let st = self.inner.borrow();
        if let ArtPhase::Ready { bmp, .. } = &st.art {
            let mut frame = Frame::default();
            let (w, h) = bmp_size(bmp).unwrap_or((PANEL_W as u32, PANEL_H as u32));
            let x = ((PANEL_W - w as i32) / 2).max(0);
            let y = ((PANEL_H - h as i32) / 2).max(0);
            frame.bitmap(Point::new(x, y), bmp.clone());
            return frame;
        }
        match st.status {
            Status::Config => message_frame(&["Spotify", "config"], &[MUSIC_GREEN]),
            Status::AuthError => message_frame(&["Spotify", "refresh", "token"], &[MUSIC_GREEN, MUSIC_ORANGE]),
            Status::NoMusic => message_frame(&["No music"], &[MUSIC_GREEN]),
            Status::Error => message_frame(&["Spotify", "error"], &[MUSIC_GREEN, MUSIC_RED]),
            Status::Loading | Status::Ok => {
                let mut frame = Frame::default();
                frame.centered_lines(&["Loading"], MUSIC_GREEN, FontSize::Medium);
                frame
            }
        }
    }
}

impl Widget for NowPlayingWidget {
    fn name(&self) -> &'static str {
        "now_playing"
    }

    fn on_activate(&mut self, now: Instant) {
        self.last_poll = None;
        self.loading.reset();
        self.request_poll(now);
    }

    fn update(&mut self, now: Instant) -> anyhow::Result<()> {
        let (status, pending) = {
            let st = self.inner.borrow();
            (st.status, st.poll_pending)
        };
        if status == Status::Config || pending {
            return Ok(());
        }
        let due = self
            .last_poll
            .map(|t| now.saturating_duration_since(t) >= POLL_INTERVAL)
            .unwrap_or(true);
        if due {
            self.request_poll(now);
        }
        Ok(())
    }

    fn render(&mut self, now: Instant) -> Option<Frame> {
        let (status, has_art, dirty) = {
            let st = self.inner.borrow();
            (st.status, matches!(st.art, ArtPhase::Ready { .. }), st.dirty)
        };
        if status == Status::Loading && !has_art {
            return self.loading.next_frame(now);
        }
        if !dirty {
            return None;
        }
        self.inner.borrow_mut().dirty = false;
        Some(self.build_frame())
    }

    /// Click refetches the track and its art even when nothing changed.
    fn handle_button(&mut self, action: ButtonAction, now: Instant) {
        if action != ButtonAction::Click {
            return;
        }
        {
            let mut st = self.inner.borrow_mut();
            if st.poll_pending || self.proxy.pending() {
                return;
            }
            st.art = ArtPhase::Empty;
        }
        self.last_poll = None;
        self.request_poll(now);
    }

    fn force_refresh(&mut self, _now: Instant) {
        self.inner.borrow_mut().dirty = true;
    }
}
