//! The main loop: buttons, widget rotation, rendering and one queue step
//! per tick.

use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use embedded_graphics::pixelcolor::Rgb888;
use log::{debug, info, warn};

use crate::brightness::BrightnessKnob;
use crate::buttons::{ButtonController, ButtonLevels};
use crate::debug_flags::{self, DEBUG_INPUT};
use crate::frame::Frame;
use crate::framebuffer::Framebuffer;
use crate::http_client::{RequestQueue, SharedIndicator, Transport};
use crate::layout::{BLACK, ERROR_RED};
use crate::widgets::{message_frame, Widget};

pub const TICK: Duration = Duration::from_millis(100);
pub const ERROR_PAUSE: Duration = Duration::from_millis(500);

/// Where finished frames go. The HUB75 driver on the device, a log on the host.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()>;
    fn set_enabled(&mut self, enabled: bool);
    /// `level` is in `0.0..=1.0`.
    fn set_brightness(&mut self, level: f32);
    /// Network activity marker.
    fn set_activity(&mut self, active: bool);
}

/// Raw hardware inputs, sampled once per tick.
pub trait InputSource {
    fn buttons(&mut self) -> ButtonLevels;
    /// 16-bit ADC reading of the brightness knob, if one is wired.
    fn knob(&mut self) -> Option<u16>;
}

/// No buttons and no knob.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl InputSource for NoInput {
    fn buttons(&mut self) -> ButtonLevels {
        ButtonLevels::default()
    }

    fn knob(&mut self) -> Option<u16> {
        None
    }
}

/// Flags the console raises for the main loop.
#[derive(Clone, Copy)]
pub struct RequestFlags {
    pub next_widget: &'static AtomicBool,
    pub refresh: &'static AtomicBool,
    pub session_reset: &'static AtomicBool,
}

impl Default for RequestFlags {
    fn default() -> Self {
        Self {
            next_widget: &debug_flags::REQUEST_NEXT_WIDGET,
            refresh: &debug_flags::REQUEST_REFRESH,
            session_reset: &debug_flags::REQUEST_SESSION_RESET,
        }
    }
}

pub struct Scheduler<T: Transport, S: FrameSink, I: InputSource> {
    queue: RequestQueue<T>,
    activity: SharedIndicator,
    widgets: Vec<Box<dyn Widget>>,
    index: usize,
    activated: bool,
    sink: S,
    input: I,
    buttons: ButtonController,
    knob: Option<BrightnessKnob>,
    display_on: bool,
    requests: RequestFlags,
}

impl<T: Transport, S: FrameSink, I: InputSource> Scheduler<T, S, I> {
    /// `activity` must be the indicator `queue` was built with.
    pub fn new(
        queue: RequestQueue<T>,
        activity: SharedIndicator,
        widgets: Vec<Box<dyn Widget>>,
        sink: S,
        input: I,
        buttons: ButtonController,
    ) -> Self {
        Self {
            queue,
            activity,
            widgets,
            index: 0,
            activated: false,
            sink,
            input,
            buttons,
            knob: None,
            display_on: true,
            requests: RequestFlags::default(),
        }
    }

    pub fn with_knob(mut self, knob: BrightnessKnob) -> Self {
        self.knob = Some(knob);
        self
    }

    pub fn with_request_flags(mut self, flags: RequestFlags) -> Self {
        self.requests = flags;
        self
    }

    pub fn active_widget(&self) -> Option<&str> {
        self.widgets.get(self.index).map(|w| w.name())
    }

    pub fn display_on(&self) -> bool {
        self.display_on
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn queue(&self) -> &RequestQueue<T> {
        &self.queue
    }

    fn next_widget(&mut self, now: Instant) {
        if self.widgets.is_empty() {
            return;
        }
        self.index = (self.index + 1) % self.widgets.len();
        if let Some(widget) = self.widgets.get_mut(self.index) {
            info!("Widget -> {}", widget.name());
            widget.on_activate(now);
        }
    }

    fn refresh_active(&mut self, now: Instant) {
        if let Some(widget) = self.widgets.get_mut(self.index) {
            widget.force_refresh(now);
        }
    }

    fn handle_console(&mut self, now: Instant) {
        if debug_flags::take(self.requests.next_widget) {
            self.next_widget(now);
        }
        if debug_flags::take(self.requests.refresh) {
            self.refresh_active(now);
        }
        if debug_flags::take(self.requests.session_reset) {
            info!("HTTP session reset");
            self.queue.close_session();
        }
    }

    /// One pass of the main loop.
    pub fn tick(&mut self, now: Instant) -> anyhow::Result<()> {
        if !self.activated {
            self.activated = true;
            if let Some(widget) = self.widgets.get_mut(self.index) {
                widget.on_activate(now);
            }
        }

        let levels = self.input.buttons();
        self.buttons.update(levels, now);
        self.handle_console(now);

        if self.buttons.consume_combo() {
            info!("Combo: refreshing widget and resetting HTTP session");
            self.refresh_active(now);
            self.queue.close_session();
        }
        if self.buttons.consume_next_widget() {
            self.next_widget(now);
        }
        if let Some(enabled) = self.buttons.consume_display_toggle() {
            self.display_on = enabled;
            self.sink.set_enabled(enabled);
            if enabled {
                self.refresh_active(now);
            }
        }
        if let Some(action) = self.buttons.consume_widget_event() {
            if let Some(widget) = self.widgets.get_mut(self.index) {
                widget.handle_button(action, now);
            }
        }

        if let Some(knob) = self.knob.as_mut() {
            if knob.due(now) {
                if let Some(raw) = self.input.knob() {
                    let reading = knob.read(raw);
                    if reading.changed {
                        if debug_flags::is_on(&DEBUG_INPUT) {
                            info!("Brightness {:.2} (raw {})", reading.value, reading.raw);
                        } else {
                            debug!("Brightness {:.2} (raw {})", reading.value, reading.raw);
                        }
                        self.sink.set_brightness(reading.value);
                    }
                }
            }
        }

        if let Some(widget) = self.widgets.get_mut(self.index) {
            widget.update(now)?;
            if self.display_on {
                if let Some(frame) = widget.render(now) {
                    self.sink.show(&frame)?;
                }
            }
        }

        self.queue.tick();
        self.sink.set_activity(self.activity.is_active());
        Ok(())
    }

    /// Tick forever. A failed tick is logged and followed by a longer pause.
    pub fn run(&mut self) -> ! {
        info!("Entering main loop");
        loop {
            match self.tick(Instant::now()) {
                Ok(()) => std::thread::sleep(TICK),
                Err(e) => {
                    warn!("Loop error: {:#}", e);
                    std::thread::sleep(ERROR_PAUSE);
                }
            }
        }
    }
}

/// Show `lines` and never return. Used when the config can't start the app.
pub fn halt_with_message<S: FrameSink>(sink: &mut S, lines: &[String]) -> ! {
    warn!("Halted: {}", lines.join(" / "));
    if let Err(e) = sink.show(&message_frame(lines, &[ERROR_RED])) {
        warn!("Could not draw halt screen: {:#}", e);
    }
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Rasterizes frames into a [`Framebuffer`] and hands the brightness-scaled
/// pixels to `output` row-major.
pub struct FramebufferSink<F: FnMut(&[Rgb888])> {
    fb: Framebuffer,
    background: Rgb888,
    enabled: bool,
    brightness: f32,
    activity: bool,
    output: F,
    frames: u64,
}

impl<F: FnMut(&[Rgb888])> FramebufferSink<F> {
    pub fn new(output: F) -> Self {
        Self {
            fb: Framebuffer::default(),
            background: BLACK,
            enabled: true,
            brightness: 1.0,
            activity: false,
            output,
            frames: 0,
        }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn push(&mut self) {
        let level = if self.enabled { self.brightness } else { 0.0 };
        let pixels = self.fb.scaled(level);
        (self.output)(&pixels);
    }
}

impl<F: FnMut(&[Rgb888])> FrameSink for FramebufferSink<F> {
    fn show(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.fb.render(frame);
        self.background = frame.background;
        self.fb.overlay_activity(self.activity, self.background);
        self.frames += 1;
        debug!("Frame {}: {}", self.frames, frame.texts().collect::<Vec<_>>().join(" | "));
        self.push();
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.push();
    }

    fn set_brightness(&mut self, level: f32) {
        self.brightness = level.clamp(0.0, 1.0);
        self.push();
    }

    fn set_activity(&mut self, active: bool) {
        if self.activity == active {
            return;
        }
        self.activity = active;
        self.fb.overlay_activity(active, self.background);
        if self.enabled {
            self.push();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::{ButtonAction, DEFAULT_COMBO_HOLD, DEFAULT_HOLD};
    use crate::http_client::tests::{FakeLog, FakeTransport};
    use crate::http_client::{QueueHandle, QueuedRequest};
    use crate::layout::{ACTIVITY_PIXEL, WHITE};
    use embedded_graphics::prelude::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Calls {
        activated: u32,
        updated: u32,
        rendered: u32,
        refreshed: u32,
        buttons: Vec<ButtonAction>,
    }

    struct TestWidget {
        name: &'static str,
        calls: Rc<RefCell<Calls>>,
        queue: QueueHandle,
    }

    impl Widget for TestWidget {
        fn name(&self) -> &'static str {
            self.name
        }

        fn on_activate(&mut self, _now: Instant) {
            self.calls.borrow_mut().activated += 1;
        }

        fn update(&mut self, _now: Instant) -> anyhow::Result<()> {
            self.calls.borrow_mut().updated += 1;
            self.queue.enqueue(QueuedRequest::get(format!("http://test/{}", self.name)));
            Ok(())
        }

        fn render(&mut self, _now: Instant) -> Option<Frame> {
            self.calls.borrow_mut().rendered += 1;
            let mut frame = Frame::default();
            frame.fill(Point::zero(), Size::new(1, 1), WHITE);
            Some(frame)
        }

        fn handle_button(&mut self, action: ButtonAction, _now: Instant) {
            self.calls.borrow_mut().buttons.push(action);
        }

        fn force_refresh(&mut self, _now: Instant) {
            self.calls.borrow_mut().refreshed += 1;
        }
    }

    #[derive(Default)]
    struct TestSink {
        shown: u32,
        enabled: Vec<bool>,
        brightness: Vec<f32>,
    }

    impl FrameSink for TestSink {
        fn show(&mut self, _frame: &Frame) -> anyhow::Result<()> {
            self.shown += 1;
            Ok(())
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.enabled.push(enabled);
        }

        fn set_brightness(&mut self, level: f32) {
            self.brightness.push(level);
        }

        fn set_activity(&mut self, _active: bool) {}
    }

    #[derive(Default)]
    struct Script {
        levels: VecDeque<ButtonLevels>,
        knob: Option<u16>,
    }

    impl InputSource for Script {
        fn buttons(&mut self) -> ButtonLevels {
            self.levels.pop_front().unwrap_or(ButtonLevels {
                button1: Some(false),
                button2: Some(false),
            })
        }

        fn knob(&mut self) -> Option<u16> {
            self.knob
        }
    }

    static NEXT: AtomicBool = AtomicBool::new(false);
    static REFRESH: AtomicBool = AtomicBool::new(false);
    static RESET: AtomicBool = AtomicBool::new(false);

    type TestScheduler = Scheduler<FakeTransport, TestSink, Script>;

    fn build(script: Script) -> (TestScheduler, Rc<RefCell<FakeLog>>, [Rc<RefCell<Calls>>; 2]) {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let activity = SharedIndicator::new();
        let queue = RequestQueue::new(transport, Box::new(activity.clone()));
        let calls = [Rc::default(), Rc::default()];
        let widgets: Vec<Box<dyn Widget>> = vec![
            Box::new(TestWidget { name: "first", calls: Rc::clone(&calls[0]), queue: queue.handle() }),
            Box::new(TestWidget { name: "second", calls: Rc::clone(&calls[1]), queue: queue.handle() }),
        ];
        let scheduler = Scheduler::new(
            queue,
            activity,
            widgets,
            TestSink::default(),
            script,
            ButtonController::new(DEFAULT_HOLD, DEFAULT_COMBO_HOLD),
        )
        .with_request_flags(RequestFlags {
            next_widget: &NEXT,
            refresh: &REFRESH,
            session_reset: &RESET,
        });
        (scheduler, log, calls)
    }

    fn levels(b1: bool, b2: bool) -> ButtonLevels {
        ButtonLevels {
            button1: Some(b1),
            button2: Some(b2),
        }
    }

    #[test]
    fn tick_updates_renders_then_runs_one_request() {
        let (mut s, log, calls) = build(Script::default());
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        assert_eq!(calls[0].borrow().activated, 1);
        assert_eq!(calls[0].borrow().updated, 1);
        assert_eq!(s.sink().shown, 1);
        assert_eq!(log.borrow().requests.len(), 1);
        assert_eq!(log.borrow().requests[0].1, "http://test/first");
        assert_eq!(calls[1].borrow().updated, 0);
    }

    #[test]
    fn buttons_rotate_and_dispatch() {
        let mut script = Script::default();
        script.levels.extend([levels(false, true), levels(false, false), levels(true, false), levels(false, false)]);
        let (mut s, _, calls) = build(script);
        let t0 = Instant::now();
        for i in 0..4u32 {
            s.tick(t0 + TICK * i).unwrap();
        }
        assert_eq!(s.active_widget(), Some("second"));
        assert_eq!(calls[1].borrow().activated, 1);
        assert_eq!(calls[1].borrow().buttons, vec![ButtonAction::Click]);
        assert!(calls[0].borrow().buttons.is_empty());
    }

    #[test]
    fn display_toggle_stops_rendering_and_refreshes_on_restore() {
        let mut script = Script::default();
        script.levels.extend([levels(false, true), levels(false, true), levels(false, false)]);
        let (mut s, _, calls) = build(script);
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        s.tick(t0 + DEFAULT_HOLD).unwrap();
        assert!(!s.display_on());
        assert_eq!(s.sink().enabled, vec![false]);
        let shown = s.sink().shown;
        s.tick(t0 + DEFAULT_HOLD + TICK).unwrap();
        assert_eq!(s.sink().shown, shown);

        s.input.levels.extend([levels(false, true), levels(false, true)]);
        s.tick(t0 + Duration::from_secs(10)).unwrap();
        s.tick(t0 + Duration::from_secs(10) + DEFAULT_HOLD).unwrap();
        assert!(s.display_on());
        assert_eq!(calls[0].borrow().refreshed, 1);
        assert_eq!(s.sink().shown, shown + 1);
    }

    #[test]
    fn combo_refreshes_and_drops_session() {
        let mut script = Script::default();
        script.levels.extend([levels(true, true), levels(true, true)]);
        let (mut s, log, calls) = build(script);
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        assert!(s.queue().has_session());
        assert_eq!(log.borrow().sessions_closed, 0);
        s.tick(t0 + DEFAULT_COMBO_HOLD).unwrap();
        assert_eq!(calls[0].borrow().refreshed, 1);
        // The session was closed, then reopened by this tick's request.
        assert_eq!(log.borrow().sessions_closed, 1);
        assert_eq!(log.borrow().sessions_opened, 2);
        assert_eq!(s.queue().executed(), 2);
    }

    #[test]
    fn console_requests_are_consumed() {
        let (mut s, log, calls) = build(Script::default());
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        debug_flags::set(&NEXT, true);
        debug_flags::set(&REFRESH, true);
        debug_flags::set(&RESET, true);
        s.tick(t0 + TICK).unwrap();
        assert_eq!(s.active_widget(), Some("second"));
        assert_eq!(calls[1].borrow().refreshed, 1);
        assert!(!debug_flags::is_on(&NEXT));
        assert_eq!(log.borrow().sessions_opened, 2);
    }

    #[test]
    fn knob_sets_brightness_on_its_cadence() {
        let script = Script {
            knob: Some(65_535),
            ..Default::default()
        };
        let (s, _, _) = build(script);
        let mut s = s.with_knob(BrightnessKnob::default());
        let t0 = Instant::now();
        s.tick(t0).unwrap();
        s.tick(t0 + TICK).unwrap();
        assert_eq!(s.sink().brightness, vec![1.0]);
    }

    #[test]
    fn framebuffer_sink_scales_and_marks_activity() {
        let pushed = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&pushed);
        let mut sink = FramebufferSink::new(move |px: &[Rgb888]| out.borrow_mut().push(px.to_vec()));
        let mut frame = Frame::default();
        frame.fill(Point::zero(), Size::new(1, 1), WHITE);
        sink.show(&frame).unwrap();
        sink.set_brightness(0.5);
        assert_eq!(pushed.borrow()[1][0], Rgb888::new(128, 128, 128));

        sink.set_activity(true);
        assert_eq!(sink.framebuffer().pixel(63, 0), Some(ACTIVITY_PIXEL));
        sink.set_enabled(false);
        assert!(pushed.borrow().last().unwrap().iter().all(|c| *c == Rgb888::BLACK));
        assert_eq!(sink.frames(), 1);
    }
}
