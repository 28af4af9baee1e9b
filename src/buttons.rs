//! Two-button input: edge detection, hold threshold and a two-button combo.
//!
//! Button 1 drives the active widget (click / hold). Button 2 click moves to
//! the next widget and hold toggles the display. Holding both for the combo
//! threshold fires a combo event and swallows every click or hold until both
//! buttons are released.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::debug_flags::{self, DEBUG_INPUT};

pub const DEFAULT_HOLD: Duration = Duration::from_secs(3);
pub const DEFAULT_COMBO_HOLD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Click,
    Hold,
}

impl ButtonAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ButtonAction::Click => "click",
            ButtonAction::Hold => "hold",
        }
    }
}

/// Level reading of the two buttons. `None` means the button is not wired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonLevels {
    pub button1: Option<bool>,
    pub button2: Option<bool>,
}

/// Debounced state of one physical button. Feeds on "pressed" levels that
/// have already been corrected for active-low wiring.
#[derive(Debug)]
pub struct Button {
    hold: Duration,
    pressed: bool,
    press_start: Option<Instant>,
    hold_fired: bool,
}

impl Button {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            pressed: false,
            press_start: None,
            hold_fired: false,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// A hold fires once while still pressed; a click fires on release when
    /// no hold fired.
    pub fn update(&mut self, pressed: bool, now: Instant) -> Option<ButtonAction> {
        if pressed && !self.pressed {
            self.pressed = true;
            self.press_start = Some(now);
            self.hold_fired = false;
        }
        if pressed {
            let held = self
                .press_start
                .map(|start| now.saturating_duration_since(start) >= self.hold)
                .unwrap_or(false);
            if held && !self.hold_fired {
                self.hold_fired = true;
                return Some(ButtonAction::Hold);
            }
            return None;
        }
        if self.pressed {
            let fired = self.hold_fired;
            self.pressed = false;
            self.press_start = None;
            self.hold_fired = false;
            if !fired {
                return Some(ButtonAction::Click);
            }
        }
        None
    }
}

pub struct ButtonController {
    button1: Option<Button>,
    button2: Option<Button>,
    combo_hold: Duration,
    combo_start: Option<Instant>,
    combo_fired: bool,
    suppress: bool,

    display_enabled: bool,
    display_toggle_requested: bool,
    next_widget_requested: bool,
    combo_requested: bool,
    widget_event: Option<ButtonAction>,
}

impl ButtonController {
    pub fn new(hold: Duration, combo_hold: Duration) -> Self {
        Self {
            button1: Some(Button::new(hold)),
            button2: Some(Button::new(hold)),
            combo_hold,
            combo_start: None,
            combo_fired: false,
            suppress: false,
            display_enabled: true,
            display_toggle_requested: false,
            next_widget_requested: false,
            combo_requested: false,
            widget_event: None,
        }
    }

    /// Report wiring problems seen on the first reading.
    pub fn check_initial(&self, levels: ButtonLevels) {
        for (name, level) in [("Button 1", levels.button1), ("Button 2", levels.button2)] {
            if level == Some(true) {
                warn!("{} reads pressed at init. Check wiring or button_active_low.", name);
            }
        }
    }

    pub fn display_enabled(&self) -> bool {
        self.display_enabled
    }

    /// Returns true while any button is held down.
    pub fn update(&mut self, levels: ButtonLevels, now: Instant) -> bool {
        if levels.button1.is_none() {
            self.button1 = None;
        }
        if levels.button2.is_none() {
            self.button2 = None;
        }

        let action1 = match (&mut self.button1, levels.button1) {
            (Some(b), Some(level)) => b.update(level, now),
            _ => None,
        };
        let action2 = match (&mut self.button2, levels.button2) {
            (Some(b), Some(level)) => b.update(level, now),
            _ => None,
        };

        if let Some(action) = action1 {
            self.on_button1(action);
        }
        if let Some(action) = action2 {
            self.on_button2(action);
        }

        let down1 = self.button1.as_ref().map(Button::is_pressed).unwrap_or(false);
        let down2 = self.button2.as_ref().map(Button::is_pressed).unwrap_or(false);
        let active = down1 || down2;

        if self.button1.is_some() && self.button2.is_some() {
            if down1 && down2 {
                match self.combo_start {
                    None => {
                        self.combo_start = Some(now);
                        self.combo_fired = false;
                    }
                    Some(start) if !self.combo_fired && now.saturating_duration_since(start) >= self.combo_hold => {
                        self.combo_fired = true;
                        self.suppress = true;
                        self.combo_requested = true;
                        info!("Buttons combo");
                    }
                    Some(_) => {}
                }
            } else {
                self.combo_start = None;
                if self.suppress && !active {
                    self.suppress = false;
                }
            }
        }
        active
    }

    fn log_action(&self, name: &str, action: ButtonAction) {
        if debug_flags::is_on(&DEBUG_INPUT) {
            info!("{} {}", name, action.as_str());
        } else {
            debug!("{} {}", name, action.as_str());
        }
    }

    fn on_button1(&mut self, action: ButtonAction) {
        if self.suppress {
            return;
        }
        self.log_action("Button 1", action);
        self.widget_event = Some(action);
    }

    fn on_button2(&mut self, action: ButtonAction) {
        if self.suppress {
            return;
        }
        self.log_action("Button 2", action);
        match action {
            ButtonAction::Click => self.next_widget_requested = true,
            ButtonAction::Hold => {
                self.display_enabled = !self.display_enabled;
                self.display_toggle_requested = true;
                info!("Display {}", if self.display_enabled { "on" } else { "off" });
            }
        }
    }

    pub fn consume_widget_event(&mut self) -> Option<ButtonAction> {
        self.widget_event.take()
    }

    /// The new display state, if it changed since the last call.
    pub fn consume_display_toggle(&mut self) -> Option<bool> {
        if std::mem::take(&mut self.display_toggle_requested) {
            Some(self.display_enabled)
        } else {
            None
        }
    }

    pub fn consume_next_widget(&mut self) -> bool {
        std::mem::take(&mut self.next_widget_requested)
    }

    pub fn consume_combo(&mut self) -> bool {
        std::mem::take(&mut self.combo_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(b1: bool, b2: bool) -> ButtonLevels {
        ButtonLevels {
            button1: Some(b1),
            button2: Some(b2),
        }
    }

    #[test]
    fn short_press_clicks_on_release() {
        let t0 = Instant::now();
        let mut b = Button::new(DEFAULT_HOLD);
        assert_eq!(b.update(true, t0), None);
        assert_eq!(b.update(true, t0 + Duration::from_millis(500)), None);
        assert_eq!(b.update(false, t0 + Duration::from_millis(600)), Some(ButtonAction::Click));
        assert_eq!(b.update(false, t0 + Duration::from_millis(700)), None);
    }

    #[test]
    fn long_press_holds_once_and_no_click() {
        let t0 = Instant::now();
        let mut b = Button::new(DEFAULT_HOLD);
        b.update(true, t0);
        assert_eq!(b.update(true, t0 + Duration::from_secs(3)), Some(ButtonAction::Hold));
        assert_eq!(b.update(true, t0 + Duration::from_secs(4)), None);
        assert_eq!(b.update(false, t0 + Duration::from_secs(5)), None);
    }

    #[test]
    fn controller_routes_buttons() {
        let t0 = Instant::now();
        let mut c = ButtonController::new(DEFAULT_HOLD, DEFAULT_COMBO_HOLD);
        c.update(levels(true, false), t0);
        c.update(levels(false, false), t0 + Duration::from_millis(100));
        assert_eq!(c.consume_widget_event(), Some(ButtonAction::Click));
        assert_eq!(c.consume_widget_event(), None);

        c.update(levels(false, true), t0 + Duration::from_millis(200));
        c.update(levels(false, false), t0 + Duration::from_millis(300));
        assert!(c.consume_next_widget());

        c.update(levels(false, true), t0 + Duration::from_secs(1));
        c.update(levels(false, true), t0 + Duration::from_secs(4));
        assert_eq!(c.consume_display_toggle(), Some(false));
        assert_eq!(c.consume_display_toggle(), None);
        assert!(!c.display_enabled());
    }

    #[test]
    fn combo_suppresses_until_both_released() {
        let t0 = Instant::now();
        let mut c = ButtonController::new(DEFAULT_HOLD, DEFAULT_COMBO_HOLD);
        c.update(levels(true, true), t0);
        c.update(levels(true, true), t0 + Duration::from_millis(1_100));
        assert!(c.consume_combo());
        // Releasing one button would normally click it.
        c.update(levels(false, true), t0 + Duration::from_millis(1_200));
        assert_eq!(c.consume_widget_event(), None);
        // Still suppressed past the hold threshold of the remaining button.
        c.update(levels(false, true), t0 + Duration::from_secs(4));
        assert_eq!(c.consume_display_toggle(), None);
        c.update(levels(false, false), t0 + Duration::from_secs(5));
        assert!(!c.consume_next_widget());

        c.update(levels(true, false), t0 + Duration::from_secs(6));
        c.update(levels(false, false), t0 + Duration::from_millis(6_100));
        assert_eq!(c.consume_widget_event(), Some(ButtonAction::Click));
    }

    #[test]
    fn single_button_wiring_never_combos() {
        let t0 = Instant::now();
        let mut c = ButtonController::new(DEFAULT_HOLD, DEFAULT_COMBO_HOLD);
        let only_one = ButtonLevels {
            button1: Some(true),
            button2: None,
        };
        c.update(only_one, t0);
        c.update(only_one, t0 + Duration::from_secs(2));
        assert!(!c.consume_combo());
    }
}
