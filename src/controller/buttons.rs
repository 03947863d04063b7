use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::debug;

use super::clock::seconds_since;

// Button codes, one bit each in the device's button mask
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Button {
    L2 = 1 << 0,
    R2 = 1 << 1,
    L1 = 1 << 2,
    R1 = 1 << 3,
    Triangle = 1 << 4,
    Circle = 1 << 5,
    Cross = 1 << 6,
    Square = 1 << 7,
    Select = 1 << 8,
    L3 = 1 << 9,
    R3 = 1 << 10,
    Start = 1 << 11,
    Up = 1 << 12,
    Right = 1 << 13,
    Down = 1 << 14,
    Left = 1 << 15,
    Ps = 1 << 16,
    Move = 1 << 19,
    T = 1 << 20,
}

impl Button {
    pub const ALL: [Button; 19] = [
        Button::L2,
        Button::R2,
        Button::L1,
        Button::R1,
        Button::Triangle,
        Button::Circle,
        Button::Cross,
        Button::Square,
        Button::Select,
        Button::L3,
        Button::R3,
        Button::Start,
        Button::Up,
        Button::Right,
        Button::Down,
        Button::Left,
        Button::Ps,
        Button::Move,
        Button::T,
    ];

    pub const fn bit(self) -> u32 {
        self as u32
    }

    /// Buttons set in `mask`, in declaration order.
    pub fn in_mask(mask: u32) -> impl Iterator<Item = Button> {
        Button::ALL.into_iter().filter(move |b| mask & b.bit() != 0)
    }
}

/// How press timestamps are maintained when the button mask changes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressTimeMode {
    /// Any mask change re-stamps every button that is down, including ones held
    /// across the change. A button held while another is pressed therefore has
    /// its held duration reset.
    #[default]
    RefreshAllDown,
    /// Only buttons that went from up to down get a new timestamp.
    NewlyPressedOnly,
}

#[derive(Clone, Debug, Default)]
pub struct ButtonState {
    buttons: u32,
    prev_buttons: u32,
    press_time: HashMap<Button, Instant>,
    mode: PressTimeMode,
}

impl ButtonState {
    pub fn new(mode: PressTimeMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn buttons(&self) -> u32 {
        self.buttons
    }

    pub fn prev_buttons(&self) -> u32 {
        self.prev_buttons
    }

    pub fn is_down(&self, button: Button) -> bool {
        self.buttons & button.bit() != 0
    }

    // Rising edge since the last committed tick
    pub fn was_pressed(&self, button: Button) -> bool {
        self.buttons & button.bit() != 0 && self.prev_buttons & button.bit() == 0
    }

    // Falling edge since the last committed tick
    pub fn was_released(&self, button: Button) -> bool {
        self.buttons & button.bit() == 0 && self.prev_buttons & button.bit() != 0
    }

    pub fn press_time(&self, button: Button) -> Option<Instant> {
        self.press_time.get(&button).copied()
    }

    /// Seconds since `button` was last stamped as pressed, infinity if never.
    pub fn held_duration(&self, button: Button, now: Instant) -> f64 {
        seconds_since(self.press_time(button), now)
    }

    /// Takes a freshly polled mask. Does not touch `prev_buttons`.
    pub fn update(&mut self, mask: u32, now: Instant) {
        let previous = self.buttons;
        self.buttons = mask;

        if mask == previous {
            return;
        }

        debug!("Button mask changed: {:#07x} -> {:#07x}", previous, mask);
        let stamp = match self.mode {
            PressTimeMode::RefreshAllDown => mask,
            PressTimeMode::NewlyPressedOnly => mask & !previous,
        };
        for button in Button::in_mask(stamp) {
            self.press_time.insert(button, now);
        }
    }

    /// Must be the last mutation of a polled tick.
    pub fn commit(&mut self) {
        self.prev_buttons = self.buttons;
    }
}
