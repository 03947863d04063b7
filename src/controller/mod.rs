//! Controller subsystem for motion controller input handling
//!
//! Each tick runs one pass through the pipeline:
//!
//! 1. [`buttons`] - Button mask, edges and press timestamps
//! 2. [`crate::motion`] - Acceleration/jerk history and jerk detection
//! 3. [`events`] - Last firing time per gesture event
//! 4. [`controller`] - Hooks, LED push and the tick counter
//!
//! # Architecture
//!
//! ```text
//! Device ──poll──► ButtonState ──► HistoryBuffers ──► JerkDetector
//!                                                         │
//!   LED ◄── output hook ◄── commit ◄── input hook ◄───────┘
//! ```

pub mod buttons;
pub mod clock;
pub mod color;
#[allow(clippy::module_inception)]
pub mod controller;
pub mod events;

use thiserror::Error;

use crate::motion::HistoryError;

pub use buttons::{Button, ButtonState, PressTimeMode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use color::{Color, ColorError};
pub use controller::{
    Behavior, Calibration, Controller, ControllerSettings, ControllerState, HookBehavior,
};
pub use events::{EventKind, EventState};

// Controller errors
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Hook not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("Invalid history configuration: {0}")]
    History(#[from] HistoryError),

    #[error("Invalid color: {0}")]
    Color(#[from] ColorError),
}
