//! Motion controller input framework
//!
//! Polls motion controllers at a fixed rate and turns raw samples into button
//! edges, held durations and jerk gestures, while driving each controller's LED.
//!
//! # Architecture
//!
//! ```text
//! DeviceLayer ──► Framework ──cycle──► Controller::tick ──► Behavior hooks
//!                                          │
//!                              ButtonState, HistoryBuffer, JerkDetector
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod framework;
pub mod motion;

pub use config::{ConfigError, FrameworkConfig};
pub use controller::{
    Behavior, Button, Color, Controller, ControllerError, ControllerSettings, ControllerState,
    EventKind, HookBehavior,
};
pub use device::{ConnectionKind, Device, DeviceLayer};
pub use framework::{Framework, FrameworkError, SchedulerSettings, SchedulingMode};
pub use motion::{HistoryBuffer, JerkSettings, Vector3};
