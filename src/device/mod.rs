//! Device layer seam
//!
//! The core never talks to hardware directly. A [`DeviceLayer`] enumerates and
//! connects devices; each connected [`Device`] hands out one sample per successful
//! [`poll`](Device::poll) and accepts LED colors.
//!
//! ```text
//! DeviceLayer ──connect(i)──► Device ──poll/read──► Controller
//!                               ▲                        │
//!                               └──── set_leds/flush ────┘
//! ```

#[cfg(feature = "gilrs-backend")]
pub mod gilrs_backend;
pub mod simulated;

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

use crate::motion::Vector3;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No device at index {index} ({count} connected)")]
    NoSuchDevice { index: usize, count: usize },

    #[error("Failed to initialize device backend: {0}")]
    InitializationError(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    Bluetooth,
    Usb,
    #[default]
    Unknown,
}

impl ConnectionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionKind::Bluetooth => "Bluetooth",
            ConnectionKind::Usb => "USB",
            ConnectionKind::Unknown => "Unknown",
        }
    }
}

impl Display for ConnectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Battery state as reported by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryLevel {
    /// 0 (empty) to [`BatteryLevel::MAX`] (full)
    Level(u8),
    Charging,
    Charged,
    #[default]
    Unknown,
}

impl BatteryLevel {
    pub const MAX: u8 = 5;
}

impl Display for BatteryLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BatteryLevel::Level(level) => write!(f, "{}/{}", level, Self::MAX),
            BatteryLevel::Charging => write!(f, "charging"),
            BatteryLevel::Charged => write!(f, "charged"),
            BatteryLevel::Unknown => write!(f, "unknown"),
        }
    }
}

/// Enumerates and connects controllers.
pub trait DeviceLayer {
    fn count_connected(&mut self) -> usize;

    fn connect(&mut self, index: usize) -> Result<Box<dyn Device>, DeviceError>;
}

/// One connected controller.
///
/// Readings reflect the sample delivered by the last successful `poll`.
pub trait Device: Debug {
    /// Returns `true` when a fresh sample is available.
    fn poll(&mut self) -> bool;

    fn buttons(&self) -> u32;

    fn acceleration(&self) -> Vector3;

    fn gyro(&self) -> Vector3;

    fn magnetometer(&self) -> Vector3;

    fn connection_kind(&self) -> ConnectionKind;

    fn battery(&self) -> BatteryLevel {
        BatteryLevel::Unknown
    }

    fn set_leds(&mut self, r: u8, g: u8, b: u8);

    /// Sends the last `set_leds` color to the hardware.
    fn flush_leds(&mut self);
}
