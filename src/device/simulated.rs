//! Scripted in-memory devices
//!
//! Each [`SimulatedDevice`] is a cheap handle onto a shared pad, so a test can keep
//! one handle to feed samples and inspect LEDs while the controller owns another.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::debug;

use super::{BatteryLevel, ConnectionKind, Device, DeviceError, DeviceLayer};
use crate::motion::Vector3;

/// One raw reading, in device units.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    pub buttons: u32,
    pub acceleration: Vector3,
    pub gyro: Vector3,
    pub magnetometer: Vector3,
}

impl Sample {
    pub fn with_buttons(buttons: u32) -> Self {
        Self {
            buttons,
            ..Default::default()
        }
    }

    pub fn with_acceleration(acceleration: Vector3) -> Self {
        Self {
            acceleration,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct SimulatedPad {
    connection: ConnectionKind,
    battery: BatteryLevel,
    queue: VecDeque<Sample>,
    looping: Vec<Sample>,
    loop_cursor: usize,
    current: Sample,
    pending_leds: (u8, u8, u8),
    leds: (u8, u8, u8),
    polls: usize,
    flushes: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SimulatedDevice {
    pad: Rc<RefCell<SimulatedPad>>,
}

impl SimulatedDevice {
    pub fn new(connection: ConnectionKind) -> Self {
        let device = Self::default();
        device.pad.borrow_mut().connection = connection;
        device
    }

    /// Queues a sample for a later `poll`.
    pub fn feed(&self, sample: Sample) {
        self.pad.borrow_mut().queue.push_back(sample);
    }

    pub fn feed_all(&self, samples: impl IntoIterator<Item = Sample>) {
        self.pad.borrow_mut().queue.extend(samples);
    }

    /// Samples replayed in order, forever, once the queue is empty.
    pub fn set_loop(&self, samples: Vec<Sample>) {
        let mut pad = self.pad.borrow_mut();
        pad.looping = samples;
        pad.loop_cursor = 0;
    }

    pub fn set_battery(&self, battery: BatteryLevel) {
        self.pad.borrow_mut().battery = battery;
    }

    /// Last color flushed to the "hardware".
    pub fn leds(&self) -> (u8, u8, u8) {
        self.pad.borrow().leds
    }

    pub fn flush_count(&self) -> usize {
        self.pad.borrow().flushes
    }

    pub fn poll_count(&self) -> usize {
        self.pad.borrow().polls
    }

    pub fn pending(&self) -> usize {
        self.pad.borrow().queue.len()
    }
}

impl Device for SimulatedDevice {
    fn poll(&mut self) -> bool {
        let mut pad = self.pad.borrow_mut();
        pad.polls += 1;

        if let Some(sample) = pad.queue.pop_front() {
            pad.current = sample;
            return true;
        }
        if pad.looping.is_empty() {
            return false;
        }

        let cursor = pad.loop_cursor;
        let sample = pad.looping[cursor];
        pad.current = sample;
        pad.loop_cursor = (cursor + 1) % pad.looping.len();
        true
    }

    fn buttons(&self) -> u32 {
        self.pad.borrow().current.buttons
    }

    fn acceleration(&self) -> Vector3 {
        self.pad.borrow().current.acceleration
    }

    fn gyro(&self) -> Vector3 {
        self.pad.borrow().current.gyro
    }

    fn magnetometer(&self) -> Vector3 {
        self.pad.borrow().current.magnetometer
    }

    fn connection_kind(&self) -> ConnectionKind {
        self.pad.borrow().connection
    }

    fn battery(&self) -> BatteryLevel {
        self.pad.borrow().battery
    }

    fn set_leds(&mut self, r: u8, g: u8, b: u8) {
        self.pad.borrow_mut().pending_leds = (r, g, b);
    }

    fn flush_leds(&mut self) {
        let mut pad = self.pad.borrow_mut();
        let leds = pad.pending_leds;
        pad.leds = leds;
        pad.flushes += 1;
    }
}

#[derive(Debug, Default)]
pub struct SimulatedDeviceLayer {
    devices: Vec<SimulatedDevice>,
}

impl SimulatedDeviceLayer {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self { devices }
    }

    /// `count` idle devices, all reporting `connection`.
    pub fn with_count(count: usize, connection: ConnectionKind) -> Self {
        Self::new((0..count).map(|_| SimulatedDevice::new(connection)).collect())
    }
}

impl DeviceLayer for SimulatedDeviceLayer {
    fn count_connected(&mut self) -> usize {
        self.devices.len()
    }

    fn connect(&mut self, index: usize) -> Result<Box<dyn Device>, DeviceError> {
        let device = self
            .devices
            .get(index)
            .ok_or(DeviceError::NoSuchDevice {
                index,
                count: self.devices.len(),
            })?;
        debug!("Connecting simulated device {}", index);
        Ok(Box::new(device.clone()))
    }
}
