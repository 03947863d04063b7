//! Gamepads through gilrs
//!
//! gilrs exposes buttons and power state but no motion sensors or LEDs, so
//! acceleration, gyro and magnetometer read as zero and LED commands are dropped.

use gilrs::{Button as GilrsButton, Event, GamepadId, Gilrs, PowerInfo};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use tracing::{debug, error, info};

use super::{BatteryLevel, ConnectionKind, Device, DeviceError, DeviceLayer};
use crate::controller::Button;
use crate::motion::Vector3;

struct Shared {
    gilrs: Gilrs,
    // Gamepads with events not yet picked up by their device's poll
    fresh: HashSet<GamepadId>,
}

impl Shared {
    fn drain_events(&mut self) {
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            debug!("gilrs event from {}: {:?}", id, event);
            self.fresh.insert(id);
        }
    }
}

pub struct GilrsDeviceLayer {
    shared: Rc<RefCell<Shared>>,
}

impl GilrsDeviceLayer {
    pub fn new() -> Result<Self, DeviceError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            DeviceError::InitializationError(e.to_string())
        })?;
        info!("Successfully initialized gilrs");

        Ok(Self {
            shared: Rc::new(RefCell::new(Shared {
                gilrs,
                fresh: HashSet::new(),
            })),
        })
    }

    fn gamepad_ids(&self) -> Vec<GamepadId> {
        self.shared
            .borrow()
            .gilrs
            .gamepads()
            .map(|(id, _)| id)
            .collect()
    }
}

impl DeviceLayer for GilrsDeviceLayer {
    fn count_connected(&mut self) -> usize {
        self.shared.borrow_mut().drain_events();
        self.gamepad_ids().len()
    }

    fn connect(&mut self, index: usize) -> Result<Box<dyn Device>, DeviceError> {
        let ids = self.gamepad_ids();
        let id = *ids.get(index).ok_or(DeviceError::NoSuchDevice {
            index,
            count: ids.len(),
        })?;

        {
            let shared = self.shared.borrow();
            let gamepad = shared.gilrs.gamepad(id);
            info!("Connected gamepad: {} ({})", gamepad.name(), id);
        }

        Ok(Box::new(GilrsDevice {
            shared: self.shared.clone(),
            id,
            buttons: 0,
        }))
    }
}

pub struct GilrsDevice {
    shared: Rc<RefCell<Shared>>,
    id: GamepadId,
    buttons: u32,
}

impl Debug for GilrsDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GilrsDevice")
            .field("id", &self.id)
            .field("buttons", &self.buttons)
            .finish()
    }
}

impl GilrsDevice {
    fn power_info(&self) -> PowerInfo {
        self.shared.borrow().gilrs.gamepad(self.id).power_info()
    }
}

impl Device for GilrsDevice {
    fn poll(&mut self) -> bool {
        let mut shared = self.shared.borrow_mut();
        shared.drain_events();
        if !shared.fresh.remove(&self.id) {
            return false;
        }

        let gamepad = shared.gilrs.gamepad(self.id);
        self.buttons = GILRS_BUTTONS
            .iter()
            .filter(|(from, _)| gamepad.is_pressed(*from))
            .fold(0, |mask, (_, to)| mask | to.bit());
        true
    }

    fn buttons(&self) -> u32 {
        self.buttons
    }

    fn acceleration(&self) -> Vector3 {
        Vector3::ZERO
    }

    fn gyro(&self) -> Vector3 {
        Vector3::ZERO
    }

    fn magnetometer(&self) -> Vector3 {
        Vector3::ZERO
    }

    fn connection_kind(&self) -> ConnectionKind {
        match self.power_info() {
            PowerInfo::Wired => ConnectionKind::Usb,
            PowerInfo::Discharging(_) | PowerInfo::Charging(_) | PowerInfo::Charged => {
                ConnectionKind::Bluetooth
            }
            _ => ConnectionKind::Unknown,
        }
    }

    fn battery(&self) -> BatteryLevel {
        match self.power_info() {
            PowerInfo::Discharging(percent) => {
                BatteryLevel::Level((percent.min(100) as u16 * BatteryLevel::MAX as u16 / 100) as u8)
            }
            PowerInfo::Charging(_) => BatteryLevel::Charging,
            PowerInfo::Charged => BatteryLevel::Charged,
            _ => BatteryLevel::Unknown,
        }
    }

    fn set_leds(&mut self, _r: u8, _g: u8, _b: u8) {}

    fn flush_leds(&mut self) {}
}

const GILRS_BUTTONS: [(GilrsButton, Button); 17] = [
    (GilrsButton::South, Button::Cross),
    (GilrsButton::East, Button::Circle),
    (GilrsButton::West, Button::Square),
    (GilrsButton::North, Button::Triangle),
    (GilrsButton::LeftTrigger, Button::L1),
    (GilrsButton::RightTrigger, Button::R1),
    (GilrsButton::LeftTrigger2, Button::L2),
    (GilrsButton::RightTrigger2, Button::R2),
    (GilrsButton::Select, Button::Select),
    (GilrsButton::Start, Button::Start),
    (GilrsButton::Mode, Button::Ps),
    (GilrsButton::LeftThumb, Button::L3),
    (GilrsButton::RightThumb, Button::R3),
    (GilrsButton::DPadUp, Button::Up),
    (GilrsButton::DPadDown, Button::Down),
    (GilrsButton::DPadLeft, Button::Left),
    (GilrsButton::DPadRight, Button::Right),
];
