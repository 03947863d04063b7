use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::buttons::{Button, ButtonState, PressTimeMode};
use super::clock::Clock;
use super::color::{Color, ColorError};
use super::events::{EventKind, EventState};
use super::ControllerError;
use crate::device::{BatteryLevel, ConnectionKind, Device};
use crate::motion::{HistoryBuffer, JerkDetector, JerkSettings, Vector3};

// Per-controller settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Raw accelerometer units per normalized unit
    pub acceleration_scale: f64,
    pub history_capacity: usize,
    pub press_time_mode: PressTimeMode,
    pub jerk: JerkSettings,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            acceleration_scale: 4000.0,
            history_capacity: 5,
            press_time_mode: PressTimeMode::default(),
            jerk: JerkSettings::default(),
        }
    }
}

/// Calibration state.
///
/// No calibration procedure ships with the framework. A [`Behavior`] that wants one
/// drives these fields from its hooks; the core only stores them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Calibration {
    pub deadzone: f64,
    pub deadzone_low: Vector3,
    pub deadzone_high: Vector3,
    pub is_calibrating: bool,
    pub step_count: u32,
}

/// Everything a controller knows, as seen by its [`Behavior`] hooks.
#[derive(Debug)]
pub struct ControllerState {
    id: usize,
    connection: ConnectionKind,
    battery: BatteryLevel,
    clock: Arc<dyn Clock>,

    raw_acceleration: Vector3,
    gyro: Vector3,
    magnetometer: Vector3,
    acceleration_scale: f64,

    buttons: ButtonState,
    events: EventState,
    acceleration_history: HistoryBuffer<Vector3>,
    jerk_history: HistoryBuffer<Vector3>,
    jerk_detector: JerkDetector,

    pub calibration: Calibration,
    color: Color,
    ticks: u64,
}

impl ControllerState {
    pub fn new(
        id: usize,
        connection: ConnectionKind,
        settings: &ControllerSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            id,
            connection,
            battery: BatteryLevel::Unknown,
            clock,
            raw_acceleration: Vector3::ZERO,
            gyro: Vector3::ZERO,
            magnetometer: Vector3::ZERO,
            acceleration_scale: settings.acceleration_scale,
            buttons: ButtonState::new(settings.press_time_mode),
            events: EventState::default(),
            acceleration_history: HistoryBuffer::new(settings.history_capacity, Vector3::ZERO)?,
            jerk_history: HistoryBuffer::new(settings.history_capacity, Vector3::ZERO)?,
            jerk_detector: JerkDetector::new(settings.jerk.clone()),
            calibration: Calibration::default(),
            color: Color::OFF,
            ticks: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn connection_kind(&self) -> ConnectionKind {
        self.connection
    }

    /// Human readable connection label
    pub fn connection(&self) -> &'static str {
        self.connection.label()
    }

    pub fn battery(&self) -> BatteryLevel {
        self.battery
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Number of completed ticks
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn raw_acceleration(&self) -> Vector3 {
        self.raw_acceleration
    }

    /// Acceleration in normalized units
    pub fn acceleration(&self) -> Vector3 {
        self.raw_acceleration / self.acceleration_scale
    }

    /// Difference between the two most recent acceleration samples
    pub fn jerk(&self) -> Vector3 {
        *self.acceleration_history.now() - *self.acceleration_history.prev()
    }

    pub fn gyro(&self) -> Vector3 {
        self.gyro
    }

    pub fn magnetometer(&self) -> Vector3 {
        self.magnetometer
    }

    pub fn acceleration_history(&self) -> &HistoryBuffer<Vector3> {
        &self.acceleration_history
    }

    pub fn jerk_history(&self) -> &HistoryBuffer<Vector3> {
        &self.jerk_history
    }

    pub fn button_state(&self) -> &ButtonState {
        &self.buttons
    }

    pub fn is_down(&self, button: Button) -> bool {
        self.buttons.is_down(button)
    }

    pub fn was_pressed(&self, button: Button) -> bool {
        self.buttons.was_pressed(button)
    }

    pub fn was_released(&self, button: Button) -> bool {
        self.buttons.was_released(button)
    }

    pub fn held_duration(&self, button: Button) -> f64 {
        self.buttons.held_duration(button, self.clock.now())
    }

    pub fn event_duration(&self, kind: EventKind) -> f64 {
        self.events.event_duration(kind, self.clock.now())
    }

    pub fn jerk_settings(&self) -> &JerkSettings {
        self.jerk_detector.settings()
    }

    pub fn set_jerk_settings(&mut self, settings: JerkSettings) {
        self.jerk_detector.update_settings(settings);
    }

    pub fn jerk_armed(&self) -> bool {
        self.jerk_detector.is_armed()
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// Sets the color pushed to the LED at the end of every tick.
    pub fn set_color(&mut self, color: impl Into<Color>) {
        self.color = color.into();
    }

    /// Sets the color from untyped byte components. Anything but 3 is rejected.
    pub fn set_color_components(&mut self, components: &[u8]) -> Result<(), ColorError> {
        self.color = Color::try_from(components)?;
        Ok(())
    }

    fn read_sample(&mut self, device: &dyn Device, now: Instant) {
        self.buttons.update(device.buttons(), now);
        self.raw_acceleration = device.acceleration();
        self.gyro = device.gyro();
        self.magnetometer = device.magnetometer();
        self.battery = device.battery();
    }

    fn push_motion(&mut self) {
        let acceleration = self.acceleration();
        self.acceleration_history.push(acceleration);
        let jerk = self.jerk();
        self.jerk_history.push(jerk);
    }

    fn jerk_peak_passed(&self, now: Instant) -> bool {
        let since = self.events.event_duration(EventKind::Jerk, now);
        self.jerk_detector.peak_passed(&self.jerk_history, since)
    }
}

/// Per-tick logic supplied by the user of the framework.
///
/// `input` runs only on ticks that received a fresh sample, `output` runs on every
/// tick right before the LED color is pushed.
pub trait Behavior {
    fn input(&mut self, state: &mut ControllerState) -> Result<(), ControllerError>;

    fn output(&mut self, state: &mut ControllerState) -> Result<(), ControllerError>;

    /// Called when a gesture event fires, before its firing time is recorded.
    fn on_event(
        &mut self,
        _kind: EventKind,
        _state: &mut ControllerState,
    ) -> Result<(), ControllerError> {
        Ok(())
    }
}

type Hook = Box<dyn FnMut(&mut ControllerState) -> Result<(), ControllerError>>;

/// Closure based [`Behavior`]. Hooks that were never set fail with
/// [`ControllerError::NotImplemented`] when the controller ticks.
#[derive(Default)]
pub struct HookBehavior {
    input: Option<Hook>,
    output: Option<Hook>,
    jerk: Option<Hook>,
}

impl HookBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_input(
        mut self,
        hook: impl FnMut(&mut ControllerState) -> Result<(), ControllerError> + 'static,
    ) -> Self {
        self.input = Some(Box::new(hook));
        self
    }

    pub fn on_output(
        mut self,
        hook: impl FnMut(&mut ControllerState) -> Result<(), ControllerError> + 'static,
    ) -> Self {
        self.output = Some(Box::new(hook));
        self
    }

    pub fn on_jerk(
        mut self,
        hook: impl FnMut(&mut ControllerState) -> Result<(), ControllerError> + 'static,
    ) -> Self {
        self.jerk = Some(Box::new(hook));
        self
    }
}

impl Behavior for HookBehavior {
    fn input(&mut self, state: &mut ControllerState) -> Result<(), ControllerError> {
        match self.input.as_mut() {
            Some(hook) => hook(state),
            None => Err(ControllerError::NotImplemented("input")),
        }
    }

    fn output(&mut self, state: &mut ControllerState) -> Result<(), ControllerError> {
        match self.output.as_mut() {
            Some(hook) => hook(state),
            None => Err(ControllerError::NotImplemented("output")),
        }
    }

    fn on_event(&mut self, kind: EventKind, state: &mut ControllerState) -> Result<(), ControllerError> {
        match (kind, self.jerk.as_mut()) {
            (EventKind::Jerk, Some(hook)) => hook(state),
            _ => Ok(()),
        }
    }
}

/// One physical controller: its device handle, its state and the behavior driving it.
pub struct Controller<B: Behavior> {
    device: Box<dyn Device>,
    state: ControllerState,
    behavior: B,
}

impl<B: Behavior> Controller<B> {
    pub fn new(
        id: usize,
        device: Box<dyn Device>,
        behavior: B,
        settings: &ControllerSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ControllerError> {
        let connection = device.connection_kind();
        let mut state = ControllerState::new(id, connection, settings, clock)?;
        state.battery = device.battery();
        debug!(
            "Created controller {} ({}) with settings: {:?}",
            id, connection, settings
        );

        Ok(Self {
            device,
            state,
            behavior,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ControllerState {
        &mut self.state
    }

    pub fn behavior(&self) -> &B {
        &self.behavior
    }

    /// Runs one poll-process-output cycle.
    pub fn tick(&mut self) -> Result<(), ControllerError> {
        if self.device.poll() {
            let now = self.state.clock.now();
            self.state.read_sample(self.device.as_ref(), now);
            self.state.push_motion();

            if self.state.jerk_peak_passed(now) {
                self.fire(EventKind::Jerk, now)?;
                self.state.jerk_detector.disarm();
            }
            self.state.jerk_detector.settle(&self.state.jerk_history);

            self.behavior.input(&mut self.state)?;

            // always last
            self.state.buttons.commit();
        } else {
            debug!("Controller {}: no sample this tick", self.state.id);
        }

        self.behavior.output(&mut self.state)?;

        let (r, g, b) = self.state.color.to_bytes();
        self.device.set_leds(r, g, b);
        self.device.flush_leds();
        self.state.ticks += 1;

        Ok(())
    }

    fn fire(&mut self, kind: EventKind, now: Instant) -> Result<(), ControllerError> {
        info!(
            "Controller {}: {} at {}",
            self.state.id,
            kind,
            Local::now().format("%H:%M:%S.%3f")
        );
        self.behavior.on_event(kind, &mut self.state)?;
        self.state.events.record(kind, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::clock::ManualClock;
    use crate::device::simulated::{Sample, SimulatedDevice};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn accel(z: f64) -> Sample {
        Sample::with_acceleration(Vector3::new(0.0, 0.0, z * 4000.0))
    }

    /// Records what the hooks observed on each call.
    #[derive(Default)]
    struct Recorder {
        inputs: usize,
        outputs: usize,
        jerks: Vec<u64>,
        pressed: Vec<Button>,
        released: Vec<Button>,
    }

    impl Behavior for Recorder {
        fn input(&mut self, state: &mut ControllerState) -> Result<(), ControllerError> {
            self.inputs += 1;
            self.pressed
                .extend(Button::ALL.into_iter().filter(|b| state.was_pressed(*b)));
            self.released
                .extend(Button::ALL.into_iter().filter(|b| state.was_released(*b)));
            Ok(())
        }

        fn output(&mut self, state: &mut ControllerState) -> Result<(), ControllerError> {
            self.outputs += 1;
            state.set_color((0u8, (state.tick_count() % 256) as u8, 0u8));
            Ok(())
        }

        fn on_event(
            &mut self,
            kind: EventKind,
            state: &mut ControllerState,
        ) -> Result<(), ControllerError> {
            if kind == EventKind::Jerk {
                self.jerks.push(state.tick_count());
            }
            Ok(())
        }
    }

    fn setup() -> (Controller<Recorder>, SimulatedDevice, Arc<ManualClock>) {
        let handle = SimulatedDevice::new(ConnectionKind::Bluetooth);
        let clock = Arc::new(ManualClock::new());
        let controller = Controller::new(
            0,
            Box::new(handle.clone()),
            Recorder::default(),
            &ControllerSettings::default(),
            clock.clone(),
        )
        .unwrap();
        (controller, handle, clock)
    }

    #[test]
    fn test_tick_without_sample_still_outputs() {
        let (mut controller, handle, _clock) = setup();

        controller.tick().unwrap();
        controller.tick().unwrap();

        assert_eq!(controller.behavior().inputs, 0);
        assert_eq!(controller.behavior().outputs, 2);
        assert_eq!(controller.state().tick_count(), 2);
        assert_eq!(handle.flush_count(), 2);
        assert_eq!(handle.leds(), (0, 1, 0));
    }

    #[test]
    fn test_button_edges_seen_by_input() {
        let (mut controller, handle, _clock) = setup();
        handle.feed_all([
            Sample::with_buttons(Button::Cross.bit()),
            Sample::with_buttons(Button::Cross.bit()),
            Sample::with_buttons(0),
        ]);

        for _ in 0..3 {
            controller.tick().unwrap();
        }

        assert_eq!(controller.behavior().pressed, vec![Button::Cross]);
        assert_eq!(controller.behavior().released, vec![Button::Cross]);
        assert_eq!(controller.state().button_state().prev_buttons(), 0);
    }

    #[test]
    fn test_edges_survive_idle_ticks() {
        let (mut controller, handle, _clock) = setup();
        handle.feed(Sample::with_buttons(Button::Move.bit()));
        controller.tick().unwrap();

        // Idle tick does not commit anything
        controller.tick().unwrap();
        assert_eq!(
            controller.state().button_state().prev_buttons(),
            Button::Move.bit()
        );
        assert!(controller.state().is_down(Button::Move));
        assert!(!controller.state().was_pressed(Button::Move));
    }

    #[test]
    fn test_held_duration_uses_clock() {
        let (mut controller, handle, clock) = setup();
        assert!(controller.state().held_duration(Button::T).is_infinite());

        handle.feed(Sample::with_buttons(Button::T.bit()));
        controller.tick().unwrap();
        clock.advance_secs(1.5);
        assert_eq!(controller.state().held_duration(Button::T), 1.5);
    }

    #[test]
    fn test_normalized_views() {
        let (mut controller, handle, _clock) = setup();
        handle.feed(Sample {
            buttons: 0,
            acceleration: Vector3::new(4000.0, 0.0, -8000.0),
            gyro: Vector3::new(1.0, 2.0, 3.0),
            magnetometer: Vector3::new(-1.0, 0.0, 1.0),
        });
        controller.tick().unwrap();

        let state = controller.state();
        assert_eq!(state.raw_acceleration(), Vector3::new(4000.0, 0.0, -8000.0));
        assert_eq!(state.acceleration(), Vector3::new(1.0, 0.0, -2.0));
        assert_eq!(state.jerk(), Vector3::new(1.0, 0.0, -2.0));
        assert_eq!(state.gyro(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(state.magnetometer(), Vector3::new(-1.0, 0.0, 1.0));
        assert_eq!(state.connection(), "Bluetooth");
    }

    #[test]
    fn test_jerk_needs_falling_sample() {
        let (mut controller, handle, _clock) = setup();
        // rest arms the detector, then a 1 -> 3 step
        handle.feed_all([accel(0.0), accel(1.0), accel(3.0)]);
        for _ in 0..3 {
            controller.tick().unwrap();
        }
        assert_eq!(controller.state().jerk_history().now().magnitude(), 2.0);
        assert!(controller.behavior().jerks.is_empty());

        // 3 -> 5 keeps jerk at 2: a plateau, not a fall
        handle.feed(accel(5.0));
        controller.tick().unwrap();
        assert!(controller.behavior().jerks.is_empty());

        // 5 -> 5 drops jerk to 0
        handle.feed(accel(5.0));
        controller.tick().unwrap();
        assert_eq!(controller.behavior().jerks, vec![4]);
        assert!(controller.state().event_duration(EventKind::Jerk).is_finite());
    }

    #[test]
    fn test_jerk_not_fired_while_disarmed() {
        let (mut controller, handle, _clock) = setup();
        // First jerk is already 1.0, so the detector never armed
        handle.feed_all([accel(1.0), accel(3.0), accel(3.0)]);
        for _ in 0..3 {
            controller.tick().unwrap();
        }
        assert!(controller.behavior().jerks.is_empty());
        assert!(controller.state().jerk_armed());
    }

    #[test]
    fn test_jerk_refire_spacing() {
        let (mut controller, handle, clock) = setup();
        let shake = [accel(0.0), accel(2.0), accel(2.0)];

        handle.feed_all(shake);
        for _ in 0..3 {
            controller.tick().unwrap();
        }
        assert_eq!(controller.behavior().jerks.len(), 1);

        // Same shake 0.1s later is suppressed
        clock.advance_secs(0.1);
        handle.feed_all(shake);
        for _ in 0..3 {
            controller.tick().unwrap();
        }
        assert_eq!(controller.behavior().jerks.len(), 1);

        clock.advance_secs(0.2);
        handle.feed_all(shake);
        for _ in 0..3 {
            controller.tick().unwrap();
        }
        assert_eq!(controller.behavior().jerks.len(), 2);
    }

    fn hook_controller(behavior: HookBehavior) -> (Controller<HookBehavior>, SimulatedDevice) {
        let handle = SimulatedDevice::new(ConnectionKind::Usb);
        let controller = Controller::new(
            0,
            Box::new(handle.clone()),
            behavior,
            &ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        (controller, handle)
    }

    #[test]
    fn test_jerk_hook_runs_before_record_and_disarm() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let (mut controller, handle) = hook_controller(
            HookBehavior::new()
                .on_input(|_| Ok(()))
                .on_output(|_| Ok(()))
                .on_jerk(move |state| {
                    log.borrow_mut().push((
                        state.jerk_armed(),
                        state.event_duration(EventKind::Jerk).is_infinite(),
                    ));
                    Ok(())
                }),
        );

        // jerk magnitudes 0, 2, 1: the fall to 1 fires and stays above the re-arm line
        handle.feed_all([accel(0.0), accel(2.0), accel(3.0)]);
        for _ in 0..3 {
            controller.tick().unwrap();
        }

        assert_eq!(*seen.borrow(), vec![(true, true)]);
        assert!(!controller.state().jerk_armed());
        assert!(controller.state().event_duration(EventKind::Jerk).is_finite());
    }

    #[test]
    fn test_failed_jerk_hook_keeps_detector_armed() {
        let (mut controller, handle) = hook_controller(
            HookBehavior::new()
                .on_input(|_| Ok(()))
                .on_output(|_| Ok(()))
                .on_jerk(|state| Ok(state.set_color_components(&[])?)),
        );

        handle.feed_all([accel(0.0), accel(2.0), accel(3.0)]);
        controller.tick().unwrap();
        controller.tick().unwrap();
        assert!(matches!(
            controller.tick(),
            Err(ControllerError::Color(ColorError::Arity(0)))
        ));

        assert!(controller.state().jerk_armed());
        assert!(controller.state().event_duration(EventKind::Jerk).is_infinite());
        assert_eq!(controller.state().tick_count(), 2);
    }

    #[test]
    fn test_battery_read_on_connect_and_refreshed_with_samples() {
        let handle = SimulatedDevice::new(ConnectionKind::Bluetooth);
        handle.set_battery(BatteryLevel::Level(4));
        let mut controller = Controller::new(
            0,
            Box::new(handle.clone()),
            Recorder::default(),
            &ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        assert_eq!(controller.state().battery(), BatteryLevel::Level(4));

        // Only a fresh sample refreshes the reading
        handle.set_battery(BatteryLevel::Charging);
        controller.tick().unwrap();
        assert_eq!(controller.state().battery(), BatteryLevel::Level(4));

        handle.feed(Sample::default());
        controller.tick().unwrap();
        assert_eq!(controller.state().battery(), BatteryLevel::Charging);
    }

    #[test]
    fn test_missing_hooks_not_implemented() {
        let handle = SimulatedDevice::new(ConnectionKind::Usb);
        let mut controller = Controller::new(
            3,
            Box::new(handle.clone()),
            HookBehavior::new(),
            &ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();

        // No sample: the output hook is the first one reached
        assert!(matches!(
            controller.tick(),
            Err(ControllerError::NotImplemented("output"))
        ));

        handle.feed(Sample::default());
        assert!(matches!(
            controller.tick(),
            Err(ControllerError::NotImplemented("input"))
        ));
        assert_eq!(controller.state().tick_count(), 0);
        assert_eq!(handle.flush_count(), 0);
    }

    #[test]
    fn test_hook_behavior_closures() {
        let handle = SimulatedDevice::new(ConnectionKind::Usb);
        let jerks = Rc::new(RefCell::new(0));
        let seen = jerks.clone();
        let behavior = HookBehavior::new()
            .on_input(|state| {
                if state.is_down(Button::Circle) {
                    state.set_color(Color::Float(1.0, 0.0, 0.0));
                }
                Ok(())
            })
            .on_output(|_| Ok(()))
            .on_jerk(move |_| {
                *seen.borrow_mut() += 1;
                Ok(())
            });
        let mut controller = Controller::new(
            0,
            Box::new(handle.clone()),
            behavior,
            &ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .unwrap();

        handle.feed_all([
            Sample::with_buttons(Button::Circle.bit()),
            accel(1.0),
            accel(1.0),
        ]);
        for _ in 0..3 {
            controller.tick().unwrap();
        }

        assert_eq!(handle.leds(), (255, 0, 0));
        assert_eq!(*jerks.borrow(), 1);
    }

    #[test]
    fn test_set_color_components() {
        let (mut controller, _handle, _clock) = setup();
        let state = controller.state_mut();

        assert!(state.set_color_components(&[1, 2, 3]).is_ok());
        assert_eq!(state.color(), Color::Byte(1, 2, 3));
        assert_eq!(
            state.set_color_components(&[1, 2]),
            Err(ColorError::Arity(2))
        );
        // Rejected input leaves the color untouched
        assert_eq!(state.color(), Color::Byte(1, 2, 3));
    }

    #[test]
    fn test_rejects_bad_history_capacity() {
        let settings = ControllerSettings {
            history_capacity: 1,
            ..Default::default()
        };
        let result = Controller::new(
            0,
            Box::new(SimulatedDevice::new(ConnectionKind::Usb)),
            Recorder::default(),
            &settings,
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(ControllerError::History(_))));
    }
}
