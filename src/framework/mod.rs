//! Controller discovery and the fixed-rate scheduling loop
//!
//! The framework is a statum state machine with two states:
//!
//! ```text
//! Discovering ──discover_and_register──► Registered ──run──► (loops until an error)
//! ```
//!
//! Registration happens exactly once. After that the registry is read-only and
//! every cycle ticks each controller in discovery order, then waits for the next
//! cycle. Everything runs on the calling thread.

use chrono::{Local, TimeDelta};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::controller::{Behavior, Clock, Controller, ControllerError, ControllerSettings, ControllerState};
use crate::device::{DeviceError, DeviceLayer};

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("No motion controllers found")]
    NoControllers,

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Invalid scheduler settings: {0}")]
    InvalidSettings(String),

    #[error("Controller {id} failed: {source}")]
    Controller {
        id: usize,
        #[source]
        source: ControllerError,
    },
}

/// How the loop waits between cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Sleep the full interval after every cycle. Tick time adds up as drift.
    #[default]
    FixedSleep,
    /// Sleep until the next deadline, subtracting the time the cycle took.
    Deadline,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub cycle_interval_ms: u64,
    pub scheduling: SchedulingMode,
    /// Seconds between loop statistics log lines
    pub stats_interval_secs: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 10,
            scheduling: SchedulingMode::FixedSleep,
            stats_interval_secs: 10,
        }
    }
}

/// What the deadline scheduler does after a cycle.
#[derive(Debug, PartialEq)]
enum Pace {
    Sleep { until: Instant, wait: Duration },
    Overrun { by: Duration },
}

/// `None` when the next deadline does not fit in an [`Instant`].
fn plan_pace(previous: Option<Instant>, now: Instant, interval: Duration) -> Option<Pace> {
    let deadline = previous.unwrap_or(now).checked_add(interval)?;
    if deadline > now {
        Some(Pace::Sleep {
            until: deadline,
            wait: deadline - now,
        })
    } else {
        Some(Pace::Overrun { by: now - deadline })
    }
}

/// A registered controller, with its behavior type erased.
pub trait Tickable {
    fn tick(&mut self) -> Result<(), ControllerError>;

    fn state(&self) -> &ControllerState;
}

impl<B: Behavior> Tickable for Controller<B> {
    fn tick(&mut self) -> Result<(), ControllerError> {
        Controller::tick(self)
    }

    fn state(&self) -> &ControllerState {
        Controller::state(self)
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum FrameworkState {
    Discovering,
    Registered,
}

#[machine]
pub struct Framework<S: FrameworkState> {
    backend: Box<dyn DeviceLayer>,
    settings: SchedulerSettings,
    controller_settings: ControllerSettings,
    clock: Arc<dyn Clock>,
    controllers: Vec<Box<dyn Tickable>>,
    cycles: u64,
    next_deadline: Option<Instant>,
}

impl<S: FrameworkState> Framework<S> {
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }
}

impl Framework<Discovering> {
    pub fn create(
        backend: Box<dyn DeviceLayer>,
        settings: SchedulerSettings,
        controller_settings: ControllerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug!("Creating framework with settings: {:?}", settings);
        Self::new(
            backend,
            settings,
            controller_settings,
            clock,
            Vec::new(), // controllers
            0,          // cycles
            None,       // next_deadline
        )
    }

    /// Connects every device the backend reports and registers one controller each.
    ///
    /// `factory` builds the behavior for the controller with the given id. Ids are
    /// device indices, assigned in discovery order.
    pub fn discover_and_register<B, F>(
        mut self,
        mut factory: F,
    ) -> Result<Framework<Registered>, FrameworkError>
    where
        B: Behavior + 'static,
        F: FnMut(usize) -> B,
    {
        let count = self.backend.count_connected();
        if count == 0 {
            error!("No motion controllers found...");
            return Err(FrameworkError::NoControllers);
        }

        info!("Connecting {} controller(s):", count);
        for id in 0..count {
            let device = self.backend.connect(id)?;
            let controller = Controller::new(
                id,
                device,
                factory(id),
                &self.controller_settings,
                self.clock.clone(),
            )
            .map_err(|source| FrameworkError::Controller { id, source })?;

            info!(
                "  [{}] {} (battery: {})",
                id,
                controller.state().connection(),
                controller.state().battery()
            );
            self.controllers.push(Box::new(controller));
        }
        info!("Registered {} controller(s)", self.controllers.len());

        Ok(self.transition())
    }
}

impl Framework<Registered> {
    pub fn controllers(&self) -> &[Box<dyn Tickable>] {
        &self.controllers
    }

    /// Completed cycles since registration.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Ticks every controller once, in registration order.
    pub fn cycle(&mut self) -> Result<(), FrameworkError> {
        for controller in self.controllers.iter_mut() {
            let id = controller.state().id();
            controller
                .tick()
                .map_err(|source| FrameworkError::Controller { id, source })?;
        }
        self.cycles += 1;
        Ok(())
    }

    /// Runs `count` cycles, pacing them like [`run`](Self::run).
    pub fn run_cycles(&mut self, count: u64) -> Result<(), FrameworkError> {
        for _ in 0..count {
            self.cycle()?;
            self.pace()?;
        }
        Ok(())
    }

    /// Runs forever. Only returns when a controller fails.
    pub fn run(&mut self) -> Result<(), FrameworkError> {
        let stats_secs = self.settings.stats_interval_secs.max(1);
        let log_interval = TimeDelta::try_seconds(stats_secs).ok_or_else(|| {
            FrameworkError::InvalidSettings(format!(
                "stats interval of {}s is out of range",
                stats_secs
            ))
        })?;

        info!(
            "Starting framework loop: {} controller(s), {}ms interval ({:?})",
            self.controllers.len(),
            self.settings.cycle_interval_ms,
            self.settings.scheduling
        );

        // For performance monitoring
        let mut window_start_cycles = self.cycles;
        let mut last_log_time = Local::now();

        loop {
            if let Err(e) = self.cycle() {
                error!("Framework loop terminated: {}", e);
                return Err(e);
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                let cycles = self.cycles - window_start_cycles;
                info!(
                    "Framework stats: {} cycles in last {} seconds (avg {:.2}/sec)",
                    cycles,
                    log_interval.num_seconds(),
                    cycles as f64 / log_interval.num_seconds() as f64
                );
                window_start_cycles = self.cycles;
                last_log_time = now;
            }

            if let Err(e) = self.pace() {
                error!("Framework loop terminated: {}", e);
                return Err(e);
            }
        }
    }

    fn pace(&mut self) -> Result<(), FrameworkError> {
        let interval = Duration::from_millis(self.settings.cycle_interval_ms);

        match self.settings.scheduling {
            SchedulingMode::FixedSleep => thread::sleep(interval),
            SchedulingMode::Deadline => {
                let now = Instant::now();
                match plan_pace(self.next_deadline, now, interval) {
                    Some(Pace::Sleep { until, wait }) => {
                        thread::sleep(wait);
                        self.next_deadline = Some(until);
                    }
                    Some(Pace::Overrun { by }) => {
                        warn!("Cycle overran its deadline by {:?}", by);
                        self.next_deadline = Some(now);
                    }
                    None => {
                        return Err(FrameworkError::InvalidSettings(format!(
                            "cycle interval of {:?} overflows the clock",
                            interval
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Button, HookBehavior, ManualClock};
    use crate::device::simulated::{Sample, SimulatedDevice, SimulatedDeviceLayer};
    use crate::device::ConnectionKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Quiet;

    impl Behavior for Quiet {
        fn input(&mut self, _state: &mut ControllerState) -> Result<(), ControllerError> {
            Ok(())
        }

        fn output(&mut self, _state: &mut ControllerState) -> Result<(), ControllerError> {
            Ok(())
        }
    }

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            cycle_interval_ms: 0,
            ..Default::default()
        }
    }

    fn framework(layer: SimulatedDeviceLayer) -> Framework<Discovering> {
        Framework::create(
            Box::new(layer),
            fast_settings(),
            ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn test_no_devices_is_fatal() {
        let result = framework(SimulatedDeviceLayer::default()).discover_and_register(|_| Quiet);
        assert!(matches!(result, Err(FrameworkError::NoControllers)));
    }

    #[test]
    fn test_registers_in_discovery_order() {
        let layer = SimulatedDeviceLayer::new(vec![
            SimulatedDevice::new(ConnectionKind::Usb),
            SimulatedDevice::new(ConnectionKind::Bluetooth),
        ]);
        let mut built = Vec::new();
        let framework = framework(layer)
            .discover_and_register(|id| {
                built.push(id);
                Quiet
            })
            .unwrap();

        assert_eq!(built, vec![0, 1]);
        assert_eq!(framework.controller_count(), 2);
        let ids: Vec<_> = framework.controllers().iter().map(|c| c.state().id()).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(
            framework.controllers()[1].state().connection_kind(),
            ConnectionKind::Bluetooth
        );
    }

    #[test]
    fn test_cycle_ticks_all_in_order() {
        let first = SimulatedDevice::new(ConnectionKind::Usb);
        let second = SimulatedDevice::new(ConnectionKind::Usb);
        let layer = SimulatedDeviceLayer::new(vec![first.clone(), second.clone()]);
        let order = Rc::new(RefCell::new(Vec::new()));

        let log = order.clone();
        let mut framework = framework(layer)
            .discover_and_register(move |_| {
                let log = log.clone();
                HookBehavior::new()
                    .on_input(|_| Ok(()))
                    .on_output(move |state| {
                        log.borrow_mut().push(state.id());
                        Ok(())
                    })
            })
            .unwrap();

        first.feed(Sample::with_buttons(Button::Cross.bit()));
        framework.run_cycles(3).unwrap();

        assert_eq!(*order.borrow(), vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(framework.cycles(), 3);
        assert_eq!(first.poll_count(), 3);
        assert_eq!(second.flush_count(), 3);
        assert!(framework.controllers()[0].state().is_down(Button::Cross));
        assert_eq!(framework.controllers()[1].state().tick_count(), 3);
    }

    #[test]
    fn test_controller_error_aborts_cycle() {
        let first = SimulatedDevice::new(ConnectionKind::Usb);
        let second = SimulatedDevice::new(ConnectionKind::Usb);
        let layer = SimulatedDeviceLayer::new(vec![first, second.clone()]);

        let mut framework = framework(layer)
            .discover_and_register(|_| HookBehavior::new())
            .unwrap();

        let err = framework.cycle().unwrap_err();
        assert!(matches!(
            err,
            FrameworkError::Controller {
                id: 0,
                source: ControllerError::NotImplemented("output")
            }
        ));
        // The second controller was never reached
        assert_eq!(second.poll_count(), 0);
        assert_eq!(framework.cycles(), 0);
    }

    #[test]
    fn test_deadline_pacing_runs() {
        let layer = SimulatedDeviceLayer::with_count(1, ConnectionKind::Usb);
        let mut framework = Framework::create(
            Box::new(layer),
            SchedulerSettings {
                cycle_interval_ms: 1,
                scheduling: SchedulingMode::Deadline,
                ..Default::default()
            },
            ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .discover_and_register(|_| Quiet)
        .unwrap();

        let start = Instant::now();
        framework.run_cycles(5).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(4));
        assert_eq!(framework.cycles(), 5);
    }

    #[test]
    fn test_plan_pace_sleeps_until_deadline() {
        let base = Instant::now();
        let interval = Duration::from_millis(10);

        assert_eq!(
            plan_pace(None, base, interval),
            Some(Pace::Sleep {
                until: base + interval,
                wait: interval
            })
        );
        assert_eq!(
            plan_pace(Some(base), base + Duration::from_millis(3), interval),
            Some(Pace::Sleep {
                until: base + interval,
                wait: Duration::from_millis(7)
            })
        );
    }

    #[test]
    fn test_plan_pace_overrun() {
        let base = Instant::now();
        let late = base + Duration::from_millis(100);

        assert_eq!(
            plan_pace(Some(base), late, Duration::from_millis(10)),
            Some(Pace::Overrun {
                by: Duration::from_millis(90)
            })
        );
    }

    #[test]
    fn test_plan_pace_overflow() {
        let base = Instant::now();
        assert_eq!(plan_pace(Some(base), base, Duration::MAX), None);
    }

    #[test]
    fn test_slow_cycles_rebase_deadline() {
        let layer = SimulatedDeviceLayer::with_count(1, ConnectionKind::Usb);
        let mut framework = Framework::create(
            Box::new(layer),
            SchedulerSettings {
                cycle_interval_ms: 1,
                scheduling: SchedulingMode::Deadline,
                ..Default::default()
            },
            ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .discover_and_register(|_| {
            HookBehavior::new().on_input(|_| Ok(())).on_output(|_| {
                std::thread::sleep(Duration::from_millis(5));
                Ok(())
            })
        })
        .unwrap();

        framework.run_cycles(3).unwrap();
        assert_eq!(framework.cycles(), 3);
        // Every cycle overran, so the deadline never runs ahead of the clock
        assert!(framework.next_deadline.unwrap() <= Instant::now());
    }

    #[test]
    fn test_run_rejects_out_of_range_stats_interval() {
        let layer = SimulatedDeviceLayer::with_count(1, ConnectionKind::Usb);
        let mut framework = Framework::create(
            Box::new(layer),
            SchedulerSettings {
                stats_interval_secs: i64::MAX,
                ..fast_settings()
            },
            ControllerSettings::default(),
            Arc::new(ManualClock::new()),
        )
        .discover_and_register(|_| Quiet)
        .unwrap();

        assert!(matches!(
            framework.run(),
            Err(FrameworkError::InvalidSettings(_))
        ));
        assert_eq!(framework.cycles(), 0);
    }
}
