use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use moveframe::controller::{
    Behavior, Button, Color, ControllerError, ControllerState, EventKind, SystemClock,
};
use moveframe::device::DeviceLayer;
use moveframe::framework::Framework;
use moveframe::FrameworkConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to <config dir>/moveframe/config.toml)
    config: Option<PathBuf>,

    /// Overrides `log_level` from the config file
    #[arg(long)]
    log_level: Option<String>,
}

/// Jerk flash length, in ticks
const FLASH_TICKS: u64 = 30;

/// Demo behavior: face buttons pick the LED color, a jerk flashes white and
/// holding MOVE for a second turns the LED off.
#[derive(Default)]
struct Lightshow {
    base: Option<Color>,
    flash_until: u64,
}

impl Behavior for Lightshow {
    fn input(&mut self, state: &mut ControllerState) -> Result<(), ControllerError> {
        let picks = [
            (Button::Cross, Color::Byte(0, 0, 255)),
            (Button::Circle, Color::Byte(255, 0, 0)),
            (Button::Square, Color::Byte(255, 0, 255)),
            (Button::Triangle, Color::Byte(0, 255, 0)),
        ];
        for (button, color) in picks {
            if state.was_pressed(button) {
                info!("Controller {}: {:?} -> {:?}", state.id(), button, color);
                self.base = Some(color);
            }
        }

        if state.is_down(Button::Move) && state.held_duration(Button::Move) > 1.0 {
            self.base = None;
        }
        Ok(())
    }

    fn output(&mut self, state: &mut ControllerState) -> Result<(), ControllerError> {
        let tick = state.tick_count();
        if tick < self.flash_until {
            let fade = (self.flash_until - tick) as f32 / FLASH_TICKS as f32;
            state.set_color(Color::Float(fade, fade, fade));
        } else {
            state.set_color(self.base.unwrap_or(Color::OFF));
        }
        Ok(())
    }

    fn on_event(&mut self, kind: EventKind, state: &mut ControllerState) -> Result<(), ControllerError> {
        if kind == EventKind::Jerk {
            self.flash_until = state.tick_count() + FLASH_TICKS;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup()?;

    // Config loading logs through a default-level subscriber until the real one is up
    let mut config = tracing::subscriber::with_default(subscriber(Level::INFO), || {
        FrameworkConfig::load(args.config.as_deref())
    })?;
    if let Some(level) = args.log_level {
        config.log_level = level;
        config.validate()?;
    }
    setup_logging_env(&config)?;

    let backend = create_backend(&config)?;
    let framework = Framework::create(
        backend,
        config.scheduler.clone(),
        config.controller.clone(),
        Arc::new(SystemClock),
    );

    let mut framework = framework
        .discover_and_register(|_| Lightshow::default())
        .map_err(|e| eyre!("Failed to register controllers: {}", e))?;

    info!("Success");
    framework.run()?;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn subscriber(level: Level) -> FmtSubscriber {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .finish()
}

fn setup_logging_env(config: &FrameworkConfig) -> Result<()> {
    let level = config.log_level.parse().unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(subscriber(level))?;
    Ok(())
}

#[cfg(feature = "gilrs-backend")]
fn create_backend(_config: &FrameworkConfig) -> Result<Box<dyn DeviceLayer>> {
    use moveframe::device::gilrs_backend::GilrsDeviceLayer;

    Ok(Box::new(GilrsDeviceLayer::new()?))
}

#[cfg(not(feature = "gilrs-backend"))]
fn create_backend(config: &FrameworkConfig) -> Result<Box<dyn DeviceLayer>> {
    use moveframe::device::simulated::{Sample, SimulatedDevice, SimulatedDeviceLayer};
    use moveframe::device::ConnectionKind;
    use moveframe::Vector3;

    info!(
        "No hardware backend compiled in, simulating {} controller(s)",
        config.simulation.devices
    );

    // One second at rest, a sideways shake, then a CROSS press
    let rest = Sample::with_acceleration(Vector3::new(0.0, 0.0, 4000.0));
    let mut script = vec![rest; 100];
    script.extend(
        [6000.0, 12000.0, 6000.0, 0.0]
            .into_iter()
            .map(|x| Sample::with_acceleration(Vector3::new(x, 0.0, 4000.0))),
    );
    script.extend(std::iter::repeat(rest).take(50));
    script.extend(std::iter::repeat(Sample { buttons: Button::Cross.bit(), ..rest }).take(20));

    let devices = (0..config.simulation.devices)
        .map(|_| {
            let device = SimulatedDevice::new(ConnectionKind::Usb);
            device.set_loop(script.clone());
            device
        })
        .collect();
    Ok(Box::new(SimulatedDeviceLayer::new(devices)))
}
