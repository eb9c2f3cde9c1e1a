use std::io;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use planetproj::config::Config;
use planetproj::protocol::{Bus, DryRunBus};
use planetproj::{LedDriver, MotorDriver, runtime, watchdog};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "planetproj", about = "Drive the projector's LED and motor boards")]
struct Cli {
    /// JSON config file (defaults are used for anything it omits)
    #[arg(long)]
    config: Option<PathBuf>,

    /// I2C device, e.g. /dev/i2c-1
    #[arg(long)]
    bus: Option<String>,

    /// Log frames instead of writing them
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve motor/LED commands over Zenoh
    Run,
    /// Check which boards answer on the bus
    Watchdog,
    /// Rotate one motor
    Rotate {
        #[arg(long)]
        device: usize,
        #[command(flatten)]
        amount: Amount,
    },
    /// Set coil power of one motor
    Power {
        #[arg(long)]
        device: usize,
        /// Power in [0, 1]
        #[arg(long)]
        level: f64,
    },
    /// Set LED brightness, e.g. `brightness 0=1.0 7=0.25`
    Brightness {
        #[arg(value_parser = parse_led_entry, required = true)]
        entries: Vec<(usize, f64)>,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Amount {
    /// Relative move in motor steps
    #[arg(long, allow_hyphen_values = true)]
    steps: Option<i64>,
    /// Relative move in axis degrees
    #[arg(long, allow_hyphen_values = true)]
    degrees: Option<f64>,
    /// Absolute axis angle in degrees
    #[arg(long, allow_hyphen_values = true)]
    to: Option<f64>,
}

fn parse_led_entry(s: &str) -> Result<(usize, f64), String> {
    let (led, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LED=VALUE, got '{}'", s))?;
    let led = led.parse::<usize>().map_err(|e| format!("bad LED index '{}': {}", led, e))?;
    let value = value
        .parse::<f64>()
        .map_err(|e| format!("bad brightness '{}': {}", value, e))?;
    Ok((led, value))
}

fn open_bus(config: &Config) -> Result<Box<dyn Bus + Send>, BoxError> {
    if config.dry_run {
        return Ok(Box::new(DryRunBus::new()));
    }
    open_i2c(&config.bus)
}

#[cfg(target_os = "linux")]
fn open_i2c(path: &str) -> Result<Box<dyn Bus + Send>, BoxError> {
    info!("Opening I2C bus {}", path);
    let dev = linux_embedded_hal::I2cdev::new(path)
        .map_err(|e| io::Error::other(format!("{}: {}", path, e)))?;
    Ok(Box::new(planetproj::protocol::I2cBus::new(dev)))
}

#[cfg(not(target_os = "linux"))]
fn open_i2c(path: &str) -> Result<Box<dyn Bus + Send>, BoxError> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot open {}: I2C buses need Linux, use --dry-run", path),
    )
    .into())
}

/// Merge the config file with command-line overrides
fn resolve_config(cli: &Cli) -> Result<Config, BoxError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bus) = &cli.bus {
        config.bus = bus.clone();
    }
    config.dry_run |= cli.dry_run;
    if config.dry_run {
        info!("Running in dry-run mode");
    }
    Ok(config)
}

async fn execute(cli: Cli) -> Result<(), BoxError> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Run => {
            let motors = MotorDriver::new(open_bus(&config)?, &config.motor)?;
            let leds = LedDriver::new(open_bus(&config)?, &config.led)?;
            runtime::run(motors, leds).await?;
        }
        Command::Watchdog => {
            let mut bus = open_bus(&config)?;
            let report = watchdog::check_slaves(&mut bus, &config.slaves())?;
            let dead = report.iter().filter(|s| !s.is_alive()).count();
            info!("{} of {} slaves alive", report.len() - dead, report.len());
        }
        Command::Rotate { device, amount } => {
            let mut motors = MotorDriver::new(open_bus(&config)?, &config.motor)?;
            if let Some(steps) = amount.steps {
                motors.rotate_steps_relative(device, steps)?;
            } else if let Some(degrees) = amount.degrees {
                motors.rotate_degrees_relative(device, degrees)?;
            } else if let Some(target) = amount.to {
                motors.rotate_degrees_absolute(device, target)?;
            }
            info!(
                "Motor {} at step {} ({:.3} deg)",
                device,
                motors.position(device)?,
                motors.current_degrees(device)?
            );
        }
        Command::Power { device, level } => {
            let mut motors = MotorDriver::new(open_bus(&config)?, &config.motor)?;
            motors.set_power(device, level)?;
        }
        Command::Brightness { entries } => {
            let mut leds = LedDriver::new(open_bus(&config)?, &config.led)?;
            leds.set_brightness_multi(&entries)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = execute(Cli::parse()).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_dry_run_announced_once_for_two_buses() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let cli = Cli::parse_from(["planetproj", "--dry-run", "run"]);
        tracing::subscriber::with_default(subscriber, || {
            let config = resolve_config(&cli).unwrap();
            let motors = open_bus(&config).unwrap();
            let leds = open_bus(&config).unwrap();
            assert!(motors.is_dry_run() && leds.is_dry_run());
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logs.matches("Running in dry-run mode").count(), 1);
    }

    #[test]
    fn test_bus_flag_overrides_config() {
        let cli = Cli::parse_from(["planetproj", "--bus", "/dev/i2c-3", "watchdog"]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.bus, "/dev/i2c-3");
        assert!(!config.dry_run);
    }
}
