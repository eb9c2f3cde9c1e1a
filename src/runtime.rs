// Command bridge: Zenoh topics in, board commands out
//
// Each tick drains every pending motor/LED command and hands it to the bus
// thread, then publishes the latest motor positions and health. The bus
// thread owns both drivers and applies commands in arrival order, so the
// drivers never see concurrent callers and a long rotation never stalls the
// publishing loop.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::spawn_blocking;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::{LOOP_HZ, TOPIC_CMD_LED, TOPIC_CMD_MOTOR, TOPIC_HEALTH, TOPIC_STATE_MOTOR};
use crate::error::Result;
use crate::led::LedDriver;
use crate::messages::{LedCommand, MotorCommand, MotorSnapshot, RuntimeHealth};
use crate::motor::MotorDriver;
use crate::protocol::Bus;

/// Work handed to the bus thread
#[derive(Debug)]
pub enum Request {
    Motor(MotorCommand),
    Led(LedCommand),
}

/// State published after every applied command
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub snapshots: Vec<MotorSnapshot>,
    pub health: RuntimeHealth,
}

pub struct Runtime<M, L> {
    motors: MotorDriver<M>,
    leds: LedDriver<L>,
    health: RuntimeHealth,
}

impl<M: Bus, L: Bus> Runtime<M, L> {
    pub fn new(motors: MotorDriver<M>, leds: LedDriver<L>) -> Self {
        Self {
            motors,
            leds,
            health: RuntimeHealth::Ok,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn motors(&self) -> &MotorDriver<M> {
        &self.motors
    }

    pub fn leds(&self) -> &LedDriver<L> {
        &self.leds
    }

    fn execute(&mut self, cmd: &MotorCommand) -> Result<()> {
        match *cmd {
            MotorCommand::RotateSteps { device, steps } => {
                self.motors.rotate_steps_relative(device, steps)
            }
            MotorCommand::RotateDegrees { device, degrees } => {
                self.motors.rotate_degrees_relative(device, degrees)
            }
            MotorCommand::MoveTo { device, degrees } => {
                self.motors.rotate_degrees_absolute(device, degrees)
            }
            MotorCommand::Power { device, power } => self.motors.set_power(device, power),
            MotorCommand::Zero { device } => self.motors.zero_position(device),
        }
    }

    /// Apply a motor command; failures are logged and mark health
    pub fn on_motor_command(&mut self, cmd: MotorCommand) {
        info!("Received motor command: {:?}", &cmd);
        match self.execute(&cmd) {
            Ok(()) => self.health = RuntimeHealth::Ok,
            Err(e) => {
                warn!("Motor command {:?} failed: {}", cmd, e);
                self.health = RuntimeHealth::CommandFailed;
            }
        }
    }

    pub fn on_led_command(&mut self, cmd: LedCommand) {
        info!("Received LED command for {} LEDs", cmd.entries.len());
        match self.leds.set_brightness_multi(&cmd.as_pairs()) {
            Ok(()) => self.health = RuntimeHealth::Ok,
            Err(e) => {
                warn!("LED command failed: {}", e);
                self.health = RuntimeHealth::CommandFailed;
            }
        }
    }

    /// Position of every motor as it stands now
    pub fn snapshots(&self) -> Vec<MotorSnapshot> {
        (0..self.motors.num_devices())
            .filter_map(|device| {
                Some(MotorSnapshot {
                    device,
                    position: self.motors.position(device).ok()?,
                    degrees: self.motors.current_degrees(device).ok()?,
                })
            })
            .collect()
    }

    pub fn report(&self) -> Report {
        Report {
            snapshots: self.snapshots(),
            health: self.health,
        }
    }

    /// Apply requests until every sender is gone, publishing a report after each
    ///
    /// Blocks on the channel and on the bus; run it off the async workers.
    pub fn serve(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        reports: watch::Sender<Report>,
    ) {
        while let Some(request) = requests.blocking_recv() {
            match request {
                Request::Motor(cmd) => self.on_motor_command(cmd),
                Request::Led(cmd) => self.on_led_command(cmd),
            }
            reports.send_replace(self.report());
        }
        info!("Command channel closed, bus thread exiting");
    }
}

pub async fn run<M, L>(
    motors: MotorDriver<M>,
    leds: LedDriver<L>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    M: Bus + Send + 'static,
    L: Bus + Send + 'static,
{
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_motor = session.declare_subscriber(TOPIC_CMD_MOTOR).await?;
    let sub_led = session.declare_subscriber(TOPIC_CMD_LED).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE_MOTOR).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let runtime = Runtime::new(motors, leds);
    let (report_tx, reports) = watch::channel(runtime.report());
    let (requests, request_rx) = mpsc::unbounded_channel();
    let bus_thread = spawn_blocking(move || runtime.serve(request_rx, report_tx));
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Runtime started: {}Hz loop", LOOP_HZ);
    info!("Subscribed to: {}, {}", TOPIC_CMD_MOTOR, TOPIC_CMD_LED);
    info!("Publishing to: {}, {}", TOPIC_STATE_MOTOR, TOPIC_HEALTH);

    loop {
        tick.tick().await;
        if bus_thread.is_finished() {
            return Err("bus thread stopped".into());
        }

        // 1. Forward pending commands to the bus thread (non-blocking)
        while let Ok(Some(sample)) = sub_motor.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<MotorCommand>(&payload) {
                Ok(cmd) => requests
                    .send(Request::Motor(cmd))
                    .map_err(|_| "bus thread stopped")?,
                Err(e) => warn!("Failed to parse motor command: {}", e),
            }
        }
        while let Ok(Some(sample)) = sub_led.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<LedCommand>(&payload) {
                Ok(cmd) => requests
                    .send(Request::Led(cmd))
                    .map_err(|_| "bus thread stopped")?,
                Err(e) => warn!("Failed to parse LED command: {}", e),
            }
        }

        let report = reports.borrow().clone();

        // 2. Publish motor positions
        let state_json = serde_json::to_string(&report.snapshots)?;
        pub_state.put(state_json).await?;

        // 3. Publish health
        let health_json = serde_json::to_string(&report.health)?;
        pub_health.put(health_json).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedConfig, MotorConfig};
    use crate::messages::LedEntry;
    use crate::protocol::DryRunBus;

    fn runtime() -> Runtime<DryRunBus, DryRunBus> {
        let motors = MotorDriver::new(DryRunBus::new(), &MotorConfig::default()).unwrap();
        let leds = LedDriver::new(DryRunBus::new(), &LedConfig::default()).unwrap();
        Runtime::new(motors, leds)
    }

    #[test]
    fn test_motor_commands_update_snapshots() {
        let mut rt = runtime();
        rt.on_motor_command(MotorCommand::RotateSteps {
            device: 1,
            steps: 50,
        });
        rt.on_motor_command(MotorCommand::RotateDegrees {
            device: 0,
            degrees: 18.0,
        });
        assert_eq!(rt.health(), RuntimeHealth::Ok);

        let snaps = rt.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].position, 10);
        assert_eq!(snaps[1].position, 50);
        assert!((snaps[1].degrees - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_command_marks_health() {
        let mut rt = runtime();
        rt.on_motor_command(MotorCommand::Power {
            device: 5,
            power: 0.5,
        });
        assert_eq!(rt.health(), RuntimeHealth::CommandFailed);

        rt.on_motor_command(MotorCommand::Zero { device: 0 });
        assert_eq!(rt.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_runaway_rotation_marks_health() {
        let mut rt = runtime();
        rt.on_motor_command(MotorCommand::RotateSteps {
            device: 0,
            steps: 10,
        });
        rt.on_motor_command(MotorCommand::RotateSteps {
            device: 0,
            steps: i64::MAX,
        });
        assert_eq!(rt.health(), RuntimeHealth::CommandFailed);
        assert_eq!(rt.snapshots()[0].position, 10);
    }

    #[test]
    fn test_serve_reports_after_each_request() {
        let rt = runtime();
        let (report_tx, reports) = watch::channel(rt.report());
        let (requests, request_rx) = mpsc::unbounded_channel();
        requests
            .send(Request::Motor(MotorCommand::RotateSteps {
                device: 1,
                steps: -40,
            }))
            .unwrap();
        requests
            .send(Request::Led(LedCommand {
                entries: vec![LedEntry {
                    led: 0,
                    brightness: 3.0,
                }],
            }))
            .unwrap();
        drop(requests);

        rt.serve(request_rx, report_tx);

        let report = reports.borrow().clone();
        assert_eq!(report.snapshots[1].position, -40);
        assert_eq!(report.health, RuntimeHealth::CommandFailed);
    }

    #[tokio::test]
    async fn test_bus_thread_publishes_reports() {
        let rt = runtime();
        let (report_tx, mut reports) = watch::channel(rt.report());
        let (requests, request_rx) = mpsc::unbounded_channel();
        let bus_thread = spawn_blocking(move || rt.serve(request_rx, report_tx));

        requests
            .send(Request::Motor(MotorCommand::RotateSteps {
                device: 0,
                steps: 25,
            }))
            .unwrap();
        reports.changed().await.unwrap();
        assert_eq!(reports.borrow().snapshots[0].position, 25);

        drop(requests);
        bus_thread.await.unwrap();
    }

    #[test]
    fn test_led_command() {
        let mut rt = runtime();
        rt.on_led_command(LedCommand {
            entries: vec![LedEntry {
                led: 4,
                brightness: 0.75,
            }],
        });
        assert_eq!(rt.health(), RuntimeHealth::Ok);
        assert_eq!(rt.leds().get_brightness(4).unwrap(), 0.75);

        rt.on_led_command(LedCommand {
            entries: vec![LedEntry {
                led: 4,
                brightness: 2.0,
            }],
        });
        assert_eq!(rt.health(), RuntimeHealth::CommandFailed);
        assert_eq!(rt.leds().get_brightness(4).unwrap(), 0.75);
    }
}
