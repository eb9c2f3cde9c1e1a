// Keyboard jog: A/D step motor 1, J/L step motor 2, R/F step size,
// 0 zero both positions, Q quit
//
// Needs the runtime running: cargo run -- run   (add --dry-run without hardware)
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use planetproj::config::TOPIC_CMD_MOTOR;
use planetproj::messages::MotorCommand;
use std::time::Duration;
use tracing::info;

const STEP_SIZES: [i64; 4] = [1, 10, 100, 1000]; // motor steps per key press

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_MOTOR).await?;

    info!("Controls: A/D=motor 1, J/L=motor 2, R/F=step size, 0=zero, Q=quit");
    print_step(0);

    enable_raw_mode()?;
    let result = run_jog(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_jog(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut step_idx: usize = 0;

    loop {
        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind, .. }) = event::read()? else {
            continue;
        };
        if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
            continue;
        }

        let step = STEP_SIZES[step_idx];
        let cmd = match code {
            KeyCode::Char('a') => Some(MotorCommand::RotateSteps { device: 0, steps: -step }),
            KeyCode::Char('d') => Some(MotorCommand::RotateSteps { device: 0, steps: step }),
            KeyCode::Char('j') => Some(MotorCommand::RotateSteps { device: 1, steps: -step }),
            KeyCode::Char('l') => Some(MotorCommand::RotateSteps { device: 1, steps: step }),
            KeyCode::Char('0') => {
                for device in 0..2 {
                    publish(publisher, &MotorCommand::Zero { device }).await?;
                }
                None
            }
            KeyCode::Char('r') => {
                step_idx = (step_idx + 1).min(STEP_SIZES.len() - 1);
                print_step(step_idx);
                None
            }
            KeyCode::Char('f') => {
                step_idx = step_idx.saturating_sub(1);
                print_step(step_idx);
                None
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => None,
        };

        if let Some(cmd) = cmd {
            publish(publisher, &cmd).await?;
        }
    }

    Ok(())
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: &MotorCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(cmd)?).await?;
    Ok(())
}

fn print_step(idx: usize) {
    info!("Step size: {} steps", STEP_SIZES[idx]);
}
