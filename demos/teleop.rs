// Keyboard teleop: WASD shifts the body over the feet, T stand, G sit, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::Duration;
use tracing::info;

use spider_runtime::config::{SERVO_BAUDRATE, SERVO_PORT};
use spider_runtime::motor::{BodyDriver, ServoBus, Ssc32Bus};

const SHIFT_STEP_MM: f64 = 5.0;
const MAX_SHIFT_MM: f64 = 15.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let port = std::env::args().nth(1).unwrap_or_else(|| SERVO_PORT.to_string());

    info!("Opening servo bus on {}...", port);
    let bus = Ssc32Bus::open_with_baudrate(&port, SERVO_BAUDRATE)?;
    let mut body = BodyDriver::new(bus);
    body.set_speed(3);

    info!("Controls: WASD=shift body, T=stand, G=sit, Q=quit");
    body.stand_up()?;

    enable_raw_mode()?;
    let result = run_teleop(&mut body);
    disable_raw_mode()?;

    body.sit_down()?;
    result
}

fn run_teleop<B: ServoBus>(body: &mut BodyDriver<B>) -> Result<(), Box<dyn std::error::Error>> {
    // Accumulated body offset, clamped so the feet stay well inside the
    // reachable envelope.
    let mut dx = 0.0f64;
    let mut dy = 0.0f64;

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

        let (step_x, step_y) = match code {
            KeyCode::Char('w') => (0.0, SHIFT_STEP_MM),
            KeyCode::Char('s') => (0.0, -SHIFT_STEP_MM),
            KeyCode::Char('a') => (-SHIFT_STEP_MM, 0.0),
            KeyCode::Char('d') => (SHIFT_STEP_MM, 0.0),
            KeyCode::Char('t') => {
                body.stand_up()?;
                (dx, dy) = (0.0, 0.0);
                continue;
            }
            KeyCode::Char('g') => {
                body.sit_down()?;
                (dx, dy) = (0.0, 0.0);
                continue;
            }
            KeyCode::Char('q') | KeyCode::Esc => break,
            _ => continue,
        };

        let new_dx = (dx + step_x).clamp(-MAX_SHIFT_MM, MAX_SHIFT_MM);
        let new_dy = (dy + step_y).clamp(-MAX_SHIFT_MM, MAX_SHIFT_MM);
        if new_dx != dx || new_dy != dy {
            body.shift_body(new_dx - dx, new_dy - dy)?;
            (dx, dy) = (new_dx, new_dy);
            info!("body offset: ({:.0}, {:.0})mm", dx, dy);
        }
    }

    Ok(())
}
