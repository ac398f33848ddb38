use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use spider_runtime::config::{SERVO_BAUDRATE, SERVO_PORT, STANCE_Z, WEIGHT_SHIFT_MM};
use spider_runtime::motor::{
    ALL_LEGS, BodyDriver, BodyError, LegGeometry, LegPose, Ssc32Bus, kinematics,
};

#[derive(Parser)]
#[command(name = "spider-runtime", about = "Quadruped gait runtime for SSC-32U servo boards")]
struct Cli {
    /// Serial port of the SSC-32U board
    #[arg(long, default_value = SERVO_PORT)]
    port: String,

    /// Serial baudrate
    #[arg(long, default_value_t = SERVO_BAUDRATE)]
    baud: u32,

    /// Motion duration multiplier (higher = slower)
    #[arg(long, default_value_t = spider_runtime::config::DEFAULT_SPEED)]
    speed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stand up into the canonical stance
    Stand,
    /// Lower the body onto the ground
    Sit,
    /// Lift each leg in turn (stability check)
    Wave,
    /// Walk forward
    Walk {
        /// Number of gait cycles
        #[arg(long, default_value_t = 3)]
        cycles: u32,
    },
    /// Shift the body relative to the feet, then back
    Shift {
        #[arg(long, default_value_t = 0.0)]
        dx: f64,
        #[arg(long, default_value_t = 0.0)]
        dy: f64,
    },
    /// Print the solved stance joint angles as JSON (no hardware needed)
    Pose,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run() {
        eprintln!("spider-runtime error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Pose is pure computation; dispatch it before touching the serial port.
    let command = match cli.command {
        Command::Pose => return print_stance_pose(),
        command => command,
    };

    info!("opening servo bus on {} ({} baud)", cli.port, cli.baud);
    let bus = Ssc32Bus::open_with_baudrate(&cli.port, cli.baud)?;
    let mut body = BodyDriver::new(bus);
    body.set_speed(cli.speed);

    let stop = body.stop_flag();
    ctrlc::set_handler(move || {
        stop.store(true, std::sync::atomic::Ordering::Relaxed);
    })?;

    match command {
        Command::Stand => body.stand_up()?,
        Command::Sit => body.sit_down()?,
        Command::Wave => {
            body.stand_up()?;
            for leg in ALL_LEGS {
                body.shift_weight_off_leg(leg, WEIGHT_SHIFT_MM)?;
                body.leg_up(leg, 40.0)?;
                body.leg_down(leg)?;
                body.stand_up()?;
            }
            body.sit_down()?;
        }
        Command::Walk { cycles } => match body.walk(cycles) {
            Ok(travelled) => info!("net forward travel: {:.0}mm", travelled),
            Err(BodyError::Cancelled) => info!("walk cancelled, back at stance"),
            Err(e) => return Err(e.into()),
        },
        Command::Shift { dx, dy } => {
            body.stand_up()?;
            body.shift_body(dx, dy)?;
            body.shift_body(-dx, -dy)?;
        }
        // Already dispatched above, before the bus was opened.
        Command::Pose => {}
    }

    Ok(())
}

/// Solve the stance pose for both leg classes and dump the result.
fn print_stance_pose() -> Result<(), Box<dyn std::error::Error>> {
    let geometry = LegGeometry::default();
    let xy = geometry.stance_xy();
    let pose = LegPose::new(xy, xy, STANCE_Z);

    let normal = kinematics::solve_leg_angles(pose, geometry, kinematics::Mirror::Normal)?;
    let mirrored = kinematics::solve_leg_angles(pose, geometry, kinematics::Mirror::Mirrored)?;

    let out = serde_json::json!({
        "stance_target_mm": pose,
        "normal_legs": normal,
        "mirrored_legs": mirrored,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_dump_needs_no_hardware() {
        // The pose subcommand must work with no serial port present.
        print_stance_pose().unwrap();
    }
}
