// Timing, workspace and gait tuning constants
use std::time::Duration;

// Serial port for the SSC-32U servo controller
pub const SERVO_PORT: &str = "/dev/rfcomm0";
pub const SERVO_BAUDRATE: u32 = 9600;

// Base duration of one committed motion, before the speed multiplier
pub const MOTION_MS: u64 = 100;

// Default multiplier applied to every motion duration (10 -> 1s per motion)
pub const DEFAULT_SPEED: u64 = 10;

// Completion polling: interval, per-wait deadline, and how many times the
// wait is retried before the motion is declared lost
pub const DONE_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DONE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DONE_RETRIES: u32 = 2;

// Stance geometry: foot height below the body, and how far the body drops
// when sitting
pub const STANCE_Z: f64 = -50.0;
pub const SIT_RISE_MM: f64 = 30.0;

// Gait tuning (millimeters)
pub const STRIDE_MM: f64 = 20.0;
pub const LEG_LIFT_MM: f64 = 20.0;
pub const WEIGHT_SHIFT_MM: f64 = 20.0;
