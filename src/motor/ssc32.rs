// SSC-32U servo controller serial protocol implementation
//
// The board speaks a plain ASCII protocol:
//   "#<ch>P<pulse> ... T<ms>\r"  group move with linear interpolation
//   "Q\r"                        query movement status, answers '+' or '.'
//   "VER\r"                      firmware version string

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default serial configuration for the SSC-32U board
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Number of addressable servo channels on the board
pub const CHANNEL_COUNT: u8 = 32;

/// Pulse width limits in microseconds (board hard limits)
const MIN_PULSE_US: u16 = 500;
const MAX_PULSE_US: u16 = 2500;
const CENTER_PULSE_US: f64 = 1500.0;

/// Microseconds of pulse width per degree (2000us span over 180 degrees)
const US_PER_DEG: f64 = 2000.0 / 180.0;

/// Error types for servo bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel {channel} out of range (0..{limit})")]
    BadChannel { channel: u8, limit: u8 },

    #[error("unexpected status byte 0x{byte:02X} from board")]
    BadResponse { byte: u8 },

    #[error("board did not report motion complete within {waited_ms}ms")]
    Timeout { waited_ms: u64 },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Multi-channel servo bus: queue per-channel angle targets, commit them as
/// one interpolated batch, and poll for motion completion.
///
/// The gait coordinator only depends on this trait, so it can run against a
/// recorded mock in tests instead of real hardware.
pub trait ServoBus {
    /// Queue one channel's target angle (degrees, -90..90, 0 = center).
    fn set(&mut self, channel: u8, degrees: f64) -> Result<()>;

    /// Transmit all queued targets with linear interpolation over the given
    /// duration and start the motion.
    fn commit(&mut self, duration_ms: u64) -> Result<()>;

    /// Whether the last committed motion has finished.
    fn poll_done(&mut self) -> Result<bool>;

    /// Block until the last commit finishes, polling at a bounded interval.
    /// Fails with `BusError::Timeout` when the deadline passes.
    fn wait_done(&mut self, timeout: Duration, poll_interval: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.poll_done()? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(BusError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            sleep(poll_interval);
        }
    }
}

/// Convert a centered angle in degrees to a board pulse width, clamped to
/// the board's hard limits.
pub fn degrees_to_pulse(degrees: f64) -> u16 {
    let pulse = (CENTER_PULSE_US + degrees * US_PER_DEG).round();
    (pulse as i32).clamp(MIN_PULSE_US as i32, MAX_PULSE_US as i32) as u16
}

/// Render the group move command for a set of (channel, pulse) targets.
fn format_move(targets: &[(u8, u16)], duration_ms: u64) -> String {
    let mut cmd = String::new();
    for &(channel, pulse) in targets {
        cmd.push_str(&format!("#{}P{} ", channel, pulse));
    }
    cmd.push_str(&format!("T{}\r", duration_ms));
    cmd
}

/// SSC-32U board on a serial port
pub struct Ssc32Bus {
    port: Box<dyn SerialPort>,
    pending: Vec<(u8, u16)>,
}

impl Ssc32Bus {
    /// Open a new connection to the board
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            pending: Vec::new(),
        })
    }

    fn write_command(&mut self, cmd: &str) -> Result<()> {
        trace!("tx: {:?}", cmd);
        self.port.write_all(cmd.as_bytes())?;
        self.port.flush()?;
        Ok(())
    }

    /// Query the firmware version string (preflight check that the board is
    /// actually there and talking).
    pub fn version(&mut self) -> Result<String> {
        self.write_command("VER\r")?;
        let mut buf = [0u8; 64];
        let n = self.port.read(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
    }
}

impl ServoBus for Ssc32Bus {
    fn set(&mut self, channel: u8, degrees: f64) -> Result<()> {
        if channel >= CHANNEL_COUNT {
            return Err(BusError::BadChannel {
                channel,
                limit: CHANNEL_COUNT,
            });
        }
        let pulse = degrees_to_pulse(degrees);
        // Last write wins if the same channel is queued twice.
        if let Some(entry) = self.pending.iter_mut().find(|(ch, _)| *ch == channel) {
            entry.1 = pulse;
        } else {
            self.pending.push((channel, pulse));
        }
        Ok(())
    }

    fn commit(&mut self, duration_ms: u64) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let cmd = format_move(&self.pending, duration_ms);
        debug!(
            "committing {} channels over {}ms",
            self.pending.len(),
            duration_ms
        );
        self.write_command(&cmd)?;
        self.pending.clear();
        Ok(())
    }

    fn poll_done(&mut self) -> Result<bool> {
        self.write_command("Q\r")?;
        let mut status = [0u8; 1];
        self.port.read_exact(&mut status)?;
        match status[0] {
            b'.' => Ok(true),
            b'+' => Ok(false),
            byte => Err(BusError::BadResponse { byte }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degrees_to_pulse() {
        assert_eq!(degrees_to_pulse(0.0), 1500);
        assert_eq!(degrees_to_pulse(90.0), 2500);
        assert_eq!(degrees_to_pulse(-90.0), 500);
        assert_eq!(degrees_to_pulse(45.0), 2000);
        assert_eq!(degrees_to_pulse(-45.0), 1000);
    }

    #[test]
    fn test_degrees_to_pulse_clamps_to_board_limits() {
        assert_eq!(degrees_to_pulse(180.0), 2500);
        assert_eq!(degrees_to_pulse(-180.0), 500);
    }

    #[test]
    fn test_format_move() {
        let cmd = format_move(&[(2, 1500), (13, 2000)], 1000);
        assert_eq!(cmd, "#2P1500 #13P2000 T1000\r");
    }

    #[test]
    fn test_format_move_single_channel() {
        let cmd = format_move(&[(31, 750)], 250);
        assert_eq!(cmd, "#31P750 T250\r");
    }
}
