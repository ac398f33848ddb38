// Motor control module for the four-legged spider platform
//
// Provides:
// - Per-leg inverse kinematics (foot-tip target -> joint angles)
// - SSC-32U servo controller serial protocol
// - High-level body driver (stance, weight shifting, walking gait)

mod driver;
pub mod kinematics;
pub mod ssc32;

pub use driver::{ALL_LEGS, BodyDriver, BodyError, Leg, LegState};
pub use kinematics::{JointAngles, KinematicsError, LegGeometry, LegPose, Mirror};
pub use ssc32::{BusError, ServoBus, Ssc32Bus};
