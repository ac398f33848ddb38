// Runtime for a four-legged SSC-32U based walking platform: per-leg inverse
// kinematics plus a statically stable diagonal gait, committed to the servo
// board as atomic, interpolated batch moves.

pub mod config;
pub mod motor;
