// Leg inverse kinematics for the 3-DOF spider legs (coxa, femur, tibia).
// Converts a body-frame foot-tip target (x, y, z) into joint angles.

use serde::Serialize;

/// Default leg segment lengths in millimeters (identical across all four legs)
pub const COXA_LEN: f64 = 24.0;
pub const FEMUR_LEN: f64 = 38.0;
pub const TIBIA_LEN: f64 = 80.0;

/// Horizontal workspace bound: x and y must stay within [0, WORKSPACE_MAX] mm
pub const WORKSPACE_MAX: f64 = 100.0;

/// Tolerance on inverse-cosine domain: arguments within this slack of +/-1
/// are rounding artifacts and get clamped, anything further out is a real
/// reachability violation.
pub const DOMAIN_EPS: f64 = 1e-6;

/// Segment lengths for one leg's kinematic chain, in millimeters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegGeometry {
    pub coxa_mm: f64,
    pub femur_mm: f64,
    pub tibia_mm: f64,
}

impl Default for LegGeometry {
    fn default() -> Self {
        Self {
            coxa_mm: COXA_LEN,
            femur_mm: FEMUR_LEN,
            tibia_mm: TIBIA_LEN,
        }
    }
}

impl LegGeometry {
    /// Horizontal distance of the canonical stance target from the body mount
    pub fn stance_xy(&self) -> f64 {
        self.coxa_mm + 0.55 * self.femur_mm
    }
}

/// Whether a leg is mounted on the mirrored side of the body.
///
/// Legs are structurally identical but mounted pointing in opposite
/// directions, so the same (x, y, z) convention needs sign-flipped coxa and
/// femur angles on the mirrored side to swing outward symmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    Normal,
    Mirrored,
}

/// Foot-tip target in the leg's own body-relative frame (mm).
/// x and y point outward from the body corner, z is up (negative = below body).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LegPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LegPose {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Solved joint angles in degrees, before the per-servo offset transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JointAngles {
    pub coxa_deg: f64,
    pub femur_deg: f64,
    pub tibia_deg: f64,
}

/// Error types for the IK solver
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KinematicsError {
    #[error(
        "target ({x:.1}, {y:.1}, {z:.1}) out of reach: \
         distance {reach:.1}mm outside [{min:.1}, {max:.1}]mm"
    )]
    OutOfReach {
        x: f64,
        y: f64,
        z: f64,
        reach: f64,
        min: f64,
        max: f64,
    },

    #[error("target ({x:.1}, {y:.1}) outside workspace [0, {limit:.0}]mm")]
    InvalidPose { x: f64, y: f64, limit: f64 },
}

pub type Result<T> = std::result::Result<T, KinematicsError>;

/// Clamp an inverse-cosine argument to [-1, 1], but only within DOMAIN_EPS.
/// Returns None when the argument is genuinely out of domain.
fn clamp_cos(arg: f64) -> Option<f64> {
    if arg.abs() <= 1.0 {
        Some(arg)
    } else if arg.abs() <= 1.0 + DOMAIN_EPS {
        Some(arg.signum())
    } else {
        None
    }
}

/// Solve one leg's joint angles for a foot-tip target.
///
/// Two-link planar IK via the law of cosines, with the coxa acting as a
/// rotating base: the femur/tibia pair is solved in the vertical plane
/// through the target, the coxa angle is just atan2 in the horizontal plane.
pub fn solve_leg_angles(
    pose: LegPose,
    geometry: LegGeometry,
    mirror: Mirror,
) -> Result<JointAngles> {
    if !(0.0..=WORKSPACE_MAX).contains(&pose.x) || !(0.0..=WORKSPACE_MAX).contains(&pose.y) {
        return Err(KinematicsError::InvalidPose {
            x: pose.x,
            y: pose.y,
            limit: WORKSPACE_MAX,
        });
    }

    let femur = geometry.femur_mm;
    let tibia = geometry.tibia_mm;

    // Full horizontal distance from the body mount to the target.
    let xy_total = pose.x.hypot(pose.y);

    // Horizontal reach from the femur pivot (end of the coxa) to the target.
    let xy_reach = xy_total - geometry.coxa_mm;

    // Absolute distance from the femur pivot to the foot tip. This gives a
    // triangle with sides [femur, tibia, reach].
    let reach = xy_reach.hypot(pose.z);

    let min_reach = (femur - tibia).abs();
    let max_reach = femur + tibia;

    // Femur-tibia included angle, law of cosines.
    let cos_tibia = (femur * femur + tibia * tibia - reach * reach) / (2.0 * femur * tibia);
    // Opening angle of the femur against the pivot-to-toe line.
    let cos_femur = (femur * femur - tibia * tibia + reach * reach) / (2.0 * femur * reach);

    let (cos_tibia, cos_femur) = match (clamp_cos(cos_tibia), clamp_cos(cos_femur)) {
        (Some(t), Some(f)) => (t, f),
        _ => {
            return Err(KinematicsError::OutOfReach {
                x: pose.x,
                y: pose.y,
                z: pose.z,
                reach,
                min: min_reach,
                max: max_reach,
            });
        }
    };

    let tibia_rad = cos_tibia.acos();
    // Femur elevation: angle up from horizontal plus the triangle opening.
    let femur_rad = pose.z.atan2(xy_reach) + cos_femur.acos();
    let coxa_rad = pose.y.atan2(pose.x);

    let (coxa_rad, femur_rad) = match mirror {
        Mirror::Normal => (coxa_rad, femur_rad),
        Mirror::Mirrored => (-coxa_rad, -femur_rad),
    };

    Ok(JointAngles {
        coxa_deg: coxa_rad.to_degrees(),
        femur_deg: femur_rad.to_degrees(),
        tibia_deg: tibia_rad.to_degrees(),
    })
}
