// High-level body driver for the four-legged platform
//
// Owns the four leg targets, runs the stance and gait operations, and
// commits whole-body poses to the servo bus: solve IK for all four legs,
// map angles onto servo channels, transmit one batch, block until the
// board reports the motion complete.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::kinematics::{
    self, JointAngles, KinematicsError, LegGeometry, LegPose, Mirror,
};
use super::ssc32::{BusError, ServoBus};
use crate::config::{
    DEFAULT_SPEED, DONE_POLL_INTERVAL, DONE_RETRIES, DONE_TIMEOUT, LEG_LIFT_MM, MOTION_MS,
    SIT_RISE_MM, STANCE_Z, STRIDE_MM, WEIGHT_SHIFT_MM,
};

/// Canonical leg identities, in servo-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    BackRight = 0,
    FrontRight = 1,
    FrontLeft = 2,
    BackLeft = 3,
}

/// All legs in canonical order
pub const ALL_LEGS: [Leg; 4] = [Leg::BackRight, Leg::FrontRight, Leg::FrontLeft, Leg::BackLeft];

/// Servo channel assignments per leg, canonical order
const TIBIA_CHANNELS: [u8; 4] = [0, 15, 31, 16];
const FEMUR_CHANNELS: [u8; 4] = [1, 14, 30, 17];
const COXA_CHANNELS: [u8; 4] = [2, 13, 29, 18];

impl Leg {
    fn index(self) -> usize {
        self as usize
    }

    fn is_front(self) -> bool {
        matches!(self, Leg::FrontRight | Leg::FrontLeft)
    }

    fn is_left(self) -> bool {
        matches!(self, Leg::FrontLeft | Leg::BackLeft)
    }

    /// FrontRight and BackLeft are mounted mirrored relative to the
    /// canonical (BackRight) orientation.
    fn mirror(self) -> Mirror {
        match self {
            Leg::FrontRight | Leg::BackLeft => Mirror::Mirrored,
            Leg::BackRight | Leg::FrontLeft => Mirror::Normal,
        }
    }
}

/// One leg's current foot-tip target plus its fixed parameters
#[derive(Debug, Clone, Copy)]
pub struct LegState {
    pub pose: LegPose,
    pub geometry: LegGeometry,
    pub mirror: Mirror,
}

impl LegState {
    fn new(geometry: LegGeometry, mirror: Mirror) -> Self {
        let xy = geometry.stance_xy();
        Self {
            pose: LegPose::new(xy, xy, STANCE_Z),
            geometry,
            mirror,
        }
    }

    fn stance(&self) -> LegPose {
        let xy = self.geometry.stance_xy();
        LegPose::new(xy, xy, STANCE_Z)
    }

    fn angles(&self) -> kinematics::Result<JointAngles> {
        kinematics::solve_leg_angles(self.pose, self.geometry, self.mirror)
    }
}

/// Map one leg's solved angles onto (channel, servo degrees) commands.
///
/// Servo horns on mirrored legs are mounted opposite, so the two leg
/// classes use opposite offset transforms: the 90-angle / angle-90 pattern
/// for tibia and coxa, the 180 variant for femur. Together with the
/// solver's mirror sign flip, every mirrored servo value is the negation
/// of its normal-side counterpart.
fn servo_targets(leg: Leg, angles: JointAngles) -> [(u8, f64); 3] {
    let i = leg.index();
    match leg.mirror() {
        Mirror::Normal => [
            (TIBIA_CHANNELS[i], 90.0 - angles.tibia_deg),
            (FEMUR_CHANNELS[i], 180.0 - angles.femur_deg),
            (COXA_CHANNELS[i], angles.coxa_deg - 90.0),
        ],
        Mirror::Mirrored => [
            (TIBIA_CHANNELS[i], angles.tibia_deg - 90.0),
            (FEMUR_CHANNELS[i], -180.0 - angles.femur_deg),
            (COXA_CHANNELS[i], angles.coxa_deg + 90.0),
        ],
    }
}

/// Error types for body-level operations
#[derive(Debug, thiserror::Error)]
pub enum BodyError {
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(
        "servo bus did not report motion complete after {attempts} attempts; \
         platform pose is unknown"
    )]
    CommunicationFault { attempts: u32 },

    #[error("gait cancelled; platform returned to stance")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, BodyError>;

/// Body controller: four legs plus the servo bus they commit through
pub struct BodyDriver<B: ServoBus> {
    bus: B,
    legs: [LegState; 4],
    speed: u64,
    stop: Arc<AtomicBool>,
}

impl<B: ServoBus> BodyDriver<B> {
    /// Create a driver with the default leg geometry
    pub fn new(bus: B) -> Self {
        Self::with_geometry(bus, LegGeometry::default())
    }

    /// Create with custom leg geometry (identical across legs)
    pub fn with_geometry(bus: B, geometry: LegGeometry) -> Self {
        Self {
            bus,
            legs: ALL_LEGS.map(|leg| LegState::new(geometry, leg.mirror())),
            speed: DEFAULT_SPEED,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Multiplier applied to every motion duration
    pub fn set_speed(&mut self, speed: u64) {
        self.speed = speed.max(1);
    }

    /// Flag that cancels a running gait at the next stable point.
    /// Hand this to a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Current foot-tip target of one leg
    pub fn pose(&self, leg: Leg) -> LegPose {
        self.legs[leg.index()].pose
    }

    /// Solved joint angles for one leg's current target (diagnostic)
    pub fn angles(&self, leg: Leg) -> kinematics::Result<JointAngles> {
        self.legs[leg.index()].angles()
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Validate and transmit the current body pose as one atomic batch,
    /// then block until the board reports the motion finished.
    ///
    /// All four legs are solved before anything is sent: an unreachable
    /// target aborts the whole commit with no channel touched.
    fn commit(&mut self, duration_ms: u64) -> Result<()> {
        let mut batch = [[(0u8, 0f64); 3]; 4];
        for leg in ALL_LEGS {
            let angles = self.legs[leg.index()].angles()?;
            batch[leg.index()] = servo_targets(leg, angles);
        }

        for targets in &batch {
            for &(channel, degrees) in targets {
                self.bus.set(channel, degrees)?;
            }
        }

        let scaled = duration_ms * self.speed;
        debug!("commit: {}ms motion", scaled);
        self.bus.commit(scaled)?;

        let mut attempts = 0;
        loop {
            match self.bus.wait_done(DONE_TIMEOUT, DONE_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(BusError::Timeout { waited_ms }) => {
                    attempts += 1;
                    if attempts > DONE_RETRIES {
                        return Err(BodyError::CommunicationFault { attempts });
                    }
                    warn!(
                        "no motion-complete after {}ms, retrying ({}/{})",
                        waited_ms, attempts, DONE_RETRIES
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// All legs to the canonical stance pose
    pub fn stand_up(&mut self) -> Result<()> {
        info!("standing up");
        for state in &mut self.legs {
            state.pose = state.stance();
        }
        self.commit(MOTION_MS)
    }

    /// Stance pose with the body lowered onto the ground
    pub fn sit_down(&mut self) -> Result<()> {
        info!("sitting down");
        for state in &mut self.legs {
            let mut pose = state.stance();
            pose.z += SIT_RISE_MM;
            state.pose = pose;
        }
        self.commit(MOTION_MS)
    }

    /// Lift one foot off the ground without moving its horizontal target
    pub fn leg_up(&mut self, leg: Leg, mm: f64) -> Result<()> {
        debug!("{:?} up {}mm", leg, mm);
        self.legs[leg.index()].pose.z += mm;
        self.commit(MOTION_MS)
    }

    /// Put one foot back down at stance height
    pub fn leg_down(&mut self, leg: Leg) -> Result<()> {
        debug!("{:?} down", leg);
        self.legs[leg.index()].pose.z = STANCE_Z;
        self.commit(MOTION_MS)
    }

    /// Translate the body relative to the feet: positive dx shifts the body
    /// rightward, positive dy forward. Left and right legs adjust x in
    /// opposite directions (their local frames point outward), front and
    /// back legs adjust y in opposite directions.
    pub fn shift_body(&mut self, dx: f64, dy: f64) -> Result<()> {
        debug!("shift body ({}, {})", dx, dy);
        for leg in ALL_LEGS {
            let pose = &mut self.legs[leg.index()].pose;
            pose.x += if leg.is_left() { dx } else { -dx };
            pose.y += if leg.is_front() { -dy } else { dy };
        }
        self.commit(MOTION_MS)
    }

    /// Lean the body away from one leg so it can be lifted without tipping.
    /// Must precede leg_up/leg_down on that leg during a gait step.
    pub fn shift_weight_off_leg(&mut self, leg: Leg, mm: f64) -> Result<()> {
        let dx = 0.7 * mm * if leg.is_left() { 1.0 } else { -1.0 };
        let dy = 0.7 * mm * if leg.is_front() { -1.0 } else { 1.0 };
        self.shift_body(dx, dy)
    }

    /// One complete leg step: lean away, lift, advance the foot, lower,
    /// lean back. advance_mm is in the leg's local y.
    fn swing_leg(&mut self, leg: Leg, advance_mm: f64) -> Result<()> {
        debug!("{:?} swing {}mm", leg, advance_mm);
        self.shift_weight_off_leg(leg, WEIGHT_SHIFT_MM)?;
        self.leg_up(leg, LEG_LIFT_MM)?;
        self.legs[leg.index()].pose.y += advance_mm;
        self.commit(MOTION_MS)?;
        self.leg_down(leg)?;
        self.shift_weight_off_leg(leg, -WEIGHT_SHIFT_MM)
    }

    /// Bring every foot whose horizontal target has drifted from stance
    /// back in line, one leg at a time, keeping three feet grounded.
    fn square_up(&mut self) -> Result<()> {
        for leg in ALL_LEGS {
            let drift = self.legs[leg.index()].stance().y - self.legs[leg.index()].pose.y;
            if drift.abs() > 1e-6 {
                self.swing_leg(leg, drift)?;
            }
        }
        Ok(())
    }

    /// Statically stable diagonal gait: walk forward for the given number
    /// of cycles, keeping at least three feet on the ground at all times.
    ///
    /// Per cycle each leg swings once (order BackRight, FrontRight, body
    /// shift, BackLeft, FrontLeft, body shift). Front legs swing their
    /// targets forward by two strides, back legs by two strides the other
    /// way, cancelling the two body shifts; the very first BackRight and
    /// FrontRight swings use a single stride so the gait enters its steady
    /// state without a double-length step. After the last cycle the legs
    /// are squared up so the body ends in the exact stance pose.
    ///
    /// Returns the net forward travel in millimeters. A raised stop flag
    /// cancels at the next stable point: the platform is squared up to
    /// stance first, then `BodyError::Cancelled` is surfaced.
    pub fn walk(&mut self, cycles: u32) -> Result<f64> {
        self.stand_up()?;

        let stride = STRIDE_MM;
        let mut travelled = 0.0;
        let mut first = true;
        let mut cancelled = false;

        'gait: for cycle in 0..cycles {
            info!("gait cycle {}/{}", cycle + 1, cycles);

            let diagonal = [
                (Leg::BackRight, if first { -stride } else { -2.0 * stride }),
                (Leg::FrontRight, if first { stride } else { 2.0 * stride }),
            ];
            first = false;
            for (leg, advance) in diagonal {
                if self.stop_requested() {
                    cancelled = true;
                    break 'gait;
                }
                self.swing_leg(leg, advance)?;
            }
            self.shift_body(0.0, stride)?;
            travelled += stride;

            let diagonal = [
                (Leg::BackLeft, -2.0 * stride),
                (Leg::FrontLeft, 2.0 * stride),
            ];
            for (leg, advance) in diagonal {
                if self.stop_requested() {
                    cancelled = true;
                    break 'gait;
                }
                self.swing_leg(leg, advance)?;
            }
            self.shift_body(0.0, stride)?;
            travelled += stride;
        }

        self.square_up()?;

        if cancelled {
            warn!("walk cancelled after {:.0}mm", travelled);
            return Err(BodyError::Cancelled);
        }
        info!("walked {:.0}mm", travelled);
        Ok(travelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::ssc32::Result as BusResult;
    use std::time::Duration;

    /// Records everything the driver sends, reports motions done instantly
    struct MockBus {
        sets: Vec<(u8, f64)>,
        commits: Vec<u64>,
        batch_sizes: Vec<usize>,
        pending: usize,
        done: bool,
        /// Raise this flag once the given number of commits has gone out
        /// (simulates an operator hitting Ctrl+C mid-gait)
        stop_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl MockBus {
        fn new() -> Self {
            Self {
                sets: Vec::new(),
                commits: Vec::new(),
                batch_sizes: Vec::new(),
                pending: 0,
                done: true,
                stop_after: None,
            }
        }
    }

    impl ServoBus for MockBus {
        fn set(&mut self, channel: u8, degrees: f64) -> BusResult<()> {
            self.sets.push((channel, degrees));
            self.pending += 1;
            Ok(())
        }

        fn commit(&mut self, duration_ms: u64) -> BusResult<()> {
            self.commits.push(duration_ms);
            self.batch_sizes.push(self.pending);
            self.pending = 0;
            if let Some((after, flag)) = &self.stop_after {
                if self.commits.len() >= *after {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            Ok(())
        }

        fn poll_done(&mut self) -> BusResult<bool> {
            Ok(self.done)
        }

        fn wait_done(&mut self, timeout: Duration, _poll_interval: Duration) -> BusResult<()> {
            if self.done {
                Ok(())
            } else {
                Err(BusError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn driver() -> BodyDriver<MockBus> {
        let mut d = BodyDriver::new(MockBus::new());
        d.set_speed(1);
        d
    }

    fn stance() -> LegPose {
        let xy = LegGeometry::default().stance_xy();
        LegPose::new(xy, xy, STANCE_Z)
    }

    fn assert_pose_near(a: LegPose, b: LegPose) {
        assert!(
            (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9 && (a.z - b.z).abs() < 1e-9,
            "{:?} not near {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_stand_up_commits_full_batch() {
        let mut d = driver();
        d.stand_up().unwrap();
        assert_eq!(d.bus.commits, vec![MOTION_MS]);
        assert_eq!(d.bus.batch_sizes, vec![12]);
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
    }

    #[test]
    fn test_speed_multiplier_scales_duration() {
        let mut d = driver();
        d.set_speed(10);
        d.stand_up().unwrap();
        assert_eq!(d.bus.commits, vec![MOTION_MS * 10]);
    }

    #[test]
    fn test_sit_down_raises_feet() {
        let mut d = driver();
        d.sit_down().unwrap();
        for leg in ALL_LEGS {
            assert!((d.pose(leg).z - (STANCE_Z + SIT_RISE_MM)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_leg_up_down_roundtrip() {
        let mut d = driver();
        d.stand_up().unwrap();
        d.leg_up(Leg::FrontLeft, 20.0).unwrap();
        assert!((d.pose(Leg::FrontLeft).z - (STANCE_Z + 20.0)).abs() < 1e-9);
        // Other legs untouched.
        assert_pose_near(d.pose(Leg::BackRight), stance());
        d.leg_down(Leg::FrontLeft).unwrap();
        assert_pose_near(d.pose(Leg::FrontLeft), stance());
    }

    #[test]
    fn test_shift_body_roundtrip() {
        let mut d = driver();
        d.stand_up().unwrap();
        d.shift_body(10.0, 15.0).unwrap();
        d.shift_body(-10.0, -15.0).unwrap();
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
    }

    #[test]
    fn test_shift_body_moves_diagonals_symmetrically() {
        let mut d = driver();
        d.stand_up().unwrap();
        d.shift_body(10.0, 5.0).unwrap();
        let s = stance();
        assert_pose_near(d.pose(Leg::FrontLeft), LegPose::new(s.x + 10.0, s.y - 5.0, s.z));
        assert_pose_near(d.pose(Leg::FrontRight), LegPose::new(s.x - 10.0, s.y - 5.0, s.z));
        assert_pose_near(d.pose(Leg::BackLeft), LegPose::new(s.x + 10.0, s.y + 5.0, s.z));
        assert_pose_near(d.pose(Leg::BackRight), LegPose::new(s.x - 10.0, s.y + 5.0, s.z));
    }

    #[test]
    fn test_shift_weight_roundtrip() {
        let mut d = driver();
        d.stand_up().unwrap();
        for leg in ALL_LEGS {
            d.shift_weight_off_leg(leg, 20.0).unwrap();
            d.shift_weight_off_leg(leg, -20.0).unwrap();
        }
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
    }

    #[test]
    fn test_unreachable_target_aborts_before_any_set() {
        let mut d = driver();
        d.stand_up().unwrap();
        let sets_after_stand = d.bus.sets.len();
        // Raising a foot 500mm puts it far past femur+tibia reach.
        let err = d.leg_up(Leg::BackRight, 500.0).unwrap_err();
        assert!(matches!(err, BodyError::Kinematics(_)));
        assert_eq!(d.bus.sets.len(), sets_after_stand, "no partial transmission");
    }

    #[test]
    fn test_walk_returns_to_stance_and_reports_travel() {
        let mut d = driver();
        let travelled = d.walk(2).unwrap();
        assert!((travelled - 4.0 * STRIDE_MM).abs() < 1e-9);
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
        // Every commit carried the full 12-channel batch.
        assert!(d.bus.batch_sizes.iter().all(|&n| n == 12));
    }

    #[test]
    fn test_walk_single_cycle_steady_state() {
        // One cycle must also end grounded and squared up (half-stride lead-in).
        let mut d = driver();
        let travelled = d.walk(1).unwrap();
        assert!((travelled - 2.0 * STRIDE_MM).abs() < 1e-9);
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
    }

    #[test]
    fn test_walk_cancellation_returns_to_stance() {
        let mut d = driver();
        d.stop_flag().store(true, Ordering::Relaxed);
        let err = d.walk(3).unwrap_err();
        assert!(matches!(err, BodyError::Cancelled));
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
    }

    #[test]
    fn test_walk_cancelled_mid_gait_squares_up_to_stance() {
        // Cancel while the second swing is in flight: the swing completes,
        // the remaining legs still carry stride drift, and the squaring-up
        // pass must walk them back before Cancelled surfaces.
        let mut d = driver();
        d.bus.stop_after = Some((7, d.stop_flag()));
        let err = d.walk(3).unwrap_err();
        assert!(matches!(err, BodyError::Cancelled));
        for leg in ALL_LEGS {
            assert_pose_near(d.pose(leg), stance());
        }
        // Squaring-up really ran: commits continued after the cancellation
        // point, and every one carried the full 12-channel batch.
        assert!(d.bus.commits.len() > 12);
        assert!(d.bus.batch_sizes.iter().all(|&n| n == 12));
    }

    #[test]
    fn test_completion_timeout_escalates_to_fault() {
        let mut d = driver();
        d.bus.done = false;
        let err = d.stand_up().unwrap_err();
        assert!(matches!(err, BodyError::CommunicationFault { .. }));
    }

    #[test]
    fn test_servo_targets_mirror_pattern() {
        let angles = JointAngles {
            coxa_deg: 45.0,
            femur_deg: 50.0,
            tibia_deg: 60.0,
        };
        let mirrored_angles = JointAngles {
            coxa_deg: -45.0,
            femur_deg: -50.0,
            tibia_deg: 60.0,
        };
        let normal = servo_targets(Leg::BackRight, angles);
        let mirrored = servo_targets(Leg::FrontRight, mirrored_angles);
        // Channels come from the per-leg table.
        assert_eq!(normal.map(|(ch, _)| ch), [0, 1, 2]);
        assert_eq!(mirrored.map(|(ch, _)| ch), [15, 14, 13]);
        // Offset table: 90-tibia, 180-femur, coxa-90 on the normal side.
        assert!((normal[0].1 - 30.0).abs() < 1e-9);
        assert!((normal[1].1 - 130.0).abs() < 1e-9);
        assert!((normal[2].1 - (-45.0)).abs() < 1e-9);
        // Every mirrored servo value is the negation of the normal one,
        // so mirror-mounted horns drive the same physical motion.
        for (n, m) in normal.iter().zip(mirrored.iter()) {
            assert!((n.1 + m.1).abs() < 1e-9, "{} not opposite {}", n.1, m.1);
        }
    }
}
