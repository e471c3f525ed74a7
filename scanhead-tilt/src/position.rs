//! Signed step counting and the angle derived from it.

use crate::config::{GEAR_RATIO_DEN, GEAR_RATIO_NUM, MICROSTEPS_PER_REV, TWO_PI};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionDirection {
    Stopped,
    Clockwise,
    CounterClockwise,
}

/// Platform angle for a step count measured from the home reference.
pub fn angle_from_steps(steps: i32) -> f32 {
    (steps as f32 / MICROSTEPS_PER_REV as f32) * (GEAR_RATIO_DEN / GEAR_RATIO_NUM) * TWO_PI
}

/// Inverse of [`angle_from_steps`], truncated to whole steps.
pub fn steps_from_angle(angle_rad: f32) -> i32 {
    ((angle_rad * MICROSTEPS_PER_REV as f32 * GEAR_RATIO_NUM) / (GEAR_RATIO_DEN * TWO_PI)) as i32
}

/// Tracked position of the tilt mechanism.
///
/// The angle is a pure function of the step count; the two only diverge at
/// the moment the home sensor re-anchors them.
#[derive(Debug, Clone, Copy)]
pub struct PositionTracker {
    steps_from_home: i32,
    angle_rad: f32,
    direction: MotionDirection,
}

impl PositionTracker {
    pub const fn new() -> Self {
        Self {
            steps_from_home: 0,
            angle_rad: 0.0,
            direction: MotionDirection::Stopped,
        }
    }

    /// Books one step pulse with the sign of the current direction.
    pub fn apply_step(&mut self) {
        match self.direction {
            MotionDirection::Clockwise => self.steps_from_home += 1,
            MotionDirection::CounterClockwise => self.steps_from_home -= 1,
            MotionDirection::Stopped => {}
        }
        self.angle_rad = angle_from_steps(self.steps_from_home);
    }

    /// The home reference was just crossed.
    pub fn rehome(&mut self) {
        self.steps_from_home = 0;
        self.angle_rad = 0.0;
    }

    /// Re-anchors the tracker against a known physical angle.
    pub fn reanchor(&mut self, angle_rad: f32) {
        self.angle_rad = angle_rad;
        self.steps_from_home = steps_from_angle(angle_rad);
    }

    pub fn set_direction(&mut self, direction: MotionDirection) {
        self.direction = direction;
    }

    pub fn direction(&self) -> MotionDirection {
        self.direction
    }

    pub fn steps_from_home(&self) -> i32 {
        self.steps_from_home
    }

    pub fn angle_rad(&self) -> f32 {
        self.angle_rad
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_angle(net_steps: i32) -> f32 {
        (net_steps as f32 / MICROSTEPS_PER_REV as f32) * (GEAR_RATIO_DEN / GEAR_RATIO_NUM) * TWO_PI
    }

    #[test]
    fn angle_depends_only_on_the_net_step_count() {
        let mut forward_then_back = PositionTracker::new();
        forward_then_back.set_direction(MotionDirection::Clockwise);
        for _ in 0..500 {
            forward_then_back.apply_step();
        }
        forward_then_back.set_direction(MotionDirection::CounterClockwise);
        for _ in 0..180 {
            forward_then_back.apply_step();
        }

        let mut interleaved = PositionTracker::new();
        for i in 0..680 {
            if i % 2 == 0 && i < 360 {
                interleaved.set_direction(MotionDirection::CounterClockwise);
            } else {
                interleaved.set_direction(MotionDirection::Clockwise);
            }
            interleaved.apply_step();
        }

        assert_eq!(forward_then_back.steps_from_home(), 320);
        assert_eq!(interleaved.steps_from_home(), 320);
        assert_eq!(forward_then_back.angle_rad(), interleaved.angle_rad());
        assert!((forward_then_back.angle_rad() - expected_angle(320)).abs() < 1e-6);
    }

    #[test]
    fn stopped_steps_do_not_move_the_count() {
        let mut tracker = PositionTracker::new();
        tracker.apply_step();
        tracker.apply_step();
        assert_eq!(tracker.steps_from_home(), 0);
        assert_eq!(tracker.angle_rad(), 0.0);
    }

    #[test]
    fn reanchor_sets_a_consistent_step_count() {
        let mut tracker = PositionTracker::new();
        tracker.reanchor(3.14);
        let steps = tracker.steps_from_home();
        assert!(steps > 0);
        assert!((angle_from_steps(steps) - 3.14).abs() < 1e-3);

        tracker.rehome();
        assert_eq!(tracker.steps_from_home(), 0);
        assert_eq!(tracker.angle_rad(), 0.0);
    }
}
