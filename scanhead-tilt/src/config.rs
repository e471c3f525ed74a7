//! Compile-time configuration for the tilt actuator.
//!
//! The step frequencies and guard values are tuned against the real
//! mechanics; treat them as data, not as something to re-derive.

use core::f32::consts::PI;

pub const TWO_PI: f32 = 2.0 * PI;

/// Supervisory state machine tick rate.
pub const STATE_MACHINE_HZ: u32 = 1_000;

/// Step rate for the manual test states.
pub const DEFAULT_STEP_FREQ_HZ: u32 = 2_000;

/// Step rate while seeking the home flag.
pub const HOME_STEP_FREQ_HZ: u32 = 800;

/// Clock feeding the reprogrammable step timer.
pub const STEP_TIMER_HZ: u32 = 84_000_000;

/// Microsteps per motor revolution: 200 full steps at 1/64 microstepping.
pub const MICROSTEPS_PER_REV: u32 = 12_800;

/// Pinion-to-platform gear ratio, motor turns per platform turn.
pub const GEAR_RATIO_NUM: f32 = 3.0;
pub const GEAR_RATIO_DEN: f32 = 1.0;

/// Travel limits. Not exact end stops, but enough protection against
/// overrotation when steps are lost.
pub const UPPER_LIMIT_RAD: f32 = 3.5;
pub const LOWER_LIMIT_RAD: f32 = -0.5;

/// Platform angle at the far flag transition, measured from home.
pub const UNCOVERED_REFERENCE_RAD: f32 = 3.14;

/// Ticks spent in the post-homing delay before profile playback starts.
pub const TEST_DELAY_TICKS: u32 = 200;

/// Ticks each manual test state runs before swapping direction.
pub const TEST_SWEEP_TICKS: u32 = 80_000;

/// An angle report is raised every this many supervisory ticks.
pub const STATUS_DECIMATION: u32 = 25;

/// Step timer reload value for a given step frequency.
pub const fn reload_for_hz(hz: u32) -> u32 {
    STEP_TIMER_HZ / hz - 1
}
