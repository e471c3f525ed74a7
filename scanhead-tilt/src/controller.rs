//! Supervisory state machine for the tilt mechanism.
//!
//! The controller is a single owned object. It never runs on its own; the
//! binding layer forwards the event sources into it: the fixed-rate
//! supervisory tick, the reprogrammable step timer, the home flag edge,
//! and the stall-guard edge, which is wired but not yet acted on. Every
//! event method runs to completion, and the binding layer serialises the
//! calls, which is all the mutual exclusion the shared fields need.

use core::convert::Infallible;

use embedded_hal::digital::{OutputPin, StatefulOutputPin};

use scanhead_tmc260::direction::Direction;
use scanhead_tmc260::errors::Tmc260Error;
use scanhead_tmc260::status::StatusKind;
use scanhead_tmc260::tmc260::Tmc260;
use scanhead_tmc260::transport::DatagramBus;

use crate::config::{
    DEFAULT_STEP_FREQ_HZ, HOME_STEP_FREQ_HZ, LOWER_LIMIT_RAD, STATUS_DECIMATION, TEST_DELAY_TICKS,
    TEST_SWEEP_TICKS, UNCOVERED_REFERENCE_RAD, UPPER_LIMIT_RAD, reload_for_hz,
};
use crate::position::{MotionDirection, PositionTracker};
use crate::profile::TILT_PROFILE;
use crate::telemetry::TelemetrySink;
use crate::timer::StepTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TiltState {
    Initialize,
    Home,
    TestDelay,
    TiltTable,
    TestClockwise,
    TestCounterClockwise,
    Error,
}

pub struct TiltController<B, O, T, S> {
    driver: Tmc260<B, O>,
    step_timer: T,
    telemetry: S,
    state: TiltState,
    /// Ticks since the last state entry.
    state_ticks: u32,
    position: PositionTracker,
    profile_index: usize,
    /// The next tilt-table sweep runs clockwise when set.
    next_sweep_cw: bool,
    angle_report_due: bool,
}

impl<B, O, T, S> TiltController<B, O, T, S>
where
    B: DatagramBus,
    O: OutputPin<Error = Infallible> + StatefulOutputPin<Error = Infallible>,
    T: StepTimer,
    S: TelemetrySink,
{
    pub fn new(driver: Tmc260<B, O>, step_timer: T, telemetry: S) -> Self {
        Self {
            driver,
            step_timer,
            telemetry,
            state: TiltState::Initialize,
            state_ticks: 0,
            position: PositionTracker::new(),
            profile_index: 0,
            next_sweep_cw: false,
            angle_report_due: false,
        }
    }

    /// Supervisory tick. `home_uncovered` is the current level of the home
    /// flag input, sampled by the caller.
    pub fn on_tick(&mut self, home_uncovered: bool) -> Result<(), Tmc260Error> {
        self.state_ticks = self.state_ticks.wrapping_add(1);

        if self.state_ticks % STATUS_DECIMATION == 0 && !self.angle_report_due {
            self.angle_report_due = true;
        }

        // Not exact end stops, but protection from overrotation when steps
        // get lost or a sweep runs away.
        if self.state != TiltState::Home && self.state != TiltState::Initialize {
            let angle = self.position.angle_rad();
            if angle > UPPER_LIMIT_RAD || angle < LOWER_LIMIT_RAD {
                warn!("angle {} outside travel limits, rehoming", angle);
                self.change_state(TiltState::Home, true);
            }
        }

        match self.state {
            TiltState::Initialize => {
                self.driver.init_defaults()?;
                self.change_state(TiltState::Home, true);
            }
            TiltState::Home => {
                if self.state_ticks == 1 {
                    self.step_timer.disable();
                    self.step_timer.set_reload(reload_for_hz(HOME_STEP_FREQ_HZ));
                    self.step_timer.enable();

                    if self.position.steps_from_home() == 0 {
                        // No reconciled offset yet; the flag level picks the
                        // seek direction.
                        if home_uncovered {
                            self.set_counter_clockwise();
                        } else {
                            self.set_clockwise();
                        }
                    } else if self.position.angle_rad() > 0.0 {
                        self.set_counter_clockwise();
                    } else {
                        self.set_clockwise();
                    }
                }
            }
            TiltState::TestDelay => {
                if self.state_ticks == 1 {
                    let status = self.driver.read_status(StatusKind::Position)?;
                    self.telemetry.queue_status(&status);
                }
                if self.state_ticks > TEST_DELAY_TICKS {
                    self.change_state(TiltState::TiltTable, true);
                }
            }
            TiltState::TiltTable => {
                if self.state_ticks == 1 {
                    if self.next_sweep_cw {
                        self.next_sweep_cw = false;
                        self.set_clockwise();
                    } else {
                        self.next_sweep_cw = true;
                        self.set_counter_clockwise();
                    }
                    self.profile_index = 0;
                    self.step_timer.set_reload(TILT_PROFILE[0]);
                }
            }
            TiltState::TestClockwise => {
                if self.state_ticks == 1 {
                    self.step_timer
                        .set_reload(reload_for_hz(DEFAULT_STEP_FREQ_HZ));
                    self.set_clockwise();
                }
                if self.state_ticks > TEST_SWEEP_TICKS {
                    self.driver.disable();
                    self.change_state(TiltState::TestCounterClockwise, true);
                }
            }
            TiltState::TestCounterClockwise => {
                if self.state_ticks == 1 {
                    self.step_timer
                        .set_reload(reload_for_hz(DEFAULT_STEP_FREQ_HZ));
                    self.set_counter_clockwise();
                }
                if self.state_ticks > TEST_SWEEP_TICKS {
                    self.driver.disable();
                    self.change_state(TiltState::TestClockwise, true);
                }
            }
            TiltState::Error => {}
        }

        Ok(())
    }

    /// Step timer expiry. Never blocks; pure dispatch on the current state.
    pub fn on_step_timer(&mut self) {
        match self.state {
            TiltState::Home | TiltState::TestClockwise | TiltState::TestCounterClockwise => {
                self.do_step();
            }
            TiltState::TiltTable => {
                self.profile_index += 1;
                if self.profile_index < TILT_PROFILE.len() && TILT_PROFILE[self.profile_index] > 0
                {
                    self.do_step();
                    self.step_timer.set_reload(TILT_PROFILE[self.profile_index]);
                } else {
                    // Sweep exhausted; re-enter for the return pass.
                    self.change_state(TiltState::TiltTable, true);
                }
            }
            _ => {}
        }
    }

    /// Home flag edge, either polarity. `uncovered` is the flag level read
    /// after the edge.
    ///
    /// The same electrical event means opposite things depending on the
    /// direction of travel: leaving coverage clockwise (or entering it
    /// counter-clockwise) is the home reference itself, while the other two
    /// crossings are the far transition, a known angle away.
    pub fn on_home_edge(&mut self, uncovered: bool) {
        let clockwise = self.position.direction() == MotionDirection::Clockwise;

        if uncovered == clockwise {
            debug!("home reference crossed");
            self.position.rehome();
        } else {
            debug!("far flag transition crossed");
            self.position.reanchor(UNCOVERED_REFERENCE_RAD);
        }

        if self.position.steps_from_home() == 0 && self.state == TiltState::Home {
            // Homed. First sweep after homing runs clockwise.
            self.next_sweep_cw = true;
            self.change_state(TiltState::TestDelay, true);
        }
    }

    /// Stall-guard edge. Wired through, but the response policy has not
    /// been decided; this only raises a debug signal.
    pub fn on_stall_edge(&mut self) {
        // TODO: decide the stall response. Dropping the enable line is the
        // likely candidate.
        warn!("stall guard edge");
    }

    /// Moves the controller into a state on the next tick. Intended for
    /// commanding the manual test states from a supervisor.
    pub fn request_state(&mut self, state: TiltState) {
        self.change_state(state, true);
    }

    /// Takes the decimated angle report if one is due.
    pub fn take_angle_report(&mut self) -> Option<f32> {
        if self.angle_report_due {
            self.angle_report_due = false;
            Some(self.position.angle_rad())
        } else {
            None
        }
    }

    pub fn state(&self) -> TiltState {
        self.state
    }

    pub fn position_rad(&self) -> f32 {
        self.position.angle_rad()
    }

    pub fn steps_from_home(&self) -> i32 {
        self.position.steps_from_home()
    }

    pub fn driver(&self) -> &Tmc260<B, O> {
        &self.driver
    }

    fn do_step(&mut self) {
        self.position.apply_step();
        self.driver.enable();
        self.driver.step();
    }

    fn set_clockwise(&mut self) {
        self.position.set_direction(MotionDirection::Clockwise);
        self.driver.set_direction(Direction::Clockwise);
    }

    fn set_counter_clockwise(&mut self) {
        self.position.set_direction(MotionDirection::CounterClockwise);
        self.driver.set_direction(Direction::CounterClockwise);
    }

    fn change_state(&mut self, new_state: TiltState, reset_ticks: bool) {
        debug!("tilt state {} -> {}", self.state, new_state);
        if reset_ticks {
            self.state_ticks = 0;
        }
        self.state = new_state;
    }
}
