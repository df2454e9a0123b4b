//! Hardware access to the platform's arms.
//!
//! The regulation layer only ever talks to [`ArmControl`]; which backend
//! sits behind it is a configuration choice.

pub mod encoder;
pub mod linear;
pub mod sim;

use std::time::Duration;

use eyre::Result;
use hexapod_lib::{ArmBackend, ArmError, Direction, HalConfig, LEG_COUNT};
use tracing::info;

use crate::hal::linear::LinearArm;
use crate::hal::sim::{SimArm, SimElectronics};

/// Hardware access to one of the platform's arms.
///
/// One linear motor-driven leg-length mechanism with directional drive,
/// speed control and absolute position feedback.
pub trait ArmControl: Send {
    /// Sets the motor's speed. Fails with [`ArmError::InvalidArgument`]
    /// outside `0..=100`; a speed of 0 leaves the drive disengaged.
    fn set_speed(&mut self, percentage: u8) -> Result<(), ArmError>;

    /// Starts the motor driving forward at the last-set speed.
    fn start_forward(&mut self) -> Result<(), ArmError>;

    /// Starts the motor driving backward at the last-set speed.
    fn start_backward(&mut self) -> Result<(), ArmError>;

    /// Stops the motor via the H-bridge inputs. Does not change the speed.
    fn stop(&mut self) -> Result<(), ArmError>;

    /// Stops like [`ArmControl::stop`], but briefly runs the motor in
    /// reverse first for a harder stop. Fails with
    /// [`ArmError::IndeterminateDirection`] if the drive direction is
    /// unknown.
    fn stop_hard(&mut self) -> Result<(), ArmError>;

    /// Stops by cutting drive power without changing the direction inputs.
    fn stop_by_pwm(&mut self) -> Result<(), ArmError>;

    /// Absolute encoder position.
    fn position(&mut self) -> Result<i64, ArmError>;

    /// Encoder count at full extension.
    fn max_position(&self) -> i64;

    /// Current drive direction.
    fn direction(&self) -> Direction;

    /// Blocking homing routine: drives into the mechanical end-stop and
    /// resets the position to 0.
    fn move_to_starting_position(&mut self) -> Result<(), ArmError>;

    /// Zeroes the accumulated position. Called once homing completes.
    fn reset_position_buffer(&mut self) -> Result<(), ArmError>;
}

pub(crate) fn check_speed(percentage: u8) -> Result<(), ArmError> {
    if percentage > 100 {
        return Err(ArmError::InvalidArgument(percentage));
    }
    Ok(())
}

/// Builds the platform's six arms for the configured backend.
pub fn build_arms(cfg: &HalConfig) -> Result<Vec<Box<dyn ArmControl>>> {
    let tick = Duration::from_millis(cfg.sim.tick_ms);
    let homing_drive = Duration::from_millis(cfg.homing_drive_ms);

    let mut arms: Vec<Box<dyn ArmControl>> = Vec::with_capacity(LEG_COUNT);
    match cfg.backend {
        ArmBackend::Sim => {
            for id in 0..LEG_COUNT {
                arms.push(Box::new(SimArm::new(
                    id,
                    cfg.sim.max_position,
                    tick,
                    homing_drive,
                )));
            }
        }
        ArmBackend::Bench => {
            for id in 0..LEG_COUNT {
                let electronics = SimElectronics::spawn(cfg.sim.max_position, tick, 10);
                arms.push(Box::new(LinearArm::new(
                    id,
                    electronics.bridge(),
                    electronics.counter(),
                    cfg.sim.max_position,
                    homing_drive,
                )));
            }
        }
    }

    info!(backend = ?cfg.backend, arms = arms.len(), "arm backend ready");
    Ok(arms)
}
