//! Production arm logic: H-bridge drive plus encoder feedback.
//!
//! The electrical layer is behind two small traits so the same logic runs
//! against real chips or the simulated electronics from [`crate::hal::sim`].

use std::thread;
use std::time::{Duration, Instant};

use hexapod_lib::{ArmError, Direction};
use tracing::debug;

use crate::hal::encoder::{CounterChip, Encoder, OVERFLOW_CREDIT};
use crate::hal::{check_speed, ArmControl};

// how long the motor reverses during a hard stop
const STOP_REVERSE_DURATION: Duration = Duration::from_millis(100);

// slice length for the bounded homing sleep
const HOMING_SLICE: Duration = Duration::from_millis(50);

/// Drive states of the H-bridge inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDrive {
    Forward,
    Backward,
    Brake,
}

/// Digital side of the H-bridge plus its PWM enable line.
///
/// Implementations are internally synchronized; shared references suffice.
pub trait DriveBridge: Send {
    /// Sets the PWM duty cycle in percent.
    fn set_duty(&self, percentage: u8);

    /// Applies a drive state to the bridge inputs.
    fn drive(&self, drive: BridgeDrive);

    /// Cuts drive power without changing the bridge inputs.
    fn kill_power(&self);
}

/// One linear actuator: directional drive, speed control and absolute
/// position feedback through the encoder model.
pub struct LinearArm<B: DriveBridge, C: CounterChip> {
    id: usize,
    bridge: B,
    encoder: Encoder<C>,
    last_speed: u8,
    direction: Direction,
    max_position: i64,
    homing_drive: Duration,
}

impl<B: DriveBridge, C: CounterChip> LinearArm<B, C> {
    pub fn new(id: usize, bridge: B, chip: C, max_position: i64, homing_drive: Duration) -> Self {
        let arm = Self {
            id,
            bridge,
            encoder: Encoder::new(chip),
            last_speed: 0,
            direction: Direction::Stopped,
            max_position,
            homing_drive,
        };
        arm.bridge.drive(BridgeDrive::Brake);
        arm
    }

    fn halt(&mut self) {
        self.bridge.drive(BridgeDrive::Brake);
        self.encoder.fold_into_buffer(self.direction);
        self.direction = Direction::Stopped;
    }
}

impl<B: DriveBridge, C: CounterChip> ArmControl for LinearArm<B, C> {
    fn set_speed(&mut self, percentage: u8) -> Result<(), ArmError> {
        check_speed(percentage)?;
        self.last_speed = percentage;
        // a zero speed leaves the drive disengaged until the next start
        if percentage != 0 {
            self.bridge.set_duty(percentage);
        }
        Ok(())
    }

    fn start_forward(&mut self) -> Result<(), ArmError> {
        self.bridge.set_duty(self.last_speed);
        self.bridge.drive(BridgeDrive::Forward);
        self.direction = Direction::Forward;
        Ok(())
    }

    fn start_backward(&mut self) -> Result<(), ArmError> {
        self.bridge.set_duty(self.last_speed);
        self.bridge.drive(BridgeDrive::Backward);
        self.direction = Direction::Backward;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ArmError> {
        self.halt();
        Ok(())
    }

    fn stop_hard(&mut self) -> Result<(), ArmError> {
        // run reverse briefly without touching the recorded direction
        match self.direction {
            Direction::Forward => {
                self.bridge.set_duty(self.last_speed);
                self.bridge.drive(BridgeDrive::Backward);
            }
            Direction::Backward => {
                self.bridge.set_duty(self.last_speed);
                self.bridge.drive(BridgeDrive::Forward);
            }
            Direction::Stopped => return Err(ArmError::IndeterminateDirection),
        }
        thread::sleep(STOP_REVERSE_DURATION);

        self.halt();
        Ok(())
    }

    fn stop_by_pwm(&mut self) -> Result<(), ArmError> {
        self.bridge.kill_power();
        self.encoder.fold_into_buffer(self.direction);
        self.direction = Direction::Stopped;
        Ok(())
    }

    fn position(&mut self) -> Result<i64, ArmError> {
        // the counter is about to overflow; credit the buffer and clear it
        // before it can wrap
        if self.encoder.live_count() >= OVERFLOW_CREDIT as u32 {
            debug!(arm = self.id, "crediting encoder buffer before overflow");
            self.encoder.on_approaching_overflow(self.direction);
        }
        Ok(self.encoder.position(self.direction))
    }

    fn max_position(&self) -> i64 {
        self.max_position
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn move_to_starting_position(&mut self) -> Result<(), ArmError> {
        let saved_speed = self.last_speed;

        // drive into the mechanical end-stop at full speed
        self.set_speed(100)?;
        self.start_backward()?;
        let deadline = Instant::now() + self.homing_drive;
        while Instant::now() < deadline {
            thread::sleep(HOMING_SLICE.min(self.homing_drive));
        }
        self.stop()?;
        self.encoder.reset();

        self.last_speed = saved_speed;
        if saved_speed != 0 {
            self.bridge.set_duty(saved_speed);
        }
        Ok(())
    }

    fn reset_position_buffer(&mut self) -> Result<(), ArmError> {
        self.encoder.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::sim::SimElectronics;

    fn bench_arm(max_position: i64) -> LinearArm<crate::hal::sim::SimBridge, crate::hal::sim::SimCounter> {
        let electronics = SimElectronics::spawn(max_position, Duration::from_millis(5), 10);
        LinearArm::new(
            0,
            electronics.bridge(),
            electronics.counter(),
            max_position,
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_set_speed_rejects_out_of_range() {
        let mut arm = bench_arm(1024);
        assert_eq!(arm.set_speed(101), Err(ArmError::InvalidArgument(101)));
        assert_eq!(arm.set_speed(100), Ok(()));
    }

    #[test]
    fn test_stop_hard_requires_known_direction() {
        let mut arm = bench_arm(1024);
        assert_eq!(arm.stop_hard(), Err(ArmError::IndeterminateDirection));
    }

    #[test]
    fn test_forward_motion_accumulates_position() {
        let mut arm = bench_arm(1024);
        arm.set_speed(100).unwrap();
        arm.start_forward().unwrap();
        assert_eq!(arm.direction(), Direction::Forward);

        thread::sleep(Duration::from_millis(60));
        arm.stop().unwrap();
        assert_eq!(arm.direction(), Direction::Stopped);

        let stopped = arm.position().unwrap();
        assert!(stopped > 0, "expected forward travel, got {stopped}");

        // position is stable once stopped
        thread::sleep(Duration::from_millis(30));
        assert_eq!(arm.position().unwrap(), stopped);
    }

    #[test]
    fn test_direction_change_preserves_accumulated_position() {
        let mut arm = bench_arm(1024);
        arm.set_speed(100).unwrap();
        arm.start_forward().unwrap();
        thread::sleep(Duration::from_millis(80));
        arm.stop().unwrap();
        let peak = arm.position().unwrap();
        assert!(peak > 0);

        arm.start_backward().unwrap();
        thread::sleep(Duration::from_millis(30));
        arm.stop().unwrap();
        let after = arm.position().unwrap();
        assert!(
            after < peak,
            "expected backward travel from {peak}, got {after}"
        );
        assert!(after >= 0);
    }

    #[test]
    fn test_homing_resets_position_and_restores_speed() {
        let mut arm = bench_arm(1024);
        arm.set_speed(40).unwrap();
        arm.start_forward().unwrap();
        thread::sleep(Duration::from_millis(50));
        arm.stop().unwrap();
        assert!(arm.position().unwrap() > 0);

        arm.move_to_starting_position().unwrap();
        assert_eq!(arm.position().unwrap(), 0);
        assert_eq!(arm.direction(), Direction::Stopped);

        // the speed from before homing is still in effect
        arm.start_forward().unwrap();
        thread::sleep(Duration::from_millis(40));
        arm.stop().unwrap();
        assert!(arm.position().unwrap() > 0);
    }
}
