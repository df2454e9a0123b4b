//! Simulated arm backends for desk and bench use.
//!
//! Two layers are simulated, matching the two ways the platform runs
//! without hardware:
//!
//! - [`SimArm`] is a pure software arm: a mover thread integrates the
//!   commanded speed directly into an absolute position. No encoder model
//!   is involved.
//! - [`SimElectronics`] simulates the electrical layer underneath
//!   [`LinearArm`][crate::hal::linear::LinearArm]: an H-bridge, a motor
//!   that emits encoder pulses while it turns, and the counter chip with
//!   its clear line. Driving a `LinearArm` over it exercises the whole
//!   encoder path, including overflow credits.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicI8, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use hexapod_lib::{ArmError, Direction};
use tracing::debug;

use crate::hal::encoder::CounterChip;
use crate::hal::linear::{BridgeDrive, DriveBridge};
use crate::hal::{check_speed, ArmControl};

// slice length for the bounded homing sleep
const HOMING_SLICE: Duration = Duration::from_millis(50);

/// Pulses the simulated motor advances per tick at a given duty.
///
/// A nonzero duty always yields at least one count per tick so slow moves
/// still make progress.
fn pulses_per_tick(duty: u8) -> i64 {
    if duty == 0 {
        0
    } else {
        i64::from(duty / 10).max(1)
    }
}

struct SimArmShared {
    position: AtomicI64,
    speed: AtomicU8,
    direction: AtomicI8,
    max_position: i64,
}

/// Pure software arm with a background mover thread.
pub struct SimArm {
    id: usize,
    shared: Arc<SimArmShared>,
    homing_drive: Duration,
    last_speed: u8,
}

impl SimArm {
    pub fn new(id: usize, max_position: i64, tick: Duration, homing_drive: Duration) -> Self {
        let shared = Arc::new(SimArmShared {
            position: AtomicI64::new(10),
            speed: AtomicU8::new(0),
            direction: AtomicI8::new(0),
            max_position,
        });

        // mover thread; exits once the arm is dropped
        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name(format!("sim-arm-{id}"))
            .spawn(move || sim_arm_mover(weak, tick))
            .expect("failed to spawn sim arm mover thread");

        Self {
            id,
            shared,
            homing_drive,
            last_speed: 0,
        }
    }

    fn set_direction(&self, direction: Direction) {
        self.shared
            .direction
            .store(direction.sign() as i8, Ordering::SeqCst);
    }
}

fn sim_arm_mover(shared: Weak<SimArmShared>, tick: Duration) {
    loop {
        let Some(shared) = shared.upgrade() else {
            return;
        };

        let direction = i64::from(shared.direction.load(Ordering::SeqCst));
        if direction != 0 {
            let step = pulses_per_tick(shared.speed.load(Ordering::SeqCst));
            let moved = (shared.position.load(Ordering::SeqCst) + step * direction)
                .clamp(0, shared.max_position);
            shared.position.store(moved, Ordering::SeqCst);
        }

        drop(shared);
        thread::sleep(tick);
    }
}

impl ArmControl for SimArm {
    fn set_speed(&mut self, percentage: u8) -> Result<(), ArmError> {
        check_speed(percentage)?;
        self.last_speed = percentage;
        self.shared.speed.store(percentage, Ordering::SeqCst);
        Ok(())
    }

    fn start_forward(&mut self) -> Result<(), ArmError> {
        self.set_direction(Direction::Forward);
        Ok(())
    }

    fn start_backward(&mut self) -> Result<(), ArmError> {
        self.set_direction(Direction::Backward);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ArmError> {
        self.set_direction(Direction::Stopped);
        Ok(())
    }

    fn stop_hard(&mut self) -> Result<(), ArmError> {
        // a simulated motor has no momentum; validate and stop
        if self.direction() == Direction::Stopped {
            return Err(ArmError::IndeterminateDirection);
        }
        self.set_direction(Direction::Stopped);
        Ok(())
    }

    fn stop_by_pwm(&mut self) -> Result<(), ArmError> {
        self.set_direction(Direction::Stopped);
        Ok(())
    }

    fn position(&mut self) -> Result<i64, ArmError> {
        Ok(self.shared.position.load(Ordering::SeqCst))
    }

    fn max_position(&self) -> i64 {
        self.shared.max_position
    }

    fn direction(&self) -> Direction {
        match self.shared.direction.load(Ordering::SeqCst) {
            -1 => Direction::Backward,
            1 => Direction::Forward,
            _ => Direction::Stopped,
        }
    }

    fn move_to_starting_position(&mut self) -> Result<(), ArmError> {
        debug!(arm = self.id, "homing simulated arm");
        let saved_speed = self.last_speed;

        self.set_speed(100)?;
        self.start_backward()?;
        let deadline = Instant::now() + self.homing_drive;
        while Instant::now() < deadline {
            thread::sleep(HOMING_SLICE.min(self.homing_drive));
        }
        self.stop()?;
        self.shared.position.store(0, Ordering::SeqCst);

        self.last_speed = saved_speed;
        self.shared.speed.store(saved_speed, Ordering::SeqCst);
        Ok(())
    }

    fn reset_position_buffer(&mut self) -> Result<(), ArmError> {
        self.shared.position.store(0, Ordering::SeqCst);
        Ok(())
    }
}

// bridge input encoding for the simulated electronics
const DRIVE_BRAKE: u8 = 0;
const DRIVE_FORWARD: u8 = 1;
const DRIVE_BACKWARD: u8 = 2;

struct ElectronicsShared {
    duty: AtomicU8,
    drive: AtomicU8,
    powered: AtomicBool,
    count: AtomicU32,
    clear_line: AtomicBool,
    physical: AtomicI64,
    max_position: i64,
}

/// Simulated motor, H-bridge and counter chip chain.
///
/// The motor thread emits encoder pulses while the bridge is engaged and
/// the physical position is off its end-stops; a stalled motor emits none.
/// The chain outlives this handle for as long as a bridge or counter
/// handle keeps it alive.
pub struct SimElectronics {
    shared: Arc<ElectronicsShared>,
}

impl SimElectronics {
    pub fn spawn(max_position: i64, tick: Duration, initial_position: i64) -> Self {
        let shared = Arc::new(ElectronicsShared {
            duty: AtomicU8::new(0),
            drive: AtomicU8::new(DRIVE_BRAKE),
            powered: AtomicBool::new(false),
            count: AtomicU32::new(0),
            clear_line: AtomicBool::new(false),
            physical: AtomicI64::new(initial_position),
            max_position,
        });

        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("sim-electronics".to_string())
            .spawn(move || electronics_mover(weak, tick))
            .expect("failed to spawn sim electronics thread");

        Self { shared }
    }

    pub fn bridge(&self) -> SimBridge {
        SimBridge(self.shared.clone())
    }

    pub fn counter(&self) -> SimCounter {
        SimCounter(self.shared.clone())
    }

    /// Physical position of the simulated actuator, for assertions.
    pub fn physical_position(&self) -> i64 {
        self.shared.physical.load(Ordering::SeqCst)
    }
}

fn electronics_mover(shared: Weak<ElectronicsShared>, tick: Duration) {
    loop {
        let Some(shared) = shared.upgrade() else {
            return;
        };

        if shared.clear_line.load(Ordering::SeqCst) {
            shared.count.store(0, Ordering::SeqCst);
        } else if shared.powered.load(Ordering::SeqCst) {
            let pulses = pulses_per_tick(shared.duty.load(Ordering::SeqCst));
            if pulses > 0 {
                let physical = shared.physical.load(Ordering::SeqCst);
                let moved = match shared.drive.load(Ordering::SeqCst) {
                    DRIVE_FORWARD => pulses.min(shared.max_position - physical),
                    DRIVE_BACKWARD => pulses.min(physical),
                    _ => 0,
                };
                if moved > 0 {
                    let delta = if shared.drive.load(Ordering::SeqCst) == DRIVE_FORWARD {
                        moved
                    } else {
                        -moved
                    };
                    shared.physical.store(physical + delta, Ordering::SeqCst);
                    shared.count.fetch_add(moved as u32, Ordering::SeqCst);
                }
            }
        }

        drop(shared);
        thread::sleep(tick);
    }
}

/// H-bridge handle into the simulated electronics.
pub struct SimBridge(Arc<ElectronicsShared>);

impl DriveBridge for SimBridge {
    fn set_duty(&self, percentage: u8) {
        self.0.duty.store(percentage, Ordering::SeqCst);
        self.0.powered.store(true, Ordering::SeqCst);
    }

    fn drive(&self, drive: BridgeDrive) {
        let encoded = match drive {
            BridgeDrive::Forward => DRIVE_FORWARD,
            BridgeDrive::Backward => DRIVE_BACKWARD,
            BridgeDrive::Brake => DRIVE_BRAKE,
        };
        self.0.drive.store(encoded, Ordering::SeqCst);
    }

    fn kill_power(&self) {
        self.0.powered.store(false, Ordering::SeqCst);
    }
}

/// Counter chip handle into the simulated electronics.
///
/// The clear line is level-triggered: raising it zeroes the count
/// immediately and the motor thread holds it at zero while high.
pub struct SimCounter(Arc<ElectronicsShared>);

impl CounterChip for SimCounter {
    fn read(&self) -> u32 {
        self.0.count.load(Ordering::SeqCst)
    }

    fn set_clear(&self, level: bool) {
        self.0.clear_line.store(level, Ordering::SeqCst);
        if level {
            self.0.count.store(0, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_arm() -> SimArm {
        SimArm::new(
            0,
            1024,
            Duration::from_millis(5),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_sim_arm_moves_forward_and_stops() {
        let mut arm = sim_arm();
        arm.set_speed(100).unwrap();
        arm.start_forward().unwrap();
        thread::sleep(Duration::from_millis(50));
        arm.stop().unwrap();

        let stopped = arm.position().unwrap();
        assert!(stopped > 10, "expected forward travel, got {stopped}");

        thread::sleep(Duration::from_millis(30));
        assert_eq!(arm.position().unwrap(), stopped);
    }

    #[test]
    fn test_sim_arm_clamps_at_end_stops() {
        let mut arm = SimArm::new(
            0,
            64,
            Duration::from_millis(2),
            Duration::from_millis(50),
        );
        arm.set_speed(100).unwrap();
        arm.start_forward().unwrap();
        thread::sleep(Duration::from_millis(80));
        arm.stop().unwrap();
        assert_eq!(arm.position().unwrap(), 64);

        arm.start_backward().unwrap();
        thread::sleep(Duration::from_millis(80));
        arm.stop().unwrap();
        assert_eq!(arm.position().unwrap(), 0);
    }

    #[test]
    fn test_sim_arm_homing_zeroes_position() {
        let mut arm = sim_arm();
        arm.set_speed(60).unwrap();
        arm.start_forward().unwrap();
        thread::sleep(Duration::from_millis(40));
        arm.stop().unwrap();

        arm.move_to_starting_position().unwrap();
        assert_eq!(arm.position().unwrap(), 0);
        assert_eq!(arm.direction(), Direction::Stopped);
    }

    #[test]
    fn test_sim_arm_rejects_invalid_speed() {
        let mut arm = sim_arm();
        assert_eq!(arm.set_speed(150), Err(ArmError::InvalidArgument(150)));
    }

    #[test]
    fn test_electronics_stall_at_end_stop_emits_no_pulses() {
        let electronics = SimElectronics::spawn(1024, Duration::from_millis(2), 10);
        let bridge = electronics.bridge();
        let counter = electronics.counter();

        // drive into the lower end-stop; only 10 pulses can ever be emitted
        bridge.set_duty(100);
        bridge.drive(BridgeDrive::Backward);
        thread::sleep(Duration::from_millis(60));

        assert_eq!(electronics.physical_position(), 0);
        assert_eq!(counter.read(), 10);
    }

    #[test]
    fn test_electronics_clear_line_zeroes_and_holds_count() {
        let electronics = SimElectronics::spawn(1024, Duration::from_millis(2), 0);
        let bridge = electronics.bridge();
        let counter = electronics.counter();

        bridge.set_duty(100);
        bridge.drive(BridgeDrive::Forward);
        thread::sleep(Duration::from_millis(40));
        assert!(counter.read() > 0);

        counter.set_clear(true);
        assert_eq!(counter.read(), 0);
        thread::sleep(Duration::from_millis(20));
        // held at zero while the clear line is high
        assert_eq!(counter.read(), 0);

        counter.set_clear(false);
        thread::sleep(Duration::from_millis(40));
        assert!(counter.read() > 0);
    }
}
