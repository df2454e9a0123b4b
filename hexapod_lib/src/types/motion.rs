use serde::{Deserialize, Serialize};

/// Drive direction of one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Backward,
    Stopped,
    Forward,
}

impl Direction {
    /// Sign used by the encoder model: -1, 0 or +1.
    pub fn sign(self) -> i64 {
        match self {
            Direction::Backward => -1,
            Direction::Stopped => 0,
            Direction::Forward => 1,
        }
    }

    /// Direction an actuator at `current` must drive to reach `target`.
    pub fn towards(current: i64, target: i64) -> Self {
        if current < target {
            Direction::Forward
        } else if current > target {
            Direction::Backward
        } else {
            Direction::Stopped
        }
    }
}

/// One point-to-point move for a single actuator.
///
/// A new command always preempts an in-flight one; commands are never
/// queued per arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub direction: Direction,
    /// Speed percentage, `0..=100`.
    pub speed: u8,
    /// Target absolute encoder count, `0..=max_position` of the arm.
    pub target: i64,
}
