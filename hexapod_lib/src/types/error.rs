use thiserror::Error;

use crate::LegPosition;

/// Reasons a received position frame is rejected.
///
/// A rejected frame is logged and dropped; the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionParseError {
    #[error("expected 6 length fields, got {0}")]
    FieldCount(usize),
    #[error("length field {0:?} is not a decimal integer")]
    InvalidField(String),
    #[error("length {0} exceeds the maximum of {}", LegPosition::MAX)]
    OutOfRange(u32),
}

/// Errors surfaced by an arm capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArmError {
    /// Speed percentage outside `0..=100`. Rejected at the call site, no
    /// state change.
    #[error("speed percentage {0} is outside 0..=100")]
    InvalidArgument(u8),
    /// Reverse-brake stop requested while the drive direction is unknown.
    #[error("cannot reverse-brake while the drive direction is unknown")]
    IndeterminateDirection,
    /// The underlying hardware reported a fault. The owning worker stops
    /// the arm and reports the fault upward instead of looping forever.
    #[error("arm hardware fault: {0}")]
    Fault(String),
}
