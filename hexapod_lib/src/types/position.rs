use std::fmt;

use serde::{Deserialize, Serialize};

use crate::PositionParseError;

/// Number of legs on the platform.
pub const LEG_COUNT: usize = 6;

/// A full set of desired leg lengths as received from the sender.
///
/// Lengths are in sender-side units, `0..=LegPosition::MAX`. The frame
/// payload grammar is six comma-separated decimal integers, e.g.
/// `"100,200,300,400,500,600"`. Scaling into each arm's own encoder range
/// happens in the regulation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegPosition {
    lengths: [u32; LEG_COUNT],
}

impl LegPosition {
    /// Upper bound of the sender-side unit range.
    pub const MAX: u32 = 1000;

    pub fn new(lengths: [u32; LEG_COUNT]) -> Result<Self, PositionParseError> {
        for &length in &lengths {
            if length > Self::MAX {
                return Err(PositionParseError::OutOfRange(length));
            }
        }
        Ok(Self { lengths })
    }

    /// Parses one frame payload.
    pub fn from_frame_text(text: &str) -> Result<Self, PositionParseError> {
        let fields: Vec<&str> = text.trim().split(',').collect();
        if fields.len() != LEG_COUNT {
            return Err(PositionParseError::FieldCount(fields.len()));
        }

        let mut lengths = [0u32; LEG_COUNT];
        for (i, field) in fields.iter().enumerate() {
            let field = field.trim();
            let value = field
                .parse::<u32>()
                .map_err(|_| PositionParseError::InvalidField(field.to_string()))?;
            if value > Self::MAX {
                return Err(PositionParseError::OutOfRange(value));
            }
            lengths[i] = value;
        }

        Ok(Self { lengths })
    }

    /// Desired length of one leg, `0..=MAX`.
    pub fn length(&self, leg: usize) -> u32 {
        self.lengths[leg]
    }

    pub fn lengths(&self) -> &[u32; LEG_COUNT] {
        &self.lengths
    }

    /// Renders the frame payload for this position.
    pub fn to_frame_text(&self) -> String {
        self.lengths
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for LegPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_frame_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_frame() {
        let position = LegPosition::from_frame_text("100,200,300,400,500,600").unwrap();
        assert_eq!(position.lengths(), &[100, 200, 300, 400, 500, 600]);
        assert_eq!(position.length(3), 400);
    }

    #[test]
    fn test_parse_tolerates_whitespace() {
        let position = LegPosition::from_frame_text(" 0, 1000 ,0,0,0,0 ").unwrap();
        assert_eq!(position.length(1), 1000);
    }

    #[test]
    fn test_parse_wrong_field_count() {
        assert_eq!(
            LegPosition::from_frame_text("1,2,3,4,5"),
            Err(PositionParseError::FieldCount(5))
        );
        assert_eq!(
            LegPosition::from_frame_text("1,2,3,4,5,6,7"),
            Err(PositionParseError::FieldCount(7))
        );
    }

    #[test]
    fn test_parse_non_numeric_field() {
        assert_eq!(
            LegPosition::from_frame_text("1,2,x,4,5,6"),
            Err(PositionParseError::InvalidField("x".to_string()))
        );
        // negative lengths are not representable on the wire
        assert_eq!(
            LegPosition::from_frame_text("1,2,-3,4,5,6"),
            Err(PositionParseError::InvalidField("-3".to_string()))
        );
    }

    #[test]
    fn test_parse_out_of_range() {
        assert_eq!(
            LegPosition::from_frame_text("1,2,3,4,5,1001"),
            Err(PositionParseError::OutOfRange(1001))
        );
    }

    #[test]
    fn test_frame_text_round_trip() {
        let position = LegPosition::new([0, 250, 500, 750, 1000, 42]).unwrap();
        let rendered = position.to_frame_text();
        assert_eq!(LegPosition::from_frame_text(&rendered).unwrap(), position);
    }
}
