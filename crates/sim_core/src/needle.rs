//! Multi-tip probe needle.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{EngineError, Position, Result};

/// Fixed tip offsets around a movable primary position. Offset 0 is always
/// the primary tip itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeNeedle {
    primary: Position,
    offsets: SmallVec<[Position; 8]>,
}

impl ProbeNeedle {
    pub fn new(primary: Position) -> Self {
        let mut offsets = SmallVec::new();
        offsets.push(Position::new(0, 0));
        Self { primary, offsets }
    }

    /// Needle parked at home with probes 1.. at `extra`.
    pub fn with_offsets(extra: &[Position]) -> Self {
        let mut needle = Self::new(Position::HOME);
        for &offset in extra {
            needle.add_probe(offset);
        }
        needle
    }

    pub fn add_probe(&mut self, offset: Position) {
        self.offsets.push(offset);
    }

    pub fn probe_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn primary(&self) -> Position {
        self.primary
    }

    pub fn offsets(&self) -> &[Position] {
        &self.offsets
    }

    pub fn move_to(&mut self, primary: Position) {
        self.primary = primary;
    }

    pub fn position(&self, probe: usize) -> Result<Position> {
        self.offsets
            .get(probe)
            .map(|&offset| self.primary + offset)
            .ok_or(EngineError::ProbeOutOfRange {
                probe,
                probes: self.offsets.len(),
            })
    }

    /// Positions of every probe, in probe order.
    pub fn positions(&self) -> impl Iterator<Item = Position> + '_ {
        self.offsets.iter().map(move |&offset| self.primary + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_zero_is_primary() {
        let mut needle = ProbeNeedle::new(Position::new(2, 3));
        assert_eq!(needle.position(0), Ok(Position::new(2, 3)));
        needle.move_to(Position::new(4, 4));
        assert_eq!(needle.position(0), Ok(Position::new(4, 4)));
    }

    #[test]
    fn offsets_follow_primary() {
        let mut needle = ProbeNeedle::with_offsets(&[Position::new(1, 0), Position::new(0, 1)]);
        needle.move_to(Position::new(1, 1));
        let positions: Vec<Position> = needle.positions().collect();
        assert_eq!(
            positions,
            vec![Position::new(1, 1), Position::new(2, 1), Position::new(1, 2)]
        );
    }

    #[test]
    fn probe_index_past_last_is_an_error() {
        let needle = ProbeNeedle::with_offsets(&[Position::new(1, 0)]);
        assert_eq!(needle.probe_count(), 2);
        assert_eq!(
            needle.position(2),
            Err(EngineError::ProbeOutOfRange {
                probe: 2,
                probes: 2
            })
        );
    }
}
