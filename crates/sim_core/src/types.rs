//! Value types shared by the handler and prober engines.

use serde::{Deserialize, Serialize};

/// Largest handler supported; the population bitmap is a `u64`.
pub const MAX_SITES: usize = 64;

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Die coordinate on the wafer grid, or an offset between two coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    /// Parking position of the needle after the last die of a wafer.
    pub const HOME: Position = Position { x: -999, y: -999 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_home(self) -> bool {
        self == Self::HOME
    }
}

impl std::ops::Add for Position {
    type Output = Position;

    fn add(self, rhs: Position) -> Position {
        Position::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Site mask
// ---------------------------------------------------------------------------

/// One bit per site; bit *i* set means site *i*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteMask(pub u64);

impl SiteMask {
    pub const EMPTY: SiteMask = SiteMask(0);

    /// Mask with the low `sites` bits set.
    pub fn all(sites: usize) -> Self {
        if sites >= MAX_SITES {
            SiteMask(u64::MAX)
        } else {
            SiteMask((1u64 << sites) - 1)
        }
    }

    pub fn contains(self, site: usize) -> bool {
        site < MAX_SITES && self.0 & (1u64 << site) != 0
    }

    pub fn insert(&mut self, site: usize) {
        if site < MAX_SITES {
            self.0 |= 1u64 << site;
        }
    }

    pub fn remove(&mut self, site: usize) {
        if site < MAX_SITES {
            self.0 &= !(1u64 << site);
        }
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

impl std::ops::BitAnd for SiteMask {
    type Output = SiteMask;

    fn bitand(self, rhs: SiteMask) -> SiteMask {
        SiteMask(self.0 & rhs.0)
    }
}

impl std::ops::Not for SiteMask {
    type Output = SiteMask;

    fn not(self) -> SiteMask {
        SiteMask(!self.0)
    }
}

impl std::fmt::Display for SiteMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bin categories
// ---------------------------------------------------------------------------

/// A bin value as seen by the dispatcher. `Unassigned` never collides with
/// a configured category value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiteBin {
    Unassigned,
    Reprobe,
    Retest,
    Bin(i32),
}

/// The two sentinel bin values. Either may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinCategories {
    pub reprobe: Option<i32>,
    pub retest: Option<i32>,
}

impl Default for BinCategories {
    fn default() -> Self {
        Self {
            reprobe: Some(-2),
            retest: Some(-1),
        }
    }
}

impl BinCategories {
    pub fn classify(&self, bin: i32) -> SiteBin {
        if self.reprobe == Some(bin) {
            SiteBin::Reprobe
        } else if self.retest == Some(bin) {
            SiteBin::Retest
        } else {
            SiteBin::Bin(bin)
        }
    }

    pub fn is_reprobe(&self, bin: i32) -> bool {
        self.reprobe == Some(bin)
    }

    /// True for a real pass/fail bin, false for either sentinel.
    pub fn is_ordinary(&self, bin: i32) -> bool {
        matches!(self.classify(bin), SiteBin::Bin(_))
    }
}

// ---------------------------------------------------------------------------
// Equipment status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerStatus {
    Stopped,
    Handling,
    WaitingForTestStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProberStatus {
    Stopped,
    LoadingWafer,
    Probing,
}
