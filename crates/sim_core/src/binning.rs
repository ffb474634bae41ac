//! Wafer die bookkeeping and traversal.
//!
//! `DieManager` tracks whole dice, `SubDieManager` tracks a fixed list of
//! micro positions inside every die. Both keep a traversal cursor that the
//! prober re-homes on every wafer load and advances one step at a time.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::Position;

/// Inclusive bounding box of every known die.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaferBounds {
    pub min: Position,
    pub max: Position,
}

impl WaferBounds {
    fn around(pos: Position) -> Self {
        Self { min: pos, max: pos }
    }

    fn include(&mut self, pos: Position) {
        self.min.x = self.min.x.min(pos.x);
        self.min.y = self.min.y.min(pos.y);
        self.max.x = self.max.x.max(pos.x);
        self.max.y = self.max.y.max(pos.y);
    }
}

fn bin_cell(bin: Option<i32>) -> String {
    match bin {
        Some(bin) => format!("{bin:3} "),
        None => "  . ".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Whole dice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Die {
    pub position: Position,
    pub bin: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct DieManager {
    dies: Vec<Die>,
    index: AHashMap<Position, usize>,
    bounds: Option<WaferBounds>,
    /// `dies.len()` once stepped past the last die.
    cursor: usize,
}

impl DieManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        let mut manager = Self::new();
        for pos in positions {
            manager.add_die(pos);
        }
        manager
    }

    /// False when the die is already known.
    pub fn add_die(&mut self, position: Position) -> bool {
        if self.index.contains_key(&position) {
            tracing::trace!(%position, "already have this die");
            return false;
        }
        match &mut self.bounds {
            Some(bounds) => bounds.include(position),
            None => self.bounds = Some(WaferBounds::around(position)),
        }
        self.index.insert(position, self.dies.len());
        self.dies.push(Die {
            position,
            bin: None,
        });
        true
    }

    pub fn clear(&mut self) {
        self.dies.clear();
        self.index.clear();
        self.bounds = None;
        self.cursor = 0;
    }

    pub fn clear_bins(&mut self) {
        for die in &mut self.dies {
            die.bin = None;
        }
    }

    pub fn len(&self) -> usize {
        self.dies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dies.is_empty()
    }

    pub fn dies(&self) -> &[Die] {
        &self.dies
    }

    pub fn bounds(&self) -> Option<WaferBounds> {
        self.bounds
    }

    pub fn initialize(&mut self) {
        self.cursor = 0;
    }

    /// Moves to the next die in insertion order. False once past the last one.
    pub fn step(&mut self) -> bool {
        if self.cursor < self.dies.len() {
            self.cursor += 1;
        }
        self.cursor < self.dies.len()
    }

    pub fn current(&self) -> Option<Position> {
        self.dies.get(self.cursor).map(|d| d.position)
    }

    pub fn current_bin(&self) -> Option<i32> {
        self.dies.get(self.cursor).and_then(|d| d.bin)
    }

    pub fn on_wafer(&self, position: Position) -> bool {
        self.index.contains_key(&position)
    }

    pub fn bin_at(&self, position: Position) -> Option<i32> {
        self.index.get(&position).and_then(|&i| self.dies[i].bin)
    }

    /// False when no die sits at `position`.
    pub fn set_bin(&mut self, position: Position, bin: i32) -> bool {
        match self.index.get(&position) {
            Some(&i) => {
                self.dies[i].bin = Some(bin);
                true
            }
            None => false,
        }
    }

    pub fn set_current_bin(&mut self, bin: i32) -> bool {
        match self.dies.get_mut(self.cursor) {
            Some(die) => {
                die.bin = Some(bin);
                true
            }
            None => false,
        }
    }

    /// One line per wafer row across the bounding box; off-wafer cells are blank.
    pub fn wafer_map(&self) -> Vec<String> {
        let Some(bounds) = self.bounds else {
            return Vec::new();
        };
        (bounds.min.y..=bounds.max.y)
            .map(|y| {
                (bounds.min.x..=bounds.max.x)
                    .map(|x| {
                        let pos = Position::new(x, y);
                        if self.on_wafer(pos) {
                            bin_cell(self.bin_at(pos))
                        } else {
                            "    ".to_string()
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Sub-dice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDie {
    pub position: Position,
    /// Indexed by sub-die offset; shorter than the offset list until binned.
    pub bins: Vec<Option<i32>>,
}

impl SubDie {
    pub fn bin(&self, sub: usize) -> Option<i32> {
        self.bins.get(sub).copied().flatten()
    }

    fn set_bin(&mut self, sub: usize, bin: i32) {
        if self.bins.len() <= sub {
            self.bins.resize(sub + 1, None);
        }
        self.bins[sub] = Some(bin);
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubDieManager {
    dies: Vec<SubDie>,
    index: AHashMap<Position, usize>,
    offsets: Vec<Position>,
    bounds: Option<WaferBounds>,
    die_cursor: usize,
    sub_cursor: usize,
    /// 1-based position within the current die; 0 before initialization.
    site_number: usize,
}

impl SubDieManager {
    pub fn new(offsets: impl IntoIterator<Item = Position>) -> Self {
        let mut manager = Self::default();
        for offset in offsets {
            manager.add_offset(offset);
        }
        manager
    }

    pub fn add_die(&mut self, position: Position) -> bool {
        if self.index.contains_key(&position) {
            tracing::trace!(%position, "already have this sub-die");
            return false;
        }
        match &mut self.bounds {
            Some(bounds) => bounds.include(position),
            None => self.bounds = Some(WaferBounds::around(position)),
        }
        self.index.insert(position, self.dies.len());
        self.dies.push(SubDie {
            position,
            bins: Vec::new(),
        });
        true
    }

    pub fn add_offset(&mut self, offset: Position) -> bool {
        if self.offsets.contains(&offset) {
            tracing::trace!(%offset, "already have this sub-die position");
            return false;
        }
        self.offsets.push(offset);
        true
    }

    pub fn clear(&mut self) {
        self.dies.clear();
        self.index.clear();
        self.bounds = None;
        self.site_number = 0;
    }

    pub fn clear_offsets(&mut self) {
        self.offsets.clear();
        self.site_number = 0;
    }

    pub fn clear_bins(&mut self) {
        for die in &mut self.dies {
            die.bins.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.dies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dies.is_empty() || self.offsets.is_empty()
    }

    pub fn dies(&self) -> &[SubDie] {
        &self.dies
    }

    pub fn offsets(&self) -> &[Position] {
        &self.offsets
    }

    pub fn bounds(&self) -> Option<WaferBounds> {
        self.bounds
    }

    pub fn site_number(&self) -> usize {
        self.site_number
    }

    pub fn initialize(&mut self) {
        self.die_cursor = 0;
        self.sub_cursor = 0;
        self.site_number = usize::from(!self.is_empty());
        if self.site_number == 0 {
            tracing::debug!("sub-die layout not set, cannot initialize");
        }
    }

    /// Next sub-die of the current die, wrapping to the first sub-die of the
    /// next die. An uninitialized manager initializes instead of stepping.
    pub fn step(&mut self) -> bool {
        if self.site_number == 0 {
            self.initialize();
        } else if self.sub_cursor < self.offsets.len() {
            self.sub_cursor += 1;
            self.site_number += 1;
            if self.sub_cursor == self.offsets.len() {
                self.die_cursor += 1;
                if self.die_cursor < self.dies.len() {
                    self.sub_cursor = 0;
                    self.site_number = 1;
                }
            }
        }
        self.at_valid_position()
    }

    fn at_valid_position(&self) -> bool {
        self.die_cursor < self.dies.len() && self.sub_cursor < self.offsets.len()
    }

    pub fn current(&self) -> Option<Position> {
        if self.at_valid_position() {
            Some(self.dies[self.die_cursor].position)
        } else {
            None
        }
    }

    pub fn current_sub_die(&self) -> Option<Position> {
        if self.at_valid_position() {
            Some(self.offsets[self.sub_cursor])
        } else {
            None
        }
    }

    pub fn current_bin(&self) -> Option<i32> {
        if self.at_valid_position() {
            self.dies[self.die_cursor].bin(self.sub_cursor)
        } else {
            None
        }
    }

    pub fn on_wafer(&self, position: Position) -> bool {
        self.index.contains_key(&position)
    }

    pub fn bin_at(&self, die: Position, sub_die: Position) -> Option<i32> {
        let &i = self.index.get(&die)?;
        let sub = self.offsets.iter().position(|&o| o == sub_die)?;
        self.dies[i].bin(sub)
    }

    pub fn set_current_bin(&mut self, bin: i32) -> bool {
        if !self.at_valid_position() {
            return false;
        }
        let sub = self.sub_cursor;
        self.dies[self.die_cursor].set_bin(sub, bin);
        true
    }

    /// Bins an explicitly named (die, sub-die) pair without moving the cursor.
    pub fn set_bin(&mut self, die: Position, sub_die: Position, bin: i32) -> bool {
        let Some(&i) = self.index.get(&die) else {
            return false;
        };
        let Some(sub) = self.offsets.iter().position(|&o| o == sub_die) else {
            return false;
        };
        self.dies[i].set_bin(sub, bin);
        true
    }

    /// Like `DieManager::wafer_map`, one cell per sub-die inside each die.
    pub fn wafer_map(&self) -> Vec<String> {
        let Some(bounds) = self.bounds else {
            return Vec::new();
        };
        let blank = "    ".repeat(self.offsets.len());
        (bounds.min.y..=bounds.max.y)
            .map(|y| {
                (bounds.min.x..=bounds.max.x)
                    .map(|x| match self.index.get(&Position::new(x, y)) {
                        Some(&i) => {
                            let die = &self.dies[i];
                            let cells: String =
                                (0..self.offsets.len()).map(|s| bin_cell(die.bin(s))).collect();
                            format!("{cells}| ")
                        }
                        None => format!("{blank}  "),
                    })
                    .collect()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Either manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum BinningManager {
    Die(DieManager),
    SubDie(SubDieManager),
}

impl BinningManager {
    pub fn is_empty(&self) -> bool {
        match self {
            BinningManager::Die(m) => m.is_empty(),
            BinningManager::SubDie(m) => m.is_empty(),
        }
    }

    pub fn bounds(&self) -> Option<WaferBounds> {
        match self {
            BinningManager::Die(m) => m.bounds(),
            BinningManager::SubDie(m) => m.bounds(),
        }
    }

    pub fn initialize(&mut self) {
        match self {
            BinningManager::Die(m) => m.initialize(),
            BinningManager::SubDie(m) => m.initialize(),
        }
    }

    pub fn step(&mut self) -> bool {
        match self {
            BinningManager::Die(m) => m.step(),
            BinningManager::SubDie(m) => m.step(),
        }
    }

    pub fn current(&self) -> Option<Position> {
        match self {
            BinningManager::Die(m) => m.current(),
            BinningManager::SubDie(m) => m.current(),
        }
    }

    pub fn current_bin(&self) -> Option<i32> {
        match self {
            BinningManager::Die(m) => m.current_bin(),
            BinningManager::SubDie(m) => m.current_bin(),
        }
    }

    pub fn on_wafer(&self, position: Position) -> bool {
        match self {
            BinningManager::Die(m) => m.on_wafer(position),
            BinningManager::SubDie(m) => m.on_wafer(position),
        }
    }

    pub fn add_die(&mut self, position: Position) -> bool {
        match self {
            BinningManager::Die(m) => m.add_die(position),
            BinningManager::SubDie(m) => m.add_die(position),
        }
    }

    pub fn clear(&mut self) {
        match self {
            BinningManager::Die(m) => m.clear(),
            BinningManager::SubDie(m) => m.clear(),
        }
    }

    pub fn clear_bins(&mut self) {
        match self {
            BinningManager::Die(m) => m.clear_bins(),
            BinningManager::SubDie(m) => m.clear_bins(),
        }
    }

    pub fn wafer_map(&self) -> Vec<String> {
        match self {
            BinningManager::Die(m) => m.wafer_map(),
            BinningManager::SubDie(m) => m.wafer_map(),
        }
    }
}
