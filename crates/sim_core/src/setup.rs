//! Construction-time configuration for handlers and probers.
//!
//! Everything here is plain serde data. Defaults follow the command-line
//! defaults of the bench simulators: one wafer grid of 5×5 dies, three
//! wafers per lot, reprobe bin -2 and retest bin -1.

use serde::{Deserialize, Serialize};

use crate::{BinCategories, EngineError, Position, Result, SiteMask, MAX_SITES};

// ---------------------------------------------------------------------------
// Selection enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PatternKind {
    #[default]
    AllWorking,
    OneNotWorking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CorruptionKind {
    #[default]
    None,
    SingleThreshold {
        period: u64,
    },
    DoubleThreshold {
        first: u64,
        second: u64,
    },
}

/// How a handler treats sites binned to the reprobe category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReprobeMode {
    /// Reprobe is an ordinary history entry.
    #[default]
    Ignore,
    /// Pending reprobes are handled in a pass of their own; the pattern waits.
    Separately,
    /// Pending reprobes are repopulated alongside fresh pattern sites.
    Interleaved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SteppingMode {
    Simple,
    Efficient,
    Compatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProberMode {
    LearnList,
    #[default]
    Prober,
    /// The tester moves the needle itself; no test start is raised after a load.
    TesterDriven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaferShape {
    #[default]
    Rectangle,
    /// Dies outside the ellipse inscribed in the bounding box are dropped.
    Round,
}

fn default_reprobe_bin() -> Option<i32> {
    BinCategories::default().reprobe
}

fn default_retest_bin() -> Option<i32> {
    BinCategories::default().retest
}

fn default_max_bin() -> i32 {
    99
}

fn default_wafers_to_test() -> u32 {
    3
}

/// Sentinel bins must differ from each other and lie outside the ordinary
/// range `0..=max_bin`.
fn check_categories(reprobe: Option<i32>, retest: Option<i32>, max_bin: i32) -> Result<()> {
    if max_bin < 0 {
        return Err(EngineError::InvalidSetup(format!(
            "max_bin must not be negative, got {max_bin}"
        )));
    }
    if reprobe.is_some() && reprobe == retest {
        return Err(EngineError::InvalidSetup(
            "reprobe and retest bins must differ".to_string(),
        ));
    }
    for (name, bin) in [("reprobe_bin", reprobe), ("retest_bin", retest)] {
        if let Some(bin) = bin {
            if (0..=max_bin).contains(&bin) {
                return Err(EngineError::InvalidSetup(format!(
                    "{name} {bin} collides with ordinary bins 0..={max_bin}"
                )));
            }
        }
    }
    Ok(())
}

fn check_period(period: u64) -> Result<()> {
    if period == 0 {
        return Err(EngineError::InvalidPeriod { period });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Handler setup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerSetup {
    pub site_count: usize,
    /// Absent means every site is enabled.
    #[serde(default)]
    pub site_mask: Option<SiteMask>,
    #[serde(default)]
    pub pattern: PatternKind,
    #[serde(default)]
    pub handling_delay_ms: u64,
    #[serde(default)]
    pub auto_setup_delay_ms: u64,
    /// Absent means continuous testing; the lot never completes.
    #[serde(default)]
    pub devices_to_test: Option<u64>,
    #[serde(default)]
    pub corruption: CorruptionKind,
    #[serde(default)]
    pub reprobe_mode: ReprobeMode,
    #[serde(default = "default_reprobe_bin")]
    pub reprobe_bin: Option<i32>,
    #[serde(default = "default_retest_bin")]
    pub retest_bin: Option<i32>,
    #[serde(default = "default_max_bin")]
    pub max_bin: i32,
    /// Stop the handler after this many verified bin echoes.
    #[serde(default)]
    pub max_verify_count: Option<u64>,
    /// Every K-th query reply is replaced by a degenerate one.
    #[serde(default)]
    pub query_error_every: Option<u64>,
}

impl HandlerSetup {
    pub fn new(site_count: usize) -> Self {
        Self {
            site_count,
            site_mask: None,
            pattern: PatternKind::default(),
            handling_delay_ms: 0,
            auto_setup_delay_ms: 0,
            devices_to_test: None,
            corruption: CorruptionKind::default(),
            reprobe_mode: ReprobeMode::default(),
            reprobe_bin: default_reprobe_bin(),
            retest_bin: default_retest_bin(),
            max_bin: default_max_bin(),
            max_verify_count: None,
            query_error_every: None,
        }
    }

    pub fn categories(&self) -> BinCategories {
        BinCategories {
            reprobe: self.reprobe_bin,
            retest: self.retest_bin,
        }
    }

    /// Effective mask: the configured one, or all sites.
    pub fn enabled_mask(&self) -> SiteMask {
        match self.site_mask {
            Some(mask) if !mask.is_empty() => mask,
            _ => SiteMask::all(self.site_count),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.site_count == 0 {
            return Err(EngineError::NoSites);
        }
        if self.site_count > MAX_SITES {
            return Err(EngineError::TooManySites {
                sites: self.site_count,
                max: MAX_SITES,
            });
        }
        let all = SiteMask::all(self.site_count);
        if !(self.enabled_mask() & !all).is_empty() {
            return Err(EngineError::InvalidSetup(format!(
                "site mask {} names sites beyond the {} configured",
                self.enabled_mask(),
                self.site_count
            )));
        }
        match self.corruption {
            CorruptionKind::None => {}
            CorruptionKind::SingleThreshold { period } => check_period(period)?,
            CorruptionKind::DoubleThreshold { first, second } => {
                check_period(first)?;
                check_period(second)?;
            }
        }
        if let Some(every) = self.query_error_every {
            check_period(every)?;
        }
        if self.reprobe_mode != ReprobeMode::Ignore && self.reprobe_bin.is_none() {
            return Err(EngineError::ReprobeNotConfigured);
        }
        check_categories(self.reprobe_bin, self.retest_bin, self.max_bin)?;
        if let Some(highest) = self.corruption.highest_output() {
            if self.max_bin < highest {
                return Err(EngineError::InvalidSetup(format!(
                    "corrupted bins reach {highest} but max_bin is {}",
                    self.max_bin
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Prober setup
// ---------------------------------------------------------------------------

/// Wafer geometry: a bounding box plus a shape, or an explicit die list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaferLayout {
    pub min: Position,
    pub max: Position,
    #[serde(default)]
    pub reference: Position,
    #[serde(default)]
    pub shape: WaferShape,
    /// Overrides `min`/`max`/`shape` when present; dies are visited in list order.
    #[serde(default)]
    pub dies: Option<Vec<Position>>,
}

impl Default for WaferLayout {
    fn default() -> Self {
        Self {
            min: Position::new(0, 0),
            max: Position::new(4, 4),
            reference: Position::new(0, 0),
            shape: WaferShape::Rectangle,
            dies: None,
        }
    }
}

impl WaferLayout {
    pub fn rectangle(min: Position, max: Position) -> Self {
        Self {
            min,
            max,
            reference: min,
            ..Self::default()
        }
    }

    /// Die positions in traversal order: rows top to bottom, x ascending.
    pub fn die_positions(&self) -> Vec<Position> {
        if let Some(dies) = &self.dies {
            return dies.clone();
        }
        let mut positions = Vec::new();
        for y in self.min.y..=self.max.y {
            for x in self.min.x..=self.max.x {
                let pos = Position::new(x, y);
                if self.shape == WaferShape::Rectangle || self.inside_ellipse(pos) {
                    positions.push(pos);
                }
            }
        }
        positions
    }

    fn inside_ellipse(&self, pos: Position) -> bool {
        // Doubled coordinates keep the centre on the integer grid.
        let width = i64::from(self.max.x - self.min.x + 1);
        let height = i64::from(self.max.y - self.min.y + 1);
        let dx = 2 * i64::from(pos.x) - i64::from(self.min.x + self.max.x);
        let dy = 2 * i64::from(pos.y) - i64::from(self.min.y + self.max.y);
        dx * dx * height * height + dy * dy * width * width <= width * width * height * height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProberSetup {
    #[serde(default)]
    pub wafer: WaferLayout,
    /// Offsets of probes 1.. relative to probe 0, which sits at the primary position.
    #[serde(default)]
    pub probe_offsets: Vec<Position>,
    /// Present for sub-die probing: micro positions visited inside every die.
    #[serde(default)]
    pub sub_die_offsets: Option<Vec<Position>>,
    /// Absent selects `Simple` for one probe and `Compatible` for a multi-probe needle.
    #[serde(default)]
    pub stepping: Option<SteppingMode>,
    #[serde(default)]
    pub mode: ProberMode,
    #[serde(default)]
    pub handling_delay_ms: u64,
    #[serde(default)]
    pub auto_setup_delay_ms: u64,
    #[serde(default = "default_wafers_to_test")]
    pub wafers_to_test: u32,
    #[serde(default = "default_reprobe_bin")]
    pub reprobe_bin: Option<i32>,
    #[serde(default = "default_retest_bin")]
    pub retest_bin: Option<i32>,
    #[serde(default = "default_max_bin")]
    pub max_bin: i32,
    #[serde(default)]
    pub query_error_every: Option<u64>,
}

impl Default for ProberSetup {
    fn default() -> Self {
        Self {
            wafer: WaferLayout::default(),
            probe_offsets: Vec::new(),
            sub_die_offsets: None,
            stepping: None,
            mode: ProberMode::default(),
            handling_delay_ms: 0,
            auto_setup_delay_ms: 0,
            wafers_to_test: default_wafers_to_test(),
            reprobe_bin: default_reprobe_bin(),
            retest_bin: default_retest_bin(),
            max_bin: default_max_bin(),
            query_error_every: None,
        }
    }
}

impl ProberSetup {
    pub fn categories(&self) -> BinCategories {
        BinCategories {
            reprobe: self.reprobe_bin,
            retest: self.retest_bin,
        }
    }

    pub fn stepping_mode(&self) -> SteppingMode {
        match self.stepping {
            Some(mode) => mode,
            None if self.probe_offsets.is_empty() => SteppingMode::Simple,
            None => SteppingMode::Compatible,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let wafer = &self.wafer;
        if wafer.dies.is_none() {
            if wafer.min.x > wafer.max.x || wafer.min.y > wafer.max.y {
                return Err(EngineError::InvalidSetup(format!(
                    "wafer bounding box {}..{} is inverted",
                    wafer.min, wafer.max
                )));
            }
            let x_range = wafer.min.x..=wafer.max.x;
            let y_range = wafer.min.y..=wafer.max.y;
            if !x_range.contains(&wafer.reference.x) || !y_range.contains(&wafer.reference.y) {
                return Err(EngineError::InvalidSetup(format!(
                    "reference die {} lies outside the wafer bounding box",
                    wafer.reference
                )));
            }
        }
        if wafer.die_positions().is_empty() {
            return Err(EngineError::EmptyWafer);
        }
        if matches!(&self.sub_die_offsets, Some(offsets) if offsets.is_empty()) {
            return Err(EngineError::EmptySubDieLayout);
        }
        if self.wafers_to_test == 0 {
            return Err(EngineError::InvalidSetup(
                "wafers_to_test must be at least 1".to_string(),
            ));
        }
        if let Some(every) = self.query_error_every {
            check_period(every)?;
        }
        check_categories(self.reprobe_bin, self.retest_bin, self.max_bin)
    }
}
