//! Site population patterns.
//!
//! A pattern is a pure function of (site, cycle). The handler advances the
//! cycle once per handling pass.

use serde::{Deserialize, Serialize};

use crate::{PatternKind, SiteMask};

/// Whether `site` is eligible for population on `cycle`.
///
/// `OneNotWorking` repeats every `2 × sites` cycles: one all-working cycle,
/// then `sites` cycles with one idle site (rotating), then `sites - 1`
/// cycles with only one working site (rotating).
pub fn pattern_populated(kind: PatternKind, sites: usize, cycle: u64, site: usize) -> bool {
    match kind {
        PatternKind::AllWorking => true,
        PatternKind::OneNotWorking => {
            let n = sites as u64;
            if n == 0 {
                return false;
            }
            let position = cycle % (2 * n);
            let site = site as u64;
            if position == 0 {
                true
            } else if position <= n {
                site != position - 1
            } else {
                site == position - n - 1
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitePattern {
    kind: PatternKind,
    sites: usize,
    cycle: u64,
}

impl SitePattern {
    pub fn new(kind: PatternKind, sites: usize) -> Self {
        Self {
            kind,
            sites,
            cycle: 0,
        }
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_populated(&self, site: usize) -> bool {
        site < self.sites && pattern_populated(self.kind, self.sites, self.cycle, site)
    }

    pub fn advance(&mut self) {
        self.cycle += 1;
        tracing::trace!(cycle = self.cycle, mask = %self.mask(), "site pattern advanced");
    }

    /// Current eligibility as a bitmap.
    pub fn mask(&self) -> SiteMask {
        let mut mask = SiteMask::EMPTY;
        for site in (0..self.sites).filter(|&s| self.is_populated(s)) {
            mask.insert(site);
        }
        mask
    }
}
