//! Yield statistics.
//!
//! Each column owns an append-only bin log; the frequency table is
//! recomputed from the logs whenever a report is requested.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BinCategories, SiteBin};

/// Count of each distinct bin in `history`, ordered by bin value.
pub fn bin_frequencies(history: &[i32]) -> BTreeMap<i32, u64> {
    let mut sorted = history.to_vec();
    sorted.sort_unstable();
    let mut table = BTreeMap::new();
    for run in sorted.chunk_by(|a, b| a == b) {
        table.insert(run[0], run.len() as u64);
    }
    table
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRow {
    pub bin: i32,
    pub category: SiteBin,
    /// One entry per column; zero where the column never saw this bin.
    pub counts: Vec<u64>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub column_label: String,
    pub rows: Vec<StatRow>,
    /// Ordinary bins only; reprobe and retest rows are left out.
    pub column_totals: Vec<u64>,
    pub devices_tested: u64,
}

impl Statistics {
    pub fn from_histories<'a, I>(
        column_label: &str,
        histories: I,
        categories: &BinCategories,
        devices_tested: u64,
    ) -> Self
    where
        I: IntoIterator<Item = &'a [i32]>,
    {
        let tables: Vec<BTreeMap<i32, u64>> =
            histories.into_iter().map(bin_frequencies).collect();
        let bins: BTreeSet<i32> = tables.iter().flat_map(|t| t.keys().copied()).collect();

        let mut column_totals = vec![0u64; tables.len()];
        let mut rows = Vec::with_capacity(bins.len());
        for bin in bins {
            let counts: Vec<u64> = tables
                .iter()
                .map(|t| t.get(&bin).copied().unwrap_or(0))
                .collect();
            if categories.is_ordinary(bin) {
                for (total, count) in column_totals.iter_mut().zip(&counts) {
                    *total += count;
                }
            }
            rows.push(StatRow {
                bin,
                category: categories.classify(bin),
                total: counts.iter().sum(),
                counts,
            });
        }

        Self {
            column_label: column_label.to_string(),
            rows,
            column_totals,
            devices_tested,
        }
    }

    pub fn columns(&self) -> usize {
        self.column_totals.len()
    }

    pub fn row(&self, bin: i32) -> Option<&StatRow> {
        self.rows.iter().find(|r| r.bin == bin)
    }

    /// Count of `bin` across all columns.
    pub fn bin_total(&self, bin: i32) -> u64 {
        self.row(bin).map_or(0, |r| r.total)
    }

    pub fn grand_total(&self) -> u64 {
        self.column_totals.iter().sum()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "                Yield Statistics")?;
        writeln!(f)?;
        write!(f, "         ")?;
        for column in 1..=self.columns() {
            write!(f, " {}{column:<2} ", self.column_label)?;
        }
        writeln!(f, " Total ")?;

        for row in &self.rows {
            match row.category {
                SiteBin::Reprobe => write!(f, " Reprobe ")?,
                SiteBin::Retest => write!(f, " Retest  ")?,
                SiteBin::Bin(bin) => write!(f, " Cat {bin:3} ")?,
                SiteBin::Unassigned => write!(f, "         ")?,
            }
            for &count in &row.counts {
                if count == 0 {
                    write!(f, "         ")?;
                } else {
                    write!(f, " {count:4}    ")?;
                }
            }
            writeln!(f, " {:4}    ", row.total)?;
        }

        writeln!(f)?;
        write!(f, "Total    ")?;
        for total in &self.column_totals {
            write!(f, " {total:4}    ")?;
        }
        writeln!(f, " {:4}    ", self.grand_total())?;
        writeln!(f)?;
        write!(f, "Total Number of tested devices = {}", self.devices_tested)
    }
}
