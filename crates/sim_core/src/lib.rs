//! `sim_core`: handler/prober equipment simulation engine.
//!
//! No IO, no threads, no timers that fire by themselves. The dispatcher calls
//! in once per received command and once per idle tick; time only enters
//! through the `Clock` handed to each engine.

mod binning;
mod error;
mod faults;
mod handler;
mod needle;
mod pattern;
mod prober;
mod setup;
mod site;
mod stats;
mod timer;
mod types;

pub use binning::{BinningManager, Die, DieManager, SubDie, SubDieManager, WaferBounds};
pub use error::{EngineError, Result};
pub use faults::{CorruptionScheme, QueryFault};
pub use handler::Handler;
pub use needle::ProbeNeedle;
pub use pattern::{pattern_populated, SitePattern};
pub use prober::Prober;
pub use setup::*;
pub use site::{Site, SiteState};
pub use stats::{bin_frequencies, StatRow, Statistics};
pub use timer::{Clock, ManualClock, SystemClock, TimingGate};
pub use types::*;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

#[cfg(test)]
mod tests;
