//! Shared test fixtures for sim_core and downstream crates.
//!
//! Engines built here run on a `ManualClock`, so tests decide exactly when
//! handling and auto-setup delays expire.

use crate::{
    Handler, HandlerSetup, ManualClock, Position, Prober, ProberSetup, SiteMask, SteppingMode,
    WaferLayout,
};

/// Handler setup with every default: all sites enabled, AllWorking,
/// no delays, unbounded lot.
pub fn handler_setup(sites: usize) -> HandlerSetup {
    HandlerSetup::new(sites)
}

/// Default 5×5 wafer, single probe, three wafers per lot.
pub fn prober_setup() -> ProberSetup {
    ProberSetup::default()
}

/// Prober setup on a `width`×`height` rectangle starting at (0,0).
pub fn grid_prober_setup(width: i32, height: i32, stepping: SteppingMode) -> ProberSetup {
    ProberSetup {
        wafer: WaferLayout::rectangle(Position::new(0, 0), Position::new(width - 1, height - 1)),
        stepping: Some(stepping),
        ..ProberSetup::default()
    }
}

pub fn manual_handler(setup: &HandlerSetup) -> (Handler, ManualClock) {
    let clock = ManualClock::new();
    let handler = Handler::with_clock(setup, Box::new(clock.clone())).unwrap();
    (handler, clock)
}

pub fn manual_prober(setup: &ProberSetup) -> (Prober, ManualClock) {
    let clock = ManualClock::new();
    let prober = Prober::with_clock(setup, Box::new(clock.clone())).unwrap();
    (prober, clock)
}

/// Started handler with zero delays.
pub fn started_handler(sites: usize) -> Handler {
    let (mut handler, _) = manual_handler(&handler_setup(sites));
    handler.start();
    handler
}

/// One single-phase cycle: poll for test start, then bin every populated
/// site, cycling through `bins`. Returns the population seen, or `None`
/// when the handler raised no test start.
pub fn run_cycle(handler: &mut Handler, bins: &[i32]) -> Option<SiteMask> {
    if !handler.send_test_start_signal() {
        return None;
    }
    let population = handler.population();
    for (n, site) in (0..handler.site_count())
        .filter(|&s| population.contains(s))
        .enumerate()
    {
        handler.send_to_bin(site, bins[n % bins.len()]).unwrap();
    }
    Some(population)
}

/// Same as `run_cycle` with two-phase binning: set every bin, then release.
pub fn run_two_phase_cycle(handler: &mut Handler, bins: &[i32]) -> Option<SiteMask> {
    if !handler.send_test_start_signal() {
        return None;
    }
    let population = handler.population();
    let sites: Vec<usize> = (0..handler.site_count())
        .filter(|&s| population.contains(s))
        .collect();
    for (n, &site) in sites.iter().enumerate() {
        handler.set_bin(site, bins[n % bins.len()]).unwrap();
    }
    for &site in &sites {
        handler.release(site).unwrap();
    }
    Some(population)
}
