use super::*;
use crate::test_fixtures::{
    grid_prober_setup, handler_setup, manual_handler, manual_prober, prober_setup, run_cycle,
    run_two_phase_cycle, started_handler,
};

mod end_to_end;
mod handler;
mod reprobe;

// --- Shared test helpers ------------------------------------------------

/// Started handler built from `setup`, zero delays.
fn started(setup: &HandlerSetup) -> Handler {
    let (mut handler, _) = manual_handler(setup);
    handler.start();
    handler
}

/// Loaded prober with the start signal already raised.
fn probing(setup: &ProberSetup) -> Prober {
    let (mut prober, _) = manual_prober(setup);
    assert!(prober.load_wafer().unwrap());
    assert!(prober.send_test_start_signal());
    prober
}

/// Every primary position the needle visits on one wafer, load included.
fn visited_positions(prober: &mut Prober) -> Vec<Position> {
    let mut visited = vec![prober.position()];
    while prober.step_probe() {
        visited.push(prober.position());
    }
    visited
}
