//! Validation tests for the shipped `config/*.json` equipment setups.
//!
//! These load the actual files and check they build working engines.

use sim_core::{
    CorruptionKind, HandlerStatus, ManualClock, ProberStatus, ReprobeMode, SteppingMode,
    WaferShape,
};
use sim_setup::{
    build_handler_with_clock, build_prober_with_clock, load_equipment, load_handler_setup,
    load_prober_setup, EquipmentKind,
};

/// Integration tests run from the crate directory, so we go up two levels.
fn config_dir() -> String {
    let manifest = std::env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    format!("{manifest}/../../config")
}

#[test]
fn handler_config_loads() {
    let setup = load_handler_setup(&config_dir()).expect("handler.json should load");
    assert_eq!(setup.site_count, 4);
    assert_eq!(setup.reprobe_mode, ReprobeMode::Separately);
    assert_eq!(setup.corruption, CorruptionKind::SingleThreshold { period: 17 });
}

#[test]
fn prober_config_loads() {
    let setup = load_prober_setup(&config_dir()).expect("prober.json should load");
    assert_eq!(setup.wafer.shape, WaferShape::Round);
    assert_eq!(setup.stepping_mode(), SteppingMode::Compatible);
    assert_eq!(setup.probe_offsets.len(), 1);
}

#[test]
fn both_kinds_load_through_equipment() {
    for kind in [EquipmentKind::Handler, EquipmentKind::Prober] {
        let setup = load_equipment(&config_dir(), kind).unwrap();
        assert_eq!(setup.kind(), kind);
    }
}

#[test]
fn handler_config_raises_first_start() {
    let setup = load_handler_setup(&config_dir()).unwrap();
    let mut handler = build_handler_with_clock(&setup, Box::new(ManualClock::new())).unwrap();
    handler.start();
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.status(), HandlerStatus::WaitingForTestStart);
    assert_eq!(handler.population().count(), 4);
}

#[test]
fn prober_config_walks_a_full_wafer() {
    let setup = load_prober_setup(&config_dir()).unwrap();
    let mut prober = build_prober_with_clock(&setup, Box::new(ManualClock::new())).unwrap();
    assert!(prober.load_wafer().unwrap());
    assert!(prober.send_test_start_signal());
    assert_eq!(prober.status(), ProberStatus::Probing);

    let mut steps = 0;
    while prober.step_probe() {
        assert!(!prober.probe_mask().is_empty());
        steps += 1;
    }
    assert!(steps > 0);
    assert!(prober.wafer_complete());
}
