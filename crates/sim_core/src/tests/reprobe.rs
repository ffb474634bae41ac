use super::*;

fn reprobe_setup(mode: ReprobeMode, sites: usize) -> HandlerSetup {
    HandlerSetup {
        reprobe_mode: mode,
        ..handler_setup(sites)
    }
}

#[test]
fn separate_pass_reloads_only_the_reprobe_site() {
    let mut handler = started(&reprobe_setup(ReprobeMode::Separately, 2));
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.devices_tested(), 2);

    handler.reprobe(0).unwrap();
    assert!(handler.reprobe_pending());
    assert_eq!(handler.devices_tested(), 1);
    handler.send_to_bin(1, 5).unwrap();
    let cycle = handler.pattern().cycle();

    assert!(handler.send_test_start_signal());
    assert_eq!(handler.population(), SiteMask(0b01));
    assert!(!handler.reprobe_pending());
    assert_eq!(handler.pattern().cycle(), cycle);

    // Exactly one device for site 0, never two.
    assert_eq!(handler.devices_tested(), 2);
}

#[test]
fn interleaved_reprobe_joins_the_pattern_pass() {
    let mut handler = started(&reprobe_setup(ReprobeMode::Interleaved, 2));
    assert!(handler.send_test_start_signal());
    handler.send_to_bin(0, -2).unwrap();
    handler.send_to_bin(1, 5).unwrap();

    assert!(handler.send_test_start_signal());
    assert_eq!(handler.population(), SiteMask(0b11));
    assert!(!handler.reprobe_pending());
    assert_eq!(handler.devices_tested(), 3);
}

#[test]
fn ignored_reprobe_is_an_ordinary_history_entry() {
    let mut handler = started(&reprobe_setup(ReprobeMode::Ignore, 2));
    run_cycle(&mut handler, &[-2, 3]).unwrap();
    assert!(!handler.reprobe_pending());
    assert_eq!(handler.devices_tested(), 2);

    let stats = handler.statistics();
    assert_eq!(stats.row(-2).map(|r| r.category), Some(SiteBin::Reprobe));
    assert_eq!(stats.column_totals, vec![0, 1]);
}

#[test]
fn lot_waits_for_pending_reprobe() {
    let setup = HandlerSetup {
        devices_to_test: Some(2),
        ..reprobe_setup(ReprobeMode::Separately, 2)
    };
    let mut handler = started(&setup);
    assert!(handler.send_test_start_signal());
    handler.send_to_bin(0, -2).unwrap();
    handler.send_to_bin(1, 5).unwrap();
    assert!(!handler.all_tests_complete());

    // The reprobe reload is allowed even though the budget looks spent.
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.population(), SiteMask(0b01));
    handler.send_to_bin(0, 5).unwrap();
    assert!(handler.all_tests_complete());

    assert!(!handler.send_test_start_signal());
    assert_eq!(handler.status(), HandlerStatus::Stopped);
    assert_eq!(handler.devices_tested(), 2);
}

#[test]
fn explicit_populate_settles_a_pending_reprobe() {
    let setup = HandlerSetup {
        devices_to_test: Some(1),
        ..reprobe_setup(ReprobeMode::Separately, 1)
    };
    let mut handler = started(&setup);
    assert!(handler.send_test_start_signal());
    handler.reprobe(0).unwrap();
    assert_eq!(handler.devices_tested(), 0);

    assert!(handler.populate(0).unwrap());
    assert!(!handler.reprobe_pending());
    assert_eq!(handler.devices_tested(), 1);

    handler.send_to_bin(0, 5).unwrap();
    assert!(!handler.send_test_start_signal());
    assert_eq!(handler.status(), HandlerStatus::Stopped);
    assert_eq!(handler.devices_tested(), 1);
}

#[test]
fn contact_re_extend_is_a_manual_reprobe() {
    let mut handler = started(&reprobe_setup(ReprobeMode::Separately, 1));
    assert!(handler.send_test_start_signal());

    assert!(handler.set_contact(0, false).unwrap());
    assert!(!handler.set_contact(0, false).unwrap());
    assert!(handler.set_contact(0, true).unwrap());

    assert_eq!(handler.sites()[0].history(), &[-2]);
    assert!(handler.reprobe_pending());
    assert!(handler.send_test_start_signal());
    assert!(!handler.reprobe_pending());
}

#[test]
fn two_phase_reprobe_is_counted_on_release() {
    let mut handler = started(&reprobe_setup(ReprobeMode::Separately, 1));
    assert!(handler.send_test_start_signal());
    handler.set_bin(0, -2).unwrap();
    assert_eq!(handler.bin(0).unwrap(), SiteBin::Reprobe);
    assert!(!handler.reprobe_pending());

    handler.release(0).unwrap();
    assert!(handler.reprobe_pending());
    assert_eq!(handler.devices_tested(), 0);
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.devices_tested(), 1);
}
