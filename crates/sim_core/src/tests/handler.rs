use super::*;

#[test]
fn stopped_handler_raises_no_start() {
    let (mut handler, _) = manual_handler(&handler_setup(2));
    assert_eq!(handler.status(), HandlerStatus::Stopped);
    assert!(!handler.send_test_start_signal());
    assert_eq!(handler.population(), SiteMask::EMPTY);
}

#[test]
fn start_signal_waits_for_handling_delay() {
    let setup = HandlerSetup {
        handling_delay_ms: 50,
        ..handler_setup(2)
    };
    let (mut handler, clock) = manual_handler(&setup);
    handler.start();
    assert!(!handler.send_test_start_signal());
    clock.advance_ms(49);
    assert!(!handler.send_test_start_signal());
    clock.advance_ms(1);
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.status(), HandlerStatus::WaitingForTestStart);
}

#[test]
fn auto_setup_starts_the_handler() {
    let setup = HandlerSetup {
        auto_setup_delay_ms: 100,
        ..handler_setup(1)
    };
    let (mut handler, clock) = manual_handler(&setup);
    assert!(!handler.send_test_start_signal());
    clock.advance_ms(100);
    assert!(handler.send_test_start_signal());
    assert!(handler.is_running());
}

#[test]
fn unbounded_all_working_counts_every_device() {
    let mut handler = started_handler(4);
    for _ in 0..10 {
        assert_eq!(run_cycle(&mut handler, &[1]), Some(SiteMask(0xF)));
    }
    assert_eq!(handler.devices_tested(), 40);
    assert!(!handler.all_tests_complete());
}

#[test]
fn waiting_handler_does_not_repopulate() {
    let mut handler = started_handler(2);
    assert!(handler.send_test_start_signal());
    assert!(!handler.send_test_start_signal());
    assert_eq!(handler.devices_tested(), 2);
    handler.send_to_bin(0, 1).unwrap();
    // One site still out: no new population yet.
    assert!(!handler.send_test_start_signal());
    assert!(!handler.all_sites_binned());
}

#[test]
fn one_not_working_rotates_population() {
    let setup = HandlerSetup {
        pattern: PatternKind::OneNotWorking,
        ..handler_setup(3)
    };
    let mut handler = started(&setup);
    let seen: Vec<u64> = (0..7)
        .map(|_| run_cycle(&mut handler, &[1]).unwrap().bits())
        .collect();
    assert_eq!(seen, vec![0b111, 0b110, 0b101, 0b011, 0b001, 0b010, 0b111]);
}

#[test]
fn masked_sites_never_populate() {
    let setup = HandlerSetup {
        site_mask: Some(SiteMask(0b0101)),
        ..handler_setup(4)
    };
    let mut handler = started(&setup);
    assert_eq!(run_cycle(&mut handler, &[1]), Some(SiteMask(0b0101)));
    assert_eq!(handler.sites_disabled(), SiteMask(0b1010));

    handler.set_site_mask(SiteMask(0xFF));
    assert_eq!(handler.sites_enabled(), SiteMask(0xF));
    assert_eq!(run_cycle(&mut handler, &[1]), Some(SiteMask(0xF)));
}

#[test]
fn pattern_skips_states_with_no_enabled_site() {
    let setup = HandlerSetup {
        pattern: PatternKind::OneNotWorking,
        site_mask: Some(SiteMask(0b01)),
        ..handler_setup(2)
    };
    let mut handler = started(&setup);
    // Cycle 0 loads site 0; cycle 1 idles site 0, so the pass retries on cycle 2.
    assert_eq!(run_cycle(&mut handler, &[1]), Some(SiteMask(0b01)));
    assert_eq!(handler.pattern().cycle(), 1);
    assert_eq!(run_cycle(&mut handler, &[1]), Some(SiteMask(0b01)));
    assert_eq!(handler.pattern().cycle(), 3);
}

#[test]
fn two_phase_binning_reports_bin_until_release() {
    let mut handler = started_handler(2);
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.bin(0).unwrap(), SiteBin::Unassigned);
    assert!(!handler.ready_for_release());

    assert!(handler.set_bin(0, 3).unwrap());
    assert!(handler.set_bin(1, 4).unwrap());
    assert_eq!(handler.bin(0).unwrap(), SiteBin::Bin(3));
    assert!(handler.ready_for_release());

    // A resend before release replaces the stored bin.
    assert!(handler.set_bin(0, 6).unwrap());
    assert_eq!(handler.bin(0).unwrap(), SiteBin::Bin(6));

    assert!(handler.release(0).unwrap());
    assert!(!handler.all_sites_binned());
    assert!(handler.release(1).unwrap());
    assert!(handler.all_sites_binned());
    assert_eq!(handler.status(), HandlerStatus::Handling);
    assert_eq!(handler.sites()[0].history(), &[6]);
    assert_eq!(handler.bin(0).unwrap(), SiteBin::Unassigned);
}

#[test]
fn two_phase_cycles_keep_history_in_step() {
    let mut handler = started_handler(3);
    for _ in 0..5 {
        run_two_phase_cycle(&mut handler, &[2, 3]).unwrap();
    }
    for site in handler.sites() {
        assert_eq!(site.history().len(), 5);
    }
    assert_eq!(handler.devices_tested(), 15);
}

#[test]
fn misuse_is_a_quiet_no_op() {
    let mut handler = started_handler(2);
    assert!(!handler.release(0).unwrap());
    assert!(!handler.send_to_bin(0, 1).unwrap());
    assert!(!handler.set_bin(1, 1).unwrap());

    assert!(handler.send_test_start_signal());
    assert!(!handler.release(0).unwrap());
    assert!(!handler.populate(0).unwrap());
}

#[test]
fn addressing_errors_are_reported() {
    let mut handler = started_handler(2);
    assert_eq!(
        handler.send_to_bin(2, 1),
        Err(EngineError::SiteOutOfRange { site: 2, sites: 2 })
    );
    assert!(handler.send_test_start_signal());
    assert_eq!(
        handler.send_to_bin(0, 100),
        Err(EngineError::BinOutOfRange { bin: 100, max: 99 })
    );
    assert_eq!(handler.sites()[0].state(), SiteState::WaitingBin);
}

#[test]
fn unconfigured_categories_are_errors() {
    let setup = HandlerSetup {
        reprobe_bin: None,
        retest_bin: None,
        ..handler_setup(1)
    };
    let mut handler = started(&setup);
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.reprobe(0), Err(EngineError::ReprobeNotConfigured));
    assert_eq!(handler.retest(0), Err(EngineError::RetestNotConfigured));
    assert_eq!(handler.sites()[0].state(), SiteState::WaitingBin);
}

#[test]
fn corruption_alters_value_not_count() {
    let setup = HandlerSetup {
        corruption: CorruptionKind::SingleThreshold { period: 3 },
        ..handler_setup(1)
    };
    let mut handler = started(&setup);
    for _ in 0..3 {
        run_cycle(&mut handler, &[1]).unwrap();
    }
    assert_eq!(handler.sites()[0].history(), &[1, 1, 4]);
    assert_eq!(handler.corruption().corrupted(), 1);
    assert_eq!(handler.devices_tested(), 3);
}

#[test]
fn corrupted_bins_stay_ordinary_and_in_range() {
    let colliding = HandlerSetup {
        reprobe_bin: Some(3),
        reprobe_mode: ReprobeMode::Separately,
        corruption: CorruptionKind::SingleThreshold { period: 1 },
        ..handler_setup(1)
    };
    assert!(Handler::with_clock(&colliding, Box::new(ManualClock::new())).is_err());

    let setup = HandlerSetup {
        max_bin: 7,
        reprobe_mode: ReprobeMode::Separately,
        corruption: CorruptionKind::SingleThreshold { period: 1 },
        ..handler_setup(1)
    };
    let mut handler = started(&setup);
    for _ in 0..20 {
        run_cycle(&mut handler, &[7]).unwrap();
    }
    let history = handler.sites()[0].history();
    assert!(history.iter().all(|b| (0..=7).contains(b)));
    assert!(!handler.reprobe_pending());
    assert_eq!(handler.devices_tested(), 20);
}

#[test]
fn sentinel_bins_are_never_corrupted() {
    let setup = HandlerSetup {
        corruption: CorruptionKind::SingleThreshold { period: 1 },
        ..handler_setup(1)
    };
    let mut handler = started(&setup);
    assert!(handler.send_test_start_signal());
    handler.retest(0).unwrap();
    assert_eq!(handler.sites()[0].history(), &[-1]);
    assert_eq!(handler.corruption().corrupted(), 0);
}

#[test]
fn query_fault_degrades_every_kth_reply() {
    let setup = HandlerSetup {
        query_error_every: Some(3),
        ..handler_setup(1)
    };
    let (mut handler, _) = manual_handler(&setup);
    let replies: Vec<&str> = (0..6).map(|_| handler.query_fault().filter("ok")).collect();
    assert_eq!(replies, vec!["ok", "ok", " ", "ok", "ok", " "]);
}

#[test]
fn occupied_site_alone_raises_no_test_start() {
    let mut handler = started_handler(1);
    assert!(handler.send_test_start_signal());
    handler.send_to_bin(0, 1).unwrap();
    assert_eq!(handler.status(), HandlerStatus::Handling);

    // Loaded outside the pattern while handling: no new device for this poll.
    assert!(handler.populate(0).unwrap());
    assert!(!handler.send_test_start_signal());
    assert_eq!(handler.status(), HandlerStatus::Handling);
    assert_eq!(handler.devices_tested(), 2);

    handler.send_to_bin(0, 1).unwrap();
    assert!(handler.send_test_start_signal());
    assert_eq!(handler.devices_tested(), 3);
}
