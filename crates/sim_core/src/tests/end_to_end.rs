use super::*;

#[test]
fn four_site_lot_statistics() {
    let setup = HandlerSetup {
        site_mask: Some(SiteMask(0xF)),
        ..handler_setup(4)
    };
    let mut handler = started(&setup);

    assert!(handler.send_test_start_signal());
    assert_eq!(handler.population(), SiteMask(0xF));
    for (site, bin) in [(0, 5), (1, 5), (2, 7), (3, 5)] {
        assert!(handler.send_to_bin(site, bin).unwrap());
    }
    assert!(handler.all_sites_binned());
    assert_eq!(handler.pattern().cycle(), 1);

    assert!(handler.send_test_start_signal());
    assert_eq!(handler.population(), SiteMask(0xF));

    let stats = handler.log_statistics();
    assert_eq!(stats.bin_total(5), 3);
    assert_eq!(stats.bin_total(7), 1);
    assert_eq!(stats.column_totals, vec![1, 1, 1, 1]);
    assert_eq!(stats.grand_total(), 4);
    assert_eq!(stats.devices_tested, 8);
}

#[test]
fn site_history_tracks_every_release() {
    let mut handler = started_handler(2);
    for k in 1..=6 {
        run_two_phase_cycle(&mut handler, &[k]).unwrap();
        for site in handler.sites() {
            assert_eq!(site.history().len(), k as usize);
            assert!(site.ready_for_release());
        }
    }
}

#[test]
fn corrupted_runs_are_reproducible() {
    let setup = HandlerSetup {
        corruption: CorruptionKind::SingleThreshold { period: 17 },
        ..handler_setup(3)
    };
    let run = || {
        let mut handler = started(&setup);
        for cycle in 0..30 {
            run_cycle(&mut handler, &[cycle % 10, 1, 2]).unwrap();
        }
        handler
            .sites()
            .iter()
            .map(|s| s.history().to_vec())
            .collect::<Vec<_>>()
    };
    let first = run();
    assert_eq!(first, run());
    assert_eq!(first.iter().map(Vec::len).sum::<usize>(), 90);
}

#[test]
fn full_wafer_with_statistics() {
    let mut prober = probing(&prober_setup());
    let mut bins = 0;
    loop {
        let bin = if prober.position().x == 2 { 2 } else { 1 };
        assert!(prober.bin_die(bin, 0).unwrap());
        bins += 1;
        if !prober.step_probe() {
            break;
        }
    }
    assert_eq!(bins, 25);
    let stats = prober.log_statistics();
    assert_eq!(stats.bin_total(1), 20);
    assert_eq!(stats.bin_total(2), 5);
    assert!(prober.wafer_map().iter().all(|row| row.contains("  2 ")));
}
