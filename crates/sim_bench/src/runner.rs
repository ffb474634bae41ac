use crate::run_result::{self, RunResult, SummaryMetrics};
use crate::scenario::Scenario;
use anyhow::{Context, Result};
use sim_control::{CycleOutcome, HandlerSession, ProberSession, RandomBins, Session};
use sim_core::{SiteBin, Statistics};
use sim_setup::EquipmentSetup;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

pub const YIELD_FILE: &str = "yield.csv";

pub struct SeedResult {
    pub seed: u64,
    pub metrics: SummaryMetrics,
    pub lot_complete: bool,
    pub run_id: String,
}

fn build_session(
    setup: &EquipmentSetup,
    scenario: &Scenario,
    seed: u64,
) -> Result<Box<dyn Session>> {
    let source = RandomBins::new(scenario.profile.clone(), seed);
    Ok(match setup {
        EquipmentSetup::Handler(setup) => Box::new(HandlerSession::new(
            sim_setup::build_handler(setup)?,
            source,
            scenario.phase,
        )),
        EquipmentSetup::Prober(setup) => Box::new(
            ProberSession::new(sim_setup::build_prober(setup)?, source)
                .context("starting prober session")?,
        ),
    })
}

/// One row per bin, one column per site or probe.
pub fn write_yield_csv(path: &Path, stats: &Statistics) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let mut header = vec!["bin".to_string(), "category".to_string()];
    header.extend((1..=stats.columns()).map(|c| format!("{}{c}", stats.column_label)));
    header.push("total".to_string());
    writer.write_record(&header)?;

    for row in &stats.rows {
        let category = match row.category {
            SiteBin::Reprobe => "reprobe",
            SiteBin::Retest => "retest",
            SiteBin::Bin(_) | SiteBin::Unassigned => "bin",
        };
        let mut record = vec![row.bin.to_string(), category.to_string()];
        record.extend(row.counts.iter().map(u64::to_string));
        record.push(row.total.to_string());
        writer.write_record(&record)?;
    }
    writer.flush().context("flushing yield CSV")?;
    Ok(())
}

pub fn run_seed(
    setup: &EquipmentSetup,
    scenario: &Scenario,
    seed: u64,
    seed_dir: &Path,
    scenario_params: &serde_json::Value,
) -> Result<SeedResult> {
    let run_id = Uuid::new_v4().to_string();
    let start = Instant::now();

    std::fs::create_dir_all(seed_dir)
        .with_context(|| format!("creating seed directory: {}", seed_dir.display()))?;
    sim_setup::write_run_info(
        seed_dir,
        &format!("seed_{seed}"),
        seed,
        setup.kind(),
        serde_json::json!({
            "runner": "sim_bench",
            "cycles": scenario.cycles,
        }),
    )?;

    let mut session = build_session(setup, scenario, seed)?;
    let mut cycles_run = 0;
    let mut lot_complete = false;
    for cycle in 1..=scenario.cycles {
        cycles_run = cycle;
        let outcome = session
            .step()
            .with_context(|| format!("seed {seed}: cycle {cycle} failed"))?;
        if outcome == CycleOutcome::LotComplete {
            lot_complete = true;
            break;
        }
    }
    tracing::debug!(seed, cycles_run, lot_complete, "seed finished");

    let stats = session.statistics();
    write_yield_csv(&seed_dir.join(YIELD_FILE), &stats)?;
    let metrics = SummaryMetrics::from_run(&stats, session.counters(), scenario.profile.pass_bin);

    #[allow(clippy::cast_possible_truncation)]
    let wall_time_ms = start.elapsed().as_millis() as u64;
    let cycles_per_second = if wall_time_ms > 0 {
        (cycles_run as f64) / (wall_time_ms as f64 / 1000.0)
    } else {
        0.0
    };

    let (stalled, stall_reason) = run_result::detect_stall(&metrics, lot_complete);

    let run_result = RunResult {
        run_schema_version: 1,
        run_status: "completed".to_string(),
        run_id: run_id.clone(),
        git_sha: run_result::git_sha(),
        git_dirty: run_result::git_dirty(),
        seed,
        scenario_name: scenario.name.clone(),
        scenario_params: scenario_params.clone(),
        equipment: setup.kind(),
        cycles_run,
        lot_complete,
        wall_time_ms,
        cycles_per_second,
        summary_metrics: Some(metrics.clone()),
        stalled,
        stall_reason,
        yield_path: YIELD_FILE.to_string(),
        error_message: None,
    };

    run_result
        .write_atomic(&seed_dir.join("run_result.json"))
        .context("writing run_result.json")?;

    Ok(SeedResult {
        seed,
        metrics,
        lot_complete,
        run_id,
    })
}
