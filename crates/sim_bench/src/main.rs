use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use run_result::SummaryMetrics;
use sim_setup::EquipmentSetup;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod overrides;
mod run_result;
mod runner;
mod scenario;
mod summary;

#[derive(Parser)]
#[command(
    name = "sim_bench",
    about = "Automated scenario runner for equipment simulation benchmarking"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play one scenario against every seed it lists, in parallel.
    Run {
        /// Scenario JSON describing equipment, profile and seeds.
        #[arg(long)]
        scenario: String,
        /// Directory that receives one timestamped folder per invocation.
        #[arg(long, default_value = "runs")]
        output_dir: String,
    },
}

fn write_json_atomic(path: &Path, value: &serde_json::Value) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value).context("serializing batch summary")?;
    let mut file =
        std::fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("writing {}", tmp.display()))?;
    file.sync_all()?;
    std::fs::rename(&tmp, path).context("renaming batch summary")?;
    Ok(())
}

/// Loads the scenario's equipment setup, applies its overrides and checks
/// the result again.
fn prepare_setup(scenario: &scenario::Scenario) -> Result<EquipmentSetup> {
    let mut setup = sim_setup::load_equipment(&scenario.config_dir, scenario.equipment)?;
    overrides::apply_overrides(&mut setup, &scenario.overrides)?;
    match &setup {
        EquipmentSetup::Handler(h) => sim_setup::validate_handler_setup(h),
        EquipmentSetup::Prober(p) => sim_setup::validate_prober_setup(p),
    }
    .context("validating setup after overrides")?;
    Ok(setup)
}

fn write_batch_summary(
    run_dir: &Path,
    scenario: &scenario::Scenario,
    scenario_params: &serde_json::Value,
    seed_results: &[runner::SeedResult],
    stats: &summary::SummaryStats,
) -> Result<PathBuf> {
    let metrics: Vec<&SummaryMetrics> = seed_results.iter().map(|r| &r.metrics).collect();
    let run_ids: Vec<&str> = seed_results.iter().map(|r| r.run_id.as_str()).collect();
    let batch = serde_json::json!({
        "batch_schema_version": 1,
        "batch_id": Uuid::new_v4().to_string(),
        "scenario_name": scenario.name,
        "equipment": scenario.equipment,
        "scenario_params": scenario_params,
        "seed_count": seed_results.len(),
        "run_ids": run_ids,
        "lot_complete_count": stats.lot_complete_count,
        "stalled_count": stats.stalled_count,
        "aggregated_metrics": summary::build_aggregated_metrics(&metrics),
    });
    let path = run_dir.join("batch_summary.json");
    write_json_atomic(&path, &batch)?;
    Ok(path)
}

fn run(scenario_path: &str, output_dir: &str) -> Result<()> {
    let scenario = scenario::load_scenario(Path::new(scenario_path))?;
    let seeds = scenario.seeds.expand();
    println!(
        "Scenario '{}': {} with {} seeds, at most {} cycles each",
        scenario.name,
        scenario.equipment,
        seeds.len(),
        scenario.cycles
    );

    let setup = prepare_setup(&scenario)?;
    let scenario_params = serde_json::json!({
        "cycles": scenario.cycles,
        "config_dir": scenario.config_dir,
        "phase": scenario.phase,
        "profile": scenario.profile,
        "overrides": scenario.overrides,
    });

    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let run_dir = PathBuf::from(output_dir).join(format!("{}_{stamp}", scenario.name));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("creating output directory: {}", run_dir.display()))?;
    std::fs::copy(scenario_path, run_dir.join("scenario.json")).context("copying scenario file")?;
    println!("Output: {}", run_dir.display());

    let (ok, failed): (Vec<_>, Vec<_>) = seeds
        .par_iter()
        .map(|&seed| {
            let seed_dir = run_dir.join(format!("seed_{seed}"));
            runner::run_seed(&setup, &scenario, seed, &seed_dir, &scenario_params)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .partition(Result::is_ok);
    for err in failed.into_iter().filter_map(Result::err) {
        eprintln!("Seed failed: {err:#}");
    }
    let seed_results: Vec<runner::SeedResult> = ok.into_iter().filter_map(Result::ok).collect();
    if seed_results.is_empty() {
        anyhow::bail!("all seeds failed");
    }

    let runs: Vec<(u64, &SummaryMetrics, bool)> = seed_results
        .iter()
        .map(|r| (r.seed, &r.metrics, r.lot_complete))
        .collect();
    let stats = summary::compute_summary(&runs);
    summary::print_summary(&scenario.name, scenario.cycles, &stats);

    let summary_path = run_dir.join("summary.json");
    let json = serde_json::to_string_pretty(&stats).context("serializing summary")?;
    std::fs::write(&summary_path, json)
        .with_context(|| format!("writing {}", summary_path.display()))?;
    let batch_path =
        write_batch_summary(&run_dir, &scenario, &scenario_params, &seed_results, &stats)?;

    println!("Summary: {}", summary_path.display());
    println!("Batch summary: {}", batch_path.display());
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scenario,
            output_dir,
        } => run(&scenario, &output_dir)?,
    }
    Ok(())
}
