use serde::Serialize;
use sim_control::SessionCounters;
use sim_core::Statistics;
use sim_setup::EquipmentKind;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct RunResult {
    pub run_schema_version: u32,
    pub run_status: String,
    pub run_id: String,
    pub git_sha: String,
    pub git_dirty: bool,
    pub seed: u64,
    pub scenario_name: String,
    pub scenario_params: serde_json::Value,
    pub equipment: EquipmentKind,
    pub cycles_run: u64,
    pub lot_complete: bool,
    pub wall_time_ms: u64,
    pub cycles_per_second: f64,
    pub summary_metrics: Option<SummaryMetrics>,
    pub stalled: bool,
    pub stall_reason: Option<String>,
    pub yield_path: String,
    pub error_message: Option<String>,
}

/// Per-seed figures that get aggregated across a batch.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryMetrics {
    pub devices_tested: u64,
    pub devices_binned: u64,
    pub good_devices: u64,
    pub yield_pct: f64,
    pub test_starts: u64,
    pub idle_polls: u64,
    pub reprobes: u64,
    pub retests: u64,
    pub verify_mismatches: u64,
    pub query_faults: u64,
    pub wafers_completed: u64,
}

impl SummaryMetrics {
    pub fn from_run(stats: &Statistics, counters: &SessionCounters, pass_bin: i32) -> Self {
        let devices_binned = stats.grand_total();
        let good_devices = stats.bin_total(pass_bin);
        let yield_pct = if devices_binned == 0 {
            0.0
        } else {
            good_devices as f64 / devices_binned as f64 * 100.0
        };
        Self {
            devices_tested: stats.devices_tested,
            devices_binned,
            good_devices,
            yield_pct,
            test_starts: counters.test_starts,
            idle_polls: counters.idle_polls,
            reprobes: counters.reprobes,
            retests: counters.retests,
            verify_mismatches: counters.verify_mismatches,
            query_faults: counters.query_faults,
            wafers_completed: counters.wafers_completed,
        }
    }
}

impl RunResult {
    /// Write JSON atomically: write to `.tmp` then rename.
    pub fn write_atomic(&self, path: &Path) -> anyhow::Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

/// Stalled: the run never raised a test start, or ran out of cycles with
/// the lot unfinished and nothing binned.
pub fn detect_stall(metrics: &SummaryMetrics, lot_complete: bool) -> (bool, Option<String>) {
    if metrics.test_starts == 0 {
        (true, Some("no test start".to_string()))
    } else if !lot_complete && metrics.devices_binned == 0 {
        (true, Some("nothing binned".to_string()))
    } else {
        (false, None)
    }
}

pub fn git_sha() -> String {
    env!("GIT_SHA").to_string()
}

pub fn git_dirty() -> bool {
    env!("GIT_DIRTY") == "true"
}
