use crate::run_result::{detect_stall, SummaryMetrics};
use serde::Serialize;

type Extractor = (&'static str, fn(&SummaryMetrics) -> f64);

/// Every `SummaryMetrics` field, in report order.
const EXTRACTORS: &[Extractor] = &[
    ("yield_pct", |m| m.yield_pct),
    ("devices_tested", |m| m.devices_tested as f64),
    ("devices_binned", |m| m.devices_binned as f64),
    ("good_devices", |m| m.good_devices as f64),
    ("test_starts", |m| m.test_starts as f64),
    ("idle_polls", |m| m.idle_polls as f64),
    ("reprobes", |m| m.reprobes as f64),
    ("retests", |m| m.retests as f64),
    ("verify_mismatches", |m| m.verify_mismatches as f64),
    ("query_faults", |m| m.query_faults as f64),
    ("wafers_completed", |m| m.wafers_completed as f64),
];

#[derive(Debug, Serialize)]
pub struct SummaryStats {
    pub seed_count: usize,
    pub lot_complete_count: usize,
    pub stalled_count: usize,
    pub metrics: Vec<MetricSummary>,
}

#[derive(Debug, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

/// `runs` holds (seed, final metrics, lot complete) per seed.
pub fn compute_summary(runs: &[(u64, &SummaryMetrics, bool)]) -> SummaryStats {
    let lot_complete_count = runs.iter().filter(|(_, _, done)| *done).count();
    let stalled_count = runs
        .iter()
        .filter(|(_, m, done)| detect_stall(m, *done).0)
        .count();

    let metrics = EXTRACTORS
        .iter()
        .map(|(name, extract)| {
            let values: Vec<f64> = runs.iter().map(|(_, m, _)| extract(*m)).collect();
            compute_metric_summary(name, &values)
        })
        .collect();

    SummaryStats {
        seed_count: runs.len(),
        lot_complete_count,
        stalled_count,
        metrics,
    }
}

fn compute_metric_summary(name: &str, values: &[f64]) -> MetricSummary {
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
    let stddev = variance.sqrt();

    MetricSummary {
        name: name.to_string(),
        mean,
        min,
        max,
        stddev,
    }
}

/// Aggregated metrics keyed by name:
/// `{ "key": { "mean": ..., "min": ..., "max": ..., "stddev": ... }, ... }`
pub fn build_aggregated_metrics(metrics: &[&SummaryMetrics]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, extract) in EXTRACTORS {
        let values: Vec<f64> = metrics.iter().map(|&m| extract(m)).collect();
        let summary = compute_metric_summary(name, &values);
        map.insert(
            (*name).to_string(),
            serde_json::json!({
                "mean": summary.mean,
                "min": summary.min,
                "max": summary.max,
                "stddev": summary.stddev,
            }),
        );
    }
    serde_json::Value::Object(map)
}

pub fn print_summary(scenario_name: &str, cycles: u64, stats: &SummaryStats) {
    let cycle_display = if cycles >= 1000 {
        format!("{}k", cycles / 1000)
    } else {
        cycles.to_string()
    };
    println!(
        "\n=== {} ({} seeds, up to {} cycles each) ===\n",
        scenario_name, stats.seed_count, cycle_display
    );
    println!(
        "{:<30} {:>8} {:>8} {:>8} {:>8}",
        "Metric", "Mean", "Min", "Max", "StdDev"
    );
    println!("{}", "-".repeat(70));
    for metric in &stats.metrics {
        println!(
            "{:<30} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            metric.name, metric.mean, metric.min, metric.max, metric.stddev
        );
    }
    println!(
        "{:<30} {}/{}",
        "lot_complete", stats.lot_complete_count, stats.seed_count
    );
    println!(
        "{:<30} {}/{}",
        "stall_rate", stats.stalled_count, stats.seed_count
    );
}
