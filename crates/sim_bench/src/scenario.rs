use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sim_control::{BinProfile, BinningPhase};
use sim_setup::EquipmentKind;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// Cycle cap per seed; a seed stops earlier when its lot completes.
    pub cycles: u64,
    pub seeds: SeedSpec,
    #[serde(default = "default_equipment")]
    pub equipment: EquipmentKind,
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    #[serde(default)]
    pub phase: BinningPhase,
    #[serde(default)]
    pub profile: BinProfile,
    #[serde(default)]
    pub overrides: HashMap<String, serde_json::Value>,
}

fn default_equipment() -> EquipmentKind {
    EquipmentKind::Handler
}

fn default_config_dir() -> String {
    "./config".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SeedSpec {
    List(Vec<u64>),
    Range { range: [u64; 2] },
}

impl SeedSpec {
    pub fn expand(&self) -> Vec<u64> {
        match self {
            SeedSpec::List(seeds) => seeds.clone(),
            SeedSpec::Range { range } => (range[0]..=range[1]).collect(),
        }
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading scenario file: {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&json)
        .with_context(|| format!("parsing scenario file: {}", path.display()))?;
    if scenario.name.is_empty() {
        bail!("scenario 'name' must not be empty");
    }
    if scenario.cycles == 0 {
        bail!("scenario 'cycles' must be > 0");
    }
    let seeds = scenario.seeds.expand();
    if seeds.is_empty() {
        bail!("scenario 'seeds' must produce at least one seed");
    }
    let p = &scenario.profile;
    let rates = [p.fail_rate, p.reprobe_rate, p.retest_rate];
    if rates.iter().any(|r| !(0.0..=1.0).contains(r)) || rates.iter().sum::<f64>() > 1.0 {
        bail!("scenario 'profile' rates must lie in 0..=1 and sum to at most 1");
    }
    Ok(scenario)
}
