//! Equipment setup loading shared between sim_cli and sim_bench.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sim_core::{
    Clock, Handler, HandlerSetup, Position, Prober, ProberSetup, SystemClock,
};
use std::collections::HashSet;
use std::path::Path;

pub const HANDLER_FILE: &str = "handler.json";
pub const PROBER_FILE: &str = "prober.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Handler,
    Prober,
}

impl std::fmt::Display for EquipmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EquipmentKind::Handler => write!(f, "handler"),
            EquipmentKind::Prober => write!(f, "prober"),
        }
    }
}

/// A loaded setup for either kind of equipment.
#[derive(Debug, Clone, PartialEq)]
pub enum EquipmentSetup {
    Handler(HandlerSetup),
    Prober(ProberSetup),
}

impl EquipmentSetup {
    pub fn kind(&self) -> EquipmentKind {
        match self {
            EquipmentSetup::Handler(_) => EquipmentKind::Handler,
            EquipmentSetup::Prober(_) => EquipmentKind::Prober,
        }
    }
}

fn read_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<T> {
    let text =
        std::fs::read_to_string(dir.join(file)).with_context(|| format!("reading {file}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {file}"))
}

/// Checks a handler setup for authoring mistakes the engine would accept
/// silently, then runs the engine's own construction checks.
pub fn validate_handler_setup(setup: &HandlerSetup) -> Result<()> {
    setup.validate().context("invalid handler setup")?;
    if setup.devices_to_test == Some(0) {
        bail!("devices_to_test is 0; omit it for continuous testing");
    }
    if setup.max_verify_count == Some(0) {
        bail!("max_verify_count is 0; omit it to never stop on verification");
    }
    Ok(())
}

/// Same as `validate_handler_setup`, for probers.
pub fn validate_prober_setup(setup: &ProberSetup) -> Result<()> {
    setup.validate().context("invalid prober setup")?;

    let mut offsets = HashSet::new();
    for offset in &setup.probe_offsets {
        if *offset == Position::new(0, 0) {
            bail!("probe offset [0,0] is implicit for probe 0 and must not be listed");
        }
        if !offsets.insert(*offset) {
            bail!("probe offset {offset} is listed twice");
        }
    }
    if let Some(sub_dies) = &setup.sub_die_offsets {
        let mut seen = HashSet::new();
        for offset in sub_dies {
            if !seen.insert(*offset) {
                bail!("sub-die offset {offset} is listed twice");
            }
        }
    }
    if let Some(dies) = &setup.wafer.dies {
        let mut seen = HashSet::new();
        for die in dies {
            if !seen.insert(*die) {
                bail!("wafer die {die} is listed twice");
            }
        }
    }
    Ok(())
}

pub fn load_handler_setup(config_dir: &str) -> Result<HandlerSetup> {
    let setup: HandlerSetup = read_json(Path::new(config_dir), HANDLER_FILE)?;
    validate_handler_setup(&setup).with_context(|| format!("validating {HANDLER_FILE}"))?;
    Ok(setup)
}

pub fn load_prober_setup(config_dir: &str) -> Result<ProberSetup> {
    let setup: ProberSetup = read_json(Path::new(config_dir), PROBER_FILE)?;
    validate_prober_setup(&setup).with_context(|| format!("validating {PROBER_FILE}"))?;
    Ok(setup)
}

pub fn load_equipment(config_dir: &str, kind: EquipmentKind) -> Result<EquipmentSetup> {
    Ok(match kind {
        EquipmentKind::Handler => EquipmentSetup::Handler(load_handler_setup(config_dir)?),
        EquipmentKind::Prober => EquipmentSetup::Prober(load_prober_setup(config_dir)?),
    })
}

pub fn build_handler(setup: &HandlerSetup) -> Result<Handler> {
    build_handler_with_clock(setup, Box::new(SystemClock::new()))
}

pub fn build_handler_with_clock(setup: &HandlerSetup, clock: Box<dyn Clock>) -> Result<Handler> {
    Handler::with_clock(setup, clock).context("building handler")
}

pub fn build_prober(setup: &ProberSetup) -> Result<Prober> {
    build_prober_with_clock(setup, Box::new(SystemClock::new()))
}

pub fn build_prober_with_clock(setup: &ProberSetup, clock: Box<dyn Clock>) -> Result<Prober> {
    Prober::with_clock(setup, clock).context("building prober")
}

/// Writes `run_info.json` describing one run into `dir`. `args` holds the
/// runner-specific arguments.
pub fn write_run_info(
    dir: &Path,
    run_id: &str,
    seed: u64,
    kind: EquipmentKind,
    args: serde_json::Value,
) -> Result<()> {
    let info = serde_json::json!({
        "run_id": run_id,
        "seed": seed,
        "equipment": kind,
        "args": args,
    });
    let path = dir.join("run_info.json");
    let file =
        std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &info)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::test_fixtures::{handler_setup, prober_setup};
    use sim_core::{EngineError, ManualClock};
    use std::io::Write;

    fn write_config(dir: &Path, file: &str, json: &str) {
        let mut f = std::fs::File::create(dir.join(file)).unwrap();
        f.write_all(json.as_bytes()).unwrap();
    }

    #[test]
    fn test_default_setups_pass_validation() {
        validate_handler_setup(&handler_setup(4)).unwrap();
        validate_prober_setup(&prober_setup()).unwrap();
    }

    #[test]
    fn test_load_handler_setup_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        write_config(
            dir.path(),
            HANDLER_FILE,
            r#"{ "site_count": 2, "pattern": "OneNotWorking", "devices_to_test": 10 }"#,
        );
        let setup = load_handler_setup(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(setup.site_count, 2);
        assert_eq!(setup.devices_to_test, Some(10));
    }

    #[test]
    fn test_missing_file_names_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_prober_setup(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("reading prober.json"));
    }

    #[test]
    fn test_malformed_json_names_the_file() {
        let dir = tempfile::TempDir::new().unwrap();
        write_config(dir.path(), HANDLER_FILE, "{ not json");
        let err = load_handler_setup(dir.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("parsing handler.json"));
    }

    #[test]
    fn test_engine_error_is_kept_in_chain() {
        let dir = tempfile::TempDir::new().unwrap();
        write_config(dir.path(), HANDLER_FILE, r#"{ "site_count": 0 }"#);
        let err = load_handler_setup(dir.path().to_str().unwrap()).unwrap_err();
        assert_eq!(
            err.root_cause().downcast_ref::<EngineError>(),
            Some(&EngineError::NoSites)
        );
    }

    #[test]
    fn test_colliding_categories_rejected() {
        let setup = HandlerSetup {
            retest_bin: Some(3),
            ..handler_setup(1)
        };
        let err = validate_handler_setup(&setup).unwrap_err();
        assert!(format!("{err:#}").contains("collides with ordinary bins"));

        let same = HandlerSetup {
            retest_bin: Some(-2),
            ..handler_setup(1)
        };
        assert!(validate_handler_setup(&same).is_err());
    }

    #[test]
    fn test_zero_budgets_rejected() {
        let setup = HandlerSetup {
            devices_to_test: Some(0),
            ..handler_setup(1)
        };
        assert!(validate_handler_setup(&setup).is_err());
    }

    #[test]
    fn test_duplicate_probe_offsets_rejected() {
        let implicit = ProberSetup {
            probe_offsets: vec![Position::new(0, 0)],
            ..prober_setup()
        };
        assert!(validate_prober_setup(&implicit).is_err());

        let twice = ProberSetup {
            probe_offsets: vec![Position::new(1, 0), Position::new(1, 0)],
            ..prober_setup()
        };
        let err = validate_prober_setup(&twice).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_load_equipment_builds_engines() {
        let dir = tempfile::TempDir::new().unwrap();
        write_config(dir.path(), PROBER_FILE, r#"{ "wafers_to_test": 1 }"#);
        let setup = load_equipment(dir.path().to_str().unwrap(), EquipmentKind::Prober).unwrap();
        assert_eq!(setup.kind(), EquipmentKind::Prober);
        let EquipmentSetup::Prober(setup) = setup else {
            panic!("expected a prober setup");
        };
        let prober = build_prober_with_clock(&setup, Box::new(ManualClock::new())).unwrap();
        assert_eq!(prober.wafers_to_test(), 1);
    }

    #[test]
    fn test_write_run_info() {
        let dir = tempfile::TempDir::new().unwrap();
        write_run_info(
            dir.path(),
            "run_1",
            42,
            EquipmentKind::Handler,
            serde_json::json!({ "runner": "test", "cycles": 10 }),
        )
        .unwrap();
        let text = std::fs::read_to_string(dir.path().join("run_info.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["equipment"], "handler");
        assert_eq!(parsed["seed"], 42);
        assert_eq!(parsed["args"]["cycles"], 10);
    }
}
