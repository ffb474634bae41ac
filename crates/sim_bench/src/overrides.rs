use anyhow::{bail, Result};
use sim_core::{CorruptionKind, HandlerSetup, ProberSetup, ReprobeMode, SteppingMode};
use sim_setup::EquipmentSetup;
use std::collections::HashMap;

const HANDLER_KEYS: &[&str] = &[
    "site_count",
    "handling_delay_ms",
    "devices_to_test",
    "max_bin",
    "max_verify_count",
    "query_error_every",
    "corruption_period",
    "reprobe_mode",
];

const PROBER_KEYS: &[&str] = &[
    "handling_delay_ms",
    "wafers_to_test",
    "max_bin",
    "query_error_every",
    "stepping",
];

pub fn apply_overrides(
    setup: &mut EquipmentSetup,
    overrides: &HashMap<String, serde_json::Value>,
) -> Result<()> {
    for (key, value) in overrides {
        match setup {
            EquipmentSetup::Handler(handler) => apply_handler(handler, key, value)?,
            EquipmentSetup::Prober(prober) => apply_prober(prober, key, value)?,
        }
    }
    Ok(())
}

fn apply_handler(setup: &mut HandlerSetup, key: &str, value: &serde_json::Value) -> Result<()> {
    match key {
        "site_count" => setup.site_count = as_usize(key, value)?,
        "handling_delay_ms" => setup.handling_delay_ms = as_u64(key, value)?,
        "devices_to_test" => setup.devices_to_test = Some(as_u64(key, value)?),
        "max_bin" => setup.max_bin = as_i32(key, value)?,
        "max_verify_count" => setup.max_verify_count = Some(as_u64(key, value)?),
        "query_error_every" => setup.query_error_every = Some(as_u64(key, value)?),
        "corruption_period" => {
            setup.corruption = CorruptionKind::SingleThreshold {
                period: as_u64(key, value)?,
            };
        }
        "reprobe_mode" => {
            setup.reprobe_mode = match as_str(key, value)? {
                "Ignore" => ReprobeMode::Ignore,
                "Separately" => ReprobeMode::Separately,
                "Interleaved" => ReprobeMode::Interleaved,
                other => bail!("override '{key}': unknown reprobe mode '{other}'"),
            };
        }
        _ => bail!(
            "unknown handler override key '{key}'. Valid keys: {}",
            HANDLER_KEYS.join(", ")
        ),
    }
    Ok(())
}

fn apply_prober(setup: &mut ProberSetup, key: &str, value: &serde_json::Value) -> Result<()> {
    match key {
        "handling_delay_ms" => setup.handling_delay_ms = as_u64(key, value)?,
        "wafers_to_test" => setup.wafers_to_test = as_u32(key, value)?,
        "max_bin" => setup.max_bin = as_i32(key, value)?,
        "query_error_every" => setup.query_error_every = Some(as_u64(key, value)?),
        "stepping" => {
            setup.stepping = Some(match as_str(key, value)? {
                "Simple" => SteppingMode::Simple,
                "Efficient" => SteppingMode::Efficient,
                "Compatible" => SteppingMode::Compatible,
                other => bail!("override '{key}': unknown stepping mode '{other}'"),
            });
        }
        _ => bail!(
            "unknown prober override key '{key}'. Valid keys: {}",
            PROBER_KEYS.join(", ")
        ),
    }
    Ok(())
}

fn as_u64(key: &str, value: &serde_json::Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| {
        anyhow::anyhow!("override '{key}': expected a positive integer, got {value}")
    })
}

fn as_u32(key: &str, value: &serde_json::Value) -> Result<u32> {
    let val = as_u64(key, value)?;
    u32::try_from(val)
        .map_err(|_| anyhow::anyhow!("override '{key}': value {val} exceeds u32 range"))
}

fn as_usize(key: &str, value: &serde_json::Value) -> Result<usize> {
    let val = as_u64(key, value)?;
    usize::try_from(val)
        .map_err(|_| anyhow::anyhow!("override '{key}': value {val} exceeds usize range"))
}

fn as_i32(key: &str, value: &serde_json::Value) -> Result<i32> {
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| anyhow::anyhow!("override '{key}': expected an i32, got {value}"))
}

fn as_str<'a>(key: &str, value: &'a serde_json::Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("override '{key}': expected a string, got {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> EquipmentSetup {
        EquipmentSetup::Handler(HandlerSetup::new(4))
    }

    fn prober() -> EquipmentSetup {
        EquipmentSetup::Prober(ProberSetup::default())
    }

    #[test]
    fn test_apply_handler_overrides() {
        let mut setup = handler();
        let overrides = HashMap::from([
            ("devices_to_test".to_string(), serde_json::json!(500)),
            ("corruption_period".to_string(), serde_json::json!(13)),
            ("reprobe_mode".to_string(), serde_json::json!("Interleaved")),
        ]);
        apply_overrides(&mut setup, &overrides).unwrap();
        let EquipmentSetup::Handler(setup) = setup else {
            panic!("expected a handler setup");
        };
        assert_eq!(setup.devices_to_test, Some(500));
        assert_eq!(setup.corruption, CorruptionKind::SingleThreshold { period: 13 });
        assert_eq!(setup.reprobe_mode, ReprobeMode::Interleaved);
    }

    #[test]
    fn test_apply_prober_overrides() {
        let mut setup = prober();
        let overrides = HashMap::from([
            ("wafers_to_test".to_string(), serde_json::json!(1)),
            ("stepping".to_string(), serde_json::json!("Efficient")),
        ]);
        apply_overrides(&mut setup, &overrides).unwrap();
        let EquipmentSetup::Prober(setup) = setup else {
            panic!("expected a prober setup");
        };
        assert_eq!(setup.wafers_to_test, 1);
        assert_eq!(setup.stepping, Some(SteppingMode::Efficient));
    }

    #[test]
    fn test_key_of_other_equipment_errors() {
        let mut setup = prober();
        let overrides = HashMap::from([("devices_to_test".to_string(), serde_json::json!(10))]);
        let err = apply_overrides(&mut setup, &overrides).unwrap_err().to_string();
        assert!(err.contains("unknown prober override key"));
        assert!(err.contains("wafers_to_test"));
    }

    #[test]
    fn test_unknown_key_errors() {
        let mut setup = handler();
        let overrides = HashMap::from([("nonexistent_field".to_string(), serde_json::json!(1))]);
        let err = apply_overrides(&mut setup, &overrides).unwrap_err().to_string();
        assert!(err.contains("unknown handler override key"));
        assert!(err.contains("nonexistent_field"));
    }

    #[test]
    fn test_type_mismatch_errors() {
        let mut setup = handler();
        let overrides = HashMap::from([(
            "devices_to_test".to_string(),
            serde_json::json!("not_a_number"),
        )]);
        assert!(apply_overrides(&mut setup, &overrides).is_err());

        let too_big = HashMap::from([("max_bin".to_string(), serde_json::json!(1e12))]);
        assert!(apply_overrides(&mut setup, &too_big).is_err());
    }
}
