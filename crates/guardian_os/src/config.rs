#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use serde::Deserialize;

use guardian_contracts::{ContractViolation, Validate};
use guardian_engines::gw3_gate::Gw3GateConfig;
use guardian_engines::risk::RiskConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardianConfig {
    pub gate: Gw3GateConfig,
    pub risk: RiskConfig,
}

impl GuardianConfig {
    pub fn mvp_v1() -> Self {
        Self {
            gate: Gw3GateConfig::mvp_v1(),
            risk: RiskConfig::mvp_v1(),
        }
    }
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

impl Validate for GuardianConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.gate.validate()?;
        self.risk.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Io { path: String, reason: String },
    Parse { reason: String },
    Invalid(ContractViolation),
}

impl From<ContractViolation> for ConfigError {
    fn from(violation: ContractViolation) -> Self {
        ConfigError::Invalid(violation)
    }
}

/// Unknown keys and malformed values are errors, never silent defaults.
pub fn parse_config(text: &str) -> Result<GuardianConfig, ConfigError> {
    let config: GuardianConfig = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// `None` resolves to the built-in defaults, the original behavior for
/// integrators that do not ship a policy file.
pub fn load_config(path: Option<&Path>) -> Result<GuardianConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(GuardianConfig::mvp_v1());
    };
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_01_none_path_resolves_to_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config, GuardianConfig::mvp_v1());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_02_unknown_keys_rejected() {
        let out = parse_config(r#"{"risk": {"not_a_threshold": 1.0}}"#);
        assert!(matches!(out, Err(ConfigError::Parse { .. })));

        let out = parse_config(r#"{"surprise": true}"#);
        assert!(matches!(out, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn config_03_partial_overrides_merge_onto_defaults() {
        let config = parse_config(
            r#"{"risk": {"large_send_warning_ratio": 0.8, "warn_cooldown_seconds": 60}}"#,
        )
        .unwrap();
        assert_eq!(config.risk.large_send_warning_ratio, 0.8);
        assert_eq!(config.risk.warn_cooldown_seconds, 60);
        assert_eq!(config.risk.max_normal_send_ratio, 0.5);
        assert_eq!(config.gate, Gw3GateConfig::mvp_v1());
    }

    #[test]
    fn config_04_out_of_range_thresholds_rejected() {
        let out = parse_config(r#"{"risk": {"warn_score_bound": 0.9}}"#);
        assert!(matches!(out, Err(ConfigError::Invalid(_))));

        let out = parse_config(r#"{"gate": {"component": "  "}}"#);
        assert!(matches!(out, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_05_round_trips_through_a_file() {
        let path = std::env::temp_dir().join(format!(
            "guardian_config_{}.json",
            std::process::id()
        ));
        fs::write(&path, r#"{"gate": {"max_payload_bytes": 65536}}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(config.gate.max_payload_bytes, 65536);
        assert_eq!(config.risk, RiskConfig::mvp_v1());
    }

    #[test]
    fn config_06_missing_file_is_io_error() {
        let out = load_config(Some(Path::new("/nonexistent/guardian.json")));
        assert!(matches!(out, Err(ConfigError::Io { .. })));
    }
}
