#![forbid(unsafe_code)]

use serde_json::{Map, Value};

use guardian_contracts::gw3::{Gw3Outcome, Gw3Request};
use guardian_contracts::{ContractViolation, Validate};
use guardian_engines::gw3_gate::Gw3GateRuntime;

use crate::config::GuardianConfig;

/// Caller-facing facade: JSON mapping in, JSON outcome mapping out. All
/// validation and scoring behavior lives in the engines underneath.
#[derive(Debug, Clone)]
pub struct WalletGuardian {
    gate: Gw3GateRuntime,
}

impl WalletGuardian {
    pub fn new(config: GuardianConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            gate: Gw3GateRuntime::new(config.gate, config.risk),
        })
    }

    pub fn mvp_v1() -> Self {
        Self::new(GuardianConfig::mvp_v1()).expect("default configuration must validate")
    }

    pub fn evaluate(&self, raw: &Value) -> Value {
        outcome_to_value(&self.gate.evaluate_value(raw))
    }

    pub fn evaluate_json(&self, raw: &str) -> Value {
        outcome_to_value(&self.gate.evaluate_json(raw))
    }

    pub fn evaluate_outcome(&self, raw: &Value) -> Gw3Outcome {
        self.gate.evaluate_value(raw)
    }

    pub fn evaluate_request(&self, req: &Gw3Request) -> Gw3Outcome {
        self.gate.evaluate_request(req)
    }
}

pub fn outcome_to_value(outcome: &Gw3Outcome) -> Value {
    let mut meta = Map::new();
    meta.insert("fail_closed".to_string(), Value::from(outcome.meta.fail_closed));
    if let Some(level) = outcome.meta.risk_level {
        meta.insert("risk_level".to_string(), Value::from(level.as_str()));
    }
    if let Some(score) = outcome.meta.risk_score {
        meta.insert("risk_score".to_string(), Value::from(score));
    }
    if let Some(decision) = outcome.meta.decision {
        meta.insert("decision".to_string(), Value::from(decision.as_str()));
        meta.insert(
            "cooldown_seconds".to_string(),
            Value::from(outcome.meta.cooldown_seconds),
        );
        meta.insert(
            "require_second_factor".to_string(),
            Value::from(outcome.meta.require_second_factor),
        );
    }

    let mut out = Map::new();
    out.insert(
        "contract_version".to_string(),
        Value::from(outcome.contract_version.0),
    );
    out.insert("component".to_string(), Value::from(outcome.component.clone()));
    out.insert(
        "request_id".to_string(),
        Value::from(outcome.request_id.clone()),
    );
    out.insert("outcome".to_string(), Value::from(outcome.outcome.as_str()));
    out.insert(
        "reason_codes".to_string(),
        Value::from(outcome.reason_codes.clone()),
    );
    out.insert(
        "context_hash".to_string(),
        Value::from(outcome.context_hash.clone()),
    );
    out.insert("meta".to_string(), Value::Object(meta));
    Value::Object(out)
}
