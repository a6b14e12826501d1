#![forbid(unsafe_code)]

use serde::Deserialize;
use serde_json::{Map, Value};

use guardian_contracts::gw3::{
    ExtraSignals, GateReasonCode, Gw3Outcome, Gw3Request, OutcomeKind, OutcomeMeta, TxCtx,
    WalletCtx, GW3_COMPONENT, GW3_CONTRACT_VERSION, GW3_MAX_PAYLOAD_BYTES, GW3_SIGNAL_KEYS,
    GW3_TOP_LEVEL_KEYS, GW3_TX_KEYS, GW3_WALLET_KEYS,
};
use guardian_contracts::{ContractViolation, SchemaVersion, Validate};

use crate::canon::{canonical_json, canonical_sha256};
use crate::risk::{RiskConfig, RiskRuntime};

/// Identity a gate instance answers for. Requests declaring anything else are
/// denied fail-closed; gates for other contract versions can coexist.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Gw3GateConfig {
    pub contract_version: SchemaVersion,
    pub component: String,
    pub max_payload_bytes: usize,
}

impl Gw3GateConfig {
    pub fn mvp_v1() -> Self {
        Self {
            contract_version: GW3_CONTRACT_VERSION,
            component: GW3_COMPONENT.to_string(),
            max_payload_bytes: GW3_MAX_PAYLOAD_BYTES,
        }
    }
}

impl Default for Gw3GateConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

impl Validate for Gw3GateConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.component.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_gate_config.component",
                reason: "must not be empty",
            });
        }
        if self.max_payload_bytes == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_gate_config.max_payload_bytes",
                reason: "must be > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Gw3GateRuntime {
    config: Gw3GateConfig,
    risk: RiskRuntime,
}

impl Gw3GateRuntime {
    pub fn new(config: Gw3GateConfig, risk_config: RiskConfig) -> Self {
        Self {
            config,
            risk: RiskRuntime::new(risk_config),
        }
    }

    pub fn config(&self) -> &Gw3GateConfig {
        &self.config
    }

    pub fn evaluate_json(&self, raw: &str) -> Gw3Outcome {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.evaluate_value(&value),
            Err(_) => self.deny(GateReasonCode::InvalidRequest, "unknown"),
        }
    }

    /// Primary entry: untrusted request mapping in, structured outcome out.
    /// Never panics, never returns an error.
    pub fn evaluate_value(&self, raw: &Value) -> Gw3Outcome {
        let request_id = salvage_request_id(raw);
        match self.decode(raw) {
            Ok(req) => self.finish(&req),
            Err(code) => self.deny(code, &request_id),
        }
    }

    /// Typed entry for embedders that build contexts directly. JSON text
    /// cannot encode NaN or infinity, so this is the path on which the
    /// finite-number gate actually bites.
    pub fn evaluate_request(&self, req: &Gw3Request) -> Gw3Outcome {
        let request_id = if req.request_id.trim().is_empty() {
            "unknown".to_string()
        } else {
            req.request_id.trim().to_string()
        };
        if req.component.trim().is_empty() || req.request_id.trim().is_empty() {
            return self.deny(GateReasonCode::InvalidRequest, &request_id);
        }
        let encoded = match serde_json::to_value(req) {
            Ok(value) => value,
            Err(_) => return self.deny(GateReasonCode::InternalError, &request_id),
        };
        if canonical_json(&encoded).len() > self.config.max_payload_bytes {
            return self.deny(GateReasonCode::Oversize, &request_id);
        }
        if req.contract_version != self.config.contract_version {
            return self.deny(GateReasonCode::ContractVersionMismatch, &request_id);
        }
        if req.component != self.config.component {
            return self.deny(GateReasonCode::ComponentMismatch, &request_id);
        }
        for ctx in [
            req.wallet_ctx.validate(),
            req.tx_ctx.validate(),
            req.extra_signals.validate(),
        ] {
            if let Err(violation) = ctx {
                return self.deny(violation_reason_code(&violation), &request_id);
            }
        }
        self.finish(req)
    }

    fn decode(&self, raw: &Value) -> Result<Gw3Request, GateReasonCode> {
        let obj = raw.as_object().ok_or(GateReasonCode::InvalidRequest)?;

        for key in obj.keys() {
            if !GW3_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                return Err(GateReasonCode::UnknownTopLevelKey);
            }
        }

        let contract_version = obj
            .get("contract_version")
            .and_then(Value::as_i64)
            .ok_or(GateReasonCode::InvalidRequest)?;
        let component = required_trimmed_string(obj, "component")?;
        let request_id = required_trimmed_string(obj, "request_id")?;
        let wallet_obj = nested_object(obj, "wallet_ctx")?;
        let tx_obj = nested_object(obj, "tx_ctx")?;
        let signals_obj = nested_object(obj, "extra_signals")?;

        if canonical_json(raw).len() > self.config.max_payload_bytes {
            return Err(GateReasonCode::Oversize);
        }

        if contract_version != i64::from(self.config.contract_version.0) {
            return Err(GateReasonCode::ContractVersionMismatch);
        }
        if component != self.config.component {
            return Err(GateReasonCode::ComponentMismatch);
        }

        unknown_key_check(&wallet_obj, GW3_WALLET_KEYS, GateReasonCode::UnknownWalletKey)?;
        unknown_key_check(&tx_obj, GW3_TX_KEYS, GateReasonCode::UnknownTxKey)?;
        unknown_key_check(
            &signals_obj,
            GW3_SIGNAL_KEYS,
            GateReasonCode::UnknownSignalKey,
        )?;

        let wallet_ctx = WalletCtx {
            balance: opt_number(&wallet_obj, "balance")?,
            typical_amount: opt_number(&wallet_obj, "typical_amount")?,
            wallet_age_days: opt_number(&wallet_obj, "wallet_age_days")?,
            tx_count_24h: opt_number(&wallet_obj, "tx_count_24h")?,
        };
        let tx_ctx = TxCtx {
            to_address: opt_string(&tx_obj, "to_address")?,
            amount: opt_number(&tx_obj, "amount")?,
            fee: opt_number(&tx_obj, "fee")?,
            memo: opt_string(&tx_obj, "memo")?,
            asset_id: opt_string(&tx_obj, "asset_id")?,
        };
        let extra_signals = ExtraSignals {
            device_fingerprint: opt_string(&signals_obj, "device_fingerprint")?,
            sentinel_status: opt_string(&signals_obj, "sentinel_status")?,
            geo_ip: opt_string(&signals_obj, "geo_ip")?,
            session: opt_string(&signals_obj, "session")?,
            trusted_device: opt_bool(&signals_obj, "trusted_device")?,
        };

        let req = Gw3Request {
            contract_version: self.config.contract_version,
            component,
            request_id,
            wallet_ctx,
            tx_ctx,
            extra_signals,
        };
        req.validate()
            .map_err(|violation| violation_reason_code(&violation))?;
        Ok(req)
    }

    fn finish(&self, req: &Gw3Request) -> Gw3Outcome {
        let request_id = req.request_id.trim().to_string();
        let decision = match self
            .risk
            .run(&req.wallet_ctx, &req.tx_ctx, &req.extra_signals)
        {
            Ok(decision) => decision,
            Err(_) => return self.deny(GateReasonCode::InternalError, &request_id),
        };
        let outcome = if decision.is_blocking() {
            OutcomeKind::Deny
        } else {
            OutcomeKind::Allow
        };
        let reason_codes = decision.reasons.clone();

        let mut payload = match serde_json::to_value(req) {
            Ok(Value::Object(map)) => map,
            _ => return self.deny(GateReasonCode::InternalError, &request_id),
        };
        payload.insert("outcome".to_string(), Value::from(outcome.as_str()));
        payload.insert(
            "reason_codes".to_string(),
            Value::from(reason_codes.clone()),
        );
        let context_hash = canonical_sha256(&Value::Object(payload));

        match Gw3Outcome::v3(
            self.config.contract_version,
            self.config.component.clone(),
            request_id.clone(),
            outcome,
            reason_codes,
            context_hash,
            OutcomeMeta::scored(&decision),
        ) {
            Ok(out) => out,
            Err(_) => self.deny(GateReasonCode::InternalError, &request_id),
        }
    }

    /// Fail-closed deny. The error payload is hashed with the gate's own
    /// declared identity, not the caller's, so the audit artifact stays
    /// reproducible even when the request's identity is the failure.
    fn deny(&self, code: GateReasonCode, request_id: &str) -> Gw3Outcome {
        let reason_code = code.as_str();
        let mut payload = Map::new();
        payload.insert(
            "component".to_string(),
            Value::from(self.config.component.clone()),
        );
        payload.insert(
            "contract_version".to_string(),
            Value::from(self.config.contract_version.0),
        );
        payload.insert("request_id".to_string(), Value::from(request_id));
        payload.insert("reason_code".to_string(), Value::from(reason_code));
        let context_hash = canonical_sha256(&Value::Object(payload));

        Gw3Outcome::v3(
            self.config.contract_version,
            self.config.component.clone(),
            request_id.to_string(),
            OutcomeKind::Deny,
            vec![reason_code.to_string()],
            context_hash,
            OutcomeMeta::fail_closed(),
        )
        .expect("fail-closed outcome must construct for gate-controlled inputs")
    }
}

fn salvage_request_id(raw: &Value) -> String {
    raw.as_object()
        .and_then(|obj| obj.get("request_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

fn violation_reason_code(violation: &ContractViolation) -> GateReasonCode {
    match violation {
        ContractViolation::NotFinite { .. } => GateReasonCode::BadNumber,
        _ => GateReasonCode::InvalidRequest,
    }
}

fn required_trimmed_string(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<String, GateReasonCode> {
    let value = obj
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or(GateReasonCode::InvalidRequest)?;
    if value.is_empty() {
        return Err(GateReasonCode::InvalidRequest);
    }
    Ok(value.to_string())
}

fn nested_object(
    obj: &Map<String, Value>,
    key: &str,
) -> Result<Map<String, Value>, GateReasonCode> {
    match obj.get(key) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(GateReasonCode::InvalidRequest),
    }
}

fn unknown_key_check(
    obj: &Map<String, Value>,
    allowed: &[&str],
    code: GateReasonCode,
) -> Result<(), GateReasonCode> {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(code);
        }
    }
    Ok(())
}

fn opt_number(obj: &Map<String, Value>, key: &str) -> Result<Option<f64>, GateReasonCode> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            let value = n.as_f64().ok_or(GateReasonCode::InvalidRequest)?;
            if !value.is_finite() {
                return Err(GateReasonCode::BadNumber);
            }
            Ok(Some(value))
        }
        Some(_) => Err(GateReasonCode::InvalidRequest),
    }
}

fn opt_string(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, GateReasonCode> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(GateReasonCode::InvalidRequest),
    }
}

fn opt_bool(obj: &Map<String, Value>, key: &str) -> Result<Option<bool>, GateReasonCode> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(GateReasonCode::InvalidRequest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate() -> Gw3GateRuntime {
        Gw3GateRuntime::new(Gw3GateConfig::mvp_v1(), RiskConfig::mvp_v1())
    }

    fn base_request() -> Value {
        json!({
            "contract_version": 3,
            "component": "guardian_wallet",
            "request_id": "r1",
            "wallet_ctx": {
                "balance": 100.0,
                "typical_amount": 1.0,
                "wallet_age_days": 10,
                "tx_count_24h": 1,
            },
            "tx_ctx": {
                "to_address": "DGB_ADDR",
                "amount": 1.0,
                "fee": 0.1,
                "memo": "x",
                "asset_id": "asset",
            },
            "extra_signals": {
                "device_fingerprint": "dfp",
                "sentinel_status": "NORMAL",
                "geo_ip": "1.2.3.4",
                "session": "s",
                "trusted_device": true,
            },
        })
    }

    #[test]
    fn at_gw3_01_wrong_contract_version_fails_closed() {
        let mut req = base_request();
        req["contract_version"] = json!(2);
        let out = gate().evaluate_value(&req);
        assert_eq!(out.outcome, OutcomeKind::Deny);
        assert!(out.meta.fail_closed);
        assert_eq!(out.contract_version, GW3_CONTRACT_VERSION);
        assert_eq!(out.component, "guardian_wallet");
        assert_eq!(out.request_id, "r1");
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_CONTRACT_VERSION_MISMATCH".to_string()]
        );
    }

    #[test]
    fn at_gw3_02_error_hash_matches_canonical_error_payload() {
        let mut req = base_request();
        req["contract_version"] = json!(999);
        let out = gate().evaluate_value(&req);

        let expected = canonical_sha256(&json!({
            "component": "guardian_wallet",
            "contract_version": 3,
            "request_id": "r1",
            "reason_code": out.reason_codes[0],
        }));
        assert_eq!(out.context_hash, expected);
    }

    #[test]
    fn at_gw3_03_wrong_component_fails_closed() {
        let mut req = base_request();
        req["component"] = json!("not_guardian");
        let out = gate().evaluate_value(&req);
        assert_eq!(out.outcome, OutcomeKind::Deny);
        assert!(out.meta.fail_closed);
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_COMPONENT_MISMATCH".to_string()]
        );
    }

    #[test]
    fn at_gw3_04_non_mapping_request_is_invalid() {
        let out = gate().evaluate_value(&json!("not a mapping"));
        assert_eq!(out.outcome, OutcomeKind::Deny);
        assert!(out.meta.fail_closed);
        assert_eq!(out.request_id, "unknown");
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_INVALID_REQUEST".to_string()]
        );
    }

    #[test]
    fn at_gw3_05_unknown_top_level_key_rejected() {
        let mut req = base_request();
        req["surprise"] = json!(1);
        let out = gate().evaluate_value(&req);
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_UNKNOWN_TOP_LEVEL_KEY".to_string()]
        );
    }

    #[test]
    fn at_gw3_06_oversize_rejected_wherever_the_bulk_lives() {
        let mut req = base_request();
        req["tx_ctx"]["memo"] = json!("A".repeat(GW3_MAX_PAYLOAD_BYTES + 10));
        let first = gate().evaluate_value(&req);
        let second = gate().evaluate_value(&req);
        assert_eq!(first.outcome, OutcomeKind::Deny);
        assert!(first.meta.fail_closed);
        assert!(first.reason_codes[0].contains("GW_ERROR_OVERSIZE"));
        assert_eq!(first, second);

        let mut req = base_request();
        req["extra_signals"]["session"] = json!("B".repeat(GW3_MAX_PAYLOAD_BYTES + 10));
        let out = gate().evaluate_value(&req);
        assert!(out.reason_codes[0].contains("GW_ERROR_OVERSIZE"));
    }

    #[test]
    fn at_gw3_07_unknown_nested_keys_rejected_per_context() {
        let mut req = base_request();
        req["wallet_ctx"]["unknown_wallet_key"] = json!(1);
        let out = gate().evaluate_value(&req);
        assert!(out.reason_codes[0].contains("GW_ERROR_UNKNOWN_WALLET_KEY"));

        let mut req = base_request();
        req["tx_ctx"]["unknown_tx_key"] = json!(1);
        let out = gate().evaluate_value(&req);
        assert!(out.reason_codes[0].contains("GW_ERROR_UNKNOWN_TX_KEY"));

        let mut req = base_request();
        req["extra_signals"]["unknown_signal_key"] = json!(1);
        let out = gate().evaluate_value(&req);
        assert!(out.reason_codes[0].contains("GW_ERROR_UNKNOWN_SIGNAL_KEY"));
    }

    #[test]
    fn at_gw3_08_envelope_type_violations_are_invalid_request() {
        let mut req = base_request();
        req["contract_version"] = json!("3");
        let out = gate().evaluate_value(&req);
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_INVALID_REQUEST".to_string()]
        );

        let mut req = base_request();
        req["request_id"] = json!("   ");
        let out = gate().evaluate_value(&req);
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_INVALID_REQUEST".to_string()]
        );

        let mut req = base_request();
        req["wallet_ctx"] = json!([1, 2, 3]);
        let out = gate().evaluate_value(&req);
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_INVALID_REQUEST".to_string()]
        );
    }

    #[test]
    fn at_gw3_09_typed_non_finite_numbers_fail_closed() {
        let mut req = Gw3Request::v3(
            GW3_COMPONENT.to_string(),
            "r1".to_string(),
            WalletCtx::default(),
            TxCtx::default(),
            ExtraSignals::default(),
        )
        .unwrap();
        req.wallet_ctx.balance = Some(f64::INFINITY);
        let out = gate().evaluate_request(&req);
        assert_eq!(out.outcome, OutcomeKind::Deny);
        assert!(out.meta.fail_closed);
        assert!(out.reason_codes[0].contains("GW_ERROR_BAD_NUMBER"));

        let mut req = Gw3Request::v3(
            GW3_COMPONENT.to_string(),
            "r1".to_string(),
            WalletCtx::default(),
            TxCtx::default(),
            ExtraSignals::default(),
        )
        .unwrap();
        req.tx_ctx.amount = Some(f64::NAN);
        let out = gate().evaluate_request(&req);
        assert!(out.reason_codes[0].contains("GW_ERROR_BAD_NUMBER"));
    }

    #[test]
    fn at_gw3_10_base_request_allows_and_is_deterministic() {
        let req = base_request();
        let first = gate().evaluate_value(&req);
        let second = gate().evaluate_value(&req);
        assert_eq!(first.outcome, OutcomeKind::Allow);
        assert!(!first.meta.fail_closed);
        assert_eq!(first.context_hash, second.context_hash);
        assert_eq!(first.reason_codes, second.reason_codes);
        assert_eq!(first, second);
    }

    #[test]
    fn at_gw3_11_missing_nested_contexts_default_to_empty() {
        let req = json!({
            "contract_version": 3,
            "component": "guardian_wallet",
            "request_id": "r1",
        });
        let out = gate().evaluate_value(&req);
        assert_eq!(out.outcome, OutcomeKind::Allow);
        assert!(!out.meta.fail_closed);
    }

    #[test]
    fn at_gw3_12_blocking_score_denies_without_fail_closed() {
        let mut req = base_request();
        req["tx_ctx"]["amount"] = json!(95.0);
        req["wallet_ctx"]["tx_count_24h"] = json!(20);
        req["extra_signals"]["trusted_device"] = json!(false);
        let out = gate().evaluate_value(&req);
        assert_eq!(out.outcome, OutcomeKind::Deny);
        assert!(!out.meta.fail_closed);
        assert!(!out.reason_codes.is_empty());
        assert!(out.meta.risk_level.is_some());
    }

    #[test]
    fn at_gw3_13_unparseable_json_text_is_invalid_request() {
        let out = gate().evaluate_json("{ not json");
        assert_eq!(out.outcome, OutcomeKind::Deny);
        assert!(out.meta.fail_closed);
        assert_eq!(out.request_id, "unknown");
    }

    #[test]
    fn at_gw3_14_gates_with_different_identities_coexist() {
        let v4 = Gw3GateRuntime::new(
            Gw3GateConfig {
                contract_version: SchemaVersion(4),
                component: "guardian_wallet".to_string(),
                max_payload_bytes: GW3_MAX_PAYLOAD_BYTES,
            },
            RiskConfig::mvp_v1(),
        );
        let req = base_request();
        let out_v3 = gate().evaluate_value(&req);
        let out_v4 = v4.evaluate_value(&req);
        assert_eq!(out_v3.outcome, OutcomeKind::Allow);
        assert_eq!(out_v4.outcome, OutcomeKind::Deny);
        assert_eq!(
            out_v4.reason_codes,
            vec!["GW_ERROR_CONTRACT_VERSION_MISMATCH".to_string()]
        );
        assert_eq!(out_v4.contract_version, SchemaVersion(4));
    }

    #[test]
    fn at_gw3_15_first_failure_wins_over_later_gates() {
        // Unknown top-level key is checked before the contract identity, so
        // a request that is wrong on both reports the key violation.
        let mut req = base_request();
        req["contract_version"] = json!(2);
        req["surprise"] = json!(1);
        let out = gate().evaluate_value(&req);
        assert_eq!(
            out.reason_codes,
            vec!["GW_ERROR_UNKNOWN_TOP_LEVEL_KEY".to_string()]
        );
    }
}
