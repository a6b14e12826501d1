#![forbid(unsafe_code)]

use serde::Serialize;

use crate::decision::{DecisionKind, GuardianDecision, RiskLevel};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const GW3_CONTRACT_VERSION: SchemaVersion = SchemaVersion(3);
pub const GW3_COMPONENT: &str = "guardian_wallet";
pub const GW3_MAX_PAYLOAD_BYTES: usize = 128 * 1024;

pub const GW3_TOP_LEVEL_KEYS: &[&str] = &[
    "component",
    "contract_version",
    "extra_signals",
    "request_id",
    "tx_ctx",
    "wallet_ctx",
];
pub const GW3_WALLET_KEYS: &[&str] =
    &["balance", "tx_count_24h", "typical_amount", "wallet_age_days"];
pub const GW3_TX_KEYS: &[&str] = &["amount", "asset_id", "fee", "memo", "to_address"];
pub const GW3_SIGNAL_KEYS: &[&str] = &[
    "device_fingerprint",
    "geo_ip",
    "sentinel_status",
    "session",
    "trusted_device",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateReasonCode {
    InvalidRequest,
    UnknownTopLevelKey,
    UnknownWalletKey,
    UnknownTxKey,
    UnknownSignalKey,
    Oversize,
    BadNumber,
    ContractVersionMismatch,
    ComponentMismatch,
    InternalError,
}

impl GateReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            GateReasonCode::InvalidRequest => "GW_ERROR_INVALID_REQUEST",
            GateReasonCode::UnknownTopLevelKey => "GW_ERROR_UNKNOWN_TOP_LEVEL_KEY",
            GateReasonCode::UnknownWalletKey => "GW_ERROR_UNKNOWN_WALLET_KEY",
            GateReasonCode::UnknownTxKey => "GW_ERROR_UNKNOWN_TX_KEY",
            GateReasonCode::UnknownSignalKey => "GW_ERROR_UNKNOWN_SIGNAL_KEY",
            GateReasonCode::Oversize => "GW_ERROR_OVERSIZE",
            GateReasonCode::BadNumber => "GW_ERROR_BAD_NUMBER",
            GateReasonCode::ContractVersionMismatch => "GW_ERROR_CONTRACT_VERSION_MISMATCH",
            GateReasonCode::ComponentMismatch => "GW_ERROR_COMPONENT_MISMATCH",
            GateReasonCode::InternalError => "GW_ERROR_INTERNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct WalletCtx {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_age_days: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_count_24h: Option<f64>,
}

impl Validate for WalletCtx {
    fn validate(&self) -> Result<(), ContractViolation> {
        require_finite("wallet_ctx.balance", self.balance)?;
        require_finite("wallet_ctx.typical_amount", self.typical_amount)?;
        require_finite("wallet_ctx.wallet_age_days", self.wallet_age_days)?;
        require_finite("wallet_ctx.tx_count_24h", self.tx_count_24h)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TxCtx {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

impl Validate for TxCtx {
    fn validate(&self) -> Result<(), ContractViolation> {
        require_finite("tx_ctx.amount", self.amount)?;
        require_finite("tx_ctx.fee", self.fee)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ExtraSignals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentinel_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trusted_device: Option<bool>,
}

impl Validate for ExtraSignals {
    fn validate(&self) -> Result<(), ContractViolation> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gw3Request {
    pub contract_version: SchemaVersion,
    pub component: String,
    pub request_id: String,
    pub wallet_ctx: WalletCtx,
    pub tx_ctx: TxCtx,
    pub extra_signals: ExtraSignals,
}

impl Gw3Request {
    /// Builds a request carrying the gate's own declared contract version.
    pub fn v3(
        component: String,
        request_id: String,
        wallet_ctx: WalletCtx,
        tx_ctx: TxCtx,
        extra_signals: ExtraSignals,
    ) -> Result<Self, ContractViolation> {
        let req = Self {
            contract_version: GW3_CONTRACT_VERSION,
            component,
            request_id,
            wallet_ctx,
            tx_ctx,
            extra_signals,
        };
        req.validate()?;
        Ok(req)
    }
}

impl Validate for Gw3Request {
    fn validate(&self) -> Result<(), ContractViolation> {
        // Structural validity only; version/component equality against a
        // particular gate instance is the gate's identity check.
        if self.component.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_request.component",
                reason: "must not be empty",
            });
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_request.request_id",
                reason: "must not be empty",
            });
        }
        self.wallet_ctx.validate()?;
        self.tx_ctx.validate()?;
        self.extra_signals.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Allow,
    Deny,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::Allow => "allow",
            OutcomeKind::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutcomeMeta {
    pub fail_closed: bool,
    pub risk_level: Option<RiskLevel>,
    pub risk_score: Option<f64>,
    pub decision: Option<DecisionKind>,
    pub cooldown_seconds: u32,
    pub require_second_factor: bool,
}

impl OutcomeMeta {
    pub fn fail_closed() -> Self {
        Self {
            fail_closed: true,
            ..Self::default()
        }
    }

    pub fn scored(decision: &GuardianDecision) -> Self {
        Self {
            fail_closed: false,
            risk_level: Some(decision.level),
            risk_score: Some(decision.score),
            decision: Some(decision.decision),
            cooldown_seconds: decision.cooldown_seconds,
            require_second_factor: decision.require_second_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gw3Outcome {
    pub contract_version: SchemaVersion,
    pub component: String,
    pub request_id: String,
    pub outcome: OutcomeKind,
    pub reason_codes: Vec<String>,
    pub context_hash: String,
    pub meta: OutcomeMeta,
}

impl Gw3Outcome {
    pub fn v3(
        contract_version: SchemaVersion,
        component: String,
        request_id: String,
        outcome: OutcomeKind,
        reason_codes: Vec<String>,
        context_hash: String,
        meta: OutcomeMeta,
    ) -> Result<Self, ContractViolation> {
        let out = Self {
            contract_version,
            component,
            request_id,
            outcome,
            reason_codes,
            context_hash,
            meta,
        };
        out.validate()?;
        Ok(out)
    }
}

impl Validate for Gw3Outcome {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.component.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_outcome.component",
                reason: "must not be empty",
            });
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_outcome.request_id",
                reason: "must not be empty",
            });
        }
        if self.context_hash.len() != 64
            || !self
                .context_hash
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_outcome.context_hash",
                reason: "must be lowercase hex sha256 (64 chars)",
            });
        }
        if self.meta.fail_closed {
            if self.outcome != OutcomeKind::Deny {
                return Err(ContractViolation::InvalidValue {
                    field: "gw3_outcome.outcome",
                    reason: "must be deny when meta.fail_closed is set",
                });
            }
            if self.reason_codes.len() != 1 {
                return Err(ContractViolation::InvalidValue {
                    field: "gw3_outcome.reason_codes",
                    reason: "must carry exactly one code on the fail-closed path",
                });
            }
        }
        if self.outcome == OutcomeKind::Deny && self.reason_codes.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "gw3_outcome.reason_codes",
                reason: "must not be empty on deny",
            });
        }
        if let Some(score) = self.meta.risk_score {
            if !score.is_finite() {
                return Err(ContractViolation::NotFinite {
                    field: "gw3_outcome.meta.risk_score",
                });
            }
            if !(0.0..=1.0).contains(&score) {
                return Err(ContractViolation::InvalidRange {
                    field: "gw3_outcome.meta.risk_score",
                    min: 0.0,
                    max: 1.0,
                    got: score,
                });
            }
        }
        Ok(())
    }
}

fn require_finite(field: &'static str, value: Option<f64>) -> Result<(), ContractViolation> {
    match value {
        Some(v) if !v.is_finite() => Err(ContractViolation::NotFinite { field }),
        _ => Ok(()),
    }
}
