#![forbid(unsafe_code)]

use serde::Deserialize;

use guardian_contracts::decision::{DecisionKind, GuardianDecision, RiskLevel};
use guardian_contracts::gw3::{ExtraSignals, TxCtx, WalletCtx};
use guardian_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskConfig {
    pub max_normal_send_ratio: f64,
    pub large_send_warning_ratio: f64,
    pub full_balance_ratio: f64,
    pub block_full_balance_if_high_risk: bool,
    pub typical_amount_multiplier: f64,
    pub max_tx_count_24h: f64,
    pub min_wallet_age_days: f64,
    pub weight_large_send: f64,
    pub weight_elevated_send: f64,
    pub weight_atypical_amount: f64,
    pub weight_send_velocity: f64,
    pub weight_young_wallet: f64,
    pub weight_untrusted_device: f64,
    pub weight_sentinel_elevated: f64,
    pub warn_score_bound: f64,
    pub block_score_bound: f64,
    pub warn_cooldown_seconds: u32,
}

impl RiskConfig {
    pub fn mvp_v1() -> Self {
        Self {
            max_normal_send_ratio: 0.5,
            large_send_warning_ratio: 0.9,
            full_balance_ratio: 0.999,
            block_full_balance_if_high_risk: true,
            typical_amount_multiplier: 10.0,
            max_tx_count_24h: 12.0,
            min_wallet_age_days: 7.0,
            weight_large_send: 0.45,
            weight_elevated_send: 0.25,
            weight_atypical_amount: 0.15,
            weight_send_velocity: 0.15,
            weight_young_wallet: 0.10,
            weight_untrusted_device: 0.20,
            weight_sentinel_elevated: 0.15,
            warn_score_bound: 0.35,
            block_score_bound: 0.75,
            warn_cooldown_seconds: 30,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

impl Validate for RiskConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        require_unit_ratio("risk_config.max_normal_send_ratio", self.max_normal_send_ratio)?;
        require_unit_ratio(
            "risk_config.large_send_warning_ratio",
            self.large_send_warning_ratio,
        )?;
        require_unit_ratio("risk_config.full_balance_ratio", self.full_balance_ratio)?;
        if self.max_normal_send_ratio >= self.large_send_warning_ratio {
            return Err(ContractViolation::InvalidValue {
                field: "risk_config.max_normal_send_ratio",
                reason: "must be below large_send_warning_ratio",
            });
        }
        if !self.typical_amount_multiplier.is_finite() || self.typical_amount_multiplier <= 1.0 {
            return Err(ContractViolation::InvalidValue {
                field: "risk_config.typical_amount_multiplier",
                reason: "must be a finite multiplier above 1",
            });
        }
        if !self.max_tx_count_24h.is_finite() || self.max_tx_count_24h < 1.0 {
            return Err(ContractViolation::InvalidValue {
                field: "risk_config.max_tx_count_24h",
                reason: "must be at least 1",
            });
        }
        if !self.min_wallet_age_days.is_finite() || self.min_wallet_age_days < 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "risk_config.min_wallet_age_days",
                reason: "must be non-negative",
            });
        }
        for (field, weight) in [
            ("risk_config.weight_large_send", self.weight_large_send),
            ("risk_config.weight_elevated_send", self.weight_elevated_send),
            (
                "risk_config.weight_atypical_amount",
                self.weight_atypical_amount,
            ),
            ("risk_config.weight_send_velocity", self.weight_send_velocity),
            ("risk_config.weight_young_wallet", self.weight_young_wallet),
            (
                "risk_config.weight_untrusted_device",
                self.weight_untrusted_device,
            ),
            (
                "risk_config.weight_sentinel_elevated",
                self.weight_sentinel_elevated,
            ),
        ] {
            if !weight.is_finite() {
                return Err(ContractViolation::NotFinite { field });
            }
            if !(0.0..=1.0).contains(&weight) {
                return Err(ContractViolation::InvalidRange {
                    field,
                    min: 0.0,
                    max: 1.0,
                    got: weight,
                });
            }
        }
        require_unit_ratio("risk_config.warn_score_bound", self.warn_score_bound)?;
        require_unit_ratio("risk_config.block_score_bound", self.block_score_bound)?;
        if self.warn_score_bound >= self.block_score_bound {
            return Err(ContractViolation::InvalidValue {
                field: "risk_config.warn_score_bound",
                reason: "must be below block_score_bound",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RiskRuntime {
    config: RiskConfig,
}

impl RiskRuntime {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Threshold scoring over validated context. Rule order is fixed so the
    /// reason list is reproducible for identical input.
    pub fn run(
        &self,
        wallet: &WalletCtx,
        tx: &TxCtx,
        signals: &ExtraSignals,
    ) -> Result<GuardianDecision, ContractViolation> {
        let cfg = &self.config;
        let amount = tx.amount.unwrap_or(0.0);
        let balance = wallet.balance.unwrap_or(0.0);
        let send_ratio = if balance > 0.0 { amount / balance } else { 0.0 };

        let mut score = 0.0f64;
        let mut reasons: Vec<String> = Vec::new();

        if balance > 0.0 && send_ratio >= cfg.large_send_warning_ratio {
            score += cfg.weight_large_send;
            reasons.push(format!(
                "send amount is {:.1}% of wallet balance",
                send_ratio * 100.0
            ));
        } else if balance > 0.0 && send_ratio > cfg.max_normal_send_ratio {
            score += cfg.weight_elevated_send;
            reasons.push(format!(
                "send amount exceeds {:.0}% of wallet balance",
                cfg.max_normal_send_ratio * 100.0
            ));
        }

        if let Some(typical) = wallet.typical_amount {
            if typical > 0.0 && amount > typical * cfg.typical_amount_multiplier {
                score += cfg.weight_atypical_amount;
                reasons.push(format!(
                    "send amount is more than {}x the typical amount",
                    cfg.typical_amount_multiplier
                ));
            }
        }

        let mut velocity_tripped = false;
        if let Some(tx_count) = wallet.tx_count_24h {
            if tx_count >= cfg.max_tx_count_24h {
                velocity_tripped = true;
                score += cfg.weight_send_velocity;
                reasons.push(format!("{tx_count} sends in the last 24h exceeds the limit"));
            }
        }

        if let Some(age_days) = wallet.wallet_age_days {
            if age_days < cfg.min_wallet_age_days {
                score += cfg.weight_young_wallet;
                reasons.push(format!(
                    "wallet is younger than {} days",
                    cfg.min_wallet_age_days
                ));
            }
        }

        let untrusted = signals.trusted_device == Some(false);
        if untrusted {
            score += cfg.weight_untrusted_device;
            reasons.push("initiating device is not trusted".to_string());
        }

        let sentinel = signals.sentinel_status.as_deref();
        let sentinel_critical = sentinel == Some("CRITICAL");
        if sentinel_critical {
            reasons.push("sentinel reported CRITICAL status".to_string());
            score = 1.0;
        } else if let Some(status @ ("ELEVATED" | "HIGH")) = sentinel {
            score += cfg.weight_sentinel_elevated;
            reasons.push(format!("sentinel reported {status} status"));
        }

        let score = score.clamp(0.0, 1.0);

        let level = if sentinel_critical {
            RiskLevel::Critical
        } else if score >= cfg.block_score_bound {
            RiskLevel::High
        } else if score >= cfg.warn_score_bound {
            RiskLevel::Elevated
        } else {
            RiskLevel::Normal
        };

        let full_balance_send = balance > 0.0 && send_ratio >= cfg.full_balance_ratio;
        let force_block =
            cfg.block_full_balance_if_high_risk && full_balance_send && level.is_blocking();
        if force_block {
            reasons.push("full-balance send while risk is blocking".to_string());
        }

        let (decision, cooldown_seconds, require_second_factor) = match level {
            RiskLevel::Normal => (DecisionKind::Allow, 0, false),
            RiskLevel::Elevated => {
                let kind = if velocity_tripped {
                    DecisionKind::Delay
                } else {
                    DecisionKind::Warn
                };
                (kind, cfg.warn_cooldown_seconds, false)
            }
            RiskLevel::High => {
                if untrusted || force_block {
                    (DecisionKind::Block, 0, false)
                } else {
                    (DecisionKind::RequireExtraAuth, 0, true)
                }
            }
            RiskLevel::Critical => (DecisionKind::Block, 0, false),
        };

        GuardianDecision::v1(
            level,
            score,
            decision,
            reasons,
            cooldown_seconds,
            require_second_factor,
        )
    }
}

fn require_unit_ratio(field: &'static str, value: f64) -> Result<(), ContractViolation> {
    if !value.is_finite() {
        return Err(ContractViolation::NotFinite { field });
    }
    if !(value > 0.0 && value <= 1.0) {
        return Err(ContractViolation::InvalidRange {
            field,
            min: 0.0,
            max: 1.0,
            got: value,
        });
    }
    Ok(())
}
