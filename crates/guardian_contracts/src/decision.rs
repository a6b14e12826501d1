#![forbid(unsafe_code)]

use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskLevel {
    Normal,
    Elevated,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Normal => "NORMAL",
            RiskLevel::Elevated => "ELEVATED",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// HIGH and CRITICAL must prevent signing absent an explicit override.
    pub fn is_blocking(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionKind {
    Allow,
    Warn,
    Delay,
    Block,
    RequireExtraAuth,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::Allow => "allow",
            DecisionKind::Warn => "warn",
            DecisionKind::Delay => "delay",
            DecisionKind::Block => "block",
            DecisionKind::RequireExtraAuth => "require_extra_auth",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardianDecision {
    pub level: RiskLevel,
    pub score: f64,
    pub decision: DecisionKind,
    pub reasons: Vec<String>,
    pub cooldown_seconds: u32,
    pub require_second_factor: bool,
}

impl GuardianDecision {
    pub fn v1(
        level: RiskLevel,
        score: f64,
        decision: DecisionKind,
        reasons: Vec<String>,
        cooldown_seconds: u32,
        require_second_factor: bool,
    ) -> Result<Self, ContractViolation> {
        let out = Self {
            level,
            score,
            decision,
            reasons,
            cooldown_seconds,
            require_second_factor,
        };
        out.validate()?;
        Ok(out)
    }

    pub fn is_blocking(&self) -> bool {
        self.level.is_blocking()
    }
}

impl Validate for GuardianDecision {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.score.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "guardian_decision.score",
            });
        }
        if !(0.0..=1.0).contains(&self.score) {
            return Err(ContractViolation::InvalidRange {
                field: "guardian_decision.score",
                min: 0.0,
                max: 1.0,
                got: self.score,
            });
        }
        let decision_fits_level = match self.level {
            RiskLevel::Normal => self.decision == DecisionKind::Allow,
            RiskLevel::Elevated => {
                matches!(self.decision, DecisionKind::Warn | DecisionKind::Delay)
            }
            RiskLevel::High | RiskLevel::Critical => {
                matches!(
                    self.decision,
                    DecisionKind::Block | DecisionKind::RequireExtraAuth
                )
            }
        };
        if !decision_fits_level {
            return Err(ContractViolation::InvalidValue {
                field: "guardian_decision.decision",
                reason: "must match the risk level band",
            });
        }
        if self.require_second_factor && self.decision != DecisionKind::RequireExtraAuth {
            return Err(ContractViolation::InvalidValue {
                field: "guardian_decision.require_second_factor",
                reason: "must only be set when decision is require_extra_auth",
            });
        }
        if self.cooldown_seconds > 0
            && !matches!(self.decision, DecisionKind::Warn | DecisionKind::Delay)
        {
            return Err(ContractViolation::InvalidValue {
                field: "guardian_decision.cooldown_seconds",
                reason: "must be 0 unless decision is warn or delay",
            });
        }
        for reason in &self.reasons {
            if reason.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "guardian_decision.reasons",
                    reason: "must not contain empty entries",
                });
            }
        }
        Ok(())
    }
}
