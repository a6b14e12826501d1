#![forbid(unsafe_code)]

pub mod config;
pub mod wallet_guardian;

pub use config::{load_config, parse_config, ConfigError, GuardianConfig};
pub use wallet_guardian::{outcome_to_value, WalletGuardian};
