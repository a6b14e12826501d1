#![forbid(unsafe_code)]

pub mod common;
pub mod decision;
pub mod gw3;

pub use common::{ContractViolation, SchemaVersion, Validate};
