//! Proof-of-work chain simulator
//!
//! Honest miners race to extend a shared chain while a single validator
//! checks every candidate they submit:
//! - Multi-threaded nonce search against a checksum target
//! - A faulty miner whose forged candidates must all be rejected
//! - One validator thread that alone writes the chain
//! - Bounded runs that halt once the chain passes a height

pub mod chain;
pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;
pub mod simulation;
pub mod state;
pub mod types;
pub mod utils;
pub mod validator;
pub mod worker;

pub use chain::Chain;
pub use checksum::{Checksum, Crc32Checksum};
pub use config::Config;
pub use error::{Error, Result};
pub use simulation::{Outcome, Simulation, SimulationConfig, SimulationReport};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "pow-chain-simulator";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
