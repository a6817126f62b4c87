//! The devcss bridge: a stdio tool front on one side, a single browser peer on
//! the other, and the request correlator in between.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod relay;
pub mod stdio;

pub use config::BridgeConfig;
pub use error::{CliError, Result};
pub use relay::BridgeServer;
