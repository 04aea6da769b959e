pub mod commands;
pub mod config;

pub use commands::{execute, watch, CliCommand};
pub use config::CliConfig;
