//! Ferry command-line driver
//!
//! Library half of the `ferry` binary: configuration loading, the demo
//! workload and the command implementations, kept here so they can be
//! tested without spawning the binary.

pub mod commands;
pub mod config;
pub mod workload;

pub use commands::run::{RunOverrides, RunReport};
pub use config::{CliConfig, IsolateConfig, RunConfig};
