//! `ferry.toml` configuration
//!
//! Every field is optional in the file; missing fields take the defaults
//! below, and command-line flags override whatever the file says.

use anyhow::Context;
use ferry_core::IsolateOptions;
use ferry_task::RunMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Options applied to every isolate the CLI creates
    pub isolate: IsolateConfig,
    /// Workload settings for `ferry run`
    pub run: RunConfig,
}

/// Isolate settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolateConfig {
    /// Frames captured per asynchronous call
    pub stack_trace_limit: usize,
    /// Idle worker poll interval in milliseconds
    pub idle_poll_ms: u64,
    /// Prefix for target isolate names
    pub name_prefix: String,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            stack_trace_limit: ferry_core::stack::DEFAULT_STACK_TRACE_LIMIT,
            idle_poll_ms: 10,
            name_prefix: "target".to_string(),
        }
    }
}

impl IsolateConfig {
    /// Options for an isolate called `name`
    pub fn options(&self, name: impl Into<String>) -> IsolateOptions {
        IsolateOptions::default()
            .with_name(name)
            .with_stack_trace_limit(self.stack_trace_limit)
            .with_idle_poll(Duration::from_millis(self.idle_poll_ms))
    }
}

/// Workload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// `sync`, `async` or `ignored`
    pub mode: String,
    /// Number of tasks to run
    pub tasks: usize,
    /// Number of target isolates (0 = one per CPU, at most 8)
    pub targets: usize,
    /// Numbers summed by each task
    pub batch: usize,
    /// Make every Nth task fail in its target (0 = never)
    pub fail_every: usize,
    /// How long to wait for asynchronous results, in milliseconds
    pub timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Async.to_string(),
            tasks: 100,
            targets: 2,
            batch: 16,
            fail_every: 0,
            timeout_ms: 5_000,
        }
    }
}

impl RunConfig {
    /// Parsed run mode
    pub fn run_mode(&self) -> anyhow::Result<RunMode> {
        Ok(self.mode.parse::<RunMode>()?)
    }

    /// Number of targets, resolving 0 to the CPU count
    pub fn target_count(&self) -> usize {
        match self.targets {
            0 => num_cpus::get().clamp(1, 8),
            n => n,
        }
    }

    /// Reject workloads whose inputs would not fit in an `i32`
    pub fn validate(&self) -> anyhow::Result<()> {
        let largest = self
            .tasks
            .checked_mul(self.batch)
            .filter(|n| *n <= i32::MAX as usize);
        if largest.is_none() {
            anyhow::bail!(
                "tasks ({}) x batch ({}) must not exceed {}",
                self.tasks,
                self.batch,
                i32::MAX
            );
        }
        Ok(())
    }

    /// Timeout for asynchronous results
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CliConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
