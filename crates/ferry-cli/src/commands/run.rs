//! `ferry run`: drive a batch of tasks from one origin into target isolates

use crate::config::{CliConfig, RunConfig};
use crate::workload::{expected_sum, task_input, SumTask};
use crossbeam::channel::{self, Receiver, Sender};
use ferry_core::{Isolate, IsolateRegistry, IsolateScope, Value};
use ferry_task::{run, RunMode};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Command-line overrides for the `[run]` section
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub mode: Option<RunMode>,
    pub tasks: Option<usize>,
    pub targets: Option<usize>,
    pub batch: Option<usize>,
    pub fail_every: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl RunOverrides {
    /// Apply the flags that were given on top of `config`
    pub fn apply(self, config: &mut RunConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode.to_string();
        }
        if let Some(tasks) = self.tasks {
            config.tasks = tasks;
        }
        if let Some(targets) = self.targets {
            config.targets = targets;
        }
        if let Some(batch) = self.batch {
            config.batch = batch;
        }
        if let Some(fail_every) = self.fail_every {
            config.fail_every = fail_every;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
    }
}

/// Summary of one `ferry run`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub mode: String,
    pub tasks: usize,
    pub targets: usize,
    /// Tasks whose result came back (sync and async)
    pub fulfilled: usize,
    /// Tasks that failed and said so (sync and async)
    pub rejected: usize,
    /// Fire-and-forget tasks that failed in their target
    pub ignored_failures: usize,
    /// Results that disagree with the locally computed sum
    pub mismatches: usize,
    /// Sum of all returned sums
    pub checksum: i64,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn new(mode: RunMode, tasks: usize, targets: usize) -> Self {
        Self {
            mode: mode.to_string(),
            tasks,
            targets,
            ..Self::default()
        }
    }

    fn record(&mut self, index: usize, batch: usize, outcome: Outcome) {
        match outcome {
            Outcome::Sum(sum) => {
                self.fulfilled += 1;
                self.checksum += i64::from(sum);
                if i64::from(sum) != expected_sum(index, batch) {
                    self.mismatches += 1;
                }
            }
            Outcome::Failed(message) => {
                tracing::debug!(task = index, error = %message, "task rejected");
                self.rejected += 1;
            }
        }
    }

    /// Human-readable summary lines
    pub fn render(&self) -> String {
        let mut out = format!(
            "mode:      {}\ntasks:     {} across {} target isolate(s)\n",
            self.mode, self.tasks, self.targets
        );
        match self.mode.as_str() {
            "ignored" => {
                out.push_str(&format!("failures:  {} (ignored)\n", self.ignored_failures));
            }
            _ => {
                out.push_str(&format!("fulfilled: {}\n", self.fulfilled));
                out.push_str(&format!("rejected:  {}\n", self.rejected));
                out.push_str(&format!("checksum:  {}\n", self.checksum));
                if self.mismatches > 0 {
                    out.push_str(&format!("MISMATCHES: {}\n", self.mismatches));
                }
            }
        }
        out.push_str(&format!("elapsed:   {} ms", self.elapsed_ms));
        out
    }
}

/// What came back from one task
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Sum(i32),
    Failed(String),
}

impl Outcome {
    /// Read a task result while inside the origin
    fn read(scope: &IsolateScope, result: Result<Value, Value>) -> Self {
        match result {
            Ok(record) => match scope.get_field(&record, "sum") {
                Ok(Some(Value::I32(sum))) => Outcome::Sum(sum),
                other => Outcome::Failed(format!("malformed result: {:?}", other)),
            },
            Err(reason) => match scope.error_object(&reason) {
                Ok(error) => Outcome::Failed(format!("{}: {}", error.name, error.message)),
                Err(_) => Outcome::Failed(reason.to_string()),
            },
        }
    }
}

fn is_poisoned(index: usize, fail_every: usize) -> bool {
    fail_every > 0 && (index + 1) % fail_every == 0
}

/// Run the workload described by `config`
pub fn execute(config: &CliConfig) -> anyhow::Result<RunReport> {
    let registry = IsolateRegistry::new();
    let result = drive(&registry, config);
    registry.dispose_all();
    result
}

fn drive(registry: &IsolateRegistry, config: &CliConfig) -> anyhow::Result<RunReport> {
    let run_config = &config.run;
    let mode = run_config.run_mode()?;
    run_config.validate()?;
    let target_count = run_config.target_count();
    let ignored_failures = Arc::new(AtomicUsize::new(0));

    let origin = registry.create(config.isolate.options("origin"))?;
    let mut targets = Vec::with_capacity(target_count);
    for i in 0..target_count {
        let failures = ignored_failures.clone();
        let name = format!("{}-{}", config.isolate.name_prefix, i);
        let options = config.isolate.options(name).with_failure_sink(move |id, err| {
            failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(isolate = %id, error = %err, "ignored task failed");
        });
        targets.push(registry.create(options)?);
    }
    tracing::info!(%mode, tasks = run_config.tasks, targets = target_count, "starting run");

    let started = Instant::now();
    let mut report = RunReport::new(mode, run_config.tasks, target_count);
    match mode {
        RunMode::Sync => run_sync_batch(&origin, &targets, run_config, &mut report)?,
        RunMode::Async => run_async_batch(&origin, &targets, run_config, &mut report)?,
        RunMode::AsyncIgnored => run_ignored_batch(&origin, &targets, run_config)?,
    }
    report.ignored_failures = ignored_failures.load(Ordering::Relaxed);
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

fn run_sync_batch(
    origin: &Isolate,
    targets: &[Isolate],
    config: &RunConfig,
    report: &mut RunReport,
) -> anyhow::Result<()> {
    let mut scope = origin.lock()?;
    for index in 0..config.tasks {
        let target = &targets[index % targets.len()];
        let poison = is_poisoned(index, config.fail_every);
        let input = task_input(&mut scope, index, config.batch, poison);

        let result = run::<SumTask>(RunMode::Sync, &mut scope, target, input.clone());
        let outcome = match result {
            Ok(record) => {
                let outcome = Outcome::read(&scope, Ok(record.clone()));
                scope.release(&record);
                outcome
            }
            Err(err) => Outcome::Failed(err.to_string()),
        };
        scope.release(&input);
        report.record(index, config.batch, outcome);
    }
    Ok(())
}

fn run_async_batch(
    origin: &Isolate,
    targets: &[Isolate],
    config: &RunConfig,
    report: &mut RunReport,
) -> anyhow::Result<()> {
    let (tx, rx): (Sender<(usize, Outcome)>, Receiver<(usize, Outcome)>) = channel::unbounded();
    {
        let mut scope = origin.lock()?;
        for index in 0..config.tasks {
            let target = &targets[index % targets.len()];
            let poison = is_poisoned(index, config.fail_every);
            let input = task_input(&mut scope, index, config.batch, poison);

            let promise = run::<SumTask>(RunMode::Async, &mut scope, target, input.clone())?;
            scope.release(&input);

            let tx = tx.clone();
            let settled = promise.clone();
            scope.on_settled(&promise, move |scope, result| {
                let outcome = Outcome::read(scope, result);
                scope.release(&settled);
                let _ = tx.send((index, outcome));
            })?;
        }
    }
    drop(tx);

    let deadline = Instant::now() + config.timeout();
    for received in 0..config.tasks {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (index, outcome) = rx.recv_timeout(remaining).map_err(|_| {
            anyhow::anyhow!(
                "timed out after {} ms waiting for {} result(s)",
                config.timeout_ms,
                config.tasks - received
            )
        })?;
        report.record(index, config.batch, outcome);
    }
    Ok(())
}

fn run_ignored_batch(
    origin: &Isolate,
    targets: &[Isolate],
    config: &RunConfig,
) -> anyhow::Result<()> {
    {
        let mut scope = origin.lock()?;
        for index in 0..config.tasks {
            let target = &targets[index % targets.len()];
            let poison = is_poisoned(index, config.fail_every);
            let input = task_input(&mut scope, index, config.batch, poison);
            run::<SumTask>(RunMode::AsyncIgnored, &mut scope, target, input.clone())?;
            scope.release(&input);
        }
    }

    // Nothing comes back; wait for the target queues to drain instead.
    let deadline = Instant::now() + config.timeout();
    while targets.iter().any(|target| target.stats().pending() > 0) {
        if Instant::now() >= deadline {
            anyhow::bail!(
                "timed out after {} ms waiting for target queues to drain",
                config.timeout_ms
            );
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
