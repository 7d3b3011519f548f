//! One optimize-run target: optimizer proxy plus result aggregator.

use std::path::{Path, PathBuf};

use af_exec::{Optimizer, ReadinessRegistry, RunProgress, RunState};
use af_results::OptimizationResults;
use tracing::info;

use crate::error::AppResult;

/// Snapshot of the observable run state, taken once per polling tick and
/// diffed against the previous tick's snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct RunSnapshot {
    /// Identity of the current run; a new start bumps it so a subscriber
    /// discards its old comparison baseline.
    pub run_token: u64,
    pub state: RunState,
    pub n_steps: usize,
    pub n_designs: usize,
}

/// Binds an `Optimizer` proxy and an `OptimizationResults` aggregator for
/// one `(working_dir, output_name)` target.
pub struct OptimizerRun {
    optimizer: Optimizer,
    results: OptimizationResults,
    working_dir: PathBuf,
    output_name: String,
    run_token: u64,
}

impl OptimizerRun {
    pub fn new(
        registry: &ReadinessRegistry,
        base_dir: &Path,
        working_dir: &Path,
        output_name: &str,
    ) -> AppResult<Self> {
        Ok(Self {
            optimizer: Optimizer::new(registry, base_dir, working_dir),
            results: OptimizationResults::new(working_dir, output_name)?,
            working_dir: working_dir.to_path_buf(),
            output_name: output_name.to_string(),
            run_token: 0,
        })
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn run_token(&self) -> u64 {
        self.run_token
    }

    pub fn is_ready(&self) -> bool {
        self.optimizer.is_ready()
    }

    pub fn ready_message(&self) -> &str {
        self.optimizer.ready_message()
    }

    /// Start a fresh optimization. The result files are rewritten from
    /// scratch by the new run, so the aggregator is rebuilt and the run
    /// token bumped.
    pub fn start(&mut self, input_file: &Path, seed_airfoil: &Path) -> AppResult<()> {
        self.optimizer
            .run(&self.output_name, input_file, seed_airfoil)?;
        self.results = OptimizationResults::new(&self.working_dir, &self.output_name)?;
        self.run_token += 1;
        info!(output_name = %self.output_name, token = self.run_token, "optimization started");
        Ok(())
    }

    /// Bind to an optimization some other process started in this
    /// working directory.
    pub fn attach(&mut self) -> bool {
        let attached = self.optimizer.attach();
        if attached && self.run_token == 0 {
            self.run_token = 1;
        }
        attached
    }

    /// Request cooperative stop via the control file.
    pub fn stop(&mut self) -> AppResult<()> {
        self.optimizer.request_stop()?;
        Ok(())
    }

    /// Hard-kill a self-spawned optimizer.
    pub fn terminate(&mut self) {
        self.optimizer.terminate();
    }

    /// Clear a pending run error back to ready.
    pub fn reset(&mut self) {
        self.optimizer.reset();
    }

    pub fn state(&mut self) -> RunState {
        self.optimizer.poll_state()
    }

    /// Error text of a failed run (valid in `RunError` state).
    pub fn error_text(&self) -> Option<&str> {
        self.optimizer.error_text()
    }

    /// Cheap progress from the control file (not from the result files).
    pub fn progress(&self) -> RunProgress {
        self.optimizer.get_progress()
    }

    pub fn results(&mut self) -> &mut OptimizationResults {
        &mut self.results
    }

    /// Observable state for the polling tick. Counts come from the
    /// lightweight control file; the result files are only re-read after
    /// a diff marks the aggregator dirty.
    pub fn snapshot(&mut self) -> RunSnapshot {
        let state = self.optimizer.poll_state();
        let progress = self.optimizer.get_progress();
        RunSnapshot {
            run_token: self.run_token,
            state,
            n_steps: progress.steps,
            n_designs: progress.designs,
        }
    }
}
