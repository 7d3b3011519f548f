//! Driver for the Xoptfoil2 optimizer process.
//!
//! The optimizer runs as a separate OS process and reports progress through
//! a small control file it rewrites every few seconds:
//!
//! ```text
//! !run-info; step: 14; design: 3; fmin: 0.973512
//! ```
//!
//! This driver writes a single `!stop` command line into the same file to
//! request graceful termination; the optimizer polls the file itself, so a
//! stop is cooperative, never enforced. Liveness of a run this process did
//! not spawn is inferred purely from the control file's age, since the
//! optimizer may have been started by another instance and an owned
//! process handle cannot be assumed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::program::{ExternalProgram, ProgramSpec};
use crate::registry::ReadinessRegistry;
use crate::{ExecError, ExecResult};

/// Control file the optimizer rewrites while alive.
pub const RUN_CONTROL_FILE: &str = "run_control";

/// A control file older than this is treated as a dead run.
pub const STILL_ALIVE_SECONDS: u64 = 10;

const XOPTFOIL2_MIN_VERSION: &str = "1.0.3";

/// State of the asynchronous optimizer run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    /// No run in progress, no unread error.
    Ready,
    /// Subprocess or externally started process active.
    Running,
    /// Graceful stop requested, process still observed alive.
    Stopping,
    /// Process ended with abnormal exit; cleared only by `reset()`.
    RunError,
}

/// Progress snapshot parsed from the control file.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunProgress {
    pub steps: usize,
    pub designs: usize,
    pub objective: f64,
}

impl Default for RunProgress {
    fn default() -> Self {
        Self {
            steps: 0,
            designs: 0,
            objective: 1.0,
        }
    }
}

/// Proxy specialization for the Xoptfoil2 executable.
pub struct Optimizer {
    program: ExternalProgram,
    state: RunState,
    error_text: Option<String>,
}

impl Optimizer {
    pub fn spec() -> ProgramSpec {
        ProgramSpec {
            display_name: "Xoptfoil2".to_string(),
            exe_stem: "xoptfoil2".to_string(),
            help_flag: "-h",
            search_subdirs: vec![
                "xoptfoil2".to_string(),
                "assets/xoptfoil2".to_string(),
                "bin".to_string(),
            ],
            min_version: XOPTFOIL2_MIN_VERSION,
        }
    }

    pub fn new(registry: &ReadinessRegistry, base_dir: &Path, workdir: &Path) -> Self {
        Self {
            program: ExternalProgram::new(Self::spec(), registry, base_dir, workdir),
            state: RunState::Ready,
            error_text: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_ready()
    }

    pub fn ready_message(&self) -> &str {
        self.program.ready_message()
    }

    pub fn state(&self) -> RunState {
        self.state.clone()
    }

    /// Error text of a failed run (valid in `RunError` state).
    pub fn error_text(&self) -> Option<&str> {
        self.error_text.as_deref()
    }

    pub fn workdir(&self) -> &Path {
        self.program.workdir()
    }

    fn control_file_path(&self) -> PathBuf {
        self.program.workdir().join(RUN_CONTROL_FILE)
    }

    /// Start an optimization asynchronously:
    /// `xoptfoil2 -a <seed> -o <outname> -i <input> -m child`.
    pub fn run(
        &mut self,
        output_name: &str,
        input_file: &Path,
        seed_airfoil: &Path,
    ) -> ExecResult<()> {
        if !self.program.is_ready() {
            return Err(ExecError::NotReady {
                program: self.program.display_name().to_string(),
                message: self.program.ready_message().to_string(),
            });
        }
        if self.state != RunState::Ready {
            return Err(ExecError::InvalidArg {
                what: "a run is already in progress or an error is pending",
            });
        }

        let args = vec![
            "-a".to_string(),
            seed_airfoil.display().to_string(),
            "-o".to_string(),
            output_name.to_string(),
            "-i".to_string(),
            input_file.display().to_string(),
            "-m".to_string(),
            "child".to_string(),
        ];
        let code = self.program.run_async(&args, true)?;
        if code != 0 {
            let text = self
                .program
                .finished_errortext()
                .unwrap_or_else(|| "spawn failed".to_string());
            self.state = RunState::RunError;
            self.error_text = Some(text.clone());
            return Err(ExecError::SpawnFailed {
                program: self.program.display_name().to_string(),
                message: text,
            });
        }

        info!(output_name, "optimizer started");
        self.state = RunState::Running;
        self.error_text = None;
        Ok(())
    }

    /// Bind to a run some other process started: liveness comes from the
    /// control file only.
    pub fn attach(&mut self) -> bool {
        if self.state == RunState::Ready && self.control_file_alive() {
            self.state = RunState::Running;
            true
        } else {
            self.state != RunState::Ready
        }
    }

    /// Parse current progress from the control file. An absent or
    /// malformed file yields zero progress, never an error.
    pub fn get_progress(&self) -> RunProgress {
        let content = match fs::read_to_string(self.control_file_path()) {
            Ok(content) => content,
            Err(_) => return RunProgress::default(),
        };
        content
            .lines()
            .rev()
            .find_map(parse_run_info)
            .unwrap_or_default()
    }

    /// Request graceful termination by overwriting the control file with
    /// the stop command. Cooperative: the optimizer polls the file itself.
    pub fn request_stop(&mut self) -> ExecResult<()> {
        fs::write(self.control_file_path(), "!stop\n")?;
        if self.state == RunState::Running {
            self.state = RunState::Stopping;
        }
        debug!("stop requested via control file");
        Ok(())
    }

    /// True while the control file has been rewritten recently. A stale
    /// file is deleted so a subsequent run starts clean.
    pub fn control_file_alive(&self) -> bool {
        let path = self.control_file_path();
        if is_younger_than(&path, Duration::from_secs(STILL_ALIVE_SECONDS)) {
            return true;
        }
        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not remove stale control file");
            } else {
                debug!(path = %path.display(), "removed stale control file");
            }
        }
        false
    }

    /// Liveness of the current run: the owned process handle when this
    /// instance spawned the optimizer, otherwise control-file freshness.
    pub fn is_running(&mut self) -> bool {
        if self.program.owns_process() {
            self.program.is_running()
        } else {
            self.control_file_alive()
        }
    }

    /// Observe liveness and apply the run-state transitions. Called from
    /// the polling tick; this is the only place the state machine advances.
    pub fn poll_state(&mut self) -> RunState {
        match self.state {
            RunState::Ready | RunState::RunError => {}
            RunState::Running => {
                if !self.is_running() {
                    match self.program.finished_returncode() {
                        Some(code) if code != 0 => {
                            let text = self
                                .program
                                .finished_errortext()
                                .unwrap_or_else(|| format!("exit code {}", code));
                            warn!(code, text = %text, "optimizer run failed");
                            self.error_text = Some(text);
                            self.state = RunState::RunError;
                        }
                        _ => {
                            self.state = RunState::Ready;
                        }
                    }
                }
            }
            RunState::Stopping => {
                if !self.is_running() {
                    self.state = RunState::Ready;
                }
            }
        }
        self.state.clone()
    }

    /// Hard-terminate a self-owned process (no cooperative wait).
    pub fn terminate(&mut self) {
        self.program.terminate();
        self.state = RunState::Ready;
    }

    /// Clear a pending run error back to `Ready`. The only way out of
    /// `RunError`.
    pub fn reset(&mut self) {
        self.state = RunState::Ready;
        self.error_text = None;
        self.program.finalize();
    }
}

/// `(now - mtime) < max_age`, false for a missing file.
pub fn is_younger_than(path: &Path, max_age: Duration) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return false,
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age < max_age,
        // mtime in the future: clock skew, treat as alive.
        Err(_) => true,
    }
}

/// Parse one `!run-info; step: N; design: M; fmin: F` line.
fn parse_run_info(line: &str) -> Option<RunProgress> {
    let rest = line.trim().strip_prefix("!run-info")?;
    let mut steps = None;
    let mut designs = None;
    let mut objective = None;
    for part in rest.split(';') {
        if let Some((key, value)) = part.split_once(':') {
            match key.trim() {
                "step" => steps = value.trim().parse::<usize>().ok(),
                "design" => designs = value.trim().parse::<usize>().ok(),
                "fmin" => objective = value.trim().parse::<f64>().ok(),
                _ => {}
            }
        }
    }
    Some(RunProgress {
        steps: steps?,
        designs: designs?,
        objective: objective?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_workdir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "af_exec_{}_{}_{}",
            tag,
            std::process::id(),
            TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).expect("create test workdir");
        dir
    }

    fn set_mtime(path: &Path, when: SystemTime) {
        let file = fs::File::options()
            .write(true)
            .open(path)
            .expect("open for mtime");
        file.set_modified(when).expect("set mtime");
    }

    #[test]
    fn run_info_line_parses() {
        let progress = parse_run_info("!run-info; step: 14; design: 3; fmin: 0.973512").unwrap();
        assert_eq!(progress.steps, 14);
        assert_eq!(progress.designs, 3);
        assert!((progress.objective - 0.973512).abs() < 1e-12);
    }

    #[test]
    fn run_info_malformed_yields_none() {
        assert!(parse_run_info("").is_none());
        assert!(parse_run_info("step: 14; design: 3").is_none());
        assert!(parse_run_info("!run-info; step: x; design: 3; fmin: 1.0").is_none());
        assert!(parse_run_info("!run-info; step: 1; design: 2").is_none());
    }

    #[test]
    fn progress_defaults_when_file_missing() {
        let workdir = test_workdir("progress_missing");
        let optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        let progress = optimizer.get_progress();
        assert_eq!(progress.steps, 0);
        assert_eq!(progress.designs, 0);
        assert!((progress.objective - 1.0).abs() < 1e-12);
    }

    #[test]
    fn progress_reads_last_run_info_line() {
        let workdir = test_workdir("progress_read");
        let optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        fs::write(
            workdir.join(RUN_CONTROL_FILE),
            "!run-info; step: 1; design: 0; fmin: 1.0\n!run-info; step: 5; design: 2; fmin: 0.95\n",
        )
        .unwrap();
        let progress = optimizer.get_progress();
        assert_eq!(progress.steps, 5);
        assert_eq!(progress.designs, 2);
    }

    #[test]
    fn fresh_control_file_is_alive() {
        let workdir = test_workdir("alive_fresh");
        let optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        let control = workdir.join(RUN_CONTROL_FILE);
        fs::write(&control, "!run-info; step: 1; design: 0; fmin: 1.0\n").unwrap();
        set_mtime(&control, SystemTime::now() - Duration::from_secs(5));

        assert!(optimizer.control_file_alive());
        assert!(control.exists());
    }

    #[test]
    fn stale_control_file_is_dead_and_deleted() {
        let workdir = test_workdir("alive_stale");
        let optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        let control = workdir.join(RUN_CONTROL_FILE);
        fs::write(&control, "!run-info; step: 1; design: 0; fmin: 1.0\n").unwrap();
        set_mtime(&control, SystemTime::now() - Duration::from_secs(15));

        assert!(!optimizer.control_file_alive());
        assert!(!control.exists());
    }

    #[test]
    fn stop_request_overwrites_control_file() {
        let workdir = test_workdir("stop");
        let mut optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        let control = workdir.join(RUN_CONTROL_FILE);
        fs::write(&control, "!run-info; step: 1; design: 0; fmin: 1.0\n").unwrap();

        optimizer.request_stop().unwrap();
        assert_eq!(fs::read_to_string(&control).unwrap(), "!stop\n");
    }

    #[test]
    fn attached_run_goes_ready_when_control_file_goes_stale() {
        let workdir = test_workdir("attach");
        let mut optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        let control = workdir.join(RUN_CONTROL_FILE);
        fs::write(&control, "!run-info; step: 1; design: 0; fmin: 1.0\n").unwrap();

        assert!(optimizer.attach());
        assert_eq!(optimizer.state(), RunState::Running);
        assert_eq!(optimizer.poll_state(), RunState::Running);

        set_mtime(&control, SystemTime::now() - Duration::from_secs(15));
        assert_eq!(optimizer.poll_state(), RunState::Ready);
    }

    #[test]
    fn stopping_goes_ready_once_dead() {
        let workdir = test_workdir("stopping");
        let mut optimizer = Optimizer::new(&ReadinessRegistry::new(), &workdir, &workdir);
        let control = workdir.join(RUN_CONTROL_FILE);
        fs::write(&control, "!run-info; step: 1; design: 0; fmin: 1.0\n").unwrap();

        assert!(optimizer.attach());
        optimizer.request_stop().unwrap();
        assert_eq!(optimizer.state(), RunState::Stopping);

        // Stop file is fresh, run still counts as alive.
        assert_eq!(optimizer.poll_state(), RunState::Stopping);

        set_mtime(&control, SystemTime::now() - Duration::from_secs(15));
        assert_eq!(optimizer.poll_state(), RunState::Ready);
    }
}
