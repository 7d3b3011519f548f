//! Generic handle for invoking one external executable.
//!
//! A handle may be reused across runs, but an active run owns ephemeral
//! state (the spawned child, captured output, a temp input file) that is
//! discarded by `finalize()`. Long-running work always goes through
//! `run_async` and is observed by polling; `run_sync` is reserved for
//! short probe-style calls.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::registry::{Readiness, ReadinessRegistry};
use crate::{ExecError, ExecResult};

/// Static description of one external program.
#[derive(Clone, Debug)]
pub struct ProgramSpec {
    /// Name the program prints about itself ("Xoptfoil2", "Worker").
    pub display_name: String,
    /// Executable file stem (platform suffix appended when searching).
    pub exe_stem: String,
    /// Argument that makes the program print its help/version banner.
    pub help_flag: &'static str,
    /// Conventional subdirectories probed below the base dir, before PATH.
    pub search_subdirs: Vec<String>,
    /// Minimum acceptable version (dot-separated).
    pub min_version: &'static str,
}

/// Captured state of a finished run.
#[derive(Clone, Debug, Default)]
pub struct RunOutput {
    pub returncode: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl RunOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            returncode: output.status.code().unwrap_or(-1),
            stdout: to_lines(&output.stdout),
            stderr: to_lines(&output.stderr),
        }
    }

    /// Error text of a failed run: the remainder of the first line holding
    /// `"Error: "` (stderr scanned before stdout), else the first stderr
    /// line.
    pub fn errortext(&self) -> Option<String> {
        const MARKER: &str = "Error: ";
        for line in self.stderr.iter().chain(self.stdout.iter()) {
            if let Some(pos) = line.find(MARKER) {
                return Some(line[pos + MARKER.len()..].trim().to_string());
            }
        }
        self.stderr.first().map(|l| l.trim().to_string())
    }
}

fn to_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|l| l.to_string())
        .collect()
}

/// Proxy for one external executable in one working directory.
pub struct ExternalProgram {
    spec: ProgramSpec,
    readiness: Readiness,
    workdir: PathBuf,
    child: Option<Child>,
    finished: Option<RunOutput>,
    temp_input: Option<PathBuf>,
}

impl ExternalProgram {
    /// Create a handle. Never fails: a missing or outdated executable is a
    /// degraded state reported by `is_ready()`, not an error, so the caller
    /// stays usable without the program installed.
    pub fn new(
        spec: ProgramSpec,
        registry: &ReadinessRegistry,
        base_dir: &Path,
        workdir: &Path,
    ) -> Self {
        let readiness = registry.ensure_ready(&spec, base_dir);
        Self {
            spec,
            readiness,
            workdir: workdir.to_path_buf(),
            child: None,
            finished: None,
            temp_input: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.ready
    }

    /// Human-readable readiness status (version found, or what is wrong).
    pub fn ready_message(&self) -> &str {
        &self.readiness.message
    }

    pub fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn exe_path(&self) -> ExecResult<PathBuf> {
        let dir = self
            .readiness
            .exe_dir
            .as_ref()
            .ok_or_else(|| ExecError::NotReady {
                program: self.spec.display_name.clone(),
                message: self.readiness.message.clone(),
            })?;
        Ok(dir.join(format!(
            "{}{}",
            self.spec.exe_stem,
            std::env::consts::EXE_SUFFIX
        )))
    }

    /// Run to completion in the configured working directory, returning the
    /// OS exit code. A failure to launch is reported as a nonzero code with
    /// the cause stored as error output, not as an `Err`.
    pub fn run_sync(&mut self, args: &[String], capture_output: bool) -> ExecResult<i32> {
        let exe = self.exe_path()?;
        self.finished = None;

        debug!(program = %self.spec.display_name, ?args, "run_sync");
        let mut command = Command::new(&exe);
        command.args(args).current_dir(&self.workdir);

        if capture_output {
            match command.output() {
                Ok(output) => {
                    let run = RunOutput::from_output(output);
                    let code = run.returncode;
                    self.finished = Some(run);
                    Ok(code)
                }
                Err(e) => {
                    self.finished = Some(RunOutput {
                        returncode: 1,
                        stdout: Vec::new(),
                        stderr: vec![e.to_string()],
                    });
                    Ok(1)
                }
            }
        } else {
            match command.status() {
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    self.finished = Some(RunOutput {
                        returncode: code,
                        ..RunOutput::default()
                    });
                    Ok(code)
                }
                Err(e) => {
                    self.finished = Some(RunOutput {
                        returncode: 1,
                        stdout: Vec::new(),
                        stderr: vec![e.to_string()],
                    });
                    Ok(1)
                }
            }
        }
    }

    /// Spawn without blocking. Returns 0 once the spawn itself succeeded;
    /// the real exit code is only known later via `is_running()` and
    /// `finished_returncode()`.
    pub fn run_async(&mut self, args: &[String], capture_output: bool) -> ExecResult<i32> {
        let exe = self.exe_path()?;
        self.finished = None;

        debug!(program = %self.spec.display_name, ?args, "run_async");
        let mut command = Command::new(&exe);
        command.args(args).current_dir(&self.workdir);
        if capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }

        match command.spawn() {
            Ok(child) => {
                self.child = Some(child);
                Ok(0)
            }
            Err(e) => {
                self.finished = Some(RunOutput {
                    returncode: 1,
                    stdout: Vec::new(),
                    stderr: vec![e.to_string()],
                });
                Ok(1)
            }
        }
    }

    /// True if this handle spawned the current run itself (a live child or
    /// a collected exit state). When false, liveness must be inferred from
    /// files the external program writes.
    pub fn owns_process(&self) -> bool {
        self.child.is_some() || self.finished.is_some()
    }

    /// Poll a self-spawned asynchronous run. When the child has exited,
    /// its remaining buffered output is drained, the final exit code is
    /// captured, and the handle is released, so a later call returns false
    /// and the `finished_*` accessors report the captured state.
    pub fn is_running(&mut self) -> bool {
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return false,
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => {
                self.collect_finished();
                false
            }
            Err(e) => {
                warn!(program = %self.spec.display_name, error = %e, "poll failed");
                self.collect_finished();
                false
            }
        }
    }

    fn collect_finished(&mut self) {
        if let Some(child) = self.child.take() {
            match child.wait_with_output() {
                Ok(output) => self.finished = Some(RunOutput::from_output(output)),
                Err(e) => {
                    self.finished = Some(RunOutput {
                        returncode: -1,
                        stdout: Vec::new(),
                        stderr: vec![e.to_string()],
                    });
                }
            }
        }
    }

    /// Exit code of the finished run, if one ended.
    pub fn finished_returncode(&self) -> Option<i32> {
        self.finished.as_ref().map(|f| f.returncode)
    }

    /// Error text of the finished run, if one ended with output.
    pub fn finished_errortext(&self) -> Option<String> {
        self.finished.as_ref().and_then(|f| f.errortext())
    }

    pub fn finished_output(&self) -> Option<&RunOutput> {
        self.finished.as_ref()
    }

    /// Send the OS terminate signal to a self-owned running process and
    /// release the handle.
    pub fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(program = %self.spec.display_name, error = %e, "terminate failed");
            }
            let _ = child.wait();
        }
    }

    /// Remember the temp input file this invocation created, for removal in
    /// `finalize()`.
    pub fn set_temp_input(&mut self, path: PathBuf) {
        self.temp_input = Some(path);
    }

    pub fn temp_input(&self) -> Option<&Path> {
        self.temp_input.as_deref()
    }

    /// Discard per-run state and remove the temp input file. Removal is
    /// retried a few times with short sleeps to ride out a lagging
    /// filesystem or antivirus lock; persistent failure is logged, not
    /// raised, since a leftover temp file is cosmetic.
    pub fn finalize(&mut self) {
        self.finished = None;
        if let Some(path) = self.temp_input.take() {
            remove_with_retries(&path, 3, Duration::from_millis(200));
        }
    }
}

fn remove_with_retries(path: &Path, attempts: u32, delay: Duration) {
    if !path.exists() {
        return;
    }
    for attempt in 0..attempts {
        match std::fs::remove_file(path) {
            Ok(()) => return,
            Err(e) => {
                if attempt + 1 == attempts {
                    warn!(path = %path.display(), error = %e, "could not remove temp file");
                } else {
                    thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errortext_prefers_error_marker() {
        let run = RunOutput {
            returncode: 1,
            stdout: vec!["some banner".to_string(), "Error: in stdout".to_string()],
            stderr: vec![
                "noise first".to_string(),
                "Worker: Error: airfoil file not found".to_string(),
            ],
        };
        assert_eq!(run.errortext().as_deref(), Some("airfoil file not found"));
    }

    #[test]
    fn errortext_falls_back_to_first_stderr_line() {
        let run = RunOutput {
            returncode: 1,
            stdout: vec!["clean stdout".to_string()],
            stderr: vec!["segfault".to_string(), "more".to_string()],
        };
        assert_eq!(run.errortext().as_deref(), Some("segfault"));
    }

    #[test]
    fn errortext_scans_stdout_when_stderr_empty() {
        let run = RunOutput {
            returncode: 1,
            stdout: vec!["Error: bad input".to_string()],
            stderr: vec![],
        };
        assert_eq!(run.errortext().as_deref(), Some("bad input"));
    }

    #[test]
    fn errortext_none_when_no_output() {
        let run = RunOutput {
            returncode: 0,
            stdout: vec![],
            stderr: vec![],
        };
        assert_eq!(run.errortext(), None);
    }
}
