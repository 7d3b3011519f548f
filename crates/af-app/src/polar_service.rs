//! Polar-generation task queue.
//!
//! Several airfoils may be generating polars at once (unrelated
//! concurrent requests). Tasks are processed strictly in creation order
//! and the per-tick scan stops at the first task still incomplete, so
//! completions become visible in request order even when a later Worker
//! happens to finish first.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use af_exec::{expected_polar_files, FlapSpec, PolarRequest, Worker};
use af_results::polar::{file_in_use, load_polar_file};
use af_results::Polar;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::AppResult;

/// Lifecycle of one polar-generation task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskState {
    Generating,
    Completed,
    Failed { error: String },
}

/// Files still unwritten this long after a clean Worker exit are treated
/// as missing for good.
const SETTLE_GRACE: Duration = Duration::from_secs(10);

/// One Worker invocation generating a set of polars for one airfoil.
pub struct PolarTask {
    worker: Worker,
    airfoil: PathBuf,
    expected: Vec<PathBuf>,
    loaded: Vec<(PathBuf, Polar)>,
    state: TaskState,
    created_at: DateTime<Utc>,
    worker_done_since: Option<Instant>,
}

impl PolarTask {
    /// Launch the Worker asynchronously and track its expected output
    /// files.
    pub fn start(
        mut worker: Worker,
        airfoil: &Path,
        request: &PolarRequest,
        flap: Option<&FlapSpec>,
    ) -> AppResult<Self> {
        worker.generate_polar(airfoil, request, flap, true)?;
        let expected = expected_polar_files(airfoil, request, flap);
        Ok(Self {
            worker,
            airfoil: airfoil.to_path_buf(),
            expected,
            loaded: Vec::new(),
            state: TaskState::Generating,
            created_at: Utc::now(),
            worker_done_since: None,
        })
    }

    pub fn airfoil(&self) -> &Path {
        &self.airfoil
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Polars loaded so far, in expected-file order.
    pub fn polars(&self) -> &[(PathBuf, Polar)] {
        &self.loaded
    }

    fn is_settled(&self) -> bool {
        self.state != TaskState::Generating
    }

    /// Load any newly completed polar files. Returns how many were loaded
    /// this call.
    fn load_new_polars(&mut self) -> usize {
        let mut loaded_now = 0;
        for path in &self.expected {
            if self.loaded.iter().any(|(p, _)| p == path) {
                continue;
            }
            if !path.is_file() {
                continue;
            }
            // Half-written files are skipped for this tick and retried.
            if file_in_use(path) {
                debug!(path = %path.display(), "polar file still in use");
                continue;
            }
            match load_polar_file(path) {
                Ok(polar) => {
                    self.loaded.push((path.clone(), polar));
                    loaded_now += 1;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "polar file not readable yet");
                }
            }
        }
        loaded_now
    }

    /// Advance the task one tick. Returns how many polars were loaded.
    fn poll(&mut self) -> usize {
        if self.is_settled() {
            return 0;
        }
        let loaded_now = self.load_new_polars();

        if self.loaded.len() == self.expected.len() {
            // Result set complete: release the temp input right away.
            self.worker.finalize();
            self.state = TaskState::Completed;
            debug!(airfoil = %self.airfoil.display(), "polar task completed");
            return loaded_now;
        }

        if !self.worker.is_running() {
            if let Some(code) = self.worker.finished_returncode() {
                if code != 0 {
                    let error = self
                        .worker
                        .finished_errortext()
                        .unwrap_or_else(|| format!("Worker exit code {}", code));
                    warn!(airfoil = %self.airfoil.display(), error = %error, "polar task failed");
                    self.worker.finalize();
                    self.state = TaskState::Failed { error };
                } else {
                    // Clean exit with files still missing: keep collecting
                    // for a bounded grace, the filesystem may lag the exit.
                    let done_since = *self.worker_done_since.get_or_insert_with(Instant::now);
                    if done_since.elapsed() > SETTLE_GRACE {
                        let missing = self.expected.len() - self.loaded.len();
                        let error = format!("Worker ended but {} polar file(s) never appeared", missing);
                        warn!(airfoil = %self.airfoil.display(), error = %error, "polar task failed");
                        self.worker.finalize();
                        self.state = TaskState::Failed { error };
                    }
                }
            }
        }
        loaded_now
    }
}

/// Creation-ordered registry of active polar-generation tasks.
#[derive(Default)]
pub struct PolarQueue {
    tasks: Vec<PolarTask>,
}

impl PolarQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: PolarTask) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[PolarTask] {
        &self.tasks
    }

    pub fn is_idle(&self) -> bool {
        self.tasks.iter().all(|t| t.is_settled())
    }

    /// One polling tick over the queue: tasks advance in creation order
    /// and the scan stops at the first task still incomplete, preserving
    /// a consistent completion ordering. Returns true if any new polar
    /// data was loaded.
    pub fn poll(&mut self) -> bool {
        let mut any_loaded = false;
        for task in self.tasks.iter_mut() {
            if task.is_settled() {
                continue;
            }
            if task.poll() > 0 {
                any_loaded = true;
            }
            if !task.is_settled() {
                break;
            }
        }
        any_loaded
    }

    /// Drop settled tasks, returning them to the caller.
    pub fn drain_settled(&mut self) -> Vec<PolarTask> {
        let mut settled = Vec::new();
        let mut i = 0;
        while i < self.tasks.len() {
            if self.tasks[i].is_settled() {
                settled.push(self.tasks.remove(i));
            } else {
                i += 1;
            }
        }
        settled
    }
}
