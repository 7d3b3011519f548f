//! Executable discovery and readiness checks.
//!
//! Locating an external program and probing its version costs a directory
//! walk plus a subprocess launch, so the outcome is memoized per program
//! stem and shared by every proxy handle created afterwards. The registry
//! is an explicit value (injected into `Worker`/`Optimizer` constructors)
//! so tests can build a fresh one or `reset()` a stem between cases.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use af_core::ProgramVersion;
use tracing::debug;

use crate::program::ProgramSpec;

/// Outcome of a one-time executable probe.
#[derive(Clone, Debug)]
pub struct Readiness {
    pub ready: bool,
    /// Human-readable status: version found, or why the program is unusable.
    pub message: String,
    /// Directory the executable was found in (empty readiness -> `None`).
    pub exe_dir: Option<PathBuf>,
    /// Version string reported by the executable, if it ran.
    pub version: Option<String>,
}

impl Readiness {
    fn not_ready(message: String) -> Self {
        Self {
            ready: false,
            message,
            exe_dir: None,
            version: None,
        }
    }
}

/// Shared, lazily populated readiness state for all external programs.
#[derive(Clone, Default)]
pub struct ReadinessRegistry {
    inner: Arc<Mutex<HashMap<String, Readiness>>>,
}

impl ReadinessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe `spec` once and memoize the outcome. Subsequent calls for the
    /// same stem return the cached result without touching the filesystem.
    pub fn ensure_ready(&self, spec: &ProgramSpec, base_dir: &Path) -> Readiness {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = inner.get(&spec.exe_stem) {
            return cached.clone();
        }
        let readiness = probe(spec, base_dir);
        debug!(
            program = %spec.display_name,
            ready = readiness.ready,
            message = %readiness.message,
            "executable probe"
        );
        inner.insert(spec.exe_stem.clone(), readiness.clone());
        readiness
    }

    /// Cached readiness for a stem, if a probe already ran.
    pub fn get(&self, exe_stem: &str) -> Option<Readiness> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(exe_stem)
            .cloned()
    }

    /// Forget the cached probe for one stem (next `ensure_ready` re-probes).
    pub fn reset(&self, exe_stem: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(exe_stem);
    }

    /// Forget every cached probe.
    pub fn reset_all(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Locate the executable and verify it reports an acceptable version.
fn probe(spec: &ProgramSpec, base_dir: &Path) -> Readiness {
    let exe_dir = match find_exe_dir(spec, base_dir) {
        Some(dir) => dir,
        None => {
            let mut searched: Vec<String> = spec
                .search_subdirs
                .iter()
                .map(|sub| base_dir.join(sub).display().to_string())
                .collect();
            searched.push("PATH".to_string());
            return Readiness::not_ready(format!(
                "{} executable '{}' not found in {}",
                spec.display_name,
                spec.exe_stem,
                searched.join(", ")
            ));
        }
    };

    let exe_path = exe_dir.join(exe_file_name(&spec.exe_stem));
    let output = match std::process::Command::new(&exe_path)
        .arg(spec.help_flag)
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            return Readiness::not_ready(format!(
                "{} at {} cannot be run: {}",
                spec.display_name,
                exe_path.display(),
                e
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version_text = match parse_version_line(stdout.lines(), &spec.display_name) {
        Some(text) => text,
        None => {
            return Readiness::not_ready(format!(
                "{} did not report a version on '{}'",
                spec.display_name, spec.help_flag
            ));
        }
    };

    let version = match ProgramVersion::parse(&version_text) {
        Ok(v) => v,
        Err(_) => {
            return Readiness::not_ready(format!(
                "{} reported an unreadable version '{}'",
                spec.display_name, version_text
            ));
        }
    };
    let minimum = match ProgramVersion::parse(spec.min_version) {
        Ok(v) => v,
        Err(_) => {
            return Readiness::not_ready(format!(
                "required minimum version '{}' is malformed",
                spec.min_version
            ));
        }
    };

    if !version.meets_minimum(&minimum) {
        return Readiness::not_ready(format!(
            "{} version {} is too old, version {} or newer is required",
            spec.display_name, version, minimum
        ));
    }

    Readiness {
        ready: true,
        message: format!("{} {} at {}", spec.display_name, version, exe_dir.display()),
        exe_dir: Some(exe_dir),
        version: Some(version.to_string()),
    }
}

/// Search the conventional subdirectories below `base_dir` first, then the
/// OS search path.
fn find_exe_dir(spec: &ProgramSpec, base_dir: &Path) -> Option<PathBuf> {
    let file_name = exe_file_name(&spec.exe_stem);
    for sub in &spec.search_subdirs {
        let dir = base_dir.join(sub);
        if dir.join(&file_name).is_file() {
            return Some(dir);
        }
    }
    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            if dir.join(&file_name).is_file() {
                return Some(dir);
            }
        }
    }
    None
}

fn exe_file_name(stem: &str) -> String {
    format!("{}{}", stem, env::consts::EXE_SUFFIX)
}

/// Scan help output for a line whose first token equals the program name;
/// the trailing token of that line is the version string.
pub(crate) fn parse_version_line<'a, I>(lines: I, display_name: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    for line in lines {
        let mut tokens = line.split_whitespace();
        if tokens.next() == Some(display_name) {
            if let Some(last) = line.split_whitespace().last() {
                if last != display_name {
                    return Some(last.to_string());
                }
            }
        }
    }
    None
}
