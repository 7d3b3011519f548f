//! af-exec: proxies for the external Xoptfoil2 and Worker executables.
//!
//! All coordination with the external programs is through OS processes and
//! shared files: a run-control file for progress/liveness/stop and
//! namelist-format input files. Nothing in here blocks longer than a
//! version probe; optimizations and polar generation always run
//! asynchronously and are observed by polling.

pub mod namelist;
pub mod optimizer;
pub mod program;
pub mod registry;
pub mod worker;

pub use namelist::{Namelist, NamelistValue};
pub use optimizer::{
    is_younger_than, Optimizer, RunProgress, RunState, RUN_CONTROL_FILE, STILL_ALIVE_SECONDS,
};
pub use program::{ExternalProgram, ProgramSpec, RunOutput};
pub use registry::{Readiness, ReadinessRegistry};
pub use worker::{
    existing_polar_file, expected_polar_files, polar_dir, polar_file_name, FlapSpec, OpMode,
    OpRange, PolarRequest, PolarSpec, PolarType, Worker,
};

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} is not ready: {message}")]
    NotReady { program: String, message: String },

    #[error("{program} could not be started: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("{program} failed (exit code {code}): {text}")]
    RunFailed {
        program: String,
        code: i32,
        text: String,
    },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },
}
