//! Driver for the Worker companion tool (polar generation and airfoil
//! utility actions).
//!
//! The Worker is invoked with `-w <action>`; polar generation reads its
//! options from a generated namelist input and writes one xfoil-style polar
//! file per (Reynolds, Mach) pair into a `<airfoil>_polars` directory next
//! to the airfoil.
//!
//! Polar file-naming contract (shared with the external Worker program and
//! matched bit-for-bit by re-rendering the request through the same
//! formats):
//!
//! ```text
//! T{1|2}_Re{re/1e6:.3}_M{mach:.2}_N{ncrit:.1}.txt
//! T{1|2}_Re{re/1e6:.3}_M{mach:.2}_N{ncrit:.1}_F{deg:.1}_XH{x:.2}_YH{y:.2}.txt
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::namelist::{self, Namelist, NamelistValue};
use crate::program::{ExternalProgram, ProgramSpec};
use crate::registry::ReadinessRegistry;
use crate::{ExecError, ExecResult};

const WORKER_MIN_VERSION: &str = "1.0.3";

/// Polar type: T1 = fixed speed (constant Re), T2 = fixed lift (constant
/// Re*sqrt(cl)).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolarType {
    T1,
    T2,
}

impl PolarType {
    pub fn as_number(self) -> i64 {
        match self {
            PolarType::T1 => 1,
            PolarType::T2 => 2,
        }
    }
}

/// Operating variable the range is specified over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpMode {
    /// Angle of attack sweep.
    SpecAlpha,
    /// Lift-coefficient sweep.
    SpecCl,
}

impl OpMode {
    fn namelist_value(self) -> &'static str {
        match self {
            OpMode::SpecAlpha => "spec-al",
            OpMode::SpecCl => "spec-cl",
        }
    }
}

/// Requested operating-point range of a polar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpRange {
    /// Let the Worker pick start/end around the polar's useful region.
    Auto,
    Spec {
        mode: OpMode,
        start: f64,
        end: f64,
        step: f64,
    },
}

/// One concrete polar: a (Reynolds, Mach, ncrit, type) combination.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolarSpec {
    pub re: f64,
    pub mach: f64,
    pub ncrit: f64,
    pub polar_type: PolarType,
}

/// Optional flap deflection(s) applied during polar generation.
#[derive(Clone, Debug, PartialEq)]
pub struct FlapSpec {
    pub x_hinge: f64,
    pub y_hinge: f64,
    pub angles: Vec<f64>,
}

/// Everything one `generate_polar` invocation asks the Worker for.
#[derive(Clone, Debug)]
pub struct PolarRequest {
    pub polar_type: PolarType,
    /// One polar per entry.
    pub reynolds: Vec<f64>,
    /// Paired with `reynolds` by index; a single entry is broadcast.
    pub machs: Vec<f64>,
    pub ncrit: f64,
    pub range: OpRange,
}

impl PolarRequest {
    /// Expand to the concrete polars the Worker will produce.
    pub fn expand(&self) -> Vec<PolarSpec> {
        self.reynolds
            .iter()
            .enumerate()
            .map(|(i, &re)| PolarSpec {
                re,
                mach: self
                    .machs
                    .get(i)
                    .or_else(|| self.machs.first())
                    .copied()
                    .unwrap_or(0.0),
                ncrit: self.ncrit,
                polar_type: self.polar_type,
            })
            .collect()
    }
}

/// Proxy specialization for the Worker executable.
pub struct Worker {
    program: ExternalProgram,
}

impl Worker {
    pub fn spec() -> ProgramSpec {
        ProgramSpec {
            display_name: "Worker".to_string(),
            exe_stem: "worker".to_string(),
            help_flag: "-h",
            search_subdirs: vec![
                "xoptfoil2".to_string(),
                "assets/xoptfoil2".to_string(),
                "bin".to_string(),
            ],
            min_version: WORKER_MIN_VERSION,
        }
    }

    pub fn new(registry: &ReadinessRegistry, base_dir: &Path, workdir: &Path) -> Self {
        Self {
            program: ExternalProgram::new(Self::spec(), registry, base_dir, workdir),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_ready()
    }

    pub fn ready_message(&self) -> &str {
        self.program.ready_message()
    }

    pub fn is_running(&mut self) -> bool {
        self.program.is_running()
    }

    pub fn finished_returncode(&self) -> Option<i32> {
        self.program.finished_returncode()
    }

    pub fn finished_errortext(&self) -> Option<String> {
        self.program.finished_errortext()
    }

    pub fn finalize(&mut self) {
        self.program.finalize();
    }

    fn ensure_ready(&self) -> ExecResult<()> {
        if self.program.is_ready() {
            Ok(())
        } else {
            Err(ExecError::NotReady {
                program: self.program.display_name().to_string(),
                message: self.program.ready_message().to_string(),
            })
        }
    }

    /// Generate polars for `airfoil`. Synchronous invocations raise on a
    /// nonzero exit; asynchronous ones return immediately after the spawn
    /// and are observed via `is_running()` and the produced files.
    pub fn generate_polar(
        &mut self,
        airfoil: &Path,
        request: &PolarRequest,
        flap: Option<&FlapSpec>,
        run_async: bool,
    ) -> ExecResult<()> {
        self.ensure_ready()?;
        if request.reynolds.is_empty() {
            return Err(ExecError::InvalidArg {
                what: "at least one Reynolds number is required",
            });
        }

        let groups = polar_input_groups(request, flap);
        let stem = file_stem(airfoil);
        let input = namelist::write_temp_input(self.program.workdir(), &stem, &groups)?;
        self.program.set_temp_input(input.clone());

        let args = worker_args("polar", airfoil, Some(&input));
        debug!(airfoil = %airfoil.display(), n_polars = request.reynolds.len(), "generate polars");
        if run_async {
            let code = self.program.run_async(&args, true)?;
            if code != 0 {
                return Err(ExecError::SpawnFailed {
                    program: "Worker".to_string(),
                    message: self
                        .program
                        .finished_errortext()
                        .unwrap_or_else(|| "spawn failed".to_string()),
                });
            }
            Ok(())
        } else {
            let code = self.program.run_sync(&args, true)?;
            self.raise_on_failure(code)
        }
    }

    /// Apply a flap deflection to an airfoil, producing a new airfoil file
    /// (`-w flap`). Always synchronous; raises on failure.
    pub fn set_flap(
        &mut self,
        airfoil: &Path,
        x_hinge: f64,
        y_hinge: f64,
        angle: f64,
        output_name: &str,
    ) -> ExecResult<PathBuf> {
        self.ensure_ready()?;

        let mut group = Namelist::new("operating_conditions");
        group
            .set("x_flap", NamelistValue::Float(x_hinge))
            .set("y_flap", NamelistValue::Float(y_hinge))
            .set("flap_angle", NamelistValue::FloatList(vec![angle]));
        let stem = file_stem(airfoil);
        let input = namelist::write_temp_input(self.program.workdir(), &stem, &[group])?;
        self.program.set_temp_input(input.clone());

        let mut args = worker_args("flap", airfoil, Some(&input));
        args.push("-o".to_string());
        args.push(output_name.to_string());
        let code = self.program.run_sync(&args, true)?;
        self.raise_on_failure(code)?;

        Ok(self.program.workdir().join(format!("{}.dat", output_name)))
    }

    /// Ask the Worker to validate an optimizer input file (`-w check-input`).
    pub fn check_input(&mut self, input_file: &Path) -> ExecResult<()> {
        self.ensure_ready()?;
        let mut args = vec!["-w".to_string(), "check-input".to_string()];
        args.push("-i".to_string());
        args.push(input_file.display().to_string());
        args.push("-m".to_string());
        args.push("child".to_string());
        let code = self.program.run_sync(&args, true)?;
        self.raise_on_failure(code)
    }

    fn raise_on_failure(&self, code: i32) -> ExecResult<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(ExecError::RunFailed {
                program: "Worker".to_string(),
                code,
                text: self
                    .program
                    .finished_errortext()
                    .unwrap_or_else(|| "no error output".to_string()),
            })
        }
    }
}

fn worker_args(action: &str, airfoil: &Path, input: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-w".to_string(),
        action.to_string(),
        "-a".to_string(),
        airfoil.display().to_string(),
    ];
    if let Some(input) = input {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.push("-m".to_string());
    args.push("child".to_string());
    args
}

fn polar_input_groups(request: &PolarRequest, flap: Option<&FlapSpec>) -> Vec<Namelist> {
    let mut polar = Namelist::new("polar_generation");
    polar
        .set(
            "type_of_polar",
            NamelistValue::Int(request.polar_type.as_number()),
        )
        .set(
            "polar_reynolds",
            NamelistValue::FloatList(request.reynolds.clone()),
        )
        .set("polar_mach", NamelistValue::FloatList(request.machs.clone()));
    match request.range {
        OpRange::Auto => {
            polar.set("auto_range", NamelistValue::Bool(true));
        }
        OpRange::Spec {
            mode,
            start,
            end,
            step,
        } => {
            polar
                .set("op_mode", NamelistValue::Str(mode.namelist_value().to_string()))
                .set("op_start", NamelistValue::Float(start))
                .set("op_end", NamelistValue::Float(end))
                .set("op_step", NamelistValue::Float(step));
        }
    }

    let mut xfoil = Namelist::new("xfoil_run_options");
    xfoil.set("ncrit", NamelistValue::Float(request.ncrit));

    let mut groups = vec![polar, xfoil];
    if let Some(flap) = flap {
        let mut conditions = Namelist::new("operating_conditions");
        conditions
            .set("x_flap", NamelistValue::Float(flap.x_hinge))
            .set("y_flap", NamelistValue::Float(flap.y_hinge))
            .set("flap_angle", NamelistValue::FloatList(flap.angles.clone()));
        groups.push(conditions);
    }
    groups
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("airfoil")
        .to_string()
}

/// Directory the Worker drops polar files into, next to the airfoil.
pub fn polar_dir(airfoil: &Path) -> PathBuf {
    let stem = file_stem(airfoil);
    match airfoil.parent() {
        Some(parent) => parent.join(format!("{}_polars", stem)),
        None => PathBuf::from(format!("{}_polars", stem)),
    }
}

/// Render the contract file name for one polar.
pub fn polar_file_name(spec: &PolarSpec, flap: Option<(f64, f64, f64)>) -> String {
    let mut name = format!(
        "T{}_Re{:.3}_M{:.2}_N{:.1}",
        spec.polar_type.as_number(),
        spec.re / 1.0e6,
        spec.mach,
        spec.ncrit
    );
    if let Some((angle, x_hinge, y_hinge)) = flap {
        name.push_str(&format!(
            "_F{:.1}_XH{:.2}_YH{:.2}",
            angle, x_hinge, y_hinge
        ));
    }
    name.push_str(".txt");
    name
}

/// All polar files one request will produce, in Reynolds-then-flap order.
pub fn expected_polar_files(
    airfoil: &Path,
    request: &PolarRequest,
    flap: Option<&FlapSpec>,
) -> Vec<PathBuf> {
    let dir = polar_dir(airfoil);
    let mut files = Vec::new();
    for spec in request.expand() {
        match flap {
            None => files.push(dir.join(polar_file_name(&spec, None))),
            Some(flap) => {
                for &angle in &flap.angles {
                    files.push(dir.join(polar_file_name(
                        &spec,
                        Some((angle, flap.x_hinge, flap.y_hinge)),
                    )));
                }
            }
        }
    }
    files
}

/// Scan the airfoil's polar directory for a file whose name tokens match
/// the requested polar, returning the first match. Matching re-renders the
/// request with the naming contract's formats, so equality is exact.
pub fn existing_polar_file(
    airfoil: &Path,
    spec: &PolarSpec,
    flap: Option<(f64, f64, f64)>,
) -> Option<PathBuf> {
    let dir = polar_dir(airfoil);
    let wanted = polar_file_name(spec, flap);
    let entries = fs::read_dir(&dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_str() == Some(wanted.as_str()) && entry.path().is_file() {
            return Some(entry.path());
        }
    }
    None
}
