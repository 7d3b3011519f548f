use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use af_app::{
    AppError, AppResult, OptimizerRun, PolarQueue, PolarTask, TaskState, WatchEvent, Watcher,
    WatcherConfig,
};
use af_exec::{
    FlapSpec, OpMode, OpRange, Optimizer, PolarRequest, PolarType, ReadinessRegistry, RunState,
    Worker,
};
use af_results::OptimizationResults;

#[derive(Parser)]
#[command(name = "af-cli")]
#[command(about = "foilflow CLI - drive Xoptfoil2 airfoil optimizations and Worker polars", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the Xoptfoil2 and Worker executables are available
    Check {
        /// Base directory searched for the executables (default: cwd)
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },
    /// Run an optimization and follow its progress
    Optimize {
        /// Seed airfoil file (.dat)
        seed_airfoil: PathBuf,
        /// Optimizer input file (namelist format)
        input_file: PathBuf,
        /// Output name (default: seed airfoil stem)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Follow an optimization started by another process
    Watch {
        /// Output name of the running optimization
        output: String,
        /// Working directory of the run (default: cwd)
        dir: Option<PathBuf>,
    },
    /// Request graceful stop of a running optimization
    Stop {
        /// Working directory of the run (default: cwd)
        dir: Option<PathBuf>,
    },
    /// Show the current results of an optimization
    Status {
        /// Output name of the optimization
        output: String,
        /// Working directory of the run (default: cwd)
        dir: Option<PathBuf>,
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate polars for an airfoil with the Worker
    Polar {
        /// Airfoil file (.dat)
        airfoil: PathBuf,
        /// Reynolds numbers, one polar each
        #[arg(long, required = true, num_args = 1..)]
        re: Vec<f64>,
        /// Mach numbers, paired with --re (single value broadcast)
        #[arg(long, num_args = 1.., default_values_t = [0.0])]
        mach: Vec<f64>,
        /// Polar type (1 = fixed speed, 2 = fixed lift)
        #[arg(long, default_value_t = 1)]
        polar_type: u8,
        /// xfoil ncrit transition parameter
        #[arg(long, default_value_t = 7.0)]
        ncrit: f64,
        /// Alpha sweep as start:end:step (default: auto range)
        #[arg(long)]
        alpha: Option<String>,
        /// Flap angles in degrees (requires --x-hinge)
        #[arg(long, num_args = 1..)]
        flap: Option<Vec<f64>>,
        /// Flap hinge x/c position
        #[arg(long, default_value_t = 0.75)]
        x_hinge: f64,
        /// Flap hinge y/t position
        #[arg(long, default_value_t = 0.0)]
        y_hinge: f64,
    },
}

fn main() -> AppResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { base_dir } => cmd_check(base_dir.as_deref()),
        Commands::Optimize {
            seed_airfoil,
            input_file,
            output,
        } => cmd_optimize(&seed_airfoil, &input_file, output.as_deref()),
        Commands::Watch { output, dir } => cmd_watch(&output, dir.as_deref()),
        Commands::Stop { dir } => cmd_stop(dir.as_deref()),
        Commands::Status { output, dir, json } => cmd_status(&output, dir.as_deref(), json),
        Commands::Polar {
            airfoil,
            re,
            mach,
            polar_type,
            ncrit,
            alpha,
            flap,
            x_hinge,
            y_hinge,
        } => cmd_polar(
            &airfoil, &re, &mach, polar_type, ncrit, alpha.as_deref(), flap, x_hinge, y_hinge,
        ),
    }
}

fn working_dir(dir: Option<&Path>) -> PathBuf {
    dir.map(|d| d.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn cmd_check(base_dir: Option<&Path>) -> AppResult<()> {
    let base = working_dir(base_dir);
    let registry = ReadinessRegistry::new();

    let optimizer = Optimizer::new(&registry, &base, &base);
    let worker = Worker::new(&registry, &base, &base);

    for (name, ready, message) in [
        ("Xoptfoil2", optimizer.is_ready(), optimizer.ready_message()),
        ("Worker", worker.is_ready(), worker.ready_message()),
    ] {
        if ready {
            println!("✓ {}", message);
        } else {
            println!("✗ {}: {}", name, message);
        }
    }
    Ok(())
}

fn cmd_optimize(seed_airfoil: &Path, input_file: &Path, output: Option<&str>) -> AppResult<()> {
    let output_name = match output {
        Some(name) => name.to_string(),
        None => seed_airfoil
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("airfoil")
            .to_string(),
    };
    let workdir = working_dir(seed_airfoil.parent().filter(|p| !p.as_os_str().is_empty()));

    let registry = ReadinessRegistry::new();
    let mut run = OptimizerRun::new(&registry, &workdir, &workdir, &output_name)?;
    if !run.is_ready() {
        return Err(AppError::Exec(run.ready_message().to_string()));
    }

    // The optimizer runs with the airfoil's directory as its cwd, so hand
    // it absolute paths.
    let input_file = input_file
        .canonicalize()
        .unwrap_or_else(|_| input_file.to_path_buf());
    let seed_airfoil = seed_airfoil
        .canonicalize()
        .unwrap_or_else(|_| seed_airfoil.to_path_buf());

    println!("Optimizing {} -> {}", seed_airfoil.display(), output_name);
    run.start(&input_file, &seed_airfoil)?;

    follow_run(run)
}

fn cmd_watch(output: &str, dir: Option<&Path>) -> AppResult<()> {
    let workdir = working_dir(dir);
    let registry = ReadinessRegistry::new();
    let mut run = OptimizerRun::new(&registry, &workdir, &workdir, output)?;

    if !run.attach() {
        println!("No running optimization found in {}", workdir.display());
        return Ok(());
    }
    println!("Watching optimization '{}' in {}", output, workdir.display());

    follow_run(run)
}

/// Subscribe to the polling coordinator until the run leaves the active
/// states, rendering progress in place.
fn follow_run(run: OptimizerRun) -> AppResult<()> {
    let run = Arc::new(Mutex::new(run));
    let polars = Arc::new(Mutex::new(PolarQueue::new()));
    let watcher = Watcher::spawn(Arc::clone(&run), polars, WatcherConfig::default());

    let started = Instant::now();
    let mut last_emit = Instant::now();
    let outcome = loop {
        let event = match watcher.events.recv() {
            Ok(event) => event,
            Err(_) => break RunState::Ready,
        };
        match event {
            WatchEvent::NewState(RunState::Ready) => break RunState::Ready,
            WatchEvent::NewState(RunState::RunError) => break RunState::RunError,
            WatchEvent::NewState(_) => {}
            WatchEvent::NewDesign(_) | WatchEvent::NewStep(_) | WatchEvent::StillRunning => {
                if last_emit.elapsed().as_millis() >= 100 {
                    let mut run = run.lock().unwrap_or_else(|e| e.into_inner());
                    render_run_progress(&mut run, started);
                    last_emit = Instant::now();
                }
            }
            WatchEvent::NewPolars => {}
        }
    };
    watcher.interrupt();
    clear_progress_line();

    let mut run = run.lock().unwrap_or_else(|e| e.into_inner());
    match outcome {
        RunState::RunError => {
            let text = run.error_text().unwrap_or("unknown error").to_string();
            run.reset();
            Err(AppError::RunFailed(text))
        }
        _ => {
            let results = run.results();
            if results.is_finished() {
                println!("✓ Optimization finished");
            } else {
                println!("✓ Optimization ended");
            }
            println!("  Steps: {}", results.n_steps()?);
            println!("  Designs: {}", results.n_designs()?);
            println!(
                "  Improvement: {:.2} %",
                results.improvement()? * 100.0
            );
            if let Some(elapsed) = results.elapsed() {
                println!("  Elapsed: {}", elapsed);
            }
            Ok(())
        }
    }
}

fn render_run_progress(run: &mut OptimizerRun, started: Instant) {
    let progress = run.progress();
    let elapsed = started.elapsed().as_secs_f64();
    let spinner = ['|', '/', '-', '\\'];
    let spin_idx = ((elapsed * 10.0) as usize) % spinner.len();
    print!(
        "\r{} step={}  designs={}  objective={:.6}  elapsed={:.1}s",
        spinner[spin_idx], progress.steps, progress.designs, progress.objective, elapsed
    );
    let _ = io::stdout().flush();
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(120));
    let _ = io::stdout().flush();
}

fn cmd_stop(dir: Option<&Path>) -> AppResult<()> {
    let workdir = working_dir(dir);
    if !workdir.join(af_exec::RUN_CONTROL_FILE).exists() {
        println!("No running optimization found in {}", workdir.display());
        return Ok(());
    }
    let registry = ReadinessRegistry::new();
    let mut optimizer = Optimizer::new(&registry, &workdir, &workdir);
    optimizer.request_stop()?;
    println!("✓ Stop requested in {}", workdir.display());
    Ok(())
}

fn cmd_status(output: &str, dir: Option<&Path>, json: bool) -> AppResult<()> {
    let workdir = working_dir(dir);
    let mut results = OptimizationResults::new(&workdir, output)?;

    let n_steps = results.n_steps()?;
    let n_designs = results.n_designs()?;
    let improvement = results.improvement()?;
    let finished = results.is_finished();
    let elapsed = results.elapsed();

    if json {
        let summary = serde_json::json!({
            "output": output,
            "started": results.has_started(),
            "finished": finished,
            "steps": n_steps,
            "designs": n_designs,
            "improvement": improvement,
            "elapsed": elapsed,
        });
        println!("{:#}", summary);
        return Ok(());
    }

    if !results.has_started() {
        println!("No results for '{}' in {}", output, workdir.display());
        return Ok(());
    }
    println!("Optimization '{}':", output);
    println!("  Steps: {}", n_steps);
    println!("  Designs: {}", n_designs);
    println!("  Improvement: {:.2} %", improvement * 100.0);
    println!("  Finished: {}", if finished { "yes" } else { "no" });
    if let Some(elapsed) = elapsed {
        println!("  Elapsed: {}", elapsed);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_polar(
    airfoil: &Path,
    re: &[f64],
    mach: &[f64],
    polar_type: u8,
    ncrit: f64,
    alpha: Option<&str>,
    flap: Option<Vec<f64>>,
    x_hinge: f64,
    y_hinge: f64,
) -> AppResult<()> {
    let polar_type = match polar_type {
        1 => PolarType::T1,
        2 => PolarType::T2,
        other => {
            return Err(AppError::InvalidInput(format!(
                "polar type must be 1 or 2, got {}",
                other
            )))
        }
    };
    let range = match alpha {
        None => OpRange::Auto,
        Some(text) => parse_sweep(text)?,
    };
    let request = PolarRequest {
        polar_type,
        reynolds: re.to_vec(),
        machs: mach.to_vec(),
        ncrit,
        range,
    };
    let flap = flap.map(|angles| FlapSpec {
        x_hinge,
        y_hinge,
        angles,
    });

    let workdir = working_dir(airfoil.parent().filter(|p| !p.as_os_str().is_empty()));
    let registry = ReadinessRegistry::new();
    let worker = Worker::new(&registry, &workdir, &workdir);
    if !worker.is_ready() {
        return Err(AppError::Exec(worker.ready_message().to_string()));
    }

    println!(
        "Generating {} polar(s) for {}",
        re.len() * flap.as_ref().map(|f| f.angles.len()).unwrap_or(1),
        airfoil.display()
    );

    // Synchronous front end over the asynchronous task: poll until settled.
    let mut queue = PolarQueue::new();
    queue.push(PolarTask::start(worker, airfoil, &request, flap.as_ref())?);
    while !queue.is_idle() {
        queue.poll();
        std::thread::sleep(std::time::Duration::from_millis(500));
    }

    for task in queue.drain_settled() {
        match task.state() {
            TaskState::Failed { error } => return Err(AppError::RunFailed(error.clone())),
            _ => {
                println!("✓ Polar generation completed");
                for (path, polar) in task.polars() {
                    println!("  {} ({} points)", path.display(), polar.points.len());
                }
            }
        }
    }
    Ok(())
}

/// Parse a `start:end:step` sweep specification.
fn parse_sweep(text: &str) -> AppResult<OpRange> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return Err(AppError::InvalidInput(format!(
            "sweep must be start:end:step, got '{}'",
            text
        )));
    }
    let parse = |part: &str| {
        part.trim()
            .parse::<f64>()
            .map_err(|_| AppError::InvalidInput(format!("'{}' is not a number", part)))
    };
    Ok(OpRange::Spec {
        mode: OpMode::SpecAlpha,
        start: parse(parts[0])?,
        end: parse(parts[1])?,
        step: parse(parts[2])?,
    })
}
