//! Coordinator notifications against a simulated optimizer.
//!
//! The "optimizer" here is the test itself: it writes the control file
//! and result files the way the external program would, and the watcher
//! is expected to translate those file-level changes into ordered
//! notifications.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use af_app::{OptimizerRun, PolarQueue, WatchEvent, Watcher, WatcherConfig};
use af_exec::{ReadinessRegistry, RunState, RUN_CONTROL_FILE};
use af_results::HISTORY_FILE;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "af_app_it_{}_{}_{}",
        tag,
        std::process::id(),
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&dir).expect("create test dir");
    dir
}

fn write_control(dir: &Path, step: usize, design: usize) {
    fs::write(
        dir.join(RUN_CONTROL_FILE),
        format!("!run-info; step: {}; design: {}; fmin: 0.98\n", step, design),
    )
    .expect("write control file");
}

fn age_control(dir: &Path, seconds: u64) {
    let file = fs::File::options()
        .write(true)
        .open(dir.join(RUN_CONTROL_FILE))
        .expect("open control file");
    file.set_modified(SystemTime::now() - Duration::from_secs(seconds))
        .expect("set mtime");
}

/// Wait for the next notification that is not a heartbeat.
fn next_change(watcher: &Watcher) -> WatchEvent {
    let deadline = Duration::from_secs(10);
    loop {
        match watcher.events.recv_timeout(deadline) {
            Ok(WatchEvent::StillRunning) => continue,
            Ok(event) => return event,
            Err(e) => panic!("no notification within {:?}: {}", deadline, e),
        }
    }
}

fn fast_config() -> WatcherConfig {
    WatcherConfig {
        settle: Duration::from_millis(10),
        interval: Duration::from_millis(25),
    }
}

#[test]
fn run_notifications_fire_in_priority_order() {
    let dir = test_dir("events");
    write_control(&dir, 0, 0);

    let registry = ReadinessRegistry::new();
    let mut run = OptimizerRun::new(&registry, &dir, &dir, "opt").unwrap();
    assert!(run.attach());

    let run = Arc::new(Mutex::new(run));
    let polars = Arc::new(Mutex::new(PolarQueue::new()));
    let watcher = Watcher::spawn(Arc::clone(&run), polars, fast_config());

    // First tick syncs the subscriber to the running state.
    assert_eq!(next_change(&watcher), WatchEvent::NewState(RunState::Running));

    // A step without a design.
    write_control(&dir, 1, 0);
    assert_eq!(next_change(&watcher), WatchEvent::NewStep(1));

    // A step that also produced a design: only the design notification
    // fires.
    write_control(&dir, 2, 1);
    assert_eq!(next_change(&watcher), WatchEvent::NewDesign(1));

    // Heartbeats while nothing changes.
    match watcher.events.recv_timeout(Duration::from_secs(10)) {
        Ok(WatchEvent::StillRunning) => {}
        other => panic!("expected heartbeat, got {:?}", other),
    }

    // Control file goes stale: the run is gone.
    age_control(&dir, 15);
    assert_eq!(next_change(&watcher), WatchEvent::NewState(RunState::Ready));

    watcher.interrupt();
}

#[test]
fn change_marks_results_dirty_so_readers_refresh() {
    let dir = test_dir("dirty");
    let results_dir = dir.join("opt_temp");
    fs::create_dir_all(&results_dir).unwrap();
    fs::write(
        results_dir.join(HISTORY_FILE),
        "Iter; Design; Objective; %Improve; Design-radius\n0; ; 1.0; 0.0; 0.146\n",
    )
    .unwrap();
    write_control(&dir, 0, 0);

    let registry = ReadinessRegistry::new();
    let mut run = OptimizerRun::new(&registry, &dir, &dir, "opt").unwrap();
    assert!(run.attach());
    assert_eq!(run.results().n_steps().unwrap(), 0);

    let run = Arc::new(Mutex::new(run));
    let polars = Arc::new(Mutex::new(PolarQueue::new()));
    let watcher = Watcher::spawn(Arc::clone(&run), polars, fast_config());
    assert_eq!(next_change(&watcher), WatchEvent::NewState(RunState::Running));

    // The optimizer finishes a step and appends to the history file.
    fs::write(
        results_dir.join(HISTORY_FILE),
        "Iter; Design; Objective; %Improve; Design-radius\n\
         0; ; 1.0; 0.0; 0.146\n\
         1; 1; 0.973; 2.71; 0.143\n",
    )
    .unwrap();
    let file = fs::File::options()
        .write(true)
        .open(results_dir.join(HISTORY_FILE))
        .unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(2))
        .unwrap();
    write_control(&dir, 2, 1);

    assert_eq!(next_change(&watcher), WatchEvent::NewDesign(1));

    // The notification marked the aggregator dirty: the next access sees
    // the appended history without an explicit re-read call.
    let mut run = run.lock().unwrap();
    assert_eq!(run.results().n_steps().unwrap(), 1);
    assert_eq!(run.results().n_designs().unwrap(), 1);

    watcher.interrupt();
}

#[test]
fn interrupt_stops_the_loop_within_a_tick() {
    let dir = test_dir("interrupt");
    let registry = ReadinessRegistry::new();
    let run = OptimizerRun::new(&registry, &dir, &dir, "opt").unwrap();

    let run = Arc::new(Mutex::new(run));
    let polars = Arc::new(Mutex::new(PolarQueue::new()));
    let watcher = Watcher::spawn(run, polars, fast_config());

    watcher.interrupt();
    // The sender side is gone once the loop exits; drain then observe the
    // disconnect.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match watcher.events.try_recv() {
            Ok(_) => continue,
            Err(std::sync::mpsc::TryRecvError::Disconnected) => break,
            Err(std::sync::mpsc::TryRecvError::Empty) => {
                assert!(
                    std::time::Instant::now() < deadline,
                    "polling loop did not exit after interrupt"
                );
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}
