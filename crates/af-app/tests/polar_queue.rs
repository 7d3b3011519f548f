//! Polar-queue ordering against a scripted fake Worker.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use af_app::{PolarQueue, PolarTask, TaskState};
use af_exec::{polar_dir, polar_file_name, OpRange, PolarRequest, PolarSpec, PolarType,
    ReadinessRegistry, Worker};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

const POLAR_TEXT: &str = "\
 Calculated polar for: Test foil\n\
\n\
   alpha    CL        CD       CDp       CM    Top Xtr  Bot Xtr\n\
  ------ -------- --------- --------- -------- -------- --------\n\
  -2.000  -0.1041  0.00535   0.00023  -0.0523   0.7512   0.4221\n\
   0.000   0.1520  0.00492   0.00020  -0.0555   0.6912   0.5310\n";

fn test_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "af_app_polar_{}_{}_{}",
        tag,
        std::process::id(),
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(dir.join("bin")).expect("create test dirs");
    dir
}

fn install_fake_worker(base_dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let script = "#!/bin/sh\n\
        if [ \"$1\" = \"-h\" ]; then\n\
          echo \"Worker  - companion tool\"\n\
          echo \"Worker 1.0.6\"\n\
          exit 0\n\
        fi\n\
        exit 0\n";
    let path = base_dir.join("bin").join("worker");
    fs::write(&path, script).expect("write fake worker");
    let mut perms = fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
}

fn request(reynolds: Vec<f64>) -> PolarRequest {
    PolarRequest {
        polar_type: PolarType::T1,
        reynolds,
        machs: vec![0.0],
        ncrit: 7.0,
        range: OpRange::Auto,
    }
}

fn spec(re: f64) -> PolarSpec {
    PolarSpec {
        re,
        mach: 0.0,
        ncrit: 7.0,
        polar_type: PolarType::T1,
    }
}

fn deliver_polar(airfoil: &Path, re: f64) {
    let dir = polar_dir(airfoil);
    fs::create_dir_all(&dir).expect("create polar dir");
    fs::write(dir.join(polar_file_name(&spec(re), None)), POLAR_TEXT).expect("write polar");
}

#[test]
fn completions_surface_in_creation_order() {
    let base = test_dir("ordering");
    install_fake_worker(&base);
    let registry = ReadinessRegistry::new();

    let first_airfoil = base.join("first.dat");
    let second_airfoil = base.join("second.dat");
    fs::write(&first_airfoil, "First\n").unwrap();
    fs::write(&second_airfoil, "Second\n").unwrap();

    let worker1 = Worker::new(&registry, &base, &base);
    let worker2 = Worker::new(&registry, &base, &base);
    assert!(worker1.is_ready(), "{}", worker1.ready_message());

    let mut queue = PolarQueue::new();
    queue.push(PolarTask::start(worker1, &first_airfoil, &request(vec![400_000.0, 600_000.0]), None).unwrap());
    queue.push(PolarTask::start(worker2, &second_airfoil, &request(vec![400_000.0]), None).unwrap());

    // Let the (immediately exiting) fake workers finish spawning.
    std::thread::sleep(Duration::from_millis(50));

    // The second task's polar lands first, but the scan stops at the
    // still-incomplete first task: nothing surfaces yet.
    deliver_polar(&second_airfoil, 400_000.0);
    assert!(!queue.poll());
    assert_eq!(queue.tasks()[1].polars().len(), 0);

    // The first task completes, unblocking the scan: the second task's
    // already-delivered polar surfaces in the same tick, after the first.
    deliver_polar(&first_airfoil, 400_000.0);
    deliver_polar(&first_airfoil, 600_000.0);
    assert!(queue.poll());
    assert_eq!(*queue.tasks()[0].state(), TaskState::Completed);
    assert_eq!(queue.tasks()[0].polars().len(), 2);
    assert_eq!(*queue.tasks()[1].state(), TaskState::Completed);
    assert_eq!(queue.tasks()[1].polars().len(), 1);
    assert!(queue.is_idle());

    let settled = queue.drain_settled();
    assert_eq!(settled.len(), 2);
    assert!(settled[0].created_at() <= settled[1].created_at());
}

#[test]
fn completed_task_removes_its_temp_input() {
    let base = test_dir("finalize");
    install_fake_worker(&base);
    let registry = ReadinessRegistry::new();

    let airfoil = base.join("foil.dat");
    fs::write(&airfoil, "Foil\n").unwrap();

    let worker = Worker::new(&registry, &base, &base);
    let mut queue = PolarQueue::new();
    queue.push(PolarTask::start(worker, &airfoil, &request(vec![400_000.0]), None).unwrap());

    let temp_input = base.join("tmp~foil.inp");
    assert!(temp_input.exists(), "temp namelist input should exist");

    deliver_polar(&airfoil, 400_000.0);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !queue.is_idle() {
        assert!(Instant::now() < deadline, "task never completed");
        queue.poll();
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!temp_input.exists(), "temp namelist input should be removed");
}
