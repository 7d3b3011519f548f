//! End-to-end probe/run tests against a scripted fake executable.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use af_exec::{ExternalProgram, ProgramSpec, ReadinessRegistry};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "af_exec_it_{}_{}_{}",
        tag,
        std::process::id(),
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(dir.join("bin")).expect("create test dirs");
    dir
}

fn install_fake_program(base_dir: &Path, stem: &str, version: &str) {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"-h\" ]; then\n\
           echo \"Fakeprog  - test double\"\n\
           echo \"Fakeprog {version}\"\n\
           exit 0\n\
         fi\n\
         if [ \"$1\" = \"fail\" ]; then\n\
           echo \"Fakeprog: Error: boom\" 1>&2\n\
           exit 3\n\
         fi\n\
         if [ \"$1\" = \"slow\" ]; then\n\
           sleep 2\n\
           exit 0\n\
         fi\n\
         echo \"hello from fakeprog\"\n\
         exit 0\n"
    );
    let path = base_dir.join("bin").join(stem);
    fs::write(&path, script).expect("write fake program");
    let mut perms = fs::metadata(&path).expect("stat fake program").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake program");
}

fn fake_spec(min_version: &'static str) -> ProgramSpec {
    ProgramSpec {
        display_name: "Fakeprog".to_string(),
        exe_stem: "fakeprog".to_string(),
        help_flag: "-h",
        search_subdirs: vec!["bin".to_string()],
        min_version,
    }
}

#[test]
fn probe_finds_executable_and_version() {
    let base = test_dir("probe");
    install_fake_program(&base, "fakeprog", "1.2.3");

    let registry = ReadinessRegistry::new();
    let readiness = registry.ensure_ready(&fake_spec("1.0"), &base);
    assert!(readiness.ready, "message: {}", readiness.message);
    assert_eq!(readiness.version.as_deref(), Some("1.2.3"));
    assert!(readiness.message.contains("1.2.3"));
}

#[test]
fn probe_rejects_old_version_with_both_versions_named() {
    let base = test_dir("version_gate");
    install_fake_program(&base, "fakeprog", "1.0.5");

    let registry = ReadinessRegistry::new();
    let readiness = registry.ensure_ready(&fake_spec("1.0.6"), &base);
    assert!(!readiness.ready);
    assert!(readiness.message.contains("1.0.5"));
    assert!(readiness.message.contains("1.0.6"));
}

#[test]
fn run_sync_captures_output_and_exit_code() {
    let base = test_dir("run_sync");
    install_fake_program(&base, "fakeprog", "1.2.3");

    let registry = ReadinessRegistry::new();
    let mut program = ExternalProgram::new(fake_spec("1.0"), &registry, &base, &base);
    assert!(program.is_ready(), "{}", program.ready_message());

    let code = program.run_sync(&["hello".to_string()], true).unwrap();
    assert_eq!(code, 0);
    let output = program.finished_output().unwrap();
    assert!(output.stdout.iter().any(|l| l.contains("hello from fakeprog")));
}

#[test]
fn run_sync_failure_surfaces_errortext() {
    let base = test_dir("run_fail");
    install_fake_program(&base, "fakeprog", "1.2.3");

    let registry = ReadinessRegistry::new();
    let mut program = ExternalProgram::new(fake_spec("1.0"), &registry, &base, &base);

    let code = program.run_sync(&["fail".to_string()], true).unwrap();
    assert_eq!(code, 3);
    assert_eq!(program.finished_returncode(), Some(3));
    assert_eq!(program.finished_errortext().as_deref(), Some("boom"));
}

#[test]
fn run_async_is_polled_to_completion() {
    let base = test_dir("run_async");
    install_fake_program(&base, "fakeprog", "1.2.3");

    let registry = ReadinessRegistry::new();
    let mut program = ExternalProgram::new(fake_spec("1.0"), &registry, &base, &base);

    let code = program.run_async(&["hello".to_string()], true).unwrap();
    assert_eq!(code, 0);
    assert!(program.owns_process());

    let deadline = Instant::now() + Duration::from_secs(10);
    while program.is_running() {
        assert!(Instant::now() < deadline, "fake program never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(program.finished_returncode(), Some(0));
    // Handle released: a second poll stays finished.
    assert!(!program.is_running());
}

#[test]
fn terminate_kills_a_slow_run() {
    let base = test_dir("terminate");
    install_fake_program(&base, "fakeprog", "1.2.3");

    let registry = ReadinessRegistry::new();
    let mut program = ExternalProgram::new(fake_spec("1.0"), &registry, &base, &base);

    program.run_async(&["slow".to_string()], true).unwrap();
    assert!(program.is_running());
    program.terminate();
    assert!(!program.is_running());
}
