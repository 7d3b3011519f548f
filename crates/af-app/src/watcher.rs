//! Background polling coordinator.
//!
//! A single thread polls the optimize-run target and the polar queue on a
//! fixed cadence and raises discrete notifications over a channel. Per
//! tick at most one run notification fires, by fixed priority: a state or
//! identity change beats a new design beats a new step beats the
//! still-running heartbeat. Polar completions are independent and add at
//! most one `NewPolars` per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use af_exec::RunState;
use tracing::debug;

use crate::polar_service::PolarQueue;
use crate::run_service::{OptimizerRun, RunSnapshot};

/// Notification raised by the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// Run identity or run state changed; always the first event of a new
    /// run so a subscriber syncs to current state.
    NewState(RunState),
    /// A new design was produced; carries the design index.
    NewDesign(usize),
    /// A step completed without producing a design; carries the step.
    NewStep(usize),
    /// Nothing changed but the run is still active (heartbeat for
    /// elapsed-time display).
    StillRunning,
    /// New polar data was loaded for at least one polar task.
    NewPolars,
}

/// Cadence of the polling loop.
#[derive(Clone, Copy, Debug)]
pub struct WatcherConfig {
    /// Delay before the first tick.
    pub settle: Duration,
    /// Tick interval.
    pub interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            interval: Duration::from_millis(500),
        }
    }
}

/// Handle to the background polling thread.
pub struct Watcher {
    pub events: Receiver<WatchEvent>,
    stop_flag: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl Watcher {
    /// Start polling `run` and `polars`. The loop checks the interruption
    /// flag at the top of each cycle and exits within one tick of
    /// `interrupt()`.
    pub fn spawn(
        run: Arc<Mutex<OptimizerRun>>,
        polars: Arc<Mutex<PolarQueue>>,
        config: WatcherConfig,
    ) -> Self {
        let (tx, rx) = channel();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop_flag);

        let handle = thread::spawn(move || {
            poll_loop(&run, &polars, &tx, &flag, config);
        });

        Self {
            events: rx,
            stop_flag,
            _handle: handle,
        }
    }

    /// Ask the loop to exit; it does so within one tick.
    pub fn interrupt(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.interrupt();
    }
}

fn poll_loop(
    run: &Mutex<OptimizerRun>,
    polars: &Mutex<PolarQueue>,
    tx: &Sender<WatchEvent>,
    stop_flag: &AtomicBool,
    config: WatcherConfig,
) {
    thread::sleep(config.settle);
    let mut last: Option<RunSnapshot> = None;

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            debug!("polling coordinator interrupted");
            return;
        }

        let event = {
            let mut run = run.lock().unwrap_or_else(|e| e.into_inner());
            let snapshot = run.snapshot();
            let event = diff_event(last.as_ref(), &snapshot);
            if changed(last.as_ref(), &snapshot) {
                run.results().mark_dirty();
            }
            last = Some(snapshot);
            event
        };
        if let Some(event) = event {
            if tx.send(event).is_err() {
                return;
            }
        }

        let any_polars = polars.lock().unwrap_or_else(|e| e.into_inner()).poll();
        if any_polars && tx.send(WatchEvent::NewPolars).is_err() {
            return;
        }

        thread::sleep(config.interval);
    }
}

fn changed(previous: Option<&RunSnapshot>, current: &RunSnapshot) -> bool {
    previous != Some(current)
}

/// At most one run notification per tick, by fixed priority.
fn diff_event(previous: Option<&RunSnapshot>, current: &RunSnapshot) -> Option<WatchEvent> {
    let previous = match previous {
        Some(previous) => previous,
        // First tick: sync the subscriber to current state.
        None => return Some(WatchEvent::NewState(current.state.clone())),
    };

    if previous.run_token != current.run_token || previous.state != current.state {
        return Some(WatchEvent::NewState(current.state.clone()));
    }
    if current.n_designs > previous.n_designs {
        return Some(WatchEvent::NewDesign(current.n_designs));
    }
    if current.n_steps > previous.n_steps {
        return Some(WatchEvent::NewStep(current.n_steps));
    }
    if matches!(current.state, RunState::Running | RunState::Stopping) {
        return Some(WatchEvent::StillRunning);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(token: u64, state: RunState, steps: usize, designs: usize) -> RunSnapshot {
        RunSnapshot {
            run_token: token,
            state,
            n_steps: steps,
            n_designs: designs,
        }
    }

    #[test]
    fn first_tick_always_syncs_state() {
        let current = snapshot(1, RunState::Running, 0, 0);
        assert_eq!(
            diff_event(None, &current),
            Some(WatchEvent::NewState(RunState::Running))
        );
    }

    #[test]
    fn state_change_suppresses_design_and_step() {
        let previous = snapshot(1, RunState::Running, 3, 1);
        let current = snapshot(2, RunState::Running, 5, 2);
        assert_eq!(
            diff_event(Some(&previous), &current),
            Some(WatchEvent::NewState(RunState::Running))
        );
    }

    #[test]
    fn design_beats_step() {
        let previous = snapshot(1, RunState::Running, 3, 1);
        let current = snapshot(1, RunState::Running, 5, 2);
        assert_eq!(
            diff_event(Some(&previous), &current),
            Some(WatchEvent::NewDesign(2))
        );
    }

    #[test]
    fn step_without_design_is_new_step() {
        let previous = snapshot(1, RunState::Running, 3, 1);
        let current = snapshot(1, RunState::Running, 4, 1);
        assert_eq!(
            diff_event(Some(&previous), &current),
            Some(WatchEvent::NewStep(4))
        );
    }

    #[test]
    fn unchanged_active_run_heartbeats() {
        let previous = snapshot(1, RunState::Running, 4, 1);
        let current = snapshot(1, RunState::Running, 4, 1);
        assert_eq!(
            diff_event(Some(&previous), &current),
            Some(WatchEvent::StillRunning)
        );
        let stopping = snapshot(1, RunState::Stopping, 4, 1);
        let previous = stopping.clone();
        assert_eq!(
            diff_event(Some(&previous), &stopping),
            Some(WatchEvent::StillRunning)
        );
    }

    #[test]
    fn idle_run_is_silent() {
        let previous = snapshot(1, RunState::Ready, 4, 1);
        let current = snapshot(1, RunState::Ready, 4, 1);
        assert_eq!(diff_event(Some(&previous), &current), None);
    }
}
