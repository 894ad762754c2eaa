//! Long-running operation lifecycle.
//!
//! Flash transfers run for tens of seconds and must not block the caller,
//! so they execute on their own worker thread while the caller polls. The
//! [`Supervisor`] owns that lifecycle: an atomic running flag (two racing
//! starts cannot both win), a progress counter, and the final outcome.
//!
//! The worker never propagates its error to a caller directly; the first
//! failure is captured and surfaced through [`Supervisor::last_error`] and
//! [`Supervisor::succeeded`] once the operation finishes.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Snapshot state of the current (or most recent) operation.
#[derive(Debug, Default)]
struct OperationState {
    progress: u32,
    succeeded: bool,
    last_error: Option<Arc<Error>>,
}

/// Lifecycle manager for at most one concurrently-running long task.
#[derive(Debug, Default)]
pub struct Supervisor {
    running: AtomicBool,
    state: Mutex<OperationState>,
}

impl Supervisor {
    /// Create an idle supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch `task` on a worker thread.
    ///
    /// The running flag is claimed with a single compare-and-swap, so of two
    /// racing calls exactly one succeeds and the other gets
    /// [`Error::AlreadyRunning`] with the existing state untouched. Progress
    /// and outcome are reset before the task starts; an `Err` return becomes
    /// [`Supervisor::last_error`], an `Ok` sets [`Supervisor::succeeded`].
    pub fn start<F>(self: &Arc<Self>, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        {
            let mut state = self.state.lock().unwrap();
            *state = OperationState::default();
        }

        let supervisor = Arc::clone(self);
        thread::spawn(move || {
            let result = task();
            supervisor.report_result(result);
            supervisor.finish();
        });

        Ok(())
    }

    /// Record transfer progress; called by the running worker.
    pub fn report_progress(&self, progress: u32) {
        self.state.lock().unwrap().progress = progress;
    }

    /// Record the operation outcome; called once when the worker is done.
    pub fn report_result(&self, result: Result<()>) {
        let mut state = self.state.lock().unwrap();
        match result {
            Ok(()) => state.succeeded = true,
            Err(e) => {
                state.succeeded = false;
                state.last_error = Some(Arc::new(e));
            },
        }
    }

    /// Mark the operation as no longer running. Idempotent.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Whether an operation is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Progress of the current or most recent operation.
    pub fn progress(&self) -> u32 {
        self.state.lock().unwrap().progress
    }

    /// Whether the most recent operation completed successfully.
    pub fn succeeded(&self) -> bool {
        self.state.lock().unwrap().succeeded
    }

    /// Error captured by the most recent operation, if it failed.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.state.lock().unwrap().last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn wait_until_idle(supervisor: &Supervisor) {
        for _ in 0..200 {
            if !supervisor.is_running() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("operation did not finish");
    }

    #[test]
    fn test_start_runs_task_and_records_success() {
        let supervisor = Arc::new(Supervisor::new());
        supervisor.start(|| Ok(())).unwrap();

        wait_until_idle(&supervisor);
        assert!(supervisor.succeeded());
        assert!(supervisor.last_error().is_none());
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let supervisor = Arc::new(Supervisor::new());
        let (release_tx, release_rx) = mpsc::channel::<()>();

        supervisor
            .start(move || {
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();

        let err = supervisor.start(|| Ok(())).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning));

        release_tx.send(()).unwrap();
        wait_until_idle(&supervisor);
    }

    #[test]
    fn test_failure_captured_in_last_error() {
        let supervisor = Arc::new(Supervisor::new());
        supervisor
            .start(|| Err(Error::NoActiveSession))
            .unwrap();

        wait_until_idle(&supervisor);
        assert!(!supervisor.succeeded());
        assert!(matches!(
            supervisor.last_error().as_deref(),
            Some(Error::NoActiveSession)
        ));
    }

    #[test]
    fn test_restart_after_finish_resets_state() {
        let supervisor = Arc::new(Supervisor::new());
        supervisor
            .start(|| Err(Error::NoActiveSession))
            .unwrap();
        wait_until_idle(&supervisor);
        assert!(supervisor.last_error().is_some());

        supervisor
            .start(|| {
                Ok(())
            })
            .unwrap();
        wait_until_idle(&supervisor);
        assert!(supervisor.succeeded());
        assert!(supervisor.last_error().is_none());
    }

    #[test]
    fn test_progress_visible_while_running() {
        let supervisor = Arc::new(Supervisor::new());
        let worker_view = Arc::clone(&supervisor);
        let (progress_tx, progress_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        supervisor
            .start(move || {
                worker_view.report_progress(256);
                progress_tx.send(()).unwrap();
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();

        progress_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("worker reported progress");
        assert!(supervisor.is_running());
        assert_eq!(supervisor.progress(), 256);

        release_tx.send(()).unwrap();
        wait_until_idle(&supervisor);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let supervisor = Supervisor::new();
        supervisor.finish();
        supervisor.finish();
        assert!(!supervisor.is_running());
    }
}
