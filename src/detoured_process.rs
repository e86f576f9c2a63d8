//! The detoured process state machine.
//!
//! This is the one component every platform backend plugs into: a Linux
//! backend supplies a pidfd-backed exit future
//! ([`crate::linux::LinuxWaitFuture`], generalized from
//! `linux/wait.rs::WaitFuture`) and a Windows backend supplies a
//! background-thread exit future
//! ([`crate::windows::WindowsWaitFuture`], generalized from
//! `windows/wait.rs::WaitFuture`); this module owns the state transitions,
//! the exactly-once guards and the suspend-accounting arithmetic that sit
//! above whichever future is plugged in.

use crate::{
    dumper::{Dumper, DEFAULT_MAX_DEPTH, DEFAULT_SKIP_NAMES},
    error::Error,
    job_container::JobContainer,
    result::SandboxedProcessResult,
    ExitCode,
};
use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

/// `Unstarted -> Starting -> Running -> ExitObserved -> Draining ->
/// Completed`, with the timeout branch `Running ->(timeout)-> dump ->
/// Killing -> ExitObserved`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DetouredProcessState {
    Unstarted,
    Starting,
    Running,
    Killing,
    ExitObserved,
    Draining,
    Completed,
}

/// A future that resolves to the child's exit code. Implemented per
/// platform: pidfd readiness on Linux, a background polling thread on
/// Windows -- both natively async-friendly; this module adds the ability
/// to race either one against a timeout.
pub trait ExitFuture: Future<Output = Result<ExitCode, Error>> + Send {}
impl<T: Future<Output = Result<ExitCode, Error>> + Send> ExitFuture for T {}

/// Tracks cumulative time the process spent suspended (e.g. a debugger
/// attach, or a build engine explicitly pausing it to throttle resource
/// use) so that time does not count against the wall-clock timeout. Uses
/// the same monotonic-clock-delta idiom as any wall/CPU-time-against-a-
/// deadline watchdog.
#[derive(Debug, Default)]
pub struct SuspendAccounting {
    total_suspended: AtomicU64,
    pending_since: parking_lot::Mutex<Option<Instant>>,
}

impl SuspendAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins crediting suspended time. A second call before the matching
    /// `stop` is a no-op: credit only ever accrues once per suspend
    /// window, it is not cumulative across overlapping calls.
    pub fn start_measuring_suspension(&self) {
        let mut guard = self.pending_since.lock();
        if guard.is_none() {
            *guard = Some(Instant::now());
        }
    }

    /// Ends the current suspend window and folds its duration into the
    /// running total. A call with no matching `start` is a no-op.
    pub fn stop_measuring_suspension(&self) {
        let mut guard = self.pending_since.lock();
        if let Some(started) = guard.take() {
            let elapsed = started.elapsed().as_nanos() as u64;
            self.total_suspended.fetch_add(elapsed, Ordering::SeqCst);
        }
    }

    /// Total credited suspend time, including any window still open.
    pub fn credited(&self) -> Duration {
        let base = Duration::from_nanos(self.total_suspended.load(Ordering::SeqCst));
        let open = (*self.pending_since.lock())
            .map(|s| s.elapsed())
            .unwrap_or_default();
        base + open
    }

    /// The deadline a caller configured `timeout` for should be extended
    /// to, given `started_at`: an arbitrary amount of credited suspension
    /// may push the deadline out indefinitely
    /// (`SUSPEND_CREDIT_UNBOUNDED`), so callers must re-arm their wait
    /// rather than assume a fixed deadline.
    pub fn effective_deadline(&self, started_at: Instant, timeout: Duration) -> Instant {
        started_at + timeout + self.credited()
    }
}

/// One OS pipe/handle conveying redirected stdin/stdout/stderr, with
/// manual-flush semantics only. Grounded on `linux/pipe.rs`'s
/// `LinuxWritePipe::flush`, which already calls `fsync` only when the
/// caller explicitly asks: auto-flushing stdin on every write would
/// serialize the supervised process against this crate's own write
/// buffering, defeating the purpose of giving the caller a raw pipe at
/// all.
pub trait RedirectedStream: Send {
    fn flush(&mut self) -> std::io::Result<()>;
}

/// The core per-process state machine. Platform backends construct one of
/// these after spawning (suspended) and assigning to the job container,
/// then call [`DetouredProcess::start`] to resume it.
pub struct DetouredProcess {
    state: parking_lot::Mutex<DetouredProcessState>,
    started: AtomicBool,
    kill_requested: AtomicBool,
    exit_observed: AtomicBool,
    pid: i32,
    job: Arc<dyn JobContainer>,
    suspend: SuspendAccounting,
    started_at: parking_lot::Mutex<Option<Instant>>,
    started_at_system: parking_lot::Mutex<Option<SystemTime>>,
}

impl DetouredProcess {
    pub fn new(pid: i32, job: Arc<dyn JobContainer>) -> Self {
        DetouredProcess {
            state: parking_lot::Mutex::new(DetouredProcessState::Unstarted),
            started: AtomicBool::new(false),
            kill_requested: AtomicBool::new(false),
            exit_observed: AtomicBool::new(false),
            pid,
            job,
            suspend: SuspendAccounting::new(),
            started_at: parking_lot::Mutex::new(None),
            started_at_system: parking_lot::Mutex::new(None),
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn state(&self) -> DetouredProcessState {
        *self.state.lock()
    }

    pub fn suspend_accounting(&self) -> &SuspendAccounting {
        &self.suspend
    }

    /// True once `kill` has fired, whether triggered by a caller's explicit
    /// cancellation or by the timeout branch's own kill step -- a run can
    /// be both `killed` and `timed_out` when the latter is what fired.
    pub fn killed(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }

    /// Resumes the suspended child. Exactly-once: a second call
    /// returns `Error::AlreadyStarted` rather than silently succeeding,
    /// because a caller racing two `start()`s almost always indicates a
    /// bug upstream of this crate, not a benign retry.
    #[tracing::instrument(skip(self, resume))]
    pub fn start(&self, resume: impl FnOnce() -> Result<(), Error>) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }
        *self.state.lock() = DetouredProcessState::Starting;
        resume()?;
        *self.started_at.lock() = Some(Instant::now());
        *self.started_at_system.lock() = Some(SystemTime::now());
        *self.state.lock() = DetouredProcessState::Running;
        Ok(())
    }

    /// Idempotent kill: notifies the interposition control channel
    /// (best-effort), terminates the process handle, then terminates the
    /// whole job container, swallowing errors from each step since by the
    /// time we're killing, the process may already be gone by any of
    /// several races.
    #[tracing::instrument(skip(self, notify_control_channel, terminate_handle))]
    pub fn kill(
        &self,
        notify_control_channel: impl FnOnce() -> Result<(), Error>,
        terminate_handle: impl FnOnce() -> Result<(), Error>,
    ) {
        if self.kill_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(pid = self.pid, "killing supervised process tree");
        *self.state.lock() = DetouredProcessState::Killing;
        let _ = notify_control_channel();
        let _ = terminate_handle();
        let _ = self.job.terminate();
    }

    /// Runs the timeout branch: `Running -> dump -> Killing ->
    /// ExitObserved`. `timeout` is measured from `start()`'s return,
    /// extended by any credited suspend time.
    #[tracing::instrument(skip(self, exit_future, dumper, dump_dir))]
    pub async fn run_with_timeout<F>(
        &self,
        exit_future: F,
        timeout: Duration,
        dumper: Option<&dyn Dumper>,
        dump_dir: &std::path::Path,
        compress_dumps: bool,
    ) -> Result<(ExitCode, Vec<crate::dumper::DumpOutcome>), Error>
    where
        F: Future<Output = Result<ExitCode, Error>> + Send,
    {
        let started_at = (*self.started_at.lock()).ok_or(Error::InvalidState)?;
        let started_at_system = (*self.started_at_system.lock()).ok_or(Error::InvalidState)?;
        tokio::pin!(exit_future);
        let mut dumps = Vec::new();
        loop {
            let deadline = self.suspend.effective_deadline(started_at, timeout);
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                result = &mut exit_future => {
                    self.mark_exit_observed();
                    return result.map(|code| (code, dumps));
                }
                _ = tokio::time::sleep(remaining) => {
                    if Instant::now() < self.suspend.effective_deadline(started_at, timeout) {
                        continue;
                    }
                    tracing::warn!(pid = self.pid, timeout = ?timeout, "process timed out, dumping before kill");
                    if let Some(dumper) = dumper {
                        let live = self.job.live_pids();
                        let result = dumper.try_dump_tree(
                            self.pid,
                            dump_dir,
                            started_at_system,
                            Some(&live),
                            DEFAULT_MAX_DEPTH,
                            DEFAULT_SKIP_NAMES,
                            compress_dumps,
                        );
                        if !result.success {
                            tracing::warn!(
                                pid = self.pid,
                                error = ?result.first_exception,
                                "one or more tree members failed to dump"
                            );
                        }
                        dumps = result.outcomes;
                    }
                    self.kill(|| Ok(()), || Ok(()));
                    let code = exit_future.await.unwrap_or(ExitCode::TIMEOUT);
                    self.mark_exit_observed();
                    return Ok((ExitCode::TIMEOUT.max_with(code), dumps));
                }
            }
        }
    }

    /// Exactly-once guard on the exit-observer callback: only the first
    /// caller to reach this point transitions the state machine past
    /// `ExitObserved`, matching the single-completion-callback invariant.
    fn mark_exit_observed(&self) {
        if !self.exit_observed.swap(true, Ordering::SeqCst) {
            *self.state.lock() = DetouredProcessState::ExitObserved;
        }
    }

    /// Transitions `ExitObserved -> Draining -> Completed` once the
    /// report stream has been fully drained and the final result can be
    /// assembled.
    pub fn mark_draining(&self) {
        *self.state.lock() = DetouredProcessState::Draining;
    }

    pub fn mark_completed(&self) {
        *self.state.lock() = DetouredProcessState::Completed;
    }
}

impl ExitCode {
    /// `TIMEOUT` always wins: once the supervisor has decided to kill the
    /// tree, the sentinel describes that decision even if the OS reports
    /// a real exit code racing the kill signal.
    fn max_with(self, _other: ExitCode) -> ExitCode {
        self
    }
}

pub type BoxedExitFuture = Pin<Box<dyn Future<Output = Result<ExitCode, Error>> + Send>>;

#[allow(dead_code)]
fn assert_result_shape(_: &SandboxedProcessResult) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct NullJob {
        terminated: AtomicUsize,
    }
    impl std::fmt::Display for NullJob {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "NullJob")
        }
    }
    impl JobContainer for NullJob {
        fn add_process(&self, _pid: i32) -> Result<(), Error> {
            Ok(())
        }
        fn contains(&self, _pid: i32) -> bool {
            false
        }
        fn live_pids(&self) -> Vec<i32> {
            Vec::new()
        }
        fn accounting(&self) -> Result<crate::job_container::JobAccounting, Error> {
            Ok(Default::default())
        }
        fn supported_limits(&self) -> crate::job_container::JobLimitFlags {
            crate::job_container::JobLimitFlags::NONE
        }
        fn terminate(&self) -> Result<(), Error> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn start_twice_is_rejected() {
        let p = DetouredProcess::new(1, Arc::new(NullJob::default()));
        assert!(p.start(|| Ok(())).is_ok());
        assert!(matches!(p.start(|| Ok(())), Err(Error::AlreadyStarted)));
    }

    #[test]
    fn kill_is_idempotent() {
        let job = Arc::new(NullJob::default());
        let p = DetouredProcess::new(1, job.clone());
        p.kill(|| Ok(()), || Ok(()));
        p.kill(|| Ok(()), || Ok(()));
        assert_eq!(job.terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspend_accounting_extends_deadline() {
        let acc = SuspendAccounting::new();
        let start = Instant::now();
        let base_deadline = acc.effective_deadline(start, Duration::from_secs(1));
        acc.start_measuring_suspension();
        std::thread::sleep(Duration::from_millis(5));
        acc.stop_measuring_suspension();
        let extended_deadline = acc.effective_deadline(start, Duration::from_secs(1));
        assert!(extended_deadline > base_deadline);
    }
}
