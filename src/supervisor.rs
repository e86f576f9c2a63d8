//! The sandboxed/unsandboxed supervisor facade.
//!
//! The axis that matters here is whether the run is sandboxed at all (a
//! build engine sometimes wants to run a trusted tool unconstrained, with
//! none of the job-container/report-stream machinery), not which OS it
//! runs on -- dynamic dispatch over two state structs rather than an
//! inheritance chain. Platform backends ([`crate::linux::LinuxJobContainer`]
//! / [`crate::windows::WindowsJobContainer`] plus their respective spawn
//! and exit-future helpers) construct a [`SandboxedSupervisor`] by
//! supplying its four moving parts -- the job container, the exit future,
//! an optional report-stream pipe, and optional redirected stdout/stderr
//! pipes -- so this module stays entirely platform-agnostic.

use crate::{
    command::ProcessInfo,
    detoured_process::{BoxedExitFuture, DetouredProcess},
    dumper::Dumper,
    error::Error,
    job_container::JobContainer,
    report_reader::ReportStreamReader,
    result::SandboxedProcessResult,
    settings::SupervisorOptions,
};
use std::{
    future::Future,
    path::PathBuf,
    pin::Pin,
    sync::{atomic::{AtomicBool, Ordering}, Arc},
    time::{Duration, Instant},
};
use tokio::io::{AsyncRead, AsyncReadExt};

pub type ResultFuture = Pin<Box<dyn Future<Output = Result<SandboxedProcessResult, Error>> + Send>>;

/// Capability every supervised process exposes, independent of whether it
/// is sandboxed. A caller holds a `Box<dyn SandboxedProcess>` and never
/// needs to know which backend produced it. Stays entirely free of an
/// async-trait macro dependency: the one method that needs to await
/// something returns a boxed future directly, the same way
/// `windows/wait.rs::WindowsWaitFuture` is a plain hand-written `Future`
/// impl rather than something generated by a proc macro.
pub trait SandboxedProcess: Send + Sync {
    /// Resumes the (spawned-suspended) child. Exactly-once; see
    /// [`DetouredProcess::start`].
    fn start(&self) -> Result<(), Error>;

    /// Awaits completion (exit, or timeout-then-kill), drains the report
    /// stream and assembles the final result. Consumes `self` because a
    /// result can only be produced once.
    fn get_result(self: Box<Self>) -> ResultFuture;

    /// Idempotently kills the process tree and its job container.
    fn kill(&self);

    fn pid(&self) -> i32;

    /// The path this process was launched from, for diagnostics.
    fn accessed_name(&self) -> &std::path::Path;
}

async fn drain_pipe<R: AsyncRead + Unpin>(pipe: &mut Option<R>) -> Vec<u8> {
    match pipe {
        Some(r) => {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf).await;
            buf
        }
        None => Vec::new(),
    }
}

/// A process running inside a job container with report-stream collection
/// enabled: access records, dumps, and suspend accounting all apply.
pub struct SandboxedSupervisor {
    inner: Arc<DetouredProcess>,
    process_info: ProcessInfo,
    options: SupervisorOptions,
    job: Arc<dyn JobContainer>,
    dump_dir: PathBuf,
    compress_dumps: bool,
    capture_accesses: bool,
    is_allowed: Arc<dyn Fn(&crate::access::FileAccess) -> bool + Send + Sync>,
    exit_future: parking_lot::Mutex<Option<BoxedExitFuture>>,
    report_stream:
        parking_lot::Mutex<Option<Pin<Box<dyn AsyncRead + Send>>>>,
    stdout_pipe: parking_lot::Mutex<Option<Pin<Box<dyn AsyncRead + Send>>>>,
    stderr_pipe: parking_lot::Mutex<Option<Pin<Box<dyn AsyncRead + Send>>>>,
    dumper: Option<Arc<dyn Dumper>>,
    cancellation_drain_retries: u32,
    resume: parking_lot::Mutex<Option<Box<dyn FnOnce() -> Result<(), Error> + Send>>>,
}

impl SandboxedSupervisor {
    /// Assembles a sandboxed supervisor from the pieces a platform backend
    /// has already spawned. `exit_future` resolves once the directly
    /// launched process has exited; `report_stream` is the read end of the
    /// interposition layer's control pipe, if report collection was
    /// requested at all (results' `file_accesses` is `None` when it wasn't).
    /// `resume` is the platform callback that sends the spawned-suspended
    /// child its `SIGCONT`/`ResumeThread` (e.g. [`crate::linux::SpawnedProcess::resume`]);
    /// `start` calls it exactly once, after the job-container assignment a
    /// caller must have already done before constructing this supervisor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pid: i32,
        process_info: ProcessInfo,
        options: SupervisorOptions,
        job: Arc<dyn JobContainer>,
        dump_dir: PathBuf,
        compress_dumps: bool,
        cancellation_drain_retries: u32,
        exit_future: BoxedExitFuture,
        report_stream: Option<Pin<Box<dyn AsyncRead + Send>>>,
        stdout_pipe: Option<Pin<Box<dyn AsyncRead + Send>>>,
        stderr_pipe: Option<Pin<Box<dyn AsyncRead + Send>>>,
        dumper: Option<Arc<dyn Dumper>>,
        resume: impl FnOnce() -> Result<(), Error> + Send + 'static,
    ) -> Self {
        SandboxedSupervisor {
            inner: Arc::new(DetouredProcess::new(pid, job.clone())),
            process_info,
            options,
            job,
            dump_dir,
            compress_dumps,
            capture_accesses: report_stream.is_some(),
            is_allowed: Arc::new(|_| false),
            exit_future: parking_lot::Mutex::new(Some(exit_future)),
            report_stream: parking_lot::Mutex::new(report_stream),
            stdout_pipe: parking_lot::Mutex::new(stdout_pipe),
            stderr_pipe: parking_lot::Mutex::new(stderr_pipe),
            dumper,
            cancellation_drain_retries,
            resume: parking_lot::Mutex::new(Some(Box::new(resume))),
        }
    }

    pub fn detoured_process(&self) -> &Arc<DetouredProcess> {
        &self.inner
    }

    /// Overrides the allow-list predicate used to compute
    /// `all_unexpected_file_accesses`; defaults to "nothing is allow-listed".
    pub fn with_allow_list(
        mut self,
        is_allowed: impl Fn(&crate::access::FileAccess) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_allowed = Arc::new(is_allowed);
        self
    }
}

impl SandboxedProcess for SandboxedSupervisor {
    #[tracing::instrument(skip(self))]
    fn start(&self) -> Result<(), Error> {
        let resume = self.resume.lock().take().ok_or(Error::AlreadyStarted)?;
        self.inner.start(resume)
    }

    fn get_result(self: Box<Self>) -> ResultFuture {
        Box::pin(async move {
            let started = Instant::now();
            let exit_future = self.exit_future.lock().take().ok_or(Error::InvalidState)?;
            let mut report_stream = self.report_stream.lock().take();
            let mut stdout_pipe = self.stdout_pipe.lock().take();
            let mut stderr_pipe = self.stderr_pipe.lock().take();

            let mut reader = ReportStreamReader::new();
            let dumper_ref = self.dumper.as_deref();

            let (exit_code, dumps) = self
                .inner
                .run_with_timeout(
                    exit_future,
                    self.options.timeout.unwrap_or(std::time::Duration::MAX),
                    if self.options.dump_on_timeout {
                        dumper_ref
                    } else {
                        None
                    },
                    &self.dump_dir,
                    self.compress_dumps,
                )
                .await?;
            let timed_out = exit_code == crate::ExitCode::TIMEOUT;

            // Drain the report stream to EOF on an ordinary completion, but bound the drain when the run
            // was killed out from under an interposition layer that may
            // keep its write end open past the process's own exit.
            let mut message_processing_failure = None;
            if let Some(stream) = report_stream.as_mut() {
                if timed_out {
                    let drained = reader
                        .drain_on_cancel(stream, self.cancellation_drain_retries)
                        .await;
                    if !drained {
                        let msg = format!(
                            "report stream did not reach EOF within {} retries",
                            self.cancellation_drain_retries
                        );
                        tracing::warn!(pid = self.inner.pid(), "{}", msg);
                        message_processing_failure = Some(msg);
                    }
                } else {
                    reader.drain_to_eof(stream).await;
                }
            }
            reader.freeze();
            self.inner.mark_draining();

            let standard_output = drain_pipe(&mut stdout_pipe).await;
            let standard_error = drain_pipe(&mut stderr_pipe).await;

            let accounting = self.job.accounting()?;
            let surviving_child_processes: Vec<_> = reader
                .processes()
                .filter(|p| self.job.contains(p.pid))
                .cloned()
                .collect();

            let all_unexpected_file_accesses: Vec<_> = reader
                .unexpected_accesses(&*self.is_allowed)
                .cloned()
                .collect();
            let explicitly_reported_file_accesses: Vec<_> = reader
                .explicitly_reported_accesses()
                .cloned()
                .collect();
            let has_read_write_to_read = reader.has_read_write_to_read();
            let has_detours_injection_failures = reader.has_detours_failures();
            if has_detours_injection_failures {
                tracing::warn!(pid = self.inner.pid(), "interposition layer reported injection failures");
            }
            let detours_statuses = reader.detours_statuses().to_vec();
            let processes: Vec<_> = reader.processes().cloned().collect();
            let file_accesses = if self.capture_accesses {
                Some(reader.accesses().to_vec())
            } else {
                None
            };

            self.inner.mark_completed();

            Ok(SandboxedProcessResult {
                exit_code,
                killed: self.inner.killed(),
                timed_out,
                accounting,
                wall_time: started.elapsed(),
                surviving_child_processes,
                file_accesses,
                all_unexpected_file_accesses,
                explicitly_reported_file_accesses,
                has_read_write_to_read,
                processes,
                detours_statuses,
                has_detours_injection_failures,
                standard_output,
                standard_error,
                trace_file: None,
                message_processing_failure,
                dump_creation_exception: None,
                dump_file_directory: if dumps.is_empty() {
                    None
                } else {
                    Some(self.dump_dir.clone())
                },
                dumps,
                primary_process_times: None,
            })
        })
    }

    #[tracing::instrument(skip(self))]
    fn kill(&self) {
        self.inner.kill(|| Ok(()), || Ok(()));
    }

    fn pid(&self) -> i32 {
        self.inner.pid()
    }

    fn accessed_name(&self) -> &std::path::Path {
        &self.process_info.path
    }
}

/// Timeout applied to an unsandboxed run when the caller's
/// `SupervisorOptions` doesn't supply one: unlike the sandboxed path,
/// there is no job container to dump-and-kill, so an unbounded default
/// would let a caller's own bug hang the build forever.
pub const DEFAULT_UNSANDBOXED_TIMEOUT: Duration = Duration::from_secs(600);

/// A process run without any sandboxing: no job container, no report
/// stream, no dumps. Exists for the build-engine-trusts-this-tool case;
/// shares the `SandboxedProcess` trait so callers don't need a separate
/// code path.
pub struct UnsandboxedSupervisor {
    pid: i32,
    process_info: ProcessInfo,
    timeout: Duration,
    child: parking_lot::Mutex<Option<tokio::process::Child>>,
    killed: AtomicBool,
}

impl UnsandboxedSupervisor {
    pub fn new(
        pid: i32,
        process_info: ProcessInfo,
        options: &SupervisorOptions,
        child: tokio::process::Child,
    ) -> Self {
        UnsandboxedSupervisor {
            pid,
            process_info,
            timeout: options.timeout.unwrap_or(DEFAULT_UNSANDBOXED_TIMEOUT),
            child: parking_lot::Mutex::new(Some(child)),
            killed: AtomicBool::new(false),
        }
    }
}

impl SandboxedProcess for UnsandboxedSupervisor {
    fn start(&self) -> Result<(), Error> {
        // tokio::process::Command spawns already-running; nothing to resume.
        Ok(())
    }

    fn get_result(self: Box<Self>) -> ResultFuture {
        Box::pin(async move {
            let mut child = self.child.lock().take().ok_or(Error::InvalidState)?;
            let start = Instant::now();

            // Drain stdout/stderr concurrently with the exit wait rather than
            // after it: a child that fills its pipe buffer before exiting
            // would otherwise deadlock against a parent that only starts
            // reading once `wait()` returns.
            let mut stdout = child.stdout.take();
            let mut stderr = child.stderr.take();
            let stdout_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(s) = stdout.as_mut() {
                    let _ = s.read_to_end(&mut buf).await;
                }
                buf
            });
            let stderr_task = tokio::spawn(async move {
                let mut buf = Vec::new();
                if let Some(s) = stderr.as_mut() {
                    let _ = s.read_to_end(&mut buf).await;
                }
                buf
            });

            let timed_out = tokio::time::timeout(self.timeout, child.wait())
                .await
                .is_err();
            let status = if timed_out {
                self.killed.store(true, Ordering::SeqCst);
                let _ = child.start_kill();
                child.wait().await.map_err(Error::from)?
            } else {
                // The inner `wait()` already resolved inside the timeout;
                // calling it again just returns the cached exit status.
                child.wait().await.map_err(Error::from)?
            };
            let standard_output = stdout_task.await.unwrap_or_default();
            let standard_error = stderr_task.await.unwrap_or_default();

            Ok(SandboxedProcessResult {
                exit_code: if timed_out {
                    crate::ExitCode::TIMEOUT
                } else {
                    crate::ExitCode(status.code().unwrap_or(-1) as i64)
                },
                killed: self.killed.load(Ordering::SeqCst),
                timed_out,
                accounting: Default::default(),
                wall_time: start.elapsed(),
                surviving_child_processes: Vec::new(),
                file_accesses: None,
                all_unexpected_file_accesses: Vec::new(),
                explicitly_reported_file_accesses: Vec::new(),
                has_read_write_to_read: false,
                processes: Vec::new(),
                detours_statuses: Vec::new(),
                has_detours_injection_failures: false,
                standard_output,
                standard_error,
                trace_file: None,
                message_processing_failure: None,
                dump_creation_exception: None,
                dump_file_directory: None,
                dumps: Vec::new(),
                primary_process_times: None,
            })
        })
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if let Some(child) = self.child.lock().as_mut() {
            let _ = child.start_kill();
        }
    }

    fn pid(&self) -> i32 {
        self.pid
    }

    fn accessed_name(&self) -> &std::path::Path {
        &self.process_info.path
    }
}
