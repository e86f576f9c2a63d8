//! Linux platform backend: the cgroup-backed job container
//! ([`LinuxJobContainer`]) and the spawn/wait primitives
//! ([`spawn_suspended`], [`LinuxWaitFuture`]).
//!
//! _warning_: peak memory accounting is unavailable under cgroup v2 (see
//! [`JobAccounting::peak_memory_bytes`](crate::JobAccounting)); hosts that
//! need it must run cgroup v1.

pub mod dumper;
mod fd;
pub mod job_container;
mod pipe;
pub mod spawn;
mod util;
mod wait;

pub use dumper::LinuxDumper;
pub use job_container::LinuxJobContainer;
pub use spawn::{spawn_suspended, resume_pid, SpawnedProcess};
pub use wait::LinuxWaitFuture;

use crate::{
    blocking_io::BlockingReader,
    command::ProcessInfo,
    error::Error,
    job_container::JobContainer,
    settings::{Settings, SupervisorOptions},
    supervisor::SandboxedSupervisor,
};
use std::sync::Arc;

/// Spawns `info` suspended, assigns it to a freshly created job container
/// named `id`, then resumes it -- the full sequence required between
/// "spawn suspended" and "running", with the job
/// assignment happening while the child cannot yet have escaped it.
pub fn spawn_and_assign(
    info: &ProcessInfo,
    settings: &Settings,
    id: &str,
    memory_limit_bytes: Option<u64>,
) -> Result<(SpawnedProcess, Arc<LinuxJobContainer>), Error> {
    let job = Arc::new(LinuxJobContainer::create(settings, id, memory_limit_bytes)?);
    let spawned = unsafe { spawn_suspended(info)? };
    job.add_process(spawned.pid)?;
    Ok((spawned, job))
}

/// Composes [`spawn_and_assign`] with a pidfd-backed exit future and a
/// `gcore`-backed dumper into a ready-to-start [`SandboxedSupervisor`].
/// No report stream is wired up here: synthesizing one requires an
/// interposition layer this crate doesn't implement, so `file_accesses`
/// on the eventual result is always `None` for processes launched this
/// way. Callers that do have a report-pipe read end (piped in from their
/// own interposition layer) should call [`spawn_and_assign`] and
/// `SandboxedSupervisor::new` directly instead.
pub fn spawn_sandboxed(
    info: ProcessInfo,
    settings: &Settings,
    options: SupervisorOptions,
    id: &str,
) -> Result<SandboxedSupervisor, Error> {
    let dump_on_timeout = options.dump_on_timeout;
    let (spawned, job) = spawn_and_assign(&info, settings, id, options.memory_limit_bytes)?;
    let pid = spawned.pid;
    let exit_future = Box::pin(LinuxWaitFuture::new(pid)?);
    let stdout_pipe = spawned
        .stdout
        .map(|p| Box::pin(BlockingReader::new(p)) as std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>);
    let stderr_pipe = spawned
        .stderr
        .map(|p| Box::pin(BlockingReader::new(p)) as std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>);
    let dumper: Option<Arc<dyn crate::dumper::Dumper>> =
        if dump_on_timeout { Some(Arc::new(LinuxDumper::default())) } else { None };
    Ok(SandboxedSupervisor::new(
        pid,
        info,
        options,
        job,
        settings.dump_dir.clone(),
        settings.compress_dumps,
        settings.cancellation_drain_retries,
        exit_future,
        None,
        stdout_pipe,
        stderr_pipe,
        dumper,
        move || resume_pid(pid),
    ))
}
