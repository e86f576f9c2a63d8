/*!
 * This crate provides a sandboxed process supervisor: it launches an
 * external process tree inside an OS job container, optionally collects
 * file-system access records reported by an injected interposition layer,
 * enforces a timeout with a dump-then-kill escalation, and produces a
 * structured result describing exit status, resource usage, surviving
 * children and any memory dumps taken on abnormal termination.
 *
 * # Platform support
 * _warning_: not all features are supported by all backends. See the
 * documentation of the particular platform module to know more.
 *
 * # Scope
 * This crate does not implement the interposition library itself (the
 * in-child component that rewrites system calls and reports file
 * accesses) -- it only writes/reads that component's control and report
 * pipes. It also does not define build semantics, cache keys or
 * dependency analysis; it is the leaf executor a build engine drives.
 */
#![cfg_attr(minion_nightly, feature(unsafe_block_in_unsafe_fn))]
#![cfg_attr(minion_nightly, warn(unsafe_op_in_unsafe_fn))]

mod access;
mod blocking_io;
mod command;
mod detoured_process;
mod dumper;
mod error;
mod job_container;
mod process_info;
mod report_reader;
mod result;
mod settings;
mod supervisor;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "windows")]
pub mod windows;

pub mod erased;

pub use access::{
    FileAccess, FileAccessStatus, FileAccessStatusMethod, OpenedAttributes, Operation,
    RequestedAccess, USN_ABSENT,
};
pub use command::{ProcessInfo, ProcessInfoBuilder, Stdio};
pub use detoured_process::{DetouredProcess, DetouredProcessState, SuspendAccounting};
pub use dumper::{DumpError, DumpOutcome, Dumper};
pub use error::{Error, ErrorKind};
pub use job_container::{JobAccounting, JobContainer, JobLimitFlags};
pub use process_info::ReportedProcess;
pub use report_reader::{DetouringStatus, ReportEvent, ReportStreamReader};
pub use result::SandboxedProcessResult;
pub use settings::{Settings, SupervisorOptions};
pub use supervisor::{ResultFuture, SandboxedProcess, SandboxedSupervisor, UnsandboxedSupervisor};

#[cfg(target_os = "linux")]
pub use crate::linux::LinuxJobContainer;
#[cfg(target_os = "windows")]
pub use crate::windows::WindowsJobContainer;

use std::time::Duration;

/// Child process exit code. `i64` so a distinguished sentinel (used when the
/// supervisor kills the tree after a timeout) never collides with a real
/// exit status.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExitCode(pub i64);

impl ExitCode {
    /// By convention programs return this code on success.
    pub const OK: ExitCode = ExitCode(0);
    /// Returned when the process was killed by the supervisor after a
    /// timeout, rather than exiting on its own.
    pub const TIMEOUT: ExitCode = ExitCode(0x7eaddeadbeeff00d_u64 as i64);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

/// Command line length caps, one per platform. Exceeding these is a
/// precondition violation, not a runtime error.
pub mod cmdline_limits {
    pub const WINDOWS: usize = 32_767;
    pub const MACOS: usize = 262_144;
    pub const LINUX: usize = 2_097_152;

    #[cfg(target_os = "windows")]
    pub const MAX: usize = WINDOWS;
    #[cfg(target_os = "macos")]
    pub const MAX: usize = MACOS;
    #[cfg(all(unix, not(target_os = "macos")))]
    pub const MAX: usize = LINUX;
}

/// A suspension-credit deadline has no fixed upper bound: it extends by
/// however long the tree was frozen. Exposed so callers reasoning about
/// worst-case wall-clock budgets can account for it.
pub const SUSPEND_CREDIT_UNBOUNDED: Option<Duration> = None;

fn to_std_stdio(spec: Stdio) -> std::process::Stdio {
    match spec {
        Stdio::Inherit => std::process::Stdio::inherit(),
        Stdio::Null => std::process::Stdio::null(),
        Stdio::Piped => std::process::Stdio::piped(),
    }
}

/// Launches `info` without any sandboxing, for the build-engine-trusts-this-tool
/// case: no job container, no report stream, no dumps, just a
/// `tokio::process::Command` raced against `options.timeout` (or
/// [`supervisor::DEFAULT_UNSANDBOXED_TIMEOUT`] when none is given). Platform
/// agnostic, unlike [`linux::spawn_sandboxed`]/`windows::spawn_sandboxed`,
/// since `tokio::process::Command` already abstracts the OS spawn call.
pub fn spawn_unsandboxed(
    info: ProcessInfo,
    options: SupervisorOptions,
) -> Result<UnsandboxedSupervisor, Error> {
    let mut command = tokio::process::Command::new(&info.path);
    command
        .args(&info.args)
        .current_dir(&info.current_dir)
        .stdin(to_std_stdio(info.stdin))
        .stdout(to_std_stdio(info.stdout))
        .stderr(to_std_stdio(info.stderr));
    if !info.env.is_empty() {
        command.env_clear();
        for pair in &info.env {
            let text = pair.to_string_lossy();
            if let Some((key, value)) = text.split_once('=') {
                command.env(key, value);
            }
        }
    }
    let child = command.spawn().map_err(Error::from)?;
    let pid = child.id().ok_or(Error::InvalidState)? as i32;
    Ok(UnsandboxedSupervisor::new(pid, info, &options, child))
}
