//! Error taxonomy
//!
//! Exceptions are reserved for precondition violations and the fatal-exit
//! path inside the completion callback; everything
//! else a caller observes comes back as a flag on `SandboxedProcessResult`.
//! The typed `Error` below exists for the boundary calls that *can* fail
//! outright: spawning, dumping, and the one-shot state-machine guards.

use crate::dumper::DumpError;

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum ErrorKind {
    /// Caller violated a contract: start twice, kill before start, a
    /// command line over the platform cap. Never retried.
    Precondition,
    /// The OS could not create the child, attach it to the job container,
    /// or inject the interposition layer. Caller may retry.
    Spawn,
    /// A dump could not be written. The overall run still completes; this
    /// is reported, not propagated.
    Dump,
    /// Bug in this crate or its caller, or an OS call failed in a way we
    /// don't have a more specific variant for.
    System,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("operation requires the process to be in a different state")]
    InvalidState,
    #[error("start() was already called on this process")]
    AlreadyStarted,
    #[error("command line exceeds the {limit}-character platform limit ({len} chars)")]
    CommandLineTooLong { len: usize, limit: usize },
    #[error("failed to create child process")]
    ProcessCreationFailed,
    #[error("failed to assign child process to job container")]
    JobAssignmentFailed,
    #[error("failed to inject interposition layer")]
    InjectionFailed,
    #[error("requested operation is not supported by this backend")]
    NotSupported,
    #[error("system call failed in undesired fashion (error code {code})")]
    Syscall { code: i32 },
    #[error("io error")]
    Io {
        #[from]
        cause: std::io::Error,
    },
    #[error("job container is gone")]
    JobContainerGone,
    #[error("dump failed")]
    Dump {
        #[from]
        cause: DumpError,
    },
    #[error("unknown error")]
    Unknown,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidState | Error::AlreadyStarted | Error::CommandLineTooLong { .. } => {
                ErrorKind::Precondition
            }
            Error::ProcessCreationFailed
            | Error::JobAssignmentFailed
            | Error::InjectionFailed => ErrorKind::Spawn,
            Error::Dump { .. } => ErrorKind::Dump,
            Error::NotSupported
            | Error::Syscall { .. }
            | Error::Io { .. }
            | Error::JobContainerGone
            | Error::Unknown => ErrorKind::System,
        }
    }

    pub fn is_precondition(&self) -> bool {
        self.kind() == ErrorKind::Precondition
    }

    pub fn is_spawn_failure(&self) -> bool {
        self.kind() == ErrorKind::Spawn
    }
}
