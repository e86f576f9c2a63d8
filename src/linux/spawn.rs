//! fork+exec spawn-suspended, implementing the "spawn suspended, assign
//! to job container, then resume" sequencing.
//!
//! Stdio wiring is plain dup2-based redirection (`/dev/null` for the null
//! case, a pipe for the piped case), and the child is launched with a
//! direct `fork`+`execve` rather than any zygote-forks-a-zygote protocol:
//! namespace/seccomp policy enforcement belongs to the interposition
//! layer, which this crate invokes out of band, so there is nothing left
//! for a zygote step to do. The child stops itself with `SIGSTOP`
//! immediately after `fork`, before `execve`, so the parent can assign it
//! to the job container while it is guaranteed not to have executed a
//! single instruction of the target binary yet; [`resume_pid`] sends
//! `SIGCONT`.

use crate::{
    command::{ProcessInfo, Stdio},
    error::Error,
    linux::pipe::{setup_pipe, LinuxReadPipe, LinuxWritePipe},
};
use std::{
    ffi::{CString, OsStr},
    os::unix::{ffi::OsStrExt, io::RawFd},
};

pub struct SpawnedProcess {
    pub pid: libc::pid_t,
    pub stdin: Option<LinuxWritePipe>,
    pub stdout: Option<LinuxReadPipe>,
    pub stderr: Option<LinuxReadPipe>,
}

impl SpawnedProcess {
    /// Sends `SIGCONT`, resuming a child that stopped itself right after
    /// `fork`. Matches `DetouredProcess::start`'s `resume` callback shape.
    pub fn resume(&self) -> Result<(), Error> {
        resume_pid(self.pid)
    }
}

/// Standalone form of [`SpawnedProcess::resume`], for callers that need a
/// `'static` resume closure after having already moved the rest of a
/// [`SpawnedProcess`] elsewhere (its pid is `Copy`, so it outlives the
/// struct it came from).
pub fn resume_pid(pid: libc::pid_t) -> Result<(), Error> {
    let ret = unsafe { libc::kill(pid, libc::SIGCONT) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn to_cstring(s: &OsStr) -> CString {
    CString::new(s.as_bytes()).expect("argument contains a NUL byte")
}

/// One redirected standard stream, split into "what the child inherits as
/// its fd N" and "what the parent keeps to talk to the child", mirroring
/// `linux.rs::handle_input_io`/`handle_output_io`'s pipe-vs-null split.
struct StreamEnds {
    child_fd: Option<RawFd>,
    parent_read: Option<RawFd>,
    parent_write: Option<RawFd>,
}

fn open_null(flags: i32) -> Result<RawFd, Error> {
    let fd = unsafe { libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, flags) };
    if fd == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(fd)
}

fn setup_input_stream(spec: Stdio) -> Result<StreamEnds, Error> {
    match spec {
        Stdio::Null => Ok(StreamEnds {
            child_fd: Some(open_null(libc::O_RDONLY)?),
            parent_read: None,
            parent_write: None,
        }),
        Stdio::Inherit => Ok(StreamEnds {
            child_fd: None,
            parent_read: None,
            parent_write: None,
        }),
        Stdio::Piped => {
            let mut read_end = -1;
            let mut write_end = -1;
            setup_pipe(&mut read_end, &mut write_end)?;
            Ok(StreamEnds {
                child_fd: Some(read_end),
                parent_read: None,
                parent_write: Some(write_end),
            })
        }
    }
}

fn setup_output_stream(spec: Stdio) -> Result<StreamEnds, Error> {
    match spec {
        Stdio::Null => Ok(StreamEnds {
            child_fd: Some(open_null(libc::O_WRONLY)?),
            parent_read: None,
            parent_write: None,
        }),
        Stdio::Inherit => Ok(StreamEnds {
            child_fd: None,
            parent_read: None,
            parent_write: None,
        }),
        Stdio::Piped => {
            let mut read_end = -1;
            let mut write_end = -1;
            setup_pipe(&mut read_end, &mut write_end)?;
            Ok(StreamEnds {
                child_fd: Some(write_end),
                parent_read: Some(read_end),
                parent_write: None,
            })
        }
    }
}

/// Spawns `info`, stopping the child with `SIGSTOP` before `execve` runs
/// and leaving it there until [`SpawnedProcess::resume`] is called.
///
/// # Safety
/// Calls `fork`; the child path between `fork` and `execve` only calls
/// async-signal-safe functions, per the usual fork+exec contract.
pub unsafe fn spawn_suspended(info: &ProcessInfo) -> Result<SpawnedProcess, Error> {
    let stdin = setup_input_stream(info.stdin)?;
    let stdout = setup_output_stream(info.stdout)?;
    let stderr = setup_output_stream(info.stderr)?;

    let path = to_cstring(info.path.as_os_str());
    let mut argv: Vec<CString> = vec![path.clone()];
    argv.extend(info.args.iter().map(|a| to_cstring(a)));
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    let envp: Vec<CString> = info.env.iter().map(|e| to_cstring(e)).collect();
    let mut envp_ptrs: Vec<*const libc::c_char> = envp.iter().map(|e| e.as_ptr()).collect();
    envp_ptrs.push(std::ptr::null());

    let cwd = to_cstring(info.current_dir.as_os_str());

    let pid = libc::fork();
    if pid < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    if pid == 0 {
        // Child: async-signal-safe path only, from here to execve.
        libc::chdir(cwd.as_ptr());
        if let Some(fd) = stdin.child_fd {
            libc::dup2(fd, 0);
        }
        if let Some(fd) = stdout.child_fd {
            libc::dup2(fd, 1);
        }
        if let Some(fd) = stderr.child_fd {
            libc::dup2(fd, 2);
        }
        libc::raise(libc::SIGSTOP);
        libc::execve(path.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
        libc::_exit(127);
    }

    // Parent: close the fds handed off to the child.
    for fd in [stdin.child_fd, stdout.child_fd, stderr.child_fd]
        .into_iter()
        .flatten()
    {
        libc::close(fd);
    }

    // Block until the child has actually stopped itself, so the caller's
    // subsequent job-container assignment can't race a child that is still
    // between fork and raise(SIGSTOP).
    let mut status = 0;
    libc::waitpid(pid, &mut status, libc::WUNTRACED);

    Ok(SpawnedProcess {
        pid,
        stdin: stdin.parent_write.map(LinuxWritePipe::new),
        stdout: stdout.parent_read.map(LinuxReadPipe::new),
        stderr: stderr.parent_read.map(LinuxReadPipe::new),
    })
}
