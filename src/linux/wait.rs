//! a pidfd-backed [`crate::detoured_process::ExitFuture`].
//!
//! Grounded on `linux/wait.rs::WaitFuture`'s `AsyncFd<Fd>`-over-pidfd shape
//! (so only one thread backs every waiting future, via tokio's reactor),
//! rewritten to reap the exit status itself via `waitpid` once the pidfd
//! becomes readable, instead of delegating to a `LinuxSandbox` that no
//! longer exists.

use crate::{error::Error, linux::fd::Fd, linux::util::Pid, ExitCode};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::unix::AsyncFd;

/// Resolves once the process identified by `pid` has exited. On kernels
/// without pidfd support (pre-5.3) a caller should fall back to a polling
/// thread; this crate targets pidfd-capable kernels only.
pub struct LinuxWaitFuture {
    inner: AsyncFd<Fd>,
    pid: Pid,
}

impl LinuxWaitFuture {
    pub fn new(pid: Pid) -> std::io::Result<Self> {
        let raw = crate::linux::util::pidfd_open(pid)?;
        let inner = AsyncFd::new(Fd::new(raw))?;
        Ok(LinuxWaitFuture { inner, pid })
    }
}

fn reap(pid: Pid) -> Result<ExitCode, Error> {
    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    if libc::WIFEXITED(status) {
        Ok(ExitCode(libc::WEXITSTATUS(status) as i64))
    } else if libc::WIFSIGNALED(status) {
        Ok(ExitCode(-(libc::WTERMSIG(status) as i64)))
    } else {
        Ok(ExitCode(-1))
    }
}

impl std::future::Future for LinuxWaitFuture {
    type Output = Result<ExitCode, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);
        match this.inner.poll_read_ready(cx) {
            Poll::Ready(Ok(_)) => Poll::Ready(reap(this.pid)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(e.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}
