//! Pidfd syscall wrapper.

use std::os::unix::io::RawFd;

pub type Pid = libc::pid_t;

pub(crate) fn pidfd_open(pid: Pid) -> std::io::Result<RawFd> {
    let res = unsafe { libc::syscall(434, pid, 0) };
    if res >= 0 {
        Ok(res as _)
    } else {
        Err(std::io::Error::last_os_error())
    }
}
