use std::os::unix::prelude::{AsRawFd, RawFd};

/// An owned file descriptor, closed on drop. Used to give the pidfd
/// returned by [`crate::linux::util::pidfd_open`] an `AsRawFd` impl so it
/// can be wrapped in `tokio::io::unix::AsyncFd`.
pub struct Fd(RawFd);

impl AsRawFd for Fd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Fd {
    pub fn new(inner: RawFd) -> Self {
        Fd(inner)
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}
