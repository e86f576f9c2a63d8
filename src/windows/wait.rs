//! A background-thread-backed
//! [`crate::detoured_process::ExitFuture`].
//!
//! One background thread polls `WaitForSingleObject` and wakes a waker on
//! exit; the `Output` type is the crate-wide [`crate::error::Error`] (via
//! the `From<windows::Error>` bridge in `windows/error.rs`), so this
//! future satisfies [`crate::detoured_process::ExitFuture`] alongside the
//! Linux pidfd-backed one.

use crate::{
    error::Error,
    windows::{util::OwnedHandle, Cvt},
    ExitCode,
};
use futures_util::task::AtomicWaker;
use std::{
    pin::Pin,
    sync::{
        atomic::{
            AtomicBool,
            Ordering::{Acquire, Release},
        },
        Arc,
    },
    task::{Context, Poll},
};
use winapi::{
    shared::winerror::WAIT_TIMEOUT,
    um::{
        minwinbase::STILL_ACTIVE,
        processthreadsapi::{GetExitCodeProcess, GetProcessId},
        synchapi::WaitForSingleObject,
        winbase::WAIT_OBJECT_0,
    },
};

/// Resolves when the supervised process has exited.
pub struct WindowsWaitFuture {
    child: OwnedHandle,
    shared: Option<Arc<Shared>>,
}

impl WindowsWaitFuture {
    pub fn new(child: OwnedHandle) -> Self {
        WindowsWaitFuture {
            child,
            shared: None,
        }
    }

    fn get_exit_code(&self) -> Result<Option<ExitCode>, Error> {
        let mut exit_code = 0;
        unsafe {
            Cvt::nonzero(GetExitCodeProcess(self.child.as_raw(), &mut exit_code))
                .map_err(crate::windows::Error::from)?;
        }
        if exit_code == STILL_ACTIVE {
            return Ok(None);
        }
        Ok(Some(ExitCode(exit_code.into())))
    }
}

impl std::future::Future for WindowsWaitFuture {
    type Output = Result<ExitCode, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);

        if this.shared.is_none() {
            let shared = Shared {
                waker: AtomicWaker::new(),
                error: AtomicBool::new(false),
            };
            shared.waker.register(cx.waker());

            let shared = Arc::new(shared);
            this.shared.replace(shared.clone());

            let thread_name = unsafe {
                format!(
                    "sandboxed-process-wait-{}",
                    GetProcessId(this.child.as_raw())
                )
            };

            let child_handle = match this.child.try_clone() {
                Ok(cl) => cl,
                Err(err) => return Poll::Ready(Err(crate::windows::Error::from(err).into())),
            };

            std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || background_waiter(shared, child_handle))
                .expect("failed to spawn wait thread");
        }

        let shared = this.shared.as_mut().expect("initialized above");
        shared.waker.register(cx.waker());

        if shared.error.load(Acquire) {
            return Poll::Ready(Err(crate::windows::Error::BackgroundThreadFailure.into()));
        }

        if let Some(ec) = this.get_exit_code().transpose() {
            return Poll::Ready(ec);
        }

        Poll::Pending
    }
}

struct Shared {
    waker: AtomicWaker,
    error: AtomicBool,
}

fn background_waiter(shared: Arc<Shared>, handle: OwnedHandle) {
    loop {
        if Arc::strong_count(&shared) == 1 {
            // the WindowsWaitFuture (and its clone held by poll) is gone.
            return;
        }

        let res = unsafe { WaitForSingleObject(handle.as_raw(), 1000) };
        if res == WAIT_OBJECT_0 {
            shared.waker.wake();
            return;
        }
        if res == WAIT_TIMEOUT {
            continue;
        }
        tracing::error!(
            return_value = res,
            "unexpected return from WaitForSingleObject",
        );
        shared.error.store(true, Release);
        shared.waker.wake();
        return;
    }
}
