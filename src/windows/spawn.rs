//! `CreateProcessW(..., CREATE_SUSPENDED, ...)` spawn, implementing the
//! "spawn suspended, assign to job container, then resume" sequencing.
//!
//! Stdio wiring follows the usual `CreateProcessW` shape (quoted argv,
//! an encoded environment block, inheritable handles in `STARTUPINFOW`),
//! without any `PROC_THREAD_ATTRIBUTE_LIST`/`SECURITY_CAPABILITIES`
//! plumbing: this crate's job container groups and accounts processes, it
//! does not itself construct their security context, so there is no
//! AppContainer profile to attach. `CREATE_SUSPENDED` means the process
//! never runs a single instruction until [`SpawnedProcess::resume`] calls
//! `ResumeThread`, once the caller has assigned it to its job container --
//! the direct analog of Linux's `SIGSTOP`-before-`execve` plus `SIGCONT`.

use crate::{
    command::{ProcessInfo, Stdio as CommandStdio},
    error::Error,
    windows::{
        pipe::{self, ReadPipe, WritePipe},
        util::OwnedHandle,
        Cvt,
    },
};
use std::{
    ffi::{OsStr, OsString},
    os::windows::{ffi::OsStrExt, io::IntoRawHandle},
};
use winapi::{
    shared::minwindef::TRUE,
    um::{
        fileapi::{CreateFileW, OPEN_EXISTING},
        handleapi::{CloseHandle, INVALID_HANDLE_VALUE},
        minwinbase::SECURITY_ATTRIBUTES,
        processthreadsapi::{
            CreateProcessW, ResumeThread, STARTUPINFOW, PROCESS_INFORMATION,
        },
        winbase::{CREATE_SUSPENDED, CREATE_UNICODE_ENVIRONMENT, STARTF_USESTDHANDLES},
        winnt::{FILE_GENERIC_READ, FILE_GENERIC_WRITE, HANDLE},
    },
};

pub struct SpawnedProcess {
    pub pid: u32,
    pub process_handle: OwnedHandle,
    pub thread_handle: OwnedHandle,
    pub stdin: Option<WritePipe>,
    pub stdout: Option<ReadPipe>,
    pub stderr: Option<ReadPipe>,
}

impl SpawnedProcess {
    /// Resumes the suspended primary thread, matching
    /// `DetouredProcess::start`'s `resume` callback shape.
    pub fn resume(&self) -> Result<(), Error> {
        resume_thread(&self.thread_handle)
    }
}

/// Standalone form of [`SpawnedProcess::resume`], for callers that need a
/// `'static` resume closure after having already moved the rest of a
/// [`SpawnedProcess`] elsewhere.
pub fn resume_thread(thread_handle: &OwnedHandle) -> Result<(), Error> {
    let ret = unsafe { ResumeThread(thread_handle.as_raw()) };
    if ret == u32::max_value() {
        return Err(crate::windows::Error::last().into());
    }
    Ok(())
}

fn open_nul(writable: bool) -> Result<HANDLE, Error> {
    let name: Vec<u16> = OsStr::new("NUL")
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let access = if writable {
        FILE_GENERIC_WRITE
    } else {
        FILE_GENERIC_READ
    };
    let mut sa: SECURITY_ATTRIBUTES = unsafe { std::mem::zeroed() };
    sa.nLength = std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32;
    sa.bInheritHandle = TRUE;
    let handle = unsafe {
        CreateFileW(
            name.as_ptr(),
            access,
            0,
            &mut sa,
            OPEN_EXISTING,
            0,
            std::ptr::null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return Err(crate::windows::Error::last().into());
    }
    Ok(handle)
}

struct StreamEnds {
    child_handle: Option<HANDLE>,
    parent_read: Option<ReadPipe>,
    parent_write: Option<WritePipe>,
}

fn setup_input_stream(spec: CommandStdio) -> Result<StreamEnds, Error> {
    match spec {
        CommandStdio::Null => Ok(StreamEnds {
            child_handle: Some(open_nul(false)?),
            parent_read: None,
            parent_write: None,
        }),
        CommandStdio::Inherit => Ok(StreamEnds {
            child_handle: None,
            parent_read: None,
            parent_write: None,
        }),
        CommandStdio::Piped => {
            let (reader, writer) =
                pipe::make(pipe::InheritKind::Allow).map_err(crate::windows::Error::from)?;
            Ok(StreamEnds {
                child_handle: Some(reader.into_raw_handle()),
                parent_read: None,
                parent_write: Some(writer),
            })
        }
    }
}

fn setup_output_stream(spec: CommandStdio) -> Result<StreamEnds, Error> {
    match spec {
        CommandStdio::Null => Ok(StreamEnds {
            child_handle: Some(open_nul(true)?),
            parent_read: None,
            parent_write: None,
        }),
        CommandStdio::Inherit => Ok(StreamEnds {
            child_handle: None,
            parent_read: None,
            parent_write: None,
        }),
        CommandStdio::Piped => {
            let (reader, writer) =
                pipe::make(pipe::InheritKind::Allow).map_err(crate::windows::Error::from)?;
            Ok(StreamEnds {
                child_handle: Some(writer.into_raw_handle()),
                parent_read: Some(reader),
                parent_write: None,
            })
        }
    }
}

fn ascii_to_u16(ch: u8) -> u16 {
    let ch = ch as char;
    let mut out: u16 = 0;
    ch.encode_utf16(std::slice::from_mut(&mut out));
    out
}

fn quote_arg(out: &mut Vec<u16>, data: &OsStr) {
    // FIXME incorrectly handles quotes.
    out.push(ascii_to_u16(b' '));
    out.push(ascii_to_u16(b'"'));
    for ch in data.encode_wide() {
        assert_ne!(ch, ascii_to_u16(b'"'));
        out.push(ch);
    }
    out.push(ascii_to_u16(b'"'));
}

#[derive(Eq, PartialEq)]
enum EncodeEnvResult {
    Ok,
    Partial,
}

/// Returns None if data contains zero char.
fn encode_env(data: &[OsString]) -> (Vec<u16>, EncodeEnvResult) {
    let mut res = EncodeEnvResult::Ok;
    let mut capacity = 1;
    for item in data {
        capacity += item.encode_wide().count() + 1;
    }
    let mut out = Vec::with_capacity(capacity);
    for item in data {
        for ch in item.encode_wide() {
            if ch == 0 {
                res = EncodeEnvResult::Partial;
                continue;
            }
            out.push(ch);
        }
        out.push(0);
    }
    out.push(0);
    (out, res)
}

/// Spawns `info` with `CREATE_SUSPENDED`, leaving the primary thread
/// stopped until [`SpawnedProcess::resume`] is called.
pub fn spawn_suspended(info: &ProcessInfo) -> Result<SpawnedProcess, Error> {
    let stdin = setup_input_stream(info.stdin)?;
    let stdout = setup_output_stream(info.stdout)?;
    let stderr = setup_output_stream(info.stderr)?;

    let mut startup_info: STARTUPINFOW = unsafe { std::mem::zeroed() };
    startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
    startup_info.dwFlags = STARTF_USESTDHANDLES;
    if let Some(h) = stdin.child_handle {
        startup_info.hStdInput = h;
    }
    if let Some(h) = stdout.child_handle {
        startup_info.hStdOutput = h;
    }
    if let Some(h) = stderr.child_handle {
        startup_info.hStdError = h;
    }

    let application_name: Vec<u16> = info.path.as_os_str().encode_wide().collect();
    let mut cmd_line = application_name.clone();
    for arg in &info.args {
        quote_arg(&mut cmd_line, arg.as_os_str());
    }
    cmd_line.push(0);
    let (mut env, env_status) = encode_env(&info.env);
    if let EncodeEnvResult::Partial = env_status {
        tracing::warn!("skipped zero chars in provided environment");
    }
    let cwd: Vec<u16> = info
        .current_dir
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();

    let mut process_info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };
    let creation_flags = CREATE_UNICODE_ENVIRONMENT | CREATE_SUSPENDED;
    let spawn_result = unsafe {
        Cvt::nonzero(CreateProcessW(
            application_name.as_ptr(),
            cmd_line.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            TRUE,
            creation_flags,
            env.as_mut_ptr().cast(),
            cwd.as_ptr(),
            &mut startup_info,
            &mut process_info,
        ))
    };

    for h in [stdin.child_handle, stdout.child_handle, stderr.child_handle]
        .into_iter()
        .flatten()
    {
        unsafe {
            CloseHandle(h);
        }
    }

    spawn_result.map_err(crate::windows::Error::from)?;

    Ok(SpawnedProcess {
        pid: process_info.dwProcessId,
        process_handle: OwnedHandle::new(process_info.hProcess),
        thread_handle: OwnedHandle::new(process_info.hThread),
        stdin: stdin.parent_write,
        stdout: stdout.parent_read,
        stderr: stderr.parent_read,
    })
}
