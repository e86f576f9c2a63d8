//! `MiniDumpWriteDump`, called directly in-process
//! rather than shelling out to a helper, since DbgHelp ships as part of
//! the platform and needs no separate tool the way Linux's `gcore` is a
//! separate package. `MiniDumpWriteDump` is documented by Microsoft as not
//! thread-safe across the whole `dbghelp.dll`; every call in this process
//! is serialized behind [`DBGHELP_LOCK`], the same single-writer
//! constraint `windows/wait.rs`'s background-thread design already
//! respects for its own shared state.

use crate::dumper::{DumpError, Dumper, TreeMember};
use parking_lot::Mutex;
use std::{
    os::windows::ffi::OsStrExt,
    path::{Path, PathBuf},
};
use winapi::um::{
    dbghelp::{MiniDumpWriteDump, MiniDumpWithFullMemory},
    fileapi::{CreateFileW, CREATE_ALWAYS},
    handleapi::{CloseHandle, INVALID_HANDLE_VALUE},
    minwinbase::FILETIME,
    processthreadsapi::{GetProcessTimes, OpenProcess},
    winnt::{FILE_GENERIC_WRITE, PROCESS_ALL_ACCESS, PROCESS_QUERY_LIMITED_INFORMATION},
};

static DBGHELP_LOCK: Mutex<()> = Mutex::new(());

#[derive(Default)]
pub struct WindowsDumper;

impl Dumper for WindowsDumper {
    #[tracing::instrument(skip(self, dump_dir))]
    fn try_dump_raw(&self, pid: i32, dump_dir: &Path, file_name: &str) -> Result<PathBuf, DumpError> {
        std::fs::create_dir_all(dump_dir)?;
        let out_path = dump_dir.join(file_name);

        let process_handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid as u32) };
        if process_handle.is_null() {
            return Err(DumpError::ProcessGone { pid });
        }

        let name: Vec<u16> = out_path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let file_handle = unsafe {
            CreateFileW(
                name.as_ptr(),
                FILE_GENERIC_WRITE,
                0,
                std::ptr::null_mut(),
                CREATE_ALWAYS,
                0,
                std::ptr::null_mut(),
            )
        };
        if file_handle == INVALID_HANDLE_VALUE {
            unsafe {
                CloseHandle(process_handle);
            }
            return Err(DumpError::Io(std::io::Error::last_os_error()));
        }

        let result = {
            let _guard = DBGHELP_LOCK.lock();
            unsafe {
                MiniDumpWriteDump(
                    process_handle,
                    pid as u32,
                    file_handle,
                    MiniDumpWithFullMemory,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            }
        };

        unsafe {
            CloseHandle(file_handle);
            CloseHandle(process_handle);
        }

        if result == 0 {
            return Err(DumpError::Io(std::io::Error::last_os_error()));
        }
        Ok(out_path)
    }

    fn enumerate_tree(&self, root_pid: i32) -> Vec<TreeMember> {
        enumerate_via_toolhelp(root_pid)
    }
}

/// Converts a `FILETIME` (100ns ticks since 1601-01-01) into a
/// [`SystemTime`](std::time::SystemTime), falling back to the Unix epoch if
/// the query failed -- an epoch timestamp always sorts earlier than any
/// real `initiation_time`, so a failed lookup is treated as "assume this
/// member predates the run" rather than spuriously tripping the
/// pid-reuse guard.
fn process_start_time(pid: u32) -> std::time::SystemTime {
    const FILETIME_UNIX_EPOCH_DIFF_100NS: u64 = 116_444_736_000_000_000;

    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if handle.is_null() {
        return std::time::SystemTime::UNIX_EPOCH;
    }
    let mut creation: FILETIME = unsafe { std::mem::zeroed() };
    let mut exit: FILETIME = unsafe { std::mem::zeroed() };
    let mut kernel: FILETIME = unsafe { std::mem::zeroed() };
    let mut user: FILETIME = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        GetProcessTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user)
    };
    unsafe {
        CloseHandle(handle);
    }
    if ok == 0 {
        return std::time::SystemTime::UNIX_EPOCH;
    }
    let ticks_100ns = ((creation.dwHighDateTime as u64) << 32) | creation.dwLowDateTime as u64;
    let unix_100ns = ticks_100ns.saturating_sub(FILETIME_UNIX_EPOCH_DIFF_100NS);
    std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_nanos(unix_100ns * 100)
}

fn enumerate_via_toolhelp(_root_pid: i32) -> Vec<TreeMember> {
    use winapi::um::{
        handleapi::INVALID_HANDLE_VALUE as TH_INVALID,
        tlhelp32::{
            CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
            TH32CS_SNAPPROCESS,
        },
    };

    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
    if snapshot == TH_INVALID {
        return Vec::new();
    }

    let mut members = Vec::new();
    let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
    entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;

    let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) };
    while ok != 0 {
        let name_len = entry
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExeFile.len());
        let image_name = String::from_utf16_lossy(&entry.szExeFile[..name_len]);
        members.push(TreeMember {
            pid: entry.th32ProcessID as i32,
            parent_pid: entry.th32ParentProcessID as i32,
            image_name,
            start_time: process_start_time(entry.th32ProcessID),
        });
        ok = unsafe { Process32NextW(snapshot, &mut entry) };
    }

    unsafe {
        CloseHandle(snapshot);
    }
    members
}
