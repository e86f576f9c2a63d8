//! The result record: one aggregate struct describing how a supervised
//! run ended, with fields for exit status, resource accounting, surviving
//! children, dump outcomes, detours diagnostics, and the access/process
//! streams themselves.

use crate::{
    access::FileAccess,
    dumper::{DumpError, DumpOutcome},
    job_container::JobAccounting,
    process_info::ReportedProcess,
    report_reader::DetouringStatus,
    ExitCode,
};
use std::{
    path::PathBuf,
    time::Duration,
};

/// Everything known about one supervised run once it has completed.
#[derive(Debug)]
pub struct SandboxedProcessResult {
    pub exit_code: ExitCode,
    /// Set iff the public `kill()` path (not the timeout path) terminated
    /// the run. A run can be both `killed` and `timed_out` if the
    /// timeout's own kill step is what fired.
    pub killed: bool,
    pub timed_out: bool,
    pub accounting: JobAccounting,
    pub wall_time: Duration,
    /// Processes the job container still held at termination time, i.e.
    /// grandchildren that outlived the direct child. Empty once the container has
    /// been fully drained.
    pub surviving_child_processes: Vec<ReportedProcess>,
    /// `None` if the caller did not request full access-record capture
    /// (null if not requested).
    pub file_accesses: Option<Vec<FileAccess>>,
    /// Denied accesses not covered by the caller's allow-list predicate.
    pub all_unexpected_file_accesses: Vec<FileAccess>,
    pub explicitly_reported_file_accesses: Vec<FileAccess>,
    pub has_read_write_to_read: bool,
    pub processes: Vec<ReportedProcess>,
    pub detours_statuses: Vec<DetouringStatus>,
    pub has_detours_injection_failures: bool,
    pub standard_output: Vec<u8>,
    pub standard_error: Vec<u8>,
    pub trace_file: Option<PathBuf>,
    /// Set when a pipe read could not make progress within the
    /// cancellation-drain retry bound .
    pub message_processing_failure: Option<String>,
    pub dump_creation_exception: Option<DumpError>,
    pub dump_file_directory: Option<PathBuf>,
    pub dumps: Vec<DumpOutcome>,
    /// Creation/exit/user/kernel times of the directly-launched process,
    /// as reported by the job container or (unsandboxed) the OS wait call.
    pub primary_process_times: Option<ReportedProcess>,
}

impl SandboxedProcessResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.killed && self.exit_code.is_success()
    }

    pub fn had_write_violation(&self) -> bool {
        self.file_accesses
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .any(FileAccess::is_write_violation)
    }

    pub fn dump_failures(&self) -> impl Iterator<Item = &DumpOutcome> {
        self.dumps.iter().filter(|d| !d.is_success())
    }
}
