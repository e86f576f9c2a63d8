//! The job container.
//!
//! A job container owns an OS-level grouping mechanism (a cgroup on Linux,
//! a Job Object on Windows) that all descendants of the supervised process
//! are placed into, whether or not they reparent away from it, so the
//! whole tree can be enumerated, accounted and terminated atomically.
//!
//! The trait is platform-agnostic; [`crate::linux::LinuxJobContainer`] and
//! [`crate::windows::WindowsJobContainer`] hold their OS handle behind a
//! `parking_lot::RwLock` internally so that `accounting`/`live_pids` (read
//! lock, many concurrent callers) and `terminate` (write lock, exclusive)
//! satisfy the concurrency contract.

use crate::error::Error;
use std::time::Duration;

/// Bitset of resource limits a job container may enforce. Values mirror
/// the `JOB_OBJECT_LIMIT_*` flag shape used verbatim by
/// `windows/constrain.rs::Job::enable_resource_limits`, generalized so the
/// Linux cgroup backend can report which of the equivalent controls it
/// actually applied (cgroup v2 cannot report peak memory, for instance).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct JobLimitFlags(pub u32);

impl JobLimitFlags {
    pub const NONE: JobLimitFlags = JobLimitFlags(0);
    pub const ACTIVE_PROCESS_COUNT: JobLimitFlags = JobLimitFlags(1 << 0);
    pub const MEMORY: JobLimitFlags = JobLimitFlags(1 << 1);
    pub const CPU_TIME: JobLimitFlags = JobLimitFlags(1 << 2);
    pub const KILL_ON_CLOSE: JobLimitFlags = JobLimitFlags(1 << 3);

    pub fn contains(self, flag: JobLimitFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

impl std::ops::BitOr for JobLimitFlags {
    type Output = JobLimitFlags;
    fn bitor(self, rhs: JobLimitFlags) -> JobLimitFlags {
        JobLimitFlags(self.0 | rhs.0)
    }
}

/// Point-in-time resource accounting for everything currently (or ever)
/// assigned to a job container. Grounded on
/// `windows/constrain.rs::Job::resource_usage`, which reads
/// `JOBOBJECT_BASIC_ACCOUNTING_INFORMATION` +
/// `JOBOBJECT_EXTENDED_LIMIT_INFORMATION`; the Linux cgroup backend fills
/// the same shape from `cpuacct.usage`/`memory.max_usage_in_bytes` (v1) or
/// `cpu.stat`/`memory.current` (v2, where peak usage is unavailable and
/// `peak_memory_bytes` is therefore `None`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JobAccounting {
    pub active_process_count: u32,
    pub total_process_count: u64,
    pub peak_memory_bytes: Option<u64>,
    pub user_time: Duration,
    pub kernel_time: Duration,
    pub io_bytes_read: u64,
    pub io_bytes_written: u64,
}

impl JobAccounting {
    pub fn total_cpu_time(&self) -> Duration {
        self.user_time + self.kernel_time
    }
}

/// An OS-level grouping of a process tree that survives reparenting.
pub trait JobContainer: Send + Sync + std::fmt::Debug {
    /// Assigns `pid` to this container. Idempotent: assigning an already
    /// member process is not an error.
    fn add_process(&self, pid: i32) -> Result<(), Error>;

    /// True iff `pid` is currently a member.
    fn contains(&self, pid: i32) -> bool;

    /// All pids currently assigned, in no particular order.
    fn live_pids(&self) -> Vec<i32>;

    /// Current resource accounting across the whole container.
    fn accounting(&self) -> Result<JobAccounting, Error>;

    /// Which limits this backend actually enforces (a Linux cgroup v2
    /// container, for example, cannot report peak memory).
    fn supported_limits(&self) -> JobLimitFlags;

    /// Forcibly terminates every process currently in the container.
    /// Idempotent: terminating an already-terminated (or never-populated)
    /// container succeeds silently, mirroring `TerminateJobObject`'s own
    /// idempotence and `linux/cgroup.rs`'s "kill whatever's left in
    /// `cgroup.procs`" loop.
    fn terminate(&self) -> Result<(), Error>;
}
