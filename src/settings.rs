//! Ambient configuration: a plain struct with a `Default` impl and an
//! env-var override for the one path that commonly needs overriding in
//! CI containers, scoped to what this crate's modules actually read
//! rather than cgroup internals specifically.

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Overrides the cgroupfs mount path this crate's Linux job container
/// backend probes, for CI containers that mount it somewhere nonstandard.
pub const CGROUPFS_OVERRIDE_ENV: &str = "SANDBOXED_PROCESS_CGROUPFS";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// All job containers created by this crate nest under this prefix.
    pub cgroup_prefix: PathBuf,

    /// cgroupfs mount path; `None` probes v1/v2 mounts at runtime unless
    /// [`CGROUPFS_OVERRIDE_ENV`] is set.
    pub cgroupfs: Option<PathBuf>,

    /// Directory memory dumps are written to before optional compression.
    pub dump_dir: PathBuf,

    /// Whether dumps are compressed into a `.zip` after being written.
    pub compress_dumps: bool,

    /// Upper bound on zero-delay read attempts while draining the report
    /// stream after a cancellation (cancellation retry bound).
    pub cancellation_drain_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            cgroup_prefix: "/sandboxed-process".into(),
            cgroupfs: std::env::var_os(CGROUPFS_OVERRIDE_ENV).map(PathBuf::from),
            dump_dir: std::env::temp_dir(),
            compress_dumps: true,
            cancellation_drain_retries: crate::report_reader::CANCELLATION_DRAIN_RETRIES,
        }
    }
}

impl Settings {
    pub fn with_cgroup_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.cgroup_prefix = prefix.into();
        self
    }

    pub fn with_dump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_dir = dir.into();
        self
    }
}

/// Timeout and dump configuration for one supervised run.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub timeout: Option<Duration>,
    pub memory_limit_bytes: Option<u64>,
    pub dump_on_timeout: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisorOptions {
            timeout: None,
            memory_limit_bytes: None,
            dump_on_timeout: true,
        }
    }
}
