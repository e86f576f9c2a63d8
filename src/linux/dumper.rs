//! shells out to `gcore` (part of the `gdb` package) to
//! take a full-memory core dump of one pid, delegating to an external
//! helper and waiting on it.

use crate::dumper::{DumpError, Dumper, TreeMember};
use std::path::{Path, PathBuf};

pub struct LinuxDumper {
    gcore_path: PathBuf,
}

impl Default for LinuxDumper {
    fn default() -> Self {
        LinuxDumper {
            gcore_path: PathBuf::from("gcore"),
        }
    }
}

impl LinuxDumper {
    pub fn with_gcore_path(gcore_path: impl Into<PathBuf>) -> Self {
        LinuxDumper {
            gcore_path: gcore_path.into(),
        }
    }
}

impl Dumper for LinuxDumper {
    #[tracing::instrument(skip(self, dump_dir))]
    fn try_dump_raw(&self, pid: i32, dump_dir: &Path, file_name: &str) -> Result<PathBuf, DumpError> {
        if unsafe { libc::kill(pid, 0) } != 0 {
            return Err(DumpError::ProcessGone { pid });
        }
        std::fs::create_dir_all(dump_dir)?;
        let out_path = dump_dir.join(file_name);
        let status = std::process::Command::new(&self.gcore_path)
            .arg("-o")
            .arg(dump_dir.join(pid.to_string()))
            .arg(pid.to_string())
            .status()
            .map_err(DumpError::HelperSpawnFailed)?;
        if !status.success() {
            return Err(DumpError::HelperFailed {
                status: status.code().unwrap_or(-1),
            });
        }
        // gcore names its output "<prefix>.<pid>"; rename to the
        // tree-naming convention the caller asked for.
        let gcore_output = dump_dir.join(format!("{}.{}", pid, pid));
        if gcore_output.exists() {
            std::fs::rename(&gcore_output, &out_path)?;
        }
        Ok(out_path)
    }

    fn enumerate_tree(&self, root_pid: i32) -> Vec<TreeMember> {
        crate::dumper::enumerate_tree_via_procfs(root_pid)
    }
}
