//! The memory dumper.
//!
//! The Linux backend shells out to an external dumping tool and waits on
//! it; the Windows backend wraps a single unsafe, OS-singleton FFI
//! surface (dbghelp, explicitly documented by Microsoft as not safely
//! callable from more than one thread of the whole process at a time)
//! behind a `parking_lot::Mutex`. The tree-walk fallback -- used when the
//! job container's own live-pid set is unavailable -- reads process
//! state via `procfs`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::SystemTime,
};

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("target process {pid} no longer exists")]
    ProcessGone { pid: i32 },
    #[error("root process {pid} could not be opened")]
    RootUnreachable { pid: i32 },
    #[error("dump helper exited with status {status}")]
    HelperFailed { status: i32 },
    #[error("failed to launch dump helper")]
    HelperSpawnFailed(#[source] std::io::Error),
    #[error("failed to compress dump into archive")]
    CompressionFailed(#[source] std::io::Error),
    #[error("io error writing dump")]
    Io(#[from] std::io::Error),
}

/// Outcome of dumping a single pid. A failure to dump one process in a
/// tree must never abort the others, so callers collect these rather
/// than propagating.
#[derive(Debug)]
pub struct DumpOutcome {
    pub pid: i32,
    /// The `n_m_..._name` identifier encoding the process's position in
    /// the tree (dump-file naming).
    pub tree_id: String,
    pub path: Option<PathBuf>,
    pub error: Option<DumpError>,
}

impl DumpOutcome {
    fn ok(pid: i32, tree_id: String, path: PathBuf) -> Self {
        DumpOutcome {
            pid,
            tree_id,
            path: Some(path),
            error: None,
        }
    }

    fn failed(pid: i32, tree_id: String, error: DumpError) -> Self {
        DumpOutcome {
            pid,
            tree_id,
            path: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a whole-tree dump attempt: `success` is false iff any target
/// in the tree failed; `first_exception` preserves the first such failure
/// for diagnostics.
#[derive(Debug)]
pub struct TreeDumpResult {
    pub success: bool,
    pub first_exception: Option<DumpError>,
    pub outcomes: Vec<DumpOutcome>,
}

/// One member of the process tree discovered during a tree dump, prior to
/// being filtered/numbered.
#[derive(Debug, Clone)]
pub struct TreeMember {
    pub pid: i32,
    pub parent_pid: i32,
    pub image_name: String,
    /// Process start time, used for the pid-reuse guard.
    pub start_time: SystemTime,
}

/// Image names skipped during a tree dump: certain OS helpers produce
/// partial-copy errors when dumped.
pub const DEFAULT_SKIP_NAMES: &[&str] = &["conhost"];

pub const DEFAULT_MAX_DEPTH: u32 = 20;

/// Enumerates the process tree rooted at `pid` and dumps each member.
/// Takes the job container's live-pid set when one is supplied (cheap,
/// authoritative); otherwise walks `/proc` by parent pid as
/// `linux/check.rs` does for cgroup discovery.
pub trait Dumper: Send + Sync {
    /// Writes one process's full memory image to `dump_dir/file_name`,
    /// uncompressed. Implementations name the file exactly `file_name`;
    /// [`Dumper::try_dump`] is what applies the tree-naming convention and
    /// optional compression on top of this.
    fn try_dump_raw(&self, pid: i32, dump_dir: &Path, file_name: &str) -> Result<PathBuf, DumpError>;

    /// Enumerates the live members of the tree rooted at `root_pid`.
    /// Implementations prefer a job container's exact live-pid set (not
    /// modeled here -- callers pass it via `live_pids`) and fall back to
    /// a parent-id walk of the OS process table, filtered to the current
    /// user.
    fn enumerate_tree(&self, root_pid: i32) -> Vec<TreeMember>;

    /// Dumps one process to `dump_dir`, named `file_name`. When `compress`
    /// is set, the uncompressed file written by [`Dumper::try_dump_raw`] is
    /// zipped and the temporary uncompressed copy is deleted, leaving only
    /// the archive behind.
    #[tracing::instrument(skip(self, dump_dir))]
    fn try_dump(
        &self,
        pid: i32,
        dump_dir: &Path,
        file_name: &str,
        compress: bool,
    ) -> Result<PathBuf, DumpError> {
        let raw = self.try_dump_raw(pid, dump_dir, file_name)?;
        if compress {
            let zipped = compress_dump(&raw)?;
            let _ = std::fs::remove_file(&raw);
            Ok(zipped)
        } else {
            Ok(raw)
        }
    }

    /// Walks the tree rooted at `root_pid` and dumps every member,
    /// tolerating per-target failures. `initiation_time` guards against
    /// pid reuse: any discovered process whose start time
    /// is strictly after it is skipped, since it cannot be the process
    /// that was actually part of this run. If the root pid cannot be
    /// opened at all, the whole call fails.
    #[tracing::instrument(skip(self, dump_dir, skip_names))]
    fn try_dump_tree(
        &self,
        root_pid: i32,
        dump_dir: &Path,
        initiation_time: SystemTime,
        live_pids: Option<&[i32]>,
        max_depth: u32,
        skip_names: &[&str],
        compress: bool,
    ) -> TreeDumpResult {
        let members = match live_pids {
            Some(pids) => {
                // The live-pid set is authoritative on *membership*, but
                // carries no hierarchy or naming info; resolve both from
                // the same enumeration `enumerate_tree` uses for the
                // fallback path, restricted to the pids the caller vouched
                // for. A live pid enumeration didn't turn up (e.g. it
                // exited between the two calls) still gets a placeholder
                // so it's attempted and reported as gone rather than
                // silently dropped.
                let discovered = self.enumerate_tree(root_pid);
                let live_set: HashMap<i32, ()> = pids.iter().map(|&p| (p, ())).collect();
                let mut resolved: Vec<TreeMember> = discovered
                    .into_iter()
                    .filter(|m| live_set.contains_key(&m.pid))
                    .collect();
                for &pid in pids {
                    if !resolved.iter().any(|m| m.pid == pid) {
                        resolved.push(TreeMember {
                            pid,
                            parent_pid: root_pid,
                            image_name: String::new(),
                            start_time: initiation_time,
                        });
                    }
                }
                resolved
            }
            None => self.enumerate_tree(root_pid),
        };

        if members.iter().all(|m| m.pid != root_pid) {
            return TreeDumpResult {
                success: false,
                first_exception: Some(DumpError::RootUnreachable { pid: root_pid }),
                outcomes: Vec::new(),
            };
        }

        let numbered = number_tree(root_pid, &members, max_depth);
        let mut outcomes = Vec::with_capacity(numbered.len());
        let mut first_exception = None;
        let mut success = true;

        for (tree_id, member) in numbered {
            if member.start_time > initiation_time {
                continue;
            }
            if skip_names.iter().any(|s| member.image_name.contains(s)) {
                continue;
            }
            let file_name = dump_file_name(&tree_id, &member.image_name);
            match self.try_dump(member.pid, dump_dir, &file_name, compress) {
                Ok(path) => outcomes.push(DumpOutcome::ok(member.pid, tree_id, path)),
                Err(e) => {
                    success = false;
                    if first_exception.is_none() {
                        first_exception = Some(match &e {
                            DumpError::ProcessGone { pid } => DumpError::ProcessGone { pid: *pid },
                            DumpError::RootUnreachable { pid } => {
                                DumpError::RootUnreachable { pid: *pid }
                            }
                            DumpError::HelperFailed { status } => {
                                DumpError::HelperFailed { status: *status }
                            }
                            _ => DumpError::ProcessGone { pid: member.pid },
                        });
                    }
                    outcomes.push(DumpOutcome::failed(member.pid, tree_id, e));
                }
            }
        }

        TreeDumpResult {
            success,
            first_exception,
            outcomes,
        }
    }
}

/// Assigns `n`, `n_m`, `n_m_k`, ... identifiers to each discovered member,
/// encoding its ordinal position at each level of the tree, bounded by
/// `max_depth`.
fn number_tree(root_pid: i32, members: &[TreeMember], max_depth: u32) -> Vec<(String, TreeMember)> {
    let mut children_of: HashMap<i32, Vec<&TreeMember>> = HashMap::new();
    for m in members {
        if m.pid != root_pid {
            children_of.entry(m.parent_pid).or_default().push(m);
        }
    }
    let mut out = Vec::with_capacity(members.len());
    if let Some(root) = members.iter().find(|m| m.pid == root_pid) {
        out.push(("1".to_string(), root.clone()));
        walk(root.pid, "1", &children_of, max_depth, 1, &mut out);
    }
    out
}

fn walk<'a>(
    pid: i32,
    prefix: &str,
    children_of: &HashMap<i32, Vec<&'a TreeMember>>,
    max_depth: u32,
    depth: u32,
    out: &mut Vec<(String, TreeMember)>,
) {
    if depth >= max_depth {
        return;
    }
    if let Some(children) = children_of.get(&pid) {
        for (i, child) in children.iter().enumerate() {
            let id = format!("{}_{}", prefix, i + 1);
            out.push((id.clone(), (*child).clone()));
            walk(child.pid, &id, children_of, max_depth, depth + 1, out);
        }
    }
}

#[cfg(target_os = "linux")]
pub fn enumerate_tree_via_procfs(root_pid: i32) -> Vec<TreeMember> {
    let mut members = Vec::new();
    let current_uid = unsafe { libc::getuid() };
    if let Ok(procs) = procfs::process::all_processes() {
        for p in procs.flatten() {
            let stat = match p.stat() {
                Ok(s) => s,
                Err(_) => continue,
            };
            let owned_by_us = p
                .uid()
                .map(|uid| uid == current_uid)
                .unwrap_or(false);
            if !owned_by_us {
                continue;
            }
            let start_time = p
                .stat()
                .ok()
                .and_then(|_| std::fs::metadata(format!("/proc/{}", stat.pid)).ok())
                .and_then(|m| m.created().or_else(|_| m.modified()).ok())
                .unwrap_or_else(SystemTime::now);
            members.push(TreeMember {
                pid: stat.pid,
                parent_pid: stat.ppid,
                image_name: stat.comm.clone(),
                start_time,
            });
        }
    }
    members
}

#[cfg(not(target_os = "linux"))]
pub fn enumerate_tree_via_procfs(root_pid: i32) -> Vec<TreeMember> {
    vec![TreeMember {
        pid: root_pid,
        parent_pid: 0,
        image_name: String::new(),
        start_time: SystemTime::now(),
    }]
}

/// Compresses a raw dump file into a `.zip` alongside it: dumps can be
/// large, and a build engine storing many of them benefits from deflate.
pub fn compress_dump(dump_path: &Path) -> Result<PathBuf, DumpError> {
    let zip_path = dump_path.with_extension(
        dump_path
            .extension()
            .map(|e| format!("{}.zip", e.to_string_lossy()))
            .unwrap_or_else(|| "zip".to_string()),
    );
    let file = std::fs::File::create(&zip_path).map_err(DumpError::CompressionFailed)?;
    let mut writer = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let entry_name = dump_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dump".to_string());
    writer
        .start_file(entry_name, options)
        .map_err(|e| DumpError::CompressionFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    let mut src = std::fs::File::open(dump_path).map_err(DumpError::CompressionFailed)?;
    std::io::copy(&mut src, &mut writer).map_err(DumpError::CompressionFailed)?;
    writer
        .finish()
        .map_err(|e| DumpError::CompressionFailed(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    Ok(zip_path)
}

/// Renders the `<counter-path>_<image-name>.dmp` file name used for
/// tree-mode dumps.
pub fn dump_file_name(tree_id: &str, image_name: &str) -> String {
    let stem = Path::new(image_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_name.to_string());
    format!("{}_{}.dmp", tree_id, stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails;
    impl Dumper for AlwaysFails {
        fn try_dump_raw(&self, pid: i32, _dump_dir: &Path, _file_name: &str) -> Result<PathBuf, DumpError> {
            Err(DumpError::ProcessGone { pid })
        }
        fn enumerate_tree(&self, root_pid: i32) -> Vec<TreeMember> {
            vec![TreeMember {
                pid: root_pid,
                parent_pid: 0,
                image_name: "root".into(),
                start_time: SystemTime::UNIX_EPOCH,
            }]
        }
    }

    #[test]
    fn tree_dump_tolerates_per_target_failure() {
        let dumper = AlwaysFails;
        let now = SystemTime::now();
        let result =
            dumper.try_dump_tree(1, Path::new("/tmp"), now, Some(&[1, 2, 3]), 20, &[], false);
        assert_eq!(result.outcomes.len(), 3);
        assert!(!result.success);
        assert!(result.first_exception.is_some());
    }

    #[test]
    fn root_unreachable_fails_whole_call() {
        let dumper = AlwaysFails;
        let now = SystemTime::now();
        let result = dumper.try_dump_tree(1, Path::new("/tmp"), now, Some(&[2, 3]), 20, &[], false);
        assert!(!result.success);
        assert!(matches!(
            result.first_exception,
            Some(DumpError::RootUnreachable { pid: 1 })
        ));
        assert!(result.outcomes.is_empty());
    }

    #[test]
    fn pid_reuse_guard_skips_processes_started_after_initiation() {
        struct CountCalls {
            calls: std::sync::atomic::AtomicUsize,
            members: Vec<TreeMember>,
        }
        impl Dumper for CountCalls {
            fn try_dump_raw(
                &self,
                _pid: i32,
                _dump_dir: &Path,
                _file_name: &str,
            ) -> Result<PathBuf, DumpError> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(PathBuf::from("/tmp/dump"))
            }
            fn enumerate_tree(&self, _root_pid: i32) -> Vec<TreeMember> {
                self.members.clone()
            }
        }

        let initiation = SystemTime::now();
        let dumper = CountCalls {
            calls: std::sync::atomic::AtomicUsize::new(0),
            members: vec![
                TreeMember {
                    pid: 1,
                    parent_pid: 0,
                    image_name: "root".into(),
                    start_time: SystemTime::UNIX_EPOCH,
                },
                TreeMember {
                    pid: 99,
                    parent_pid: 1,
                    image_name: "reused".into(),
                    // Reused pid, started after the dump was initiated: must be skipped.
                    start_time: initiation + std::time::Duration::from_secs(60),
                },
            ],
        };

        let result = dumper.try_dump_tree(1, Path::new("/tmp"), initiation, None, 20, &[], false);
        assert!(result.success);
        assert_eq!(result.outcomes.len(), 1, "the reused-pid child is skipped");
        assert_eq!(result.outcomes[0].pid, 1);
        assert_eq!(dumper.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn tree_member_resolution_preserves_real_hierarchy_and_names() {
        struct FakeTree {
            members: Vec<TreeMember>,
        }
        impl Dumper for FakeTree {
            fn try_dump_raw(
                &self,
                _pid: i32,
                _dump_dir: &Path,
                _file_name: &str,
            ) -> Result<PathBuf, DumpError> {
                Ok(PathBuf::from("/tmp/dump"))
            }
            fn enumerate_tree(&self, _root_pid: i32) -> Vec<TreeMember> {
                self.members.clone()
            }
        }

        let now = SystemTime::now();
        let dumper = FakeTree {
            members: vec![
                TreeMember {
                    pid: 1,
                    parent_pid: 0,
                    image_name: "sh".into(),
                    start_time: SystemTime::UNIX_EPOCH,
                },
                TreeMember {
                    pid: 2,
                    parent_pid: 1,
                    image_name: "sh".into(),
                    start_time: SystemTime::UNIX_EPOCH,
                },
                TreeMember {
                    pid: 3,
                    parent_pid: 2,
                    image_name: "sleep".into(),
                    start_time: SystemTime::UNIX_EPOCH,
                },
            ],
        };

        let result = dumper.try_dump_tree(1, Path::new("/tmp"), now, Some(&[1, 2, 3]), 20, &[], false);
        assert!(result.success);
        let ids: Vec<&str> = result.outcomes.iter().map(|o| o.tree_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "1_1", "1_1_1"], "depth-3 chain, not flattened to depth 1");
    }

    #[test]
    fn dump_file_name_follows_tree_naming_convention() {
        assert_eq!(dump_file_name("1_2_3", "sleep"), "1_2_3_sleep.dmp");
        assert_eq!(dump_file_name("1", "/bin/sh"), "1_sh.dmp");
    }
}
