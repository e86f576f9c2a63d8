//! The reported-process record.
//!
//! Grounded on `linux/jail_common.rs`'s `JobStartupInfo` (pid plus a
//! capture of what was launched) and the accounting fields
//! `windows/constrain.rs::Job::resource_usage` reads off
//! `JobObjectBasicAccountingInformation`.

use serde::{Deserialize, Serialize};
use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// One process observed by the interposition layer, identified uniquely
/// within a single supervised run by `(pid, creation_time)` -- a bare pid
/// can be reused by the OS within the lifetime of a long job container,
/// so creation time disambiguates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedProcess {
    pub pid: i32,
    pub parent_pid: i32,
    pub image_path: PathBuf,
    pub command_line: String,
    /// OS-specific timestamp (100ns ticks on Windows, ns since epoch on
    /// Linux); opaque to this crate beyond equality/ordering.
    pub creation_time: u64,
    pub exit_time: Option<u64>,
    pub user_time_ns: u64,
    pub kernel_time_ns: u64,
    pub exit_code: Option<i64>,
    /// Set once the process table entry has been reclaimed by the
    /// interposition layer: further accesses referencing this process are
    /// rejected upstream,
    /// this flag just lets us render it faithfully in descriptions.
    pub disposed: bool,
}

impl PartialEq for ReportedProcess {
    fn eq(&self, other: &Self) -> bool {
        self.pid == other.pid && self.creation_time == other.creation_time
    }
}

impl Eq for ReportedProcess {}

impl std::hash::Hash for ReportedProcess {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pid.hash(state);
        self.creation_time.hash(state);
    }
}

impl ReportedProcess {
    pub fn new(pid: i32, parent_pid: i32, image_path: impl Into<PathBuf>, creation_time: u64) -> Self {
        ReportedProcess {
            pid,
            parent_pid,
            image_path: image_path.into(),
            command_line: String::new(),
            creation_time,
            exit_time: None,
            user_time_ns: 0,
            kernel_time_ns: 0,
            exit_code: None,
            disposed: false,
        }
    }

    pub fn image_name(&self) -> &Path {
        self.image_path.as_path()
    }

    pub fn total_cpu_time_ns(&self) -> u64 {
        self.user_time_ns.saturating_add(self.kernel_time_ns)
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code.is_some()
    }

    pub(crate) fn serialize(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_all(&self.pid.to_le_bytes())?;
        w.write_all(&self.parent_pid.to_le_bytes())?;
        write_string(w, self.image_path.to_string_lossy().as_ref())?;
        write_string(w, &self.command_line)?;
        w.write_all(&self.creation_time.to_le_bytes())?;
        write_optional_u64(w, self.exit_time)?;
        w.write_all(&self.user_time_ns.to_le_bytes())?;
        w.write_all(&self.kernel_time_ns.to_le_bytes())?;
        write_optional_i64(w, self.exit_code)?;
        w.write_all(&[self.disposed as u8])
    }

    pub(crate) fn deserialize(r: &mut impl Read) -> io::Result<Self> {
        let pid = read_i32(r)?;
        let parent_pid = read_i32(r)?;
        let image_path = PathBuf::from(read_string(r)?);
        let command_line = read_string(r)?;
        let creation_time = read_u64(r)?;
        let exit_time = read_optional_u64(r)?;
        let user_time_ns = read_u64(r)?;
        let kernel_time_ns = read_u64(r)?;
        let exit_code = read_optional_i64(r)?;
        let mut disposed_buf = [0u8; 1];
        r.read_exact(&mut disposed_buf)?;
        Ok(ReportedProcess {
            pid,
            parent_pid,
            image_path,
            command_line,
            creation_time,
            exit_time,
            user_time_ns,
            kernel_time_ns,
            exit_code,
            disposed: disposed_buf[0] != 0,
        })
    }
}

fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)
}

fn read_string(r: &mut impl Read) -> io::Result<String> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn write_optional_u64(w: &mut impl Write, v: Option<u64>) -> io::Result<()> {
    w.write_all(&v.unwrap_or(u64::MAX).to_le_bytes())
}

fn read_optional_u64(r: &mut impl Read) -> io::Result<Option<u64>> {
    let v = read_u64(r)?;
    Ok(if v == u64::MAX { None } else { Some(v) })
}

fn write_optional_i64(w: &mut impl Write, v: Option<i64>) -> io::Result<()> {
    w.write_all(&v.unwrap_or(i64::MIN).to_le_bytes())
}

fn read_optional_i64(r: &mut impl Read) -> io::Result<Option<i64>> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    let v = i64::from_le_bytes(buf);
    Ok(if v == i64::MIN { None } else { Some(v) })
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i32(r: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_pid_and_creation_time_only() {
        let mut a = ReportedProcess::new(10, 1, "/bin/a", 500);
        let mut b = ReportedProcess::new(10, 1, "/bin/a", 500);
        a.command_line = "a --flag".to_string();
        b.command_line = "a --other-flag".to_string();
        assert_eq!(a, b);

        let c = ReportedProcess::new(10, 1, "/bin/a", 501);
        assert_ne!(a, c);
    }

    #[test]
    fn round_trip() {
        let mut p = ReportedProcess::new(77, 1, "/usr/bin/cc", 12345);
        p.command_line = "cc -o out main.c".to_string();
        p.exit_time = Some(12999);
        p.user_time_ns = 400;
        p.kernel_time_ns = 100;
        p.exit_code = Some(0);
        p.disposed = true;

        let mut buf = Vec::new();
        p.serialize(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = ReportedProcess::deserialize(&mut cursor).unwrap();
        assert_eq!(p.pid, decoded.pid);
        assert_eq!(p.command_line, decoded.command_line);
        assert_eq!(p.exit_time, decoded.exit_time);
        assert_eq!(p.exit_code, decoded.exit_code);
        assert_eq!(p.disposed, decoded.disposed);
    }
}
