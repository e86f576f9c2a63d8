//! The access record. An immutable value type describing one
//! observed file-system operation performed by a child process, as
//! reported by the (out-of-scope) interposition layer over the reporting
//! pipe that [`crate::report_reader::ReportStreamReader`] drains.
//!
//! Uses a length-prefixed framed message shape, encoded as a fixed binary
//! layout rather than a self-describing envelope: this format is consumed
//! by tooling outside this crate, so field order is part of the wire
//! contract, not an implementation detail.

use crate::process_info::ReportedProcess;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    io::{self, Read, Write},
};

/// Sentinel USN value meaning "absent".
pub const USN_ABSENT: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// The closed set of operations an access record can describe. Each tag
/// carries an implicit read/write/probe classification used by
/// `RequestedAccess::implied_by`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    Create = 0,
    Open = 1,
    Read = 2,
    Write = 3,
    Probe = 4,
    Enumerate = 5,
    EnumerateProbe = 6,
    Delete = 7,
    RenameSource = 8,
    RenameDestination = 9,
    HardlinkSource = 10,
    HardlinkDestination = 11,
    SymlinkSource = 12,
    ReparseResolve = 13,
    CreateDirectory = 14,
    RemoveDirectory = 15,
    CreateHardlink = 16,
    CreateSymlink = 17,
    ProcessStart = 18,
    ProcessExit = 19,
    Exec = 20,
    ChangeReadWriteToReadOnly = 21,
    GetFileAttributes = 22,
    SetFileAttributes = 23,
    FindFirstFile = 24,
    FindNextFile = 25,
    CopyFile = 26,
    MoveFile = 27,
    CreatePipe = 28,
    DeviceIoControl = 29,
    FlushBuffers = 30,
    LockFile = 31,
    UnlockFile = 32,
    QueryInformationFile = 33,
    SetInformationFile = 34,
    QueryVolumeInformation = 35,
    QuerySecurity = 36,
    SetSecurity = 37,
    CreateNamedPipe = 38,
    ReadFileNamedPipe = 39,
    WriteFileNamedPipe = 40,
    GetFinalPathNameByHandle = 41,
    OpenDirectory = 42,
    ProbeDirectory = 43,
    MemoryMapFile = 44,
    MemoryMapFileWrite = 45,
    Truncate = 46,
    ZwQueryDirectoryFile = 47,
    ZwSetRenameInformationFile = 48,
    Breakaway = 49,
}

impl Operation {
    /// The implicit read/write/probe classification each operation tag
    /// carries. Used only for descriptive purposes (e.g. `describe`);
    /// the authoritative classification for access-control decisions is
    /// `requested_access`, which the interposition layer computes.
    fn implied_classification(self) -> RequestedAccess {
        use Operation::*;
        match self {
            Create | CreateDirectory | CreateHardlink | CreateSymlink | CreateNamedPipe
            | Write | WriteFileNamedPipe | Delete | RenameSource | RenameDestination
            | HardlinkDestination | RemoveDirectory | SetFileAttributes | MoveFile
            | SetInformationFile | SetSecurity | Truncate | MemoryMapFileWrite
            | ZwSetRenameInformationFile => RequestedAccess::WRITE,
            Read | ReadFileNamedPipe | CopyFile | QueryInformationFile => RequestedAccess::READ,
            Enumerate | FindFirstFile | FindNextFile | ZwQueryDirectoryFile => {
                RequestedAccess::ENUMERATE
            }
            EnumerateProbe | ProbeDirectory => RequestedAccess::ENUMERATION_PROBE,
            Probe | Open | GetFileAttributes | QueryVolumeInformation | QuerySecurity
            | GetFinalPathNameByHandle | OpenDirectory | HardlinkSource | SymlinkSource
            | ReparseResolve => RequestedAccess::PROBE,
            ProcessStart | ProcessExit | Exec | ChangeReadWriteToReadOnly | CreatePipe
            | DeviceIoControl | FlushBuffers | LockFile | UnlockFile | MemoryMapFile
            | Breakaway => RequestedAccess::NONE,
        }
    }
}

/// Bit set of access kinds requested against a path. Uses plain `u32`
/// consts combined with `|` rather than pulling in a bitflags macro crate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestedAccess(pub u32);

impl RequestedAccess {
    pub const NONE: RequestedAccess = RequestedAccess(0);
    pub const READ: RequestedAccess = RequestedAccess(1 << 0);
    pub const WRITE: RequestedAccess = RequestedAccess(1 << 1);
    pub const PROBE: RequestedAccess = RequestedAccess(1 << 2);
    pub const ENUMERATE: RequestedAccess = RequestedAccess(1 << 3);
    pub const ENUMERATION_PROBE: RequestedAccess = RequestedAccess(1 << 4);

    pub fn contains(self, other: RequestedAccess) -> bool {
        (self.0 & other.0) == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Joins the bits with `|`, in declaration order, for `describe`.
    fn decode_names(self) -> String {
        let mut parts = Vec::new();
        let table: &[(RequestedAccess, &str)] = &[
            (Self::READ, "Read"),
            (Self::WRITE, "Write"),
            (Self::PROBE, "Probe"),
            (Self::ENUMERATE, "Enumerate"),
            (Self::ENUMERATION_PROBE, "EnumerationProbe"),
        ];
        for &(flag, name) in table {
            if self.contains(flag) {
                parts.push(name);
            }
        }
        if parts.is_empty() {
            "None".to_string()
        } else {
            parts.join("|")
        }
    }
}

impl std::ops::BitOr for RequestedAccess {
    type Output = RequestedAccess;
    fn bitor(self, rhs: RequestedAccess) -> RequestedAccess {
        RequestedAccess(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RequestedAccess {
    fn bitor_assign(&mut self, rhs: RequestedAccess) {
        self.0 |= rhs.0;
    }
}

/// Bitset of opened-handle attributes. Only the two bits this crate's
/// logic inspects are named; the rest round-trip opaquely.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct OpenedAttributes(pub u32);

impl OpenedAttributes {
    pub const DIRECTORY: OpenedAttributes = OpenedAttributes(1 << 0);
    pub const REPARSE_POINT: OpenedAttributes = OpenedAttributes(1 << 1);

    pub fn contains(self, flag: OpenedAttributes) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum FileAccessStatus {
    Allowed,
    Denied,
    CannotDeterminePolicy,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum FileAccessStatusMethod {
    PolicyBased,
    FileExistenceBased,
    TrustedTool,
}

/// OS error codes meaning "the target does not exist" (`IsNonexistent`).
const ERROR_FILE_NOT_FOUND: u32 = 2;
const ERROR_PATH_NOT_FOUND: u32 = 3;

/// One observed file-system operation by a child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAccess {
    pub operation: Operation,
    pub process: ReportedProcess,
    pub requested_access: RequestedAccess,
    pub status: FileAccessStatus,
    pub status_method: FileAccessStatusMethod,
    pub explicitly_reported: bool,
    pub error: u32,
    pub raw_error: u32,
    pub usn: u64,
    pub desired_access: u32,
    pub share_mode: u32,
    pub creation_disposition: u32,
    pub flags_and_attributes: u32,
    pub opened_attributes: OpenedAttributes,
    /// Index into an external path table; `None` means the index did not
    /// resolve (invariant then requires `path` to be non-empty).
    pub manifest_path: Option<u32>,
    /// Literal path, present when it differs from the manifest path (e.g.
    /// a descendant matched by a scope rule).
    pub path: Option<String>,
    pub enumerate_pattern: Option<String>,
}

/// Equality ignores `raw_error`: it is non-deterministic across retries by
/// the interposition layer, so two access records describing the same
/// observed event must compare equal even if one carries a transient raw
/// code the other doesn't. Every other field participates, matching the
/// `Hash` impl below field for field so the `Eq`/`Hash` contract holds.
impl PartialEq for FileAccess {
    fn eq(&self, other: &Self) -> bool {
        self.operation == other.operation
            && self.process == other.process
            && self.requested_access == other.requested_access
            && self.status == other.status
            && self.status_method == other.status_method
            && self.explicitly_reported == other.explicitly_reported
            && self.error == other.error
            && self.usn == other.usn
            && self.desired_access == other.desired_access
            && self.share_mode == other.share_mode
            && self.creation_disposition == other.creation_disposition
            && self.flags_and_attributes == other.flags_and_attributes
            && self.opened_attributes == other.opened_attributes
            && self.manifest_path == other.manifest_path
            && self.path == other.path
            && self.enumerate_pattern == other.enumerate_pattern
    }
}

impl Eq for FileAccess {}

impl std::hash::Hash for FileAccess {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.operation.hash(state);
        self.process.hash(state);
        self.requested_access.0.hash(state);
        format!("{:?}", self.status).hash(state);
        format!("{:?}", self.status_method).hash(state);
        self.explicitly_reported.hash(state);
        self.error.hash(state);
        self.usn.hash(state);
        self.desired_access.hash(state);
        self.share_mode.hash(state);
        self.creation_disposition.hash(state);
        self.flags_and_attributes.hash(state);
        self.opened_attributes.0.hash(state);
        self.manifest_path.hash(state);
        self.path.as_ref().map(|p| normalize_path_case(p)).hash(state);
        self.enumerate_pattern.hash(state);
    }
}

#[cfg(target_os = "windows")]
fn normalize_path_case(p: &str) -> String {
    p.to_ascii_lowercase()
}

#[cfg(not(target_os = "windows"))]
fn normalize_path_case(p: &str) -> String {
    p.to_string()
}

/// Maps an index in some process table to a human-readable path. The path
/// table itself belongs to the caller (it lives above this crate's scope);
/// this crate only needs it to render `describe`/`short_describe`.
pub trait PathTable {
    fn resolve(&self, index: u32) -> Option<&str>;
}

impl PathTable for HashMap<u32, String> {
    fn resolve(&self, index: u32) -> Option<&str> {
        self.get(&index).map(|s| s.as_str())
    }
}

impl FileAccess {
    fn resolved_path<'a>(&'a self, path_table: &'a dyn PathTable) -> &'a str {
        if let Some(p) = &self.path {
            return p.as_str();
        }
        self.manifest_path
            .and_then(|idx| path_table.resolve(idx))
            .unwrap_or("<unknown>")
    }

    /// Human description: operation, process identity, decoded flag
    /// masks, USN in hex if present, and status -- unless the status is
    /// `Denied`, since a denied access may still be allowed in practice by
    /// a policy override, and printing the word would be misleading.
    pub fn describe(&self, path_table: &dyn PathTable) -> String {
        let path = self.resolved_path(path_table);
        let mut out = format!(
            "{:?} by pid {} ({}): {} [access={}, desired=0x{:x}, share=0x{:x}, disposition=0x{:x}, flags=0x{:x}]",
            self.operation,
            self.process.pid,
            self.process.image_path.display(),
            path,
            self.requested_access.decode_names(),
            self.desired_access,
            self.share_mode,
            self.creation_disposition,
            self.flags_and_attributes,
        );
        if self.usn != USN_ABSENT {
            out.push_str(&format!(", usn=0x{:x}", self.usn));
        }
        if self.status != FileAccessStatus::Denied {
            out.push_str(&format!(", status={:?}", self.status));
        }
        out
    }

    /// One of ` R  path` / ` W  path`. `W` is chosen iff `requested_access`
    /// contains `Write`.
    pub fn short_describe(&self, path_table: &dyn PathTable) -> String {
        let marker = if self.requested_access.contains(RequestedAccess::WRITE) {
            "W"
        } else {
            "R"
        };
        format!(" {}  {}", marker, self.resolved_path(path_table))
    }

    pub fn is_write_violation(&self) -> bool {
        self.status == FileAccessStatus::Denied
            && self.requested_access.contains(RequestedAccess::WRITE)
    }

    pub fn is_nonexistent(&self) -> bool {
        matches!(self.error, ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND)
    }

    pub fn is_directory_creation(&self) -> bool {
        self.operation == Operation::CreateDirectory
    }

    pub fn is_directory_removal(&self) -> bool {
        self.operation == Operation::RemoveDirectory
    }

    pub fn is_directory_effectively_created(&self) -> bool {
        self.operation == Operation::CreateDirectory && self.error == 0
    }

    pub fn is_directory_effectively_removed(&self) -> bool {
        self.operation == Operation::RemoveDirectory && self.error == 0
    }

    /// True iff the opened handle is a directory. The reparse-point
    /// predicate is consulted only when needed
    /// (classifying directory reparse points is expensive), so it is
    /// passed as a closure rather than eagerly evaluated.
    pub fn is_opened_handle_directory(
        &self,
        treat_reparse_as_file: impl FnOnce() -> bool,
    ) -> bool {
        if !self.opened_attributes.contains(OpenedAttributes::DIRECTORY) {
            return false;
        }
        if !self.opened_attributes.contains(OpenedAttributes::REPARSE_POINT) {
            return true;
        }
        !treat_reparse_as_file()
    }

    /// Serializes this record per the fixed field layout used on the wire.
    /// When `process_index_map` is provided, the process is encoded as a
    /// dense index into it; otherwise it is embedded inline. `path_writer`,
    /// when provided, remaps `manifest_path` through an external path
    /// table (e.g. a caller interning paths across many records) before
    /// the index is written; absent, the raw index passes through
    /// unchanged.
    pub fn serialize(
        &self,
        w: &mut impl Write,
        process_index_map: Option<&HashMap<ReportedProcess, u32>>,
        path_writer: Option<&dyn Fn(u32) -> u32>,
    ) -> io::Result<()> {
        w.write_all(&[self.operation as u8])?;
        match process_index_map {
            Some(map) => {
                let idx = *map.get(&self.process).expect("process not interned");
                write_compact_u32(w, idx)?;
            }
            None => self.process.serialize(w)?,
        }
        write_compact_u32(w, self.requested_access.0)?;
        write_compact_u32(w, status_tag(self.status))?;
        w.write_all(&[self.explicitly_reported as u8])?;
        w.write_all(&self.error.to_le_bytes())?;
        w.write_all(&self.raw_error.to_le_bytes())?;
        w.write_all(&self.usn.to_le_bytes())?;
        w.write_all(&self.desired_access.to_le_bytes())?;
        w.write_all(&self.share_mode.to_le_bytes())?;
        w.write_all(&self.creation_disposition.to_le_bytes())?;
        w.write_all(&self.flags_and_attributes.to_le_bytes())?;
        w.write_all(&self.opened_attributes.0.to_le_bytes())?;
        let manifest_path_raw = self.manifest_path.unwrap_or(u32::MAX);
        let manifest_path_encoded = if manifest_path_raw == u32::MAX {
            u32::MAX
        } else {
            path_writer.map_or(manifest_path_raw, |f| f(manifest_path_raw))
        };
        write_compact_u32(w, manifest_path_encoded)?;
        write_nullable_string(w, self.path.as_deref())?;
        write_nullable_string(w, self.enumerate_pattern.as_deref())?;
        w.write_all(&[method_tag(self.status_method)])?;
        Ok(())
    }

    /// Deserializes a record previously written by [`serialize`]. Fails if
    /// the tag byte is outside the operation enum or a referenced process
    /// index is out of range. `path_reader` mirrors `serialize`'s
    /// `path_writer`: it maps the wire index back through the external
    /// path table, and defaults to passthrough when absent.
    pub fn deserialize(
        r: &mut impl Read,
        process_table: Option<&[ReportedProcess]>,
        path_reader: Option<&dyn Fn(u32) -> u32>,
    ) -> io::Result<Self> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let operation = operation_from_tag(tag[0])?;

        let process = match process_table {
            Some(table) => {
                let idx = read_compact_u32(r)? as usize;
                table
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| invalid_data("process index out of range"))?
            }
            None => ReportedProcess::deserialize(r)?,
        };

        let requested_access = RequestedAccess(read_compact_u32(r)?);
        let status = status_from_tag(read_compact_u32(r)?)?;
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        let explicitly_reported = b[0] != 0;
        let error = read_u32(r)?;
        let raw_error = read_u32(r)?;
        let usn = read_u64(r)?;
        let desired_access = read_u32(r)?;
        let share_mode = read_u32(r)?;
        let creation_disposition = read_u32(r)?;
        let flags_and_attributes = read_u32(r)?;
        let opened_attributes = OpenedAttributes(read_u32(r)?);
        let manifest_path_raw = read_compact_u32(r)?;
        let manifest_path = if manifest_path_raw == u32::MAX {
            None
        } else {
            Some(path_reader.map_or(manifest_path_raw, |f| f(manifest_path_raw)))
        };
        let path = read_nullable_string(r)?;
        let enumerate_pattern = read_nullable_string(r)?;
        let mut method_tag_buf = [0u8; 1];
        r.read_exact(&mut method_tag_buf)?;
        let status_method = method_from_tag(method_tag_buf[0])?;

        Ok(FileAccess {
            operation,
            process,
            requested_access,
            status,
            status_method,
            explicitly_reported,
            error,
            raw_error,
            usn,
            desired_access,
            share_mode,
            creation_disposition,
            flags_and_attributes,
            opened_attributes,
            manifest_path,
            path,
            enumerate_pattern,
        })
    }
}

fn status_tag(s: FileAccessStatus) -> u32 {
    match s {
        FileAccessStatus::Allowed => 0,
        FileAccessStatus::Denied => 1,
        FileAccessStatus::CannotDeterminePolicy => 2,
    }
}

fn status_from_tag(t: u32) -> io::Result<FileAccessStatus> {
    match t {
        0 => Ok(FileAccessStatus::Allowed),
        1 => Ok(FileAccessStatus::Denied),
        2 => Ok(FileAccessStatus::CannotDeterminePolicy),
        _ => Err(invalid_data("invalid file access status tag")),
    }
}

fn method_tag(m: FileAccessStatusMethod) -> u8 {
    match m {
        FileAccessStatusMethod::PolicyBased => 0,
        FileAccessStatusMethod::FileExistenceBased => 1,
        FileAccessStatusMethod::TrustedTool => 2,
    }
}

fn method_from_tag(t: u8) -> io::Result<FileAccessStatusMethod> {
    match t {
        0 => Ok(FileAccessStatusMethod::PolicyBased),
        1 => Ok(FileAccessStatusMethod::FileExistenceBased),
        2 => Ok(FileAccessStatusMethod::TrustedTool),
        _ => Err(invalid_data("invalid file access status method tag")),
    }
}

fn operation_from_tag(t: u8) -> io::Result<Operation> {
    if t > Operation::Breakaway as u8 {
        return Err(invalid_data("operation tag out of range"));
    }
    // Safety net: transmuting a validated in-range discriminant. `Operation`
    // is `repr(u8)` and every value 0..=Breakaway is assigned, so this is a
    // total match; written as one to avoid a 50-arm duplicate of the enum.
    Ok(unsafe { std::mem::transmute(t) })
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

fn write_compact_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_compact_u32(r: &mut impl Read) -> io::Result<u32> {
    read_u32(r)
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_nullable_string(w: &mut impl Write, s: Option<&str>) -> io::Result<()> {
    match s {
        None => w.write_all(&(-1i32).to_le_bytes()),
        Some(s) => {
            let bytes = s.as_bytes();
            w.write_all(&(bytes.len() as i32).to_le_bytes())?;
            w.write_all(bytes)
        }
    }
}

fn read_nullable_string(r: &mut impl Read) -> io::Result<Option<String>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = i32::from_le_bytes(len_buf);
    if len < 0 {
        return Ok(None);
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| invalid_data(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_process(pid: i32) -> ReportedProcess {
        ReportedProcess {
            pid,
            parent_pid: 1,
            image_path: PathBuf::from("/bin/echo"),
            command_line: "echo hi".to_string(),
            creation_time: 1000,
            exit_time: Some(1001),
            user_time_ns: 10,
            kernel_time_ns: 5,
            exit_code: Some(0),
            disposed: false,
        }
    }

    fn sample_access(pid: i32, raw_error: u32) -> FileAccess {
        FileAccess {
            operation: Operation::Write,
            process: sample_process(pid),
            requested_access: RequestedAccess::WRITE,
            status: FileAccessStatus::Allowed,
            status_method: FileAccessStatusMethod::PolicyBased,
            explicitly_reported: true,
            error: 0,
            raw_error,
            usn: USN_ABSENT,
            desired_access: 0x1234,
            share_mode: 0,
            creation_disposition: 3,
            flags_and_attributes: 0x80,
            opened_attributes: OpenedAttributes::default(),
            manifest_path: None,
            path: Some("/tmp/out.txt".to_string()),
            enumerate_pattern: None,
        }
    }

    #[test]
    fn equality_ignores_raw_error() {
        let a = sample_access(42, 5);
        let b = sample_access(42, 999);
        assert_eq!(a, b);
        let mut ha = std::collections::hash_map::DefaultHasher::new();
        let mut hb = std::collections::hash_map::DefaultHasher::new();
        use std::hash::Hash;
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(
            std::hash::Hasher::finish(&ha),
            std::hash::Hasher::finish(&hb)
        );
    }

    #[test]
    fn round_trip_inline_process() {
        let original = sample_access(7, 0);
        let mut buf = Vec::new();
        original.serialize(&mut buf, None, None).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = FileAccess::deserialize(&mut cursor, None, None).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn round_trip_with_process_table() {
        let original = sample_access(7, 0);
        let mut map = HashMap::new();
        map.insert(original.process.clone(), 0u32);
        let mut buf = Vec::new();
        original.serialize(&mut buf, Some(&map), None).unwrap();
        let table = vec![original.process.clone()];
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = FileAccess::deserialize(&mut cursor, Some(&table), None).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn is_nonexistent_matches_documented_codes() {
        let mut a = sample_access(1, 0);
        a.error = ERROR_FILE_NOT_FOUND;
        assert!(a.is_nonexistent());
        a.error = ERROR_PATH_NOT_FOUND;
        assert!(a.is_nonexistent());
        a.error = 5;
        assert!(!a.is_nonexistent());
    }

    #[test]
    fn directory_effectively_created_requires_success() {
        let mut a = sample_access(1, 0);
        a.operation = Operation::CreateDirectory;
        a.error = 0;
        assert!(a.is_directory_effectively_created());
        a.error = 5;
        assert!(!a.is_directory_effectively_created());
    }

    #[test]
    fn short_describe_picks_marker_from_write_bit() {
        let table = HashMap::new();
        let w = sample_access(1, 0);
        assert!(w.short_describe(&table).starts_with(" W"));
        let mut r = sample_access(1, 0);
        r.requested_access = RequestedAccess::READ;
        assert!(r.short_describe(&table).starts_with(" R"));
    }

    #[test]
    fn describe_omits_status_when_denied() {
        let table = HashMap::new();
        let mut a = sample_access(1, 0);
        a.status = FileAccessStatus::Denied;
        assert!(!a.describe(&table).contains("status="));
        a.status = FileAccessStatus::Allowed;
        assert!(a.describe(&table).contains("status="));
    }
}
