//! The report stream reader.
//!
//! The interposition layer that produces this stream is out of scope for
//! this crate; only the channel and wire framing it feeds are in scope.
//! Grounded directly on `linux/ipc.rs`'s `Socket::send`/`recv`
//! (length-prefixed frames read synchronously into an in-memory buffer,
//! then deserialized) generalized into an async reader over a
//! `tokio::io::AsyncRead` so it composes with the rest of the detoured
//! process's completion machinery instead of blocking a thread per pipe.

use crate::{access::FileAccess, process_info::ReportedProcess};
use std::collections::{HashMap, HashSet};
use tokio::io::{AsyncRead, AsyncReadExt};

/// One parsed event off the report stream.
#[derive(Debug, Clone)]
pub enum ReportEvent {
    Access(FileAccess),
    ProcessCreated(ReportedProcess),
    /// Emitted once per spawn attempt by the interposition layer, per
    /// wire format.
    DetoursStatus(DetouringStatus),
}

/// The detouring-status record's fixed wire
/// format: one of these is emitted for each child-spawn attempt the
/// interposition layer observes, independent of whether any file access
/// ever followed.
#[derive(Debug, Clone)]
pub struct DetouringStatus {
    pub process_id: u64,
    pub report_status: u32,
    pub process_name: String,
    pub start_application_name: String,
    pub start_command_line: String,
    pub needs_injection: bool,
    pub is_current_64_bit_process: bool,
    pub is_current_wow64_process: bool,
    pub is_process_wow64: bool,
    pub needs_remote_injection: bool,
    pub job: u64,
    pub disable_detours: bool,
    pub creation_flags: u32,
    pub detoured: bool,
    pub error: u32,
    pub create_process_status_return: u32,
}

impl DetouringStatus {
    /// True iff the interposition layer reported it could not attach to
    /// this process. Tracked by the reader as
    /// `has_detours_injection_failures` .
    pub fn is_failure(&self) -> bool {
        self.needs_injection && !self.detoured
    }
}

const TAG_ACCESS: u8 = 0;
const TAG_PROCESS_CREATED: u8 = 1;
const TAG_DETOURS_STATUS: u8 = 2;

/// Frames are read this many times with zero backoff while draining a
/// cancelled run: an explicit bound rather than an unbounded blocking
/// read, because cancellation must make forward progress even if the
/// child leaves the pipe open. Matches the default of 10 000 on modern
/// runtimes; callers on legacy backends should pass 0 through `Settings`.
pub const CANCELLATION_DRAIN_RETRIES: u32 = 10_000;
pub const CANCELLATION_DRAIN_DELAY_MS: u64 = 0;

/// Accumulates and deduplicates the report stream for one supervised run.
///
/// Once [`ReportStreamReader::freeze`] has been called (after the child
/// tree has terminated), every mutating method
/// is a no-op. The reader is not generic over
/// "frozen" vs. "live" at the type level (that would force two copies of
/// every accessor) because every caller of this type already only calls
/// `freeze` once, at a single well-known point in `SandboxedSupervisor::
/// get_result`.
#[derive(Debug, Default)]
pub struct ReportStreamReader {
    accesses: Vec<FileAccess>,
    seen_accesses: HashSet<AccessKey>,
    /// Keyed by pid alone (not pid+creation_time): a pid reused within one
    /// run must resolve to whichever record was reported last, matching
    /// `get-result`'s "coalesce processes, group by pid, keep last".
    processes: HashMap<i32, ReportedProcess>,
    detours_statuses: Vec<DetouringStatus>,
    frozen: bool,
}

/// `FileAccess`'s `Eq`/`Hash` already ignore `raw_error` ; this key
/// additionally collapses on a pre-computed hash so dedup doesn't need to
/// carry full clones in the seen-set.
type AccessKey = u64;

fn access_key(a: &FileAccess) -> AccessKey {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    a.hash(&mut h);
    h.finish()
}

impl ReportStreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses the next length-prefixed frame: a little-endian
    /// `u32` length followed by a one-byte tag and its payload, matching
    /// the buffer-then-deserialize shape of `linux/ipc.rs::Socket::recv`.
    /// `Ok(None)` means clean EOF.
    pub async fn read_frame<R: AsyncRead + Unpin>(
        stream: &mut R,
    ) -> std::io::Result<Option<ReportEvent>> {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        let mut cursor = std::io::Cursor::new(buf);
        decode_event(&mut cursor).map(Some)
    }

    /// Records one parsed event, applying dedup. Returns `false` when the
    /// event was rejected because the reader is already frozen (no record
    /// may be added after freezing).
    pub fn record(&mut self, event: ReportEvent) -> bool {
        if self.frozen {
            return false;
        }
        match event {
            ReportEvent::ProcessCreated(p) => {
                self.processes.insert(p.pid, p);
            }
            ReportEvent::DetoursStatus(status) => {
                self.detours_statuses.push(status);
            }
            ReportEvent::Access(access) => {
                let hash = access_key(&access);
                if self.seen_accesses.insert(hash) {
                    self.accesses.push(access);
                }
            }
        }
        true
    }

    /// Freezes the reader: after this call every mutating method is a
    /// no-op and every accumulated collection is effectively read-only.
    /// Called once the supervised process tree has fully terminated.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn accesses(&self) -> &[FileAccess] {
        &self.accesses
    }

    pub fn processes(&self) -> impl Iterator<Item = &ReportedProcess> {
        self.processes.values()
    }

    pub fn detours_statuses(&self) -> &[DetouringStatus] {
        &self.detours_statuses
    }

    /// True iff the interposition layer ever reported failing to attach
    /// to a process it needed to (`has_detours_injection_failures`).
    pub fn has_detours_failures(&self) -> bool {
        self.detours_statuses.iter().any(DetouringStatus::is_failure)
    }

    /// Subset of `accesses` whose status is `Denied` and which the
    /// caller's allow-list predicate does not cover.
    pub fn unexpected_accesses<'a>(
        &'a self,
        is_allowed: &'a dyn Fn(&FileAccess) -> bool,
    ) -> impl Iterator<Item = &'a FileAccess> {
        self.accesses.iter().filter(move |a| {
            a.status == crate::access::FileAccessStatus::Denied && !is_allowed(a)
        })
    }

    /// Subset of `accesses` the interposition layer marked
    /// `explicitly_reported` -- `explicitly-reported-file-accesses`.
    pub fn explicitly_reported_accesses(&self) -> impl Iterator<Item = &FileAccess> {
        self.accesses.iter().filter(|a| a.explicitly_reported)
    }

    /// True iff any recorded access represents an open handle being
    /// downgraded from read-write to read-only (the `ChangeReadWriteToReadOnly`
    /// operation) -- a build engine uses this
    /// to avoid treating that access as a write violation even though the
    /// handle started out writable.
    pub fn has_read_write_to_read(&self) -> bool {
        self.accesses
            .iter()
            .any(|a| a.operation == crate::access::Operation::ChangeReadWriteToReadOnly)
    }

    /// Drains any frames still buffered on `stream` after the supervised
    /// process has been killed, bounded by `retries` reads with no delay
    /// between them, so a pipe the killed child somehow kept open cannot
    /// hang cancellation. Returns `false` if the bound was exhausted
    /// without reaching EOF (surfaced by the caller as
    /// `message_processing_failure`).
    pub async fn drain_on_cancel<R: AsyncRead + Unpin>(
        &mut self,
        stream: &mut R,
        retries: u32,
    ) -> bool {
        for _ in 0..retries {
            match Self::read_frame(stream).await {
                Ok(Some(event)) => {
                    self.record(event);
                }
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
        retries == 0
    }

    /// Drains `stream` to EOF without a retry bound, the non-cancelled
    /// completion path.
    pub async fn drain_to_eof<R: AsyncRead + Unpin>(&mut self, stream: &mut R) {
        while let Ok(Some(event)) = Self::read_frame(stream).await {
            self.record(event);
        }
    }
}

fn decode_event(cursor: &mut std::io::Cursor<Vec<u8>>) -> std::io::Result<ReportEvent> {
    use std::io::Read;
    let mut tag = [0u8; 1];
    cursor.read_exact(&mut tag)?;
    match tag[0] {
        TAG_ACCESS => Ok(ReportEvent::Access(FileAccess::deserialize(cursor, None, None)?)),
        TAG_PROCESS_CREATED => Ok(ReportEvent::ProcessCreated(ReportedProcess::deserialize(
            cursor,
        )?)),
        TAG_DETOURS_STATUS => Ok(ReportEvent::DetoursStatus(decode_detours_status(cursor)?)),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown report frame tag {}", other),
        )),
    }
}

fn decode_detours_status(cursor: &mut std::io::Cursor<Vec<u8>>) -> std::io::Result<DetouringStatus> {
    use std::io::Read;
    fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
        let mut b = [0u8; 8];
        r.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }
    fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
        let mut b = [0u8; 4];
        r.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
    fn read_bool(r: &mut impl Read) -> std::io::Result<bool> {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)?;
        Ok(b[0] != 0)
    }
    fn read_string(r: &mut impl Read) -> std::io::Result<String> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    Ok(DetouringStatus {
        process_id: read_u64(cursor)?,
        report_status: read_u32(cursor)?,
        process_name: read_string(cursor)?,
        start_application_name: read_string(cursor)?,
        start_command_line: read_string(cursor)?,
        needs_injection: read_bool(cursor)?,
        is_current_64_bit_process: read_bool(cursor)?,
        is_current_wow64_process: read_bool(cursor)?,
        is_process_wow64: read_bool(cursor)?,
        needs_remote_injection: read_bool(cursor)?,
        job: read_u64(cursor)?,
        disable_detours: read_bool(cursor)?,
        creation_flags: read_u32(cursor)?,
        detoured: read_bool(cursor)?,
        error: read_u32(cursor)?,
        create_process_status_return: read_u32(cursor)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{FileAccessStatus, FileAccessStatusMethod, Operation, RequestedAccess};

    fn sample_process(pid: i32, creation_time: u64) -> ReportedProcess {
        ReportedProcess::new(pid, 1, "/bin/echo", creation_time)
    }

    fn sample_access(pid: i32, creation_time: u64) -> FileAccess {
        FileAccess {
            operation: Operation::Read,
            process: sample_process(pid, creation_time),
            requested_access: RequestedAccess::READ,
            status: FileAccessStatus::Allowed,
            status_method: FileAccessStatusMethod::PolicyBased,
            explicitly_reported: true,
            error: 0,
            raw_error: 0,
            usn: crate::access::USN_ABSENT,
            desired_access: 0,
            share_mode: 0,
            creation_disposition: 0,
            flags_and_attributes: 0,
            opened_attributes: Default::default(),
            manifest_path: None,
            path: Some("/tmp/in.txt".to_string()),
            enumerate_pattern: None,
        }
    }

    #[test]
    fn duplicate_access_records_are_collapsed() {
        let mut reader = ReportStreamReader::new();
        let a = sample_access(1, 100);
        let mut b = a.clone();
        b.raw_error = 999;
        assert!(reader.record(ReportEvent::Access(a)));
        assert!(reader.record(ReportEvent::Access(b)));
        assert_eq!(reader.accesses().len(), 1);
    }

    #[test]
    fn no_record_after_freeze() {
        let mut reader = ReportStreamReader::new();
        reader.record(ReportEvent::Access(sample_access(1, 100)));
        reader.freeze();
        let accepted = reader.record(ReportEvent::Access(sample_access(2, 200)));
        assert!(!accepted);
        assert_eq!(reader.accesses().len(), 1);
    }

    #[test]
    fn unexpected_accesses_excludes_allow_listed() {
        let mut reader = ReportStreamReader::new();
        let mut denied = sample_access(1, 100);
        denied.status = FileAccessStatus::Denied;
        denied.path = Some("/tmp/allowed.txt".to_string());
        let mut denied_unexpected = sample_access(2, 100);
        denied_unexpected.status = FileAccessStatus::Denied;
        denied_unexpected.path = Some("/tmp/unexpected.txt".to_string());
        reader.record(ReportEvent::Access(denied));
        reader.record(ReportEvent::Access(denied_unexpected));

        let is_allowed = |a: &FileAccess| a.path.as_deref() == Some("/tmp/allowed.txt");
        let unexpected: Vec<_> = reader.unexpected_accesses(&is_allowed).collect();
        assert_eq!(unexpected.len(), 1);
        assert_eq!(unexpected[0].path.as_deref(), Some("/tmp/unexpected.txt"));
    }

    #[test]
    fn detours_failure_is_needs_injection_without_detoured() {
        let status = DetouringStatus {
            process_id: 1,
            report_status: 0,
            process_name: "cc".into(),
            start_application_name: "/usr/bin/cc".into(),
            start_command_line: "cc -o out main.c".into(),
            needs_injection: true,
            is_current_64_bit_process: true,
            is_current_wow64_process: false,
            is_process_wow64: false,
            needs_remote_injection: false,
            job: 0,
            disable_detours: false,
            creation_flags: 0,
            detoured: false,
            error: 5,
            create_process_status_return: 0,
        };
        assert!(status.is_failure());

        let mut reader = ReportStreamReader::new();
        reader.record(ReportEvent::DetoursStatus(status));
        assert!(reader.has_detours_failures());
    }
}
