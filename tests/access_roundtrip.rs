//! Round-trips a large batch of varied access records through the
//! fixed-layout binary codec, the way a report stream accumulates many
//! distinct records over the lifetime of one supervised run.

use sandboxed_process::{
    FileAccess, FileAccessStatus, FileAccessStatusMethod, Operation, OpenedAttributes,
    ReportedProcess, RequestedAccess, USN_ABSENT,
};

const OPERATIONS: &[Operation] = &[
    Operation::Create,
    Operation::Read,
    Operation::Write,
    Operation::Delete,
    Operation::RenameSource,
    Operation::CreateDirectory,
    Operation::RemoveDirectory,
    Operation::Enumerate,
    Operation::Probe,
    Operation::Exec,
];

const STATUSES: &[FileAccessStatus] = &[
    FileAccessStatus::Allowed,
    FileAccessStatus::Denied,
    FileAccessStatus::CannotDeterminePolicy,
];

const METHODS: &[FileAccessStatusMethod] = &[
    FileAccessStatusMethod::PolicyBased,
    FileAccessStatusMethod::FileExistenceBased,
    FileAccessStatusMethod::TrustedTool,
];

fn record(i: usize) -> FileAccess {
    let process = ReportedProcess::new(
        1000 + (i % 50) as i32,
        1,
        format!("/usr/bin/tool-{}", i % 7),
        (i as u64) * 37,
    );
    FileAccess {
        operation: OPERATIONS[i % OPERATIONS.len()],
        process,
        requested_access: RequestedAccess(i as u32 & 0b11111),
        status: STATUSES[i % STATUSES.len()],
        status_method: METHODS[i % METHODS.len()],
        explicitly_reported: i % 3 == 0,
        error: (i % 17) as u32,
        raw_error: (i * 13) as u32,
        usn: if i % 5 == 0 { USN_ABSENT } else { i as u64 },
        desired_access: i as u32,
        share_mode: (i as u32).wrapping_mul(3),
        creation_disposition: i as u32 % 5,
        flags_and_attributes: (i as u32) << 2,
        opened_attributes: OpenedAttributes(if i % 2 == 0 {
            OpenedAttributes::DIRECTORY.0
        } else {
            0
        }),
        manifest_path: if i % 4 == 0 { Some(i as u32) } else { None },
        path: if i % 4 == 0 {
            None
        } else {
            Some(format!("/tmp/build/out-{}.o", i))
        },
        enumerate_pattern: if matches!(OPERATIONS[i % OPERATIONS.len()], Operation::Enumerate) {
            Some("*.o".to_string())
        } else {
            None
        },
    }
}

#[test]
fn large_batch_round_trips_byte_for_byte_through_the_wire_codec() {
    let records: Vec<FileAccess> = (0..4000).map(record).collect();

    let mut buf = Vec::new();
    for r in &records {
        r.serialize(&mut buf, None, None).unwrap();
    }

    let mut cursor = std::io::Cursor::new(buf);
    let mut decoded = Vec::with_capacity(records.len());
    for _ in 0..records.len() {
        decoded.push(FileAccess::deserialize(&mut cursor, None, None).unwrap());
    }

    assert_eq!(records.len(), decoded.len());
    for (original, round_tripped) in records.iter().zip(decoded.iter()) {
        // `PartialEq` ignores `raw_error` by design; check it separately so
        // the rest of the round trip is still verified field by field.
        assert_eq!(original, round_tripped);
        assert_eq!(original.raw_error, round_tripped.raw_error);
    }
}

#[test]
fn dedup_key_ignores_raw_error_but_nothing_else() {
    let mut a = record(42);
    let mut b = a.clone();
    b.raw_error = a.raw_error.wrapping_add(1);
    assert_eq!(a, b);

    a.path = Some("/tmp/other.o".to_string());
    assert_ne!(a, b);
}
