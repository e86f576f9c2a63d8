//! Type-erased facade over [`crate::supervisor::SandboxedProcess`]: the
//! typed API is generic enough to be awkward behind a trait object (here,
//! across sandboxed vs. unsandboxed backends rather than across OSes), so
//! this module re-states it as a plain trait object a caller can hold
//! without naming the concrete backend type.

use crate::{result::SandboxedProcessResult, supervisor::SandboxedProcess};

/// Alias kept distinct from the blanket impl below for readability at
/// call sites.
pub type BoxedProcess = Box<dyn SandboxedProcess>;

/// Starts, awaits and returns the result of a boxed process in one call,
/// for callers that have no use for the intermediate `start()`/`kill()`
/// granularity. Returns `anyhow::Error` rather than the typed [`Error`]:
/// callers at this facade are expected to be reporting/logging the failure
/// rather than matching on its kind, which the typed core paths
/// (`SandboxedProcess`, `DetouredProcess`, ...) still do.
pub async fn run_to_completion(process: BoxedProcess) -> anyhow::Result<SandboxedProcessResult> {
    process.start()?;
    process.get_result().await.map_err(Into::into)
}
