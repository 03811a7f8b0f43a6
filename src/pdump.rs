//! Hooks for the parameter-dump (capture/replay) recorder.
//!
//! A recorder is optional per device. Page allocations declare themselves to
//! it and, when pre-initialized, store their contents so a replay can load
//! the same bytes back.

use crate::error::PhysmemResult;

/// Handle to an allocation declared to the recorder.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ReplayHandle(pub u64);

/// Location of a blob written to the parameter stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBlob {
    pub file_name: String,
    pub offset: u64,
}

/// Symbolic name a replayed allocation is known by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayTarget {
    pub dev_space: String,
    pub symbolic_name: String,
}

pub trait ReplayRecorder: Send + Sync {
    fn malloc(&self, target: &ReplayTarget, size: u64, page_size: u64) -> PhysmemResult<ReplayHandle>;

    /// Write raw bytes to the parameter stream.
    ///
    /// Returns [`PhysmemError::PdumpNotAllowed`](crate::error::PhysmemError::PdumpNotAllowed)
    /// when capture is currently not active.
    fn write_parameter_blob(&self, data: &[u8]) -> PhysmemResult<ParamBlob>;

    /// Emit a statement loading `blob` into the allocation at `offset`.
    fn load_blob(&self, target: &ReplayTarget, offset: u64, size: u64, blob: &ParamBlob) -> PhysmemResult<()>;

    fn free(&self, handle: ReplayHandle);
}
