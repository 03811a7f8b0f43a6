use crate::device::heap::PhysHeapRole;
use crate::pmr::PmrHandle;
use thiserror::Error;

/// Why a mapping table entry was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapIndexFault {
    OutOfBounds(u32),
    Duplicate(u32),
}

impl std::fmt::Display for MapIndexFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfBounds(idx) => write!(f, "index {idx} is out of bounds"),
            Self::Duplicate(idx) => write!(f, "duplicate index {idx}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PhysmemError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameters")]
    InvalidParams,

    #[error("PMR size {size:#x} exceeds limit {limit:#x}")]
    TooLarge { size: u64, limit: u64 },

    #[error("Size is not a multiple of the page size")]
    NotPageMultiple,

    #[error("Invalid mapping table: {0}")]
    InvalidMapIndexArray(MapIndexFault),

    #[error("Unsupported cache mode combination")]
    UnsupportedCacheMode,

    #[error("No physical heap configured for {0:?}")]
    InvalidHeap(PhysHeapRole),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("PMR not permitted for this device")]
    NotPermitted,

    #[error("Replay capture not allowed in current state")]
    PdumpNotAllowed,

    #[error("Backend Error: {0}")]
    Backend(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

// A convenient alias
pub type PhysmemResult<T> = Result<T, PhysmemError>;

/// Failure of a locked PMR allocation.
///
/// When the PMR was created but locking its physical addresses failed, the
/// PMR is handed back in `pmr` and released through its normal drop path.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct LockedAllocError {
    #[source]
    pub error: PhysmemError,
    pub pmr: Option<PmrHandle>,
}

impl From<PhysmemError> for LockedAllocError {
    fn from(error: PhysmemError) -> Self {
        Self { error, pmr: None }
    }
}
