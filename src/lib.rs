//! Physical memory allocation front end for a GPU memory manager.
//!
//! Requests for RAM backed PMRs (physical memory resources) are validated,
//! routed to a physical heap, checked against the device's budget policy and
//! finally handed to the heap's PMR constructor. The [`host`] module provides
//! a system-RAM backend for all of the pluggable pieces.

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod pdump;
pub mod physmem;
pub mod pmr;
pub mod stats;
pub mod utils;

// Re-export the main entry points for easy access
pub use config::PhysmemConfig;
pub use device::heap::{PhysHeapRole, PhysHeapType};
pub use device::{DeviceConfig, DeviceId, DeviceNode, VirtMode};
pub use error::{LockedAllocError, PhysmemError, PhysmemResult};
pub use physmem::Physmem;
pub use physmem::flags::{AllocFlags, CacheMode, FwAllocType};
pub use physmem::validate::AllocationRequest;
pub use pmr::{Pmr, PmrHandle};
