use crate::device::heap::PhysHeapRole;
use crate::device::{DeviceId, DeviceNode};
use crate::error::PhysmemResult;
use crate::physmem::flags::AllocFlags;
use std::fmt;
use std::sync::Arc;

/// A physical memory resource handed back to clients.
pub trait Pmr: fmt::Debug + Send + Sync {
    /// Device the PMR's pages belong to.
    fn device_id(&self) -> DeviceId;

    /// Size of the virtual range described by the PMR.
    fn logical_size(&self) -> u64;

    /// Pin the physical addresses so they stay valid until unlocked.
    fn lock_sys_phys_addresses(&self) -> PhysmemResult<()>;

    fn unlock_sys_phys_addresses(&self) -> PhysmemResult<()>;
}

pub type PmrHandle = Arc<dyn Pmr>;

/// The client connection an allocation was made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub pid: u32,
}

/// Normalized parameters handed to a heap's PMR constructor.
#[derive(Debug, Clone, Copy)]
pub struct PmrCreateArgs<'a> {
    pub role: PhysHeapRole,
    pub size: u64,
    pub chunk_size: u64,
    pub num_phys_chunks: u32,
    pub num_virt_chunks: u32,
    pub mapping_table: &'a [u32],
    pub log2_page_size: u32,
    /// Host page granularity the request was validated against.
    pub os_page_shift: u32,
    pub flags: AllocFlags,
    pub annotation: &'a str,
    pub pid: u32,
}

/// Heap-specific constructor for RAM backed PMRs.
pub trait PmrFactory: Send + Sync {
    fn create_ram_backed_pmr(
        &self,
        connection: Option<&Connection>,
        device: &DeviceNode,
        args: &PmrCreateArgs<'_>,
    ) -> PhysmemResult<PmrHandle>;
}

/// An exported PMR that another connection may import.
#[derive(Debug, Clone)]
pub struct PmrExport {
    pmr: PmrHandle,
    password: u64,
}

impl PmrExport {
    #[must_use]
    pub fn new(pmr: PmrHandle, password: u64) -> Self {
        Self { pmr, password }
    }

    /// Device that owns the exported PMR.
    #[must_use]
    pub fn device_id(&self) -> DeviceId {
        self.pmr.device_id()
    }

    #[must_use]
    pub fn pmr(&self) -> &PmrHandle {
        &self.pmr
    }

    #[must_use]
    pub const fn password(&self) -> u64 {
        self.password
    }
}

/// Backend that turns an export back into a PMR reference.
pub trait PmrImporter: Send + Sync {
    fn import_pmr(
        &self,
        export: &PmrExport,
        password: u64,
        size: u64,
        log2_contig: u32,
    ) -> PhysmemResult<PmrHandle>;
}
