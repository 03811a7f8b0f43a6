pub mod accounting;
pub mod fault;
pub mod flags;
pub mod import;
pub mod mapping;
pub mod page;
pub mod validate;

use crate::config::PhysmemConfig;
use crate::device::heap::PhysHeapRole;
use crate::device::{DeviceNode, VirtMode};
use crate::error::{LockedAllocError, PhysmemError, PhysmemResult};
use crate::physmem::accounting::DevMemSize;
use crate::physmem::fault::AllocFailInjector;
use crate::physmem::flags::{AllocFlags, FwAllocType, Locality};
use crate::physmem::validate::{AllocationRequest, ValidationLimits, validate_params};
use crate::pmr::{Connection, PmrCreateArgs, PmrExport, PmrHandle, PmrImporter};
use crate::stats::{OomStat, ProcessStatsSink};
use std::fmt;
use std::sync::Arc;

/// Picks the physical heap role for an allocation.
///
/// Raw firmware allocations are only served by a host driver brokering
/// memory for its guests.
///
/// # Errors
/// [`PhysmemError::InvalidParams`] for a raw firmware request on a non-host device.
pub fn select_phys_heap(flags: &AllocFlags, virt_mode: VirtMode) -> PhysmemResult<PhysHeapRole> {
    match (flags.locality, virt_mode) {
        (Locality::Firmware(FwAllocType::Raw), VirtMode::Host) => Ok(PhysHeapRole::FwGuest),
        (Locality::Firmware(FwAllocType::Raw), mode) => {
            log::error!("raw firmware allocation requested in {mode:?} mode");
            Err(PhysmemError::InvalidParams)
        }
        (Locality::Firmware(_), _) => Ok(PhysHeapRole::FwLocal),
        (Locality::Cpu, _) => Ok(PhysHeapRole::CpuLocal),
        (Locality::Gpu, _) => Ok(PhysHeapRole::GpuLocal),
    }
}

/// Applies the device's budget policy, if it has one.
///
/// # Errors
/// Whatever the policy returns on rejection.
pub fn check_mem_alloc_size(device: &DeviceNode, chunk_size: u64, num_phys_chunks: u32) -> PhysmemResult<()> {
    let Some(check) = device.config().check_mem_alloc_size.as_ref() else {
        return Ok(());
    };
    let mem_size = chunk_size.saturating_mul(u64::from(num_phys_chunks));
    check(mem_size).inspect_err(|e| {
        log::error!("allocation of {mem_size:#x} bytes rejected by budget policy: {e}");
    })
}

/// Entry point for RAM backed PMR creation.
///
/// Holds the host limits and the optional statistics and fault hooks; the
/// per-device state lives in [`DeviceNode`]. Callers serialize access per
/// device.
pub struct Physmem {
    config: PhysmemConfig,
    stats: Option<Arc<dyn ProcessStatsSink>>,
    alloc_fail: Option<AllocFailInjector>,
}

impl fmt::Debug for Physmem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Physmem")
            .field("config", &self.config)
            .field("stats", &self.stats.is_some())
            .field("alloc_fail", &self.alloc_fail)
            .finish()
    }
}

impl Physmem {
    #[must_use]
    pub fn new(config: PhysmemConfig) -> Self {
        let alloc_fail = config
            .alloc_fail_after
            .filter(|_| cfg!(debug_assertions))
            .map(AllocFailInjector::new);

        Self {
            config,
            stats: None,
            alloc_fail,
        }
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<dyn ProcessStatsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &PhysmemConfig {
        &self.config
    }

    /// Validates and normalizes `request` against this host and `device`.
    ///
    /// # Errors
    /// See [`validate_params`].
    pub fn validate_request(&self, device: &DeviceNode, request: &mut AllocationRequest) -> PhysmemResult<()> {
        let limits = ValidationLimits::new(&self.config, device.config());
        validate_params(&limits, request)
    }

    /// Creates a RAM backed PMR on the heap selected by the request flags.
    ///
    /// The request is validated (and normalized in place), the heap is
    /// resolved, the budget policy consulted, and finally the heap's
    /// constructor invoked. Nothing is allocated unless every check passes.
    ///
    /// # Errors
    /// Validation, heap, budget and backend errors, unchanged.
    pub fn new_ram_backed_pmr(
        &self,
        connection: Option<&Connection>,
        device: &DeviceNode,
        request: &mut AllocationRequest,
    ) -> PhysmemResult<PmrHandle> {
        self.validate_request(device, request)?;

        let role = select_phys_heap(&request.flags, device.config().virt_mode)?;

        let factory = match (device.phys_heap(role), device.pmr_factory(role)) {
            (Some(_), Some(factory)) => factory,
            _ => {
                log::error!(
                    "Requested allocation on device {:?} from an invalid heap ({role:?})",
                    device.id()
                );
                return Err(PhysmemError::InvalidHeap(role));
            }
        };

        check_mem_alloc_size(device, request.chunk_size, request.num_phys_chunks)?;

        if let Some(inj) = &self.alloc_fail {
            if inj.should_fail() {
                log::error!("new_ram_backed_pmr failed on {} allocation.", inj.current());
                return Err(PhysmemError::OutOfMemory);
            }
        }

        let args = PmrCreateArgs {
            role,
            size: request.size,
            chunk_size: request.chunk_size,
            num_phys_chunks: request.num_phys_chunks,
            num_virt_chunks: request.num_virt_chunks,
            mapping_table: &request.mapping_table,
            log2_page_size: request.log2_page_size,
            os_page_shift: self.config.os_page_shift,
            flags: request.flags,
            annotation: &request.annotation,
            pid: request.pid,
        };

        factory
            .create_ram_backed_pmr(connection, device, &args)
            .inspect_err(|e| {
                log::debug!("{role:?} PMR constructor failed: {e}");
                if let Some(stats) = &self.stats {
                    let pid = connection.map_or(request.pid, |c| c.pid);
                    stats.record_oom(OomStat::PhysmemCount, pid);
                }
            })
    }

    /// Like [`Physmem::new_ram_backed_pmr`], then locks the PMR's physical
    /// addresses.
    ///
    /// # Errors
    /// On a lock failure the created PMR is returned inside the error for
    /// the caller to release.
    pub fn new_ram_backed_locked_pmr(
        &self,
        connection: Option<&Connection>,
        device: &DeviceNode,
        request: &mut AllocationRequest,
    ) -> Result<PmrHandle, LockedAllocError> {
        let pmr = self.new_ram_backed_pmr(connection, device, request)?;

        match pmr.lock_sys_phys_addresses() {
            Ok(()) => Ok(pmr),
            Err(error) => {
                log::error!("failed to lock physical addresses of new PMR: {error}");
                Err(LockedAllocError {
                    error,
                    pmr: Some(pmr),
                })
            }
        }
    }

    /// Memory available to `device`, split into region backed and system
    /// RAM backed totals.
    #[must_use]
    pub fn max_dev_mem_size(&self, _connection: Option<&Connection>, device: &DeviceNode) -> DevMemSize {
        accounting::max_dev_mem_size(device, self.config.ram_size)
    }

    /// Imports an exported PMR for `device`.
    ///
    /// # Errors
    /// See [`import::import_pmr`].
    #[allow(clippy::too_many_arguments)]
    pub fn import_pmr(
        &self,
        importer: &dyn PmrImporter,
        connection: Option<&Connection>,
        device: &DeviceNode,
        export: &PmrExport,
        password: u64,
        size: u64,
        log2_contig: u32,
    ) -> PhysmemResult<PmrHandle> {
        import::import_pmr(importer, connection, device, export, password, size, log2_contig)
    }
}
