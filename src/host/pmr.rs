use crate::device::heap::PhysHeapRole;
use crate::device::{DevPhysAddr, DeviceId, DeviceNode};
use crate::error::{PhysmemError, PhysmemResult};
use crate::physmem::flags::AllocFlags;
use crate::physmem::page::DevPhysMem;
use crate::pmr::{Connection, Pmr, PmrCreateArgs, PmrExport, PmrFactory, PmrHandle, PmrImporter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Byte written to freshly allocated pages when poisoning is requested.
pub const POISON_ON_ALLOC_VALUE: u8 = 0x6B;

/// A PMR whose physical chunks are individual [`DevPhysMem`] blocks.
#[derive(Debug)]
pub struct RamPmr {
    device_id: DeviceId,
    role: PhysHeapRole,
    size: u64,
    chunk_size: u64,
    log2_page_size: u32,
    flags: AllocFlags,
    annotation: String,
    pid: u32,
    /// Physical chunk backing each virtual chunk.
    virt_to_phys: Vec<Option<u32>>,
    chunks: Vec<DevPhysMem>,
    lock_count: AtomicU32,
}

impl RamPmr {
    #[must_use]
    pub const fn role(&self) -> PhysHeapRole {
        self.role
    }

    #[must_use]
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    #[must_use]
    pub const fn log2_page_size(&self) -> u32 {
        self.log2_page_size
    }

    #[must_use]
    pub const fn flags(&self) -> &AllocFlags {
        &self.flags
    }

    #[must_use]
    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn num_phys_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Device address backing virtual chunk `virt_chunk`, if it is backed.
    #[must_use]
    pub fn chunk_dev_paddr(&self, virt_chunk: u32) -> Option<DevPhysAddr> {
        let phys = (*self.virt_to_phys.get(virt_chunk as usize)?)?;
        self.chunks.get(phys as usize).map(DevPhysMem::dev_paddr)
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock_count.load(Ordering::SeqCst) > 0
    }
}

impl Pmr for RamPmr {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn logical_size(&self) -> u64 {
        self.size
    }

    fn lock_sys_phys_addresses(&self) -> PhysmemResult<()> {
        self.lock_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlock_sys_phys_addresses(&self) -> PhysmemResult<()> {
        self.lock_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| {
                log::error!("unlock of PMR that is not locked");
                PhysmemError::InvalidParams
            })
    }
}

/// Constructor backing every physical chunk with its own aligned block
/// from the device page backend.
#[derive(Debug, Default)]
pub struct HostPmrFactory;

impl HostPmrFactory {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Typed variant of [`PmrFactory::create_ram_backed_pmr`].
    pub fn create(&self, device: &DeviceNode, args: &PmrCreateArgs<'_>) -> PhysmemResult<RamPmr> {
        let fill = if args.flags.zero_on_alloc {
            Some(0)
        } else if args.flags.poison_on_alloc {
            Some(POISON_ON_ALLOC_VALUE)
        } else {
            None
        };
        let chunk_size = usize::try_from(args.chunk_size).map_err(|_| PhysmemError::InvalidParams)?;

        let table = args
            .mapping_table
            .get(..args.num_phys_chunks as usize)
            .ok_or(PhysmemError::InvalidParams)?;
        let mut virt_to_phys = vec![None; args.num_virt_chunks as usize];
        let mut chunks = Vec::with_capacity(args.num_phys_chunks as usize);

        for (phys, &virt) in (0u32..).zip(table) {
            let slot = virt_to_phys
                .get_mut(virt as usize)
                .ok_or(PhysmemError::InvalidParams)?;
            *slot = Some(phys);
            // An early return drops `chunks`, releasing everything so far.
            chunks.push(DevPhysMem::alloc(
                device,
                chunk_size,
                args.log2_page_size,
                args.os_page_shift,
                fill,
                None,
            )?);
        }

        log::debug!(
            "created {:?} PMR '{}' of {:#x} bytes ({} of {} chunks backed)",
            args.role,
            args.annotation,
            args.size,
            args.num_phys_chunks,
            args.num_virt_chunks
        );

        Ok(RamPmr {
            device_id: device.id(),
            role: args.role,
            size: args.size,
            chunk_size: args.chunk_size,
            log2_page_size: args.log2_page_size,
            flags: args.flags,
            annotation: args.annotation.to_owned(),
            pid: args.pid,
            virt_to_phys,
            chunks,
            lock_count: AtomicU32::new(0),
        })
    }
}

impl PmrFactory for HostPmrFactory {
    fn create_ram_backed_pmr(
        &self,
        _connection: Option<&Connection>,
        device: &DeviceNode,
        args: &PmrCreateArgs<'_>,
    ) -> PhysmemResult<PmrHandle> {
        Ok(Arc::new(self.create(device, args)?))
    }
}

/// Importer checking the export password and requested geometry.
#[derive(Debug, Default)]
pub struct HostPmrImporter;

impl PmrImporter for HostPmrImporter {
    fn import_pmr(
        &self,
        export: &PmrExport,
        password: u64,
        size: u64,
        _log2_contig: u32,
    ) -> PhysmemResult<PmrHandle> {
        if password != export.password() {
            log::error!("import_pmr: password mismatch");
            return Err(PhysmemError::InvalidParams);
        }
        if size != export.pmr().logical_size() {
            log::error!(
                "import_pmr: size mismatch ({size:#x} vs {:#x})",
                export.pmr().logical_size()
            );
            return Err(PhysmemError::InvalidParams);
        }
        Ok(export.pmr().clone())
    }
}
