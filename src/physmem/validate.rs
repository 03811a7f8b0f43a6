use crate::config::PhysmemConfig;
use crate::device::DeviceConfig;
use crate::error::{PhysmemError, PhysmemResult};
use crate::physmem::flags::AllocFlags;
use crate::physmem::mapping::validate_mapping_table;
use crate::utils::{align_up, is_aligned};

/// A client request for a RAM backed PMR.
///
/// `size`, `chunk_size` and `log2_page_size` are normalized in place by
/// [`validate_params`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub size: u64,
    pub chunk_size: u64,
    pub num_phys_chunks: u32,
    pub num_virt_chunks: u32,
    pub mapping_table: Vec<u32>,
    pub log2_page_size: u32,
    pub flags: AllocFlags,
    pub annotation: String,
    pub pid: u32,
}

impl AllocationRequest {
    /// A fully backed, single chunk request.
    #[must_use]
    pub fn new(size: u64, log2_page_size: u32) -> Self {
        Self {
            size,
            chunk_size: size,
            num_phys_chunks: 1,
            num_virt_chunks: 1,
            mapping_table: vec![0],
            log2_page_size,
            flags: AllocFlags::default(),
            annotation: String::new(),
            pid: 0,
        }
    }

    /// Describe a sparse layout: `num_virt_chunks` chunks of `chunk_size`,
    /// of which those listed in `mapping_table` are backed.
    #[must_use]
    pub fn sparse(mut self, chunk_size: u64, num_virt_chunks: u32, mapping_table: Vec<u32>) -> Self {
        self.chunk_size = chunk_size;
        self.num_virt_chunks = num_virt_chunks;
        #[allow(clippy::cast_possible_truncation)]
        {
            self.num_phys_chunks = mapping_table.len() as u32;
        }
        self.mapping_table = mapping_table;
        self
    }

    #[must_use]
    pub const fn flags(mut self, flags: AllocFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn annotation(mut self, annotation: &str) -> Self {
        self.annotation = annotation.to_owned();
        self
    }

    #[must_use]
    pub const fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Sparse if not every virtual chunk is backed, or if there is more
    /// than one chunk at all.
    #[must_use]
    pub const fn is_sparse(&self) -> bool {
        self.num_virt_chunks != self.num_phys_chunks || self.num_virt_chunks > 1
    }
}

/// Limits a request is validated against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits<'a> {
    pub os_page_shift: u32,
    pub heap_page_shifts: &'a [u32],
    pub max_pmr_size: u64,
}

impl<'a> ValidationLimits<'a> {
    #[must_use]
    pub fn new(config: &PhysmemConfig, device: &'a DeviceConfig) -> Self {
        Self {
            os_page_shift: config.os_page_shift,
            heap_page_shifts: &device.heap_page_shifts,
            max_pmr_size: config.max_pmr_size,
        }
    }
}

/// Checks a request and normalizes its alignment, size and chunk size.
///
/// Non-sparse requests have their alignment raised to at least the OS page
/// size and their size rounded up to whole OS pages. The request is only
/// written to when every check passes.
///
/// # Errors
/// Returns the first failing check; see the individual variants of
/// [`PhysmemError`].
pub fn validate_params(limits: &ValidationLimits<'_>, req: &mut AllocationRequest) -> PhysmemResult<()> {
    let mut log2_page_size = req.log2_page_size;
    let mut size = req.size;
    let mut chunk_size = req.chunk_size;

    if req.num_virt_chunks == 0 {
        log::error!("validate_params: Number of virtual chunks cannot be 0");
        return Err(PhysmemError::InvalidParams);
    }

    if !limits.heap_page_shifts.contains(&log2_page_size)
        || log2_page_size >= u64::BITS
        || limits.os_page_shift >= u64::BITS
    {
        log::error!(
            "page size of {:#x} is invalid.",
            1u64.checked_shl(log2_page_size).unwrap_or(0)
        );
        return Err(PhysmemError::InvalidParams);
    }

    if size > limits.max_pmr_size {
        log::error!(
            "PMR size exceeds limit #Chunks: {} ChunkSz {:#x}",
            req.num_virt_chunks,
            1u64 << log2_page_size
        );
        return Err(PhysmemError::TooLarge {
            size,
            limit: limits.max_pmr_size,
        });
    }

    if !req.flags.has_legal_cache_mode() {
        log::error!(
            "Request for coherency on one side but uncached on the other (cpu {:?}, gpu {:?})",
            req.flags.cpu_cache,
            req.flags.gpu_cache
        );
        return Err(PhysmemError::UnsupportedCacheMode);
    }

    if req.flags.zero_on_alloc && req.flags.poison_on_alloc {
        log::error!("validate_params: Zero on Alloc and Poison on Alloc are mutually exclusive.");
        return Err(PhysmemError::InvalidParams);
    }

    if req.is_sparse() {
        if limits.os_page_shift > log2_page_size {
            log::error!(
                "validate_params: Invalid log2-contiguity for sparse allocation. Requested {log2_page_size}, required minimum {}",
                limits.os_page_shift
            );
            return Err(PhysmemError::InvalidParams);
        }

        if chunk_size != 1u64 << log2_page_size {
            log::error!(
                "validate_params: Invalid chunk size for sparse allocation. Requested {chunk_size:#x}, must be same as page size {:#x}.",
                1u64 << log2_page_size
            );
            return Err(PhysmemError::NotPageMultiple);
        }

        let Some(virt_size) = u64::from(req.num_virt_chunks).checked_mul(chunk_size) else {
            log::error!(
                "validate_params: {} virtual chunks of {chunk_size:#x} bytes overflow",
                req.num_virt_chunks
            );
            return Err(PhysmemError::TooLarge {
                size,
                limit: limits.max_pmr_size,
            });
        };
        if virt_size != size {
            log::error!(
                "validate_params: Total alloc size ({size:#x}) is not equal to virtual chunks * chunk size ({virt_size:#x})"
            );
            return Err(PhysmemError::NotPageMultiple);
        }

        if req.num_phys_chunks > req.num_virt_chunks {
            log::error!(
                "validate_params: Number of physical chunks ({}) must not be greater than number of virtual chunks ({})",
                req.num_phys_chunks,
                req.num_virt_chunks
            );
            return Err(PhysmemError::InvalidParams);
        }
    } else {
        if limits.os_page_shift > log2_page_size {
            log::debug!(
                "raising contiguity from {log2_page_size} to OS page shift {}",
                limits.os_page_shift
            );
            log2_page_size = limits.os_page_shift;
        }

        size = align_up(size, 1u64 << limits.os_page_shift).ok_or_else(|| {
            log::error!("validate_params: size {size:#x} overflows when rounded to a page");
            PhysmemError::TooLarge {
                size,
                limit: limits.max_pmr_size,
            }
        })?;
        chunk_size = size;
    }

    if !is_aligned(size, log2_page_size) {
        log::error!(
            "validate_params: Total size ({size:#x}) must be a multiple of the requested contiguity ({:#x})",
            1u64 << log2_page_size
        );
        return Err(PhysmemError::NotPageMultiple);
    }

    validate_mapping_table(req.num_virt_chunks, req.num_phys_chunks, &req.mapping_table)?;

    req.log2_page_size = log2_page_size;
    req.size = size;
    req.chunk_size = chunk_size;

    Ok(())
}
