use crate::device::{DevPhysAddr, DeviceNode, PageBackend, PageHandle};
use crate::error::{PhysmemError, PhysmemResult};
use crate::pdump::{ReplayHandle, ReplayRecorder, ReplayTarget};
use crate::utils::{align_up, log2_mask};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// A physically contiguous block of device pages with a guaranteed alignment.
///
/// Owns the backend allocation (and its replay declaration, if any). The
/// block is released exactly once: by [`DevPhysMem::free`] or on drop.
pub struct DevPhysMem {
    backend: Arc<dyn PageBackend>,
    handle: Option<PageHandle>,
    raw_paddr: DevPhysAddr,
    dev_paddr: DevPhysAddr,
    size: usize,
    alloc_size: usize,
    replay: Option<(Arc<dyn ReplayRecorder>, ReplayHandle)>,
}

impl fmt::Debug for DevPhysMem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevPhysMem")
            .field("handle", &self.handle)
            .field("raw_paddr", &self.raw_paddr)
            .field("dev_paddr", &self.dev_paddr)
            .field("size", &self.size)
            .field("alloc_size", &self.alloc_size)
            .field("replay", &self.replay.as_ref().map(|(_, h)| h))
            .finish_non_exhaustive()
    }
}

impl DevPhysMem {
    /// Allocates `size` bytes whose device physical address is aligned to
    /// `1 << log2_align`.
    ///
    /// `os_page_shift` is the host page granularity, reported to the replay
    /// recorder as the page size of unaligned blocks.
    ///
    /// If the backend's first block is misaligned it is freed and a block
    /// `(1 << log2_align) - 1` bytes larger is allocated instead; the aligned
    /// address inside it always leaves room for `size` bytes.
    ///
    /// With `init_value` set, the whole block is mapped, filled with that byte,
    /// cleaned for the device and unmapped before returning. Any failure on
    /// the way releases the block.
    pub fn alloc(
        device: &DeviceNode,
        size: usize,
        log2_align: u32,
        os_page_shift: u32,
        init_value: Option<u8>,
        replay: Option<&ReplayTarget>,
    ) -> PhysmemResult<Self> {
        if log2_align >= u64::BITS || os_page_shift >= u64::BITS {
            return Err(PhysmemError::InvalidParams);
        }

        let backend = device.page_backend();
        let mask = log2_mask(log2_align);

        let (mut handle, mut raw_paddr) = backend.alloc(size).inspect_err(|e| {
            log::error!("page alloc of {size:#x} bytes failed: {e}");
        })?;
        let mut alloc_size = size;
        let mut dev_paddr = raw_paddr;

        // Over-allocate only when the first block turns out misaligned.
        if log2_align != 0 && raw_paddr.0 & mask != 0 {
            backend.free(handle);

            #[allow(clippy::cast_possible_truncation)]
            let over = size
                .checked_add(mask as usize)
                .ok_or(PhysmemError::OutOfMemory)?;
            (handle, raw_paddr) = backend.alloc(over).inspect_err(|e| {
                log::error!("over-allocation of {over:#x} bytes failed: {e}");
            })?;
            alloc_size = over;
            let Some(aligned) = align_up(raw_paddr.0, mask + 1) else {
                log::error!("block at {:#x} cannot be aligned to {:#x}", raw_paddr.0, mask + 1);
                backend.free(handle);
                return Err(PhysmemError::OutOfMemory);
            };
            dev_paddr = DevPhysAddr(aligned);
            log::debug!(
                "realigned {:#x} to {:#x} using {alloc_size:#x} bytes",
                raw_paddr.0,
                dev_paddr.0
            );
        }

        let mut mem = Self {
            backend: backend.clone(),
            handle: Some(handle),
            raw_paddr,
            dev_paddr,
            size,
            alloc_size,
            replay: None,
        };

        if let (Some(recorder), Some(target)) = (device.replay_recorder(), replay) {
            let page_shift = if log2_align != 0 { log2_align } else { os_page_shift };
            let page_size = 1u64 << page_shift;
            match recorder.malloc(target, size as u64, page_size) {
                Ok(h) => mem.replay = Some((recorder.clone(), h)),
                Err(e) => log::error!("Allocating pages failed for replay: {e}"),
            }
        }

        if let Some(value) = init_value {
            mem.initialize(value, replay)?;
        }

        Ok(mem)
    }

    fn initialize(&self, value: u8, replay: Option<&ReplayTarget>) -> PhysmemResult<()> {
        let Some(handle) = self.handle.as_ref() else {
            return Err(PhysmemError::InvalidParams);
        };
        let backend = self.backend.as_ref();

        let cpu_addr = backend
            .map(handle, self.alloc_size, self.dev_paddr)
            .inspect_err(|_| log::error!("Unable to map the allocated page"))?;
        let mapping = CpuMapping {
            backend,
            handle,
            cpu_addr,
            len: self.alloc_size,
            mapped: true,
        };

        // SAFETY: the backend guarantees the mapping is valid for alloc_size
        // bytes until unmapped, and nothing else references it yet.
        unsafe {
            std::ptr::write_bytes(cpu_addr.as_ptr(), value, self.alloc_size);
        }

        backend
            .clean(handle, 0, self.alloc_size)
            .inspect_err(|_| log::error!("Unable to clean the allocated page"))?;

        if let (Some((recorder, _)), Some(target)) = (self.replay.as_ref(), replay) {
            self.record_contents(recorder.as_ref(), target, &mapping);
        }

        mapping.unmap()
    }

    /// Stores the block contents in the parameter stream and emits the load
    /// statement. Never fails the allocation.
    fn record_contents(&self, recorder: &dyn ReplayRecorder, target: &ReplayTarget, mapping: &CpuMapping<'_>) {
        #[allow(clippy::cast_possible_truncation)]
        let offset = (self.dev_paddr.0 - self.raw_paddr.0) as usize;
        let bytes = &mapping.bytes()[offset..offset + self.size];

        match recorder.write_parameter_blob(bytes) {
            Ok(blob) => {
                if let Err(e) = recorder.load_blob(target, 0, self.size as u64, &blob) {
                    log::error!("Failed to write LDB statement to script file, error {e}");
                }
            }
            // Not in the capture range.
            Err(PhysmemError::PdumpNotAllowed) => {}
            Err(e) => log::error!("Failed to write device allocation to parameter file, error {e}"),
        }
    }

    /// Aligned device physical address of the block.
    #[must_use]
    pub const fn dev_paddr(&self) -> DevPhysAddr {
        self.dev_paddr
    }

    /// Base address of the backend block, before alignment.
    #[must_use]
    pub const fn raw_paddr(&self) -> DevPhysAddr {
        self.raw_paddr
    }

    /// Requested size.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Size actually taken from the backend (includes any over-allocation).
    #[must_use]
    pub const fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    #[must_use]
    pub const fn has_replay_handle(&self) -> bool {
        self.replay.is_some()
    }

    /// Releases the pages and the replay declaration.
    pub fn free(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.free(handle);
        }
        if let Some((recorder, handle)) = self.replay.take() {
            recorder.free(handle);
        }
    }
}

impl Drop for DevPhysMem {
    fn drop(&mut self) {
        self.release();
    }
}

/// A live CPU mapping of a page block; unmapped on drop unless
/// [`CpuMapping::unmap`] already did so.
struct CpuMapping<'a> {
    backend: &'a dyn PageBackend,
    handle: &'a PageHandle,
    cpu_addr: NonNull<u8>,
    len: usize,
    mapped: bool,
}

impl CpuMapping<'_> {
    fn bytes(&self) -> &[u8] {
        // SAFETY: valid for len bytes while mapped.
        unsafe { std::slice::from_raw_parts(self.cpu_addr.as_ptr(), self.len) }
    }

    fn unmap(mut self) -> PhysmemResult<()> {
        self.mapped = false;
        self.backend.unmap(self.handle, self.cpu_addr).inspect_err(|e| {
            log::error!("Unable to unmap the allocated page: {e}");
        })
    }
}

impl Drop for CpuMapping<'_> {
    fn drop(&mut self) {
        if self.mapped {
            if let Err(e) = self.backend.unmap(self.handle, self.cpu_addr) {
                log::warn!("unmap after failed initialization: {e}");
            }
        }
    }
}
