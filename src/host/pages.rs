use crate::device::{DevPhysAddr, PageBackend, PageHandle};
use crate::error::{PhysmemError, PhysmemResult};
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};

/// Page backend serving blocks from anonymous host mappings.
///
/// Device physical addresses are the host virtual addresses of the
/// mappings, as on a UMA system with an identity IOMMU.
#[derive(Debug)]
pub struct HostPageBackend {
    limit: Option<u64>,
    in_use: AtomicU64,
    outstanding: AtomicUsize,
}

impl Default for HostPageBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPageBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            limit: None,
            in_use: AtomicU64::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Refuse allocations once `bytes` are in use.
    #[must_use]
    pub const fn with_limit(bytes: u64) -> Self {
        Self {
            limit: Some(bytes),
            ..Self::new()
        }
    }

    /// Number of blocks allocated and not yet freed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.in_use.load(Ordering::SeqCst)
    }

    fn reserve(&self, size: u64) -> PhysmemResult<()> {
        let Some(limit) = self.limit else {
            self.in_use.fetch_add(size, Ordering::SeqCst);
            return Ok(());
        };
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(size).filter(|&n| n <= limit)
            })
            .map(|_| ())
            .map_err(|_| PhysmemError::OutOfMemory)
    }
}

impl PageBackend for HostPageBackend {
    fn alloc(&self, size: usize) -> PhysmemResult<(PageHandle, DevPhysAddr)> {
        if size == 0 {
            return Err(PhysmemError::InvalidParams);
        }
        self.reserve(size as u64)?;

        // SAFETY: anonymous private mapping at a kernel-chosen address.
        let ret = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ret == libc::MAP_FAILED {
            self.in_use.fetch_sub(size as u64, Ordering::SeqCst);
            let err = io::Error::last_os_error();
            log::error!("mmap of {size:#x} bytes failed: {err}");
            return Err(match err.raw_os_error() {
                Some(libc::ENOMEM) => PhysmemError::OutOfMemory,
                _ => PhysmemError::Io(err),
            });
        }

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let addr = ret as u64;
        Ok((PageHandle::new(addr, size), DevPhysAddr(addr)))
    }

    fn free(&self, handle: PageHandle) {
        // SAFETY: the handle came from our mmap and is freed exactly once.
        let ret = unsafe { libc::munmap(handle.raw() as *mut libc::c_void, handle.size()) };
        if ret != 0 {
            log::error!(
                "munmap of {:#x} failed: {}",
                handle.raw(),
                io::Error::last_os_error()
            );
            return;
        }
        self.in_use.fetch_sub(handle.size() as u64, Ordering::SeqCst);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    fn map(&self, handle: &PageHandle, size: usize, _addr: DevPhysAddr) -> PhysmemResult<NonNull<u8>> {
        if size > handle.size() {
            return Err(PhysmemError::InvalidParams);
        }
        NonNull::new(handle.raw() as *mut u8).ok_or(PhysmemError::InvalidParams)
    }

    fn unmap(&self, _handle: &PageHandle, _cpu_addr: NonNull<u8>) -> PhysmemResult<()> {
        Ok(())
    }

    fn clean(&self, handle: &PageHandle, offset: usize, size: usize) -> PhysmemResult<()> {
        if offset.saturating_add(size) > handle.size() {
            return Err(PhysmemError::InvalidParams);
        }
        // Coherent host memory: ordering is all the device side needs.
        fence(Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_map_free() {
        let backend = HostPageBackend::new();
        let (handle, addr) = backend.alloc(8192).unwrap();
        assert_eq!(addr.0, handle.raw());
        assert_eq!(backend.outstanding(), 1);

        let ptr = backend.map(&handle, 8192, addr).unwrap();
        // SAFETY: freshly mapped, 8192 bytes long.
        unsafe { ptr.as_ptr().add(8191).write(7) };
        backend.clean(&handle, 0, 8192).unwrap();
        backend.unmap(&handle, ptr).unwrap();

        backend.free(handle);
        assert_eq!(backend.outstanding(), 0);
        assert_eq!(backend.bytes_in_use(), 0);
    }

    #[test]
    fn limit_is_enforced() {
        let backend = HostPageBackend::with_limit(8192);
        let (a, _) = backend.alloc(4096).unwrap();
        let (b, _) = backend.alloc(4096).unwrap();
        assert!(matches!(backend.alloc(4096), Err(PhysmemError::OutOfMemory)));
        backend.free(a);
        backend.free(b);
        assert_eq!(backend.bytes_in_use(), 0);
    }

    #[test]
    fn zero_sized_alloc_rejected() {
        assert!(matches!(HostPageBackend::new().alloc(0), Err(PhysmemError::InvalidParams)));
    }
}
