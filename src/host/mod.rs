//! Host OS queries and a system-RAM page backend.

pub mod pages;
pub mod pmr;

pub use pages::HostPageBackend;
pub use pmr::{HostPmrFactory, HostPmrImporter, RamPmr};

const FALLBACK_PAGE_SHIFT: u32 = 12;

/// log2 of the host page size.
#[must_use]
pub fn os_page_shift() -> u32 {
    // SAFETY: sysconf has no memory safety preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    match u64::try_from(page_size) {
        Ok(size) if size.is_power_of_two() => size.trailing_zeros(),
        _ => {
            log::warn!("sysconf(_SC_PAGESIZE) returned {page_size}, assuming 4 KiB pages");
            FALLBACK_PAGE_SHIFT
        }
    }
}

#[must_use]
pub fn os_page_size() -> u64 {
    1 << os_page_shift()
}

/// Total physical RAM of the host in bytes, or 0 if it cannot be determined.
#[must_use]
pub fn ram_size() -> u64 {
    // SAFETY: see above.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    match u64::try_from(pages) {
        Ok(pages) => pages.saturating_mul(os_page_size()),
        Err(_) => {
            log::warn!("sysconf(_SC_PHYS_PAGES) failed");
            0
        }
    }
}
