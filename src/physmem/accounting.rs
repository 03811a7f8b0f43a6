use crate::device::DeviceNode;
use crate::device::heap::{PhysHeapRole, PhysHeapType};

/// Memory a device can draw on, split by backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DevMemSize {
    /// Sum of all LMA regions of the CPU and GPU local heaps.
    pub lma: u64,
    /// System RAM, if any of those heaps is UMA.
    pub uma: u64,
}

/// Totals the memory behind the device's CPU-local and GPU-local heaps.
///
/// Walks the registered heap list rather than the per-role table, which may
/// bind one heap to several roles. A region whose size cannot be read
/// counts as zero. UMA heaps contribute `ram_size` once in total.
#[must_use]
pub fn max_dev_mem_size(device: &DeviceNode, ram_size: u64) -> DevMemSize {
    let mut total = DevMemSize::default();

    for heap in device.registered_heaps() {
        if !device.is_heap_for_role(heap, PhysHeapRole::GpuLocal)
            && !device.is_heap_for_role(heap, PhysHeapRole::CpuLocal)
        {
            continue;
        }

        match heap.heap_type() {
            PhysHeapType::Lma => {
                for region_id in 0..heap.number_of_regions() {
                    let size = heap.region_size(region_id).unwrap_or_else(|e| {
                        log::warn!("region {region_id} size unavailable: {e}");
                        0
                    });
                    total.lma = total.lma.saturating_add(size);
                }
            }
            PhysHeapType::Uma => {
                if total.uma == 0 {
                    total.uma = ram_size;
                }
            }
        }
    }

    total
}
