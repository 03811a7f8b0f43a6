#![allow(dead_code)]

use gpu_physmem::device::heap::{LmaHeap, PhysHeap, PhysHeapRegion, PhysHeapRole, PhysHeapType};
use gpu_physmem::host::{HostPageBackend, HostPmrFactory};
use gpu_physmem::pmr::{Connection, Pmr, PmrCreateArgs, PmrFactory, PmrHandle};
use gpu_physmem::stats::{OomStat, ProcessStatsSink};
use gpu_physmem::{DeviceConfig, DeviceId, DeviceNode, PhysmemConfig, PhysmemError, PhysmemResult};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const RAM_SIZE: u64 = 8 << 30;

pub fn config() -> PhysmemConfig {
    PhysmemConfig::new().os_page_shift(12).ram_size(RAM_SIZE)
}

#[derive(Debug)]
pub struct MockPmr {
    pub device_id: DeviceId,
    pub size: u64,
    pub fail_lock: bool,
    pub locks: AtomicU32,
}

impl Pmr for MockPmr {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn logical_size(&self) -> u64 {
        self.size
    }

    fn lock_sys_phys_addresses(&self) -> PhysmemResult<()> {
        if self.fail_lock {
            return Err(PhysmemError::Backend("lock".into()));
        }
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlock_sys_phys_addresses(&self) -> PhysmemResult<()> {
        self.locks.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What a constructor was called with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenArgs {
    pub role: PhysHeapRole,
    pub size: u64,
    pub chunk_size: u64,
    pub num_phys_chunks: u32,
    pub num_virt_chunks: u32,
    pub mapping_table: Vec<u32>,
    pub log2_page_size: u32,
    pub annotation: String,
}

#[derive(Debug, Default)]
pub struct MockFactory {
    pub calls: Mutex<Vec<SeenArgs>>,
    pub fail: bool,
    pub fail_lock: bool,
}

impl MockFactory {
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last(&self) -> SeenArgs {
        self.calls.lock().unwrap().last().cloned().unwrap()
    }
}

impl PmrFactory for MockFactory {
    fn create_ram_backed_pmr(
        &self,
        _connection: Option<&Connection>,
        device: &DeviceNode,
        args: &PmrCreateArgs<'_>,
    ) -> PhysmemResult<PmrHandle> {
        self.calls.lock().unwrap().push(SeenArgs {
            role: args.role,
            size: args.size,
            chunk_size: args.chunk_size,
            num_phys_chunks: args.num_phys_chunks,
            num_virt_chunks: args.num_virt_chunks,
            mapping_table: args.mapping_table.to_vec(),
            log2_page_size: args.log2_page_size,
            annotation: args.annotation.to_owned(),
        });
        if self.fail {
            return Err(PhysmemError::Backend("boom".into()));
        }
        Ok(Arc::new(MockPmr {
            device_id: device.id(),
            size: args.size,
            fail_lock: self.fail_lock,
            locks: AtomicU32::new(0),
        }))
    }
}

#[derive(Debug, Default)]
pub struct MockStats {
    pub events: Mutex<Vec<(OomStat, u32)>>,
}

impl ProcessStatsSink for MockStats {
    fn record_oom(&self, stat: OomStat, pid: u32) {
        self.events.lock().unwrap().push((stat, pid));
    }
}

/// A heap whose region size lookups can be made to fail.
#[derive(Debug)]
pub struct FlakyHeap {
    pub sizes: Vec<Option<u64>>,
    pub lookups: AtomicUsize,
}

impl PhysHeap for FlakyHeap {
    fn heap_type(&self) -> PhysHeapType {
        PhysHeapType::Lma
    }

    fn number_of_regions(&self) -> u32 {
        self.sizes.len() as u32
    }

    fn region_size(&self, region_id: u32) -> PhysmemResult<u64> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.sizes[region_id as usize].ok_or(PhysmemError::InvalidParams)
    }
}

pub fn lma_heap(sizes: &[u64]) -> Arc<dyn PhysHeap> {
    let mut base = 0;
    let regions = sizes
        .iter()
        .map(|&size| {
            let region = PhysHeapRegion { base, size };
            base += size;
            region
        })
        .collect();
    Arc::new(LmaHeap::new(regions))
}

/// Device with one LMA heap bound to every role and `factory` as the
/// constructor for all of them.
pub fn mock_device(id: u32, factory: Arc<MockFactory>, config: DeviceConfig) -> DeviceNode {
    DeviceNode::builder(DeviceId(id), Arc::new(HostPageBackend::new()))
        .config(config)
        .heap(lma_heap(&[1 << 30]), &PhysHeapRole::ALL)
        .pmr_factory_all(factory)
        .build()
}

/// Device served entirely from host RAM.
pub fn host_device(id: u32, backend: Arc<HostPageBackend>) -> DeviceNode {
    DeviceNode::builder(DeviceId(id), backend)
        .heap(lma_heap(&[1 << 30]), &[PhysHeapRole::GpuLocal, PhysHeapRole::CpuLocal])
        .pmr_factory_all(Arc::new(HostPmrFactory::new()))
        .build()
}
