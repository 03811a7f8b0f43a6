pub mod heap;

use crate::device::heap::{PhysHeap, PhysHeapRole};
use crate::error::PhysmemResult;
use crate::pdump::ReplayRecorder;
use crate::pmr::PmrFactory;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Heap page shifts supported by the device MMU: 4K, 16K, 64K, 256K, 1M, 2M.
pub const DEFAULT_HEAP_PAGE_SHIFTS: [u32; 6] = [12, 14, 16, 18, 20, 21];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

/// A device physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DevPhysAddr(pub u64);

/// Virtualization role the driver runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirtMode {
    #[default]
    Native,
    Host,
    Guest,
}

/// Opaque handle to a block of pages owned by a [`PageBackend`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PageHandle {
    raw: u64,
    size: usize,
}

impl PageHandle {
    #[must_use]
    pub const fn new(raw: u64, size: usize) -> Self {
        Self { raw, size }
    }

    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.raw
    }

    /// Size of the block as allocated by the backend.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Device page allocator used for single contiguous blocks (MMU Px setup).
pub trait PageBackend: Send + Sync {
    /// Allocate `size` bytes of physically contiguous pages.
    fn alloc(&self, size: usize) -> PhysmemResult<(PageHandle, DevPhysAddr)>;

    /// Release a block previously returned by `alloc`.
    fn free(&self, handle: PageHandle);

    /// Map the block into the CPU address space.
    ///
    /// The returned pointer must be valid for writes of `size` bytes until
    /// `unmap` is called with it.
    fn map(&self, handle: &PageHandle, size: usize, addr: DevPhysAddr) -> PhysmemResult<NonNull<u8>>;

    fn unmap(&self, handle: &PageHandle, cpu_addr: NonNull<u8>) -> PhysmemResult<()>;

    /// Flush CPU caches for the given range so the device observes the writes.
    fn clean(&self, handle: &PageHandle, offset: usize, size: usize) -> PhysmemResult<()>;
}

/// Budget policy hook: accepts or rejects an allocation of the given total size.
pub type MemAllocSizeCheck = Arc<dyn Fn(u64) -> PhysmemResult<()> + Send + Sync>;

/// Per-device configuration supplied by the system layer.
#[derive(Clone)]
pub struct DeviceConfig {
    pub virt_mode: VirtMode,
    pub heap_page_shifts: Vec<u32>,
    pub check_mem_alloc_size: Option<MemAllocSizeCheck>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            virt_mode: VirtMode::Native,
            heap_page_shifts: DEFAULT_HEAP_PAGE_SHIFTS.to_vec(),
            check_mem_alloc_size: None,
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("virt_mode", &self.virt_mode)
            .field("heap_page_shifts", &self.heap_page_shifts)
            .field("check_mem_alloc_size", &self.check_mem_alloc_size.is_some())
            .finish()
    }
}

impl DeviceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn virt_mode(mut self, mode: VirtMode) -> Self {
        self.virt_mode = mode;
        self
    }

    #[must_use]
    pub fn heap_page_shifts(mut self, shifts: &[u32]) -> Self {
        self.heap_page_shifts = shifts.to_vec();
        self
    }

    #[must_use]
    pub fn check_mem_alloc_size<F>(mut self, check: F) -> Self
    where
        F: Fn(u64) -> PhysmemResult<()> + Send + Sync + 'static,
    {
        self.check_mem_alloc_size = Some(Arc::new(check));
        self
    }
}

/// A GPU device as seen by the physical memory layer.
///
/// The heap tables are fixed at build time; nothing in this crate mutates
/// them afterwards.
pub struct DeviceNode {
    id: DeviceId,
    config: DeviceConfig,
    phys_heaps: [Option<Arc<dyn PhysHeap>>; PhysHeapRole::COUNT],
    registered_heaps: Vec<Arc<dyn PhysHeap>>,
    pmr_factories: [Option<Arc<dyn PmrFactory>>; PhysHeapRole::COUNT],
    page_backend: Arc<dyn PageBackend>,
    recorder: Option<Arc<dyn ReplayRecorder>>,
}

impl fmt::Debug for DeviceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceNode")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("phys_heaps", &self.phys_heaps)
            .field("registered_heaps", &self.registered_heaps.len())
            .field("recorder", &self.recorder.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceNode {
    pub fn builder(id: DeviceId, page_backend: Arc<dyn PageBackend>) -> DeviceNodeBuilder {
        DeviceNodeBuilder {
            node: Self {
                id,
                config: DeviceConfig::default(),
                phys_heaps: Default::default(),
                registered_heaps: Vec::new(),
                pmr_factories: Default::default(),
                page_backend,
                recorder: None,
            },
        }
    }

    #[must_use]
    pub const fn id(&self) -> DeviceId {
        self.id
    }

    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The heap bound to `role`, if any.
    #[must_use]
    pub fn phys_heap(&self, role: PhysHeapRole) -> Option<&Arc<dyn PhysHeap>> {
        self.phys_heaps[role.index()].as_ref()
    }

    /// Every heap registered with the device, each exactly once.
    #[must_use]
    pub fn registered_heaps(&self) -> &[Arc<dyn PhysHeap>] {
        &self.registered_heaps
    }

    #[must_use]
    pub fn pmr_factory(&self, role: PhysHeapRole) -> Option<&Arc<dyn PmrFactory>> {
        self.pmr_factories[role.index()].as_ref()
    }

    #[must_use]
    pub fn page_backend(&self) -> &Arc<dyn PageBackend> {
        &self.page_backend
    }

    #[must_use]
    pub fn replay_recorder(&self) -> Option<&Arc<dyn ReplayRecorder>> {
        self.recorder.as_ref()
    }

    /// Whether `heap` is the heap bound to `role` (identity, not equality).
    #[must_use]
    pub fn is_heap_for_role(&self, heap: &Arc<dyn PhysHeap>, role: PhysHeapRole) -> bool {
        self.phys_heap(role).is_some_and(|h| same_heap(h, heap))
    }
}

fn same_heap(a: &Arc<dyn PhysHeap>, b: &Arc<dyn PhysHeap>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

pub struct DeviceNodeBuilder {
    node: DeviceNode,
}

impl DeviceNodeBuilder {
    #[must_use]
    pub fn config(mut self, config: DeviceConfig) -> Self {
        self.node.config = config;
        self
    }

    /// Register `heap` once and bind it to each of `roles`.
    ///
    /// The same heap may serve several roles; it is still registered once.
    #[must_use]
    pub fn heap(mut self, heap: Arc<dyn PhysHeap>, roles: &[PhysHeapRole]) -> Self {
        if !self.node.registered_heaps.iter().any(|h| same_heap(h, &heap)) {
            self.node.registered_heaps.push(heap.clone());
        }
        for role in roles {
            self.node.phys_heaps[role.index()] = Some(heap.clone());
        }
        self
    }

    #[must_use]
    pub fn pmr_factory(mut self, role: PhysHeapRole, factory: Arc<dyn PmrFactory>) -> Self {
        self.node.pmr_factories[role.index()] = Some(factory);
        self
    }

    /// Use one constructor for every heap role.
    #[must_use]
    pub fn pmr_factory_all(mut self, factory: Arc<dyn PmrFactory>) -> Self {
        for slot in &mut self.node.pmr_factories {
            *slot = Some(factory.clone());
        }
        self
    }

    #[must_use]
    pub fn replay_recorder(mut self, recorder: Arc<dyn ReplayRecorder>) -> Self {
        self.node.recorder = Some(recorder);
        self
    }

    #[must_use]
    pub fn build(self) -> DeviceNode {
        self.node
    }
}
