use crate::error::{PhysmemError, PhysmemResult};

/// The physical heap a PMR allocation is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysHeapRole {
    /// Memory local to the GPU (the default).
    GpuLocal = 0,
    /// Memory local to the CPU.
    CpuLocal = 1,
    /// Firmware memory owned by this driver.
    FwLocal = 2,
    /// Firmware memory brokered by a host driver for its guests.
    FwGuest = 3,
}

impl PhysHeapRole {
    pub const COUNT: usize = 4;

    pub const ALL: [Self; Self::COUNT] = [Self::GpuLocal, Self::CpuLocal, Self::FwLocal, Self::FwGuest];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysHeapType {
    /// Local Memory Architecture: dedicated physical regions.
    Lma,
    /// Unified Memory Architecture: backed by system RAM.
    Uma,
}

/// A physical heap registered with a device.
pub trait PhysHeap: std::fmt::Debug + Send + Sync {
    fn heap_type(&self) -> PhysHeapType;

    fn number_of_regions(&self) -> u32;

    /// Size in bytes of region `region_id`.
    fn region_size(&self, region_id: u32) -> PhysmemResult<u64>;
}

/// A single region of an LMA heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysHeapRegion {
    pub base: u64,
    pub size: u64,
}

/// Heap made of fixed device-physical regions.
#[derive(Debug, Clone)]
pub struct LmaHeap {
    regions: Vec<PhysHeapRegion>,
}

impl LmaHeap {
    #[must_use]
    pub fn new(regions: Vec<PhysHeapRegion>) -> Self {
        Self { regions }
    }

    #[must_use]
    pub fn regions(&self) -> &[PhysHeapRegion] {
        &self.regions
    }
}

impl PhysHeap for LmaHeap {
    fn heap_type(&self) -> PhysHeapType {
        PhysHeapType::Lma
    }

    #[allow(clippy::cast_possible_truncation)]
    fn number_of_regions(&self) -> u32 {
        self.regions.len() as u32
    }

    fn region_size(&self, region_id: u32) -> PhysmemResult<u64> {
        self.regions
            .get(region_id as usize)
            .map(|r| r.size)
            .ok_or(PhysmemError::InvalidParams)
    }
}

/// Heap backed by general system RAM.
///
/// May still describe several regions (e.g. carve-outs), but its capacity is
/// always the size of system RAM.
#[derive(Debug, Clone, Default)]
pub struct UmaHeap {
    regions: Vec<PhysHeapRegion>,
}

impl UmaHeap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_regions(regions: Vec<PhysHeapRegion>) -> Self {
        Self { regions }
    }
}

impl PhysHeap for UmaHeap {
    fn heap_type(&self) -> PhysHeapType {
        PhysHeapType::Uma
    }

    #[allow(clippy::cast_possible_truncation)]
    fn number_of_regions(&self) -> u32 {
        self.regions.len() as u32
    }

    fn region_size(&self, region_id: u32) -> PhysmemResult<u64> {
        self.regions
            .get(region_id as usize)
            .map(|r| r.size)
            .ok_or(PhysmemError::InvalidParams)
    }
}
