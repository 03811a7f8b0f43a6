/// Cache mode requested for one side (CPU or GPU) of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Uncached,
    WriteCombine,
    Cached,
    /// Cached and kept coherent with the other side without maintenance.
    CacheCoherent,
}

impl CacheMode {
    const fn is_uncached_or_wc(self) -> bool {
        matches!(self, Self::Uncached | Self::WriteCombine)
    }
}

/// Kind of firmware allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FwAllocType {
    #[default]
    Main,
    Config,
    /// Raw allocation made by a host driver on behalf of a guest.
    Raw,
}

/// Where the physical pages should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locality {
    #[default]
    Gpu,
    Cpu,
    Firmware(FwAllocType),
}

/// Flags controlling PMR allocation behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocFlags {
    pub cpu_cache: CacheMode,
    pub gpu_cache: CacheMode,
    pub locality: Locality,
    pub zero_on_alloc: bool,
    pub poison_on_alloc: bool,
}

impl AllocFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn cpu_cache(mut self, mode: CacheMode) -> Self {
        self.cpu_cache = mode;
        self
    }

    #[must_use]
    pub const fn gpu_cache(mut self, mode: CacheMode) -> Self {
        self.gpu_cache = mode;
        self
    }

    /// Coherent caching on both sides.
    #[must_use]
    pub const fn coherent(mut self) -> Self {
        self.cpu_cache = CacheMode::CacheCoherent;
        self.gpu_cache = CacheMode::CacheCoherent;
        self
    }

    #[must_use]
    pub const fn zero_on_alloc(mut self) -> Self {
        self.zero_on_alloc = true;
        self
    }

    #[must_use]
    pub const fn poison_on_alloc(mut self) -> Self {
        self.poison_on_alloc = true;
        self
    }

    #[must_use]
    pub const fn cpu_local(mut self) -> Self {
        self.locality = Locality::Cpu;
        self
    }

    #[must_use]
    pub const fn fw_local(mut self, kind: FwAllocType) -> Self {
        self.locality = Locality::Firmware(kind);
        self
    }

    /// Coherency must be symmetric: a coherent side cannot pair with an
    /// uncached or write-combined other side.
    #[must_use]
    pub const fn has_legal_cache_mode(&self) -> bool {
        !matches!(
            (self.cpu_cache, self.gpu_cache),
            (CacheMode::CacheCoherent, gpu) if gpu.is_uncached_or_wc()
        ) && !matches!(
            (self.cpu_cache, self.gpu_cache),
            (cpu, CacheMode::CacheCoherent) if cpu.is_uncached_or_wc()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MODES: [CacheMode; 4] = [
        CacheMode::Uncached,
        CacheMode::WriteCombine,
        CacheMode::Cached,
        CacheMode::CacheCoherent,
    ];

    #[test]
    fn coherency_decision_table() {
        for cpu in ALL_MODES {
            for gpu in ALL_MODES {
                let flags = AllocFlags::new().cpu_cache(cpu).gpu_cache(gpu);
                let illegal = (cpu == CacheMode::CacheCoherent && gpu.is_uncached_or_wc())
                    || (gpu == CacheMode::CacheCoherent && cpu.is_uncached_or_wc());
                assert_eq!(flags.has_legal_cache_mode(), !illegal, "cpu={cpu:?} gpu={gpu:?}");
            }
        }
    }

    #[test]
    fn coherent_with_cached_is_legal() {
        let flags = AllocFlags::new()
            .cpu_cache(CacheMode::CacheCoherent)
            .gpu_cache(CacheMode::Cached);
        assert!(flags.has_legal_cache_mode());
        assert!(AllocFlags::new().coherent().has_legal_cache_mode());
    }

    #[test]
    fn default_is_gpu_local_uncached() {
        let flags = AllocFlags::default();
        assert_eq!(flags.locality, Locality::Gpu);
        assert_eq!(flags.cpu_cache, CacheMode::Uncached);
        assert!(!flags.zero_on_alloc && !flags.poison_on_alloc);
    }
}
