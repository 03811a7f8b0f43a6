/// Out-of-memory counters kept per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomStat {
    /// A physical memory (PMR) allocation failed in the heap backend.
    PhysmemCount,
}

/// Receives per-process statistics events. Fire and forget.
pub trait ProcessStatsSink: Send + Sync {
    fn record_oom(&self, stat: OomStat, pid: u32);
}
