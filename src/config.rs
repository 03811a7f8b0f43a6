use crate::error::{PhysmemError, PhysmemResult};
use crate::host;
use std::env;

/// Largest PMR that may be created: 1 GiB.
pub const PMR_MAX_SUPPORTED_SIZE: u64 = 1 << 30;

pub const ENV_ALLOC_FAIL: &str = "PHYSMEM_ALLOC_FAIL";
pub const ENV_MAX_PMR_SIZE: &str = "PHYSMEM_MAX_PMR_SIZE";

/// Host limits and debug knobs for the physical memory layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysmemConfig {
    /// log2 of the OS page size.
    pub os_page_shift: u32,
    /// Total system RAM in bytes.
    pub ram_size: u64,
    pub max_pmr_size: u64,
    /// Fail every PMR allocation from this count onwards (debug builds only).
    pub alloc_fail_after: Option<u32>,
}

impl Default for PhysmemConfig {
    fn default() -> Self {
        Self {
            os_page_shift: host::os_page_shift(),
            ram_size: host::ram_size(),
            max_pmr_size: PMR_MAX_SUPPORTED_SIZE,
            alloc_fail_after: None,
        }
    }
}

impl PhysmemConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host defaults overlaid with `PHYSMEM_*` environment variables.
    ///
    /// # Errors
    /// Returns [`PhysmemError::Config`] if a variable is set but malformed.
    pub fn from_env() -> PhysmemResult<Self> {
        Self::default().overlay(|name| env::var(name))
    }

    /// Applies the `PHYSMEM_*` overrides reported by `lookup`.
    ///
    /// # Errors
    /// Returns [`PhysmemError::Config`] if a variable is set but malformed.
    pub fn overlay<F>(self, lookup: F) -> PhysmemResult<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let mut cfg = self;

        if let Some(n) = read_var(&lookup, ENV_ALLOC_FAIL)? {
            // 0 keeps the injector disabled
            cfg.alloc_fail_after = u32::try_from(n)
                .map_err(|_| PhysmemError::Config(format!("{ENV_ALLOC_FAIL} out of range: {n}")))
                .map(|n| (n > 0).then_some(n))?;
        }
        if let Some(size) = read_var(&lookup, ENV_MAX_PMR_SIZE)? {
            cfg.max_pmr_size = size;
        }

        log::debug!("physmem config: {cfg:?}");
        Ok(cfg)
    }

    #[must_use]
    pub const fn os_page_shift(mut self, shift: u32) -> Self {
        self.os_page_shift = shift;
        self
    }

    #[must_use]
    pub const fn ram_size(mut self, size: u64) -> Self {
        self.ram_size = size;
        self
    }

    #[must_use]
    pub const fn max_pmr_size(mut self, size: u64) -> Self {
        self.max_pmr_size = size;
        self
    }

    #[must_use]
    pub const fn alloc_fail_after(mut self, count: u32) -> Self {
        self.alloc_fail_after = Some(count);
        self
    }

    #[must_use]
    pub const fn os_page_size(&self) -> u64 {
        1 << self.os_page_shift
    }
}

fn read_var<F>(lookup: &F, name: &str) -> PhysmemResult<Option<u64>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(v) => parse_u64(v.trim())
            .map(Some)
            .ok_or_else(|| PhysmemError::Config(format!("{name}: invalid value '{v}'"))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(PhysmemError::Config(format!("{name}: {e}"))),
    }
}

/// Decimal or `0x` prefixed hex.
fn parse_u64(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
