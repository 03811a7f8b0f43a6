/// Mask for an alignment given as a power-of-two exponent.
#[must_use]
pub const fn log2_mask(log2: u32) -> u64 {
    (1u64 << log2) - 1
}

/// `x >> log2`
#[must_use]
pub const fn log2_div(x: u64, log2: u32) -> u64 {
    x >> log2
}

/// `x % (1 << log2)`
#[must_use]
pub const fn log2_mod(x: u64, log2: u32) -> u64 {
    x & log2_mask(log2)
}

/// Rounds `val` up to a power-of-two `align`; `None` if that overflows.
#[must_use]
pub const fn align_up(val: u64, align: u64) -> Option<u64> {
    match val.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

#[must_use]
pub const fn is_aligned(val: u64, log2: u32) -> bool {
    log2_mod(val, log2) == 0
}
