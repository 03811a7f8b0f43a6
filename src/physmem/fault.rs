use std::sync::atomic::{AtomicU32, Ordering};

/// Debug hook that forces PMR allocations to fail once a count is reached.
///
/// With a threshold of `n`, allocations `1..n` go through and allocation `n`
/// and every one after it fail. Owned by a [`Physmem`](super::Physmem), so
/// independent instances never interfere.
#[derive(Debug)]
pub struct AllocFailInjector {
    threshold: u32,
    count: AtomicU32,
}

impl AllocFailInjector {
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            threshold,
            count: AtomicU32::new(1),
        }
    }

    /// Advances the counter; returns `true` if this allocation must fail.
    pub fn should_fail(&self) -> bool {
        if self.threshold == 0 {
            return false;
        }
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < self.threshold).then_some(n + 1))
            .is_err()
    }

    /// Number of the next allocation to be checked.
    #[must_use]
    pub fn current(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_from_threshold_on() {
        let inj = AllocFailInjector::new(3);
        assert!(!inj.should_fail());
        assert!(!inj.should_fail());
        assert!(inj.should_fail());
        assert!(inj.should_fail());
        assert_eq!(inj.current(), 3);
    }

    #[test]
    fn threshold_one_fails_immediately() {
        assert!(AllocFailInjector::new(1).should_fail());
    }

    #[test]
    fn zero_disables() {
        let inj = AllocFailInjector::new(0);
        assert!((0..10).all(|_| !inj.should_fail()));
    }
}
