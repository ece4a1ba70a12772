use std::sync::atomic::{AtomicBool, Ordering};

/// Holds an atomic flag raised for as long as the guard lives.
///
/// Acquisition fails if the flag is already raised, which is how nested
/// restorations and re-entrant navigation are refused.
#[derive(Debug)]
pub(crate) struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
