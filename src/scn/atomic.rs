use super::Scn;
use std::sync::atomic::{AtomicU64, Ordering};

/// An [`Scn`] cell updated with compare-and-swap loops.
#[derive(Debug)]
pub struct AtomicScn {
    val: AtomicU64,
}

impl Default for AtomicScn {
    fn default() -> Self {
        Self::new(Scn::invalid_scn())
    }
}

impl AtomicScn {
    pub fn new(scn: Scn) -> Self {
        Self {
            val: AtomicU64::new(scn.raw()),
        }
    }

    pub fn load(&self) -> Scn {
        Self::decode(self.val.load(Ordering::Acquire))
    }

    pub fn store(&self, scn: Scn) {
        self.val.store(scn.raw(), Ordering::Release);
    }

    /// Stores `new` only if the cell still holds `old`; returns whether it did.
    pub fn bcas(&self, old: Scn, new: Scn) -> bool {
        self.val
            .compare_exchange(old.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Like [`AtomicScn::bcas`] but returns the value observed before the
    /// attempt.
    pub fn vcas(&self, old: Scn, new: Scn) -> Scn {
        match self
            .val
            .compare_exchange(old.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(prev) | Err(prev) => Self::decode(prev),
        }
    }

    /// Raises the cell to `scn` if it is lower (or invalid) and returns the
    /// resulting value. An invalid `scn` leaves the cell untouched.
    pub fn inc_update(&self, scn: Scn) -> Scn {
        self.update_while(scn, |current, target| current >= target)
    }

    /// Lowers the cell to `scn` if it is higher (or invalid) and returns the
    /// resulting value. An invalid `scn` leaves the cell untouched.
    pub fn dec_update(&self, scn: Scn) -> Scn {
        self.update_while(scn, |current, target| current <= target)
    }

    fn update_while(&self, target: Scn, keep_current: impl Fn(Scn, Scn) -> bool) -> Scn {
        if !target.is_valid() {
            return self.load();
        }
        let mut current = self.val.load(Ordering::Acquire);
        loop {
            let current_scn = Self::decode(current);
            if current_scn.is_valid() && keep_current(current_scn, target) {
                return current_scn;
            }
            match self.val.compare_exchange_weak(
                current,
                target.raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return target,
                Err(observed) => current = observed,
            }
        }
    }

    // Only words produced by `Scn::raw` are ever stored.
    fn decode(val: u64) -> Scn {
        Scn::from_stored(val).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::AtomicScn;
    use crate::scn::Scn;
    use std::sync::Arc;

    fn scn(v: u64) -> Scn {
        Scn::from_sql(v).expect("valid scn")
    }

    #[test]
    fn load_store_and_cas() {
        let cell = AtomicScn::default();
        assert!(!cell.load().is_valid());
        cell.store(scn(10));
        assert_eq!(cell.load(), scn(10));

        assert!(!cell.bcas(scn(9), scn(11)));
        assert!(cell.bcas(scn(10), scn(11)));
        assert_eq!(cell.vcas(scn(11), scn(12)), scn(11));
        assert_eq!(cell.vcas(scn(11), scn(13)), scn(12));
        assert_eq!(cell.load(), scn(12));
    }

    #[test]
    fn inc_update_only_moves_forward() {
        let cell = AtomicScn::default();
        assert_eq!(cell.inc_update(scn(5)), scn(5));
        assert_eq!(cell.inc_update(scn(3)), scn(5));
        assert_eq!(cell.inc_update(scn(8)), scn(8));
        assert_eq!(cell.inc_update(Scn::invalid_scn()), scn(8));
    }

    #[test]
    fn dec_update_only_moves_backward() {
        let cell = AtomicScn::new(Scn::max_scn());
        assert_eq!(cell.dec_update(scn(50)), scn(50));
        assert_eq!(cell.dec_update(scn(70)), scn(50));
        assert_eq!(cell.dec_update(Scn::min_scn()), Scn::min_scn());
    }

    #[test]
    fn concurrent_inc_update_keeps_the_maximum() {
        let cell = Arc::new(AtomicScn::new(Scn::min_scn()));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        cell.inc_update(scn(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker");
        }
        assert_eq!(cell.load(), scn(7 * 1_000 + 999));
    }
}
