use crate::error::FreezeError;
use std::sync::atomic::{AtomicU32, Ordering};

pub const FREEZE_BIT: u32 = 1 << 31;
pub const FREEZE_CLOCK_MASK: u32 = !FREEZE_BIT;

/// One word holding the freeze bit (high) and the freeze clock (low 31
/// bits). Every change goes through compare-and-swap.
#[derive(Debug, Default)]
pub struct FreezeFlag {
    word: AtomicU32,
}

impl FreezeFlag {
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
        }
    }

    pub fn load(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    pub const fn is_freezing_word(word: u32) -> bool {
        word & FREEZE_BIT != 0
    }

    pub const fn clock_of(word: u32) -> u32 {
        word & FREEZE_CLOCK_MASK
    }

    pub fn is_freezing(&self) -> bool {
        Self::is_freezing_word(self.load())
    }

    /// Freezing, and the generation in progress is `clock`.
    pub fn is_freezing_at(&self, clock: u32) -> bool {
        let word = self.load();
        Self::is_freezing_word(word) && Self::clock_of(word) == clock
    }

    pub fn clock(&self) -> u32 {
        Self::clock_of(self.load())
    }

    /// Raises the freeze bit and starts a new generation. Returns the new
    /// clock, or `AlreadyFreezing` while another generation holds the bit.
    pub fn try_set(&self) -> Result<u32, FreezeError> {
        self.update(|word| {
            let clock = (Self::clock_of(word) + 1) & FREEZE_CLOCK_MASK;
            FREEZE_BIT | clock
        })
    }

    /// Raises the freeze bit for the generation already on the clock.
    pub fn try_set_without_inc_clock(&self) -> Result<u32, FreezeError> {
        self.update(|word| FREEZE_BIT | Self::clock_of(word))
    }

    /// Clears the freeze bit. The clock is left alone.
    pub fn unset(&self) {
        let mut word = self.load();
        loop {
            match self.word.compare_exchange_weak(
                word,
                word & FREEZE_CLOCK_MASK,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => word = observed,
            }
        }
    }

    pub(crate) fn reset(&self) {
        self.word.store(0, Ordering::Release);
    }

    fn update(&self, next: impl Fn(u32) -> u32) -> Result<u32, FreezeError> {
        let mut word = self.load();
        loop {
            if Self::is_freezing_word(word) {
                return Err(FreezeError::AlreadyFreezing);
            }
            let new_word = next(word);
            match self
                .word
                .compare_exchange_weak(word, new_word, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(Self::clock_of(new_word)),
                Err(observed) => word = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FREEZE_CLOCK_MASK, FreezeFlag};
    use crate::error::FreezeError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_and_unset_move_the_clock_once() {
        let flag = FreezeFlag::new();
        assert!(!flag.is_freezing());
        assert_eq!(flag.try_set(), Ok(1));
        assert!(flag.is_freezing());
        assert!(flag.is_freezing_at(1));
        assert!(!flag.is_freezing_at(0));
        assert_eq!(flag.try_set(), Err(FreezeError::AlreadyFreezing));
        assert_eq!(
            flag.try_set_without_inc_clock(),
            Err(FreezeError::AlreadyFreezing)
        );
        flag.unset();
        assert!(!flag.is_freezing());
        assert!(!flag.is_freezing_at(1));
        assert_eq!(flag.clock(), 1);
        assert_eq!(flag.try_set_without_inc_clock(), Ok(1));
        flag.unset();
        assert_eq!(flag.try_set(), Ok(2));
    }

    #[test]
    fn clock_wraps_inside_31_bits() {
        let flag = FreezeFlag::new();
        flag.word.store(FREEZE_CLOCK_MASK, Ordering::Release);
        assert_eq!(flag.try_set(), Ok(0));
        assert!(flag.is_freezing());
    }

    #[test]
    fn concurrent_raises_have_one_winner_per_generation() {
        let flag = Arc::new(FreezeFlag::new());
        let mut last_clock = 0;
        for _ in 0..20 {
            let winners = Arc::new(AtomicUsize::new(0));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let flag = Arc::clone(&flag);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        if flag.try_set().is_ok() {
                            winners.fetch_add(1, Ordering::AcqRel);
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("racer");
            }
            assert_eq!(winners.load(Ordering::Acquire), 1);
            let clock = flag.clock();
            assert!(clock > last_clock);
            last_clock = clock;
            flag.unset();
            assert_eq!(flag.clock(), clock);
        }
    }
}
