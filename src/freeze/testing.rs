//! Internal-testing capability of [`Freezer`]. Compiled only for this crate's
//! tests or with the `testing` feature; never part of the production surface.

use super::Freezer;
use super::state::FreezeWatermarks;
use crate::error::FreezeError;
use crate::memtable::Memtable;
use std::sync::Arc;
use std::sync::atomic::Ordering;

impl Freezer {
    pub fn testing(&self) -> FreezerTesting<'_> {
        FreezerTesting { freezer: self }
    }
}

/// Direct access to freezer internals for harnesses.
pub struct FreezerTesting<'a> {
    freezer: &'a Freezer,
}

impl FreezerTesting<'_> {
    pub fn set_freeze_flag(&self) -> Result<u32, FreezeError> {
        self.freezer.flag.try_set()
    }

    pub fn set_freeze_flag_without_inc_clock(&self) -> Result<u32, FreezeError> {
        self.freezer.flag.try_set_without_inc_clock()
    }

    pub fn unset_freeze_flag(&self) {
        self.freezer.flag.unset();
    }

    pub fn high_priority_freeze_cnt(&self) -> i64 {
        self.freezer.high_priority_freeze_cnt.load(Ordering::Acquire)
    }

    pub fn low_priority_freeze_cnt(&self) -> i64 {
        self.freezer.low_priority_freeze_cnt.load(Ordering::Acquire)
    }

    pub fn set_high_priority_freeze_cnt(&self, cnt: i64) {
        self.freezer
            .high_priority_freeze_cnt
            .store(cnt, Ordering::Release);
    }

    pub fn set_low_priority_freeze_cnt(&self, cnt: i64) {
        self.freezer
            .low_priority_freeze_cnt
            .store(cnt, Ordering::Release);
    }

    pub fn set_watermarks(&self, marks: FreezeWatermarks) {
        *self.freezer.watermarks.write() = marks;
    }

    /// Memtables of the parked generation, if any.
    pub fn pending_memtables(&self) -> Vec<Arc<Memtable>> {
        self.freezer
            .pending
            .lock()
            .as_ref()
            .map(|p| p.memtables.clone())
            .unwrap_or_default()
    }

    pub fn pending_clock(&self) -> Option<u32> {
        self.freezer.pending.lock().as_ref().map(|p| p.clock)
    }

    /// Sealed memtables an undo left for the next freeze to drain.
    pub fn carried_over_memtables(&self) -> Vec<Arc<Memtable>> {
        self.freezer.carried_over.lock().clone()
    }
}
