//! The freeze-facing side of a memtable: reference and log counters,
//! boundaries, and freeze marks. Row storage is out of scope here.

use crate::error::FreezeError;
use crate::freeze::stat::FrozenMemtableInfo;
use crate::freeze::state::FreezeState;
use crate::ls::TabletId;
use crate::scn::{AtomicScn, Scn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, Ordering};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemtableKey {
    pub tablet_id: TabletId,
    pub id: u64,
}

#[derive(Debug)]
pub struct Memtable {
    key: MemtableKey,
    start_scn: Scn,
    end_scn: AtomicScn,
    max_end_scn: AtomicScn,
    snapshot_version: AtomicScn,
    write_ref_cnt: AtomicI64,
    unsubmitted_cnt: AtomicI64,
    unsynced_cnt: AtomicI64,
    frozen: AtomicBool,
    is_tablet_freeze: AtomicBool,
    is_force_freeze: AtomicBool,
    freeze_clock: AtomicU32,
    freeze_state: AtomicU8,
}

impl Memtable {
    pub fn new(key: MemtableKey, start_scn: Scn) -> Self {
        Self {
            key,
            start_scn,
            end_scn: AtomicScn::default(),
            max_end_scn: AtomicScn::default(),
            snapshot_version: AtomicScn::new(Scn::max_scn()),
            write_ref_cnt: AtomicI64::new(0),
            unsubmitted_cnt: AtomicI64::new(0),
            unsynced_cnt: AtomicI64::new(0),
            frozen: AtomicBool::new(false),
            is_tablet_freeze: AtomicBool::new(false),
            is_force_freeze: AtomicBool::new(false),
            freeze_clock: AtomicU32::new(0),
            freeze_state: AtomicU8::new(FreezeState::Invalid as u8),
        }
    }

    pub fn key(&self) -> MemtableKey {
        self.key
    }

    pub fn tablet_id(&self) -> TabletId {
        self.key.tablet_id
    }

    pub fn start_scn(&self) -> Scn {
        self.start_scn
    }

    pub fn end_scn(&self) -> Scn {
        self.end_scn.load()
    }

    pub fn max_end_scn(&self) -> Scn {
        self.max_end_scn.load()
    }

    pub fn snapshot_version(&self) -> Scn {
        self.snapshot_version.load()
    }

    pub fn write_ref_cnt(&self) -> i64 {
        self.write_ref_cnt.load(Ordering::SeqCst)
    }

    pub fn unsubmitted_cnt(&self) -> i64 {
        self.unsubmitted_cnt.load(Ordering::SeqCst)
    }

    pub fn unsynced_cnt(&self) -> i64 {
        self.unsynced_cnt.load(Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn is_tablet_freeze(&self) -> bool {
        self.is_tablet_freeze.load(Ordering::Acquire)
    }

    pub fn is_force_freeze(&self) -> bool {
        self.is_force_freeze.load(Ordering::Acquire)
    }

    pub fn freeze_clock(&self) -> u32 {
        self.freeze_clock.load(Ordering::Acquire)
    }

    pub fn freeze_state(&self) -> FreezeState {
        FreezeState::from_u8(self.freeze_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_freeze_state(&self, state: FreezeState) {
        let prev = FreezeState::from_u8(self.freeze_state.swap(state as u8, Ordering::AcqRel));
        if !prev.can_transition_to(state) {
            error!(
                tablet_id = %self.key.tablet_id,
                memtable_id = self.key.id,
                from = %prev,
                to = %state,
                "freeze: unexpected memtable state transition"
            );
        }
    }

    /// Registers a writer. The count is raised before the frozen check so a
    /// concurrent freeze either sees this writer or the writer sees the seal.
    pub fn try_acquire_write_ref(self: &Arc<Self>) -> Result<WriteRef, FreezeError> {
        self.write_ref_cnt.fetch_add(1, Ordering::SeqCst);
        if self.frozen.load(Ordering::SeqCst) {
            self.write_ref_cnt.fetch_sub(1, Ordering::SeqCst);
            return Err(FreezeError::AlreadyFreezing);
        }
        Ok(WriteRef {
            memtable: Arc::clone(self),
        })
    }

    pub fn inc_unsubmitted_cnt(&self) {
        self.unsubmitted_cnt.fetch_add(1, Ordering::SeqCst);
    }

    /// One log entry was handed to the log service.
    pub fn dec_unsubmitted_and_inc_unsynced(&self) {
        self.unsynced_cnt.fetch_add(1, Ordering::SeqCst);
        self.unsubmitted_cnt.fetch_sub(1, Ordering::SeqCst);
    }

    /// One log entry was acknowledged at `scn`.
    pub fn dec_unsynced_cnt(&self, scn: Scn) {
        self.max_end_scn.inc_update(scn);
        self.unsynced_cnt.fetch_sub(1, Ordering::SeqCst);
    }

    /// Seals the memtable under freeze generation `clock`. Returns false when
    /// it was already sealed.
    pub fn freeze(&self, clock: u32, is_tablet_freeze: bool, is_force: bool) -> bool {
        if self
            .frozen
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.freeze_clock.store(clock, Ordering::Release);
        self.is_tablet_freeze.store(is_tablet_freeze, Ordering::Release);
        self.is_force_freeze.store(is_force, Ordering::Release);
        self.set_freeze_state(FreezeState::LogNotSubmitted);
        true
    }

    pub(crate) fn unfreeze(&self) {
        self.set_freeze_state(FreezeState::Invalid);
        self.is_tablet_freeze.store(false, Ordering::Release);
        self.is_force_freeze.store(false, Ordering::Release);
        self.frozen.store(false, Ordering::SeqCst);
    }

    /// Sealed, drained, and every log up to the memtable end is callbacked.
    pub fn is_ready_for_flush(&self, right_boundary: Scn) -> bool {
        if !self.is_frozen()
            || self.write_ref_cnt() != 0
            || self.unsubmitted_cnt() != 0
            || self.unsynced_cnt() != 0
        {
            return false;
        }
        let max_end = self.max_end_scn();
        !max_end.is_valid() || (right_boundary.is_valid() && right_boundary >= max_end)
    }

    /// Fixes `end_scn` at the highest acknowledged log, never below the start.
    pub fn resolve_right_boundary(&self) -> Scn {
        let end = Scn::max(self.max_end_scn(), self.start_scn);
        self.end_scn.store(end);
        end
    }

    pub fn set_snapshot_version(&self, version: Scn) {
        if version.is_valid() {
            self.snapshot_version.store(version);
        }
    }

    pub(crate) fn finish_freeze(&self) {
        self.set_freeze_state(FreezeState::Finished);
    }

    pub fn info(&self, current_right_boundary: Scn) -> FrozenMemtableInfo {
        FrozenMemtableInfo::new(
            self.key.tablet_id,
            self.start_scn,
            self.end_scn(),
            self.write_ref_cnt(),
            self.unsubmitted_cnt(),
            self.unsynced_cnt(),
            current_right_boundary,
        )
    }
}

/// A writer's hold on a memtable. Log entries written under the hold are
/// tracked through [`WriteRef::log_created`], [`WriteRef::log_submitted`] and
/// [`WriteRef::log_synced`].
#[derive(Debug)]
pub struct WriteRef {
    memtable: Arc<Memtable>,
}

impl WriteRef {
    pub fn memtable(&self) -> &Arc<Memtable> {
        &self.memtable
    }

    pub fn log_created(&self) {
        self.memtable.inc_unsubmitted_cnt();
    }

    pub fn log_submitted(&self) {
        self.memtable.dec_unsubmitted_and_inc_unsynced();
    }

    pub fn log_synced(&self, scn: Scn) {
        self.memtable.dec_unsynced_cnt(scn);
    }
}

impl Drop for WriteRef {
    fn drop(&mut self) {
        self.memtable.write_ref_cnt.fetch_sub(1, Ordering::SeqCst);
    }
}
