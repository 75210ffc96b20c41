//! Narrow interfaces the freezer consumes from the rest of the partition.
//!
//! All calls are synchronous and expected to return promptly; the freezer
//! never holds one of its own locks while calling into them.

use super::{Role, TabletId};
use crate::error::FreezeError;
use crate::memtable::Memtable;
use crate::scn::Scn;
use std::sync::Arc;

/// Log replication handle of the partition.
pub trait LogHandler: Send + Sync {
    /// Current role and the proposal id it was granted under.
    fn role(&self) -> Result<(Role, i64), FreezeError>;

    /// Holds back submission of replayed log entries until restored.
    fn pend_submit_replay_log(&self) -> Result<(), FreezeError>;

    fn restore_submit_replay_log(&self) -> Result<(), FreezeError>;

    /// Asks in-flight transactions to submit redo for the sealed memtables.
    /// Fails with `RoleMismatch` once leadership is lost.
    fn submit_freeze_log(&self) -> Result<(), FreezeError>;

    /// Fails with `RoleMismatch` while the role is changing.
    fn max_decided_scn(&self) -> Result<Scn, FreezeError>;

    /// Every log entry at or below this scn has had its callback run.
    fn max_consequent_callbacked_scn(&self) -> Result<Scn, FreezeError>;
}

/// Tablet and memtable management of the partition.
pub trait TabletService: Send + Sync {
    /// Newest memtable of the tablet. It is the active memtable unless it
    /// was sealed and no writer has switched to a successor yet.
    fn active_memtable(&self, tablet_id: TabletId) -> Result<Option<Arc<Memtable>>, FreezeError>;

    /// Newest memtable of every tablet that has one.
    fn active_memtables(&self) -> Result<Vec<Arc<Memtable>>, FreezeError>;

    fn create_memtable(
        &self,
        tablet_id: TabletId,
        start_scn: Scn,
        snapshot_version: Scn,
    ) -> Result<Arc<Memtable>, FreezeError>;

    /// Scn up to which the tablet's data is checkpointed on disk.
    fn clog_checkpoint_scn(&self, tablet_id: TabletId) -> Result<Scn, FreezeError>;

    fn snapshot_version(&self, tablet_id: TabletId) -> Result<Scn, FreezeError>;
}

/// Flush side of the checkpoint service.
pub trait DataCheckpoint: Send + Sync {
    /// Hands over a memtable that reached ready-for-flush.
    fn add_ready_for_flush(&self, memtable: Arc<Memtable>) -> Result<(), FreezeError>;
}

/// Weak read timestamp service.
pub trait WrsHandler: Send + Sync {
    fn ls_weak_read_scn(&self) -> Result<Scn, FreezeError>;
}
