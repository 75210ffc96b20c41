//! In-process collaborators for a single-node log stream.
//!
//! Every handler keeps its state behind `parking_lot` locks or atomics and can
//! be told to fail, which is how the freezer's error paths are exercised.

use super::{DataCheckpoint, LogHandler, LogStream, LsId, Role, TabletId, TabletService, WrsHandler};
use crate::error::FreezeError;
use crate::memtable::{Memtable, MemtableKey};
use crate::scn::{AtomicScn, Scn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

fn injected(slot: &Mutex<Option<FreezeError>>) -> Result<(), FreezeError> {
    match slot.lock().as_ref() {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

#[derive(Debug)]
pub struct LocalLogHandler {
    role: Mutex<(Role, i64)>,
    max_decided_scn: AtomicScn,
    max_consequent_callbacked_scn: AtomicScn,
    replay_pending: AtomicBool,
    pend_count: AtomicU64,
    restore_count: AtomicU64,
    submit_count: AtomicU64,
    role_error: Mutex<Option<FreezeError>>,
    pend_error: Mutex<Option<FreezeError>>,
    restore_error: Mutex<Option<FreezeError>>,
    submit_error: Mutex<Option<FreezeError>>,
    max_decided_error: Mutex<Option<FreezeError>>,
}

impl Default for LocalLogHandler {
    fn default() -> Self {
        Self {
            role: Mutex::new((Role::Leader, 1)),
            max_decided_scn: AtomicScn::new(Scn::base_scn()),
            max_consequent_callbacked_scn: AtomicScn::new(Scn::base_scn()),
            replay_pending: AtomicBool::new(false),
            pend_count: AtomicU64::new(0),
            restore_count: AtomicU64::new(0),
            submit_count: AtomicU64::new(0),
            role_error: Mutex::new(None),
            pend_error: Mutex::new(None),
            restore_error: Mutex::new(None),
            submit_error: Mutex::new(None),
            max_decided_error: Mutex::new(None),
        }
    }
}

impl LocalLogHandler {
    pub fn set_role(&self, role: Role, proposal_id: i64) {
        *self.role.lock() = (role, proposal_id);
    }

    pub fn set_max_decided_scn(&self, scn: Scn) {
        self.max_decided_scn.store(scn);
    }

    pub fn set_max_consequent_callbacked_scn(&self, scn: Scn) {
        self.max_consequent_callbacked_scn.store(scn);
    }

    pub fn is_replay_pending(&self) -> bool {
        self.replay_pending.load(Ordering::Acquire)
    }

    pub fn pend_count(&self) -> u64 {
        self.pend_count.load(Ordering::Acquire)
    }

    pub fn restore_count(&self) -> u64 {
        self.restore_count.load(Ordering::Acquire)
    }

    pub fn submit_count(&self) -> u64 {
        self.submit_count.load(Ordering::Acquire)
    }

    pub fn fail_role(&self, err: Option<FreezeError>) {
        *self.role_error.lock() = err;
    }

    pub fn fail_pend(&self, err: Option<FreezeError>) {
        *self.pend_error.lock() = err;
    }

    pub fn fail_restore(&self, err: Option<FreezeError>) {
        *self.restore_error.lock() = err;
    }

    pub fn fail_submit(&self, err: Option<FreezeError>) {
        *self.submit_error.lock() = err;
    }

    pub fn fail_max_decided(&self, err: Option<FreezeError>) {
        *self.max_decided_error.lock() = err;
    }
}

impl LogHandler for LocalLogHandler {
    fn role(&self) -> Result<(Role, i64), FreezeError> {
        injected(&self.role_error)?;
        Ok(*self.role.lock())
    }

    fn pend_submit_replay_log(&self) -> Result<(), FreezeError> {
        self.pend_count.fetch_add(1, Ordering::AcqRel);
        injected(&self.pend_error)?;
        self.replay_pending.store(true, Ordering::Release);
        Ok(())
    }

    fn restore_submit_replay_log(&self) -> Result<(), FreezeError> {
        self.restore_count.fetch_add(1, Ordering::AcqRel);
        injected(&self.restore_error)?;
        self.replay_pending.store(false, Ordering::Release);
        Ok(())
    }

    fn submit_freeze_log(&self) -> Result<(), FreezeError> {
        self.submit_count.fetch_add(1, Ordering::AcqRel);
        injected(&self.submit_error)?;
        if self.role.lock().0 != Role::Leader {
            return Err(FreezeError::RoleMismatch);
        }
        Ok(())
    }

    fn max_decided_scn(&self) -> Result<Scn, FreezeError> {
        injected(&self.max_decided_error)?;
        Ok(self.max_decided_scn.load())
    }

    fn max_consequent_callbacked_scn(&self) -> Result<Scn, FreezeError> {
        Ok(self.max_consequent_callbacked_scn.load())
    }
}

#[derive(Debug)]
struct LocalTablet {
    memtables: Vec<Arc<Memtable>>,
    clog_checkpoint_scn: Scn,
    snapshot_version: Scn,
}

/// Tablets of one log stream, each with its memtables oldest first.
#[derive(Debug, Default)]
pub struct LocalTabletService {
    tablets: Mutex<BTreeMap<TabletId, LocalTablet>>,
    next_memtable_id: AtomicU64,
}

impl LocalTabletService {
    pub fn create_tablet(&self, tablet_id: TabletId, clog_checkpoint_scn: Scn) -> Result<(), FreezeError> {
        if !tablet_id.is_valid() {
            return Err(FreezeError::InvalidArgument(format!("tablet id {tablet_id}")));
        }
        self.tablets.lock().entry(tablet_id).or_insert(LocalTablet {
            memtables: Vec::new(),
            clog_checkpoint_scn,
            snapshot_version: Scn::max_scn(),
        });
        Ok(())
    }

    /// Memtable a writer should use now, switching to a new one when the
    /// newest is sealed.
    pub fn memtable_for_write(&self, tablet_id: TabletId) -> Result<Arc<Memtable>, FreezeError> {
        let mut tablets = self.tablets.lock();
        let tablet = tablets
            .get_mut(&tablet_id)
            .ok_or(FreezeError::TabletNotExist(tablet_id))?;
        match tablet.memtables.last() {
            Some(newest) if !newest.is_frozen() => Ok(Arc::clone(newest)),
            newest => {
                let start_scn = match newest {
                    Some(prev) => Scn::max(prev.max_end_scn(), prev.start_scn()),
                    None => tablet.clog_checkpoint_scn,
                };
                let memtable = self.new_memtable(tablet_id, start_scn);
                tablet.memtables.push(Arc::clone(&memtable));
                Ok(memtable)
            }
        }
    }

    pub fn memtables(&self, tablet_id: TabletId) -> Vec<Arc<Memtable>> {
        self.tablets
            .lock()
            .get(&tablet_id)
            .map(|t| t.memtables.clone())
            .unwrap_or_default()
    }

    pub fn set_clog_checkpoint_scn(&self, tablet_id: TabletId, scn: Scn) -> Result<(), FreezeError> {
        let mut tablets = self.tablets.lock();
        let tablet = tablets
            .get_mut(&tablet_id)
            .ok_or(FreezeError::TabletNotExist(tablet_id))?;
        tablet.clog_checkpoint_scn = scn;
        Ok(())
    }

    pub fn set_snapshot_version(&self, tablet_id: TabletId, scn: Scn) -> Result<(), FreezeError> {
        let mut tablets = self.tablets.lock();
        let tablet = tablets
            .get_mut(&tablet_id)
            .ok_or(FreezeError::TabletNotExist(tablet_id))?;
        tablet.snapshot_version = scn;
        Ok(())
    }

    fn new_memtable(&self, tablet_id: TabletId, start_scn: Scn) -> Arc<Memtable> {
        let id = self.next_memtable_id.fetch_add(1, Ordering::AcqRel) + 1;
        Arc::new(Memtable::new(MemtableKey { tablet_id, id }, start_scn))
    }
}

impl TabletService for LocalTabletService {
    fn active_memtable(&self, tablet_id: TabletId) -> Result<Option<Arc<Memtable>>, FreezeError> {
        let tablets = self.tablets.lock();
        let tablet = tablets
            .get(&tablet_id)
            .ok_or(FreezeError::TabletNotExist(tablet_id))?;
        Ok(tablet.memtables.last().cloned())
    }

    fn active_memtables(&self) -> Result<Vec<Arc<Memtable>>, FreezeError> {
        Ok(self
            .tablets
            .lock()
            .values()
            .filter_map(|t| t.memtables.last().cloned())
            .collect())
    }

    fn create_memtable(
        &self,
        tablet_id: TabletId,
        start_scn: Scn,
        snapshot_version: Scn,
    ) -> Result<Arc<Memtable>, FreezeError> {
        let mut tablets = self.tablets.lock();
        let tablet = tablets
            .get_mut(&tablet_id)
            .ok_or(FreezeError::TabletNotExist(tablet_id))?;
        let memtable = self.new_memtable(tablet_id, start_scn);
        memtable.set_snapshot_version(snapshot_version);
        tablet.memtables.push(Arc::clone(&memtable));
        Ok(memtable)
    }

    fn clog_checkpoint_scn(&self, tablet_id: TabletId) -> Result<Scn, FreezeError> {
        self.tablets
            .lock()
            .get(&tablet_id)
            .map(|t| t.clog_checkpoint_scn)
            .ok_or(FreezeError::TabletNotExist(tablet_id))
    }

    fn snapshot_version(&self, tablet_id: TabletId) -> Result<Scn, FreezeError> {
        self.tablets
            .lock()
            .get(&tablet_id)
            .map(|t| t.snapshot_version)
            .ok_or(FreezeError::TabletNotExist(tablet_id))
    }
}

#[derive(Debug, Default)]
pub struct LocalDataCheckpoint {
    ready: Mutex<Vec<Arc<Memtable>>>,
}

impl LocalDataCheckpoint {
    /// Memtables handed over so far, in hand-over order.
    pub fn ready_for_flush(&self) -> Vec<Arc<Memtable>> {
        self.ready.lock().clone()
    }
}

impl DataCheckpoint for LocalDataCheckpoint {
    fn add_ready_for_flush(&self, memtable: Arc<Memtable>) -> Result<(), FreezeError> {
        let mut ready = self.ready.lock();
        if !ready.iter().any(|m| Arc::ptr_eq(m, &memtable)) {
            ready.push(memtable);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LocalWrsHandler {
    weak_read_scn: AtomicScn,
    error: Mutex<Option<FreezeError>>,
}

impl Default for LocalWrsHandler {
    fn default() -> Self {
        Self {
            weak_read_scn: AtomicScn::new(Scn::base_scn()),
            error: Mutex::new(None),
        }
    }
}

impl LocalWrsHandler {
    pub fn set_weak_read_scn(&self, scn: Scn) {
        self.weak_read_scn.store(scn);
    }

    pub fn fail(&self, err: Option<FreezeError>) {
        *self.error.lock() = err;
    }
}

impl WrsHandler for LocalWrsHandler {
    fn ls_weak_read_scn(&self) -> Result<Scn, FreezeError> {
        injected(&self.error)?;
        Ok(self.weak_read_scn.load())
    }
}

/// A [`LogStream`] wired to the local collaborators, with typed handles kept
/// for direct control.
#[derive(Debug, Clone)]
pub struct LocalLogStream {
    pub ls: Arc<LogStream>,
    pub log_handler: Arc<LocalLogHandler>,
    pub tablet_svr: Arc<LocalTabletService>,
    pub data_checkpoint: Arc<LocalDataCheckpoint>,
    pub wrs_handler: Arc<LocalWrsHandler>,
}

impl LocalLogStream {
    pub fn new(ls_id: LsId) -> Self {
        let log_handler = Arc::new(LocalLogHandler::default());
        let tablet_svr = Arc::new(LocalTabletService::default());
        let data_checkpoint = Arc::new(LocalDataCheckpoint::default());
        let wrs_handler = Arc::new(LocalWrsHandler::default());
        let ls = Arc::new(LogStream::new(
            ls_id,
            log_handler.clone(),
            tablet_svr.clone(),
            data_checkpoint.clone(),
            wrs_handler.clone(),
        ));
        Self {
            ls,
            log_handler,
            tablet_svr,
            data_checkpoint,
            wrs_handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LocalLogStream;
    use crate::error::FreezeError;
    use crate::ls::{LsId, Role, TabletId};
    use crate::scn::Scn;

    #[test]
    fn writers_switch_to_a_new_memtable_after_freeze() {
        let local = LocalLogStream::new(LsId::new(1));
        let tablet = TabletId::new(10);
        local
            .tablet_svr
            .create_tablet(tablet, Scn::from_sql(5).expect("scn"))
            .expect("tablet");
        let first = local.tablet_svr.memtable_for_write(tablet).expect("first");
        assert_eq!(first.start_scn(), Scn::from_sql(5).expect("scn"));
        assert!(std::sync::Arc::ptr_eq(
            &first,
            &local.tablet_svr.memtable_for_write(tablet).expect("same")
        ));

        first.freeze(1, true, false);
        let second = local.tablet_svr.memtable_for_write(tablet).expect("second");
        assert_ne!(first.key(), second.key());
        assert_eq!(local.tablet_svr.memtables(tablet).len(), 2);
    }

    #[test]
    fn unknown_tablets_are_reported() {
        let local = LocalLogStream::new(LsId::new(1));
        let missing = TabletId::new(99);
        assert_eq!(
            local.tablet_svr.memtable_for_write(missing).map(|_| ()),
            Err(FreezeError::TabletNotExist(missing))
        );
        assert!(local.ls.tablet_svr().clog_checkpoint_scn(missing).is_err());
    }

    #[test]
    fn log_handler_counts_and_fails_on_demand() {
        let local = LocalLogStream::new(LsId::new(1));
        let handler = &local.log_handler;
        local.ls.log_handler().pend_submit_replay_log().expect("pend");
        assert!(handler.is_replay_pending());
        local.ls.log_handler().restore_submit_replay_log().expect("restore");
        assert!(!handler.is_replay_pending());

        handler.set_role(Role::Follower, 2);
        assert_eq!(
            local.ls.log_handler().submit_freeze_log(),
            Err(FreezeError::RoleMismatch)
        );
        handler.fail_role(Some(FreezeError::unavailable("palf down")));
        assert!(local.ls.log_handler().role().is_err());
        assert_eq!((handler.pend_count(), handler.restore_count()), (1, 1));
        assert_eq!(handler.submit_count(), 1);
    }
}
