//! Freeze coordinator of one log stream.
//!
//! A freeze seals active memtables under a new generation of the freeze
//! clock, captures the generation's watermarks, asks the log layer to flush
//! redo for the sealed memtables, then waits (bounded) until every sealed
//! memtable is drained and hands it to the checkpoint service.
//!
//! Whole-partition freezes take priority over tablet freezes: while one is
//! announced, normal tablet freezes are refused and forced ones wait.

pub mod flag;
pub mod guard;
mod internals;
pub mod stat;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;


use crate::config::FreezerConfig;
use crate::error::FreezeError;
use crate::ls::{LogStream, LsId, TabletId};
use crate::memtable::Memtable;
use crate::scn::Scn;
use flag::FreezeFlag;
use guard::{LsFreezeGuard, ReplayPendingGuard, TabletFreezeGuard};
use parking_lot::{Mutex, RwLock};
use stat::{FreezerStat, FreezerStatSnapshot};
use state::{FreezeOutcome, FreezeState, FreezeWatermarks};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FreezeKind {
    LogStream { is_tenant_freeze: bool },
    Tablet { tablet_id: TabletId, is_force: bool },
}

/// A generation whose drain-wait timed out. Its flag stays raised until
/// [`Freezer::resume_pending_freeze`] or the next partition or forced tablet
/// freeze drains the rest.
#[derive(Debug)]
pub(crate) struct PendingFreeze {
    clock: u32,
    kind: FreezeKind,
    memtables: Vec<Arc<Memtable>>,
}

pub struct Freezer {
    config: Arc<FreezerConfig>,
    ls: RwLock<Option<Arc<LogStream>>>,
    flag: FreezeFlag,
    watermarks: RwLock<FreezeWatermarks>,
    stat: FreezerStat,
    empty_memtable_cnt: AtomicI64,
    high_priority_freeze_cnt: AtomicI64,
    low_priority_freeze_cnt: AtomicI64,
    need_resubmit_log: AtomicBool,
    enable: AtomicBool,
    ready_for_flush: AtomicBool,
    pending: Mutex<Option<PendingFreeze>>,
    carried_over: Mutex<Vec<Arc<Memtable>>>,
}

impl std::fmt::Debug for Freezer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Freezer")
            .field("ls_id", &self.ls_id())
            .field("freeze_flag", &self.flag.load())
            .field("enable", &self.enable.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Freezer {
    pub fn new(config: FreezerConfig) -> Result<Self, FreezeError> {
        config.validate()?;
        let stat = FreezerStat::new(
            config.frozen_memtable_info_limit,
            config.max_diagnose_info_bytes,
        );
        Ok(Self {
            config: Arc::new(config),
            ls: RwLock::new(None),
            flag: FreezeFlag::new(),
            watermarks: RwLock::new(FreezeWatermarks::default()),
            stat,
            empty_memtable_cnt: AtomicI64::new(0),
            high_priority_freeze_cnt: AtomicI64::new(0),
            low_priority_freeze_cnt: AtomicI64::new(0),
            need_resubmit_log: AtomicBool::new(false),
            enable: AtomicBool::new(false),
            ready_for_flush: AtomicBool::new(false),
            pending: Mutex::new(None),
            carried_over: Mutex::new(Vec::new()),
        })
    }

    pub fn init(&self, ls: Arc<LogStream>) -> Result<(), FreezeError> {
        if !ls.ls_id().is_valid() {
            return Err(FreezeError::InvalidArgument(format!(
                "invalid ls id {}",
                ls.ls_id()
            )));
        }
        let mut slot = self.ls.write();
        if slot.is_some() {
            warn!(ls_id = %ls.ls_id(), "freeze: freezer initialized twice");
            return Err(FreezeError::InitTwice);
        }
        info!(ls_id = %ls.ls_id(), "freeze: freezer initialized");
        *slot = Some(ls);
        self.enable.store(true, Ordering::Release);
        Ok(())
    }

    /// Drops the log stream and every piece of freeze state. `init` may be
    /// called again afterwards.
    pub fn reset(&self) {
        *self.ls.write() = None;
        self.flag.reset();
        *self.watermarks.write() = FreezeWatermarks::default();
        self.stat.reset();
        self.empty_memtable_cnt.store(0, Ordering::Release);
        self.high_priority_freeze_cnt.store(0, Ordering::Release);
        self.low_priority_freeze_cnt.store(0, Ordering::Release);
        self.need_resubmit_log.store(false, Ordering::Release);
        self.enable.store(false, Ordering::Release);
        self.ready_for_flush.store(false, Ordering::Release);
        *self.pending.lock() = None;
        self.carried_over.lock().clear();
    }

    pub fn offline(&self) {
        self.enable.store(false, Ordering::Release);
        info!(ls_id = %self.ls_id(), "freeze: freezer offline");
    }

    pub fn online(&self) {
        self.enable.store(true, Ordering::Release);
        info!(ls_id = %self.ls_id(), "freeze: freezer online");
    }

    pub fn config(&self) -> &FreezerConfig {
        &self.config
    }

    pub fn ls_id(&self) -> LsId {
        self.ls
            .read()
            .as_ref()
            .map(|ls| ls.ls_id())
            .unwrap_or(LsId::INVALID)
    }

    /// Seals every active memtable of the log stream and waits for all of
    /// them to become ready for flush. A generation parked by an earlier
    /// drain timeout is drained first; if it is still stuck its error is
    /// returned and no new generation starts.
    pub async fn logstream_freeze(
        &self,
        is_tenant_freeze: bool,
    ) -> Result<FreezeOutcome, FreezeError> {
        let ls = self.serving_ls()?;
        let _priority = LsFreezeGuard::enter(
            &self.high_priority_freeze_cnt,
            &self.low_priority_freeze_cnt,
            self.config.max_wait_set_freeze_flag(),
            self.config.set_freeze_flag_retry_interval(),
        )
        .await?;
        {
            let state = ls.lock();
            LogStream::check_state(&state)?;
        }
        self.drain_parked_freeze(&ls).await?;
        self.ready_for_flush.store(false, Ordering::Release);

        let kind = FreezeKind::LogStream { is_tenant_freeze };
        let (clock, prev_watermarks) = self.loop_set_freeze_flag(&ls).await?;
        self.stat.begin(TabletId::INVALID, is_tenant_freeze);
        info!(
            ls_id = %ls.ls_id(),
            clock,
            is_tenant_freeze,
            "freeze: logstream freeze started"
        );
        let replay_guard = ReplayPendingGuard::new(Arc::clone(ls.log_handler()), ls.ls_id());
        let memtables = self
            .decide_freeze(&ls, clock, prev_watermarks, kind, true)
            .await?;
        drop(replay_guard);

        self.drain_and_finish(&ls, clock, kind, memtables).await
    }

    /// Runs [`Freezer::logstream_freeze`] on the tokio runtime without
    /// waiting for it.
    pub fn spawn_logstream_freeze(
        self: &Arc<Self>,
        is_tenant_freeze: bool,
    ) -> JoinHandle<Result<FreezeOutcome, FreezeError>> {
        let freezer = Arc::clone(self);
        tokio::spawn(async move { freezer.logstream_freeze(is_tenant_freeze).await })
    }

    /// Seals the tablet's active memtable. Refused with `AlreadyFreezing`
    /// while a whole-partition freeze is announced.
    pub async fn tablet_freeze(&self, tablet_id: TabletId) -> Result<FreezeOutcome, FreezeError> {
        self.tablet_freeze_impl(tablet_id, false).await
    }

    /// Like [`Freezer::tablet_freeze`] but waits behind whole-partition
    /// freezes, and creates an empty memtable when the tablet has none so the
    /// generation boundary is recorded. A parked generation is drained
    /// first, as in [`Freezer::logstream_freeze`].
    pub async fn force_tablet_freeze(
        &self,
        tablet_id: TabletId,
    ) -> Result<FreezeOutcome, FreezeError> {
        self.tablet_freeze_impl(tablet_id, true).await
    }

    async fn tablet_freeze_impl(
        &self,
        tablet_id: TabletId,
        is_force: bool,
    ) -> Result<FreezeOutcome, FreezeError> {
        if !tablet_id.is_valid() {
            return Err(FreezeError::InvalidArgument(format!(
                "invalid tablet id {tablet_id}"
            )));
        }
        let ls = self.serving_ls()?;
        if is_force {
            self.drain_parked_freeze(&ls).await?;
        }
        if self.is_covered_by_current_freeze(&ls, tablet_id)? {
            debug!(ls_id = %ls.ls_id(), tablet_id = %tablet_id, "freeze: tablet already frozen by this generation");
            return Ok(FreezeOutcome::AlreadyCovered);
        }
        let mut priority = if is_force {
            TabletFreezeGuard::enter(
                &self.high_priority_freeze_cnt,
                &self.low_priority_freeze_cnt,
                self.config.max_wait_set_freeze_flag(),
                self.config.set_freeze_flag_retry_interval(),
            )
            .await?
        } else {
            TabletFreezeGuard::try_enter(
                &self.high_priority_freeze_cnt,
                &self.low_priority_freeze_cnt,
            )?
        };
        if self.has_pending_freeze() {
            return Err(FreezeError::AlreadyFreezing);
        }
        {
            let state = ls.lock();
            LogStream::check_state(&state)?;
        }

        let kind = FreezeKind::Tablet {
            tablet_id,
            is_force,
        };
        let (clock, prev_watermarks) = self.loop_set_freeze_flag(&ls).await?;
        self.stat.begin(tablet_id, is_force);
        info!(
            ls_id = %ls.ls_id(),
            tablet_id = %tablet_id,
            clock,
            is_force,
            "freeze: tablet freeze started"
        );
        let replay_guard = ReplayPendingGuard::new(Arc::clone(ls.log_handler()), ls.ls_id());
        let memtables = self
            .decide_freeze(&ls, clock, prev_watermarks, kind, true)
            .await?;
        drop(replay_guard);
        priority.release();

        if memtables.is_empty() {
            debug!(ls_id = %ls.ls_id(), tablet_id = %tablet_id, "freeze: no active memtable");
            self.complete_freeze(&ls, clock, kind);
            return Ok(FreezeOutcome::NoActiveMemtable);
        }
        self.drain_and_finish(&ls, clock, kind, memtables).await
    }

    /// First half of a tablet-meta replacement: seals the active memtable
    /// under a new generation and lowers the flag again right away. Returns
    /// the sealed memtable, or `None` when there was nothing to seal.
    pub async fn tablet_freeze_for_replace_tablet_meta(
        &self,
        tablet_id: TabletId,
    ) -> Result<Option<Arc<Memtable>>, FreezeError> {
        if !tablet_id.is_valid() {
            return Err(FreezeError::InvalidArgument(format!(
                "invalid tablet id {tablet_id}"
            )));
        }
        let ls = self.serving_ls()?;
        let mut priority = TabletFreezeGuard::try_enter(
            &self.high_priority_freeze_cnt,
            &self.low_priority_freeze_cnt,
        )?;
        if self.has_pending_freeze() {
            return Err(FreezeError::AlreadyFreezing);
        }
        {
            let state = ls.lock();
            LogStream::check_state(&state)?;
        }

        let kind = FreezeKind::Tablet {
            tablet_id,
            is_force: false,
        };
        let (clock, prev_watermarks) = self.loop_set_freeze_flag(&ls).await?;
        self.stat.begin(tablet_id, false);
        let replay_guard = ReplayPendingGuard::new(Arc::clone(ls.log_handler()), ls.ls_id());
        let mut memtables = self
            .decide_freeze(&ls, clock, prev_watermarks, kind, false)
            .await?;
        drop(replay_guard);
        priority.release();

        self.complete_freeze(&ls, clock, kind);
        info!(
            ls_id = %ls.ls_id(),
            tablet_id = %tablet_id,
            clock,
            sealed = !memtables.is_empty(),
            "freeze: tablet sealed for meta replacement"
        );
        Ok(memtables.pop())
    }

    /// Second half of a tablet-meta replacement: re-enters the current
    /// generation without moving the clock, waits until `memtable` is ready
    /// for flush, and lowers the flag.
    pub async fn handle_frozen_memtable_for_replace_tablet_meta(
        &self,
        tablet_id: TabletId,
        memtable: Arc<Memtable>,
    ) -> Result<(), FreezeError> {
        let ls = self.serving_ls()?;
        if memtable.tablet_id() != tablet_id {
            return Err(FreezeError::InvalidArgument(format!(
                "memtable of tablet {} passed for tablet {tablet_id}",
                memtable.tablet_id()
            )));
        }
        if !memtable.is_frozen() {
            return Err(self.invalid_state(format!(
                "memtable {} of tablet {tablet_id} is not frozen",
                memtable.key().id
            )));
        }
        let clock = self.loop_set_freeze_flag_without_inc_clock().await?;
        self.stat.begin(tablet_id, false);
        self.stat.set_state(FreezeState::WaitingReadyForFlush);
        memtable.set_freeze_state(FreezeState::WaitingReadyForFlush);

        let kind = FreezeKind::Tablet {
            tablet_id,
            is_force: false,
        };
        match self.wait_ready_for_flush(&ls, vec![memtable], true).await {
            Ok(()) => {
                self.complete_freeze(&ls, clock, kind);
                Ok(())
            }
            Err((err, _)) => {
                warn!(
                    ls_id = %ls.ls_id(),
                    tablet_id = %tablet_id,
                    clock,
                    error = %err,
                    "freeze: frozen memtable for meta replacement not drained"
                );
                self.flag.unset();
                self.stat.end(Err(&err));
                Err(err)
            }
        }
    }

    /// Runs another bounded drain-wait for the generation left behind by a
    /// timed-out freeze.
    pub async fn resume_pending_freeze(&self) -> Result<FreezeOutcome, FreezeError> {
        let ls = self.serving_ls()?;
        self.drain_parked_freeze(&ls).await
    }

    async fn drain_parked_freeze(&self, ls: &LogStream) -> Result<FreezeOutcome, FreezeError> {
        let pending = self.pending.lock().take();
        let Some(pending) = pending else {
            return Ok(FreezeOutcome::NoPendingFreeze);
        };
        info!(
            ls_id = %ls.ls_id(),
            clock = pending.clock,
            remaining = pending.memtables.len(),
            "freeze: resuming pending freeze"
        );
        self.drain_and_finish(ls, pending.clock, pending.kind, pending.memtables)
            .await
    }

    pub fn has_pending_freeze(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn is_freezing(&self) -> bool {
        self.flag.is_freezing()
    }

    /// True while generation `clock` holds the flag.
    pub fn is_freezing_at(&self, clock: u32) -> bool {
        self.flag.is_freezing_at(clock)
    }

    pub fn is_freezing_word(word: u32) -> bool {
        FreezeFlag::is_freezing_word(word)
    }

    /// Raw flag word: freeze bit plus clock.
    pub fn freeze_flag(&self) -> u32 {
        self.flag.load()
    }

    pub fn freeze_clock(&self) -> u32 {
        self.flag.clock()
    }

    pub fn freeze_watermarks(&self) -> FreezeWatermarks {
        *self.watermarks.read()
    }

    pub fn get_freeze_snapshot_version(&self) -> Scn {
        self.watermarks.read().freeze_snapshot_version
    }

    pub fn get_max_decided_scn(&self) -> Scn {
        self.watermarks.read().max_decided_scn
    }

    pub fn inc_empty_memtable_cnt(&self) {
        self.empty_memtable_cnt.fetch_add(1, Ordering::AcqRel);
    }

    pub fn clear_empty_memtable_cnt(&self) {
        self.empty_memtable_cnt.store(0, Ordering::Release);
    }

    pub fn get_empty_memtable_cnt(&self) -> i64 {
        self.empty_memtable_cnt.load(Ordering::Acquire)
    }

    /// Logs the latest freeze statistics, then clears the empty memtable
    /// count.
    pub fn print_freezer_statistics(&self) {
        let snapshot = self.stat.snapshot();
        info!(
            ls_id = %self.ls_id(),
            empty_memtable_cnt = self.get_empty_memtable_cnt(),
            tablet_id = %snapshot.tablet_id,
            state = %snapshot.state,
            ret_code = ?snapshot.ret_code,
            frozen_memtables = snapshot.memtables_info.len(),
            diagnose_info = %snapshot.diagnose_info,
            "freeze: statistics"
        );
        self.clear_empty_memtable_cnt();
    }

    pub fn get_ls_weak_read_scn(&self) -> Result<Scn, FreezeError> {
        self.initialized_ls()?.wrs_handler().ls_weak_read_scn()
    }

    /// Max decided scn of the log, or `min_scn` while the role is changing.
    pub fn decide_max_decided_scn(&self) -> Result<Scn, FreezeError> {
        let ls = self.initialized_ls()?;
        match ls.log_handler().max_decided_scn() {
            Ok(scn) => Ok(scn),
            Err(FreezeError::RoleMismatch) => {
                debug!(ls_id = %ls.ls_id(), "freeze: role changing, max decided scn is min");
                Ok(Scn::min_scn())
            }
            Err(err) => Err(err),
        }
    }

    pub fn get_max_consequent_callbacked_scn(&self) -> Result<Scn, FreezeError> {
        self.initialized_ls()?
            .log_handler()
            .max_consequent_callbacked_scn()
    }

    pub fn get_newest_clog_checkpoint_scn(&self, tablet_id: TabletId) -> Result<Scn, FreezeError> {
        self.initialized_ls()?
            .tablet_svr()
            .clog_checkpoint_scn(tablet_id)
    }

    pub fn get_newest_snapshot_version(&self, tablet_id: TabletId) -> Result<Scn, FreezeError> {
        self.initialized_ls()?.tablet_svr().snapshot_version(tablet_id)
    }

    pub fn get_stat(&self) -> &FreezerStat {
        &self.stat
    }

    pub fn stat_snapshot(&self) -> FreezerStatSnapshot {
        self.stat.snapshot()
    }

    pub fn need_resubmit_log(&self) -> bool {
        self.need_resubmit_log.load(Ordering::Acquire)
    }

    pub fn set_need_resubmit_log(&self, need: bool) {
        self.need_resubmit_log.store(need, Ordering::Release);
    }

    /// True once the last whole-partition freeze completed.
    pub fn is_ready_for_flush(&self) -> bool {
        self.ready_for_flush.load(Ordering::Acquire)
    }

    pub fn set_ready_for_flush(&self, ready: bool) {
        self.ready_for_flush.store(ready, Ordering::Release);
    }
}
