use super::state::{FreezeOutcome, FreezeState, FreezeWatermarks};
use super::{FreezeKind, Freezer, PendingFreeze};
use crate::error::FreezeError;
use crate::ls::{LogStream, Role, TabletId};
use crate::memtable::Memtable;
use crate::scn::Scn;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl Freezer {
    pub(super) fn initialized_ls(&self) -> Result<Arc<LogStream>, FreezeError> {
        self.ls.read().clone().ok_or(FreezeError::NotInitialized)
    }

    /// The log stream, if this freezer may start freezes right now.
    pub(super) fn serving_ls(&self) -> Result<Arc<LogStream>, FreezeError> {
        let ls = self.initialized_ls()?;
        if !self.enable.load(Ordering::Acquire) {
            return Err(FreezeError::Offline);
        }
        Ok(ls)
    }

    pub(super) fn invalid_state(&self, message: String) -> FreezeError {
        error!(ls_id = %self.ls_id(), message = %message, "freeze: invalid state");
        FreezeError::InvalidState(message)
    }

    pub(super) fn is_covered_by_current_freeze(
        &self,
        ls: &LogStream,
        tablet_id: TabletId,
    ) -> Result<bool, FreezeError> {
        if !self.flag.is_freezing() {
            return Ok(false);
        }
        Ok(ls
            .tablet_svr()
            .active_memtable(tablet_id)?
            .is_some_and(|m| m.is_frozen() && self.flag.is_freezing_at(m.freeze_clock())))
    }

    /// Raises the flag under a new generation, retrying while another
    /// generation holds it. The generation's watermarks are read before each
    /// attempt and published under the watermark lock together with the flag,
    /// so a reader that sees the new generation also sees its watermarks.
    /// Returns the clock and the previous watermarks for undo. Gives up at
    /// once when the generation holding the flag timed out and is parked.
    pub(super) async fn loop_set_freeze_flag(
        &self,
        ls: &LogStream,
    ) -> Result<(u32, FreezeWatermarks), FreezeError> {
        let deadline = Instant::now() + self.config.max_wait_set_freeze_flag();
        loop {
            if !self.flag.is_freezing() {
                let (freeze_snapshot_version, max_decided_scn) = self.read_watermark_sources(ls)?;
                let mut marks = self.watermarks.write();
                match self.flag.try_set() {
                    Ok(clock) => {
                        let prev = std::mem::replace(
                            &mut *marks,
                            FreezeWatermarks {
                                clock,
                                freeze_snapshot_version,
                                max_decided_scn,
                            },
                        );
                        drop(marks);
                        debug!(
                            ls_id = %ls.ls_id(),
                            clock,
                            freeze_snapshot_version = %freeze_snapshot_version,
                            max_decided_scn = %max_decided_scn,
                            "freeze: flag raised with watermarks"
                        );
                        return Ok((clock, prev));
                    }
                    Err(FreezeError::AlreadyFreezing) => {}
                    Err(err) => return Err(err),
                }
            }
            self.check_flag_wait(deadline)?;
            tokio::time::sleep(self.config.set_freeze_flag_retry_interval()).await;
        }
    }

    /// Raises the flag for the generation already on the clock. The
    /// watermarks of that generation stay as they are.
    pub(super) async fn loop_set_freeze_flag_without_inc_clock(&self) -> Result<u32, FreezeError> {
        let deadline = Instant::now() + self.config.max_wait_set_freeze_flag();
        loop {
            match self.flag.try_set_without_inc_clock() {
                Ok(clock) => return Ok(clock),
                Err(FreezeError::AlreadyFreezing) => {
                    self.check_flag_wait(deadline)?;
                    tokio::time::sleep(self.config.set_freeze_flag_retry_interval()).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn check_flag_wait(&self, deadline: Instant) -> Result<(), FreezeError> {
        if self.has_pending_freeze() {
            return Err(FreezeError::AlreadyFreezing);
        }
        if Instant::now() >= deadline {
            warn!(
                ls_id = %self.ls_id(),
                freeze_flag = self.flag.load(),
                "freeze: set freeze flag timed out"
            );
            return Err(FreezeError::AlreadyFreezing);
        }
        Ok(())
    }

    /// Weak read scn and max decided scn for the next generation.
    fn read_watermark_sources(&self, ls: &LogStream) -> Result<(Scn, Scn), FreezeError> {
        let freeze_snapshot_version = ls.wrs_handler().ls_weak_read_scn()?;
        if !freeze_snapshot_version.is_valid() {
            return Err(FreezeError::unavailable("weak read scn is not ready"));
        }
        let max_decided_scn = self.decide_max_decided_scn()?;
        Ok((freeze_snapshot_version, max_decided_scn))
    }

    /// Memtables an earlier undo left sealed that `kind` must drain.
    fn take_carried_over(&self, kind: FreezeKind) -> Vec<Arc<Memtable>> {
        let mut carried = self.carried_over.lock();
        match kind {
            FreezeKind::LogStream { .. } => std::mem::take(&mut *carried),
            FreezeKind::Tablet { tablet_id, .. } => {
                let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *carried)
                    .into_iter()
                    .partition(|m| m.tablet_id() == tablet_id);
                *carried = kept;
                taken
            }
        }
    }

    /// Decision window of a freeze: sealing and log submission. Any failure
    /// is undone here before it is returned. With `with_carried` the sealed
    /// memtables an earlier undo could not reopen join this generation.
    pub(super) async fn decide_freeze(
        &self,
        ls: &LogStream,
        clock: u32,
        prev_watermarks: FreezeWatermarks,
        kind: FreezeKind,
        with_carried: bool,
    ) -> Result<Vec<Arc<Memtable>>, FreezeError> {
        let carried = if with_carried {
            self.take_carried_over(kind)
        } else {
            Vec::new()
        };
        let (newly_sealed, needs_log) = match self.seal_memtables(ls, clock, kind) {
            Ok(sealed) => sealed,
            Err(err) => {
                self.undo_freeze(ls, clock, &carried, prev_watermarks, &err);
                return Err(err);
            }
        };
        let needs_log = needs_log || !carried.is_empty();
        for memtable in &carried {
            self.stat.add_memtable_info(memtable.info(Scn::invalid_scn()));
        }
        let mut sealed = carried;
        sealed.extend(newly_sealed);

        self.stat.set_state(FreezeState::LogNotSubmitted);
        if needs_log && let Err(err) = self.submit_log_for_freeze(ls).await {
            self.undo_freeze(ls, clock, &sealed, prev_watermarks, &err);
            return Err(err);
        }

        self.stat.set_state(FreezeState::WaitingReadyForFlush);
        for memtable in &sealed {
            memtable.set_freeze_state(FreezeState::WaitingReadyForFlush);
        }
        Ok(sealed)
    }

    /// Seals the memtables `kind` targets. The flag tells whether any of them
    /// may hold redo that still has to be submitted; an empty memtable created
    /// here cannot.
    fn seal_memtables(
        &self,
        ls: &LogStream,
        clock: u32,
        kind: FreezeKind,
    ) -> Result<(Vec<Arc<Memtable>>, bool), FreezeError> {
        let mut sealed = Vec::new();
        let mut created_empty = false;
        match kind {
            FreezeKind::LogStream { .. } => {
                for memtable in ls.tablet_svr().active_memtables()? {
                    if memtable.freeze(clock, false, false) {
                        self.stat.add_memtable_info(memtable.info(Scn::invalid_scn()));
                        sealed.push(memtable);
                    }
                }
            }
            FreezeKind::Tablet {
                tablet_id,
                is_force,
            } => {
                let newest = ls.tablet_svr().active_memtable(tablet_id)?;
                if let Some(memtable) = &newest
                    && memtable.freeze(clock, true, is_force)
                {
                    self.stat.add_memtable_info(memtable.info(Scn::invalid_scn()));
                    sealed.push(Arc::clone(memtable));
                } else if is_force {
                    let memtable = self.create_empty_memtable(ls, tablet_id, newest.as_deref())?;
                    memtable.freeze(clock, true, true);
                    self.stat.add_memtable_info(memtable.info(Scn::invalid_scn()));
                    sealed.push(memtable);
                    created_empty = true;
                }
            }
        }
        let needs_log = !sealed.is_empty() && !created_empty;
        Ok((sealed, needs_log))
    }

    /// Creates the empty memtable a forced freeze seals when the tablet has
    /// no active one. It starts where the tablet's data ends.
    fn create_empty_memtable(
        &self,
        ls: &LogStream,
        tablet_id: TabletId,
        frozen: Option<&Memtable>,
    ) -> Result<Arc<Memtable>, FreezeError> {
        let clog_checkpoint_scn = ls.tablet_svr().clog_checkpoint_scn(tablet_id)?;
        let start_scn = match frozen {
            Some(prev) => Scn::max(
                clog_checkpoint_scn,
                Scn::max(prev.max_end_scn(), prev.start_scn()),
            ),
            None => clog_checkpoint_scn,
        };
        if !start_scn.is_valid() {
            return Err(self.invalid_state(format!(
                "tablet {tablet_id} has no valid clog checkpoint scn"
            )));
        }
        let snapshot_version = ls.tablet_svr().snapshot_version(tablet_id)?;
        let memtable = ls
            .tablet_svr()
            .create_memtable(tablet_id, start_scn, snapshot_version)?;
        self.inc_empty_memtable_cnt();
        info!(
            ls_id = %ls.ls_id(),
            tablet_id = %tablet_id,
            start_scn = %start_scn,
            "freeze: created empty memtable for forced freeze"
        );
        Ok(memtable)
    }

    /// Asks the leader's transactions to submit redo for the sealed
    /// memtables. A follower has nothing to submit; the freeze goes on and
    /// `need_resubmit_log` is raised for the next leader-side attempt.
    async fn submit_log_for_freeze(&self, ls: &LogStream) -> Result<(), FreezeError> {
        let deadline = Instant::now() + self.config.max_wait_submit_log();
        loop {
            let (role, _) = ls.log_handler().role()?;
            if role != Role::Leader {
                self.need_resubmit_log.store(true, Ordering::Release);
                debug!(ls_id = %ls.ls_id(), role = ?role, "freeze: not leader, freeze log deferred");
                return Ok(());
            }
            match ls.log_handler().submit_freeze_log() {
                Ok(()) => {
                    self.need_resubmit_log.store(false, Ordering::Release);
                    return Ok(());
                }
                Err(FreezeError::RoleMismatch) => return Err(FreezeError::RoleMismatch),
                Err(err) if Instant::now() >= deadline => {
                    warn!(ls_id = %ls.ls_id(), error = %err, "freeze: submit freeze log gave up");
                    return Err(err);
                }
                Err(err) => {
                    debug!(ls_id = %ls.ls_id(), error = %err, "freeze: submit freeze log retry");
                    tokio::time::sleep(self.config.submit_log_retry_interval()).await;
                }
            }
        }
    }

    /// Polls the sealed memtables until each is ready for flush and handed to
    /// the checkpoint service. On failure the memtables still waiting come
    /// back with the error. With `check_ls_state` each round also checks the
    /// log stream is still running.
    pub(super) async fn wait_ready_for_flush(
        &self,
        ls: &LogStream,
        mut memtables: Vec<Arc<Memtable>>,
        check_ls_state: bool,
    ) -> Result<(), (FreezeError, Vec<Arc<Memtable>>)> {
        let started = Instant::now();
        let deadline = started + self.config.max_wait_ready_for_flush();
        let mut next_report = started + self.config.stall_report_interval();
        loop {
            if check_ls_state {
                let state = ls.lock();
                if let Err(err) = LogStream::check_state(&state) {
                    return Err((err, memtables));
                }
            }
            let right_boundary = match ls.log_handler().max_consequent_callbacked_scn() {
                Ok(scn) => scn,
                Err(err) => {
                    debug!(ls_id = %ls.ls_id(), error = %err, "freeze: callbacked scn unavailable");
                    Scn::invalid_scn()
                }
            };
            memtables.retain(|m| !self.try_finish_memtable(ls, m, right_boundary));
            if memtables.is_empty() {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                self.report_stall(ls, &memtables, right_boundary, now - started);
                return Err((FreezeError::Timeout, memtables));
            }
            if now >= next_report {
                self.report_stall(ls, &memtables, right_boundary, now - started);
                next_report = now + self.config.stall_report_interval();
            }
            tokio::time::sleep(self.config.ready_for_flush_poll_interval()).await;
        }
    }

    /// Finishes `memtable` if it is ready. Returns whether it left the wait.
    fn try_finish_memtable(&self, ls: &LogStream, memtable: &Arc<Memtable>, right_boundary: Scn) -> bool {
        if !memtable.is_ready_for_flush(right_boundary) {
            return false;
        }
        let end_scn = memtable.resolve_right_boundary();
        memtable.set_snapshot_version(self.get_freeze_snapshot_version());
        if let Err(err) = ls.data_checkpoint().add_ready_for_flush(Arc::clone(memtable)) {
            warn!(
                ls_id = %ls.ls_id(),
                tablet_id = %memtable.tablet_id(),
                error = %err,
                "freeze: hand-off to checkpoint failed, will retry"
            );
            return false;
        }
        memtable.finish_freeze();
        self.stat.remove_memtable_info(memtable.tablet_id());
        debug!(
            ls_id = %ls.ls_id(),
            tablet_id = %memtable.tablet_id(),
            end_scn = %end_scn,
            "freeze: memtable ready for flush"
        );
        true
    }

    fn report_stall(
        &self,
        ls: &LogStream,
        memtables: &[Arc<Memtable>],
        right_boundary: Scn,
        waited: std::time::Duration,
    ) {
        for memtable in memtables {
            self.stat.add_memtable_info(memtable.info(right_boundary));
            self.stat.add_diagnose_info(&format!(
                "tablet {} not ready after {}ms: write_ref {} unsubmitted {} unsynced {} max_end_scn {} right_boundary {}",
                memtable.tablet_id(),
                waited.as_millis(),
                memtable.write_ref_cnt(),
                memtable.unsubmitted_cnt(),
                memtable.unsynced_cnt(),
                memtable.max_end_scn(),
                right_boundary,
            ));
        }
        warn!(
            ls_id = %ls.ls_id(),
            waiting = memtables.len(),
            waited_ms = waited.as_millis() as u64,
            "freeze: memtables not ready for flush"
        );
    }

    /// Drain-wait after the decision window. A timeout parks the generation
    /// with the flag still raised.
    pub(super) async fn drain_and_finish(
        &self,
        ls: &LogStream,
        clock: u32,
        kind: FreezeKind,
        memtables: Vec<Arc<Memtable>>,
    ) -> Result<FreezeOutcome, FreezeError> {
        self.stat.set_state(FreezeState::WaitingReadyForFlush);
        match self.wait_ready_for_flush(ls, memtables, false).await {
            Ok(()) => {
                self.complete_freeze(ls, clock, kind);
                Ok(FreezeOutcome::Finished)
            }
            Err((err, remaining)) => {
                warn!(
                    ls_id = %ls.ls_id(),
                    clock,
                    remaining = remaining.len(),
                    error = %err,
                    "freeze: drain-wait ended without all memtables ready, freeze stays pending"
                );
                self.stat.end(Err(&err));
                *self.pending.lock() = Some(PendingFreeze {
                    clock,
                    kind,
                    memtables: remaining,
                });
                Err(err)
            }
        }
    }

    pub(super) fn complete_freeze(&self, ls: &LogStream, clock: u32, kind: FreezeKind) {
        self.flag.unset();
        self.stat.end(Ok(()));
        if let FreezeKind::LogStream { .. } = kind {
            self.ready_for_flush.store(true, Ordering::Release);
        }
        info!(ls_id = %ls.ls_id(), clock, kind = ?kind, "freeze: finished");
    }

    /// Reverts a failed decision window. The clock keeps the generation it
    /// reached; only the freeze bit is lowered. A sealed memtable is reopened
    /// only while it is still its tablet's newest one. Once writers moved on
    /// to a successor it stays sealed and is carried into the next freeze.
    fn undo_freeze(
        &self,
        ls: &LogStream,
        clock: u32,
        sealed: &[Arc<Memtable>],
        prev_watermarks: FreezeWatermarks,
        err: &FreezeError,
    ) {
        let mut carried = Vec::new();
        for memtable in sealed {
            self.stat.remove_memtable_info(memtable.tablet_id());
            let still_newest = matches!(
                ls.tablet_svr().active_memtable(memtable.tablet_id()),
                Ok(Some(newest)) if Arc::ptr_eq(&newest, memtable)
            );
            if still_newest {
                memtable.unfreeze();
            } else {
                carried.push(Arc::clone(memtable));
            }
        }
        let unfrozen = sealed.len() - carried.len();
        if !carried.is_empty() {
            warn!(
                ls_id = %ls.ls_id(),
                clock,
                carried = carried.len(),
                "freeze: sealed memtables have successors, left sealed for the next freeze"
            );
            self.carried_over.lock().extend(carried);
        }
        {
            let mut marks = self.watermarks.write();
            *marks = prev_watermarks;
            self.flag.unset();
        }
        self.stat.end(Err(err));
        warn!(
            ls_id = %ls.ls_id(),
            clock,
            unfrozen,
            error = %err,
            "freeze: undo freeze"
        );
    }
}
