pub mod handler;
pub mod local;

use crate::error::FreezeError;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use handler::{DataCheckpoint, LogHandler, TabletService, WrsHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LsId(i64);

impl LsId {
    pub const INVALID: LsId = LsId(-1);

    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> i64 {
        self.0
    }

    pub const fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for LsId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TabletId(u64);

impl TabletId {
    pub const INVALID: TabletId = TabletId(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }

    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for TabletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
    StandbyLeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LsRunState {
    #[default]
    Running,
    Offline,
    Stopped,
}

/// The partition a freezer serves: its id, the services the freezer calls
/// into, and the "ls lock" guarding the partition's run state.
pub struct LogStream {
    ls_id: LsId,
    log_handler: Arc<dyn LogHandler>,
    tablet_svr: Arc<dyn TabletService>,
    data_checkpoint: Arc<dyn DataCheckpoint>,
    wrs_handler: Arc<dyn WrsHandler>,
    run_state: RwLock<LsRunState>,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("ls_id", &self.ls_id)
            .field("run_state", &*self.run_state.read())
            .finish_non_exhaustive()
    }
}

impl LogStream {
    pub fn new(
        ls_id: LsId,
        log_handler: Arc<dyn LogHandler>,
        tablet_svr: Arc<dyn TabletService>,
        data_checkpoint: Arc<dyn DataCheckpoint>,
        wrs_handler: Arc<dyn WrsHandler>,
    ) -> Self {
        Self {
            ls_id,
            log_handler,
            tablet_svr,
            data_checkpoint,
            wrs_handler,
            run_state: RwLock::new(LsRunState::Running),
        }
    }

    pub fn ls_id(&self) -> LsId {
        self.ls_id
    }

    pub fn log_handler(&self) -> &Arc<dyn LogHandler> {
        &self.log_handler
    }

    pub fn tablet_svr(&self) -> &Arc<dyn TabletService> {
        &self.tablet_svr
    }

    pub fn data_checkpoint(&self) -> &Arc<dyn DataCheckpoint> {
        &self.data_checkpoint
    }

    pub fn wrs_handler(&self) -> &Arc<dyn WrsHandler> {
        &self.wrs_handler
    }

    /// Takes the ls lock in shared mode.
    pub fn lock(&self) -> RwLockReadGuard<'_, LsRunState> {
        self.run_state.read()
    }

    pub fn set_run_state(&self, state: LsRunState) {
        *self.run_state.write() = state;
    }

    /// Must be called with the ls lock held; pass the guarded state.
    pub fn check_state(state: &LsRunState) -> Result<(), FreezeError> {
        match state {
            LsRunState::Running => Ok(()),
            LsRunState::Offline | LsRunState::Stopped => Err(FreezeError::NotRunning),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LogStream, LsId, LsRunState, TabletId};
    use crate::error::FreezeError;
    use crate::ls::local::LocalLogStream;

    #[test]
    fn ids_report_validity() {
        assert!(LsId::new(1001).is_valid());
        assert!(!LsId::INVALID.is_valid());
        assert!(TabletId::new(200_001).is_valid());
        assert!(!TabletId::default().is_valid());
        assert_eq!(TabletId::new(7).to_string(), "7");
    }

    #[test]
    fn check_state_requires_running() {
        let local = LocalLogStream::new(LsId::new(1));
        {
            let guard = local.ls.lock();
            LogStream::check_state(&guard).expect("running");
        }
        local.ls.set_run_state(LsRunState::Offline);
        let guard = local.ls.lock();
        assert_eq!(LogStream::check_state(&guard), Err(FreezeError::NotRunning));
    }
}
