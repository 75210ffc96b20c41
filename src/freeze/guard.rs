//! Scoped guards held by a freeze. Each one releases what it took in `Drop`,
//! so early returns and cancelled futures cannot leak a pending replay or a
//! priority slot.

use crate::error::FreezeError;
use crate::ls::{LogHandler, LsId, Role};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

/// Pends replay submission on a follower for the lifetime of the guard.
pub struct ReplayPendingGuard {
    log_handler: Arc<dyn LogHandler>,
    ls_id: LsId,
    is_follower: bool,
}

impl ReplayPendingGuard {
    /// Never fails: role and pend errors are logged and the freeze goes on.
    pub fn new(log_handler: Arc<dyn LogHandler>, ls_id: LsId) -> Self {
        let is_follower = match log_handler.role() {
            Ok((role, _)) => role == Role::Follower,
            Err(err) => {
                warn!(ls_id = %ls_id, error = %err, "freeze: get role failed, replay not pended");
                false
            }
        };
        if is_follower && let Err(err) = log_handler.pend_submit_replay_log() {
            error!(ls_id = %ls_id, error = %err, "freeze: pend replay submission failed");
        }
        Self {
            log_handler,
            ls_id,
            is_follower,
        }
    }

    pub fn is_follower(&self) -> bool {
        self.is_follower
    }
}

impl Drop for ReplayPendingGuard {
    fn drop(&mut self) {
        if !self.is_follower {
            return;
        }
        if let Err(err) = self.log_handler.restore_submit_replay_log() {
            error!(ls_id = %self.ls_id, error = %err, "freeze: restore replay submission failed");
        }
    }
}

/// High-priority slot of a whole-partition freeze.
#[derive(Debug)]
pub struct LsFreezeGuard<'a> {
    high_priority_cnt: &'a AtomicI64,
}

impl<'a> LsFreezeGuard<'a> {
    /// Announces the freeze, then waits for tablet freezes already inside
    /// their decision window to leave it.
    pub async fn enter(
        high_priority_cnt: &'a AtomicI64,
        low_priority_cnt: &'a AtomicI64,
        max_wait: Duration,
        retry_interval: Duration,
    ) -> Result<LsFreezeGuard<'a>, FreezeError> {
        high_priority_cnt.fetch_add(1, Ordering::AcqRel);
        let guard = LsFreezeGuard { high_priority_cnt };
        let deadline = Instant::now() + max_wait;
        while low_priority_cnt.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                warn!(
                    low_priority_cnt = low_priority_cnt.load(Ordering::Acquire),
                    "freeze: tablet freezes did not leave in time"
                );
                return Err(FreezeError::AlreadyFreezing);
            }
            tokio::time::sleep(retry_interval).await;
        }
        Ok(guard)
    }
}

impl Drop for LsFreezeGuard<'_> {
    fn drop(&mut self) {
        self.high_priority_cnt.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Low-priority slot of a tablet freeze.
#[derive(Debug)]
pub struct TabletFreezeGuard<'a> {
    low_priority_cnt: &'a AtomicI64,
    need_release: bool,
}

impl<'a> TabletFreezeGuard<'a> {
    /// Refuses with `AlreadyFreezing` while a whole-partition freeze is
    /// announced.
    pub fn try_enter(
        high_priority_cnt: &AtomicI64,
        low_priority_cnt: &'a AtomicI64,
    ) -> Result<TabletFreezeGuard<'a>, FreezeError> {
        if high_priority_cnt.load(Ordering::Acquire) > 0 {
            return Err(FreezeError::AlreadyFreezing);
        }
        low_priority_cnt.fetch_add(1, Ordering::AcqRel);
        let guard = TabletFreezeGuard {
            low_priority_cnt,
            need_release: true,
        };
        if high_priority_cnt.load(Ordering::Acquire) > 0 {
            return Err(FreezeError::AlreadyFreezing);
        }
        Ok(guard)
    }

    /// Retries [`TabletFreezeGuard::try_enter`] until the whole-partition
    /// freezes are gone, failing with `Timeout` after `max_wait`.
    pub async fn enter(
        high_priority_cnt: &AtomicI64,
        low_priority_cnt: &'a AtomicI64,
        max_wait: Duration,
        retry_interval: Duration,
    ) -> Result<TabletFreezeGuard<'a>, FreezeError> {
        let deadline = Instant::now() + max_wait;
        loop {
            match Self::try_enter(high_priority_cnt, low_priority_cnt) {
                Ok(guard) => return Ok(guard),
                Err(FreezeError::AlreadyFreezing) if Instant::now() < deadline => {
                    tokio::time::sleep(retry_interval).await;
                }
                Err(FreezeError::AlreadyFreezing) => return Err(FreezeError::Timeout),
                Err(err) => return Err(err),
            }
        }
    }

    /// Leaves the decision window before the guard goes out of scope.
    pub fn release(&mut self) {
        if self.need_release {
            self.need_release = false;
            self.low_priority_cnt.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for TabletFreezeGuard<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::{LsFreezeGuard, ReplayPendingGuard, TabletFreezeGuard};
    use crate::error::FreezeError;
    use crate::ls::local::LocalLogHandler;
    use crate::ls::{LsId, Role};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    #[test]
    fn replay_guard_pends_only_on_followers() {
        let handler = Arc::new(LocalLogHandler::default());
        {
            let guard = ReplayPendingGuard::new(handler.clone(), LsId::new(1));
            assert!(!guard.is_follower());
        }
        assert_eq!((handler.pend_count(), handler.restore_count()), (0, 0));

        handler.set_role(Role::Follower, 3);
        {
            let _guard = ReplayPendingGuard::new(handler.clone(), LsId::new(1));
            assert!(handler.is_replay_pending());
        }
        assert!(!handler.is_replay_pending());
        assert_eq!((handler.pend_count(), handler.restore_count()), (1, 1));
    }

    #[test]
    fn replay_guard_restores_even_when_pend_failed() {
        let handler = Arc::new(LocalLogHandler::default());
        handler.set_role(Role::Follower, 3);
        handler.fail_pend(Some(FreezeError::unavailable("replay service busy")));
        drop(ReplayPendingGuard::new(handler.clone(), LsId::new(1)));
        assert_eq!((handler.pend_count(), handler.restore_count()), (1, 1));

        handler.fail_role(Some(FreezeError::RoleMismatch));
        drop(ReplayPendingGuard::new(handler.clone(), LsId::new(1)));
        assert_eq!((handler.pend_count(), handler.restore_count()), (1, 1));
    }

    #[test]
    fn tablet_guard_backs_off_when_ls_freeze_is_announced() {
        let high = AtomicI64::new(0);
        let low = AtomicI64::new(0);
        {
            let mut guard = TabletFreezeGuard::try_enter(&high, &low).expect("enter");
            assert_eq!(low.load(Ordering::Acquire), 1);
            guard.release();
            assert_eq!(low.load(Ordering::Acquire), 0);
        }
        assert_eq!(low.load(Ordering::Acquire), 0);

        high.store(1, Ordering::Release);
        assert_eq!(
            TabletFreezeGuard::try_enter(&high, &low).map(|_| ()),
            Err(FreezeError::AlreadyFreezing)
        );
        assert_eq!(low.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn ls_guard_waits_for_low_priority_to_drain() {
        let high = AtomicI64::new(0);
        let low = AtomicI64::new(1);
        let err = LsFreezeGuard::enter(&high, &low, Duration::from_millis(5), Duration::from_millis(1))
            .await
            .map(|_| ())
            .expect_err("low priority still inside");
        assert_eq!(err, FreezeError::AlreadyFreezing);
        assert_eq!(high.load(Ordering::Acquire), 0);

        low.store(0, Ordering::Release);
        let guard = LsFreezeGuard::enter(&high, &low, Duration::from_millis(5), Duration::from_millis(1))
            .await
            .expect("enter");
        assert_eq!(high.load(Ordering::Acquire), 1);
        drop(guard);
        assert_eq!(high.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn forced_tablet_guard_times_out_behind_ls_freeze() {
        let high = AtomicI64::new(1);
        let low = AtomicI64::new(0);
        let err = TabletFreezeGuard::enter(&high, &low, Duration::from_millis(5), Duration::from_millis(1))
            .await
            .map(|_| ())
            .expect_err("ls freeze still announced");
        assert_eq!(err, FreezeError::Timeout);
        assert_eq!(low.load(Ordering::Acquire), 0);
    }
}
