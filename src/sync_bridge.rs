use crate::error::FreezeError;
use crate::freeze::Freezer;
use crate::freeze::state::FreezeOutcome;
use crate::ls::TabletId;
use crate::memtable::Memtable;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Runs `f` to completion on `rt` from synchronous code.
///
/// # Panics
///
/// Panics when called from a task of a current-thread runtime. Such a
/// runtime has no other worker to drive `f` while the caller blocks.
pub fn block_on_freeze<F, T>(rt: &Handle, f: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            panic!(
                "freeze: blocking freeze call from a current-thread runtime; await the Freezer directly"
            )
        }
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

/// Blocking facade over [`Freezer`] for callers outside the async runtime.
/// Each call returns once the freeze finished, timed out, or failed.
///
/// Calls may also come from a multi-thread runtime worker; the worker is
/// handed off with `block_in_place`. From a current-thread runtime every
/// call panics, see [`block_on_freeze`].
pub struct FreezerSync {
    inner: Arc<Freezer>,
    rt: Handle,
}

impl FreezerSync {
    pub fn new(inner: Arc<Freezer>, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn freezer(&self) -> &Arc<Freezer> {
        &self.inner
    }

    pub fn logstream_freeze(&self, is_tenant_freeze: bool) -> Result<FreezeOutcome, FreezeError> {
        block_on_freeze(&self.rt, self.inner.logstream_freeze(is_tenant_freeze))
    }

    pub fn tablet_freeze(&self, tablet_id: TabletId) -> Result<FreezeOutcome, FreezeError> {
        block_on_freeze(&self.rt, self.inner.tablet_freeze(tablet_id))
    }

    pub fn force_tablet_freeze(&self, tablet_id: TabletId) -> Result<FreezeOutcome, FreezeError> {
        block_on_freeze(&self.rt, self.inner.force_tablet_freeze(tablet_id))
    }

    pub fn tablet_freeze_for_replace_tablet_meta(
        &self,
        tablet_id: TabletId,
    ) -> Result<Option<Arc<Memtable>>, FreezeError> {
        block_on_freeze(
            &self.rt,
            self.inner.tablet_freeze_for_replace_tablet_meta(tablet_id),
        )
    }

    pub fn handle_frozen_memtable_for_replace_tablet_meta(
        &self,
        tablet_id: TabletId,
        memtable: Arc<Memtable>,
    ) -> Result<(), FreezeError> {
        block_on_freeze(
            &self.rt,
            self.inner
                .handle_frozen_memtable_for_replace_tablet_meta(tablet_id, memtable),
        )
    }

    pub fn resume_pending_freeze(&self) -> Result<FreezeOutcome, FreezeError> {
        block_on_freeze(&self.rt, self.inner.resume_pending_freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::FreezerSync;
    use crate::config::FreezerConfig;
    use crate::freeze::Freezer;
    use crate::freeze::state::FreezeOutcome;
    use crate::ls::local::LocalLogStream;
    use crate::ls::{LsId, TabletId};
    use crate::scn::Scn;
    use std::sync::Arc;
    use tokio::runtime::Runtime;

    #[test]
    fn sync_bridge_drives_a_forced_tablet_freeze() {
        let rt = Runtime::new().expect("runtime");
        let local = LocalLogStream::new(LsId::new(1001));
        let tablet = TabletId::new(200_001);
        local
            .tablet_svr
            .create_tablet(tablet, Scn::base_scn())
            .expect("tablet");
        let freezer = Arc::new(Freezer::new(FreezerConfig::development()).expect("freezer"));
        freezer.init(Arc::clone(&local.ls)).expect("init");
        let sync = FreezerSync::new(Arc::clone(&freezer), rt.handle().clone());

        assert_eq!(sync.tablet_freeze(tablet), Ok(FreezeOutcome::NoActiveMemtable));
        assert_eq!(sync.force_tablet_freeze(tablet), Ok(FreezeOutcome::Finished));
        assert_eq!(local.data_checkpoint.ready_for_flush().len(), 1);
        assert_eq!(freezer.get_empty_memtable_cnt(), 1);
        assert_eq!(sync.logstream_freeze(false), Ok(FreezeOutcome::Finished));
        assert!(sync.freezer().is_ready_for_flush());
        assert_eq!(sync.resume_pending_freeze(), Ok(FreezeOutcome::NoPendingFreeze));
    }

    fn bridge_on(rt: &tokio::runtime::Handle) -> (LocalLogStream, FreezerSync) {
        let local = LocalLogStream::new(LsId::new(1002));
        local
            .tablet_svr
            .create_tablet(TabletId::new(1), Scn::base_scn())
            .expect("tablet");
        let freezer = Arc::new(Freezer::new(FreezerConfig::development()).expect("freezer"));
        freezer.init(Arc::clone(&local.ls)).expect("init");
        (local, FreezerSync::new(freezer, rt.clone()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sync_bridge_runs_inside_a_multi_thread_worker() {
        let (local, sync) = bridge_on(&tokio::runtime::Handle::current());
        local
            .tablet_svr
            .memtable_for_write(TabletId::new(1))
            .expect("memtable");
        assert_eq!(sync.logstream_freeze(false), Ok(FreezeOutcome::Finished));
        assert_eq!(local.data_checkpoint.ready_for_flush().len(), 1);
    }

    #[test]
    #[should_panic(expected = "current-thread runtime")]
    fn sync_bridge_refuses_a_current_thread_runtime() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let (_local, sync) = bridge_on(rt.handle());
        rt.block_on(async move {
            let _ = sync.logstream_freeze(false);
        });
    }
}
