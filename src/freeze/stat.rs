//! Freeze diagnostics. Nothing here feeds back into freeze decisions; the
//! recorder only keeps the latest picture for operators.

use super::state::FreezeState;
use crate::error::{FreezeError, FreezeErrorCode};
use crate::ls::TabletId;
use crate::scn::Scn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Snapshot of one sealed memtable that has not reached ready-for-flush.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrozenMemtableInfo {
    pub tablet_id: TabletId,
    pub start_scn: Scn,
    pub end_scn: Scn,
    pub write_ref_cnt: i64,
    pub unsubmitted_cnt: i64,
    pub unsynced_cnt: i64,
    pub current_right_boundary: Scn,
}

impl FrozenMemtableInfo {
    pub fn new(
        tablet_id: TabletId,
        start_scn: Scn,
        end_scn: Scn,
        write_ref_cnt: i64,
        unsubmitted_cnt: i64,
        unsynced_cnt: i64,
        current_right_boundary: Scn,
    ) -> Self {
        Self {
            tablet_id,
            start_scn,
            end_scn,
            write_ref_cnt,
            unsubmitted_cnt,
            unsynced_cnt,
            current_right_boundary,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set(&mut self, other: &FrozenMemtableInfo) {
        self.clone_from(other);
    }

    pub fn is_valid(&self) -> bool {
        self.tablet_id.is_valid() && self.start_scn.is_valid()
    }
}

#[derive(Debug, Clone, Default)]
struct StatSummary {
    tablet_id: TabletId,
    is_force: bool,
    state: FreezeState,
    start_time_micros: u64,
    end_time_micros: u64,
    ret_code: Option<FreezeErrorCode>,
}

/// Point-in-time copy of a [`FreezerStat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezerStatSnapshot {
    pub tablet_id: TabletId,
    pub is_force: bool,
    pub state: FreezeState,
    pub start_time_micros: u64,
    pub end_time_micros: u64,
    pub ret_code: Option<FreezeErrorCode>,
    pub diagnose_info: String,
    pub memtables_info: Vec<FrozenMemtableInfo>,
}

impl FreezerStatSnapshot {
    pub fn to_json(&self) -> Result<String, FreezeError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FreezeError::InvalidState(format!("stat json encode failed: {e}")))
    }

    pub fn encode(&self) -> Result<Vec<u8>, FreezeError> {
        rmp_serde::to_vec_named(self)
            .map_err(|e| FreezeError::InvalidState(format!("stat encode failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FreezeError> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| FreezeError::InvalidArgument(format!("stat decode failed: {e}")))
    }
}

/// Recorder for the most recent freeze. The summary, the memtable list and
/// the diagnosis text each sit behind their own lock.
#[derive(Debug)]
pub struct FreezerStat {
    summary: Mutex<StatSummary>,
    memtables_info: Mutex<Vec<FrozenMemtableInfo>>,
    diagnose_info: Mutex<String>,
    memtable_info_limit: usize,
    diagnose_info_limit: usize,
}

impl FreezerStat {
    pub fn new(memtable_info_limit: usize, diagnose_info_limit: usize) -> Self {
        Self {
            summary: Mutex::new(StatSummary::default()),
            memtables_info: Mutex::new(Vec::new()),
            diagnose_info: Mutex::new(String::new()),
            memtable_info_limit,
            diagnose_info_limit,
        }
    }

    /// Starts recording a new freeze, dropping whatever the previous one left.
    pub fn begin(&self, tablet_id: TabletId, is_force: bool) {
        {
            let mut summary = self.summary.lock();
            *summary = StatSummary {
                tablet_id,
                is_force,
                state: FreezeState::FlagNotSet,
                start_time_micros: now_micros(),
                end_time_micros: 0,
                ret_code: None,
            };
        }
        self.memtables_info.lock().clear();
        self.diagnose_info.lock().clear();
    }

    pub fn set_state(&self, state: FreezeState) {
        self.summary.lock().state = state;
    }

    pub fn state(&self) -> FreezeState {
        self.summary.lock().state
    }

    pub fn end(&self, result: Result<(), &FreezeError>) {
        let mut summary = self.summary.lock();
        summary.end_time_micros = now_micros();
        match result {
            Ok(()) => {
                summary.state = FreezeState::Finished;
                summary.ret_code = None;
            }
            Err(err) => summary.ret_code = Some(err.code()),
        }
    }

    /// Inserts or refreshes the entry for `info.tablet_id`. New tablets beyond
    /// the limit are dropped.
    pub fn add_memtable_info(&self, info: FrozenMemtableInfo) {
        let mut infos = self.memtables_info.lock();
        if let Some(existing) = infos.iter_mut().find(|i| i.tablet_id == info.tablet_id) {
            existing.set(&info);
        } else if infos.len() < self.memtable_info_limit {
            infos.push(info);
        }
    }

    pub fn remove_memtable_info(&self, tablet_id: TabletId) {
        self.memtables_info.lock().retain(|i| i.tablet_id != tablet_id);
    }

    pub fn get_memtables_info(&self) -> Vec<FrozenMemtableInfo> {
        self.memtables_info.lock().clone()
    }

    /// Appends `info`, separated by "; ", up to the configured byte cap.
    pub fn add_diagnose_info(&self, info: &str) {
        let mut text = self.diagnose_info.lock();
        let sep = if text.is_empty() { "" } else { "; " };
        let room = self.diagnose_info_limit.saturating_sub(text.len());
        if room <= sep.len() {
            return;
        }
        text.push_str(sep);
        let room = room - sep.len();
        let mut cut = info.len().min(room);
        while !info.is_char_boundary(cut) {
            cut -= 1;
        }
        text.push_str(&info[..cut]);
    }

    pub fn get_diagnose_info(&self) -> String {
        self.diagnose_info.lock().clone()
    }

    pub fn snapshot(&self) -> FreezerStatSnapshot {
        let summary = self.summary.lock().clone();
        FreezerStatSnapshot {
            tablet_id: summary.tablet_id,
            is_force: summary.is_force,
            state: summary.state,
            start_time_micros: summary.start_time_micros,
            end_time_micros: summary.end_time_micros,
            ret_code: summary.ret_code,
            diagnose_info: self.get_diagnose_info(),
            memtables_info: self.get_memtables_info(),
        }
    }

    pub fn reset(&self) {
        *self.summary.lock() = StatSummary::default();
        self.memtables_info.lock().clear();
        self.diagnose_info.lock().clear();
    }

    /// True once a freeze has been recorded since the last reset.
    pub fn is_valid(&self) -> bool {
        self.summary.lock().start_time_micros > 0
    }
}

#[cfg(test)]
mod tests {
    use super::{FreezerStat, FreezerStatSnapshot, FrozenMemtableInfo};
    use crate::error::{FreezeError, FreezeErrorCode};
    use crate::freeze::state::FreezeState;
    use crate::ls::TabletId;
    use crate::scn::Scn;

    fn info(tablet: u64, write_ref: i64) -> FrozenMemtableInfo {
        FrozenMemtableInfo::new(
            TabletId::new(tablet),
            Scn::base_scn(),
            Scn::invalid_scn(),
            write_ref,
            0,
            0,
            Scn::min_scn(),
        )
    }

    #[test]
    fn memtable_info_upserts_and_respects_limit() {
        let stat = FreezerStat::new(2, 128);
        stat.add_memtable_info(info(1, 3));
        stat.add_memtable_info(info(2, 1));
        stat.add_memtable_info(info(3, 1));
        assert_eq!(stat.get_memtables_info().len(), 2);

        stat.add_memtable_info(info(1, 0));
        let infos = stat.get_memtables_info();
        assert_eq!(infos[0].write_ref_cnt, 0);

        stat.remove_memtable_info(TabletId::new(1));
        let infos = stat.get_memtables_info();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].tablet_id, TabletId::new(2));
    }

    #[test]
    fn diagnose_info_is_capped_at_char_boundary() {
        let stat = FreezerStat::new(4, 12);
        stat.add_diagnose_info("stalled");
        stat.add_diagnose_info("héllo world");
        let text = stat.get_diagnose_info();
        assert!(text.len() <= 12);
        assert!(text.starts_with("stalled; h"));
        stat.add_diagnose_info("more");
        assert_eq!(stat.get_diagnose_info(), text);
    }

    #[test]
    fn begin_end_and_snapshot() {
        let stat = FreezerStat::new(4, 128);
        assert!(!stat.is_valid());
        stat.begin(TabletId::new(9), true);
        stat.add_memtable_info(info(9, 1));
        stat.add_diagnose_info("waiting");
        stat.set_state(FreezeState::WaitingReadyForFlush);
        stat.end(Err(&FreezeError::Timeout));

        let snap = stat.snapshot();
        assert!(stat.is_valid());
        assert!(snap.is_force);
        assert_eq!(snap.state, FreezeState::WaitingReadyForFlush);
        assert_eq!(snap.ret_code, Some(FreezeErrorCode::Timeout));
        assert_eq!(snap.memtables_info.len(), 1);
        assert!(snap.end_time_micros >= snap.start_time_micros);

        let json = snap.to_json().expect("json");
        assert!(json.contains("\"diagnose_info\": \"waiting\""));
        let decoded = FreezerStatSnapshot::decode(&snap.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, snap);

        stat.begin(TabletId::INVALID, false);
        assert!(stat.get_memtables_info().is_empty());
        assert!(stat.get_diagnose_info().is_empty());
        stat.end(Ok(()));
        assert_eq!(stat.state(), FreezeState::Finished);

        stat.reset();
        assert!(!stat.is_valid());
    }

    #[test]
    fn info_reset_and_validity() {
        let mut entry = info(5, 2);
        assert!(entry.is_valid());
        entry.reset();
        assert!(!entry.is_valid());
        entry.set(&info(6, 1));
        assert_eq!(entry.tablet_id, TabletId::new(6));
    }
}
