use crate::scn::Scn;
use serde::{Deserialize, Serialize};

/// Phase of a freeze, tracked per coordinator and per sealed memtable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum FreezeState {
    #[default]
    Invalid = 0,
    FlagNotSet = 1,
    LogNotSubmitted = 2,
    WaitingReadyForFlush = 3,
    Finished = 4,
}

impl FreezeState {
    pub fn as_str(self) -> &'static str {
        match self {
            FreezeState::Invalid => "INVALID",
            FreezeState::FlagNotSet => "FLAG_NOT_SET",
            FreezeState::LogNotSubmitted => "LOG_NOT_SUBMITTED",
            FreezeState::WaitingReadyForFlush => "WAITING_READY_FOR_FLUSH",
            FreezeState::Finished => "FINISHED",
        }
    }

    pub(crate) fn from_u8(val: u8) -> FreezeState {
        match val {
            1 => FreezeState::FlagNotSet,
            2 => FreezeState::LogNotSubmitted,
            3 => FreezeState::WaitingReadyForFlush,
            4 => FreezeState::Finished,
            _ => FreezeState::Invalid,
        }
    }

    /// Forward transitions of the freeze machine. Any state may fall back to
    /// `Invalid` through undo, and re-entering the current state is allowed.
    pub fn can_transition_to(self, next: FreezeState) -> bool {
        use FreezeState::*;
        self == next
            || matches!(
                (self, next),
                (_, Invalid)
                    | (Invalid, FlagNotSet)
                    | (Invalid, LogNotSubmitted)
                    | (FlagNotSet, LogNotSubmitted)
                    | (LogNotSubmitted, WaitingReadyForFlush)
                    | (WaitingReadyForFlush, Finished)
                    | (Finished, FlagNotSet)
                    | (Finished, LogNotSubmitted)
            )
    }
}

impl std::fmt::Display for FreezeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a successful freeze request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeOutcome {
    /// Every sealed memtable reached ready-for-flush.
    Finished,
    /// The target was already sealed by the freeze generation in progress.
    AlreadyCovered,
    /// The tablet had nothing to seal.
    NoActiveMemtable,
    /// `resume_pending_freeze` found nothing to resume.
    NoPendingFreeze,
}

/// Watermarks captured when a freeze generation starts. Readers always get
/// the three values from the same generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FreezeWatermarks {
    pub clock: u32,
    pub freeze_snapshot_version: Scn,
    pub max_decided_scn: Scn,
}
