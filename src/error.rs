use crate::ls::TabletId;
use crate::scn::ScnError;
use crate::scn::codec::CodecError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FreezeErrorCode {
    NotInitialized,
    InitTwice,
    InvalidArgument,
    InvalidState,
    InvalidConfig,
    Offline,
    NotRunning,
    Timeout,
    RoleMismatch,
    AlreadyFreezing,
    TabletNotExist,
    Unavailable,
    Scn,
    Codec,
}

impl FreezeErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FreezeErrorCode::NotInitialized => "not_initialized",
            FreezeErrorCode::InitTwice => "init_twice",
            FreezeErrorCode::InvalidArgument => "invalid_argument",
            FreezeErrorCode::InvalidState => "invalid_state",
            FreezeErrorCode::InvalidConfig => "invalid_config",
            FreezeErrorCode::Offline => "offline",
            FreezeErrorCode::NotRunning => "not_running",
            FreezeErrorCode::Timeout => "timeout",
            FreezeErrorCode::RoleMismatch => "role_mismatch",
            FreezeErrorCode::AlreadyFreezing => "already_freezing",
            FreezeErrorCode::TabletNotExist => "tablet_not_exist",
            FreezeErrorCode::Unavailable => "unavailable",
            FreezeErrorCode::Scn => "scn",
            FreezeErrorCode::Codec => "codec",
        }
    }
}

impl std::fmt::Display for FreezeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FreezeError {
    #[error("freezer not initialized")]
    NotInitialized,
    #[error("freezer initialized twice")]
    InitTwice,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("freezer is offline")]
    Offline,
    #[error("log stream is not running")]
    NotRunning,
    #[error("timeout")]
    Timeout,
    #[error("role mismatch")]
    RoleMismatch,
    #[error("already freezing")]
    AlreadyFreezing,
    #[error("tablet {0} does not exist")]
    TabletNotExist(TabletId),
    #[error("resource unavailable: {message}")]
    Unavailable { message: String },
    #[error("scn error: {0}")]
    Scn(#[from] ScnError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl FreezeError {
    pub fn code(&self) -> FreezeErrorCode {
        match self {
            FreezeError::NotInitialized => FreezeErrorCode::NotInitialized,
            FreezeError::InitTwice => FreezeErrorCode::InitTwice,
            FreezeError::InvalidArgument(_) => FreezeErrorCode::InvalidArgument,
            FreezeError::InvalidState(_) => FreezeErrorCode::InvalidState,
            FreezeError::InvalidConfig { .. } => FreezeErrorCode::InvalidConfig,
            FreezeError::Offline => FreezeErrorCode::Offline,
            FreezeError::NotRunning => FreezeErrorCode::NotRunning,
            FreezeError::Timeout => FreezeErrorCode::Timeout,
            FreezeError::RoleMismatch => FreezeErrorCode::RoleMismatch,
            FreezeError::AlreadyFreezing => FreezeErrorCode::AlreadyFreezing,
            FreezeError::TabletNotExist(_) => FreezeErrorCode::TabletNotExist,
            FreezeError::Unavailable { .. } => FreezeErrorCode::Unavailable,
            FreezeError::Scn(_) => FreezeErrorCode::Scn,
            FreezeError::Codec(_) => FreezeErrorCode::Codec,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True when the same request may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FreezeError::Timeout | FreezeError::AlreadyFreezing | FreezeError::Unavailable { .. }
        )
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        FreezeError::Unavailable {
            message: message.into(),
        }
    }
}
