//! Memtable freeze coordination for a replicated log stream.
//!
//! [`Freezer`] seals the write buffers of one log stream, or of one tablet in
//! it, under a generation of its freeze clock and waits until the sealed
//! buffers can be flushed. [`Scn`] is the logical timestamp used for every
//! watermark along the way.

pub mod config;
pub mod error;
pub mod freeze;
pub mod ls;
pub mod memtable;
pub mod scn;
pub mod sync_bridge;

pub use config::FreezerConfig;
pub use error::{FreezeError, FreezeErrorCode};
pub use freeze::Freezer;
pub use freeze::stat::{FreezerStat, FreezerStatSnapshot, FrozenMemtableInfo};
pub use freeze::state::{FreezeOutcome, FreezeState, FreezeWatermarks};
pub use ls::{LogStream, LsId, LsRunState, Role, TabletId};
pub use memtable::{Memtable, MemtableKey, WriteRef};
pub use scn::codec::CodecError;
pub use scn::{AtomicScn, Scn, ScnError};
pub use sync_bridge::FreezerSync;
