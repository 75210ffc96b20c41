//! System change numbers: the 62-bit logical timestamps used as freeze and
//! flush watermarks.
//!
//! An `Scn` is a single `u64` word. The low 62 bits carry the timestamp in
//! nanoseconds and the high 2 bits carry a format tag that must be zero for
//! every valid value. The all-ones word is the invalid sentinel.

pub mod atomic;
pub mod codec;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

pub use atomic::AtomicScn;

pub const SCN_INVALID_VAL: u64 = u64::MAX;
pub const SCN_MIN_TS_NS: u64 = 0;
pub const SCN_BASE_TS_NS: u64 = 1;
pub const SCN_MAX_TS_NS: u64 = (1u64 << SCN_TS_BITS) - 1;

const SCN_TS_BITS: u32 = 62;
const SCN_TS_MASK: u64 = SCN_MAX_TS_NS;
const SCN_VERSION: u64 = 0;
/// Older writers stored the max watermark as `i64::MAX`.
const LEGACY_MAX_VAL: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ScnError {
    #[error("invalid scn")]
    Invalid,
    #[error("value {value} is outside the scn range")]
    OutOfRange { value: i128 },
    #[error("scn overflow")]
    Overflow,
    #[error("scn underflow")]
    Underflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Scn {
    val: u64,
}

impl Default for Scn {
    fn default() -> Self {
        Self::invalid_scn()
    }
}

impl Scn {
    pub const fn invalid_scn() -> Self {
        Self {
            val: SCN_INVALID_VAL,
        }
    }

    pub const fn min_scn() -> Self {
        Self { val: SCN_MIN_TS_NS }
    }

    pub const fn base_scn() -> Self {
        Self {
            val: SCN_BASE_TS_NS,
        }
    }

    pub const fn max_scn() -> Self {
        Self { val: SCN_MAX_TS_NS }
    }

    /// The 2-bit format tag.
    pub const fn tag(&self) -> u64 {
        self.val >> SCN_TS_BITS
    }

    /// Timestamp in nanoseconds; meaningless for the invalid sentinel.
    pub const fn ts_ns(&self) -> u64 {
        self.val & SCN_TS_MASK
    }

    pub const fn is_valid(&self) -> bool {
        self.tag() == SCN_VERSION
    }

    pub const fn is_valid_and_not_min(&self) -> bool {
        self.is_valid() && self.val != SCN_MIN_TS_NS
    }

    pub const fn is_min(&self) -> bool {
        self.val == SCN_MIN_TS_NS
    }

    pub const fn is_base(&self) -> bool {
        self.val == SCN_BASE_TS_NS
    }

    pub const fn is_max(&self) -> bool {
        self.val == SCN_MAX_TS_NS
    }

    pub fn reset(&mut self) {
        self.set_invalid();
    }

    pub fn set_invalid(&mut self) {
        self.val = SCN_INVALID_VAL;
    }

    pub fn set_min(&mut self) {
        self.val = SCN_MIN_TS_NS;
    }

    pub fn set_base(&mut self) {
        self.val = SCN_BASE_TS_NS;
    }

    pub fn set_max(&mut self) {
        self.val = SCN_MAX_TS_NS;
    }

    /// Larger of two values. An invalid operand is treated as absent; two
    /// invalid operands yield invalid.
    pub fn max(left: Scn, right: Scn) -> Scn {
        match (left.is_valid(), right.is_valid()) {
            (true, true) => {
                if left.val >= right.val {
                    left
                } else {
                    right
                }
            }
            (true, false) => left,
            (false, true) => right,
            (false, false) => Scn::invalid_scn(),
        }
    }

    /// Smaller of two values, with the same invalid handling as [`Scn::max`].
    pub fn min(left: Scn, right: Scn) -> Scn {
        match (left.is_valid(), right.is_valid()) {
            (true, true) => {
                if left.val <= right.val {
                    left
                } else {
                    right
                }
            }
            (true, false) => left,
            (false, true) => right,
            (false, false) => Scn::invalid_scn(),
        }
    }

    /// Fails with `Invalid` on the invalid sentinel and `Overflow` when the
    /// result would pass `max_scn()`.
    pub fn plus(self, delta: u64) -> Result<Scn, ScnError> {
        if !self.is_valid() {
            return Err(ScnError::Invalid);
        }
        match self.val.checked_add(delta) {
            Some(val) if val <= SCN_MAX_TS_NS => Ok(Scn { val }),
            _ => Err(ScnError::Overflow),
        }
    }

    /// Fails with `Invalid` on the invalid sentinel and `Underflow` when the
    /// result would drop below `min_scn()`.
    pub fn minus(self, delta: u64) -> Result<Scn, ScnError> {
        if !self.is_valid() {
            return Err(ScnError::Invalid);
        }
        self.val
            .checked_sub(delta)
            .map(|val| Scn { val })
            .ok_or(ScnError::Underflow)
    }

    pub fn inc(self) -> Result<Scn, ScnError> {
        self.plus(1)
    }

    pub fn dec(self) -> Result<Scn, ScnError> {
        self.minus(1)
    }

    // Conversions into an Scn. Each legacy caller reserves different values,
    // so each gets its own entry point.

    /// From a wall-clock timestamp in microseconds. Fails with `OutOfRange`
    /// when `ts_us * 1000` does not fit below `max_scn()`.
    pub fn from_timestamp_us(ts_us: u64) -> Result<Scn, ScnError> {
        match ts_us.checked_mul(1_000) {
            Some(val) if val <= SCN_MAX_TS_NS => Ok(Scn { val }),
            _ => Err(ScnError::OutOfRange {
                value: i128::from(ts_us),
            }),
        }
    }

    /// From a nanosecond value produced by the global timestamp service.
    /// Negative values and values above `max_scn()` fail with `OutOfRange`.
    pub fn from_gts(time_ns: i64) -> Result<Scn, ScnError> {
        if time_ns < 0 || time_ns as u64 > SCN_MAX_TS_NS {
            return Err(ScnError::OutOfRange {
                value: i128::from(time_ns),
            });
        }
        Ok(Scn {
            val: time_ns as u64,
        })
    }

    /// From an id handed out by the log service allocator. `u64::MAX` is the
    /// log service's "absent" marker and maps to the invalid sentinel; every
    /// other value above `max_scn()` fails with `OutOfRange`.
    pub fn from_logservice(scn_val: u64) -> Result<Scn, ScnError> {
        if scn_val == SCN_INVALID_VAL {
            return Ok(Scn::invalid_scn());
        }
        Self::from_checked_val(scn_val)
    }

    /// From an scn-typed column of an inner table. Values above `max_scn()`,
    /// including `u64::MAX`, fail with `OutOfRange`.
    pub fn from_inner_table_field(column_value: u64) -> Result<Scn, ScnError> {
        Self::from_checked_val(column_value)
    }

    /// From a value produced by SQL expressions. Values above `max_scn()`
    /// fail with `OutOfRange`.
    pub fn from_sql(scn_val: u64) -> Result<Scn, ScnError> {
        Self::from_checked_val(scn_val)
    }

    /// From a signed transaction commit version. `i64::MAX` means "max" in
    /// the transaction layer and maps to `max_scn()`; negative values and
    /// values above `max_scn()` fail with `OutOfRange`.
    pub fn from_tx(commit_trans_version: i64) -> Result<Scn, ScnError> {
        if commit_trans_version == i64::MAX {
            return Ok(Scn::max_scn());
        }
        if commit_trans_version < 0 {
            return Err(ScnError::OutOfRange {
                value: i128::from(commit_trans_version),
            });
        }
        Self::from_checked_val(commit_trans_version as u64)
    }

    fn from_checked_val(val: u64) -> Result<Scn, ScnError> {
        if val > SCN_MAX_TS_NS {
            return Err(ScnError::OutOfRange {
                value: i128::from(val),
            });
        }
        Ok(Scn { val })
    }

    // Conversions out of an Scn.

    /// Timestamp in microseconds (truncating). Fails with `Invalid` on the
    /// invalid sentinel.
    pub fn to_timestamp_us(&self) -> Result<u64, ScnError> {
        if !self.is_valid() {
            return Err(ScnError::Invalid);
        }
        Ok(self.val / 1_000)
    }

    /// Fails with `Invalid` on the invalid sentinel.
    pub fn val_for_gts(&self) -> Result<u64, ScnError> {
        self.checked_val()
    }

    /// Raw word for the log service; the invalid sentinel passes through as
    /// `u64::MAX`.
    pub fn val_for_logservice(&self) -> u64 {
        self.val
    }

    /// Fails with `Invalid` on the invalid sentinel.
    pub fn val_for_inner_table_field(&self) -> Result<u64, ScnError> {
        self.checked_val()
    }

    /// Fails with `Invalid` on the invalid sentinel.
    pub fn val_for_sql(&self) -> Result<u64, ScnError> {
        self.checked_val()
    }

    /// Signed commit version for the transaction layer: `max_scn()` becomes
    /// `i64::MAX`. Fails with `Invalid` on the invalid sentinel.
    pub fn val_for_tx(&self) -> Result<i64, ScnError> {
        if !self.is_valid() {
            return Err(ScnError::Invalid);
        }
        if self.is_max() {
            return Ok(i64::MAX);
        }
        Ok(self.val as i64)
    }

    fn checked_val(&self) -> Result<u64, ScnError> {
        if !self.is_valid() {
            return Err(ScnError::Invalid);
        }
        Ok(self.val)
    }

    pub(crate) const fn raw(&self) -> u64 {
        self.val
    }

    /// Maps a stored word back to an scn, applying the legacy max rule.
    pub(crate) fn from_stored(val: u64) -> Result<Scn, ScnError> {
        if val == SCN_INVALID_VAL {
            return Ok(Scn::invalid_scn());
        }
        if val == LEGACY_MAX_VAL {
            return Ok(Scn::max_scn());
        }
        Self::from_checked_val(val)
    }
}

impl PartialOrd for Scn {
    /// Valid values are totally ordered. The invalid sentinel only compares
    /// equal to itself and is unordered against every valid value.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.is_valid(), other.is_valid()) {
            (true, true) => Some(self.val.cmp(&other.val)),
            (false, false) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl TryFrom<u64> for Scn {
    type Error = ScnError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Scn::from_stored(value)
    }
}

impl From<Scn> for u64 {
    fn from(value: Scn) -> Self {
        value.val
    }
}

impl std::fmt::Display for Scn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.val)
        } else {
            f.write_str("invalid")
        }
    }
}
