//! Byte encodings of [`Scn`]. Both formats appear in persisted checkpoint
//! records and inter-node messages, so their layout must never change.
//!
//! * fixed: 8 bytes, big-endian raw word
//! * variable: unsigned LEB128, 1 to 10 bytes

use super::{Scn, ScnError};
use thiserror::Error;

pub const FIXED_ENCODED_LEN: usize = 8;
pub const MAX_VAR_ENCODED_LEN: usize = 10;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer too small: need {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("truncated scn encoding")]
    Truncation,
    #[error("corrupt scn encoding")]
    Corruption,
}

impl From<ScnError> for CodecError {
    fn from(_: ScnError) -> Self {
        CodecError::Corruption
    }
}

impl Scn {
    pub const fn fixed_encoded_len(&self) -> usize {
        FIXED_ENCODED_LEN
    }

    /// Writes the fixed-width form at `buf[*pos..]` and advances `pos`.
    pub fn encode_fixed(&self, buf: &mut [u8], pos: &mut usize) -> Result<(), CodecError> {
        let available = buf.len().saturating_sub(*pos);
        if available < FIXED_ENCODED_LEN {
            return Err(CodecError::BufferTooSmall {
                needed: FIXED_ENCODED_LEN,
                available,
            });
        }
        buf[*pos..*pos + FIXED_ENCODED_LEN].copy_from_slice(&self.raw().to_be_bytes());
        *pos += FIXED_ENCODED_LEN;
        Ok(())
    }

    pub fn decode_fixed(buf: &[u8], pos: &mut usize) -> Result<Scn, CodecError> {
        let end = pos
            .checked_add(FIXED_ENCODED_LEN)
            .ok_or(CodecError::Truncation)?;
        let bytes: [u8; FIXED_ENCODED_LEN] = buf
            .get(*pos..end)
            .ok_or(CodecError::Truncation)?
            .try_into()
            .map_err(|_| CodecError::Truncation)?;
        let scn = Scn::from_stored(u64::from_be_bytes(bytes))?;
        *pos = end;
        Ok(scn)
    }

    pub fn var_encoded_len(&self) -> usize {
        let bits = 64 - self.raw().leading_zeros() as usize;
        bits.div_ceil(7).max(1)
    }

    /// Length of the variable-width form.
    pub fn serialized_size(&self) -> usize {
        self.var_encoded_len()
    }

    /// Writes the variable-width form at `buf[*pos..]` and advances `pos`.
    pub fn encode_var(&self, buf: &mut [u8], pos: &mut usize) -> Result<(), CodecError> {
        let needed = self.var_encoded_len();
        let available = buf.len().saturating_sub(*pos);
        if available < needed {
            return Err(CodecError::BufferTooSmall { needed, available });
        }
        let mut at = *pos;
        write_leb128(self.raw(), |byte| {
            buf[at] = byte;
            at += 1;
        });
        *pos = at;
        Ok(())
    }

    pub fn decode_var(buf: &[u8], pos: &mut usize) -> Result<Scn, CodecError> {
        let mut val = 0u64;
        let mut at = *pos;
        for i in 0..MAX_VAR_ENCODED_LEN {
            let byte = *buf.get(at).ok_or(CodecError::Truncation)?;
            at += 1;
            let chunk = u64::from(byte & 0x7f);
            // The tenth byte may only carry the top bit of the word.
            if i == MAX_VAR_ENCODED_LEN - 1 && chunk > 1 {
                return Err(CodecError::Corruption);
            }
            val |= chunk << (7 * i);
            if byte & 0x80 == 0 {
                let scn = Scn::from_stored(val)?;
                *pos = at;
                return Ok(scn);
            }
        }
        Err(CodecError::Corruption)
    }

    pub fn to_fixed_bytes(&self) -> [u8; FIXED_ENCODED_LEN] {
        self.raw().to_be_bytes()
    }

    pub fn to_var_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.var_encoded_len());
        write_leb128(self.raw(), |byte| out.push(byte));
        out
    }
}

/// Emits `val` as LEB128, low group first.
fn write_leb128(mut val: u64, mut put: impl FnMut(u8)) {
    loop {
        let byte = (val & 0x7f) as u8;
        val >>= 7;
        if val == 0 {
            put(byte);
            return;
        }
        put(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::{CodecError, FIXED_ENCODED_LEN, MAX_VAR_ENCODED_LEN};
    use crate::scn::{SCN_MAX_TS_NS, Scn};
    use proptest::prelude::*;

    fn arb_scn() -> impl Strategy<Value = Scn> {
        prop_oneof![
            Just(Scn::min_scn()),
            Just(Scn::base_scn()),
            Just(Scn::max_scn()),
            Just(Scn::invalid_scn()),
            (0..=SCN_MAX_TS_NS).prop_map(|v| Scn::from_sql(v).expect("in range")),
        ]
    }

    proptest! {
        #[test]
        fn fixed_roundtrip(scn in arb_scn()) {
            let mut buf = [0u8; 16];
            let mut pos = 3;
            scn.encode_fixed(&mut buf, &mut pos).expect("encode");
            prop_assert_eq!(pos, 3 + FIXED_ENCODED_LEN);
            let mut read = 3;
            prop_assert_eq!(Scn::decode_fixed(&buf, &mut read).expect("decode"), scn);
            prop_assert_eq!(read, pos);
        }

        #[test]
        fn var_roundtrip(scn in arb_scn()) {
            let bytes = scn.to_var_bytes();
            prop_assert_eq!(bytes.len(), scn.var_encoded_len());
            let mut pos = 0;
            prop_assert_eq!(Scn::decode_var(&bytes, &mut pos).expect("decode"), scn);
            prop_assert_eq!(pos, bytes.len());
        }
    }

    #[test]
    fn fixed_layout_is_big_endian() {
        let scn = Scn::from_sql(0x0102_0304).expect("scn");
        assert_eq!(scn.to_fixed_bytes(), [0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(Scn::invalid_scn().to_fixed_bytes(), [0xff; 8]);
    }

    #[test]
    fn var_layout_is_leb128() {
        assert_eq!(Scn::min_scn().to_var_bytes(), vec![0x00]);
        assert_eq!(Scn::base_scn().to_var_bytes(), vec![0x01]);
        assert_eq!(Scn::from_sql(300).expect("300").to_var_bytes(), vec![0xac, 0x02]);
        assert_eq!(Scn::max_scn().var_encoded_len(), 9);
        assert_eq!(Scn::invalid_scn().var_encoded_len(), MAX_VAR_ENCODED_LEN);
    }

    #[test]
    fn var_bytes_match_encode_var_at_an_offset() {
        for scn in [
            Scn::min_scn(),
            Scn::base_scn(),
            Scn::from_sql(127).expect("127"),
            Scn::from_sql(128).expect("128"),
            Scn::from_sql(SCN_MAX_TS_NS).expect("max ts"),
            Scn::max_scn(),
            Scn::invalid_scn(),
        ] {
            let bytes = scn.to_var_bytes();
            assert_eq!(bytes.len(), scn.var_encoded_len());
            let mut buf = [0xeeu8; 2 + MAX_VAR_ENCODED_LEN];
            let mut pos = 2;
            scn.encode_var(&mut buf, &mut pos).expect("encode");
            assert_eq!(&buf[2..pos], bytes.as_slice());
            assert!(buf[pos..].iter().all(|b| *b == 0xee));
        }
    }

    #[test]
    fn short_buffers_are_rejected_without_moving_pos() {
        let mut buf = [0u8; 4];
        let mut pos = 0;
        assert_eq!(
            Scn::base_scn().encode_fixed(&mut buf, &mut pos),
            Err(CodecError::BufferTooSmall {
                needed: 8,
                available: 4
            })
        );
        assert_eq!(pos, 0);

        let mut one = [0u8; 1];
        assert!(matches!(
            Scn::max_scn().encode_var(&mut one, &mut pos),
            Err(CodecError::BufferTooSmall { .. })
        ));
        assert_eq!(pos, 0);
    }

    #[test]
    fn truncated_input_is_detected() {
        let bytes = Scn::max_scn().to_fixed_bytes();
        let mut pos = 0;
        assert_eq!(
            Scn::decode_fixed(&bytes[..7], &mut pos),
            Err(CodecError::Truncation)
        );
        let var = Scn::max_scn().to_var_bytes();
        assert_eq!(
            Scn::decode_var(&var[..var.len() - 1], &mut pos),
            Err(CodecError::Truncation)
        );
        assert_eq!(pos, 0);
    }

    #[test]
    fn overlong_and_tagged_words_are_corruption() {
        let mut pos = 0;
        assert_eq!(
            Scn::decode_var(&[0xff; 11], &mut pos),
            Err(CodecError::Corruption)
        );
        let tagged = (1u64 << 62).to_be_bytes();
        assert_eq!(
            Scn::decode_fixed(&tagged, &mut pos),
            Err(CodecError::Corruption)
        );
    }

    #[test]
    fn legacy_i64_max_decodes_as_max_scn() {
        let legacy = (i64::MAX as u64).to_be_bytes();
        let mut pos = 0;
        assert_eq!(
            Scn::decode_fixed(&legacy, &mut pos).expect("legacy"),
            Scn::max_scn()
        );
    }

    #[test]
    fn consecutive_values_share_a_buffer() {
        let values = [Scn::base_scn(), Scn::max_scn(), Scn::invalid_scn()];
        let mut buf = vec![0u8; 64];
        let mut pos = 0;
        for scn in values {
            scn.encode_var(&mut buf, &mut pos).expect("var");
            scn.encode_fixed(&mut buf, &mut pos).expect("fixed");
        }
        let mut read = 0;
        for scn in values {
            assert_eq!(Scn::decode_var(&buf, &mut read).expect("var"), scn);
            assert_eq!(Scn::decode_fixed(&buf, &mut read).expect("fixed"), scn);
        }
        assert_eq!(read, pos);
    }
}
