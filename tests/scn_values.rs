use lsfreeze::scn::Scn;
use lsfreeze::scn::codec::{FIXED_ENCODED_LEN, MAX_VAR_ENCODED_LEN};
use lsfreeze::{CodecError, FreezeWatermarks, ScnError};

fn scn(v: u64) -> Scn {
    Scn::from_sql(v).expect("scn")
}

#[test]
fn sentinels_order_and_print() {
    assert!(Scn::min_scn() < Scn::base_scn());
    assert!(Scn::base_scn() < Scn::max_scn());
    assert!(Scn::max_scn().is_valid());
    assert!(!Scn::invalid_scn().is_valid());
    assert_eq!(Scn::default(), Scn::invalid_scn());

    assert_eq!(Scn::invalid_scn().partial_cmp(&Scn::min_scn()), None);
    assert_eq!(Scn::invalid_scn(), Scn::invalid_scn());
    assert_eq!(Scn::invalid_scn().to_string(), "invalid");
    assert_eq!(scn(42).to_string(), "42");
}

#[test]
fn max_and_min_skip_the_invalid_sentinel() {
    assert_eq!(Scn::max(Scn::invalid_scn(), scn(3)), scn(3));
    assert_eq!(Scn::min(scn(3), Scn::invalid_scn()), scn(3));
    assert_eq!(Scn::max(scn(9), scn(3)), scn(9));
    assert_eq!(Scn::min(scn(9), scn(3)), scn(3));
    assert!(!Scn::max(Scn::invalid_scn(), Scn::invalid_scn()).is_valid());
}

#[test]
fn conversions_reject_out_of_range_values() {
    let max = Scn::max_scn().val_for_sql().expect("max");
    assert_eq!(max, (1u64 << 62) - 1);
    assert!(matches!(
        Scn::from_sql(max + 1),
        Err(ScnError::OutOfRange { .. })
    ));
    assert!(matches!(Scn::from_gts(-1), Err(ScnError::OutOfRange { .. })));
    assert_eq!(Scn::from_tx(i64::MAX), Ok(Scn::max_scn()));
    assert_eq!(Scn::max_scn().val_for_tx(), Ok(i64::MAX));
    assert_eq!(Scn::from_logservice(u64::MAX), Ok(Scn::invalid_scn()));
    assert!(Scn::from_inner_table_field(u64::MAX).is_err());
    assert_eq!(Scn::invalid_scn().val_for_sql(), Err(ScnError::Invalid));

    let ts = Scn::from_timestamp_us(1_700_000_000_123_456).expect("timestamp");
    assert_eq!(ts.to_timestamp_us(), Ok(1_700_000_000_123_456));
    assert!(Scn::from_timestamp_us(u64::MAX / 10).is_err());
}

#[test]
fn legacy_max_word_decodes_to_max_scn() {
    let legacy = (i64::MAX as u64).to_be_bytes();
    let mut pos = 0;
    assert_eq!(Scn::decode_fixed(&legacy, &mut pos), Ok(Scn::max_scn()));
    assert_eq!(pos, FIXED_ENCODED_LEN);

    let parsed: Scn = serde_json::from_str(&(i64::MAX as u64).to_string()).expect("json");
    assert_eq!(parsed, Scn::max_scn());
}

#[test]
fn codec_errors_leave_position_untouched() {
    let mut buf = [0u8; 4];
    let mut pos = 0;
    assert_eq!(
        scn(7).encode_fixed(&mut buf, &mut pos),
        Err(CodecError::BufferTooSmall {
            needed: FIXED_ENCODED_LEN,
            available: 4
        })
    );
    assert_eq!(pos, 0);

    let mut pos = 0;
    assert_eq!(Scn::decode_fixed(&buf, &mut pos), Err(CodecError::Truncation));
    assert_eq!(pos, 0);

    let unterminated = [0x80u8; MAX_VAR_ENCODED_LEN];
    let mut pos = 0;
    assert_eq!(
        Scn::decode_var(&unterminated, &mut pos),
        Err(CodecError::Corruption)
    );
    assert_eq!(pos, 0);

    let above_max = (1u64 << 62).to_be_bytes();
    let mut pos = 0;
    assert_eq!(
        Scn::decode_fixed(&above_max, &mut pos),
        Err(CodecError::Corruption)
    );
}

#[test]
fn back_to_back_encodings_share_a_buffer() {
    let values = [Scn::min_scn(), scn(127), scn(128), Scn::max_scn(), Scn::invalid_scn()];
    let mut buf = vec![0u8; values.len() * MAX_VAR_ENCODED_LEN];
    let mut pos = 0;
    for value in values {
        value.encode_var(&mut buf, &mut pos).expect("encode");
    }
    assert_eq!(
        pos,
        values.iter().map(Scn::serialized_size).sum::<usize>()
    );

    let mut read = 0;
    for value in values {
        assert_eq!(Scn::decode_var(&buf, &mut read), Ok(value));
    }
    assert_eq!(read, pos);
    assert_eq!(Scn::invalid_scn().serialized_size(), MAX_VAR_ENCODED_LEN);
    assert_eq!(Scn::min_scn().serialized_size(), 1);
}

#[test]
fn watermarks_serialize_scns_as_plain_words() {
    let marks = FreezeWatermarks {
        clock: 3,
        freeze_snapshot_version: scn(90),
        max_decided_scn: Scn::invalid_scn(),
    };
    let json = serde_json::to_string(&marks).expect("json");
    assert!(json.contains("\"freeze_snapshot_version\":90"));
    assert!(json.contains(&format!("\"max_decided_scn\":{}", u64::MAX)));
    let back: FreezeWatermarks = serde_json::from_str(&json).expect("parse");
    assert_eq!(back, marks);
}
