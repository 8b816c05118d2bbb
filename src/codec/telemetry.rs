//! Telemetry notification decoding
//!
//! Each record has a fixed layout of little-endian unsigned fields. Raw
//! integers are converted to physical units with a per-field divisor:
//!
//! | Record            | Min length | Tag  |
//! |-------------------|------------|------|
//! | GeneralStatus     | 19         | 0x31 |
//! | AdditionalStatus  | 16         | 0x32 |
//! | StrokeData        | 20         | 0x35 |
//! | SplitData         | 18         | 0x37 |
//!
//! A multiplexed notification prefixes one of these payloads with its tag byte.
//! Payloads longer than the layout are accepted; the tail is ignored.

use tracing::trace;

use crate::types::{
    AdditionalStatus, GeneralStatus, RecordKind, SplitData, StreamId, StreamRoute, StrokeData,
    TelemetryRecord,
};
use crate::{Pm5Error, Result};

const CENTI: f64 = 100.0;
const DECI: f64 = 10.0;
const MILLI: f64 = 1000.0;

/// Context name used for errors on empty multiplexed frames
const MULTIPLEXED_CONTEXT: &str = "Multiplexed";

/// Decode a dedicated-characteristic payload as `kind`
pub fn decode(kind: RecordKind, data: &[u8]) -> Result<TelemetryRecord> {
    if data.len() < kind.min_len() {
        return Err(Pm5Error::format(kind.name(), kind.min_len(), data.len()));
    }

    let record = match kind {
        RecordKind::GeneralStatus => TelemetryRecord::GeneralStatus(general_status(data)),
        RecordKind::AdditionalStatus => TelemetryRecord::AdditionalStatus(additional_status(data)),
        RecordKind::StrokeData => TelemetryRecord::StrokeData(stroke_data(data)),
        RecordKind::SplitData => TelemetryRecord::SplitData(split_data(data)),
    };

    trace!("Decoded {} from {} bytes", kind.name(), data.len());
    Ok(record)
}

/// Decode a multiplexed notification: tag byte, then the shifted payload
///
/// Unrecognised tags are not an error; they decode to
/// [`TelemetryRecord::Unknown`] carrying the bytes after the tag.
pub fn decode_multiplexed(data: &[u8]) -> Result<TelemetryRecord> {
    let Some((&tag, payload)) = data.split_first() else {
        return Err(Pm5Error::format(MULTIPLEXED_CONTEXT, 1, 0));
    };

    match RecordKind::from_tag(tag) {
        Some(kind) if payload.len() < kind.min_len() => {
            Err(Pm5Error::format(kind.name(), kind.min_len() + 1, data.len()))
        }
        Some(kind) => decode(kind, payload),
        None => {
            trace!("Multiplexed tag {:#04x} not decoded ({} bytes)", tag, payload.len());
            Ok(TelemetryRecord::Unknown { tag, payload: payload.to_vec() })
        }
    }
}

/// Decode a payload according to the stream it arrived on
///
/// Returns `Ok(None)` for raw monitor streams, which are never decoded.
pub fn decode_for_stream(stream: StreamId, data: &[u8]) -> Result<Option<TelemetryRecord>> {
    match stream.route() {
        StreamRoute::Dedicated(kind) => decode(kind, data).map(Some),
        StreamRoute::Multiplexed => decode_multiplexed(data).map(Some),
        StreamRoute::Raw => Ok(None),
    }
}

fn general_status(data: &[u8]) -> GeneralStatus {
    GeneralStatus {
        elapsed_time: read_u24(data, 0) as f64 / CENTI,
        distance: read_u24(data, 3) as f64 / DECI,
        workout_type: data[6],
        interval_type: data[7],
        workout_state: data[8],
        rowing_state: data[9],
        stroke_state: data[10],
        total_work_distance: read_u24(data, 11),
        workout_duration: read_u24(data, 14),
        workout_duration_type: data[17],
        drag_factor: data[18],
    }
}

fn additional_status(data: &[u8]) -> AdditionalStatus {
    AdditionalStatus {
        elapsed_time: read_u24(data, 0) as f64 / CENTI,
        speed: read_u16(data, 3) as f64 / MILLI,
        stroke_rate: data[5],
        heart_rate: data[6],
        current_pace: read_u16(data, 7) as f64 / CENTI,
        average_pace: read_u16(data, 9) as f64 / CENTI,
        rest_distance: read_u16(data, 11),
        rest_time: read_u24(data, 13) as f64 / CENTI,
    }
}

fn stroke_data(data: &[u8]) -> StrokeData {
    StrokeData {
        elapsed_time: read_u24(data, 0) as f64 / CENTI,
        distance: read_u24(data, 3) as f64 / DECI,
        drive_length: data[6] as f64 / CENTI,
        drive_time: data[7] as f64 / CENTI,
        stroke_recovery_time: read_u16(data, 8) as f64 / CENTI,
        stroke_distance: read_u16(data, 10) as f64 / CENTI,
        peak_drive_force: read_u16(data, 12) as f64 / DECI,
        average_drive_force: read_u16(data, 14) as f64 / DECI,
        work_per_stroke: read_u16(data, 16) as f64 / DECI,
        stroke_count: read_u16(data, 18),
    }
}

fn split_data(data: &[u8]) -> SplitData {
    SplitData {
        elapsed_time: read_u24(data, 0) as f64 / CENTI,
        distance: read_u24(data, 3) as f64 / DECI,
        split_time: read_u24(data, 6) as f64 / DECI,
        split_distance: read_u24(data, 9) as f64 / DECI,
        rest_time: read_u16(data, 12),
        rest_distance: read_u16(data, 14),
        split_type: data[16],
        split_number: data[17],
    }
}

// Callers check the record length first; these never see a short slice.
fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u24(data: &[u8], offset: usize) -> u32 {
    data[offset] as u32 | (data[offset + 1] as u32) << 8 | (data[offset + 2] as u32) << 16
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GENERAL_STATUS: [u8; 19] = [
        0x64, 0x00, 0x00, 0xE8, 0x03, 0x00, 0x01, 0x00, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x73,
    ];

    fn expect_general(record: TelemetryRecord) -> GeneralStatus {
        match record {
            TelemetryRecord::GeneralStatus(status) => status,
            other => panic!("Expected GeneralStatus, got {:?}", other),
        }
    }

    #[test]
    fn general_status_reference_frame() {
        let status = expect_general(decode(RecordKind::GeneralStatus, &GENERAL_STATUS).unwrap());

        assert_eq!(status.elapsed_time, 1.0);
        assert_eq!(status.distance, 100.0);
        assert_eq!(status.workout_type, 1);
        assert_eq!(status.interval_type, 0);
        assert_eq!(status.workout_state, 1);
        assert_eq!(status.rowing_state, 1);
        assert_eq!(status.stroke_state, 2);
        assert_eq!(status.total_work_distance, 0);
        assert_eq!(status.workout_duration, 0);
        assert_eq!(status.drag_factor, 115);
    }

    #[test]
    fn multiplexed_general_status_matches_dedicated() {
        let mut tagged = vec![0x31];
        tagged.extend_from_slice(&GENERAL_STATUS);

        let dedicated = decode(RecordKind::GeneralStatus, &GENERAL_STATUS).unwrap();
        let multiplexed = decode_multiplexed(&tagged).unwrap();
        assert_eq!(dedicated, multiplexed);
    }

    #[test]
    fn twenty_four_bit_fields_use_all_three_bytes() {
        let mut frame = GENERAL_STATUS;
        frame[11..14].copy_from_slice(&[0x01, 0x02, 0x03]);
        let status = expect_general(decode(RecordKind::GeneralStatus, &frame).unwrap());
        assert_eq!(status.total_work_distance, 0x030201);

        // High bit set must not sign-extend
        frame[0..3].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
        let status = expect_general(decode(RecordKind::GeneralStatus, &frame).unwrap());
        assert_eq!(status.elapsed_time, 0xFF_FFFF as f64 / 100.0);
    }

    #[test]
    fn additional_status_scales_fields() {
        let frame = [
            0x10, 0x27, 0x00, // 100.00 s
            0xB8, 0x0B, // 3.000 m/s
            0x1C, // 28 spm
            0x8C, // 140 bpm
            0xE0, 0x2E, // 120.00 s/500m
            0xE4, 0x2F, // 122.60 s/500m
            0x00, 0x00, // rest distance
            0x00, 0x00, 0x00, // rest time
        ];
        let TelemetryRecord::AdditionalStatus(status) =
            decode(RecordKind::AdditionalStatus, &frame).unwrap()
        else {
            panic!("Expected AdditionalStatus");
        };

        assert_eq!(status.elapsed_time, 100.0);
        assert_eq!(status.speed, 3.0);
        assert_eq!(status.stroke_rate, 28);
        assert_eq!(status.heart_rate, 140);
        assert_eq!(status.current_pace, 120.0);
        assert!((status.average_pace - 122.6).abs() < 1e-9);
        assert_eq!(status.pace_per_500m().as_secs(), 120);
    }

    #[test]
    fn stroke_data_scales_forces_and_work() {
        let frame = [
            0xE8, 0x03, 0x00, // 10.00 s
            0x64, 0x00, 0x00, // 10.0 m
            0x8C, // 1.40 m
            0x50, // 0.80 s
            0xA0, 0x00, // 1.60 s
            0xE8, 0x03, // 10.00 m
            0x70, 0x17, // 600.0 N
            0xAC, 0x0D, // 350.0 N
            0x88, 0x13, // 500.0 J
            0x05, 0x00, // 5 strokes
        ];
        let TelemetryRecord::StrokeData(stroke) = decode(RecordKind::StrokeData, &frame).unwrap()
        else {
            panic!("Expected StrokeData");
        };

        assert_eq!(stroke.drive_length, 1.4);
        assert_eq!(stroke.drive_time, 0.8);
        assert_eq!(stroke.stroke_recovery_time, 1.6);
        assert_eq!(stroke.stroke_distance, 10.0);
        assert_eq!(stroke.peak_drive_force, 600.0);
        assert_eq!(stroke.average_drive_force, 350.0);
        assert_eq!(stroke.work_per_stroke, 500.0);
        assert_eq!(stroke.stroke_count, 5);
    }

    #[test]
    fn split_data_keeps_rest_fields_raw() {
        let frame = [
            0x30, 0x75, 0x00, // 300.00 s
            0x88, 0x13, 0x00, // 500.0 m
            0xB8, 0x0B, 0x00, // 300.0 s
            0x88, 0x13, 0x00, // 500.0 m
            0x3C, 0x00, // 60 s rest
            0x0A, 0x00, // 10 m rest
            0x01, // split type
            0x03, // split number
        ];
        let TelemetryRecord::SplitData(split) = decode(RecordKind::SplitData, &frame).unwrap()
        else {
            panic!("Expected SplitData");
        };

        assert_eq!(split.elapsed_time, 300.0);
        assert_eq!(split.split_time, 300.0);
        assert_eq!(split.split_distance, 500.0);
        assert_eq!(split.rest_time, 60);
        assert_eq!(split.rest_distance, 10);
        assert_eq!(split.split_number, 3);
    }

    #[test]
    fn short_frames_report_expected_and_actual() {
        for kind in RecordKind::ALL {
            let short = vec![0u8; kind.min_len() - 1];
            match decode(kind, &short) {
                Err(Pm5Error::Format { expected, actual, .. }) => {
                    assert_eq!(expected, kind.min_len());
                    assert_eq!(actual, kind.min_len() - 1);
                }
                other => panic!("Expected Format error for {:?}, got {:?}", kind, other),
            }

            let mut tagged = vec![kind.tag()];
            tagged.extend_from_slice(&short);
            match decode_multiplexed(&tagged) {
                Err(Pm5Error::Format { expected, actual, .. }) => {
                    assert_eq!(expected, kind.min_len() + 1);
                    assert_eq!(actual, kind.min_len());
                }
                other => panic!("Expected Format error for {:?}, got {:?}", kind, other),
            }
        }
    }

    #[test]
    fn empty_multiplexed_frame_is_a_format_error() {
        assert!(matches!(
            decode_multiplexed(&[]),
            Err(Pm5Error::Format { expected: 1, actual: 0, .. })
        ));
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let record = decode_multiplexed(&[0x33, 0xAA, 0xBB]).unwrap();
        assert_eq!(record, TelemetryRecord::Unknown { tag: 0x33, payload: vec![0xAA, 0xBB] });
    }

    #[test]
    fn raw_streams_are_not_decoded() {
        let stream = StreamId::Custom(uuid::Uuid::nil());
        assert_eq!(decode_for_stream(stream, &[1, 2, 3]).unwrap(), None);
        assert!(decode_for_stream(StreamId::GeneralStatus, &GENERAL_STATUS).unwrap().is_some());
    }

    proptest! {
        #[test]
        fn trailing_bytes_are_ignored(
            kind in prop::sample::select(RecordKind::ALL.to_vec()),
            payload in prop::collection::vec(any::<u8>(), 20..64),
            extra in prop::collection::vec(any::<u8>(), 1..16)
        ) {
            let exact = &payload[..kind.min_len()];
            let mut padded = exact.to_vec();
            padded.extend_from_slice(&extra);

            prop_assert_eq!(decode(kind, exact).unwrap(), decode(kind, &padded).unwrap());
        }

        #[test]
        fn unknown_tags_carry_their_payload(
            tag in any::<u8>().prop_filter("known tag", |t| RecordKind::from_tag(*t).is_none()),
            payload in prop::collection::vec(any::<u8>(), 0..32)
        ) {
            let mut frame = vec![tag];
            frame.extend_from_slice(&payload);
            let record = decode_multiplexed(&frame).unwrap();
            prop_assert_eq!(record, TelemetryRecord::Unknown { tag, payload });
        }

        #[test]
        fn multiplexed_matches_dedicated_for_every_kind(
            kind in prop::sample::select(RecordKind::ALL.to_vec()),
            payload in prop::collection::vec(any::<u8>(), 20..40)
        ) {
            let mut tagged = vec![kind.tag()];
            tagged.extend_from_slice(&payload);
            prop_assert_eq!(decode(kind, &payload).unwrap(), decode_multiplexed(&tagged).unwrap());
        }
    }
}
