//! Unit tests for lane framing.
//!
//! Covers configuration clamping, oversized frame rejection, structured EOF
//! reporting and envelope/raw traffic over an in-memory duplex transport.

use bytes::{BufMut, Bytes, BytesMut};
use rstest::rstest;
use tokio::io::{AsyncWriteExt, duplex};
use tracing_test::traced_test;

use super::*;
use crate::envelope::Operation;

#[rstest]
#[case::below_min(1, MIN_FRAME_LENGTH)]
#[case::above_max(MAX_FRAME_LENGTH + 1, MAX_FRAME_LENGTH)]
#[case::in_range(4096, 4096)]
fn lane_config_clamps_max_frame_length(#[case] requested: usize, #[case] expected: usize) {
    assert_eq!(LaneConfig::new(requested).max_frame_length(), expected);
}

#[test]
fn encoder_rejects_oversized_payloads() {
    let mut encoder = LaneConfig::new(MIN_FRAME_LENGTH).encoder();
    let mut buf = BytesMut::new();

    let err = encoder
        .encode(Bytes::from(vec![0_u8; MIN_FRAME_LENGTH + 1]), &mut buf)
        .expect_err("expected encode to fail for oversized frame");

    assert!(matches!(
        err,
        LaneError::OversizedFrame { size, max } if size == MIN_FRAME_LENGTH + 1 && max == MIN_FRAME_LENGTH
    ));
    assert!(buf.is_empty(), "nothing should be written for a rejected frame");
}

#[test]
fn decode_eof_with_empty_buffer_returns_none() {
    let mut decoder = LaneConfig::default().decoder();
    let mut buf = BytesMut::new();
    assert!(matches!(decoder.decode_eof(&mut buf), Ok(None)));
}

#[test]
fn decode_eof_with_partial_header_reports_mid_header() {
    let mut decoder = LaneConfig::default().decoder();
    let mut buf = BytesMut::from(&[0x00_u8, 0x00][..]);

    let err = decoder.decode_eof(&mut buf).expect_err("partial header");
    assert!(matches!(
        err,
        LaneError::Eof(EofError::MidHeader {
            bytes_received: 2,
            header_size: LENGTH_HEADER_SIZE
        })
    ));
}

#[test]
fn decode_eof_with_partial_payload_reports_mid_frame() {
    let mut decoder = LaneConfig::default().decoder();
    let mut buf = BytesMut::new();
    buf.put_u32(10);
    buf.put_slice(&[1, 2, 3]);

    let err = decoder.decode_eof(&mut buf).expect_err("partial payload");
    assert!(matches!(
        err,
        LaneError::Eof(EofError::MidFrame {
            bytes_received: 3,
            expected: 10
        })
    ));
}

#[traced_test]
#[test]
fn partial_frame_at_eof_is_traced() {
    let mut decoder = LaneConfig::default().decoder();
    let mut buf = BytesMut::from(&[0x00_u8, 0x00, 0x00, 0x08, 0xaa][..]);

    assert!(decoder.decode_eof(&mut buf).is_err());
    assert!(logs_contain("partial frame buffered"));
}

#[test]
fn inbound_frame_above_limit_is_rejected_before_buffering() {
    let mut decoder = LaneConfig::new(MIN_FRAME_LENGTH).decoder();
    let mut buf = BytesMut::new();
    buf.put_u32(u32::try_from(MIN_FRAME_LENGTH + 1).expect("small length"));

    let err = decoder.decode(&mut buf).expect_err("oversized announcement");
    assert!(matches!(err, LaneError::OversizedFrame { size, .. } if size == MIN_FRAME_LENGTH + 1));
}

#[test]
fn complete_frames_decode_back_to_back() {
    let mut decoder = LaneConfig::default().decoder();
    let mut buf = BytesMut::new();
    buf.put_u32(2);
    buf.put_slice(&[1, 2]);
    buf.put_u32(1);
    buf.put_slice(&[3]);

    assert_eq!(decoder.decode(&mut buf).expect("first").as_deref(), Some(&[1, 2][..]));
    assert_eq!(decoder.decode(&mut buf).expect("second").as_deref(), Some(&[3][..]));
    assert!(decoder.decode(&mut buf).expect("drained").is_none());
}

#[tokio::test]
async fn envelopes_cross_the_lane_in_order() {
    let (near, far) = duplex(4096);
    let mut writer = LaneWriter::new(near, LaneConfig::default());
    let mut reader = LaneReader::new(far, LaneConfig::default());

    let first = Envelope::new(Operation::Insert).with_content(vec![1]);
    let second = Envelope::new(Operation::Delete).with_content(vec![2]);
    writer.write_envelope(&first).await.expect("write first");
    writer.write_envelope(&second).await.expect("write second");

    assert_eq!(reader.read_envelope().await.expect("read first"), first);
    assert_eq!(reader.read_envelope().await.expect("read second"), second);
}

#[tokio::test]
async fn shutdown_surfaces_as_clean_close() {
    let (near, far) = duplex(1024);
    let mut writer = LaneWriter::new(near, LaneConfig::default());
    let mut reader = LaneReader::new(far, LaneConfig::default());

    writer.shutdown().await.expect("shutdown writer");

    let err = reader.read_envelope().await.expect_err("peer closed");
    assert!(err.is_clean_close(), "expected clean close, got {err:?}");
}

#[tokio::test]
async fn truncated_frame_is_not_a_clean_close() {
    let (mut near, far) = duplex(1024);
    let mut reader = LaneReader::new(far, LaneConfig::default());

    near.write_all(&[0, 0, 0, 16, 1, 2]).await.expect("write partial frame");
    drop(near);

    let err = reader.read_envelope().await.expect_err("truncated frame");
    assert!(matches!(err, LaneError::Eof(EofError::MidFrame { .. })));
}

#[tokio::test]
async fn garbage_frame_fails_to_decode() {
    let (near, far) = duplex(1024);
    let mut writer = LaneWriter::new(near, LaneConfig::default());
    let mut reader = LaneReader::new(far, LaneConfig::default());

    writer.write_raw(&[0, 0, 0, 2, 0xff, 0xff]).await.expect("write raw frame");

    let err = reader.read_envelope().await.expect_err("garbage payload");
    assert!(matches!(err, LaneError::Decode(_)));
}

#[tokio::test]
async fn raw_bytes_pass_through_untouched() {
    let (near, far) = duplex(1024);
    let mut writer = LaneWriter::new(near, LaneConfig::default());
    let mut reader = LaneReader::new(far, LaneConfig::default());

    let written = writer.write_raw(b"hello").await.expect("write raw");
    assert_eq!(written, 5);

    let mut buf = [0_u8; 16];
    let mut received = Vec::new();
    while received.len() < 5 {
        let n = reader.read_raw(&mut buf).await.expect("read raw");
        assert!(n > 0, "unexpected EOF");
        received.extend_from_slice(&buf[..n]);
    }
    assert_eq!(received, b"hello");
}
