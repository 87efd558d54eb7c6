//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use linkd_netlib::packet::{DecodeError, LldpFrame};

static FRAME1: Lazy<(Vec<u8>, LldpFrame)> = Lazy::new(|| {
    (
        vec![
            // Ethernet header.
            0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x88, 0xcc,
            // Chassis ID TLV ("devA", locally assigned).
            0x02, 0x05, 0x07, 0x64, 0x65, 0x76, 0x41,
            // Port ID TLV ("7", locally assigned).
            0x04, 0x02, 0x07, 0x37,
            // TTL TLV.
            0x06, 0x02, 0x00, 0x78,
            // End of LLDPDU.
            0x00, 0x00,
        ],
        LldpFrame {
            chassis_id: "devA".to_owned(),
            port_id: "7".to_owned(),
            ttl: 120,
        },
    )
});

static FRAME2: Lazy<(Vec<u8>, LldpFrame)> = Lazy::new(|| {
    (
        vec![
            // Ethernet header.
            0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x01, 0x88, 0xcc,
            // Chassis ID TLV (agent UUID, locally assigned).
            0x02, 0x25, 0x07, 0x31, 0x66, 0x36, 0x66, 0x39, 0x64, 0x39,
            0x63, 0x2d, 0x30, 0x62, 0x38, 0x37, 0x2d, 0x34, 0x64, 0x39,
            0x66, 0x2d, 0x39, 0x65, 0x36, 0x61, 0x2d, 0x31, 0x66, 0x32,
            0x64, 0x33, 0x63, 0x34, 0x62, 0x35, 0x61, 0x36, 0x39,
            // Port ID TLV ("104", locally assigned).
            0x04, 0x04, 0x07, 0x31, 0x30, 0x34,
            // TTL TLV.
            0x06, 0x02, 0x00, 0x78,
            // End of LLDPDU.
            0x00, 0x00,
        ],
        LldpFrame {
            chassis_id: "1f6f9d9c-0b87-4d9f-9e6a-1f2d3c4b5a69".to_owned(),
            port_id: "104".to_owned(),
            ttl: 120,
        },
    )
});

//
// Helper functions.
//

fn test_encode_frame(bytes_expected: &[u8], frame: &LldpFrame) {
    let bytes_actual = frame.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_frame(bytes: &[u8], frame_expected: &LldpFrame) {
    let frame_actual = LldpFrame::decode(bytes).unwrap();
    assert_eq!(*frame_expected, frame_actual);
}

#[test]
fn test_encode_frame1() {
    let (ref bytes, ref frame) = *FRAME1;
    test_encode_frame(bytes, frame);
}

#[test]
fn test_decode_frame1() {
    let (ref bytes, ref frame) = *FRAME1;
    test_decode_frame(bytes, frame);
}

#[test]
fn test_encode_frame2() {
    let (ref bytes, ref frame) = *FRAME2;
    test_encode_frame(bytes, frame);
}

#[test]
fn test_decode_frame2() {
    let (ref bytes, ref frame) = *FRAME2;
    test_decode_frame(bytes, frame);
}

#[test]
fn test_decode_unknown_tlv() {
    // System Name TLV inserted between Port ID and TTL is skipped.
    let bytes = vec![
        0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e, 0x02, 0x00, 0x00, 0x00, 0x00,
        0x01, 0x88, 0xcc,
        // Chassis ID TLV ("devA").
        0x02, 0x05, 0x07, 0x64, 0x65, 0x76, 0x41,
        // Port ID TLV ("7").
        0x04, 0x02, 0x07, 0x37,
        // System Name TLV ("sw").
        0x0a, 0x02, 0x73, 0x77,
        // TTL TLV.
        0x06, 0x02, 0x00, 0x78,
        // End of LLDPDU.
        0x00, 0x00,
    ];
    let frame = LldpFrame::decode(&bytes).unwrap();
    assert_eq!(frame.chassis_id, "devA");
    assert_eq!(frame.port_id, "7");
}

#[test]
fn test_decode_not_lldp() {
    let mut bytes = FRAME1.0.clone();
    // Rewrite the ethertype to IPv4.
    bytes[12] = 0x08;
    bytes[13] = 0x00;
    assert_eq!(LldpFrame::decode(&bytes), Err(DecodeError::NotLldp(0x0800)));
}

#[test]
fn test_decode_truncated() {
    let bytes = &FRAME1.0[..10];
    assert_eq!(LldpFrame::decode(bytes), Err(DecodeError::IncompleteFrame));
}

#[test]
fn test_decode_missing_port_id() {
    let bytes = vec![
        0x01, 0x80, 0xc2, 0x00, 0x00, 0x0e, 0x02, 0x00, 0x00, 0x00, 0x00,
        0x01, 0x88, 0xcc,
        // Chassis ID TLV ("devA") only.
        0x02, 0x05, 0x07, 0x64, 0x65, 0x76, 0x41,
        // End of LLDPDU.
        0x00, 0x00,
    ];
    assert_eq!(LldpFrame::decode(&bytes), Err(DecodeError::MissingPortId));
}
