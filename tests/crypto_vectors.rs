//! Published reference vectors for the key transfer and authentication
//! primitives. These byte values are fixed by the wire protocol and must
//! be reproduced exactly.

use homelink::crypto;
use homelink::protocol::frame::compute_crc;

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn with_crc(frame: &[u8]) -> Vec<u8> {
    let mut out = frame.to_vec();
    let crc = compute_crc(frame);
    out.push((crc & 0xFF) as u8);
    out.push((crc >> 8) as u8);
    out
}

#[test]
fn crc_of_captured_frames() {
    // Captured on-air frames, trailing two bytes are the CRC
    let captures = [
        "4800feefeef00f0031fb60",
        "0e00f00f00feefee3c123456789abc19db",
        "1800f00f00feefee32102e49a16d3b69726f3192cf17534ad98043",
        "0e00feefeef00f003d8dc9d40dc7a4f9e5",
        "8800f00f00feefee335bfb",
        "4e04feefeef00f0038123456789abc23b6",
        "1804f00f00feefee32ea425a7a182885d4eaeefd416d625e016379",
        "0e00feefeef00f003c123456789abc5eb1",
        "8e00f00f00feefee3d0ae519a73c992400",
    ];
    for capture in captures {
        let raw: Vec<u8> = (0..capture.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&capture[i..i + 2], 16).unwrap())
            .collect();
        let body = &raw[..raw.len() - 2];
        assert_eq!(to_hex(&with_crc(body)), capture, "CRC mismatch for {}", capture);
    }
}

#[test]
fn one_way_key_push() {
    // 1W key push using command 0x30, node address abcdef, sequence 0x1234
    let node = [0xAB, 0xCD, 0xEF];
    let sequence = [0x12, 0x34];
    let controller_key = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15,
        0x16,
    ];

    let mut wrapped = controller_key;
    crypto::wrap_key_1w(&node, &mut wrapped);
    assert_eq!(to_hex(&wrapped), "7e60491f976adf653db0ed785e49a201");

    // Frame data is the command byte followed by the wrapped key
    let mut frame_data = vec![0x30];
    frame_data.extend_from_slice(&wrapped);
    assert_eq!(to_hex(&frame_data), "307e60491f976adf653db0ed785e49a201");

    let mac = crypto::mac_1w(&sequence, &controller_key, &frame_data);
    assert_eq!(to_hex(&mac), "19e81ec43d5e");

    // Final on-air frame
    let mut frame = vec![0xFC, 0x00, 0x00, 0x00, 0x3F];
    frame.extend_from_slice(&node);
    frame.extend_from_slice(&frame_data);
    frame.extend_from_slice(&[0x02, 0x01]);
    frame.extend_from_slice(&sequence);
    frame.extend_from_slice(&mac);
    assert_eq!(
        to_hex(&with_crc(&frame)),
        "fc0000003fabcdef307e60491f976adf653db0ed785e49a2010201123419e81ec43d5e9bf2"
    );
}

#[test]
fn two_way_key_pull() {
    // 2W key pull: the peripheral asks with 0x38 and its challenge
    let challenge = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
    let system_key = [
        0xAB, 0xCD, 0xEF, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12,
        0x13,
    ];

    let mut frame38 = vec![0x38];
    frame38.extend_from_slice(&challenge);

    let wrapped = crypto::wrap_key_2w(&system_key, &challenge, &frame38);
    assert_eq!(to_hex(&wrapped), "ea425a7a182885d4eaeefd416d625e01");

    let mut frame32 = vec![0x32];
    frame32.extend_from_slice(&wrapped);
    let mac = crypto::mac_2w(&challenge, &system_key, &frame32);
    assert_eq!(to_hex(&mac), "0ae519a73c99");

    // Key transfer frame as sent on the air
    let mut frame = vec![0x18, 0x04, 0xF0, 0x0F, 0x00, 0xFE, 0xEF, 0xEE];
    frame.extend_from_slice(&frame32);
    assert_eq!(
        to_hex(&with_crc(&frame)),
        "1804f00f00feefee32ea425a7a182885d4eaeefd416d625e016379"
    );
}

#[test]
fn two_way_key_push() {
    // 2W key push: the controller asks for a challenge with 0x31
    let challenge = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
    let system_key = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15,
        0x16,
    ];

    let wrapped = crypto::wrap_key_2w(&system_key, &challenge, &[0x31]);
    assert_eq!(to_hex(&wrapped), "102e49a16d3b69726f3192cf17534ad9");

    // MAC over a captured key-transfer frame with the same challenge
    let frame32 = [
        0x32, 0xF8, 0x49, 0x58, 0x4F, 0xFC, 0xFC, 0x44, 0x2B, 0x1E, 0x97, 0xE4, 0xC3, 0x8D, 0xF7,
        0xB1, 0x43,
    ];
    let mac = crypto::mac_2w(&challenge, &system_key, &frame32);
    assert_eq!(to_hex(&mac), "8dc9d40dc7a4");
}
