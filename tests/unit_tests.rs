use homelink::config::{Address, ControllerConfig, BROADCAST_ADDRESS, DEFAULT_CONTROLLER_ADDRESS};
use homelink::crypto;
use homelink::protocol::commands::{Command, DiscoveryAnswer};
use homelink::protocol::frame::{compute_crc, Frame, FrameError, MAX_PAYLOAD};
use homelink::registry::{
    address_hex, key_hex, MultiInfo, NullPersistence, PairingState, Registry, RegistryError,
};

#[test]
fn frame_round_trip() {
    let source: Address = [0xBA, 0x11, 0xAD];
    let target: Address = [0xFE, 0x90, 0xEE];
    let payload = [0x01, 0xE7, 0x00, 0x00, 0x00, 0x00];

    let frame = Frame::new(source, target, 0x00, &payload).unwrap();
    let encoded = frame.encode();
    let decoded = Frame::decode(&encoded).unwrap();

    assert_eq!(decoded, frame);
    assert_eq!(decoded.source, source);
    assert_eq!(decoded.target, target);
    assert_eq!(decoded.cmd, 0x00);
    assert_eq!(&decoded.payload[..], &payload);
}

#[test]
fn frame_round_trip_empty_payload() {
    let frame = Frame::new(DEFAULT_CONTROLLER_ADDRESS, BROADCAST_ADDRESS, 0x28, &[]).unwrap();
    assert_eq!(frame.ctrl1.msg_len, 8);
    let encoded = frame.encode();
    assert_eq!(encoded.len(), 11);
    assert_eq!(Frame::decode(&encoded).unwrap(), frame);
}

#[test]
fn frame_round_trip_max_payload() {
    let payload = [0xA5u8; MAX_PAYLOAD];
    let frame = Frame::new([1, 2, 3], [4, 5, 6], 0x42, &payload).unwrap();
    let encoded = frame.encode();
    assert_eq!(Frame::decode(&encoded).unwrap(), frame);
}

#[test]
fn frame_rejects_oversized_payload() {
    let payload = [0u8; MAX_PAYLOAD + 1];
    assert_eq!(
        Frame::new([1, 2, 3], [4, 5, 6], 0x42, &payload),
        Err(FrameError::PayloadTooLong)
    );
}

#[test]
fn decode_rejects_bad_crc() {
    let frame = Frame::new([1, 2, 3], [4, 5, 6], 0x2C, &[]).unwrap();
    let mut encoded = frame.encode();
    let last = encoded.len() - 1;
    encoded[last] ^= 0xFF;
    assert_eq!(Frame::decode(&encoded), Err(FrameError::BadCrc));
}

#[test]
fn decode_rejects_short_buffer() {
    assert_eq!(Frame::decode(&[0x48, 0x00, 0xFE]), Err(FrameError::TooShort));
}

#[test]
fn decode_rejects_length_mismatch() {
    let frame = Frame::new([1, 2, 3], [4, 5, 6], 0x2C, &[0xAA, 0xBB]).unwrap();
    let mut encoded = frame.encode();
    // Corrupt msg_len while keeping the CRC consistent
    encoded[0] = (encoded[0] & 0xE0) | 0x09;
    let body_len = encoded.len() - 2;
    let crc = compute_crc(&encoded[..body_len]);
    encoded[body_len] = (crc & 0xFF) as u8;
    encoded[body_len + 1] = (crc >> 8) as u8;
    assert_eq!(Frame::decode(&encoded), Err(FrameError::LengthMismatch));
}

#[test]
fn ctrl_bytes_pack_and_unpack() {
    let mut frame = Frame::new([1, 2, 3], [4, 5, 6], 0x28, &[]).unwrap();
    frame.ctrl2.low_power = true;
    frame.ctrl2.prio = true;
    let encoded = frame.encode();

    // msg_len 8 with start and end fragment bits
    assert_eq!(encoded[0], 0x08 | 0x40 | 0x80);
    let decoded = Frame::decode(&encoded).unwrap();
    assert!(decoded.ctrl1.start_frame);
    assert!(decoded.ctrl1.end_frame);
    assert!(!decoded.ctrl1.protocol);
    assert!(decoded.ctrl2.low_power);
    assert!(decoded.ctrl2.prio);
    assert!(!decoded.ctrl2.beacon);
}

#[test]
fn crc_matches_known_capture() {
    // On-air capture of a challenge-request frame, CRC appended LSB first
    let frame = [0x48u8, 0x00, 0xFE, 0xEF, 0xEE, 0xF0, 0x0F, 0x00, 0x31];
    assert_eq!(compute_crc(&frame), 0x60FB);
}

#[test]
fn checksum_is_deterministic_and_order_sensitive() {
    let a = crypto::checksum(&[0x31, 0x32, 0x33]);
    let b = crypto::checksum(&[0x31, 0x32, 0x33]);
    let c = crypto::checksum(&[0x33, 0x32, 0x31]);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(crypto::checksum(&[]), (0, 0));
}

#[test]
fn initial_value_layout() {
    let challenge = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
    let frame_data = [0x31];
    let iv = crypto::construct_initial_value(&frame_data, &challenge);

    assert_eq!(iv[0], 0x31);
    // Short frame data is padded with 0x55
    assert_eq!(&iv[1..8], &[0x55; 7]);
    let (s1, s2) = crypto::checksum(&frame_data);
    assert_eq!(iv[8], s1);
    assert_eq!(iv[9], s2);
    assert_eq!(&iv[10..], &challenge);
}

#[test]
fn initial_value_keeps_first_eight_bytes_of_long_frame_data() {
    let challenge = [0u8; 6];
    let frame_data: Vec<u8> = (0u8..17).collect();
    let iv = crypto::construct_initial_value(&frame_data, &challenge);
    assert_eq!(&iv[..8], &frame_data[..8]);
    let (s1, s2) = crypto::checksum(&frame_data);
    assert_eq!((iv[8], iv[9]), (s1, s2));
}

#[test]
fn key_wrap_is_self_inverse() {
    let key = [0x42u8; 16];
    let challenge = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
    let frame_data = [0x31];

    let wrapped = crypto::wrap_key_2w(&key, &challenge, &frame_data);
    assert_ne!(wrapped, key);
    // Unwrapping is the same XOR against the keystream
    let unwrapped = crypto::wrap_key_2w(&wrapped, &challenge, &frame_data);
    assert_eq!(unwrapped, key);
}

#[test]
fn mac_depends_on_every_input() {
    let key = [0x01u8; 16];
    let challenge = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];

    let base = crypto::mac_2w(&challenge, &key, &[0x2E]);
    assert_eq!(base, crypto::mac_2w(&challenge, &key, &[0x2E]));

    let other_key = [0x02u8; 16];
    assert_ne!(base, crypto::mac_2w(&challenge, &other_key, &[0x2E]));

    let other_challenge = [0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12];
    assert_ne!(base, crypto::mac_2w(&other_challenge, &key, &[0x2E]));

    assert_ne!(base, crypto::mac_2w(&challenge, &key, &[0x2F]));
}

#[test]
fn one_way_wrap_is_an_involution() {
    let node: Address = [0xAB, 0xCD, 0xEF];
    let original = [0x5Au8; 16];
    let mut key = original;
    crypto::wrap_key_1w(&node, &mut key);
    assert_ne!(key, original);
    crypto::wrap_key_1w(&node, &mut key);
    assert_eq!(key, original);
}

#[test]
fn crypto_self_check_passes() {
    assert_eq!(crypto::self_check(), Ok(()));
}

#[test]
fn discovery_answer_parses_packed_fields() {
    // nodeType 0x101, subtype 0x21: packed = (0x101 << 6) | 0x21
    let packed: u16 = (0x101 << 6) | 0x21;
    let bytes = packed.to_be_bytes();
    let payload = [
        bytes[0], bytes[1], 0xFE, 0x90, 0xEE, 0x47, 0b1010_0110, 0x12, 0x34,
    ];
    let answer = DiscoveryAnswer::from_bytes(&payload).unwrap();
    assert_eq!(answer.node_type, 0x101);
    assert_eq!(answer.node_subtype, 0x21);
    assert_eq!(answer.address, [0xFE, 0x90, 0xEE]);
    assert_eq!(answer.manufacturer, 0x47);
    assert_eq!(answer.timestamp, 0x1234);

    assert!(DiscoveryAnswer::from_bytes(&payload[..8]).is_none());
}

#[test]
fn multi_info_bit_fields() {
    let info = MultiInfo::from_byte(0b1010_0110);
    assert_eq!(info.actuator_turnaround_time, 0b10);
    assert!(info.sync_ctrl_grp);
    assert!(!info.rf_support);
    assert_eq!(info.io_membership, 0b10);
    assert_eq!(info.power_save_mode, 0b10);
    assert_eq!(info.raw, 0b1010_0110);
}

#[test]
fn command_catalog_round_trip() {
    for cmd in [
        Command::Actuator,
        Command::StatusQuery,
        Command::StatusAnswer,
        Command::Discover,
        Command::DiscoverAnswer,
        Command::AliveRequest,
        Command::AliveAnswer,
        Command::LearnMode,
        Command::PairingStatus,
        Command::AskChallenge,
        Command::KeyTransfer,
        Command::KeyTransferAck,
        Command::Challenge,
        Command::ChallengeAnswer,
        Command::ErrorStatus,
    ] {
        assert_eq!(Command::from_byte(cmd as u8), Some(cmd));
    }
    assert_eq!(Command::from_byte(0x77), None);
}

#[test]
fn registry_lifecycle() {
    let mut registry = Registry::new(NullPersistence);
    let addr: Address = [0xFE, 0x90, 0xEE];

    assert!(registry.is_empty());
    assert!(registry.get(&addr).is_none());

    registry.start_pairing(addr, 1_000).unwrap();
    let record = registry.get(&addr).unwrap();
    assert_eq!(record.pairing_state, PairingState::Discovering);
    assert_eq!(record.pairing_start_time, 1_000);
    assert!(record.is_pairing());

    // A second address cannot start while the first is mid-pairing
    assert_eq!(
        registry.start_pairing([0x01, 0x02, 0x03], 1_000),
        Err(RegistryError::PairingBusy)
    );

    registry.store_system_key(&addr, &[0x11; 16], 2_000).unwrap();
    registry.complete_pairing(&addr).unwrap();
    let record = registry.get(&addr).unwrap();
    assert_eq!(record.pairing_state, PairingState::Paired);
    assert!(record.has_system_key);
    assert!(!record.is_pairing());

    registry.remove(&addr).unwrap();
    assert!(registry.get(&addr).is_none());
    assert_eq!(registry.remove(&addr), Err(RegistryError::NotFound));
}

#[test]
fn registry_pairing_timeout_sweep() {
    let mut registry = Registry::new(NullPersistence);
    let addr: Address = [0xFE, 0x90, 0xEE];
    registry.start_pairing(addr, 0).unwrap();

    registry.sweep_timed_out(29_000, 30_000);
    assert_eq!(registry.get(&addr).unwrap().pairing_state, PairingState::Discovering);

    registry.sweep_timed_out(30_001, 30_000);
    assert_eq!(registry.get(&addr).unwrap().pairing_state, PairingState::PairingFailed);
}

#[test]
fn registry_challenge_bookkeeping() {
    let mut registry = Registry::new(NullPersistence);
    let addr: Address = [0xFE, 0x90, 0xEE];
    registry.start_pairing(addr, 0).unwrap();

    let challenge = [1, 2, 3, 4, 5, 6];
    registry.store_challenge(&addr, &challenge, 10).unwrap();
    let record = registry.get(&addr).unwrap();
    assert!(record.has_pending_challenge);
    assert_eq!(record.last_challenge, challenge);

    let response = [9, 9, 9, 9, 9, 9];
    registry.store_response(&addr, &response, 20).unwrap();
    let record = registry.get(&addr).unwrap();
    assert!(!record.has_pending_challenge);
    assert_eq!(record.last_response, response);
}

#[test]
fn registry_clear_zeroizes_keys() {
    let mut registry = Registry::new(NullPersistence);
    let addr: Address = [0xFE, 0x90, 0xEE];
    registry.start_pairing(addr, 0).unwrap();
    registry.store_system_key(&addr, &[0xAA; 16], 0).unwrap();
    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn record_command_memory() {
    let mut registry = Registry::new(NullPersistence);
    let addr: Address = [0xFE, 0x90, 0xEE];
    registry.start_pairing(addr, 0).unwrap();

    let record = registry.get_mut(&addr).unwrap();
    record.store_command(0x00, &[0x01, 0xE7, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(record.last_command_byte, 0x00);
    assert_eq!(record.last_command.len(), 7);
    assert_eq!(record.last_command[0], 0x00);
    assert_eq!(record.last_command[1], 0x01);
    assert_eq!(record.last_command[2], 0xE7);
}

#[test]
fn hex_rendering() {
    assert_eq!(address_hex(&[0xFE, 0x90, 0xEE]).as_str(), "fe90ee");
    let key = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
        0xFF,
    ];
    assert_eq!(key_hex(&key).as_str(), "00112233445566778899aabbccddeeff");
}

#[test]
fn config_defaults_and_builders() {
    let config = ControllerConfig::default();
    assert_eq!(config.controller_address, DEFAULT_CONTROLLER_ADDRESS);
    assert!(config.system_key.is_none());
    assert_eq!(config.pairing_timeout_ms, 30_000);

    let config = ControllerConfig::new([1, 2, 3])
        .with_system_key([7; 16])
        .with_pairing_timeout(10_000);
    assert_eq!(config.controller_address, [1, 2, 3]);
    assert_eq!(config.system_key, Some([7; 16]));
    assert_eq!(config.pairing_timeout_ms, 10_000);
}
