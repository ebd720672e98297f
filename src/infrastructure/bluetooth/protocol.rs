//! Biosensor Protocol
//!
//! GATT identifiers, the fixed configuration/start command sequence, the
//! terminal stop command, and the notification sample decoding rule.

use uuid::Uuid;

/// Measurement service UUID
pub const SERVICE_UUID: &str = "fe8a042a-c4e3-11ea-87d0-0242ac130003";

/// Command/stream characteristic UUID. Commands are written here and samples
/// are notified back on the same characteristic.
pub const CHARACTERISTIC_UUID: &str = "fe8a0438-c4e3-11ea-87d0-0242ac130003";

pub const SERVICE: Uuid = Uuid::from_u128(0xfe8a042a_c4e3_11ea_87d0_0242ac130003);
pub const CHARACTERISTIC: Uuid = Uuid::from_u128(0xfe8a0438_c4e3_11ea_87d0_0242ac130003);

/// Address of the wearable this deployment talks to
pub const DEFAULT_DEVICE_ADDRESS: &str = "CA:DE:07:50:DE:0C";

/// Turns the LED off and ends streaming
pub const STOP_COMMAND: [u8; 3] = [0x80, 0x6f, 0x00];

/// Copy `head` into a zeroed array; the long configuration blocks are mostly
/// zero padding.
const fn zero_padded<const N: usize>(head: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let mut i = 0;
    while i < head.len() {
        out[i] = head[i];
        i += 1;
    }
    out
}

const SENSOR_BLOCK_2: [u8; 14] = zero_padded(&[0xc0, 0x72, 0x02, 0x0a]);
const SENSOR_BLOCK_3: [u8; 16] = zero_padded(&[0xc0, 0x72, 0x03, 0x0c]);
const SENSOR_BLOCK_5: [u8; 48] = zero_padded(&[
    0xc0, 0x72, 0x05, 0x2c, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
]);
const SENSOR_BLOCK_4: [u8; 96] = zero_padded(&[0xc0, 0x72, 0x04, 0x5c]);
const CHANNEL_2: [u8; 29] = zero_padded(&[
    0x80, 0x66, 0x1a, 0x02, 0x57, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x15, 0x00, 0x01,
]);
const CHANNEL_3: [u8; 26] = zero_padded(&[0x80, 0x66, 0x17, 0x03, 0x00, 0x02]);
const CHANNEL_4: [u8; 26] = zero_padded(&[0x80, 0x66, 0x17, 0x04]);
const CHANNEL_6: [u8; 25] = zero_padded(&[0x80, 0x66, 0x16, 0x06]);
const CHANNEL_7: [u8; 15] = zero_padded(&[0x80, 0x66, 0x0c, 0x07, 0x03, 0x03]);
const CHANNEL_8: [u8; 110] = zero_padded(&[0x80, 0x66, 0x7b, 0x08]);

/// Configuration and start sequence, written in order with acknowledgement.
///
/// Each entry is the minimal-length big-endian encoding of the device's
/// command word. The device starts streaming part-way through, not only
/// after the last entry.
pub const COMMAND_TABLE: &[&[u8]] = &[
    &[0x80, 0x64, 0x00],
    &[0x80, 0x71, 0x04, 0x03, 0x00, 0x00, 0x00],
    &[0xc0, 0x70, 0x01, 0x01, 0x01],
    &[0xc0, 0x70, 0x02, 0x03, 0x00, 0x00, 0x00],
    &[0xc0, 0x70, 0x03, 0x01, 0x00],
    &[0xc0, 0x70, 0x05, 0x02, 0x00, 0x00],
    &[0x80, 0x72, 0x01, 0x00],
    &SENSOR_BLOCK_2,
    &SENSOR_BLOCK_3,
    &SENSOR_BLOCK_5,
    &SENSOR_BLOCK_4,
    &[0x80, 0x76, 0x04, 0xa0, 0x86, 0x01, 0x00],
    &[
        0x80, 0x66, 0x17, 0x00, 0x07, 0x00, 0x07, 0x3f, 0x00, 0x00, 0x00, 0x00, 0x04, 0x02, 0x04,
        0x00, 0x03, 0x10, 0x10, 0x04, 0x00, 0x03, 0x10, 0x10, 0x10, 0x10,
    ],
    &[0x80, 0x66, 0x07, 0x01, 0x00, 0x00, 0x48, 0x00, 0x00, 0x00],
    &CHANNEL_2,
    &CHANNEL_3,
    &CHANNEL_4,
    &[
        0x80, 0x66, 0x0a, 0x05, 0x00, 0x00, 0x00, 0xa7, 0x64, 0x03, 0x07, 0x57, 0x07,
    ],
    &CHANNEL_6,
    &CHANNEL_7,
    &CHANNEL_8,
    &[
        0x80, 0x66, 0x1e, 0x09, 0x07, 0x00, 0x00, 0x0a, 0x9f, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x4f, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x01, 0x00, 0x00,
    ],
    &[0x80, 0x66, 0x06, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x80, 0x66, 0x03, 0x0b, 0x00, 0x00],
    &[
        0x80, 0x68, 0x14, 0x00, 0x01, 0x01, 0x05, 0x1e, 0x05, 0x19, 0x32, 0x06, 0x00, 0x00, 0x00,
        0x90, 0xd0, 0x03, 0x00, 0xd0, 0xbf, 0x0b, 0x00,
    ],
    &[0x80, 0x6c, 0x00],
    &[0x80, 0x69, 0x00],
    &[0x80, 0x77, 0x00],
    &[0x80, 0x6e, 0x00],
];

/// Decode a notification payload into samples.
///
/// # Payload Structure
///
/// ```text
/// [0-1]   : sample 0 (u16 big-endian)
/// [2-3]   : sample 1
/// ...
/// [2n]    : trailing odd byte, if any, is taken as a sample on its own
/// ```
///
/// This is the same as cutting the payload's hex string into 4-digit chunks
/// and reading each chunk as a base-16 integer.
pub fn decode_samples(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks(2)
        .map(|chunk| match chunk {
            &[hi, lo] => u16::from_be_bytes([hi, lo]),
            &[single] => u16::from(single),
            _ => unreachable!("chunks(2) yields one or two bytes"),
        })
        .collect()
}

/// Parse a UUID string from settings
pub fn parse_uuid(uuid_str: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| anyhow::anyhow!("Invalid UUID format '{}': {}", uuid_str, e))
}

/// Canonical form of a BLE address for comparison.
///
/// MAC-like inputs (`ca-de-07-50-de-0c`, `CADE0750DE0C`) become
/// `CA:DE:07:50:DE:0C`; anything else (macOS peripheral UUIDs) is only
/// trimmed and upper-cased.
pub fn normalize_address(raw: &str) -> String {
    let s = raw.trim();
    let hex: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let separators_only = s
        .chars()
        .all(|c| c.is_ascii_hexdigit() || matches!(c, ':' | '-'));

    if hex.len() == 12 && separators_only {
        let pairs: Vec<String> = hex
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
            .collect();
        return pairs.join(":");
    }

    s.to_ascii_uppercase()
}

pub fn addresses_match(a: &str, b: &str) -> bool {
    normalize_address(a) == normalize_address(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants_agree() {
        assert_eq!(parse_uuid(SERVICE_UUID).unwrap(), SERVICE);
        assert_eq!(parse_uuid(CHARACTERISTIC_UUID).unwrap(), CHARACTERISTIC);
    }

    #[test]
    fn test_command_table_shape() {
        assert_eq!(COMMAND_TABLE.len(), 29);
        assert_eq!(COMMAND_TABLE[0], &[0x80, 0x64, 0x00]);
        assert_eq!(COMMAND_TABLE[28], &[0x80, 0x6e, 0x00]);

        let lengths: Vec<usize> = COMMAND_TABLE.iter().map(|c| c.len()).collect();
        assert_eq!(
            lengths,
            vec![
                3, 7, 5, 7, 5, 6, 4, 14, 16, 48, 96, 7, 26, 10, 29, 26, 26, 13, 25, 15, 110, 33,
                9, 6, 23, 3, 3, 3, 3
            ]
        );

        // Minimal big-endian encoding never starts with a zero byte
        assert!(COMMAND_TABLE.iter().all(|c| c[0] != 0));
    }

    #[test]
    fn test_padded_blocks() {
        assert_eq!(&SENSOR_BLOCK_5[..4], &[0xc0, 0x72, 0x05, 0x2c]);
        assert_eq!(SENSOR_BLOCK_5[36], 0x01);
        assert!(SENSOR_BLOCK_5[37..].iter().all(|b| *b == 0));
        assert_eq!(CHANNEL_2[20], 0x01);
        assert!(CHANNEL_8[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_stop_command_bytes() {
        assert_eq!(STOP_COMMAND, *b"\x80o\x00");
    }

    #[test]
    fn test_decode_samples() {
        assert_eq!(decode_samples(&[0x01, 0x02, 0xff, 0xfe]), vec![0x0102, 0xfffe]);
        assert_eq!(decode_samples(&[0x12, 0x34, 0xab]), vec![0x1234, 0x00ab]);
        assert!(decode_samples(&[]).is_empty());
    }

    #[test]
    fn test_decode_round_trip() {
        let values: Vec<u16> = vec![0, 1, 255, 256, 4095, 40000, u16::MAX];
        let payload: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        assert_eq!(decode_samples(&payload), values);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("ca:de:07:50:de:0c"), DEFAULT_DEVICE_ADDRESS);
        assert_eq!(normalize_address("CA-DE-07-50-DE-0C"), DEFAULT_DEVICE_ADDRESS);
        assert_eq!(normalize_address(" cade0750de0c "), DEFAULT_DEVICE_ADDRESS);
        assert!(addresses_match("ca:de:07:50:de:0c", DEFAULT_DEVICE_ADDRESS));
        assert!(!addresses_match("CA:DE:07:50:DE:0D", DEFAULT_DEVICE_ADDRESS));
    }
}
