//! # ZK Packet Framing
//!
//! Byte-level encoding of the ZKTeco TCP protocol.
//!
//! ## Frame Layout
//! ```text
//! ┌────────────────────────── TCP envelope ──────────────────────────┐
//! │ 50 50 82 7D │ payload length (u32 LE) │ payload ...              │
//! └─────────────┴─────────────────────────┴──────────────────────────┘
//!                                           │
//!        ┌──────────────────────────────────┘
//!        ▼
//! ┌─────────── command header (8 bytes, all u16 LE) ───────────┬──────┐
//! │ command │ checksum │ session id │ reply id                 │ data │
//! └─────────┴──────────┴────────────┴──────────────────────────┴──────┘
//! ```
//!
//! The checksum is a one's-complement sum over the header (with a zero
//! checksum field and the *previous* reply id) followed by the data; the
//! header that goes on the wire carries the incremented reply id.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::ProtocolError;

// =============================================================================
// Command and Reply Codes
// =============================================================================

pub const CMD_CONNECT: u16 = 1000;
pub const CMD_EXIT: u16 = 1001;
pub const CMD_ENABLEDEVICE: u16 = 1002;
pub const CMD_DISABLEDEVICE: u16 = 1003;
pub const CMD_AUTH: u16 = 1102;
pub const CMD_GET_TIME: u16 = 201;
pub const CMD_TESTVOICE: u16 = 1017;
pub const CMD_GET_FREE_SIZES: u16 = 50;
pub const CMD_USERTEMP_RRQ: u16 = 9;
pub const CMD_ATTLOG_RRQ: u16 = 13;
pub const CMD_USER_WRQ: u16 = 8;
pub const CMD_DELETE_USER: u16 = 18;
pub const CMD_REFRESHDATA: u16 = 1013;
pub const CMD_PREPARE_BUFFER: u16 = 1503;
pub const CMD_READ_BUFFER: u16 = 1504;
pub const CMD_FREE_DATA: u16 = 1502;

pub const CMD_PREPARE_DATA: u16 = 1500;
pub const CMD_DATA: u16 = 1501;
pub const CMD_ACK_OK: u16 = 2000;
pub const CMD_ACK_ERROR: u16 = 2001;
pub const CMD_ACK_DATA: u16 = 2002;
pub const CMD_ACK_UNAUTH: u16 = 2005;

/// Function code selecting user records in a buffered read.
pub const FCT_USER: u32 = 5;

/// Largest chunk requested per `CMD_READ_BUFFER`.
pub const MAX_CHUNK: u32 = 0xFFC0;

const USHRT_MAX: u32 = 0xFFFF;
const ENVELOPE_MAGIC: [u8; 4] = [0x50, 0x50, 0x82, 0x7D];

pub const HEADER_LEN: usize = 8;
pub const ENVELOPE_LEN: usize = 8;

/// Largest envelope payload accepted: a header plus one 64 KiB data part.
pub const MAX_PAYLOAD_LEN: usize = HEADER_LEN + 0x1_0000;

/// Reply id used for the very first command of a connection.
pub const INITIAL_REPLY_ID: u16 = (USHRT_MAX - 1) as u16;

// =============================================================================
// Packet
// =============================================================================

/// A decoded command or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u16,
    pub checksum: u16,
    pub session_id: u16,
    pub reply_id: u16,
    pub data: Vec<u8>,
}

impl Packet {
    /// Whether a response code means the command succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self.command, CMD_ACK_OK | CMD_PREPARE_DATA | CMD_DATA)
    }
}

/// Returns the reply id that follows `reply_id`.
pub fn next_reply_id(reply_id: u16) -> u16 {
    let next = u32::from(reply_id) + 1;
    if next >= USHRT_MAX {
        (next - USHRT_MAX) as u16
    } else {
        next as u16
    }
}

/// One's-complement 16-bit checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut sum: i64 = 0;
    let mut chunks = bytes.chunks_exact(2);

    for pair in &mut chunks {
        sum += i64::from(u16::from_le_bytes([pair[0], pair[1]]));
        if sum > i64::from(USHRT_MAX) {
            sum -= i64::from(USHRT_MAX);
        }
    }
    if let [last] = chunks.remainder() {
        sum += i64::from(*last);
    }
    while sum > i64::from(USHRT_MAX) {
        sum -= i64::from(USHRT_MAX);
    }

    let mut sum = !sum;
    while sum < 0 {
        sum += i64::from(USHRT_MAX);
    }
    sum as u16
}

/// Encodes a command header plus data (without the TCP envelope).
///
/// `reply_id` is the id of the previous exchange; the encoded header carries
/// [`next_reply_id`] of it.
pub fn encode_command(command: u16, session_id: u16, reply_id: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&session_id.to_le_bytes());
    buf.extend_from_slice(&reply_id.to_le_bytes());
    buf.extend_from_slice(data);

    let sum = checksum(&buf);
    buf[2..4].copy_from_slice(&sum.to_le_bytes());
    buf[6..8].copy_from_slice(&next_reply_id(reply_id).to_le_bytes());
    buf
}

/// Wraps a payload in the TCP envelope.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ENVELOPE_LEN + payload.len());
    buf.extend_from_slice(&ENVELOPE_MAGIC);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Validates an envelope and returns the payload length it announces.
///
/// ## Errors
/// `ProtocolError::Malformed` for a wrong magic or a length above
/// [`MAX_PAYLOAD_LEN`].
pub fn parse_envelope(envelope: &[u8; ENVELOPE_LEN]) -> Result<usize, ProtocolError> {
    if envelope[..4] != ENVELOPE_MAGIC {
        return Err(ProtocolError::Malformed(format!(
            "bad envelope magic {:02X?}",
            &envelope[..4]
        )));
    }
    let len = u32::from_le_bytes([envelope[4], envelope[5], envelope[6], envelope[7]]) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::Malformed(format!(
            "envelope announces {len} bytes, limit is {MAX_PAYLOAD_LEN}"
        )));
    }
    Ok(len)
}

/// Decodes an envelope payload into a packet.
pub fn decode_packet(payload: &[u8]) -> Result<Packet, ProtocolError> {
    if payload.len() < HEADER_LEN {
        return Err(ProtocolError::Malformed(format!(
            "packet of {} bytes is shorter than its header",
            payload.len()
        )));
    }
    let word = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);

    Ok(Packet {
        command: word(0),
        checksum: word(2),
        session_id: word(4),
        reply_id: word(6),
        data: payload[HEADER_LEN..].to_vec(),
    })
}

// =============================================================================
// Authentication
// =============================================================================

/// Derives the 4-byte comm key sent with `CMD_AUTH`.
pub fn make_commkey(password: u32, session_id: u16, ticks: u8) -> [u8; 4] {
    let mut k = password.reverse_bits().wrapping_add(u32::from(session_id));

    let b = k.to_le_bytes();
    let xored = [b[0] ^ b'Z', b[1] ^ b'K', b[2] ^ b'S', b[3] ^ b'O'];

    // swap the two u16 halves
    let swapped = [xored[2], xored[3], xored[0], xored[1]];
    k = u32::from_le_bytes(swapped);

    let b = k.to_le_bytes();
    [b[0] ^ ticks, b[1] ^ ticks, ticks, b[3] ^ ticks]
}

// =============================================================================
// Terminal Clock Encoding
// =============================================================================

/// Decodes the packed clock value terminals use for time and punches.
///
/// Every month is treated as 31 days long; impossible dates are reported as
/// malformed.
pub fn decode_time(value: u32) -> Result<NaiveDateTime, ProtocolError> {
    let mut t = value;
    let second = t % 60;
    t /= 60;
    let minute = t % 60;
    t /= 60;
    let hour = t % 24;
    t /= 24;
    let day = t % 31 + 1;
    t /= 31;
    let month = t % 12 + 1;
    t /= 12;
    let year = t as i32 + 2000;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| ProtocolError::Malformed(format!("invalid terminal time value {value}")))
}

/// Encodes a timestamp the way terminals store it.
pub fn encode_time(t: NaiveDateTime) -> u32 {
    let days = ((t.year() % 100) as u32 * 12 * 31) + (t.month0() * 31) + t.day0();
    days * 24 * 60 * 60 + (t.hour() * 60 + t.minute()) * 60 + t.second()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, s))
            .unwrap()
    }

    #[test]
    fn test_connect_packet_bytes() {
        let packet = encode_command(CMD_CONNECT, 0, INITIAL_REPLY_ID, &[]);
        // E8 03 | checksum | 00 00 | reply id 65534 + 1 wraps to 0
        assert_eq!(packet.len(), 8);
        assert_eq!(&packet[0..2], &[0xE8, 0x03]);
        assert_eq!(&packet[4..6], &[0x00, 0x00]);
        assert_eq!(&packet[6..8], &[0x00, 0x00]);

        // 1000 + 65534 = 66534 → 66534 - 65535 = 999 → !999 + 65535 = 64535
        assert_eq!(u16::from_le_bytes([packet[2], packet[3]]), 64535);
    }

    #[test]
    fn test_checksum_odd_length() {
        // 0x0201 + trailing 0x03 = 516 → !516 = -517 → +65535 = 65018
        assert_eq!(checksum(&[0x01, 0x02, 0x03]), 65018);
        // empty input: !0 = -1 → 65534
        assert_eq!(checksum(&[]), 65534);
    }

    #[test]
    fn test_reply_id_wraps() {
        assert_eq!(next_reply_id(0), 1);
        assert_eq!(next_reply_id(65533), 65534);
        assert_eq!(next_reply_id(65534), 0);
    }

    #[test]
    fn test_frame_and_parse() {
        let payload = encode_command(CMD_GET_TIME, 0x1234, 7, &[]);
        let framed = frame(&payload);
        assert_eq!(&framed[..4], &[0x50, 0x50, 0x82, 0x7D]);

        let mut envelope = [0u8; ENVELOPE_LEN];
        envelope.copy_from_slice(&framed[..ENVELOPE_LEN]);
        assert_eq!(parse_envelope(&envelope).unwrap(), payload.len());

        let packet = decode_packet(&framed[ENVELOPE_LEN..]).unwrap();
        assert_eq!(packet.command, CMD_GET_TIME);
        assert_eq!(packet.session_id, 0x1234);
        assert_eq!(packet.reply_id, 8);
        assert!(packet.data.is_empty());
    }

    #[test]
    fn test_bad_envelope_rejected() {
        let envelope = [0u8; ENVELOPE_LEN];
        assert!(matches!(
            parse_envelope(&envelope),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(decode_packet(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_oversize_envelope_rejected() {
        let envelope = [0x50, 0x50, 0x82, 0x7D, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            parse_envelope(&envelope),
            Err(ProtocolError::Malformed(_))
        ));

        let mut envelope = [0x50, 0x50, 0x82, 0x7D, 0, 0, 0, 0];
        envelope[4..].copy_from_slice(&(MAX_PAYLOAD_LEN as u32).to_le_bytes());
        assert_eq!(parse_envelope(&envelope).unwrap(), MAX_PAYLOAD_LEN);

        envelope[4..].copy_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_le_bytes());
        assert!(parse_envelope(&envelope).is_err());
    }

    #[test]
    fn test_commkey_without_password() {
        // password 0, session 0: k = 0 → "ZKSO" → halves swapped "SOZK"
        // → xor 50 on bytes 0, 1, 3; byte 2 = 50
        let key = make_commkey(0, 0, 50);
        assert_eq!(key, [b'S' ^ 50, b'O' ^ 50, 50, b'K' ^ 50]);
    }

    #[test]
    fn test_commkey_depends_on_session() {
        assert_ne!(make_commkey(1234, 1, 50), make_commkey(1234, 2, 50));
        assert_ne!(make_commkey(1234, 1, 50), make_commkey(4321, 1, 50));
    }

    #[test]
    fn test_time_codec() {
        let t = at(2024, 1, 1, 8, 0, 0);
        let encoded = encode_time(t);
        assert_eq!(decode_time(encoded).unwrap(), t);

        let t = at(2023, 12, 31, 23, 59, 59);
        assert_eq!(decode_time(encode_time(t)).unwrap(), t);

        assert_eq!(decode_time(0).unwrap(), at(2000, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_impossible_date_is_malformed() {
        // February 31st exists in the packed encoding only
        let value = ((24 * 12 * 31) + 31 + 30) * 86_400;
        assert!(decode_time(value).is_err());
    }
}
