//! # Terminal Record Layouts
//!
//! Decoding of the user and attendance buffers a terminal returns, and
//! encoding of a user record for `CMD_USER_WRQ`.
//!
//! ## Buffer Shape
//! ```text
//! ┌──────────────────┬──────────┬──────────┬─────┐
//! │ total size (u32) │ record 0 │ record 1 │ ... │   record size = total / count
//! └──────────────────┴──────────┴──────────┴─────┘
//!
//! users       28 bytes  uid:u16 priv:u8 pw[5] name[8] card:u32 _ group:u8 tz:i16 user_id:u32
//!             72 bytes  uid:u16 priv:u8 pw[8] name[24] card:u32 _ group[7] _ user_id[24]
//!
//! attendance   8 bytes  uid:u16 status:u8 time:u32 punch:u8
//!             16 bytes  user_id:u32 time:u32 status:u8 punch:u8 _[2] workcode:u32
//!             40 bytes  uid:u16 user_id[24] status:u8 time:u32 punch:u8 _[8]
//! ```
//!
//! All integers are little-endian. Strings are NUL-padded.

use attendo_core::{Privilege, RemoteAttendanceRecord, RemoteUser};
use tracing::warn;

use super::packet::decode_time;
use crate::error::ProtocolError;

/// Compact user layout used by older firmware.
pub const USER_RECORD_COMPACT: usize = 28;

/// Extended user layout.
pub const USER_RECORD_EXTENDED: usize = 72;

// =============================================================================
// Field Readers
// =============================================================================

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Reads a NUL-padded string field.
fn str_at(buf: &[u8], at: usize, len: usize) -> String {
    let field = &buf[at..at + len];
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).trim().to_string()
}

/// Writes `value` into a zero-filled field of `len` bytes, truncating.
fn put_str(buf: &mut Vec<u8>, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(len);
    buf.extend_from_slice(&bytes[..take]);
    buf.resize(buf.len() + (len - take), 0);
}

/// Splits a size-prefixed buffer into its records.
fn split_records(buffer: &[u8], count: u32, kind: &str) -> Result<(usize, Vec<u8>), ProtocolError> {
    if buffer.len() < 4 {
        return Err(ProtocolError::Malformed(format!(
            "{kind} buffer of {} bytes has no size prefix",
            buffer.len()
        )));
    }
    let total = u32_at(buffer, 0) as usize;
    let body = &buffer[4..];
    if body.len() < total {
        return Err(ProtocolError::Malformed(format!(
            "{kind} buffer announces {total} bytes but carries {}",
            body.len()
        )));
    }
    let record_size = total / count as usize;
    Ok((record_size, body[..total].to_vec()))
}

// =============================================================================
// Users
// =============================================================================

/// Decodes the user buffer of `count` users.
///
/// ## Returns
/// The users and the record size the terminal uses, which `set_user` must
/// reuse.
pub fn decode_users(buffer: &[u8], count: u32) -> Result<(Vec<RemoteUser>, usize), ProtocolError> {
    if count == 0 {
        return Ok((Vec::new(), USER_RECORD_COMPACT));
    }
    let (record_size, body) = split_records(buffer, count, "user")?;

    let decode: fn(&[u8]) -> RemoteUser = match record_size {
        USER_RECORD_COMPACT => decode_compact_user,
        USER_RECORD_EXTENDED => decode_extended_user,
        other => {
            return Err(ProtocolError::Malformed(format!(
                "unsupported user record size {other}"
            )))
        }
    };

    let users = body.chunks_exact(record_size).map(decode).collect();
    Ok((users, record_size))
}

fn with_fallback_name(mut user: RemoteUser) -> RemoteUser {
    if user.name.is_empty() {
        user.name = format!("NN-{}", user.user_id);
    }
    user
}

fn decode_compact_user(rec: &[u8]) -> RemoteUser {
    with_fallback_name(RemoteUser {
        uid: u16_at(rec, 0),
        privilege: Privilege::from_device_flag(rec[2]),
        password: str_at(rec, 3, 5),
        name: str_at(rec, 8, 8),
        card: u32_at(rec, 16),
        group_id: rec[21].to_string(),
        user_id: u32_at(rec, 24).to_string(),
    })
}

fn decode_extended_user(rec: &[u8]) -> RemoteUser {
    with_fallback_name(RemoteUser {
        uid: u16_at(rec, 0),
        privilege: Privilege::from_device_flag(rec[2]),
        password: str_at(rec, 3, 8),
        name: str_at(rec, 11, 24),
        card: u32_at(rec, 35),
        group_id: str_at(rec, 40, 7),
        user_id: str_at(rec, 48, 24),
    })
}

/// Encodes `user` for `CMD_USER_WRQ` in the terminal's record layout.
///
/// ## Errors
/// `ProtocolError::Malformed` if the compact layout is used and `user_id` or
/// `group_id` is not numeric.
pub fn encode_user(user: &RemoteUser, record_size: usize) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(record_size);
    buf.extend_from_slice(&user.uid.to_le_bytes());
    buf.push(user.privilege.device_flag());

    if record_size == USER_RECORD_EXTENDED {
        put_str(&mut buf, &user.password, 8);
        put_str(&mut buf, &user.name, 24);
        buf.extend_from_slice(&user.card.to_le_bytes());
        buf.push(0);
        put_str(&mut buf, &user.group_id, 7);
        buf.push(0);
        put_str(&mut buf, &user.user_id, 24);
        return Ok(buf);
    }

    let group: u8 = if user.group_id.trim().is_empty() {
        0
    } else {
        user.group_id.trim().parse().map_err(|_| {
            ProtocolError::Malformed(format!("group_id {:?} does not fit a byte", user.group_id))
        })?
    };
    let user_id: u32 = user.user_id.trim().parse().map_err(|_| {
        ProtocolError::Malformed(format!("user_id {:?} is not numeric", user.user_id))
    })?;

    put_str(&mut buf, &user.password, 5);
    put_str(&mut buf, &user.name, 8);
    buf.extend_from_slice(&user.card.to_le_bytes());
    buf.push(0);
    buf.push(group);
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&user_id.to_le_bytes());
    Ok(buf)
}

// =============================================================================
// Attendance
// =============================================================================

/// Decodes the attendance buffer of `count` punches.
///
/// `users` resolves between uid and user_id for layouts that carry only one
/// of them. Punches with an impossible clock value are skipped.
pub fn decode_attendance(
    buffer: &[u8],
    count: u32,
    users: &[RemoteUser],
) -> Result<Vec<RemoteAttendanceRecord>, ProtocolError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let (record_size, body) = split_records(buffer, count, "attendance")?;
    if record_size != 8 && record_size != 16 && record_size < 40 {
        return Err(ProtocolError::Malformed(format!(
            "unsupported attendance record size {record_size}"
        )));
    }

    let mut records = Vec::with_capacity(count as usize);
    for rec in body.chunks_exact(record_size) {
        let decoded = match record_size {
            8 => decode_short_punch(rec, users),
            16 => decode_medium_punch(rec, users),
            _ => decode_long_punch(rec),
        };
        match decoded {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "Skipping unreadable punch"),
        }
    }
    Ok(records)
}

fn decode_short_punch(
    rec: &[u8],
    users: &[RemoteUser],
) -> Result<RemoteAttendanceRecord, ProtocolError> {
    let uid = u16_at(rec, 0);
    let user_id = users
        .iter()
        .find(|u| u.uid == uid)
        .map(|u| u.user_id.clone())
        .unwrap_or_else(|| uid.to_string());
    let timestamp = decode_time(u32_at(rec, 3))?;
    Ok(RemoteAttendanceRecord::new(uid, user_id, timestamp, rec[2], rec[7]))
}

fn decode_medium_punch(
    rec: &[u8],
    users: &[RemoteUser],
) -> Result<RemoteAttendanceRecord, ProtocolError> {
    let user_id = u32_at(rec, 0).to_string();
    let uid = users
        .iter()
        .find(|u| u.user_id == user_id)
        .map(|u| u.uid)
        .unwrap_or(0);
    let timestamp = decode_time(u32_at(rec, 4))?;
    Ok(RemoteAttendanceRecord::new(uid, user_id, timestamp, rec[8], rec[9]))
}

fn decode_long_punch(rec: &[u8]) -> Result<RemoteAttendanceRecord, ProtocolError> {
    let uid = u16_at(rec, 0);
    let user_id = str_at(rec, 2, 24);
    let timestamp = decode_time(u32_at(rec, 27))?;
    Ok(RemoteAttendanceRecord::new(uid, user_id, timestamp, rec[26], rec[31]))
}
