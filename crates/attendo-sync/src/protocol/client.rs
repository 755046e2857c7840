//! TCP client for ZKTeco terminals.

use async_trait::async_trait;
use attendo_core::{RemoteAttendanceRecord, RemoteUser};
use chrono::NaiveDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::packet::{self, Packet};
use super::records::{self, USER_RECORD_COMPACT, USER_RECORD_EXTENDED};
use super::{Endpoint, TerminalClient, TerminalConnector};
use crate::error::ProtocolError;

/// Tick byte mixed into the comm key.
const COMMKEY_TICKS: u8 = 50;

/// Size of the `CMD_GET_FREE_SIZES` reply that carries the counters.
const FREE_SIZES_LEN: usize = 80;

/// Length prefix in front of a buffered table.
const TABLE_PREFIX_LEN: u64 = 4;

/// Widest attendance record layout accepted when sizing a table.
const MAX_ATTENDANCE_RECORD: u64 = 64;

/// Ceiling for any buffered table, whatever the counters say.
const MAX_TABLE_LEN: u64 = 64 * 1024 * 1024;

/// Largest table the terminal may announce for `count` records of at most
/// `record_size` bytes. One chunk of slack covers records added after the
/// counters were read.
fn table_limit(count: u32, record_size: u64) -> u32 {
    let expected =
        TABLE_PREFIX_LEN + u64::from(count) * record_size + u64::from(packet::MAX_CHUNK);
    expected.min(MAX_TABLE_LEN) as u32
}

/// Record counters reported by `CMD_GET_FREE_SIZES`.
#[derive(Debug, Clone, Copy, Default)]
struct Sizes {
    users: u32,
    records: u32,
}

/// Talks to a terminal over TCP.
#[derive(Debug)]
pub struct ZkTcpClient {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    session_id: u16,
    reply_id: u16,
    /// User record layout, learned from the last user download.
    user_record_size: usize,
}

impl ZkTcpClient {
    pub fn new(endpoint: Endpoint) -> Self {
        ZkTcpClient {
            endpoint,
            stream: None,
            session_id: 0,
            reply_id: packet::INITIAL_REPLY_ID,
            user_record_size: USER_RECORD_COMPACT,
        }
    }

    // =========================================================================
    // Framing
    // =========================================================================

    async fn read_packet(&mut self) -> Result<Packet, ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;

        let mut envelope = [0u8; packet::ENVELOPE_LEN];
        stream.read_exact(&mut envelope).await?;
        let len = packet::parse_envelope(&envelope)?;

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        packet::decode_packet(&payload)
    }

    /// Sends one command and returns the terminal's reply.
    async fn send_command(&mut self, command: u16, data: &[u8]) -> Result<Packet, ProtocolError> {
        let payload = packet::encode_command(command, self.session_id, self.reply_id, data);
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
        stream.write_all(&packet::frame(&payload)).await?;

        let reply = self.read_packet().await?;
        self.reply_id = reply.reply_id;
        trace!(command, reply = reply.command, len = reply.data.len(), "Exchange");
        Ok(reply)
    }

    /// Sends a command that must be acknowledged.
    async fn expect_ok(&mut self, command: u16, data: &[u8]) -> Result<Packet, ProtocolError> {
        let reply = self.send_command(command, data).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(ProtocolError::CommandRejected {
                command,
                reply: reply.command,
            })
        }
    }

    // =========================================================================
    // Buffered Reads
    // =========================================================================

    async fn read_sizes(&mut self) -> Result<Sizes, ProtocolError> {
        let reply = self.expect_ok(packet::CMD_GET_FREE_SIZES, &[]).await?;
        if reply.data.len() < FREE_SIZES_LEN {
            return Err(ProtocolError::Malformed(format!(
                "free sizes reply of {} bytes",
                reply.data.len()
            )));
        }
        let field = |i: usize| {
            let at = i * 4;
            i32::from_le_bytes([
                reply.data[at],
                reply.data[at + 1],
                reply.data[at + 2],
                reply.data[at + 3],
            ])
        };
        Ok(Sizes {
            users: field(4).max(0) as u32,
            records: field(8).max(0) as u32,
        })
    }

    /// Downloads a whole table through the terminal's transfer buffer.
    ///
    /// A table announced larger than `limit` bytes is refused before anything
    /// is allocated for it.
    async fn read_with_buffer(
        &mut self,
        command: u16,
        fct: u32,
        ext: u32,
        limit: u32,
    ) -> Result<Vec<u8>, ProtocolError> {
        let mut request = Vec::with_capacity(11);
        request.push(1u8);
        request.extend_from_slice(&command.to_le_bytes());
        request.extend_from_slice(&fct.to_le_bytes());
        request.extend_from_slice(&ext.to_le_bytes());

        let reply = self.expect_ok(packet::CMD_PREPARE_BUFFER, &request).await?;
        if reply.command == packet::CMD_DATA {
            return Ok(reply.data);
        }
        if reply.data.len() < 5 {
            return Err(ProtocolError::Malformed(
                "prepare buffer reply carries no size".into(),
            ));
        }
        let size = u32::from_le_bytes([reply.data[1], reply.data[2], reply.data[3], reply.data[4]]);
        if size > limit {
            return Err(ProtocolError::Malformed(format!(
                "table of {size} bytes exceeds the {limit} bytes its counters allow"
            )));
        }
        debug!(command, size, "Reading buffered table");

        let mut data = Vec::with_capacity(size as usize);
        let mut start = 0u32;
        while start < size {
            let chunk = (size - start).min(packet::MAX_CHUNK);
            let bytes = self.read_chunk(start, chunk).await?;
            if bytes.is_empty() {
                return Err(ProtocolError::Malformed(format!(
                    "empty chunk at offset {start} of {size}"
                )));
            }
            start += bytes.len() as u32;
            data.extend_from_slice(&bytes);
        }

        self.expect_ok(packet::CMD_FREE_DATA, &[]).await?;
        Ok(data)
    }

    async fn read_chunk(&mut self, start: u32, size: u32) -> Result<Vec<u8>, ProtocolError> {
        let mut request = Vec::with_capacity(8);
        request.extend_from_slice(&start.to_le_bytes());
        request.extend_from_slice(&size.to_le_bytes());

        let reply = self.expect_ok(packet::CMD_READ_BUFFER, &request).await?;
        match reply.command {
            packet::CMD_DATA => Ok(reply.data),
            packet::CMD_PREPARE_DATA => {
                let mut data = Vec::with_capacity(size as usize);
                while data.len() < size as usize {
                    let part = self.read_packet().await?;
                    if part.command != packet::CMD_DATA {
                        return Err(ProtocolError::Malformed(format!(
                            "expected data frame, got {}",
                            part.command
                        )));
                    }
                    data.extend_from_slice(&part.data);
                }
                let done = self.read_packet().await?;
                if done.command != packet::CMD_ACK_OK {
                    return Err(ProtocolError::Malformed(format!(
                        "chunk not terminated by ACK, got {}",
                        done.command
                    )));
                }
                Ok(data)
            }
            other => Err(ProtocolError::CommandRejected {
                command: packet::CMD_READ_BUFFER,
                reply: other,
            }),
        }
    }
}

#[async_trait]
impl TerminalClient for ZkTcpClient {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        let address = self.endpoint.address();
        debug!(address = %address, "Opening terminal link");

        self.stream = Some(TcpStream::connect(&address).await?);
        self.session_id = 0;
        self.reply_id = packet::INITIAL_REPLY_ID;

        let reply = self.send_command(packet::CMD_CONNECT, &[]).await?;
        self.session_id = reply.session_id;

        match reply.command {
            packet::CMD_ACK_OK => Ok(()),
            packet::CMD_ACK_UNAUTH => {
                let key = packet::make_commkey(self.endpoint.password, self.session_id, COMMKEY_TICKS);
                let auth = self.send_command(packet::CMD_AUTH, &key).await?;
                if auth.command == packet::CMD_ACK_OK {
                    Ok(())
                } else {
                    self.stream = None;
                    Err(ProtocolError::Unauthorized)
                }
            }
            other => {
                self.stream = None;
                Err(ProtocolError::HandshakeFailed(format!(
                    "connect answered with {other}"
                )))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let result = self.expect_ok(packet::CMD_EXIT, &[]).await.map(|_| ());
        self.stream = None;
        result
    }

    async fn disable_device(&mut self) -> Result<(), ProtocolError> {
        self.expect_ok(packet::CMD_DISABLEDEVICE, &[]).await.map(|_| ())
    }

    async fn enable_device(&mut self) -> Result<(), ProtocolError> {
        self.expect_ok(packet::CMD_ENABLEDEVICE, &[]).await.map(|_| ())
    }

    async fn test_voice(&mut self, index: u32) -> Result<(), ProtocolError> {
        self.expect_ok(packet::CMD_TESTVOICE, &index.to_le_bytes())
            .await
            .map(|_| ())
    }

    async fn get_time(&mut self) -> Result<NaiveDateTime, ProtocolError> {
        let reply = self.expect_ok(packet::CMD_GET_TIME, &[]).await?;
        if reply.data.len() < 4 {
            return Err(ProtocolError::Malformed("time reply too short".into()));
        }
        packet::decode_time(u32::from_le_bytes([
            reply.data[0],
            reply.data[1],
            reply.data[2],
            reply.data[3],
        ]))
    }

    async fn get_users(&mut self) -> Result<Vec<RemoteUser>, ProtocolError> {
        let sizes = self.read_sizes().await?;
        if sizes.users == 0 {
            return Ok(Vec::new());
        }
        let limit = table_limit(sizes.users, USER_RECORD_EXTENDED as u64);
        let buffer = self
            .read_with_buffer(packet::CMD_USERTEMP_RRQ, packet::FCT_USER, 0, limit)
            .await?;
        if buffer.len() <= 4 {
            return Ok(Vec::new());
        }
        let (users, record_size) = records::decode_users(&buffer, sizes.users)?;
        self.user_record_size = record_size;
        Ok(users)
    }

    async fn get_attendance(&mut self) -> Result<Vec<RemoteAttendanceRecord>, ProtocolError> {
        let sizes = self.read_sizes().await?;
        if sizes.records == 0 {
            return Ok(Vec::new());
        }
        let users = self.get_users().await?;
        let limit = table_limit(sizes.records, MAX_ATTENDANCE_RECORD);
        let buffer = self
            .read_with_buffer(packet::CMD_ATTLOG_RRQ, 0, 0, limit)
            .await?;
        if buffer.len() <= 4 {
            return Ok(Vec::new());
        }
        records::decode_attendance(&buffer, sizes.records, &users)
    }

    async fn set_user(&mut self, user: &RemoteUser) -> Result<(), ProtocolError> {
        let record = records::encode_user(user, self.user_record_size)?;
        self.expect_ok(packet::CMD_USER_WRQ, &record).await.map(|_| ())
    }

    async fn delete_user(&mut self, uid: u16) -> Result<(), ProtocolError> {
        self.expect_ok(packet::CMD_DELETE_USER, &(uid as i16).to_le_bytes())
            .await
            .map(|_| ())
    }

    async fn refresh_data(&mut self) -> Result<(), ProtocolError> {
        self.expect_ok(packet::CMD_REFRESHDATA, &[]).await.map(|_| ())
    }
}

/// Connector producing [`ZkTcpClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZkConnector;

impl TerminalConnector for ZkConnector {
    fn client_for(&self, endpoint: &Endpoint) -> Box<dyn TerminalClient> {
        Box::new(ZkTcpClient::new(endpoint.clone()))
    }
}
