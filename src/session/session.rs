// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{
    buffer::CircularBuffer,
    codec::{self, NetPacket},
    error::{Result, ServiceError},
};

/// Trust tier of a client, reported at handshake time. Affects socket buffer
/// sizing (`TokenType::Native` clients get the larger 64 KiB buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Native,
    Hap,
    Shell,
}

impl TokenType {
    pub fn recv_buf_size(self) -> usize {
        match self {
            TokenType::Native => 64 * 1024,
            TokenType::Hap | TokenType::Shell => 32 * 1024,
        }
    }
}

/// A local client connection: identity plus a FIFO outbound queue and a
/// circular inbound buffer.
///
/// Created on handshake; destroyed on peer close or hang-up. Destruction
/// fires the session-deleted callback chain registered with the owning
/// [`crate::session::LocalSessionServer`].
#[derive(Debug)]
pub struct Session {
    pub fd: i32,
    pub pid: i32,
    pub uid: u32,
    pub program_name: String,
    pub token_type: TokenType,
    send_queue: mpsc::UnboundedSender<Bytes>,
    recv_buf: Mutex<CircularBuffer>,
}

impl Session {
    pub fn new(
        fd: i32,
        pid: i32,
        uid: u32,
        program_name: String,
        token_type: TokenType,
        send_queue: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            fd,
            pid,
            uid,
            program_name,
            token_type,
            send_queue,
            recv_buf: Mutex::new(CircularBuffer::new(token_type.recv_buf_size() * 2)),
        }
    }

    /// Encode and enqueue `payload` under `msg_id`. Preserves FIFO order
    /// relative to other sends on this session; never blocks (the queue is
    /// unbounded, matching the single-send-queue-per-session guarantee).
    pub fn send_msg(&self, msg_id: i32, payload: &[u8]) -> Result<()> {
        let wire = codec::encode(msg_id, payload);
        self.send_queue
            .send(wire)
            .map_err(|e| ServiceError::MsgSendFail(e.to_string()))
    }

    pub fn send_packet(&self, pkt: &NetPacket) -> Result<()> {
        self.send_msg(pkt.msg_id, &pkt.payload)
    }

    /// Append raw bytes received off the wire into this session's circular
    /// buffer, then drain as many complete packets as are now available.
    pub fn ingest(&self, bytes: &[u8]) -> std::result::Result<Vec<NetPacket>, ()> {
        let mut buf = self.recv_buf.lock().expect("recv_buf poisoned");
        if !buf.write(bytes) {
            // No capacity and caller did not drain first: treat as a
            // corrupted stream, the same as a header-length violation.
            return Err(());
        }
        codec::decode_stream(&mut buf).map_err(|_| ())
    }
}
