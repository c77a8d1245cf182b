// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::{buffer::CircularBuffer, codec, error::MAX_PACKET_BUF_SIZE};

/// One bound peer connection, identified by `networkId` (<= 64 chars).
///
/// At most one live `Peer` exists per `networkId` at any time (enforced by
/// [`super::SoftbusAdapter`]'s session map).
#[derive(Debug)]
pub struct Peer {
    pub network_id: String,
    send_queue: mpsc::UnboundedSender<bytes::Bytes>,
    recv_buf: Mutex<CircularBuffer>,
}

impl Peer {
    pub fn new(network_id: String, send_queue: mpsc::UnboundedSender<bytes::Bytes>) -> Self {
        Self {
            network_id,
            send_queue,
            recv_buf: Mutex::new(CircularBuffer::new(MAX_PACKET_BUF_SIZE * 2)),
        }
    }

    pub fn send_raw(&self, bytes: bytes::Bytes) -> bool {
        self.send_queue.send(bytes).is_ok()
    }

    /// Append inbound bytes and drain every complete packet now available.
    pub fn ingest(&self, bytes: &[u8]) -> Result<Vec<codec::NetPacket>, codec::DecodeError> {
        let mut buf = self.recv_buf.lock().expect("recv_buf poisoned");
        if !buf.write(bytes) {
            return Err(codec::DecodeError::Corrupted);
        }
        codec::decode_stream(&mut buf)
    }
}
