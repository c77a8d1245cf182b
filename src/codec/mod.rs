// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-header + payload framing shared by the local IPC transport and the
//! soft-bus transport.
//!
//! Wire format: `PackHead { msg_id: i32, size: i32 }` (little-endian)
//! followed by exactly `size` bytes of payload. One-pass parsing, single
//! reader head, no copy until a full packet is available.

use bytes::Bytes;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, byteorder::little_endian::I32,
};

use crate::{buffer::CircularBuffer, error::MAX_PACKET_BUF_SIZE};

/// On-wire header: 8 bytes, little-endian.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct PackHead {
    pub msg_id: I32,
    pub size: I32,
}

pub const HEADER_LEN: usize = core::mem::size_of::<PackHead>();

/// A decoded application-level message: an id plus its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetPacket {
    pub msg_id: i32,
    pub payload: Bytes,
}

impl NetPacket {
    pub fn new(msg_id: i32, payload: impl Into<Bytes>) -> Self {
        Self { msg_id, payload: payload.into() }
    }
}

/// Encode `msg_id`/`payload` into a single contiguous wire buffer.
pub fn encode(msg_id: i32, payload: &[u8]) -> Bytes {
    let head = PackHead { msg_id: I32::new(msg_id), size: I32::new(payload.len() as i32) };
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Outcome of attempting to decode everything currently residual in `buf`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A header declared a negative or oversized payload length.
    Corrupted,
}

/// Drain as many complete packets as currently sit in `buf`.
///
/// Returns `Err(DecodeError::Corrupted)` the instant a header is found to
/// be invalid; the caller is expected to tear down only the connection that
/// produced `buf` (see `ServiceError::CorruptedStream`'s peer-local scope).
/// Any packets already decoded up to that point are still returned via the
/// `out` accumulator pattern below — callers that need partial results
/// should call [`decode_one`] directly in a loop instead.
pub fn decode_stream(buf: &mut CircularBuffer) -> Result<Vec<NetPacket>, DecodeError> {
    let mut packets = Vec::new();
    loop {
        match decode_one(buf)? {
            Some(p) => packets.push(p),
            None => return Ok(packets),
        }
    }
}

/// Attempt to decode a single packet from the front of `buf`.
///
/// Returns `Ok(None)` when fewer bytes are residual than a full packet
/// needs (underflow — wait for more bytes); the read cursor is left
/// untouched in that case.
pub fn decode_one(buf: &mut CircularBuffer) -> Result<Option<NetPacket>, DecodeError> {
    if buf.residual() < HEADER_LEN {
        return Ok(None);
    }

    let head_bytes = &buf.read_buf_exact(HEADER_LEN);
    let head = PackHead::read_from_bytes(head_bytes).map_err(|_| DecodeError::Corrupted)?;
    let size = head.size.get();

    if size < 0 || size as usize > MAX_PACKET_BUF_SIZE {
        return Err(DecodeError::Corrupted);
    }
    let size = size as usize;

    if HEADER_LEN + size > buf.residual() {
        return Ok(None);
    }

    buf.seek_read(HEADER_LEN);
    let payload = Bytes::copy_from_slice(&buf.read_buf_exact(size));
    buf.seek_read(size);

    Ok(Some(NetPacket { msg_id: head.msg_id.get(), payload }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_single_packet() {
        let mut buf = CircularBuffer::new(4096);
        let wire = encode(7, b"hello");
        assert!(buf.write(&wire));

        let packets = decode_stream(&mut buf).expect("decode should succeed");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].msg_id, 7);
        assert_eq!(&packets[0].payload[..], b"hello");
        assert_eq!(buf.residual(), 0);
    }

    #[test]
    fn round_trip_empty_payload() {
        let mut buf = CircularBuffer::new(4096);
        buf.write(&encode(9, b""));
        let packets = decode_stream(&mut buf).expect("decode should succeed");
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].msg_id, 9);
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn stream_splitting_is_chunk_boundary_independent() {
        let a = encode(7, b"hello");
        let b = encode(9, b"");
        let combined = [a.as_ref(), b.as_ref()].concat();

        for split in 0..=combined.len() {
            let mut buf = CircularBuffer::new(4096);
            let mut decoded = Vec::new();

            let (first, second) = combined.split_at(split);
            buf.write(first);
            decoded.extend(decode_stream(&mut buf).expect("decode should succeed"));
            buf.write(second);
            decoded.extend(decode_stream(&mut buf).expect("decode should succeed"));

            assert_eq!(decoded.len(), 2, "split at {split} produced {decoded:?}");
            assert_eq!(decoded[0].msg_id, 7);
            assert_eq!(&decoded[0].payload[..], b"hello");
            assert_eq!(decoded[1].msg_id, 9);
            assert!(decoded[1].payload.is_empty());
        }
    }

    #[test]
    fn underflow_waits_for_more_bytes() {
        let mut buf = CircularBuffer::new(4096);
        let wire = encode(1, b"0123456789");
        buf.write(&wire[..wire.len() - 2]);
        assert_eq!(decode_stream(&mut buf).expect("no error"), Vec::new());
        buf.write(&wire[wire.len() - 2..]);
        let packets = decode_stream(&mut buf).expect("decode should succeed");
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn oversized_length_is_corrupted() {
        let mut buf = CircularBuffer::new(4096);
        let head = PackHead { msg_id: I32::new(1), size: I32::new(i32::MAX) };
        buf.write(head.as_bytes());
        assert_eq!(decode_stream(&mut buf), Err(DecodeError::Corrupted));
    }

    #[test]
    fn negative_length_is_corrupted() {
        let mut buf = CircularBuffer::new(4096);
        let head = PackHead { msg_id: I32::new(1), size: I32::new(-1) };
        buf.write(head.as_bytes());
        assert_eq!(decode_stream(&mut buf), Err(DecodeError::Corrupted));
    }
}
