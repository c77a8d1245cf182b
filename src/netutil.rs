// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared `socket2`-backed socket tuning helpers used by both the local
//! session server and the soft-bus adapter.

use std::{os::fd::AsFd, time::Duration};

use socket2::SockRef;
use tracing::debug;

pub fn configure_buffers(
    stream: &impl AsFd,
    send_size: usize,
    recv_size: usize,
) -> std::io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_send_buffer_size(send_size)?;
    sock.set_recv_buffer_size(recv_size)?;
    Ok(())
}

/// Best-effort TCP-style keepalive tuning. On transports that don't support
/// it (e.g. an `AF_UNIX` stand-in for the real soft-bus link) this logs and
/// is otherwise a no-op, since the original call is only ever load-bearing
/// over an actual TCP-backed soft-bus session.
pub fn configure_keepalive(stream: &impl AsFd, idle: Duration, interval: Duration, retries: u32) {
    let sock = SockRef::from(stream);
    let params = socket2::TcpKeepalive::new()
        .with_time(idle)
        .with_interval(interval)
        .with_retries(retries);
    if let Err(e) = sock.set_tcp_keepalive(&params) {
        debug!(error = %e, "keepalive tuning not supported on this transport");
    }
}
