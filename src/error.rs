// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy shared by every subsystem in this crate.
//!
//! Library code returns [`ServiceError`] directly; the binary/glue layer
//! (`main.rs`, tests) is free to wrap it in `anyhow::Result` the way the
//! rest of this codebase's application layer does.

use thiserror::Error;

/// Maximum size of a single encoded `NetPacket`, header included.
pub const MAX_PACKET_BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("no peer connected for networkId={0}")]
    NotConnected(String),

    #[error("packet too large: {size} bytes exceeds max {max}")]
    TooLarge { size: usize, max: usize },

    #[error("operation not valid in current state: {0}")]
    Busy(&'static str),

    #[error("timed out waiting for: {0}")]
    TimedOut(&'static str),

    #[error("failed to send message: {0}")]
    MsgSendFail(String),

    #[error("corrupted packet stream")]
    CorruptedStream,

    #[error("exception: {0}")]
    Exception(String),
}

impl ServiceError {
    /// True for errors that should only tear down a single peer/session
    /// rather than the whole server.
    pub fn is_peer_local(&self) -> bool {
        matches!(self, ServiceError::CorruptedStream | ServiceError::MsgSendFail(_))
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
