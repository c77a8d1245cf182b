// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Local IPC session layer: pairs of connected stream sockets to in-process
//! clients, demultiplexed by an async accept/read loop.

pub mod local_server;
pub mod session;

pub use local_server::LocalSessionServer;
pub use session::{Session, TokenType};
