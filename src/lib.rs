// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Device-side cross-device drag-and-drop and keyboard/mouse coordination
//! service: a local-IPC session server fronting a drag state machine, a
//! coordination (FREE/IN/OUT) state machine, and the soft-bus adapter that
//! carries coordination traffic to a peer device.

pub mod buffer;
pub mod cfg;
pub mod codec;
pub mod coordination;
pub mod dispatch;
pub mod drag;
pub mod error;
pub mod ipc;
pub mod netutil;
pub mod services;
pub mod session;
pub mod softbus;
