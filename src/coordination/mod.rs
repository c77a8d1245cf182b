// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! FREE/IN/OUT keyboard-and-mouse sharing negotiation between two devices,
//! carried over [`crate::softbus`] and surfaced to local clients through an
//! [`event_manager::EventManager`].

pub mod event_manager;
pub mod state_machine;
pub mod types;

pub use event_manager::EventManager;
pub use state_machine::{COORDINATION_WIRE_MSG_ID, CoordinationStateMachine};
pub use types::{CoordinationEvent, CoordinationMessage, CoordinationMessageWire, CoordinationState};
