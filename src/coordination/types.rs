// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};

/// Keyboard-and-mouse sharing state, singleton per [`crate::services::Services`]
/// context. `FREE` means this device neither drives nor receives a shared
/// input stream; `OUT` means this device is the source (local input is being
/// relayed to `remote_network_id`); `IN` means this device is the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationState {
    Free,
    In,
    Out,
}

/// Outcome reported back to the local client that requested a coordination
/// action, or broadcast to subscribed listeners on an unsolicited
/// transition (peer-initiated start, soft-bus shutdown).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationMessage {
    PrepareSuccess,
    PrepareFail,
    UnprepareSuccess,
    ActivateSuccess,
    ActivateFail,
    DeactivateSuccess,
    DeactivateFail,
    SessionClosed,
    /// The peer NACKed the start request, or it timed out / failed to send.
    CooperationFail,
    /// Parameter validation failed before any soft-bus activity occurred.
    CooperationDeviceError,
}

/// Local-client event surface. `Listener`/`Enable` are broadcast to every
/// subscribed session; `Start`/`Stop`/`State` are one-shot replies routed to
/// the pid that issued the corresponding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinationEventKind {
    Listener,
    Enable,
    Start,
    Stop,
    State,
}

/// A single coordination notification, in the shape carried back to local
/// clients over the IPC wire (serialized with `serde_json`, matching the
/// peer protocol's encoding below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub pid: i32,
    pub user_data: i32,
    pub network_id: String,
    pub message: CoordinationMessageWire,
    pub state: Option<CoordinationStateWire>,
}

/// Wire-friendly mirror of [`CoordinationMessage`]; kept distinct so the
/// in-process enum can gain variants without becoming a breaking wire change
/// (callers match on `#[serde(rename_all = "SCREAMING_SNAKE_CASE")]` tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinationMessageWire {
    PrepareSuccess,
    PrepareFail,
    UnprepareSuccess,
    ActivateSuccess,
    ActivateFail,
    DeactivateSuccess,
    DeactivateFail,
    SessionClosed,
    CooperationFail,
    CooperationDeviceError,
}

impl From<CoordinationMessage> for CoordinationMessageWire {
    fn from(m: CoordinationMessage) -> Self {
        match m {
            CoordinationMessage::PrepareSuccess => Self::PrepareSuccess,
            CoordinationMessage::PrepareFail => Self::PrepareFail,
            CoordinationMessage::UnprepareSuccess => Self::UnprepareSuccess,
            CoordinationMessage::ActivateSuccess => Self::ActivateSuccess,
            CoordinationMessage::ActivateFail => Self::ActivateFail,
            CoordinationMessage::DeactivateSuccess => Self::DeactivateSuccess,
            CoordinationMessage::DeactivateFail => Self::DeactivateFail,
            CoordinationMessage::SessionClosed => Self::SessionClosed,
            CoordinationMessage::CooperationFail => Self::CooperationFail,
            CoordinationMessage::CooperationDeviceError => Self::CooperationDeviceError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinationStateWire {
    Free,
    In,
    Out,
}

impl From<CoordinationState> for CoordinationStateWire {
    fn from(s: CoordinationState) -> Self {
        match s {
            CoordinationState::Free => Self::Free,
            CoordinationState::In => Self::In,
            CoordinationState::Out => Self::Out,
        }
    }
}

/// Soft-bus wire messages exchanged between two devices' coordination state
/// machines, JSON-encoded and carried as the payload of a [`crate::codec::NetPacket`]
/// whose `msg_id` is [`super::COORDINATION_WIRE_MSG_ID`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    StartRequest { origin_network_id: String, start_device_id: i32 },
    StartResponse { is_success: bool, start_dhid: String, x_percent: f32, y_percent: f32 },
    StopRequest { is_unchained: bool },
    StopResponse { is_success: bool },
    StartOtherResult { origin_network_id: String },
    UnchainedNotification { local_network_id: String, remote_network_id: String, is_success: bool },
    FilterAddedNotification,
}
