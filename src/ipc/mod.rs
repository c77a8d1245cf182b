// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Stable local-IPC message id registry and request dispatch.

pub mod dispatch;

pub use dispatch::dispatch_request;

/// Stable local IPC message identifiers, carried as the `msg_id` field of
/// the wire header (`src/codec.rs`). Values are part of the external
/// contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MessageId {
    DevicestatusSubscribe = 0,
    DevicestatusUnsubscribe = 1,
    DevicestatusGetCache = 2,
    RegisterCoordinationMonitor = 10,
    UnregisterCoordinationMonitor = 11,
    PrepareCoordination = 12,
    UnprepareCoordination = 13,
    StartCoordination = 14,
    StopCoordination = 15,
    GetCoordinationState = 16,
    UpdatedDragStyle = 20,
    StartDrag = 21,
    StopDrag = 22,
    GetDragTargetPid = 23,
    GetDragTargetUdkey = 24,
    RegisterDragMonitor = 25,
    UnregisterDragMonitor = 26,
    SetDragWindowVisible = 27,
    GetShadowOffset = 28,
    UpdateShadowPic = 29,
    AllocSocketFd = 40,
}

impl MessageId {
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for MessageId {
    type Error = crate::error::ServiceError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        use MessageId::*;
        Ok(match value {
            0 => DevicestatusSubscribe,
            1 => DevicestatusUnsubscribe,
            2 => DevicestatusGetCache,
            10 => RegisterCoordinationMonitor,
            11 => UnregisterCoordinationMonitor,
            12 => PrepareCoordination,
            13 => UnprepareCoordination,
            14 => StartCoordination,
            15 => StopCoordination,
            16 => GetCoordinationState,
            20 => UpdatedDragStyle,
            21 => StartDrag,
            22 => StopDrag,
            23 => GetDragTargetPid,
            24 => GetDragTargetUdkey,
            25 => RegisterDragMonitor,
            26 => UnregisterDragMonitor,
            27 => SetDragWindowVisible,
            28 => GetShadowOffset,
            29 => UpdateShadowPic,
            40 => AllocSocketFd,
            other => {
                return Err(crate::error::ServiceError::InvalidParam(format!(
                    "unknown message id {other}"
                )));
            },
        })
    }
}
